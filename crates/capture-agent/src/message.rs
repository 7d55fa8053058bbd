//! Messages the in-page agent posts through its binding.

use chrono::{DateTime, Utc};
use goldpath_core_types::{Action, ActionKind, ActionPerformance, ActionType, WaitCondition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CaptureError;

/// One payload received through the agent binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AgentMessage {
    /// Posted as soon as a gesture is handled.
    Action(CapturedAction),
    /// Posted when the settlement window for `token` closes.
    Settled {
        token: u64,
        #[serde(default, rename = "waitCondition")]
        wait_condition: Option<WaitCondition>,
    },
}

impl AgentMessage {
    pub fn decode(payload: &str) -> Result<Self, CaptureError> {
        let value: Value = serde_json::from_str(payload)?;
        match value.get("kind").and_then(Value::as_str) {
            Some("action") | Some("settled") => Ok(serde_json::from_value(value)?),
            Some(other) => Err(CaptureError::UnknownKind(other.to_string())),
            None => Err(CaptureError::MissingKind),
        }
    }

    pub fn token(&self) -> u64 {
        match self {
            AgentMessage::Action(action) => action.token,
            AgentMessage::Settled { token, .. } => *token,
        }
    }
}

/// An action as the page reported it, before the recorder numbers it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedAction {
    /// Agent-local correlation id, reused by the matching `settled` message.
    pub token: u64,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub selector: Option<String>,
    pub url: String,
    /// Page clock, milliseconds since the epoch.
    pub timestamp: i64,
    /// Milliseconds since the document started loading.
    #[serde(default)]
    pub since_load_ms: u64,
    #[serde(default)]
    pub context: Value,
}

impl CapturedAction {
    pub fn captured_at(&self) -> Result<DateTime<Utc>, CaptureError> {
        DateTime::from_timestamp_millis(self.timestamp)
            .ok_or(CaptureError::InvalidTimestamp(self.timestamp))
    }

    /// Number the action and attach its baseline.
    pub fn into_action(self, step: u64, time_since_last_action: u64) -> Result<Action, CaptureError> {
        let timestamp = self.captured_at()?;
        let kind = ActionKind::from_context(self.action_type, self.context).map_err(|source| {
            CaptureError::InvalidContext {
                action_type: self.action_type,
                source,
            }
        })?;
        let selector = match kind {
            ActionKind::Navigation(_) => None,
            _ => self.selector,
        };
        Ok(Action {
            step,
            kind,
            selector,
            url: self.url,
            timestamp,
            performance: ActionPerformance {
                time_since_last_action,
            },
            wait_condition: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldpath_core_types::NavigationMethod;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_input_action() {
        let payload = json!({
            "kind": "action",
            "token": 7,
            "type": "input",
            "selector": "input[name=\"email\"]",
            "url": "https://shop.test/signup",
            "timestamp": 1_714_557_600_000i64,
            "sinceLoadMs": 5400,
            "context": {
                "tagName": "input",
                "classList": ["field"],
                "attributes": { "name": "email", "type": "email" },
                "value": "ada@example.test"
            }
        })
        .to_string();

        let AgentMessage::Action(captured) = AgentMessage::decode(&payload).unwrap() else {
            panic!("expected action");
        };
        assert_eq!(captured.token, 7);
        assert_eq!(captured.since_load_ms, 5400);

        let action = captured.into_action(3, 250).unwrap();
        assert_eq!(action.step, 3);
        assert_eq!(action.baseline_ms(), 250);
        let field = action.kind.field().unwrap();
        assert_eq!(field.value.as_deref(), Some("ada@example.test"));
        assert_eq!(field.element.attribute("name"), Some("email"));
        assert_eq!(action.timestamp.timestamp_millis(), 1_714_557_600_000);
    }

    #[test]
    fn navigation_actions_never_carry_selectors() {
        let payload = json!({
            "kind": "action",
            "token": 2,
            "type": "navigation",
            "selector": "body",
            "url": "https://app.test/orders",
            "timestamp": 1_714_557_600_000i64,
            "context": { "navigationMethod": "pushState", "from": "https://app.test/", "to": "https://app.test/orders" }
        })
        .to_string();
        let AgentMessage::Action(captured) = AgentMessage::decode(&payload).unwrap() else {
            panic!("expected action");
        };
        let action = captured.into_action(1, 0).unwrap();
        assert!(action.selector.is_none());
        match action.kind {
            ActionKind::Navigation(nav) => assert_eq!(nav.navigation_method, NavigationMethod::PushState),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_settled_with_and_without_condition() {
        let selector = AgentMessage::decode(
            r##"{"kind":"settled","token":4,"waitCondition":{"type":"selector","value":"#toast"}}"##,
        )
        .unwrap();
        assert_eq!(
            selector,
            AgentMessage::Settled {
                token: 4,
                wait_condition: Some(WaitCondition::Selector("#toast".into())),
            }
        );
        let none = AgentMessage::decode(r#"{"kind":"settled","token":5,"waitCondition":null}"#).unwrap();
        assert_eq!(none.token(), 5);
        assert!(matches!(none, AgentMessage::Settled { wait_condition: None, .. }));
    }

    #[test]
    fn rejects_unknown_and_malformed_payloads() {
        assert!(matches!(
            AgentMessage::decode(r#"{"kind":"hover","token":1}"#),
            Err(CaptureError::UnknownKind(kind)) if kind == "hover"
        ));
        assert!(matches!(
            AgentMessage::decode(r#"{"token":1}"#),
            Err(CaptureError::MissingKind)
        ));
        assert!(matches!(
            AgentMessage::decode("not json"),
            Err(CaptureError::Malformed(_))
        ));
    }

    #[test]
    fn context_mismatch_is_reported_with_type() {
        let captured = CapturedAction {
            token: 1,
            action_type: ActionType::Navigation,
            selector: None,
            url: "https://app.test/".into(),
            timestamp: 0,
            since_load_ms: 0,
            context: json!({ "tagName": "a" }),
        };
        let err = captured.into_action(1, 0).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidContext { action_type: ActionType::Navigation, .. }
        ));
    }
}
