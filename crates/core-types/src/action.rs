//! Captured user actions.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user-observable event in a Golden Session.
///
/// `step` is assigned by the recorder, never by the page. The `kind` carries the
/// type-specific context; on the wire it is split into `type` and `context` keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "ActionWire", try_from = "ActionWire")]
pub struct Action {
    pub step: u64,
    pub kind: ActionKind,
    pub selector: Option<String>,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub performance: ActionPerformance,
    pub wait_condition: Option<WaitCondition>,
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Recorded gap to the previous action, used as the replay baseline.
    pub fn baseline_ms(&self) -> u64 {
        self.performance.time_since_last_action
    }

    /// Attach a wait condition unless one is already present. Returns whether it was applied.
    pub fn offer_wait_condition(&mut self, condition: WaitCondition) -> bool {
        if self.wait_condition.is_some() {
            return false;
        }
        self.wait_condition = Some(condition);
        true
    }

    /// Short human-readable description used in recorder logs.
    pub fn summary(&self) -> String {
        match &self.kind {
            ActionKind::Navigation(nav) => format!(
                "#{} navigation ({}) {} -> {}",
                self.step,
                nav.navigation_method.as_str(),
                nav.from,
                nav.to
            ),
            ActionKind::Input(field) | ActionKind::Select(field) => format!(
                "#{} {} {} = {:?}",
                self.step,
                self.type_name(),
                self.selector.as_deref().unwrap_or("<none>"),
                field.value.as_deref().unwrap_or("")
            ),
            ActionKind::Click(element) | ActionKind::Submit(element) => {
                let label = element
                    .text
                    .as_deref()
                    .map(|text| format!(" \"{}\"", truncate(text, 40)))
                    .unwrap_or_default();
                format!(
                    "#{} {} {}{}",
                    self.step,
                    self.type_name(),
                    self.selector.as_deref().unwrap_or("<none>"),
                    label
                )
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push('…');
        out
    }
}

/// Variant payload of an [`Action`].
#[derive(Clone, Debug, PartialEq)]
pub enum ActionKind {
    Click(ElementContext),
    Input(FieldContext),
    Select(FieldContext),
    Submit(ElementContext),
    Navigation(NavigationContext),
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        self.action_type().as_str()
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            ActionKind::Click(_) => ActionType::Click,
            ActionKind::Input(_) => ActionType::Input,
            ActionKind::Select(_) => ActionType::Select,
            ActionKind::Submit(_) => ActionType::Submit,
            ActionKind::Navigation(_) => ActionType::Navigation,
        }
    }

    /// Decode the `context` payload that accompanies `action_type` on the wire.
    pub fn from_context(action_type: ActionType, context: Value) -> Result<Self, serde_json::Error> {
        let context = if context.is_null() {
            Value::Object(Default::default())
        } else {
            context
        };
        Ok(match action_type {
            ActionType::Click => ActionKind::Click(serde_json::from_value(context)?),
            ActionType::Submit => ActionKind::Submit(serde_json::from_value(context)?),
            ActionType::Input => ActionKind::Input(serde_json::from_value(context)?),
            ActionType::Select => ActionKind::Select(serde_json::from_value(context)?),
            ActionType::Navigation => ActionKind::Navigation(serde_json::from_value(context)?),
        })
    }

    /// Element metadata for element-bound actions.
    pub fn element(&self) -> Option<&ElementContext> {
        match self {
            ActionKind::Click(element) | ActionKind::Submit(element) => Some(element),
            ActionKind::Input(field) | ActionKind::Select(field) => Some(&field.element),
            ActionKind::Navigation(_) => None,
        }
    }

    pub fn field(&self) -> Option<&FieldContext> {
        match self {
            ActionKind::Input(field) | ActionKind::Select(field) => Some(field),
            _ => None,
        }
    }
}

/// Discriminant of [`ActionKind`] as it appears in the `type` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Input,
    Select,
    Submit,
    Navigation,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Input => "input",
            ActionType::Select => "select",
            ActionType::Submit => "submit",
            ActionType::Navigation => "navigation",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata extracted from the resolved target element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementContext {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub class_list: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Visible text, only for text-bearing tags, at most 200 chars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ElementContext {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag_name.eq_ignore_ascii_case(tag)
    }

    /// `type` attribute of an input, lowercased.
    pub fn input_type(&self) -> Option<String> {
        self.attribute("type").map(|value| value.to_ascii_lowercase())
    }
}

/// Element metadata plus the form value of an input/select/textarea.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldContext {
    #[serde(flatten)]
    pub element: ElementContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

impl FieldContext {
    /// Checkbox and radio changes are replayed as clicks.
    pub fn is_toggle(&self) -> bool {
        matches!(
            self.element.input_type().as_deref(),
            Some("checkbox") | Some("radio")
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationMethod {
    #[serde(rename = "pushState")]
    PushState,
    #[serde(rename = "replaceState")]
    ReplaceState,
    #[serde(rename = "popstate")]
    Popstate,
}

impl NavigationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationMethod::PushState => "pushState",
            NavigationMethod::ReplaceState => "replaceState",
            NavigationMethod::Popstate => "popstate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationContext {
    pub navigation_method: NavigationMethod,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPerformance {
    /// Milliseconds since the previous action; zero for the first one.
    pub time_since_last_action: u64,
}

/// What the recorder observed settling after an action.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum WaitCondition {
    Navigation(String),
    Selector(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionWire {
    step: u64,
    #[serde(rename = "type")]
    action_type: ActionType,
    selector: Option<String>,
    url: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    performance: ActionPerformance,
    #[serde(default)]
    context: Value,
    #[serde(default)]
    wait_condition: Option<WaitCondition>,
}

impl From<Action> for ActionWire {
    fn from(action: Action) -> Self {
        let action_type = action.kind.action_type();
        let context = match action.kind {
            ActionKind::Click(element) | ActionKind::Submit(element) => {
                serde_json::to_value(element)
            }
            ActionKind::Input(field) | ActionKind::Select(field) => serde_json::to_value(field),
            ActionKind::Navigation(nav) => serde_json::to_value(nav),
        }
        .unwrap_or(Value::Null);

        Self {
            step: action.step,
            action_type,
            selector: action.selector,
            url: action.url,
            timestamp: action.timestamp,
            performance: action.performance,
            context,
            wait_condition: action.wait_condition,
        }
    }
}

impl TryFrom<ActionWire> for Action {
    type Error = serde_json::Error;

    fn try_from(wire: ActionWire) -> Result<Self, Self::Error> {
        let kind = ActionKind::from_context(wire.action_type, wire.context)?;
        Ok(Self {
            step: wire.step,
            kind,
            selector: wire.selector,
            url: wire.url,
            timestamp: wire.timestamp,
            performance: wire.performance,
            wait_condition: wire.wait_condition,
        })
    }
}
