//! The exported recording.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error_entry::ErrorEntry;
use crate::ModelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub action_count: usize,
    #[serde(default)]
    pub error_count: usize,
}

impl SessionMetadata {
    pub fn begin(session_id: impl Into<String>, start_url: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: Utc::now(),
            end_time: None,
            start_url,
            viewport: None,
            user_agent: None,
            action_count: 0,
            error_count: 0,
        }
    }
}

/// Recorded reference journey. Action order is causal order is replay order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoldenSession {
    pub metadata: SessionMetadata,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

impl GoldenSession {
    /// Freeze a recording: counts are filled in and errors sorted by descending count.
    pub fn freeze(
        mut metadata: SessionMetadata,
        actions: Vec<Action>,
        mut errors: Vec<ErrorEntry>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        errors.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        metadata.end_time = Some(ended_at);
        metadata.action_count = actions.len();
        metadata.error_count = errors.len();
        Self {
            metadata,
            actions,
            errors,
        }
    }

    /// Replay start URL: the first action's document URL, else the recorded start URL.
    pub fn start_url(&self) -> Option<&str> {
        self.actions
            .first()
            .map(|action| action.url.as_str())
            .filter(|url| !url.is_empty())
            .or(self.metadata.start_url.as_deref())
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let session: GoldenSession = serde_json::from_str(raw)?;
        session.validate()?;
        Ok(session)
    }

    pub fn to_json_pretty(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Steps must be strictly increasing.
    pub fn validate(&self) -> Result<(), ModelError> {
        for pair in self.actions.windows(2) {
            if pair[1].step <= pair[0].step {
                return Err(ModelError::InvalidSession(format!(
                    "step {} follows step {}",
                    pair[1].step, pair[0].step
                )));
            }
        }
        Ok(())
    }
}
