use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What went wrong, as far as callers need to branch on it.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("browser launch failed")]
    LaunchFailed,
    /// A command or wait ran past its deadline.
    #[error("timed out")]
    Timeout,
    /// The browser answered with a protocol error, or the connection is gone.
    #[error("devtools protocol failure")]
    Protocol,
    #[error("target element not found")]
    TargetNotFound,
    #[error("target element not interactable")]
    NotInteractable,
    #[error("option not found")]
    OptionNotFound,
    #[error("internal error")]
    Internal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    /// Set when trying the same command again may succeed.
    pub retriable: bool,
    /// Structured context for operators, e.g. the locations searched for a browser binary.
    pub data: Option<serde_json::Value>,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn internal(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Internal).with_hint(hint)
    }

    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..self
        }
    }

    pub fn retriable(self, retriable: bool) -> Self {
        Self { retriable, ..self }
    }

    pub fn with_data(self, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..self
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == AdapterErrorKind::Timeout
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{}: {hint}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::internal(format!("malformed protocol payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_appends_hint() {
        let err = AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint("#pay");
        assert_eq!(err.to_string(), "target element not found: #pay");
        assert_eq!(
            AdapterError::new(AdapterErrorKind::Timeout).to_string(),
            "timed out"
        );
    }
}
