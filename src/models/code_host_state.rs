//! Per-code-host outcome of a permission sync, stored as a JSON list on the job.

use std::fmt;

use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Outcome of syncing against a single code host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeHostStatus {
    Success,
    Error,
}

impl fmt::Display for CodeHostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Result of syncing one job against one code host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeHostState {
    pub provider_id: String,
    pub provider_type: String,
    pub status: CodeHostStatus,
    pub message: String,
}

impl CodeHostState {
    pub fn success(
        provider_id: impl Into<String>,
        provider_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_type: provider_type.into(),
            status: CodeHostStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(
        provider_id: impl Into<String>,
        provider_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_type: provider_type.into(),
            status: CodeHostStatus::Error,
            message: message.into(),
        }
    }
}

/// Ordered list of code host outcomes, persisted as a JSON column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct CodeHostStates(pub Vec<CodeHostState>);

impl CodeHostStates {
    pub fn has_errors(&self) -> bool {
        self.iter().any(|state| state.status == CodeHostStatus::Error)
    }

    /// A successful sync that failed against at least one code host.
    pub fn is_partial_success(&self, success: bool) -> bool {
        success && self.has_errors()
    }

    /// Message of the first errored code host, if any.
    pub fn first_error_message(&self) -> Option<&str> {
        self.iter()
            .find(|state| state.status == CodeHostStatus::Error)
            .map(|state| state.message.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CodeHostState> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<CodeHostState>> for CodeHostStates {
    fn from(states: Vec<CodeHostState>) -> Self {
        Self(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_success_requires_success_and_an_error() {
        let mixed = CodeHostStates(vec![
            CodeHostState::success("https://github.com/", "github", "ok"),
            CodeHostState::error("https://gitlab.com/", "gitlab", "rate limited"),
        ]);
        assert!(mixed.is_partial_success(true));
        assert!(!mixed.is_partial_success(false));

        let clean = CodeHostStates(vec![CodeHostState::success(
            "https://github.com/",
            "github",
            "ok",
        )]);
        assert!(!clean.is_partial_success(true));
        assert!(!CodeHostStates::default().is_partial_success(true));
    }

    #[test]
    fn test_first_error_message() {
        let states = CodeHostStates(vec![
            CodeHostState::success("a", "github", "ok"),
            CodeHostState::error("b", "gitlab", "token expired"),
            CodeHostState::error("c", "bitbucket", "timeout"),
        ]);
        assert_eq!(states.first_error_message(), Some("token expired"));
        assert_eq!(CodeHostStates::default().first_error_message(), None);
    }

    #[test]
    fn test_json_shape() {
        let states = CodeHostStates(vec![CodeHostState::error("b", "gitlab", "boom")]);
        let json = serde_json::to_value(&states).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "provider_id": "b",
                "provider_type": "gitlab",
                "status": "error",
                "message": "boom"
            }])
        );
    }
}
