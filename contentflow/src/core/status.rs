//! Run status and attempt outcome enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no stage started yet.
    #[default]
    Pending,
    /// At least one `advance()` call has been made.
    Running,
    /// Every stage produced its output.
    Succeeded,
    /// A stage failed terminally.
    Failed,
}

impl RunStatus {
    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The outcome of a single stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The stage body returned an output.
    Success,
    /// The stage body returned a transient error.
    RetryableError,
    /// The stage body returned a fatal error.
    FatalError,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryableError => write!(f, "retryable_error"),
            Self::FatalError => write!(f, "fatal_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&RunStatus::Succeeded).unwrap(), "\"succeeded\"");
        assert_eq!(
            serde_json::to_string(&AttemptOutcome::RetryableError).unwrap(),
            "\"retryable_error\""
        );
    }

    #[test]
    fn test_display_matches_serde() {
        for status in [RunStatus::Pending, RunStatus::Running, RunStatus::Succeeded, RunStatus::Failed] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json.trim_matches('"'), status.to_string());
        }
    }
}
