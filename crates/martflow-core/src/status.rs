//! Per-unit run status

use serde::{Deserialize, Serialize};

/// Lifecycle of a unit within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// Whether the unit has reached its final status for this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a unit was skipped without being executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A transitive upstream unit failed
    UpstreamFailed { ancestor: String },

    /// Fail-fast mode halted the run after `trigger` failed
    FailFast { trigger: String },

    /// The run was cancelled before the unit started
    Cancelled,
}

impl SkipReason {
    /// The failed unit this skip traces back to, if any
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::UpstreamFailed { ancestor } => Some(ancestor),
            Self::FailFast { trigger } => Some(trigger),
            Self::Cancelled => None,
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamFailed { ancestor } => write!(f, "upstream unit '{}' failed", ancestor),
            Self::FailFast { trigger } => {
                write!(f, "run halted after '{}' failed (fail-fast)", trigger)
            }
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}
