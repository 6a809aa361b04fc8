//! Outcome of a delegated action or gate

use std::fmt;
use std::time::Duration;

use crate::error::CoreError;

/// Result of one step of a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Step finished; the state machine may advance
    Complete,
    /// Step needs another tick; stay in the current state
    Continue {
        /// Suggested delay before the next tick
        delay: Duration,
    },
    /// Step failed for this tick
    Failed(CoreError),
}

impl ActionOutcome {
    /// Continue after the given delay
    #[must_use]
    pub fn continue_after(delay: Duration) -> Self {
        ActionOutcome::Continue { delay }
    }

    /// Fail with the given error
    #[must_use]
    pub fn failed(error: impl Into<CoreError>) -> Self {
        ActionOutcome::Failed(error.into())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, ActionOutcome::Complete)
    }

    /// Error carried by a failed outcome
    #[must_use]
    pub fn error(&self) -> Option<&CoreError> {
        match self {
            ActionOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Short label for logs and status reports
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Complete => "complete",
            ActionOutcome::Continue { .. } => "continue",
            ActionOutcome::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Complete => f.write_str("complete"),
            ActionOutcome::Continue { delay } => write!(f, "continue after {delay:?}"),
            ActionOutcome::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}
