//! Stage graph transitions for a single run.

use crate::core::types::RunState;

/// Pipeline stage. Terminal stages end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generating,
    Validating,
    Executing,
    Rendering,
    Done,
    FailedMaxRetries,
    FailedExecution,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Done | Stage::FailedMaxRetries | Stage::FailedExecution
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Generating => "generating",
            Stage::Validating => "validating",
            Stage::Executing => "executing",
            Stage::Rendering => "rendering",
            Stage::Done => "done",
            Stage::FailedMaxRetries => "failed_max_retries",
            Stage::FailedExecution => "failed_execution",
        }
    }
}

/// Route after query validation.
///
/// An invalid query loops back to generation while `retry_count` is below
/// `max_retries`; the caller increments the count when it takes that edge.
pub fn next_after_validation(state: &RunState, max_retries: u32) -> Stage {
    if state.query_valid {
        Stage::Executing
    } else if state.retry_count < max_retries {
        Stage::Generating
    } else {
        Stage::FailedMaxRetries
    }
}

/// Route after execution. Engine failures are terminal, never retried.
pub fn next_after_execution(state: &RunState) -> Stage {
    if state.execution_failed {
        Stage::FailedExecution
    } else {
        Stage::Rendering
    }
}
