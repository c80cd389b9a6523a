//! Generation stage: one model call turned into a candidate plus an optional
//! stage error. Never fails past its boundary.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::fence::strip_code_fence;
use crate::core::types::RunState;
use crate::io::generator::{GenerationError, TextGenerator};
use crate::io::prompt::{PromptBuilder, SqlFeedback};

/// Why a generation call produced no usable candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("generation timeout, retry")]
    Timeout,
    #[error("generation error: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Fence-stripped reply; empty when `stage_error` is set.
    pub candidate: String,
    pub stage_error: Option<StageError>,
}

impl GenerationOutcome {
    fn failed(error: StageError) -> Self {
        Self {
            candidate: String::new(),
            stage_error: Some(error),
        }
    }
}

/// Messages from transports that report deadlines as plain errors.
pub fn is_timeout_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out")
}

/// Call the generator under `timeout` and classify the result.
#[instrument(skip_all, fields(prompt_bytes = prompt.len(), timeout_secs = timeout.as_secs()))]
pub async fn generate(
    generator: &dyn TextGenerator,
    prompt: &str,
    timeout: Duration,
) -> GenerationOutcome {
    let reply = match tokio::time::timeout(timeout, generator.generate(prompt)).await {
        Err(_elapsed) => {
            warn!("generation deadline elapsed");
            return GenerationOutcome::failed(StageError::Timeout);
        }
        Ok(reply) => reply,
    };

    match reply {
        Ok(text) => {
            let candidate = strip_code_fence(&text);
            debug!(candidate_bytes = candidate.len(), "generation succeeded");
            GenerationOutcome {
                candidate,
                stage_error: None,
            }
        }
        Err(GenerationError::Timeout) => {
            warn!("generator reported a timeout");
            GenerationOutcome::failed(StageError::Timeout)
        }
        Err(GenerationError::Failed(message)) if is_timeout_message(&message) => {
            warn!(%message, "generator failed with a timeout message");
            GenerationOutcome::failed(StageError::Timeout)
        }
        Err(GenerationError::Failed(message)) => {
            warn!(%message, "generation failed");
            GenerationOutcome::failed(StageError::Failed(message))
        }
    }
}

/// Generate the next query candidate for `state`.
///
/// On a retry the prompt carries the previous candidate and the validator's
/// reason.
pub async fn generate_query(
    generator: &dyn TextGenerator,
    prompts: &PromptBuilder,
    state: &RunState,
    timeout: Duration,
) -> GenerationOutcome {
    let feedback = (state.retry_count > 0).then(|| SqlFeedback {
        previous_sql: state.candidate_query.clone(),
        reason: state.query_error.clone().unwrap_or_default(),
    });
    match prompts.build_sql(&state.question, feedback.as_ref()) {
        Ok(prompt) => generate(generator, &prompt, timeout).await,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "sql prompt could not be built");
            GenerationOutcome::failed(StageError::Failed(format!("{err:#}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, StalledGenerator, prompt_builder};

    #[tokio::test]
    async fn strips_fences_from_reply() {
        let generator = ScriptedGenerator::replies(["```sql\nSELECT 1 LIMIT 1\n```"]);
        let outcome = generate(&generator, "p", Duration::from_secs(5)).await;
        assert_eq!(outcome.candidate, "SELECT 1 LIMIT 1");
        assert_eq!(outcome.stage_error, None);
    }

    #[tokio::test]
    async fn declared_timeout_is_retryable_timeout() {
        let generator = ScriptedGenerator::new([Err(GenerationError::Timeout)]);
        let outcome = generate(&generator, "p", Duration::from_secs(5)).await;
        assert_eq!(outcome.candidate, "");
        assert_eq!(outcome.stage_error, Some(StageError::Timeout));
        assert_eq!(
            outcome.stage_error.map(|err| err.to_string()).as_deref(),
            Some("generation timeout, retry")
        );
    }

    #[tokio::test]
    async fn timeout_wording_in_error_counts_as_timeout() {
        for message in ["Read Timeout from upstream", "operation timed out"] {
            let generator = ScriptedGenerator::new([Err(GenerationError::Failed(message.to_string()))]);
            let outcome = generate(&generator, "p", Duration::from_secs(5)).await;
            assert_eq!(outcome.stage_error, Some(StageError::Timeout), "{message}");
        }
    }

    #[tokio::test]
    async fn other_errors_carry_message() {
        let generator =
            ScriptedGenerator::new([Err(GenerationError::Failed("rate limited".to_string()))]);
        let outcome = generate(&generator, "p", Duration::from_secs(5)).await;
        assert_eq!(
            outcome.stage_error,
            Some(StageError::Failed("rate limited".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stage_deadline_elapsing_is_timeout() {
        let outcome = generate(&StalledGenerator, "p", Duration::from_secs(60)).await;
        assert_eq!(outcome.stage_error, Some(StageError::Timeout));
    }

    #[tokio::test]
    async fn retry_prompt_includes_feedback() {
        let generator = ScriptedGenerator::replies(["SELECT site FROM fact LIMIT 5"]);
        let mut state = RunState::new("Sites?");
        state.candidate_query = "SELECT site FROM fact".to_string();
        state.query_error = Some("missing row limit".to_string());
        state.retry_count = 1;

        let outcome =
            generate_query(&generator, &prompt_builder(), &state, Duration::from_secs(5)).await;
        assert_eq!(outcome.candidate, "SELECT site FROM fact LIMIT 5");

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("missing row limit"));
        assert!(prompts[0].contains("SELECT site FROM fact"));
    }

    #[tokio::test]
    async fn first_attempt_has_no_feedback() {
        let generator = ScriptedGenerator::replies(["SELECT 1 LIMIT 1"]);
        let state = RunState::new("Sites?");
        generate_query(&generator, &prompt_builder(), &state, Duration::from_secs(5)).await;
        assert!(!generator.prompts()[0].contains("PREVIOUS ATTEMPT FAILED"));
    }
}
