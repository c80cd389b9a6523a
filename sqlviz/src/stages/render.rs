//! Rendering stage: one snippet generation, validated, with the table
//! fallback on any failure. Always yields an artifact.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::code_guard::validate_code;
use crate::core::data_profile::DataProfile;
use crate::core::fallback::fallback_artifact;
use crate::core::types::{CodeArtifact, Row};
use crate::io::generator::TextGenerator;
use crate::io::prompt::PromptBuilder;
use crate::stages::generate::generate;

/// Inputs for the visualization prompt.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Row],
}

#[instrument(skip_all, fields(rows = request.rows.len(), columns = request.columns.len()))]
pub async fn produce_render_snippet(
    generator: &dyn TextGenerator,
    prompts: &PromptBuilder,
    request: RenderRequest<'_>,
    timeout: Duration,
) -> CodeArtifact {
    let profile = DataProfile::from_rows(request.columns, request.rows);
    let prompt = match prompts.build_visualization(request.question, request.sql, &profile) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "visualization prompt could not be built, using fallback");
            return fallback_artifact(request.columns);
        }
    };

    let outcome = generate(generator, &prompt, timeout).await;
    if let Some(err) = outcome.stage_error {
        warn!(err = %err, "snippet generation failed, using fallback");
        return fallback_artifact(request.columns);
    }

    let verdict = validate_code(&outcome.candidate);
    if !verdict.is_valid {
        warn!(reason = %verdict.reason, "generated snippet rejected, using fallback");
        return fallback_artifact(request.columns);
    }
    info!(code_bytes = outcome.candidate.len(), "generated snippet accepted");
    CodeArtifact::generated(outcome.candidate)
}
