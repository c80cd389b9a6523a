//! Orchestration for a single question: generate, validate, execute, render.
//!
//! A run walks the stage graph in `core::routing` over one exclusively owned
//! [`RunState`]. Capabilities are shared, read-only handles, so independent
//! runs can execute concurrently on one `Pipeline`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::fallback::fallback_artifact;
use crate::core::routing::{Stage, next_after_execution, next_after_validation};
use crate::core::sql_guard::SqlGuard;
use crate::core::types::{
    CodeArtifact, FailureKind, RunFailure, RunOutcome, RunState, RunSuccess,
};
use crate::io::assets::PromptAssets;
use crate::io::config::{PipelineSettings, SqlvizConfig};
use crate::io::engine::{DuckDbCliEngine, QueryEngine};
use crate::io::generator::{TextGenerator, build_generator};
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::{PythonSandboxHost, RenderData, RenderError, RenderHost, RenderOutput};
use crate::stages::execute::execute_query;
use crate::stages::generate::{StageError, generate_query};
use crate::stages::render::{RenderRequest, produce_render_snippet};

pub struct Pipeline {
    settings: PipelineSettings,
    prompts: PromptBuilder,
    sql_guard: SqlGuard,
    generator: Arc<dyn TextGenerator>,
    engine: Arc<dyn QueryEngine>,
    host: Arc<dyn RenderHost>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        prompts: PromptBuilder,
        generator: Arc<dyn TextGenerator>,
        engine: Arc<dyn QueryEngine>,
        host: Arc<dyn RenderHost>,
    ) -> Self {
        Self {
            sql_guard: SqlGuard::new(settings.max_row_limit),
            settings,
            prompts,
            generator,
            engine,
            host,
        }
    }

    /// Wire the configured adapters. `root` is the config file's directory.
    pub fn from_config(root: &Path, cfg: &SqlvizConfig) -> Result<Self> {
        let assets = PromptAssets::load(root, &cfg.assets)?;
        let prompts = PromptBuilder::new(assets)?;
        let generator = build_generator(&cfg.generator, cfg.pipeline.generation_timeout())?;
        let engine = Arc::new(DuckDbCliEngine::from_config(root, cfg));
        let host = Arc::new(PythonSandboxHost::from_config(
            &cfg.sandbox,
            cfg.pipeline.render_timeout(),
        )?);
        Ok(Self::new(cfg.pipeline.clone(), prompts, generator, engine, host))
    }

    /// Answer one question. Never fails: every error ends in a terminal outcome.
    pub async fn run(&self, question: &str) -> RunOutcome {
        let mut state = RunState::new(question);
        self.run_with_state(&mut state).await
    }

    /// Drive `state` from `Generating` to a terminal stage.
    #[instrument(skip_all, fields(question = %state.question))]
    pub async fn run_with_state(&self, state: &mut RunState) -> RunOutcome {
        let mut stage = Stage::Generating;
        let mut stage_error: Option<StageError> = None;
        let mut artifact: Option<CodeArtifact> = None;

        loop {
            debug!(stage = stage.as_str(), retry_count = state.retry_count, "entering stage");
            stage = match stage {
                Stage::Generating => {
                    let outcome = generate_query(
                        self.generator.as_ref(),
                        &self.prompts,
                        state,
                        self.settings.generation_timeout(),
                    )
                    .await;
                    state.candidate_query = outcome.candidate;
                    stage_error = outcome.stage_error;
                    Stage::Validating
                }
                Stage::Validating => {
                    let verdict = self.sql_guard.validate(&state.candidate_query);
                    for warning in &verdict.warnings {
                        info!(%warning, "query advisory");
                    }
                    let stage_error = stage_error.take().map(|err| err.to_string());
                    state.record_verdict(&verdict, stage_error.as_deref());

                    let next = next_after_validation(state, self.settings.max_retries);
                    if next == Stage::Generating {
                        state.retry_count += 1;
                        info!(
                            retry_count = state.retry_count,
                            reason = state.query_error.as_deref().unwrap_or_default(),
                            "regenerating query"
                        );
                    }
                    next
                }
                Stage::Executing => {
                    match execute_query(
                        self.engine.as_ref(),
                        &state.candidate_query,
                        self.settings.execution_timeout(),
                    )
                    .await
                    {
                        Ok(result) => state.set_results(result.columns, result.rows),
                        Err(failure) => state.record_execution_failure(failure.message),
                    }
                    next_after_execution(state)
                }
                Stage::Rendering => {
                    let snippet = produce_render_snippet(
                        self.generator.as_ref(),
                        &self.prompts,
                        RenderRequest {
                            question: &state.question,
                            sql: &state.candidate_query,
                            columns: &state.columns,
                            rows: &state.rows,
                        },
                        self.settings.generation_timeout(),
                    )
                    .await;
                    state.render_snippet = snippet.code().to_string();
                    artifact = Some(snippet);
                    Stage::Done
                }
                Stage::Done => {
                    info!(rows = state.rows.len(), "run finished");
                    let render_snippet = artifact
                        .take()
                        .unwrap_or_else(|| fallback_artifact(&state.columns));
                    return RunOutcome::Success(RunSuccess {
                        query: state.candidate_query.clone(),
                        columns: state.columns.clone(),
                        rows: state.rows.clone(),
                        render_snippet,
                    });
                }
                Stage::FailedMaxRetries => {
                    let message = format!(
                        "Failed to generate valid SQL after {} retries. Last error: {}",
                        state.retry_count,
                        state.query_error.as_deref().unwrap_or("unknown")
                    );
                    warn!(%message, "run failed");
                    return RunOutcome::Failed(RunFailure {
                        error_kind: FailureKind::MaxRetriesExceeded,
                        message,
                    });
                }
                Stage::FailedExecution => {
                    let message = state
                        .execution_error
                        .clone()
                        .unwrap_or_else(|| "query execution failed".to_string());
                    warn!(%message, "run failed");
                    return RunOutcome::Failed(RunFailure {
                        error_kind: FailureKind::ExecutionFailed,
                        message,
                    });
                }
            };
        }
    }

    /// Hand a successful run to the rendering host.
    ///
    /// A generated snippet that fails inside the host is replaced by the
    /// fallback table and rendered once more.
    #[instrument(skip_all, fields(rows = success.rows.len()))]
    pub async fn render(&self, success: &RunSuccess) -> Result<RenderOutput, RenderError> {
        match self.render_artifact(&success.render_snippet, success).await {
            Err(err) if !success.render_snippet.is_fallback() => {
                warn!(err = %err, "generated snippet failed in host, rendering fallback");
                let fallback = fallback_artifact(&success.columns);
                self.render_artifact(&fallback, success).await
            }
            result => result,
        }
    }

    async fn render_artifact(
        &self,
        artifact: &CodeArtifact,
        success: &RunSuccess,
    ) -> Result<RenderOutput, RenderError> {
        let data = RenderData {
            viz_type: &self.settings.viz_type,
            columns: &success.columns,
            rows: &success.rows,
        };
        tokio::time::timeout(
            self.settings.render_timeout(),
            self.host.render(artifact, data),
        )
        .await
        .unwrap_or(Err(RenderError::Timeout))
    }
}
