//! Test-only capability doubles and pipeline constructors.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::types::{CodeArtifact, Row};
use crate::io::assets::PromptAssets;
use crate::io::config::PipelineSettings;
use crate::io::engine::{QueryEngine, QueryError, QueryResult};
use crate::io::generator::{GenerationError, TextGenerator};
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::{RenderData, RenderError, RenderHost, RenderOutput};
use crate::pipeline::Pipeline;

/// Generator that replays a fixed script and records every prompt.
///
/// Once the script is exhausted it either fails or, after
/// [`ScriptedGenerator::then_stall`], never answers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<VecDeque<Result<String, GenerationError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    stall_when_exhausted: bool,
}

impl ScriptedGenerator {
    pub fn new(script: impl IntoIterator<Item = Result<String, GenerationError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn replies<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|reply| Ok(reply.into())))
    }

    pub fn then_stall(mut self) -> Self {
        self.stall_when_exhausted = true;
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(reply) => reply,
            None if self.stall_when_exhausted => futures::future::pending().await,
            None => Err(GenerationError::Failed("script exhausted".to_string())),
        }
    }
}

/// Generator that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalledGenerator;

#[async_trait]
impl TextGenerator for StalledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        futures::future::pending().await
    }
}

/// Engine that replays a fixed script and records every query.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<VecDeque<Result<QueryResult, QueryError>>>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new(script: impl IntoIterator<Item = Result<QueryResult, QueryError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            queries: Arc::default(),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("queries lock").clone()
    }
}

#[async_trait]
impl QueryEngine for ScriptedEngine {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        self.queries
            .lock()
            .expect("queries lock")
            .push(sql.to_string());
        let next = self.script.lock().expect("script lock").pop_front();
        next.unwrap_or_else(|| Err(QueryError::new("script exhausted")))
    }
}

/// Engine that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalledEngine;

#[async_trait]
impl QueryEngine for StalledEngine {
    async fn execute(&self, _sql: &str) -> Result<QueryResult, QueryError> {
        futures::future::pending().await
    }
}

/// Host that records rendered code and optionally fails the first call.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    rendered: Arc<Mutex<Vec<String>>>,
    fail_first: bool,
}

impl RecordingHost {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing_first() -> Self {
        Self {
            fail_first: true,
            ..Self::default()
        }
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().expect("rendered lock").clone()
    }
}

#[async_trait]
impl RenderHost for RecordingHost {
    async fn render(
        &self,
        artifact: &CodeArtifact,
        _data: RenderData<'_>,
    ) -> Result<RenderOutput, RenderError> {
        let mut rendered = self.rendered.lock().expect("rendered lock");
        rendered.push(artifact.code().to_string());
        if self.fail_first && rendered.len() == 1 {
            return Err(RenderError::Failed("NameError: name 'px' is not defined".to_string()));
        }
        Ok(RenderOutput::default())
    }
}

/// Prompt builder over small fixed assets.
pub fn prompt_builder() -> PromptBuilder {
    PromptBuilder::new(PromptAssets {
        instructions: "Answer with DuckDB SQL.".to_string(),
        semantic_layer: "tables:\n  - fact_batch_production".to_string(),
        viz_guidelines: "## Plotly Visualization Guidelines\nPrefer bar charts.".to_string(),
    })
    .expect("prompt builder")
}

/// Pipeline with default settings over the given doubles.
pub fn pipeline_with(
    generator: impl TextGenerator + 'static,
    engine: impl QueryEngine + 'static,
    host: impl RenderHost + 'static,
) -> Pipeline {
    Pipeline::new(
        PipelineSettings::default(),
        prompt_builder(),
        Arc::new(generator),
        Arc::new(engine),
        Arc::new(host),
    )
}

/// Query result with the given column names.
pub fn rows_result(columns: &[&str], rows: Vec<Row>) -> QueryResult {
    QueryResult {
        columns: columns.iter().map(|column| (*column).to_string()).collect(),
        rows,
    }
}
