//! Lifecycle tests for complete pipeline runs over scripted capabilities.
//!
//! Each test drives `Pipeline::run` from a question to a terminal outcome and
//! checks the observable contract: the final record, how many times each
//! capability was called, and what the retry prompts carried.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sqlviz::core::fallback::fallback_artifact;
use sqlviz::core::types::{FailureKind, RunOutcome, RunState};
use sqlviz::io::config::PipelineSettings;
use sqlviz::io::engine::{QueryEngine, QueryError, QueryResult};
use sqlviz::io::generator::{GenerationError, TextGenerator};
use sqlviz::pipeline::Pipeline;
use sqlviz::test_support::{
    RecordingHost, ScriptedEngine, ScriptedGenerator, pipeline_with, prompt_builder, rows_result,
};

const BU_QUERY: &str =
    "SELECT p.business_unit, SUM(f.quantity) AS total FROM fact_batch_production f JOIN dim_product p USING (product_id) GROUP BY 1 ORDER BY 2 DESC LIMIT 100";

const BAR_CHART: &str = "def render_visualization(viz_type: str, columns: list, rows: list):
    import pandas as pd
    import plotly.express as px
    import streamlit as st

    df = pd.DataFrame(rows, columns=columns)
    st.plotly_chart(px.bar(df, x=columns[0], y=columns[1]), use_container_width=True)";

fn bu_result() -> QueryResult {
    rows_result(
        &["business_unit", "total"],
        vec![
            vec![json!("Petfood"), json!(1250.5)],
            vec![json!("Swine"), json!(830)],
        ],
    )
}

fn expect_success(outcome: RunOutcome) -> sqlviz::core::types::RunSuccess {
    match outcome {
        RunOutcome::Success(success) => success,
        RunOutcome::Failed(failure) => panic!("expected success, got {failure:?}"),
    }
}

fn expect_failure(outcome: RunOutcome) -> sqlviz::core::types::RunFailure {
    match outcome {
        RunOutcome::Failed(failure) => failure,
        RunOutcome::Success(success) => panic!("expected failure, got {success:?}"),
    }
}

/// Happy path: valid query first time, valid chart snippet, one engine call.
#[tokio::test]
async fn valid_query_and_chart_reach_done() {
    let generator = ScriptedGenerator::replies([format!("```sql\n{BU_QUERY}\n```"), format!("```python\n{BAR_CHART}\n```")]);
    let engine = ScriptedEngine::new([Ok(bu_result())]);
    let pipeline = pipeline_with(generator.clone(), engine.clone(), RecordingHost::ok());

    let success = expect_success(pipeline.run("Total production by business unit").await);

    assert_eq!(success.query, BU_QUERY);
    assert_eq!(success.columns, vec!["business_unit".to_string(), "total".to_string()]);
    assert_eq!(success.rows.len(), 2);
    assert_eq!(success.render_snippet.code(), BAR_CHART);
    assert_eq!(engine.queries(), vec![BU_QUERY.to_string()]);
    assert_eq!(generator.prompts().len(), 2);
}

/// A DELETE is rejected, fed back, and the corrected query proceeds.
#[tokio::test]
async fn rejected_delete_loops_back_with_feedback() {
    let generator = ScriptedGenerator::replies(["DELETE FROM fact_batch_production", BU_QUERY, BAR_CHART]);
    let engine = ScriptedEngine::new([Ok(bu_result())]);
    let pipeline = pipeline_with(generator.clone(), engine.clone(), RecordingHost::ok());

    let mut state = RunState::new("Total production by business unit");
    let success = expect_success(pipeline.run_with_state(&mut state).await);

    assert_eq!(success.query, BU_QUERY);
    assert_eq!(state.retry_count, 1);
    let prompts = generator.prompts();
    assert!(prompts[1].contains("PREVIOUS ATTEMPT FAILED"));
    assert!(prompts[1].contains("DELETE FROM fact_batch_production"));
    assert!(prompts[1].contains("DELETE)"));
    assert_eq!(engine.queries().len(), 1);
}

/// Invalid forever: exactly three regenerations, then the terminal failure.
#[tokio::test]
async fn persistent_invalid_query_fails_after_three_regenerations() {
    let generator = ScriptedGenerator::replies(["SELECT site FROM dim_site"; 10]);
    let engine = ScriptedEngine::default();
    let pipeline = pipeline_with(generator.clone(), engine.clone(), RecordingHost::ok());

    let mut state = RunState::new("List sites");
    let failure = expect_failure(pipeline.run_with_state(&mut state).await);

    assert_eq!(failure.error_kind, FailureKind::MaxRetriesExceeded);
    assert_eq!(
        failure.message,
        "Failed to generate valid SQL after 3 retries. Last error: missing row limit"
    );
    assert_eq!(state.retry_count, 3);
    assert_eq!(generator.prompts().len(), 4);
    assert!(engine.queries().is_empty());
}

/// Generation timeouts are retryable and explained in the feedback prompt.
#[tokio::test]
async fn generation_timeout_is_retried() {
    let generator = ScriptedGenerator::new([
        Err(GenerationError::Timeout),
        Ok(BU_QUERY.to_string()),
        Ok(BAR_CHART.to_string()),
    ]);
    let pipeline = pipeline_with(generator.clone(), ScriptedEngine::new([Ok(bu_result())]), RecordingHost::ok());

    let success = expect_success(pipeline.run("Total production by business unit").await);

    assert_eq!(success.query, BU_QUERY);
    let prompts = generator.prompts();
    assert!(prompts[1].contains("no query produced (generation timeout, retry)"));
    assert!(prompts[1].contains("No query was produced"));
}

/// Timeouts on every attempt end in the max-retries failure naming the timeout.
#[tokio::test(start_paused = true)]
async fn stalled_generator_exhausts_retries() {
    let generator = ScriptedGenerator::default().then_stall();
    let pipeline = pipeline_with(generator.clone(), ScriptedEngine::default(), RecordingHost::ok());

    let failure = expect_failure(pipeline.run("Anything").await);

    assert_eq!(failure.error_kind, FailureKind::MaxRetriesExceeded);
    assert!(failure.message.ends_with("no query produced (generation timeout, retry)"));
    assert_eq!(generator.prompts().len(), 4);
}

/// The snippet call timing out still reaches Done, with the table fallback.
#[tokio::test(start_paused = true)]
async fn rendering_timeout_yields_fallback_snippet() {
    let generator = ScriptedGenerator::replies([BU_QUERY]).then_stall();
    let pipeline = pipeline_with(generator, ScriptedEngine::new([Ok(bu_result())]), RecordingHost::ok());

    let success = expect_success(pipeline.run("Total production by business unit").await);

    assert_eq!(success.rows.len(), 2);
    assert_eq!(
        success.render_snippet.code(),
        fallback_artifact(&success.columns).code()
    );
}

/// An unsafe snippet is replaced by the fallback; the query result survives.
#[tokio::test]
async fn unsafe_snippet_yields_fallback_snippet() {
    let generator = ScriptedGenerator::replies([
        BU_QUERY,
        "def render_visualization(viz_type, columns, rows):\n    import subprocess\n    subprocess.run(['id'])",
    ]);
    let pipeline = pipeline_with(generator, ScriptedEngine::new([Ok(bu_result())]), RecordingHost::ok());

    let success = expect_success(pipeline.run("Total production by business unit").await);
    assert_eq!(
        success.render_snippet.code(),
        fallback_artifact(&success.columns).code()
    );
}

/// A missing column fails execution terminally: no retry, no rendering.
#[tokio::test]
async fn missing_column_fails_execution_without_retry() {
    let generator = ScriptedGenerator::replies(["SELECT bu FROM fact_batch_production LIMIT 10", BAR_CHART]);
    let engine = ScriptedEngine::new([Err(QueryError::new(
        "Binder Error: Referenced column \"bu\" not found in FROM clause!",
    ))]);
    let pipeline = pipeline_with(generator.clone(), engine.clone(), RecordingHost::ok());

    let mut state = RunState::new("Production by bu");
    let failure = expect_failure(pipeline.run_with_state(&mut state).await);

    assert_eq!(failure.error_kind, FailureKind::ExecutionFailed);
    assert!(failure.message.contains("Referenced column \"bu\" not found"));
    assert_eq!(state.retry_count, 0);
    assert!(state.rows.is_empty());
    assert!(state.columns.is_empty());
    assert_eq!(generator.prompts().len(), 1);
    assert_eq!(engine.queries().len(), 1);
}

/// An empty result still renders, keeping its columns.
#[tokio::test]
async fn empty_result_renders_with_columns() {
    let generator = ScriptedGenerator::replies([BU_QUERY, BAR_CHART]);
    let engine = ScriptedEngine::new([Ok(rows_result(&["business_unit", "total"], Vec::new()))]);
    let pipeline = pipeline_with(generator, engine, RecordingHost::ok());

    let success = expect_success(pipeline.run("Total production by business unit").await);
    assert!(success.rows.is_empty());
    assert_eq!(success.columns.len(), 2);
}

/// Answers each prompt from its own content so concurrent runs can share it.
struct QuestionAwareGenerator;

#[async_trait]
impl TextGenerator for QuestionAwareGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if prompt.starts_with("# ROLE") {
            return Ok(BAR_CHART.to_string());
        }
        let site = if prompt.contains("north") { "north" } else { "south" };
        Ok(format!("SELECT '{site}' AS site LIMIT 1"))
    }
}

/// Returns the query text as its only cell.
struct EchoEngine;

#[async_trait]
impl QueryEngine for EchoEngine {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(rows_result(&["sql"], vec![vec![json!(sql)]]))
    }
}

/// Independent runs share one pipeline without sharing state.
#[tokio::test]
async fn concurrent_runs_are_independent() {
    let pipeline = Pipeline::new(
        PipelineSettings::default(),
        prompt_builder(),
        std::sync::Arc::new(QuestionAwareGenerator),
        std::sync::Arc::new(EchoEngine),
        std::sync::Arc::new(RecordingHost::ok()),
    );

    let (north, south) = tokio::join!(
        pipeline.run("Production in the north site"),
        pipeline.run("Production in the south site"),
    );

    let north = expect_success(north);
    let south = expect_success(south);
    assert_eq!(north.query, "SELECT 'north' AS site LIMIT 1");
    assert_eq!(south.query, "SELECT 'south' AS site LIMIT 1");
    assert_eq!(north.rows, vec![vec![json!("SELECT 'north' AS site LIMIT 1")]]);
    assert_eq!(south.rows, vec![vec![json!("SELECT 'south' AS site LIMIT 1")]]);
}
