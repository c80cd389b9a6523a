//! Query engine capability and the DuckDB CLI adapter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::Row;
use crate::io::assets::resolve_data_dir;
use crate::io::config::SqlvizConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Ordered result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes validated, read-only SQL.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError>;
}

/// Runs each query in a fresh in-memory DuckDB CLI process.
///
/// Every invocation first creates the configured parquet views, then runs the
/// query in JSON output mode with `-bail` so the first error aborts.
#[derive(Debug, Clone)]
pub struct DuckDbCliEngine {
    argv: Vec<String>,
    views: Vec<(String, PathBuf)>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl DuckDbCliEngine {
    pub fn new(
        argv: Vec<String>,
        views: Vec<(String, PathBuf)>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            argv,
            views,
            timeout,
            output_limit_bytes,
        }
    }

    /// Engine for `cfg`, with view paths resolved against `root`.
    pub fn from_config(root: &Path, cfg: &SqlvizConfig) -> Self {
        let data_dir = resolve_data_dir(root, &cfg.assets.data_dir);
        let views = cfg
            .engine
            .views
            .iter()
            .map(|(name, path)| (name.clone(), data_dir.join(path)))
            .collect();
        Self::new(
            cfg.engine.command.clone(),
            views,
            cfg.pipeline.execution_timeout(),
            cfg.engine.output_limit_bytes,
        )
    }

    fn script(&self, sql: &str) -> String {
        let mut script = String::new();
        for (name, path) in &self.views {
            script.push_str(&format!(
                "CREATE OR REPLACE VIEW {name} AS SELECT * FROM read_parquet('{}');\n",
                path.display()
            ));
        }
        script.push_str(sql.trim().trim_end_matches(';').trim_end());
        script.push_str(";\n");
        script
    }
}

#[async_trait]
impl QueryEngine for DuckDbCliEngine {
    #[instrument(skip_all, fields(sql_bytes = sql.len(), views = self.views.len()))]
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        let mut cmd = command_from_argv(&self.argv).map_err(|err| QueryError::new(format!("{err:#}")))?;
        cmd.args(["-bail", "-json"]);
        let script = self.script(sql);
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        let output = tokio::task::spawn_blocking(move || {
            run_command_with_timeout(cmd, Some(script.as_bytes()), timeout, limit)
        })
        .await
        .map_err(|err| QueryError::new(format!("engine task failed: {err}")))?
        .map_err(|err| QueryError::new(format!("{err:#}")))?;

        if output.timed_out {
            return Err(QueryError::new(format!(
                "query timed out after {}s",
                timeout.as_secs()
            )));
        }
        let stderr = output.stderr_text();
        if !output.status.success() || !stderr.trim().is_empty() {
            warn!(exit_code = ?output.status.code(), "query failed");
            let message = if stderr.trim().is_empty() {
                output.failure_summary("duckdb")
            } else {
                stderr.trim().to_string()
            };
            return Err(QueryError::new(message));
        }
        if output.stdout_truncated > 0 {
            return Err(QueryError::new(format!(
                "query output exceeded {limit} bytes"
            )));
        }

        let result = parse_json_rows(&output.stdout_text())?;
        debug!(
            rows = result.rows.len(),
            columns = result.columns.len(),
            "query finished"
        );
        Ok(result)
    }
}

/// Parse DuckDB `-json` output: an array of objects in column order.
///
/// Empty output means an empty result.
pub fn parse_json_rows(stdout: &str) -> Result<QueryResult, QueryError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(QueryResult::default());
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|err| QueryError::new(format!("unreadable engine output: {err}")))?;
    let Value::Array(records) = value else {
        return Err(QueryError::new("unreadable engine output: expected a JSON array"));
    };

    let mut result = QueryResult::default();
    for record in records {
        let Value::Object(fields) = record else {
            return Err(QueryError::new("unreadable engine output: expected JSON objects"));
        };
        if result.columns.is_empty() {
            result.columns = fields.keys().cloned().collect();
        }
        let row = result
            .columns
            .iter()
            .map(|column| fields.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        result.rows.push(row);
    }
    Ok(result)
}
