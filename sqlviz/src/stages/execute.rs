//! Execution stage: run a validated query under a deadline.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::engine::{QueryEngine, QueryResult};

/// Engine failure or deadline, as a value the orchestrator routes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub message: String,
}

#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub async fn execute_query(
    engine: &dyn QueryEngine,
    sql: &str,
    timeout: Duration,
) -> Result<QueryResult, ExecutionFailure> {
    match tokio::time::timeout(timeout, engine.execute(sql)).await {
        Ok(Ok(result)) => {
            debug!(rows = result.rows.len(), columns = result.columns.len(), "query executed");
            Ok(result)
        }
        Ok(Err(err)) => {
            warn!(err = %err, "query execution failed");
            Err(ExecutionFailure {
                message: err.message,
            })
        }
        Err(_elapsed) => {
            warn!("query deadline elapsed");
            Err(ExecutionFailure {
                message: format!("query timed out after {}s", timeout.as_secs()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::engine::QueryError;
    use crate::test_support::{ScriptedEngine, StalledEngine};
    use serde_json::json;

    #[tokio::test]
    async fn returns_engine_rows() {
        let engine = ScriptedEngine::new([Ok(QueryResult {
            columns: vec!["bu".to_string()],
            rows: vec![vec![json!("north")]],
        })]);
        let result = execute_query(&engine, "SELECT bu FROM fact LIMIT 1", Duration::from_secs(5))
            .await
            .expect("rows");
        assert_eq!(result.columns, vec!["bu".to_string()]);
        assert_eq!(engine.queries(), vec!["SELECT bu FROM fact LIMIT 1".to_string()]);
    }

    #[tokio::test]
    async fn engine_error_becomes_failure() {
        let engine = ScriptedEngine::new([Err(QueryError::new(
            "Binder Error: Referenced column \"bu\" not found",
        ))]);
        let failure = execute_query(&engine, "SELECT bu FROM fact LIMIT 1", Duration::from_secs(5))
            .await
            .expect_err("failure");
        assert!(failure.message.contains("bu"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_becomes_failure() {
        let failure = execute_query(&StalledEngine, "SELECT 1 LIMIT 1", Duration::from_secs(30))
            .await
            .expect_err("timeout");
        assert_eq!(failure.message, "query timed out after 30s");
    }
}
