//! Shared deterministic types for the pipeline core.
//!
//! These types define the contracts between stages. They hold no I/O handles
//! and a `RunState` is owned by exactly one run.

use serde::{Serialize, Serializer};
use serde_json::Value;

/// One result row, positionally aligned with the column list.
pub type Row = Vec<Value>;

/// The record threaded through every stage of a single run.
///
/// Stages mutate it through the methods below so that the paired fields stay
/// consistent: a valid query never carries an error, and rows/columns are
/// always replaced or cleared together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    /// The natural-language question for this run.
    pub question: String,
    /// Latest query text produced by the generation stage.
    pub candidate_query: String,
    /// Whether `candidate_query` passed the query validator.
    pub query_valid: bool,
    /// Last validation failure reason; `None` whenever `query_valid` is true.
    pub query_error: Option<String>,
    /// Number of regenerations performed. Never decreases within a run.
    pub retry_count: u32,
    /// Set once the engine rejected a validated query.
    pub execution_failed: bool,
    /// Engine message for a failed execution.
    pub execution_error: Option<String>,
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    /// Rendering snippet handed to the host (validated or fallback).
    pub render_snippet: String,
}

impl RunState {
    /// Fresh state for one question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Record the query validator's verdict.
    ///
    /// `stage_error` is the generation failure that produced the candidate, if
    /// any; it is appended to the reason so the feedback prompt and the final
    /// failure message explain why no query was produced.
    pub fn record_verdict(&mut self, verdict: &ValidationVerdict, stage_error: Option<&str>) {
        self.query_valid = verdict.is_valid;
        self.query_error = if verdict.is_valid {
            None
        } else {
            Some(match stage_error {
                Some(err) => format!("{} ({err})", verdict.reason),
                None => verdict.reason.clone(),
            })
        };
    }

    /// Store a successful execution result.
    pub fn set_results(&mut self, columns: Vec<String>, rows: Vec<Row>) {
        self.execution_failed = false;
        self.execution_error = None;
        self.columns = columns;
        self.rows = rows;
    }

    /// Mark execution as failed and drop any previous result.
    pub fn record_execution_failure(&mut self, message: impl Into<String>) {
        self.execution_failed = true;
        self.execution_error = Some(message.into());
        self.rows.clear();
        self.columns.clear();
    }
}

/// Verdict returned by both validators.
///
/// `reason` is empty iff `is_valid`. `warnings` are advisories that never
/// affect validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub reason: String,
    pub warnings: Vec<String>,
}

impl ValidationVerdict {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: String::new(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: reason.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Provenance {
    /// Produced by the model and accepted by the code validator.
    Generated,
    /// Synthesized from the fixed table template.
    Fallback,
}

/// A rendering snippet ready for the host.
///
/// Only the crate can construct one, which keeps the provenance honest: a
/// generated artifact exists only after validation, and a fallback artifact
/// comes from the fixed template. Callers see the code, never the provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeArtifact {
    code: String,
    provenance: Provenance,
}

impl CodeArtifact {
    pub(crate) fn generated(code: String) -> Self {
        Self {
            code,
            provenance: Provenance::Generated,
        }
    }

    pub(crate) fn fallback(code: String) -> Self {
        Self {
            code,
            provenance: Provenance::Fallback,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub(crate) fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }
}

impl Serialize for CodeArtifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code)
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success(RunSuccess),
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success(_))
    }
}

/// Caller-facing record for a run that reached `Done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSuccess {
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub render_snippet: CodeArtifact,
}

/// Caller-facing record for either terminal failure state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub error_kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MaxRetriesExceeded,
    ExecutionFailed,
}
