//! Rendering host capability and the isolated Python adapter.
//!
//! The host runs a rendering snippet's entry point in a context that exposes
//! only the allow-listed modules and a minimal builtin set.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::code_guard::{ALLOWED_IMPORTS, ENTRY_POINT};
use crate::core::types::{CodeArtifact, Row};
use crate::io::config::SandboxConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

const HARNESS: &str = include_str!("sandbox_harness.py");

/// Builtins visible to a snippet. Everything else is absent, including
/// `open`, `eval`, `exec`, `compile` and attribute reflection helpers.
pub const SAFE_BUILTINS: &[&str] = &[
    "len",
    "str",
    "int",
    "float",
    "list",
    "dict",
    "tuple",
    "set",
    "bool",
    "range",
    "enumerate",
    "zip",
    "min",
    "max",
    "sum",
    "round",
    "sorted",
    "reversed",
    "abs",
    "any",
    "all",
    "map",
    "filter",
    "isinstance",
    "print",
    "__build_class__",
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
];

/// What the isolated context exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxPolicy {
    pub modules: Vec<String>,
    pub builtins: Vec<String>,
    pub entry_point: String,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            modules: ALLOWED_IMPORTS.iter().map(|m| (*m).to_string()).collect(),
            builtins: SAFE_BUILTINS.iter().map(|b| (*b).to_string()).collect(),
            entry_point: ENTRY_POINT.to_string(),
        }
    }
}

/// Arguments passed to the entry point.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RenderData<'a> {
    pub viz_type: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Row],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("rendering timed out")]
    Timeout,
    #[error("rendering failed: {0}")]
    Failed(String),
}

/// Runs a snippet's entry point.
#[async_trait]
pub trait RenderHost: Send + Sync {
    async fn render(
        &self,
        artifact: &CodeArtifact,
        data: RenderData<'_>,
    ) -> Result<RenderOutput, RenderError>;
}

#[derive(Debug, Serialize)]
struct HarnessPayload<'a> {
    code: &'a str,
    policy: &'a SandboxPolicy,
    data: RenderData<'a>,
}

/// Spawns an isolated interpreter (`python3 -I`) running the harness script.
#[derive(Debug, Clone)]
pub struct PythonSandboxHost {
    argv: Vec<String>,
    policy: SandboxPolicy,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl PythonSandboxHost {
    pub fn new(argv: Vec<String>, policy: SandboxPolicy, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("sandbox command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            policy,
            timeout,
            output_limit_bytes,
        })
    }

    pub fn from_config(cfg: &SandboxConfig, timeout: Duration) -> Result<Self> {
        Self::new(
            cfg.command.clone(),
            SandboxPolicy::default(),
            timeout,
            cfg.output_limit_bytes,
        )
    }
}

#[async_trait]
impl RenderHost for PythonSandboxHost {
    #[instrument(skip_all, fields(code_bytes = artifact.code().len(), rows = data.rows.len()))]
    async fn render(
        &self,
        artifact: &CodeArtifact,
        data: RenderData<'_>,
    ) -> Result<RenderOutput, RenderError> {
        let payload = serde_json::to_vec(&HarnessPayload {
            code: artifact.code(),
            policy: &self.policy,
            data,
        })
        .map_err(|err| RenderError::Failed(format!("encode payload: {err}")))?;

        let mut cmd = command_from_argv(&self.argv)
            .map_err(|err| RenderError::Failed(format!("{err:#}")))?;
        cmd.arg("-c").arg(HARNESS);
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        let output = tokio::task::spawn_blocking(move || {
            run_command_with_timeout(cmd, Some(&payload), timeout, limit)
        })
        .await
        .map_err(|err| RenderError::Failed(format!("sandbox task failed: {err}")))?
        .map_err(|err| RenderError::Failed(format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "rendering timed out");
            return Err(RenderError::Timeout);
        }
        if !output.status.success() {
            return Err(RenderError::Failed(output.failure_summary("sandbox")));
        }
        debug!(stdout_bytes = output.stdout.len(), "snippet rendered");
        Ok(RenderOutput {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
        })
    }
}
