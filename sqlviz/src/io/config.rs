//! Pipeline configuration stored in `sqlviz.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "sqlviz.toml";

static VIEW_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Top-level configuration (TOML).
///
/// Intended to be edited by humans. Missing sections and fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SqlvizConfig {
    pub pipeline: PipelineSettings,
    pub assets: AssetPaths,
    pub generator: GeneratorConfig,
    pub engine: EngineConfig,
    pub sandbox: SandboxConfig,
}

/// Retry bound, row ceiling and per-stage deadlines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Regenerations allowed after the first invalid query.
    pub max_retries: u32,
    /// Largest `LIMIT n` the query validator accepts.
    pub max_row_limit: u64,
    pub generation_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    pub render_timeout_secs: u64,
    /// Passed to the entry point as `viz_type`.
    pub viz_type: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_row_limit: crate::core::sql_guard::DEFAULT_MAX_ROW_LIMIT,
            generation_timeout_secs: 60,
            execution_timeout_secs: 30,
            render_timeout_secs: 30,
            viz_type: "auto".to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

/// Prompt asset locations, relative to the config file's directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssetPaths {
    /// Agent instructions markdown (SQL rules plus visualization guidelines).
    pub instructions: String,
    /// Semantic layer YAML; `{DATA_PATH}` is replaced with `data_dir`.
    pub semantic_layer: String,
    pub data_dir: String,
    /// Heading that starts the visualization guidelines section.
    pub guidelines_marker: String,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            instructions: "agent-specifications.md".to_string(),
            semantic_layer: "data/semantic_layer.yaml".to_string(),
            data_dir: "data".to_string(),
            guidelines_marker: "## Plotly Visualization Guidelines".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// Spawn `command`, prompt on stdin, reply on stdout.
    Command,
    /// OpenAI-compatible chat-completions endpoint.
    #[default]
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    pub command: Vec<String>,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Http,
            command: Vec::new(),
            endpoint: "https://router.huggingface.co/v1/chat/completions".to_string(),
            model: "Qwen/Qwen2.5-Coder-7B-Instruct".to_string(),
            token_env: "HF_TOKEN".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// DuckDB CLI invocation (e.g. `["duckdb"]`).
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
    /// View name to parquet path, relative to `assets.data_dir`.
    pub views: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let star_schema = "b-silver-star-schema";
        let views = ["dim_product", "dim_specie", "dim_site", "fact_batch_production"]
            .into_iter()
            .map(|name| (name.to_string(), format!("{star_schema}/{name}.parquet")))
            .collect();
        Self {
            command: vec!["duckdb".to_string()],
            output_limit_bytes: 10_000_000,
            views,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter invocation; the harness is appended as `-c <script>`.
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "-I".to_string()],
            output_limit_bytes: 1_000_000,
        }
    }
}

fn non_empty_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

impl SqlvizConfig {
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.max_row_limit == 0 {
            return Err(anyhow!("pipeline.max_row_limit must be > 0"));
        }
        if pipeline.generation_timeout_secs == 0 {
            return Err(anyhow!("pipeline.generation_timeout_secs must be > 0"));
        }
        if pipeline.execution_timeout_secs == 0 {
            return Err(anyhow!("pipeline.execution_timeout_secs must be > 0"));
        }
        if pipeline.render_timeout_secs == 0 {
            return Err(anyhow!("pipeline.render_timeout_secs must be > 0"));
        }
        if pipeline.viz_type.trim().is_empty() {
            return Err(anyhow!("pipeline.viz_type must be non-empty"));
        }
        if self.assets.guidelines_marker.trim().is_empty() {
            return Err(anyhow!("assets.guidelines_marker must be non-empty"));
        }

        match self.generator.kind {
            GeneratorKind::Command if !non_empty_command(&self.generator.command) => {
                return Err(anyhow!(
                    "generator.command must be a non-empty array when kind = \"command\""
                ));
            }
            GeneratorKind::Http if self.generator.endpoint.trim().is_empty() => {
                return Err(anyhow!("generator.endpoint must be non-empty when kind = \"http\""));
            }
            _ => {}
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }

        if !non_empty_command(&self.engine.command) {
            return Err(anyhow!("engine.command must be a non-empty array"));
        }
        for (name, path) in &self.engine.views {
            if !VIEW_NAME_RE.is_match(name) {
                return Err(anyhow!("engine.views: invalid view name {name:?}"));
            }
            if path.contains('\'') {
                return Err(anyhow!("engine.views.{name}: path must not contain quotes"));
            }
        }
        if self.engine.output_limit_bytes == 0 {
            return Err(anyhow!("engine.output_limit_bytes must be > 0"));
        }

        if !non_empty_command(&self.sandbox.command) {
            return Err(anyhow!("sandbox.command must be a non-empty array"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SqlvizConfig::default()`.
pub fn load_config(path: &Path) -> Result<SqlvizConfig> {
    if !path.exists() {
        let cfg = SqlvizConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SqlvizConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SqlvizConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
