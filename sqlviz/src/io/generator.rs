//! Text generation backends.
//!
//! The pipeline only sees [`TextGenerator`]; which backend answers is a
//! configuration choice.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::{GeneratorConfig, GeneratorKind};
use crate::io::process::{command_from_argv, run_command_with_timeout};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

/// Prompt in, reply text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Build the configured backend.
///
/// `timeout` bounds each call inside the backend as well; the stage applies
/// its own deadline on top.
pub fn build_generator(cfg: &GeneratorConfig, timeout: Duration) -> Result<Arc<dyn TextGenerator>> {
    match cfg.kind {
        GeneratorKind::Command => Ok(Arc::new(CommandGenerator::new(
            cfg.command.clone(),
            timeout,
            cfg.output_limit_bytes,
        )?)),
        GeneratorKind::Http => Ok(Arc::new(HttpGenerator::from_config(cfg, timeout)?)),
    }
}

/// Spawns a program per prompt: prompt on stdin, reply on stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("generator command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }
}

#[async_trait]
impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(program = %self.argv[0], prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let cmd = command_from_argv(&self.argv)
            .map_err(|err| GenerationError::Failed(format!("{err:#}")))?;
        let input = prompt.as_bytes().to_vec();
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        let output = tokio::task::spawn_blocking(move || {
            run_command_with_timeout(cmd, Some(&input), timeout, limit)
        })
        .await
        .map_err(|err| GenerationError::Failed(format!("generator task failed: {err}")))?
        .map_err(|err| GenerationError::Failed(format!("{err:#}")))?;

        if output.timed_out {
            return Err(GenerationError::Timeout);
        }
        if !output.status.success() {
            return Err(GenerationError::Failed(output.failure_summary("generator")));
        }
        debug!(reply_bytes = output.stdout.len(), "generator replied");
        Ok(output.stdout_text())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
    model: String,
    token: String,
    temperature: f64,
    max_tokens: u32,
}

impl HttpGenerator {
    /// Build a client, reading the bearer token from `cfg.token_env`.
    pub fn from_config(cfg: &GeneratorConfig, timeout: Duration) -> Result<Self> {
        let token = std::env::var(&cfg.token_env)
            .with_context(|| format!("environment variable {} is not set", cfg.token_env))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            token,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }
}

fn classify_http_error(err: &reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Failed(format!("request failed: {err}"))
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|err| classify_http_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "generation endpoint returned an error");
            return Err(GenerationError::Failed(format!(
                "endpoint returned {status}: {}",
                body.trim()
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|err| classify_http_error(&err))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Failed("response contained no choices".to_string()))?;
        debug!(reply_bytes = content.len(), "generator replied");
        Ok(content)
    }
}
