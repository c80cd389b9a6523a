//! Natural-language analytics CLI.
//!
//! Turns questions into validated DuckDB queries, runs them, and produces a
//! rendering snippet that is either validated model output or a safe table.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use sqlviz::core::code_guard::validate_code;
use sqlviz::core::fallback::fallback_artifact;
use sqlviz::core::sql_guard::SqlGuard;
use sqlviz::core::types::{FailureKind, RunOutcome, RunSuccess, ValidationVerdict};
use sqlviz::exit_codes;
use sqlviz::io::config::{DEFAULT_CONFIG_FILE, SqlvizConfig, load_config, write_config};
use sqlviz::logging;
use sqlviz::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "sqlviz",
    version,
    about = "Answer data questions with validated SQL and safe visualizations"
)]
struct Cli {
    /// Configuration file; prompt assets resolve relative to its directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log progress to stderr (`-vv` for details). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Answer one or more questions (runs execute concurrently).
    Ask {
        #[arg(required = true)]
        questions: Vec<String>,
        /// Print one JSON object per question.
        #[arg(long)]
        json: bool,
        /// Run the rendering snippet in the sandbox host.
        #[arg(long)]
        render: bool,
    },
    /// Validate a query and print the verdict.
    CheckSql { sql: String },
    /// Validate a rendering snippet file and print the verdict.
    CheckCode { path: PathBuf },
    /// Print the fallback table snippet for the given columns.
    Fallback { columns: Vec<String> },
}

#[derive(Serialize)]
struct QuestionReport<'a> {
    question: &'a str,
    #[serde(flatten)]
    outcome: &'a RunOutcome,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Ask {
            questions,
            json,
            render,
        } => cmd_ask(&cli.config, &questions, json, render).await,
        Command::CheckSql { sql } => cmd_check_sql(&cli.config, &sql),
        Command::CheckCode { path } => cmd_check_code(&path),
        Command::Fallback { columns } => {
            print!("{}", fallback_artifact(&columns).code());
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &SqlvizConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn config_root(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

async fn cmd_ask(config_path: &Path, questions: &[String], json: bool, render: bool) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let pipeline = Pipeline::from_config(config_root(config_path), &cfg)
        .context("initialize pipeline")?;

    let outcomes =
        futures::future::join_all(questions.iter().map(|question| pipeline.run(question))).await;

    let mut code = exit_codes::OK;
    for (question, outcome) in questions.iter().zip(&outcomes) {
        if json {
            let report = QuestionReport { question, outcome };
            println!("{}", serde_json::to_string(&report).context("serialize report")?);
        } else {
            print_outcome(question, outcome);
        }

        match outcome {
            RunOutcome::Success(success) if render => {
                if let Err(err) = pipeline.render(success).await {
                    eprintln!("{question}: {err}");
                }
            }
            RunOutcome::Success(_) => {}
            RunOutcome::Failed(failure) => {
                let failure_code = match failure.error_kind {
                    FailureKind::MaxRetriesExceeded => exit_codes::MAX_RETRIES,
                    FailureKind::ExecutionFailed => exit_codes::EXECUTION_FAILED,
                };
                code = code.max(failure_code);
            }
        }
    }
    Ok(code)
}

fn print_outcome(question: &str, outcome: &RunOutcome) {
    println!("# {question}");
    match outcome {
        RunOutcome::Success(success) => print_success(success),
        RunOutcome::Failed(failure) => println!("error: {}", failure.message),
    }
    println!();
}

fn print_success(success: &RunSuccess) {
    println!("{}", success.query);
    println!();
    println!("{}", success.columns.join("\t"));
    for row in &success.rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        println!("{}", cells.join("\t"));
    }
    println!("({} rows)", success.rows.len());
    println!();
    print!("{}", success.render_snippet.code());
    if !success.render_snippet.code().ends_with('\n') {
        println!();
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn print_verdict(verdict: &ValidationVerdict) -> Result<i32> {
    println!(
        "{}",
        serde_json::to_string_pretty(verdict).context("serialize verdict")?
    );
    Ok(if verdict.is_valid {
        exit_codes::OK
    } else {
        exit_codes::REJECTED
    })
}

fn cmd_check_sql(config_path: &Path, sql: &str) -> Result<i32> {
    let cfg = load_config(config_path)?;
    print_verdict(&SqlGuard::new(cfg.pipeline.max_row_limit).validate(sql))
}

fn cmd_check_code(path: &Path) -> Result<i32> {
    let code = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    print_verdict(&validate_code(&code))
}
