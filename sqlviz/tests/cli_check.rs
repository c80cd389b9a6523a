//! CLI tests for the `sqlviz` binary.
//!
//! Spawns the binary and verifies exit codes and output for the offline
//! commands, plus `ask` runs against shell stand-ins for the generator and
//! the query engine.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use sqlviz::exit_codes;
use sqlviz::io::config::{GeneratorKind, SqlvizConfig, load_config, write_config};

fn sqlviz(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sqlviz"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run sqlviz")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn check_sql_accepts_limited_select() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(
        temp.path(),
        &["check-sql", "SELECT site, SUM(quantity) FROM fact_batch_production GROUP BY 1 LIMIT 50"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("\"is_valid\": true"));
}

#[test]
fn check_sql_rejects_delete() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(temp.path(), &["check-sql", "DELETE FROM fact_batch_production"]);

    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    let text = stdout(&output);
    assert!(text.contains("\"is_valid\": false"));
    assert!(text.contains("DELETE"));
}

#[test]
fn check_sql_uses_configured_row_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = SqlvizConfig::default();
    cfg.pipeline.max_row_limit = 100;
    write_config(&temp.path().join("sqlviz.toml"), &cfg).expect("write config");

    let output = sqlviz(temp.path(), &["check-sql", "SELECT * FROM dim_site LIMIT 500"]);

    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&output).contains("row limit 500 exceeds maximum of 100"));
}

#[test]
fn check_sql_ignores_commented_out_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(
        temp.path(),
        &["check-sql", "SELECT * FROM fact_batch_production\n-- LIMIT 10"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&output).contains("missing row limit"));
}

#[test]
fn fallback_snippet_passes_check_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(temp.path(), &["fallback", "site", "total"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let snippet = stdout(&output);
    assert!(snippet.contains("def render_visualization(viz_type: str, columns: list, rows: list):"));

    fs::write(temp.path().join("fallback.py"), &snippet).expect("write snippet");
    let output = sqlviz(temp.path(), &["check-code", "fallback.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn check_code_rejects_shell_access() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("chart.py"),
        "import os\n\ndef render_visualization(viz_type, columns, rows):\n    os.system('id')\n",
    )
    .expect("write snippet");

    let output = sqlviz(temp.path(), &["check-code", "chart.py"]);

    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&output).contains("\"is_valid\": false"));
}

#[test]
fn check_code_rejects_module_reached_through_pandas() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("chart.py"),
        "import pandas as pd\n\ndef render_visualization(viz_type, columns, rows):\n    pd.io.common.os.system('id')\n",
    )
    .expect("write snippet");

    let output = sqlviz(temp.path(), &["check-code", "chart.py"]);

    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&output).contains("forbidden method call: pd.io.common.os.system"));
}

#[test]
fn check_code_missing_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(temp.path(), &["check-code", "absent.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_writes_loadable_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let cfg = load_config(&temp.path().join("sqlviz.toml")).expect("load config");
    assert_eq!(cfg, SqlvizConfig::default());
}

#[test]
fn init_keeps_existing_config_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("sqlviz.toml");
    fs::write(&path, "[pipeline]\nmax_retries = 1\n").expect("write config");

    let output = sqlviz(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").pipeline.max_retries, 1);

    let output = sqlviz(temp.path(), &["init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").pipeline.max_retries, 3);
}

#[test]
fn usage_errors_exit_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(
        sqlviz(temp.path(), &["explode"]).status.code(),
        Some(exit_codes::INVALID)
    );
    assert_eq!(
        sqlviz(temp.path(), &["ask"]).status.code(),
        Some(exit_codes::INVALID)
    );
}

#[test]
fn ask_without_assets_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sqlviz(temp.path(), &["ask", "How many sites?"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

/// Assets plus a config whose generator and engine are `sh -c` scripts.
#[cfg(unix)]
fn shell_workspace(generator_script: &str, engine_script: &str) -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    fs::create_dir_all(root.join("data")).expect("mkdir data");
    fs::write(
        root.join("agent-specifications.md"),
        "# Rules\nUse DuckDB.\n## Plotly Visualization Guidelines\nPrefer bars.\n",
    )
    .expect("write instructions");
    fs::write(
        root.join("data/semantic_layer.yaml"),
        "tables:\n  - name: dim_site\n    path: '{DATA_PATH}/dim_site.parquet'\n",
    )
    .expect("write semantic layer");

    let mut cfg = SqlvizConfig::default();
    cfg.generator.kind = GeneratorKind::Command;
    cfg.generator.command = vec!["sh".into(), "-c".into(), generator_script.into()];
    cfg.engine.command = vec!["sh".into(), "-c".into(), engine_script.into()];
    write_config(&root.join("sqlviz.toml"), &cfg).expect("write config");
    temp
}

#[cfg(unix)]
#[test]
fn ask_reports_success_as_json() {
    let temp = shell_workspace(
        "cat >/dev/null; echo 'SELECT COUNT(*) AS sites FROM dim_site LIMIT 1'",
        "cat >/dev/null; echo '[{\"sites\": 4}]'",
    );

    let output = sqlviz(temp.path(), &["ask", "--json", "How many sites?"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let line = stdout(&output);
    let report: serde_json::Value = serde_json::from_str(line.trim()).expect("json report");
    assert_eq!(report["question"], "How many sites?");
    assert_eq!(report["status"], "success");
    assert_eq!(report["query"], "SELECT COUNT(*) AS sites FROM dim_site LIMIT 1");
    assert_eq!(report["columns"], serde_json::json!(["sites"]));
    assert_eq!(report["rows"], serde_json::json!([[4]]));
    // The generator echoes SQL for the snippet too, so the table fallback is used.
    let snippet = report["render_snippet"].as_str().expect("snippet string");
    assert!(snippet.contains("st.dataframe(df, use_container_width=True, hide_index=True)"));
}

#[cfg(unix)]
#[test]
fn ask_exhausting_retries_exits_max_retries() {
    let temp = shell_workspace(
        "cat >/dev/null; echo 'SELECT name FROM dim_site'",
        "cat >/dev/null; echo '[]'",
    );

    let output = sqlviz(temp.path(), &["ask", "List sites"]);

    assert_eq!(output.status.code(), Some(exit_codes::MAX_RETRIES));
    assert!(stdout(&output).contains("after 3 retries"));
}

#[cfg(unix)]
#[test]
fn ask_engine_error_exits_execution_failed() {
    let temp = shell_workspace(
        "cat >/dev/null; echo 'SELECT bu FROM dim_site LIMIT 5'",
        "cat >/dev/null; echo 'Binder Error: column bu not found' >&2; exit 1",
    );

    let output = sqlviz(temp.path(), &["ask", "Sites by bu"]);

    assert_eq!(output.status.code(), Some(exit_codes::EXECUTION_FAILED));
    assert!(stdout(&output).contains("Binder Error: column bu not found"));
}
