//! Lightweight description of a query result for the visualization prompt.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::types::Row;

/// Rows inspected for type inference and samples.
const INFERENCE_ROWS: usize = 10;
const SAMPLE_VALUES: usize = 5;
/// Values checked against the ISO date pattern.
const DATE_PROBE_VALUES: usize = 3;
const SAMPLE_ROWS: usize = 3;

static NULL: Value = Value::Null;

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Datetime,
    String,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub sample_values: Vec<Value>,
    pub has_nulls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataProfile {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    /// First rows keyed by column name, in column order.
    pub sample_rows: Vec<Map<String, Value>>,
}

impl DataProfile {
    /// Profile a result set. Short rows read as nulls in the missing positions.
    pub fn from_rows(columns: &[String], rows: &[Row]) -> Self {
        let profiles = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let head: Vec<&Value> = rows
                    .iter()
                    .take(INFERENCE_ROWS)
                    .map(|row| cell(row, idx))
                    .collect();
                let non_null: Vec<&Value> =
                    head.iter().copied().filter(|value| !value.is_null()).collect();
                ColumnProfile {
                    name: name.clone(),
                    kind: infer_kind(&non_null),
                    sample_values: non_null
                        .iter()
                        .take(SAMPLE_VALUES)
                        .map(|value| (*value).clone())
                        .collect(),
                    has_nulls: rows.iter().any(|row| cell(row, idx).is_null()),
                }
            })
            .collect();

        let sample_rows = rows
            .iter()
            .take(SAMPLE_ROWS)
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| (name.clone(), cell(row, idx).clone()))
                    .collect()
            })
            .collect();

        Self {
            row_count: rows.len(),
            column_count: columns.len(),
            columns: profiles,
            sample_rows,
        }
    }
}

fn cell(row: &Row, idx: usize) -> &Value {
    row.get(idx).unwrap_or(&NULL)
}

fn infer_kind(non_null: &[&Value]) -> ColumnKind {
    if non_null.is_empty() {
        return ColumnKind::Unknown;
    }
    if non_null.iter().all(|value| value.is_number()) {
        return ColumnKind::Numeric;
    }
    let all_strings = non_null.iter().all(|value| value.is_string());
    let looks_dated = non_null
        .iter()
        .take(DATE_PROBE_VALUES)
        .filter_map(|value| value.as_str())
        .any(|text| ISO_DATE_RE.is_match(text));
    if all_strings && looks_dated {
        return ColumnKind::Datetime;
    }
    ColumnKind::String
}
