//! Prompt builder for the two generation calls.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::data_profile::DataProfile;
use crate::io::assets::PromptAssets;

const SQL_TEMPLATE: &str = include_str!("prompts/sql.md");
const VISUALIZATION_TEMPLATE: &str = include_str!("prompts/visualization.md");

/// Previous attempt fed back into the SQL prompt on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlFeedback {
    pub previous_sql: String,
    pub reason: String,
}

/// Column line for the visualization prompt.
#[derive(Debug, Clone, Serialize)]
struct ColumnContext {
    name: String,
    kind: String,
    samples: String,
    has_nulls: bool,
}

/// Template engine wrapper around minijinja plus the loaded assets.
///
/// Immutable after construction; runs share one instance.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    assets: PromptAssets,
}

impl PromptBuilder {
    pub fn new(assets: PromptAssets) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("sql", SQL_TEMPLATE)
            .context("parse sql prompt template")?;
        env.add_template("visualization", VISUALIZATION_TEMPLATE)
            .context("parse visualization prompt template")?;
        Ok(Self { env, assets })
    }

    /// SQL prompt: instructions, semantic layer, question and optional feedback.
    pub fn build_sql(&self, question: &str, feedback: Option<&SqlFeedback>) -> Result<String> {
        let template = self.env.get_template("sql")?;
        let rendered = template.render(context! {
            instructions => self.assets.instructions.trim(),
            semantic_layer => self.assets.semantic_layer.trim(),
            question => question.trim(),
            feedback => feedback.map(|feedback| SqlFeedback {
                previous_sql: feedback.previous_sql.trim().to_string(),
                reason: feedback.reason.clone(),
            }),
        })?;
        debug!(bytes = rendered.len(), retry = feedback.is_some(), "built sql prompt");
        Ok(rendered)
    }

    /// Visualization prompt: guidelines plus a profile of the result set.
    pub fn build_visualization(
        &self,
        question: &str,
        sql: &str,
        profile: &DataProfile,
    ) -> Result<String> {
        let columns: Vec<ColumnContext> = profile
            .columns
            .iter()
            .map(|column| ColumnContext {
                name: column.name.clone(),
                kind: serde_json::to_value(column.kind)
                    .ok()
                    .and_then(|kind| kind.as_str().map(str::to_string))
                    .unwrap_or_default(),
                samples: serde_json::to_string(&column.sample_values).unwrap_or_default(),
                has_nulls: column.has_nulls,
            })
            .collect();
        let sample_rows: Vec<String> = profile
            .sample_rows
            .iter()
            .filter_map(|row| serde_json::to_string(row).ok())
            .collect();

        let guidelines = self.assets.viz_guidelines.trim();
        let template = self.env.get_template("visualization")?;
        let rendered = template.render(context! {
            guidelines => (!guidelines.is_empty()).then_some(guidelines),
            question => question.trim(),
            sql => sql.trim(),
            row_count => profile.row_count,
            column_count => profile.column_count,
            columns => columns,
            sample_rows => sample_rows,
        })?;
        debug!(bytes = rendered.len(), "built visualization prompt");
        Ok(rendered)
    }
}
