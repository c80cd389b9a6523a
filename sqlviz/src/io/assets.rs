//! Prompt assets loaded from disk once per process.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::io::config::AssetPaths;

const DATA_PATH_PLACEHOLDER: &str = "{DATA_PATH}";

/// Text fragments embedded in the generation prompts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptAssets {
    /// Agent instructions, embedded verbatim in the SQL prompt.
    pub instructions: String,
    /// Semantic layer with `{DATA_PATH}` resolved.
    pub semantic_layer: String,
    /// Visualization guidelines section of the instructions (may be empty).
    pub viz_guidelines: String,
}

impl PromptAssets {
    /// Load assets relative to `root` (the config file's directory).
    pub fn load(root: &Path, paths: &AssetPaths) -> Result<Self> {
        let instructions_path = root.join(&paths.instructions);
        let instructions = fs::read_to_string(&instructions_path)
            .with_context(|| format!("read instructions {}", instructions_path.display()))?;

        let layer_path = root.join(&paths.semantic_layer);
        let raw_layer = fs::read_to_string(&layer_path)
            .with_context(|| format!("read semantic layer {}", layer_path.display()))?;
        let data_dir = resolve_data_dir(root, &paths.data_dir);
        let semantic_layer =
            raw_layer.replace(DATA_PATH_PLACEHOLDER, &data_dir.display().to_string());

        let viz_guidelines = extract_section(&instructions, &paths.guidelines_marker);
        if viz_guidelines.is_empty() {
            warn!(
                marker = %paths.guidelines_marker,
                "visualization guidelines section not found"
            );
        }

        debug!(
            instructions_bytes = instructions.len(),
            semantic_layer_bytes = semantic_layer.len(),
            guidelines_bytes = viz_guidelines.len(),
            "loaded prompt assets"
        );
        Ok(Self {
            instructions,
            semantic_layer,
            viz_guidelines,
        })
    }
}

/// Absolute data directory when it exists, otherwise the joined path.
pub fn resolve_data_dir(root: &Path, data_dir: &str) -> PathBuf {
    let joined = root.join(data_dir);
    fs::canonicalize(&joined).unwrap_or(joined)
}

/// Text from the first occurrence of `marker` up to the next occurrence (or
/// end of input), marker included. Empty when the marker is absent.
pub fn extract_section(text: &str, marker: &str) -> String {
    let Some(start) = text.find(marker) else {
        return String::new();
    };
    let rest = &text[start + marker.len()..];
    let end = rest.find(marker).unwrap_or(rest.len());
    format!("{marker}{}", &rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "## Plotly Visualization Guidelines";

    #[test]
    fn extracts_section_to_end() {
        let text = format!("# SQL rules\nAlways LIMIT.\n\n{MARKER}\nUse bar charts.\n");
        assert_eq!(
            extract_section(&text, MARKER),
            format!("{MARKER}\nUse bar charts.\n")
        );
    }

    #[test]
    fn missing_marker_yields_empty_section() {
        assert_eq!(extract_section("# SQL rules only", MARKER), "");
    }

    #[test]
    fn loads_and_resolves_data_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("data")).expect("mkdir");
        fs::write(
            root.join("agent-specifications.md"),
            format!("Rules.\n{MARKER}\nCharts."),
        )
        .expect("write");
        fs::write(
            root.join("data/semantic_layer.yaml"),
            "path: '{DATA_PATH}/fact.parquet'\n",
        )
        .expect("write");

        let assets = PromptAssets::load(root, &AssetPaths::default()).expect("load");
        let data_dir = fs::canonicalize(root.join("data")).expect("canonicalize");

        assert!(assets.instructions.starts_with("Rules."));
        assert_eq!(assets.viz_guidelines, format!("{MARKER}\nCharts."));
        assert_eq!(
            assets.semantic_layer,
            format!("path: '{}/fact.parquet'\n", data_dir.display())
        );
    }

    #[test]
    fn missing_instructions_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = PromptAssets::load(temp.path(), &AssetPaths::default()).expect_err("missing");
        assert!(format!("{err:#}").contains("read instructions"));
    }
}
