//! Deterministic table rendering used whenever a generated snippet is unusable.

use crate::core::types::CodeArtifact;

/// Build the fallback table snippet for `columns`.
///
/// The snippet prefers the column list the host passes at call time and falls
/// back to the names captured here, substituted as escaped string literals.
pub fn fallback_artifact(columns: &[String]) -> CodeArtifact {
    let literal = columns
        .iter()
        .map(|column| python_string_literal(column))
        .collect::<Vec<_>>()
        .join(", ");

    let code = format!(
        r#"def render_visualization(viz_type: str, columns: list, rows: list):
    """Render the query result as a plain table."""
    import pandas as pd
    import streamlit as st

    df = pd.DataFrame(rows, columns=columns or [{literal}])
    st.dataframe(df, use_container_width=True, hide_index=True)
    st.caption(f"Showing {{len(df)}} rows × {{len(df.columns)}} columns")
"#
    );
    CodeArtifact::fallback(code)
}

/// Double-quoted Python literal with every special character escaped.
fn python_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(ch))),
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}
