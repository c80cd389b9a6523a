//! Read-only query rules for model-generated SQL.
//!
//! Checks are textual over a normalized form of the statement: comments and
//! quoted text blanked out, lowercase, single spaces, trailing semicolons
//! removed. Nothing here builds a query plan, but every keyword match is
//! word-boundary safe so identifiers such as `insertedDate` or `last_update`
//! never trip a rule.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::ValidationVerdict;

/// Default ceiling for `LIMIT n`.
pub const DEFAULT_MAX_ROW_LIMIT: u64 = 10_000;

/// Keywords that modify data or schema.
pub const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "create", "alter", "truncate", "replace", "merge",
    "grant", "revoke",
];

static MUTATING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b({})\b", MUTATING_KEYWORDS.join("|"))).unwrap()
});
static LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\blimit\s+(\d+)\b").unwrap());
static WILDCARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\bselect\s+(?:distinct\s+)?|,\s*)\*").unwrap());

/// Query safety validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlGuard {
    max_row_limit: u64,
}

impl Default for SqlGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROW_LIMIT)
    }
}

impl SqlGuard {
    pub fn new(max_row_limit: u64) -> Self {
        Self { max_row_limit }
    }

    /// Classify `candidate` as safe to run, stopping at the first failed rule.
    pub fn validate(&self, candidate: &str) -> ValidationVerdict {
        let normalized = normalize(candidate);
        if normalized.is_empty() {
            return ValidationVerdict::invalid("no query produced");
        }

        if !(starts_with_word(&normalized, "select") || starts_with_word(&normalized, "with")) {
            return ValidationVerdict::invalid(format!(
                "must be a read-only statement (found {})",
                leading_keyword(&normalized).to_uppercase()
            ));
        }

        if let Some(found) = MUTATING_RE.find(&normalized) {
            return ValidationVerdict::invalid(format!(
                "forbidden keyword: {}",
                found.as_str().to_uppercase()
            ));
        }

        if normalized.contains(';') {
            return ValidationVerdict::invalid("multiple statements are not allowed");
        }

        let limits: Vec<_> = LIMIT_RE.captures_iter(&normalized).collect();
        let bounds_result = limits.last().is_some_and(|caps| {
            let end = caps.get(0).map_or(0, |m| m.end());
            !normalized[end..].contains(')')
        });
        if !bounds_result {
            return ValidationVerdict::invalid("missing row limit");
        }

        for caps in &limits {
            let digits = caps.get(1).map_or("", |m| m.as_str());
            let within = digits
                .parse::<u64>()
                .is_ok_and(|value| value <= self.max_row_limit);
            if !within {
                return ValidationVerdict::invalid(format!(
                    "row limit {digits} exceeds maximum of {}",
                    self.max_row_limit
                ));
            }
        }

        let mut verdict = ValidationVerdict::valid();
        if WILDCARD_RE.is_match(&normalized) {
            verdict = verdict.with_warning("unqualified wildcard column selection (SELECT *)");
        }
        verdict
    }
}

/// Mask, lowercase, collapse whitespace, and drop trailing semicolons.
fn normalize(raw: &str) -> String {
    let masked = mask_comments_and_literals(raw);
    let collapsed = masked.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut candidate = collapsed.as_str();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate.to_lowercase()
}

/// Replace comments with a space and empty every quoted span, keeping its
/// delimiters.
///
/// Block comments nest. An unterminated comment or quote masks the rest of
/// the input.
fn mask_comments_and_literals(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match ch {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if next == Some('*') => {
                i = skip_block_comment(&chars, i);
                out.push(' ');
            }
            '\'' | '"' => {
                let backslash_escapes = ch == '\'' && is_escape_string_prefix(&chars, i);
                i = skip_quoted(&chars, i + 1, ch, backslash_escapes);
                out.push(ch);
                out.push(ch);
            }
            '$' => match dollar_quote_len(&chars, i) {
                Some(len) => {
                    i = skip_dollar_quoted(&chars, i, len);
                    out.push_str("$$");
                }
                None => {
                    out.push(ch);
                    i += 1;
                }
            },
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Index just past the block comment opening at `start`.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('/', Some('*')) => {
                depth += 1;
                i += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    chars.len()
}

/// `E'...'` literals treat backslash as an escape.
fn is_escape_string_prefix(chars: &[char], quote: usize) -> bool {
    quote > 0
        && matches!(chars[quote - 1], 'e' | 'E')
        && (quote == 1 || !is_identifier_char(chars[quote - 2]))
}

/// Index just past the closing `quote`; a doubled quote is an escaped one.
fn skip_quoted(chars: &[char], mut i: usize, quote: char, backslash_escapes: bool) -> usize {
    while i < chars.len() {
        let ch = chars[i];
        if backslash_escapes && ch == '\\' {
            i += 2;
            continue;
        }
        if ch == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Length of a `$$` or `$tag$` opener at `start`, if there is one.
fn dollar_quote_len(chars: &[char], start: usize) -> Option<usize> {
    if start > 0 && is_identifier_char(chars[start - 1]) {
        return None;
    }
    let mut i = start + 1;
    while let Some(&ch) = chars.get(i) {
        if ch == '$' {
            return Some(i - start + 1);
        }
        let valid = if i == start + 1 {
            ch.is_alphabetic() || ch == '_'
        } else {
            is_identifier_char(ch)
        };
        if !valid {
            return None;
        }
        i += 1;
    }
    None
}

/// Index just past the delimiter closing the dollar quote at `start`.
fn skip_dollar_quoted(chars: &[char], start: usize, len: usize) -> usize {
    let delimiter = &chars[start..start + len];
    let body = start + len;
    (body..chars.len().saturating_sub(len - 1))
        .find(|&i| &chars[i..i + len] == delimiter)
        .map_or(chars.len(), |i| i + len)
}

fn starts_with_word(normalized: &str, word: &str) -> bool {
    normalized
        .strip_prefix(word)
        .is_some_and(|rest| !rest.starts_with(|ch: char| ch.is_alphanumeric() || ch == '_'))
}

fn leading_keyword(normalized: &str) -> &str {
    normalized
        .split(|ch: char| !ch.is_alphanumeric() && ch != '_')
        .find(|token| !token.is_empty())
        .unwrap_or("unknown")
}
