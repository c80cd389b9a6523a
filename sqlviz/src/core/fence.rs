//! Markdown code-fence stripping for model replies.

const FENCE: &str = "```";

/// Return the contents of the first fenced block in `reply`, trimmed.
///
/// Handles ```` ```sql ````, ```` ```python ```` and bare fences. A reply
/// without a fence is returned trimmed but otherwise verbatim. The closing
/// fence must start a line, so a fence inside a string literal stays part of
/// the code; a single-line block may also close at the end of its line. An
/// unclosed fence keeps everything after the opening line.
pub fn strip_code_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(start) = trimmed.find(FENCE) else {
        return trimmed.to_string();
    };

    let mut body = &trimmed[start + FENCE.len()..];
    let tag_len = body
        .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
        .unwrap_or(body.len());
    if tag_len > 0 && body[tag_len..].starts_with(['\n', '\r']) {
        body = &body[tag_len..];
    }

    let inner = match closing_fence(body) {
        Some(end) => &body[..end],
        None => body.trim_end().strip_suffix(FENCE).unwrap_or(body),
    };
    inner.trim().to_string()
}

/// Byte offset of the first line in `body` that opens with a fence.
fn closing_fence(body: &str) -> Option<usize> {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        if line[indent..].starts_with(FENCE) {
            return Some(offset + indent);
        }
        offset += line.len();
    }
    None
}
