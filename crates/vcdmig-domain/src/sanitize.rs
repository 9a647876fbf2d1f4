/// Longest description the platform accepts on an edge gateway.
pub const DESCRIPTION_MAX_CHARS: usize = 128;

/// Make a free-text description acceptable to the platform: line breaks
/// become a single space, the XML-significant `&`, `<`, `>` characters are
/// dropped, and the result is truncated to [`DESCRIPTION_MAX_CHARS`]
/// characters.
pub fn sanitize_description(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\n' | '\r' => {
                if !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            '&' | '<' | '>' => {}
            c => out.push(c),
        }
    }
    out.trim_end().chars().take(DESCRIPTION_MAX_CHARS).collect()
}
