//! Deterministic text cleanup for page text and backend responses.
//!
//! Page text arrives from three very different places (a PDF text layer,
//! a vision-LLM transcription, a markdown dump) and all of them carry the
//! same kinds of noise: CRLF line endings, zero-width characters, emphasis
//! markers around names, runs of layout spaces. Backend responses sometimes
//! wrap their JSON in fences or a sentence of prose. Each rule is a small
//! pure function so it can be tested on its own.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalise raw page text before segmentation.
///
/// 1. CRLF / CR → LF
/// 2. Strip invisible Unicode (zero-width, BOM, soft hyphen)
/// 3. Strip leading/trailing `*` emphasis and collapse inner whitespace per line
/// 4. Collapse 3+ blank lines down to one
pub fn normalise_page(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let lines: Vec<String> = s.lines().map(clean_line).collect();
    collapse_blank_lines(&lines.join("\n")).trim().to_string()
}

/// Cleanup for a vision transcription: unwrap fences, then [`normalise_page`].
pub fn clean_transcription(input: &str) -> String {
    normalise_page(&strip_outer_fences(input))
}

// ── Rule: line endings ───────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n").replace('\u{000C}', "\n")
}

// ── Rule: invisible characters ───────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Rule: per-line cleanup ───────────────────────────────────────────────

static RE_INNER_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]{2,}").unwrap());
static RE_LEADING_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*+\s*").unwrap());
static RE_TRAILING_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\*+$").unwrap());

/// Strip `**bold**` markers at the edges and collapse layout whitespace.
///
/// A single trailing `*` on a name (`Patel, Nigam M MD*`) is a footnote
/// marker in most directories and is removed along with bold markers.
pub fn clean_line(line: &str) -> String {
    let s = line.trim();
    let s = RE_LEADING_STARS.replace(s, "");
    let s = RE_TRAILING_STARS.replace(&s, "");
    RE_INNER_SPACES.replace_all(&s, " ").trim().to_string()
}

// ── Rule: blank lines ────────────────────────────────────────────────────

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUNS.replace_all(input, "\n\n").to_string()
}

// ── Rule: outer fences ───────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*)\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Backend responses ────────────────────────────────────────────────────

/// Locate the JSON payload inside an LLM response.
///
/// Handles fenced (```` ```json ````) responses and prose before or after
/// the payload. Both the outermost `{…}` and `[…]` spans are tried,
/// earliest first, and the first one that parses wins; when neither parses
/// the earliest span is returned so the caller reports the parse error.
/// Returns `None` when no span exists.
pub fn extract_json(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let block = after[..end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Some(block);
            }
        }
    }

    let mut spans: Vec<&str> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = trimmed.find(open)?;
            let end = trimmed.rfind(close)?;
            (start < end).then(|| &trimmed[start..=end])
        })
        .collect();
    spans.sort_by_key(|span| span.as_ptr() as usize);

    spans
        .iter()
        .copied()
        .find(|span| serde_json::from_str::<serde::de::IgnoredAny>(span).is_ok())
        .or_else(|| spans.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_line_strips_bold_and_spaces() {
        assert_eq!(clean_line("**Jarava,   Abelardo MD**"), "Jarava, Abelardo MD");
        assert_eq!(clean_line("  Patel, Nigam M MD*  "), "Patel, Nigam M MD");
        assert_eq!(clean_line("123 Main St\t\tSuite 4"), "123 Main St Suite 4");
    }

    #[test]
    fn normalise_page_handles_crlf_and_invisible() {
        let raw = "Kim,\u{200B} Ann MD\r\n\r\n\r\n\r\n(312) 555-0100\r\n";
        assert_eq!(normalise_page(raw), "Kim, Ann MD\n\n(312) 555-0100");
    }

    #[test]
    fn normalise_empty_page() {
        assert_eq!(normalise_page("  \n\n \u{FEFF}\n"), "");
    }

    #[test]
    fn transcription_fences_are_removed() {
        let raw = "```text\n## COOK COUNTY\nKim, Ann MD\n```";
        assert_eq!(clean_transcription(raw), "## COOK COUNTY\nKim, Ann MD");
    }

    #[test]
    fn extract_json_from_fenced_response() {
        let r = "Here you go:\n```json\n{\"providers\": []}\n```\nDone.";
        assert_eq!(extract_json(r), Some("{\"providers\": []}"));
    }

    #[test]
    fn extract_json_from_prose() {
        let r = "The result is {\"providers\": [{\"name\": \"A\"}]} as requested.";
        assert_eq!(extract_json(r), Some("{\"providers\": [{\"name\": \"A\"}]}"));
    }

    #[test]
    fn extract_json_skips_bracketed_prose() {
        let r = "See [1]: {\"providers\": [{\"name\": \"A\"}]}";
        assert_eq!(extract_json(r), Some("{\"providers\": [{\"name\": \"A\"}]}"));

        let r = "Entries {see note} follow: [{\"name\": \"A\"}]";
        assert_eq!(extract_json(r), Some("[{\"name\": \"A\"}]"));
    }

    #[test]
    fn extract_json_unparseable_returns_earliest_span() {
        assert_eq!(extract_json("oops {\"providers\": [ }"), Some("{\"providers\": [ }"));
    }

    #[test]
    fn extract_bare_array() {
        assert_eq!(extract_json("[{\"name\": \"A\"}]"), Some("[{\"name\": \"A\"}]"));
    }

    #[test]
    fn extract_json_none() {
        assert_eq!(extract_json("I could not find any providers."), None);
    }
}
