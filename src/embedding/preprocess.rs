//! Text preprocessing before embedding (spec §4.6): strip markup, collapse
//! whitespace, and truncate to the model's token budget. Truncation keeps
//! head and tail and drops the middle, since titles and opening/closing
//! sentences tend to carry more distinguishing signal than the middle of a
//! long document.

use std::sync::LazyLock;

use regex::Regex;

/// Conservative token-per-character ratio used to estimate truncation
/// points without running the real tokenizer twice.
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static MD_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s*").expect("valid regex"));
static MD_EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_`]{1,3}").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

pub fn strip_markup(text: &str) -> String {
    let no_html = HTML_TAG.replace_all(text, " ");
    let no_headings = MD_HEADING.replace_all(&no_html, "");
    let no_emphasis = MD_EMPHASIS.replace_all(&no_headings, "");
    WHITESPACE.replace_all(&no_emphasis, " ").trim().to_string()
}

/// Truncates to roughly `max_tokens`, keeping ~70% from the head and ~30%
/// from the tail when the text doesn't fit.
pub fn truncate_for_embedding(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN_ESTIMATE);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let head_len = max_chars * 7 / 10;
    let tail_len = max_chars - head_len;

    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    format!("{head} ... {tail}")
}

pub fn preprocess(text: &str, max_tokens: usize) -> String {
    truncate_for_embedding(&strip_markup(text), max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markup_removes_html_and_markdown() {
        let input = "<h1>Title</h1>\n# Heading\nSome **bold** and `code`.";
        let out = strip_markup(input);
        assert!(!out.contains('<'));
        assert!(!out.contains('#'));
        assert!(!out.contains('*'));
        assert!(out.contains("bold"));
    }

    #[test]
    fn truncate_keeps_head_and_tail_for_long_text() {
        let text = "a".repeat(10_000);
        let out = truncate_for_embedding(&text, 100);
        assert!(out.len() < text.len());
        assert!(out.contains("..."));
    }

    #[test]
    fn truncate_is_noop_for_short_text() {
        let text = "short text";
        assert_eq!(truncate_for_embedding(text, 100), text);
    }
}
