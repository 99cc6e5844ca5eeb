//! Query Analyzer (spec §4.9). A pure function from a query string to a
//! classification record — no I/O, fully deterministic, so it's trivial to
//! unit test exhaustively and safe to call on every keystroke from a UI.

use std::sync::LazyLock;

use regex::Regex;

static BOOLEAN_OP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(AND|OR|NOT)\b").expect("valid regex"));
static WILDCARD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*?]").expect("valid regex"));
static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").expect("valid regex"));
static SPECIAL_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[!@#$%^&(){}\[\]<>/\\|~`]"#).expect("valid regex"));

/// Small, common English stop words. Not exhaustive — this crate's
/// substring LIKE branch only needs it to skip the most common low-signal
/// single-word queries, not to replicate a linguistics-grade stop list.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "of", "in", "on", "at",
    "to", "for", "and", "or", "not", "it", "this", "that", "with", "as", "by",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    ShortKeyword,
    LongPhrase,
    Question,
    BooleanOperators,
    ExactPhrase,
    Wildcard,
    Numeric,
    Entity,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFeatures {
    pub word_count: usize,
    pub has_question_word: bool,
    pub has_boolean_operator: bool,
    pub has_quotes: bool,
    pub has_wildcard: bool,
    pub has_digits: bool,
    pub has_special_chars: bool,
    pub avg_word_length: f64,
    pub has_stop_words: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FtsOnly,
    VectorOnly,
    Hybrid,
    LikeOnly,
}

#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub normalized: String,
    pub query_type: QueryType,
    pub confidence: f64,
    pub features: QueryFeatures,
    pub suggested_strategy: Strategy,
    pub fallback_strategies: Vec<Strategy>,
}

const QUESTION_WORDS: &[&str] = &["who", "what", "when", "where", "why", "how", "which", "whose"];

pub fn analyze(query: &str) -> QueryAnalysis {
    let normalized = normalize(query);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let word_count = words.len();

    let has_quotes = query.contains('"');
    let has_boolean_operator = BOOLEAN_OP.is_match(query);
    let has_wildcard = WILDCARD.is_match(query);
    let has_digits = DIGIT.is_match(query);
    let has_special_chars = SPECIAL_CHAR.is_match(query);
    let first_word = words.first().copied().unwrap_or("");
    let has_question_word = QUESTION_WORDS.contains(&first_word) || query.trim_end().ends_with('?');
    let has_stop_words = words.iter().any(|w| STOP_WORDS.contains(w));
    let avg_word_length = if word_count > 0 {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / word_count as f64
    } else {
        0.0
    };

    let features = QueryFeatures {
        word_count,
        has_question_word,
        has_boolean_operator,
        has_quotes,
        has_wildcard,
        has_digits,
        has_special_chars,
        avg_word_length,
        has_stop_words,
    };

    let (query_type, confidence) = classify(query, &features);
    let (suggested_strategy, fallback_strategies) = suggest_strategy(query_type, &features);

    QueryAnalysis {
        normalized,
        query_type,
        confidence,
        features,
        suggested_strategy,
        fallback_strategies,
    }
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify(raw: &str, features: &QueryFeatures) -> (QueryType, f64) {
    if features.has_quotes {
        return (QueryType::ExactPhrase, 0.95);
    }
    if features.has_boolean_operator {
        return (QueryType::BooleanOperators, 0.9);
    }
    if features.has_wildcard {
        return (QueryType::Wildcard, 0.85);
    }
    if features.has_question_word {
        return (QueryType::Question, 0.8);
    }
    if features.has_digits && features.word_count <= 3 {
        return (QueryType::Numeric, 0.7);
    }
    if features.word_count == 1 && raw.chars().next().map(char::is_uppercase).unwrap_or(false) {
        return (QueryType::Entity, 0.6);
    }
    if features.word_count <= 3 {
        return (QueryType::ShortKeyword, 0.75);
    }
    (QueryType::LongPhrase, 0.7)
}

fn suggest_strategy(query_type: QueryType, features: &QueryFeatures) -> (Strategy, Vec<Strategy>) {
    match query_type {
        QueryType::ExactPhrase | QueryType::BooleanOperators | QueryType::Wildcard => {
            (Strategy::FtsOnly, vec![Strategy::Hybrid])
        }
        QueryType::Question | QueryType::LongPhrase => {
            (Strategy::Hybrid, vec![Strategy::VectorOnly, Strategy::FtsOnly])
        }
        QueryType::ShortKeyword if features.word_count == 1 => {
            (Strategy::Hybrid, vec![Strategy::FtsOnly, Strategy::LikeOnly])
        }
        QueryType::ShortKeyword => (Strategy::Hybrid, vec![Strategy::FtsOnly]),
        QueryType::Numeric => (Strategy::FtsOnly, vec![Strategy::LikeOnly]),
        QueryType::Entity => (Strategy::Hybrid, vec![Strategy::FtsOnly, Strategy::LikeOnly]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_query_is_exact_phrase() {
        let a = analyze("\"rust ownership model\"");
        assert_eq!(a.query_type, QueryType::ExactPhrase);
        assert_eq!(a.suggested_strategy, Strategy::FtsOnly);
    }

    #[test]
    fn boolean_operators_are_detected() {
        let a = analyze("cats AND dogs");
        assert_eq!(a.query_type, QueryType::BooleanOperators);
        assert!(a.features.has_boolean_operator);
    }

    #[test]
    fn question_words_suggest_hybrid() {
        let a = analyze("how does reciprocal rank fusion work");
        assert_eq!(a.query_type, QueryType::Question);
        assert_eq!(a.suggested_strategy, Strategy::Hybrid);
    }

    #[test]
    fn single_word_is_short_keyword_and_falls_back_to_like() {
        let a = analyze("rust");
        assert_eq!(a.query_type, QueryType::ShortKeyword);
        assert!(a.fallback_strategies.contains(&Strategy::LikeOnly));
    }

    #[test]
    fn normalize_collapses_whitespace() {
        let a = analyze("  rust   ownership  ");
        assert_eq!(a.normalized, "rust ownership");
    }

    #[test]
    fn word_count_and_avg_length_are_consistent() {
        let a = analyze("rust ownership model");
        assert_eq!(a.features.word_count, 3);
        assert!(a.features.avg_word_length > 0.0);
    }
}
