//! Search Executor (spec §4.11). Runs the FTS, vector, and LIKE branches
//! named in the plan, each a synchronous call
//! ([`crate::db::Db::select`], [`crate::vector_index::VectorIndex::search`])
//! the same way the teacher's chunk search is — no async task overhead, since
//! there's nothing to overlap I/O-wait on. Each branch observes the plan's
//! deadline and reports whether it ran past it instead of failing the whole
//! request.

use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;

use crate::db::{Db, Value};
use crate::errors::AppError;
use crate::search::analyzer::STOP_WORDS;
use crate::search::fusion::{Branch, BranchHit};
use crate::search::strategy::ExecutionPlan;
use crate::vector_index::VectorIndex;

pub const LIKE_MIN_QUERY_LEN: usize = 3;
pub const LIKE_MAX_ROWS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct BranchDebugInfo {
    pub fts_ran: bool,
    pub vector_ran: bool,
    pub like_ran: bool,
    pub like_skipped: Option<String>,
    pub fts_timed_out: bool,
    pub vector_timed_out: bool,
    pub like_timed_out: bool,
}

#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub branches: Vec<(Branch, Vec<BranchHit>)>,
    pub debug: BranchDebugInfo,
}

pub fn execute(
    db: &Db,
    collection: &str,
    query_text: &str,
    query_vector: Option<&[f32]>,
    vector_index: Option<&dyn VectorIndex>,
    plan: &ExecutionPlan,
) -> Result<ExecutionResult, AppError> {
    let deadline = Instant::now() + plan.performance.max_time;
    let mut debug = BranchDebugInfo::default();
    let mut branches = Vec::new();

    let fts_result = if plan.branches.fts {
        Some(run_fts_branch(db, collection, query_text, deadline))
    } else {
        None
    };

    let vector_result = if plan.branches.vector {
        match (query_vector, vector_index) {
            (Some(vector), Some(index)) => Some(run_vector_branch(index, vector, plan.limit, deadline)),
            _ => None,
        }
    } else {
        None
    };

    let like_result = if plan.branches.like {
        Some(run_like_branch(db, collection, query_text, deadline))
    } else {
        None
    };

    if let Some(result) = fts_result {
        debug.fts_ran = true;
        let (hits, timed_out) = result?;
        debug.fts_timed_out = timed_out;
        branches.push((Branch::Fts, hits));
    }
    if let Some(result) = vector_result {
        debug.vector_ran = true;
        let (hits, timed_out) = result?;
        debug.vector_timed_out = timed_out;
        branches.push((Branch::Vector, hits));
    }
    if let Some(result) = like_result {
        match result {
            Ok(LikeOutcome::Ran(hits, timed_out)) => {
                debug.like_ran = true;
                debug.like_timed_out = timed_out;
                branches.push((Branch::Like, hits));
            }
            Ok(LikeOutcome::Skipped(reason)) => {
                debug.like_skipped = Some(reason);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ExecutionResult { branches, debug })
}

fn run_fts_branch(
    db: &Db,
    collection: &str,
    query_text: &str,
    deadline: Instant,
) -> Result<(Vec<BranchHit>, bool), AppError> {
    let fts_query = build_fts_query(query_text);
    if fts_query.is_empty() {
        return Ok((Vec::new(), false));
    }

    let rows = db
        .select(
            "SELECT d.rowid, bm25(documents_fts) FROM documents_fts
             JOIN documents d ON d.rowid = documents_fts.rowid
             WHERE documents_fts MATCH ?1 AND d.collection = ?2
             ORDER BY bm25(documents_fts) LIMIT 200",
            &[Value::from(fts_query), Value::from(collection.to_string())],
        )
        .map_err(AppError::from)?;

    let timed_out = Instant::now() > deadline;
    let hits = rows
        .into_iter()
        .filter_map(|row| {
            let rowid = match &row.values[0] {
                Value::Int(n) => *n,
                _ => return None,
            };
            // bm25() returns a negative quantity where more negative is
            // better; flip sign so higher is always better downstream.
            let raw = match &row.values[1] {
                Value::Float(f) => *f,
                Value::Int(n) => *n as f64,
                _ => 0.0,
            };
            Some(BranchHit {
                rowid,
                score: -raw as f32,
            })
        })
        .collect();

    Ok((hits, timed_out))
}

/// A term in a tokenized FTS5 query: a quoted phrase or bare word ready to
/// drop into the MATCH expression, or a boolean keyword FTS5 understands.
enum FtsToken {
    Operand(String),
    Op(&'static str),
}

/// Translates a free-text query into an FTS5 MATCH expression, preserving
/// token order. Quoted spans become phrase queries; bare words that
/// case-insensitively spell `and`/`or`/`not` pass through as FTS5's own
/// boolean operators rather than being treated as search terms (spec
/// §4.11). Operands with no explicit operator between them fall back to the
/// default OR join (spec §9 Open Questions: a deliberate choice left tunable
/// rather than hard-coded to AND). Reserved FTS5 characters in bare terms
/// are neutralized by quoting each term individually.
pub fn build_fts_query(query_text: &str) -> String {
    static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).expect("valid regex"));

    let mut tokens = Vec::new();
    let mut cursor = 0;
    for m in QUOTED.find_iter(query_text) {
        push_bare_words(&query_text[cursor..m.start()], &mut tokens);
        let inner = &m.as_str()[1..m.as_str().len() - 1];
        if !inner.trim().is_empty() {
            tokens.push(FtsToken::Operand(format!("\"{}\"", inner.replace('"', "\"\""))));
        }
        cursor = m.end();
    }
    push_bare_words(&query_text[cursor..], &mut tokens);

    let mut out = String::new();
    let mut prev_was_operand = false;
    for token in tokens {
        match token {
            FtsToken::Op(keyword) => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(keyword);
                prev_was_operand = false;
            }
            FtsToken::Operand(term) => {
                if prev_was_operand {
                    out.push_str(" OR ");
                } else if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&term);
                prev_was_operand = true;
            }
        }
    }
    out
}

/// Splits a non-quoted segment on whitespace, routing `and`/`or`/`not` to
/// [`FtsToken::Op`] and everything else to a quoted [`FtsToken::Operand`].
fn push_bare_words(segment: &str, tokens: &mut Vec<FtsToken>) {
    for word in segment.split_whitespace() {
        if word.eq_ignore_ascii_case("and") {
            tokens.push(FtsToken::Op("AND"));
        } else if word.eq_ignore_ascii_case("or") {
            tokens.push(FtsToken::Op("OR"));
        } else if word.eq_ignore_ascii_case("not") {
            tokens.push(FtsToken::Op("NOT"));
        } else {
            tokens.push(FtsToken::Operand(format!("\"{}\"", word.replace('"', "\"\""))));
        }
    }
}

fn run_vector_branch(
    index: &dyn VectorIndex,
    query_vector: &[f32],
    limit: usize,
    deadline: Instant,
) -> Result<(Vec<BranchHit>, bool), AppError> {
    let k = (limit * 4).max(50);
    let matches = index.search(query_vector, k)?;
    let timed_out = Instant::now() > deadline;
    let hits = matches
        .into_iter()
        .map(|m| BranchHit {
            rowid: m.rowid,
            score: m.score,
        })
        .collect();
    Ok((hits, timed_out))
}

enum LikeOutcome {
    Ran(Vec<BranchHit>, bool),
    Skipped(String),
}

fn run_like_branch(
    db: &Db,
    collection: &str,
    query_text: &str,
    deadline: Instant,
) -> Result<LikeOutcome, AppError> {
    let trimmed = query_text.trim();
    if trimmed.chars().count() < LIKE_MIN_QUERY_LEN {
        return Ok(LikeOutcome::Skipped(format!(
            "query shorter than minimum LIKE length of {LIKE_MIN_QUERY_LEN}"
        )));
    }
    if STOP_WORDS.contains(&trimmed.to_lowercase().as_str()) {
        return Ok(LikeOutcome::Skipped("query is a stop word".to_string()));
    }
    if Instant::now() > deadline {
        return Ok(LikeOutcome::Skipped("deadline already elapsed".to_string()));
    }

    // Case is preserved on both sides deliberately: the engine's lowercase
    // function mishandles non-ASCII text, so folding case here would corrupt
    // matching for scripts like Cyrillic (spec §4.11, scenario S6).
    let pattern = format!("%{}%", escape_like(trimmed));

    let rows = db
        .select(
            &format!(
                "SELECT rowid FROM documents WHERE collection = ?1
                 AND (content LIKE ?2 ESCAPE '\\' OR title LIKE ?2 ESCAPE '\\')
                 LIMIT {LIKE_MAX_ROWS}"
            ),
            &[Value::from(collection.to_string()), Value::from(pattern)],
        )
        .map_err(AppError::from)?;

    let timed_out = Instant::now() > deadline;
    let hits = rows
        .into_iter()
        .filter_map(|row| match &row.values[0] {
            Value::Int(n) => Some(BranchHit { rowid: *n, score: 1.0 }),
            _ => None,
        })
        .collect();

    Ok(LikeOutcome::Ran(hits, timed_out))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_fts_query_combines_bare_words_with_or() {
        let q = build_fts_query("rust ownership");
        assert_eq!(q, "\"rust\" OR \"ownership\"");
    }

    #[test]
    fn build_fts_query_keeps_quoted_spans_as_phrases() {
        let q = build_fts_query("\"exact phrase\" extra");
        assert!(q.contains("\"exact phrase\""));
        assert!(q.contains("\"extra\""));
    }

    #[test]
    fn build_fts_query_passes_through_explicit_and() {
        let q = build_fts_query("cats AND dogs");
        assert_eq!(q, "\"cats\" AND \"dogs\"");
    }

    #[test]
    fn build_fts_query_passes_through_lowercase_boolean_keywords() {
        let q = build_fts_query("cats and dogs not birds");
        assert_eq!(q, "\"cats\" AND \"dogs\" NOT \"birds\"");
    }

    #[test]
    fn build_fts_query_defaults_to_or_between_terms_with_no_explicit_operator() {
        let q = build_fts_query("rust ownership");
        assert_eq!(q, "\"rust\" OR \"ownership\"");
    }

    #[test]
    fn build_fts_query_mixes_explicit_operators_with_default_or() {
        let q = build_fts_query("cats AND dogs birds");
        assert_eq!(q, "\"cats\" AND \"dogs\" OR \"birds\"");
    }

    #[test]
    fn escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }

    #[test]
    fn like_branch_skips_queries_shorter_than_minimum() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let deadline = Instant::now() + std::time::Duration::from_secs(1);
        let outcome = run_like_branch(&db, "docs", "ab", deadline).unwrap();
        assert!(matches!(outcome, LikeOutcome::Skipped(_)));
    }

    #[test]
    fn like_branch_skips_stop_words() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let deadline = Instant::now() + std::time::Duration::from_secs(1);
        let outcome = run_like_branch(&db, "docs", "the", deadline).unwrap();
        assert!(matches!(outcome, LikeOutcome::Skipped(_)));
    }
}
