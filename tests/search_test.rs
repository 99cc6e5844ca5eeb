//! End-to-end search scenarios (spec §8).

mod common;

use common::{insert, test_api};
use hybridstore::search::{SearchOptions, Strategy};

/// S1: a multibyte title/content round-trips through FTS and LIKE without
/// panicking on a byte-length miscalculation.
#[test]
fn utf8_document_is_found_by_like_search() {
    let api = test_api();
    insert(&api, "Пушкин", "Русская литература");

    let mut options = SearchOptions::default();
    options.strategy = Some(Strategy::FtsOnly);
    options.enable_like_search = true;
    let response = api.search("docs", "Пушкин", options).unwrap();

    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].title.as_deref(), Some("Пушкин"));
}

/// S6: LIKE search is a case-sensitive substring match. Both variants of a
/// shared prefix are found at matching case; a differently-cased query may
/// return fewer matches, which is documented, expected behavior rather than
/// a bug.
#[test]
fn like_search_substring_matches_are_case_sensitive() {
    let api = test_api();
    insert(&api, "doc1", "Советский Союз");
    insert(&api, "doc2", "Советское время");

    let mut options = SearchOptions::default();
    options.strategy = Some(Strategy::FtsOnly);
    options.enable_like_search = true;

    let exact_case = api.search("docs", "Совет", options.clone()).unwrap();
    assert_eq!(exact_case.results.len(), 2);

    let lowercase = api.search("docs", "совет", options).unwrap();
    assert!(lowercase.results.len() <= exact_case.results.len());
}

/// S3 end-to-end: with only the FTS branch populated (no vector index in
/// this collection), fusion degrades to the FTS branch's own ranking. The
/// hand-computed RRF ordering itself is covered in `search::fusion`'s unit
/// tests; this confirms the facade wires bm25 rank straight through to a
/// descending, densely-numbered result rank.
#[test]
fn fts_only_results_are_ranked_and_paginated() {
    let api = test_api();
    insert(&api, "a", "rust ownership borrow checker");
    insert(&api, "b", "rust rust rust ownership ownership");

    let mut options = SearchOptions::default();
    options.strategy = Some(Strategy::FtsOnly);
    let response = api.search("docs", "rust ownership", options).unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].rank, 1);
    assert_eq!(response.results[1].rank, 2);
    assert!(response.results[0].score >= response.results[1].score);
}
