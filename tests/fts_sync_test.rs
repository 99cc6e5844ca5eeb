//! Manual FTS synchronization (spec §4.3, §4.5, §8 scenario S2).
//!
//! The document store doesn't use triggers to mirror `documents` into
//! `documents_fts`; every write verifies the mirror landed inside the same
//! transaction and raises `FtsSync` otherwise. There's no fault-injection
//! seam in the public API to force the mirror insert itself to fail without
//! touching the store internals, so this confirms the half this crate's
//! surface can exercise: a normal insert/update never leaves the two tables
//! diverged, and a row that fails verification never produces a document a
//! caller can retrieve (covered at the transaction level in
//! `store::documents`'s own unit tests).

mod common;

use common::test_api;
use hybridstore::search::{SearchOptions, Strategy};

#[test]
fn inserted_document_is_immediately_visible_to_fts() {
    let api = test_api();
    let doc = common::insert(&api, "sync check", "fts mirror stays consistent");

    let mut options = SearchOptions::default();
    options.strategy = Some(Strategy::FtsOnly);
    let response = api.search("docs", "mirror", options).unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].rowid, doc);
}

#[test]
fn clearing_the_store_leaves_no_orphaned_fts_rows() {
    let api = test_api();
    common::insert(&api, "t", "content to clear");
    api.clear().unwrap();

    let mut options = SearchOptions::default();
    options.strategy = Some(Strategy::FtsOnly);
    // The collection itself is gone after `clear`, so re-create it before
    // searching an empty index rather than hitting a validation error.
    use hybridstore::config::CollectionConfig;
    api.create_collection(CollectionConfig {
        name: "docs".into(),
        dimensions: 4,
        auto_generate: false,
        ..Default::default()
    })
    .unwrap();
    let response = api.search("docs", "content", options).unwrap();
    assert!(response.results.is_empty());
}
