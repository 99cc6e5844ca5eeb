//! Shared test fixtures.

use hybridstore::config::CollectionConfig;
use hybridstore::store::documents::NewDocument;
use hybridstore::Api;

/// An in-memory engine with one `docs` collection. `auto_generate: false` so
/// inserts enqueue instead of reaching for a real embedding provider (no
/// ONNX model download, no network) — these tests exercise FTS/LIKE/queue/
/// schema behavior, not embedding generation.
pub fn test_api() -> Api {
    let api = Api::open_in_memory().unwrap();
    api.create_collection(CollectionConfig {
        name: "docs".into(),
        dimensions: 4,
        auto_generate: false,
        ..Default::default()
    })
    .unwrap();
    api
}

pub fn insert(api: &Api, title: &str, content: &str) -> i64 {
    api.insert_document_with_embedding(NewDocument {
        collection: "docs",
        title: Some(title),
        content: Some(content),
        metadata: serde_json::Value::Null,
    })
    .unwrap()
    .rowid
}
