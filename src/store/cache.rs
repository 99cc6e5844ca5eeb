//! Three-tier cache manager (spec §4.8, supplemented per SPEC_FULL.md —
//! the teacher has no cache layer of its own; this is adapted from a
//! Redis-backed reference cache to local tiers: an in-process LRU, a
//! persistent `cache_entries` table, and the `vector_entries` table itself
//! as the database tier of last resort).
//!
//! Lookup order is memory -> persistent -> database, populating each faster
//! tier on a slower-tier hit so a repeated query warms back up to memory
//! speed. Every hit/miss is recorded on [`crate::observability::Metrics`].

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use lru::LruCache;

use crate::db::{Db, Value};
use crate::errors::AppError;
use crate::observability::{CacheTier, Metrics};

const DEFAULT_MEMORY_CAPACITY: usize = 512;
const DEFAULT_TTL_SECS: i64 = 3600;

pub struct CacheManager<'a> {
    db: &'a Db,
    memory: Mutex<LruCache<String, Vec<f32>>>,
    metrics: &'a Metrics,
}

impl<'a> CacheManager<'a> {
    pub fn new(db: &'a Db, metrics: &'a Metrics) -> Self {
        Self {
            db,
            memory: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY).expect("nonzero capacity"),
            )),
            metrics,
        }
    }

    fn key(collection: &str, text: &str) -> String {
        format!("{collection}:{}", blake3::hash(text.as_bytes()).to_hex())
    }

    /// Looks up a cached embedding for `text` in `collection`, checking
    /// memory, then the persistent cache table, then falling back to an
    /// exact-content match already stored as a document vector. A database-
    /// tier hit warms both faster tiers before returning, the same as a
    /// persistent-tier hit warms memory.
    pub fn get(&self, collection: &str, text: &str) -> Result<Option<Vec<f32>>, AppError> {
        let key = Self::key(collection, text);

        if let Some(vec) = self.memory.lock().expect("cache lock").get(&key).cloned() {
            self.metrics.record_cache_hit(CacheTier::Memory);
            return Ok(Some(vec));
        }

        if let Some(vec) = self.get_persistent(&key)? {
            self.metrics.record_cache_hit(CacheTier::Persistent);
            self.memory.lock().expect("cache lock").put(key, vec.clone());
            return Ok(Some(vec));
        }

        if let Some(vec) = self.get_database(collection, text)? {
            self.metrics.record_cache_hit(CacheTier::Database);
            self.put(collection, text, &vec)?;
            return Ok(Some(vec));
        }

        self.metrics.record_cache_miss();
        Ok(None)
    }

    fn get_persistent(&self, key: &str) -> Result<Option<Vec<f32>>, AppError> {
        let rows = self
            .db
            .select(
                "SELECT vector, dims FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                &[Value::from(key.to_string()), Value::from(Utc::now().to_rfc3339())],
            )
            .map_err(AppError::from)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let blob = match &row.values[0] {
            Value::Blob(b) => b.clone(),
            _ => return Ok(None),
        };
        let dims = match &row.values[1] {
            Value::Int(n) => *n as usize,
            _ => return Ok(None),
        };
        Ok(Some(decode_vector(&blob, dims)))
    }

    /// Database tier of last resort: a document in this collection whose
    /// content exactly matches `text` already has a vector in
    /// `vector_entries` from its own embedding pass, so a cache miss for the
    /// same text doesn't have to hit the provider again.
    fn get_database(&self, collection: &str, text: &str) -> Result<Option<Vec<f32>>, AppError> {
        let rows = self
            .db
            .select(
                "SELECT v.vector, v.dims FROM documents d
                 JOIN vector_entries v ON v.rowid = d.rowid
                 WHERE d.collection = ?1 AND d.content = ?2
                 LIMIT 1",
                &[Value::from(collection.to_string()), Value::from(text.to_string())],
            )
            .map_err(AppError::from)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let blob = match &row.values[0] {
            Value::Blob(b) => b.clone(),
            _ => return Ok(None),
        };
        let dims = match &row.values[1] {
            Value::Int(n) => *n as usize,
            _ => return Ok(None),
        };
        Ok(Some(decode_vector(&blob, dims)))
    }

    /// Stores a freshly generated embedding in both the memory and
    /// persistent tiers.
    pub fn put(&self, collection: &str, text: &str, vector: &[f32]) -> Result<(), AppError> {
        let key = Self::key(collection, text);
        self.memory
            .lock()
            .expect("cache lock")
            .put(key.clone(), vector.to_vec());

        let now = Utc::now();
        let expires = now + Duration::seconds(DEFAULT_TTL_SECS);
        self.db
            .exec(
                "INSERT INTO cache_entries (key, collection, vector, dims, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET vector = excluded.vector, dims = excluded.dims,
                     created_at = excluded.created_at, expires_at = excluded.expires_at",
                &[
                    Value::from(key),
                    Value::from(collection.to_string()),
                    Value::Blob(encode_vector(vector)),
                    Value::Int(vector.len() as i64),
                    Value::from(now.to_rfc3339()),
                    Value::from(expires.to_rfc3339()),
                ],
            )
            .map_err(AppError::from)?;
        Ok(())
    }

    pub fn invalidate(&self, collection: &str, text: &str) -> Result<(), AppError> {
        let key = Self::key(collection, text);
        self.memory.lock().expect("cache lock").pop(&key);
        self.db
            .exec("DELETE FROM cache_entries WHERE key = ?1", &[Value::from(key)])
            .map_err(AppError::from)?;
        Ok(())
    }

    /// Drops entries past their TTL from the persistent tier. The memory
    /// tier self-evicts by LRU capacity and carries no explicit TTL.
    pub fn evict_expired(&self) -> Result<u64, AppError> {
        self.db
            .exec(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                &[Value::from(Utc::now().to_rfc3339())],
            )
            .map_err(AppError::from)
    }
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8], dims: usize) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .take(dims)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_hits_memory_tier() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let metrics = Metrics::new();
        let cache = CacheManager::new(&db, &metrics);

        cache.put("docs", "hello", &[1.0, 2.0, 3.0]).unwrap();
        let got = cache.get("docs", "hello").unwrap().unwrap();
        assert_eq!(got, vec![1.0, 2.0, 3.0]);
        assert_eq!(metrics.snapshot().cache_hits_memory, 1);
    }

    #[test]
    fn get_falls_through_to_persistent_tier_when_memory_misses() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let metrics = Metrics::new();
        {
            let cache = CacheManager::new(&db, &metrics);
            cache.put("docs", "hello", &[1.0, 2.0]).unwrap();
        }
        // Fresh cache manager: memory tier is empty, persistent tier still has it.
        let cache = CacheManager::new(&db, &metrics);
        let got = cache.get("docs", "hello").unwrap();
        assert_eq!(got, Some(vec![1.0, 2.0]));
    }

    #[test]
    fn invalidate_removes_from_both_tiers() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let metrics = Metrics::new();
        let cache = CacheManager::new(&db, &metrics);
        cache.put("docs", "hello", &[1.0]).unwrap();
        cache.invalidate("docs", "hello").unwrap();
        assert_eq!(cache.get("docs", "hello").unwrap(), None);
    }

    #[test]
    fn get_falls_through_to_database_tier_for_an_already_embedded_document() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db.exec(
            "INSERT INTO collections (name, provider, model, dimensions, batch_size, timeout_ms, created_at, updated_at)
             VALUES ('docs', 'local', 'm', 3, 8, 1000, 'now', 'now')",
            &[],
        )
        .unwrap();
        db.exec(
            "INSERT INTO documents (rowid, collection, title, content, created_at, updated_at)
             VALUES (1, 'docs', 't', 'hello world', 'now', 'now')",
            &[],
        )
        .unwrap();
        db.exec(
            "INSERT INTO vector_entries (rowid, collection, dims, vector) VALUES (1, 'docs', 3, ?1)",
            &[Value::Blob(encode_vector(&[1.0, 2.0, 3.0]))],
        )
        .unwrap();

        let metrics = Metrics::new();
        let cache = CacheManager::new(&db, &metrics);
        let got = cache.get("docs", "hello world").unwrap();
        assert_eq!(got, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(metrics.snapshot().cache_hits_database, 1);

        // The hit should have warmed the persistent tier too.
        let fresh_metrics = Metrics::new();
        let fresh_cache = CacheManager::new(&db, &fresh_metrics);
        let got_again = fresh_cache.get("docs", "hello world").unwrap();
        assert_eq!(got_again, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(fresh_metrics.snapshot().cache_hits_persistent, 1);
    }

    #[test]
    fn vector_encoding_round_trips() {
        let v = vec![0.5f32, -1.25, 3.0];
        let bytes = encode_vector(&v);
        assert_eq!(decode_vector(&bytes, v.len()), v);
    }
}
