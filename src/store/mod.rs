//! Document Store (spec §4.4-§4.8) — collections, documents with manual FTS
//! synchronization, the priority embedding queue, and the three-tier cache
//! manager. Everything here sits on top of [`crate::db::Db`] and never talks
//! to sqlx directly; that boundary is what let the teacher's `Store` swap
//! its persistence layer independently of the higher-level chunk logic, and
//! the same split is kept here.

pub mod cache;
pub mod collections;
pub mod documents;
pub mod queue;

pub use cache::CacheManager;
pub use collections::{Collection, CollectionStore};
pub use documents::{Document, DocumentStore};
pub use queue::{QueueItem, QueueStats, QueueStore};

use std::path::Path;
use std::sync::Arc;

use crate::db::{Db, DbError};

/// Owns the database handle and hands out the narrower per-concern stores.
/// Cheap to clone (the handle is the only state, wrapped in `Arc`), so the
/// RPC worker can hold one `Store` and pass `&Store` (or a clone) into each
/// request handler without lifetime gymnastics.
#[derive(Clone)]
pub struct Store {
    db: Arc<Db>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let db = Db::open(path)?;
        db.init_schema()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let db = Db::open_in_memory()?;
        db.init_schema()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn collections(&self) -> CollectionStore<'_> {
        CollectionStore::new(&self.db)
    }

    pub fn documents(&self) -> DocumentStore<'_> {
        DocumentStore::new(&self.db)
    }

    pub fn queue(&self) -> QueueStore<'_> {
        QueueStore::new(&self.db)
    }

    pub fn export(&self, path: &Path) -> Result<Vec<u8>, DbError> {
        self.db.export(path)
    }

    pub fn close(&self) -> Result<(), DbError> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_initializes_schema() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store.db().schema_version().unwrap(),
            crate::db::CURRENT_SCHEMA_VERSION
        );
    }
}
