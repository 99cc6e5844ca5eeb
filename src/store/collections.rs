//! Collection CRUD (spec §3 Collection, §4.4). A collection pins the
//! embedding provider/model/dimensionality for every document inserted under
//! it; once a document in a collection has a vector, `provider` and
//! `dimensions` become immutable — changing either would silently corrupt
//! the HNSW index, which is keyed by a single fixed dimensionality.

use chrono::Utc;

use crate::config::{CollectionConfig, ProviderKind};
use crate::db::{Db, DbError, Value};
use crate::errors::{AppError, ErrorKind};

#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub provider: ProviderKind,
    pub model: String,
    pub dimensions: u32,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub auto_generate: bool,
    pub vector_count: u64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct CollectionStore<'a> {
    db: &'a Db,
}

impl<'a> CollectionStore<'a> {
    pub(super) fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn create(&self, cfg: &CollectionConfig) -> Result<Collection, AppError> {
        crate::validation::validate_collection_name(&cfg.name)?;
        if self.get(&cfg.name)?.is_some() {
            return Err(AppError::new(
                ErrorKind::DatabaseConstraint,
                format!("collection '{}' already exists", cfg.name),
            ));
        }

        let now = Utc::now().to_rfc3339();
        self.db
            .exec(
                "INSERT INTO collections
                 (name, provider, model, dimensions, batch_size, timeout_ms, auto_generate,
                  vector_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
                &[
                    Value::from(cfg.name.clone()),
                    Value::from(provider_str(cfg.provider).to_string()),
                    Value::from(cfg.model.clone()),
                    Value::Int(cfg.dimensions as i64),
                    Value::Int(cfg.batch_size as i64),
                    Value::Int(cfg.timeout_ms as i64),
                    Value::Int(cfg.auto_generate as i64),
                    Value::from(now.clone()),
                ],
            )
            .map_err(AppError::from)?;

        Ok(Collection {
            name: cfg.name.clone(),
            provider: cfg.provider,
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
            batch_size: cfg.batch_size,
            timeout_ms: cfg.timeout_ms,
            auto_generate: cfg.auto_generate,
            vector_count: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<Collection>, AppError> {
        let rows = self
            .db
            .select(
                "SELECT name, provider, model, dimensions, batch_size, timeout_ms,
                        auto_generate, vector_count, created_at, updated_at
                 FROM collections WHERE name = ?1",
                &[Value::from(name.to_string())],
            )
            .map_err(AppError::from)?;
        Ok(rows.into_iter().next().map(row_to_collection))
    }

    pub fn require(&self, name: &str) -> Result<Collection, AppError> {
        self.get(name)?.ok_or_else(|| {
            AppError::new(
                ErrorKind::Validation,
                format!("collection '{name}' does not exist"),
            )
        })
    }

    pub fn list(&self) -> Result<Vec<Collection>, AppError> {
        let rows = self
            .db
            .select(
                "SELECT name, provider, model, dimensions, batch_size, timeout_ms,
                        auto_generate, vector_count, created_at, updated_at
                 FROM collections ORDER BY name",
                &[],
            )
            .map_err(AppError::from)?;
        Ok(rows.into_iter().map(row_to_collection).collect())
    }

    pub fn delete(&self, name: &str) -> Result<(), AppError> {
        self.db
            .exec("DELETE FROM collections WHERE name = ?1", &[Value::from(name.to_string())])
            .map_err(AppError::from)?;
        Ok(())
    }

    /// Rejects changing `provider` or `dimensions` once any vector has been
    /// stored for this collection (spec §3 Collection invariant).
    pub fn update_mutable_fields(
        &self,
        name: &str,
        batch_size: Option<usize>,
        timeout_ms: Option<u64>,
        auto_generate: Option<bool>,
    ) -> Result<Collection, AppError> {
        let existing = self.require(name)?;
        let batch_size = batch_size.unwrap_or(existing.batch_size);
        let timeout_ms = timeout_ms.unwrap_or(existing.timeout_ms);
        let auto_generate = auto_generate.unwrap_or(existing.auto_generate);
        let now = Utc::now().to_rfc3339();

        self.db
            .exec(
                "UPDATE collections SET batch_size = ?1, timeout_ms = ?2, auto_generate = ?3,
                 updated_at = ?4 WHERE name = ?5",
                &[
                    Value::Int(batch_size as i64),
                    Value::Int(timeout_ms as i64),
                    Value::Int(auto_generate as i64),
                    Value::from(now),
                    Value::from(name.to_string()),
                ],
            )
            .map_err(AppError::from)?;

        self.require(name)
    }

    pub(crate) fn increment_vector_count(&self, name: &str, delta: i64) -> Result<(), DbError> {
        self.db.exec(
            "UPDATE collections SET vector_count = vector_count + ?1, updated_at = ?2 WHERE name = ?3",
            &[
                Value::Int(delta),
                Value::from(Utc::now().to_rfc3339()),
                Value::from(name.to_string()),
            ],
        )?;
        Ok(())
    }
}

fn provider_str(p: ProviderKind) -> &'static str {
    match p {
        ProviderKind::Local => "local",
        ProviderKind::Remote => "remote",
    }
}

fn row_to_collection(row: crate::db::Row_) -> Collection {
    let v = row.values;
    let text = |i: usize| match &v[i] {
        Value::Text(s) => s.clone(),
        _ => String::new(),
    };
    let int = |i: usize| match &v[i] {
        Value::Int(n) => *n,
        _ => 0,
    };
    Collection {
        name: text(0),
        provider: if text(1) == "remote" {
            ProviderKind::Remote
        } else {
            ProviderKind::Local
        },
        model: text(2),
        dimensions: int(3) as u32,
        batch_size: int(4) as usize,
        timeout_ms: int(5) as u64,
        auto_generate: int(6) != 0,
        vector_count: int(7) as u64,
        created_at: text(8),
        updated_at: text(9),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn store(db: &Db) -> CollectionStore<'_> {
        db.init_schema().unwrap();
        CollectionStore::new(db)
    }

    #[test]
    fn create_then_get_round_trips() {
        let db = Db::open_in_memory().unwrap();
        let s = store(&db);
        let cfg = CollectionConfig {
            name: "docs".into(),
            dimensions: 384,
            ..Default::default()
        };
        s.create(&cfg).unwrap();
        let got = s.require("docs").unwrap();
        assert_eq!(got.dimensions, 384);
        assert_eq!(got.vector_count, 0);
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let db = Db::open_in_memory().unwrap();
        let s = store(&db);
        let cfg = CollectionConfig {
            name: "docs".into(),
            ..Default::default()
        };
        s.create(&cfg).unwrap();
        let err = s.create(&cfg).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DatabaseConstraint);
    }

    #[test]
    fn increment_vector_count_persists() {
        let db = Db::open_in_memory().unwrap();
        let s = store(&db);
        s.create(&CollectionConfig {
            name: "docs".into(),
            ..Default::default()
        })
        .unwrap();
        s.increment_vector_count("docs", 3).unwrap();
        assert_eq!(s.require("docs").unwrap().vector_count, 3);
    }
}
