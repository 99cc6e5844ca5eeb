//! Schema Manager (spec §4.3) — tracks the schema version in `metadata`,
//! applies the base schema on first open, detects a partial schema (some
//! tables present, some missing — the crash-during-init case) and drops then
//! recreates every expected table from scratch rather than trying to patch
//! around it, and dispatches to [`super::migrations`] when an existing
//! database is older than current.
//!
//! Grounded in the teacher's `check_schema_version`/`check_model_version`
//! pair in `store/mod.rs`: a single metadata row holds the version, compared
//! against a compiled-in constant on every open.

use super::{Db, DbError, Value};

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const EXPECTED_TABLES: &[&str] = &[
    "metadata",
    "collections",
    "documents",
    "vector_entries",
    "embedding_queue",
    "cache_entries",
];

/// Every table `create_schema` may need to tear down before reapplying
/// `SCHEMA_SQL`, children before parents so a stray foreign key never blocks
/// the drop. `documents_fts` isn't in [`EXPECTED_TABLES`] (it's recreated
/// alongside `documents`, not tracked independently) but still needs
/// dropping explicitly — its `CREATE VIRTUAL TABLE IF NOT EXISTS` would
/// otherwise leave a structurally stale mirror in place.
const DROP_ORDER: &[&str] = &[
    "documents_fts",
    "vector_entries",
    "embedding_queue",
    "documents",
    "collections",
    "cache_entries",
    "metadata",
];

impl Db {
    /// Idempotent: creates the schema if the database is empty, recreates it
    /// if it is partially present, migrates it if it is present but older
    /// than [`CURRENT_SCHEMA_VERSION`], and does nothing otherwise.
    pub fn init_schema(&self) -> Result<(), DbError> {
        let present = self.present_tables()?;

        if present.is_empty() {
            return self.create_schema();
        }

        let missing: Vec<&&str> = EXPECTED_TABLES
            .iter()
            .filter(|t| !present.contains(&t.to_string()))
            .collect();
        if !missing.is_empty() && present.len() < EXPECTED_TABLES.len() {
            tracing::warn!(
                missing = ?missing,
                "partial schema detected, dropping and recreating from scratch"
            );
            return self.create_schema();
        }

        let version = self.schema_version()?;
        if version < CURRENT_SCHEMA_VERSION {
            super::migrations::migrate(self, version, CURRENT_SCHEMA_VERSION)?;
        }
        Ok(())
    }

    fn present_tables(&self) -> Result<Vec<String>, DbError> {
        let rows = self.select(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            &[],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|r| match r.values.first() {
                Some(Value::Text(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    /// Drops every table in [`DROP_ORDER`] (a no-op per table on a database
    /// that never had it) then reapplies `SCHEMA_SQL` from a clean slate.
    /// The drop pass is what makes this safe to call on a partially-present,
    /// structurally stale schema: `CREATE TABLE IF NOT EXISTS` alone would
    /// leave a pre-existing but incompatible table untouched.
    fn create_schema(&self) -> Result<(), DbError> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            for table in DROP_ORDER {
                sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                    .execute(&mut *tx)
                    .await?;
            }
            for statement in split_statements(SCHEMA_SQL) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query(
                "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(CURRENT_SCHEMA_VERSION.to_string())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
    }

    pub fn schema_version(&self) -> Result<i64, DbError> {
        let rows = self.select(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            &[],
        )?;
        match rows.into_iter().next().and_then(|r| r.values.into_iter().next()) {
            Some(Value::Text(v)) => v.parse().map_err(|_| {
                DbError::Corruption("schema_version metadata value is not an integer".into())
            }),
            _ => Ok(0),
        }
    }

    pub(crate) fn set_schema_version(&self, version: i64) -> Result<(), DbError> {
        self.exec(
            "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            &[Value::Text(version.to_string())],
        )?;
        Ok(())
    }
}

/// Splits the schema file on statement-terminating semicolons. Good enough
/// here because `schema.sql` never embeds a `;` inside a string literal or
/// trigger body (this crate has neither).
fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_on_empty_database_creates_all_tables() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let tables = db.present_tables().unwrap();
        for t in EXPECTED_TABLES {
            assert!(tables.contains(&t.to_string()), "missing table {t}");
        }
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn init_schema_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db.init_schema().unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn partial_schema_is_recreated() {
        let db = Db::open_in_memory().unwrap();
        // A `documents` table missing every real column but `rowid`, plus a
        // fresh `metadata` table — the crash-during-init case where some
        // tables exist but are structurally stale.
        db.exec("CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)", &[])
            .unwrap();
        db.exec("CREATE TABLE documents (rowid INTEGER PRIMARY KEY)", &[])
            .unwrap();
        db.init_schema().unwrap();
        let tables = db.present_tables().unwrap();
        assert!(tables.contains(&"documents".to_string()));

        // Prove the recreated table actually has the real columns, not just
        // the same name as before.
        db.exec(
            "INSERT INTO collections (name, provider, model, dimensions, batch_size, timeout_ms, created_at, updated_at)
             VALUES ('docs', 'local', 'm', 4, 8, 1000, 'now', 'now')",
            &[],
        )
        .unwrap();
        db.exec(
            "INSERT INTO documents (rowid, collection, title, content, created_at, updated_at)
             VALUES (1, 'docs', 'hello', 'world', 'now', 'now')",
            &[],
        )
        .unwrap();
        let rows = db
            .select("SELECT title, content FROM documents WHERE rowid = 1", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0].values[0] {
            Value::Text(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected {other:?}"),
        }
        match &rows[0].values[1] {
            Value::Text(s) => assert_eq!(s, "world"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
