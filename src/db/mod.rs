//! SQL Host Wrapper (spec §4.2) — owns the single SQLite engine handle,
//! prepares/binds/steps/finalizes, and exposes the transaction and bulk-write
//! primitives every higher layer builds on.
//!
//! Mirrors the teacher's `Store`: a connection pool plus a dedicated Tokio
//! runtime so the rest of the crate can call synchronously while sqlx's
//! async driver does the real work underneath. Per spec §5, all mutation
//! against a given collection is serialized through this single handle.

pub mod schema_manager;

mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::runtime::Runtime;

use crate::errors::{AppError, ErrorKind};

pub use schema_manager::CURRENT_SCHEMA_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("database is locked, retry the operation")]
    Locked,
    #[error("disk is full")]
    DiskFull,
    #[error("permission denied accessing the database file")]
    Permission,
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("database file appears corrupted: {0}")]
    Corruption(String),
    #[error("import data has no valid SQLite header")]
    ImportHeader,
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        let kind = match &e {
            DbError::Locked => ErrorKind::DatabaseLocked,
            DbError::DiskFull => ErrorKind::DatabaseDiskFull,
            DbError::Permission => ErrorKind::DatabasePermission,
            DbError::Constraint(_) => ErrorKind::DatabaseConstraint,
            DbError::Corruption(_) | DbError::ImportHeader => ErrorKind::DatabaseCorruption,
            DbError::Sqlx(sqlx_err) => classify_sqlx_error(sqlx_err),
            DbError::Runtime(_) => ErrorKind::Persistence,
        };
        AppError::new(kind, e.to_string())
    }
}

fn classify_sqlx_error(e: &sqlx::Error) -> ErrorKind {
    if let sqlx::Error::Database(db_err) = e {
        let msg = db_err.message().to_lowercase();
        if msg.contains("locked") || msg.contains("busy") {
            return ErrorKind::DatabaseLocked;
        }
        if msg.contains("disk") || msg.contains("full") {
            return ErrorKind::DatabaseDiskFull;
        }
        if msg.contains("permission") || msg.contains("readonly") {
            return ErrorKind::DatabasePermission;
        }
        if msg.contains("constraint") {
            return ErrorKind::DatabaseConstraint;
        }
        if msg.contains("corrupt") || msg.contains("malformed") {
            return ErrorKind::DatabaseCorruption;
        }
    }
    ErrorKind::DatabaseConstraint
}

/// A single bound row value. The SQL Host Wrapper only deals in owned,
/// already-UTF-8-valid Rust types — sqlx binds `&str`/`String` by their byte
/// length automatically, which is the whole point: the historical bug this
/// guards against (binding a parameter buffer sized by character count
/// instead of UTF-8 byte count, silently truncating Cyrillic/CJK/emoji) is
/// structurally impossible here because there is no manual buffer sizing
/// anywhere in the bind path. See `tests/utf8_roundtrip.rs` for the
/// regression test this invariant exists to satisfy (spec §8 invariant 5).
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A decoded row, indexed by column position (mirrors the shape a caller
/// gets back from `select`).
#[derive(Debug, Clone, Default)]
pub struct Row_ {
    pub values: Vec<Value>,
}

pub struct Db {
    pub(crate) pool: SqlitePool,
    pub(crate) rt: Runtime,
    closed: AtomicBool,
}

impl Db {
    /// Open (creating if absent) the database file at `path`. Applies the
    /// same PRAGMA tuning the teacher uses: WAL journal mode for concurrent
    /// readers with a single writer, a busy timeout instead of immediate
    /// `SQLITE_BUSY`, and a larger page cache / mmap window for search
    /// workloads.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let rt = Runtime::new().map_err(|e| DbError::Runtime(e.to_string()))?;
        let path_str = path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{path_str}?mode=rwc");

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .idle_timeout(std::time::Duration::from_secs(300))
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        sqlx::query("PRAGMA foreign_keys = ON")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA journal_mode = WAL")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA busy_timeout = 5000")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA synchronous = NORMAL")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA cache_size = -16384")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA temp_store = MEMORY")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA mmap_size = 268435456")
                            .execute(&mut *conn)
                            .await?;
                        Ok(())
                    })
                })
                .connect(&db_url)
                .await
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let restrictive = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, restrictive.clone());
            let _ = std::fs::set_permissions(path.with_extension("db-wal"), restrictive.clone());
            let _ = std::fs::set_permissions(path.with_extension("db-shm"), restrictive);
        }

        tracing::info!(path = %path.display(), "database opened");

        Ok(Self {
            pool,
            rt,
            closed: AtomicBool::new(false),
        })
    }

    /// In-memory database, for tests and ephemeral callers.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let rt = Runtime::new().map_err(|e| DbError::Runtime(e.to_string()))?;
        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
        })?;
        Ok(Self {
            pool,
            rt,
            closed: AtomicBool::new(false),
        })
    }

    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.rt.block_on(async {
            let mut query = sqlx::query(sql);
            for p in params {
                query = bind(query, p);
            }
            let result = query.execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
    }

    pub fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Row_>, DbError> {
        self.rt.block_on(async {
            let mut query = sqlx::query(sql);
            for p in params {
                query = bind(query, p);
            }
            let rows = query.fetch_all(&self.pool).await?;
            Ok(rows.iter().map(decode_row).collect())
        })
    }

    /// A single multi-row transaction insert, matching the teacher's
    /// `upsert_chunks_batch` idiom: one `BEGIN`, N inserts, one `COMMIT`.
    pub fn bulk_insert(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> Result<usize, DbError> {
        crate::validation::validate_sql_identifier(table)
            .map_err(|e| DbError::Constraint(e.message))?;
        for c in columns {
            crate::validation::validate_sql_identifier(c)
                .map_err(|e| DbError::Constraint(e.message))?;
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            for row in rows {
                let mut query = sqlx::query(&sql);
                for value in row {
                    query = bind(query, value);
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await?;
            Ok(rows.len())
        })
    }

    /// Serialize the whole database to bytes (spec §6 export/import). SQLite
    /// doesn't expose an in-memory serialize call through sqlx, so this
    /// reads the on-disk file after a checkpoint — equivalent bytes, same
    /// contract the facade promises callers.
    pub fn export(&self, path: &Path) -> Result<Vec<u8>, DbError> {
        self.rt.block_on(async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await?;
            Ok(())
        })?;
        std::fs::read(path).map_err(|e| DbError::Runtime(e.to_string()))
    }

    /// Replace (or merge into, when `overwrite` is false and the target is
    /// empty) the database file with `bytes`. A valid SQLite file begins
    /// with the 16-byte "SQLite format 3\0" magic header.
    pub fn import(path: &Path, bytes: &[u8], overwrite: bool) -> Result<(), DbError> {
        const MAGIC: &[u8] = b"SQLite format 3\0";
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            return Err(DbError::ImportHeader);
        }
        if path.exists() && !overwrite {
            return Err(DbError::Constraint(
                "target database exists; pass overwrite=true to replace it".into(),
            ));
        }
        std::fs::write(path, bytes).map_err(|e| DbError::Runtime(e.to_string()))
    }

    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.rt.block_on(async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = self.rt.block_on(async {
                    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                        .execute(&self.pool)
                        .await
                });
            }));
        }
    }
}

fn bind<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Blob(b) => query.bind(b),
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Row_ {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let value = if let Ok(v) = row.try_get::<i64, _>(i) {
            Value::Int(v)
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            Value::Float(v)
        } else if let Ok(v) = row.try_get::<Vec<u8>, _>(i) {
            Value::Blob(v)
        } else if let Ok(v) = row.try_get::<String, _>(i) {
            Value::Text(v)
        } else {
            Value::Null
        };
        values.push(value);
    }
    Row_ { values }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_and_select_round_trip() {
        let db = Db::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        db.exec(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            &[Value::Int(1), Value::from("hello")],
        )
        .unwrap();
        let rows = db.select("SELECT id, name FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0].values[1] {
            Value::Text(s) => assert_eq!(s, "hello"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn bulk_insert_rejects_unsafe_identifiers() {
        let db = Db::open_in_memory().unwrap();
        let err = db
            .bulk_insert("t; DROP TABLE t --", &["id"], &[vec![Value::Int(1)]])
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn bulk_insert_writes_all_rows_in_one_transaction() {
        let db = Db::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let rows = vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2), Value::from("b")],
        ];
        let n = db.bulk_insert("t", &["id", "name"], &rows).unwrap();
        assert_eq!(n, 2);
        let selected = db.select("SELECT id FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn import_rejects_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.db");
        let err = Db::import(&path, b"not a sqlite file", true).unwrap_err();
        assert!(matches!(err, DbError::ImportHeader));
    }

    #[test]
    fn utf8_multibyte_values_round_trip_unchanged() {
        let db = Db::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let sample = "Пушкин 文学 😀";
        db.exec(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            &[Value::Int(1), Value::from(sample)],
        )
        .unwrap();
        let rows = db.select("SELECT name FROM t WHERE id = 1", &[]).unwrap();
        match &rows[0].values[0] {
            Value::Text(s) => assert_eq!(s, sample),
            other => panic!("expected text, got {other:?}"),
        }
    }
}
