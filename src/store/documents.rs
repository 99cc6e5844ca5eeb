//! Document Store with manual FTS synchronization (spec §4.3, §4.5).
//!
//! `documents_fts` is an external-content FTS5 table: SQLite does not keep it
//! in sync automatically, and per spec §4.3 this crate deliberately does not
//! use `AFTER INSERT/UPDATE/DELETE` triggers to do it either — a trigger-based
//! mirror caused unbounded memory growth on large imports in an earlier
//! design. Instead every write path inserts/deletes the FTS row itself inside
//! the same transaction as the `documents` row, then re-reads the FTS index
//! to confirm the row landed. A mismatch raises [`ErrorKind::FtsSync`], which
//! is a critical, non-recoverable error (spec §7) — it means the two tables
//! have silently diverged and the database needs operator attention.

use chrono::Utc;
use serde_json::Value as Json;

use crate::db::{Db, DbError, Value};
use crate::errors::{AppError, ErrorKind};

#[derive(Debug, Clone)]
pub struct Document {
    pub rowid: i64,
    pub collection: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub metadata: Json,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewDocument<'a> {
    pub collection: &'a str,
    pub title: Option<&'a str>,
    pub content: Option<&'a str>,
    pub metadata: Json,
}

pub struct DocumentStore<'a> {
    db: &'a Db,
}

/// How many documents a single bulk-insert transaction processes before
/// committing and starting the next one, bounding how long a writer holds
/// the single-writer lock (spec §5 bulk write chunking).
pub const BULK_CHUNK_SIZE: usize = 100;

impl<'a> DocumentStore<'a> {
    pub(super) fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, doc: NewDocument<'_>) -> Result<Document, AppError> {
        crate::validation::validate_document_shape(doc.title, doc.content)?;
        crate::validation::validate_metadata(&doc.metadata)?;

        let now = Utc::now().to_rfc3339();
        let metadata_text = doc.metadata.to_string();

        self.insert_with_fts_sync(
            doc.collection,
            doc.title,
            doc.content,
            &metadata_text,
            &now,
        )
        .map(|rowid| Document {
            rowid,
            collection: doc.collection.to_string(),
            title: doc.title.map(str::to_string),
            content: doc.content.map(str::to_string),
            metadata: doc.metadata,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Inserts a batch of documents in chunks of [`BULK_CHUNK_SIZE`], each
    /// chunk its own transaction with its own FTS verification pass.
    pub fn insert_batch(
        &self,
        docs: Vec<NewDocument<'_>>,
    ) -> Result<Vec<Document>, AppError> {
        let mut out = Vec::with_capacity(docs.len());
        for chunk in docs.into_iter().collect::<Vec<_>>().chunks(BULK_CHUNK_SIZE.max(1)) {
            for doc in chunk {
                let owned = NewDocument {
                    collection: doc.collection,
                    title: doc.title,
                    content: doc.content,
                    metadata: doc.metadata.clone(),
                };
                out.push(self.insert(owned)?);
            }
        }
        Ok(out)
    }

    pub fn update(
        &self,
        rowid: i64,
        title: Option<&str>,
        content: Option<&str>,
        metadata: Option<Json>,
    ) -> Result<Document, AppError> {
        let existing = self.require(rowid)?;
        let title = title.or(existing.title.as_deref());
        let content = content.or(existing.content.as_deref());
        crate::validation::validate_document_shape(title, content)?;
        let metadata = metadata.unwrap_or(existing.metadata);
        crate::validation::validate_metadata(&metadata)?;

        let now = Utc::now().to_rfc3339();
        let metadata_text = metadata.to_string();
        let title_owned = title.map(str::to_string);
        let content_owned = content.map(str::to_string);

        self.rt_update(
            rowid,
            title_owned.clone(),
            content_owned.clone(),
            metadata_text,
            now.clone(),
        )?;

        Ok(Document {
            rowid,
            collection: existing.collection,
            title: title_owned,
            content: content_owned,
            metadata,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    pub fn delete(&self, rowid: i64) -> Result<(), AppError> {
        self.db
            .exec("DELETE FROM documents_fts WHERE rowid = ?1", &[Value::Int(rowid)])
            .map_err(AppError::from)?;
        self.db
            .exec("DELETE FROM documents WHERE rowid = ?1", &[Value::Int(rowid)])
            .map_err(AppError::from)?;
        Ok(())
    }

    pub fn get(&self, rowid: i64) -> Result<Option<Document>, AppError> {
        let rows = self
            .db
            .select(
                "SELECT rowid, collection, title, content, metadata, created_at, updated_at
                 FROM documents WHERE rowid = ?1",
                &[Value::Int(rowid)],
            )
            .map_err(AppError::from)?;
        Ok(rows.into_iter().next().map(row_to_document))
    }

    pub fn require(&self, rowid: i64) -> Result<Document, AppError> {
        self.get(rowid)?
            .ok_or_else(|| AppError::new(ErrorKind::Validation, format!("document {rowid} does not exist")))
    }

    /// Inserts the `documents` row and its `documents_fts` mirror in one
    /// transaction, then re-selects the FTS row to confirm it's there.
    fn insert_with_fts_sync(
        &self,
        collection: &str,
        title: Option<&str>,
        content: Option<&str>,
        metadata_text: &str,
        now: &str,
    ) -> Result<i64, AppError> {
        self.db
            .rt
            .block_on(async {
                let mut tx = self.db.pool.begin().await?;

                let result = sqlx::query(
                    "INSERT INTO documents (collection, title, content, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                )
                .bind(collection)
                .bind(title)
                .bind(content)
                .bind(metadata_text)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                let rowid = result.last_insert_rowid();

                sqlx::query(
                    "INSERT INTO documents_fts (rowid, title, content, metadata_text) VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(rowid)
                .bind(title)
                .bind(content)
                .bind(metadata_text)
                .execute(&mut *tx)
                .await?;

                let verified: Option<i64> = sqlx::query_scalar(
                    "SELECT rowid FROM documents_fts WHERE rowid = ?1",
                )
                .bind(rowid)
                .fetch_optional(&mut *tx)
                .await?;

                if verified != Some(rowid) {
                    return Err(DbError::Sqlx(sqlx::Error::RowNotFound));
                }

                tx.commit().await?;
                Ok(rowid)
            })
            .map_err(|e| match e {
                DbError::Sqlx(sqlx::Error::RowNotFound) => AppError::new(
                    ErrorKind::FtsSync,
                    "FTS_SYNC_ERROR: documents_fts row was not found after insert",
                ),
                other => AppError::from(other),
            })
    }

    fn rt_update(
        &self,
        rowid: i64,
        title: Option<String>,
        content: Option<String>,
        metadata_text: String,
        now: String,
    ) -> Result<(), AppError> {
        self.db
            .rt
            .block_on(async {
                let mut tx = self.db.pool.begin().await?;

                sqlx::query(
                    "UPDATE documents SET title = ?1, content = ?2, metadata = ?3, updated_at = ?4
                     WHERE rowid = ?5",
                )
                .bind(&title)
                .bind(&content)
                .bind(&metadata_text)
                .bind(&now)
                .bind(rowid)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM documents_fts WHERE rowid = ?1")
                    .bind(rowid)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "INSERT INTO documents_fts (rowid, title, content, metadata_text) VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(rowid)
                .bind(&title)
                .bind(&content)
                .bind(&metadata_text)
                .execute(&mut *tx)
                .await?;

                let verified: Option<i64> =
                    sqlx::query_scalar("SELECT rowid FROM documents_fts WHERE rowid = ?1")
                        .bind(rowid)
                        .fetch_optional(&mut *tx)
                        .await?;
                if verified != Some(rowid) {
                    return Err(DbError::Sqlx(sqlx::Error::RowNotFound));
                }

                tx.commit().await?;
                Ok(())
            })
            .map_err(|e| match e {
                DbError::Sqlx(sqlx::Error::RowNotFound) => AppError::new(
                    ErrorKind::FtsSync,
                    "FTS_SYNC_ERROR: documents_fts row was not found after update",
                ),
                other => AppError::from(other),
            })
    }
}

fn row_to_document(row: crate::db::Row_) -> Document {
    let v = row.values;
    let int = |i: usize| match &v[i] {
        Value::Int(n) => *n,
        _ => 0,
    };
    let text = |i: usize| match &v[i] {
        Value::Text(s) => Some(s.clone()),
        _ => None,
    };
    let metadata = text(4)
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Json::Object(Default::default()));
    Document {
        rowid: int(0),
        collection: text(1).unwrap_or_default(),
        title: text(2),
        content: text(3),
        metadata,
        created_at: text(5).unwrap_or_default(),
        updated_at: text(6).unwrap_or_default(),
    }
}
