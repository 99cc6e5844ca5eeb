//! Priority embedding queue (spec §4.7). Documents inserted without an
//! embedding (or whose content changed) are enqueued here; a worker drains
//! them in priority-then-FIFO order, generates vectors, and writes them to
//! `vector_entries`. Retry uses the same transactional idiom as the document
//! store: select-and-flip-to-processing happens inside the same transaction
//! so two workers never grab the same item.

use chrono::Utc;

use crate::db::{Db, DbError, Value};
use crate::errors::{AppError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    fn as_i64(self) -> i64 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    fn from_i64(v: i64) -> Self {
        match v {
            1 => Priority::High,
            3 => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl QueueStatus {
    fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "processing" => QueueStatus::Processing,
            "done" => QueueStatus::Done,
            "failed" => QueueStatus::Failed,
            _ => QueueStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub doc_id: i64,
    pub collection: String,
    pub content_snapshot: String,
    pub priority: Priority,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

pub struct QueueStore<'a> {
    db: &'a Db,
}

impl<'a> QueueStore<'a> {
    pub(super) fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn enqueue(
        &self,
        doc_id: i64,
        collection: &str,
        content_snapshot: &str,
        priority: Priority,
    ) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        self.db
            .rt
            .block_on(async {
                let result = sqlx::query(
                    "INSERT INTO embedding_queue
                     (doc_id, collection, content_snapshot, priority, status, retry_count,
                      max_retries, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'pending', 0, 3, ?5, ?5)",
                )
                .bind(doc_id)
                .bind(collection)
                .bind(content_snapshot)
                .bind(priority.as_i64())
                .bind(&now)
                .execute(&self.db.pool)
                .await?;
                Ok(result.last_insert_rowid())
            })
            .map_err(AppError::from)
    }

    /// Atomically claims up to `limit` pending items (highest priority,
    /// oldest first), optionally restricted to one collection, by flipping
    /// them to `processing` inside one transaction, then returns them. Two
    /// concurrent callers never receive the same row. The collection filter
    /// lives in the claim query itself rather than a client-side post-filter
    /// so a row that doesn't match a caller's requested collection is never
    /// flipped to `processing` in the first place — nothing is claimed and
    /// then discarded.
    pub fn claim_batch(&self, limit: usize, collection: Option<&str>) -> Result<Vec<QueueItem>, AppError> {
        self.db
            .rt
            .block_on(async {
                let mut tx = self.db.pool.begin().await?;

                let ids: Vec<i64> = match collection {
                    Some(c) => {
                        sqlx::query_scalar(
                            "SELECT id FROM embedding_queue WHERE status = 'pending' AND collection = ?1
                             ORDER BY priority ASC, created_at ASC LIMIT ?2",
                        )
                        .bind(c)
                        .bind(limit as i64)
                        .fetch_all(&mut *tx)
                        .await?
                    }
                    None => {
                        sqlx::query_scalar(
                            "SELECT id FROM embedding_queue WHERE status = 'pending'
                             ORDER BY priority ASC, created_at ASC LIMIT ?1",
                        )
                        .bind(limit as i64)
                        .fetch_all(&mut *tx)
                        .await?
                    }
                };

                if ids.is_empty() {
                    tx.commit().await?;
                    return Ok(Vec::new());
                }

                let now = Utc::now().to_rfc3339();
                for id in &ids {
                    sqlx::query(
                        "UPDATE embedding_queue SET status = 'processing', updated_at = ?1 WHERE id = ?2",
                    )
                    .bind(&now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }

                let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "SELECT id, doc_id, collection, content_snapshot, priority, status,
                            retry_count, max_retries, last_error
                     FROM embedding_queue WHERE id IN ({})",
                    placeholders.join(", ")
                );
                let mut query = sqlx::query(&sql);
                for id in &ids {
                    query = query.bind(id);
                }
                let rows = query.fetch_all(&mut *tx).await?;
                let items = rows.iter().map(row_to_item).collect();

                tx.commit().await?;
                Ok(items)
            })
            .map_err(AppError::from)
    }

    pub fn mark_done(&self, id: i64) -> Result<(), AppError> {
        self.set_status(id, QueueStatus::Done, None)
    }

    /// Marks a failed attempt. If `retry_count` is still below `max_retries`
    /// the item goes back to `pending` for another pass; otherwise it's
    /// terminally `failed` (spec §4.7 retry state machine).
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        self.db
            .rt
            .block_on(async {
                let row = sqlx::query_as::<_, (i64, i64)>(
                    "SELECT retry_count, max_retries FROM embedding_queue WHERE id = ?1",
                )
                .bind(id)
                .fetch_one(&self.db.pool)
                .await?;
                let (retry_count, max_retries) = row;
                let next_status = if retry_count + 1 >= max_retries {
                    "failed"
                } else {
                    "pending"
                };
                sqlx::query(
                    "UPDATE embedding_queue SET status = ?1, retry_count = retry_count + 1,
                     last_error = ?2, updated_at = ?3 WHERE id = ?4",
                )
                .bind(next_status)
                .bind(error)
                .bind(&now)
                .bind(id)
                .execute(&self.db.pool)
                .await?;
                Ok(())
            })
            .map_err(AppError::from)
    }

    fn set_status(&self, id: i64, status: QueueStatus, error: Option<&str>) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        self.db
            .exec(
                "UPDATE embedding_queue SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
                &[
                    Value::from(status.as_str().to_string()),
                    error.map(str::to_string).into(),
                    Value::from(now),
                    Value::Int(id),
                ],
            )
            .map_err(AppError::from)?;
        Ok(())
    }

    pub fn stats(&self, collection: Option<&str>) -> Result<QueueStats, AppError> {
        let (sql, params): (&str, Vec<Value>) = match collection {
            Some(c) => (
                "SELECT status, count(*) FROM embedding_queue WHERE collection = ?1 GROUP BY status",
                vec![Value::from(c.to_string())],
            ),
            None => (
                "SELECT status, count(*) FROM embedding_queue GROUP BY status",
                vec![],
            ),
        };
        let rows = self.db.select(sql, &params).map_err(AppError::from)?;
        let mut stats = QueueStats::default();
        for row in rows {
            let status = match &row.values[0] {
                Value::Text(s) => QueueStatus::from_str(s),
                _ => continue,
            };
            let count = match &row.values[1] {
                Value::Int(n) => *n as u64,
                _ => 0,
            };
            match status {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Done => stats.done = count,
                QueueStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    pub fn clear(&self, collection: Option<&str>) -> Result<u64, AppError> {
        let (sql, params): (&str, Vec<Value>) = match collection {
            Some(c) => (
                "DELETE FROM embedding_queue WHERE collection = ?1",
                vec![Value::from(c.to_string())],
            ),
            None => ("DELETE FROM embedding_queue", vec![]),
        };
        self.db.exec(sql, &params).map_err(AppError::from)
    }

    pub fn get(&self, id: i64) -> Result<QueueItem, AppError> {
        let rows = self
            .db
            .select(
                "SELECT id, doc_id, collection, content_snapshot, priority, status,
                        retry_count, max_retries, last_error
                 FROM embedding_queue WHERE id = ?1",
                &[Value::Int(id)],
            )
            .map_err(AppError::from)?;
        rows.into_iter()
            .next()
            .map(row_to_item_owned)
            .ok_or_else(|| AppError::new(ErrorKind::Validation, format!("queue item {id} does not exist")))
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> QueueItem {
    use sqlx::Row;
    QueueItem {
        id: row.get(0),
        doc_id: row.get(1),
        collection: row.get(2),
        content_snapshot: row.get(3),
        priority: Priority::from_i64(row.get::<i64, _>(4)),
        status: QueueStatus::from_str(row.get::<String, _>(5).as_str()),
        retry_count: row.get::<i64, _>(6) as u32,
        max_retries: row.get::<i64, _>(7) as u32,
        last_error: row.get(8),
    }
}

fn row_to_item_owned(row: crate::db::Row_) -> QueueItem {
    let v = row.values;
    let int = |i: usize| match &v[i] {
        Value::Int(n) => *n,
        _ => 0,
    };
    let text = |i: usize| match &v[i] {
        Value::Text(s) => Some(s.clone()),
        _ => None,
    };
    QueueItem {
        id: int(0),
        doc_id: int(1),
        collection: text(2).unwrap_or_default(),
        content_snapshot: text(3).unwrap_or_default(),
        priority: Priority::from_i64(int(4)),
        status: QueueStatus::from_str(&text(5).unwrap_or_default()),
        retry_count: int(6) as u32,
        max_retries: int(7) as u32,
        last_error: text(8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use crate::store::collections::CollectionStore;
    use crate::store::documents::{DocumentStore, NewDocument};

    fn seeded() -> (Db, i64) {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        CollectionStore::new(&db)
            .create(&CollectionConfig {
                name: "docs".into(),
                ..Default::default()
            })
            .unwrap();
        let doc = DocumentStore::new(&db)
            .insert(NewDocument {
                collection: "docs",
                title: Some("t"),
                content: Some("c"),
                metadata: serde_json::Value::Null,
            })
            .unwrap();
        (db, doc.rowid)
    }

    #[test]
    fn enqueue_then_claim_flips_to_processing() {
        let (db, doc_id) = seeded();
        let q = QueueStore::new(&db);
        q.enqueue(doc_id, "docs", "c", Priority::Normal).unwrap();
        let claimed = q.claim_batch(10, None).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, QueueStatus::Processing);

        let again = q.claim_batch(10, None).unwrap();
        assert!(again.is_empty(), "processing items must not be claimed twice");
    }

    #[test]
    fn mark_failed_retries_until_max_then_terminally_fails() {
        let (db, doc_id) = seeded();
        let q = QueueStore::new(&db);
        let id = q.enqueue(doc_id, "docs", "c", Priority::High).unwrap();

        q.claim_batch(1, None).unwrap();
        q.mark_failed(id, "boom").unwrap();
        assert_eq!(q.get(id).unwrap().status, QueueStatus::Pending);

        q.claim_batch(1, None).unwrap();
        q.mark_failed(id, "boom").unwrap();
        assert_eq!(q.get(id).unwrap().status, QueueStatus::Pending);

        q.claim_batch(1, None).unwrap();
        q.mark_failed(id, "boom").unwrap();
        assert_eq!(q.get(id).unwrap().status, QueueStatus::Failed);
    }

    #[test]
    fn priority_ordering_is_high_before_normal_before_low() {
        let (db, doc_id) = seeded();
        let q = QueueStore::new(&db);
        q.enqueue(doc_id, "docs", "low", Priority::Low).unwrap();
        q.enqueue(doc_id, "docs", "high", Priority::High).unwrap();
        q.enqueue(doc_id, "docs", "normal", Priority::Normal).unwrap();

        let claimed = q.claim_batch(3, None).unwrap();
        assert_eq!(claimed[0].content_snapshot, "high");
        assert_eq!(claimed[1].content_snapshot, "normal");
        assert_eq!(claimed[2].content_snapshot, "low");
    }

    #[test]
    fn claiming_one_collection_leaves_another_collections_item_pending() {
        let (db, doc_id) = seeded();
        CollectionStore::new(&db)
            .create(&CollectionConfig {
                name: "other".into(),
                ..Default::default()
            })
            .unwrap();
        let other_doc = DocumentStore::new(&db)
            .insert(NewDocument {
                collection: "other",
                title: Some("t"),
                content: Some("c"),
                metadata: serde_json::Value::Null,
            })
            .unwrap();

        let q = QueueStore::new(&db);
        q.enqueue(doc_id, "docs", "docs item", Priority::Normal).unwrap();
        let other_id = q
            .enqueue(other_doc.rowid, "other", "other item", Priority::Normal)
            .unwrap();

        let claimed = q.claim_batch(10, Some("docs")).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].collection, "docs");

        // The "other" item must never have been flipped to `processing` —
        // claiming for "docs" must not touch it at all.
        assert_eq!(q.get(other_id).unwrap().status, QueueStatus::Pending);
        let other_stats = q.stats(Some("other")).unwrap();
        assert_eq!(other_stats.pending, 1);
        assert_eq!(other_stats.processing, 0);
    }

    #[test]
    fn stats_counts_by_status() {
        let (db, doc_id) = seeded();
        let q = QueueStore::new(&db);
        q.enqueue(doc_id, "docs", "a", Priority::Normal).unwrap();
        let id2 = q.enqueue(doc_id, "docs", "b", Priority::Normal).unwrap();
        q.claim_batch(10, None).unwrap();
        q.mark_done(id2).unwrap();

        let stats = q.stats(Some("docs")).unwrap();
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.done, 1);
    }
}
