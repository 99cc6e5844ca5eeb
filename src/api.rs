//! Public API Facade (spec §4.13). Two surfaces over the same engine handle:
//! a thin SQL-compatible adapter over [`db::Db`] (`exec`/`select`/`get_row`/
//! `bulk_insert`/`export`/`import`/`close`), and the high-level document +
//! search surface (`create_collection`, `insert_document_with_embedding`,
//! `search`, `process_embedding_queue`, ...). Both route through
//! [`rpc::RpcClient`]/[`rpc::RpcWorker`] at the process boundary — this
//! struct itself is what the worker's handlers call into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value as Json;

use crate::config::{CollectionConfig, Config};
use crate::db::{Row_, Value};
use crate::embedding::{Embedding, EmbeddingProvider, EmbeddingRole, ProviderFactory};
use crate::errors::{AppError, ErrorKind};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::search::{self, Branch, CollectionCapabilities, FusionMethod, QueryAnalysis, SearchOptions, Strategy};
use crate::store::collections::Collection;
use crate::store::documents::{Document, NewDocument};
use crate::store::queue::{Priority, QueueItem, QueueStats, QueueStore};
use crate::store::Store;
use crate::vector_index::{HnswIndex, VectorIndex};

pub const DEFAULT_LOCAL_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_MAX_EMBED_TOKENS: usize = 256;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub rowid: i64,
    pub collection: String,
    pub title: Option<String>,
    pub score: f32,
    pub rank: usize,
    pub branch_scores: HashMap<Branch, f32>,
    pub snippets: Vec<search::Snippet>,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub search_time_ms: f64,
    pub strategy: Strategy,
    pub fusion: FusionMethod,
    pub debug: search::BranchDebugInfo,
}

#[derive(Debug, Clone, Default)]
pub struct QueueProcessReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The engine. Holds the store handle, the per-collection provider cache,
/// an in-memory HNSW index per collection (rebuilt lazily from
/// `vector_entries` on first use), and the process-wide metrics/config.
pub struct Api {
    store: Store,
    config: Mutex<Config>,
    factory: ProviderFactory,
    metrics: Arc<Metrics>,
    indexes: Mutex<HashMap<String, HnswIndex>>,
    project_root: PathBuf,
}

impl Api {
    pub fn open(path: &Path, project_root: &Path) -> Result<Self, AppError> {
        let store = Store::open(path).map_err(AppError::from)?;
        let config = Config::load(project_root).map_err(|e| {
            AppError::new(ErrorKind::Validation, format!("failed to load configuration: {e}"))
        })?;
        Ok(Self::new(store, config, project_root.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let store = Store::open_in_memory().map_err(AppError::from)?;
        Ok(Self::new(store, Config::default(), PathBuf::new()))
    }

    fn new(store: Store, config: Config, project_root: PathBuf) -> Self {
        Self {
            store,
            config: Mutex::new(config),
            factory: ProviderFactory::new(DEFAULT_LOCAL_MODEL_REPO),
            metrics: Arc::new(Metrics::new()),
            indexes: Mutex::new(HashMap::new()),
            project_root,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn get_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ---- SQL-compatible surface (thin adapter over `db::Db`) ----

    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, AppError> {
        self.store.db().exec(sql, params).map_err(AppError::from)
    }

    pub fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Row_>, AppError> {
        self.store.db().select(sql, params).map_err(AppError::from)
    }

    pub fn get_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row_>, AppError> {
        Ok(self.select(sql, params)?.into_iter().next())
    }

    pub fn bulk_insert(&self, table: &str, columns: &[&str], rows: &[Vec<Value>]) -> Result<usize, AppError> {
        self.store.db().bulk_insert(table, columns, rows).map_err(AppError::from)
    }

    pub fn export(&self, path: &Path) -> Result<Vec<u8>, AppError> {
        self.store.export(path).map_err(AppError::from)
    }

    pub fn import(path: &Path, bytes: &[u8], overwrite: bool) -> Result<(), AppError> {
        crate::db::Db::import(path, bytes, overwrite).map_err(AppError::from)
    }

    pub fn close(&self) -> Result<(), AppError> {
        self.store.close().map_err(AppError::from)
    }

    /// Drops every document, collection, queue item, vector, and cache entry
    /// (RPC method `clear`). Schema tables themselves are left in place.
    pub fn clear(&self) -> Result<(), AppError> {
        for table in ["documents_fts", "documents", "vector_entries", "embedding_queue", "cache_entries", "collections"] {
            self.store.db().exec(&format!("DELETE FROM {table}"), &[]).map_err(AppError::from)?;
        }
        self.indexes.lock().expect("index lock").clear();
        Ok(())
    }

    // ---- high-level surface ----

    pub fn create_collection(&self, cfg: CollectionConfig) -> Result<Collection, AppError> {
        let collection = self.store.collections().create(&cfg)?;
        let mut config = self.config.lock().expect("config lock");
        let _ = config.add_collection(cfg);
        Ok(collection)
    }

    pub fn get_collection_info(&self, name: &str) -> Result<Collection, AppError> {
        self.store.collections().require(name)
    }

    /// Inserts a document, and either computes its embedding synchronously
    /// (when the collection auto-generates) or enqueues it for later
    /// processing, per collection config.
    pub fn insert_document_with_embedding(&self, doc: NewDocument<'_>) -> Result<Document, AppError> {
        let collection_name = doc.collection.to_string();
        let collection = self.store.collections().require(&collection_name)?;
        let inserted = self.store.documents().insert(doc)?;

        if collection.auto_generate {
            if let Some(content) = inserted.content.as_deref() {
                self.embed_and_store(&collection, inserted.rowid, content)?;
            }
        } else if let Some(content) = inserted.content.as_deref() {
            self.store
                .queue()
                .enqueue(inserted.rowid, &collection_name, content, Priority::Normal)?;
        }

        Ok(inserted)
    }

    pub fn bulk_insert_documents(&self, docs: Vec<NewDocument<'_>>) -> Result<Vec<Document>, AppError> {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            out.push(self.insert_document_with_embedding(doc)?);
        }
        Ok(out)
    }

    fn embed_and_store(&self, collection: &Collection, rowid: i64, content: &str) -> Result<(), AppError> {
        let cfg = self.collection_config(collection)?;
        let provider = self.factory.get_or_build(&cfg)?;
        let cache = self.cache_manager();

        let vector = match cache.get(&collection.name, content)? {
            Some(v) => v,
            None => {
                let text = crate::embedding::preprocess::preprocess(content, DEFAULT_MAX_EMBED_TOKENS);
                let prefixed = crate::embedding::prefix_for_role(&text, EmbeddingRole::Passage);
                let embedding = provider.embed_one(&prefixed)?;
                cache.put(&collection.name, content, &embedding.vector)?;
                embedding.vector
            }
        };

        self.store_vector(&collection.name, rowid, &vector)
    }

    fn store_vector(&self, collection: &str, rowid: i64, vector: &[f32]) -> Result<(), AppError> {
        self.store
            .db()
            .exec(
                "INSERT INTO vector_entries (rowid, collection, dims, vector) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(rowid) DO UPDATE SET vector = excluded.vector, dims = excluded.dims",
                &[
                    Value::Int(rowid),
                    Value::from(collection.to_string()),
                    Value::Int(vector.len() as i64),
                    Value::Blob(crate::store::cache::encode_vector(vector)),
                ],
            )
            .map_err(AppError::from)?;

        self.with_index(collection, vector.len() as u32, |index| index.insert(rowid, vector))??;
        self.store.collections().increment_vector_count(collection, 1).map_err(AppError::from)?;
        Ok(())
    }

    fn collection_config(&self, collection: &Collection) -> Result<CollectionConfig, AppError> {
        let config = self.config.lock().expect("config lock");
        config
            .collection(&collection.name)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorKind::Validation, format!("no embedding config registered for collection '{}'", collection.name)))
    }

    fn cache_manager(&self) -> crate::store::cache::CacheManager<'_> {
        crate::store::cache::CacheManager::new(self.store.db(), &self.metrics)
    }

    /// Runs `f` against the collection's in-memory HNSW index, building it
    /// from `vector_entries` on first access.
    fn with_index<R>(&self, collection: &str, dims: u32, f: impl FnOnce(&mut HnswIndex) -> R) -> Result<R, AppError> {
        let mut indexes = self.indexes.lock().expect("index lock");
        if !indexes.contains_key(collection) {
            indexes.insert(collection.to_string(), self.load_index(collection, dims)?);
        }
        let index = indexes.get_mut(collection).expect("just inserted");
        Ok(f(index))
    }

    fn load_index(&self, collection: &str, dims: u32) -> Result<HnswIndex, AppError> {
        let rows = self
            .store
            .db()
            .select(
                "SELECT rowid, vector, dims FROM vector_entries WHERE collection = ?1",
                &[Value::from(collection.to_string())],
            )
            .map_err(AppError::from)?;

        let mut index = HnswIndex::new(dims, rows.len());
        for row in rows {
            let rowid = match &row.values[0] {
                Value::Int(n) => *n,
                _ => continue,
            };
            let blob = match &row.values[1] {
                Value::Blob(b) => b,
                _ => continue,
            };
            let row_dims = match &row.values[2] {
                Value::Int(n) => *n as usize,
                _ => dims as usize,
            };
            let vector = crate::store::cache::decode_vector(blob, row_dims);
            index.insert(rowid, &vector)?;
        }
        Ok(index)
    }

    pub fn search(&self, collection_name: &str, query_text: &str, options: SearchOptions) -> Result<SearchResponse, AppError> {
        let start = Instant::now();
        let collection = self.store.collections().require(collection_name)?;
        let analysis = search::analyze(query_text);
        let capabilities = CollectionCapabilities {
            has_vectors: collection.vector_count > 0,
        };
        let plan = search::build_plan(&analysis, &options, capabilities);

        let query_vector = if plan.branches.vector {
            Some(self.query_vector(&collection, query_text)?)
        } else {
            None
        };

        let exec_result = if plan.branches.vector {
            self.with_index(&collection.name, collection.dimensions, |index| {
                search::execute(
                    self.store.db(),
                    &collection.name,
                    query_text,
                    query_vector.as_deref(),
                    Some(index as &dyn VectorIndex),
                    &plan,
                )
            })??
        } else {
            search::execute(self.store.db(), &collection.name, query_text, None, None, &plan)?
        };

        let mut branch_hits = exec_result.branches;
        for (_, hits) in branch_hits.iter_mut() {
            search::normalize(hits, plan.normalization);
        }

        let fused = search::fuse(&branch_hits, plan.weights, plan.fusion);
        let fused = search::dedup(fused);
        let total_results = fused.len();
        let page = search::truncate_to_limit(fused, plan.limit, plan.offset);

        let mut results = Vec::with_capacity(page.len());
        for hit in page {
            let doc = self.store.documents().get(hit.rowid)?;
            let (title, fragments) = match &doc {
                Some(d) => {
                    let content = d.content.as_deref().unwrap_or_default();
                    let terms: Vec<&str> = query_text.split_whitespace().collect();
                    (d.title.clone(), search::snippets(content, &terms, 3, 6, "**", "**", 200))
                }
                None => (None, Vec::new()),
            };
            results.push(SearchResult {
                rowid: hit.rowid,
                collection: collection.name.clone(),
                title,
                score: hit.score,
                rank: hit.rank,
                branch_scores: hit.branch_scores,
                snippets: fragments,
            });
        }

        Ok(SearchResponse {
            results,
            total_results,
            search_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            strategy: analysis.suggested_strategy,
            fusion: plan.fusion,
            debug: exec_result.debug,
        })
    }

    /// Forces a vector-only plan against a caller-supplied query vector
    /// (RPC method `searchSemantic`); skips the Query Analyzer entirely
    /// since there's no query text to classify.
    pub fn search_semantic(&self, collection_name: &str, query_vector: &[f32], mut options: SearchOptions) -> Result<SearchResponse, AppError> {
        let collection = self.store.collections().require(collection_name)?;
        if query_vector.len() != collection.dimensions as usize {
            return Err(AppError::new(
                ErrorKind::Vector,
                format!(
                    "query vector has {} dimensions, collection '{}' expects {}",
                    query_vector.len(),
                    collection_name,
                    collection.dimensions
                ),
            ));
        }
        options.strategy = Some(Strategy::VectorOnly);

        let start = Instant::now();
        let plan = search::build_plan(
            &QueryAnalysis {
                normalized: String::new(),
                query_type: crate::search::QueryType::LongPhrase,
                confidence: 1.0,
                features: Default::default(),
                suggested_strategy: Strategy::VectorOnly,
                fallback_strategies: vec![],
            },
            &options,
            CollectionCapabilities { has_vectors: true },
        );

        let exec_result = self.with_index(&collection.name, collection.dimensions, |index| {
            search::execute(self.store.db(), &collection.name, "", Some(query_vector), Some(index as &dyn VectorIndex), &plan)
        })??;

        let mut branch_hits = exec_result.branches;
        for (_, hits) in branch_hits.iter_mut() {
            search::normalize(hits, plan.normalization);
        }
        let fused = search::dedup(search::fuse(&branch_hits, plan.weights, plan.fusion));
        let total_results = fused.len();
        let page = search::truncate_to_limit(fused, plan.limit, plan.offset);

        let mut results = Vec::with_capacity(page.len());
        for hit in page {
            let doc = self.store.documents().get(hit.rowid)?;
            results.push(SearchResult {
                rowid: hit.rowid,
                collection: collection.name.clone(),
                title: doc.and_then(|d| d.title),
                score: hit.score,
                rank: hit.rank,
                branch_scores: hit.branch_scores,
                snippets: Vec::new(),
            });
        }

        Ok(SearchResponse {
            results,
            total_results,
            search_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            strategy: Strategy::VectorOnly,
            fusion: plan.fusion,
            debug: exec_result.debug,
        })
    }

    fn query_vector(&self, collection: &Collection, query_text: &str) -> Result<Vec<f32>, AppError> {
        let cache = self.cache_manager();
        if let Some(v) = cache.get(&collection.name, query_text)? {
            return Ok(v);
        }
        let cfg = self.collection_config(collection)?;
        let provider = self.factory.get_or_build(&cfg)?;
        let prefixed = crate::embedding::prefix_for_role(query_text, EmbeddingRole::Query);
        let embedding = provider.embed_one(&prefixed)?;
        cache.put(&collection.name, query_text, &embedding.vector)?;
        Ok(embedding.vector)
    }

    pub fn generate_embedding(&self, collection_name: &str, text: &str) -> Result<Embedding, AppError> {
        let collection = self.store.collections().require(collection_name)?;
        let cfg = self.collection_config(&collection)?;
        let provider = self.factory.get_or_build(&cfg)?;
        let preprocessed = crate::embedding::preprocess::preprocess(text, DEFAULT_MAX_EMBED_TOKENS);
        provider.embed_one(&preprocessed)
    }

    pub fn batch_generate_embeddings(&self, collection_name: &str, texts: &[String]) -> Result<Vec<Embedding>, AppError> {
        let collection = self.store.collections().require(collection_name)?;
        let cfg = self.collection_config(&collection)?;
        let provider = self.factory.get_or_build(&cfg)?;
        let preprocessed: Vec<String> = texts
            .iter()
            .map(|t| crate::embedding::preprocess::preprocess(t, DEFAULT_MAX_EMBED_TOKENS))
            .collect();
        provider.embed_batch(&preprocessed)
    }

    pub fn enqueue_embedding(&self, doc_id: i64, collection: &str, content: &str, priority: Priority) -> Result<i64, AppError> {
        self.store.queue().enqueue(doc_id, collection, content, priority)
    }

    /// Drains up to `batch_size` queued items (optionally scoped to one
    /// collection), computing and storing their vectors (spec §4.7 process
    /// algorithm). Retry state is handled entirely by `QueueStore`.
    pub fn process_embedding_queue(&self, batch_size: usize, collection: Option<&str>) -> Result<QueueProcessReport, AppError> {
        let queue = self.store.queue();
        let claimed = claim_for_collection(&queue, batch_size, collection)?;
        let mut report = QueueProcessReport::default();

        for item in claimed {
            report.processed += 1;
            match self.process_queue_item(&item) {
                Ok(()) => {
                    queue.mark_done(item.id)?;
                    report.succeeded += 1;
                }
                Err(e) => {
                    queue.mark_failed(item.id, &e.message)?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn process_queue_item(&self, item: &QueueItem) -> Result<(), AppError> {
        let collection = self.store.collections().require(&item.collection)?;
        self.embed_and_store(&collection, item.doc_id, &item.content_snapshot)
    }

    pub fn get_embedding_queue_status(&self, collection: Option<&str>) -> Result<QueueStats, AppError> {
        self.store.queue().stats(collection)
    }

    pub fn clear_embedding_queue(&self, collection: Option<&str>) -> Result<u64, AppError> {
        self.store.queue().clear(collection)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// The collection filter is pushed into `QueueStore::claim_batch`'s own
/// query so a row that doesn't match `collection` is never flipped to
/// `processing` in the first place — filtering client-side after the claim
/// would leave non-matching rows stuck in `processing` forever, since
/// nothing would ever call `mark_done`/`mark_failed` on them.
fn claim_for_collection(queue: &QueueStore<'_>, batch_size: usize, collection: Option<&str>) -> Result<Vec<QueueItem>, AppError> {
    queue.claim_batch(batch_size, collection)
}
