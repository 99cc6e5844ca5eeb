//! RPC Transport (spec §4.1). The original spec frames this as a message
//! channel between a UI thread and a background worker; this crate has no UI
//! thread, so the channel instead separates the calling thread from a
//! dedicated worker thread running its own Tokio runtime — the same role a
//! web worker plays, reached with `tokio::sync::mpsc` instead of
//! `postMessage`. Every call gets a unique id, a timeout, and counts against
//! a rolling concurrency cap; unknown methods, serialization failures, and
//! transport failures all surface as typed errors instead of panics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Semaphore};
use uuid::Uuid;

use crate::errors::{AppError, ErrorKind};
use crate::observability::Metrics;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONCURRENCY_CAP: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcErrorBody>,
}

impl From<&AppError> for RpcErrorBody {
    fn from(e: &AppError) -> Self {
        let code = match e.kind {
            ErrorKind::RpcTimeout => "TIMEOUT",
            ErrorKind::RpcRateLimit => "RATE_LIMIT",
            ErrorKind::RpcTransport => "WORKER_ERROR",
            ErrorKind::RpcUnknownMethod => "UNKNOWN_METHOD",
            _ => "WORKER_ERROR",
        };
        RpcErrorBody {
            code: code.to_string(),
            message: e.message.clone(),
            stack: None,
        }
    }
}

/// A single in-flight call: the payload to hand to the handler plus the
/// channel the worker uses to send the result back to the caller.
struct Call {
    request: RpcRequest,
    reply: oneshot::Sender<Result<serde_json::Value, AppError>>,
}

/// A registered method handler. Boxed so the transport can hold a
/// heterogeneous table of handlers without generics leaking into the public
/// API; each handler is synchronous because every handler this crate
/// registers (C13's facade methods) ultimately calls into the `Db`/`Store`
/// sync-facade methods, which already own their own Tokio runtime.
pub type Handler = Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, AppError> + Send + Sync>;

/// The worker side of the channel: owns the handler table, runs on a
/// dedicated background thread, and drains `Call`s one at a time per permit
/// granted by the concurrency semaphore.
pub struct RpcWorker {
    handlers: HashMap<String, Handler>,
}

impl RpcWorker {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, method: &str, handler: Handler) {
        self.handlers.insert(method.to_string(), handler);
    }

    fn dispatch(&self, request: &RpcRequest) -> Result<serde_json::Value, AppError> {
        match self.handlers.get(&request.method) {
            Some(handler) => handler(request.params.clone()),
            None => Err(AppError::new(
                ErrorKind::RpcUnknownMethod,
                format!("unknown method: {}", request.method),
            )),
        }
    }
}

impl Default for RpcWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// The caller-facing handle. Cloneable; every clone shares the same worker
/// thread, concurrency cap, and metrics.
#[derive(Clone)]
pub struct RpcClient {
    tx: mpsc::Sender<Call>,
    semaphore: Arc<Semaphore>,
    default_timeout: Duration,
    metrics: Arc<Metrics>,
    inflight: Arc<AtomicU64>,
}

impl RpcClient {
    /// Spawns the worker thread and its single-threaded Tokio runtime, and
    /// returns a client handle. `concurrency_cap` bounds how many calls may
    /// be in flight at once; calls beyond the cap fail fast with
    /// `RpcRateLimit` rather than queuing indefinitely.
    pub fn spawn(worker: RpcWorker, concurrency_cap: usize, metrics: Arc<Metrics>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Call>(256);

        std::thread::Builder::new()
            .name("hybridstore-rpc-worker".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build rpc worker runtime");
                rt.block_on(async move {
                    while let Some(call) = rx.recv().await {
                        let result = worker.dispatch(&call.request);
                        let _ = call.reply.send(result);
                    }
                });
            })
            .expect("failed to spawn rpc worker thread");

        Self {
            tx,
            semaphore: Arc::new(Semaphore::new(concurrency_cap.max(1))),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            metrics,
            inflight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Issues a call and awaits its response, enforcing the concurrency cap
    /// and the per-call timeout. Transport-level failures (worker thread
    /// gone, channel closed) surface as `RpcTransport`.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let _permit = self.semaphore.try_acquire().map_err(|_| {
            self.metrics.record_error();
            AppError::new(
                ErrorKind::RpcRateLimit,
                format!("concurrency cap reached ({} in flight)", self.inflight.load(Ordering::Relaxed)),
            )
            .with_action("retry after a short backoff")
        })?;

        self.inflight.fetch_add(1, Ordering::Relaxed);
        let result = self.call_inner(method, params).await;
        self.inflight.fetch_sub(1, Ordering::Relaxed);

        self.metrics.record_call();
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    async fn call_inner(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let id = Uuid::new_v4().to_string();
        let request = RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let call = Call {
            request,
            reply: reply_tx,
        };

        self.tx.send(call).await.map_err(|_| {
            AppError::new(ErrorKind::RpcTransport, "rpc worker is no longer running")
        })?;

        match tokio::time::timeout(self.default_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::new(
                ErrorKind::RpcTransport,
                "rpc worker dropped the reply channel without responding",
            )),
            Err(_) => {
                self.metrics.record_timeout();
                Err(AppError::new(
                    ErrorKind::RpcTimeout,
                    format!("method '{method}' (id {id}) timed out after {:?}", self.default_timeout),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(cap: usize) -> RpcClient {
        let mut worker = RpcWorker::new();
        worker.register(
            "echo",
            Arc::new(|params| Ok(params)),
        );
        worker.register(
            "slow",
            Arc::new(|_params| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(serde_json::json!("done"))
            }),
        );
        RpcClient::spawn(worker, cap, Arc::new(Metrics::default()))
    }

    #[tokio::test]
    async fn echo_round_trips_params() {
        let client = test_client(10);
        let result = client.call("echo", serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn unknown_method_returns_unknown_method_error() {
        let client = test_client(10);
        let err = client.call("does_not_exist", serde_json::json!(null)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RpcUnknownMethod);
    }

    #[tokio::test]
    async fn call_beyond_timeout_reports_timeout() {
        let client = test_client(10).with_timeout(Duration::from_millis(20));
        let err = client.call("slow", serde_json::json!(null)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RpcTimeout);
    }
}
