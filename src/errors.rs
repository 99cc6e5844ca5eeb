//! Error taxonomy shared across the engine (spec §4.14, §7).
//!
//! Every fallible operation ultimately returns an [`AppError`]. Leaf modules
//! define their own `thiserror` enums (`db::DbError`, `embedding::EmbedError`,
//! `rpc::RpcError`, ...) and convert into `AppError` at the module boundary so
//! each layer can still match on its own narrower error type internally,
//! mirroring the teacher's per-module `StoreError`/`HnswError` split.

use std::collections::BTreeMap;
use std::fmt;

/// High-level error category. Mirrors the kinds enumerated in spec §4.14.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    Validation,
    DatabaseCorruption,
    DatabaseDiskFull,
    DatabaseLocked,
    DatabasePermission,
    DatabaseConstraint,
    FtsSync,
    Vector,
    Persistence,
    EmbeddingAuth,
    EmbeddingQuota,
    EmbeddingNetwork,
    EmbeddingTimeout,
    EmbeddingProvider,
    EmbeddingConfig,
    RpcTimeout,
    RpcRateLimit,
    RpcTransport,
    RpcUnknownMethod,
    Cache,
}

impl ErrorKind {
    /// Default severity for this kind, used when a site doesn't override it.
    pub fn default_severity(self) -> Severity {
        use ErrorKind::*;
        match self {
            Validation => Severity::Low,
            DatabaseLocked | RpcTimeout | RpcRateLimit | EmbeddingTimeout | EmbeddingNetwork
            | EmbeddingQuota => Severity::Medium,
            FtsSync | DatabaseCorruption | DatabasePermission | EmbeddingAuth
            | EmbeddingConfig => Severity::Critical,
            DatabaseDiskFull | DatabaseConstraint | Vector | Persistence | EmbeddingProvider
            | RpcTransport | RpcUnknownMethod | Cache => Severity::High,
        }
    }

    /// Whether the failed operation is recoverable by a retry without
    /// external intervention (spec §7 propagation policy table).
    pub fn recoverable(self) -> bool {
        use ErrorKind::*;
        matches!(
            self,
            DatabaseLocked | RpcTimeout | RpcRateLimit | EmbeddingNetwork | EmbeddingTimeout
                | EmbeddingQuota
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Context values attached to an error for diagnostics. Constructed through
/// [`AppError::context`] so every insertion passes through [`redact`].
#[derive(Debug, Clone, Default)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let k = key.into();
        let v = redact(&value.to_string());
        self.0.insert(k, v);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }
}

/// The engine's single error type. User-facing message, machine-readable
/// kind, severity, recoverability, an optional suggested action, and a
/// redacted context map — never credentials or raw user content.
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub suggested_action: Option<String>,
    pub context: Context,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: kind.default_severity(),
            recoverable: kind.recoverable(),
            kind,
            message: message.into(),
            suggested_action: None,
            context: Context::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

/// Redact credentials and user-identifying data from a free-form string
/// before it is attached to an error context or logged (spec §7: "Logs and
/// error payloads never include credentials or user data").
pub fn redact(input: &str) -> String {
    use std::sync::LazyLock;
    static EMAIL: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
    });
    static CARD: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"\b(?:\d[ -]?){13,19}\b").expect("valid regex"));
    static BEARER: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"(?i)(bearer|token|api[_-]?key)\s*[:=]?\s*\S+").expect("valid regex")
    });

    let redacted = EMAIL.replace_all(input, "[redacted-email]");
    let redacted = CARD.replace_all(&redacted, "[redacted-card]");
    let redacted = BEARER.replace_all(&redacted, "$1=[redacted]");
    redacted.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email() {
        let s = redact("contact jane.doe@example.com for access");
        assert!(!s.contains("jane.doe@example.com"));
        assert!(s.contains("[redacted-email]"));
    }

    #[test]
    fn redacts_bearer_token() {
        let s = redact("Authorization: Bearer sk-abcdef1234567890");
        assert!(!s.contains("sk-abcdef1234567890"));
    }

    #[test]
    fn redacts_card_number() {
        let s = redact("card 4111 1111 1111 1111 declined");
        assert!(!s.contains("4111 1111 1111 1111"));
    }

    #[test]
    fn fts_sync_is_critical_and_not_recoverable() {
        let e = AppError::new(ErrorKind::FtsSync, "verification failed");
        assert_eq!(e.severity, Severity::Critical);
        assert!(!e.recoverable);
    }

    #[test]
    fn rpc_timeout_is_recoverable() {
        let e = AppError::new(ErrorKind::RpcTimeout, "deadline exceeded");
        assert!(e.recoverable);
    }

    #[test]
    fn context_values_are_redacted_on_insert() {
        let ctx = Context::new().with("email", "user@example.com");
        assert_eq!(ctx.get("email"), Some("[redacted-email]"));
    }
}
