//! Embedding providers (spec §4.6). A collection is bound to exactly one
//! provider — local ONNX inference or a remote HTTP API — chosen and
//! validated at collection-creation time by [`factory`]. Both implementations
//! share the same synchronous-facade idiom as [`crate::db::Db`]: each owns
//! (or borrows) a Tokio runtime and blocks on it so the rest of the crate
//! never has to go async to call them.

pub mod factory;
pub mod local;
pub mod preprocess;
pub mod remote;

pub use factory::ProviderFactory;
pub use local::LocalProvider;
pub use remote::RemoteProvider;

use crate::errors::{AppError, ErrorKind};

/// An embedding vector plus the model identity it came from, so callers can
/// detect a stale cache entry if a collection's model is ever swapped.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

/// Implemented by every embedding backend. `embed_batch` is the only
/// required method; everything else has a sensible default in terms of it.
pub trait EmbeddingProvider: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, AppError>;

    fn embed_one(&self, text: &str) -> Result<Embedding, AppError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::new(ErrorKind::EmbeddingProvider, "provider returned no embeddings"))
    }

    fn dimensions(&self) -> u32;
    fn model_name(&self) -> &str;
    fn max_batch_size(&self) -> usize;
}

/// E5-style instruction prefixing (spec §4.6): queries and passages are
/// embedded asymmetrically so the same encoder can serve both roles.
pub fn prefix_for_role(text: &str, role: EmbeddingRole) -> String {
    match role {
        EmbeddingRole::Query => format!("query: {text}"),
        EmbeddingRole::Passage => format!("passage: {text}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingRole {
    Query,
    Passage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixing_distinguishes_query_from_passage() {
        assert_eq!(prefix_for_role("cats", EmbeddingRole::Query), "query: cats");
        assert_eq!(
            prefix_for_role("cats", EmbeddingRole::Passage),
            "passage: cats"
        );
    }
}
