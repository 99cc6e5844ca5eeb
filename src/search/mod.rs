//! Search pipeline: classify the query (C9), turn the classification into an
//! [`strategy::ExecutionPlan`] (C10), run the branches it names (C11), and
//! fuse their hits into a ranked, paginated result set (C12).

pub mod analyzer;
pub mod executor;
pub mod fusion;
pub mod strategy;

pub use analyzer::{analyze, QueryAnalysis, QueryType, Strategy};
pub use executor::{execute, BranchDebugInfo, ExecutionResult};
pub use fusion::{dedup, fuse, normalize, snippets, truncate_to_limit, Branch, BranchHit, FusedResult, Snippet};
pub use strategy::{build_plan, CollectionCapabilities, ExecutionPlan, FusionMethod, NormalizationMethod, SearchOptions};
