//! Strategy Engine (spec §4.10). Turns a [`QueryAnalysis`] plus caller
//! options and collection capabilities into a concrete [`ExecutionPlan`] the
//! Search Executor can run without further decision-making.

use std::time::Duration;

use crate::search::analyzer::{QueryAnalysis, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    ReciprocalRank,
    WeightedLinear,
    Harmonic,
    Geometric,
    Bayesian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationMethod {
    MinMax,
    Sigmoid,
    ZScore,
    RankBased,
}

#[derive(Debug, Clone, Copy)]
pub struct BranchWeights {
    pub fts: f32,
    pub vector: f32,
    pub like: f32,
}

impl Default for BranchWeights {
    fn default() -> Self {
        Self {
            fts: 0.5,
            vector: 0.5,
            like: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Branches {
    pub fts: bool,
    pub vector: bool,
    pub like: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceConstraints {
    pub max_time: Duration,
    pub max_memory_bytes: u64,
    pub early_termination: bool,
    pub cache_enabled: bool,
}

impl Default for PerformanceConstraints {
    fn default() -> Self {
        Self {
            max_time: Duration::from_millis(2000),
            max_memory_bytes: 256 * 1024 * 1024,
            early_termination: true,
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub branches: Branches,
    pub fusion: FusionMethod,
    pub weights: BranchWeights,
    pub normalization: NormalizationMethod,
    pub limit: usize,
    pub offset: usize,
    pub performance: PerformanceConstraints,
}

/// Caller-supplied overrides (spec §6 search request shape). `None` means
/// "let the strategy engine decide".
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub strategy: Option<Strategy>,
    pub fusion: Option<FusionMethod>,
    pub fusion_weights: Option<BranchWeights>,
    pub enable_like_search: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// What the collection can actually support — a hybrid search degrades
/// gracefully to FTS-only when no vectors have been generated yet.
#[derive(Debug, Clone, Copy)]
pub struct CollectionCapabilities {
    pub has_vectors: bool,
}

pub fn build_plan(
    analysis: &QueryAnalysis,
    options: &SearchOptions,
    capabilities: CollectionCapabilities,
) -> ExecutionPlan {
    let strategy = options.strategy.unwrap_or(analysis.suggested_strategy);
    let strategy = if strategy_needs_vectors(strategy) && !capabilities.has_vectors {
        fallback_without_vectors(analysis)
    } else {
        strategy
    };

    let mut branches = branches_for(strategy);
    if options.enable_like_search {
        branches.like = true;
    }

    let weights = options.fusion_weights.unwrap_or_else(|| default_weights(branches));
    let fusion = options.fusion.unwrap_or(FusionMethod::ReciprocalRank);

    ExecutionPlan {
        branches,
        fusion,
        weights,
        normalization: NormalizationMethod::MinMax,
        limit: options.limit.unwrap_or(20).min(crate::validation::MAX_LIMIT),
        offset: options.offset.unwrap_or(0),
        performance: PerformanceConstraints::default(),
    }
}

fn strategy_needs_vectors(strategy: Strategy) -> bool {
    matches!(strategy, Strategy::VectorOnly | Strategy::Hybrid)
}

fn fallback_without_vectors(analysis: &QueryAnalysis) -> Strategy {
    analysis
        .fallback_strategies
        .iter()
        .copied()
        .find(|s| !strategy_needs_vectors(*s))
        .unwrap_or(Strategy::FtsOnly)
}

fn branches_for(strategy: Strategy) -> Branches {
    match strategy {
        Strategy::FtsOnly => Branches {
            fts: true,
            vector: false,
            like: false,
        },
        Strategy::VectorOnly => Branches {
            fts: false,
            vector: true,
            like: false,
        },
        Strategy::Hybrid => Branches {
            fts: true,
            vector: true,
            like: false,
        },
        Strategy::LikeOnly => Branches {
            fts: false,
            vector: false,
            like: true,
        },
    }
}

fn default_weights(branches: Branches) -> BranchWeights {
    let active = [branches.fts, branches.vector, branches.like]
        .iter()
        .filter(|b| **b)
        .count()
        .max(1);
    let share = 1.0 / active as f32;
    BranchWeights {
        fts: if branches.fts { share } else { 0.0 },
        vector: if branches.vector { share } else { 0.0 },
        like: if branches.like { share } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::analyzer::analyze;

    #[test]
    fn hybrid_falls_back_to_fts_when_collection_has_no_vectors() {
        let analysis = analyze("how does this work");
        let plan = build_plan(
            &analysis,
            &SearchOptions::default(),
            CollectionCapabilities { has_vectors: false },
        );
        assert!(plan.branches.fts);
        assert!(!plan.branches.vector);
    }

    #[test]
    fn enable_like_search_always_adds_like_branch() {
        let analysis = analyze("\"exact phrase\"");
        let mut options = SearchOptions::default();
        options.enable_like_search = true;
        let plan = build_plan(&analysis, &options, CollectionCapabilities { has_vectors: true });
        assert!(plan.branches.like);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let analysis = analyze("hybrid query example");
        let plan = build_plan(&analysis, &SearchOptions::default(), CollectionCapabilities { has_vectors: true });
        let sum = plan.weights.fts + plan.weights.vector + plan.weights.like;
        assert!((sum - 1.0).abs() < 0.01);
    }

    #[test]
    fn limit_is_capped_at_max_limit() {
        let analysis = analyze("query");
        let mut options = SearchOptions::default();
        options.limit = Some(100_000);
        let plan = build_plan(&analysis, &options, CollectionCapabilities { has_vectors: true });
        assert_eq!(plan.limit, crate::validation::MAX_LIMIT);
    }
}
