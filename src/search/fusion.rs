//! Result Processor (spec §4.12): normalize, fuse, dedup, snippet/highlight,
//! truncate. Grounded in the teacher's `rrf_fuse` — the reciprocal-rank
//! formula and k=60 default carry over unchanged; weighted/harmonic/
//! geometric/Bayesian fusion and the snippet/highlight stage are additions
//! this crate's hybrid pipeline needs that the teacher's single-method
//! fuser didn't.

use std::collections::HashMap;

use crate::search::strategy::{BranchWeights, FusionMethod, NormalizationMethod};
use crate::RRF_K;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Fts,
    Vector,
    Like,
}

/// One branch's raw hit for one document: higher `score` is always better
/// by the time it reaches [`fuse`] — vector distances are inverted by the
/// caller before this point.
#[derive(Debug, Clone, Copy)]
pub struct BranchHit {
    pub rowid: i64,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FusedResult {
    pub rowid: i64,
    pub score: f32,
    pub branch_scores: HashMap<Branch, f32>,
    pub rank: usize,
}

/// Normalizes a branch's raw scores in place to comparable ranges, per the
/// plan's [`NormalizationMethod`]. Distance-based branches must invert
/// their raw scores (1 - distance, or similar) before calling this — this
/// function only rescales, it never flips sign.
pub fn normalize(hits: &mut [BranchHit], method: NormalizationMethod) {
    if hits.is_empty() {
        return;
    }
    match method {
        NormalizationMethod::MinMax => {
            let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
            let max = hits.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
            let range = (max - min).max(f32::EPSILON);
            for h in hits.iter_mut() {
                h.score = (h.score - min) / range;
            }
        }
        NormalizationMethod::Sigmoid => {
            for h in hits.iter_mut() {
                h.score = 1.0 / (1.0 + (-h.score).exp());
            }
        }
        NormalizationMethod::ZScore => {
            let mean = hits.iter().map(|h| h.score).sum::<f32>() / hits.len() as f32;
            let variance =
                hits.iter().map(|h| (h.score - mean).powi(2)).sum::<f32>() / hits.len() as f32;
            let std_dev = variance.sqrt().max(f32::EPSILON);
            for h in hits.iter_mut() {
                h.score = (h.score - mean) / std_dev;
            }
        }
        NormalizationMethod::RankBased => {
            let mut order: Vec<usize> = (0..hits.len()).collect();
            order.sort_by(|&a, &b| hits[b].score.partial_cmp(&hits[a].score).unwrap());
            let len = hits.len() as f32;
            for (rank, &idx) in order.iter().enumerate() {
                hits[idx].score = 1.0 - (rank as f32 / len);
            }
        }
    }
}

/// Fuses already-normalized per-branch hit lists into one ranked list.
/// Ties break by original primary-branch rank (branches are passed in
/// priority order), then by rowid ascending for determinism (spec §4.12).
pub fn fuse(
    branch_hits: &[(Branch, Vec<BranchHit>)],
    weights: BranchWeights,
    method: FusionMethod,
) -> Vec<FusedResult> {
    let mut scores: HashMap<i64, FusedResult> = HashMap::new();
    let mut primary_rank: HashMap<i64, usize> = HashMap::new();

    for (branch, hits) in branch_hits {
        let weight = weight_for(*branch, weights);
        // Rank within this branch, best score first.
        let mut ranked: Vec<&BranchHit> = hits.iter().collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

        for (rank0, hit) in ranked.iter().enumerate() {
            let rank = rank0 + 1;
            primary_rank.entry(hit.rowid).or_insert(rank);

            let entry = scores.entry(hit.rowid).or_insert_with(|| FusedResult {
                rowid: hit.rowid,
                score: 0.0,
                branch_scores: HashMap::new(),
                rank: 0,
            });
            entry.branch_scores.insert(*branch, hit.score);

            let contribution = match method {
                FusionMethod::ReciprocalRank => weight / (RRF_K as f32 + rank as f32),
                FusionMethod::WeightedLinear => weight * hit.score,
                FusionMethod::Harmonic => {
                    if hit.score > 0.0 {
                        weight / (1.0 / hit.score)
                    } else {
                        0.0
                    }
                }
                FusionMethod::Geometric => weight * hit.score.max(f32::EPSILON).ln(),
                FusionMethod::Bayesian => weight * hit.score / (hit.score + 1.0),
            };
            entry.score += contribution;
        }
    }

    let mut results: Vec<FusedResult> = if matches!(method, FusionMethod::Geometric) {
        scores
            .into_values()
            .map(|mut r| {
                r.score = r.score.exp();
                r
            })
            .collect()
    } else {
        scores.into_values().collect()
    };

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then_with(|| {
                primary_rank
                    .get(&a.rowid)
                    .unwrap_or(&usize::MAX)
                    .cmp(primary_rank.get(&b.rowid).unwrap_or(&usize::MAX))
            })
            .then_with(|| a.rowid.cmp(&b.rowid))
    });

    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}

fn weight_for(branch: Branch, weights: BranchWeights) -> f32 {
    match branch {
        Branch::Fts => weights.fts,
        Branch::Vector => weights.vector,
        Branch::Like => weights.like,
    }
}

/// Deduplicates by rowid, keeping the entry with the best score. `fuse`
/// already aggregates by rowid internally, so this is mostly relevant when
/// merging fused results from separate calls (e.g. paginated re-runs).
pub fn dedup(mut results: Vec<FusedResult>) -> Vec<FusedResult> {
    let mut seen = std::collections::HashSet::new();
    results.retain(|r| seen.insert(r.rowid));
    results
}

#[derive(Debug, Clone)]
pub struct Snippet {
    pub text: String,
    pub highlighted: String,
}

/// Extracts up to `max_fragments` windows of `context_words` words around
/// each case-insensitive occurrence of any term in `query_terms`, wrapping
/// matches in `delim_open`/`delim_close`. Operates on `char` boundaries
/// throughout so multibyte text never gets sliced mid-codepoint.
pub fn snippets(
    content: &str,
    query_terms: &[&str],
    max_fragments: usize,
    context_words: usize,
    delim_open: &str,
    delim_close: &str,
    max_len: usize,
) -> Vec<Snippet> {
    if query_terms.is_empty() || content.is_empty() {
        return Vec::new();
    }

    let words: Vec<&str> = content.split_whitespace().collect();
    let lower_terms: Vec<String> = query_terms.iter().map(|t| t.to_lowercase()).collect();

    let mut fragments = Vec::new();
    let mut i = 0;
    while i < words.len() && fragments.len() < max_fragments {
        let word_lower = words[i].to_lowercase();
        let is_hit = lower_terms.iter().any(|t| word_lower.contains(t.as_str()));
        if is_hit {
            let start = i.saturating_sub(context_words);
            let end = (i + context_words + 1).min(words.len());
            let plain = words[start..end].join(" ");
            let highlighted = words[start..end]
                .iter()
                .map(|w| {
                    let lw = w.to_lowercase();
                    if lower_terms.iter().any(|t| lw.contains(t.as_str())) {
                        format!("{delim_open}{w}{delim_close}")
                    } else {
                        w.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");

            fragments.push(Snippet {
                text: truncate_chars(&plain, max_len),
                highlighted: truncate_chars(&highlighted, max_len + delim_open.len() + delim_close.len()),
            });
            i = end;
        } else {
            i += 1;
        }
    }
    fragments
}

fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{truncated}…")
    }
}

pub fn truncate_to_limit(mut results: Vec<FusedResult>, limit: usize, offset: usize) -> Vec<FusedResult> {
    if offset >= results.len() {
        return Vec::new();
    }
    results.drain(..offset);
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn min_max_normalizes_to_zero_one_range() {
        let mut hits = vec![
            BranchHit { rowid: 1, score: 10.0 },
            BranchHit { rowid: 2, score: 0.0 },
            BranchHit { rowid: 3, score: 5.0 },
        ];
        normalize(&mut hits, NormalizationMethod::MinMax);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 0.0);
        assert!((hits[2].score - 0.5).abs() < 1e-6);
    }

    /// Spec §8 scenario S3: FTS ranks [1,2,3], vector ranks [3,1,2], equal
    /// weights, k=60 -> ordering [doc2, doc1, doc3].
    #[test]
    fn rrf_reproduces_hand_computed_ordering_from_spec_scenario_s3() {
        let fts = vec![
            BranchHit { rowid: 1, score: 3.0 },
            BranchHit { rowid: 2, score: 2.0 },
            BranchHit { rowid: 3, score: 1.0 },
        ];
        let vector = vec![
            BranchHit { rowid: 1, score: 1.0 },
            BranchHit { rowid: 2, score: 3.0 },
            BranchHit { rowid: 3, score: 2.0 },
        ];
        let weights = BranchWeights {
            fts: 0.5,
            vector: 0.5,
            like: 0.0,
        };
        let results = fuse(
            &[(Branch::Fts, fts), (Branch::Vector, vector)],
            weights,
            FusionMethod::ReciprocalRank,
        );
        let order: Vec<i64> = results.iter().map(|r| r.rowid).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn rrf_with_zero_vector_weight_matches_fts_only_ordering() {
        let fts = vec![
            BranchHit { rowid: 10, score: 5.0 },
            BranchHit { rowid: 20, score: 3.0 },
        ];
        let vector = vec![
            BranchHit { rowid: 20, score: 9.0 },
            BranchHit { rowid: 10, score: 1.0 },
        ];
        let weights = BranchWeights {
            fts: 1.0,
            vector: 0.0,
            like: 0.0,
        };
        let hybrid = fuse(
            &[(Branch::Fts, fts.clone()), (Branch::Vector, vector)],
            weights,
            FusionMethod::ReciprocalRank,
        );
        let fts_only = fuse(&[(Branch::Fts, fts)], weights, FusionMethod::ReciprocalRank);
        let hybrid_order: Vec<i64> = hybrid.iter().map(|r| r.rowid).collect();
        let fts_order: Vec<i64> = fts_only.iter().map(|r| r.rowid).collect();
        assert_eq!(hybrid_order, fts_order);
    }

    #[test]
    fn snippets_highlight_matches_and_respect_fragment_cap() {
        let content = "the quick brown fox jumps over the lazy dog near the river";
        let frags = snippets(content, &["fox", "river"], 2, 2, "**", "**", 80);
        assert_eq!(frags.len(), 2);
        assert!(frags[0].highlighted.contains("**fox**"));
        assert!(frags[1].highlighted.contains("**river**"));
    }

    #[test]
    fn snippets_handle_multibyte_text_without_panicking() {
        let content = "Пушкин писал великую русскую литературу и поэзию";
        let frags = snippets(content, &["литературу"], 1, 2, "[", "]", 50);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].highlighted.contains("[литературу]"));
    }

    #[test]
    fn dedup_keeps_first_occurrence_per_rowid() {
        let results = vec![
            FusedResult {
                rowid: 1,
                score: 0.9,
                ..Default::default()
            },
            FusedResult {
                rowid: 1,
                score: 0.1,
                ..Default::default()
            },
        ];
        assert_eq!(dedup(results).len(), 1);
    }

    #[test]
    fn truncate_to_limit_applies_offset_then_limit() {
        let results: Vec<FusedResult> = (0..10)
            .map(|i| FusedResult {
                rowid: i,
                ..Default::default()
            })
            .collect();
        let page = truncate_to_limit(results, 3, 2);
        assert_eq!(page.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    fn hits_for(rowids: &[i64]) -> Vec<BranchHit> {
        rowids
            .iter()
            .enumerate()
            .map(|(i, &rowid)| BranchHit { rowid, score: (rowids.len() - i) as f32 })
            .collect()
    }

    proptest! {
        /// Property: reciprocal-rank fusion scores are always positive when
        /// every branch weight is positive, regardless of how the two
        /// branches' rowid lists overlap or how long they are.
        #[test]
        fn prop_rrf_scores_positive(
            fts_ids in prop::collection::vec(0i64..50, 0..20),
            vector_ids in prop::collection::vec(0i64..50, 0..20),
        ) {
            let weights = BranchWeights { fts: 0.5, vector: 0.5, like: 0.0 };
            let results = fuse(
                &[(Branch::Fts, hits_for(&fts_ids)), (Branch::Vector, hits_for(&vector_ids))],
                weights,
                FusionMethod::ReciprocalRank,
            );
            for r in &results {
                prop_assert!(r.score > 0.0, "RRF score should be positive: {}", r.score);
            }
        }

        /// Property: fused results are always sorted by descending score.
        #[test]
        fn prop_fuse_output_is_sorted_descending(
            fts_ids in prop::collection::vec(0i64..50, 0..20),
            vector_ids in prop::collection::vec(0i64..50, 0..20),
        ) {
            let weights = BranchWeights { fts: 0.5, vector: 0.5, like: 0.0 };
            let results = fuse(
                &[(Branch::Fts, hits_for(&fts_ids)), (Branch::Vector, hits_for(&vector_ids))],
                weights,
                FusionMethod::ReciprocalRank,
            );
            for w in results.windows(2) {
                prop_assert!(w[0].score >= w[1].score);
            }
        }

        /// Property: snippet extraction never panics on arbitrary Unicode
        /// text, and every emitted snippet round-trips as valid UTF-8 of no
        /// more than `max_len` characters.
        #[test]
        fn prop_snippets_never_panic_on_arbitrary_unicode(
            content in any::<String>(),
            term in "[a-z]{1,8}",
        ) {
            let frags = snippets(&content, &[term.as_str()], 3, 4, "[", "]", 50);
            for f in &frags {
                prop_assert!(f.text.chars().count() <= 51);
            }
        }
    }
}
