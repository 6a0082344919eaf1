//! Hybrid search: fuse BM25 and TF-IDF/semantic results, optionally
//! pulled wider by one hop of graph expansion (spec §4.H).
//!
//! Fusion algorithms are lifted almost verbatim from the teacher's
//! `search/hybrid.rs` (`reciprocal_rank_fusion`, `linear_combination`),
//! generalized from `String` document keys to the `i64` memory ids
//! this crate uses.

use std::collections::HashMap;

use crate::config::FusionWeights;

/// Reciprocal Rank Fusion: `score(d) = sum(1 / (k + rank(d)))` across
/// every ranked list `d` appears in. `k` (spec default 60) dampens how
/// much a single very-high rank dominates the combined score.
pub fn reciprocal_rank_fusion(result_lists: &[&[(i64, f64)]], k: f64) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for list in result_lists {
        for (rank, (id, _)) in list.iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += 1.0 / (k + rank as f64 + 1.0);
        }
    }
    let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Weighted linear fusion: normalize each list to its own max score,
/// then combine with the supplied weights.
pub fn weighted_fusion(lists: &[(&[(i64, f64)], f64)]) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for (results, weight) in lists {
        let max_score = results.first().map(|(_, s)| *s).unwrap_or(1.0).max(1e-6);
        for (id, score) in results.iter() {
            *scores.entry(*id).or_insert(0.0) += (score / max_score) * weight;
        }
    }
    let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Min-max normalize a ranked list's scores to `[0,1]` (spec §4.E/§4.H:
/// every strategy's scores are normalized before fusion). A backend can
/// legitimately return negative raw scores (cosine similarity lives in
/// `[-1,1]`); fusing those directly against BM25's unbounded-positive
/// scores would let a low semantic match drag a document's combined
/// score below anything a normalized formula could produce. A
/// single-element or constant-score list normalizes to all `1.0`.
pub fn min_max_normalize(scores: &[(i64, f64)]) -> Vec<(i64, f64)> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    scores
        .iter()
        .map(|(id, s)| if range > 1e-9 { (*id, (s - min) / range) } else { (*id, 1.0) })
        .collect()
}

/// Where a result's score came from, surfaced to callers so they can
/// explain a hit (spec §4.H result contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    Lexical,
    Semantic,
    Graph,
    Multiple,
}

/// One fused, explainable search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub score: f64,
    pub origin: MatchOrigin,
}

/// Fuse BM25, semantic, and (optionally) graph-expansion results into
/// a single ranked, explained list.
pub struct HybridFusion {
    weights: FusionWeights,
    rrf_k: f64,
}

impl HybridFusion {
    pub fn new(weights: FusionWeights) -> Self {
        Self { weights, rrf_k: 60.0 }
    }

    /// RRF across whichever of the three lists are non-empty. RRF only
    /// consumes each list's rank order, not its raw scores, so no
    /// normalization is needed here.
    pub fn fuse_rrf(
        &self,
        lexical: &[(i64, f64)],
        semantic: &[(i64, f64)],
        graph: &[(i64, f64)],
    ) -> Vec<SearchHit> {
        let lists: Vec<&[(i64, f64)]> =
            [lexical, semantic, graph].into_iter().filter(|l| !l.is_empty()).collect();
        let fused = reciprocal_rank_fusion(&lists, self.rrf_k);
        self.attach_origins(fused, lexical, semantic, graph)
    }

    /// Weighted linear fusion using `FusionWeights`. Each list is
    /// min-max normalized to `[0,1]` first so a backend with a
    /// different native score range (cosine in `[-1,1]` vs. BM25's
    /// unbounded-positive scale) can't dominate or drag down the fused
    /// score out of proportion to its weight.
    pub fn fuse_weighted(
        &self,
        lexical: &[(i64, f64)],
        semantic: &[(i64, f64)],
        graph: &[(i64, f64)],
    ) -> Vec<SearchHit> {
        let lexical_norm = min_max_normalize(lexical);
        let semantic_norm = min_max_normalize(semantic);
        let graph_norm = min_max_normalize(graph);
        let lists: Vec<(&[(i64, f64)], f64)> = vec![
            (lexical_norm.as_slice(), self.weights.bm25),
            (semantic_norm.as_slice(), self.weights.semantic),
            (graph_norm.as_slice(), self.weights.graph),
        ]
        .into_iter()
        .filter(|(l, _)| !l.is_empty())
        .collect();
        let fused = weighted_fusion(&lists);
        self.attach_origins(fused, lexical, semantic, graph)
    }

    fn attach_origins(
        &self,
        fused: Vec<(i64, f64)>,
        lexical: &[(i64, f64)],
        semantic: &[(i64, f64)],
        graph: &[(i64, f64)],
    ) -> Vec<SearchHit> {
        let lexical_ids: std::collections::HashSet<i64> = lexical.iter().map(|(id, _)| *id).collect();
        let semantic_ids: std::collections::HashSet<i64> = semantic.iter().map(|(id, _)| *id).collect();
        let graph_ids: std::collections::HashSet<i64> = graph.iter().map(|(id, _)| *id).collect();
        fused
            .into_iter()
            .map(|(id, score)| {
                let in_lexical = lexical_ids.contains(&id);
                let in_semantic = semantic_ids.contains(&id);
                let in_graph = graph_ids.contains(&id);
                let hit_count = [in_lexical, in_semantic, in_graph].iter().filter(|b| **b).count();
                let origin = if hit_count > 1 {
                    MatchOrigin::Multiple
                } else if in_lexical {
                    MatchOrigin::Lexical
                } else if in_semantic {
                    MatchOrigin::Semantic
                } else {
                    MatchOrigin::Graph
                };
                SearchHit { id, score, origin }
            })
            .collect()
    }
}

/// Truncate a content preview to `max_chars`, breaking on a char
/// boundary and appending an ellipsis when truncated (spec §4.H).
pub fn content_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_rewards_items_in_multiple_lists() {
        let lexical: Vec<(i64, f64)> = vec![(1, 3.0), (2, 2.0), (3, 1.0)];
        let semantic: Vec<(i64, f64)> = vec![(2, 0.9), (1, 0.8), (4, 0.7)];
        let fused = reciprocal_rank_fusion(&[&lexical, &semantic], 60.0);
        let top_two: Vec<i64> = fused.iter().take(2).map(|(id, _)| *id).collect();
        assert!(top_two.contains(&1));
        assert!(top_two.contains(&2));
    }

    #[test]
    fn weighted_fusion_favors_the_higher_weighted_list() {
        let a: Vec<(i64, f64)> = vec![(1, 1.0)];
        let b: Vec<(i64, f64)> = vec![(2, 1.0)];
        let fused = weighted_fusion(&[(&a, 0.9), (&b, 0.1)]);
        let score_of = |id: i64| fused.iter().find(|(x, _)| *x == id).unwrap().1;
        assert!(score_of(1) > score_of(2));
    }

    #[test]
    fn hybrid_fusion_marks_multi_source_hits() {
        let fusion = HybridFusion::new(FusionWeights::default());
        let lexical = vec![(1, 3.0)];
        let semantic = vec![(1, 0.9), (2, 0.5)];
        let hits = fusion.fuse_rrf(&lexical, &semantic, &[]);
        let hit_one = hits.iter().find(|h| h.id == 1).unwrap();
        assert_eq!(hit_one.origin, MatchOrigin::Multiple);
        let hit_two = hits.iter().find(|h| h.id == 2).unwrap();
        assert_eq!(hit_two.origin, MatchOrigin::Semantic);
    }

    #[test]
    fn content_preview_truncates_long_content() {
        let long = "a".repeat(200);
        let preview = content_preview(&long, 50);
        assert_eq!(preview.chars().count(), 51);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn content_preview_leaves_short_content_untouched() {
        assert_eq!(content_preview("short", 50), "short");
    }

    #[test]
    fn min_max_normalize_maps_range_onto_zero_one() {
        let scores = vec![(1, -0.5), (2, 0.0), (3, 1.0)];
        let normalized = min_max_normalize(&scores);
        let at = |id: i64| normalized.iter().find(|(x, _)| *x == id).unwrap().1;
        assert_eq!(at(1), 0.0);
        assert_eq!(at(3), 1.0);
        assert!((at(2) - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn min_max_normalize_constant_scores_all_become_one() {
        let scores = vec![(1, 0.4), (2, 0.4)];
        let normalized = min_max_normalize(&scores);
        assert!(normalized.iter().all(|(_, s)| *s == 1.0));
    }

    #[test]
    fn weighted_fusion_normalizes_negative_semantic_scores_before_combining() {
        let fusion = HybridFusion::new(FusionWeights { bm25: 0.5, semantic: 0.5, graph: 0.0 });
        let lexical = vec![(1, 5.0), (2, 1.0)];
        // A raw cosine backend can legitimately return a negative score;
        // without normalization this would drag id 2 below zero instead
        // of contributing a small positive share of the semantic weight.
        let semantic = vec![(2, -0.8), (1, -0.9)];
        let hits = fusion.fuse_weighted(&lexical, &semantic, &[]);
        assert!(hits.iter().all(|h| h.score >= 0.0));
    }
}
