//! Reciprocal Rank Fusion of independently ranked candidate lists.
//!
//! A chunk at 1-based rank `r` in a list contributes `1 / (k + r)` to its
//! fused score; contributions are summed across lists, so chunks found by
//! both the dense and the sparse search rise above single-source hits.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::models::{Candidate, Chunk, RetrievalSet, ScoreScheme};

pub const DEFAULT_RRF_K: f64 = 60.0;
pub const DEFAULT_PREFETCH_LIMIT: usize = 20;
pub const DEFAULT_FUSION_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfConfig {
    pub k: f64,
    pub limit: usize,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            limit: DEFAULT_FUSION_LIMIT,
        }
    }
}

#[inline]
pub fn rank_contribution(k: f64, rank: usize) -> f64 {
    1.0 / (k + rank as f64)
}

#[inline]
fn sanitize_k(k: f64) -> f64 {
    if k.is_finite() && k >= 0.0 {
        k
    } else {
        DEFAULT_RRF_K
    }
}

struct FusedEntry {
    chunk: Chunk,
    score: f64,
    lists: usize,
    best_rank: usize,
}

/// Fuses a dense-order and a sparse-order list.
pub fn fuse(dense: &[Candidate], sparse: &[Candidate], config: &RrfConfig) -> RetrievalSet {
    fuse_many(&[dense, sparse], config)
}

/// Fuses any number of ranked lists. Ranks are taken from list position; a
/// chunk repeated inside one list only counts at its first position.
///
/// Exact score ties are ordered by: present in more lists, better single
/// rank, chunk id.
#[instrument(skip_all, fields(lists = lists.len(), k = config.k, limit = config.limit))]
pub fn fuse_many(lists: &[&[Candidate]], config: &RrfConfig) -> RetrievalSet {
    let k = sanitize_k(config.k);
    let capacity = lists.iter().map(|list| list.len()).sum();
    let mut entries: HashMap<&str, FusedEntry> = HashMap::with_capacity(capacity);

    for list in lists {
        let mut seen = HashSet::with_capacity(list.len());
        let mut rank = 0;
        for candidate in list.iter() {
            if !seen.insert(candidate.chunk.id.as_str()) {
                continue;
            }
            rank += 1;
            let contribution = rank_contribution(k, rank);

            entries
                .entry(candidate.chunk.id.as_str())
                .and_modify(|entry| {
                    entry.score += contribution;
                    entry.lists += 1;
                    entry.best_rank = entry.best_rank.min(rank);
                })
                .or_insert_with(|| FusedEntry {
                    chunk: candidate.chunk.clone(),
                    score: contribution,
                    lists: 1,
                    best_rank: rank,
                });
        }
    }

    let fused_count = entries.len();
    let mut fused: Vec<FusedEntry> = entries.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.lists.cmp(&a.lists))
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    let overlap_count = fused.iter().filter(|entry| entry.lists > 1).count();

    let candidates = fused
        .into_iter()
        .map(|entry| Candidate {
            chunk: entry.chunk,
            score: entry.score,
            rank: 0,
        })
        .collect();
    let set = RetrievalSet::new(candidates, ScoreScheme::Fusion, config.limit);

    debug!(fused_count, overlap_count, output_count = set.len(), "rrf fusion complete");
    set
}
