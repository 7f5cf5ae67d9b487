//! Negative edge sampling for link prediction.
//!
//! Negatives are drawn uniformly from the complement of the true edge set:
//! pairs `(u, v)` with `u != v` that are not edges. When the request is a
//! large share of the complement, the complement is enumerated and shuffled
//! instead of rejection sampled.
//!
//! # Complexity
//! O(num_samples) expected for sparse graphs, O(N^2) when enumerating.

use std::collections::HashSet;

use memegraph_nn::EdgeIndex;
use rand::prelude::*;

/// Rejection attempts allowed per requested sample before enumerating.
const ATTEMPTS_PER_SAMPLE: usize = 32;

/// Sample up to `num_samples` distinct non-edges over `num_nodes` nodes.
///
/// Never returns a self-loop, an existing edge, or a duplicate. Returns
/// fewer than `num_samples` pairs only when the complement is smaller.
pub fn negative_sampling<R: Rng>(
    edge_index: &EdgeIndex,
    num_nodes: usize,
    num_samples: usize,
    rng: &mut R,
) -> EdgeIndex {
    let positives = edge_index.to_set();
    let existing = positives.iter().filter(|&&(s, d)| s != d && s < num_nodes && d < num_nodes).count();
    let complement = (num_nodes * num_nodes.saturating_sub(1)).saturating_sub(existing);
    let wanted = num_samples.min(complement);
    if wanted == 0 {
        return EdgeIndex::new();
    }

    // Dense request: enumerate the complement and take a random subset.
    if wanted * 2 >= complement {
        let mut all: Vec<(usize, usize)> = (0..num_nodes)
            .flat_map(|s| (0..num_nodes).map(move |d| (s, d)))
            .filter(|&(s, d)| s != d && !positives.contains(&(s, d)))
            .collect();
        all.shuffle(rng);
        all.truncate(wanted);
        return EdgeIndex::from_pairs(all);
    }

    let mut chosen = HashSet::with_capacity(wanted);
    let mut out = Vec::with_capacity(wanted);
    let mut attempts = 0;
    while out.len() < wanted && attempts < wanted * ATTEMPTS_PER_SAMPLE {
        attempts += 1;
        let s = rng.gen_range(0..num_nodes);
        let d = rng.gen_range(0..num_nodes);
        if s == d || positives.contains(&(s, d)) || !chosen.insert((s, d)) {
            continue;
        }
        out.push((s, d));
    }

    if out.len() < wanted {
        // Unlucky streak: finish from the remaining complement.
        let mut rest: Vec<(usize, usize)> = (0..num_nodes)
            .flat_map(|s| (0..num_nodes).map(move |d| (s, d)))
            .filter(|p| p.0 != p.1 && !positives.contains(p) && !chosen.contains(p))
            .collect();
        rest.shuffle(rng);
        out.extend(rest.into_iter().take(wanted - out.len()));
    }

    EdgeIndex::from_pairs(out)
}
