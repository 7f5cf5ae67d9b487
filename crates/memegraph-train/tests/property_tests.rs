//! Property-based tests for the training-side invariants.
//!
//! - Built subgraphs only reference valid nodes, carry no self-loops and are
//!   symmetric under every connectivity rule
//! - Negative samples stay in the complement of the true edge set
//! - Accuracy stays in [0, 100] and ranking metrics in [0, 1]
//! - Non-finite scores leave ranking metrics undefined instead of hanging

use proptest::prelude::*;

use candle_core::{Device, Tensor};
use memegraph_train::{
    average_precision_score, build_subgraph, build_vgae_subgraph, negative_sampling, roc_auc_score,
    ConnectivityRule, LinkPredictionMetrics, RunningMetrics,
};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

fn arb_rule() -> impl Strategy<Value = ConnectivityRule> {
    prop_oneof![
        Just(ConnectivityRule::Paired),
        Just(ConnectivityRule::LabelConditioned),
        (1usize..4).prop_map(|k| ConnectivityRule::FeatureKnn { k }),
    ]
}

/// `(B, D)` tensors of given shape from a flat vector.
fn tensor(values: &[f32], rows: usize, cols: usize) -> Tensor {
    Tensor::from_vec(values[..rows * cols].to_vec(), (rows, cols), &Device::Cpu).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn subgraph_edges_are_in_bounds(b in 1usize..10, d in 1usize..6) {
        let values: Vec<f32> = (0..b * d).map(|v| v as f32).collect();
        let g = build_subgraph(&tensor(&values, b, d), &tensor(&values, b, d)).unwrap();

        prop_assert_eq!(g.num_nodes(), 2 * b);
        prop_assert_eq!(g.edge_index.len(), 2 * b);
        for (s, t) in g.edge_index.iter() {
            prop_assert!(s < 2 * b && t < 2 * b);
        }
    }

    #[test]
    fn vgae_subgraph_is_symmetric_and_loop_free(
        labels in prop::collection::vec(0u32..3, 1..10),
        features in prop::collection::vec(-1.0f32..1.0, 40),
        rule in arb_rule(),
    ) {
        let b = labels.len();
        let emb: Vec<f32> = (0..b * 3).map(|v| v as f32).collect();
        let g = build_vgae_subgraph(
            &tensor(&emb, b, 3),
            &tensor(&features, b, 4),
            &tensor(&emb, b, 3),
            &labels,
            rule,
        )
        .unwrap();

        prop_assert!(g.edge_index.is_symmetric());
        prop_assert!(!g.edge_index.has_self_loops());
        prop_assert_eq!(g.edge_index.to_set().len(), g.edge_index.len());
        prop_assert!(g.edge_index.max_node().unwrap() < 2 * b);
    }

    #[test]
    fn negatives_avoid_true_edges(
        n in 2usize..15,
        pairs in prop::collection::vec((0usize..15, 0usize..15), 0..40),
        want in 0usize..60,
        seed in any::<u64>(),
    ) {
        let edges: memegraph_nn::EdgeIndex = pairs.into_iter().filter(|&(a, b)| a < n && b < n).collect();
        let neg = negative_sampling(&edges, n, want, &mut XorShiftRng::seed_from_u64(seed));

        let pos = edges.to_set();
        let non_loop_pos = pos.iter().filter(|(a, b)| a != b).count();
        prop_assert!(neg.len() <= want);
        prop_assert!(neg.len() <= n * (n - 1) - non_loop_pos);
        prop_assert_eq!(neg.to_set().len(), neg.len());
        for (a, b) in neg.iter() {
            prop_assert!(a != b);
            prop_assert!(a < n && b < n);
            prop_assert!(!pos.contains(&(a, b)));
        }
    }

    #[test]
    fn accuracy_is_a_percentage(
        rows in prop::collection::vec((0u32..3, 0u32..3), 0..50),
        loss in 0.0f64..10.0,
    ) {
        let (preds, labels): (Vec<u32>, Vec<u32>) = rows.into_iter().unzip();
        let mut m = RunningMetrics::default();
        m.record(loss, &preds, &labels);
        prop_assert!((0.0..=100.0).contains(&m.accuracy()));
        prop_assert!(m.correct <= m.total);
    }

    #[test]
    fn ranking_metrics_are_probabilities(
        rows in prop::collection::vec((0u8..2, 0.0f32..1.0), 2..60),
    ) {
        let (labels, scores): (Vec<u8>, Vec<f32>) = rows.into_iter().unzip();
        match (roc_auc_score(&labels, &scores), average_precision_score(&labels, &scores)) {
            (Some(auc), Some(ap)) => {
                prop_assert!((0.0..=1.0).contains(&auc));
                prop_assert!(ap > 0.0 && ap <= 1.0 + 1e-12);
            }
            (None, None) => {
                prop_assert!(labels.iter().all(|&y| y == labels[0]));
            }
            _ => prop_assert!(false, "AUC and AP disagree on degeneracy"),
        }
    }

    #[test]
    fn non_finite_scores_are_skipped(
        rows in prop::collection::vec((0u8..2, arb_score()), 2..60),
    ) {
        let (labels, scores): (Vec<u8>, Vec<f32>) = rows.into_iter().unzip();
        let finite = scores.iter().all(|s| s.is_finite());
        let auc = roc_auc_score(&labels, &scores);
        let ap = average_precision_score(&labels, &scores);
        if !finite {
            prop_assert_eq!(auc, None);
            prop_assert_eq!(ap, None);
        }

        let mut m = LinkPredictionMetrics::default();
        m.record(&labels, &scores);
        prop_assert_eq!(m.auc.len() + m.skipped, 1);
        prop_assert_eq!(m.non_finite, usize::from(!finite));
    }
}

/// Scores in [0, 1) with NaN and infinities mixed in.
fn arb_score() -> impl Strategy<Value = f32> {
    prop_oneof![
        6 => 0.0f32..1.0,
        2 => Just(f32::NAN),
        1 => Just(f32::INFINITY),
        1 => Just(f32::NEG_INFINITY),
    ]
}
