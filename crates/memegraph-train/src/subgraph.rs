//! Subgraph construction from per-example modality embeddings.
//!
//! Every example contributes two nodes, laid out interleaved so example `i`
//! owns rows `2i` (image) and `2i + 1` (text):
//!
//! ```text
//!   row:    0      1      2      3     ...
//!   node:  img_0  txt_0  img_1  txt_1  ...
//!   graph:   0      0      1      1    ...
//! ```
//!
//! The classifier graph only links each image to its own caption. VGAE
//! graphs add cross-example edges chosen by a [`ConnectivityRule`].


use candle_core::Tensor;
use memegraph_nn::{EdgeIndex, GraphBatch};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How examples in a VGAE batch are wired together.
///
/// All rules keep the image/text pair edge of each example, never add
/// self-loops, and emit both directions of every edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectivityRule {
    /// Only `img_i <-> txt_i`.
    Paired,
    /// Pair edges plus `img_i <-> img_j` and `txt_i <-> txt_j` whenever
    /// examples `i` and `j` share a label.
    #[default]
    LabelConditioned,
    /// Pair edges plus `img_i <-> img_j` for the `k` nearest neighbours of
    /// each image by cosine similarity of the raw image features.
    FeatureKnn { k: usize },
}

/// Classifier graph: one image node and one text node per example, joined by
/// a bidirectional edge.
pub fn build_subgraph(image_embeddings: &Tensor, text_embeddings: &Tensor) -> Result<GraphBatch> {
    let (x, b) = interleave(image_embeddings, text_embeddings)?;
    let graph = GraphBatch::new(x, paired_edges(b), node_graph(b))?;
    Ok(graph)
}

/// VGAE graph over projected image/text embeddings, wired by `rule`.
///
/// `image_features` are the pre-projection image embeddings `(B, F)`; only
/// [`ConnectivityRule::FeatureKnn`] reads them. `labels` has one entry per
/// example; only [`ConnectivityRule::LabelConditioned`] reads it.
pub fn build_vgae_subgraph(
    image_embeddings: &Tensor,
    image_features: &Tensor,
    text_embeddings: &Tensor,
    labels: &[u32],
    rule: ConnectivityRule,
) -> Result<GraphBatch> {
    let (x, b) = interleave(image_embeddings, text_embeddings)?;
    if labels.len() != b {
        return Err(dim_mismatch("labels", b, labels.len()));
    }
    let (feature_rows, _) = image_features.dims2()?;
    if feature_rows != b {
        return Err(dim_mismatch("image_features rows", b, feature_rows));
    }

    let mut edges = paired_edges(b);
    match rule {
        ConnectivityRule::Paired => {}
        ConnectivityRule::LabelConditioned => {
            for i in 0..b {
                for j in (i + 1)..b {
                    if labels[i] == labels[j] {
                        edges.push_undirected(2 * i, 2 * j);
                        edges.push_undirected(2 * i + 1, 2 * j + 1);
                    }
                }
            }
        }
        ConnectivityRule::FeatureKnn { k } => {
            let features = image_features.to_dtype(candle_core::DType::F32)?.to_vec2::<f32>()?;
            for (i, j) in knn_pairs(&features, k) {
                edges.push_undirected(2 * i, 2 * j);
            }
        }
    }
    edges.dedup();

    Ok(GraphBatch::new(x, edges, node_graph(b))?)
}

/// Row-interleave two `(B, D)` matrices into `(2B, D)`.
fn interleave(image: &Tensor, text: &Tensor) -> Result<(Tensor, usize)> {
    let (b_img, d_img) = image.dims2()?;
    let (b_txt, d_txt) = text.dims2()?;
    if d_img != d_txt {
        return Err(dim_mismatch("text embedding width", d_img, d_txt));
    }
    if b_img != b_txt {
        return Err(dim_mismatch("text embedding rows", b_img, b_txt));
    }
    let x = Tensor::stack(&[image, text], 1)?.reshape((2 * b_img, d_img))?;
    Ok((x, b_img))
}

fn paired_edges(b: usize) -> EdgeIndex {
    let mut edges = EdgeIndex::new();
    for i in 0..b {
        edges.push_undirected(2 * i, 2 * i + 1);
    }
    edges
}

fn node_graph(b: usize) -> Vec<usize> {
    (0..b).flat_map(|i| [i, i]).collect()
}

/// `(i, j)` for each `i` and its `k` most cosine-similar rows `j != i`.
/// Ties go to the lower index. Non-finite similarities rank last.
fn knn_pairs(features: &[Vec<f32>], k: usize) -> Vec<(usize, usize)> {
    let norms: Vec<f32> = features
        .iter()
        .map(|f| f.iter().map(|v| v * v).sum::<f32>().sqrt())
        .collect();

    let cosine = |a: usize, b: usize| -> f32 {
        let dot: f32 = features[a].iter().zip(&features[b]).map(|(x, y)| x * y).sum();
        let denom = norms[a] * norms[b];
        if !(dot.is_finite() && denom.is_finite()) {
            f32::NEG_INFINITY
        } else if denom > 1e-12 {
            dot / denom
        } else {
            0.0
        }
    };

    let mut pairs = Vec::new();
    for i in 0..features.len() {
        let mut scored: Vec<(usize, f32)> = (0..features.len())
            .filter(|&j| j != i)
            .map(|j| (j, cosine(i, j)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        pairs.extend(scored.into_iter().take(k).map(|(j, _)| (i, j)));
    }
    pairs
}

fn dim_mismatch(context: &'static str, expected: usize, got: usize) -> crate::Error {
    memegraph_nn::Error::DimensionMismatch {
        context,
        expected,
        got,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use candle_core::{DType, Device};

    fn embeddings(b: usize, d: usize, offset: f32) -> Tensor {
        let data: Vec<f32> = (0..b * d).map(|v| v as f32 + offset).collect();
        Tensor::from_vec(data, (b, d), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_single_example_is_two_nodes_one_edge_pair() {
        let img = embeddings(1, 4, 0.0);
        let txt = embeddings(1, 4, 100.0);
        let g = build_subgraph(&img, &txt).unwrap();

        assert_eq!(g.num_nodes(), 2);
        assert_eq!(g.edge_index.as_slice(), &[(0, 1), (1, 0)]);
        let x = g.x.to_vec2::<f32>().unwrap();
        assert_eq!(x[0], vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(x[1], vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn test_batch_interleaves_rows() {
        let img = embeddings(3, 2, 0.0);
        let txt = embeddings(3, 2, 100.0);
        let g = build_subgraph(&img, &txt).unwrap();

        assert_eq!(g.num_nodes(), 6);
        assert_eq!(g.num_graphs, 3);
        let x = g.x.to_vec2::<f32>().unwrap();
        assert_eq!(x[2], vec![2.0, 3.0]); // img_1
        assert_eq!(x[3], vec![102.0, 103.0]); // txt_1
        assert!(g.edge_index.iter().all(|(s, d)| s / 2 == d / 2));
    }

    #[test]
    fn test_mismatched_width_fails() {
        let img = embeddings(2, 4, 0.0);
        let txt = embeddings(2, 3, 0.0);
        let err = build_subgraph(&img, &txt).unwrap_err();
        assert!(matches!(
            err,
            Error::Nn(memegraph_nn::Error::DimensionMismatch { expected: 4, got: 3, .. })
        ));
    }

    #[test]
    fn test_label_conditioned_links_same_label() {
        let img = embeddings(3, 2, 0.0);
        let txt = embeddings(3, 2, 10.0);
        let feats = Tensor::zeros((3, 5), DType::F32, &Device::Cpu).unwrap();
        let g = build_vgae_subgraph(&img, &feats, &txt, &[1, 0, 1], ConnectivityRule::LabelConditioned)
            .unwrap();

        let edges = g.edge_index.to_set();
        assert!(edges.contains(&(0, 4)) && edges.contains(&(4, 0)));
        assert!(edges.contains(&(1, 5)) && edges.contains(&(5, 1)));
        assert!(!edges.contains(&(0, 2)));
        // 3 pair edges + 2 label edges, both directions.
        assert_eq!(g.edge_index.len(), 10);
        assert!(g.edge_index.is_symmetric());
    }

    #[test]
    fn test_paired_rule_ignores_labels() {
        let img = embeddings(2, 2, 0.0);
        let txt = embeddings(2, 2, 10.0);
        let feats = Tensor::zeros((2, 5), DType::F32, &Device::Cpu).unwrap();
        let g = build_vgae_subgraph(&img, &feats, &txt, &[0, 0], ConnectivityRule::Paired).unwrap();
        assert_eq!(g.edge_index.len(), 4);
    }

    #[test]
    fn test_feature_knn_uses_raw_features() {
        let img = embeddings(3, 2, 0.0);
        let txt = embeddings(3, 2, 10.0);
        // Rows 0 and 2 point the same way, row 1 is orthogonal.
        let feats = Tensor::new(&[[1f32, 0.0], [0.0, 1.0], [2.0, 0.1]], &Device::Cpu).unwrap();
        let g = build_vgae_subgraph(&img, &feats, &txt, &[0, 1, 0], ConnectivityRule::FeatureKnn { k: 1 })
            .unwrap();

        let edges = g.edge_index.to_set();
        assert!(edges.contains(&(0, 4)) && edges.contains(&(4, 0)));
        assert!(!g.edge_index.has_self_loops());
        assert!(g.edge_index.is_symmetric());
    }

    #[test]
    fn test_feature_knn_tolerates_non_finite_features() {
        let img = embeddings(4, 2, 0.0);
        let txt = embeddings(4, 2, 10.0);
        let feats = Tensor::new(
            &[[1f32, 0.0], [f32::NAN, 1.0], [f32::INFINITY, 0.0], [2.0, 0.1]],
            &Device::Cpu,
        )
        .unwrap();
        let g = build_vgae_subgraph(&img, &feats, &txt, &[0, 1, 0, 1], ConnectivityRule::FeatureKnn { k: 1 })
            .unwrap();

        // Row 0's nearest finite neighbour is row 3.
        let edges = g.edge_index.to_set();
        assert!(edges.contains(&(0, 6)));
        assert!(g.edge_index.is_symmetric());
        assert!(!g.edge_index.has_self_loops());
    }

    #[test]
    fn test_label_count_must_match() {
        let img = embeddings(2, 2, 0.0);
        let txt = embeddings(2, 2, 0.0);
        let feats = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(build_vgae_subgraph(&img, &feats, &txt, &[0], ConnectivityRule::Paired).is_err());
    }
}
