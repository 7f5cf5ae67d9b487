//! Graph batches: node features, edge index and node-to-graph assignment.
//!
//! A [`GraphBatch`] is the unit every GNN in this crate consumes. Edges are
//! directed `(src, dst)` pairs; undirected connectivity is stored with both
//! directions present, the same convention PyG uses for `edge_index`.
//!
//! ```text
//!   x            (N, D)   one row per node
//!   edge_index   E pairs  every endpoint < N
//!   node_graph   N ids    which example each node belongs to
//! ```

use std::collections::HashSet;

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// Directed edge list over zero-based node indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeIndex {
    edges: Vec<(usize, usize)>,
}

impl EdgeIndex {
    /// Empty edge list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit directed pairs (duplicates are kept).
    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Self {
            edges: pairs.into_iter().collect(),
        }
    }

    /// Append a directed edge.
    pub fn push(&mut self, src: usize, dst: usize) {
        self.edges.push((src, dst));
    }

    /// Append both `(a, b)` and `(b, a)`.
    pub fn push_undirected(&mut self, a: usize, b: usize) {
        self.edges.push((a, b));
        self.edges.push((b, a));
    }

    /// Number of directed edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Iterate over `(src, dst)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    /// Edge pairs as a slice.
    pub fn as_slice(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Set view of the edges, for membership checks.
    pub fn to_set(&self) -> HashSet<(usize, usize)> {
        self.edges.iter().copied().collect()
    }

    /// Drop repeated edges, keeping first occurrences in order.
    pub fn dedup(&mut self) {
        let mut seen = HashSet::with_capacity(self.edges.len());
        self.edges.retain(|e| seen.insert(*e));
    }

    /// Largest node index referenced, if any.
    pub fn max_node(&self) -> Option<usize> {
        self.edges.iter().map(|&(s, d)| s.max(d)).max()
    }

    /// True if every `(a, b)` has a matching `(b, a)`.
    pub fn is_symmetric(&self) -> bool {
        let set = self.to_set();
        set.iter().all(|&(s, d)| set.contains(&(d, s)))
    }

    /// True if some edge starts and ends at the same node.
    pub fn has_self_loops(&self) -> bool {
        self.edges.iter().any(|&(s, d)| s == d)
    }

    /// Check every endpoint addresses an existing row.
    pub fn validate(&self, num_nodes: usize) -> Result<()> {
        for &(src, dst) in &self.edges {
            if src >= num_nodes || dst >= num_nodes {
                return Err(Error::EdgeOutOfBounds {
                    src,
                    dst,
                    num_nodes,
                });
            }
        }
        Ok(())
    }

    /// Source indices as a `(E,)` u32 tensor.
    pub fn sources(&self, device: &Device) -> Result<Tensor> {
        let src: Vec<u32> = self.edges.iter().map(|&(s, _)| s as u32).collect();
        Ok(Tensor::from_vec(src, self.edges.len(), device)?)
    }

    /// Target indices as a `(E,)` u32 tensor.
    pub fn targets(&self, device: &Device) -> Result<Tensor> {
        let dst: Vec<u32> = self.edges.iter().map(|&(_, d)| d as u32).collect();
        Ok(Tensor::from_vec(dst, self.edges.len(), device)?)
    }
}

impl FromIterator<(usize, usize)> for EdgeIndex {
    fn from_iter<I: IntoIterator<Item = (usize, usize)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Node features plus connectivity for one forward pass.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    /// Node feature matrix `(N, D)`.
    pub x: Tensor,
    /// Directed edges over `0..N`.
    pub edge_index: EdgeIndex,
    /// Graph (example) id of each node, length `N`.
    pub node_graph: Vec<usize>,
    /// Number of distinct graphs in the batch.
    pub num_graphs: usize,
}

impl GraphBatch {
    /// Assemble a batch, checking the node/edge/assignment invariants.
    pub fn new(x: Tensor, edge_index: EdgeIndex, node_graph: Vec<usize>) -> Result<Self> {
        let (num_nodes, _) = x.dims2()?;
        if node_graph.len() != num_nodes {
            return Err(Error::DimensionMismatch {
                context: "node_graph",
                expected: num_nodes,
                got: node_graph.len(),
            });
        }
        edge_index.validate(num_nodes)?;
        let num_graphs = node_graph.iter().max().map_or(0, |&g| g + 1);
        Ok(Self {
            x,
            edge_index,
            node_graph,
            num_graphs,
        })
    }

    /// Number of node rows.
    pub fn num_nodes(&self) -> usize {
        self.node_graph.len()
    }

    /// Device the node features live on.
    pub fn device(&self) -> &Device {
        self.x.device()
    }

    /// Symmetrically normalised adjacency for this batch.
    pub fn normalized_adjacency(&self) -> Result<Tensor> {
        gcn_norm(&self.edge_index, self.num_nodes(), self.x.device())
    }

    /// `(G, N)` averaging matrix: row `g` holds `1/|g|` at the nodes of graph `g`.
    ///
    /// `pool.matmul(h)` gives the per-graph mean of node states.
    pub fn mean_pool_matrix(&self) -> Result<Tensor> {
        let n = self.num_nodes();
        let g = self.num_graphs;
        let mut counts = vec![0usize; g];
        for &gid in &self.node_graph {
            counts[gid] += 1;
        }
        let mut data = vec![0f32; g * n];
        for (node, &gid) in self.node_graph.iter().enumerate() {
            data[gid * n + node] = 1.0 / counts[gid] as f32;
        }
        Ok(Tensor::from_vec(data, (g, n), self.x.device())?)
    }
}

/// GCN propagation matrix `D^{-1/2} (A + I) D^{-1/2}` as a dense `(N, N)` tensor.
///
/// Row `i` aggregates messages arriving at node `i`, so an edge `(src, dst)`
/// sets entry `[dst, src]`. Repeated edges count once. Batches here are a few
/// nodes per example, so the dense form is cheaper than a sparse scatter.
pub fn gcn_norm(edge_index: &EdgeIndex, num_nodes: usize, device: &Device) -> Result<Tensor> {
    edge_index.validate(num_nodes)?;
    let n = num_nodes;
    let mut adj = vec![0f32; n * n];
    for (src, dst) in edge_index.iter() {
        adj[dst * n + src] = 1.0;
    }
    for i in 0..n {
        adj[i * n + i] = 1.0;
    }

    let inv_sqrt_deg: Vec<f32> = (0..n)
        .map(|i| {
            let deg: f32 = adj[i * n..(i + 1) * n].iter().sum();
            1.0 / deg.sqrt()
        })
        .collect();

    for i in 0..n {
        for j in 0..n {
            adj[i * n + j] *= inv_sqrt_deg[i] * inv_sqrt_deg[j];
        }
    }

    Ok(Tensor::from_vec(adj, (n, n), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let edges = EdgeIndex::from_pairs([(0, 1), (1, 2)]);
        assert!(edges.validate(3).is_ok());
        let err = edges.validate(2).unwrap_err();
        assert!(matches!(err, Error::EdgeOutOfBounds { src: 1, dst: 2, num_nodes: 2 }));
    }

    #[test]
    fn test_source_and_target_tensors() {
        let edges = EdgeIndex::from_pairs([(0, 1), (1, 0), (2, 3)]);
        let src = edges.sources(&Device::Cpu).unwrap().to_vec1::<u32>().unwrap();
        let dst = edges.targets(&Device::Cpu).unwrap().to_vec1::<u32>().unwrap();
        assert_eq!(src, vec![0, 1, 2]);
        assert_eq!(dst, vec![1, 0, 3]);
    }

    #[test]
    fn test_dedup_and_symmetry() {
        let mut edges = EdgeIndex::new();
        edges.push_undirected(0, 1);
        edges.push_undirected(0, 1);
        edges.push(2, 3);
        edges.dedup();
        assert_eq!(edges.len(), 3);
        assert!(!edges.is_symmetric());
        edges.push(3, 2);
        assert!(edges.is_symmetric());
        assert!(!edges.has_self_loops());
    }

    #[test]
    fn test_gcn_norm_two_node_graph() {
        // A + I on a connected pair is all ones, degree 2 everywhere -> 0.5.
        let edges = EdgeIndex::from_pairs([(0, 1), (1, 0)]);
        let adj = gcn_norm(&edges, 2, &Device::Cpu).unwrap();
        for row in adj.to_vec2::<f32>().unwrap() {
            for v in row {
                assert!((v - 0.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_gcn_norm_isolated_node_keeps_self_loop() {
        let edges = EdgeIndex::from_pairs([(0, 1), (1, 0)]);
        let adj = gcn_norm(&edges, 3, &Device::Cpu).unwrap().to_vec2::<f32>().unwrap();
        assert!((adj[2][2] - 1.0).abs() < 1e-6);
        assert_eq!(adj[2][0], 0.0);
        assert_eq!(adj[0][2], 0.0);
    }

    #[test]
    fn test_graph_batch_checks_assignment_length() {
        let x = Tensor::zeros((4, 3), DType::F32, &Device::Cpu).unwrap();
        let err = GraphBatch::new(x, EdgeIndex::new(), vec![0, 0, 1]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn test_mean_pool_matrix() {
        let x = Tensor::zeros((4, 2), DType::F32, &Device::Cpu).unwrap();
        let batch = GraphBatch::new(x, EdgeIndex::new(), vec![0, 0, 1, 1]).unwrap();
        assert_eq!(batch.num_graphs, 2);
        let pool = batch.mean_pool_matrix().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(pool, vec![vec![0.5, 0.5, 0.0, 0.0], vec![0.0, 0.0, 0.5, 0.5]]);
    }
}
