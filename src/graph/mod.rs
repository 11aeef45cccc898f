//! Immutable graph store shared by every role.
//!
//! A [`Dataset`] holds the CSR adjacency, node features and labels, the
//! train/valid/test splits and the derived degree arrays. It is built
//! once, wrapped in an `Arc` and never mutated afterwards, so samplers,
//! cache managers and extractors read it without locking.

mod alias;
mod generator;
mod import;
mod loader;

use std::sync::OnceLock;

use serde::Serialize;

use crate::types::{Context, GnnError, NodeId, Result};

pub use alias::WeightTables;
pub use generator::SyntheticGraph;
pub use import::import_edge_csv;
pub use loader::{
    ALIAS_TABLE_FILE, CACHE_BY_DEGREE_FILE, CACHE_BY_HEURISTIC_FILE, EDGE_WEIGHT_FILE, FEAT_FILE,
    INDICES_FILE, INDPTR_FILE, IN_DEGREE_FILE, LABEL_FILE, META_FILE, OUT_DEGREE_FILE,
    PROB_TABLE_FILE, TEST_SET_FILE, TRAIN_SET_FILE, VALID_SET_FILE,
};
pub(crate) use loader::write_ranking;

/// Scalar sizes recorded in `meta.txt`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatasetMeta {
    /// Node count.
    pub num_node: usize,
    /// Edge count.
    pub num_edge: usize,
    /// Feature width.
    pub feat_dim: usize,
    /// Label classes.
    pub num_class: usize,
}

/// CSR graph with features, labels and splits.
pub struct Dataset {
    meta: DatasetMeta,
    indptr: Vec<u32>,
    indices: Vec<NodeId>,
    weights: Option<Vec<f32>>,
    weight_tables: OnceLock<WeightTables>,
    in_degrees: Vec<u32>,
    out_degrees: Vec<u32>,
    feat: Vec<f32>,
    label: Vec<i64>,
    train_set: Vec<NodeId>,
    valid_set: Vec<NodeId>,
    test_set: Vec<NodeId>,
    stored_rankings: StoredRankings,
    ctx: Context,
}

/// Cache rankings shipped with a dataset directory.
#[derive(Clone, Debug, Default)]
pub(crate) struct StoredRankings {
    pub(crate) by_degree: Option<Vec<NodeId>>,
    pub(crate) by_heuristic: Option<Vec<NodeId>>,
}

impl Dataset {
    /// Sizes of the dataset.
    pub fn meta(&self) -> DatasetMeta {
        self.meta
    }

    /// Node count.
    pub fn num_nodes(&self) -> usize {
        self.meta.num_node
    }

    /// Edge count.
    pub fn num_edges(&self) -> usize {
        self.meta.num_edge
    }

    /// Feature width.
    pub fn feat_dim(&self) -> usize {
        self.meta.feat_dim
    }

    /// Label classes.
    pub fn num_class(&self) -> usize {
        self.meta.num_class
    }

    /// Memory domain the arrays live in.
    pub fn context(&self) -> Context {
        self.ctx
    }

    /// CSR row offsets, `num_nodes + 1` entries.
    pub fn indptr(&self) -> &[u32] {
        &self.indptr
    }

    /// CSR column array.
    pub fn indices(&self) -> &[NodeId] {
        &self.indices
    }

    /// Neighbors of `node`.
    #[inline]
    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        let (start, end) = self.row_range(node);
        &self.indices[start..end]
    }

    /// Index range of `node`'s row in [`Self::indices`].
    #[inline]
    pub fn row_range(&self, node: NodeId) -> (usize, usize) {
        let v = node as usize;
        (self.indptr[v] as usize, self.indptr[v + 1] as usize)
    }

    /// Per-edge weights, when the dataset has them.
    pub fn edge_weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    /// Alias and prefix-sum tables, built on first use.
    pub fn weight_tables(&self) -> &WeightTables {
        self.weight_tables
            .get_or_init(|| WeightTables::build(&self.indptr, self.weights.as_deref()))
    }

    /// Times each node occurs as a neighbor.
    pub fn in_degrees(&self) -> &[u32] {
        &self.in_degrees
    }

    /// Row length of each node.
    pub fn out_degrees(&self) -> &[u32] {
        &self.out_degrees
    }

    /// Row-major `num_nodes x feat_dim` feature matrix.
    pub fn features(&self) -> &[f32] {
        &self.feat
    }

    /// Feature row of `node`.
    #[inline]
    pub fn feature_row(&self, node: NodeId) -> &[f32] {
        let dim = self.meta.feat_dim;
        let start = node as usize * dim;
        &self.feat[start..start + dim]
    }

    /// Label per node.
    pub fn labels(&self) -> &[i64] {
        &self.label
    }

    /// Training seeds.
    pub fn train_set(&self) -> &[NodeId] {
        &self.train_set
    }

    /// Validation nodes.
    pub fn valid_set(&self) -> &[NodeId] {
        &self.valid_set
    }

    /// Test nodes.
    pub fn test_set(&self) -> &[NodeId] {
        &self.test_set
    }

    /// True when `node` names a node of this graph.
    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        (node as usize) < self.meta.num_node
    }

    pub(crate) fn stored_rankings(&self) -> &StoredRankings {
        &self.stored_rankings
    }

    /// Summary statistics for reporting.
    pub fn stats(&self) -> DatasetStats {
        let max_out = self.out_degrees.iter().copied().max().unwrap_or(0);
        let max_in = self.in_degrees.iter().copied().max().unwrap_or(0);
        let isolated = self.out_degrees.iter().filter(|d| **d == 0).count();
        let avg = if self.meta.num_node == 0 {
            0.0
        } else {
            self.meta.num_edge as f64 / self.meta.num_node as f64
        };
        DatasetStats {
            meta: self.meta,
            num_train: self.train_set.len(),
            num_valid: self.valid_set.len(),
            num_test: self.test_set.len(),
            avg_degree: avg,
            max_in_degree: max_in,
            max_out_degree: max_out,
            zero_out_degree_nodes: isolated,
            weighted: self.weights.is_some(),
            feature_bytes: self.feat.len() * std::mem::size_of::<f32>(),
        }
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("meta", &self.meta)
            .field("train", &self.train_set.len())
            .field("weighted", &self.weights.is_some())
            .finish()
    }
}

/// Dataset summary printed by `gnnpipe inspect`.
#[derive(Clone, Debug, Serialize)]
pub struct DatasetStats {
    /// Sizes.
    pub meta: DatasetMeta,
    /// Train split size.
    pub num_train: usize,
    /// Validation split size.
    pub num_valid: usize,
    /// Test split size.
    pub num_test: usize,
    /// Edges per node.
    pub avg_degree: f64,
    /// Largest in-degree.
    pub max_in_degree: u32,
    /// Largest row length.
    pub max_out_degree: u32,
    /// Rows with no neighbors.
    pub zero_out_degree_nodes: usize,
    /// Whether edge weights are present.
    pub weighted: bool,
    /// Bytes of the feature matrix.
    pub feature_bytes: usize,
}

/// Assembles a [`Dataset`] from in-memory parts.
#[derive(Clone, Debug, Default)]
pub struct DatasetBuilder {
    num_node: usize,
    edges: Vec<(NodeId, NodeId, f32)>,
    weighted: bool,
    feat_dim: usize,
    feat: Option<Vec<f32>>,
    num_class: usize,
    label: Option<Vec<i64>>,
    train_set: Vec<NodeId>,
    valid_set: Vec<NodeId>,
    test_set: Vec<NodeId>,
}

impl DatasetBuilder {
    /// Starts a graph with `num_node` nodes and no edges.
    pub fn new(num_node: usize) -> Self {
        Self {
            num_node,
            ..Self::default()
        }
    }

    /// Adds `neighbor` to `node`'s row.
    pub fn edge(mut self, node: NodeId, neighbor: NodeId) -> Self {
        self.edges.push((node, neighbor, 1.0));
        self
    }

    /// Adds many unit-weight edges.
    pub fn edges(mut self, edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        self.edges
            .extend(edges.into_iter().map(|(node, neighbor)| (node, neighbor, 1.0)));
        self
    }

    /// Adds a weighted edge and marks the graph weighted.
    pub fn weighted_edge(mut self, node: NodeId, neighbor: NodeId, weight: f32) -> Self {
        self.weighted = true;
        self.edges.push((node, neighbor, weight));
        self
    }

    /// Row-major feature matrix of width `dim`.
    pub fn features(mut self, dim: usize, data: Vec<f32>) -> Self {
        self.feat_dim = dim;
        self.feat = Some(data);
        self
    }

    /// Zero feature matrix of width `dim`.
    pub fn feature_dim(mut self, dim: usize) -> Self {
        self.feat_dim = dim;
        self.feat = None;
        self
    }

    /// Labels and class count.
    pub fn labels(mut self, num_class: usize, labels: Vec<i64>) -> Self {
        self.num_class = num_class;
        self.label = Some(labels);
        self
    }

    /// Training seeds.
    pub fn train_set(mut self, ids: Vec<NodeId>) -> Self {
        self.train_set = ids;
        self
    }

    /// Validation nodes.
    pub fn valid_set(mut self, ids: Vec<NodeId>) -> Self {
        self.valid_set = ids;
        self
    }

    /// Test nodes.
    pub fn test_set(mut self, ids: Vec<NodeId>) -> Self {
        self.test_set = ids;
        self
    }

    /// Validates the parts and builds the CSR.
    pub fn build(mut self) -> Result<Dataset> {
        let n = self.num_node;
        if n >= NodeId::MAX as usize {
            return Err(GnnError::InvalidArgument(format!("{n} nodes exceed the id space")));
        }
        if let Some(&(u, v, _)) = self
            .edges
            .iter()
            .find(|(u, v, _)| *u as usize >= n || *v as usize >= n)
        {
            return Err(GnnError::InvalidArgument(format!(
                "edge ({u}, {v}) references a node outside [0, {n})"
            )));
        }
        if let Some(&(u, v, w)) = self.edges.iter().find(|(_, _, w)| !(w.is_finite() && *w >= 0.0)) {
            return Err(GnnError::InvalidArgument(format!(
                "edge ({u}, {v}) has invalid weight {w}"
            )));
        }
        self.edges.sort_by_key(|(u, _, _)| *u);
        let mut indptr = vec![0u32; n + 1];
        for (u, _, _) in &self.edges {
            indptr[*u as usize + 1] += 1;
        }
        for i in 0..n {
            indptr[i + 1] += indptr[i];
        }
        let indices: Vec<NodeId> = self.edges.iter().map(|(_, v, _)| *v).collect();
        let weights = self
            .weighted
            .then(|| self.edges.iter().map(|(_, _, w)| *w).collect::<Vec<f32>>());
        let feat = match self.feat.take() {
            Some(feat) => feat,
            None => vec![0.0; n * self.feat_dim],
        };
        let label = self.label.take().unwrap_or_else(|| vec![0; n]);
        let meta = DatasetMeta {
            num_node: n,
            num_edge: indices.len(),
            feat_dim: self.feat_dim,
            num_class: self.num_class,
        };
        Dataset::from_parts(
            meta,
            DatasetParts {
                indptr,
                indices,
                weights,
                prob_alias: None,
                in_degrees: None,
                out_degrees: None,
                feat,
                label,
                train_set: self.train_set,
                valid_set: self.valid_set,
                test_set: self.test_set,
                rankings: StoredRankings::default(),
                ctx: Context::cpu(),
            },
        )
    }
}

/// Raw arrays gathered by the builder or the loader.
pub(crate) struct DatasetParts {
    pub(crate) indptr: Vec<u32>,
    pub(crate) indices: Vec<NodeId>,
    pub(crate) weights: Option<Vec<f32>>,
    pub(crate) prob_alias: Option<(Vec<f32>, Vec<u32>)>,
    pub(crate) in_degrees: Option<Vec<u32>>,
    pub(crate) out_degrees: Option<Vec<u32>>,
    pub(crate) feat: Vec<f32>,
    pub(crate) label: Vec<i64>,
    pub(crate) train_set: Vec<NodeId>,
    pub(crate) valid_set: Vec<NodeId>,
    pub(crate) test_set: Vec<NodeId>,
    pub(crate) rankings: StoredRankings,
    pub(crate) ctx: Context,
}

impl Dataset {
    pub(crate) fn from_parts(meta: DatasetMeta, parts: DatasetParts) -> Result<Self> {
        let n = meta.num_node;
        check_len(INDPTR_FILE, parts.indptr.len(), n + 1)?;
        check_len(INDICES_FILE, parts.indices.len(), meta.num_edge)?;
        check_len(FEAT_FILE, parts.feat.len(), n * meta.feat_dim)?;
        check_len(LABEL_FILE, parts.label.len(), n)?;
        if parts.indptr.first().copied().unwrap_or(0) != 0
            || parts.indptr.windows(2).any(|w| w[0] > w[1])
            || parts.indptr.last().map(|v| *v as usize) != Some(meta.num_edge)
        {
            return Err(GnnError::dataset(INDPTR_FILE, "offsets are not a valid CSR prefix"));
        }
        if parts.indices.iter().any(|v| *v as usize >= n) {
            return Err(GnnError::dataset(INDICES_FILE, "neighbor id out of range"));
        }
        if let Some(weights) = &parts.weights {
            check_len(EDGE_WEIGHT_FILE, weights.len(), meta.num_edge)?;
        }
        for (file, set) in [
            (TRAIN_SET_FILE, &parts.train_set),
            (VALID_SET_FILE, &parts.valid_set),
            (TEST_SET_FILE, &parts.test_set),
        ] {
            if set.iter().any(|v| *v as usize >= n) {
                return Err(GnnError::dataset(file, "node id out of range"));
            }
        }
        let out_degrees = match parts.out_degrees {
            Some(out) => {
                check_len(OUT_DEGREE_FILE, out.len(), n)?;
                out
            }
            None => parts.indptr.windows(2).map(|w| w[1] - w[0]).collect(),
        };
        let in_degrees = match parts.in_degrees {
            Some(inn) => {
                check_len(IN_DEGREE_FILE, inn.len(), n)?;
                inn
            }
            None => {
                let mut inn = vec![0u32; n];
                for v in &parts.indices {
                    inn[*v as usize] += 1;
                }
                inn
            }
        };
        let weight_tables = OnceLock::new();
        if let Some((prob, alias)) = parts.prob_alias {
            check_len(PROB_TABLE_FILE, prob.len(), meta.num_edge)?;
            check_len(ALIAS_TABLE_FILE, alias.len(), meta.num_edge)?;
            let tables = WeightTables::from_alias(&parts.indptr, parts.weights.as_deref(), prob, alias);
            let _ = weight_tables.set(tables);
        }
        for (file, ranking) in [
            (CACHE_BY_DEGREE_FILE, &parts.rankings.by_degree),
            (CACHE_BY_HEURISTIC_FILE, &parts.rankings.by_heuristic),
        ] {
            if let Some(ranking) = ranking {
                check_len(file, ranking.len(), n)?;
            }
        }
        Ok(Self {
            meta,
            indptr: parts.indptr,
            indices: parts.indices,
            weights: parts.weights,
            weight_tables,
            in_degrees,
            out_degrees,
            feat: parts.feat,
            label: parts.label,
            train_set: parts.train_set,
            valid_set: parts.valid_set,
            test_set: parts.test_set,
            stored_rankings: parts.rankings,
            ctx: parts.ctx,
        })
    }
}

fn check_len(file: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(GnnError::dataset(
            file,
            format!("expected {expected} entries, found {actual}"),
        ));
    }
    Ok(())
}
