use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::info;

use super::{Dataset, DatasetBuilder};
use crate::types::{GnnError, NodeId, Result};

#[derive(Debug, Deserialize)]
struct EdgeRecord {
    src: NodeId,
    dst: NodeId,
    #[serde(default)]
    weight: Option<f32>,
}

/// Builds a dataset from a CSV edge list with a `src,dst[,weight]` header.
///
/// Each record adds `src` to `dst`'s neighbor row. Nodes are numbered
/// `0..=max_id`; features are zero of width `feat_dim`, and a seeded
/// random `train_ratio` share of the nodes forms the train split.
pub fn import_edge_csv(
    path: impl AsRef<Path>,
    feat_dim: usize,
    train_ratio: f64,
    seed: u64,
) -> Result<Dataset> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;
    let mut edges = Vec::new();
    let mut weighted = false;
    let mut max_id: Option<NodeId> = None;
    for (row, record) in reader.deserialize::<EdgeRecord>().enumerate() {
        let record = record.map_err(|err| {
            GnnError::InvalidArgument(format!("{} row {}: {err}", path.display(), row + 1))
        })?;
        weighted |= record.weight.is_some();
        let top = record.src.max(record.dst);
        max_id = Some(max_id.map_or(top, |m| m.max(top)));
        edges.push(record);
    }
    let num_node = max_id.map_or(0, |m| m as usize + 1);
    let mut builder = DatasetBuilder::new(num_node).feature_dim(feat_dim);
    for record in &edges {
        builder = if weighted {
            builder.weighted_edge(record.dst, record.src, record.weight.unwrap_or(1.0))
        } else {
            builder.edge(record.dst, record.src)
        };
    }
    let mut ids: Vec<NodeId> = (0..num_node as NodeId).collect();
    ids.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let n_train = ((num_node as f64) * train_ratio.clamp(0.0, 1.0)).round() as usize;
    let valid = ids.split_off(n_train.min(ids.len()));
    let dataset = builder.train_set(ids).valid_set(valid).build()?;
    info!(
        path = %path.display(),
        num_node = dataset.num_nodes(),
        num_edge = dataset.num_edges(),
        weighted,
        "dataset.import.done"
    );
    Ok(dataset)
}
