use serde::Serialize;

use crate::types::{BatchKey, Context, GnnError, NodeId, Result};

/// Row-major feature matrix tagged with the device it was produced for.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureTensor {
    /// Row count.
    pub rows: usize,
    /// Floats per row.
    pub dim: usize,
    /// `rows * dim` values.
    pub data: Vec<f32>,
    /// Device the tensor lives on.
    pub ctx: Context,
}

impl FeatureTensor {
    /// Zero-filled tensor.
    pub fn zeros(rows: usize, dim: usize, ctx: Context) -> Self {
        Self {
            rows,
            dim,
            data: vec![0.0; rows * dim],
            ctx,
        }
    }

    /// Row `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Size of `data` in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// One layer with edges in batch-local indices.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemappedBlock {
    /// Source node count.
    pub num_src: usize,
    /// Destination node count; destinations are sources `0..num_dst`.
    pub num_dst: usize,
    /// Local source index per edge.
    pub src: Vec<u32>,
    /// Local destination index per edge.
    pub dst: Vec<u32>,
    /// Edge weights for weighted samplers.
    pub weights: Option<Vec<f32>>,
}

impl RemappedBlock {
    /// Edge count.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Bytes of the edge arrays and weights.
    pub fn nbytes(&self) -> usize {
        let ids = (self.src.len() + self.dst.len()) * std::mem::size_of::<u32>();
        let weights = self
            .weights
            .as_ref()
            .map_or(0, |w| w.len() * std::mem::size_of::<f32>());
        ids + weights
    }
}

/// A training-ready batch.
#[derive(Clone, Debug)]
pub struct ExtractedBatch {
    /// Batch address.
    pub key: BatchKey,
    /// Global id of every feature row, in row order.
    pub input_nodes: Vec<NodeId>,
    /// Features of `input_nodes`.
    pub feat: FeatureTensor,
    /// Labels of the final layer's destination nodes.
    pub labels: Vec<i64>,
    /// Layers, outermost first.
    pub blocks: Vec<RemappedBlock>,
    /// Feature bytes served by the cache.
    pub hit_bytes: usize,
    /// Feature bytes fetched from host memory.
    pub miss_bytes: usize,
    /// All feature bytes; `hit_bytes + miss_bytes`.
    pub total_bytes: usize,
    /// Label bytes.
    pub label_bytes: usize,
    /// Bytes of `input_nodes`.
    pub id_bytes: usize,
    /// Bytes of every block's edge arrays.
    pub graph_bytes: usize,
}

impl ExtractedBatch {
    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    /// Layer `layer`, outermost first.
    pub fn block(&self, layer: usize) -> Result<&RemappedBlock> {
        self.blocks.get(layer).ok_or(GnnError::LayerOutOfRange {
            layer,
            num_layers: self.blocks.len(),
        })
    }

    /// Share of feature bytes served by the cache.
    pub fn hit_rate(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.hit_bytes as f64 / self.total_bytes as f64
        }
    }

    /// Checks byte accounting and local index bounds.
    pub fn check(&self) -> Result<()> {
        if self.hit_bytes + self.miss_bytes != self.total_bytes
            || self.total_bytes != self.feat.nbytes()
        {
            return Err(GnnError::InvalidArgument(format!(
                "batch {}: hit {} + miss {} bytes do not cover {} feature bytes",
                self.key,
                self.hit_bytes,
                self.miss_bytes,
                self.feat.nbytes()
            )));
        }
        if self.feat.rows != self.input_nodes.len() {
            return Err(GnnError::InvalidArgument(format!(
                "batch {}: {} feature rows for {} input nodes",
                self.key,
                self.feat.rows,
                self.input_nodes.len()
            )));
        }
        for (layer, block) in self.blocks.iter().enumerate() {
            let src_ok = block.src.iter().all(|s| (*s as usize) < block.num_src);
            let dst_ok = block.dst.iter().all(|d| (*d as usize) < block.num_dst);
            if !(src_ok && dst_ok) || block.num_dst > block.num_src {
                return Err(GnnError::InvalidArgument(format!(
                    "batch {}: block {layer} has edges outside its node range",
                    self.key
                )));
            }
        }
        for pair in self.blocks.windows(2) {
            if pair[0].num_dst != pair[1].num_src {
                return Err(GnnError::InvalidArgument(format!(
                    "batch {}: adjacent blocks disagree on frontier size",
                    self.key
                )));
            }
        }
        if let Some(last) = self.blocks.last() {
            if last.num_dst != self.labels.len() {
                return Err(GnnError::InvalidArgument(format!(
                    "batch {}: {} labels for {} outputs",
                    self.key,
                    self.labels.len(),
                    last.num_dst
                )));
            }
        }
        Ok(())
    }
}
