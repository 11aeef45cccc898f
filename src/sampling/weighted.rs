use rand::RngCore;

use super::{NeighborSampler, RawLayer};
use crate::graph::Dataset;
use crate::types::NodeId;

/// How a weighted draw locates its neighbor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WeightedMethod {
    /// O(1) alias table lookup.
    Alias,
    /// Binary search over the row's cumulative weights.
    Prefix,
}

/// Weight-proportional neighbor choice with replacement.
#[derive(Copy, Clone, Debug)]
pub struct WeightedKHop {
    method: WeightedMethod,
}

impl WeightedKHop {
    /// Sampler using `method`.
    pub fn new(method: WeightedMethod) -> Self {
        Self { method }
    }
}

impl NeighborSampler for WeightedKHop {
    fn name(&self) -> &'static str {
        match self.method {
            WeightedMethod::Alias => "weighted-khop",
            WeightedMethod::Prefix => "weighted-khop-prefix",
        }
    }

    fn sample_layer(
        &self,
        graph: &Dataset,
        dst: &[NodeId],
        fanout: usize,
        rng: &mut dyn RngCore,
        out: &mut RawLayer,
    ) {
        let tables = graph.weight_tables();
        let indices = graph.indices();
        for &v in dst {
            let (start, end) = graph.row_range(v);
            let len = end - start;
            // rows whose weights are all zero have no eligible neighbor
            if len == 0 || tables.row_total(start, len) <= 0.0 {
                continue;
            }
            for _ in 0..fanout {
                let offset = match self.method {
                    WeightedMethod::Alias => tables.sample_alias(start, len, rng),
                    WeightedMethod::Prefix => tables.sample_prefix(start, len, rng),
                };
                out.push(indices[start + offset], v);
            }
        }
    }
}
