use rand::{Rng, RngCore};

use super::{NeighborSampler, RawLayer};
use crate::graph::Dataset;
use crate::types::NodeId;

/// Uniform neighbor choice.
#[derive(Copy, Clone, Debug)]
pub struct UniformKHop {
    replace: bool,
}

impl UniformKHop {
    /// Reservoir selection, each neighbor at most once.
    pub fn without_replacement() -> Self {
        Self { replace: false }
    }

    /// Independent draws, neighbors may repeat.
    pub fn with_replacement() -> Self {
        Self { replace: true }
    }
}

impl NeighborSampler for UniformKHop {
    fn name(&self) -> &'static str {
        if self.replace {
            "khop-replace"
        } else {
            "khop"
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
        let mut picked: Vec<NodeId> = Vec::with_capacity(fanout);
        for &v in dst {
            let row = graph.neighbors(v);
            if row.is_empty() {
                continue;
            }
            picked.clear();
            if self.replace {
                picked.extend((0..fanout).map(|_| row[rng.gen_range(0..row.len())]));
            } else if row.len() <= fanout {
                picked.extend_from_slice(row);
            } else {
                picked.extend_from_slice(&row[..fanout]);
                for (j, &candidate) in row.iter().enumerate().skip(fanout) {
                    let k = rng.gen_range(0..=j);
                    if k < fanout {
                        picked[k] = candidate;
                    }
                }
            }
            for &u in &picked {
                out.push(u, v);
            }
        }
    }
}
