use std::time::Instant;

use rand::{Rng, RngCore};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{NeighborSampler, RawLayer};
use crate::graph::Dataset;
use crate::types::NodeId;

/// Walk parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RandomWalkParams {
    /// Steps per walk.
    pub walk_length: usize,
    /// Probability of returning to the origin after each step.
    pub restart_prob: f64,
    /// Walks per destination node.
    pub num_walk: usize,
}

/// Random walk with restart; the most visited nodes become neighbors.
#[derive(Debug)]
pub struct RandomWalk {
    params: RandomWalkParams,
}

impl RandomWalk {
    /// Sampler with `params`.
    pub fn new(params: RandomWalkParams) -> Self {
        Self { params }
    }
}

impl NeighborSampler for RandomWalk {
    fn name(&self) -> &'static str {
        "random-walk"
    }

    fn sample_layer(
        &self,
        graph: &Dataset,
        dst: &[NodeId],
        fanout: usize,
        rng: &mut dyn RngCore,
        out: &mut RawLayer,
    ) {
        let mut visits: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut ranked: SmallVec<[(NodeId, u32); 32]> = SmallVec::new();
        for &origin in dst {
            if graph.neighbors(origin).is_empty() {
                continue;
            }
            visits.clear();
            for _ in 0..self.params.num_walk {
                let mut cur = origin;
                for _ in 0..self.params.walk_length {
                    let mut row = graph.neighbors(cur);
                    if row.is_empty() {
                        cur = origin;
                        row = graph.neighbors(origin);
                    }
                    let next = row[rng.gen_range(0..row.len())];
                    if next != origin {
                        *visits.entry(next).or_insert(0) += 1;
                    }
                    cur = if rng.gen::<f64>() < self.params.restart_prob {
                        origin
                    } else {
                        next
                    };
                }
            }
            let ranking = Instant::now();
            ranked.clear();
            ranked.extend(visits.iter().map(|(node, count)| (*node, *count)));
            ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for &(node, count) in ranked.iter().take(fanout) {
                out.push_weighted(node, origin, count as f32);
            }
            out.post_secs += ranking.elapsed().as_secs_f64();
        }
    }

    fn emits_weights(&self) -> bool {
        true
    }
}
