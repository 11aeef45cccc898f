use std::time::Instant;

use rand::RngCore;
use rustc_hash::FxHashMap;

use super::{NeighborSampler, RawLayer};
use crate::graph::Dataset;
use crate::types::NodeId;

/// Collapses repeated `(src, dst)` pairs of an inner sampler into one
/// edge whose weight is the summed multiplicity.
pub struct Dedup<S> {
    inner: S,
    name: &'static str,
}

impl<S: NeighborSampler> Dedup<S> {
    /// Wraps `inner`, reporting itself as `name`.
    pub fn new(inner: S, name: &'static str) -> Self {
        Self { inner, name }
    }
}

impl<S: NeighborSampler> NeighborSampler for Dedup<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn sample_layer(
        &self,
        graph: &Dataset,
        dst: &[NodeId],
        fanout: usize,
        rng: &mut dyn RngCore,
        out: &mut RawLayer,
    ) {
        let mut raw = RawLayer::default();
        self.inner.sample_layer(graph, dst, fanout, rng, &mut raw);
        let collapsing = Instant::now();
        collapse(&raw, out);
        out.post_secs += collapsing.elapsed().as_secs_f64();
    }

    fn emits_weights(&self) -> bool {
        true
    }
}

/// Appends the collapsed form of `raw` to `out`, keeping first-seen order.
pub(crate) fn collapse(raw: &RawLayer, out: &mut RawLayer) {
    let mut slots: FxHashMap<(NodeId, NodeId), usize> = FxHashMap::default();
    let base = out.len();
    for i in 0..raw.len() {
        let pair = (raw.src[i], raw.dst[i]);
        let w = raw.weight.get(i).copied().unwrap_or(1.0);
        match slots.get(&pair) {
            Some(&slot) => out.weight[slot] += w,
            None => {
                slots.insert(pair, out.len());
                out.push_weighted(pair.0, pair.1, w);
            }
        }
    }
    debug_assert!(out.len() - base <= raw.len());
}
