//! Layered neighborhood sampling.
//!
//! A [`Sampler`] turns a batch of seed nodes into a stack of [`Block`]s,
//! one per GNN layer, with block 0 the outermost layer (closest to the
//! raw features). The per-layer neighbor choice is delegated to a
//! [`NeighborSampler`]; [`Sampler::new`] picks one from the configured
//! [`SampleType`].

mod dedup;
mod khop;
mod random_walk;
mod remap;
mod shuffle;
mod weighted;

use std::sync::Arc;
use std::time::Instant;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::config::{RunConfig, SampleType};
use crate::graph::Dataset;
use crate::profiler::{LogStepItem, Profiler};
use crate::types::{BatchKey, GnnError, NodeId, Result};

pub use dedup::Dedup;
pub use khop::UniformKHop;
pub use random_walk::{RandomWalk, RandomWalkParams};
pub use remap::OrderedIdTable;
pub use shuffle::{steps_per_epoch, EpochPlan, EpochShuffler, ShuffledBatch};
pub use weighted::{WeightedKHop, WeightedMethod};

/// Edges chosen for one layer, in global ids.
#[derive(Clone, Debug, Default)]
pub struct RawLayer {
    /// Neighbor end of each edge.
    pub src: Vec<NodeId>,
    /// Destination end of each edge.
    pub dst: Vec<NodeId>,
    /// Per-edge weight; empty for unweighted layers.
    pub weight: Vec<f32>,
    /// Seconds spent ranking or collapsing edges after the raw draw.
    pub post_secs: f64,
}

impl RawLayer {
    /// Appends an unweighted edge.
    #[inline]
    pub fn push(&mut self, src: NodeId, dst: NodeId) {
        self.src.push(src);
        self.dst.push(dst);
    }

    /// Appends a weighted edge.
    #[inline]
    pub fn push_weighted(&mut self, src: NodeId, dst: NodeId, weight: f32) {
        self.src.push(src);
        self.dst.push(dst);
        self.weight.push(weight);
    }

    /// Edge count.
    pub fn len(&self) -> usize {
        self.src.len()
    }

    /// True when no edge was chosen.
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Drops every edge, keeping capacity.
    pub fn clear(&mut self) {
        self.src.clear();
        self.dst.clear();
        self.weight.clear();
        self.post_secs = 0.0;
    }
}

/// Per-layer neighbor selection strategy.
pub trait NeighborSampler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Chooses up to `fanout` neighbors for every node of `dst`,
    /// appending `(neighbor, dst)` edges to `out`. Nodes without
    /// eligible neighbors contribute nothing.
    fn sample_layer(
        &self,
        graph: &Dataset,
        dst: &[NodeId],
        fanout: usize,
        rng: &mut dyn RngCore,
        out: &mut RawLayer,
    );

    /// Whether `out.weight` is filled.
    fn emits_weights(&self) -> bool {
        false
    }
}

/// Builds the strategy for `kind`.
pub fn neighbor_sampler(kind: SampleType, config: &RunConfig) -> Box<dyn NeighborSampler> {
    match kind {
        SampleType::KHop => Box::new(UniformKHop::without_replacement()),
        SampleType::KHopReplace => Box::new(UniformKHop::with_replacement()),
        SampleType::KHopDedup => Box::new(Dedup::new(UniformKHop::with_replacement(), "khop-dedup")),
        SampleType::WeightedKHop => Box::new(WeightedKHop::new(WeightedMethod::Alias)),
        SampleType::WeightedKHopPrefix => Box::new(WeightedKHop::new(WeightedMethod::Prefix)),
        SampleType::WeightedKHopDedup => Box::new(Dedup::new(
            WeightedKHop::new(WeightedMethod::Alias),
            "weighted-khop-dedup",
        )),
        SampleType::RandomWalk => Box::new(RandomWalk::new(RandomWalkParams {
            walk_length: config.random_walk_length,
            restart_prob: config.random_walk_restart_prob,
            num_walk: config.num_random_walk,
        })),
    }
}

/// One layer of a sampled batch, in global ids.
///
/// `dst_nodes` is always a prefix of `src_nodes`.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// Input frontier of the layer, deduplicated.
    pub src_nodes: Vec<NodeId>,
    /// Nodes this layer computes.
    pub dst_nodes: Vec<NodeId>,
    /// Neighbor end of each edge.
    pub edge_src: Vec<NodeId>,
    /// Destination end of each edge.
    pub edge_dst: Vec<NodeId>,
    /// Edge weights for weighted samplers.
    pub weights: Option<Vec<f32>>,
}

impl Block {
    /// Source node count.
    pub fn num_src(&self) -> usize {
        self.src_nodes.len()
    }

    /// Destination node count.
    pub fn num_dst(&self) -> usize {
        self.dst_nodes.len()
    }

    /// Edge count.
    pub fn num_edges(&self) -> usize {
        self.edge_src.len()
    }
}

/// Seeds plus the block stack sampled for them.
#[derive(Clone, Debug)]
pub struct SampledBatch {
    /// Batch address.
    pub key: BatchKey,
    /// Blocks, outermost layer first.
    pub blocks: Vec<Block>,
}

impl SampledBatch {
    /// Nodes whose features the batch needs, in local-index order.
    pub fn input_nodes(&self) -> &[NodeId] {
        self.blocks.first().map_or(&[], |b| &b.src_nodes)
    }

    /// Seeds of the batch after deduplication.
    pub fn output_nodes(&self) -> &[NodeId] {
        self.blocks.last().map_or(&[], |b| &b.dst_nodes)
    }
}

/// Checks that each block's destinations are the next block's sources.
pub fn check_layer_consistency(blocks: &[Block]) -> Result<()> {
    for (i, pair) in blocks.windows(2).enumerate() {
        if pair[0].dst_nodes != pair[1].src_nodes {
            return Err(GnnError::InvalidArgument(format!(
                "block {i} destinations differ from block {} sources",
                i + 1
            )));
        }
    }
    for (i, block) in blocks.iter().enumerate() {
        if !block.src_nodes.starts_with(&block.dst_nodes) {
            return Err(GnnError::InvalidArgument(format!(
                "block {i} destinations are not a prefix of its sources"
            )));
        }
    }
    Ok(())
}

/// Samples block stacks for one worker.
pub struct Sampler {
    graph: Arc<Dataset>,
    kind: SampleType,
    kernel: Box<dyn NeighborSampler>,
    fanout: Vec<usize>,
    add_self_loop: bool,
    rng: ChaCha8Rng,
    table: OrderedIdTable,
    scratch: RawLayer,
    profiler: Option<Arc<Profiler>>,
}

impl Sampler {
    /// Sampler for `config`, seeded with the run seed mixed with `worker`.
    pub fn new(graph: Arc<Dataset>, config: &RunConfig, worker: u64) -> Result<Self> {
        validate_fanout(&config.fanout)?;
        let kernel = neighbor_sampler(config.sample_type, config);
        let seed = config.seed ^ worker.wrapping_mul(0xA24B_AED4_963E_E407);
        Ok(Self {
            graph,
            kind: config.sample_type,
            kernel,
            fanout: config.fanout.clone(),
            add_self_loop: config.add_self_loop,
            rng: ChaCha8Rng::seed_from_u64(seed),
            table: OrderedIdTable::default(),
            scratch: RawLayer::default(),
            profiler: None,
        })
    }

    /// Records layer timings into `profiler`.
    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Algorithm in use.
    pub fn kind(&self) -> SampleType {
        self.kind
    }

    /// Configured fanout, outermost layer first.
    pub fn fanout(&self) -> &[usize] {
        &self.fanout
    }

    /// Graph being sampled.
    pub fn graph(&self) -> &Arc<Dataset> {
        &self.graph
    }

    /// Samples `seeds` with the configured fanout.
    pub fn sample(&mut self, key: BatchKey, seeds: &[NodeId]) -> Result<SampledBatch> {
        let fanout = std::mem::take(&mut self.fanout);
        let blocks = self.sample_with(key, seeds, &fanout);
        self.fanout = fanout;
        Ok(SampledBatch {
            key,
            blocks: blocks?,
        })
    }

    /// Samples `seeds` with an explicit per-layer fanout.
    pub fn sample_with(
        &mut self,
        key: BatchKey,
        seeds: &[NodeId],
        fanout: &[usize],
    ) -> Result<Vec<Block>> {
        validate_fanout(fanout)?;
        if seeds.is_empty() {
            return Err(GnnError::EmptySeedSet);
        }
        if let Some(bad) = seeds.iter().find(|s| !self.graph.contains(**s)) {
            return Err(GnnError::InvalidArgument(format!(
                "seed {bad} outside [0, {})",
                self.graph.num_nodes()
            )));
        }
        let started = Instant::now();
        self.table.reset();
        self.table.extend(seeds);
        let weighted = self.kernel.emits_weights();
        let mut blocks = Vec::with_capacity(fanout.len());
        for layer in (0..fanout.len()).rev() {
            let dst = self.table.nodes().to_vec();
            self.scratch.clear();
            let t0 = Instant::now();
            self.kernel.sample_layer(
                &self.graph,
                &dst,
                fanout[layer],
                &mut self.rng,
                &mut self.scratch,
            );
            if self.add_self_loop {
                for &v in &dst {
                    if weighted {
                        self.scratch.push_weighted(v, v, 1.0);
                    } else {
                        self.scratch.push(v, v);
                    }
                }
            }
            let sample_secs = t0.elapsed().as_secs_f64();
            let t1 = Instant::now();
            self.table.extend(&self.scratch.src);
            let populate_secs = t1.elapsed().as_secs_f64();
            trace!(
                key = %key,
                layer,
                kernel = self.kernel.name(),
                num_dst = dst.len(),
                num_edges = self.scratch.len(),
                num_src = self.table.len(),
                "sampler.layer.done"
            );
            self.log(key, sample_secs, self.scratch.post_secs, populate_secs);
            blocks.push(Block {
                src_nodes: self.table.nodes().to_vec(),
                dst_nodes: dst,
                edge_src: self.scratch.src.clone(),
                edge_dst: self.scratch.dst.clone(),
                weights: weighted.then(|| self.scratch.weight.clone()),
            });
        }
        blocks.reverse();
        if let Some(profiler) = &self.profiler {
            profiler.log_step_add(key, LogStepItem::CoreSampleTime, started.elapsed().as_secs_f64());
            profiler.log_step(key, LogStepItem::NumNode, self.table.len() as f64);
            let edges: usize = blocks.iter().map(Block::num_edges).sum();
            profiler.log_step(key, LogStepItem::NumSample, edges as f64);
        }
        Ok(blocks)
    }

    fn log(&self, key: BatchKey, sample_secs: f64, post_secs: f64, populate_secs: f64) {
        let Some(profiler) = &self.profiler else {
            return;
        };
        let coo_secs = (sample_secs - post_secs).max(0.0);
        match self.kind {
            SampleType::RandomWalk => {
                profiler.log_step_add(key, LogStepItem::WalkSampleCooTime, coo_secs);
                profiler.log_step_add(key, LogStepItem::WalkTopKTime, post_secs);
            }
            SampleType::KHopDedup | SampleType::WeightedKHopDedup => {
                profiler.log_step_add(key, LogStepItem::KHopSampleCooTime, coo_secs);
                profiler.log_step_add(key, LogStepItem::KHopDedupTime, post_secs);
            }
            _ => profiler.log_step_add(key, LogStepItem::KHopSampleCooTime, sample_secs),
        }
        profiler.log_step_add(key, LogStepItem::RemapPopulateTime, populate_secs);
        profiler.log_step_add(key, LogStepItem::IdRemapTime, populate_secs);
    }
}

fn validate_fanout(fanout: &[usize]) -> Result<()> {
    if fanout.is_empty() {
        return Err(GnnError::InvalidConfig("fanout must name at least one layer".into()));
    }
    match fanout.iter().position(|f| *f == 0) {
        Some(layer) => Err(GnnError::InvalidFanout { layer, fanout: 0 }),
        None => Ok(()),
    }
}
