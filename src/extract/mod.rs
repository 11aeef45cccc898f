//! Feature extraction and local id remapping.
//!
//! The [`Extractor`] turns a sampled block stack into an
//! [`ExtractedBatch`]: one feature row per unique input node, assembled
//! from cache hits and host fetches, plus every layer's edges rewritten
//! into batch-local indices.

mod batch;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::cache::{CacheClassification, CacheManager};
use crate::config::CachePolicy;
use crate::graph::Dataset;
use crate::profiler::{LogStepItem, Profiler};
use crate::sampling::{check_layer_consistency, Block, OrderedIdTable, SampledBatch};
use crate::types::{BatchKey, Context, GnnError, NodeId, Result};

pub use batch::{ExtractedBatch, FeatureTensor, RemappedBlock};

/// Builds training batches from sampled blocks.
pub struct Extractor {
    graph: Arc<Dataset>,
    cache: Option<Arc<CacheManager>>,
    ctx: Context,
    profiler: Option<Arc<Profiler>>,
    sanity_check: bool,
}

impl Extractor {
    /// Extractor writing tensors for `trainer_ctx`.
    ///
    /// Fails with [`GnnError::FeatureDimensionMismatch`] when the model
    /// expects a different feature width than the dataset stores.
    pub fn new(
        graph: Arc<Dataset>,
        cache: Option<Arc<CacheManager>>,
        trainer_ctx: Context,
        model_input_dim: Option<usize>,
    ) -> Result<Self> {
        if let Some(expected) = model_input_dim {
            if expected != graph.feat_dim() {
                return Err(GnnError::FeatureDimensionMismatch {
                    expected,
                    actual: graph.feat_dim(),
                });
            }
        }
        if let Some(cache) = &cache {
            if cache.feat_dim() != graph.feat_dim() {
                return Err(GnnError::FeatureDimensionMismatch {
                    expected: graph.feat_dim(),
                    actual: cache.feat_dim(),
                });
            }
        }
        Ok(Self {
            graph,
            cache,
            ctx: trainer_ctx,
            profiler: None,
            sanity_check: false,
        })
    }

    /// Records extraction timings and byte counts into `profiler`.
    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Checks every batch's invariants before returning it.
    pub fn with_sanity_check(mut self, enabled: bool) -> Self {
        self.sanity_check = enabled;
        self
    }

    /// Cache in use, if any.
    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Global index table of a block stack: the last layer's
    /// destinations first, then every layer's new sources from the
    /// innermost layer outwards.
    pub fn unique_nodes(blocks: &[Block]) -> OrderedIdTable {
        let capacity = blocks.first().map_or(0, Block::num_src);
        let mut table = OrderedIdTable::with_capacity(capacity);
        if let Some(last) = blocks.last() {
            table.extend(&last.dst_nodes);
        }
        for block in blocks.iter().rev() {
            table.extend(&block.src_nodes);
        }
        table
    }

    /// Hit/miss split of `ids`; all misses without a cache.
    pub fn classify(&self, key: BatchKey, ids: &[NodeId]) -> CacheClassification {
        match &self.cache {
            Some(cache) => cache.classify(key, ids),
            None => CacheClassification::all_miss(ids),
        }
    }

    /// Samples-to-batch in one call.
    pub fn process(&self, sampled: &SampledBatch) -> Result<ExtractedBatch> {
        let t_table = Instant::now();
        let table = Self::unique_nodes(&sampled.blocks);
        let table_secs = t_table.elapsed().as_secs_f64();
        let classification = self.classify(sampled.key, table.nodes());
        self.extract_with_table(sampled.key, &sampled.blocks, table, table_secs, &classification)
    }

    /// Builds the batch for `blocks` from an earlier classification of
    /// [`Self::unique_nodes`].
    pub fn extract(
        &self,
        key: BatchKey,
        blocks: &[Block],
        classification: &CacheClassification,
    ) -> Result<ExtractedBatch> {
        let t_table = Instant::now();
        let table = Self::unique_nodes(blocks);
        let table_secs = t_table.elapsed().as_secs_f64();
        self.extract_with_table(key, blocks, table, table_secs, classification)
    }

    fn extract_with_table(
        &self,
        key: BatchKey,
        blocks: &[Block],
        table: OrderedIdTable,
        table_secs: f64,
        classification: &CacheClassification,
    ) -> Result<ExtractedBatch> {
        if blocks.is_empty() {
            return Err(GnnError::InvalidArgument(format!("batch {key} has no blocks")));
        }
        if self.sanity_check {
            check_layer_consistency(blocks)?;
        }
        let started = Instant::now();
        let rows = table.len();
        check_covers(key, table.nodes(), classification)?;
        let dim = self.graph.feat_dim();
        let mut feat = FeatureTensor::zeros(rows, dim, self.ctx);

        let t_hit = Instant::now();
        let mut misses: Vec<(NodeId, usize)> = classification
            .miss_ids
            .iter()
            .copied()
            .zip(classification.miss_positions.iter().copied())
            .collect();
        let mut hits = 0;
        if let (Some(cache), false) = (&self.cache, classification.hit_ids.is_empty()) {
            let copy = cache.copy_hits(key, classification, &mut feat.data)?;
            hits = copy.copied;
            misses.extend(
                copy.stale
                    .iter()
                    .map(|i| (classification.hit_ids[*i], classification.hit_positions[*i])),
            );
        }
        let hit_secs = t_hit.elapsed().as_secs_f64();

        let t_miss = Instant::now();
        for &(id, pos) in &misses {
            feat.data[pos * dim..(pos + 1) * dim].copy_from_slice(self.graph.feature_row(id));
        }
        let miss_secs = t_miss.elapsed().as_secs_f64();
        self.admit(&misses, &feat)?;
        if let Some(cache) = &self.cache {
            cache.record(hits, misses.len());
        }

        let labels: Vec<i64> = blocks
            .last()
            .map(|b| b.dst_nodes.iter().map(|v| self.graph.labels()[*v as usize]).collect())
            .unwrap_or_default();

        let t_edge = Instant::now();
        let mut map_edge_secs = 0.0;
        let mut remapped = Vec::with_capacity(blocks.len());
        for (layer, block) in blocks.iter().enumerate() {
            remapped.push(remap_block(key, layer, &table, block, &mut map_edge_secs)?);
        }
        let edge_secs = t_edge.elapsed().as_secs_f64();

        let t_ids = Instant::now();
        let input_nodes = table.nodes().to_vec();
        let id_copy_secs = t_ids.elapsed().as_secs_f64();

        let row_bytes = dim * std::mem::size_of::<f32>();
        let graph_bytes = remapped.iter().map(RemappedBlock::nbytes).sum();
        let label_bytes = labels.len() * std::mem::size_of::<i64>();
        let batch = ExtractedBatch {
            key,
            input_nodes,
            feat,
            labels,
            blocks: remapped,
            hit_bytes: hits * row_bytes,
            miss_bytes: misses.len() * row_bytes,
            total_bytes: rows * row_bytes,
            label_bytes,
            id_bytes: rows * std::mem::size_of::<NodeId>(),
            graph_bytes,
        };
        if self.sanity_check {
            batch.check()?;
            if let Some(cache) = &self.cache {
                cache.check_invariants()?;
            }
        }
        trace!(
            key = %key,
            rows,
            hits,
            misses = misses.len(),
            layers = batch.blocks.len(),
            "extract.batch.done"
        );
        if let Some(profiler) = &self.profiler {
            profiler.log_step_add(key, LogStepItem::CacheCopyMissTime, miss_secs);
            profiler.log_step_add(key, LogStepItem::CacheCopyTime, hit_secs + miss_secs);
            profiler.log_step_add(key, LogStepItem::FeatCopyTime, hit_secs + miss_secs);
            profiler.log_step_add(key, LogStepItem::RemapMapNodeTime, table_secs);
            profiler.log_step_add(key, LogStepItem::IdRemapTime, table_secs);
            profiler.log_step_add(key, LogStepItem::RemapMapEdgeTime, map_edge_secs);
            profiler.log_step_add(key, LogStepItem::GraphCopyTime, edge_secs);
            profiler.log_step_add(key, LogStepItem::IdCopyTime, id_copy_secs);
            profiler.log_step_add(key, LogStepItem::ExtractTime, started.elapsed().as_secs_f64());
            profiler.log_step(key, LogStepItem::FeatureBytes, batch.total_bytes as f64);
            profiler.log_step(key, LogStepItem::MissBytes, batch.miss_bytes as f64);
            profiler.log_step(key, LogStepItem::LabelBytes, batch.label_bytes as f64);
            profiler.log_step(key, LogStepItem::IdBytes, batch.id_bytes as f64);
            profiler.log_step(key, LogStepItem::GraphBytes, batch.graph_bytes as f64);
            profiler.log_node_access(&batch.input_nodes);
        }
        Ok(batch)
    }

    fn admit(&self, misses: &[(NodeId, usize)], feat: &FeatureTensor) -> Result<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        if cache.policy() != CachePolicy::Dynamic || misses.is_empty() {
            return Ok(());
        }
        let ids: Vec<NodeId> = misses.iter().map(|(id, _)| *id).collect();
        let mut rows = Vec::with_capacity(ids.len() * feat.dim);
        for &(_, pos) in misses {
            rows.extend_from_slice(feat.row(pos));
        }
        let inserted = cache.insert(&ids, &rows)?;
        debug!(requested = ids.len(), inserted, "extract.cache.admit");
        Ok(())
    }
}

fn check_covers(key: BatchKey, nodes: &[NodeId], cls: &CacheClassification) -> Result<()> {
    let mut seen = vec![false; nodes.len()];
    let pairs = cls
        .hit_ids
        .iter()
        .zip(&cls.hit_positions)
        .chain(cls.miss_ids.iter().zip(&cls.miss_positions));
    let mut covered = 0;
    for (id, &pos) in pairs {
        match (nodes.get(pos), seen.get_mut(pos)) {
            (Some(expected), Some(flag)) if expected == id && !*flag => {
                *flag = true;
                covered += 1;
            }
            _ => {
                return Err(GnnError::InvalidArgument(format!(
                    "batch {key}: classification row {pos} does not match node {id}"
                )))
            }
        }
    }
    if covered != nodes.len() {
        return Err(GnnError::InvalidArgument(format!(
            "batch {key}: classification covers {covered} of {} rows",
            nodes.len()
        )));
    }
    Ok(())
}

fn remap_block(
    key: BatchKey,
    layer: usize,
    table: &OrderedIdTable,
    block: &Block,
    map_secs: &mut f64,
) -> Result<RemappedBlock> {
    let missing = || {
        GnnError::InvalidArgument(format!(
            "batch {key}: block {layer} references a node outside its frontier"
        ))
    };
    let started = Instant::now();
    let src = table.map_all(&block.edge_src).ok_or_else(missing)?;
    let dst = table.map_all(&block.edge_dst).ok_or_else(missing)?;
    *map_secs += started.elapsed().as_secs_f64();
    Ok(RemappedBlock {
        num_src: block.num_src(),
        num_dst: block.num_dst(),
        src,
        dst,
        weights: block.weights.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::graph::DatasetBuilder;
    use crate::sampling::Sampler;

    fn graph() -> Arc<Dataset> {
        let feat: Vec<f32> = (0..6).flat_map(|v| [v as f32; 3]).collect();
        Arc::new(
            DatasetBuilder::new(6)
                .edges([(0, 1), (0, 2), (1, 3), (2, 4), (3, 5), (4, 5)])
                .features(3, feat)
                .labels(2, vec![0, 1, 0, 1, 0, 1])
                .train_set(vec![0, 1])
                .build()
                .unwrap(),
        )
    }

    fn sample(graph: &Arc<Dataset>) -> SampledBatch {
        let config = RunConfig::new("unused").fanout(vec![2, 2]);
        let mut sampler = Sampler::new(Arc::clone(graph), &config, 0).unwrap();
        sampler.sample(BatchKey::new(0, 0), &[0, 1]).unwrap()
    }

    #[test]
    fn rejects_model_width_mismatch() {
        let err = Extractor::new(graph(), None, Context::cpu(), Some(5));
        assert!(matches!(
            err,
            Err(GnnError::FeatureDimensionMismatch { expected: 5, actual: 3 })
        ));
    }

    #[test]
    fn rows_follow_the_global_table() {
        let g = graph();
        let sampled = sample(&g);
        let extractor = Extractor::new(Arc::clone(&g), None, Context::gpu(0), Some(3))
            .unwrap()
            .with_sanity_check(true);
        let batch = extractor.process(&sampled).unwrap();
        assert_eq!(batch.input_nodes, sampled.input_nodes());
        for (row, node) in batch.input_nodes.iter().enumerate() {
            assert_eq!(batch.feat.row(row), g.feature_row(*node));
        }
        assert_eq!(batch.labels, vec![0, 1]);
        assert_eq!(batch.hit_bytes, 0);
        assert_eq!(batch.miss_bytes, batch.total_bytes);
        assert_eq!(batch.feat.ctx, Context::gpu(0));
        batch.check().unwrap();
    }

    #[test]
    fn hits_and_misses_fill_disjoint_rows() {
        let g = graph();
        let ranking: Vec<NodeId> = vec![3, 1, 2, 0, 4, 5];
        let cache = Arc::new(
            CacheManager::new(&g, CachePolicy::ByDegree, 0.5, Context::gpu(0), Some(&ranking))
                .unwrap(),
        );
        let extractor = Extractor::new(Arc::clone(&g), Some(cache), Context::gpu(0), None).unwrap();
        let sampled = sample(&g);
        let batch = extractor.process(&sampled).unwrap();
        for (row, node) in batch.input_nodes.iter().enumerate() {
            assert_eq!(batch.feat.row(row), g.feature_row(*node));
        }
        assert_eq!(batch.hit_bytes + batch.miss_bytes, batch.total_bytes);
        assert!(batch.hit_bytes > 0);
    }

    #[test]
    fn dynamic_cache_learns_from_misses() {
        let g = graph();
        let cache = Arc::new(
            CacheManager::new(&g, CachePolicy::Dynamic, 1.0, Context::gpu(0), None).unwrap(),
        );
        let extractor =
            Extractor::new(Arc::clone(&g), Some(Arc::clone(&cache)), Context::gpu(0), None).unwrap();
        let sampled = sample(&g);
        let first = extractor.process(&sampled).unwrap();
        assert_eq!(first.hit_bytes, 0);
        let second = extractor.process(&sampled).unwrap();
        assert_eq!(second.miss_bytes, 0);
        assert_eq!(second.feat, first.feat);
    }

    #[test]
    fn remap_stages_land_in_their_own_counters() {
        let g = graph();
        let sampled = sample(&g);
        let profiler = Arc::new(Profiler::new(1, 1, 3));
        let extractor = Extractor::new(Arc::clone(&g), None, Context::cpu(), None)
            .unwrap()
            .with_profiler(Arc::clone(&profiler));
        extractor.process(&sampled).unwrap();
        let key = sampled.key;
        for item in [
            LogStepItem::RemapMapNodeTime,
            LogStepItem::RemapMapEdgeTime,
            LogStepItem::GraphCopyTime,
            LogStepItem::IdCopyTime,
        ] {
            assert!(profiler.get_step(key, item) > 0.0, "{} never written", item.as_str());
        }
        assert!(
            profiler.get_step(key, LogStepItem::RemapMapEdgeTime)
                <= profiler.get_step(key, LogStepItem::GraphCopyTime)
        );
        assert_eq!(
            profiler.get_step(key, LogStepItem::IdRemapTime),
            profiler.get_step(key, LogStepItem::RemapMapNodeTime)
        );
    }

    #[test]
    fn mismatched_classification_is_rejected() {
        let g = graph();
        let sampled = sample(&g);
        let extractor = Extractor::new(Arc::clone(&g), None, Context::cpu(), None).unwrap();
        let cls = CacheClassification::all_miss(&[0]);
        let err = extractor.extract(sampled.key, &sampled.blocks, &cls);
        assert!(matches!(err, Err(GnnError::InvalidArgument(_))));
    }

    #[test]
    fn block_lookup_checks_range() {
        let g = graph();
        let extractor = Extractor::new(Arc::clone(&g), None, Context::cpu(), None).unwrap();
        let batch = extractor.process(&sample(&g)).unwrap();
        assert_eq!(batch.num_layers(), 2);
        assert!(matches!(
            batch.block(2),
            Err(GnnError::LayerOutOfRange { layer: 2, num_layers: 2 })
        ));
    }
}
