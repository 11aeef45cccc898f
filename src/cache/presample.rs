use std::sync::Arc;

use tracing::debug;

use crate::config::RunConfig;
use crate::graph::Dataset;
use crate::sampling::{EpochShuffler, Sampler};
use crate::types::{NodeId, Result};

/// Ranks nodes by how often they reach a batch's input set during
/// `config.presample_epochs` warm-up epochs.
///
/// Ties fall back to in-degree, then to the smaller id. The warm-up uses
/// its own seed so the training run's shuffle is not disturbed.
pub(crate) fn presample_ranking(graph: &Arc<Dataset>, config: &RunConfig) -> Result<Vec<NodeId>> {
    let mut counts = vec![0u32; graph.num_nodes()];
    let warmup_seed = config.seed.rotate_left(17) ^ 0x7072_6573;
    let mut sampler = Sampler::new(Arc::clone(graph), config, u64::MAX)?;
    let shuffler = EpochShuffler::new(
        graph.train_set(),
        config.batch_size,
        config.presample_epochs,
        warmup_seed,
    )?;
    let mut batches = 0usize;
    for batch in shuffler {
        let sampled = sampler.sample(batch.key, &batch.seeds)?;
        for &node in sampled.input_nodes() {
            counts[node as usize] = counts[node as usize].saturating_add(1);
        }
        batches += 1;
    }
    debug!(
        epochs = config.presample_epochs,
        batches,
        touched = counts.iter().filter(|c| **c > 0).count(),
        "cache.presample.done"
    );
    let degrees = graph.in_degrees();
    let mut nodes: Vec<NodeId> = (0..graph.num_nodes() as NodeId).collect();
    nodes.sort_by(|a, b| {
        let (ai, bi) = (*a as usize, *b as usize);
        counts[bi]
            .cmp(&counts[ai])
            .then(degrees[bi].cmp(&degrees[ai]))
            .then(a.cmp(b))
    });
    Ok(nodes)
}
