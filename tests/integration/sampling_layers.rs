#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gnnpipe::graph::SyntheticGraph;
use gnnpipe::sampling::{check_layer_consistency, EpochShuffler};
use gnnpipe::{
    BatchKey, Dataset, DatasetBuilder, GnnError, NodeId, RunConfig, SampleType, Sampler,
};

fn weighted_graph() -> Arc<Dataset> {
    Arc::new(
        SyntheticGraph::new(300, 8)
            .weighted(true)
            .seed(42)
            .build()
            .expect("generate"),
    )
}

fn seeds(graph: &Dataset, n: usize) -> Vec<NodeId> {
    graph.train_set().iter().copied().take(n).collect()
}

#[test]
fn every_algorithm_produces_consistent_layers() {
    let graph = weighted_graph();
    let batch_seeds = seeds(&graph, 16);
    for kind in SampleType::ALL {
        let config = RunConfig::new("mem")
            .sample_type(kind)
            .fanout(vec![3, 4])
            .seed(11);
        let mut sampler = Sampler::new(Arc::clone(&graph), &config, 0).expect("sampler");
        let batch = sampler
            .sample(BatchKey::new(0, 0), &batch_seeds)
            .unwrap_or_else(|e| panic!("{kind}: {e}"));
        assert_eq!(batch.blocks.len(), 2, "{kind}");
        check_layer_consistency(&batch.blocks).unwrap_or_else(|e| panic!("{kind}: {e}"));
        assert_eq!(batch.output_nodes(), &batch_seeds[..], "{kind}");
        for block in &batch.blocks {
            assert_eq!(block.weights.is_some(), kind.emits_weights(), "{kind}");
            let src: HashSet<_> = block.src_nodes.iter().collect();
            let dst: HashSet<_> = block.dst_nodes.iter().collect();
            assert_eq!(src.len(), block.src_nodes.len(), "{kind}: duplicate sources");
            for (u, v) in block.edge_src.iter().zip(&block.edge_dst) {
                assert!(src.contains(u) && dst.contains(v), "{kind}: dangling edge");
            }
        }
    }
}

#[test]
fn two_seeds_on_a_ten_node_graph_stay_small() {
    // ring with chords, stored in both directions
    let edges = (0..10u32).flat_map(|u| {
        let (next, chord) = ((u + 1) % 10, (u + 5) % 10);
        [(u, next), (next, u), (u, chord)]
    });
    let graph = Arc::new(DatasetBuilder::new(10).edges(edges).build().expect("graph"));
    for kind in SampleType::ALL {
        let config = RunConfig::new("mem").sample_type(kind).fanout(vec![2]).seed(8);
        let mut sampler = Sampler::new(Arc::clone(&graph), &config, 0).expect("sampler");
        let batch = sampler
            .sample(BatchKey::new(0, 0), &[0, 1])
            .unwrap_or_else(|e| panic!("{kind}: {e}"));
        let block = &batch.blocks[0];
        assert_eq!(block.dst_nodes, vec![0, 1], "{kind}");
        assert_eq!(&block.src_nodes[..2], &[0, 1], "{kind}");
        assert!(block.src_nodes.len() <= 6, "{kind}: {:?}", block.src_nodes);
        assert!(block.src_nodes.iter().all(|id| *id < 10), "{kind}");
        assert!(block.num_edges() <= 4, "{kind}");
    }
}

#[test]
fn uniform_khop_takes_distinct_real_neighbors_up_to_fanout() {
    let graph = weighted_graph();
    let config = RunConfig::new("mem").fanout(vec![2, 5]).seed(5);
    let mut sampler = Sampler::new(Arc::clone(&graph), &config, 3).expect("sampler");
    let batch = sampler
        .sample(BatchKey::new(1, 2), &seeds(&graph, 32))
        .expect("sample");
    for (layer, block) in batch.blocks.iter().enumerate() {
        let fanout = config.fanout[layer];
        let mut per_dst: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (u, v) in block.edge_src.iter().zip(&block.edge_dst) {
            per_dst.entry(*v).or_default().push(*u);
        }
        for v in &block.dst_nodes {
            let row = graph.neighbors(*v);
            let picked = per_dst.remove(v).unwrap_or_default();
            assert_eq!(picked.len(), row.len().min(fanout));
            let unique: HashSet<_> = picked.iter().collect();
            assert_eq!(unique.len(), picked.len());
            assert!(picked.iter().all(|u| row.contains(u)));
        }
    }
}

#[test]
fn same_seed_and_worker_reproduce_the_batch() {
    let graph = weighted_graph();
    let config = RunConfig::new("mem")
        .sample_type(SampleType::WeightedKHop)
        .fanout(vec![4, 4])
        .seed(99);
    let key = BatchKey::new(0, 0);
    let s = seeds(&graph, 10);
    let a = Sampler::new(Arc::clone(&graph), &config, 1)
        .and_then(|mut x| x.sample(key, &s))
        .expect("sample a");
    let b = Sampler::new(Arc::clone(&graph), &config, 1)
        .and_then(|mut x| x.sample(key, &s))
        .expect("sample b");
    let c = Sampler::new(Arc::clone(&graph), &config, 2)
        .and_then(|mut x| x.sample(key, &s))
        .expect("sample c");
    assert_eq!(a.blocks, b.blocks);
    assert_ne!(a.blocks, c.blocks);
}

#[test]
fn dedup_weights_count_repeated_draws() {
    let graph = weighted_graph();
    let config = RunConfig::new("mem")
        .sample_type(SampleType::KHopDedup)
        .fanout(vec![6])
        .seed(1);
    let mut sampler = Sampler::new(Arc::clone(&graph), &config, 0).expect("sampler");
    let batch = sampler
        .sample(BatchKey::new(0, 0), &seeds(&graph, 20))
        .expect("sample");
    let block = &batch.blocks[0];
    let weights = block.weights.as_ref().expect("weights");
    let mut total: HashMap<NodeId, f32> = HashMap::new();
    for (v, w) in block.edge_dst.iter().zip(weights) {
        assert!(*w >= 1.0);
        *total.entry(*v).or_default() += *w;
    }
    for v in &block.dst_nodes {
        let expected = if graph.neighbors(*v).is_empty() { 0.0 } else { 6.0 };
        assert_eq!(total.get(v).copied().unwrap_or(0.0), expected);
    }
}

#[test]
fn random_walk_keeps_at_most_num_neighbor() {
    let graph = weighted_graph();
    let config = RunConfig::new("mem").random_walk(2, 3, 4, 0.3, 8).seed(2);
    let mut sampler = Sampler::new(Arc::clone(&graph), &config, 0).expect("sampler");
    let batch = sampler
        .sample(BatchKey::new(0, 0), &seeds(&graph, 12))
        .expect("sample");
    for block in &batch.blocks {
        let mut per_dst: HashMap<NodeId, usize> = HashMap::new();
        for v in &block.edge_dst {
            *per_dst.entry(*v).or_default() += 1;
        }
        assert!(per_dst.values().all(|n| *n <= 3));
    }
}

#[test]
fn invalid_inputs_are_rejected() {
    let graph = weighted_graph();
    let config = RunConfig::new("mem").fanout(vec![2, 0]);
    assert!(matches!(
        Sampler::new(Arc::clone(&graph), &config, 0),
        Err(GnnError::InvalidFanout { layer: 1, fanout: 0 })
    ));
    let config = RunConfig::new("mem").fanout(vec![2]);
    let mut sampler = Sampler::new(graph, &config, 0).expect("sampler");
    assert!(matches!(
        sampler.sample(BatchKey::new(0, 0), &[]),
        Err(GnnError::EmptySeedSet)
    ));
}

#[test]
fn shuffler_partitions_cover_each_epoch_once() {
    let train: Vec<NodeId> = (0..23).collect();
    let mut seen: Vec<(BatchKey, Vec<NodeId>)> = Vec::new();
    for producer in 0..3 {
        let shuffler = EpochShuffler::new(&train, 5, 2, 7)
            .and_then(|s| s.partitioned(producer, 3))
            .expect("shuffler");
        seen.extend(shuffler.map(|b| (b.key, b.seeds)));
    }
    seen.sort_by_key(|(key, _)| *key);
    assert_eq!(seen.len(), 2 * 5);
    for epoch in 0..2 {
        let mut nodes: Vec<NodeId> = seen
            .iter()
            .filter(|(key, _)| key.epoch() == epoch)
            .flat_map(|(_, s)| s.iter().copied())
            .collect();
        nodes.sort_unstable();
        assert_eq!(nodes, train);
    }
    let first: Vec<_> = seen.iter().filter(|(k, _)| k.epoch() == 0).map(|(_, s)| s.clone()).collect();
    let second: Vec<_> = seen.iter().filter(|(k, _)| k.epoch() == 1).map(|(_, s)| s.clone()).collect();
    assert_ne!(first, second);
}
