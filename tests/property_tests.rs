#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use gnnpipe::cache::rank_by_degree;
use gnnpipe::sampling::{check_layer_consistency, OrderedIdTable};
use gnnpipe::{
    BatchKey, CacheManager, CachePolicy, Context, Dataset, DatasetBuilder, Extractor, NodeId,
    RunConfig, SampleType, Sampler,
};
use proptest::prelude::*;

const DIM: usize = 3;

type RawGraph = (usize, Vec<(NodeId, NodeId, f32)>);

fn arb_graph() -> impl Strategy<Value = RawGraph> {
    (2usize..40).prop_flat_map(|n| {
        let edge = (0..n as NodeId, 0..n as NodeId, 0.1f32..5.0);
        (Just(n), prop::collection::vec(edge, 0..n * 4))
    })
}

fn build(raw: RawGraph) -> Arc<Dataset> {
    let (n, edges) = raw;
    let feat: Vec<f32> = (0..n * DIM).map(|i| i as f32).collect();
    let mut builder = DatasetBuilder::new(n);
    for (u, v, w) in edges {
        builder = builder.weighted_edge(u, v, w);
    }
    let graph = builder
        .features(DIM, feat)
        .labels(2, (0..n as i64).map(|v| v % 2).collect())
        .train_set((0..n as NodeId).collect())
        .build()
        .expect("valid graph");
    Arc::new(graph)
}

fn arb_sample_type() -> impl Strategy<Value = SampleType> {
    prop::sample::select(SampleType::ALL.to_vec())
}

fn arb_fanout() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5, 1..4)
}

fn seeds_of(graph: &Dataset, picks: &[prop::sample::Index]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    picks
        .iter()
        .map(|i| i.index(graph.num_nodes()) as NodeId)
        .filter(|v| seen.insert(*v))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_blocks_chain_for_any_graph(
        raw in arb_graph(),
        kind in arb_sample_type(),
        fanout in arb_fanout(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..8),
        seed in any::<u64>(),
        self_loop in any::<bool>(),
    ) {
        let graph = build(raw);
        let seeds = seeds_of(&graph, &picks);
        let config = RunConfig::new("mem")
            .sample_type(kind)
            .fanout(fanout.clone())
            .seed(seed)
            .add_self_loop(self_loop);
        let mut sampler = Sampler::new(Arc::clone(&graph), &config, 0).expect("sampler");
        let batch = sampler.sample(BatchKey::new(0, 0), &seeds).expect("sample");

        prop_assert_eq!(batch.blocks.len(), fanout.len());
        prop_assert!(check_layer_consistency(&batch.blocks).is_ok());
        prop_assert_eq!(batch.output_nodes(), &seeds[..]);
        for block in &batch.blocks {
            prop_assert_eq!(block.edge_src.len(), block.edge_dst.len());
            let src: HashSet<_> = block.src_nodes.iter().collect();
            for (u, v) in block.edge_src.iter().zip(&block.edge_dst) {
                prop_assert!(src.contains(u));
                prop_assert!(block.dst_nodes.contains(v));
                if kind != SampleType::RandomWalk {
                    prop_assert!(u == v || graph.neighbors(*v).contains(u));
                }
            }
            if let Some(weights) = &block.weights {
                prop_assert_eq!(weights.len(), block.edge_src.len());
                prop_assert!(weights.iter().all(|w| *w > 0.0));
            }
        }
    }

    #[test]
    fn prop_extracted_bytes_add_up(
        raw in arb_graph(),
        fraction in 0.0f64..=1.0,
        dynamic in any::<bool>(),
        fanout in arb_fanout(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..8),
    ) {
        let graph = build(raw);
        let seeds = seeds_of(&graph, &picks);
        let ranking = rank_by_degree(&graph);
        let (policy, ranking) = if dynamic {
            (CachePolicy::Dynamic, None)
        } else {
            (CachePolicy::ByDegree, Some(ranking.as_slice()))
        };
        let cache = Arc::new(
            CacheManager::new(&graph, policy, fraction, Context::gpu(0), ranking).expect("cache"),
        );
        let extractor =
            Extractor::new(Arc::clone(&graph), Some(Arc::clone(&cache)), Context::gpu(0), Some(DIM))
                .expect("extractor")
                .with_sanity_check(true);
        let config = RunConfig::new("mem").fanout(fanout);
        let mut sampler = Sampler::new(Arc::clone(&graph), &config, 1).expect("sampler");

        for step in 0..2 {
            let sampled = sampler.sample(BatchKey::new(0, step), &seeds).expect("sample");
            let batch = extractor.process(&sampled).expect("extract");
            prop_assert_eq!(batch.hit_bytes + batch.miss_bytes, batch.total_bytes);
            prop_assert_eq!(batch.total_bytes, batch.input_nodes.len() * DIM * 4);
            for (row, id) in batch.input_nodes.iter().enumerate() {
                prop_assert_eq!(batch.feat.row(row), graph.feature_row(*id));
            }
            for block in &batch.blocks {
                prop_assert!(block.src.iter().all(|s| (*s as usize) < block.num_src));
                prop_assert!(block.dst.iter().all(|d| (*d as usize) < block.num_dst));
            }
            prop_assert!(cache.len() <= cache.capacity());
            prop_assert!(cache.check_invariants().is_ok());
        }
    }

    #[test]
    fn prop_batch_keys_order_like_pairs(
        a in (any::<u32>(), any::<u32>()),
        b in (any::<u32>(), any::<u32>()),
    ) {
        let (ka, kb) = (BatchKey::new(a.0, a.1), BatchKey::new(b.0, b.1));
        prop_assert_eq!((ka.epoch(), ka.step()), a);
        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
    }

    #[test]
    fn prop_id_table_round_trips(ids in prop::collection::vec(0u32..64, 0..128)) {
        let mut table = OrderedIdTable::default();
        let locals: Vec<u32> = ids.iter().map(|id| table.insert(*id)).collect();
        let distinct: HashSet<_> = ids.iter().collect();
        prop_assert_eq!(table.len(), distinct.len());
        for (id, local) in ids.iter().zip(&locals) {
            prop_assert_eq!(table.nodes()[*local as usize], *id);
        }
        prop_assert_eq!(table.map_all(&ids), Some(locals));
        prop_assert!(table.local(64).is_none());
    }
}
