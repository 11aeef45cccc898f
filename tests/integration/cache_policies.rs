#![allow(missing_docs)]

use std::sync::Arc;

use gnnpipe::cache::{cache_capacity, rank_by_degree};
use gnnpipe::graph::SyntheticGraph;
use gnnpipe::types::Context;
use gnnpipe::{
    BatchKey, CacheManager, CachePolicy, Dataset, DatasetBuilder, Extractor, GnnError, RunConfig,
    Sampler,
};

fn graph() -> Arc<Dataset> {
    Arc::new(
        SyntheticGraph::new(400, 6)
            .feat_dim(8)
            .seed(17)
            .build()
            .expect("generate"),
    )
}

fn assert_rows_match(graph: &Dataset, batch: &gnnpipe::ExtractedBatch) {
    for (row, id) in batch.input_nodes.iter().enumerate() {
        assert_eq!(batch.feat.row(row), graph.feature_row(*id), "row {row} (node {id})");
    }
}

#[test]
fn static_policies_hold_the_head_of_their_ranking() {
    let graph = graph();
    for policy in [CachePolicy::ByDegree, CachePolicy::ByHeuristic, CachePolicy::ByPreSample] {
        let config = RunConfig::new("mem")
            .cache(policy, 0.1)
            .batch_size(32)
            .fanout(vec![4, 4])
            .presample_epochs(1);
        let cache = CacheManager::from_config(&graph, &config).expect("cache");
        assert_eq!(cache.capacity(), cache_capacity(400, 0.1));
        assert_eq!(cache.len(), 40, "{policy}");
        cache.check_invariants().expect("invariants");
    }

    let cache = CacheManager::new(
        &graph,
        CachePolicy::ByDegree,
        0.05,
        Context::gpu(0),
        Some(&rank_by_degree(&graph)),
    )
    .expect("cache");
    let ranking = rank_by_degree(&graph);
    assert!(ranking[..20].iter().all(|id| cache.contains(*id)));
    assert!(ranking[20..].iter().all(|id| !cache.contains(*id)));
}

#[test]
fn full_degree_cache_serves_the_busiest_node() {
    // node 3 is the hub of a small star
    let mut edges = Vec::new();
    for leaf in [0u32, 1, 2, 4, 5, 6] {
        edges.extend([(leaf, 3), (3, leaf)]);
    }
    edges.extend([(0, 1), (1, 0)]);
    let feat: Vec<f32> = (0..7 * 2).map(|i| i as f32).collect();
    let graph = Arc::new(
        DatasetBuilder::new(7)
            .edges(edges)
            .features(2, feat)
            .train_set(vec![0, 1])
            .build()
            .expect("graph"),
    );
    let ranking = rank_by_degree(&graph);
    assert_eq!(ranking[0], 3);

    let cache = Arc::new(
        CacheManager::new(&graph, CachePolicy::ByDegree, 1.0, Context::gpu(0), Some(&ranking))
            .expect("cache"),
    );
    assert_eq!(cache.len(), 7);
    assert!(cache.contains(3));
    let classification = cache.classify(BatchKey::new(0, 0), &[3]);
    assert_eq!(classification.hit_ids, vec![3]);
    assert!(classification.miss_ids.is_empty());

    let extractor =
        Extractor::new(Arc::clone(&graph), Some(Arc::clone(&cache)), Context::gpu(0), None)
            .expect("extractor");
    let config = RunConfig::new("mem").fanout(vec![3]).seed(2);
    let sampled = Sampler::new(Arc::clone(&graph), &config, 0)
        .and_then(|mut s| s.sample(BatchKey::new(0, 0), &[0, 1]))
        .expect("sample");
    let batch = extractor.process(&sampled).expect("extract");
    assert_rows_match(&graph, &batch);
    assert_eq!(batch.miss_bytes, 0);
    let stats = cache.stats();
    assert_eq!(stats.hits as usize, batch.input_nodes.len());
    assert_eq!(stats.misses, 0);
}

#[test]
fn extraction_assembles_identical_rows_with_or_without_cache() {
    let graph = graph();
    let config = RunConfig::new("mem").fanout(vec![5, 5]).seed(3);
    let seeds: Vec<_> = graph.train_set()[..24].to_vec();
    let sampled = Sampler::new(Arc::clone(&graph), &config, 0)
        .and_then(|mut s| s.sample(BatchKey::new(0, 0), &seeds))
        .expect("sample");

    let plain = Extractor::new(Arc::clone(&graph), None, Context::gpu(0), None)
        .expect("extractor")
        .process(&sampled)
        .expect("extract");
    assert_eq!(plain.hit_bytes, 0);
    plain.check().expect("batch");

    let cache = Arc::new(
        CacheManager::new(
            &graph,
            CachePolicy::ByDegree,
            0.25,
            Context::gpu(0),
            Some(&rank_by_degree(&graph)),
        )
        .expect("cache"),
    );
    let cached = Extractor::new(Arc::clone(&graph), Some(Arc::clone(&cache)), Context::gpu(0), None)
        .expect("extractor")
        .with_sanity_check(true)
        .process(&sampled)
        .expect("extract");
    cached.check().expect("batch");
    assert_eq!(cached.input_nodes, plain.input_nodes);
    assert_eq!(cached.feat.data, plain.feat.data);
    assert!(cached.hit_bytes > 0);
    assert_eq!(cached.hit_bytes + cached.miss_bytes, cached.total_bytes);
    assert_rows_match(&graph, &cached);

    let stats = cache.stats();
    let row_bytes = (graph.feat_dim() * 4) as u64;
    assert_eq!(stats.hits * row_bytes, cached.hit_bytes as u64);
    assert_eq!(stats.misses * row_bytes, cached.miss_bytes as u64);
}

#[test]
fn dynamic_cache_learns_repeated_batches() {
    let graph = graph();
    let cache = Arc::new(
        CacheManager::new(&graph, CachePolicy::Dynamic, 0.5, Context::gpu(1), None)
            .expect("cache"),
    );
    assert!(cache.is_empty());
    let extractor = Extractor::new(Arc::clone(&graph), Some(Arc::clone(&cache)), Context::gpu(1), None)
        .expect("extractor");
    let config = RunConfig::new("mem").fanout(vec![3]).seed(8);
    let seeds: Vec<_> = graph.train_set()[..10].to_vec();
    let sampled = Sampler::new(Arc::clone(&graph), &config, 0)
        .and_then(|mut s| s.sample(BatchKey::new(0, 0), &seeds))
        .expect("sample");

    let first = extractor.process(&sampled).expect("first");
    assert_eq!(first.hit_bytes, 0);
    let second = extractor.process(&sampled).expect("second");
    assert_eq!(second.miss_bytes, 0);
    assert_eq!(second.feat.data, first.feat.data);
    assert_rows_match(&graph, &second);

    let stats = cache.stats();
    assert_eq!(stats.inserts as usize, first.input_nodes.len());
    assert_eq!(stats.evictions, 0);
    cache.check_invariants().expect("invariants");
}

#[test]
fn dynamic_cache_never_exceeds_capacity() {
    let graph = graph();
    let cache = CacheManager::new(&graph, CachePolicy::Dynamic, 0.02, Context::gpu(0), None)
        .expect("cache");
    let dim = graph.feat_dim();
    for chunk in (0..200u32).collect::<Vec<_>>().chunks(7) {
        let rows: Vec<f32> = chunk.iter().flat_map(|id| graph.feature_row(*id).to_vec()).collect();
        cache.insert(chunk, &rows).expect("insert");
        assert!(cache.len() <= cache.capacity());
        cache.check_invariants().expect("invariants");
    }
    let stats = cache.stats();
    assert_eq!(stats.cached, 8);
    assert_eq!(stats.inserts, 200);
    assert_eq!(stats.evictions, 192);
    assert!(cache.contains(199));
    assert!(!cache.contains(0));

    let err = cache.insert(&[1, 2], &vec![0.0; dim]).unwrap_err();
    assert!(matches!(err, GnnError::InvalidArgument(_)));
}

#[test]
fn misconfigured_caches_are_rejected() {
    let graph = graph();
    let err = CacheManager::new(&graph, CachePolicy::Dynamic, 1.5, Context::gpu(0), None)
        .err()
        .expect("fraction above one");
    assert!(matches!(err, GnnError::InvalidConfig(_)));

    let err = CacheManager::new(&graph, CachePolicy::ByDegree, 0.1, Context::gpu(0), None)
        .err()
        .expect("static policy without ranking");
    assert!(matches!(err, GnnError::InvalidArgument(_)));

    let cache = CacheManager::new(
        &graph,
        CachePolicy::ByDegree,
        0.1,
        Context::gpu(0),
        Some(&rank_by_degree(&graph)),
    )
    .expect("cache");
    let row = graph.feature_row(0).to_vec();
    assert!(matches!(
        cache.insert(&[0], &row),
        Err(GnnError::Unsupported(_))
    ));
}

#[test]
fn zero_percent_cache_misses_everything() {
    let graph = graph();
    let cache = Arc::new(
        CacheManager::new(
            &graph,
            CachePolicy::ByDegree,
            0.0,
            Context::gpu(0),
            Some(&rank_by_degree(&graph)),
        )
        .expect("cache"),
    );
    let ids: Vec<_> = (0..50).collect();
    let classification = cache.classify(BatchKey::new(0, 0), &ids);
    assert!(classification.hit_ids.is_empty());
    assert_eq!(classification.miss_positions, (0..50).collect::<Vec<_>>());
    assert_eq!(cache.hit_rate(), 0.0);
}

#[test]
fn model_width_must_match_the_dataset() {
    let graph = graph();
    let err = Extractor::new(graph, None, Context::gpu(0), Some(3))
        .err()
        .expect("width mismatch");
    assert!(matches!(
        err,
        GnnError::FeatureDimensionMismatch { expected: 3, actual: 8 }
    ));
}
