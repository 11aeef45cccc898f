#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gnnpipe::cache::rank_by_degree;
use gnnpipe::graph::SyntheticGraph;
use gnnpipe::{
    BatchKey, CacheManager, CachePolicy, Context, Dataset, Extractor, RunConfig, SampledBatch,
    Sampler,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const NODE_COUNT: usize = 20_000;
const FEAT_DIM: usize = 128;
const BATCH: usize = 256;
const PRESAMPLED: usize = 16;

fn micro_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/extract");
    group.sample_size(40);

    let harness = ExtractHarness::new();
    let bytes = harness.batches[0].input_nodes().len() * FEAT_DIM * 4;
    group.throughput(Throughput::Bytes(bytes as u64));
    for (policy, fraction) in [
        (CachePolicy::ByDegree, 0.0),
        (CachePolicy::ByDegree, 0.2),
        (CachePolicy::Dynamic, 0.2),
    ] {
        let extractor = harness.extractor(policy, fraction);
        let mut cursor = 0usize;
        group.bench_with_input(
            BenchmarkId::new(policy.to_string(), fraction),
            &fraction,
            |b, _| {
                b.iter(|| {
                    let batch = &harness.batches[cursor % PRESAMPLED];
                    cursor += 1;
                    black_box(extractor.process(batch).expect("extract"))
                });
            },
        );
    }
    group.finish();
}

struct ExtractHarness {
    graph: Arc<Dataset>,
    batches: Vec<SampledBatch>,
}

impl ExtractHarness {
    fn new() -> Self {
        let graph = Arc::new(
            SyntheticGraph::new(NODE_COUNT, 10)
                .feat_dim(FEAT_DIM)
                .skew(1.2)
                .seed(0xfea7)
                .build()
                .expect("graph"),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut train = graph.train_set().to_vec();
        train.shuffle(&mut rng);
        let config = RunConfig::new("bench").fanout(vec![5, 10]).seed(9);
        let mut sampler = Sampler::new(Arc::clone(&graph), &config, 0).expect("sampler");
        let batches = train
            .chunks(BATCH)
            .take(PRESAMPLED)
            .enumerate()
            .map(|(step, seeds)| {
                sampler
                    .sample(BatchKey::new(0, step as u32), seeds)
                    .expect("sample")
            })
            .collect();
        Self { graph, batches }
    }

    fn extractor(&self, policy: CachePolicy, fraction: f64) -> Extractor {
        let ranking = rank_by_degree(&self.graph);
        let ranking = policy.is_static().then_some(ranking.as_slice());
        let cache = CacheManager::new(&self.graph, policy, fraction, Context::gpu(0), ranking)
            .expect("cache");
        Extractor::new(
            Arc::clone(&self.graph),
            Some(Arc::new(cache)),
            Context::gpu(0),
            Some(FEAT_DIM),
        )
        .expect("extractor")
    }
}

criterion_group!(benches, micro_extract);
criterion_main!(benches);
