#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::time::Duration;

use gnnpipe::graph::SyntheticGraph;
use gnnpipe::profiler::{LogEpochItem, LogStepItem};
use gnnpipe::{BatchKey, CachePolicy, Context, Engine, EngineState, GnnError, RunConfig};
use tempfile::TempDir;

fn dataset_dir() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    SyntheticGraph::new(120, 4)
        .feat_dim(6)
        .num_class(3)
        .train_ratio(0.25)
        .seed(31)
        .build()
        .expect("generate")
        .save(dir.path())
        .expect("save");
    dir
}

fn config(dir: &TempDir) -> RunConfig {
    RunConfig::new(dir.path())
        .batch_size(8)
        .fanout(vec![2, 3])
        .num_epoch(2)
        .max_jobs(4, 3)
        .barrier_timeout(Duration::from_secs(10))
        .handoff_poll(Duration::from_millis(2))
        .sanity_check(true)
}

fn initialized(config: RunConfig, worker: usize, workers: usize) -> Engine {
    let mut engine = Engine::new();
    engine.config(config).expect("config");
    engine.data_init().expect("data_init");
    assert_eq!(engine.state(), EngineState::DataReady);
    engine
        .sample_init(Context::gpu(0), worker, workers)
        .expect("sample_init");
    assert_eq!(engine.state(), EngineState::DataReady);
    engine.train_init(Context::gpu(1)).expect("train_init");
    assert_eq!(engine.state(), EngineState::Ready);
    engine
}

#[test]
fn synchronous_engine_serves_a_loaded_dataset() {
    let dir = dataset_dir();
    let mut engine = initialized(config(&dir).model_input_dim(6), 0, 1);
    assert_eq!(engine.feat_dim().expect("feat_dim"), 6);
    assert_eq!(engine.num_class().expect("num_class"), 3);
    assert_eq!(engine.num_epoch().expect("num_epoch"), 2);
    let steps = engine.steps_per_epoch().expect("steps");
    assert_eq!(steps, 4);

    let mut keys = Vec::new();
    while let Some(sampled) = engine.sample_once().expect("sample_once") {
        let key = engine.get_next_batch().expect("get_next_batch");
        assert_eq!(key, sampled);
        let batch = engine.get_blocks(key).expect("get_blocks");
        assert_eq!(batch.feat.ctx, Context::gpu(1));
        assert_eq!(batch.num_layers(), 2);
        for layer in 0..2 {
            let block = batch.block(layer).expect("block");
            assert_eq!(engine.get_num_src_nodes(key, layer).expect("src"), block.num_src);
            assert_eq!(engine.get_num_dst_nodes(key, layer).expect("dst"), block.num_dst);
            assert_eq!(engine.get_num_edges(key, layer).expect("edges"), block.num_edges());
        }
        assert_eq!(batch.block(0).expect("outer").num_dst, batch.block(1).expect("inner").num_src);
        assert_eq!(batch.labels.len(), batch.block(1).expect("inner").num_dst);
        keys.push(key);
    }
    assert_eq!(keys.len(), 2 * steps);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert!(matches!(engine.get_next_batch(), Err(GnnError::Exhausted)));
    engine.shutdown().expect("shutdown");
    assert_eq!(engine.state(), EngineState::Shutdown);
}

#[test]
fn partitioned_engines_split_every_epoch() {
    let dir = dataset_dir();
    let mut all = BTreeSet::new();
    for worker in 0..2 {
        let mut engine = initialized(config(&dir), worker, 2);
        while let Some(key) = engine.sample_once().expect("sample_once") {
            assert_eq!(engine.get_next_batch().expect("get_next_batch"), key);
            assert!(all.insert(key), "{key} produced twice");
        }
    }
    let expected: BTreeSet<BatchKey> = (0..2)
        .flat_map(|e| (0..4).map(move |s| BatchKey::new(e, s)))
        .collect();
    assert_eq!(all, expected);
}

#[test]
fn running_engine_streams_batches_and_keeps_telemetry() {
    let dir = dataset_dir();
    let trace = dir.path().join("engine-trace.json");
    let mut engine = initialized(
        config(&dir)
            .cache(CachePolicy::Dynamic, 0.2)
            .dump_trace(&trace),
        0,
        1,
    );
    assert!(engine.cache().is_some());
    engine.start().expect("start");
    assert_eq!(engine.state(), EngineState::Running);

    let mut keys = Vec::new();
    loop {
        match engine.get_next_batch() {
            Ok(key) => {
                engine.trace_begin(key, "train").expect("trace_begin");
                engine.log_step(key, LogStepItem::TrainTime, 0.25).expect("log_step");
                engine
                    .log_step_add(key, LogStepItem::TrainTime, 0.25)
                    .expect("log_step_add");
                engine
                    .log_epoch_add(key.epoch(), LogEpochItem::TrainTime, 0.5)
                    .expect("log_epoch_add");
                engine.trace_end(key, "train").expect("trace_end");
                for item in [LogStepItem::SampleTime, LogStepItem::CopyTime] {
                    assert!(engine.get_log_step_value(key, item).expect("stage time") > 0.0);
                }
                assert_eq!(
                    engine.get_log_step_value(key, LogStepItem::TrainTime).expect("value"),
                    0.5
                );
                keys.push(key);
            }
            Err(GnnError::Exhausted) => break,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(keys.len(), 8);
    let unique: BTreeSet<_> = keys.iter().copied().collect();
    assert_eq!(unique.len(), 8);
    assert_eq!(
        engine.get_log_epoch_value(1, LogEpochItem::TrainTime).expect("epoch value"),
        2.0
    );
    for epoch in 0..2 {
        let bytes = engine
            .get_log_epoch_value(epoch, LogEpochItem::FeatureBytes)
            .expect("feature bytes");
        let missed = engine
            .get_log_epoch_value(epoch, LogEpochItem::MissBytes)
            .expect("miss bytes");
        assert!(bytes > 0.0 && missed <= bytes);
    }
    let report = engine.report_epoch(0).expect("report");
    assert_eq!(report.epoch, Some(0));
    let cache = engine.cache().expect("cache").stats();
    assert!(cache.cached <= cache.capacity);
    assert!(cache.inserts > 0);

    engine.shutdown().expect("shutdown");
    engine.shutdown().expect("second shutdown");
    assert!(trace.exists());
    assert!(matches!(
        engine.get_next_batch(),
        Err(GnnError::InvalidState { call: "get_next_batch", .. })
    ));
}

#[test]
fn missing_dataset_fails_data_init_and_keeps_state() {
    let dir = TempDir::new().expect("tempdir");
    let mut engine = Engine::new();
    engine
        .config(RunConfig::new(dir.path().join("absent")))
        .expect("config");
    assert!(matches!(engine.data_init(), Err(GnnError::Dataset { .. })));
    assert_eq!(engine.state(), EngineState::Configured);
}

#[test]
fn model_width_is_checked_at_data_init() {
    let dir = dataset_dir();
    let mut engine = Engine::new();
    engine.config(config(&dir).model_input_dim(5)).expect("config");
    assert!(matches!(
        engine.data_init(),
        Err(GnnError::FeatureDimensionMismatch { expected: 5, actual: 6 })
    ));
}
