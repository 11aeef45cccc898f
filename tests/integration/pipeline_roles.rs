#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gnnpipe::graph::SyntheticGraph;
use gnnpipe::pipeline::{Coordinator, LifecycleState};
use gnnpipe::{
    launch, BatchKey, CachePolicy, Dataset, ErrorKind, ExtractedBatch, GnnError, Result, Role,
    RunConfig,
};
use parking_lot::Mutex;
use tempfile::TempDir;

fn graph() -> Arc<Dataset> {
    Arc::new(
        SyntheticGraph::new(240, 5)
            .feat_dim(4)
            .train_ratio(0.5)
            .seed(23)
            .build()
            .expect("generate"),
    )
}

fn config() -> RunConfig {
    RunConfig::new("mem")
        .batch_size(16)
        .fanout(vec![3, 3])
        .num_epoch(2)
        .seed(4)
        .barrier_timeout(Duration::from_secs(30))
        .handoff_poll(Duration::from_millis(2))
        .sanity_check(true)
}

type Seen = Arc<Mutex<Vec<(Role, BatchKey)>>>;

fn recorder(
    seen: &Seen,
) -> impl FnMut(Role, usize) -> Box<dyn FnMut(&ExtractedBatch) -> Result<()> + Send> + '_ {
    move |role, _worker| {
        let seen = Arc::clone(seen);
        Box::new(move |batch: &ExtractedBatch| -> Result<()> {
            batch.check()?;
            seen.lock().push((role, batch.key));
            Ok(())
        })
    }
}

fn assert_every_step_once(seen: &[(Role, BatchKey)], num_epoch: usize, steps: usize) {
    let mut counts: BTreeMap<BatchKey, usize> = BTreeMap::new();
    for (_, key) in seen {
        *counts.entry(*key).or_default() += 1;
    }
    assert_eq!(counts.len(), num_epoch * steps);
    assert!(counts.values().all(|n| *n == 1), "duplicate keys: {counts:?}");
    for epoch in 0..num_epoch as u32 {
        for step in 0..steps as u32 {
            assert!(counts.contains_key(&BatchKey::new(epoch, step)));
        }
    }
}

#[test]
fn every_layout_trains_each_step_exactly_once() {
    let graph = graph();
    let steps = graph.train_set().len().div_ceil(16);
    for (samplers, trainers, switchers) in [(1, 1, 0), (2, 3, 0), (1, 1, 2), (0, 0, 2), (3, 0, 1)] {
        let seen: Seen = Arc::default();
        let summary = launch(
            Arc::clone(&graph),
            config().workers(samplers, trainers, switchers),
            recorder(&seen),
        )
        .unwrap_or_else(|e| panic!("layout {samplers}/{trainers}/{switchers}: {e}"));

        assert_eq!(summary.steps_per_epoch, steps);
        assert_eq!(summary.batches_trained as usize, 2 * steps);
        assert_eq!(summary.batches_sampled as usize, 2 * steps);
        assert_eq!(summary.workers.len(), samplers + trainers + switchers);
        assert!(summary
            .workers
            .iter()
            .all(|w| w.state == LifecycleState::Shutdown));
        assert_eq!(summary.epochs.len(), 2);
        assert_every_step_once(&seen.lock(), 2, steps);
    }
}

#[test]
fn switchers_alternate_duties() {
    let graph = graph();
    let seen: Seen = Arc::default();
    let summary = launch(Arc::clone(&graph), config().workers(1, 0, 1), recorder(&seen))
        .expect("run");
    let switcher = summary
        .workers
        .iter()
        .find(|w| w.role == Role::Switcher)
        .expect("switcher report");
    assert!(switcher.sampled > 0);
    assert!(switcher.trained >= switcher.sampled);
    assert!(switcher.switches > 0);
    assert!(seen.lock().iter().all(|(role, _)| *role == Role::Switcher));
}

#[test]
fn cached_run_reports_hit_rates() {
    let graph = graph();
    let seen: Seen = Arc::default();
    let summary = launch(
        Arc::clone(&graph),
        config().cache(CachePolicy::ByDegree, 0.25).log_node_access(true),
        recorder(&seen),
    )
    .expect("run");
    let cache = summary.cache.expect("cache stats");
    assert_eq!(cache.capacity, 60);
    assert!(cache.hits > 0);
    assert!(cache.hit_rate > 0.0 && cache.hit_rate <= 1.0);
    let access = summary.node_access.expect("node access");
    assert!(access.total_accesses > 0);
    assert!(!access.top.is_empty());
    assert!(access.top.windows(2).all(|w| w[0].count >= w[1].count));
}

#[test]
fn train_step_error_stops_the_run() {
    let graph = graph();
    let calls = Arc::new(AtomicUsize::new(0));
    let err = launch(Arc::clone(&graph), config().workers(2, 2, 0), |_, _| {
        let calls = Arc::clone(&calls);
        move |_: &ExtractedBatch| -> Result<()> {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(GnnError::InvalidArgument("loss diverged".into()));
            }
            Ok(())
        }
    })
    .unwrap_err();
    match err {
        GnnError::InvalidArgument(msg) => assert_eq!(msg, "loss diverged"),
        other => panic!("expected the step error, got {other:?}"),
    }
    assert!(calls.load(Ordering::SeqCst) < 16);
}

#[test]
fn stalled_trainer_times_out_the_barrier() {
    let graph = graph();
    let config = config()
        .max_jobs(64, 64)
        .barrier_timeout(Duration::from_millis(100));
    let err = launch(Arc::clone(&graph), config, |_, _| {
        |_: &ExtractedBatch| -> Result<()> {
            thread::sleep(Duration::from_millis(400));
            Ok(())
        }
    })
    .unwrap_err();
    assert!(matches!(err, GnnError::SynchronizationTimeout { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::SynchronizationTimeout);
}

#[test]
fn trainer_stuck_mid_epoch_fails_the_blocked_sampler() {
    let graph = graph();
    let config = config()
        .max_jobs(1, 1)
        .barrier_timeout(Duration::from_millis(100));
    let first = Arc::new(AtomicUsize::new(0));
    let err = launch(Arc::clone(&graph), config, |_, _| {
        let first = Arc::clone(&first);
        move |_: &ExtractedBatch| -> Result<()> {
            if first.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(1500));
            }
            Ok(())
        }
    })
    .unwrap_err();
    match err {
        GnnError::SynchronizationTimeout { what, waited } => {
            assert_eq!(what, "handoff");
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("expected a handoff timeout, got {other:?}"),
    }
    assert_eq!(first.load(Ordering::SeqCst), 1);
}

#[test]
fn a_coordinator_runs_once_and_dumps_its_trace() {
    let dir = TempDir::new().expect("tempdir");
    let trace = dir.path().join("trace.json");
    let coordinator =
        Coordinator::new(graph(), config().num_epoch(1).dump_trace(&trace)).expect("coordinator");
    let noop = |_: Role, _: usize| |_: &ExtractedBatch| -> Result<()> { Ok(()) };
    coordinator.run(noop).expect("first run");
    assert!(matches!(
        coordinator.run(noop),
        Err(GnnError::InvalidState { call: "run", .. })
    ));

    let raw = std::fs::read_to_string(&trace).expect("trace file");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("trace json");
    let events = parsed["traceEvents"].as_array().expect("events");
    let names: Vec<&str> = events.iter().filter_map(|e| e["name"].as_str()).collect();
    for phase in ["sample", "copy", "train"] {
        assert!(names.contains(&phase), "missing {phase} spans");
    }
}

#[test]
fn invalid_layouts_are_rejected_up_front() {
    for layout in [(0, 1, 0), (1, 0, 0)] {
        let err = Coordinator::new(graph(), config().workers(layout.0, layout.1, layout.2))
            .err()
            .expect("invalid layout");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
    let err = Coordinator::new(graph(), config().model_input_dim(7))
        .err()
        .expect("width mismatch");
    assert!(matches!(err, GnnError::FeatureDimensionMismatch { .. }));
}
