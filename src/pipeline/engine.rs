use std::fmt;
use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::coordinator::build_cache;
use super::graph_pool::GraphPool;
use super::handoff::Handoff;
use crate::cache::CacheManager;
use crate::config::RunConfig;
use crate::extract::{ExtractedBatch, Extractor, RemappedBlock};
use crate::graph::Dataset;
use crate::profiler::{EpochReport, LogEpochItem, LogStepItem, Profiler, StepReport};
use crate::sampling::{steps_per_epoch, EpochShuffler, SampledBatch, Sampler};
use crate::types::{BatchKey, Context, GnnError, Result};

/// Phase of an [`Engine`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing configured.
    Idle,
    /// `config` accepted.
    Configured,
    /// Dataset loaded.
    DataReady,
    /// Sampling and training initialized; batches are produced by `sample_once`.
    Ready,
    /// Background sampling and copying threads are running.
    Running,
    /// Released.
    Shutdown,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Idle => "idle",
            EngineState::Configured => "configured",
            EngineState::DataReady => "data-ready",
            EngineState::Ready => "ready",
            EngineState::Running => "running",
            EngineState::Shutdown => "shutdown",
        })
    }
}

struct SampleSide {
    sampler: Sampler,
    batches: Peekable<EpochShuffler>,
    ctx: Context,
    worker: usize,
    num_workers: usize,
}

struct Background {
    stop: Arc<AtomicBool>,
    handoff: Arc<Handoff<SampledBatch>>,
    threads: Vec<JoinHandle<()>>,
}

/// Single-process facade over sampling, extraction and the graph pool.
///
/// Calls follow `config -> data_init -> sample_init / train_init ->
/// [start] -> sample_once / get_next_batch / get_blocks -> shutdown`;
/// anything out of order fails with [`GnnError::InvalidState`].
pub struct Engine {
    state: EngineState,
    config: Option<RunConfig>,
    graph: Option<Arc<Dataset>>,
    profiler: Option<Arc<Profiler>>,
    cache: Option<Arc<CacheManager>>,
    sample_side: Option<SampleSide>,
    extractor: Option<Arc<Extractor>>,
    pool: Option<Arc<GraphPool>>,
    current: Option<BatchKey>,
    background: Option<Background>,
    failure: Arc<Mutex<Option<GnnError>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine in [`EngineState::Idle`].
    pub fn new() -> Self {
        Self {
            state: EngineState::Idle,
            config: None,
            graph: None,
            profiler: None,
            cache: None,
            sample_side: None,
            extractor: None,
            pool: None,
            current: None,
            background: None,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Current phase.
    pub fn state(&self) -> EngineState {
        self.state
    }

    fn require(&self, call: &'static str, allowed: &[EngineState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(GnnError::InvalidState {
                call,
                state: self.state.to_string(),
            })
        }
    }

    fn loaded(&self, call: &'static str) -> Result<(&RunConfig, &Arc<Dataset>, &Arc<Profiler>)> {
        match (&self.config, &self.graph, &self.profiler) {
            (Some(config), Some(graph), Some(profiler)) if self.state != EngineState::Shutdown => {
                Ok((config, graph, profiler))
            }
            _ => Err(GnnError::InvalidState {
                call,
                state: self.state.to_string(),
            }),
        }
    }

    /// Accepts a run configuration; may be repeated until `data_init`.
    pub fn config(&mut self, config: RunConfig) -> Result<()> {
        self.require("config", &[EngineState::Idle, EngineState::Configured])?;
        config.validate()?;
        debug!(dataset = %config.dataset_path.display(), "engine.config");
        self.config = Some(config);
        self.state = EngineState::Configured;
        Ok(())
    }

    /// Loads the configured dataset directory.
    pub fn data_init(&mut self) -> Result<()> {
        self.require("data_init", &[EngineState::Configured])?;
        let path = self
            .config
            .as_ref()
            .map(|c| c.dataset_path.clone())
            .unwrap_or_default();
        let dataset = Dataset::load(&path)?;
        self.data_init_with(dataset)
    }

    /// Uses an in-memory dataset instead of loading one.
    pub fn data_init_with(&mut self, dataset: Dataset) -> Result<()> {
        self.require("data_init", &[EngineState::Configured])?;
        let Some(config) = &self.config else {
            return Err(GnnError::InvalidState {
                call: "data_init",
                state: self.state.to_string(),
            });
        };
        if let Some(expected) = config.model_input_dim {
            if expected != dataset.feat_dim() {
                return Err(GnnError::FeatureDimensionMismatch {
                    expected,
                    actual: dataset.feat_dim(),
                });
            }
        }
        let steps = steps_per_epoch(dataset.train_set().len(), config.batch_size);
        let mut profiler = Profiler::new(config.num_epoch, steps, config.profile_level);
        if config.log_node_access {
            profiler = profiler.with_node_access(dataset.num_nodes());
        }
        if config.dump_trace.is_some() {
            profiler = profiler.with_trace();
        }
        info!(
            nodes = dataset.num_nodes(),
            edges = dataset.num_edges(),
            train = dataset.train_set().len(),
            steps_per_epoch = steps,
            "engine.data_init.done"
        );
        self.profiler = Some(Arc::new(profiler));
        self.graph = Some(Arc::new(dataset));
        self.state = EngineState::DataReady;
        Ok(())
    }

    /// Prepares worker `worker_id` of `num_workers` to sample on `ctx`.
    pub fn sample_init(&mut self, ctx: Context, worker_id: usize, num_workers: usize) -> Result<()> {
        self.require("sample_init", &[EngineState::DataReady])?;
        if self.sample_side.is_some() {
            return Err(GnnError::InvalidState {
                call: "sample_init",
                state: format!("{} (already sample-initialized)", self.state),
            });
        }
        let (config, graph, profiler) = self.loaded("sample_init")?;
        let sampler = Sampler::new(Arc::clone(graph), config, worker_id as u64)?
            .with_profiler(Arc::clone(profiler));
        let batches = EpochShuffler::new(
            graph.train_set(),
            config.batch_size,
            config.num_epoch,
            config.seed,
        )?
        .partitioned(worker_id, num_workers)?
        .peekable();
        debug!(device = %ctx, worker_id, num_workers, "engine.sample_init");
        self.sample_side = Some(SampleSide {
            sampler,
            batches,
            ctx,
            worker: worker_id,
            num_workers,
        });
        self.promote();
        Ok(())
    }

    /// Prepares the trainer side on `ctx`: cache, extractor and pool.
    pub fn train_init(&mut self, ctx: Context) -> Result<()> {
        self.require("train_init", &[EngineState::DataReady])?;
        if self.extractor.is_some() {
            return Err(GnnError::InvalidState {
                call: "train_init",
                state: format!("{} (already train-initialized)", self.state),
            });
        }
        let (config, graph, profiler) = self.loaded("train_init")?;
        let mut config = config.clone();
        config.trainer_ctx = ctx;
        let cache = build_cache(graph, &config, profiler)?;
        let extractor = Extractor::new(Arc::clone(graph), cache.clone(), ctx, config.model_input_dim)?
            .with_profiler(Arc::clone(profiler))
            .with_sanity_check(config.sanity_check);
        self.pool = Some(Arc::new(GraphPool::new(config.max_copying_jobs)));
        self.extractor = Some(Arc::new(extractor));
        self.cache = cache;
        debug!(device = %ctx, "engine.train_init");
        self.promote();
        Ok(())
    }

    fn promote(&mut self) {
        if self.sample_side.is_some() && self.extractor.is_some() {
            self.state = EngineState::Ready;
        }
    }

    /// Starts background sampling and copying threads.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", &[EngineState::Ready])?;
        let (Some(side), Some(extractor), Some(pool), Some(config), Some(profiler)) = (
            self.sample_side.take(),
            self.extractor.clone(),
            self.pool.clone(),
            self.config.clone(),
            self.profiler.clone(),
        ) else {
            return Err(GnnError::InvalidState {
                call: "start",
                state: self.state.to_string(),
            });
        };
        let stop = Arc::new(AtomicBool::new(false));
        let handoff = Arc::new(Handoff::new(config.max_sampling_jobs, 1));
        let sampling = {
            let (stop, handoff, failure) = (Arc::clone(&stop), Arc::clone(&handoff), Arc::clone(&self.failure));
            let (pool, profiler) = (Arc::clone(&pool), Arc::clone(&profiler));
            let num_epoch = config.num_epoch as u32;
            thread::Builder::new()
                .name("gnnpipe-sample".into())
                .spawn(move || {
                    if let Err(err) = sample_loop(side, &handoff, &profiler, &stop, num_epoch) {
                        fail(&failure, err, &handoff, &pool);
                    }
                })?
        };
        let copying = {
            let (stop, handoff, failure) = (Arc::clone(&stop), Arc::clone(&handoff), Arc::clone(&self.failure));
            let poll = config.handoff_poll;
            let num_epoch = config.num_epoch as u32;
            thread::Builder::new()
                .name("gnnpipe-copy".into())
                .spawn(move || {
                    let result =
                        copy_loop(&extractor, &handoff, &pool, &profiler, &stop, poll, num_epoch);
                    match result {
                        Ok(()) => pool.close(),
                        Err(err) => fail(&failure, err, &handoff, &pool),
                    }
                })?
        };
        self.background = Some(Background {
            stop,
            handoff,
            threads: vec![sampling, copying],
        });
        self.state = EngineState::Running;
        info!("engine.start");
        Ok(())
    }

    /// Samples and extracts the next owned batch into the pool, releasing
    /// the batch last handed out by [`Self::get_next_batch`].
    ///
    /// Returns `None` once every batch of the run has been sampled. Fails
    /// with [`GnnError::ResourceExhausted`] when the pool is full.
    pub fn sample_once(&mut self) -> Result<Option<BatchKey>> {
        self.require("sample_once", &[EngineState::Ready])?;
        let (Some(side), Some(extractor), Some(pool)) =
            (self.sample_side.as_mut(), self.extractor.as_ref(), self.pool.as_ref())
        else {
            return Err(GnnError::InvalidState {
                call: "sample_once",
                state: self.state.to_string(),
            });
        };
        if let Some(previous) = self.current.take() {
            pool.release(previous);
        }
        if pool.len() >= pool.capacity() {
            return Err(GnnError::ResourceExhausted("graph pool"));
        }
        let Some(next) = side.batches.next() else {
            pool.close();
            return Ok(None);
        };
        let key = next.key;
        let t = Instant::now();
        let sampled = side.sampler.sample(key, &next.seeds)?;
        let sample_secs = t.elapsed().as_secs_f64();
        let t = Instant::now();
        let batch = extractor.process(&sampled)?;
        let copy_secs = t.elapsed().as_secs_f64();
        if let Some(profiler) = &self.profiler {
            log_sample(profiler, key, sample_secs);
            log_copy(profiler, &batch, copy_secs);
        }
        pool.submit(batch)?;
        if side.batches.peek().is_none() {
            pool.close();
        }
        Ok(Some(key))
    }

    /// Key of the next batch ready for training; releases the previous one.
    pub fn get_next_batch(&mut self) -> Result<BatchKey> {
        self.require("get_next_batch", &[EngineState::Ready, EngineState::Running])?;
        let Some(pool) = self.pool.clone() else {
            return Err(GnnError::InvalidState {
                call: "get_next_batch",
                state: self.state.to_string(),
            });
        };
        if let Some(previous) = self.current.take() {
            pool.release(previous);
        }
        let running = self.state == EngineState::Running;
        let timeout = match (&self.config, running) {
            (Some(config), true) => config.barrier_timeout,
            _ => Duration::ZERO,
        };
        match pool.next_key(Some(timeout)) {
            Ok(key) => {
                self.current = Some(key);
                Ok(key)
            }
            Err(GnnError::SynchronizationTimeout { .. }) if !running => Err(GnnError::InvalidState {
                call: "get_next_batch",
                state: format!("{} (no batch sampled)", self.state),
            }),
            Err(GnnError::Aborted(what)) => Err(self.failure.lock().take().unwrap_or(GnnError::Aborted(what))),
            Err(err) => Err(err),
        }
    }

    /// Blocks, features and labels of `key`.
    pub fn get_blocks(&self, key: BatchKey) -> Result<Arc<ExtractedBatch>> {
        self.require("get_blocks", &[EngineState::Ready, EngineState::Running])?;
        match &self.pool {
            Some(pool) => pool.get(key),
            None => Err(GnnError::UnknownBatch(key)),
        }
    }

    fn block_stat(&self, key: BatchKey, layer: usize, f: fn(&RemappedBlock) -> usize) -> Result<usize> {
        let batch = self.get_blocks(key)?;
        Ok(f(batch.block(layer)?))
    }

    /// Source node count of `layer` in batch `key`.
    pub fn get_num_src_nodes(&self, key: BatchKey, layer: usize) -> Result<usize> {
        self.block_stat(key, layer, |b| b.num_src)
    }

    /// Destination node count of `layer` in batch `key`.
    pub fn get_num_dst_nodes(&self, key: BatchKey, layer: usize) -> Result<usize> {
        self.block_stat(key, layer, |b| b.num_dst)
    }

    /// Edge count of `layer` in batch `key`.
    pub fn get_num_edges(&self, key: BatchKey, layer: usize) -> Result<usize> {
        self.block_stat(key, layer, RemappedBlock::num_edges)
    }

    /// Epochs in the run.
    pub fn num_epoch(&self) -> Result<usize> {
        Ok(self.loaded("num_epoch")?.0.num_epoch)
    }

    /// Steps in every epoch.
    pub fn steps_per_epoch(&self) -> Result<usize> {
        Ok(self.loaded("steps_per_epoch")?.2.steps_per_epoch())
    }

    /// Feature width of the dataset.
    pub fn feat_dim(&self) -> Result<usize> {
        Ok(self.loaded("feat_dim")?.1.feat_dim())
    }

    /// Class count of the dataset.
    pub fn num_class(&self) -> Result<usize> {
        Ok(self.loaded("num_class")?.1.num_class())
    }

    /// The run's profiler.
    pub fn profiler(&self) -> Result<&Arc<Profiler>> {
        Ok(self.loaded("profiler")?.2)
    }

    /// Cache in use, once `train_init` built one.
    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Sets a step metric.
    pub fn log_step(&self, key: BatchKey, item: LogStepItem, value: f64) -> Result<()> {
        self.profiler()?.log_step(key, item, value);
        Ok(())
    }

    /// Accumulates into a step metric.
    pub fn log_step_add(&self, key: BatchKey, item: LogStepItem, value: f64) -> Result<()> {
        self.profiler()?.log_step_add(key, item, value);
        Ok(())
    }

    /// Accumulates into an epoch metric.
    pub fn log_epoch_add(&self, epoch: u32, item: LogEpochItem, value: f64) -> Result<()> {
        self.profiler()?.log_epoch_add(epoch, item, value);
        Ok(())
    }

    /// Value of a step metric.
    pub fn get_log_step_value(&self, key: BatchKey, item: LogStepItem) -> Result<f64> {
        Ok(self.profiler()?.get_step(key, item))
    }

    /// Value of an epoch metric.
    pub fn get_log_epoch_value(&self, epoch: u32, item: LogEpochItem) -> Result<f64> {
        Ok(self.profiler()?.get_epoch(epoch, item))
    }

    /// Step report for `key`.
    pub fn report_step(&self, key: BatchKey) -> Result<StepReport> {
        Ok(self.profiler()?.report_step(key.epoch(), key.step()))
    }

    /// Epoch report for `epoch`.
    pub fn report_epoch(&self, epoch: u32) -> Result<EpochReport> {
        Ok(self.profiler()?.report_epoch(epoch))
    }

    /// Opens a trace span.
    pub fn trace_begin(&self, key: BatchKey, event: &str) -> Result<()> {
        self.profiler()?.trace_begin(key, event);
        Ok(())
    }

    /// Closes a trace span.
    pub fn trace_end(&self, key: BatchKey, event: &str) -> Result<()> {
        self.profiler()?.trace_end(key, event);
        Ok(())
    }

    /// Stops background threads and releases everything. Repeated calls
    /// are no-ops.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == EngineState::Shutdown {
            return Ok(());
        }
        if let Some(background) = self.background.take() {
            background.stop.store(true, Ordering::Release);
            background.handoff.abort();
            if let Some(pool) = &self.pool {
                pool.abort();
            }
            for handle in background.threads {
                if handle.join().is_err() {
                    warn!("engine.shutdown.worker_panicked");
                }
            }
        }
        if let (Some(config), Some(profiler)) = (&self.config, &self.profiler) {
            if let Some(path) = &config.dump_trace {
                profiler.dump_trace(path)?;
            }
        }
        self.sample_side = None;
        self.extractor = None;
        self.pool = None;
        self.cache = None;
        self.current = None;
        self.state = EngineState::Shutdown;
        info!("engine.shutdown");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "engine.drop.shutdown_failed");
        }
    }
}

fn log_sample(profiler: &Profiler, key: BatchKey, secs: f64) {
    profiler.log_step(key, LogStepItem::SampleTime, secs);
    profiler.log_epoch_add(key.epoch(), LogEpochItem::SampleTime, secs);
}

fn log_copy(profiler: &Profiler, batch: &ExtractedBatch, secs: f64) {
    let key = batch.key;
    profiler.log_step(key, LogStepItem::CopyTime, secs);
    profiler.log_epoch_add(key.epoch(), LogEpochItem::CopyTime, secs);
    profiler.log_epoch_add(key.epoch(), LogEpochItem::FeatureBytes, batch.total_bytes as f64);
    profiler.log_epoch_add(key.epoch(), LogEpochItem::MissBytes, batch.miss_bytes as f64);
}

fn fail(
    failure: &Mutex<Option<GnnError>>,
    err: GnnError,
    handoff: &Handoff<SampledBatch>,
    pool: &GraphPool,
) {
    if !matches!(err, GnnError::Aborted(_)) {
        warn!(error = %err, "engine.background.failed");
        failure.lock().get_or_insert(err);
    }
    handoff.abort();
    pool.abort();
}

fn sample_loop(
    mut side: SampleSide,
    handoff: &Handoff<SampledBatch>,
    profiler: &Profiler,
    stop: &AtomicBool,
    num_epoch: u32,
) -> Result<()> {
    let mut finished = 0u32;
    for next in side.batches.by_ref() {
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }
        while finished < next.key.epoch() {
            handoff.mark_finished(finished);
            finished += 1;
        }
        let t = Instant::now();
        let sampled = side.sampler.sample(next.key, &next.seeds)?;
        let secs = t.elapsed().as_secs_f64();
        log_sample(profiler, next.key, secs);
        handoff.publish(sampled)?;
        debug!(
            key = %next.key,
            worker = side.worker,
            workers = side.num_workers,
            device = %side.ctx,
            sample_secs = secs,
            "engine.sample.published"
        );
    }
    while finished < num_epoch {
        handoff.mark_finished(finished);
        finished += 1;
    }
    Ok(())
}

fn copy_loop(
    extractor: &Extractor,
    handoff: &Handoff<SampledBatch>,
    pool: &GraphPool,
    profiler: &Profiler,
    stop: &AtomicBool,
    poll: Duration,
    num_epoch: u32,
) -> Result<()> {
    let mut epoch = 0u32;
    while epoch < num_epoch {
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }
        match handoff.recv_timeout(poll)? {
            Some(sampled) => {
                let t = Instant::now();
                let batch = extractor.process(&sampled)?;
                log_copy(profiler, &batch, t.elapsed().as_secs_f64());
                pool.submit(batch)?;
            }
            None => {
                while epoch < num_epoch && handoff.epoch_drained(epoch) {
                    epoch += 1;
                }
            }
        }
    }
    Ok(())
}
