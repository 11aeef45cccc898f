use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::barrier::Barrier;
use super::handoff::Handoff;
use super::role::{Duty, LifecycleState, Role, RoleEvent, RoleMachine};
use crate::cache::{CacheManager, CacheStats};
use crate::config::RunConfig;
use crate::extract::{ExtractedBatch, Extractor};
use crate::graph::Dataset;
use crate::profiler::{EpochReport, LogEpochItem, LogStepItem, NodeAccessSummary, Profiler, StepReport};
use crate::sampling::{steps_per_epoch, EpochPlan, SampledBatch, Sampler};
use crate::types::{BatchKey, GnnError, Result};

/// The model side of a run: consumes one extracted batch per call.
pub trait TrainStep: Send {
    /// Runs one optimisation step on `batch`.
    fn train(&mut self, batch: &ExtractedBatch) -> Result<()>;
}

impl<F> TrainStep for F
where
    F: FnMut(&ExtractedBatch) -> Result<()> + Send,
{
    fn train(&mut self, batch: &ExtractedBatch) -> Result<()> {
        self(batch)
    }
}

/// What one worker did.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerReport {
    /// Role played.
    pub role: Role,
    /// Index within the role.
    pub worker: usize,
    /// Batches sampled.
    pub sampled: u64,
    /// Batches trained.
    pub trained: u64,
    /// Duty changes (switchers only).
    pub switches: u64,
    /// Final state.
    pub state: LifecycleState,
}

/// Outcome of [`launch`].
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Epochs run.
    pub num_epoch: usize,
    /// Steps in each epoch.
    pub steps_per_epoch: usize,
    /// Batches sampled across all workers.
    pub batches_sampled: u64,
    /// Batches trained across all workers.
    pub batches_trained: u64,
    /// Wall-clock seconds from launch to the end barrier.
    pub elapsed_secs: f64,
    /// Per-worker reports.
    pub workers: Vec<WorkerReport>,
    /// Cache counters, when a cache was configured.
    pub cache: Option<CacheStats>,
    /// Per-epoch aggregates.
    pub epochs: Vec<EpochReport>,
    /// Step metrics averaged over the run.
    pub step_average: StepReport,
    /// Most accessed nodes, when access counting was enabled.
    pub node_access: Option<NodeAccessSummary>,
}

/// Shared state of a multi-role run. Every worker thread holds an `Arc`.
pub struct Coordinator {
    config: RunConfig,
    graph: Arc<Dataset>,
    cache: Option<Arc<CacheManager>>,
    profiler: Arc<Profiler>,
    barrier: Barrier,
    handoff: Handoff<SampledBatch>,
    steps_per_epoch: usize,
    epoch_started: Mutex<Instant>,
    launched: AtomicBool,
}

impl Coordinator {
    /// Validates `config`, builds the cache and the synchronization
    /// primitives.
    pub fn new(graph: Arc<Dataset>, config: RunConfig) -> Result<Arc<Self>> {
        config.validate()?;
        if graph.train_set().is_empty() {
            return Err(GnnError::EmptySeedSet);
        }
        if let Some(expected) = config.model_input_dim {
            if expected != graph.feat_dim() {
                return Err(GnnError::FeatureDimensionMismatch {
                    expected,
                    actual: graph.feat_dim(),
                });
            }
        }
        let steps = steps_per_epoch(graph.train_set().len(), config.batch_size);
        let mut profiler = Profiler::new(config.num_epoch, steps, config.profile_level);
        if config.log_node_access {
            profiler = profiler.with_node_access(graph.num_nodes());
        }
        if config.dump_trace.is_some() {
            profiler = profiler.with_trace();
        }
        let profiler = Arc::new(profiler);
        let cache = build_cache(&graph, &config, &profiler)?;
        let layout = config.workers;
        info!(
            samplers = layout.samplers,
            trainers = layout.trainers,
            switchers = layout.switchers,
            steps_per_epoch = steps,
            num_epoch = config.num_epoch,
            arch = %config.run_arch,
            "pipeline.coordinator.ready"
        );
        Ok(Arc::new(Self {
            barrier: Barrier::new("run barrier", layout.parties(), config.barrier_timeout),
            handoff: Handoff::new(config.max_sampling_jobs, layout.samplers)
                .with_stall_timeout(config.barrier_timeout),
            steps_per_epoch: steps,
            epoch_started: Mutex::new(Instant::now()),
            launched: AtomicBool::new(false),
            config,
            graph,
            cache,
            profiler,
        }))
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Shared metric registry.
    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    /// Shared cache, if configured.
    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Steps in each epoch.
    pub fn steps_per_epoch(&self) -> usize {
        self.steps_per_epoch
    }

    /// Batches published to trainers so far.
    pub fn published(&self) -> u64 {
        self.handoff.published()
    }

    /// Breaks the barrier and the handoff so every worker fails fast.
    pub fn abort(&self) {
        self.barrier.abort();
        self.handoff.abort();
    }

    /// Body of sampler `id`.
    pub fn run_sampler(self: &Arc<Self>, id: usize) -> Result<WorkerReport> {
        let mut machine = RoleMachine::new(Role::Sampler, id);
        let result = self.sampler_loop(&mut machine);
        self.finish(machine, result)
    }

    /// Body of trainer `id`.
    pub fn run_trainer(self: &Arc<Self>, id: usize, step: &mut dyn TrainStep) -> Result<WorkerReport> {
        let mut machine = RoleMachine::new(Role::Trainer, id);
        let result = self.trainer_loop(&mut machine, step);
        self.finish(machine, result)
    }

    /// Body of switcher `id`.
    pub fn run_switcher(
        self: &Arc<Self>,
        id: usize,
        step: &mut dyn TrainStep,
    ) -> Result<WorkerReport> {
        let mut machine = RoleMachine::new(Role::Switcher, id);
        let result = self.switcher_loop(&mut machine, step);
        self.finish(machine, result)
    }

    fn finish(&self, mut machine: RoleMachine, result: Result<Counts>) -> Result<WorkerReport> {
        let role = machine.role();
        let state = machine.state();
        machine.apply(RoleEvent::Shutdown)?;
        match result {
            Ok(counts) => Ok(WorkerReport {
                role,
                worker: counts.worker,
                sampled: counts.sampled,
                trained: counts.trained,
                switches: machine.switches(),
                state: machine.state(),
            }),
            Err(err) => {
                if !matches!(err, GnnError::Aborted(_)) {
                    error!(role = %role, state = %state, error = %err, "pipeline.worker.failed");
                }
                self.abort();
                Err(err)
            }
        }
    }

    fn sampler_loop(&self, machine: &mut RoleMachine) -> Result<Counts> {
        let id = machine.worker();
        let mut counts = Counts::new(id);
        machine.apply(RoleEvent::Init)?;
        let mut sampler = self.new_sampler(id as u64)?;
        machine.apply(RoleEvent::Initialized)?;
        self.start(machine)?;
        let producers = self.config.workers.producers();
        for epoch in 0..self.config.num_epoch as u32 {
            let plan = self.plan(epoch);
            for step in plan.owned_steps(id, producers) {
                let sampled = self.sample_step(&mut sampler, &plan, step)?;
                let key = sampled.key;
                let t = Instant::now();
                self.handoff.publish(sampled)?;
                self.profiler
                    .log_step(key, LogStepItem::SendTime, t.elapsed().as_secs_f64());
                counts.sampled += 1;
            }
            self.handoff.mark_finished(epoch);
            self.end_epoch(machine, epoch)?;
        }
        self.drain(machine)?;
        Ok(counts)
    }

    fn trainer_loop(&self, machine: &mut RoleMachine, step: &mut dyn TrainStep) -> Result<Counts> {
        let id = machine.worker();
        let mut counts = Counts::new(id);
        machine.apply(RoleEvent::Init)?;
        let extractor = self.new_extractor()?;
        machine.apply(RoleEvent::Initialized)?;
        self.start(machine)?;
        for epoch in 0..self.config.num_epoch as u32 {
            counts.trained += self.consume_epoch(&extractor, step, epoch)?;
            self.end_epoch(machine, epoch)?;
        }
        self.drain(machine)?;
        Ok(counts)
    }

    fn switcher_loop(&self, machine: &mut RoleMachine, step: &mut dyn TrainStep) -> Result<Counts> {
        let id = machine.worker();
        let mut counts = Counts::new(id);
        machine.apply(RoleEvent::Init)?;
        let producer = self.config.workers.samplers + id;
        let mut sampler = self.new_sampler(producer as u64)?;
        let extractor = self.new_extractor()?;
        machine.apply(RoleEvent::Initialized)?;
        self.start(machine)?;
        let producers = self.config.workers.producers();
        for epoch in 0..self.config.num_epoch as u32 {
            let plan = self.plan(epoch);
            for owned in plan.owned_steps(producer, producers) {
                switch_duty(machine, Duty::Sampling)?;
                let sampled = self.sample_step(&mut sampler, &plan, owned)?;
                counts.sampled += 1;
                switch_duty(machine, Duty::Training)?;
                self.train_one(&extractor, step, &sampled)?;
                counts.trained += 1;
            }
            switch_duty(machine, Duty::Training)?;
            counts.trained += self.consume_epoch(&extractor, step, epoch)?;
            self.end_epoch(machine, epoch)?;
        }
        self.drain(machine)?;
        Ok(counts)
    }

    fn start(&self, machine: &mut RoleMachine) -> Result<()> {
        let wait = self.barrier.wait()?;
        if wait.is_leader {
            *self.epoch_started.lock() = Instant::now();
        }
        machine.apply(RoleEvent::Start)?;
        Ok(())
    }

    fn end_epoch(&self, machine: &mut RoleMachine, epoch: u32) -> Result<()> {
        machine.apply(RoleEvent::EpochDone)?;
        let wait = self.barrier.wait()?;
        if wait.is_leader {
            self.settle_epoch(epoch);
        }
        let last = epoch as usize + 1 >= self.config.num_epoch;
        machine.apply(if last {
            RoleEvent::Finish
        } else {
            RoleEvent::NextEpoch
        })?;
        Ok(())
    }

    fn drain(&self, machine: &mut RoleMachine) -> Result<()> {
        debug_assert_eq!(machine.state(), LifecycleState::Draining);
        self.barrier.wait()?;
        Ok(())
    }

    fn settle_epoch(&self, epoch: u32) {
        let total = {
            let mut started = self.epoch_started.lock();
            let total = started.elapsed().as_secs_f64();
            *started = Instant::now();
            total
        };
        let p = &self.profiler;
        p.log_epoch(epoch, LogEpochItem::TotalTime, total);
        let feature = p.get_epoch(epoch, LogEpochItem::FeatureBytes);
        let miss = p.get_epoch(epoch, LogEpochItem::MissBytes);
        let hit_rate = if feature > 0.0 { 1.0 - miss / feature } else { 0.0 };
        p.log_epoch(epoch, LogEpochItem::CacheHitRate, hit_rate);
        p.report_epoch(epoch);
    }

    /// Trains everything published for `epoch` until all samplers are
    /// done with it and the handoff is empty. Waiting longer than the
    /// barrier timeout for the next batch fails the run.
    fn consume_epoch(&self, extractor: &Extractor, step: &mut dyn TrainStep, epoch: u32) -> Result<u64> {
        let mut trained = 0;
        let mut idle_since = Instant::now();
        loop {
            let t = Instant::now();
            match self.handoff.recv_timeout(self.config.handoff_poll)? {
                Some(sampled) => {
                    if sampled.key.epoch() != epoch {
                        return Err(GnnError::InvalidArgument(format!(
                            "received batch {} during epoch {epoch}",
                            sampled.key
                        )));
                    }
                    self.profiler.log_step(
                        sampled.key,
                        LogStepItem::RecvTime,
                        t.elapsed().as_secs_f64(),
                    );
                    self.train_one(extractor, step, &sampled)?;
                    trained += 1;
                    idle_since = Instant::now();
                }
                None if self.handoff.epoch_drained(epoch) => return Ok(trained),
                None if idle_since.elapsed() >= self.config.barrier_timeout => {
                    return Err(GnnError::SynchronizationTimeout {
                        what: "handoff",
                        waited: idle_since.elapsed(),
                    });
                }
                None => {}
            }
        }
    }

    fn plan(&self, epoch: u32) -> EpochPlan {
        let t = Instant::now();
        let plan = EpochPlan::new(
            self.graph.train_set(),
            self.config.batch_size,
            self.config.seed,
            epoch,
        );
        let secs = t.elapsed().as_secs_f64();
        if plan.num_steps() > 0 {
            self.profiler
                .log_step_add(BatchKey::new(epoch, 0), LogStepItem::ShuffleTime, secs);
        }
        plan
    }

    fn sample_step(&self, sampler: &mut Sampler, plan: &EpochPlan, step: usize) -> Result<SampledBatch> {
        let key = BatchKey::new(plan.epoch(), step as u32);
        self.profiler.trace_begin(key, "sample");
        let t = Instant::now();
        let sampled = sampler.sample(key, plan.batch(step))?;
        let secs = t.elapsed().as_secs_f64();
        self.profiler.trace_end(key, "sample");
        self.profiler.log_step(key, LogStepItem::SampleTime, secs);
        self.profiler
            .log_epoch_add(plan.epoch(), LogEpochItem::SampleTime, secs);
        Ok(sampled)
    }

    fn train_one(
        &self,
        extractor: &Extractor,
        step: &mut dyn TrainStep,
        sampled: &SampledBatch,
    ) -> Result<()> {
        let key = sampled.key;
        let p = &self.profiler;
        p.trace_begin(key, "copy");
        let t = Instant::now();
        let batch = extractor.process(sampled)?;
        let copy = t.elapsed().as_secs_f64();
        p.trace_end(key, "copy");
        p.log_step(key, LogStepItem::CopyTime, copy);
        p.log_epoch_add(key.epoch(), LogEpochItem::CopyTime, copy);
        p.log_epoch_add(key.epoch(), LogEpochItem::FeatureBytes, batch.total_bytes as f64);
        p.log_epoch_add(key.epoch(), LogEpochItem::MissBytes, batch.miss_bytes as f64);

        p.trace_begin(key, "train");
        let t = Instant::now();
        step.train(&batch)?;
        let train = t.elapsed().as_secs_f64();
        p.trace_end(key, "train");
        p.log_step(key, LogStepItem::TrainTime, train);
        p.log_epoch_add(key.epoch(), LogEpochItem::TrainTime, train);
        let every = self.config.report_every;
        if every > 0 && (key.step() as usize) % every == 0 {
            p.report_step(key.epoch(), key.step());
        }
        debug!(key = %key, rows = batch.feat.rows, "pipeline.batch.trained");
        Ok(())
    }

    fn new_sampler(&self, worker: u64) -> Result<Sampler> {
        Ok(Sampler::new(Arc::clone(&self.graph), &self.config, worker)?
            .with_profiler(Arc::clone(&self.profiler)))
    }

    fn new_extractor(&self) -> Result<Extractor> {
        Ok(Extractor::new(
            Arc::clone(&self.graph),
            self.cache.clone(),
            self.config.trainer_ctx,
            self.config.model_input_dim,
        )?
        .with_profiler(Arc::clone(&self.profiler))
        .with_sanity_check(self.config.sanity_check))
    }
}

struct Counts {
    worker: usize,
    sampled: u64,
    trained: u64,
}

impl Counts {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            sampled: 0,
            trained: 0,
        }
    }
}

fn switch_duty(machine: &mut RoleMachine, duty: Duty) -> Result<()> {
    if machine.duty() != Some(duty) {
        machine.apply(RoleEvent::SwitchTo(duty))?;
    }
    Ok(())
}

pub(crate) fn build_cache(
    graph: &Arc<Dataset>,
    config: &RunConfig,
    profiler: &Arc<Profiler>,
) -> Result<Option<Arc<CacheManager>>> {
    if config.cache_percentage <= 0.0 {
        return Ok(None);
    }
    let cache = CacheManager::from_config(graph, config)?.with_profiler(Arc::clone(profiler));
    Ok(Some(Arc::new(cache)))
}

/// Runs every configured worker on its own thread until the run ends.
///
/// `make_step(role, worker)` builds the train step of each trainer and
/// switcher. The first worker error aborts the others and is returned.
pub fn launch<F, T>(graph: Arc<Dataset>, config: RunConfig, make_step: F) -> Result<RunSummary>
where
    F: FnMut(Role, usize) -> T,
    T: TrainStep + 'static,
{
    Coordinator::new(graph, config)?.run(make_step)
}

impl Coordinator {
    /// Spawns the configured workers, waits for them and summarizes the
    /// run. A coordinator runs once. See [`launch`].
    pub fn run<F, T>(self: &Arc<Self>, mut make_step: F) -> Result<RunSummary>
    where
        F: FnMut(Role, usize) -> T,
        T: TrainStep + 'static,
    {
        if self.launched.swap(true, Ordering::AcqRel) {
            return Err(GnnError::InvalidState {
                call: "run",
                state: "coordinator already launched".into(),
            });
        }
        let started = Instant::now();
        let layout = self.config.workers;
        let mut handles = Vec::with_capacity(layout.parties());
        for id in 0..layout.samplers {
            let c = Arc::clone(self);
            handles.push(spawn_worker(self, Role::Sampler, id, move || c.run_sampler(id))?);
        }
        for id in 0..layout.trainers {
            let c = Arc::clone(self);
            let mut step = make_step(Role::Trainer, id);
            handles.push(spawn_worker(self, Role::Trainer, id, move || {
                c.run_trainer(id, &mut step)
            })?);
        }
        for id in 0..layout.switchers {
            let c = Arc::clone(self);
            let mut step = make_step(Role::Switcher, id);
            handles.push(spawn_worker(self, Role::Switcher, id, move || {
                c.run_switcher(id, &mut step)
            })?);
        }

        let mut workers = Vec::with_capacity(handles.len());
        let mut first_error: Option<GnnError> = None;
        for handle in handles {
            let outcome = handle.join().unwrap_or_else(|_| {
                self.abort();
                Err(GnnError::Aborted("worker panicked"))
            });
            match outcome {
                Ok(report) => workers.push(report),
                Err(err) => {
                    let replace = match &first_error {
                        None => true,
                        Some(GnnError::Aborted(_)) => !matches!(err, GnnError::Aborted(_)),
                        Some(_) => false,
                    };
                    if replace {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let profiler = self.profiler();
        if let Some(path) = &self.config.dump_trace {
            if let Err(err) = profiler.dump_trace(path) {
                warn!(path = %path.display(), error = %err, "pipeline.trace.dump_failed");
            }
        }
        let summary = RunSummary {
            num_epoch: self.config.num_epoch,
            steps_per_epoch: self.steps_per_epoch,
            batches_sampled: workers.iter().map(|w| w.sampled).sum(),
            batches_trained: workers.iter().map(|w| w.trained).sum(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            cache: self.cache().map(|c| c.stats()),
            epochs: (0..self.config.num_epoch as u32)
                .map(|e| profiler.report_epoch(e))
                .collect(),
            step_average: profiler.report_step_average(),
            node_access: profiler
                .node_access()
                .map(|log| log.summary(&self.graph, NODE_ACCESS_TOP_K)),
            workers,
        };
        info!(
            batches = summary.batches_trained,
            elapsed_secs = summary.elapsed_secs,
            "pipeline.run.done"
        );
        Ok(summary)
    }
}

const NODE_ACCESS_TOP_K: usize = 10;

fn spawn_worker<F>(
    coordinator: &Arc<Coordinator>,
    role: Role,
    id: usize,
    body: F,
) -> Result<thread::JoinHandle<Result<WorkerReport>>>
where
    F: FnOnce() -> Result<WorkerReport> + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("gnnpipe-{role}-{id}"))
        .spawn(body);
    spawned.map_err(|err| {
        coordinator.abort();
        GnnError::Io(err)
    })
}
