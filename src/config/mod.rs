//! Run configuration: the single value every component is built from.
//!
//! A [`RunConfig`] is assembled with builder calls, optionally overlaid
//! with a TOML document ([`RunConfig::overlay_toml`]) and with the
//! `GNNPIPE_*` environment ([`RunConfig::apply_env`]), then checked once
//! with [`RunConfig::validate`] before any dataset or device work starts.

mod enums;
mod env;
mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::types::{Context, GnnError, Result};

pub use enums::{CachePolicy, RunArch, SampleType};
pub use env::{
    ENV_BARRIER_TIMEOUT_MS, ENV_DUMP_TRACE, ENV_LOG_NODE_ACCESS, ENV_PROFILE_LEVEL,
    ENV_REPORT_STEP, ENV_SANITY_CHECK,
};
pub use file::RunConfigFile;

/// Number of workers per role in a multi-role run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerLayout {
    /// Dedicated sampling workers.
    pub samplers: usize,
    /// Dedicated training workers.
    pub trainers: usize,
    /// Workers alternating between sampling and training.
    pub switchers: usize,
}

impl WorkerLayout {
    /// Workers that own steps of an epoch.
    pub fn producers(&self) -> usize {
        self.samplers + self.switchers
    }

    /// Parties that meet at every barrier.
    pub fn parties(&self) -> usize {
        self.samplers + self.trainers + self.switchers
    }
}

impl Default for WorkerLayout {
    fn default() -> Self {
        Self {
            samplers: 1,
            trainers: 1,
            switchers: 0,
        }
    }
}

/// Everything a run needs to know before `data_init`.
#[derive(Clone, Debug, Serialize)]
pub struct RunConfig {
    /// Directory holding `meta.txt` and the binary arrays.
    pub dataset_path: PathBuf,
    /// Placement of sampling and training.
    pub run_arch: RunArch,
    /// Neighborhood sampling algorithm.
    pub sample_type: SampleType,
    /// Device sampling runs on.
    pub sampler_ctx: Context,
    /// Device training consumes batches on.
    pub trainer_ctx: Context,
    /// Seeds per batch.
    pub batch_size: usize,
    /// Neighbors per node, outermost layer first.
    pub fanout: Vec<usize>,
    /// Passes over the train set.
    pub num_epoch: usize,
    /// Feature cache population policy.
    pub cache_policy: CachePolicy,
    /// Fraction of nodes whose features fit in the cache.
    pub cache_percentage: f64,
    /// Sampled batches allowed in flight before samplers block.
    pub max_sampling_jobs: usize,
    /// Extracted batches allowed in flight before copiers block.
    pub max_copying_jobs: usize,
    /// Steps per random walk.
    pub random_walk_length: usize,
    /// Probability of jumping back to the walk origin at each step.
    pub random_walk_restart_prob: f64,
    /// Walks started from every destination node.
    pub num_random_walk: usize,
    /// Default top-K for random walk layers.
    pub num_neighbor: usize,
    /// Warm-up epochs used by the pre-sample cache policy.
    pub presample_epochs: usize,
    /// Add a `(v, v)` edge for every destination node.
    pub add_self_loop: bool,
    /// Expected feature width of the model, checked at startup.
    pub model_input_dim: Option<usize>,
    /// Base seed for shuffling and sampling.
    pub seed: u64,
    /// Upper bound on any barrier wait.
    pub barrier_timeout: Duration,
    /// Poll interval for trainers waiting on the handoff.
    pub handoff_poll: Duration,
    /// Worker counts for multi-role runs.
    pub workers: WorkerLayout,
    /// Highest profiler level included in reports (1..=3).
    pub profile_level: u8,
    /// Record per-node access counts.
    pub log_node_access: bool,
    /// Check batch invariants on every step.
    pub sanity_check: bool,
    /// Emit a step report every N steps; 0 disables.
    pub report_every: usize,
    /// Write trace spans here at shutdown.
    pub dump_trace: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let (sampler_ctx, trainer_ctx) = RunArch::Vanilla.default_contexts();
        Self {
            dataset_path: PathBuf::new(),
            run_arch: RunArch::Vanilla,
            sample_type: SampleType::KHop,
            sampler_ctx,
            trainer_ctx,
            batch_size: 8000,
            fanout: vec![5, 10, 15],
            num_epoch: 10,
            cache_policy: CachePolicy::ByDegree,
            cache_percentage: 0.0,
            max_sampling_jobs: 10,
            max_copying_jobs: 10,
            random_walk_length: 4,
            random_walk_restart_prob: 0.5,
            num_random_walk: 4,
            num_neighbor: 10,
            presample_epochs: 1,
            add_self_loop: false,
            model_input_dim: None,
            seed: 0x5eed,
            barrier_timeout: Duration::from_secs(600),
            handoff_poll: Duration::from_millis(10),
            workers: WorkerLayout::default(),
            profile_level: 1,
            log_node_access: false,
            sanity_check: false,
            report_every: 0,
            dump_trace: None,
        }
    }
}

impl RunConfig {
    /// Creates a configuration for the dataset at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the architecture and its default device placement.
    pub fn run_arch(mut self, arch: RunArch) -> Self {
        let (sampler_ctx, trainer_ctx) = arch.default_contexts();
        self.run_arch = arch;
        self.sampler_ctx = sampler_ctx;
        self.trainer_ctx = trainer_ctx;
        self
    }

    /// Sets the sampling algorithm.
    pub fn sample_type(mut self, kind: SampleType) -> Self {
        self.sample_type = kind;
        self
    }

    /// Overrides the sampler device.
    pub fn sampler_ctx(mut self, ctx: Context) -> Self {
        self.sampler_ctx = ctx;
        self
    }

    /// Overrides the trainer device.
    pub fn trainer_ctx(mut self, ctx: Context) -> Self {
        self.trainer_ctx = ctx;
        self
    }

    /// Sets seeds per batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets per-layer fanout, outermost layer first.
    pub fn fanout(mut self, fanout: impl Into<Vec<usize>>) -> Self {
        self.fanout = fanout.into();
        self
    }

    /// Sets the number of epochs.
    pub fn num_epoch(mut self, num_epoch: usize) -> Self {
        self.num_epoch = num_epoch;
        self
    }

    /// Sets cache policy and capacity fraction.
    pub fn cache(mut self, policy: CachePolicy, percentage: f64) -> Self {
        self.cache_policy = policy;
        self.cache_percentage = percentage;
        self
    }

    /// Sets in-flight limits for the sampling and copying stages.
    pub fn max_jobs(mut self, sampling: usize, copying: usize) -> Self {
        self.max_sampling_jobs = sampling;
        self.max_copying_jobs = copying;
        self
    }

    /// Configures random walk sampling over `num_layer` layers of
    /// `num_neighbor` neighbors each.
    pub fn random_walk(
        mut self,
        num_layer: usize,
        num_neighbor: usize,
        walk_length: usize,
        restart_prob: f64,
        num_walk: usize,
    ) -> Self {
        self.sample_type = SampleType::RandomWalk;
        self.num_neighbor = num_neighbor;
        self.fanout = vec![num_neighbor; num_layer];
        self.random_walk_length = walk_length;
        self.random_walk_restart_prob = restart_prob;
        self.num_random_walk = num_walk;
        self
    }

    /// Sets the warm-up epochs of the pre-sample policy.
    pub fn presample_epochs(mut self, epochs: usize) -> Self {
        self.presample_epochs = epochs;
        self
    }

    /// Enables `(v, v)` edges for destinations.
    pub fn add_self_loop(mut self, enabled: bool) -> Self {
        self.add_self_loop = enabled;
        self
    }

    /// Declares the model input width.
    pub fn model_input_dim(mut self, dim: usize) -> Self {
        self.model_input_dim = Some(dim);
        self
    }

    /// Sets the base RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Bounds barrier waits.
    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    /// Sets the trainer poll interval.
    pub fn handoff_poll(mut self, poll: Duration) -> Self {
        self.handoff_poll = poll;
        self
    }

    /// Sets worker counts per role.
    pub fn workers(mut self, samplers: usize, trainers: usize, switchers: usize) -> Self {
        self.workers = WorkerLayout {
            samplers,
            trainers,
            switchers,
        };
        self
    }

    /// Sets the report level.
    pub fn profile_level(mut self, level: u8) -> Self {
        self.profile_level = level;
        self
    }

    /// Enables per-node access counting.
    pub fn log_node_access(mut self, enabled: bool) -> Self {
        self.log_node_access = enabled;
        self
    }

    /// Enables per-batch invariant checks.
    pub fn sanity_check(mut self, enabled: bool) -> Self {
        self.sanity_check = enabled;
        self
    }

    /// Writes trace spans to `path` at shutdown.
    pub fn dump_trace(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_trace = Some(path.into());
        self
    }

    /// Number of GNN layers.
    pub fn num_layers(&self) -> usize {
        self.fanout.len()
    }

    /// Dataset directory.
    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// Rejects settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.fanout.is_empty() {
            return Err(GnnError::InvalidConfig("fanout must name at least one layer".into()));
        }
        if let Some((layer, &fanout)) = self.fanout.iter().enumerate().find(|(_, f)| **f == 0) {
            return Err(GnnError::InvalidFanout { layer, fanout });
        }
        if self.batch_size == 0 {
            return Err(GnnError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.num_epoch == 0 {
            return Err(GnnError::InvalidConfig("num_epoch must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.cache_percentage) {
            return Err(GnnError::InvalidConfig(format!(
                "cache_percentage {} outside [0, 1]",
                self.cache_percentage
            )));
        }
        if self.max_sampling_jobs == 0 || self.max_copying_jobs == 0 {
            return Err(GnnError::InvalidConfig("in-flight job limits must be positive".into()));
        }
        if self.sample_type == SampleType::RandomWalk {
            if self.random_walk_length == 0 || self.num_random_walk == 0 {
                return Err(GnnError::InvalidConfig(
                    "random walks need a positive length and count".into(),
                ));
            }
            if !(0.0..=1.0).contains(&self.random_walk_restart_prob) {
                return Err(GnnError::InvalidConfig(format!(
                    "restart probability {} outside [0, 1]",
                    self.random_walk_restart_prob
                )));
            }
        }
        if self.cache_policy == CachePolicy::ByPreSample && self.presample_epochs == 0 {
            return Err(GnnError::InvalidConfig("presample_epochs must be positive".into()));
        }
        if !(1..=3).contains(&self.profile_level) {
            return Err(GnnError::InvalidConfig(format!(
                "profile level {} outside 1..=3",
                self.profile_level
            )));
        }
        if self.workers.producers() == 0 {
            return Err(GnnError::InvalidConfig("a run needs a sampler or switcher".into()));
        }
        if self.workers.trainers + self.workers.switchers == 0 {
            return Err(GnnError::InvalidConfig("a run needs a trainer or switcher".into()));
        }
        if self.barrier_timeout.is_zero() {
            return Err(GnnError::InvalidConfig("barrier timeout must be positive".into()));
        }
        Ok(())
    }
}
