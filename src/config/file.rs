use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RunConfig;
use crate::types::{GnnError, Result};

/// TOML shape of a run configuration. Every field is optional and only
/// present fields override the base config.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfigFile {
    /// Dataset directory.
    pub dataset_path: Option<PathBuf>,
    /// Architecture name, e.g. `arch3`.
    pub run_arch: Option<String>,
    /// Sampling algorithm name.
    pub sample_type: Option<String>,
    /// Sampler device, e.g. `gpu:0`.
    pub sampler_ctx: Option<String>,
    /// Trainer device.
    pub trainer_ctx: Option<String>,
    /// Seeds per batch.
    pub batch_size: Option<usize>,
    /// Per-layer fanout.
    pub fanout: Option<Vec<usize>>,
    /// Epoch count.
    pub num_epoch: Option<usize>,
    /// Cache policy name.
    pub cache_policy: Option<String>,
    /// Cache capacity fraction.
    pub cache_percentage: Option<f64>,
    /// Sampling stage in-flight limit.
    pub max_sampling_jobs: Option<usize>,
    /// Copying stage in-flight limit.
    pub max_copying_jobs: Option<usize>,
    /// Random walk length.
    pub random_walk_length: Option<usize>,
    /// Random walk restart probability.
    pub random_walk_restart_prob: Option<f64>,
    /// Walks per node.
    pub num_random_walk: Option<usize>,
    /// Random walk top-K.
    pub num_neighbor: Option<usize>,
    /// Pre-sample warm-up epochs.
    pub presample_epochs: Option<usize>,
    /// Self loops for destinations.
    pub add_self_loop: Option<bool>,
    /// Model input width.
    pub model_input_dim: Option<usize>,
    /// RNG seed.
    pub seed: Option<u64>,
    /// Barrier timeout in milliseconds.
    pub barrier_timeout_ms: Option<u64>,
    /// Trainer poll interval in milliseconds.
    pub handoff_poll_ms: Option<u64>,
    /// Sampler workers.
    pub samplers: Option<usize>,
    /// Trainer workers.
    pub trainers: Option<usize>,
    /// Switcher workers.
    pub switchers: Option<usize>,
    /// Report level.
    pub profile_level: Option<u8>,
    /// Node access counting.
    pub log_node_access: Option<bool>,
    /// Per-batch invariant checks.
    pub sanity_check: Option<bool>,
    /// Step report interval.
    pub report_every: Option<usize>,
    /// Trace output path.
    pub dump_trace: Option<PathBuf>,
}

impl RunConfigFile {
    /// Parses a TOML document.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies present fields on top of `base`.
    pub fn apply(self, mut base: RunConfig) -> Result<RunConfig> {
        if let Some(path) = self.dataset_path {
            base.dataset_path = path;
        }
        if let Some(arch) = self.run_arch {
            base = base.run_arch(arch.parse()?);
        }
        if let Some(kind) = self.sample_type {
            base.sample_type = kind.parse()?;
        }
        if let Some(ctx) = self.sampler_ctx {
            base.sampler_ctx = ctx.parse()?;
        }
        if let Some(ctx) = self.trainer_ctx {
            base.trainer_ctx = ctx.parse()?;
        }
        if let Some(policy) = self.cache_policy {
            base.cache_policy = policy.parse()?;
        }
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    base.$field = value;
                })*
            };
        }
        take!(
            batch_size,
            fanout,
            num_epoch,
            cache_percentage,
            max_sampling_jobs,
            max_copying_jobs,
            random_walk_length,
            random_walk_restart_prob,
            num_random_walk,
            num_neighbor,
            presample_epochs,
            add_self_loop,
            seed,
            profile_level,
            log_node_access,
            sanity_check,
            report_every,
        );
        if let Some(dim) = self.model_input_dim {
            base.model_input_dim = Some(dim);
        }
        if let Some(ms) = self.barrier_timeout_ms {
            base.barrier_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.handoff_poll_ms {
            base.handoff_poll = Duration::from_millis(ms);
        }
        if let Some(samplers) = self.samplers {
            base.workers.samplers = samplers;
        }
        if let Some(trainers) = self.trainers {
            base.workers.trainers = trainers;
        }
        if let Some(switchers) = self.switchers {
            base.workers.switchers = switchers;
        }
        if let Some(path) = self.dump_trace {
            base.dump_trace = Some(path);
        }
        Ok(base)
    }
}

impl RunConfig {
    /// Builds a config from defaults plus a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        RunConfig::default().overlay_toml(text)
    }

    /// Reads a TOML file on top of defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            GnnError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies a TOML document on top of this config.
    pub fn overlay_toml(self, text: &str) -> Result<Self> {
        RunConfigFile::parse(text)?.apply(self)
    }
}
