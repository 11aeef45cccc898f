use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Context, GnnError, Result};

/// Placement of sampling and training work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunArch {
    /// CPU sampling, GPU training.
    #[serde(rename = "arch0")]
    Vanilla,
    /// Sampling and training share one GPU.
    #[serde(rename = "arch1")]
    Standalone,
    /// GPU sampling with host-staged transfer to a second GPU.
    #[serde(rename = "arch2")]
    Offload,
    /// Dedicated sampling GPU and dedicated training GPU.
    #[serde(rename = "arch3")]
    Dedicated,
    /// Many sampler, trainer and switcher workers with per-worker devices.
    #[serde(rename = "arch5")]
    Distributed,
}

impl RunArch {
    /// All supported architectures.
    pub const ALL: [RunArch; 5] = [
        RunArch::Vanilla,
        RunArch::Standalone,
        RunArch::Offload,
        RunArch::Dedicated,
        RunArch::Distributed,
    ];

    /// Maps the numeric architecture index.
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(RunArch::Vanilla),
            1 => Ok(RunArch::Standalone),
            2 => Ok(RunArch::Offload),
            3 => Ok(RunArch::Dedicated),
            5 => Ok(RunArch::Distributed),
            other => Err(GnnError::InvalidConfig(format!(
                "unknown run architecture arch{other}"
            ))),
        }
    }

    /// Short name used in configs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            RunArch::Vanilla => "arch0",
            RunArch::Standalone => "arch1",
            RunArch::Offload => "arch2",
            RunArch::Dedicated => "arch3",
            RunArch::Distributed => "arch5",
        }
    }

    /// Default `(sampler, trainer)` contexts.
    pub fn default_contexts(self) -> (Context, Context) {
        match self {
            RunArch::Vanilla => (Context::cpu(), Context::gpu(0)),
            RunArch::Standalone => (Context::gpu(0), Context::gpu(0)),
            RunArch::Offload | RunArch::Dedicated => (Context::gpu(0), Context::gpu(1)),
            RunArch::Distributed => (Context::gpu(0), Context::gpu(1)),
        }
    }

    /// True when workers receive their own contexts at init time.
    pub fn is_distributed(self) -> bool {
        self == RunArch::Distributed
    }
}

impl fmt::Display for RunArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunArch {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        if let Some(index) = lower.strip_prefix("arch") {
            let index = index
                .parse::<u32>()
                .map_err(|_| GnnError::InvalidConfig(format!("unknown run architecture {s:?}")))?;
            return RunArch::from_index(index);
        }
        match lower.as_str() {
            "vanilla" => Ok(RunArch::Vanilla),
            "standalone" => Ok(RunArch::Standalone),
            "offload" => Ok(RunArch::Offload),
            "dedicated" => Ok(RunArch::Dedicated),
            "distributed" => Ok(RunArch::Distributed),
            _ => Err(GnnError::InvalidConfig(format!(
                "unknown run architecture {s:?}"
            ))),
        }
    }
}

/// Neighborhood sampling algorithm.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleType {
    /// Uniform choice without replacement.
    KHop,
    /// Uniform choice with replacement.
    KHopReplace,
    /// Uniform with replacement, repeated edges collapsed into weights.
    KHopDedup,
    /// Weight-proportional choice through per-row alias tables.
    WeightedKHop,
    /// Weight-proportional choice through per-row prefix sums.
    WeightedKHopPrefix,
    /// Alias-table choice, repeated edges collapsed into weights.
    WeightedKHopDedup,
    /// Random walk with restart, top-K visited nodes.
    RandomWalk,
}

impl SampleType {
    /// All algorithms.
    pub const ALL: [SampleType; 7] = [
        SampleType::KHop,
        SampleType::KHopReplace,
        SampleType::KHopDedup,
        SampleType::WeightedKHop,
        SampleType::WeightedKHopPrefix,
        SampleType::WeightedKHopDedup,
        SampleType::RandomWalk,
    ];

    /// Kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            SampleType::KHop => "khop",
            SampleType::KHopReplace => "khop-replace",
            SampleType::KHopDedup => "khop-dedup",
            SampleType::WeightedKHop => "weighted-khop",
            SampleType::WeightedKHopPrefix => "weighted-khop-prefix",
            SampleType::WeightedKHopDedup => "weighted-khop-dedup",
            SampleType::RandomWalk => "random-walk",
        }
    }

    /// True for algorithms that read edge weights.
    pub fn is_weighted(self) -> bool {
        matches!(
            self,
            SampleType::WeightedKHop | SampleType::WeightedKHopPrefix | SampleType::WeightedKHopDedup
        )
    }

    /// True for algorithms whose blocks carry edge weights.
    pub fn emits_weights(self) -> bool {
        matches!(
            self,
            SampleType::KHopDedup | SampleType::WeightedKHopDedup | SampleType::RandomWalk
        )
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleType {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.to_ascii_lowercase().replace('_', "-");
        SampleType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| GnnError::InvalidConfig(format!("unknown sample type {s:?}")))
    }
}

/// How the feature cache is populated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Highest in-degree nodes.
    ByDegree,
    /// Train nodes, then their neighbors, then by degree.
    ByHeuristic,
    /// Most frequently sampled nodes during a warm-up pass.
    ByPreSample,
    /// Least-recently-used table filled on the hot path.
    Dynamic,
}

impl CachePolicy {
    /// All policies.
    pub const ALL: [CachePolicy; 4] = [
        CachePolicy::ByDegree,
        CachePolicy::ByHeuristic,
        CachePolicy::ByPreSample,
        CachePolicy::Dynamic,
    ];

    /// Kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            CachePolicy::ByDegree => "by-degree",
            CachePolicy::ByHeuristic => "by-heuristic",
            CachePolicy::ByPreSample => "by-pre-sample",
            CachePolicy::Dynamic => "dynamic",
        }
    }

    /// True when the cache content is fixed after population.
    pub fn is_static(self) -> bool {
        self != CachePolicy::Dynamic
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "presample" | "pre-sample" => return Ok(CachePolicy::ByPreSample),
            "degree" => return Ok(CachePolicy::ByDegree),
            "heuristic" => return Ok(CachePolicy::ByHeuristic),
            "lru" => return Ok(CachePolicy::Dynamic),
            _ => {}
        }
        CachePolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == normalized)
            .ok_or_else(|| GnnError::InvalidConfig(format!("unknown cache policy {s:?}")))
    }
}
