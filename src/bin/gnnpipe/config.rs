use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use gnnpipe::{CachePolicy, RunArch, RunConfig, SampleType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named set of run defaults stored in `cli.toml`.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub dataset: Option<PathBuf>,
    pub run_arch: Option<RunArch>,
    pub sample_type: Option<SampleType>,
    pub cache_policy: Option<CachePolicy>,
    pub cache_percentage: Option<f64>,
    pub batch_size: Option<usize>,
    pub fanout: Option<Vec<usize>>,
    pub num_epoch: Option<usize>,
}

impl Profile {
    pub fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(path) = &self.dataset {
            config.dataset_path = path.clone();
        }
        if let Some(arch) = self.run_arch {
            config = config.run_arch(arch);
        }
        if let Some(kind) = self.sample_type {
            config.sample_type = kind;
        }
        if let Some(policy) = self.cache_policy {
            config.cache_policy = policy;
        }
        if let Some(fraction) = self.cache_percentage {
            config.cache_percentage = fraction;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(fanout) = &self.fanout {
            config.fanout = fanout.clone();
        }
        if let Some(epochs) = self.num_epoch {
            config.num_epoch = epochs;
        }
        config
    }

    pub fn rows(&self) -> Vec<(&'static str, String)> {
        fn show<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), T::to_string)
        }
        vec![
            (
                "dataset",
                self.dataset
                    .as_ref()
                    .map_or_else(|| "-".into(), |p| p.display().to_string()),
            ),
            ("arch", show(&self.run_arch)),
            ("sample_type", show(&self.sample_type)),
            ("cache_policy", show(&self.cache_policy)),
            ("cache_percentage", show(&self.cache_percentage)),
            ("batch_size", show(&self.batch_size)),
            (
                "fanout",
                self.fanout.as_ref().map_or_else(
                    || "-".into(),
                    |f| f.iter().map(usize::to_string).collect::<Vec<_>>().join(","),
                ),
            ),
            ("epochs", show(&self.num_epoch)),
        ]
    }
}

#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
    profiles: BTreeMap<String, Profile>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(p) if p.exists() => read_file(p)?,
            _ => RawConfig::default(),
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self {
            path,
            data,
            profiles,
        })
    }

    pub fn default_profile_name(&self) -> Option<&str> {
        self.data.default_profile.as_deref()
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.to_string(),
            })
    }

    /// Profile named on the command line, else the configured default.
    pub fn active(&self, requested: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        match requested.or(self.default_profile_name()) {
            Some(name) => self.profile(name).map(Some),
            None => Ok(None),
        }
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn set_default_profile(&mut self, name: Option<&str>) -> Result<(), ConfigError> {
        if let Some(name) = name {
            self.profile(name)?;
        }
        self.data.default_profile = name.map(str::to_string);
        Ok(())
    }

    pub fn upsert_profile(&mut self, name: &str, update: ProfileUpdate) -> Result<(), ConfigError> {
        let entry = self.data.profiles.entry(name.to_string()).or_default();
        if let Some(dataset) = update.dataset {
            entry.dataset = Some(dataset);
        }
        if let Some(arch) = update.run_arch {
            entry.run_arch = Some(arch.to_string());
        }
        if let Some(kind) = update.sample_type {
            entry.sample_type = Some(kind.to_string());
        }
        if let Some(policy) = update.cache_policy {
            entry.cache_policy = Some(policy.to_string());
        }
        if let Some(fraction) = update.cache_percentage {
            entry.cache_percentage = Some(fraction);
        }
        if let Some(batch_size) = update.batch_size {
            entry.batch_size = Some(batch_size);
        }
        if let Some(fanout) = update.fanout {
            entry.fanout = Some(fanout);
        }
        if let Some(epochs) = update.num_epoch {
            entry.num_epoch = Some(epochs);
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }

    pub fn delete_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.data.profiles.remove(name).is_none() {
            return Err(ConfigError::ProfileNotFound {
                name: name.to_string(),
            });
        }
        if self.data.default_profile.as_deref() == Some(name) {
            self.data.default_profile = None;
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }

    pub fn persist(&self) -> Result<PathBuf, ConfigError> {
        let target = self
            .path
            .clone()
            .or_else(default_config_path)
            .ok_or(ConfigError::NoConfigPath)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&self.data)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<BTreeMap<String, Profile>, ConfigError> {
    let mut profiles = BTreeMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = &data.default_profile {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn parse_field<T: std::str::FromStr>(
    profile: &str,
    field: &'static str,
    raw: &Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.as_deref()
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                profile: profile.to_string(),
                field,
                value: value.to_string(),
            })
        })
        .transpose()
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    Ok(Profile {
        name: name.to_string(),
        dataset: raw.dataset.clone(),
        run_arch: parse_field(name, "run_arch", &raw.run_arch)?,
        sample_type: parse_field(name, "sample_type", &raw.sample_type)?,
        cache_policy: parse_field(name, "cache_policy", &raw.cache_policy)?,
        cache_percentage: raw.cache_percentage,
        batch_size: raw.batch_size,
        fanout: raw.fanout.clone(),
        num_epoch: raw.num_epoch,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawProfile {
    dataset: Option<PathBuf>,
    run_arch: Option<String>,
    sample_type: Option<String>,
    cache_policy: Option<String>,
    cache_percentage: Option<f64>,
    batch_size: Option<usize>,
    fanout: Option<Vec<usize>>,
    num_epoch: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub dataset: Option<PathBuf>,
    pub run_arch: Option<RunArch>,
    pub sample_type: Option<SampleType>,
    pub cache_policy: Option<CachePolicy>,
    pub cache_percentage: Option<f64>,
    pub batch_size: Option<usize>,
    pub fanout: Option<Vec<usize>>,
    pub num_epoch: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize CLI config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("failed to write CLI config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("profile '{profile}' has invalid {field} '{value}'")]
    InvalidValue {
        profile: String,
        field: &'static str,
        value: String,
    },
    #[error("no config directory found; pass --config or set GNNPIPE_CLI_CONFIG")]
    NoConfigPath,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("gnnpipe").join("cli.toml"))
}
