use std::time::Duration;

use tracing::debug;

use super::RunConfig;
use crate::types::{GnnError, Result};

/// Report level override (`1..=3`).
pub const ENV_PROFILE_LEVEL: &str = "GNNPIPE_PROFILE_LEVEL";
/// Enables node access counting when truthy.
pub const ENV_LOG_NODE_ACCESS: &str = "GNNPIPE_LOG_NODE_ACCESS";
/// Enables per-batch invariant checks when truthy.
pub const ENV_SANITY_CHECK: &str = "GNNPIPE_SANITY_CHECK";
/// Step report interval.
pub const ENV_REPORT_STEP: &str = "GNNPIPE_REPORT_STEP";
/// Trace output path.
pub const ENV_DUMP_TRACE: &str = "GNNPIPE_DUMP_TRACE";
/// Barrier timeout in milliseconds.
pub const ENV_BARRIER_TIMEOUT_MS: &str = "GNNPIPE_BARRIER_TIMEOUT_MS";

impl RunConfig {
    /// Overlays settings from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlays settings from `lookup`, which maps variable names to values.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_PROFILE_LEVEL) {
            self.profile_level = parse_number(ENV_PROFILE_LEVEL, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_NODE_ACCESS) {
            self.log_node_access = parse_flag(ENV_LOG_NODE_ACCESS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SANITY_CHECK) {
            self.sanity_check = parse_flag(ENV_SANITY_CHECK, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REPORT_STEP) {
            self.report_every = parse_number(ENV_REPORT_STEP, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DUMP_TRACE) {
            if !raw.trim().is_empty() {
                self.dump_trace = Some(raw.trim().into());
            }
        }
        if let Some(raw) = lookup(ENV_BARRIER_TIMEOUT_MS) {
            let ms: u64 = parse_number(ENV_BARRIER_TIMEOUT_MS, &raw)?;
            self.barrier_timeout = Duration::from_millis(ms);
        }
        debug!(
            profile_level = self.profile_level,
            log_node_access = self.log_node_access,
            sanity_check = self.sanity_check,
            "config.env.applied"
        );
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| GnnError::InvalidConfig(format!("{key}={raw:?} is not a number")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(GnnError::InvalidConfig(format!("{key}={raw:?} is not a flag"))),
    }
}
