use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::info;

use super::{LogEpochItem, LogStepItem, Profiler};
use crate::types::BatchKey;

/// Step metrics selected by the profile level.
#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    /// Epoch, or `None` for a run-wide average.
    pub epoch: Option<u32>,
    /// Step, or `None` for a run-wide average.
    pub step: Option<u32>,
    /// Metric name to value.
    pub metrics: BTreeMap<&'static str, f64>,
}

/// Epoch aggregates.
#[derive(Clone, Debug, Serialize)]
pub struct EpochReport {
    /// Epoch, or `None` for the run-wide average.
    pub epoch: Option<u32>,
    /// Metric name to value.
    pub metrics: BTreeMap<&'static str, f64>,
}

impl Profiler {
    /// Metrics of one step.
    pub fn report_step(&self, epoch: u32, step: u32) -> StepReport {
        let key = BatchKey::new(epoch, step);
        let report = StepReport {
            epoch: Some(epoch),
            step: Some(step),
            metrics: self.step_metrics(|item| self.get_step(key, item)),
        };
        info!(epoch, step, report = %report, "profiler.report.step");
        report
    }

    /// Per-step means over the run so far.
    pub fn report_step_average(&self) -> StepReport {
        let report = StepReport {
            epoch: None,
            step: None,
            metrics: self.step_metrics(|item| self.step_average(item)),
        };
        info!(report = %report, "profiler.report.step_average");
        report
    }

    /// Aggregates of one epoch.
    pub fn report_epoch(&self, epoch: u32) -> EpochReport {
        let report = EpochReport {
            epoch: Some(epoch),
            metrics: LogEpochItem::ALL
                .iter()
                .map(|item| (item.as_str(), self.get_epoch(epoch, *item)))
                .collect(),
        };
        info!(epoch, report = %report, "profiler.report.epoch");
        report
    }

    /// Epoch means over the run so far.
    pub fn report_epoch_average(&self) -> EpochReport {
        let report = EpochReport {
            epoch: None,
            metrics: LogEpochItem::ALL
                .iter()
                .map(|item| (item.as_str(), self.epoch_average(*item)))
                .collect(),
        };
        info!(report = %report, "profiler.report.epoch_average");
        report
    }

    fn step_metrics(&self, value: impl Fn(LogStepItem) -> f64) -> BTreeMap<&'static str, f64> {
        LogStepItem::ALL
            .iter()
            .filter(|item| item.level() <= self.level())
            .map(|item| (item.as_str(), value(*item)))
            .collect()
    }
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.epoch, self.step) {
            (Some(epoch), Some(step)) => write!(f, "[step {epoch}.{step}]")?,
            _ => write!(f, "[step avg]")?,
        }
        write_metrics(f, &self.metrics)
    }
}

impl fmt::Display for EpochReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epoch {
            Some(epoch) => write!(f, "[epoch {epoch}]")?,
            None => write!(f, "[epoch avg]")?,
        }
        write_metrics(f, &self.metrics)
    }
}

fn write_metrics(f: &mut fmt::Formatter<'_>, metrics: &BTreeMap<&'static str, f64>) -> fmt::Result {
    for (name, value) in metrics {
        if name.ends_with("_bytes") {
            write!(f, " {name}={}", readable_size(*value))?;
        } else if name.ends_with("_time") {
            write!(f, " {name}={value:.4}s")?;
        } else if name.ends_with("_rate") {
            write!(f, " {name}={:.2}%", value * 100.0)?;
        } else {
            write!(f, " {name}={value}")?;
        }
    }
    Ok(())
}

/// Formats a byte count with binary units.
pub fn readable_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
