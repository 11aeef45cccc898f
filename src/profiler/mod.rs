//! Step and epoch metric registry.
//!
//! Every component writes timings and byte counts through a shared
//! [`Profiler`]. Cells hold `f64` values as bits in `AtomicU64`, so
//! concurrent writers from different roles never lose increments.

mod access;
mod items;
mod report;
mod trace;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::warn;

use crate::types::{BatchKey, NodeId, Result};

pub use access::{NodeAccess, NodeAccessLog, NodeAccessSummary};
pub use items::{LogEpochItem, LogStepItem};
pub use report::{readable_size, EpochReport, StepReport};
pub use trace::{TraceRecorder, TraceSpan};

#[derive(Default)]
struct Cell {
    bits: AtomicU64,
    touched: AtomicBool,
}

struct Series {
    cells: Vec<Cell>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Series {
    fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| Cell::default()).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn set(&self, index: usize, value: f64) {
        let cell = &self.cells[index];
        let old = f64::from_bits(cell.bits.swap(value.to_bits(), Ordering::AcqRel));
        let previous = if cell.touched.swap(true, Ordering::AcqRel) {
            old
        } else {
            self.count.fetch_add(1, Ordering::Relaxed);
            0.0
        };
        atomic_add(&self.sum, value - previous);
    }

    fn add(&self, index: usize, value: f64) {
        let cell = &self.cells[index];
        atomic_add(&cell.bits, value);
        if !cell.touched.swap(true, Ordering::AcqRel) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        atomic_add(&self.sum, value);
    }

    fn get(&self, index: usize) -> f64 {
        f64::from_bits(self.cells[index].bits.load(Ordering::Acquire))
    }

    fn touched(&self, index: usize) -> bool {
        self.cells[index].touched.load(Ordering::Acquire)
    }
}

fn atomic_add(slot: &AtomicU64, delta: f64) {
    let mut current = slot.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Process-wide metric registry for one run.
pub struct Profiler {
    num_epoch: usize,
    steps_per_epoch: usize,
    level: u8,
    steps: Vec<Series>,
    epochs: Vec<Series>,
    node_access: Option<NodeAccessLog>,
    trace: TraceRecorder,
}

impl Profiler {
    /// Registry sized for `num_epoch x steps_per_epoch` steps, reporting
    /// items up to `level`.
    pub fn new(num_epoch: usize, steps_per_epoch: usize, level: u8) -> Self {
        let cells = num_epoch * steps_per_epoch;
        Self {
            num_epoch,
            steps_per_epoch,
            level: level.clamp(1, 3),
            steps: LogStepItem::ALL.iter().map(|_| Series::new(cells)).collect(),
            epochs: LogEpochItem::ALL.iter().map(|_| Series::new(num_epoch)).collect(),
            node_access: None,
            trace: TraceRecorder::disabled(),
        }
    }

    /// Enables per-node access counting over `num_nodes` nodes.
    pub fn with_node_access(mut self, num_nodes: usize) -> Self {
        self.node_access = Some(NodeAccessLog::new(num_nodes));
        self
    }

    /// Enables trace span recording.
    pub fn with_trace(mut self) -> Self {
        self.trace = TraceRecorder::enabled();
        self
    }

    /// Epochs covered.
    pub fn num_epoch(&self) -> usize {
        self.num_epoch
    }

    /// Steps per epoch covered.
    pub fn steps_per_epoch(&self) -> usize {
        self.steps_per_epoch
    }

    /// Report level.
    pub fn level(&self) -> u8 {
        self.level
    }

    fn step_index(&self, key: BatchKey) -> Option<usize> {
        let in_range =
            (key.epoch() as usize) < self.num_epoch && (key.step() as usize) < self.steps_per_epoch;
        if in_range {
            Some(key.dense_index(self.steps_per_epoch))
        } else {
            warn!(key = %key, "profiler.step.out_of_range");
            None
        }
    }

    fn epoch_index(&self, epoch: u32) -> Option<usize> {
        if (epoch as usize) < self.num_epoch {
            Some(epoch as usize)
        } else {
            warn!(epoch, "profiler.epoch.out_of_range");
            None
        }
    }

    /// Sets a step metric.
    pub fn log_step(&self, key: BatchKey, item: LogStepItem, value: f64) {
        if let Some(index) = self.step_index(key) {
            self.steps[item.index()].set(index, value);
        }
    }

    /// Accumulates into a step metric.
    pub fn log_step_add(&self, key: BatchKey, item: LogStepItem, value: f64) {
        if let Some(index) = self.step_index(key) {
            self.steps[item.index()].add(index, value);
        }
    }

    /// Sets an epoch metric.
    pub fn log_epoch(&self, epoch: u32, item: LogEpochItem, value: f64) {
        if let Some(index) = self.epoch_index(epoch) {
            self.epochs[item.index()].set(index, value);
        }
    }

    /// Accumulates into an epoch metric.
    pub fn log_epoch_add(&self, epoch: u32, item: LogEpochItem, value: f64) {
        if let Some(index) = self.epoch_index(epoch) {
            self.epochs[item.index()].add(index, value);
        }
    }

    /// Value of a step metric; zero when never written.
    pub fn get_step(&self, key: BatchKey, item: LogStepItem) -> f64 {
        self.step_index(key)
            .map_or(0.0, |index| self.steps[item.index()].get(index))
    }

    /// Value of an epoch metric; zero when never written.
    pub fn get_epoch(&self, epoch: u32, item: LogEpochItem) -> f64 {
        self.epoch_index(epoch)
            .map_or(0.0, |index| self.epochs[item.index()].get(index))
    }

    /// Sum of a step metric over every step written so far.
    pub fn step_total(&self, item: LogStepItem) -> f64 {
        f64::from_bits(self.steps[item.index()].sum.load(Ordering::Acquire))
    }

    /// Steps that wrote `item` at least once.
    pub fn step_count(&self, item: LogStepItem) -> u64 {
        self.steps[item.index()].count.load(Ordering::Acquire)
    }

    /// Mean of a step metric over written steps, skipping epoch 0 when
    /// later epochs have data.
    pub fn step_average(&self, item: LogStepItem) -> f64 {
        let series = &self.steps[item.index()];
        let warm = self.steps_per_epoch;
        let later = (warm..series.cells.len()).any(|i| series.touched(i));
        let start = if later { warm } else { 0 };
        mean((start..series.cells.len()).filter(|i| series.touched(*i)).map(|i| series.get(i)))
    }

    /// Mean of an epoch metric, skipping epoch 0 when later epochs have data.
    pub fn epoch_average(&self, item: LogEpochItem) -> f64 {
        let series = &self.epochs[item.index()];
        let later = (1..series.cells.len()).any(|i| series.touched(i));
        let start = usize::from(later);
        mean((start..series.cells.len()).filter(|i| series.touched(*i)).map(|i| series.get(i)))
    }

    /// Counts accesses to `nodes` when node access logging is on.
    pub fn log_node_access(&self, nodes: &[NodeId]) {
        if let Some(log) = &self.node_access {
            log.record(nodes);
        }
    }

    /// The node access log, when enabled.
    pub fn node_access(&self) -> Option<&NodeAccessLog> {
        self.node_access.as_ref()
    }

    /// Opens a trace span for `event` of batch `key`.
    pub fn trace_begin(&self, key: BatchKey, event: &str) {
        self.trace.begin(key, event);
    }

    /// Closes the span opened by [`Self::trace_begin`].
    pub fn trace_end(&self, key: BatchKey, event: &str) {
        self.trace.end(key, event);
    }

    /// Recorded trace spans.
    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    /// Writes trace spans as Chrome trace-event JSON.
    pub fn dump_trace(&self, path: impl AsRef<Path>) -> Result<()> {
        self.trace.dump(path)
    }

    /// Writes every written step cell as `epoch,step,metric,value` rows.
    pub fn write_step_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["epoch", "step", "metric", "value"])?;
        for index in 0..self.num_epoch * self.steps_per_epoch {
            let epoch = index / self.steps_per_epoch;
            let step = index % self.steps_per_epoch;
            for item in LogStepItem::ALL {
                let series = &self.steps[item.index()];
                if series.touched(index) {
                    writer.write_record([
                        epoch.to_string(),
                        step.to_string(),
                        item.as_str().to_string(),
                        series.get(index).to_string(),
                    ])?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
