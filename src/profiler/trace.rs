use std::cell::Cell;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::types::{BatchKey, Result};

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: Cell<u64> = const { Cell::new(0) };
}

fn thread_tid() -> u64 {
    TID.with(|tid| {
        if tid.get() == 0 {
            tid.set(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

/// A closed span.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TraceSpan {
    /// Event name.
    pub event: String,
    /// Batch the span belongs to.
    pub key: BatchKey,
    /// Start, microseconds since the recorder was created.
    pub start_us: u64,
    /// Duration in microseconds.
    pub dur_us: u64,
    /// Recording thread.
    pub tid: u64,
}

/// Collects `(batch, event)` spans for external timeline viewers.
pub struct TraceRecorder {
    enabled: bool,
    origin: Instant,
    open: Mutex<FxHashMap<(BatchKey, String), u64>>,
    spans: Mutex<Vec<TraceSpan>>,
}

impl TraceRecorder {
    /// Recorder that drops every call.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            origin: Instant::now(),
            open: Mutex::new(FxHashMap::default()),
            spans: Mutex::new(Vec::new()),
        }
    }

    /// Recorder that keeps spans.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    /// Whether spans are kept.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Opens `event` for `key`; reopening restarts the span.
    pub fn begin(&self, key: BatchKey, event: &str) {
        if !self.enabled {
            return;
        }
        let now = self.now_us();
        self.open.lock().insert((key, event.to_string()), now);
    }

    /// Closes `event` for `key`; unmatched ends are ignored.
    pub fn end(&self, key: BatchKey, event: &str) {
        if !self.enabled {
            return;
        }
        let now = self.now_us();
        let Some(start) = self.open.lock().remove(&(key, event.to_string())) else {
            debug!(key = %key, event, "profiler.trace.unmatched_end");
            return;
        };
        self.spans.lock().push(TraceSpan {
            event: event.to_string(),
            key,
            start_us: start,
            dur_us: now.saturating_sub(start),
            tid: thread_tid(),
        });
    }

    /// Copy of the closed spans.
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans.lock().clone()
    }

    /// Writes closed spans in Chrome trace-event format.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let events: Vec<serde_json::Value> = self
            .spans
            .lock()
            .iter()
            .map(|span| {
                json!({
                    "name": span.event,
                    "cat": "gnnpipe",
                    "ph": "X",
                    "ts": span.start_us,
                    "dur": span.dur_us,
                    "pid": 0,
                    "tid": span.tid,
                    "args": { "epoch": span.key.epoch(), "step": span.key.step() },
                })
            })
            .collect();
        let out = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(out, &json!({ "traceEvents": events }))?;
        debug!(path = %path.as_ref().display(), spans = events.len(), "profiler.trace.dumped");
        Ok(())
    }
}
