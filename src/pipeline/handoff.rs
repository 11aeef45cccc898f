use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::types::{GnnError, Result};

/// Bounded FIFO between producers and consumers.
///
/// `publish` blocks while the queue is full, up to the stall timeout when
/// one is set. Producers report the end of
/// their share of an epoch with [`Handoff::mark_finished`]; consumers use
/// [`Handoff::epoch_drained`] to know when to stop polling.
pub struct Handoff<T> {
    capacity: usize,
    producers: usize,
    stall_timeout: Option<Duration>,
    state: Mutex<HandoffState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct HandoffState<T> {
    queue: VecDeque<T>,
    published: u64,
    finished: Vec<usize>,
    aborted: bool,
}

impl<T> Handoff<T> {
    /// Queue holding at most `capacity` items fed by `producers` producers.
    pub fn new(capacity: usize, producers: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            producers,
            stall_timeout: None,
            state: Mutex::new(HandoffState {
                queue: VecDeque::with_capacity(capacity),
                published: 0,
                finished: Vec::new(),
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Fails a `publish` that stays blocked on a full queue for `timeout`
    /// with [`GnnError::SynchronizationTimeout`].
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Bound on a blocked `publish`, if any.
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout
    }

    /// Maximum queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items waiting.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items published since creation.
    pub fn published(&self) -> u64 {
        self.state.lock().published
    }

    /// Enqueues `item`, blocking while the queue is full.
    pub fn publish(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        let started = Instant::now();
        let deadline = self.stall_timeout.map(|t| started + t);
        while state.queue.len() >= self.capacity && !state.aborted {
            match deadline {
                Some(deadline) => {
                    if self.not_full.wait_until(&mut state, deadline).timed_out()
                        && state.queue.len() >= self.capacity
                        && !state.aborted
                    {
                        return Err(GnnError::SynchronizationTimeout {
                            what: "handoff",
                            waited: started.elapsed(),
                        });
                    }
                }
                None => self.not_full.wait(&mut state),
            }
        }
        if state.aborted {
            return Err(GnnError::Aborted("handoff"));
        }
        let waited = started.elapsed();
        if !waited.is_zero() {
            trace!(waited_us = waited.as_micros() as u64, "pipeline.handoff.backpressure");
        }
        self.push(&mut state, item);
        Ok(())
    }

    /// Enqueues `item` or fails with [`GnnError::ResourceExhausted`] when full.
    pub fn try_publish(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(GnnError::Aborted("handoff"));
        }
        if state.queue.len() >= self.capacity {
            return Err(GnnError::ResourceExhausted("handoff queue"));
        }
        self.push(&mut state, item);
        Ok(())
    }

    fn push(&self, state: &mut HandoffState<T>, item: T) {
        state.queue.push_back(item);
        state.published += 1;
        self.not_empty.notify_one();
    }

    /// Dequeues the oldest item, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(GnnError::Aborted("handoff"));
            }
            if let Some(item) = state.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.not_empty.wait_for(&mut state, deadline - now);
        }
    }

    /// Dequeues the oldest item without waiting.
    pub fn try_recv(&self) -> Result<Option<T>> {
        self.recv_timeout(Duration::ZERO)
    }

    /// Records that one producer published its whole share of `epoch`.
    pub fn mark_finished(&self, epoch: u32) {
        let mut state = self.state.lock();
        let e = epoch as usize;
        if state.finished.len() <= e {
            state.finished.resize(e + 1, 0);
        }
        state.finished[e] += 1;
        debug!(
            epoch,
            finished = state.finished[e],
            producers = self.producers,
            "pipeline.handoff.producer_finished"
        );
        self.not_empty.notify_all();
    }

    /// Whether every producer finished `epoch`.
    pub fn producers_finished(&self, epoch: u32) -> bool {
        let state = self.state.lock();
        Self::all_finished(&state, self.producers, epoch)
    }

    /// Every producer finished `epoch` and nothing is left to consume.
    pub fn epoch_drained(&self, epoch: u32) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && Self::all_finished(&state, self.producers, epoch)
    }

    fn all_finished(state: &HandoffState<T>, producers: usize, epoch: u32) -> bool {
        state.finished.get(epoch as usize).copied().unwrap_or(0) >= producers
    }

    /// Fails every pending and future call.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`Self::abort`] was called.
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}
