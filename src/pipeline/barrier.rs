use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::types::{GnnError, Result};

/// Reusable rendezvous for a fixed number of parties with a bounded wait.
///
/// Once broken (by a timeout or [`Barrier::abort`]) every current and
/// future waiter fails.
pub struct Barrier {
    name: &'static str,
    parties: usize,
    timeout: Duration,
    state: Mutex<BarrierState>,
    cv: Condvar,
}

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// What a successful [`Barrier::wait`] observed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarrierWait {
    /// Generation the caller passed through.
    pub generation: u64,
    /// True for exactly one caller per generation: the last to arrive.
    pub is_leader: bool,
}

impl Barrier {
    /// Barrier for `parties` waiters, each waiting at most `timeout`.
    pub fn new(name: &'static str, parties: usize, timeout: Duration) -> Self {
        Self {
            name,
            parties: parties.max(1),
            timeout,
            state: Mutex::new(BarrierState::default()),
            cv: Condvar::new(),
        }
    }

    /// Participant count.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Generations completed so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether the barrier has been broken.
    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Blocks until every party arrives.
    ///
    /// The waiter whose deadline passes breaks the barrier and gets
    /// [`GnnError::SynchronizationTimeout`]; everyone else gets
    /// [`GnnError::Aborted`].
    pub fn wait(&self) -> Result<BarrierWait> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut state = self.state.lock();
        if state.broken {
            return Err(GnnError::Aborted(self.name));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.cv.notify_all();
            debug!(barrier = self.name, generation, "pipeline.barrier.released");
            return Ok(BarrierWait {
                generation,
                is_leader: true,
            });
        }
        loop {
            let now = Instant::now();
            if now >= deadline {
                state.broken = true;
                self.cv.notify_all();
                warn!(
                    barrier = self.name,
                    generation,
                    arrived = state.arrived,
                    parties = self.parties,
                    "pipeline.barrier.timeout"
                );
                return Err(GnnError::SynchronizationTimeout {
                    what: self.name,
                    waited: started.elapsed(),
                });
            }
            self.cv.wait_for(&mut state, deadline - now);
            if state.generation != generation {
                return Ok(BarrierWait {
                    generation,
                    is_leader: false,
                });
            }
            if state.broken {
                return Err(GnnError::Aborted(self.name));
            }
        }
    }

    /// Breaks the barrier, releasing every waiter with an error.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.broken {
            state.broken = true;
            debug!(barrier = self.name, "pipeline.barrier.aborted");
        }
        self.cv.notify_all();
    }
}
