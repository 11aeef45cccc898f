use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::extract::ExtractedBatch;
use crate::types::{BatchKey, GnnError, Result};

/// Bounded keyed store of extracted batches awaiting the trainer.
///
/// Batches count against the capacity from `submit` until `release`.
pub struct GraphPool {
    capacity: usize,
    state: Mutex<PoolState>,
    ready: Condvar,
    space: Condvar,
}

#[derive(Default)]
struct PoolState {
    batches: FxHashMap<BatchKey, Arc<ExtractedBatch>>,
    order: VecDeque<BatchKey>,
    closed: bool,
    aborted: bool,
}

impl GraphPool {
    /// Pool holding at most `capacity` batches.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(PoolState::default()),
            ready: Condvar::new(),
            space: Condvar::new(),
        }
    }

    /// Maximum held batches.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Batches held, handed out or not.
    pub fn len(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `batch`, blocking while the pool is full.
    pub fn submit(&self, batch: ExtractedBatch) -> Result<()> {
        let key = batch.key;
        let mut state = self.state.lock();
        while state.batches.len() >= self.capacity && !state.aborted {
            self.space.wait(&mut state);
        }
        if state.aborted {
            return Err(GnnError::Aborted("graph pool"));
        }
        if state.closed {
            return Err(GnnError::InvalidState {
                call: "submit",
                state: "closed graph pool".into(),
            });
        }
        if state.batches.contains_key(&key) {
            return Err(GnnError::InvalidArgument(format!("batch {key} submitted twice")));
        }
        state.batches.insert(key, Arc::new(batch));
        state.order.push_back(key);
        trace!(key = %key, held = state.batches.len(), "pipeline.pool.submit");
        self.ready.notify_one();
        Ok(())
    }

    /// Key of the oldest batch not yet handed out.
    ///
    /// Waits up to `timeout` (forever when `None`). Returns
    /// [`GnnError::Exhausted`] once the pool is closed and every key has
    /// been handed out.
    pub fn next_key(&self, timeout: Option<Duration>) -> Result<BatchKey> {
        let started = Instant::now();
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(GnnError::Aborted("graph pool"));
            }
            if let Some(key) = state.order.pop_front() {
                return Ok(key);
            }
            if state.closed {
                return Err(GnnError::Exhausted);
            }
            match timeout {
                None => self.ready.wait(&mut state),
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Err(GnnError::SynchronizationTimeout {
                            what: "graph pool",
                            waited: elapsed,
                        });
                    }
                    self.ready.wait_for(&mut state, limit - elapsed);
                }
            }
        }
    }

    /// Batch stored under `key`.
    pub fn get(&self, key: BatchKey) -> Result<Arc<ExtractedBatch>> {
        self.state
            .lock()
            .batches
            .get(&key)
            .cloned()
            .ok_or(GnnError::UnknownBatch(key))
    }

    /// Drops `key`, freeing its slot. Returns whether it was held.
    pub fn release(&self, key: BatchKey) -> bool {
        let mut state = self.state.lock();
        let held = state.batches.remove(&key).is_some();
        if held {
            state.order.retain(|k| *k != key);
            self.space.notify_one();
        }
        held
    }

    /// No more batches will be submitted.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Fails every pending and future call.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.ready.notify_all();
        self.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::extract::FeatureTensor;
    use crate::types::Context;

    fn batch(step: u32) -> ExtractedBatch {
        ExtractedBatch {
            key: BatchKey::new(0, step),
            input_nodes: vec![step],
            feat: FeatureTensor::zeros(1, 0, Context::cpu()),
            labels: Vec::new(),
            blocks: Vec::new(),
            hit_bytes: 0,
            miss_bytes: 0,
            total_bytes: 0,
            label_bytes: 0,
            id_bytes: 4,
            graph_bytes: 0,
        }
    }

    #[test]
    fn hands_out_keys_in_submit_order() {
        let pool = GraphPool::new(4);
        pool.submit(batch(1)).unwrap();
        pool.submit(batch(0)).unwrap();
        assert_eq!(pool.next_key(None).unwrap(), BatchKey::new(0, 1));
        assert_eq!(pool.next_key(None).unwrap(), BatchKey::new(0, 0));
        assert_eq!(pool.get(BatchKey::new(0, 0)).unwrap().input_nodes, vec![0]);
        assert!(pool.release(BatchKey::new(0, 0)));
        assert!(matches!(
            pool.get(BatchKey::new(0, 0)),
            Err(GnnError::UnknownBatch(_))
        ));
    }

    #[test]
    fn closed_pool_is_exhausted() {
        let pool = GraphPool::new(1);
        pool.close();
        assert!(matches!(pool.next_key(None), Err(GnnError::Exhausted)));
    }

    #[test]
    fn next_key_times_out() {
        let pool = GraphPool::new(1);
        let err = pool.next_key(Some(Duration::from_millis(10)));
        assert!(matches!(err, Err(GnnError::SynchronizationTimeout { .. })));
    }

    #[test]
    fn submit_blocks_until_release() {
        let pool = Arc::new(GraphPool::new(1));
        pool.submit(batch(0)).unwrap();
        let copier = {
            let p = Arc::clone(&pool);
            thread::spawn(move || p.submit(batch(1)))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.len(), 1);
        let key = pool.next_key(None).unwrap();
        pool.release(key);
        copier.join().unwrap().unwrap();
        assert_eq!(pool.next_key(None).unwrap(), BatchKey::new(0, 1));
    }
}
