use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::types::{BatchKey, GnnError, NodeId, Result};

/// Number of batches needed to cover `num_train` seeds.
pub fn steps_per_epoch(num_train: usize, batch_size: usize) -> usize {
    num_train.div_ceil(batch_size)
}

/// The shuffled train set of one epoch.
///
/// Every worker that builds a plan for the same `(seed, epoch)` sees the
/// same permutation, so step ownership can be split without messaging.
#[derive(Clone, Debug)]
pub struct EpochPlan {
    epoch: u32,
    perm: Vec<NodeId>,
    batch_size: usize,
}

impl EpochPlan {
    /// Permutes `train` for `epoch`.
    pub fn new(train: &[NodeId], batch_size: usize, seed: u64, epoch: u32) -> Self {
        let mut perm = train.to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(mix(seed, epoch));
        perm.shuffle(&mut rng);
        Self {
            epoch,
            perm,
            batch_size,
        }
    }

    /// Epoch this plan belongs to.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Batches in the epoch.
    pub fn num_steps(&self) -> usize {
        steps_per_epoch(self.perm.len(), self.batch_size)
    }

    /// Seeds of `step`; the final batch may be short.
    pub fn batch(&self, step: usize) -> &[NodeId] {
        let start = (step * self.batch_size).min(self.perm.len());
        let end = (start + self.batch_size).min(self.perm.len());
        &self.perm[start..end]
    }

    /// Steps owned by `producer` out of `num_producers`, round-robin.
    pub fn owned_steps(&self, producer: usize, num_producers: usize) -> impl Iterator<Item = usize> {
        (producer..self.num_steps()).step_by(num_producers.max(1))
    }
}

fn mix(seed: u64, epoch: u32) -> u64 {
    seed ^ u64::from(epoch).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// One batch of seeds produced by an [`EpochShuffler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShuffledBatch {
    /// Key of the batch.
    pub key: BatchKey,
    /// Seed nodes.
    pub seeds: Vec<NodeId>,
}

/// Walks the epochs of a run, yielding the steps a producer owns.
#[derive(Debug)]
pub struct EpochShuffler {
    train: Arc<[NodeId]>,
    batch_size: usize,
    num_epoch: usize,
    seed: u64,
    producer: usize,
    num_producers: usize,
    plan: Option<EpochPlan>,
    owned: Vec<usize>,
    cursor: usize,
}

impl EpochShuffler {
    /// Shuffler over all steps of `num_epoch` epochs.
    pub fn new(train: &[NodeId], batch_size: usize, num_epoch: usize, seed: u64) -> Result<Self> {
        if train.is_empty() {
            return Err(GnnError::EmptySeedSet);
        }
        if batch_size == 0 {
            return Err(GnnError::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self {
            train: Arc::from(train),
            batch_size,
            num_epoch,
            seed,
            producer: 0,
            num_producers: 1,
            plan: None,
            owned: Vec::new(),
            cursor: 0,
        })
    }

    /// Restricts the shuffler to steps `producer, producer + n, ...`.
    pub fn partitioned(mut self, producer: usize, num_producers: usize) -> Result<Self> {
        if num_producers == 0 || producer >= num_producers {
            return Err(GnnError::InvalidArgument(format!(
                "producer {producer} outside 0..{num_producers}"
            )));
        }
        self.producer = producer;
        self.num_producers = num_producers;
        Ok(self)
    }

    /// Steps in every epoch of the run.
    pub fn steps_per_epoch(&self) -> usize {
        steps_per_epoch(self.train.len(), self.batch_size)
    }

    /// Epochs in the run.
    pub fn num_epoch(&self) -> usize {
        self.num_epoch
    }

    /// Plan for `epoch`.
    pub fn plan(&self, epoch: u32) -> EpochPlan {
        EpochPlan::new(&self.train, self.batch_size, self.seed, epoch)
    }

    /// Steps this producer owns in each epoch.
    pub fn owned_steps_per_epoch(&self) -> usize {
        (self.producer..self.steps_per_epoch())
            .step_by(self.num_producers)
            .count()
    }
}

impl Iterator for EpochShuffler {
    type Item = ShuffledBatch;

    fn next(&mut self) -> Option<ShuffledBatch> {
        loop {
            if let Some(plan) = &self.plan {
                if let Some(&step) = self.owned.get(self.cursor) {
                    self.cursor += 1;
                    return Some(ShuffledBatch {
                        key: BatchKey::new(plan.epoch(), step as u32),
                        seeds: plan.batch(step).to_vec(),
                    });
                }
            }
            let next_epoch = self.plan.as_ref().map_or(0, |p| p.epoch() + 1);
            if next_epoch as usize >= self.num_epoch {
                return None;
            }
            let plan = self.plan(next_epoch);
            self.owned = plan.owned_steps(self.producer, self.num_producers).collect();
            self.cursor = 0;
            self.plan = Some(plan);
        }
    }
}
