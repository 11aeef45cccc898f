use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use super::{Dataset, DatasetBuilder};
use crate::types::{NodeId, Result};

/// Parameters of a synthetic power-law-ish graph.
#[derive(Clone, Debug, Serialize)]
pub struct SyntheticGraph {
    /// Node count.
    pub num_node: usize,
    /// Mean row length.
    pub avg_degree: usize,
    /// Feature width.
    pub feat_dim: usize,
    /// Label classes.
    pub num_class: usize,
    /// Fraction of nodes in the train split.
    pub train_ratio: f64,
    /// Fraction of nodes in the validation split.
    pub valid_ratio: f64,
    /// Fraction of nodes in the test split.
    pub test_ratio: f64,
    /// Exponent biasing neighbor choice toward low ids; 1.0 is uniform.
    pub skew: f64,
    /// Attach random edge weights.
    pub weighted: bool,
    /// RNG seed.
    pub seed: u64,
}

impl SyntheticGraph {
    /// Small defaults suitable for tests and demos.
    pub fn new(num_node: usize, avg_degree: usize) -> Self {
        Self {
            num_node,
            avg_degree,
            feat_dim: 16,
            num_class: 4,
            train_ratio: 0.6,
            valid_ratio: 0.2,
            test_ratio: 0.2,
            skew: 2.0,
            weighted: false,
            seed: 0x5151_5151,
        }
    }

    /// Sets the feature width.
    pub fn feat_dim(mut self, dim: usize) -> Self {
        self.feat_dim = dim;
        self
    }

    /// Sets the label class count.
    pub fn num_class(mut self, num_class: usize) -> Self {
        self.num_class = num_class;
        self
    }

    /// Sets the train fraction.
    pub fn train_ratio(mut self, ratio: f64) -> Self {
        self.train_ratio = ratio;
        self
    }

    /// Enables random edge weights.
    pub fn weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    /// Sets the degree skew exponent.
    pub fn skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Generates the dataset.
    pub fn build(&self) -> Result<Dataset> {
        let n = self.num_node;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut builder = DatasetBuilder::new(n);
        let mut row: Vec<NodeId> = Vec::new();
        if n > 1 {
            for u in 0..n as NodeId {
                let len = rng.gen_range(0..=self.avg_degree * 2).min(n - 1);
                row.clear();
                let mut attempts = 0;
                while row.len() < len && attempts < len * 64 {
                    attempts += 1;
                    let r: f64 = rng.gen();
                    let v = ((r.powf(self.skew.max(1.0)) * n as f64) as usize).min(n - 1) as NodeId;
                    if v != u && !row.contains(&v) {
                        row.push(v);
                    }
                }
                for &v in &row {
                    builder = if self.weighted {
                        builder.weighted_edge(u, v, rng.gen_range(0.1f32..10.0))
                    } else {
                        builder.edge(u, v)
                    };
                }
            }
        }
        let feat: Vec<f32> = (0..n * self.feat_dim)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        let classes = self.num_class.max(1) as i64;
        let labels: Vec<i64> = (0..n).map(|_| rng.gen_range(0..classes)).collect();
        let mut ids: Vec<NodeId> = (0..n as NodeId).collect();
        ids.shuffle(&mut rng);
        let n_train = ((n as f64) * self.train_ratio).round() as usize;
        let n_valid = ((n as f64) * self.valid_ratio).round() as usize;
        let n_test = ((n as f64) * self.test_ratio).round() as usize;
        let n_train = n_train.min(n);
        let n_valid = n_valid.min(n - n_train);
        let n_test = n_test.min(n - n_train - n_valid);
        let train = ids[..n_train].to_vec();
        let valid = ids[n_train..n_train + n_valid].to_vec();
        let test = ids[n_train + n_valid..n_train + n_valid + n_test].to_vec();
        builder
            .features(self.feat_dim, feat)
            .labels(self.num_class, labels)
            .train_set(train)
            .valid_set(valid)
            .test_set(test)
            .build()
    }
}
