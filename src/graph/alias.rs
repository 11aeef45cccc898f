use rand::Rng;

/// Per-row sampling tables for weighted neighbor choice.
///
/// `prob`/`alias` hold one Vose alias table per CSR row, with alias
/// targets stored as offsets inside the row. `prefix` holds the running
/// weight sum of each row.
#[derive(Clone, Debug)]
pub struct WeightTables {
    prob: Vec<f32>,
    alias: Vec<u32>,
    prefix: Vec<f32>,
}

impl WeightTables {
    /// Builds tables for every row of `indptr`; missing weights count as 1.
    pub fn build(indptr: &[u32], weights: Option<&[f32]>) -> Self {
        let num_edge = indptr.last().copied().unwrap_or(0) as usize;
        let mut prob = vec![0.0f32; num_edge];
        let mut alias = vec![0u32; num_edge];
        let mut small = Vec::new();
        let mut large = Vec::new();
        let mut scaled = Vec::new();
        for row in indptr.windows(2) {
            let (start, end) = (row[0] as usize, row[1] as usize);
            let len = end - start;
            if len == 0 {
                continue;
            }
            let weight = |i: usize| weights.map_or(1.0f64, |w| f64::from(w[start + i]));
            let total: f64 = (0..len).map(weight).sum();
            if total <= 0.0 {
                continue;
            }
            scaled.clear();
            scaled.extend((0..len).map(|i| weight(i) * len as f64 / total));
            small.clear();
            large.clear();
            for (i, p) in scaled.iter().enumerate() {
                if *p < 1.0 {
                    small.push(i);
                } else {
                    large.push(i);
                }
            }
            while !small.is_empty() && !large.is_empty() {
                let (Some(s), Some(&l)) = (small.pop(), large.last()) else {
                    break;
                };
                prob[start + s] = scaled[s] as f32;
                alias[start + s] = l as u32;
                scaled[l] -= 1.0 - scaled[s];
                if scaled[l] < 1.0 {
                    large.pop();
                    small.push(l);
                }
            }
            for i in large.drain(..).chain(small.drain(..)) {
                prob[start + i] = 1.0;
                alias[start + i] = i as u32;
            }
        }
        settle_zero_weights(indptr, weights, &mut prob, &mut alias);
        let prefix = prefix_sums(indptr, weights);
        Self {
            prob,
            alias,
            prefix,
        }
    }

    /// Wraps alias tables loaded from disk.
    pub(crate) fn from_alias(
        indptr: &[u32],
        weights: Option<&[f32]>,
        mut prob: Vec<f32>,
        mut alias: Vec<u32>,
    ) -> Self {
        settle_zero_weights(indptr, weights, &mut prob, &mut alias);
        Self {
            prob,
            alias,
            prefix: prefix_sums(indptr, weights),
        }
    }

    /// Alias probability array.
    pub fn prob(&self) -> &[f32] {
        &self.prob
    }

    /// Alias target array.
    pub fn alias(&self) -> &[u32] {
        &self.alias
    }

    /// Total weight of the row spanning `start..start + len`.
    #[inline]
    pub fn row_total(&self, start: usize, len: usize) -> f32 {
        if len == 0 {
            0.0
        } else {
            self.prefix[start + len - 1]
        }
    }

    /// Draws an offset in `0..len` through the alias table.
    #[inline]
    pub fn sample_alias<R: Rng + ?Sized>(&self, start: usize, len: usize, rng: &mut R) -> usize {
        let k = rng.gen_range(0..len);
        if rng.gen::<f32>() < self.prob[start + k] {
            k
        } else {
            (self.alias[start + k] as usize).min(len - 1)
        }
    }

    /// Draws an offset in `0..len` by binary search over the prefix sums.
    #[inline]
    pub fn sample_prefix<R: Rng + ?Sized>(&self, start: usize, len: usize, rng: &mut R) -> usize {
        let row = &self.prefix[start..start + len];
        let total = row[len - 1];
        let r = rng.gen::<f32>() * total;
        row.partition_point(|c| *c <= r).min(len - 1)
    }
}

/// Makes zero-weight edges unreachable: they never keep their own slot
/// and no slot aliases to them. Rows without positive weight are left as is.
fn settle_zero_weights(
    indptr: &[u32],
    weights: Option<&[f32]>,
    prob: &mut [f32],
    alias: &mut [u32],
) {
    let Some(weights) = weights else {
        return;
    };
    for row in indptr.windows(2) {
        let (start, end) = (row[0] as usize, row[1] as usize);
        let positive = |e: usize| weights[e] > 0.0;
        let Some(fallback) = (start..end).find(|e| positive(*e)) else {
            continue;
        };
        for e in start..end {
            if !positive(e) {
                prob[e] = 0.0;
                alias[e] = (fallback - start) as u32;
                continue;
            }
            let target = start + alias[e] as usize;
            if target >= end || !positive(target) {
                prob[e] = 1.0;
                alias[e] = (e - start) as u32;
            }
        }
    }
}

fn prefix_sums(indptr: &[u32], weights: Option<&[f32]>) -> Vec<f32> {
    let num_edge = indptr.last().copied().unwrap_or(0) as usize;
    let mut prefix = vec![0.0f32; num_edge];
    for row in indptr.windows(2) {
        let mut acc = 0.0f32;
        for e in row[0] as usize..row[1] as usize {
            acc += weights.map_or(1.0, |w| w[e]);
            prefix[e] = acc;
        }
    }
    prefix
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn alias_follows_weights() {
        let indptr = [0u32, 3];
        let weights = [1.0f32, 0.0, 3.0];
        let tables = WeightTables::build(&indptr, Some(&weights));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut counts = [0usize; 3];
        for _ in 0..8000 {
            counts[tables.sample_alias(0, 3, &mut rng)] += 1;
        }
        assert_eq!(counts[1], 0);
        let ratio = counts[2] as f64 / counts[0] as f64;
        assert!((2.5..3.5).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn zero_weight_edges_have_no_alias_mass() {
        let indptr = [0u32, 4, 9];
        let weights = [0.0f32, 0.1, 0.7, 0.2, 0.3, 0.0, 1.0 / 3.0, 0.0, 2.3];
        let tables = WeightTables::build(&indptr, Some(&weights));
        for row in indptr.windows(2) {
            let start = row[0] as usize;
            for e in start..row[1] as usize {
                let target = start + tables.alias()[e] as usize;
                if weights[e] == 0.0 {
                    assert_eq!(tables.prob()[e], 0.0);
                }
                if tables.prob()[e] < 1.0 {
                    assert!(weights[target] > 0.0, "edge {e} aliases to {target}");
                }
            }
        }
    }

    #[test]
    fn loaded_tables_never_pick_zero_weight_edges() {
        let indptr = [0u32, 3];
        let weights = [0.0f32, 2.0, 1.0];
        let tables =
            WeightTables::from_alias(&indptr, Some(&weights), vec![1.0, 1.0, 0.5], vec![0, 1, 0]);
        assert_eq!(tables.prob()[0], 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..2000 {
            assert_ne!(tables.sample_alias(0, 3, &mut rng), 0);
        }
    }

    #[test]
    fn prefix_search_skips_zero_weight_edges() {
        let indptr = [0u32, 0, 4];
        let weights = [0.0f32, 2.0, 0.0, 2.0];
        let tables = WeightTables::build(&indptr, Some(&weights));
        assert_eq!(tables.row_total(0, 4), 4.0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..500 {
            let k = tables.sample_prefix(0, 4, &mut rng);
            assert!(k == 1 || k == 3, "picked zero-weight offset {k}");
        }
    }
}
