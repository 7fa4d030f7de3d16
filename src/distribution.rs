//! Index distributions driving the sampling compressor.
//!
//! A distribution is completed against a source matrix and a side: Left
//! distributions range over rows, Right distributions over columns.

use std::cmp::Ordering;

use rand::Rng;

use crate::compressor::{source_dim, Cardinality};
use crate::errors::{ensure_eq, RandNLAError, Result};
use crate::operand::{real_to_f64, Element, Operand};

pub trait DistributionConfig<T: Element> {
    type Recipe: IndexDistribution<T>;

    fn complete<O: Operand<T> + ?Sized>(
        &self,
        cardinality: Cardinality,
        source: &O,
    ) -> Result<Self::Recipe>;
}

pub trait IndexDistribution<T: Element> {
    /// Candidate indices.
    fn state_space(&self) -> &[usize];

    /// Selection weight of each candidate, aligned with `state_space`.
    fn weights(&self) -> &[f64];

    fn replace(&self) -> bool;

    /// Recomputes source-dependent weights in place.
    fn update<O: Operand<T> + ?Sized>(&mut self, source: &O) -> Result<()>;

    /// Fills `buffer` with indices drawn from `state_space`.
    fn sample<R: Rng + ?Sized>(&mut self, buffer: &mut [usize], rng: &mut R) -> Result<()>;
}

/// Weighted index sampler with reusable scratch buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    state_space: Vec<usize>,
    weights: Vec<f64>,
    cumulative: Vec<f64>,
    keys: Vec<f64>,
    order: Vec<usize>,
    replace: bool,
}

impl WeightTable {
    pub fn new(weights: Vec<f64>, replace: bool) -> Result<Self> {
        let n = weights.len();
        let mut table = Self {
            state_space: (0..n).collect(),
            weights,
            cumulative: vec![0.0; n],
            keys: vec![0.0; n],
            order: (0..n).collect(),
            replace,
        };
        table.refresh()?;
        Ok(table)
    }

    fn refresh(&mut self) -> Result<()> {
        if let Some(bad) = self.weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(RandNLAError::invalid_argument(
                "weights",
                format!("weights must be finite and non-negative, found {}", bad),
            ));
        }
        let mut total = 0.0;
        for (c, w) in self.cumulative.iter_mut().zip(&self.weights) {
            total += w;
            *c = total;
        }
        Ok(())
    }

    /// Number of candidates with a positive weight.
    pub fn support(&self) -> usize {
        self.weights.iter().filter(|w| **w > 0.0).count()
    }

    pub fn sample<R: Rng + ?Sized>(&mut self, buffer: &mut [usize], rng: &mut R) -> Result<()> {
        let k = buffer.len();
        if k == 0 {
            return Ok(());
        }
        let available = self.support();
        if available == 0 {
            return Err(RandNLAError::InvalidDimensions(
                "cannot sample: every weight is zero".to_string(),
            ));
        }

        if self.replace {
            let n = self.cumulative.len();
            let total = self.cumulative[n - 1];
            for slot in buffer.iter_mut() {
                let target = rng.gen::<f64>() * total;
                let idx = self.cumulative.partition_point(|&c| c <= target);
                *slot = self.state_space[idx.min(n - 1)];
            }
            return Ok(());
        }

        if k > available {
            return Err(RandNLAError::InvalidDimensions(format!(
                "cannot draw {} distinct indices from {} indices with non-zero weight",
                k, available
            )));
        }

        // Efraimidis–Spirakis: the k largest keys ln(u)/w form a weighted
        // sample without replacement. Positive weights keep a finite key, even
        // when a subnormal weight sends the quotient to -inf.
        for (i, (key, w)) in self.keys.iter_mut().zip(&self.weights).enumerate() {
            *key = if *w > 0.0 {
                ((1.0 - rng.gen::<f64>()).ln() / w).max(f64::MIN)
            } else {
                f64::NEG_INFINITY
            };
            self.order[i] = i;
        }
        if k < self.order.len() {
            let keys = &self.keys;
            self.order.select_nth_unstable_by(k - 1, |a, b| {
                keys[*b].partial_cmp(&keys[*a]).unwrap_or(Ordering::Equal)
            });
        }
        for (slot, &pick) in buffer.iter_mut().zip(&self.order) {
            *slot = self.state_space[pick];
        }
        Ok(())
    }
}

/// Every row (Left) or column (Right) equally likely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uniform {
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformRecipe {
    table: WeightTable,
}

impl<T: Element> DistributionConfig<T> for Uniform {
    type Recipe = UniformRecipe;

    fn complete<O: Operand<T> + ?Sized>(
        &self,
        cardinality: Cardinality,
        source: &O,
    ) -> Result<UniformRecipe> {
        let n = source_dim(cardinality, source.shape(), "Uniform distribution")?;
        Ok(UniformRecipe {
            table: WeightTable::new(vec![1.0; n], self.replace)?,
        })
    }
}

impl<T: Element> IndexDistribution<T> for UniformRecipe {
    fn state_space(&self) -> &[usize] {
        &self.table.state_space
    }

    fn weights(&self) -> &[f64] {
        &self.table.weights
    }

    fn replace(&self) -> bool {
        self.table.replace
    }

    fn update<O: Operand<T> + ?Sized>(&mut self, _source: &O) -> Result<()> {
        Ok(())
    }

    fn sample<R: Rng + ?Sized>(&mut self, buffer: &mut [usize], rng: &mut R) -> Result<()> {
        self.table.sample(buffer, rng)
    }
}

/// Leverage-like weighting: row (Left) or column (Right) `i` is drawn with
/// probability proportional to its squared norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct L2Norm {
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct L2NormRecipe {
    cardinality: Cardinality,
    table: WeightTable,
}

fn squared_norms<T: Element, O: Operand<T> + ?Sized>(
    cardinality: Cardinality,
    source: &O,
    out: &mut [f64],
) {
    for (i, w) in out.iter_mut().enumerate() {
        *w = match cardinality {
            Cardinality::Right => real_to_f64::<T>(source.col_norm_squared(i)),
            _ => real_to_f64::<T>(source.row_norm_squared(i)),
        };
    }
}

impl<T: Element> DistributionConfig<T> for L2Norm {
    type Recipe = L2NormRecipe;

    fn complete<O: Operand<T> + ?Sized>(
        &self,
        cardinality: Cardinality,
        source: &O,
    ) -> Result<L2NormRecipe> {
        let n = source_dim(cardinality, source.shape(), "L2Norm distribution")?;
        let mut weights = vec![0.0; n];
        squared_norms::<T, O>(cardinality, source, &mut weights);
        Ok(L2NormRecipe {
            cardinality,
            table: WeightTable::new(weights, self.replace)?,
        })
    }
}

impl<T: Element> IndexDistribution<T> for L2NormRecipe {
    fn state_space(&self) -> &[usize] {
        &self.table.state_space
    }

    fn weights(&self) -> &[f64] {
        &self.table.weights
    }

    fn replace(&self) -> bool {
        self.table.replace
    }

    fn update<O: Operand<T> + ?Sized>(&mut self, source: &O) -> Result<()> {
        let n = source_dim(self.cardinality, source.shape(), "L2Norm distribution")?;
        ensure_eq(
            "L2Norm distribution update",
            "state space size",
            self.table.weights.len(),
            "source dimension",
            n,
        )?;
        squared_norms::<T, O>(self.cardinality, source, &mut self.table.weights);
        self.table.refresh()
    }

    fn sample<R: Rng + ?Sized>(&mut self, buffer: &mut [usize], rng: &mut R) -> Result<()> {
        self.table.sample(buffer, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, DMatrix};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    #[test]
    fn test_sampling_without_replacement_is_unique() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut table = WeightTable::new(vec![1.0, 2.0, 0.5, 4.0, 1.0, 3.0], false).unwrap();
        for _ in 0..50 {
            let mut buffer = [0usize; 4];
            table.sample(&mut buffer, &mut rng).unwrap();
            let unique: HashSet<_> = buffer.iter().collect();
            assert_eq!(unique.len(), 4);
            assert!(buffer.iter().all(|&i| i < 6));
        }
    }

    #[test]
    fn test_requesting_too_many_unique_draws_fails() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut table = WeightTable::new(vec![1.0; 5], false).unwrap();
        let mut buffer = [0usize; 6];
        let err = table.sample(&mut buffer, &mut rng).unwrap_err();
        assert!(err.is_dimension_error());

        let mut full = [0usize; 5];
        table.sample(&mut full, &mut rng).unwrap();
        let mut sorted = full.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_weights_never_drawn() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for replace in [true, false] {
            let mut table = WeightTable::new(vec![0.0, 1.0, 0.0, 2.0, 0.0], replace).unwrap();
            for _ in 0..200 {
                let mut buffer = [0usize; 2];
                table.sample(&mut buffer, &mut rng).unwrap();
                assert!(buffer.iter().all(|&i| i == 1 || i == 3));
            }
        }
        let mut table = WeightTable::new(vec![0.0, 1.0, 0.0], false).unwrap();
        assert!(table.sample(&mut [0usize; 2], &mut rng).is_err());
    }

    #[test]
    fn test_subnormal_weight_outranks_zero_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let mut table = WeightTable::new(vec![0.0, 5e-324, 0.0, 1.0], false).unwrap();
        for _ in 0..200 {
            let mut buffer = [0usize; 2];
            table.sample(&mut buffer, &mut rng).unwrap();
            buffer.sort_unstable();
            assert_eq!(buffer, [1, 3]);
        }
    }

    #[test]
    fn test_sampling_with_replacement_follows_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut table = WeightTable::new(vec![1.0, 3.0], true).unwrap();
        let mut buffer = vec![0usize; 20_000];
        table.sample(&mut buffer, &mut rng).unwrap();
        let ones = buffer.iter().filter(|&&i| i == 1).count() as f64 / buffer.len() as f64;
        assert!((ones - 0.75).abs() < 0.02);
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        assert!(WeightTable::new(vec![1.0, -0.5], true).is_err());
    }

    #[test]
    fn test_l2norm_weights_follow_rows_and_columns() {
        let a = dmatrix![3.0, 4.0; 0.0, 0.0; 1.0, 0.0];
        let rows: L2NormRecipe = L2Norm::default().complete(Cardinality::Left, &a).unwrap();
        assert_eq!(IndexDistribution::<f64>::weights(&rows), &[25.0, 0.0, 1.0]);
        assert_eq!(IndexDistribution::<f64>::state_space(&rows), &[0, 1, 2]);

        let cols: L2NormRecipe = L2Norm::default().complete(Cardinality::Right, &a).unwrap();
        assert_eq!(IndexDistribution::<f64>::weights(&cols), &[10.0, 16.0]);
    }

    #[test]
    fn test_l2norm_update_recomputes_in_place() {
        let mut a = dmatrix![1.0, 0.0; 0.0, 2.0];
        let mut recipe: L2NormRecipe = L2Norm { replace: true }.complete(Cardinality::Left, &a).unwrap();
        a[(0, 0)] = 0.0;
        recipe.update(&a).unwrap();
        assert_eq!(IndexDistribution::<f64>::weights(&recipe), &[0.0, 4.0]);

        let wrong = DMatrix::<f64>::zeros(3, 2);
        assert!(recipe.update(&wrong).is_err());
    }

    #[test]
    fn test_undefined_cardinality_is_rejected() {
        let a = DMatrix::<f64>::zeros(2, 2);
        let result: Result<UniformRecipe> = Uniform::default().complete(Cardinality::Undef, &a);
        assert!(matches!(result, Err(RandNLAError::UndefinedCardinality(_))));
    }
}
