use rand::Rng;

use super::{bound_shape, check_bound_source, shuffle_prefix, Cardinality, Compressor, CompressorConfig};
use crate::errors::{RandNLAError, Result};
use crate::operand::{from_f64, Element, Operand};

/// Sparse sketch with exactly `nnz` entries `±1/√nnz` per source index, at
/// positions drawn without replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseSign {
    pub cardinality: Cardinality,
    pub compression_dim: usize,
    pub nnz: usize,
}

impl Default for SparseSign {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Left,
            compression_dim: 8,
            nnz: 8,
        }
    }
}

/// Entries are stored source-major: source index `j` owns
/// `positions[j * nnz..(j + 1) * nnz]` and the matching `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseSignRecipe<T: Element> {
    cardinality: Cardinality,
    compression_dim: usize,
    nnz: usize,
    shape: (usize, usize),
    positions: Vec<usize>,
    values: Vec<T>,
    perm: Vec<usize>,
}

impl<T: Element> SparseSignRecipe<T> {
    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let scale = 1.0 / (self.nnz as f64).sqrt();
        let plus: T = from_f64(scale);
        let minus: T = from_f64(-scale);
        for (positions, values) in self
            .positions
            .chunks_mut(self.nnz)
            .zip(self.values.chunks_mut(self.nnz))
        {
            shuffle_prefix(&mut self.perm, self.nnz, rng);
            positions.copy_from_slice(&self.perm[..self.nnz]);
            for v in values.iter_mut() {
                *v = if rng.gen::<bool>() { plus } else { minus };
            }
        }
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Length of the source dimension the sketch acts on.
    pub fn source_dim(&self) -> usize {
        self.positions.len() / self.nnz
    }
}

impl<T: Element> CompressorConfig<T> for SparseSign {
    type Recipe = SparseSignRecipe<T>;

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.compression_dim
    }

    fn complete_for<O, R>(
        &self,
        cardinality: Cardinality,
        source: &O,
        rng: &mut R,
    ) -> Result<SparseSignRecipe<T>>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        let shape = bound_shape(cardinality, self.compression_dim, source.shape(), "SparseSign")?;
        if self.nnz == 0 || self.nnz > self.compression_dim {
            return Err(RandNLAError::invalid_argument(
                "nnz",
                format!(
                    "nnz must lie in 1..={} (the compression dimension), found {}",
                    self.compression_dim, self.nnz
                ),
            ));
        }
        let n = match cardinality {
            Cardinality::Left => shape.1,
            _ => shape.0,
        };
        let mut recipe = SparseSignRecipe {
            cardinality,
            compression_dim: self.compression_dim,
            nnz: self.nnz,
            shape,
            positions: vec![0; n * self.nnz],
            values: vec![T::zero(); n * self.nnz],
            perm: (0..self.compression_dim).collect(),
        };
        recipe.draw(rng);
        Ok(recipe)
    }
}

impl<T: Element> Compressor<T> for SparseSignRecipe<T> {
    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.compression_dim
    }

    fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn update<O, R>(&mut self, source: &O, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        check_bound_source(self.cardinality, self.shape, source.shape(), "SparseSign update")?;
        self.draw(rng);
        Ok(())
    }

    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, mut f: F) {
        let left = self.cardinality == Cardinality::Left;
        for (j, (positions, values)) in self
            .positions
            .chunks(self.nnz)
            .zip(self.values.chunks(self.nnz))
            .enumerate()
        {
            for (&p, &v) in positions.iter().zip(values) {
                if left {
                    f(p, j, v);
                } else {
                    f(j, p, v);
                }
            }
        }
    }
}
