use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::{bound_shape, check_bound_source, Cardinality, Compressor, CompressorConfig};
use crate::errors::Result;
use crate::operand::{from_f64, Element, Operand};

/// Dense sketch with i.i.d. `N(0, 1/compression_dim)` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gaussian {
    pub cardinality: Cardinality,
    pub compression_dim: usize,
}

impl Default for Gaussian {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Left,
            compression_dim: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianRecipe<T: Element> {
    cardinality: Cardinality,
    compression_dim: usize,
    op: DMatrix<T>,
}

impl<T: Element> GaussianRecipe<T> {
    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let scale = 1.0 / (self.compression_dim as f64).sqrt();
        for v in self.op.iter_mut() {
            let z: f64 = StandardNormal.sample(rng);
            *v = from_f64(z * scale);
        }
    }

    /// The materialized operator.
    pub fn matrix(&self) -> &DMatrix<T> {
        &self.op
    }
}

impl<T: Element> CompressorConfig<T> for Gaussian {
    type Recipe = GaussianRecipe<T>;

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
    ) -> Result<GaussianRecipe<T>>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        let (rows, cols) = bound_shape(cardinality, self.compression_dim, source.shape(), "Gaussian")?;
        let mut recipe = GaussianRecipe {
            cardinality,
            compression_dim: self.compression_dim,
            op: DMatrix::zeros(rows, cols),
        };
        recipe.draw(rng);
        Ok(recipe)
    }
}

impl<T: Element> Compressor<T> for GaussianRecipe<T> {
    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.compression_dim
    }

    fn shape(&self) -> (usize, usize) {
        self.op.shape()
    }

    fn update<O, R>(&mut self, source: &O, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        check_bound_source(self.cardinality, self.op.shape(), source.shape(), "Gaussian update")?;
        self.draw(rng);
        Ok(())
    }

    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, mut f: F) {
        for j in 0..self.op.ncols() {
            for i in 0..self.op.nrows() {
                f(i, j, self.op[(i, j)]);
            }
        }
    }

    fn to_dense(&self) -> DMatrix<T> {
        self.op.clone()
    }
}
