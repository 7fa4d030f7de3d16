use std::marker::PhantomData;

use rand::Rng;

use super::{bound_shape, check_bound_source, Cardinality, Compressor, CompressorConfig};
use crate::distribution::{DistributionConfig, IndexDistribution, Uniform};
use crate::errors::Result;
use crate::operand::{Element, Operand};

/// Selects `compression_dim` rows (Left) or columns (Right) of the source
/// according to a distribution. The operator is an unscaled selection
/// matrix, applied as a gather or scatter and never materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling<D = Uniform> {
    pub cardinality: Cardinality,
    pub compression_dim: usize,
    pub distribution: D,
}

impl<D: Default> Default for Sampling<D> {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Left,
            compression_dim: 8,
            distribution: D::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingRecipe<T, D> {
    cardinality: Cardinality,
    compression_dim: usize,
    shape: (usize, usize),
    indices: Vec<usize>,
    distribution: D,
    _element: PhantomData<T>,
}

impl<T, D> SamplingRecipe<T, D> {
    /// Source indices selected by the current draw, in output order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn distribution(&self) -> &D {
        &self.distribution
    }
}

impl<T, D> CompressorConfig<T> for Sampling<D>
where
    T: Element,
    D: DistributionConfig<T>,
{
    type Recipe = SamplingRecipe<T, D::Recipe>;

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
    ) -> Result<Self::Recipe>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        let shape = bound_shape(cardinality, self.compression_dim, source.shape(), "Sampling")?;
        let mut distribution = self.distribution.complete(cardinality, source)?;
        let mut indices = vec![0; self.compression_dim];
        distribution.sample(&mut indices, rng)?;
        Ok(SamplingRecipe {
            cardinality,
            compression_dim: self.compression_dim,
            shape,
            indices,
            distribution,
            _element: PhantomData,
        })
    }
}

impl<T, D> Compressor<T> for SamplingRecipe<T, D>
where
    T: Element,
    D: IndexDistribution<T>,
{
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
        check_bound_source(self.cardinality, self.shape, source.shape(), "Sampling update")?;
        self.distribution.update(source)?;
        self.distribution.sample(&mut self.indices, rng)
    }

    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, mut f: F) {
        for (out, &src) in self.indices.iter().enumerate() {
            match self.cardinality {
                Cardinality::Left => f(out, src, T::one()),
                _ => f(src, out, T::one()),
            }
        }
    }
}
