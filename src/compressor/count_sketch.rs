use rand::Rng;

use super::{bound_shape, check_bound_source, Cardinality, Compressor, CompressorConfig};
use crate::errors::Result;
use crate::operand::{Element, Operand};

/// Hashes every source index into one of `compression_dim` buckets with a
/// random sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSketch {
    pub cardinality: Cardinality,
    pub compression_dim: usize,
}

impl Default for CountSketch {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Left,
            compression_dim: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountSketchRecipe<T: Element> {
    cardinality: Cardinality,
    compression_dim: usize,
    shape: (usize, usize),
    buckets: Vec<usize>,
    signs: Vec<T>,
}

impl<T: Element> CountSketchRecipe<T> {
    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for (bucket, sign) in self.buckets.iter_mut().zip(self.signs.iter_mut()) {
            *bucket = rng.gen_range(0..self.compression_dim);
            *sign = if rng.gen::<bool>() { T::one() } else { -T::one() };
        }
    }

    /// Bucket assigned to each source index.
    pub fn buckets(&self) -> &[usize] {
        &self.buckets
    }
}

impl<T: Element> CompressorConfig<T> for CountSketch {
    type Recipe = CountSketchRecipe<T>;

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
    ) -> Result<CountSketchRecipe<T>>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        let shape = bound_shape(cardinality, self.compression_dim, source.shape(), "CountSketch")?;
        let n = match cardinality {
            Cardinality::Left => shape.1,
            _ => shape.0,
        };
        let mut recipe = CountSketchRecipe {
            cardinality,
            compression_dim: self.compression_dim,
            shape,
            buckets: vec![0; n],
            signs: vec![T::one(); n],
        };
        recipe.draw(rng);
        Ok(recipe)
    }
}

impl<T: Element> Compressor<T> for CountSketchRecipe<T> {
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
        check_bound_source(self.cardinality, self.shape, source.shape(), "CountSketch update")?;
        self.draw(rng);
        Ok(())
    }

    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, mut f: F) {
        for (j, (&bucket, &sign)) in self.buckets.iter().zip(&self.signs).enumerate() {
            match self.cardinality {
                Cardinality::Left => f(bucket, j, sign),
                _ => f(j, bucket, sign),
            }
        }
    }
}
