//! Error metrics evaluated after every solver step.

use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};

use crate::compressor::Cardinality;
use crate::errors::{ensure_eq, Result};
use crate::operand::{real_to_f64, Element, Operand};

/// Borrowed view of the solver state an error metric may inspect.
pub struct Snapshot<'a, T: Element, O: ?Sized> {
    pub a: &'a O,
    pub b: &'a DVector<T>,
    pub x: &'a DVector<T>,
    pub compressed_mat: &'a DMatrix<T>,
    pub compressed_vec: &'a DVector<T>,
    pub cardinality: Cardinality,
}

pub trait SolverErrorConfig<T: Element> {
    type Recipe: SolverError<T>;

    /// Sizes the metric's buffers for an `a_shape` system sketched to
    /// `compression_dim`.
    fn complete(&self, a_shape: (usize, usize), compression_dim: usize) -> Result<Self::Recipe>;
}

/// What a solver needs from its error metric: a residual-like quantity.
pub trait SolverError<T: Element> {
    /// Value of the most recent `compute`.
    fn residual(&self) -> f64;

    fn compute<O: Operand<T> + ?Sized>(&mut self, snapshot: &Snapshot<'_, T, O>) -> Result<f64>;
}

/// `‖b − A x‖₂`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullResidual;

#[derive(Debug, Clone, PartialEq)]
pub struct FullResidualRecipe<T> {
    buffer: DVector<T>,
    residual: f64,
}

fn residual_into<T: Element, O: Operand<T> + ?Sized>(
    snapshot: &Snapshot<'_, T, O>,
    buffer: &mut DVector<T>,
) -> Result<()> {
    ensure_eq("residual", "matrix rows", snapshot.a.nrows(), "buffer length", buffer.len())?;
    ensure_eq("residual", "matrix columns", snapshot.a.ncols(), "x length", snapshot.x.len())?;
    buffer.copy_from(snapshot.b);
    snapshot.a.mul_vec_add(-T::one(), snapshot.x, T::one(), buffer);
    Ok(())
}

impl<T: Element> SolverErrorConfig<T> for FullResidual {
    type Recipe = FullResidualRecipe<T>;

    fn complete(&self, a_shape: (usize, usize), _compression_dim: usize) -> Result<FullResidualRecipe<T>> {
        Ok(FullResidualRecipe {
            buffer: DVector::zeros(a_shape.0),
            residual: f64::INFINITY,
        })
    }
}

impl<T: Element> SolverError<T> for FullResidualRecipe<T> {
    fn residual(&self) -> f64 {
        self.residual
    }

    fn compute<O: Operand<T> + ?Sized>(&mut self, snapshot: &Snapshot<'_, T, O>) -> Result<f64> {
        residual_into(snapshot, &mut self.buffer)?;
        self.residual = real_to_f64::<T>(self.buffer.norm());
        Ok(self.residual)
    }
}

/// Residual seen through the current sketch: `‖S b − S A x‖₂` on the row
/// side, `‖(A S)ᴴ (b − A x)‖₂` on the column side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedResidual;

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedResidualRecipe<T> {
    full: DVector<T>,
    compact: DVector<T>,
    residual: f64,
}

impl<T: Element> SolverErrorConfig<T> for CompressedResidual {
    type Recipe = CompressedResidualRecipe<T>;

    fn complete(
        &self,
        a_shape: (usize, usize),
        compression_dim: usize,
    ) -> Result<CompressedResidualRecipe<T>> {
        Ok(CompressedResidualRecipe {
            full: DVector::zeros(a_shape.0),
            compact: DVector::zeros(compression_dim),
            residual: f64::INFINITY,
        })
    }
}

impl<T: Element> SolverError<T> for CompressedResidualRecipe<T> {
    fn residual(&self) -> f64 {
        self.residual
    }

    fn compute<O: Operand<T> + ?Sized>(&mut self, snapshot: &Snapshot<'_, T, O>) -> Result<f64> {
        let m = snapshot.compressed_mat;
        match snapshot.cardinality {
            Cardinality::Right => {
                ensure_eq("compressed residual", "sketched rows", m.nrows(), "buffer length", self.full.len())?;
                ensure_eq("compressed residual", "sketched columns", m.ncols(), "buffer length", self.compact.len())?;
                residual_into(snapshot, &mut self.full)?;
                self.compact.gemv_ad(T::one(), m, &self.full, T::zero());
            }
            _ => {
                ensure_eq("compressed residual", "sketched rows", m.nrows(), "buffer length", self.compact.len())?;
                ensure_eq("compressed residual", "sketched columns", m.ncols(), "x length", snapshot.x.len())?;
                ensure_eq("compressed residual", "sketched rows", m.nrows(), "sketched rhs length", snapshot.compressed_vec.len())?;
                self.compact.copy_from(snapshot.compressed_vec);
                self.compact.gemv(-T::one(), m, snapshot.x, T::one());
            }
        }
        self.residual = real_to_f64::<T>(self.compact.norm());
        Ok(self.residual)
    }
}
