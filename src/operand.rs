//! Capability traits shared by every sketch and solver.
//!
//! Source matrices are consumed through [`Operand`], so dense and sparse
//! storage go through the same compressor and solver code. Outputs are
//! written through [`Target`], which hands out a mutable dense view.

use nalgebra::{ComplexField, DMatrix, DMatrixViewMut, DVector};
use simba::scalar::SupersetOf;

/// Numeric element type of sources, sketches and iterates: `f32`, `f64`,
/// `Complex<f32>` or `Complex<f64>`.
pub trait Element: ComplexField + Copy {}

impl<T: ComplexField + Copy> Element for T {}

pub(crate) fn from_f64<T: Element>(value: f64) -> T {
    nalgebra::convert(value)
}

pub(crate) fn real_to_f64<T: Element>(value: T::RealField) -> f64 {
    <T::RealField as SupersetOf<f64>>::to_subset(&value).unwrap_or(f64::NAN)
}

/// Read access a compressor or solver needs from a matrix or vector.
///
/// Vectors are treated as single-column matrices.
pub trait Operand<T: Element> {
    fn shape(&self) -> (usize, usize);

    /// `dst[dst_row, ..] += alpha * self[row, ..]`
    fn row_axpy(&self, row: usize, alpha: T, dst: &mut DMatrixViewMut<'_, T>, dst_row: usize);

    /// `dst[.., dst_col] += alpha * self[.., col]`
    fn col_axpy(&self, col: usize, alpha: T, dst: &mut DMatrixViewMut<'_, T>, dst_col: usize);

    /// Unconjugated product of one row with `x`.
    fn row_dot(&self, row: usize, x: &DVector<T>) -> T;

    fn row_norm_squared(&self, row: usize) -> T::RealField;

    fn col_norm_squared(&self, col: usize) -> T::RealField;

    /// `y ← alpha * self * x + beta * y`
    fn mul_vec_add(&self, alpha: T, x: &DVector<T>, beta: T, y: &mut DVector<T>);

    fn nrows(&self) -> usize {
        self.shape().0
    }

    fn ncols(&self) -> usize {
        self.shape().1
    }
}

macro_rules! impl_dense_operand {
    ($ty:ty) => {
        impl<T: Element> Operand<T> for $ty {
            fn shape(&self) -> (usize, usize) {
                (self.nrows(), self.ncols())
            }

            fn row_axpy(&self, row: usize, alpha: T, dst: &mut DMatrixViewMut<'_, T>, dst_row: usize) {
                for j in 0..self.ncols() {
                    dst[(dst_row, j)] += alpha * self[(row, j)];
                }
            }

            fn col_axpy(&self, col: usize, alpha: T, dst: &mut DMatrixViewMut<'_, T>, dst_col: usize) {
                for i in 0..self.nrows() {
                    dst[(i, dst_col)] += alpha * self[(i, col)];
                }
            }

            fn row_dot(&self, row: usize, x: &DVector<T>) -> T {
                (0..self.ncols()).fold(T::zero(), |acc, j| acc + self[(row, j)] * x[j])
            }

            fn row_norm_squared(&self, row: usize) -> T::RealField {
                self.row(row).norm_squared()
            }

            fn col_norm_squared(&self, col: usize) -> T::RealField {
                self.column(col).norm_squared()
            }

            fn mul_vec_add(&self, alpha: T, x: &DVector<T>, beta: T, y: &mut DVector<T>) {
                y.gemv(alpha, self, x, beta);
            }
        }
    };
}

impl_dense_operand!(DMatrix<T>);
impl_dense_operand!(DVector<T>);

/// Destination of a multiply: anything that can lend a dense mutable view.
pub trait Target<T: Element> {
    fn target_mut(&mut self) -> DMatrixViewMut<'_, T>;
}

impl<T: Element> Target<T> for DMatrix<T> {
    fn target_mut(&mut self) -> DMatrixViewMut<'_, T> {
        let shape = self.shape();
        self.view_mut((0, 0), shape)
    }
}

impl<T: Element> Target<T> for DVector<T> {
    fn target_mut(&mut self) -> DMatrixViewMut<'_, T> {
        let shape = self.shape();
        self.view_mut((0, 0), shape)
    }
}

impl<'a, T: Element> Target<T> for DMatrixViewMut<'a, T> {
    fn target_mut(&mut self) -> DMatrixViewMut<'_, T> {
        let shape = self.shape();
        self.view_mut((0, 0), shape)
    }
}

/// `view ← beta * view`, treating a zero `beta` as an overwrite.
pub(crate) fn scale_view<T: Element>(view: &mut DMatrixViewMut<'_, T>, beta: T) {
    if beta.is_zero() {
        view.fill(T::zero());
    } else if beta != T::one() {
        for v in view.iter_mut() {
            *v *= beta;
        }
    }
}
