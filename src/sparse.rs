//! Sparse source matrix in Compressed Sparse Row (CSR) format.
//!
//! Row access (the Kaczmarz side) is a contiguous scan. Column access (the
//! column-projection side) goes through a column index built once at
//! construction, so a column costs its stored entries rather than one search
//! per row.

use nalgebra::{DMatrix, DMatrixViewMut, DVector};
use num_traits::Zero;

use crate::errors::{RandNLAError, Result};
use crate::operand::{Element, Operand};

/// For an m×n matrix with nnz stored entries:
/// - `values`: nnz values in row-major order
/// - `col_indices`: nnz column indices, sorted within each row
/// - `row_ptrs`: m+1 offsets, row i spans `row_ptrs[i]..row_ptrs[i+1]`
///
/// The column index mirrors this layout column-major: column j spans
/// `col_ptrs[j]..col_ptrs[j+1]` of `col_rows` (ascending row indices) and
/// `col_entries` (positions in `values`).
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    values: Vec<T>,
    col_indices: Vec<usize>,
    row_ptrs: Vec<usize>,
    num_cols: usize,
    col_ptrs: Vec<usize>,
    col_rows: Vec<usize>,
    col_entries: Vec<usize>,
}

impl<T: Element> CsrMatrix<T> {
    /// Creates an all-zero matrix.
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self::from_parts(Vec::new(), Vec::new(), vec![0; num_rows + 1], num_cols)
    }

    /// Assembles the row arrays and builds the column index by counting sort.
    fn from_parts(values: Vec<T>, col_indices: Vec<usize>, row_ptrs: Vec<usize>, num_cols: usize) -> Self {
        let mut col_ptrs = vec![0; num_cols + 1];
        for &j in &col_indices {
            col_ptrs[j + 1] += 1;
        }
        for j in 0..num_cols {
            col_ptrs[j + 1] += col_ptrs[j];
        }

        let mut next = col_ptrs.clone();
        let mut col_rows = vec![0; col_indices.len()];
        let mut col_entries = vec![0; col_indices.len()];
        for i in 0..row_ptrs.len().saturating_sub(1) {
            for idx in row_ptrs[i]..row_ptrs[i + 1] {
                let j = col_indices[idx];
                col_rows[next[j]] = i;
                col_entries[next[j]] = idx;
                next[j] += 1;
            }
        }

        Self {
            values,
            col_indices,
            row_ptrs,
            num_cols,
            col_ptrs,
            col_rows,
            col_entries,
        }
    }

    /// Creates a sparse matrix from a dense one, dropping exact zeros.
    pub fn from_dense(dense: &DMatrix<T>) -> Self {
        let (num_rows, num_cols) = dense.shape();
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptrs = Vec::with_capacity(num_rows + 1);

        for i in 0..num_rows {
            row_ptrs.push(values.len());
            for j in 0..num_cols {
                let val = dense[(i, j)];
                if !val.is_zero() {
                    values.push(val);
                    col_indices.push(j);
                }
            }
        }
        row_ptrs.push(values.len());

        Self::from_parts(values, col_indices, row_ptrs, num_cols)
    }

    /// Creates a sparse matrix from `(row, col, value)` triplets.
    ///
    /// Duplicates are summed; out-of-range indices are rejected.
    pub fn from_triplets(
        num_rows: usize,
        num_cols: usize,
        triplets: &[(usize, usize, T)],
    ) -> Result<Self> {
        if let Some(&(row, col, _)) = triplets
            .iter()
            .find(|(row, col, _)| *row >= num_rows || *col >= num_cols)
        {
            return Err(RandNLAError::InvalidDimensions(format!(
                "triplet ({}, {}) lies outside a {}x{} matrix",
                row, col, num_rows, num_cols
            )));
        }

        let mut sorted: Vec<_> = triplets.to_vec();
        sorted.sort_by_key(|(r, c, _)| (*r, *c));

        let mut values: Vec<T> = Vec::new();
        let mut col_indices: Vec<usize> = Vec::new();
        let mut row_ptrs = Vec::with_capacity(num_rows + 1);
        row_ptrs.push(0);

        let mut prev = None;
        let mut current_row = 0;

        for (row, col, val) in sorted {
            if prev == Some((row, col)) {
                if let Some(last) = values.last_mut() {
                    *last += val;
                }
                continue;
            }
            while current_row < row {
                row_ptrs.push(values.len());
                current_row += 1;
            }
            values.push(val);
            col_indices.push(col);
            prev = Some((row, col));
        }

        while row_ptrs.len() <= num_rows {
            row_ptrs.push(values.len());
        }

        Ok(Self::from_parts(values, col_indices, row_ptrs, num_cols))
    }

    pub fn num_rows(&self) -> usize {
        self.row_ptrs.len().saturating_sub(1)
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_iter(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let span = self.row_ptrs[row]..self.row_ptrs[row + 1];
        self.col_indices[span.clone()]
            .iter()
            .copied()
            .zip(self.values[span].iter().copied())
    }

    /// Stored entries of column `col` as `(row, value)`, rows ascending.
    pub fn col_iter(&self, col: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let span = self.col_ptrs[col]..self.col_ptrs[col + 1];
        self.col_rows[span.clone()]
            .iter()
            .copied()
            .zip(self.col_entries[span].iter().map(move |&idx| self.values[idx]))
    }

    /// Entry `(row, col)`, zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> T {
        let span = self.row_ptrs[row]..self.row_ptrs[row + 1];
        match self.col_indices[span.clone()].binary_search(&col) {
            Ok(offset) => self.values[span.start + offset],
            Err(_) => T::zero(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.num_rows(), self.num_cols);
        for i in 0..self.num_rows() {
            for (j, val) in self.row_iter(i) {
                dense[(i, j)] += val;
            }
        }
        dense
    }
}

impl<T: Element> Operand<T> for CsrMatrix<T> {
    fn shape(&self) -> (usize, usize) {
        (self.num_rows(), self.num_cols)
    }

    fn row_axpy(&self, row: usize, alpha: T, dst: &mut DMatrixViewMut<'_, T>, dst_row: usize) {
        for (j, val) in self.row_iter(row) {
            dst[(dst_row, j)] += alpha * val;
        }
    }

    fn col_axpy(&self, col: usize, alpha: T, dst: &mut DMatrixViewMut<'_, T>, dst_col: usize) {
        for (i, val) in self.col_iter(col) {
            dst[(i, dst_col)] += alpha * val;
        }
    }

    fn row_dot(&self, row: usize, x: &DVector<T>) -> T {
        self.row_iter(row).fold(T::zero(), |acc, (j, val)| acc + val * x[j])
    }

    fn row_norm_squared(&self, row: usize) -> T::RealField {
        let mut total = T::RealField::zero();
        for (_, val) in self.row_iter(row) {
            total += val.modulus_squared();
        }
        total
    }

    fn col_norm_squared(&self, col: usize) -> T::RealField {
        let mut total = T::RealField::zero();
        for (_, val) in self.col_iter(col) {
            total += val.modulus_squared();
        }
        total
    }

    fn mul_vec_add(&self, alpha: T, x: &DVector<T>, beta: T, y: &mut DVector<T>) {
        for i in 0..self.num_rows() {
            let ax = self.row_dot(i, x);
            y[i] = if beta.is_zero() {
                alpha * ax
            } else {
                alpha * ax + beta * y[i]
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Target;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    fn sample() -> CsrMatrix<f64> {
        CsrMatrix::from_triplets(
            3,
            4,
            &[(0, 1, 2.0), (2, 3, -1.0), (0, 0, 1.0), (2, 3, 4.0), (1, 2, 5.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_from_triplets_sums_duplicates() {
        let m = sample();
        assert_eq!(m.nnz(), 4);
        assert_eq!(m.get(2, 3), 3.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(
            m.to_dense(),
            dmatrix![1.0, 2.0, 0.0, 0.0; 0.0, 0.0, 5.0, 0.0; 0.0, 0.0, 0.0, 3.0]
        );
    }

    #[test]
    fn test_out_of_range_triplet_is_rejected() {
        let err = CsrMatrix::from_triplets(2, 2, &[(2, 0, 1.0)]).unwrap_err();
        assert!(err.is_dimension_error());
    }

    #[test]
    fn test_matches_dense_operand() {
        let sparse = sample();
        let dense = sparse.to_dense();
        let x = dvector![1.0, -1.0, 2.0, 0.5];

        let mut ys = DVector::zeros(3);
        let mut yd = DVector::zeros(3);
        Operand::mul_vec_add(&sparse, 2.0, &x, 0.0, &mut ys);
        Operand::mul_vec_add(&dense, 2.0, &x, 0.0, &mut yd);
        assert_eq!(ys, yd);

        for j in 0..4 {
            assert_relative_eq!(sparse.col_norm_squared(j), dense.col_norm_squared(j));
        }

        let mut cs = DMatrix::zeros(3, 2);
        let mut cd = DMatrix::zeros(3, 2);
        sparse.col_axpy(3, 1.5, &mut cs.target_mut(), 1);
        dense.col_axpy(3, 1.5, &mut cd.target_mut(), 1);
        assert_eq!(cs, cd);
    }

    #[test]
    fn test_column_index_matches_dense_columns() {
        let summed = sample();
        let dense = dmatrix![0.0, 1.0, 0.0; 2.0, 0.0, 0.0; 0.0, 3.0, 4.0; 5.0, 0.0, 0.0];
        for m in [summed, CsrMatrix::from_dense(&dense)] {
            let expected = m.to_dense();
            for j in 0..m.num_cols() {
                let stored: Vec<(usize, f64)> = m.col_iter(j).collect();
                let nonzeros: Vec<(usize, f64)> = (0..m.num_rows())
                    .filter(|&i| expected[(i, j)] != 0.0)
                    .map(|i| (i, expected[(i, j)]))
                    .collect();
                assert_eq!(stored, nonzeros);
            }
        }
        assert_eq!(CsrMatrix::<f64>::new(2, 3).col_iter(2).count(), 0);
    }

    #[test]
    fn test_from_dense_round_trip() {
        let dense = dmatrix![0.0, 1.0; 2.0, 0.0; 0.0, 0.0];
        let sparse = CsrMatrix::from_dense(&dense);
        assert_eq!(sparse.nnz(), 2);
        assert_eq!(sparse.to_dense(), dense);
    }
}
