//! Dimension-reducing operators ("compressors").
//!
//! A compressor config is bound to a source matrix by
//! [`CompressorConfig::complete`], producing a recipe that owns every buffer
//! the operator needs. [`Compressor::update`] redraws the randomness in place.
//!
//! A Left recipe has shape `compression_dim × source_rows` and acts on the
//! row space (`S·A`); a Right recipe has shape `source_cols × compression_dim`
//! and acts on the column space (`A·S`). All multiplies check every extent
//! before writing anything.

use nalgebra::{DMatrix, DMatrixViewMut};
use rand::Rng;

use crate::errors::{ensure_eq, RandNLAError, Result};
use crate::operand::{scale_view, Element, Operand, Target};

pub mod count_sketch;
pub mod gaussian;
pub mod sampling;
pub mod sparse_sign;
pub mod srht;

pub use count_sketch::{CountSketch, CountSketchRecipe};
pub use gaussian::{Gaussian, GaussianRecipe};
pub use sampling::{Sampling, SamplingRecipe};
pub use sparse_sign::{SparseSign, SparseSignRecipe};
pub use srht::{Fjlt, FjltRecipe, Srht, SrhtRecipe};

/// Side of the source matrix an operator acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// Rows: the operator multiplies the source from the left.
    Left,
    /// Columns: the operator multiplies the source from the right.
    Right,
    #[default]
    Undef,
}

/// Length of the source dimension a `cardinality` acts on.
pub(crate) fn source_dim(
    cardinality: Cardinality,
    source_shape: (usize, usize),
    what: &'static str,
) -> Result<usize> {
    match cardinality {
        Cardinality::Left => Ok(source_shape.0),
        Cardinality::Right => Ok(source_shape.1),
        Cardinality::Undef => Err(RandNLAError::UndefinedCardinality(what)),
    }
}

/// Validates the fields every compressor config shares and returns the shape
/// of the bound operator.
pub(crate) fn bound_shape(
    cardinality: Cardinality,
    compression_dim: usize,
    source_shape: (usize, usize),
    what: &'static str,
) -> Result<(usize, usize)> {
    if compression_dim == 0 {
        return Err(RandNLAError::invalid_argument(
            "compression_dim",
            format!("{} needs a positive compression dimension", what),
        ));
    }
    let n = source_dim(cardinality, source_shape, what)?;
    match cardinality {
        Cardinality::Left => Ok((compression_dim, n)),
        _ => Ok((n, compression_dim)),
    }
}

/// Fails unless `source_shape` matches the source a recipe was bound to.
pub(crate) fn check_bound_source(
    cardinality: Cardinality,
    shape: (usize, usize),
    source_shape: (usize, usize),
    what: &'static str,
) -> Result<()> {
    let bound = match cardinality {
        Cardinality::Left => shape.1,
        _ => shape.0,
    };
    let found = source_dim(cardinality, source_shape, what)?;
    ensure_eq(what, "bound source dimension", bound, "source dimension", found)
}

/// Whether a multiply uses the operator itself or its adjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Plain,
    Adjoint,
}

impl Role {
    fn orient(self, shape: (usize, usize)) -> (usize, usize) {
        match self {
            Role::Plain => shape,
            Role::Adjoint => (shape.1, shape.0),
        }
    }
}

pub trait CompressorConfig<T: Element> {
    type Recipe: Compressor<T>;

    fn cardinality(&self) -> Cardinality;

    fn compression_dim(&self) -> usize;

    /// Binds the config to `source` on an explicit side.
    fn complete_for<O, R>(
        &self,
        cardinality: Cardinality,
        source: &O,
        rng: &mut R,
    ) -> Result<Self::Recipe>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized;

    /// Binds the config to `source` on its configured side.
    fn complete<O, R>(&self, source: &O, rng: &mut R) -> Result<Self::Recipe>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        self.complete_for(self.cardinality(), source, rng)
    }
}

pub trait Compressor<T: Element> {
    fn cardinality(&self) -> Cardinality;

    fn compression_dim(&self) -> usize;

    /// `(n_rows, n_cols)` of the bound operator.
    fn shape(&self) -> (usize, usize);

    /// Extent along dimension 1 (rows) or 2 (columns).
    fn size(&self, dim: usize) -> Result<usize> {
        match dim {
            1 => Ok(self.shape().0),
            2 => Ok(self.shape().1),
            _ => Err(RandNLAError::InvalidSizeIndex(dim)),
        }
    }

    /// Redraws the operator in place. The shape never changes.
    fn update<O, R>(&mut self, source: &O, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized;

    /// Visits every stored entry `(row, col, value)` of the operator.
    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, f: F);

    /// `c += alpha * op(S) * b`, extents already checked.
    fn apply_left<O: Operand<T> + ?Sized>(
        &self,
        role: Role,
        alpha: T,
        b: &O,
        c: &mut DMatrixViewMut<'_, T>,
    ) {
        match role {
            Role::Plain => self.for_each_entry(|i, j, v| b.row_axpy(j, alpha * v, c, i)),
            Role::Adjoint => {
                self.for_each_entry(|i, j, v| b.row_axpy(i, alpha * v.conjugate(), c, j))
            }
        }
    }

    /// `c += alpha * b * op(S)`, extents already checked.
    fn apply_right<O: Operand<T> + ?Sized>(
        &self,
        role: Role,
        alpha: T,
        b: &O,
        c: &mut DMatrixViewMut<'_, T>,
    ) {
        match role {
            Role::Plain => self.for_each_entry(|i, j, v| b.col_axpy(i, alpha * v, c, j)),
            Role::Adjoint => {
                self.for_each_entry(|i, j, v| b.col_axpy(j, alpha * v.conjugate(), c, i))
            }
        }
    }

    /// `C ← alpha·(S·B) + beta·C`
    fn mul_add<O, C>(&self, alpha: T, b: &O, beta: T, c: &mut C) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        left_product(self, Role::Plain, alpha, b, beta, c)
    }

    /// `C ← alpha·(B·S) + beta·C`
    fn rmul_add<O, C>(&self, alpha: T, b: &O, beta: T, c: &mut C) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        right_product(self, Role::Plain, alpha, b, beta, c)
    }

    /// `C ← S·B`
    fn mul_into<O, C>(&self, b: &O, c: &mut C) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        self.mul_add(T::one(), b, T::zero(), c)
    }

    /// `C ← B·S`
    fn rmul_into<O, C>(&self, b: &O, c: &mut C) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        self.rmul_add(T::one(), b, T::zero(), c)
    }

    /// Zero-copy adjoint view.
    fn adjoint(&self) -> Adjoint<'_, Self>
    where
        Self: Sized,
    {
        Adjoint { parent: self }
    }

    /// Materializes the operator. Allocates; meant for inspection and tests.
    fn to_dense(&self) -> DMatrix<T> {
        let (rows, cols) = self.shape();
        let mut dense = DMatrix::zeros(rows, cols);
        self.for_each_entry(|i, j, v| dense[(i, j)] += v);
        dense
    }
}

/// Adjoint of a bound compressor: a borrowed recipe plus the role flag.
#[derive(Debug)]
pub struct Adjoint<'a, S> {
    parent: &'a S,
}

impl<'a, S> Clone for Adjoint<'a, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, S> Copy for Adjoint<'a, S> {}

impl<'a, S> Adjoint<'a, S> {
    /// The adjoint of the adjoint is the original recipe.
    pub fn adjoint(self) -> &'a S {
        self.parent
    }

    pub fn shape<T: Element>(&self) -> (usize, usize)
    where
        S: Compressor<T>,
    {
        Role::Adjoint.orient(self.parent.shape())
    }

    /// `C ← alpha·(Sᴴ·B) + beta·C`
    pub fn mul_add<T, O, C>(&self, alpha: T, b: &O, beta: T, c: &mut C) -> Result<()>
    where
        T: Element,
        S: Compressor<T>,
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        left_product(self.parent, Role::Adjoint, alpha, b, beta, c)
    }

    /// `C ← alpha·(B·Sᴴ) + beta·C`
    pub fn rmul_add<T, O, C>(&self, alpha: T, b: &O, beta: T, c: &mut C) -> Result<()>
    where
        T: Element,
        S: Compressor<T>,
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        right_product(self.parent, Role::Adjoint, alpha, b, beta, c)
    }

    pub fn mul_into<T, O, C>(&self, b: &O, c: &mut C) -> Result<()>
    where
        T: Element,
        S: Compressor<T>,
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        self.mul_add(T::one(), b, T::zero(), c)
    }

    pub fn rmul_into<T, O, C>(&self, b: &O, c: &mut C) -> Result<()>
    where
        T: Element,
        S: Compressor<T>,
        O: Operand<T> + ?Sized,
        C: Target<T> + ?Sized,
    {
        self.rmul_add(T::one(), b, T::zero(), c)
    }
}

fn left_product<T, S, O, C>(
    op: &S,
    role: Role,
    alpha: T,
    b: &O,
    beta: T,
    c: &mut C,
) -> Result<()>
where
    T: Element,
    S: Compressor<T> + ?Sized,
    O: Operand<T> + ?Sized,
    C: Target<T> + ?Sized,
{
    let context = match role {
        Role::Plain => "compressor product S·B",
        Role::Adjoint => "compressor product Sᴴ·B",
    };
    let (rows, inner) = role.orient(op.shape());
    let (b_rows, b_cols) = b.shape();
    let mut view = c.target_mut();
    let (c_rows, c_cols) = view.shape();
    ensure_eq(context, "compressor columns", inner, "operand rows", b_rows)?;
    ensure_eq(context, "compressor rows", rows, "output rows", c_rows)?;
    ensure_eq(context, "operand columns", b_cols, "output columns", c_cols)?;
    scale_view(&mut view, beta);
    op.apply_left(role, alpha, b, &mut view);
    Ok(())
}

fn right_product<T, S, O, C>(
    op: &S,
    role: Role,
    alpha: T,
    b: &O,
    beta: T,
    c: &mut C,
) -> Result<()>
where
    T: Element,
    S: Compressor<T> + ?Sized,
    O: Operand<T> + ?Sized,
    C: Target<T> + ?Sized,
{
    let context = match role {
        Role::Plain => "compressor product B·S",
        Role::Adjoint => "compressor product B·Sᴴ",
    };
    let (inner, cols) = role.orient(op.shape());
    let (b_rows, b_cols) = b.shape();
    let mut view = c.target_mut();
    let (c_rows, c_cols) = view.shape();
    ensure_eq(context, "operand columns", b_cols, "compressor rows", inner)?;
    ensure_eq(context, "operand rows", b_rows, "output rows", c_rows)?;
    ensure_eq(context, "compressor columns", cols, "output columns", c_cols)?;
    scale_view(&mut view, beta);
    op.apply_right(role, alpha, b, &mut view);
    Ok(())
}

/// Partial Fisher–Yates: leaves `count` distinct uniformly chosen entries of
/// `perm` at its front. `perm` must hold a permutation and stays one.
pub(crate) fn shuffle_prefix<R: Rng + ?Sized>(perm: &mut [usize], count: usize, rng: &mut R) {
    let n = perm.len();
    for i in 0..count.min(n) {
        let j = rng.gen_range(i..n);
        perm.swap(i, j);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::test_assist::generate_random_matrix;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use rand_chacha::ChaCha8Rng;

    fn assert_close(a: &DMatrix<f64>, b: &DMatrix<f64>) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9, max_relative = 1e-9);
        }
    }

    /// Checks all four multiply orientations, fused and vector forms against
    /// the materialized operator.
    pub(crate) fn check_against_dense<S: Compressor<f64>>(s: &S, rng: &mut ChaCha8Rng) {
        let dense = s.to_dense();
        let (rows, cols) = s.shape();

        let b = generate_random_matrix(cols, 3, rng);
        let mut c = generate_random_matrix(rows, 3, rng);
        let expected = &dense * &b * 2.0 + &c * 0.5;
        s.mul_add(2.0, &b, 0.5, &mut c).unwrap();
        assert_close(&c, &expected);

        let b = generate_random_matrix(4, rows, rng);
        let mut c = DMatrix::zeros(4, cols);
        s.rmul_into(&b, &mut c).unwrap();
        assert_close(&c, &(&b * &dense));

        let b = generate_random_matrix(rows, 2, rng);
        let mut c = generate_random_matrix(cols, 2, rng);
        let expected = dense.transpose() * &b - &c;
        s.adjoint().mul_add(1.0, &b, -1.0, &mut c).unwrap();
        assert_close(&c, &expected);

        let b = generate_random_matrix(5, cols, rng);
        let mut c = DMatrix::zeros(5, rows);
        s.adjoint().rmul_into(&b, &mut c).unwrap();
        assert_close(&c, &(&b * dense.transpose()));

        let x = DVector::from_iterator(cols, generate_random_matrix(cols, 1, rng).iter().copied());
        let mut y = DVector::zeros(rows);
        s.mul_into(&x, &mut y).unwrap();
        let expected = &dense * &x;
        for (a, b) in y.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    /// Multiplying with mismatched extents must fail before touching the
    /// output.
    pub(crate) fn check_rejects_mismatch<S: Compressor<f64>>(s: &S) {
        let (rows, cols) = s.shape();
        let b = DMatrix::<f64>::zeros(cols + 1, 2);
        let mut c = DMatrix::from_element(rows, 2, 7.0);
        let err = s.mul_into(&b, &mut c).unwrap_err();
        assert!(matches!(
            err,
            RandNLAError::DimensionMismatch { left, right, .. } if left == cols && right == cols + 1
        ));
        assert!(c.iter().all(|v| *v == 7.0));

        let b = DMatrix::<f64>::zeros(2, rows);
        let mut c = DMatrix::zeros(3, cols);
        assert!(s.rmul_into(&b, &mut c).unwrap_err().is_dimension_error());

        let b = DMatrix::<f64>::zeros(rows, 2);
        let mut c = DMatrix::zeros(cols, 3);
        assert!(s.adjoint().mul_into(&b, &mut c).is_err());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_bound_shape_follows_cardinality() {
        assert_eq!(bound_shape(Cardinality::Left, 4, (100, 7), "t").unwrap(), (4, 100));
        assert_eq!(bound_shape(Cardinality::Right, 4, (100, 7), "t").unwrap(), (7, 4));
        assert!(matches!(
            bound_shape(Cardinality::Undef, 4, (100, 7), "t"),
            Err(RandNLAError::UndefinedCardinality(_))
        ));
        assert!(matches!(
            bound_shape(Cardinality::Left, 0, (100, 7), "t"),
            Err(RandNLAError::InvalidArgument { name: "compression_dim", .. })
        ));
    }

    #[test]
    fn test_check_bound_source() {
        assert!(check_bound_source(Cardinality::Left, (4, 100), (100, 3), "t").is_ok());
        assert!(check_bound_source(Cardinality::Left, (4, 100), (99, 3), "t").is_err());
        assert!(check_bound_source(Cardinality::Right, (3, 4), (100, 3), "t").is_ok());
    }

    #[test]
    fn test_shuffle_prefix_is_distinct() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut perm: Vec<usize> = (0..10).collect();
        for _ in 0..20 {
            shuffle_prefix(&mut perm, 4, &mut rng);
            let mut prefix = perm[..4].to_vec();
            prefix.sort_unstable();
            prefix.dedup();
            assert_eq!(prefix.len(), 4);
            let mut all = perm.clone();
            all.sort_unstable();
            assert_eq!(all, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_adjoint_of_adjoint_is_original() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let a = DMatrix::<f64>::zeros(20, 5);
        let s: GaussianRecipe<f64> = Gaussian {
            cardinality: Cardinality::Left,
            compression_dim: 3,
        }
        .complete(&a, &mut rng)
        .unwrap();
        let back: &GaussianRecipe<f64> = s.adjoint().adjoint();
        assert!(std::ptr::eq(back, &s));
        assert_eq!(back, &s);
        assert_eq!(s.adjoint().shape(), (20, 3));
    }

    #[test]
    fn test_size_rejects_out_of_range_index() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let a = DMatrix::<f64>::zeros(20, 5);
        let s: GaussianRecipe<f64> = Gaussian {
            cardinality: Cardinality::Right,
            compression_dim: 3,
        }
        .complete(&a, &mut rng)
        .unwrap();
        assert_eq!(s.size(1).unwrap(), 5);
        assert_eq!(s.size(2).unwrap(), 3);
        assert_eq!(s.size(3), Err(RandNLAError::InvalidSizeIndex(3)));
        assert_eq!(s.size(0), Err(RandNLAError::InvalidSizeIndex(0)));
    }
}
