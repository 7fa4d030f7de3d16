//! Direct solvers for the small compressed systems of the block iterations.
//!
//! Both recipes keep a packed Householder factorization (reflector vectors
//! below the diagonal, `R` on and above it, scalar factors in `tau`) in
//! buffers sized once at `complete`. `update` refactors in place.

use nalgebra::{ComplexField, DMatrix, DVector};
use num_traits::Zero;

use crate::errors::{ensure_eq, RandNLAError, Result};
use crate::operand::Element;

pub trait SubSolverConfig<T: Element> {
    type Recipe: SubSolver<T>;

    /// Sizes the buffers for `block` and factors it.
    fn complete(&self, block: &DMatrix<T>) -> Result<Self::Recipe>;
}

pub trait SubSolver<T: Element> {
    /// Refactors a new block of the bound shape.
    fn update(&mut self, block: &DMatrix<T>) -> Result<()>;

    /// Writes the minimum-norm least-squares solution of `block · x = b`.
    fn solve(&mut self, b: &DVector<T>, x: &mut DVector<T>) -> Result<()>;

    /// Shape of the bound block.
    fn shape(&self) -> (usize, usize);
}

/// Packed QR of a tall or square matrix. `Q = H_0 H_1 ... H_{n-1}` with
/// `H_k = I - tau_k v_k v_kᴴ` and `v_k[k] = 1`.
#[derive(Debug, Clone, PartialEq)]
struct Householder<T> {
    qr: DMatrix<T>,
    tau: Vec<T>,
}

impl<T: Element> Householder<T> {
    fn zeros(m: usize, n: usize) -> Self {
        Self {
            qr: DMatrix::zeros(m, n),
            tau: vec![T::zero(); n],
        }
    }

    /// Factors the matrix currently stored in `qr`.
    fn factor(&mut self) {
        let (m, n) = self.qr.shape();
        for k in 0..n {
            let alpha = self.qr[(k, k)];
            let mut x_norm_sq = T::RealField::zero();
            for i in (k + 1)..m {
                x_norm_sq += self.qr[(i, k)].modulus_squared();
            }

            if x_norm_sq.is_zero() && alpha.imaginary().is_zero() {
                self.tau[k] = T::zero();
                continue;
            }

            let norm = (alpha.modulus_squared() + x_norm_sq).sqrt();
            let beta = if alpha.real() >= T::RealField::zero() { -norm } else { norm };
            let beta_t = T::from_real(beta.clone());
            let tau = (beta_t - alpha) / beta_t;
            let inv = T::one() / (alpha - beta_t);
            for i in (k + 1)..m {
                self.qr[(i, k)] *= inv;
            }
            self.qr[(k, k)] = beta_t;
            self.tau[k] = tau;

            // Apply H_kᴴ to the trailing columns.
            let tau_conj = tau.conjugate();
            for j in (k + 1)..n {
                let mut w = self.qr[(k, j)];
                for i in (k + 1)..m {
                    w += self.qr[(i, k)].conjugate() * self.qr[(i, j)];
                }
                let w = tau_conj * w;
                self.qr[(k, j)] -= w;
                for i in (k + 1)..m {
                    let v = self.qr[(i, k)];
                    self.qr[(i, j)] -= w * v;
                }
            }
        }
    }

    /// `y ← Qᴴ y`
    fn apply_qh(&self, y: &mut DVector<T>) {
        let (m, n) = self.qr.shape();
        for k in 0..n {
            self.reflect(k, self.tau[k].conjugate(), m, y);
        }
    }

    /// `y ← Q y`
    fn apply_q(&self, y: &mut DVector<T>) {
        let (m, n) = self.qr.shape();
        for k in (0..n).rev() {
            self.reflect(k, self.tau[k], m, y);
        }
    }

    fn reflect(&self, k: usize, tau: T, m: usize, y: &mut DVector<T>) {
        if tau.is_zero() {
            return;
        }
        let mut w = y[k];
        for i in (k + 1)..m {
            w += self.qr[(i, k)].conjugate() * y[i];
        }
        let w = tau * w;
        y[k] -= w;
        for i in (k + 1)..m {
            y[i] -= w * self.qr[(i, k)];
        }
    }

    /// `x[..n] ← R⁻¹ y[..n]`, a zero pivot yields a zero component.
    fn back_substitute(&self, y: &DVector<T>, x: &mut DVector<T>) {
        let n = self.qr.ncols();
        for i in (0..n).rev() {
            let mut acc = y[i];
            for j in (i + 1)..n {
                acc -= self.qr[(i, j)] * x[j];
            }
            let pivot = self.qr[(i, i)];
            x[i] = if pivot.is_zero() { T::zero() } else { acc / pivot };
        }
    }

    /// `y[..n] ← R⁻ᴴ b[..n]`, a zero pivot yields a zero component.
    fn forward_substitute_adjoint(&self, b: &DVector<T>, y: &mut DVector<T>) {
        let n = self.qr.ncols();
        for i in 0..n {
            let mut acc = b[i];
            for j in 0..i {
                acc -= self.qr[(j, i)].conjugate() * y[j];
            }
            let pivot = self.qr[(i, i)].conjugate();
            y[i] = if pivot.is_zero() { T::zero() } else { acc / pivot };
        }
    }
}

/// Least-squares solver for tall or square blocks: `x = R⁻¹ Qᴴ b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QRSolver;

#[derive(Debug, Clone, PartialEq)]
pub struct QRSolverRecipe<T> {
    factors: Householder<T>,
    work: DVector<T>,
}

impl<T: Element> SubSolverConfig<T> for QRSolver {
    type Recipe = QRSolverRecipe<T>;

    fn complete(&self, block: &DMatrix<T>) -> Result<QRSolverRecipe<T>> {
        let (m, n) = block.shape();
        if m < n {
            return Err(RandNLAError::InvalidDimensions(format!(
                "QR sub-solver needs a tall or square block, found {}x{}",
                m, n
            )));
        }
        let mut recipe = QRSolverRecipe {
            factors: Householder::zeros(m, n),
            work: DVector::zeros(m),
        };
        recipe.update(block)?;
        Ok(recipe)
    }
}

impl<T: Element> SubSolver<T> for QRSolverRecipe<T> {
    fn update(&mut self, block: &DMatrix<T>) -> Result<()> {
        let (m, n) = self.factors.qr.shape();
        ensure_eq("QR sub-solver update", "bound rows", m, "block rows", block.nrows())?;
        ensure_eq("QR sub-solver update", "bound columns", n, "block columns", block.ncols())?;
        self.factors.qr.copy_from(block);
        self.factors.factor();
        Ok(())
    }

    fn solve(&mut self, b: &DVector<T>, x: &mut DVector<T>) -> Result<()> {
        let (m, n) = self.factors.qr.shape();
        ensure_eq("QR sub-solve", "block rows", m, "right-hand side length", b.len())?;
        ensure_eq("QR sub-solve", "block columns", n, "solution length", x.len())?;
        self.work.copy_from(b);
        self.factors.apply_qh(&mut self.work);
        self.factors.back_substitute(&self.work, x);
        Ok(())
    }

    fn shape(&self) -> (usize, usize) {
        self.factors.qr.shape()
    }
}

/// Minimum-norm solver for wide or square blocks. Factors `Aᴴ = QR`, so
/// `A = Rᴴ Qᴴ` and `x = Q [R⁻ᴴ b; 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LQSolver;

#[derive(Debug, Clone, PartialEq)]
pub struct LQSolverRecipe<T> {
    factors: Householder<T>,
    work: DVector<T>,
}

impl<T: Element> SubSolverConfig<T> for LQSolver {
    type Recipe = LQSolverRecipe<T>;

    fn complete(&self, block: &DMatrix<T>) -> Result<LQSolverRecipe<T>> {
        let (k, n) = block.shape();
        if k > n {
            return Err(RandNLAError::InvalidDimensions(format!(
                "LQ sub-solver needs a wide or square block, found {}x{}",
                k, n
            )));
        }
        let mut recipe = LQSolverRecipe {
            factors: Householder::zeros(n, k),
            work: DVector::zeros(n),
        };
        recipe.update(block)?;
        Ok(recipe)
    }
}

impl<T: Element> SubSolver<T> for LQSolverRecipe<T> {
    fn update(&mut self, block: &DMatrix<T>) -> Result<()> {
        let (n, k) = self.factors.qr.shape();
        ensure_eq("LQ sub-solver update", "bound rows", k, "block rows", block.nrows())?;
        ensure_eq("LQ sub-solver update", "bound columns", n, "block columns", block.ncols())?;
        for i in 0..k {
            for j in 0..n {
                self.factors.qr[(j, i)] = block[(i, j)].conjugate();
            }
        }
        self.factors.factor();
        Ok(())
    }

    fn solve(&mut self, b: &DVector<T>, x: &mut DVector<T>) -> Result<()> {
        let (n, k) = self.factors.qr.shape();
        ensure_eq("LQ sub-solve", "block rows", k, "right-hand side length", b.len())?;
        ensure_eq("LQ sub-solve", "block columns", n, "solution length", x.len())?;
        self.work.fill(T::zero());
        self.factors.forward_substitute_adjoint(b, &mut self.work);
        self.factors.apply_q(&mut self.work);
        x.copy_from(&self.work);
        Ok(())
    }

    fn shape(&self) -> (usize, usize) {
        let (n, k) = self.factors.qr.shape();
        (k, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_assist::{check_approx_equal, check_approx_equal_complex, generate_random_complex_matrix, generate_random_matrix};
    use nalgebra::{dmatrix, dvector, Complex};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn as_matrix<T: Element>(v: &DVector<T>) -> DMatrix<T> {
        DMatrix::from_column_slice(v.len(), 1, v.as_slice())
    }

    #[test]
    fn test_qr_matches_pseudo_inverse() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let a = generate_random_matrix(9, 4, &mut rng);
        let b = DVector::from_column_slice(generate_random_matrix(9, 1, &mut rng).as_slice());
        let mut recipe = QRSolver.complete(&a).unwrap();
        let mut x = DVector::zeros(4);
        recipe.solve(&b, &mut x).unwrap();

        let expected = a.clone().pseudo_inverse(1e-12).unwrap() * &b;
        assert!(check_approx_equal(&as_matrix(&x), &as_matrix(&expected), 1e-10));
    }

    #[test]
    fn test_lq_gives_minimum_norm_solution() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let a = generate_random_matrix(3, 8, &mut rng);
        let b = dvector![1.0, -2.0, 0.5];
        let mut recipe = LQSolver.complete(&a).unwrap();
        assert_eq!(recipe.shape(), (3, 8));
        let mut x = DVector::zeros(8);
        recipe.solve(&b, &mut x).unwrap();

        assert!(check_approx_equal(&as_matrix(&(&a * &x)), &as_matrix(&b), 1e-10));
        let expected = a.clone().pseudo_inverse(1e-12).unwrap() * &b;
        assert!(check_approx_equal(&as_matrix(&x), &as_matrix(&expected), 1e-10));
    }

    #[test]
    fn test_complex_blocks() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let tall = generate_random_complex_matrix(7, 3, &mut rng);
        let b = DVector::from_column_slice(generate_random_complex_matrix(7, 1, &mut rng).as_slice());
        let mut x = DVector::zeros(3);
        QRSolver.complete(&tall).unwrap().solve(&b, &mut x).unwrap();
        let expected = tall.clone().pseudo_inverse(1e-12).unwrap() * &b;
        assert!(check_approx_equal_complex(&as_matrix(&x), &as_matrix(&expected), 1e-10));

        let wide = tall.adjoint();
        let b = DVector::from_column_slice(generate_random_complex_matrix(3, 1, &mut rng).as_slice());
        let mut x = DVector::zeros(7);
        LQSolver.complete(&wide).unwrap().solve(&b, &mut x).unwrap();
        let expected = wide.clone().pseudo_inverse(1e-12).unwrap() * &b;
        assert!(check_approx_equal_complex(&as_matrix(&x), &as_matrix(&expected), 1e-10));
    }

    #[test]
    fn test_update_refactors_in_place() {
        let a = dmatrix![2.0, 0.0; 0.0, 4.0; 0.0, 0.0];
        let mut recipe = QRSolver.complete(&a).unwrap();
        let b = dvector![2.0, 4.0, 1.0];
        let mut x = DVector::zeros(2);
        recipe.solve(&b, &mut x).unwrap();
        assert!(check_approx_equal(&as_matrix(&x), &dmatrix![1.0; 1.0], 1e-12));

        recipe.update(&(a * 2.0)).unwrap();
        recipe.solve(&b, &mut x).unwrap();
        assert!(check_approx_equal(&as_matrix(&x), &dmatrix![0.5; 0.5], 1e-12));

        assert!(recipe.update(&DMatrix::zeros(2, 2)).unwrap_err().is_dimension_error());
    }

    #[test]
    fn test_zero_pivot_gives_zero_component() {
        let a = dmatrix![1.0, 0.0; 0.0, 0.0; 1.0, 0.0];
        let mut recipe = QRSolver.complete(&a).unwrap();
        let mut x = dvector![7.0, 7.0];
        recipe.solve(&dvector![1.0, 5.0, 1.0], &mut x).unwrap();
        assert!(check_approx_equal(&as_matrix(&x), &dmatrix![1.0; 0.0], 1e-12));
    }

    #[test]
    fn test_wrong_aspect_ratio_is_rejected() {
        assert!(QRSolver.complete(&DMatrix::<f64>::zeros(2, 3)).is_err());
        assert!(LQSolver.complete(&DMatrix::<f64>::zeros(3, 2)).is_err());
    }

    #[test]
    fn test_solve_checks_lengths() {
        let mut recipe = LQSolver.complete(&DMatrix::<f64>::identity(2, 4)).unwrap();
        let mut x = DVector::zeros(4);
        let err = recipe.solve(&dvector![1.0, 2.0, 3.0], &mut x).unwrap_err();
        assert!(matches!(err, RandNLAError::DimensionMismatch { left: 2, right: 3, .. }));
        let mut short = DVector::zeros(3);
        assert!(recipe.solve(&dvector![1.0, 2.0], &mut short).is_err());
    }

    #[test]
    fn test_complex_reflector_with_imaginary_pivot() {
        let a = DMatrix::from_row_slice(2, 1, &[Complex::new(0.0, 3.0), Complex::new(0.0, 0.0)]);
        let mut recipe = QRSolver.complete(&a).unwrap();
        let b = DVector::from_vec(vec![Complex::new(6.0, 0.0), Complex::new(0.0, 0.0)]);
        let mut x = DVector::zeros(1);
        recipe.solve(&b, &mut x).unwrap();
        assert!((x[0] - Complex::new(0.0, -2.0)).norm() < 1e-12);
    }
}
