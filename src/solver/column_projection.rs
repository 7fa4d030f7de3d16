//! Column projection: sketches the column space, `M = A S`, and moves the
//! iterate within `range(S)` to minimize the residual, keeping `r = b − A x`
//! up to date.

use nalgebra::{DMatrix, DVector};
use num_traits::Zero;
use rand::Rng;

use super::{check_system, complete_on_side, Progress, SolverConfig, SolverRecipe, SolverState};
use crate::compressor::{Cardinality, Compressor, CompressorConfig, SparseSign};
use crate::errors::Result;
use crate::logger::{BasicLogger, Logger, LoggerConfig};
use crate::operand::{from_f64, Element, Operand};
use crate::solver_error::{FullResidual, Snapshot, SolverError, SolverErrorConfig};
use crate::sub_solver::{QRSolver, SubSolver, SubSolverConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProjection<C = SparseSign, L = BasicLogger, E = FullResidual, S = QRSolver> {
    pub alpha: f64,
    pub compressor: C,
    pub log: L,
    pub error: E,
    pub sub_solver: S,
}

impl Default for ColumnProjection {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            compressor: SparseSign {
                cardinality: Cardinality::Right,
                ..SparseSign::default()
            },
            log: BasicLogger::default(),
            error: FullResidual,
            sub_solver: QRSolver,
        }
    }
}

impl<C, L, E, S> ColumnProjection<C, L, E, S> {
    pub fn new(compressor: C, log: L, error: E, sub_solver: S) -> Self {
        Self {
            alpha: 1.0,
            compressor,
            log,
            error,
            sub_solver,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnProjectionRecipe<T: Element, C, L, E, S> {
    alpha: T,
    compressor: C,
    log: L,
    error: E,
    sub_solver: S,
    compressed_mat: DMatrix<T>,
    /// `Mᴴ r` for the iterate entering the latest step.
    compressed_vec: DVector<T>,
    residual: DVector<T>,
    update_vec: DVector<T>,
    progress: Progress,
}

impl<T: Element, C, L, E, S> ColumnProjectionRecipe<T, C, L, E, S> {
    pub fn compressor(&self) -> &C {
        &self.compressor
    }

    pub fn error(&self) -> &E {
        &self.error
    }

    /// `A S` from the latest step.
    pub fn compressed_mat(&self) -> &DMatrix<T> {
        &self.compressed_mat
    }

    /// Tracked residual `b − A x`.
    pub fn residual(&self) -> &DVector<T> {
        &self.residual
    }
}

impl<T, C, L, E, S> SolverConfig<T> for ColumnProjection<C, L, E, S>
where
    T: Element,
    C: CompressorConfig<T>,
    L: LoggerConfig,
    E: SolverErrorConfig<T>,
    S: SubSolverConfig<T>,
{
    type Recipe = ColumnProjectionRecipe<T, C::Recipe, L::Recipe, E::Recipe, S::Recipe>;

    fn complete<O, R>(&self, x: &DVector<T>, a: &O, b: &DVector<T>, rng: &mut R) -> Result<Self::Recipe>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        check_system("ColumnProjection", x, a, b)?;
        let compressor = complete_on_side("ColumnProjection", Cardinality::Right, &self.compressor, a, rng)?;
        let (m, k) = (a.nrows(), compressor.compression_dim());
        let compressed_mat = DMatrix::zeros(m, k);
        let sub_solver = self.sub_solver.complete(&compressed_mat)?;
        let mut residual = b.clone();
        a.mul_vec_add(-T::one(), x, T::one(), &mut residual);
        Ok(ColumnProjectionRecipe {
            alpha: from_f64(self.alpha),
            compressor,
            log: self.log.complete()?,
            error: self.error.complete(a.shape(), k)?,
            sub_solver,
            compressed_mat,
            compressed_vec: DVector::zeros(k),
            residual,
            update_vec: DVector::zeros(k),
            progress: Progress::new(),
        })
    }
}

impl<T, C, L, E, S> ColumnProjectionRecipe<T, C, L, E, S>
where
    T: Element,
    C: Compressor<T>,
    L: Logger,
    E: SolverError<T>,
    S: SubSolver<T>,
{
    /// Step coefficient along the single sketched column,
    /// `α ⟨col, r⟩ / ‖col‖²`. Zero for a zero column.
    fn single_column_coefficient(&self) -> T {
        let col = self.compressed_mat.column(0);
        let norm_sq = col.norm_squared();
        if norm_sq.is_zero() {
            return T::zero();
        }
        self.alpha * self.compressed_vec[0] / T::from_real(norm_sq)
    }

    fn record<O: Operand<T> + ?Sized>(&mut self, x: &DVector<T>, a: &O, b: &DVector<T>) -> Result<()> {
        let metric = self.error.compute(&Snapshot {
            a,
            b,
            x,
            compressed_mat: &self.compressed_mat,
            compressed_vec: &self.compressed_vec,
            cardinality: Cardinality::Right,
        })?;
        self.progress.record(&mut self.log, metric);
        Ok(())
    }
}

impl<T, C, L, E, S> SolverRecipe<T> for ColumnProjectionRecipe<T, C, L, E, S>
where
    T: Element,
    C: Compressor<T>,
    L: Logger,
    E: SolverError<T>,
    S: SubSolver<T>,
{
    type Log = L;

    fn log(&self) -> &L {
        &self.log
    }

    fn state(&self) -> SolverState {
        self.progress.state
    }

    fn iteration(&self) -> usize {
        self.progress.iteration
    }

    fn step<O, R>(&mut self, x: &mut DVector<T>, a: &O, b: &DVector<T>, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        if self.progress.state != SolverState::Initialized {
            self.compressor.update(a, rng)?;
        }
        self.compressor.rmul_into(a, &mut self.compressed_mat)?;
        self.compressed_vec.gemv_ad(T::one(), &self.compressed_mat, &self.residual, T::zero());

        self.record(x, a, b)?;
        if self.progress.state != SolverState::Iterating {
            return Ok(());
        }

        if self.compressed_mat.ncols() == 1 {
            self.update_vec[0] = self.single_column_coefficient();
        } else {
            self.sub_solver.update(&self.compressed_mat)?;
            self.sub_solver.solve(&self.residual, &mut self.update_vec)?;
            self.update_vec *= self.alpha;
        }

        // x += S Δ, r -= A S Δ
        self.compressor.mul_add(T::one(), &self.update_vec, T::one(), x)?;
        self.residual.gemv(-T::one(), &self.compressed_mat, &self.update_vec, T::one());
        self.progress.iteration += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::{CountSketch, Gaussian, Sampling, Srht};
    use crate::distribution::Uniform;
    use crate::solver::solve_with_rng;
    use crate::solver_error::CompressedResidual;
    use crate::test_assist::{generate_consistent_system, generate_random_complex_matrix, generate_random_matrix, generate_random_vector};
    use nalgebra::Complex;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_noisy_system_reaches_noise_floor() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let a = generate_random_matrix(300, 20, &mut rng);
        let x_true = generate_random_vector(20, &mut rng);
        let noise = generate_random_vector(300, &mut rng) * 0.1;
        let b = &a * &x_true + &noise;

        let config = ColumnProjection {
            log: BasicLogger { max_it: 400, ..Default::default() },
            ..Default::default()
        };
        let mut x = DVector::zeros(20);
        let recipe = solve_with_rng(&config, &mut x, &a, &b, &mut rng).unwrap();

        let x_ls = a.clone().pseudo_inverse(1e-12).unwrap() * &b;
        let floor = (&a * &x_ls - &b).norm();
        let residual = (&a * &x - &b).norm();
        assert!(residual < 1.01 * floor, "residual {} vs floor {}", residual, floor);
        assert!((recipe.residual() - (&b - &a * &x)).norm() < 1e-8);
        assert_eq!(recipe.state(), SolverState::MaxIterReached);
    }

    #[test]
    fn test_single_column_steps_are_monotone() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let (a, x_true, b) = generate_consistent_system(40, 6, &mut rng);
        let config = ColumnProjection::new(
            Sampling { cardinality: Cardinality::Right, compression_dim: 1, distribution: Uniform { replace: true } },
            BasicLogger { max_it: 3000, threshold: 1e-9, collection_rate: 1 },
            FullResidual,
            QRSolver,
        );
        let mut x = DVector::zeros(6);
        let recipe = solve_with_rng(&config, &mut x, &a, &b, &mut rng).unwrap();
        let history = recipe.log().history();
        assert!(history.windows(2).all(|w| w[1] <= w[0] + 1e-12));
        assert!(recipe.converged());
        assert!((x - x_true).norm() < 1e-8);
    }

    #[test]
    fn test_block_steps_with_hadamard_sketch() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let (a, x_true, b) = generate_consistent_system(50, 12, &mut rng);
        let config = ColumnProjection::new(
            Srht { cardinality: Cardinality::Right, compression_dim: 4 },
            BasicLogger { max_it: 1000, threshold: 1e-9, collection_rate: 1 },
            CompressedResidual,
            QRSolver,
        );
        let mut x = DVector::zeros(12);
        let recipe = solve_with_rng(&config, &mut x, &a, &b, &mut rng).unwrap();
        assert!(recipe.converged());
        assert!((x - x_true).norm() < 1e-6);
    }

    #[test]
    fn test_complex_system() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let a = generate_random_complex_matrix(40, 5, &mut rng);
        let x_true = generate_random_complex_matrix(5, 1, &mut rng);
        let b = DVector::from_column_slice((&a * &x_true).as_slice());
        let config = ColumnProjection::new(
            Gaussian { cardinality: Cardinality::Right, compression_dim: 2 },
            BasicLogger { max_it: 2000, threshold: 1e-9, collection_rate: 5 },
            FullResidual,
            QRSolver,
        );
        let mut x = DVector::from_element(5, Complex::new(0.0, 0.0));
        let recipe = solve_with_rng(&config, &mut x, &a, &b, &mut rng).unwrap();
        assert!(recipe.converged());
        for (xi, ti) in x.iter().zip(x_true.iter()) {
            assert!((xi - ti).norm() < 1e-6);
        }
    }

    #[test]
    fn test_left_configured_compressor_is_rebound() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let (a, _, b) = generate_consistent_system(30, 7, &mut rng);
        let config = ColumnProjection::new(
            CountSketch { cardinality: Cardinality::Left, compression_dim: 3 },
            BasicLogger { max_it: 10, ..Default::default() },
            FullResidual,
            QRSolver,
        );
        let x = DVector::zeros(7);
        let recipe: ColumnProjectionRecipe<f64, _, _, _, _> = config.complete(&x, &a, &b, &mut rng).unwrap();
        assert_eq!(recipe.compressor().cardinality(), Cardinality::Right);
        assert_eq!(recipe.compressor().shape(), (7, 3));
        assert_eq!(recipe.compressed_mat().shape(), (30, 3));
    }
}
