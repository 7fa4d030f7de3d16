//! Block randomized Kaczmarz: projects the iterate onto the solution set of a
//! sketched row block `S A x = S b`.

use nalgebra::{DMatrix, DVector};
use num_traits::Zero;
use rand::Rng;

use super::{check_system, complete_on_side, Progress, SolverConfig, SolverRecipe, SolverState};
use crate::compressor::{Cardinality, Compressor, CompressorConfig, SparseSign};
use crate::errors::Result;
use crate::logger::{BasicLogger, Logger, LoggerConfig};
use crate::operand::{from_f64, Element, Operand};
use crate::solver_error::{FullResidual, Snapshot, SolverError, SolverErrorConfig};
use crate::sub_solver::{LQSolver, SubSolver, SubSolverConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct Kaczmarz<C = SparseSign, L = BasicLogger, E = FullResidual, S = LQSolver> {
    /// Step size.
    pub alpha: f64,
    pub compressor: C,
    pub log: L,
    pub error: E,
    pub sub_solver: S,
}

impl Default for Kaczmarz {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            compressor: SparseSign::default(),
            log: BasicLogger::default(),
            error: FullResidual,
            sub_solver: LQSolver,
        }
    }
}

impl<C, L, E, S> Kaczmarz<C, L, E, S> {
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
pub struct KaczmarzRecipe<T: Element, C, L, E, S> {
    alpha: T,
    compressor: C,
    log: L,
    error: E,
    sub_solver: S,
    compressed_mat: DMatrix<T>,
    compressed_vec: DVector<T>,
    residual_vec: DVector<T>,
    update_vec: DVector<T>,
    progress: Progress,
}

impl<T: Element, C, L, E, S> KaczmarzRecipe<T, C, L, E, S> {
    pub fn compressor(&self) -> &C {
        &self.compressor
    }

    pub fn error(&self) -> &E {
        &self.error
    }

    /// `S A` from the latest step.
    pub fn compressed_mat(&self) -> &DMatrix<T> {
        &self.compressed_mat
    }

    /// `S b` from the latest step.
    pub fn compressed_vec(&self) -> &DVector<T> {
        &self.compressed_vec
    }
}

impl<T, C, L, E, S> SolverConfig<T> for Kaczmarz<C, L, E, S>
where
    T: Element,
    C: CompressorConfig<T>,
    L: LoggerConfig,
    E: SolverErrorConfig<T>,
    S: SubSolverConfig<T>,
{
    type Recipe = KaczmarzRecipe<T, C::Recipe, L::Recipe, E::Recipe, S::Recipe>;

    fn complete<O, R>(&self, x: &DVector<T>, a: &O, b: &DVector<T>, rng: &mut R) -> Result<Self::Recipe>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        check_system("Kaczmarz", x, a, b)?;
        let compressor = complete_on_side("Kaczmarz", Cardinality::Left, &self.compressor, a, rng)?;
        let (k, n) = (compressor.compression_dim(), a.ncols());
        let compressed_mat = DMatrix::zeros(k, n);
        let sub_solver = self.sub_solver.complete(&compressed_mat)?;
        Ok(KaczmarzRecipe {
            alpha: from_f64(self.alpha),
            compressor,
            log: self.log.complete()?,
            error: self.error.complete(a.shape(), k)?,
            sub_solver,
            compressed_mat,
            compressed_vec: DVector::zeros(k),
            residual_vec: DVector::zeros(k),
            update_vec: DVector::zeros(n),
            progress: Progress::new(),
        })
    }
}

impl<T, C, L, E, S> KaczmarzRecipe<T, C, L, E, S>
where
    T: Element,
    C: Compressor<T>,
    L: Logger,
    E: SolverError<T>,
    S: SubSolver<T>,
{
    /// `x ← x − α (⟨row, x⟩ − rhs) / ‖row‖² · conj(row)` for the single
    /// sketched row. A zero row leaves `x` unchanged.
    fn project_onto_row(&self, x: &mut DVector<T>) {
        let row = self.compressed_mat.row(0);
        let norm_sq = row.norm_squared();
        if norm_sq.is_zero() {
            return;
        }
        let mut dot = T::zero();
        for (r, xi) in row.iter().zip(x.iter()) {
            dot += *r * *xi;
        }
        let coef = self.alpha * (dot - self.compressed_vec[0]) / T::from_real(norm_sq);
        for (xi, r) in x.iter_mut().zip(row.iter()) {
            *xi -= coef * r.conjugate();
        }
    }

    fn record<O: Operand<T> + ?Sized>(&mut self, x: &DVector<T>, a: &O, b: &DVector<T>) -> Result<()> {
        let metric = self.error.compute(&Snapshot {
            a,
            b,
            x,
            compressed_mat: &self.compressed_mat,
            compressed_vec: &self.compressed_vec,
            cardinality: Cardinality::Left,
        })?;
        self.progress.record(&mut self.log, metric);
        Ok(())
    }
}

impl<T, C, L, E, S> SolverRecipe<T> for KaczmarzRecipe<T, C, L, E, S>
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
        self.compressor.mul_into(a, &mut self.compressed_mat)?;
        self.compressor.mul_into(b, &mut self.compressed_vec)?;

        self.record(x, a, b)?;
        if self.progress.state != SolverState::Iterating {
            return Ok(());
        }

        if self.compressed_mat.nrows() == 1 {
            self.project_onto_row(x);
        } else {
            self.residual_vec.copy_from(&self.compressed_vec);
            self.residual_vec.gemv(-T::one(), &self.compressed_mat, x, T::one());
            self.sub_solver.update(&self.compressed_mat)?;
            self.sub_solver.solve(&self.residual_vec, &mut self.update_vec)?;
            x.axpy(self.alpha, &self.update_vec, T::one());
        }
        self.progress.iteration += 1;
        Ok(())
    }
}
