//! Sketch-and-project iteration drivers.
//!
//! A solver config bundles a compressor, a logger, an error metric and a
//! sub-solver. [`SolverConfig::complete`] binds all of them to a system and
//! allocates every buffer the loop touches; [`solve_with_rng`] then steps
//! until the logger reports convergence or `max_it` projections are done.
//! The logger and error capabilities are trait bounds, so a config missing
//! either does not compile.

use nalgebra::DVector;
use rand::Rng;
use tracing::{debug, warn};

use crate::compressor::{Cardinality, CompressorConfig};
use crate::errors::{ensure_eq, Result};
use crate::logger::Logger;
use crate::operand::{Element, Operand};

pub mod column_projection;
pub mod kaczmarz;

pub use column_projection::{ColumnProjection, ColumnProjectionRecipe};
pub use kaczmarz::{Kaczmarz, KaczmarzRecipe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Initialized,
    Iterating,
    Converged,
    MaxIterReached,
}

pub trait SolverConfig<T: Element> {
    type Recipe: SolverRecipe<T>;

    /// Binds every component to the system `A x = b` starting from `x`.
    fn complete<O, R>(&self, x: &DVector<T>, a: &O, b: &DVector<T>, rng: &mut R) -> Result<Self::Recipe>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized;
}

pub trait SolverRecipe<T: Element> {
    type Log: Logger;

    fn log(&self) -> &Self::Log;

    fn state(&self) -> SolverState;

    /// Projections taken so far.
    fn iteration(&self) -> usize;

    /// One iteration: redraw the sketch (the first step uses the draw made
    /// by `complete`), log the error of the current iterate seen through
    /// it, then project unless the logger reports convergence or the budget
    /// is spent.
    fn step<O, R>(&mut self, x: &mut DVector<T>, a: &O, b: &DVector<T>, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized;

    fn converged(&self) -> bool {
        self.log().converged()
    }

    /// False once the solver has converged or used up its budget.
    fn is_running(&self) -> bool {
        matches!(self.state(), SolverState::Initialized | SolverState::Iterating)
    }
}

/// Iteration counter and state shared by the solver recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Progress {
    pub(crate) state: SolverState,
    pub(crate) iteration: usize,
}

impl Progress {
    pub(crate) fn new() -> Self {
        Self {
            state: SolverState::Initialized,
            iteration: 0,
        }
    }

    /// Logs `metric` for the current iterate and moves the state forward.
    /// The solver projects only while the state is `Iterating`.
    pub(crate) fn record<L: Logger>(&mut self, log: &mut L, metric: f64) {
        log.update(self.iteration, metric);
        self.state = if log.converged() {
            SolverState::Converged
        } else if self.iteration >= log.max_it() {
            SolverState::MaxIterReached
        } else {
            SolverState::Iterating
        };
    }
}

/// Checks that `x` and `b` fit `a`.
pub(crate) fn check_system<T, O>(context: &'static str, x: &DVector<T>, a: &O, b: &DVector<T>) -> Result<()>
where
    T: Element,
    O: Operand<T> + ?Sized,
{
    let (m, n) = a.shape();
    ensure_eq(context, "matrix columns", n, "x length", x.len())?;
    ensure_eq(context, "matrix rows", m, "b length", b.len())
}

/// Completes `config` on its natural side. A compressor configured for the
/// other side, or for none, is rebound with a warning.
pub(crate) fn complete_on_side<T, C, O, R>(
    solver: &'static str,
    natural: Cardinality,
    config: &C,
    a: &O,
    rng: &mut R,
) -> Result<C::Recipe>
where
    T: Element,
    C: CompressorConfig<T>,
    O: Operand<T> + ?Sized,
    R: Rng + ?Sized,
{
    let configured = config.cardinality();
    if configured != natural {
        warn!(
            solver,
            configured = ?configured,
            used = ?natural,
            "compressor cardinality does not match the solver, binding it on the solver's side"
        );
    }
    config.complete_for(natural, a, rng)
}

/// Runs `config` on `A x = b` with the given generator, updating `x` in
/// place. The returned recipe carries the logger history and the
/// convergence flag.
pub fn solve_with_rng<T, S, O, R>(
    config: &S,
    x: &mut DVector<T>,
    a: &O,
    b: &DVector<T>,
    rng: &mut R,
) -> Result<S::Recipe>
where
    T: Element,
    S: SolverConfig<T>,
    O: Operand<T> + ?Sized,
    R: Rng + ?Sized,
{
    let mut recipe = config.complete(x, a, b, rng)?;
    while recipe.is_running() {
        recipe.step(x, a, b, rng)?;
    }
    debug!(
        iterations = recipe.iteration(),
        converged = recipe.converged(),
        state = ?recipe.state(),
        "solve finished"
    );
    Ok(recipe)
}

/// [`solve_with_rng`] on the thread-local generator.
pub fn solve<T, S, O>(config: &S, x: &mut DVector<T>, a: &O, b: &DVector<T>) -> Result<S::Recipe>
where
    T: Element,
    S: SolverConfig<T>,
    O: Operand<T> + ?Sized,
{
    solve_with_rng(config, x, a, b, &mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{BasicLogger, LoggerConfig};

    #[test]
    fn test_progress_transitions() {
        let mut log = BasicLogger { max_it: 2, threshold: 0.5, collection_rate: 1 }.complete().unwrap();
        let mut progress = Progress::new();
        assert_eq!(progress.state, SolverState::Initialized);

        progress.record(&mut log, 3.0);
        assert_eq!(progress.state, SolverState::Iterating);
        progress.iteration = 2;
        progress.record(&mut log, 2.0);
        assert_eq!(progress.state, SolverState::MaxIterReached);
        progress.record(&mut log, 0.1);
        assert_eq!(progress.state, SolverState::Converged);
    }
}
