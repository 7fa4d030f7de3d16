//! Randomized sketch-and-project solvers for linear systems.
//!
//! Compressors draw random sketching operators, the solvers in [`solver`]
//! use them to build small projected subproblems, and a [`sub_solver`]
//! solves each of those exactly.

pub mod compressor;
pub mod distribution;
pub mod errors;
pub mod fwht;
pub mod logger;
pub mod operand;
pub mod solver;
pub mod solver_error;
pub mod sparse;
pub mod sub_solver;
pub mod test_assist;

pub use compressor::{
    Adjoint, Cardinality, Compressor, CompressorConfig, CountSketch, Fjlt, Gaussian, Role, Sampling, SparseSign,
    Srht,
};
pub use distribution::{L2Norm, Uniform};
pub use errors::{RandNLAError, Result};
pub use logger::{BasicLogger, Logger, LoggerConfig};
pub use operand::{Element, Operand, Target};
pub use solver::{solve, solve_with_rng, ColumnProjection, Kaczmarz, SolverConfig, SolverRecipe, SolverState};
pub use solver_error::{CompressedResidual, FullResidual, SolverError, SolverErrorConfig};
pub use sparse::CsrMatrix;
pub use sub_solver::{LQSolver, QRSolver, SubSolver, SubSolverConfig};
