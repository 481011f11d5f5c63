//! Dense linear-system backends for the normal-equations solve.

pub mod backend;
pub mod registry;

pub use backend::{FaerSolver, GaussSolver, LinearSystemBackend, SolveError};
pub use registry::SolverKind;
