use faer::{prelude::*, solvers::PartialPivLu, Mat};
use thiserror::Error;

/// Errors from dense linear-system solves.
///
/// `Singular` is deliberately its own variant: for the state estimator a
/// singular gain matrix is the primary unobservability signal and must be
/// distinguishable from malformed inputs.
#[derive(Debug, Error)]
pub enum SolveError {
    /// Matrix is numerically singular (no unique solution)
    #[error("singular matrix: {0}")]
    Singular(String),

    /// Dimension mismatch between matrix and right-hand side
    #[error("dimension mismatch: {0}")]
    Dimension(String),
}

/// Trait for solving dense linear systems (Ax = b).
///
/// This is the seam between the Gauss-Newton iteration and the linear
/// algebra underneath it. The estimator solves the normal equations
/// (HᵀWH)·Δx = HᵀW·r through this trait every iteration.
pub trait LinearSystemBackend: Send + Sync {
    /// Solve the linear system Ax = b
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, SolveError>;
}

/// Gaussian elimination with partial pivoting.
///
/// Slower than [`FaerSolver`] but dependency-light and exact about when it
/// hits a zero pivot, which makes it the reference backend in tests.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

impl LinearSystemBackend for GaussSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, SolveError> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if rhs.len() != n {
            return Err(SolveError::Dimension(format!(
                "rhs length ({}) does not match matrix dimension {}",
                rhs.len(),
                n
            )));
        }
        if matrix.iter().any(|row| row.len() != n) {
            return Err(SolveError::Dimension("matrix must be square".into()));
        }

        let mut a = matrix.to_vec();
        let mut b = rhs.to_vec();

        for i in 0..n {
            let mut pivot = i;
            for row in i + 1..n {
                if a[row][i].abs() > a[pivot][i].abs() {
                    pivot = row;
                }
            }
            if pivot != i {
                a.swap(i, pivot);
                b.swap(i, pivot);
            }

            let diag = a[i][i];
            if diag.abs() < 1e-12 {
                return Err(SolveError::Singular(format!(
                    "pivot {} below threshold ({:.3e})",
                    i,
                    diag.abs()
                )));
            }

            for value in a[i][i..].iter_mut() {
                *value /= diag;
            }
            b[i] /= diag;

            let pivot_segment = a[i][i..].to_vec();
            for row in 0..n {
                if row == i {
                    continue;
                }
                let factor = a[row][i];
                for (target, &pivot) in a[row][i..].iter_mut().zip(pivot_segment.iter()) {
                    *target -= factor * pivot;
                }
                b[row] -= factor * b[i];
            }
        }

        Ok(b)
    }
}

/// LU decomposition with partial pivoting via faer.
///
/// The default backend. Singularity shows up as non-finite entries in the
/// back-substituted solution, which we map to [`SolveError::Singular`].
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

impl LinearSystemBackend for FaerSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, SolveError> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if rhs.len() != n {
            return Err(SolveError::Dimension(format!(
                "rhs length ({}) does not match matrix dimension {}",
                rhs.len(),
                n
            )));
        }
        if matrix.iter().any(|row| row.len() != n) {
            return Err(SolveError::Dimension("matrix must be square".into()));
        }

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let mut solution = Vec::with_capacity(n);
        for i in 0..n {
            solution.push(sol.read(i, 0));
        }

        if solution.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::Singular(
                "non-finite solution from LU back-substitution".into(),
            ));
        }

        Ok(solution)
    }
}
