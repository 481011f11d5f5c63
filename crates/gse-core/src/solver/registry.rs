use super::backend::{FaerSolver, GaussSolver, LinearSystemBackend};
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Simple registry of available linear-system backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SolverKind {
    Gauss,
    #[default]
    Faer,
}

impl SolverKind {
    pub fn from_str(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "gauss" => Ok(SolverKind::Gauss),
            "faer" | "default" => Ok(SolverKind::Faer),
            other => Err(anyhow!(
                "unknown solver '{}'; supported values: gauss, faer",
                other
            )),
        }
    }

    pub fn build_solver(self) -> Arc<dyn LinearSystemBackend> {
        match self {
            SolverKind::Gauss => Arc::new(GaussSolver),
            SolverKind::Faer => Arc::new(FaerSolver),
        }
    }

    pub fn available() -> &'static [&'static str] {
        &["gauss", "faer"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Gauss => "gauss",
            SolverKind::Faer => "faer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_kind_parsing_supports_all_engines() {
        assert_eq!(SolverKind::from_str("gauss").unwrap(), SolverKind::Gauss);
        assert_eq!(SolverKind::from_str("faer").unwrap(), SolverKind::Faer);
        assert!(SolverKind::from_str("unknown").is_err());
    }

    #[test]
    fn registry_backends_solve_diagonal_system() {
        let matrix = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        let rhs = vec![4.0, 6.0];

        for kind in [SolverKind::Gauss, SolverKind::Faer] {
            let solver = kind.build_solver();
            assert_eq!(solver.solve(&matrix, &rhs).unwrap(), vec![2.0, 2.0]);
        }
    }
}
