//! Weighted least squares state estimation via Gauss-Newton iteration.
//!
//! Each iteration linearizes the measurement model at the current state,
//! forms the gain matrix G = HᵀWH, solves the normal equations
//! G·Δx = HᵀW·(z - h), applies the correction and re-pins the slack
//! angle. The loop terminates on one of three outcomes, all reported as
//! data rather than errors:
//!
//! * **Converged** - max |Δx| fell below the tolerance.
//! * **SingularGain** - the gain matrix could not be factorized. This is
//!   the numerical signature of an unobservable network and callers are
//!   expected to follow up with an observability analysis.
//! * **Diverged** - corrections grew without bound, or the iteration
//!   budget ran out.
//!
//! Genuine failures (malformed input, missing slack, too few
//! measurements) still surface as `Err`.

use crate::bad_data::{self, QualityReport};
use crate::comparison::{AgreementThresholds, ImpactThresholds};
use crate::jacobian::MeasurementModel;
use crate::measurement::MeasurementSet;
use crate::state::StateVector;
use gse_core::{GseError, GseResult, LinearSystemBackend, Network, SolveError, SolverKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Knobs of the estimation loop and its statistical tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Convergence threshold on max |Δx|
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Confidence level of the chi-square test (snapped to 0.90, 0.95,
    /// 0.975 or 0.99)
    pub confidence_level: f64,
    /// Normalized residual above this flags a measurement as suspicious
    pub normalized_residual_cutoff: f64,
    /// Correction magnitude past which sustained growth counts as
    /// divergence
    pub divergence_threshold: f64,
    /// Severity bands of the outage impact classification
    pub impact_thresholds: ImpactThresholds,
    /// Agreement bands of the load-flow reconciliation
    pub reconcile_thresholds: AgreementThresholds,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 50,
            confidence_level: 0.95,
            normalized_residual_cutoff: 3.0,
            divergence_threshold: 10.0,
            impact_thresholds: ImpactThresholds::default(),
            reconcile_thresholds: AgreementThresholds::default(),
        }
    }
}

impl EstimationConfig {
    pub fn validate(&self) -> GseResult<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(GseError::Config(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(GseError::Config("max_iterations must be at least 1".into()));
        }
        if !(0.5..1.0).contains(&self.confidence_level) {
            return Err(GseError::Config(format!(
                "confidence_level must lie in [0.5, 1.0), got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}

/// How an estimation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    Converged,
    Diverged,
    SingularGain,
}

impl ConvergenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Diverged => "diverged",
            Self::SingularGain => "singular_gain",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub status: ConvergenceStatus,
    pub iterations: usize,
    /// max |Δx| of the last applied correction
    pub final_max_correction: f64,
    /// rᵀWr at the returned state
    pub objective: f64,
}

/// The outcome of one estimation run.
///
/// `quality` is only populated for converged runs; residual statistics
/// of a non-converged state are noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Estimate {
    pub state: StateVector,
    pub convergence: ConvergenceResult,
    pub quality: Option<QualityReport>,
}

impl Estimate {
    pub fn converged(&self) -> bool {
        self.convergence.status == ConvergenceStatus::Converged
    }
}

/// A WLS estimator bound to one network.
///
/// The measurement model is built once; `estimate` can then be called
/// repeatedly with different measurement sets, which is what the outage
/// simulator does.
pub struct WlsEstimator {
    model: MeasurementModel,
    config: EstimationConfig,
    solver: Arc<dyn LinearSystemBackend>,
}

impl WlsEstimator {
    pub fn new(network: &Network, config: EstimationConfig) -> GseResult<Self> {
        config.validate()?;
        Ok(Self {
            model: MeasurementModel::from_network(network)?,
            config,
            solver: SolverKind::default().build_solver(),
        })
    }

    pub fn with_solver(mut self, solver: Arc<dyn LinearSystemBackend>) -> Self {
        self.solver = solver;
        self
    }

    pub fn config(&self) -> &EstimationConfig {
        &self.config
    }

    pub fn model(&self) -> &MeasurementModel {
        &self.model
    }

    /// Estimate from a flat start (all magnitudes 1.0 pu, all angles 0).
    pub fn estimate(
        &self,
        network: &Network,
        measurements: &MeasurementSet,
    ) -> GseResult<Estimate> {
        let initial = StateVector::flat_start(network)?;
        self.estimate_from(&initial, measurements)
    }

    /// Estimate from an explicit initial state (warm start).
    ///
    /// A warm start at the true solution converges in a single iteration;
    /// the outage simulator exploits this by seeding each scenario with
    /// the baseline solution.
    pub fn estimate_from(
        &self,
        initial: &StateVector,
        measurements: &MeasurementSet,
    ) -> GseResult<Estimate> {
        let mut state = initial.clone();
        state.reindex();
        if state.slack() != self.model.slack() {
            return Err(GseError::Config(format!(
                "initial state pins slack {} but the network slack is {}",
                state.slack(),
                self.model.slack()
            )));
        }
        state.pin_slack();

        let mut prev_correction = f64::INFINITY;
        let mut growth_streak = 0_usize;
        let mut last_correction = f64::INFINITY;

        for iteration in 1..=self.config.max_iterations {
            let system = self.model.linearize(&state, measurements)?;
            let residuals = system.residuals();
            let gain = system.gain_matrix();
            let rhs = system.weighted_rhs(&residuals);

            let delta = match self.solver.solve(&gain, &rhs) {
                Ok(delta) => delta,
                Err(SolveError::Singular(_)) => {
                    return Ok(Estimate {
                        convergence: ConvergenceResult {
                            status: ConvergenceStatus::SingularGain,
                            iterations: iteration,
                            final_max_correction: last_correction,
                            objective: system.objective(&residuals),
                        },
                        state,
                        quality: None,
                    });
                }
                Err(e @ SolveError::Dimension(_)) => {
                    return Err(GseError::Solver(e.to_string()));
                }
            };

            let max_correction = state.apply_correction(&delta)?;
            last_correction = max_correction;

            if !max_correction.is_finite() {
                return Ok(self.non_converged(state, measurements, iteration, max_correction));
            }

            if max_correction <= self.config.tolerance {
                return self.converged(state, measurements, iteration, max_correction);
            }

            // Three consecutive growing corrections past the threshold
            // is runaway, not a rough patch
            if max_correction > self.config.divergence_threshold && max_correction > prev_correction
            {
                growth_streak += 1;
                if growth_streak >= 3 {
                    return Ok(self.non_converged(state, measurements, iteration, max_correction));
                }
            } else {
                growth_streak = 0;
            }
            prev_correction = max_correction;
        }

        Ok(self.non_converged(
            state,
            measurements,
            self.config.max_iterations,
            last_correction,
        ))
    }

    fn converged(
        &self,
        state: StateVector,
        measurements: &MeasurementSet,
        iterations: usize,
        final_max_correction: f64,
    ) -> GseResult<Estimate> {
        // Re-linearize at the solution for the residual statistics
        let system = self.model.linearize(&state, measurements)?;
        let residuals = system.residuals();
        let objective = system.objective(&residuals);
        let quality = bad_data::assess(&system, &residuals, &self.config);
        Ok(Estimate {
            state,
            convergence: ConvergenceResult {
                status: ConvergenceStatus::Converged,
                iterations,
                final_max_correction,
                objective,
            },
            quality: Some(quality),
        })
    }

    fn non_converged(
        &self,
        state: StateVector,
        measurements: &MeasurementSet,
        iterations: usize,
        final_max_correction: f64,
    ) -> Estimate {
        let objective = self
            .model
            .linearize(&state, measurements)
            .map(|s| s.objective(&s.residuals()))
            .unwrap_or(f64::NAN);
        Estimate {
            state,
            convergence: ConvergenceResult {
                status: ConvergenceStatus::Diverged,
                iterations,
                final_max_correction,
                objective,
            },
            quality: None,
        }
    }
}
