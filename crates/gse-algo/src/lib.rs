//! # gse-algo: State Estimation Algorithms for Power Networks
//!
//! This crate turns raw SCADA telemetry into a solved network state and
//! tells the operator how much to trust it. It provides weighted least
//! squares (WLS) state estimation plus the analyses that surround it in
//! a control room:
//!
//! | Component | Entry point | Question answered |
//! |-----------|-------------|-------------------|
//! | WLS estimator | [`WlsEstimator`] | What is the operating point? |
//! | Observability | [`observability::analyze`] | Can the telemetry determine it? |
//! | Bad data | [`bad_data::assess`] | Is any sensor lying? |
//! | Outage simulation | [`OutageSimulator`] | What if an RTU goes dark? |
//! | Load-flow bridge | [`bridge::reconcile`] | Does the dispatch model agree? |
//!
//! ## Estimation loop
//!
//! [`WlsEstimator`] runs Gauss-Newton over the nonlinear measurement
//! model: at each iterate it linearizes ([`MeasurementModel`]), forms
//! the gain matrix G = HᵀWH and solves the normal equations with one of
//! the dense backends from `gse-core`. The state is `(n-1)` bus angles
//! plus `n` magnitudes with the slack angle pinned to exactly zero.
//!
//! Non-convergence is *data*: [`ConvergenceStatus`] distinguishes a
//! diverged iteration from a singular gain matrix, the latter being the
//! numerical face of an unobservable network.
//!
//! ## Example
//!
//! ```ignore
//! use gse_algo::{EstimationConfig, MeasurementKind, MeasurementLocation,
//!                MeasurementSet, WlsEstimator};
//! use gse_core::BusId;
//!
//! let mut telemetry = MeasurementSet::new();
//! telemetry.add(MeasurementKind::VoltageMagnitude,
//!               MeasurementLocation::Bus(BusId::new(1)), 1.02, 0.004)?;
//! // ... injections and flows ...
//!
//! let estimator = WlsEstimator::new(&network, EstimationConfig::default())?;
//! let estimate = estimator.estimate(&network, &telemetry)?;
//! if estimate.converged() {
//!     println!("chi2 = {}", estimate.quality.unwrap().chi_squared);
//! }
//! ```

pub mod bad_data;
pub mod bridge;
pub mod comparison;
pub mod jacobian;
pub mod measurement;
pub mod observability;
pub mod outage;
pub mod state;
pub mod synthesis;
pub mod wls;
pub mod ybus;

#[cfg(test)]
pub mod test_utils;

pub use bad_data::QualityReport;
pub use bridge::{LoadFlowSolution, LoadFlowSolver, Reconciliation};
pub use comparison::{
    AgreementQuality, AgreementThresholds, ImpactSeverity, ImpactThresholds, StateComparison,
};
pub use jacobian::{JacobianSystem, MeasurementModel};
pub use measurement::{Measurement, MeasurementKind, MeasurementLocation, MeasurementSet};
pub use observability::ObservabilityReport;
pub use outage::{OutageResult, OutageScenario, OutageSimulator};
pub use state::StateVector;
pub use synthesis::{NoiseModel, PlacementMode};
pub use wls::{ConvergenceResult, ConvergenceStatus, Estimate, EstimationConfig, WlsEstimator};
pub use ybus::AdmittanceMatrix;

use gse_core::{GseResult, Network};

/// One-shot estimation from a flat start.
pub fn estimate(
    network: &Network,
    measurements: &MeasurementSet,
    config: &EstimationConfig,
) -> GseResult<Estimate> {
    WlsEstimator::new(network, config.clone())?.estimate(network, measurements)
}

/// One-shot estimation warm-started from `initial`.
pub fn estimate_from(
    network: &Network,
    initial: &StateVector,
    measurements: &MeasurementSet,
    config: &EstimationConfig,
) -> GseResult<Estimate> {
    WlsEstimator::new(network, config.clone())?.estimate_from(initial, measurements)
}

/// Observability analysis of the active measurement set at `state`.
pub fn analyze_observability(
    network: &Network,
    state: &StateVector,
    measurements: &MeasurementSet,
) -> GseResult<ObservabilityReport> {
    let model = MeasurementModel::from_network(network)?;
    observability::analyze(&model, state, measurements)
}

/// Simulate a single outage scenario against a fresh baseline estimate.
pub fn simulate_outage(
    network: &Network,
    measurements: &MeasurementSet,
    scenario: &OutageScenario,
    config: &EstimationConfig,
) -> GseResult<OutageResult> {
    let estimator = WlsEstimator::new(network, config.clone())?;
    let baseline = estimator.estimate(network, measurements)?;
    OutageSimulator::new(&estimator).simulate(&baseline, measurements, scenario)
}

/// Simulate a batch of outage scenarios in parallel against one baseline.
pub fn simulate_outages(
    network: &Network,
    measurements: &MeasurementSet,
    scenarios: &[OutageScenario],
    config: &EstimationConfig,
) -> GseResult<Vec<OutageResult>> {
    let estimator = WlsEstimator::new(network, config.clone())?;
    let baseline = estimator.estimate(network, measurements)?;
    OutageSimulator::new(&estimator).simulate_all(&baseline, measurements, scenarios)
}

/// Reconcile a converged estimate against an external load-flow solver.
pub fn reconcile_with_load_flow(
    network: &Network,
    estimate: &Estimate,
    solver: &dyn LoadFlowSolver,
    config: &EstimationConfig,
) -> GseResult<Reconciliation> {
    bridge::reconcile(network, estimate, solver, &config.reconcile_thresholds)
}
