//! Measurement outage simulation.
//!
//! An outage scenario names the buses whose telemetry goes dark: every
//! measurement at those buses or on their incident branches is removed,
//! the estimator re-runs warm-started from the baseline solution, and
//! the degraded estimate is compared against the baseline. The result
//! carries an impact severity and concrete operator recommendations.
//!
//! Scenarios are independent, so batches run in parallel. A scenario
//! that loses no measurements must reproduce the baseline bit for bit;
//! that case short-circuits without re-estimating.

use crate::bad_data::QualityReport;
use crate::comparison::{compare_states, ImpactSeverity, ImpactThresholds, StateComparison};
use crate::measurement::MeasurementSet;
use crate::observability::{self, ObservabilityReport};
use crate::wls::{ConvergenceResult, ConvergenceStatus, Estimate, WlsEstimator};
use chrono::{DateTime, Utc};
use gse_core::{BusId, GseResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutageScenario {
    pub name: String,
    /// Buses whose telemetry is lost
    pub buses: Vec<BusId>,
}

impl OutageScenario {
    pub fn new(name: impl Into<String>, buses: Vec<BusId>) -> Self {
        Self {
            name: name.into(),
            buses,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutageResult {
    pub scenario: String,
    pub outaged_buses: Vec<BusId>,
    pub simulated_at: DateTime<Utc>,
    /// Active measurements before the outage
    pub baseline_active: usize,
    pub measurements_lost: usize,
    pub remaining_active: usize,
    /// Share of the baseline telemetry lost, in percent
    pub loss_percent: f64,
    pub severity: ImpactSeverity,
    pub convergence: ConvergenceResult,
    /// Solved state of the degraded run; absent when the scenario failed
    pub outaged_state: Option<crate::state::StateVector>,
    /// Deviation from the baseline; absent when the scenario failed
    pub comparison: Option<StateComparison>,
    pub quality: Option<QualityReport>,
    pub observability: ObservabilityReport,
    pub recommendations: Vec<String>,
}

impl OutageResult {
    pub fn failed(&self) -> bool {
        self.severity == ImpactSeverity::Failed
    }
}

/// Runs outage scenarios against a baseline estimate.
pub struct OutageSimulator<'a> {
    estimator: &'a WlsEstimator,
    thresholds: ImpactThresholds,
}

impl<'a> OutageSimulator<'a> {
    pub fn new(estimator: &'a WlsEstimator) -> Self {
        let thresholds = estimator.config().impact_thresholds.clone();
        Self {
            estimator,
            thresholds,
        }
    }

    pub fn with_thresholds(mut self, thresholds: ImpactThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Simulate one scenario against a converged baseline.
    pub fn simulate(
        &self,
        baseline: &Estimate,
        measurements: &MeasurementSet,
        scenario: &OutageScenario,
    ) -> GseResult<OutageResult> {
        let baseline_active = measurements.active_count();
        let mut degraded = measurements.clone();
        let lost = degraded.deactivate_at_buses(&scenario.buses);
        let remaining = degraded.active_count();

        let observability =
            observability::analyze(self.estimator.model(), &baseline.state, &degraded)?;
        let counts = LossCounts {
            baseline_active,
            lost,
            remaining,
        };

        if lost == 0 {
            // Nothing changed: the baseline carries over exactly
            let comparison = compare_states(&baseline.state, &baseline.state)?;
            return Ok(self.build_result(
                scenario,
                counts,
                ImpactSeverity::Minimal,
                baseline.convergence.clone(),
                Some(baseline.state.clone()),
                Some(comparison),
                baseline.quality.clone(),
                observability,
            ));
        }

        // An underdetermined set cannot start the iteration at all
        if remaining < self.estimator.model().n_state_vars() || !observability.observable {
            let (convergence, quality, comparison) =
                match self.estimator.estimate_from(&baseline.state, &degraded) {
                    Ok(estimate) => (estimate.convergence, None, None),
                    Err(_) => (
                        ConvergenceResult {
                            status: ConvergenceStatus::SingularGain,
                            iterations: 0,
                            final_max_correction: f64::NAN,
                            objective: f64::NAN,
                        },
                        None,
                        None,
                    ),
                };
            return Ok(self.build_result(
                scenario,
                counts,
                ImpactSeverity::Failed,
                convergence,
                None,
                comparison,
                quality,
                observability,
            ));
        }

        let estimate = self.estimator.estimate_from(&baseline.state, &degraded)?;
        if !estimate.converged() {
            return Ok(self.build_result(
                scenario,
                counts,
                ImpactSeverity::Failed,
                estimate.convergence,
                None,
                None,
                None,
                observability,
            ));
        }

        let comparison = compare_states(&baseline.state, &estimate.state)?;
        let severity = self.thresholds.classify(comparison.max_vm_diff_pct);
        Ok(self.build_result(
            scenario,
            counts,
            severity,
            estimate.convergence,
            Some(estimate.state),
            Some(comparison),
            estimate.quality,
            observability,
        ))
    }

    /// Run a batch of scenarios in parallel.
    pub fn simulate_all(
        &self,
        baseline: &Estimate,
        measurements: &MeasurementSet,
        scenarios: &[OutageScenario],
    ) -> GseResult<Vec<OutageResult>> {
        scenarios
            .par_iter()
            .map(|scenario| self.simulate(baseline, measurements, scenario))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        scenario: &OutageScenario,
        counts: LossCounts,
        severity: ImpactSeverity,
        convergence: ConvergenceResult,
        outaged_state: Option<crate::state::StateVector>,
        comparison: Option<StateComparison>,
        quality: Option<QualityReport>,
        observability: ObservabilityReport,
    ) -> OutageResult {
        let recommendations = recommend(severity, &comparison, &quality, &observability);
        let loss_percent = if counts.baseline_active == 0 {
            0.0
        } else {
            100.0 * counts.lost as f64 / counts.baseline_active as f64
        };
        OutageResult {
            scenario: scenario.name.clone(),
            outaged_buses: scenario.buses.clone(),
            simulated_at: Utc::now(),
            baseline_active: counts.baseline_active,
            measurements_lost: counts.lost,
            remaining_active: counts.remaining,
            loss_percent,
            severity,
            convergence,
            outaged_state,
            comparison,
            quality,
            observability,
            recommendations,
        }
    }
}

/// Measurement-loss accounting for one scenario.
#[derive(Debug, Clone, Copy)]
struct LossCounts {
    baseline_active: usize,
    lost: usize,
    remaining: usize,
}

/// Deterministic recommendation rules, most urgent first.
fn recommend(
    severity: ImpactSeverity,
    comparison: &Option<StateComparison>,
    quality: &Option<QualityReport>,
    observability: &ObservabilityReport,
) -> Vec<String> {
    let mut out = Vec::new();

    match severity {
        ImpactSeverity::Failed => {
            let dark: Vec<String> = observability
                .unobservable_buses
                .iter()
                .map(|b| b.to_string())
                .collect();
            if dark.is_empty() {
                out.push(
                    "estimation failed under this outage; restore telemetry before trusting the state"
                        .to_string(),
                );
            } else {
                out.push(format!(
                    "buses {} become unobservable; restore their telemetry or add redundant measurements",
                    dark.join(", ")
                ));
            }
        }
        ImpactSeverity::Severe | ImpactSeverity::Moderate => {
            if let Some(cmp) = comparison {
                if let Some(bus) = cmp.worst_bus {
                    out.push(format!(
                        "estimate degrades by {:.2}% at bus {}; add redundant measurements near it",
                        cmp.max_vm_diff_pct, bus
                    ));
                }
            }
        }
        ImpactSeverity::Minor | ImpactSeverity::Minimal => {}
    }

    if !observability.critically_observable_buses.is_empty() {
        let critical: Vec<String> = observability
            .critically_observable_buses
            .iter()
            .map(|b| b.to_string())
            .collect();
        out.push(format!(
            "buses {} are held by a single measurement; one more sensor loss takes them dark",
            critical.join(", ")
        ));
    }

    if let Some(q) = quality {
        if q.chi_squared_suspect {
            out.push(format!(
                "chi-square test fails ({:.1} > {:.1}); inspect the remaining measurements for bad data",
                q.chi_squared, q.chi_critical
            ));
        }
    }

    if out.is_empty() {
        out.push("no action required".to_string());
    }
    out
}
