//! Residual-based bad data detection.
//!
//! Two classic tests run over the converged residuals:
//!
//! * **Chi-square**: the WLS objective J = rᵀWr follows a chi-square
//!   distribution with `m - n` degrees of freedom under the measurement
//!   noise model. J above the critical value flags the presence of bad
//!   data somewhere in the set.
//! * **Largest normalized residual**: |r_i| / σ_i per measurement points
//!   at *which* measurement is most suspect.
//!
//! The critical value uses the normal-tail approximation
//! `dof + z·√(2·dof)` rather than an exact inverse chi-square, which is
//! accurate to a fraction of a percent at the redundancy levels real
//! telemetry provides and needs no special-function dependency.

use crate::jacobian::JacobianSystem;
use crate::wls::EstimationConfig;
use gse_core::MeasurementId;
use serde::{Deserialize, Serialize};

/// One-sided standard normal quantiles for the supported confidence
/// levels. Unlisted levels snap to the nearest entry.
const Z_TABLE: &[(f64, f64)] = &[
    (0.90, 1.2816),
    (0.95, 1.6449),
    (0.975, 1.9600),
    (0.99, 2.3263),
];

fn z_value(confidence: f64) -> f64 {
    let mut best = Z_TABLE[0];
    for &entry in Z_TABLE {
        if (entry.0 - confidence).abs() < (best.0 - confidence).abs() {
            best = entry;
        }
    }
    best.1
}

/// Statistical quality of a converged estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// WLS objective rᵀWr at the solution
    pub chi_squared: f64,
    /// Critical chi-square value at the configured confidence level
    pub chi_critical: f64,
    /// Redundancy of the active set: rows minus state variables
    pub degrees_of_freedom: usize,
    /// True when the objective exceeds the critical value
    pub chi_squared_suspect: bool,
    /// max_i |r_i| / σ_i
    pub largest_normalized_residual: f64,
    /// Measurement behind the largest normalized residual
    pub worst_measurement: Option<MeasurementId>,
    /// Measurements whose normalized residual exceeds the cutoff
    pub suspicious_count: usize,
    /// Measurements beyond 4σ, near-certainly corrupt
    pub bad_count: usize,
    pub max_abs_residual: f64,
    pub mean_abs_residual: f64,
}

impl QualityReport {
    /// Either detector fired.
    pub fn has_suspect_data(&self) -> bool {
        self.chi_squared_suspect || self.suspicious_count > 0
    }
}

/// Run both detectors over the residuals of a linearized system.
pub fn assess(
    system: &JacobianSystem,
    residuals: &[f64],
    config: &EstimationConfig,
) -> QualityReport {
    let dof = system.n_rows().saturating_sub(system.n_state);
    let chi_squared = system.objective(residuals);
    let z = z_value(config.confidence_level);
    let chi_critical = dof as f64 + z * (2.0 * dof as f64).sqrt();

    let mut largest = 0.0_f64;
    let mut worst = None;
    let mut suspicious = 0;
    let mut bad = 0;
    let mut max_abs = 0.0_f64;
    let mut sum_abs = 0.0;

    for (i, &r) in residuals.iter().enumerate() {
        let abs = r.abs();
        max_abs = max_abs.max(abs);
        sum_abs += abs;
        let normalized = abs / system.std_devs[i];
        if normalized > largest {
            largest = normalized;
            worst = Some(system.measurement_ids[i]);
        }
        if normalized > config.normalized_residual_cutoff {
            suspicious += 1;
        }
        if normalized > 4.0 {
            bad += 1;
        }
    }

    let mean_abs = if residuals.is_empty() {
        0.0
    } else {
        sum_abs / residuals.len() as f64
    };

    QualityReport {
        chi_squared,
        chi_critical,
        degrees_of_freedom: dof,
        chi_squared_suspect: dof > 0 && chi_squared > chi_critical,
        largest_normalized_residual: largest,
        worst_measurement: if largest > config.normalized_residual_cutoff {
            worst
        } else {
            None
        },
        suspicious_count: suspicious,
        bad_count: bad,
        max_abs_residual: max_abs,
        mean_abs_residual: mean_abs,
    }
}
