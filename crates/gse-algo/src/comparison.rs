//! State comparison and classification thresholds.
//!
//! The outage simulator and the load-flow bridge both reduce "how
//! different are these two solved states" to the same per-bus voltage
//! deviation statistics; the threshold tables that turn a deviation into
//! a severity or quality label live here so the two surfaces cannot
//! drift apart.

use crate::state::StateVector;
use gse_core::{BusId, GseError, GseResult};
use serde::{Deserialize, Serialize};

/// Per-bus deviation statistics between two states over the same buses.
///
/// Voltage deviations are percentages of the reference magnitude; angle
/// deviation is absolute, in degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateComparison {
    pub max_vm_diff_pct: f64,
    pub mean_vm_diff_pct: f64,
    pub rms_vm_diff_pct: f64,
    pub max_va_diff_deg: f64,
    /// Bus with the largest voltage magnitude deviation
    pub worst_bus: Option<BusId>,
}

/// Compare `candidate` against `reference` bus by bus.
pub fn compare_states(
    reference: &StateVector,
    candidate: &StateVector,
) -> GseResult<StateComparison> {
    if !reference.same_ordering(candidate) {
        return Err(GseError::Validation(
            "cannot compare states over different bus sets".into(),
        ));
    }

    let mut max_vm = 0.0_f64;
    let mut sum_vm = 0.0;
    let mut sum_sq_vm = 0.0;
    let mut max_va = 0.0_f64;
    let mut worst = None;

    for (i, &bus) in reference.bus_ids().iter().enumerate() {
        let vm_ref = reference.voltages()[i];
        let vm_new = candidate.voltages()[i];
        let pct = 100.0 * (vm_new - vm_ref).abs() / vm_ref.abs().max(1e-9);
        sum_vm += pct;
        sum_sq_vm += pct * pct;
        if pct > max_vm {
            max_vm = pct;
            worst = Some(bus);
        }

        let va_diff = candidate.angles()[i] - reference.angles()[i];
        max_va = max_va.max(va_diff.abs().to_degrees());
    }

    let n = reference.n_bus() as f64;
    Ok(StateComparison {
        max_vm_diff_pct: max_vm,
        mean_vm_diff_pct: sum_vm / n,
        rms_vm_diff_pct: (sum_sq_vm / n).sqrt(),
        max_va_diff_deg: max_va,
        worst_bus: worst,
    })
}

/// How badly an outage scenario degraded the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactSeverity {
    /// Estimation no longer converges; the scenario leaves the network
    /// unobservable or numerically intractable
    Failed,
    Severe,
    Moderate,
    Minor,
    Minimal,
}

impl ImpactSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Severe => "severe",
            Self::Moderate => "moderate",
            Self::Minor => "minor",
            Self::Minimal => "minimal",
        }
    }
}

/// Voltage deviation bands of the severity classification, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactThresholds {
    pub minimal_below_pct: f64,
    pub minor_below_pct: f64,
    pub moderate_below_pct: f64,
}

impl Default for ImpactThresholds {
    fn default() -> Self {
        Self {
            minimal_below_pct: 0.5,
            minor_below_pct: 2.0,
            moderate_below_pct: 5.0,
        }
    }
}

impl ImpactThresholds {
    pub fn classify(&self, max_vm_diff_pct: f64) -> ImpactSeverity {
        if max_vm_diff_pct < self.minimal_below_pct {
            ImpactSeverity::Minimal
        } else if max_vm_diff_pct < self.minor_below_pct {
            ImpactSeverity::Minor
        } else if max_vm_diff_pct < self.moderate_below_pct {
            ImpactSeverity::Moderate
        } else {
            ImpactSeverity::Severe
        }
    }
}

/// Agreement grade between an estimate and an independent load flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl AgreementQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

/// Voltage deviation bands of the agreement grade, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgreementThresholds {
    pub excellent_below_pct: f64,
    pub good_below_pct: f64,
    pub fair_below_pct: f64,
}

impl Default for AgreementThresholds {
    fn default() -> Self {
        Self {
            excellent_below_pct: 1.0,
            good_below_pct: 2.0,
            fair_below_pct: 5.0,
        }
    }
}

impl AgreementThresholds {
    pub fn classify(&self, max_vm_diff_pct: f64) -> AgreementQuality {
        if max_vm_diff_pct < self.excellent_below_pct {
            AgreementQuality::Excellent
        } else if max_vm_diff_pct < self.good_below_pct {
            AgreementQuality::Good
        } else if max_vm_diff_pct < self.fair_below_pct {
            AgreementQuality::Fair
        } else {
            AgreementQuality::Poor
        }
    }
}
