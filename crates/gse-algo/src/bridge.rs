//! Bridge between state estimation and load flow.
//!
//! A converged estimate is an independent check on a load-flow solution
//! and vice versa: both describe the same operating point, one from
//! telemetry and one from the dispatch model. The bridge seeds the
//! load-flow solver with the estimated state (a warm start close to the
//! operating point), then grades how well the two solutions agree.
//!
//! The load-flow engine itself stays behind a trait; any Newton-Raphson
//! or fast-decoupled implementation that can start from a given state
//! plugs in.

use crate::comparison::{compare_states, AgreementQuality, AgreementThresholds, StateComparison};
use crate::state::StateVector;
use crate::wls::Estimate;
use gse_core::{GseError, GseResult, Network};
use serde::{Deserialize, Serialize};

/// A load-flow engine that can start from an arbitrary state.
pub trait LoadFlowSolver: Send + Sync {
    fn solve(&self, network: &Network, initial: &StateVector) -> GseResult<LoadFlowSolution>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFlowSolution {
    pub converged: bool,
    pub iterations: usize,
    pub state: StateVector,
}

/// Outcome of reconciling an estimate with a load flow.
///
/// A diverged load flow is its own outcome, not an error: it usually
/// means the dispatch model and the telemetry describe different
/// networks, which is exactly the condition the bridge exists to catch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconciliation {
    pub load_flow_converged: bool,
    pub load_flow_iterations: usize,
    /// Present only when the load flow converged
    pub comparison: Option<StateComparison>,
    pub quality: Option<AgreementQuality>,
}

impl Reconciliation {
    pub fn agreed(&self) -> bool {
        matches!(
            self.quality,
            Some(AgreementQuality::Excellent) | Some(AgreementQuality::Good)
        )
    }
}

/// Seed the load flow with the estimated state and grade the agreement.
///
/// Requires a converged estimate; reconciling a diverged or singular
/// estimate is a caller bug.
pub fn reconcile(
    network: &Network,
    estimate: &Estimate,
    solver: &dyn LoadFlowSolver,
    thresholds: &AgreementThresholds,
) -> GseResult<Reconciliation> {
    if !estimate.converged() {
        return Err(GseError::Validation(format!(
            "cannot reconcile a non-converged estimate ({})",
            estimate.convergence.status.as_str()
        )));
    }

    let solution = solver.solve(network, &estimate.state)?;
    if !solution.converged {
        return Ok(Reconciliation {
            load_flow_converged: false,
            load_flow_iterations: solution.iterations,
            comparison: None,
            quality: None,
        });
    }

    let comparison = compare_states(&estimate.state, &solution.state)?;
    let quality = thresholds.classify(comparison.max_vm_diff_pct);
    Ok(Reconciliation {
        load_flow_converged: true,
        load_flow_iterations: solution.iterations,
        comparison: Some(comparison),
        quality: Some(quality),
    })
}
