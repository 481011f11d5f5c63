//! Observability analysis of a measurement placement.
//!
//! Answers two questions before (or after) an estimation run:
//!
//! * **Can the state be determined at all?** The sensitivity matrix H is
//!   reduced by Gaussian elimination; every column that never yields a
//!   pivot is a state variable the measurement set says nothing about,
//!   and the bus owning that variable is unobservable.
//! * **How fragile is the placement?** Per-bus redundancy counts the
//!   active measurements that actually constrain a bus's variables. A
//!   bus held by exactly one measurement is critically observable: lose
//!   that one sensor and the bus goes dark.
//!
//! The analysis deliberately works on the same gradient rows the WLS
//! iteration uses, so a `SingularGain` outcome and a rank deficit here
//! agree on which buses are the problem.

use crate::jacobian::MeasurementModel;
use crate::measurement::MeasurementSet;
use crate::state::StateVector;
use gse_core::{BusId, GseResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gradient entries below this are treated as structurally zero.
const GRADIENT_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityReport {
    /// Rank of H equals the number of state variables
    pub observable: bool,
    pub rank: usize,
    pub n_state_vars: usize,
    /// Buses owning at least one pivotless column, sorted
    pub unobservable_buses: Vec<BusId>,
    /// Buses constrained by exactly one active measurement, sorted
    pub critically_observable_buses: Vec<BusId>,
    /// Active measurements constraining each bus's variables
    pub redundancy: BTreeMap<BusId, usize>,
}

impl ObservabilityReport {
    pub fn rank_deficit(&self) -> usize {
        self.n_state_vars - self.rank
    }
}

/// Map the elimination columns back to buses: the first `n_bus - 1`
/// columns are the non-slack angles in sorted bus order, the rest are
/// the magnitudes of all buses in the same order.
fn column_owners(model: &MeasurementModel) -> Vec<BusId> {
    let bus_ids = model.ybus().bus_ids();
    let slack = model.slack();
    let mut owners: Vec<BusId> = bus_ids.iter().copied().filter(|&b| b != slack).collect();
    owners.extend(bus_ids.iter().copied());
    owners
}

/// Analyze the active measurement set at `state`.
///
/// Unlike the estimator this never fails on an underdetermined set; a
/// placement with too few measurements simply reports the deficit.
pub fn analyze(
    model: &MeasurementModel,
    state: &StateVector,
    measurements: &MeasurementSet,
) -> GseResult<ObservabilityReport> {
    let n = model.n_state_vars();
    let owners = column_owners(model);
    debug_assert_eq!(owners.len(), n);

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(measurements.active_count());
    for m in measurements.active() {
        let (_, row) = model.evaluate(m, state)?;
        rows.push(row);
    }

    // Per-bus redundancy from the raw gradient rows
    let mut redundancy: BTreeMap<BusId, usize> = BTreeMap::new();
    for &bus in model.ybus().bus_ids() {
        redundancy.insert(bus, 0);
    }
    for row in &rows {
        let mut touched: Vec<BusId> = Vec::new();
        for (col, &v) in row.iter().enumerate() {
            if v.abs() > GRADIENT_EPS && !touched.contains(&owners[col]) {
                touched.push(owners[col]);
            }
        }
        for bus in touched {
            *redundancy.entry(bus).or_insert(0) += 1;
        }
    }

    // Column-by-column elimination with partial pivoting; a column with
    // no usable pivot is an undetermined state variable
    let mut pivot_row = 0;
    let mut rank = 0;
    let mut dark_buses: Vec<BusId> = Vec::new();
    for col in 0..n {
        let mut best = pivot_row;
        let mut best_abs = 0.0;
        for r in pivot_row..rows.len() {
            let abs = rows[r][col].abs();
            if abs > best_abs {
                best_abs = abs;
                best = r;
            }
        }
        if best_abs < GRADIENT_EPS {
            if !dark_buses.contains(&owners[col]) {
                dark_buses.push(owners[col]);
            }
            continue;
        }
        rows.swap(pivot_row, best);
        let pivot = rows[pivot_row][col];
        for r in (pivot_row + 1)..rows.len() {
            let factor = rows[r][col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                let sub = factor * rows[pivot_row][c];
                rows[r][c] -= sub;
            }
        }
        pivot_row += 1;
        rank += 1;
    }
    dark_buses.sort();

    let critical: Vec<BusId> = redundancy
        .iter()
        .filter(|(_, &count)| count == 1)
        .map(|(&bus, _)| bus)
        .collect();

    Ok(ObservabilityReport {
        observable: rank == n,
        rank,
        n_state_vars: n,
        unobservable_buses: dark_buses,
        critically_observable_buses: critical,
        redundancy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{MeasurementKind, MeasurementLocation};
    use crate::state::StateVector;
    use crate::test_utils::{measurements_from_state, nine_bus_network, reference_state};

    #[test]
    fn test_full_placement_is_observable() {
        let network = nine_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let truth = reference_state(&network);
        let set = measurements_from_state(&network, &truth, &[]);
        let state = StateVector::flat_start(&network).unwrap();

        let report = analyze(&model, &state, &set).unwrap();
        assert!(report.observable, "rank {}/{}", report.rank, report.n_state_vars);
        assert!(report.unobservable_buses.is_empty());
        for (&bus, &count) in &report.redundancy {
            assert!(count >= 2, "bus {bus} redundancy {count}");
        }
    }

    #[test]
    fn test_stripping_a_corner_goes_dark() {
        let network = nine_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let truth = reference_state(&network);
        let set = measurements_from_state(&network, &truth, &[BusId::new(9)]);
        let state = StateVector::flat_start(&network).unwrap();

        let report = analyze(&model, &state, &set).unwrap();
        assert!(!report.observable);
        assert!(report.rank_deficit() >= 1);
        assert!(report.unobservable_buses.contains(&BusId::new(9)));
    }

    #[test]
    fn test_empty_set_reports_everything_dark() {
        let network = nine_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let state = StateVector::flat_start(&network).unwrap();
        let set = MeasurementSet::new();

        let report = analyze(&model, &state, &set).unwrap();
        assert_eq!(report.rank, 0);
        assert_eq!(report.unobservable_buses.len(), 9);
        assert!(report.redundancy.values().all(|&c| c == 0));
    }

    #[test]
    fn test_single_measurement_bus_is_critical() {
        let network = nine_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let truth = reference_state(&network);
        let state = StateVector::flat_start(&network).unwrap();

        // One voltage measurement only: its bus has redundancy 1
        let mut set = MeasurementSet::new();
        set.add(
            MeasurementKind::VoltageMagnitude,
            MeasurementLocation::Bus(BusId::new(3)),
            truth.voltage(BusId::new(3)).unwrap(),
            0.01,
        )
        .unwrap();

        let report = analyze(&model, &state, &set).unwrap();
        assert_eq!(report.redundancy[&BusId::new(3)], 1);
        assert!(report
            .critically_observable_buses
            .contains(&BusId::new(3)));
    }
}
