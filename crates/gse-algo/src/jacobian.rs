//! Measurement model and sensitivity (Jacobian) builder.
//!
//! For every active measurement the model provides two pure functions of
//! the state: the predicted value `h_i(x)` and its gradient row
//! `∂h_i/∂x` over the state variables. Stacking the rows of the active set
//! gives the sensitivity matrix H used by the WLS iteration:
//!
//! ```text
//! G = HᵀWH            (gain matrix)
//! G·Δx = HᵀW·(z - h)  (normal equations)
//! ```
//!
//! Measurement kinds are a tagged variant, not a class hierarchy: the match
//! in [`MeasurementModel::evaluate`] selects the `(predicted, gradient)`
//! pair per kind, which keeps the model extensible without subclassing.
//!
//! Outaged measurements contribute *no* rows here - not zero-weighted
//! rows - so they cannot degrade the conditioning of the gain matrix.
//!
//! Flow expressions follow the standard branch pi-model with off-nominal
//! tap on the from side (Abur & Expósito, "Power System State Estimation",
//! ch. 2). Parallel branches between the same ordered pair are aggregated:
//! a flow sensor on such a corridor reads the total transfer.

use crate::measurement::{Measurement, MeasurementKind, MeasurementLocation, MeasurementSet};
use crate::state::StateVector;
use crate::ybus::AdmittanceMatrix;
use gse_core::{BusId, GseError, GseResult, Network};
use num_complex::Complex64;
use std::collections::HashMap;

/// One directed branch terminal, precomputed for flow evaluation.
///
/// `a_g`/`a_b` scale the self term, `c` the mutual term, `delta` is the
/// effective phase shift seen from the measuring end.
#[derive(Debug, Clone, Copy)]
struct FlowTerminal {
    other: BusId,
    a_g: f64,
    a_b: f64,
    c: f64,
    g: f64,
    b: f64,
    delta: f64,
}

/// Holds the admittance structure and per-branch flow terms for a network.
///
/// Construction is per-network, evaluation is per-(state, measurement set);
/// nothing here is mutated by an estimation run, so one model can serve
/// many concurrent scenarios.
#[derive(Debug, Clone)]
pub struct MeasurementModel {
    ybus: AdmittanceMatrix,
    slack: BusId,
    /// Column of each non-slack bus angle variable
    angle_col: HashMap<BusId, usize>,
    /// Directed flow terminals keyed by (measuring bus, far bus)
    flow_terms: HashMap<(BusId, BusId), Vec<FlowTerminal>>,
    n_state: usize,
}

impl MeasurementModel {
    pub fn from_network(network: &Network) -> GseResult<Self> {
        let ybus = AdmittanceMatrix::from_network(network)
            .map_err(|e| GseError::Network(e.to_string()))?;
        let slack = network
            .slack_bus()
            .ok_or_else(|| GseError::Config("network has no slack bus".into()))?;

        let mut angle_col = HashMap::new();
        let mut col = 0;
        for &bus in ybus.bus_ids() {
            if bus != slack {
                angle_col.insert(bus, col);
                col += 1;
            }
        }
        let n_bus = ybus.n_bus();
        let n_state = 2 * n_bus - 1;

        let mut flow_terms: HashMap<(BusId, BusId), Vec<FlowTerminal>> = HashMap::new();
        for branch in network.branches() {
            let z = Complex64::new(branch.resistance, branch.reactance);
            if z.norm() < 1e-12 {
                continue; // already rejected by the Y-bus build
            }
            let y = z.inv();
            let (g, b) = (y.re, y.im);
            let b_half = branch.charging_b.value() / 2.0;
            let tau = if branch.tap_ratio > 0.0 {
                branch.tap_ratio
            } else {
                1.0
            };
            let phi = branch.phase_shift.value();

            // From side: self admittance scaled by 1/tau^2
            flow_terms
                .entry((branch.from_bus, branch.to_bus))
                .or_default()
                .push(FlowTerminal {
                    other: branch.to_bus,
                    a_g: g / (tau * tau),
                    a_b: (b + b_half) / (tau * tau),
                    c: 1.0 / tau,
                    g,
                    b,
                    delta: phi,
                });
            // To side: nominal self admittance, mirrored shift
            flow_terms
                .entry((branch.to_bus, branch.from_bus))
                .or_default()
                .push(FlowTerminal {
                    other: branch.from_bus,
                    a_g: g,
                    a_b: b + b_half,
                    c: 1.0 / tau,
                    g,
                    b,
                    delta: -phi,
                });
        }

        Ok(Self {
            ybus,
            slack,
            angle_col,
            flow_terms,
            n_state,
        })
    }

    pub fn n_state_vars(&self) -> usize {
        self.n_state
    }

    pub fn slack(&self) -> BusId {
        self.slack
    }

    pub fn ybus(&self) -> &AdmittanceMatrix {
        &self.ybus
    }

    fn vm_col(&self, bus_pos: usize) -> usize {
        self.ybus.n_bus() - 1 + bus_pos
    }

    /// Add `value` to the gradient entry of the angle variable of `bus`,
    /// skipping the slack bus (whose angle is not a variable).
    fn add_angle(&self, row: &mut [f64], bus: BusId, value: f64) {
        if let Some(&col) = self.angle_col.get(&bus) {
            row[col] += value;
        }
    }

    /// Predicted value and gradient row of one measurement at `state`.
    pub fn evaluate(&self, m: &Measurement, state: &StateVector) -> GseResult<(f64, Vec<f64>)> {
        let mut row = vec![0.0; self.n_state];
        let predicted = match (m.kind, m.location) {
            (MeasurementKind::VoltageMagnitude, MeasurementLocation::Bus(bus)) => {
                let pos = self.bus_pos(bus)?;
                row[self.vm_col(pos)] = 1.0;
                state.voltages()[pos]
            }
            (MeasurementKind::RealInjection, MeasurementLocation::Bus(bus)) => {
                self.injection(bus, state, true, &mut row)?
            }
            (MeasurementKind::ReactiveInjection, MeasurementLocation::Bus(bus)) => {
                self.injection(bus, state, false, &mut row)?
            }
            (MeasurementKind::RealFlow, MeasurementLocation::Branch { from, to }) => {
                self.flow(from, to, state, true, &mut row)?
            }
            (MeasurementKind::ReactiveFlow, MeasurementLocation::Branch { from, to }) => {
                self.flow(from, to, state, false, &mut row)?
            }
            (kind, location) => {
                return Err(GseError::Validation(format!(
                    "measurement {} has kind {} with incompatible location {:?}",
                    m.id,
                    kind.as_str(),
                    location
                )))
            }
        };
        Ok((predicted, row))
    }

    fn bus_pos(&self, bus: BusId) -> GseResult<usize> {
        self.ybus
            .bus_position(bus)
            .ok_or_else(|| GseError::Validation(format!("measurement references unknown bus {bus}")))
    }

    /// Net injection P_i or Q_i and its gradient, via one Y-bus row sweep.
    fn injection(
        &self,
        bus: BusId,
        state: &StateVector,
        real: bool,
        row: &mut [f64],
    ) -> GseResult<f64> {
        let i = self.bus_pos(bus)?;
        let vm = state.voltages();
        let va = state.angles();
        let vm_i = vm[i];

        // Accumulate P_i and Q_i together; both appear in the diagonal
        // gradient terms regardless of which one is measured.
        let mut p_i = 0.0;
        let mut q_i = 0.0;
        let mut g_ii = 0.0;
        let mut b_ii = 0.0;

        for (j, y_ij) in self.ybus.row_iter(i) {
            let (g, b) = (y_ij.re, y_ij.im);
            let theta = va[i] - va[j];
            let (sin_t, cos_t) = theta.sin_cos();
            p_i += vm_i * vm[j] * (g * cos_t + b * sin_t);
            q_i += vm_i * vm[j] * (g * sin_t - b * cos_t);

            if j == i {
                g_ii = g;
                b_ii = b;
                continue;
            }

            let bus_j = self.ybus.bus_ids()[j];
            if real {
                self.add_angle(row, bus_j, vm_i * vm[j] * (g * sin_t - b * cos_t));
                row[self.vm_col(j)] += vm_i * (g * cos_t + b * sin_t);
            } else {
                self.add_angle(row, bus_j, -vm_i * vm[j] * (g * cos_t + b * sin_t));
                row[self.vm_col(j)] += vm_i * (g * sin_t - b * cos_t);
            }
        }

        if real {
            self.add_angle(row, bus, -q_i - b_ii * vm_i * vm_i);
            row[self.vm_col(i)] += p_i / vm_i + g_ii * vm_i;
            Ok(p_i)
        } else {
            self.add_angle(row, bus, p_i - g_ii * vm_i * vm_i);
            row[self.vm_col(i)] += q_i / vm_i - b_ii * vm_i;
            Ok(q_i)
        }
    }

    /// Branch flow P or Q measured at `from` towards `to`, summed over
    /// parallel branches on that ordered corridor.
    fn flow(
        &self,
        from: BusId,
        to: BusId,
        state: &StateVector,
        real: bool,
        row: &mut [f64],
    ) -> GseResult<f64> {
        let terminals = self.flow_terms.get(&(from, to)).ok_or_else(|| {
            GseError::Validation(format!(
                "no in-service branch between buses {from} and {to} for flow measurement"
            ))
        })?;

        let m = self.bus_pos(from)?;
        let o = self.bus_pos(to)?;
        let vm = state.voltages();
        let va = state.angles();
        let (vm_m, vm_o) = (vm[m], vm[o]);

        let mut total = 0.0;
        for t in terminals {
            debug_assert_eq!(t.other, to);
            let theta = va[m] - va[o] - t.delta;
            let (sin_t, cos_t) = theta.sin_cos();
            let mutual_p = t.c * (t.g * cos_t + t.b * sin_t);
            let mutual_q = t.c * (t.g * sin_t - t.b * cos_t);

            if real {
                total += vm_m * vm_m * t.a_g - vm_m * vm_o * mutual_p;
                self.add_angle(row, from, vm_m * vm_o * mutual_q);
                self.add_angle(row, to, -vm_m * vm_o * mutual_q);
                row[self.vm_col(m)] += 2.0 * vm_m * t.a_g - vm_o * mutual_p;
                row[self.vm_col(o)] += -vm_m * mutual_p;
            } else {
                total += -vm_m * vm_m * t.a_b - vm_m * vm_o * mutual_q;
                self.add_angle(row, from, -vm_m * vm_o * mutual_p);
                self.add_angle(row, to, vm_m * vm_o * mutual_p);
                row[self.vm_col(m)] += -2.0 * vm_m * t.a_b - vm_o * mutual_q;
                row[self.vm_col(o)] += -vm_m * mutual_q;
            }
        }
        Ok(total)
    }

    /// Linearize the active measurement set at `state`.
    ///
    /// Fails fast with a configuration error when the active count cannot
    /// determine the state (fewer equations than unknowns).
    pub fn linearize(
        &self,
        state: &StateVector,
        measurements: &MeasurementSet,
    ) -> GseResult<JacobianSystem> {
        let active = measurements.active_count();
        if active < self.n_state {
            return Err(GseError::Config(format!(
                "{} active measurements cannot determine {} state variables",
                active, self.n_state
            )));
        }

        let mut system = JacobianSystem {
            rows: Vec::with_capacity(active),
            weights: Vec::with_capacity(active),
            std_devs: Vec::with_capacity(active),
            observed: Vec::with_capacity(active),
            predicted: Vec::with_capacity(active),
            measurement_ids: Vec::with_capacity(active),
            n_state: self.n_state,
        };

        for m in measurements.active() {
            let (predicted, row) = self.evaluate(m, state)?;
            system.rows.push(row);
            system.weights.push(m.weight());
            system.std_devs.push(m.std_dev);
            system.observed.push(m.value);
            system.predicted.push(predicted);
            system.measurement_ids.push(m.id);
        }

        Ok(system)
    }
}

/// The linearized system at one state: H, W, z, h(x).
#[derive(Debug, Clone)]
pub struct JacobianSystem {
    /// Sensitivity rows, one per active measurement
    pub rows: Vec<Vec<f64>>,
    /// Diagonal of W = diag(1/σ²)
    pub weights: Vec<f64>,
    /// Per-row measurement standard deviations
    pub std_devs: Vec<f64>,
    /// Measured values z
    pub observed: Vec<f64>,
    /// Predicted values h(x)
    pub predicted: Vec<f64>,
    /// Id of the measurement behind each row
    pub measurement_ids: Vec<gse_core::MeasurementId>,
    pub n_state: usize,
}

impl JacobianSystem {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Residual vector r = z - h(x).
    pub fn residuals(&self) -> Vec<f64> {
        self.observed
            .iter()
            .zip(&self.predicted)
            .map(|(z, h)| z - h)
            .collect()
    }

    /// Gain matrix G = HᵀWH (dense, symmetric).
    pub fn gain_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.n_state;
        let mut gain = vec![vec![0.0; n]; n];
        for (row, &w) in self.rows.iter().zip(&self.weights) {
            for (i, &h_i) in row.iter().enumerate() {
                if h_i == 0.0 {
                    continue;
                }
                let wh_i = w * h_i;
                for (j, &h_j) in row.iter().enumerate() {
                    gain[i][j] += wh_i * h_j;
                }
            }
        }
        gain
    }

    /// Right-hand side HᵀW·r.
    pub fn weighted_rhs(&self, residuals: &[f64]) -> Vec<f64> {
        let mut rhs = vec![0.0; self.n_state];
        for ((row, &w), &r) in self.rows.iter().zip(&self.weights).zip(residuals) {
            for (i, &h_i) in row.iter().enumerate() {
                rhs[i] += h_i * w * r;
            }
        }
        rhs
    }

    /// Weighted sum of squared residuals rᵀWr (the WLS objective).
    pub fn objective(&self, residuals: &[f64]) -> f64 {
        residuals
            .iter()
            .zip(&self.weights)
            .map(|(r, w)| w * r * r)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{MeasurementKind, MeasurementLocation, MeasurementSet};
    use crate::test_utils::{nine_bus_network, two_bus_network};
    use gse_core::BusId;

    /// Compare the analytic gradient row against central finite differences.
    fn check_gradient(m: &Measurement, network: &Network) {
        let model = MeasurementModel::from_network(network).unwrap();
        let mut state = StateVector::flat_start(network).unwrap();
        // Perturb off the flat start so trigonometric terms are non-trivial
        for (k, &bus) in state.bus_ids().to_vec().iter().enumerate() {
            state.set_voltage(bus, 1.0 + 0.01 * (k as f64 + 1.0));
            if bus != state.slack() {
                state.set_angle(bus, -0.02 * (k as f64 + 1.0));
            }
        }

        let (_, grad) = model.evaluate(m, &state).unwrap();
        let eps = 1e-7;
        for col in 0..model.n_state_vars() {
            let mut plus = vec![0.0; model.n_state_vars()];
            plus[col] = eps;
            let mut s_plus = state.clone();
            s_plus.apply_correction(&plus).unwrap();
            let mut minus = vec![0.0; model.n_state_vars()];
            minus[col] = -eps;
            let mut s_minus = state.clone();
            s_minus.apply_correction(&minus).unwrap();

            let (h_plus, _) = model.evaluate(m, &s_plus).unwrap();
            let (h_minus, _) = model.evaluate(m, &s_minus).unwrap();
            let numeric = (h_plus - h_minus) / (2.0 * eps);
            assert!(
                (grad[col] - numeric).abs() < 1e-5,
                "{:?} gradient mismatch at col {}: analytic={}, numeric={}",
                m.kind,
                col,
                grad[col],
                numeric
            );
        }
    }

    fn measurement(kind: MeasurementKind, location: MeasurementLocation) -> Measurement {
        Measurement {
            id: gse_core::MeasurementId::new(0),
            kind,
            location,
            value: 0.0,
            std_dev: 0.01,
            active: true,
        }
    }

    #[test]
    fn test_voltage_gradient() {
        let network = two_bus_network();
        check_gradient(
            &measurement(
                MeasurementKind::VoltageMagnitude,
                MeasurementLocation::Bus(BusId::new(2)),
            ),
            &network,
        );
    }

    #[test]
    fn test_injection_gradients() {
        let network = nine_bus_network();
        for kind in [
            MeasurementKind::RealInjection,
            MeasurementKind::ReactiveInjection,
        ] {
            check_gradient(
                &measurement(kind, MeasurementLocation::Bus(BusId::new(5))),
                &network,
            );
        }
    }

    #[test]
    fn test_flow_gradients_both_directions() {
        let network = nine_bus_network();
        for kind in [MeasurementKind::RealFlow, MeasurementKind::ReactiveFlow] {
            check_gradient(
                &measurement(
                    kind,
                    MeasurementLocation::Branch {
                        from: BusId::new(4),
                        to: BusId::new(5),
                    },
                ),
                &network,
            );
            check_gradient(
                &measurement(
                    kind,
                    MeasurementLocation::Branch {
                        from: BusId::new(5),
                        to: BusId::new(4),
                    },
                ),
                &network,
            );
        }
    }

    #[test]
    fn test_too_few_measurements_rejected() {
        let network = two_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let state = StateVector::flat_start(&network).unwrap();
        let mut set = MeasurementSet::new();
        set.add(
            MeasurementKind::VoltageMagnitude,
            MeasurementLocation::Bus(BusId::new(1)),
            1.0,
            0.01,
        )
        .unwrap();
        // 1 active measurement against 3 state variables
        let err = model.linearize(&state, &set).unwrap_err();
        assert!(err.to_string().contains("Configuration"));
    }

    #[test]
    fn test_outaged_rows_are_absent_not_zero_weighted() {
        let network = two_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let state = StateVector::flat_start(&network).unwrap();
        let mut set = MeasurementSet::new();
        for bus in [1, 2] {
            set.add(
                MeasurementKind::VoltageMagnitude,
                MeasurementLocation::Bus(BusId::new(bus)),
                1.0,
                0.01,
            )
            .unwrap();
        }
        set.add(
            MeasurementKind::RealFlow,
            MeasurementLocation::Branch {
                from: BusId::new(1),
                to: BusId::new(2),
            },
            0.3,
            0.02,
        )
        .unwrap();
        set.add(
            MeasurementKind::ReactiveFlow,
            MeasurementLocation::Branch {
                from: BusId::new(1),
                to: BusId::new(2),
            },
            0.1,
            0.02,
        )
        .unwrap();

        let full = model.linearize(&state, &set).unwrap();
        assert_eq!(full.n_rows(), 4);

        set.deactivate_at_buses(&[BusId::new(2)]);
        // Bus-2 voltage and both flows are gone; only 1 row would remain,
        // which is below the 3-variable threshold
        assert!(model.linearize(&state, &set).is_err());
    }

    #[test]
    fn test_flat_start_flow_is_charging_only() {
        // At flat start all angle differences are zero: real flow is zero
        // for a lossless-symmetric pair, reactive flow sees line charging
        let network = two_bus_network();
        let model = MeasurementModel::from_network(&network).unwrap();
        let state = StateVector::flat_start(&network).unwrap();
        let m = measurement(
            MeasurementKind::RealFlow,
            MeasurementLocation::Branch {
                from: BusId::new(1),
                to: BusId::new(2),
            },
        );
        let (p, _) = model.evaluate(&m, &state).unwrap();
        // vm_m = vm_o = 1, theta = 0: P = g - g = 0
        assert!(p.abs() < 1e-12);
    }
}
