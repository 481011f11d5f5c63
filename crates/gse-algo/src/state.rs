//! The estimator's state vector: per-bus voltage magnitude and angle.
//!
//! State variables are ordered as the angles of every non-slack bus (in
//! sorted-`BusId` order) followed by the magnitudes of every bus. The slack
//! bus angle is not a variable: it is pinned to exactly zero, which removes
//! the rotational ambiguity of the AC power-flow equations.

use gse_core::{BusId, GseError, GseResult, Network};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered mapping bus -> (voltage magnitude pu, voltage angle rad).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    bus_ids: Vec<BusId>,
    #[serde(skip)]
    index: HashMap<BusId, usize>,
    vm: Vec<f64>,
    va: Vec<f64>,
    slack: BusId,
}

impl StateVector {
    /// Flat start: all magnitudes 1.0 pu, all angles 0.
    pub fn flat_start(network: &Network) -> GseResult<Self> {
        let bus_ids = network.bus_ids();
        if bus_ids.is_empty() {
            return Err(GseError::Network("network has no buses".into()));
        }
        let slack = network
            .slack_bus()
            .ok_or_else(|| GseError::Config("network has no slack bus".into()))?;
        if !bus_ids.contains(&slack) {
            return Err(GseError::Config(format!(
                "slack bus {slack} is not a bus of the network"
            )));
        }
        let n = bus_ids.len();
        let index = bus_ids.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        Ok(Self {
            bus_ids,
            index,
            vm: vec![1.0; n],
            va: vec![0.0; n],
            slack,
        })
    }

    /// Number of buses.
    pub fn n_bus(&self) -> usize {
        self.bus_ids.len()
    }

    /// Number of unknown state variables: (n-1) angles + n magnitudes.
    pub fn n_state_vars(&self) -> usize {
        2 * self.bus_ids.len() - 1
    }

    pub fn slack(&self) -> BusId {
        self.slack
    }

    pub fn bus_ids(&self) -> &[BusId] {
        &self.bus_ids
    }

    /// Non-slack buses in state-variable order.
    pub fn non_slack_bus_ids(&self) -> impl Iterator<Item = BusId> + '_ {
        let slack = self.slack;
        self.bus_ids.iter().copied().filter(move |&b| b != slack)
    }

    pub fn position(&self, bus: BusId) -> Option<usize> {
        self.index.get(&bus).copied()
    }

    pub fn voltage(&self, bus: BusId) -> Option<f64> {
        self.position(bus).map(|i| self.vm[i])
    }

    pub fn angle(&self, bus: BusId) -> Option<f64> {
        self.position(bus).map(|i| self.va[i])
    }

    pub fn voltages(&self) -> &[f64] {
        &self.vm
    }

    pub fn angles(&self) -> &[f64] {
        &self.va
    }

    pub fn set_voltage(&mut self, bus: BusId, vm: f64) {
        if let Some(i) = self.position(bus) {
            self.vm[i] = vm;
        }
    }

    pub fn set_angle(&mut self, bus: BusId, va: f64) {
        if let Some(i) = self.position(bus) {
            self.va[i] = va;
        }
    }

    /// Rotate all angles so the slack angle is exactly zero.
    ///
    /// Applied after every Gauss-Newton update and on warm-start intake, so
    /// accumulated floating-point drift can never move the reference.
    pub fn pin_slack(&mut self) {
        let slack_idx = self.index[&self.slack];
        let offset = self.va[slack_idx];
        if offset != 0.0 {
            for a in &mut self.va {
                *a -= offset;
            }
            self.va[slack_idx] = 0.0;
        }
    }

    /// Apply a state correction in state-variable order. Returns max|Δx|.
    pub fn apply_correction(&mut self, delta: &[f64]) -> GseResult<f64> {
        let n = self.bus_ids.len();
        if delta.len() != 2 * n - 1 {
            return Err(GseError::Solver(format!(
                "correction length {} does not match {} state variables",
                delta.len(),
                2 * n - 1
            )));
        }
        let mut max_step: f64 = 0.0;
        let slack = self.slack;
        let mut k = 0;
        for i in 0..n {
            if self.bus_ids[i] == slack {
                continue;
            }
            self.va[i] += delta[k];
            max_step = max_step.max(delta[k].abs());
            k += 1;
        }
        for i in 0..n {
            self.vm[i] += delta[k + i];
            max_step = max_step.max(delta[k + i].abs());
        }
        self.pin_slack();
        Ok(max_step)
    }

    /// True if `other` covers the same buses in the same order (required for
    /// any comparison between two state vectors).
    pub fn same_ordering(&self, other: &StateVector) -> bool {
        self.bus_ids == other.bus_ids
    }

    /// Rebuild the internal index (needed after deserialization, where the
    /// map is skipped).
    pub fn reindex(&mut self) {
        self.index = self
            .bus_ids
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::two_bus_network;

    #[test]
    fn test_flat_start() {
        let network = two_bus_network();
        let state = StateVector::flat_start(&network).unwrap();
        assert_eq!(state.n_bus(), 2);
        assert_eq!(state.n_state_vars(), 3);
        assert!(state.voltages().iter().all(|&v| v == 1.0));
        assert!(state.angles().iter().all(|&a| a == 0.0));
        assert_eq!(state.slack(), BusId::new(1));
    }

    #[test]
    fn test_apply_correction_ordering() {
        let network = two_bus_network();
        let mut state = StateVector::flat_start(&network).unwrap();
        // One angle (bus 2), then two magnitudes (bus 1, bus 2)
        let max_step = state.apply_correction(&[-0.1, 0.01, -0.02]).unwrap();
        assert!((max_step - 0.1).abs() < 1e-12);
        assert_eq!(state.angle(BusId::new(1)), Some(0.0));
        assert!((state.angle(BusId::new(2)).unwrap() + 0.1).abs() < 1e-12);
        assert!((state.voltage(BusId::new(1)).unwrap() - 1.01).abs() < 1e-12);
        assert!((state.voltage(BusId::new(2)).unwrap() - 0.98).abs() < 1e-12);
    }

    #[test]
    fn test_pin_slack_rotates_profile() {
        let network = two_bus_network();
        let mut state = StateVector::flat_start(&network).unwrap();
        state.set_angle(BusId::new(1), 0.05);
        state.set_angle(BusId::new(2), -0.02);
        state.pin_slack();
        assert_eq!(state.angle(BusId::new(1)), Some(0.0));
        assert!((state.angle(BusId::new(2)).unwrap() + 0.07).abs() < 1e-12);
    }

    #[test]
    fn test_correction_length_mismatch() {
        let network = two_bus_network();
        let mut state = StateVector::flat_start(&network).unwrap();
        assert!(state.apply_correction(&[0.0, 0.0]).is_err());
    }
}
