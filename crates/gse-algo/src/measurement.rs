//! Sensor measurements feeding the state estimator.
//!
//! A [`MeasurementSet`] owns every reading: its kind, location, value,
//! standard deviation, and an `active` flag. Outaged sensors are modeled by
//! `active = false` rather than deletion, so the history survives outage
//! scenarios and the same set can be cloned and re-used per scenario.
//!
//! All values are per-unit on the system base: voltage magnitudes in pu,
//! injections and flows in pu MW/Mvar equivalents.

use gse_core::{BusId, GseError, GseResult, MeasurementId};
use serde::{Deserialize, Serialize};

/// What a sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Bus voltage magnitude (pu)
    VoltageMagnitude,
    /// Net real power injection at a bus (pu)
    RealInjection,
    /// Net reactive power injection at a bus (pu)
    ReactiveInjection,
    /// Real power flow on a branch, measured at the from side (pu)
    RealFlow,
    /// Reactive power flow on a branch, measured at the from side (pu)
    ReactiveFlow,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::VoltageMagnitude => "vm",
            MeasurementKind::RealInjection => "p_inj",
            MeasurementKind::ReactiveInjection => "q_inj",
            MeasurementKind::RealFlow => "p_flow",
            MeasurementKind::ReactiveFlow => "q_flow",
        }
    }
}

/// Where a sensor sits: a bus, or an ordered branch terminal pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementLocation {
    Bus(BusId),
    /// Ordered pair: flow is measured at `from`, directed towards `to`.
    Branch { from: BusId, to: BusId },
}

impl MeasurementLocation {
    /// Buses this location touches directly.
    pub fn buses(&self) -> impl Iterator<Item = BusId> {
        match *self {
            MeasurementLocation::Bus(b) => [Some(b), None],
            MeasurementLocation::Branch { from, to } => [Some(from), Some(to)],
        }
        .into_iter()
        .flatten()
    }
}

/// A single sensor reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub kind: MeasurementKind,
    pub location: MeasurementLocation,
    pub value: f64,
    /// Standard deviation of the sensor noise; strictly positive.
    pub std_dev: f64,
    /// False when the sensor is outaged.
    pub active: bool,
}

impl Measurement {
    /// WLS weight = 1/variance.
    pub fn weight(&self) -> f64 {
        1.0 / (self.std_dev * self.std_dev)
    }
}

/// The mutable collection of sensor readings fed into estimation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeasurementSet {
    measurements: Vec<Measurement>,
    next_id: usize,
}

impl MeasurementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a measurement, rejecting non-positive standard deviations
    /// (a zero-variance reading would carry infinite weight).
    pub fn add(
        &mut self,
        kind: MeasurementKind,
        location: MeasurementLocation,
        value: f64,
        std_dev: f64,
    ) -> GseResult<MeasurementId> {
        if !(std_dev > 0.0) || !std_dev.is_finite() {
            return Err(GseError::Config(format!(
                "measurement std_dev must be a positive finite number, got {std_dev}"
            )));
        }
        let id = MeasurementId::new(self.next_id);
        self.next_id += 1;
        self.measurements.push(Measurement {
            id,
            kind,
            location,
            value,
            std_dev,
            active: true,
        });
        Ok(id)
    }

    /// Deactivate every measurement located at (or touching) any of the
    /// given buses. Returns how many were newly deactivated.
    pub fn deactivate_at_buses(&mut self, buses: &[BusId]) -> usize {
        let mut hit = 0;
        for m in &mut self.measurements {
            if m.active && m.location.buses().any(|b| buses.contains(&b)) {
                m.active = false;
                hit += 1;
            }
        }
        hit
    }

    /// Reactivate a measurement by id. Returns false if the id is unknown.
    pub fn reactivate(&mut self, id: MeasurementId) -> bool {
        match self.measurements.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.active = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MeasurementId) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.id == id)
    }

    /// All measurements, outaged included.
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter()
    }

    /// Only the active measurements - the rows the Jacobian builder sees.
    pub fn active(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter().filter(|m| m.active)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.measurements.iter().filter(|m| m.active).count()
    }
}
