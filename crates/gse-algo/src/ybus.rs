//! Sparse bus admittance matrix for the measurement model.
//!
//! The Y-bus relates nodal current injections to bus voltages:
//! ```text
//! I = Y × V,    Y[i,j] = G[i,j] + jB[i,j]
//! ```
//!
//! Every injection measurement's predicted value and gradient row is a sum
//! over the non-zero entries of one Y-bus row, so the matrix is stored in
//! CSR format (`sprs`) over complex entries and indexed by dense bus
//! positions in sorted-`BusId` order - the same ordering the state vector
//! uses.

use gse_core::{BusId, Network, Node};
use num_complex::Complex64;
use sprs::{CsMat, TriMat};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from admittance matrix construction
#[derive(Debug, Error)]
pub enum AdmittanceError {
    #[error("no buses found in network")]
    NoBuses,

    #[error("branch {0} has zero impedance")]
    ZeroImpedance(String),

    #[error("branch references unknown bus {0}")]
    UnknownBus(usize),
}

/// Sparse complex Y-bus in CSR format with bus index mapping.
#[derive(Debug, Clone)]
pub struct AdmittanceMatrix {
    n_bus: usize,
    y_matrix: CsMat<Complex64>,
    bus_index: HashMap<BusId, usize>,
    bus_ids: Vec<BusId>,
}

impl AdmittanceMatrix {
    /// Build the Y-bus from all in-service branches and shunts.
    pub fn from_network(network: &Network) -> Result<Self, AdmittanceError> {
        let bus_ids = network.bus_ids();
        let n_bus = bus_ids.len();
        if n_bus == 0 {
            return Err(AdmittanceError::NoBuses);
        }
        let bus_index: HashMap<BusId, usize> =
            bus_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut triplets = TriMat::new((n_bus, n_bus));

        for branch in network.branches() {
            let &i = bus_index
                .get(&branch.from_bus)
                .ok_or(AdmittanceError::UnknownBus(branch.from_bus.value()))?;
            let &j = bus_index
                .get(&branch.to_bus)
                .ok_or(AdmittanceError::UnknownBus(branch.to_bus.value()))?;

            // Series admittance y = 1/(r + jx)
            let z = Complex64::new(branch.resistance, branch.reactance);
            if z.norm() < 1e-12 {
                return Err(AdmittanceError::ZeroImpedance(branch.name.clone()));
            }
            let y_series = z.inv();

            let tau = if branch.tap_ratio > 0.0 {
                branch.tap_ratio
            } else {
                1.0
            };
            let shift = Complex64::from_polar(1.0, -branch.phase_shift.value());
            let y_shunt_half = Complex64::new(0.0, branch.charging_b.value() / 2.0);

            // Standard pi-model with off-nominal tap on the from side;
            // the whole from-side shunt arm sits behind the tap
            let y_ii = (y_series + y_shunt_half) / (tau * tau);
            let y_jj = y_series + y_shunt_half;
            let y_ij = -y_series / tau * shift.conj();
            let y_ji = -y_series / tau * shift;

            triplets.add_triplet(i, i, y_ii);
            triplets.add_triplet(j, j, y_jj);
            triplets.add_triplet(i, j, y_ij);
            triplets.add_triplet(j, i, y_ji);
        }

        for node in network.graph.node_weights() {
            if let Node::Shunt(shunt) = node {
                if !shunt.status {
                    continue;
                }
                if let Some(&idx) = bus_index.get(&shunt.bus) {
                    triplets.add_triplet(idx, idx, Complex64::new(shunt.gs_pu, shunt.bs_pu));
                }
            }
        }

        Ok(Self {
            n_bus,
            y_matrix: triplets.to_csr(),
            bus_index,
            bus_ids,
        })
    }

    /// Number of buses
    pub fn n_bus(&self) -> usize {
        self.n_bus
    }

    /// Complex admittance Y[i,j]
    pub fn y(&self, i: usize, j: usize) -> Complex64 {
        self.y_matrix
            .get(i, j)
            .copied()
            .unwrap_or(Complex64::new(0.0, 0.0))
    }

    /// Conductance G[i,j]
    pub fn g(&self, i: usize, j: usize) -> f64 {
        self.y(i, j).re
    }

    /// Susceptance B[i,j]
    pub fn b(&self, i: usize, j: usize) -> f64 {
        self.y(i, j).im
    }

    /// Dense index of a bus, if present
    pub fn bus_position(&self, id: BusId) -> Option<usize> {
        self.bus_index.get(&id).copied()
    }

    /// Bus ID at a dense index
    pub fn bus_id(&self, idx: usize) -> Option<BusId> {
        self.bus_ids.get(idx).copied()
    }

    /// Bus IDs in dense (sorted) order
    pub fn bus_ids(&self) -> &[BusId] {
        &self.bus_ids
    }

    /// Iterate non-zero entries of Y-bus row `i` as `(column, admittance)`.
    ///
    /// Directly walks the CSR arrays; injection model evaluation is a hot
    /// loop over these rows.
    pub fn row_iter(&self, i: usize) -> impl Iterator<Item = (usize, Complex64)> + '_ {
        let indptr = self.y_matrix.indptr();
        let start = indptr.index(i);
        let end = indptr.index(i + 1);
        let indices = &self.y_matrix.indices()[start..end];
        let data = &self.y_matrix.data()[start..end];
        indices.iter().zip(data.iter()).map(|(&j, &v)| (j, v))
    }

    /// Number of structural non-zeros
    pub fn nnz(&self) -> usize {
        self.y_matrix.nnz()
    }
}
