//! # gse-core: Network Model for Grid State Estimation
//!
//! Provides the data structures the state estimation engine consumes: a
//! graph-based network model, type-safe element IDs, unit newtypes, the
//! unified error type, and the dense linear-system seam used by the
//! normal-equations solve.
//!
//! ## Design Philosophy
//!
//! Networks are modeled as **undirected multigraphs** where:
//! - **Nodes**: Buses, Generators, Loads, Shunts
//! - **Edges**: Branches (transmission lines; transformers are branches with
//!   a tap ratio and phase shift)
//!
//! This graph-based approach enables:
//! - Fast topological queries (which branches touch a bus)
//! - Type-safe element access with newtype IDs
//! - Support for parallel branches between the same pair of buses
//!
//! The estimator itself never mutates a `Network`; topology editing and
//! persistence belong to external collaborators.
//!
//! ## Slack Bus
//!
//! AC power-flow equations are invariant under a global angle rotation, so
//! one bus angle must be pinned to zero. The network carries a declared
//! slack bus; if none is declared, the first generator bus is used. An
//! estimation run over a network with no resolvable slack bus is a
//! configuration error.
//!
//! ## Modules
//!
//! - [`error`] - Unified [`GseError`] and [`GseResult`]
//! - [`solver`] - [`LinearSystemBackend`] with Gauss and faer LU backends
//! - [`units`] - Zero-cost unit newtypes (MW, Mvar, pu, rad, ...)

use petgraph::{prelude::*, Undirected};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod solver;
pub mod units;

pub use error::{GseError, GseResult};
pub use petgraph::graph::NodeIndex;
pub use solver::{FaerSolver, GaussSolver, LinearSystemBackend, SolveError, SolverKind};
pub use units::{Degrees, Kilovolts, Megavars, Megawatts, PerUnit, Radians};

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShuntId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(usize);

macro_rules! impl_id {
    ($type:ty) => {
        impl $type {
            #[inline]
            pub fn new(value: usize) -> Self {
                Self(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

impl_id!(BusId);
impl_id!(BranchId);
impl_id!(GenId);
impl_id!(LoadId);
impl_id!(ShuntId);
impl_id!(MeasurementId);

/// Electrical bus (node of the transmission network)
#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    /// Base voltage in kilovolts (for per-unit conversions)
    pub base_kv: Kilovolts,
    /// Voltage magnitude in per-unit (initial/nominal value)
    pub voltage_pu: PerUnit,
    /// Voltage angle in radians (initial/nominal value)
    pub angle_rad: Radians,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            id: BusId(0),
            name: String::new(),
            base_kv: Kilovolts(0.0),
            voltage_pu: PerUnit(1.0),
            angle_rad: Radians(0.0),
        }
    }
}

/// Transmission branch (line or transformer)
#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    /// Series resistance (per-unit)
    pub resistance: f64,
    /// Series reactance (per-unit)
    pub reactance: f64,
    /// Multiplicative tap magnitude applied from from_bus to to_bus
    pub tap_ratio: f64,
    /// Phase shift applied from from_bus to to_bus
    pub phase_shift: Radians,
    /// Total line charging susceptance (per-unit, split half/half)
    pub charging_b: PerUnit,
    /// Operational status flag
    pub status: bool,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            id: BranchId(0),
            name: String::new(),
            from_bus: BusId(0),
            to_bus: BusId(0),
            resistance: 0.0,
            reactance: 0.0,
            tap_ratio: 1.0,
            phase_shift: Radians(0.0),
            charging_b: PerUnit(0.0),
            status: true,
        }
    }
}

impl Branch {
    /// Construct a branch from its series impedance, other parameters default.
    pub fn new(
        id: BranchId,
        name: String,
        from_bus: BusId,
        to_bus: BusId,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        Self {
            id,
            name,
            from_bus,
            to_bus,
            resistance,
            reactance,
            ..Self::default()
        }
    }
}

/// Generator attached to a bus
#[derive(Debug, Clone)]
pub struct Gen {
    pub id: GenId,
    pub name: String,
    pub bus: BusId,
    /// Active power output (MW)
    pub active_power: Megawatts,
    /// Reactive power output (Mvar)
    pub reactive_power: Megavars,
    /// In-service status
    pub status: bool,
    /// Voltage setpoint (per-unit)
    pub voltage_setpoint: Option<PerUnit>,
}

impl Gen {
    pub fn new(id: GenId, name: String, bus: BusId) -> Self {
        Self {
            id,
            name,
            bus,
            active_power: Megawatts(0.0),
            reactive_power: Megavars(0.0),
            status: true,
            voltage_setpoint: None,
        }
    }

    pub fn with_output(mut self, p_mw: f64, q_mvar: f64) -> Self {
        self.active_power = Megawatts(p_mw);
        self.reactive_power = Megavars(q_mvar);
        self
    }
}

/// Load attached to a bus
#[derive(Debug, Clone)]
pub struct Load {
    pub id: LoadId,
    pub name: String,
    pub bus: BusId,
    /// Active power demand (MW)
    pub active_power: Megawatts,
    /// Reactive power demand (Mvar)
    pub reactive_power: Megavars,
}

/// Shunt element (capacitor or reactor) connected to a bus
///
/// The Y-bus includes shunt admittance as diagonal elements:
/// Y_ii += gs + j*bs
#[derive(Debug, Clone)]
pub struct Shunt {
    pub id: ShuntId,
    pub name: String,
    pub bus: BusId,
    /// Shunt conductance in per-unit
    pub gs_pu: f64,
    /// Shunt susceptance in per-unit (positive = capacitor, negative = reactor)
    pub bs_pu: f64,
    /// In-service status
    pub status: bool,
}

impl Default for Shunt {
    fn default() -> Self {
        Self {
            id: ShuntId(0),
            name: String::new(),
            bus: BusId(0),
            gs_pu: 0.0,
            bs_pu: 0.0,
            status: true,
        }
    }
}

// Enum to represent different types of nodes in the graph
#[derive(Debug, Clone)]
pub enum Node {
    Bus(Bus),
    Gen(Gen),
    Load(Load),
    Shunt(Shunt),
}

// Enum to represent different types of edges in the graph.
// Transformers are branches with tap_ratio != 1 or a non-zero phase shift.
#[derive(Debug, Clone)]
pub enum Edge {
    Branch(Branch),
}

/// The core power network graph
///
/// The physical grid is represented as a graph where buses, generators, and
/// loads are nodes, while branches are edges. This keeps topology explicit
/// for the structural observability checks.
#[derive(Debug, Default)]
pub struct Network {
    pub graph: Graph<Node, Edge, Undirected>,
    /// Declared slack (angle reference) bus, if any
    pub slack: Option<BusId>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            graph: Graph::new_undirected(),
            slack: None,
        }
    }

    /// Declare the slack bus explicitly.
    pub fn with_slack_bus(mut self, bus: BusId) -> Self {
        self.slack = Some(bus);
        self
    }

    /// Resolve the slack bus: the declared one if set, otherwise the bus of
    /// the first in-service generator. `None` means the network cannot anchor
    /// an angle reference and estimation must be rejected.
    pub fn slack_bus(&self) -> Option<BusId> {
        if self.slack.is_some() {
            return self.slack;
        }
        self.graph.node_weights().find_map(|node| match node {
            Node::Gen(gen) if gen.status => Some(gen.bus),
            _ => None,
        })
    }

    /// Iterate all buses in graph order.
    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.graph.node_weights().filter_map(|node| match node {
            Node::Bus(bus) => Some(bus),
            _ => None,
        })
    }

    /// Iterate all in-service branches.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.graph.edge_weights().filter_map(|edge| {
            let Edge::Branch(branch) = edge;
            branch.status.then_some(branch)
        })
    }

    /// Bus IDs sorted ascending (the canonical state-vector ordering).
    pub fn bus_ids(&self) -> Vec<BusId> {
        let mut ids: Vec<BusId> = self.buses().map(|b| b.id).collect();
        ids.sort();
        ids
    }

    /// Compute basic statistics about the network
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();

        for node in self.graph.node_weights() {
            match node {
                Node::Bus(_) => stats.num_buses += 1,
                Node::Gen(g) => {
                    stats.num_gens += 1;
                    stats.total_gen_mw += g.active_power.value();
                }
                Node::Load(l) => {
                    stats.num_loads += 1;
                    stats.total_load_mw += l.active_power.value();
                    stats.total_load_mvar += l.reactive_power.value();
                }
                Node::Shunt(_) => stats.num_shunts += 1,
            }
        }

        stats.num_branches = self.graph.edge_count();
        stats
    }
}

/// Network statistics summary
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_branches: usize,
    pub num_gens: usize,
    pub num_loads: usize,
    pub num_shunts: usize,
    pub total_gen_mw: f64,
    pub total_load_mw: f64,
    pub total_load_mvar: f64,
}
