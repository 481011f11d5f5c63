//! Shared fixtures for the estimation tests.
//!
//! Two reference networks plus measurement synthesis: given a reference
//! state, each helper evaluates the measurement model at that state and
//! records the exact predicted value. An estimator fed such a set must
//! recover the reference state up to the convergence tolerance, which
//! makes the fixtures usable as ground truth.

use crate::jacobian::MeasurementModel;
use crate::measurement::{Measurement, MeasurementKind, MeasurementLocation, MeasurementSet};
use crate::state::StateVector;
use gse_core::{
    Branch, BranchId, Bus, BusId, Edge, Gen, GenId, Kilovolts, Network, Node,
};
use std::collections::HashSet;

fn add_bus(network: &mut Network, id: usize) -> petgraph::graph::NodeIndex {
    network.graph.add_node(Node::Bus(Bus {
        id: BusId::new(id),
        name: format!("Bus{id}"),
        base_kv: Kilovolts(138.0),
        ..Bus::default()
    }))
}

fn add_line(
    network: &mut Network,
    idx: &[petgraph::graph::NodeIndex],
    branch_id: usize,
    from: usize,
    to: usize,
    r: f64,
    x: f64,
    charging: f64,
) {
    let mut branch = Branch::new(
        BranchId::new(branch_id),
        format!("Line{from}-{to}"),
        BusId::new(from),
        BusId::new(to),
        r,
        x,
    );
    branch.charging_b = gse_core::PerUnit(charging);
    network
        .graph
        .add_edge(idx[from - 1], idx[to - 1], Edge::Branch(branch));
}

/// Two buses, one line, generator (and thus slack) at bus 1.
pub fn two_bus_network() -> Network {
    let mut network = Network::new();
    let idx: Vec<_> = (1..=2).map(|i| add_bus(&mut network, i)).collect();
    add_line(&mut network, &idx, 1, 1, 2, 0.01, 0.1, 0.02);
    network.graph.add_node(Node::Gen(Gen::new(
        GenId::new(1),
        "Gen1".to_string(),
        BusId::new(1),
    )));
    network
}

/// Nine buses in the classic ring-with-spurs shape: generators at buses
/// 1 (slack), 2 and 3, lines forming one loop so every bus has at least
/// two incident paths except through the generator step-ups.
pub fn nine_bus_network() -> Network {
    let mut network = Network::new();
    let idx: Vec<_> = (1..=9).map(|i| add_bus(&mut network, i)).collect();

    let lines: &[(usize, usize, f64, f64, f64)] = &[
        (1, 4, 0.0, 0.0576, 0.0),
        (4, 5, 0.017, 0.092, 0.158),
        (5, 6, 0.039, 0.17, 0.358),
        (3, 6, 0.0, 0.0586, 0.0),
        (6, 7, 0.0119, 0.1008, 0.209),
        (7, 8, 0.0085, 0.072, 0.149),
        (8, 2, 0.0, 0.0625, 0.0),
        (8, 9, 0.032, 0.161, 0.306),
        (9, 4, 0.01, 0.085, 0.176),
    ];
    for (k, &(from, to, r, x, c)) in lines.iter().enumerate() {
        add_line(&mut network, &idx, k + 1, from, to, r, x, c);
    }

    for (gen_id, bus) in [(1, 1), (2, 2), (3, 3)] {
        network.graph.add_node(Node::Gen(Gen::new(
            GenId::new(gen_id),
            format!("Gen{gen_id}"),
            BusId::new(bus),
        )));
    }
    network
}

/// A deterministic non-flat state to use as ground truth.
pub fn reference_state(network: &Network) -> StateVector {
    let mut state = StateVector::flat_start(network).expect("fixture network has a slack");
    let slack = state.slack();
    let n = state.n_bus() as f64;
    for (k, bus) in state.bus_ids().to_vec().into_iter().enumerate() {
        state.set_voltage(bus, 1.0 + 0.015 * ((k as f64) * 0.7).sin());
        if bus != slack {
            state.set_angle(bus, -0.06 * (k as f64 + 1.0) / n);
        }
    }
    state
}

fn predicted(
    model: &MeasurementModel,
    state: &StateVector,
    kind: MeasurementKind,
    location: MeasurementLocation,
) -> f64 {
    let probe = Measurement {
        id: gse_core::MeasurementId::new(0),
        kind,
        location,
        value: 0.0,
        std_dev: 1.0,
        active: true,
    };
    model
        .evaluate(&probe, state)
        .expect("fixture locations are valid")
        .0
}

/// A full, redundant placement consistent with `state`: voltage at every
/// bus, injections at every bus, and both flow kinds on every branch.
///
/// Buses in `dark` get no telemetry at all, and nothing in the returned
/// set constrains their state variables: their own measurements are
/// skipped, as are flows on incident branches and injections at adjacent
/// buses. The set then has a guaranteed rank deficit of two per dark bus.
pub fn measurements_from_state(
    network: &Network,
    state: &StateVector,
    dark: &[BusId],
) -> MeasurementSet {
    let model = MeasurementModel::from_network(network).expect("fixture network is valid");
    let dark: HashSet<BusId> = dark.iter().copied().collect();

    // Injections at a dark bus's neighbors would still see its variables
    let mut no_injection = dark.clone();
    for branch in network.branches() {
        if dark.contains(&branch.from_bus) {
            no_injection.insert(branch.to_bus);
        }
        if dark.contains(&branch.to_bus) {
            no_injection.insert(branch.from_bus);
        }
    }

    let mut set = MeasurementSet::new();
    let mut add = |kind, location, sigma| {
        let value = predicted(&model, state, kind, location);
        set.add(kind, location, value, sigma).expect("valid sigma");
    };

    for &bus in state.bus_ids() {
        if dark.contains(&bus) {
            continue;
        }
        add(
            MeasurementKind::VoltageMagnitude,
            MeasurementLocation::Bus(bus),
            0.004,
        );
        if !no_injection.contains(&bus) {
            add(
                MeasurementKind::RealInjection,
                MeasurementLocation::Bus(bus),
                0.01,
            );
            add(
                MeasurementKind::ReactiveInjection,
                MeasurementLocation::Bus(bus),
                0.01,
            );
        }
    }

    let mut seen_corridors: HashSet<(BusId, BusId)> = HashSet::new();
    for branch in network.branches() {
        if dark.contains(&branch.from_bus) || dark.contains(&branch.to_bus) {
            continue;
        }
        if !seen_corridors.insert((branch.from_bus, branch.to_bus)) {
            continue;
        }
        let location = MeasurementLocation::Branch {
            from: branch.from_bus,
            to: branch.to_bus,
        };
        add(MeasurementKind::RealFlow, location, 0.008);
        add(MeasurementKind::ReactiveFlow, location, 0.008);
    }

    set
}

/// A minimally redundant placement: voltage at every bus plus both flow
/// kinds on a spanning tree of the branches (first-come union-find).
/// Any tree-leaf bus is critically dependent on its single tree branch.
pub fn spanning_tree_measurements(network: &Network, state: &StateVector) -> MeasurementSet {
    let model = MeasurementModel::from_network(network).expect("fixture network is valid");

    let mut set = MeasurementSet::new();
    for &bus in state.bus_ids() {
        let value = predicted(
            &model,
            state,
            MeasurementKind::VoltageMagnitude,
            MeasurementLocation::Bus(bus),
        );
        set.add(
            MeasurementKind::VoltageMagnitude,
            MeasurementLocation::Bus(bus),
            value,
            0.004,
        )
        .expect("valid sigma");
    }

    // Union-find over branch insertion order
    let mut parent: std::collections::HashMap<BusId, BusId> = std::collections::HashMap::new();
    fn find(parent: &mut std::collections::HashMap<BusId, BusId>, bus: BusId) -> BusId {
        let p = *parent.entry(bus).or_insert(bus);
        if p == bus {
            bus
        } else {
            let root = find(parent, p);
            parent.insert(bus, root);
            root
        }
    }

    for branch in network.branches() {
        let a = find(&mut parent, branch.from_bus);
        let b = find(&mut parent, branch.to_bus);
        if a == b {
            continue; // closes a cycle, not part of the tree
        }
        parent.insert(a, b);
        let location = MeasurementLocation::Branch {
            from: branch.from_bus,
            to: branch.to_bus,
        };
        for kind in [MeasurementKind::RealFlow, MeasurementKind::ReactiveFlow] {
            let value = predicted(&model, state, kind, location);
            set.add(kind, location, value, 0.008).expect("valid sigma");
        }
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nine_bus_shape() {
        let network = nine_bus_network();
        let stats = network.stats();
        assert_eq!(stats.num_buses, 9);
        assert_eq!(stats.num_branches, 9);
        assert_eq!(network.slack_bus(), Some(BusId::new(1)));
    }

    #[test]
    fn test_full_placement_counts() {
        let network = nine_bus_network();
        let state = reference_state(&network);
        let set = measurements_from_state(&network, &state, &[]);
        // 9 vm + 18 injections + 18 flows
        assert_eq!(set.active_count(), 45);
    }

    #[test]
    fn test_dark_bus_gets_no_constraints() {
        let network = nine_bus_network();
        let state = reference_state(&network);
        let dark = BusId::new(9);
        let set = measurements_from_state(&network, &state, &[dark]);
        for m in set.active() {
            assert!(
                !m.location.buses().any(|b| b == dark),
                "measurement {} touches the dark bus",
                m.id
            );
        }
        // Neighbor injections are also withheld (buses 8 and 4)
        for m in set.active() {
            if matches!(
                m.kind,
                MeasurementKind::RealInjection | MeasurementKind::ReactiveInjection
            ) {
                let MeasurementLocation::Bus(bus) = m.location else {
                    panic!("injection at a branch");
                };
                assert_ne!(bus, BusId::new(8));
                assert_ne!(bus, BusId::new(4));
            }
        }
    }

    #[test]
    fn test_spanning_tree_leaves_one_loop_branch_out() {
        let network = nine_bus_network();
        let state = reference_state(&network);
        let set = spanning_tree_measurements(&network, &state);
        // 9 vm + 8 tree branches x 2 flow kinds
        assert_eq!(set.active_count(), 25);
    }
}
