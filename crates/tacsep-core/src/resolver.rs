//! Priority and multi-aircraft conflict resolver.
//!
//! Conflicts are processed least urgent first so the most urgent pair writes
//! last. Cruising aircraft with several cruising intruders form a group that
//! follows its highest-priority member; every other pair is resolved by the
//! aircraft that loses the priority comparison, using the strategy table.

use std::collections::HashSet;

use crate::conflict::{ConflictPair, Detection};
use crate::models::{Aircraft, FlightPhase, LayerTable};
use crate::priority::{highest_priority, own_resolves};
use crate::probe::{predicts_conflict, Maneuver, ProbeDirection};
use crate::resolution::{Resolution, Strategy};

/// Facts a strategy table entry decides on.
pub struct Selection<'p> {
    pub in_resolution_layer: bool,
    /// True when a vertical maneuver in the given direction is predicted clear
    pub probe_clear: &'p dyn Fn(ProbeDirection) -> bool,
}

type Selector = fn(&Selection<'_>) -> Strategy;

/// Rows: ownship phase, columns: intruder phase (cruise, climb, descend).
const STRATEGY_TABLE: [[Selector; 3]; 3] = [
    [cruise_vs_cruise, cruise_vs_vertical, cruise_vs_vertical],
    [climb_vs_cruise, match_vertical_speed, level_off],
    [descend_vs_cruise, level_off, match_vertical_speed],
];

fn cruise_vs_cruise(s: &Selection<'_>) -> Strategy {
    if s.in_resolution_layer {
        Strategy::Reso2
    } else if (s.probe_clear)(ProbeDirection::Climb) {
        Strategy::Reso1
    } else {
        Strategy::Reso2
    }
}

fn cruise_vs_vertical(s: &Selection<'_>) -> Strategy {
    if s.in_resolution_layer {
        Strategy::Reso2
    } else if (s.probe_clear)(ProbeDirection::Climb) {
        Strategy::Reso5
    } else {
        Strategy::Reso2
    }
}

fn climb_vs_cruise(s: &Selection<'_>) -> Strategy {
    if s.in_resolution_layer {
        Strategy::Reso3
    } else if (s.probe_clear)(ProbeDirection::Climb) {
        Strategy::Reso6
    } else {
        Strategy::Reso4
    }
}

fn descend_vs_cruise(s: &Selection<'_>) -> Strategy {
    if s.in_resolution_layer {
        Strategy::Reso3
    } else if (s.probe_clear)(ProbeDirection::Descend) {
        Strategy::Reso7
    } else {
        Strategy::Reso4
    }
}

fn match_vertical_speed(_: &Selection<'_>) -> Strategy {
    Strategy::Reso8
}

fn level_off(_: &Selection<'_>) -> Strategy {
    Strategy::Reso4
}

/// Pick the strategy for an ownship resolving against an intruder.
///
/// Probes run lazily: table entries that do not need one never call `probe_clear`.
pub fn select_strategy(
    own_phase: FlightPhase,
    int_phase: FlightPhase,
    in_resolution_layer: bool,
    probe_clear: &dyn Fn(ProbeDirection) -> bool,
) -> Strategy {
    let selection = Selection {
        in_resolution_layer,
        probe_clear,
    };
    STRATEGY_TABLE[own_phase.index()][int_phase.index()](&selection)
}

/// Multi-aircraft conflict group, leader first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaccGroup {
    pub members: Vec<usize>,
}

impl MaccGroup {
    pub fn leader(&self) -> Option<usize> {
        self.members.first().copied()
    }

    pub fn followers(&self) -> &[usize] {
        self.members.get(1..).unwrap_or(&[])
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.members.contains(&idx)
    }
}

/// Strategy assigned during one resolver pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub aircraft: String,
    pub intruder: String,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    pub decisions: Vec<Decision>,
    pub groups: Vec<MaccGroup>,
}

pub struct Resolver<'a> {
    layers: &'a LayerTable,
}

impl<'a> Resolver<'a> {
    pub fn new(layers: &'a LayerTable) -> Self {
        Self { layers }
    }

    /// Assign strategies for every pair in `detection`.
    ///
    /// `detection` must come from the same aircraft slice, unchanged in between.
    pub fn resolve(&self, aircraft: &mut [Aircraft], detection: &Detection) -> ResolveOutcome {
        let mut order: Vec<&ConflictPair> = detection
            .pairs
            .iter()
            .filter(|pair| pair_is_live(aircraft, pair))
            .collect();
        order.sort_by(|a, b| b.geometry.tlos_s.total_cmp(&a.geometry.tlos_s));

        let groups = find_macc_groups(aircraft, &order);
        let grouped: HashSet<usize> = groups
            .iter()
            .flat_map(|g| g.members.iter().copied())
            .collect();

        let mut outcome = ResolveOutcome::default();
        for pair in &order {
            if grouped.contains(&pair.own_idx) {
                continue;
            }
            if !own_resolves(&aircraft[pair.own_idx], &aircraft[pair.int_idx]) {
                continue;
            }
            let strategy = self.strategy_for(aircraft, pair.own_idx, pair.int_idx);
            if let Some(decision) = self.apply(aircraft, pair.own_idx, pair.int_idx, strategy) {
                outcome.decisions.push(decision);
            }
        }

        for group in &groups {
            let Some(leader) = group.leader() else {
                continue;
            };
            for &member in group.followers() {
                if let Some(decision) = self.apply(aircraft, member, leader, Strategy::Reso9) {
                    outcome.decisions.push(decision);
                }
            }
            let names: Vec<&str> = group
                .followers()
                .iter()
                .map(|&i| aircraft[i].id.as_str())
                .collect();
            tracing::info!(
                "{} are resolving conflict with {} using RESO9: {}",
                names.join(" & "),
                aircraft[leader].id,
                Strategy::Reso9.description()
            );
        }

        outcome.groups = groups;
        outcome
    }

    fn strategy_for(&self, aircraft: &[Aircraft], own_idx: usize, int_idx: usize) -> Strategy {
        let own = &aircraft[own_idx];
        let intruder = &aircraft[int_idx];
        let layer_height = self.layers.layer_height_m;
        let probe_clear = |direction: ProbeDirection| {
            let maneuver = Maneuver::vertical(direction, &own.perf, layer_height);
            !predicts_conflict(aircraft, own_idx, Some(int_idx), maneuver)
        };
        select_strategy(
            own.phase,
            intruder.phase,
            own.in_resolution_layer(),
            &probe_clear,
        )
    }

    /// Build and store the resolution, returning the decision when it took effect.
    fn apply(
        &self,
        aircraft: &mut [Aircraft],
        own_idx: usize,
        int_idx: usize,
        strategy: Strategy,
    ) -> Option<Decision> {
        let built = Resolution::build(strategy, &aircraft[own_idx], &aircraft[int_idx], self.layers);
        let intruder_id = aircraft[int_idx].id.clone();
        let own = &mut aircraft[own_idx];
        let resolution = match built {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!("{}: cannot apply {} against {}: {}", own.id, strategy, intruder_id, e);
                return None;
            }
        };

        own.reso.add_intruder(&intruder_id);
        if own.reso.resolution.is_none() {
            own.reso.pre_resolution_route = Some(own.route.clone());
        }
        own.reso.assign(resolution);

        if strategy != Strategy::Reso9 {
            tracing::info!(
                "{} is resolving conflict with {} using {}: {}",
                own.id,
                intruder_id,
                strategy,
                strategy.description()
            );
        }
        Some(Decision {
            aircraft: own.id.clone(),
            intruder: intruder_id,
            strategy,
        })
    }
}

fn pair_is_live(aircraft: &[Aircraft], pair: &ConflictPair) -> bool {
    matches!(
        (aircraft.get(pair.own_idx), aircraft.get(pair.int_idx)),
        (Some(own), Some(int)) if own.id == pair.own && int.id == pair.intruder
    )
}

/// Group cruising aircraft that conflict with more than one cruising intruder.
fn find_macc_groups(aircraft: &[Aircraft], order: &[&ConflictPair]) -> Vec<MaccGroup> {
    let mut groups: Vec<MaccGroup> = Vec::new();
    for pair in order {
        let own_idx = pair.own_idx;
        if aircraft[own_idx].phase != FlightPhase::Cruise
            || groups.iter().any(|g| g.contains(own_idx))
        {
            continue;
        }

        let mut intruders: Vec<usize> = Vec::new();
        for other in order {
            if other.own_idx == own_idx
                && aircraft[other.int_idx].phase == FlightPhase::Cruise
                && !intruders.contains(&other.int_idx)
            {
                intruders.push(other.int_idx);
            }
        }
        if intruders.len() < 2 {
            continue;
        }

        let mut members = vec![own_idx];
        members.extend(intruders);
        let refs: Vec<&Aircraft> = members.iter().map(|&i| &aircraft[i]).collect();
        let Some(leader) = highest_priority(&refs) else {
            continue;
        };
        let leader_id = leader.id.clone();
        if let Some(pos) = members.iter().position(|&i| aircraft[i].id == leader_id) {
            let leader_idx = members.remove(pos);
            members.insert(0, leader_idx);
        }
        groups.push(MaccGroup { members });
    }
    groups
}
