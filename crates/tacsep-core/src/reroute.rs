//! Tactical rerouting over the street graph.
//!
//! A reroute plans from the node nearest the aircraft to the node nearest its
//! destination, avoiding geofences and other aircraft's bookings in the
//! occupancy ledger, then replaces the aircraft's route through host commands.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::commands::{CommandQueue, HostCommand};
use crate::error::{Result, TacticalError};
use crate::geofence::GeofenceStore;
use crate::graph::{EdgeOverlay, NodeId, StreetGraph};
use crate::models::{Aircraft, LayerTable};
use crate::rules::RerouteRules;
use crate::spatial::{bearing_deg, heading_change_deg, LatLon};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RerouteReason {
    Geofence,
    Overshoot,
}

impl std::fmt::Display for RerouteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerouteReason::Geofence => write!(f, "geofence"),
            RerouteReason::Overshoot => write!(f, "overshoot"),
        }
    }
}

/// Node arrival time along a planned path, in whole seconds of sim time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimedNode {
    pub node: NodeId,
    pub arrival_s: u64,
}

/// Half-open edge occupation interval `[enter_s, exit_s)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct EdgeSlot {
    enter_s: u64,
    exit_s: u64,
    owner: String,
}

impl EdgeSlot {
    fn overlaps(&self, enter_s: u64, exit_s: u64) -> bool {
        enter_s < self.exit_s && self.enter_s < exit_s
    }
}

/// Time-windowed occupation of graph nodes and edges by planned flights.
#[derive(Debug, Clone, Default)]
pub struct OccupancyLedger {
    nodes: HashMap<NodeId, Vec<(u64, String)>>,
    edges: HashMap<(NodeId, NodeId), Vec<EdgeSlot>>,
    /// Owner to the last arrival time of its booking
    owners: BTreeMap<String, u64>,
}

impl OccupancyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn has_booking(&self, owner: &str) -> bool {
        self.owners.contains_key(owner)
    }

    pub fn is_node_free(&self, node: NodeId, at_s: u64, owner: &str) -> bool {
        self.nodes
            .get(&node)
            .map_or(true, |times| !times.iter().any(|(t, o)| *t == at_s && o != owner))
    }

    pub fn is_edge_free(&self, u: NodeId, v: NodeId, enter_s: u64, exit_s: u64, owner: &str) -> bool {
        // A leg blocks both directions of the street.
        [(u, v), (v, u)].iter().all(|key| {
            self.edges
                .get(key)
                .map_or(true, |slots| !slots.iter().any(|s| s.owner != owner && s.overlaps(enter_s, exit_s)))
        })
    }

    /// First leg of `plan` that collides with somebody else's booking.
    pub fn first_conflict(&self, plan: &[TimedNode], owner: &str) -> Option<(NodeId, NodeId)> {
        plan.windows(2).find_map(|w| {
            let (a, b) = (w[0], w[1]);
            let node_free = self.is_node_free(b.node, b.arrival_s, owner);
            let edge_free = self.is_edge_free(a.node, b.node, a.arrival_s, b.arrival_s, owner);
            (!node_free || !edge_free).then_some((a.node, b.node))
        })
    }

    /// Record a plan, replacing any earlier booking by the same owner.
    pub fn book(&mut self, owner: &str, plan: &[TimedNode]) {
        self.purge(owner);
        let Some(last) = plan.last() else {
            return;
        };
        for timed in plan.iter().skip(1) {
            self.nodes
                .entry(timed.node)
                .or_default()
                .push((timed.arrival_s, owner.to_string()));
        }
        for w in plan.windows(2) {
            self.edges.entry((w[0].node, w[1].node)).or_default().push(EdgeSlot {
                enter_s: w[0].arrival_s,
                exit_s: w[1].arrival_s,
                owner: owner.to_string(),
            });
        }
        self.owners.insert(owner.to_string(), last.arrival_s);
    }

    pub fn purge(&mut self, owner: &str) -> bool {
        if self.owners.remove(owner).is_none() {
            return false;
        }
        self.nodes.retain(|_, times| {
            times.retain(|(_, o)| o != owner);
            !times.is_empty()
        });
        self.edges.retain(|_, slots| {
            slots.retain(|s| s.owner != owner);
            !slots.is_empty()
        });
        true
    }

    /// Drop bookings whose last arrival lies before `now_s`.
    pub fn purge_expired(&mut self, now_s: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .owners
            .iter()
            .filter(|(_, last)| **last < now_s)
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in &expired {
            self.purge(owner);
        }
        expired
    }
}

/// Arrival schedule along `path` flown at `speed_mps` from `departure_s`.
///
/// Each leg takes `ceil(length / speed)` seconds.
pub fn schedule(graph: &StreetGraph, path: &[NodeId], speed_mps: f64, departure_s: u64) -> Vec<TimedNode> {
    let mut plan = Vec::with_capacity(path.len());
    let mut t = departure_s;
    for (i, node) in path.iter().enumerate() {
        if i > 0 {
            let length = graph.leg_length(path[i - 1], *node).unwrap_or(0.0);
            if speed_mps > 0.0 {
                t = t.saturating_add((length / speed_mps).ceil() as u64);
            }
        }
        plan.push(TimedNode {
            node: *node,
            arrival_s: t,
        });
    }
    plan
}

/// Simulation time usable for slot arithmetic; non-finite clocks read as zero.
fn clock_s(now_s: f64) -> f64 {
    if now_s.is_finite() {
        now_s.max(0.0)
    } else {
        0.0
    }
}

/// One waypoint of a rerouted flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutePoint {
    pub position: LatLon,
    pub speed_mps: f64,
    pub turn: bool,
}

/// Expand a node path into waypoints with turn speeds at sharp corners.
pub fn route_points(graph: &StreetGraph, path: &[NodeId], cruise_speed_mps: f64, rules: &RerouteRules) -> Vec<RoutePoint> {
    let mut positions: Vec<LatLon> = Vec::new();
    if path.len() == 1 {
        if let Some(node) = graph.node(path[0]) {
            positions.push(node.position());
        }
    }
    for w in path.windows(2) {
        for point in graph.leg_geometry(w[0], w[1]) {
            if positions.last() != Some(&point) {
                positions.push(point);
            }
        }
    }

    positions
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let turn_speed = if i > 0 && i + 1 < positions.len() {
                let prev = positions[i - 1];
                let next = positions[i + 1];
                let inbound = bearing_deg(prev.0, prev.1, point.0, point.1);
                let outbound = bearing_deg(point.0, point.1, next.0, next.1);
                rules.turn_speed(heading_change_deg(inbound, outbound))
            } else {
                None
            };
            RoutePoint {
                position: *point,
                speed_mps: turn_speed.unwrap_or(cruise_speed_mps),
                turn: turn_speed.is_some(),
            }
        })
        .collect()
}

/// Result of one reroute request, reported to the operator as (success, message).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerouteOutcome {
    pub success: bool,
    pub message: String,
    pub path: Vec<NodeId>,
    pub attempts: usize,
}

impl RerouteOutcome {
    fn failed(message: String, attempts: usize) -> Self {
        Self {
            success: false,
            message,
            path: Vec::new(),
            attempts,
        }
    }
}

pub struct Rerouter {
    graph: StreetGraph,
    ledger: OccupancyLedger,
    rules: RerouteRules,
}

impl Rerouter {
    pub fn new(graph: StreetGraph, rules: RerouteRules) -> Self {
        Self {
            graph,
            ledger: OccupancyLedger::new(),
            rules,
        }
    }

    pub fn graph(&self) -> &StreetGraph {
        &self.graph
    }

    pub fn ledger(&self) -> &OccupancyLedger {
        &self.ledger
    }

    pub fn purge(&mut self, id: &str) {
        if self.ledger.purge(id) {
            tracing::debug!("occupancy bookings of {} purged", id);
        }
    }

    pub fn purge_expired(&mut self, now_s: f64) -> Vec<String> {
        self.ledger.purge_expired(clock_s(now_s).floor() as u64)
    }

    /// Plan a conflict-free node path and book it.
    pub fn plan(
        &mut self,
        owner: &str,
        origin: LatLon,
        destination: LatLon,
        speed_mps: f64,
        departure_s: u64,
        fences: &GeofenceStore,
    ) -> Result<(Vec<NodeId>, usize)> {
        let from = self.graph.nearest_node(origin)?;
        let to = self.graph.nearest_node(destination)?;

        let mut overlay = EdgeOverlay::new();
        let blocked = self.graph.block_geofences(&mut overlay, fences, &[origin, destination]);
        if blocked > 0 {
            tracing::debug!("{} reroute avoids {} geofenced edge(s)", owner, blocked);
        }

        let attempts = self.rules.max_replan_attempts.max(1);
        for attempt in 1..=attempts {
            let path = self.graph.shortest_path(from, to, &overlay)?;
            let plan = schedule(&self.graph, &path, speed_mps, departure_s);
            match self.ledger.first_conflict(&plan, owner) {
                None => {
                    self.ledger.book(owner, &plan);
                    return Ok((path, attempt));
                }
                Some((u, v)) => {
                    tracing::debug!("{} plan collides on edge {}->{}, replanning", owner, u, v);
                    overlay.block(u, v);
                }
            }
        }
        Err(TacticalError::NoPath { from, to })
    }

    /// Replace the aircraft's route with a fresh one over the street graph.
    ///
    /// On failure the aircraft is commanded to hold position.
    pub fn reroute(
        &mut self,
        aircraft: &Aircraft,
        layers: &LayerTable,
        fences: &GeofenceStore,
        now_s: f64,
        reason: RerouteReason,
        queue: &mut CommandQueue,
    ) -> RerouteOutcome {
        let id = aircraft.id.as_str();
        let outcome = self.try_reroute(aircraft, layers, fences, now_s, queue);
        match outcome {
            Ok(outcome) => {
                tracing::info!(
                    "{} rerouted ({}) over {} node(s) after {} attempt(s)",
                    id,
                    reason,
                    outcome.path.len(),
                    outcome.attempts
                );
                outcome
            }
            Err(e) => {
                tracing::warn!("{} {} reroute failed: {}, holding", id, reason, e);
                queue.push(HostCommand::speed(id, 0.0));
                RerouteOutcome::failed(format!("{id} could not be rerouted: {e}"), self.rules.max_replan_attempts)
            }
        }
    }

    fn try_reroute(
        &mut self,
        aircraft: &Aircraft,
        layers: &LayerTable,
        fences: &GeofenceStore,
        now_s: f64,
        queue: &mut CommandQueue,
    ) -> Result<RerouteOutcome> {
        let id = aircraft.id.as_str();
        let destination = aircraft
            .route
            .destination()
            .cloned()
            .ok_or_else(|| TacticalError::NoRoute(id.to_string()))?;
        let cruise_alt = layers
            .get(&self.rules.layer)
            .map(|layer| layer.upper_alt_m)
            .ok_or_else(|| TacticalError::UnknownLayer(self.rules.layer.clone()))?;
        let cruise_speed = if aircraft.perf.max_speed_mps > 0.0 {
            aircraft.perf.max_speed_mps
        } else {
            self.rules.default_cruise_speed_mps
        };

        let departure_s = clock_s(now_s).ceil() as u64;
        let (path, attempts) = self.plan(
            id,
            aircraft.position(),
            destination.position(),
            cruise_speed,
            departure_s,
            fences,
        )?;
        let points = route_points(&self.graph, &path, cruise_speed, &self.rules);

        queue.push(HostCommand::DelRoute { id: id.to_string() });
        queue.push(HostCommand::speed(id, 0.0));
        queue.push(HostCommand::altitude(id, cruise_alt));
        let add = |lat: f64, lon: f64, altitude_m: f64, speed_mps: f64, turn: bool| {
            HostCommand::at_altitude(
                id,
                cruise_alt,
                HostCommand::AddWaypoint {
                    id: id.to_string(),
                    lat,
                    lon,
                    altitude_m,
                    speed_mps,
                    turn,
                },
            )
        };
        for point in &points {
            queue.push(add(point.position.0, point.position.1, cruise_alt, point.speed_mps, point.turn));
        }
        // Landing leg over the original destination.
        queue.push(add(destination.lat, destination.lon, cruise_alt, cruise_speed, true));
        queue.push(add(destination.lat, destination.lon, destination.altitude_m, 0.0, true));
        queue.push(HostCommand::at_altitude(id, cruise_alt, HostCommand::speed(id, cruise_speed)));
        queue.push(HostCommand::at_altitude(id, cruise_alt, HostCommand::lnav_on(id)));
        queue.push(HostCommand::at_altitude(id, cruise_alt, HostCommand::vnav_on(id)));

        Ok(RerouteOutcome {
            success: true,
            message: format!("{id} has a new route"),
            path,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEdge, GraphNode};
    use crate::models::{Layer, Waypoint};

    fn ladder() -> StreetGraph {
        let node = |osmid, lat, lon| GraphNode { osmid, lat, lon };
        let edge = |u, v, length: f64| GraphEdge {
            u,
            v,
            length,
            weight: length,
            geometry: Vec::new(),
            bidirectional: true,
        };
        StreetGraph::from_parts(
            vec![
                node(1, 52.000, 4.000),
                node(2, 52.000, 4.002),
                node(3, 52.000, 4.004),
                node(4, 51.998, 4.000),
                node(5, 51.998, 4.004),
            ],
            vec![
                edge(1, 2, 137.0),
                edge(2, 3, 137.0),
                edge(1, 4, 222.0),
                edge(4, 5, 274.0),
                edge(5, 3, 222.0),
            ],
        )
        .unwrap()
    }

    fn layers() -> LayerTable {
        LayerTable::new(vec![Layer {
            name: "reso_0".into(),
            lower_alt_m: 0.0,
            upper_alt_m: 30.0,
            lower_speed_mps: 0.0,
            upper_speed_mps: 15.0,
            direction_deg: None,
        }])
    }

    fn aircraft(id: &str) -> Aircraft {
        Aircraft::new(id, 52.0, 4.0, 30.0).with_route(vec![Waypoint {
            name: "dest".into(),
            lat: 52.0,
            lon: 4.004,
            altitude_m: 0.0,
            speed_mps: 10.0,
            turn: false,
        }])
    }

    #[test]
    fn schedule_rounds_leg_times_up() {
        let graph = ladder();
        let plan = schedule(&graph, &[1, 2, 3], 10.0, 100);
        let times: Vec<u64> = plan.iter().map(|t| t.arrival_s).collect();
        assert_eq!(times, vec![100, 114, 128]);
    }

    #[test]
    fn schedule_saturates_at_crawling_speed() {
        let graph = ladder();
        let plan = schedule(&graph, &[1, 2, 3], 1e-300, u64::MAX - 10);
        let times: Vec<u64> = plan.iter().map(|t| t.arrival_s).collect();
        assert_eq!(times, vec![u64::MAX - 10, u64::MAX, u64::MAX]);
    }

    #[test]
    fn ledger_detects_overlapping_edge_slots() {
        let mut ledger = OccupancyLedger::new();
        let plan = [
            TimedNode { node: 1, arrival_s: 0 },
            TimedNode { node: 2, arrival_s: 14 },
        ];
        ledger.book("D1", &plan);
        assert!(!ledger.is_edge_free(1, 2, 10, 20, "D2"));
        assert!(!ledger.is_edge_free(2, 1, 10, 20, "D2"));
        assert!(ledger.is_edge_free(1, 2, 14, 30, "D2"));
        assert!(ledger.is_edge_free(1, 2, 10, 20, "D1"));
        assert!(!ledger.is_node_free(2, 14, "D2"));
        assert!(ledger.is_node_free(2, 15, "D2"));
    }

    #[test]
    fn ledger_purge_and_expiry() {
        let mut ledger = OccupancyLedger::new();
        ledger.book("D1", &[TimedNode { node: 1, arrival_s: 0 }, TimedNode { node: 2, arrival_s: 14 }]);
        ledger.book("D2", &[TimedNode { node: 4, arrival_s: 0 }, TimedNode { node: 5, arrival_s: 40 }]);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.purge_expired(20), vec!["D1".to_string()]);
        assert!(ledger.is_edge_free(1, 2, 0, 14, "D3"));
        assert!(ledger.purge("D2"));
        assert!(!ledger.purge("D2"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn second_plan_avoids_booked_edge() {
        let mut rerouter = Rerouter::new(ladder(), RerouteRules::default());
        let fences = GeofenceStore::default();
        let (first, _) = rerouter
            .plan("D1", (52.0, 4.0), (52.0, 4.004), 10.0, 0, &fences)
            .unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        let (second, attempts) = rerouter
            .plan("D2", (52.0, 4.0), (52.0, 4.004), 10.0, 0, &fences)
            .unwrap();
        assert_eq!(second, vec![1, 4, 5, 3]);
        assert_eq!(attempts, 2);
        assert_eq!(rerouter.ledger().len(), 2);
    }

    #[test]
    fn non_finite_clock_books_from_zero_and_keeps_bookings() {
        let mut rerouter = Rerouter::new(ladder(), RerouteRules::default());
        let fences = GeofenceStore::default();
        let mut queue = CommandQueue::new();
        let outcome = rerouter.reroute(&aircraft("D1"), &layers(), &fences, f64::NAN, RerouteReason::Geofence, &mut queue);
        assert!(outcome.success);
        assert!(rerouter.purge_expired(f64::NAN).is_empty());
        assert!(rerouter.purge_expired(f64::INFINITY).is_empty());
        assert!(rerouter.ledger().has_booking("D1"));

        // The booking sits at t=0, so a departure at zero has to go around it.
        let (path, _) = rerouter
            .plan("D2", (52.0, 4.0), (52.0, 4.004), 10.0, 0, &fences)
            .unwrap();
        assert_ne!(path, outcome.path);
    }

    #[test]
    fn reroute_replaces_route_at_cruise_altitude() {
        let mut rerouter = Rerouter::new(ladder(), RerouteRules::default());
        let mut queue = CommandQueue::new();
        let ac = aircraft("D1");
        let outcome = rerouter.reroute(&ac, &layers(), &GeofenceStore::default(), 0.0, RerouteReason::Geofence, &mut queue);
        assert!(outcome.success);
        assert_eq!(outcome.message, "D1 has a new route");

        let commands: Vec<HostCommand> = queue.drain();
        assert_eq!(commands[0], HostCommand::DelRoute { id: "D1".into() });
        assert_eq!(commands[1], HostCommand::speed("D1", 0.0));
        assert_eq!(commands[2], HostCommand::altitude("D1", 30.0));
        let waypoints = commands
            .iter()
            .filter(|c| matches!(c, HostCommand::AtAltitude { then, .. } if matches!(**then, HostCommand::AddWaypoint { .. })))
            .count();
        // three graph nodes plus the two landing-leg waypoints
        assert_eq!(waypoints, 5);
        assert_eq!(
            commands.last(),
            Some(&HostCommand::at_altitude("D1", 30.0, HostCommand::vnav_on("D1")))
        );
    }

    #[test]
    fn corner_gets_turn_speed() {
        let graph = ladder();
        let rules = RerouteRules::default();
        let points = route_points(&graph, &[1, 4, 5], 12.0, &rules);
        assert_eq!(points.len(), 3);
        assert!(!points[0].turn);
        assert!(points[1].turn);
        assert!((points[1].speed_mps - 10.0 * crate::commands::KTS).abs() < 1e-9);
        assert_eq!(points[2].speed_mps, 12.0);
    }

    #[test]
    fn failed_reroute_holds_aircraft() {
        let mut rerouter = Rerouter::new(ladder(), RerouteRules::default());
        let mut queue = CommandQueue::new();
        let ac = Aircraft::new("D1", 52.0, 4.0, 30.0);
        let outcome = rerouter.reroute(&ac, &layers(), &GeofenceStore::default(), 0.0, RerouteReason::Overshoot, &mut queue);
        assert!(!outcome.success);
        assert_eq!(queue.drain(), vec![HostCommand::speed("D1", 0.0)]);
    }
}
