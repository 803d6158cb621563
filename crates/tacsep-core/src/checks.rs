//! Periodic per-aircraft checkers: geofence intrusion, destination overshoot
//! and terminal descent.

use std::collections::HashMap;

use crate::commands::{CommandQueue, HostCommand};
use crate::geofence::GeofenceStore;
use crate::models::{Aircraft, CheckState};
use crate::rules::TacticalRules;
use crate::spatial::{haversine_distance, point_in_polygon, polyline_intersects_polygon, LatLon};

fn check_state<'a>(aircraft: &'a mut Aircraft, rules: &TacticalRules) -> &'a mut CheckState {
    aircraft
        .checks
        .get_or_insert_with(|| CheckState::new(rules.overshoot_sentinel_m))
}

/// Fence geometry prepared for repeated tests.
#[derive(Debug, Clone)]
struct PreparedFence {
    polygon: Vec<LatLon>,
    top: f64,
    bottom: f64,
}

/// Result of one geofence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeofenceHit {
    pub route_intersects: bool,
    pub aircraft_inside: bool,
    pub destination_inside: bool,
    pub reroute_requested: bool,
}

/// Geofence checker with geometry cached per store version.
#[derive(Debug, Default)]
pub struct GeofenceChecker {
    version: Option<u64>,
    prepared: HashMap<String, PreparedFence>,
}

impl GeofenceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh(&mut self, store: &GeofenceStore) {
        if self.version == Some(store.version()) {
            return;
        }
        self.prepared = store
            .iter()
            .map(|fence| {
                (
                    fence.name.clone(),
                    PreparedFence {
                        polygon: fence.polygon(),
                        top: fence.top,
                        bottom: fence.bottom,
                    },
                )
            })
            .collect();
        self.version = Some(store.version());
        tracing::debug!("geofence cache rebuilt: {} fence(s)", self.prepared.len());
    }

    /// Whether the cache currently reflects `store`.
    pub fn is_fresh(&self, store: &GeofenceStore) -> bool {
        self.version == Some(store.version())
    }

    /// Check one aircraft's remaining route against every fence.
    ///
    /// Intrusions are ignored when the aircraft or its destination is already
    /// inside a fence.
    pub fn check(
        &mut self,
        aircraft: &mut Aircraft,
        store: &GeofenceStore,
        rules: &TacticalRules,
        queue: &mut CommandQueue,
    ) -> GeofenceHit {
        let mut hit = GeofenceHit::default();
        if store.is_empty() || aircraft.route.active_waypoint().is_none() {
            let state = check_state(aircraft, rules);
            state.route_in_geofence = false;
            state.aircraft_in_geofence = false;
            return hit;
        }
        self.refresh(store);

        let position = aircraft.position();
        let mut line = vec![position];
        line.extend(aircraft.route.remaining().iter().map(|wp| wp.position()));
        let destination = line.last().copied().unwrap_or(position);
        let cruise_alt = aircraft
            .route
            .remaining()
            .iter()
            .map(|wp| wp.altitude_m)
            .fold(aircraft.altitude_m, f64::max);

        for fence in store.candidates_for_line(&line) {
            let Some(prepared) = self.prepared.get(&fence.name) else {
                continue;
            };
            if point_in_polygon(position, &prepared.polygon) {
                hit.aircraft_inside = true;
            }
            if point_in_polygon(destination, &prepared.polygon) {
                hit.destination_inside = true;
            }
            if line.len() > 1
                && cruise_alt <= prepared.top
                && cruise_alt >= prepared.bottom
                && polyline_intersects_polygon(&line, &prepared.polygon)
            {
                hit.route_intersects = true;
            }
        }

        if hit.aircraft_inside {
            tracing::debug!("{} is inside a geofence", aircraft.id);
        }
        if hit.destination_inside {
            tracing::debug!("{} has its destination inside a geofence", aircraft.id);
        }
        if hit.route_intersects && !hit.aircraft_inside && !hit.destination_inside {
            hit.reroute_requested = queue.push_unique(HostCommand::RerouteGeofence {
                id: aircraft.id.clone(),
            });
            tracing::warn!("{} route intersects a geofence, rerouting", aircraft.id);
        }

        let state = check_state(aircraft, rules);
        state.route_in_geofence = hit.route_intersects;
        state.aircraft_in_geofence = hit.aircraft_inside;
        hit
    }
}

/// Track the distance to the final waypoint and request a reroute when it grows.
///
/// Returns true when an overshoot was flagged this call.
pub fn check_overshoot(aircraft: &mut Aircraft, rules: &TacticalRules, queue: &mut CommandQueue) -> bool {
    let distance = match aircraft.route.active_waypoint() {
        Some(wp) if aircraft.route.is_final_active() => {
            Some(haversine_distance(aircraft.lat, aircraft.lon, wp.lat, wp.lon))
        }
        _ => None,
    };
    let id = aircraft.id.clone();
    let state = check_state(aircraft, rules);
    let Some(distance) = distance else {
        state.overshot = false;
        return false;
    };

    if distance > state.final_wpt_dist_m + rules.overshoot_margin_m {
        state.overshot = true;
        state.final_wpt_dist_m = rules.overshoot_sentinel_m;
        queue.push_unique(HostCommand::RerouteOvershoot { id: id.clone() });
        tracing::warn!("{} overshot its destination by {:.0} m", id, distance);
        true
    } else {
        state.overshot = false;
        state.final_wpt_dist_m = state.final_wpt_dist_m.min(distance);
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescendStatus {
    Idle,
    /// The terminal descent commands were queued this call
    Staged,
    Descending,
    /// Below the landed altitude after the descent started
    Landed,
}

/// Stage the terminal descent once the second-to-last waypoint is active.
pub fn check_descend(aircraft: &mut Aircraft, rules: &TacticalRules, queue: &mut CommandQueue) -> DescendStatus {
    if aircraft.loiter_geofence.is_some()
        || !aircraft.reso.resolution.is_none()
        || aircraft.reso.active
    {
        return DescendStatus::Idle;
    }

    let started = aircraft.checks.as_ref().is_some_and(|c| c.descend_started);
    if started {
        return if aircraft.altitude_m < rules.landed_alt_m {
            DescendStatus::Landed
        } else {
            DescendStatus::Descending
        };
    }

    if !aircraft.route.is_second_to_last_active() {
        return DescendStatus::Idle;
    }
    let Some(wp) = aircraft.route.active_waypoint() else {
        return DescendStatus::Idle;
    };
    let (lat, lon) = wp.position();
    let id = aircraft.id.as_str();
    let at_top_of_descent = |then: HostCommand| HostCommand::AtDistance {
        id: id.to_string(),
        lat,
        lon,
        distance_m: rules.descend_trigger_distance_m,
        then: Box::new(then),
    };
    queue.push(at_top_of_descent(HostCommand::speed(id, 0.0)));
    queue.push(at_top_of_descent(HostCommand::at_speed(
        id,
        0.0,
        HostCommand::altitude(id, rules.descend_target_alt_m),
    )));
    queue.push(HostCommand::at_altitude(
        id,
        0.0,
        HostCommand::Delete { id: id.to_string() },
    ));
    tracing::info!("{} staged terminal descent", aircraft.id);

    check_state(aircraft, rules).descend_started = true;
    DescendStatus::Staged
}

/// Outcome of one checker pass over the fleet.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub geofence_reroutes: usize,
    pub overshoots: usize,
    pub descents_staged: usize,
    /// Aircraft that landed and must be deleted
    pub landed: Vec<String>,
}

/// Run the three checkers over every aircraft.
pub fn run_checks(
    aircraft: &mut [Aircraft],
    geofences: &GeofenceStore,
    checker: &mut GeofenceChecker,
    rules: &TacticalRules,
    queue: &mut CommandQueue,
) -> CheckReport {
    let mut report = CheckReport::default();
    for ac in aircraft.iter_mut() {
        if checker.check(ac, geofences, rules, queue).reroute_requested {
            report.geofence_reroutes += 1;
        }
        if check_overshoot(ac, rules, queue) {
            report.overshoots += 1;
        }
        match check_descend(ac, rules, queue) {
            DescendStatus::Staged => report.descents_staged += 1,
            DescendStatus::Landed => report.landed.push(ac.id.clone()),
            DescendStatus::Idle | DescendStatus::Descending => {}
        }
    }
    report
}
