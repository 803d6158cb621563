//! Minimal kinematic host: applies stack commands, flies LNAV/VNAV or the
//! active resolution channels, and fires conditional commands.

use tacsep_core::commands::HostCommand;
use tacsep_core::models::{Aircraft, FlightPhase, LayerTable, Waypoint};
use tacsep_core::spatial::{bearing_deg, haversine_distance, offset_by_bearing};
use tacsep_core::WorldState;

/// What happened to a command handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Done,
    /// Stored until its condition holds
    Pending,
    /// Not a host command; the scheduler must handle it
    Forward(HostCommand),
    UnknownAircraft,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    command: HostCommand,
    /// Side of the trigger value the aircraft was on when the command was armed
    armed_side: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct HostModel {
    /// Horizontal acceleration limit, m/s²
    pub accel_mps2: f64,
    /// Radius within which a waypoint counts as reached
    pub capture_radius_m: f64,
    pub altitude_tolerance_m: f64,
    pub speed_tolerance_mps: f64,
    pending: Vec<PendingCommand>,
}

impl Default for HostModel {
    fn default() -> Self {
        Self {
            accel_mps2: 3.0,
            capture_radius_m: 3.0,
            altitude_tolerance_m: 0.5,
            speed_tolerance_mps: 0.3,
            pending: Vec::new(),
        }
    }
}

impl HostModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop conditional commands of an aircraft.
    pub fn purge(&mut self, id: &str) {
        self.pending.retain(|p| p.command.aircraft_id() != Some(id));
    }

    /// Apply one command to the world.
    pub fn apply(&mut self, world: &mut WorldState, command: HostCommand) -> Applied {
        match &command {
            HostCommand::Delete { .. }
            | HostCommand::RerouteGeofence { .. }
            | HostCommand::RerouteOvershoot { .. }
            | HostCommand::Echo { .. } => return Applied::Forward(command),
            _ => {}
        }
        let Some(id) = command.aircraft_id().map(str::to_string) else {
            return Applied::Done;
        };
        let Some(ac) = world.get_mut(&id) else {
            tracing::debug!("dropping {} for unknown aircraft", command);
            return Applied::UnknownAircraft;
        };

        match command {
            HostCommand::DelRoute { .. } => ac.route.clear(),
            HostCommand::Speed { speed_mps, .. } => {
                ac.autopilot.tas_mps = speed_mps.max(0.0);
                hold_selected_altitude(ac);
            }
            HostCommand::Altitude { altitude_m, .. } => {
                ac.autopilot.alt_m = altitude_m;
                ac.autopilot.vnav = false;
                ac.selected_altitude_m = altitude_m;
            }
            HostCommand::VerticalSpeed { vs_mps, .. } => ac.autopilot.vs_mps = vs_mps,
            HostCommand::Lnav { on, .. } => ac.autopilot.lnav = on,
            HostCommand::Vnav { on, .. } => {
                ac.autopilot.vnav = on;
                if on {
                    ac.autopilot.lnav = true;
                }
            }
            HostCommand::AddWaypoint {
                lat,
                lon,
                altitude_m,
                speed_mps,
                turn,
                ..
            } => {
                let name = format!("{}{:03}", ac.id, ac.route.waypoints.len());
                ac.route.push(Waypoint {
                    name,
                    lat,
                    lon,
                    altitude_m,
                    speed_mps,
                    turn,
                });
            }
            HostCommand::DelWaypoint { name, .. } => delete_waypoint(ac, &name),
            HostCommand::AtAltitude { .. } | HostCommand::AtSpeed { .. } | HostCommand::AtDistance { .. } => {
                let armed_side = armed_side(ac, &command);
                self.pending.push(PendingCommand { command, armed_side });
                return Applied::Pending;
            }
            HostCommand::Delete { .. }
            | HostCommand::RerouteGeofence { .. }
            | HostCommand::RerouteOvershoot { .. }
            | HostCommand::Echo { .. } => {}
        }
        Applied::Done
    }

    /// Advance every aircraft by `dt_s` and fire satisfied conditional commands.
    ///
    /// Returns commands the scheduler must handle itself.
    pub fn step(&mut self, world: &mut WorldState, layers: &LayerTable, dt_s: f64) -> Vec<HostCommand> {
        for ac in world.aircraft.iter_mut() {
            self.fly(ac, layers, dt_s);
        }
        self.pending
            .retain(|p| p.command.aircraft_id().is_some_and(|id| world.get(id).is_some()));

        let mut forwarded = Vec::new();
        let mut fired = Vec::new();
        let mut waiting = Vec::with_capacity(self.pending.len());
        for pending in std::mem::take(&mut self.pending) {
            let triggered = pending
                .command
                .aircraft_id()
                .and_then(|id| world.get(id))
                .is_some_and(|ac| self.is_triggered(ac, &pending));
            if triggered {
                fired.push(pending.command);
            } else {
                waiting.push(pending);
            }
        }
        self.pending = waiting;

        for command in fired {
            let then = match command {
                HostCommand::AtAltitude { then, .. }
                | HostCommand::AtSpeed { then, .. }
                | HostCommand::AtDistance { then, .. } => *then,
                other => other,
            };
            if let Applied::Forward(command) = self.apply(world, then) {
                forwarded.push(command);
            }
        }
        forwarded
    }

    fn is_triggered(&self, ac: &Aircraft, pending: &PendingCommand) -> bool {
        match &pending.command {
            HostCommand::AtAltitude { altitude_m, .. } => {
                (ac.altitude_m - altitude_m).abs() <= self.altitude_tolerance_m
                    || pending.armed_side.is_some_and(|above| (ac.altitude_m > *altitude_m) != above)
            }
            HostCommand::AtSpeed { speed_mps, .. } => {
                (ac.ground_speed_mps - speed_mps).abs() <= self.speed_tolerance_mps
                    || pending.armed_side.is_some_and(|above| (ac.ground_speed_mps > *speed_mps) != above)
            }
            HostCommand::AtDistance {
                lat, lon, distance_m, ..
            } => haversine_distance(ac.lat, ac.lon, *lat, *lon) <= *distance_m,
            _ => true,
        }
    }

    fn fly(&self, ac: &mut Aircraft, layers: &LayerTable, dt_s: f64) {
        let channels = ac.reso.channels;
        let targets = ac.reso.resolution.targets();
        let navigating = ac.autopilot.lnav && ac.route.active_waypoint().is_some();

        // Waypoint capture before steering so a reached point does not pull the aircraft back.
        if navigating {
            self.capture_waypoints(ac);
        }
        let waypoint = if ac.autopilot.lnav {
            ac.route.active_waypoint().cloned()
        } else {
            None
        };

        let mut target_speed = match (&waypoint, ac.autopilot.vnav) {
            (Some(wp), true) if wp.speed_mps > 0.0 => wp.speed_mps,
            _ => ac.autopilot.tas_mps,
        };
        let mut target_alt = match (&waypoint, ac.autopilot.vnav) {
            (Some(wp), true) => wp.altitude_m,
            _ => ac.autopilot.alt_m,
        };
        if channels.tas {
            target_speed = targets.speed_mps.unwrap_or(target_speed);
        }
        if channels.alt {
            target_alt = targets.alt_m.unwrap_or(target_alt);
        }

        if let Some(wp) = &waypoint {
            let distance = haversine_distance(ac.lat, ac.lon, wp.lat, wp.lon);
            if distance > self.capture_radius_m {
                ac.track_deg = bearing_deg(ac.lat, ac.lon, wp.lat, wp.lon);
            } else {
                // Vertical leg: hover over the point until the altitude is reached.
                target_speed = 0.0;
            }
        }

        let dv = (target_speed - ac.ground_speed_mps).clamp(-self.accel_mps2 * dt_s, self.accel_mps2 * dt_s);
        ac.ground_speed_mps = (ac.ground_speed_mps + dv).max(0.0);

        let vs = if channels.vs && !channels.alt {
            targets.vs_mps.unwrap_or(0.0)
        } else {
            let diff = target_alt - ac.altitude_m;
            let selected = if channels.vs { targets.vs_mps } else { None }
                .or((ac.autopilot.vs_mps != 0.0).then_some(ac.autopilot.vs_mps))
                .map(f64::abs);
            let rate = if diff > 0.0 {
                selected.unwrap_or(ac.perf.vs_max_mps)
            } else {
                selected.unwrap_or(ac.perf.vs_min_mps.abs())
            };
            if rate * dt_s > 0.0 {
                diff.clamp(-rate * dt_s, rate * dt_s) / dt_s
            } else {
                0.0
            }
        };
        ac.vertical_speed_mps = vs;
        ac.selected_altitude_m = target_alt;

        let (lat, lon) = offset_by_bearing(ac.lat, ac.lon, ac.ground_speed_mps * dt_s, ac.track_deg.to_radians());
        ac.lat = lat;
        ac.lon = lon;
        ac.altitude_m += vs * dt_s;

        ac.phase = FlightPhase::from_vertical_speed(ac.vertical_speed_mps, 0.1);
        if let Some(layer) = layers.layer_for_altitude(ac.altitude_m) {
            if layer.name != ac.layer {
                ac.layer = layer.name.clone();
            }
        }
    }

    fn capture_waypoints(&self, ac: &mut Aircraft) {
        let capture = self.capture_radius_m.max(ac.ground_speed_mps * 0.5);
        while let Some(wp) = ac.route.active_waypoint() {
            let horizontal = haversine_distance(ac.lat, ac.lon, wp.lat, wp.lon);
            let vertical_ok = !ac.autopilot.vnav
                || !is_vertical_leg(ac)
                || (ac.altitude_m - wp.altitude_m).abs() <= self.altitude_tolerance_m;
            if horizontal > capture || !vertical_ok {
                break;
            }
            if ac.route.is_final_active() {
                // Keep the destination active for the descend and overshoot checkers.
                break;
            }
            ac.route.advance();
        }
    }
}

/// The active waypoint sits above or below its predecessor.
fn is_vertical_leg(ac: &Aircraft) -> bool {
    let Some(idx) = ac.route.active_index() else {
        return false;
    };
    let wps = &ac.route.waypoints;
    idx.checked_sub(1)
        .and_then(|prev| wps.get(prev))
        .is_some_and(|prev| haversine_distance(prev.lat, prev.lon, wps[idx].lat, wps[idx].lon) < 1.0)
}

fn hold_selected_altitude(ac: &mut Aircraft) {
    if ac.autopilot.vnav {
        if let Some(wp) = ac.route.active_waypoint() {
            ac.autopilot.alt_m = wp.altitude_m;
        }
    }
    ac.autopilot.vnav = false;
}

fn delete_waypoint(ac: &mut Aircraft, name: &str) {
    let Some(pos) = ac.route.waypoints.iter().position(|wp| wp.name == name) else {
        tracing::debug!("{} has no waypoint {}", ac.id, name);
        return;
    };
    ac.route.waypoints.remove(pos);
    ac.route.active = match ac.route.active {
        _ if ac.route.waypoints.is_empty() => None,
        Some(active) if active > pos => Some(active - 1),
        Some(active) => Some(active.min(ac.route.waypoints.len() - 1)),
        None => None,
    };
}

fn armed_side(ac: &Aircraft, command: &HostCommand) -> Option<bool> {
    match command {
        HostCommand::AtAltitude { altitude_m, .. } => Some(ac.altitude_m > *altitude_m),
        HostCommand::AtSpeed { speed_mps, .. } => Some(ac.ground_speed_mps > *speed_mps),
        _ => None,
    }
}
