//! Aircraft, route and airspace-layer models shared across the tactical pipeline.

use serde::{Deserialize, Serialize};

use crate::intent::Intent;
use crate::resolution::ResolutionState;
use crate::spatial::LatLon;

/// Vertical motion classification used to key the resolution strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightPhase {
    #[default]
    Cruise,
    Climb,
    Descend,
}

impl FlightPhase {
    /// Classify from vertical speed with a dead band around zero.
    pub fn from_vertical_speed(vs_mps: f64, dead_band_mps: f64) -> Self {
        if vs_mps > dead_band_mps {
            FlightPhase::Climb
        } else if vs_mps < -dead_band_mps {
            FlightPhase::Descend
        } else {
            FlightPhase::Cruise
        }
    }

    /// Row/column of this phase in the strategy table.
    pub fn index(self) -> usize {
        match self {
            FlightPhase::Cruise => 0,
            FlightPhase::Climb => 1,
            FlightPhase::Descend => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub speed_mps: f64,
    /// Waypoint is flown over as a turn
    #[serde(default)]
    pub turn: bool,
}

impl Waypoint {
    pub fn position(&self) -> LatLon {
        (self.lat, self.lon)
    }
}

/// Ordered waypoints plus the index of the active one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub active: Option<usize>,
}

impl Route {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        let active = if waypoints.is_empty() { None } else { Some(0) };
        Self { waypoints, active }
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active.filter(|i| *i < self.waypoints.len())
    }

    pub fn active_waypoint(&self) -> Option<&Waypoint> {
        self.active_index().and_then(|i| self.waypoints.get(i))
    }

    pub fn active_waypoint_mut(&mut self) -> Option<&mut Waypoint> {
        let idx = self.active_index()?;
        self.waypoints.get_mut(idx)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.waypoints.len().checked_sub(1)
    }

    pub fn destination(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    pub fn is_final_active(&self) -> bool {
        matches!((self.active_index(), self.last_index()), (Some(a), Some(l)) if a == l)
    }

    pub fn is_second_to_last_active(&self) -> bool {
        match (self.active_index(), self.last_index()) {
            (Some(a), Some(l)) => l >= 1 && a == l - 1,
            _ => false,
        }
    }

    /// Waypoints from the active one to the end.
    pub fn remaining(&self) -> &[Waypoint] {
        match self.active_index() {
            Some(idx) => &self.waypoints[idx..],
            None => &[],
        }
    }

    /// Move to the next waypoint, returning false at the end of the route.
    pub fn advance(&mut self) -> bool {
        match self.active_index() {
            Some(idx) if idx + 1 < self.waypoints.len() => {
                self.active = Some(idx + 1);
                true
            }
            _ => {
                self.active = None;
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.active = None;
    }

    pub fn push(&mut self, waypoint: Waypoint) {
        self.waypoints.push(waypoint);
        if self.active.is_none() {
            self.active = Some(self.waypoints.len() - 1);
        }
    }
}

/// Altitude band with speed limits. Layers named with "reso" are resolution layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub lower_alt_m: f64,
    pub upper_alt_m: f64,
    pub lower_speed_mps: f64,
    pub upper_speed_mps: f64,
    #[serde(default)]
    pub direction_deg: Option<f64>,
}

impl Layer {
    pub fn is_resolution(&self) -> bool {
        is_resolution_layer(&self.name)
    }

    pub fn is_cruising(&self) -> bool {
        self.name.to_lowercase().starts_with("cruising")
    }

    pub fn contains_altitude(&self, altitude_m: f64) -> bool {
        altitude_m >= self.lower_alt_m && altitude_m < self.upper_alt_m
    }

    /// Clamp a speed to the nearest layer speed limit.
    pub fn clamp_speed(&self, speed_mps: f64) -> f64 {
        if (self.lower_speed_mps..=self.upper_speed_mps).contains(&speed_mps) {
            speed_mps
        } else if (self.lower_speed_mps - speed_mps).abs() < (self.upper_speed_mps - speed_mps).abs() {
            self.lower_speed_mps
        } else {
            self.upper_speed_mps
        }
    }
}

pub fn is_resolution_layer(name: &str) -> bool {
    name.to_lowercase().contains("reso")
}

/// Global layer table, ordered bottom to top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerTable {
    pub layers: Vec<Layer>,
    pub layer_height_m: f64,
}

impl LayerTable {
    pub fn new(mut layers: Vec<Layer>) -> Self {
        layers.sort_by(|a, b| a.lower_alt_m.total_cmp(&b.lower_alt_m));
        let layer_height_m = layers
            .first()
            .map(|l| l.upper_alt_m - l.lower_alt_m)
            .unwrap_or(0.0);
        Self {
            layers,
            layer_height_m,
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn above(&self, name: &str) -> Option<&Layer> {
        self.index_of(name).and_then(|i| self.layers.get(i + 1))
    }

    pub fn below(&self, name: &str) -> Option<&Layer> {
        self.index_of(name)
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.layers.get(i))
    }

    pub fn layer_for_altitude(&self, altitude_m: f64) -> Option<&Layer> {
        self.layers.iter().find(|l| l.contains_altitude(altitude_m))
    }
}

/// Aircraft performance limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub vs_max_mps: f64,
    /// Negative: maximum descent rate
    pub vs_min_mps: f64,
    pub max_speed_mps: f64,
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            vs_max_mps: 5.0,
            vs_min_mps: -5.0,
            max_speed_mps: 12.8611,
        }
    }
}

/// Autopilot selections the host flies when no resolution channel overrides them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Autopilot {
    pub tas_mps: f64,
    pub vs_mps: f64,
    pub alt_m: f64,
    #[serde(default)]
    pub lnav: bool,
    #[serde(default)]
    pub vnav: bool,
}

/// Flags and trackers maintained by the periodic checkers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckState {
    pub overshot: bool,
    /// Closest distance to the final waypoint seen while it is active
    pub final_wpt_dist_m: f64,
    pub route_in_geofence: bool,
    pub aircraft_in_geofence: bool,
    pub descend_started: bool,
}

impl CheckState {
    pub fn new(sentinel_m: f64) -> Self {
        Self {
            overshot: false,
            final_wpt_dist_m: sentinel_m,
            route_in_geofence: false,
            aircraft_in_geofence: false,
            descend_started: false,
        }
    }
}

/// Scheduled/estimated arrival bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EtaState {
    /// Waypoint count the STA was computed for
    pub route_len: usize,
    pub sta_s: Option<f64>,
    pub eta_s: Option<f64>,
    /// STA - ETA, negative when late
    pub delay_s: f64,
    pub speed_adjusted: bool,
}

/// One live vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub selected_altitude_m: f64,
    pub ground_speed_mps: f64,
    pub vertical_speed_mps: f64,
    /// Degrees, 0 = north
    pub track_deg: f64,
    pub autopilot: Autopilot,
    pub phase: FlightPhase,
    pub layer: String,
    /// Lower number is more urgent
    pub priority: u32,
    pub perf: Performance,
    pub rpz_m: f64,
    pub hpz_m: f64,
    pub route: Route,
    #[serde(skip)]
    pub reso: ResolutionState,
    #[serde(skip)]
    pub intent: Intent,
    #[serde(skip)]
    pub checks: Option<CheckState>,
    #[serde(skip)]
    pub eta: EtaState,
    /// Loitering aircraft carry a geofence and never start a terminal descent
    #[serde(default)]
    pub loiter_geofence: Option<String>,
}

impl Aircraft {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
            altitude_m,
            selected_altitude_m: altitude_m,
            ground_speed_mps: 0.0,
            vertical_speed_mps: 0.0,
            track_deg: 0.0,
            autopilot: Autopilot {
                alt_m: altitude_m,
                ..Autopilot::default()
            },
            phase: FlightPhase::Cruise,
            layer: String::new(),
            priority: 1,
            perf: Performance::default(),
            rpz_m: 50.0,
            hpz_m: 7.62,
            route: Route::default(),
            reso: ResolutionState::default(),
            intent: Intent::default(),
            checks: None,
            eta: EtaState::default(),
            loiter_geofence: None,
        }
    }

    pub fn with_velocity(mut self, ground_speed_mps: f64, track_deg: f64, vertical_speed_mps: f64) -> Self {
        self.ground_speed_mps = ground_speed_mps;
        self.track_deg = track_deg;
        self.vertical_speed_mps = vertical_speed_mps;
        self.autopilot.tas_mps = ground_speed_mps;
        self.autopilot.vs_mps = vertical_speed_mps;
        self.phase = FlightPhase::from_vertical_speed(vertical_speed_mps, 0.1);
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_protection(mut self, rpz_m: f64, hpz_m: f64) -> Self {
        self.rpz_m = rpz_m;
        self.hpz_m = hpz_m;
        self
    }

    pub fn with_route(mut self, waypoints: Vec<Waypoint>) -> Self {
        self.route = Route::new(waypoints);
        self
    }

    pub fn position(&self) -> LatLon {
        (self.lat, self.lon)
    }

    /// Ground velocity as (east, north) in m/s.
    pub fn velocity_en(&self) -> (f64, f64) {
        let trk = self.track_deg.to_radians();
        (self.ground_speed_mps * trk.sin(), self.ground_speed_mps * trk.cos())
    }

    pub fn is_stationary(&self) -> bool {
        self.ground_speed_mps == 0.0 && self.vertical_speed_mps == 0.0
    }

    pub fn in_resolution_layer(&self) -> bool {
        is_resolution_layer(&self.layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(lat: f64, lon: f64) -> Waypoint {
        Waypoint {
            name: String::new(),
            lat,
            lon,
            altitude_m: 30.0,
            speed_mps: 10.0,
            turn: false,
        }
    }

    fn layers() -> LayerTable {
        let layer = |name: &str, lo: f64| Layer {
            name: name.into(),
            lower_alt_m: lo,
            upper_alt_m: lo + 10.0,
            lower_speed_mps: 5.0,
            upper_speed_mps: 15.0,
            direction_deg: None,
        };
        LayerTable::new(vec![
            layer("reso_1", 20.0),
            layer("cruising_1", 10.0),
            layer("reso_0", 0.0),
        ])
    }

    #[test]
    fn layer_table_sorted_with_neighbours() {
        let table = layers();
        assert_eq!(table.layer_height_m, 10.0);
        assert_eq!(table.above("cruising_1").map(|l| l.name.as_str()), Some("reso_1"));
        assert_eq!(table.below("cruising_1").map(|l| l.name.as_str()), Some("reso_0"));
        assert!(table.below("reso_0").is_none());
        assert!(table.above("reso_1").is_none());
        assert_eq!(table.layer_for_altitude(12.0).map(|l| l.name.as_str()), Some("cruising_1"));
    }

    #[test]
    fn clamp_speed_picks_nearest_limit() {
        let table = layers();
        let layer = table.get("cruising_1").unwrap();
        assert_eq!(layer.clamp_speed(9.0), 9.0);
        assert_eq!(layer.clamp_speed(-4.0), 5.0);
        assert_eq!(layer.clamp_speed(30.0), 15.0);
    }

    #[test]
    fn route_progression() {
        let mut route = Route::new(vec![wp(0.0, 0.0), wp(0.0, 0.001), wp(0.0, 0.002)]);
        assert_eq!(route.active_index(), Some(0));
        assert!(route.advance());
        assert!(route.is_second_to_last_active());
        assert!(route.advance());
        assert!(route.is_final_active());
        assert_eq!(route.remaining().len(), 1);
        assert!(!route.advance());
        assert!(route.active_waypoint().is_none());
    }

    #[test]
    fn phase_from_vertical_speed() {
        assert_eq!(FlightPhase::from_vertical_speed(2.0, 0.1), FlightPhase::Climb);
        assert_eq!(FlightPhase::from_vertical_speed(-2.0, 0.1), FlightPhase::Descend);
        assert_eq!(FlightPhase::from_vertical_speed(0.05, 0.1), FlightPhase::Cruise);
    }

    #[test]
    fn velocity_components() {
        let ac = Aircraft::new("D1", 0.0, 0.0, 30.0).with_velocity(10.0, 90.0, 0.0);
        let (e, n) = ac.velocity_en();
        assert!((e - 10.0).abs() < 1e-9);
        assert!(n.abs() < 1e-9);
    }
}
