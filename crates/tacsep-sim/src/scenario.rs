//! JSON scenario files: layer table, aircraft, geofences and timed operator commands.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use tacsep_core::models::{Aircraft, Layer, LayerTable, Performance, Waypoint};
use tacsep_core::{Geofence, GeofenceStore, TacticalRules, WorldState};

fn default_priority() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftSpec {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    #[serde(default)]
    pub speed_mps: f64,
    #[serde(default)]
    pub track_deg: f64,
    #[serde(default)]
    pub vs_mps: f64,
    /// Defaults to the layer containing `altitude_m`
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub perf: Option<Performance>,
    #[serde(default)]
    pub rpz_m: Option<f64>,
    #[serde(default)]
    pub hpz_m: Option<f64>,
    #[serde(default)]
    pub route: Vec<Waypoint>,
    /// First active waypoint
    #[serde(default)]
    pub active: Option<usize>,
    #[serde(default = "default_true")]
    pub lnav: bool,
    #[serde(default = "default_true")]
    pub vnav: bool,
}

impl AircraftSpec {
    pub fn build(&self, layers: &LayerTable, rules: &TacticalRules) -> Aircraft {
        let layer = self
            .layer
            .clone()
            .or_else(|| layers.layer_for_altitude(self.altitude_m).map(|l| l.name.clone()))
            .unwrap_or_default();
        let mut ac = Aircraft::new(self.id.to_uppercase(), self.lat, self.lon, self.altitude_m)
            .with_velocity(self.speed_mps, self.track_deg, self.vs_mps)
            .with_layer(layer)
            .with_priority(self.priority)
            .with_protection(
                self.rpz_m.unwrap_or(rules.default_rpz_m),
                self.hpz_m.unwrap_or(rules.default_hpz_m),
            )
            .with_route(self.route.clone());
        if let Some(perf) = self.perf {
            ac.perf = perf;
        }
        if let Some(active) = self.active.filter(|a| *a < ac.route.waypoints.len()) {
            ac.route.active = Some(active);
        }
        ac.autopilot.lnav = self.lnav && !ac.route.waypoints.is_empty();
        ac.autopilot.vnav = self.vnav && ac.autopilot.lnav;
        ac
    }
}

/// Operator command issued at a given simulation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCommand {
    pub at_s: f64,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub rules: Option<TacticalRules>,
    #[serde(default)]
    pub aircraft: Vec<AircraftSpec>,
    #[serde(default)]
    pub geofences: Vec<Geofence>,
    #[serde(default)]
    pub commands: Vec<ScheduledCommand>,
    /// Street graph file, relative to the scenario file
    #[serde(default)]
    pub graph: Option<PathBuf>,
    #[serde(default)]
    pub duration_s: Option<f64>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = serde_json::from_str(json).context("invalid scenario json")?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut scenario = Self::from_json_str(&text)?;
        if scenario.name.is_empty() {
            scenario.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        if let (Some(graph), Some(dir)) = (scenario.graph.as_mut(), path.parent()) {
            if graph.is_relative() {
                *graph = dir.join(&*graph);
            }
        }
        Ok(scenario)
    }

    pub fn layer_table(&self) -> LayerTable {
        LayerTable::new(self.layers.clone())
    }

    /// Initial world: aircraft and geofences.
    pub fn build_world(&self, layers: &LayerTable, rules: &TacticalRules) -> anyhow::Result<WorldState> {
        let mut geofences = GeofenceStore::default();
        for fence in &self.geofences {
            geofences
                .insert(fence.clone())
                .with_context(|| format!("scenario geofence {}", fence.name))?;
        }
        let mut world = WorldState::new(geofences);
        for spec in &self.aircraft {
            if world.get(&spec.id.to_uppercase()).is_some() {
                anyhow::bail!("duplicate aircraft id {}", spec.id);
            }
            world.upsert(spec.build(layers, rules));
        }
        Ok(world)
    }
}
