//! Run statistics and the JSON run report.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tacsep_core::WorldState;

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub ticks: u64,
    pub conflict_pairs: usize,
    pub los_pairs: usize,
    /// Strategy label to number of assignments
    pub resolutions: BTreeMap<String, usize>,
    pub recoveries: usize,
    pub max_active_pairs: usize,
    pub geofence_reroute_requests: usize,
    pub overshoots: usize,
    pub reroutes_ok: usize,
    pub reroutes_failed: usize,
    pub descents_staged: usize,
    pub landed: Vec<String>,
    pub deleted: Vec<String>,
    pub expired_geofences: Vec<String>,
    pub operator_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AircraftSummary {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub layer: String,
    pub priority: u32,
    pub strategy: String,
    pub delay_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sim_time_s: f64,
    pub stats: RunStats,
    pub aircraft: Vec<AircraftSummary>,
}

impl RunReport {
    pub fn new(scenario: &str, started_at: DateTime<Utc>, world: &WorldState, stats: &RunStats) -> Self {
        let aircraft = world
            .aircraft
            .iter()
            .map(|ac| AircraftSummary {
                id: ac.id.clone(),
                lat: ac.lat,
                lon: ac.lon,
                altitude_m: ac.altitude_m,
                layer: ac.layer.clone(),
                priority: ac.priority,
                strategy: ac.reso.strategy().to_string(),
                delay_s: ac.eta.delay_s,
            })
            .collect();
        Self {
            scenario: scenario.to_string(),
            started_at,
            finished_at: Utc::now(),
            sim_time_s: world.sim_time_s,
            stats: stats.clone(),
            aircraft,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        tracing::info!("run report written to {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacsep_core::Aircraft;

    #[test]
    fn report_lists_remaining_aircraft() {
        let mut world = WorldState::default();
        world.upsert(Aircraft::new("D1", 52.0, 4.0, 10.0));
        world.sim_time_s = 12.5;
        let mut stats = RunStats::default();
        stats.resolutions.insert("RESO2".into(), 1);
        let report = RunReport::new("demo", Utc::now(), &world, &stats);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["aircraft"][0]["id"], "D1");
        assert_eq!(json["aircraft"][0]["strategy"], "None");
        assert_eq!(json["stats"]["resolutions"]["RESO2"], 1);
        assert_eq!(json["sim_time_s"], 12.5);
        assert!(report.finished_at >= report.started_at);
    }
}
