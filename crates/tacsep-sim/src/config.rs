//! Simulator configuration from environment.

use std::env;
use std::path::PathBuf;

use tacsep_core::TacticalRules;

#[derive(Debug, Clone)]
pub struct Config {
    /// Simulation timestep in seconds
    pub dt_s: f64,
    /// Conflict detection and resolution cadence
    pub cd_dt_s: f64,
    /// Geofence, overshoot and descend checker cadence
    pub check_dt_s: f64,
    /// ETA and speed update cadence
    pub eta_dt_s: f64,
    pub graph_path: Option<PathBuf>,
    pub geofences_path: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dt_s: 0.5,
            cd_dt_s: 0.5,
            check_dt_s: 5.0,
            eta_dt_s: 5.0,
            graph_path: None,
            geofences_path: None,
            rules_path: None,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v: &f64| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dt_s: env_f64("TACSEP_DT", defaults.dt_s),
            cd_dt_s: env_f64("TACSEP_CD_DT", defaults.cd_dt_s),
            check_dt_s: env_f64("TACSEP_CHECK_DT", defaults.check_dt_s),
            eta_dt_s: env_f64("TACSEP_ETA_DT", defaults.eta_dt_s),
            graph_path: env::var("TACSEP_GRAPH").ok().map(PathBuf::from),
            geofences_path: env::var("TACSEP_GEOFENCES").ok().map(PathBuf::from),
            rules_path: env::var("TACSEP_RULES").ok().map(PathBuf::from),
        }
    }

    /// Tactical rules from `rules_path`, or the defaults.
    pub fn load_rules(&self) -> anyhow::Result<TacticalRules> {
        match &self.rules_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let rules = serde_json::from_str(&text)?;
                tracing::info!("loaded tactical rules from {}", path.display());
                Ok(rules)
            }
            None => Ok(TacticalRules::default()),
        }
    }
}
