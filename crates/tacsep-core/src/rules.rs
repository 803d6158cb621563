//! Tunable thresholds for detection, resolution, checkers and rerouting.

use serde::{Deserialize, Serialize};

use crate::commands::{FT, KTS};

/// Configuration for the tactical pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TacticalRules {
    /// Lookahead window for state-based conflict prediction in seconds
    pub lookahead_s: f64,
    /// Horizontal protection radius applied when an aircraft does not set one
    pub default_rpz_m: f64,
    /// Vertical protection half-height applied when an aircraft does not set one
    pub default_hpz_m: f64,
    /// Intent polyline lookahead in seconds
    pub intent_lookahead_s: f64,
    /// Selected/current altitude difference above which an aircraft counts as maneuvering
    pub vertical_maneuver_eps_m: f64,
    /// Growth of the distance to the final waypoint that counts as overshoot
    pub overshoot_margin_m: f64,
    /// "Very far" value the overshoot tracker resets to
    pub overshoot_sentinel_m: f64,
    /// Distance from destination at which the terminal descent starts
    pub descend_trigger_distance_m: f64,
    /// Altitude commanded for the final descent
    pub descend_target_alt_m: f64,
    /// Aircraft below this altitude after the descent is staged are deleted
    pub landed_alt_m: f64,
    /// Delay (STA - ETA) below which a cruising aircraft speeds up
    pub speed_up_delay_s: f64,
    /// Delay above which a cruising aircraft slows down
    pub slow_down_delay_s: f64,
    /// Absolute delay under which waypoint speeds are resumed
    pub settle_delay_s: f64,
    pub reroute: RerouteRules,
}

impl Default for TacticalRules {
    fn default() -> Self {
        Self {
            lookahead_s: 20.0,
            default_rpz_m: 50.0,
            default_hpz_m: 25.0 * FT,
            intent_lookahead_s: 20.0,
            vertical_maneuver_eps_m: 1.0,
            overshoot_margin_m: 50.0,
            overshoot_sentinel_m: 99_999.0,
            descend_trigger_distance_m: 40.0,
            descend_target_alt_m: -5.0 * FT,
            landed_alt_m: 1.0 * FT,
            speed_up_delay_s: -25.0,
            slow_down_delay_s: 25.0,
            settle_delay_s: 15.0,
            reroute: RerouteRules::default(),
        }
    }
}

/// Rerouting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerouteRules {
    /// Layer whose upper altitude is used as cruise altitude for rerouted flights
    pub layer: String,
    /// Cruise speed used when an aircraft has no performance entry
    pub default_cruise_speed_mps: f64,
    /// Turn speeds, ordered by increasing heading change
    pub turn_speeds: Vec<TurnSpeed>,
    /// How many times a plan that collides with a booking is re-planned
    pub max_replan_attempts: usize,
}

impl Default for RerouteRules {
    fn default() -> Self {
        Self {
            layer: "reso_0".into(),
            default_cruise_speed_mps: 12.8611,
            turn_speeds: vec![
                TurnSpeed { min_heading_change_deg: 25.0, speed_mps: 10.0 * KTS },
                TurnSpeed { min_heading_change_deg: 100.0, speed_mps: 5.0 * KTS },
                TurnSpeed { min_heading_change_deg: 150.0, speed_mps: 2.0 * KTS },
            ],
            max_replan_attempts: 5,
        }
    }
}

impl RerouteRules {
    /// Turn speed for a given heading change, `None` when the node is not a turn.
    pub fn turn_speed(&self, heading_change_deg: f64) -> Option<f64> {
        self.turn_speeds
            .iter()
            .filter(|t| heading_change_deg >= t.min_heading_change_deg)
            .max_by(|a, b| a.min_heading_change_deg.total_cmp(&b.min_heading_change_deg))
            .map(|t| t.speed_mps)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSpeed {
    pub min_heading_change_deg: f64,
    pub speed_mps: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_speed_bands() {
        let rules = RerouteRules::default();
        assert_eq!(rules.turn_speed(10.0), None);
        assert!((rules.turn_speed(30.0).unwrap() - 10.0 * KTS).abs() < 1e-9);
        assert!((rules.turn_speed(120.0).unwrap() - 5.0 * KTS).abs() < 1e-9);
        assert!((rules.turn_speed(170.0).unwrap() - 2.0 * KTS).abs() < 1e-9);
    }

    #[test]
    fn partial_rules_fill_defaults() {
        let rules: TacticalRules = serde_json::from_str(r#"{"lookahead_s": 30.0}"#).unwrap();
        assert_eq!(rules.lookahead_s, 30.0);
        assert_eq!(rules.overshoot_margin_m, 50.0);
        assert_eq!(rules.reroute.layer, "reso_0");
    }
}
