//! Resolution strategies and per-aircraft resolution state.
//!
//! Each strategy is a variant of [`Resolution`] carrying its own targets, so
//! the control channels an aircraft hands over to the resolver follow directly
//! from the active variant.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TacticalError};
use crate::models::{Aircraft, FlightPhase, Layer, LayerTable, Route};

/// Strategy label without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Strategy {
    #[default]
    None,
    Reso1,
    Reso2,
    Reso3,
    Reso4,
    Reso5,
    Reso6,
    Reso7,
    Reso8,
    Reso9,
}

impl Strategy {
    pub fn description(self) -> &'static str {
        match self {
            Strategy::None => "no resolution",
            Strategy::Reso1 => "climb into resolution layer strategy",
            Strategy::Reso2 => "speed strategy",
            Strategy::Reso3 => "hover in the resolution layer strategy",
            Strategy::Reso4 => "temporary level-off strategy",
            Strategy::Reso5 => "climb into resolution layer + speed resolution strategy",
            Strategy::Reso6 => "climb into resolution layer + hover resolution strategy",
            Strategy::Reso7 => "descend into resolution layer + hover resolution strategy",
            Strategy::Reso8 => "velocity matching in the vertical direction",
            Strategy::Reso9 => "multi aircraft conflict",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::None => "None",
            Strategy::Reso1 => "RESO1",
            Strategy::Reso2 => "RESO2",
            Strategy::Reso3 => "RESO3",
            Strategy::Reso4 => "RESO4",
            Strategy::Reso5 => "RESO5",
            Strategy::Reso6 => "RESO6",
            Strategy::Reso7 => "RESO7",
            Strategy::Reso8 => "RESO8",
            Strategy::Reso9 => "RESO9",
        };
        f.write_str(label)
    }
}

/// Control channels taken over from the autopilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channels {
    pub hdg: bool,
    pub tas: bool,
    pub alt: bool,
    pub vs: bool,
}

impl Channels {
    pub const NONE: Channels = Channels {
        hdg: false,
        tas: false,
        alt: false,
        vs: false,
    };

    pub fn any(&self) -> bool {
        self.hdg || self.tas || self.alt || self.vs
    }
}

/// Speed/vertical-speed/altitude targets of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Targets {
    pub speed_mps: Option<f64>,
    pub vs_mps: Option<f64>,
    pub alt_m: Option<f64>,
}

/// Active resolution with its parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Resolution {
    #[default]
    None,
    /// Climb into the resolution layer above.
    Reso1 {
        alt_m: f64,
        vs_mps: f64,
        recovery_vs_mps: f64,
    },
    /// Match the intruder's along-track speed within the layer limits.
    Reso2 {
        speed_mps: f64,
        recovery_speed_mps: f64,
    },
    /// Hover at the bottom of the current resolution layer.
    Reso3 {
        alt_m: f64,
        vs_mps: f64,
        recovery_vs_mps: f64,
    },
    /// Level off at the current altitude.
    Reso4 {
        alt_m: f64,
        recovery_vs_mps: f64,
    },
    /// Climb into the resolution layer and match speed.
    Reso5 {
        alt_m: f64,
        vs_mps: f64,
        speed_mps: f64,
        recovery_vs_mps: f64,
        recovery_speed_mps: f64,
    },
    /// Climb into the layer above and hover there.
    Reso6 {
        alt_m: f64,
        vs_mps: f64,
        recovery_vs_mps: f64,
    },
    /// Descend into the layer below and hover there.
    Reso7 {
        alt_m: f64,
        vs_mps: f64,
        recovery_vs_mps: f64,
    },
    /// Match the intruder's vertical speed.
    Reso8 {
        vs_mps: f64,
        recovery_vs_mps: f64,
    },
    /// Multi-aircraft conflict member following the group leader.
    Reso9 {
        leader: String,
        speed_mps: f64,
        vs_mps: f64,
        alt_m: f64,
        recovery_speed_mps: f64,
    },
}

impl Resolution {
    pub fn strategy(&self) -> Strategy {
        match self {
            Resolution::None => Strategy::None,
            Resolution::Reso1 { .. } => Strategy::Reso1,
            Resolution::Reso2 { .. } => Strategy::Reso2,
            Resolution::Reso3 { .. } => Strategy::Reso3,
            Resolution::Reso4 { .. } => Strategy::Reso4,
            Resolution::Reso5 { .. } => Strategy::Reso5,
            Resolution::Reso6 { .. } => Strategy::Reso6,
            Resolution::Reso7 { .. } => Strategy::Reso7,
            Resolution::Reso8 { .. } => Strategy::Reso8,
            Resolution::Reso9 { .. } => Strategy::Reso9,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Resolution::None)
    }

    /// Channels the strategy takes over.
    pub fn channels(&self) -> Channels {
        let set = |tas, alt, vs| Channels {
            hdg: false,
            tas,
            alt,
            vs,
        };
        match self {
            Resolution::None => Channels::NONE,
            Resolution::Reso1 { .. } => set(false, true, true),
            Resolution::Reso2 { .. } => set(true, false, false),
            Resolution::Reso3 { .. } | Resolution::Reso6 { .. } | Resolution::Reso7 { .. } => {
                set(true, true, true)
            }
            Resolution::Reso4 { .. } => set(false, true, true),
            Resolution::Reso5 { .. } => set(true, true, true),
            Resolution::Reso8 { .. } => set(false, false, true),
            Resolution::Reso9 { .. } => set(true, false, false),
        }
    }

    pub fn targets(&self) -> Targets {
        match self {
            Resolution::None => Targets::default(),
            Resolution::Reso1 { alt_m, vs_mps, .. } => Targets {
                speed_mps: None,
                vs_mps: Some(*vs_mps),
                alt_m: Some(*alt_m),
            },
            Resolution::Reso2 { speed_mps, .. } => Targets {
                speed_mps: Some(*speed_mps),
                ..Targets::default()
            },
            Resolution::Reso3 { alt_m, vs_mps, .. }
            | Resolution::Reso6 { alt_m, vs_mps, .. }
            | Resolution::Reso7 { alt_m, vs_mps, .. } => Targets {
                speed_mps: Some(0.0),
                vs_mps: Some(*vs_mps),
                alt_m: Some(*alt_m),
            },
            Resolution::Reso4 { alt_m, .. } => Targets {
                speed_mps: None,
                vs_mps: Some(0.0),
                alt_m: Some(*alt_m),
            },
            Resolution::Reso5 {
                alt_m,
                vs_mps,
                speed_mps,
                ..
            } => Targets {
                speed_mps: Some(*speed_mps),
                vs_mps: Some(*vs_mps),
                alt_m: Some(*alt_m),
            },
            Resolution::Reso8 { vs_mps, .. } => Targets {
                vs_mps: Some(*vs_mps),
                ..Targets::default()
            },
            Resolution::Reso9 {
                speed_mps,
                vs_mps,
                alt_m,
                ..
            } => Targets {
                speed_mps: Some(*speed_mps),
                vs_mps: Some(*vs_mps),
                alt_m: Some(*alt_m),
            },
        }
    }

    pub fn recovery_vs(&self) -> Option<f64> {
        match self {
            Resolution::Reso1 { recovery_vs_mps, .. }
            | Resolution::Reso3 { recovery_vs_mps, .. }
            | Resolution::Reso4 { recovery_vs_mps, .. }
            | Resolution::Reso5 { recovery_vs_mps, .. }
            | Resolution::Reso6 { recovery_vs_mps, .. }
            | Resolution::Reso7 { recovery_vs_mps, .. }
            | Resolution::Reso8 { recovery_vs_mps, .. } => Some(*recovery_vs_mps),
            _ => None,
        }
    }

    /// Build the parameters of `strategy` for `own` resolving against `intruder`.
    ///
    /// For [`Strategy::Reso9`] the intruder is the group leader.
    pub fn build(
        strategy: Strategy,
        own: &Aircraft,
        intruder: &Aircraft,
        layers: &LayerTable,
    ) -> Result<Resolution> {
        let resolution = match strategy {
            Strategy::None => Resolution::None,
            Strategy::Reso1 => {
                let above = layer_above(own, layers)?;
                Resolution::Reso1 {
                    alt_m: above.lower_alt_m,
                    vs_mps: own.perf.vs_max_mps,
                    recovery_vs_mps: own.autopilot.vs_mps,
                }
            }
            Strategy::Reso2 => {
                let layer = current_layer(own, layers)?;
                Resolution::Reso2 {
                    speed_mps: layer.clamp_speed(matched_speed(own, intruder, layer)),
                    recovery_speed_mps: own.autopilot.tas_mps,
                }
            }
            Strategy::Reso3 => {
                let layer = current_layer(own, layers)?;
                let (alt_m, vs_mps) = hover_at(own, layer, layers);
                Resolution::Reso3 {
                    alt_m,
                    vs_mps,
                    recovery_vs_mps: phase_recovery_vs(own),
                }
            }
            Strategy::Reso4 => Resolution::Reso4 {
                alt_m: own.altitude_m,
                recovery_vs_mps: phase_recovery_vs(own),
            },
            Strategy::Reso5 => {
                let above = layer_above(own, layers)?;
                let layer = current_layer(own, layers)?;
                Resolution::Reso5 {
                    alt_m: above.lower_alt_m,
                    vs_mps: own.perf.vs_max_mps,
                    speed_mps: matched_speed(own, intruder, layer),
                    recovery_vs_mps: own.autopilot.vs_mps,
                    recovery_speed_mps: own.autopilot.tas_mps,
                }
            }
            Strategy::Reso6 => {
                let above = layer_above(own, layers)?;
                let (alt_m, vs_mps) = hover_at(own, above, layers);
                Resolution::Reso6 {
                    alt_m,
                    vs_mps,
                    recovery_vs_mps: phase_recovery_vs(own),
                }
            }
            Strategy::Reso7 => {
                let below = layers.below(&own.layer).ok_or_else(|| TacticalError::NoAdjacentLayer {
                    layer: own.layer.clone(),
                    direction: "below",
                })?;
                let (alt_m, vs_mps) = hover_at(own, below, layers);
                Resolution::Reso7 {
                    alt_m,
                    vs_mps,
                    recovery_vs_mps: phase_recovery_vs(own),
                }
            }
            Strategy::Reso8 => Resolution::Reso8 {
                vs_mps: intruder.vertical_speed_mps,
                recovery_vs_mps: phase_recovery_vs(own),
            },
            Strategy::Reso9 => {
                let layer = current_layer(own, layers)?;
                Resolution::Reso9 {
                    leader: intruder.id.clone(),
                    speed_mps: layer.clamp_speed(matched_speed(own, intruder, layer)),
                    vs_mps: 0.0,
                    alt_m: own.altitude_m,
                    recovery_speed_mps: own.autopilot.tas_mps,
                }
            }
        };
        Ok(resolution)
    }
}

fn current_layer<'a>(own: &Aircraft, layers: &'a LayerTable) -> Result<&'a Layer> {
    layers
        .get(&own.layer)
        .ok_or_else(|| TacticalError::UnknownLayer(own.layer.clone()))
}

fn layer_above<'a>(own: &Aircraft, layers: &'a LayerTable) -> Result<&'a Layer> {
    current_layer(own, layers)?;
    layers.above(&own.layer).ok_or_else(|| TacticalError::NoAdjacentLayer {
        layer: own.layer.clone(),
        direction: "above",
    })
}

/// Intruder ground velocity projected on the ownship track.
fn matched_speed(own: &Aircraft, intruder: &Aircraft, layer: &Layer) -> f64 {
    let (oe, on) = own.velocity_en();
    let (ie, inn) = intruder.velocity_en();
    let norm = (oe * oe + on * on).sqrt();
    if norm > 0.0 {
        (ie * oe + inn * on) / norm
    } else {
        // Hovering ownship: creep forward at the bottom of the speed band.
        layer.lower_speed_mps + 0.5
    }
}

/// Hover altitude at the bottom of `target` and the vertical speed to get there.
fn hover_at(own: &Aircraft, target: &Layer, layers: &LayerTable) -> (f64, f64) {
    let alt_m = target.lower_alt_m;
    let vs_mps = if (own.altitude_m - alt_m).abs() < (layers.layer_height_m - own.hpz_m).abs() {
        0.0
    } else if alt_m > own.altitude_m {
        own.perf.vs_max_mps
    } else {
        own.perf.vs_min_mps
    };
    (alt_m, vs_mps)
}

fn phase_recovery_vs(own: &Aircraft) -> f64 {
    if own.phase == FlightPhase::Climb {
        own.perf.vs_max_mps
    } else {
        own.perf.vs_min_mps
    }
}

/// Resolution bookkeeping kept per aircraft.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionState {
    pub resolution: Resolution,
    pub channels: Channels,
    /// Resolution pairs still require this aircraft to follow its resolution
    pub active: bool,
    /// Aircraft this one is currently resolving against
    pub intruders: Vec<String>,
    pub pre_resolution_route: Option<Route>,
}

impl ResolutionState {
    pub fn strategy(&self) -> Strategy {
        self.resolution.strategy()
    }

    /// Switch to `resolution` and hand its channels to the resolver.
    pub fn assign(&mut self, resolution: Resolution) {
        self.channels = resolution.channels();
        self.resolution = resolution;
    }

    pub fn release_channels(&mut self) {
        self.channels = Channels::NONE;
    }

    /// Back to normal navigation.
    pub fn clear(&mut self) {
        self.resolution = Resolution::None;
        self.channels = Channels::NONE;
        self.pre_resolution_route = None;
    }

    /// No channel may stay active without a strategy.
    pub fn is_consistent(&self) -> bool {
        !self.resolution.is_none() || !self.channels.any()
    }

    pub fn add_intruder(&mut self, id: &str) {
        if !self.intruders.iter().any(|i| i == id) {
            self.intruders.push(id.to_string());
        }
    }

    pub fn remove_intruder(&mut self, id: &str) {
        self.intruders.retain(|i| i != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Layer;

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
            layer("reso_0", 20.0),
            layer("cruising_1", 30.0),
            layer("reso_1", 40.0),
        ])
    }

    fn own() -> Aircraft {
        Aircraft::new("D2", 48.0, 16.0, 32.0)
            .with_velocity(10.0, 90.0, 0.0)
            .with_layer("cruising_1")
    }

    #[test]
    fn reso1_targets_layer_above() {
        let own = own();
        let res = Resolution::build(Strategy::Reso1, &own, &own, &layers()).unwrap();
        assert_eq!(res.strategy(), Strategy::Reso1);
        assert_eq!(res.targets().alt_m, Some(40.0));
        assert_eq!(res.targets().vs_mps, Some(own.perf.vs_max_mps));
        let ch = res.channels();
        assert!(ch.alt && ch.vs && !ch.tas && !ch.hdg);
    }

    #[test]
    fn reso2_head_on_clamps_to_lower_limit() {
        let own = own();
        let intruder = Aircraft::new("D1", 48.0, 16.01, 32.0)
            .with_velocity(10.0, 270.0, 0.0)
            .with_layer("cruising_1");
        let res = Resolution::build(Strategy::Reso2, &own, &intruder, &layers()).unwrap();
        match res {
            Resolution::Reso2 { speed_mps, recovery_speed_mps } => {
                assert_eq!(speed_mps, 5.0);
                assert_eq!(recovery_speed_mps, 10.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reso2_hovering_ownship_creeps() {
        let mut own = own();
        own.ground_speed_mps = 0.0;
        let intruder = own.clone();
        let res = Resolution::build(Strategy::Reso2, &own, &intruder, &layers()).unwrap();
        assert_eq!(res.targets().speed_mps, Some(5.5));
    }

    #[test]
    fn reso5_speed_is_not_clamped() {
        let own = own();
        let intruder = Aircraft::new("D1", 48.0, 16.01, 32.0).with_velocity(20.0, 90.0, 0.0);
        let res = Resolution::build(Strategy::Reso5, &own, &intruder, &layers()).unwrap();
        let speed = res.targets().speed_mps.unwrap();
        assert!((speed - 20.0).abs() < 1e-9);
        assert!(res.channels().tas && res.channels().alt);
    }

    #[test]
    fn hover_strategies_pick_layers() {
        let mut own = own();
        own.vertical_speed_mps = 2.0;
        own.phase = FlightPhase::Climb;
        let table = layers();
        let r6 = Resolution::build(Strategy::Reso6, &own, &own, &table).unwrap();
        assert_eq!(r6.targets().alt_m, Some(40.0));
        assert_eq!(r6.targets().speed_mps, Some(0.0));
        assert_eq!(r6.recovery_vs(), Some(own.perf.vs_max_mps));
        let r7 = Resolution::build(Strategy::Reso7, &own, &own, &table).unwrap();
        assert_eq!(r7.targets().alt_m, Some(20.0));
        let r3 = Resolution::build(Strategy::Reso3, &own, &own, &table).unwrap();
        assert_eq!(r3.targets().alt_m, Some(30.0));
        // 2 m above the hover altitude, within |10 - 7.62|.
        assert_eq!(r3.targets().vs_mps, Some(0.0));
    }

    #[test]
    fn reso9_follows_leader_on_speed_only() {
        let own = own();
        let leader = Aircraft::new("D1", 48.0, 16.01, 32.0)
            .with_velocity(8.0, 90.0, 0.0)
            .with_layer("cruising_1");
        let res = Resolution::build(Strategy::Reso9, &own, &leader, &layers()).unwrap();
        match &res {
            Resolution::Reso9 { leader: id, speed_mps, alt_m, recovery_speed_mps, .. } => {
                assert_eq!(id, "D1");
                assert!((speed_mps - 8.0).abs() < 1e-9);
                assert_eq!(*alt_m, 32.0);
                assert_eq!(*recovery_speed_mps, own.autopilot.tas_mps);
            }
            other => panic!("unexpected {other:?}"),
        }
        let ch = res.channels();
        assert!(ch.tas && !ch.alt && !ch.vs && !ch.hdg);
    }

    #[test]
    fn missing_layers_are_errors() {
        let mut own = own();
        own.layer = "reso_1".into();
        assert!(Resolution::build(Strategy::Reso1, &own, &own, &layers()).is_err());
        own.layer = "unknown".into();
        assert!(Resolution::build(Strategy::Reso2, &own, &own, &layers()).is_err());
        // Level-off needs no layer information.
        assert!(Resolution::build(Strategy::Reso4, &own, &own, &layers()).is_ok());
    }

    #[test]
    fn state_consistency() {
        let mut state = ResolutionState::default();
        assert!(state.is_consistent());
        state.assign(Resolution::Reso8 {
            vs_mps: 1.0,
            recovery_vs_mps: 2.0,
        });
        assert!(state.channels.vs);
        assert!(state.is_consistent());
        state.resolution = Resolution::None;
        assert!(!state.is_consistent());
        state.clear();
        assert!(state.is_consistent());
        assert!(!state.channels.any());
    }

    #[test]
    fn intruder_list_has_no_duplicates() {
        let mut state = ResolutionState::default();
        state.add_intruder("D1");
        state.add_intruder("D1");
        state.add_intruder("D3");
        assert_eq!(state.intruders, vec!["D1".to_string(), "D3".to_string()]);
        state.remove_intruder("D1");
        assert_eq!(state.intruders, vec!["D3".to_string()]);
    }

    #[test]
    fn strategy_labels() {
        assert_eq!(Strategy::Reso2.to_string(), "RESO2");
        assert_eq!(Strategy::None.to_string(), "None");
    }
}
