//! Conflict detection: state-based closest-approach test plus the intent filter.
//!
//! Every ordered pair of aircraft within reach of each other is tested with
//! straight-line extrapolation of the current velocities. Pairs whose intents
//! show they will not actually meet are removed afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Aircraft, FlightPhase};
use crate::spatial::{flat_offset_m, polyline_distance_m, LocalFrame};

/// Position and velocity used for one side of a pairwise test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub gs_east_mps: f64,
    pub gs_north_mps: f64,
    pub vs_mps: f64,
}

impl StateVector {
    pub fn of(aircraft: &Aircraft) -> Self {
        let (east, north) = aircraft.velocity_en();
        Self {
            lat: aircraft.lat,
            lon: aircraft.lon,
            altitude_m: aircraft.altitude_m,
            gs_east_mps: east,
            gs_north_mps: north,
            vs_mps: aircraft.vertical_speed_mps,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.altitude_m.is_finite()
            && self.gs_east_mps.is_finite()
            && self.gs_north_mps.is_finite()
            && self.vs_mps.is_finite()
    }
}

/// Closest-approach geometry between an ownship and an intruder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairGeometry {
    /// Bearing from ownship to intruder, degrees
    pub bearing_deg: f64,
    pub distance_m: f64,
    /// Squared horizontal distance at closest approach
    pub dcpa2_m2: f64,
    pub tcpa_s: f64,
    /// Time to loss of separation
    pub tlos_s: f64,
    /// Time the predicted loss of separation ends
    pub tout_s: f64,
    pub horizontal_conflict: bool,
    /// Vertical envelopes overlap within the lookahead window
    pub vertical_conflict: bool,
    pub conflict: bool,
    pub los: bool,
}

impl PairGeometry {
    pub fn dcpa_m(&self) -> f64 {
        self.dcpa2_m2.sqrt()
    }

    /// Same geometry seen from the intruder.
    fn reversed(&self) -> Self {
        Self {
            bearing_deg: (self.bearing_deg + 180.0).rem_euclid(360.0),
            ..*self
        }
    }
}

/// Straight-line closest-approach test between two state vectors.
pub fn pair_geometry(
    own: &StateVector,
    intruder: &StateVector,
    rpz_m: f64,
    hpz_m: f64,
    lookahead_s: f64,
) -> PairGeometry {
    let (dx, dy) = flat_offset_m(own.lat, own.lon, intruder.lat, intruder.lon);
    let dist2 = dx * dx + dy * dy;
    let distance_m = dist2.sqrt();
    let bearing_deg = dx.atan2(dy).to_degrees().rem_euclid(360.0);

    let du = own.gs_east_mps - intruder.gs_east_mps;
    let dv = own.gs_north_mps - intruder.gs_north_mps;
    let mut dv2 = du * du + dv * dv;
    if dv2.abs() < 1e-6 {
        dv2 = 1e-6;
    }
    let vrel = dv2.sqrt();

    let tcpa_s = (du * dx + dv * dy) / dv2;
    let dcpa2_m2 = (dist2 - tcpa_s * tcpa_s * dv2).abs();

    let r2 = rpz_m * rpz_m;
    let horizontal_conflict = dcpa2_m2 < r2;
    let dtinhor = (r2 - dcpa2_m2).max(0.0).sqrt() / vrel;
    let (tinhor, touthor) = if horizontal_conflict {
        (tcpa_s - dtinhor, tcpa_s + dtinhor)
    } else {
        (1e8, -1e8)
    };

    let dalt = own.altitude_m - intruder.altitude_m;
    let mut dvs = own.vs_mps - intruder.vs_mps;
    if dvs.abs() < 1e-6 {
        dvs = 1e-6;
    }
    let tcross_hi = (dalt + hpz_m) / -dvs;
    let tcross_lo = (dalt - hpz_m) / -dvs;
    let tinver = tcross_hi.min(tcross_lo);
    let toutver = tcross_hi.max(tcross_lo);

    let tinconf = tinver.max(tinhor);
    let toutconf = toutver.min(touthor);

    let conflict =
        horizontal_conflict && tinconf <= toutconf && toutconf > 0.0 && tinconf < lookahead_s;
    let vertical_conflict = toutver > 0.0 && tinver < lookahead_s;
    let los = distance_m < rpz_m && dalt.abs() < hpz_m;

    PairGeometry {
        bearing_deg,
        distance_m,
        dcpa2_m2,
        tcpa_s,
        tlos_s: tinconf,
        tout_s: toutconf,
        horizontal_conflict,
        vertical_conflict,
        conflict,
        los,
    }
}

/// One ordered conflict pair: `own` reasons about `intruder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPair {
    pub own: String,
    pub intruder: String,
    pub own_idx: usize,
    pub int_idx: usize,
    pub rpz_m: f64,
    pub hpz_m: f64,
    pub geometry: PairGeometry,
}

impl ConflictPair {
    pub fn ids(&self) -> (String, String) {
        (self.own.clone(), self.intruder.clone())
    }
}

/// Output of one detection pass.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub pairs: Vec<ConflictPair>,
    pub los_pairs: Vec<(String, String)>,
    pub in_conflict: Vec<bool>,
}

impl Detection {
    pub fn conflict_count(&self) -> usize {
        self.pairs.len()
    }
}

/// State-based conflict detector with grid pruning.
pub struct ConflictDetector {
    /// How far ahead to predict (seconds)
    pub lookahead_s: f64,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl ConflictDetector {
    pub fn new(lookahead_s: f64) -> Self {
        Self { lookahead_s }
    }

    /// Detect conflicts between every pair of aircraft that can meet within the lookahead.
    pub fn detect(&self, aircraft: &[Aircraft]) -> Detection {
        let n = aircraft.len();
        let mut detection = Detection {
            in_conflict: vec![false; n],
            ..Detection::default()
        };
        if n < 2 {
            return detection;
        }

        let max_speed = aircraft
            .iter()
            .map(|ac| ac.ground_speed_mps.abs())
            .filter(|s| s.is_finite())
            .fold(0.0, f64::max);
        let max_rpz = aircraft.iter().map(|ac| ac.rpz_m).fold(0.0, f64::max);
        let reach_m = max_rpz + 2.0 * max_speed * self.lookahead_s;
        let cell_size_m = reach_m.max(1.0);

        let positions: Vec<_> = aircraft.iter().map(|ac| ac.position()).collect();
        let frame = LocalFrame::around(&positions);
        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut cells = Vec::with_capacity(n);
        for (idx, pos) in positions.iter().enumerate() {
            let (x, y) = frame.to_xy(*pos);
            let cell = ((x / cell_size_m).floor() as i64, (y / cell_size_m).floor() as i64);
            cells.push(cell);
            grid.entry(cell).or_default().push(idx);
        }

        let states: Vec<StateVector> = aircraft.iter().map(StateVector::of).collect();

        // Reach equals the cell size, so neighbouring cells cover every candidate.
        for i in 0..n {
            let (cx, cy) = cells[i];
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(indices) = grid.get(&(cx + dx, cy + dy)) else {
                        continue;
                    };
                    for &j in indices {
                        if j <= i {
                            continue;
                        }
                        let rpz = aircraft[i].rpz_m.max(aircraft[j].rpz_m);
                        let hpz = aircraft[i].hpz_m.max(aircraft[j].hpz_m);
                        let geometry =
                            pair_geometry(&states[i], &states[j], rpz, hpz, self.lookahead_s);

                        if geometry.los {
                            detection
                                .los_pairs
                                .push((aircraft[i].id.clone(), aircraft[j].id.clone()));
                            detection
                                .los_pairs
                                .push((aircraft[j].id.clone(), aircraft[i].id.clone()));
                        }
                        if !geometry.conflict {
                            continue;
                        }

                        for (own, int, geo) in [(i, j, geometry), (j, i, geometry.reversed())] {
                            detection.in_conflict[own] = true;
                            detection.pairs.push(ConflictPair {
                                own: aircraft[own].id.clone(),
                                intruder: aircraft[int].id.clone(),
                                own_idx: own,
                                int_idx: int,
                                rpz_m: rpz,
                                hpz_m: hpz,
                                geometry: geo,
                            });
                        }
                    }
                }
            }
        }

        tracing::debug!(
            "detected {} conflict pair(s), {} in LOS",
            detection.pairs.len(),
            detection.los_pairs.len()
        );
        detection
    }

    /// Remove pairs whose intents show the aircraft will not actually meet.
    ///
    /// A pair stays a genuine conflict when the intent lines come closer than the
    /// pair's protection radius and the phase-dependent vertical condition holds.
    /// Both aircraft of every surviving pair are marked in conflict afterwards, so
    /// an aircraft in several conflicts keeps its flag when one of them is filtered.
    pub fn filter_by_intent(&self, detection: &mut Detection, aircraft: &[Aircraft]) {
        let before = detection.pairs.len();
        detection.pairs.retain(|pair| {
            let (Some(own), Some(int)) = (aircraft.get(pair.own_idx), aircraft.get(pair.int_idx))
            else {
                return false;
            };
            is_genuine_conflict(pair, own, int)
        });

        detection.in_conflict.iter_mut().for_each(|flag| *flag = false);
        for pair in &detection.pairs {
            if let Some(flag) = detection.in_conflict.get_mut(pair.own_idx) {
                *flag = true;
            }
            if let Some(flag) = detection.in_conflict.get_mut(pair.int_idx) {
                *flag = true;
            }
        }

        let removed = before - detection.pairs.len();
        if removed > 0 {
            tracing::debug!("intent filter removed {} pair(s)", removed);
        }
    }
}

fn is_genuine_conflict(pair: &ConflictPair, own: &Aircraft, int: &Aircraft) -> bool {
    // No lookahead information: keep the conflict.
    if own.intent.is_degenerate() || int.intent.is_degenerate() {
        return true;
    }
    let Some(intent_distance) = polyline_distance_m(&own.intent.line, &int.intent.line) else {
        return true;
    };
    let vertical = vertical_condition(
        own,
        int,
        pair.hpz_m,
        pair.geometry.vertical_conflict,
    );
    intent_distance < pair.rpz_m && vertical
}

/// Phase-dependent vertical part of the intent filter.
fn vertical_condition(own: &Aircraft, int: &Aircraft, hpz_m: f64, pre_intent_vertical: bool) -> bool {
    use FlightPhase::*;

    let own_target = own.intent.target_alt_m;
    let int_target = int.intent.target_alt_m;
    let within = hpz_m >= (own_target - int_target).abs();

    match (own.phase, int.phase) {
        (Cruise, Climb) | (Descend, Cruise) => {
            if own_target > int_target || own.altitude_m < int.altitude_m {
                within
            } else {
                pre_intent_vertical
            }
        }
        (Cruise, Descend) | (Climb, Cruise) => {
            if own_target < int_target || own.altitude_m > int.altitude_m {
                within
            } else {
                pre_intent_vertical
            }
        }
        (Cruise, Cruise) => within,
        _ => pre_intent_vertical,
    }
}
