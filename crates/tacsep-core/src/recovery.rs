//! Resolution recovery: decides when an aircraft may stop following its
//! resolution and hands control back to its route.
//!
//! Pairs stay in a persistent set until they are past closest approach and no
//! longer in loss of separation. Active flags are written in a second pass so an
//! aircraft in several conflicts stays active until all of them are over.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::commands::{CommandQueue, HostCommand};
use crate::conflict::Detection;
use crate::models::{Aircraft, FlightPhase};
use crate::priority::own_resolves;
use crate::probe::{predicts_conflict, Maneuver, ProbeDirection};
use crate::resolution::{Resolution, Strategy};
use crate::spatial::flat_offset_m;

/// Geometry facts about one resolution pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairEvidence {
    pub past_cpa: bool,
    pub horizontal_los: bool,
    pub vertical_los: bool,
    /// Strategy-specific separation the pair still has to build up
    pub distance_not_ok: bool,
}

impl PairEvidence {
    /// The ownship must keep following its resolution for this pair.
    pub fn keeps_active(&self) -> bool {
        !self.past_cpa
            || (self.horizontal_los && self.vertical_los)
            || (self.distance_not_ok && self.vertical_los)
    }
}

/// Evaluate a resolution pair.
///
/// `direction_clear` is only consulted for climb/descend hover strategies
/// where the ownship resolves: it reports whether resuming the original
/// vertical direction is predicted clear.
pub fn assess_pair(
    own: &Aircraft,
    intruder: &Aircraft,
    layer_height_m: f64,
    direction_clear: impl FnOnce() -> bool,
) -> PairEvidence {
    let rpz = own.rpz_m.max(intruder.rpz_m);
    let hpz = own.hpz_m.max(intruder.hpz_m);

    let (dx, dy) = flat_offset_m(own.lat, own.lon, intruder.lat, intruder.lon);
    let (oe, on) = own.velocity_en();
    let (ie, inn) = intruder.velocity_en();
    let (vx, vy) = (ie - oe, inn - on);

    let mut past_cpa = dx * vx + dy * vy > 0.0;
    let hdist = (dx * dx + dy * dy).sqrt();
    let horizontal_los = hdist < rpz;
    let dalt = intruder.altitude_m - own.altitude_m;
    let vertical_los = dalt.abs() < hpz;

    let strategy = own.reso.strategy();
    let mut distance_not_ok = match strategy {
        Strategy::Reso2 | Strategy::Reso5 | Strategy::Reso9 => hdist < 2.0 * rpz,
        Strategy::Reso8 => dalt < layer_height_m,
        _ => false,
    };

    // Climb-and-speed waits for horizontal separation while the intruder
    // crosses its altitude.
    if strategy == Strategy::Reso5 {
        let climbing_through = intruder.phase == FlightPhase::Climb && own.altitude_m < intruder.altitude_m;
        let descending_through =
            intruder.phase == FlightPhase::Descend && dalt <= -2.0 * layer_height_m;
        if climbing_through || descending_through {
            distance_not_ok = vertical_los;
            past_cpa = !vertical_los;
        }
    }

    if matches!(strategy, Strategy::Reso6 | Strategy::Reso7)
        && own_resolves(own, intruder)
        && direction_clear()
    {
        past_cpa = true;
    }

    // Two hovering aircraft never get past CPA on their own.
    if own.is_stationary() && intruder.is_stationary() {
        past_cpa = true;
    }

    PairEvidence {
        past_cpa,
        horizontal_los,
        vertical_los,
        distance_not_ok,
    }
}

/// What recovery knows about an aircraft this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// At least one resolution pair still requires the resolution
    Active,
    /// All pairs are over; `probe_clear` tells whether resuming is predicted clear
    Inactive { probe_clear: bool },
    /// The route has no active waypoint to resume
    NoActiveWaypoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep flying the resolution
    Continue,
    /// Resume the route and issue recovery commands
    Recover,
    /// Drop the resolution without commands
    Release,
}

/// Recovery state transition for one aircraft.
pub fn transition(resolution: &Resolution, evidence: Evidence) -> Step {
    if resolution.is_none() {
        return Step::Continue;
    }
    match evidence {
        Evidence::Active => Step::Continue,
        Evidence::NoActiveWaypoint => Step::Release,
        Evidence::Inactive { probe_clear: true } => Step::Recover,
        Evidence::Inactive { probe_clear: false } => Step::Continue,
    }
}

/// Maneuvers tried before recovering from the aircraft's resolution.
///
/// Recovery may start as soon as any one of them is predicted clear.
pub fn recovery_maneuvers(
    aircraft: &Aircraft,
    layer_height_m: f64,
    lookahead_s: f64,
) -> Vec<Maneuver> {
    let perf = &aircraft.perf;
    let original_direction = || {
        let climbing = aircraft
            .route
            .active_waypoint()
            .map(|wp| wp.altitude_m - aircraft.altitude_m > 0.0)
            .unwrap_or(false);
        if climbing {
            ProbeDirection::Climb
        } else {
            ProbeDirection::Descend
        }
    };
    match &aircraft.reso.resolution {
        Resolution::None => Vec::new(),
        Resolution::Reso1 { .. } => vec![Maneuver::vertical(ProbeDirection::Descend, perf, layer_height_m)],
        // Leaving the resolution layer or dropping back to the route speed.
        Resolution::Reso5 { recovery_speed_mps, .. } => vec![
            Maneuver::vertical(ProbeDirection::Descend, perf, layer_height_m),
            Maneuver::speed(*recovery_speed_mps, lookahead_s),
        ],
        Resolution::Reso2 { recovery_speed_mps, .. } | Resolution::Reso9 { recovery_speed_mps, .. } => {
            vec![Maneuver::speed(*recovery_speed_mps, lookahead_s)]
        }
        Resolution::Reso3 { .. }
        | Resolution::Reso4 { .. }
        | Resolution::Reso6 { .. }
        | Resolution::Reso7 { .. }
        | Resolution::Reso8 { .. } => vec![Maneuver::vertical(original_direction(), perf, layer_height_m)],
    }
}

/// True when aircraft `idx` can leave its resolution without a predicted conflict.
pub fn recovery_clear(aircraft: &[Aircraft], idx: usize, layer_height_m: f64, lookahead_s: f64) -> bool {
    let Some(ac) = aircraft.get(idx) else {
        return false;
    };
    recovery_maneuvers(ac, layer_height_m, lookahead_s)
        .into_iter()
        .any(|maneuver| !predicts_conflict(aircraft, idx, None, maneuver))
}

/// Keep the aircraft on its resolution through the autopilot and active waypoint.
pub fn fly_resolution(aircraft: &mut Aircraft) {
    let targets = aircraft.reso.resolution.targets();
    let strategy = aircraft.reso.strategy();
    match strategy {
        Strategy::None => {}
        Strategy::Reso1 | Strategy::Reso5 => {
            if let Some(alt) = targets.alt_m {
                if let Some(wp) = aircraft.route.active_waypoint_mut() {
                    wp.altitude_m = alt;
                }
                hold_altitude(aircraft, alt);
            }
            if let (Strategy::Reso5, Some(speed)) = (strategy, targets.speed_mps) {
                if let Some(wp) = aircraft.route.active_waypoint_mut() {
                    wp.speed_mps = speed;
                }
            }
        }
        Strategy::Reso2 | Strategy::Reso9 => {
            if let Some(speed) = targets.speed_mps {
                if let Some(wp) = aircraft.route.active_waypoint_mut() {
                    wp.speed_mps = speed;
                }
            }
        }
        Strategy::Reso3 | Strategy::Reso6 | Strategy::Reso7 => {
            aircraft.autopilot.vs_mps = targets.vs_mps.unwrap_or(0.0);
            aircraft.autopilot.tas_mps = targets.speed_mps.unwrap_or(0.0);
            if let Some(alt) = targets.alt_m {
                hold_altitude(aircraft, alt);
            }
        }
        Strategy::Reso4 => {
            aircraft.autopilot.vs_mps = 0.0;
            if let Some(alt) = targets.alt_m {
                hold_altitude(aircraft, alt);
            }
        }
        Strategy::Reso8 => {
            if let Some(vs) = targets.vs_mps {
                aircraft.autopilot.vs_mps = vs;
            }
        }
    }
}

fn hold_altitude(aircraft: &mut Aircraft, altitude_m: f64) {
    aircraft.autopilot.alt_m = altitude_m;
    aircraft.selected_altitude_m = altitude_m;
}

/// Commands that hand an aircraft back to its route after `resolution`.
pub fn recovery_commands(aircraft: &Aircraft, resolution: &Resolution) -> Vec<HostCommand> {
    let id = aircraft.id.as_str();
    let Some(wp) = aircraft.route.active_waypoint() else {
        return Vec::new();
    };
    let (spd, alt) = (wp.speed_mps, wp.altitude_m);
    match resolution.strategy() {
        Strategy::None => Vec::new(),
        Strategy::Reso1 | Strategy::Reso5 => vec![
            HostCommand::speed(id, spd),
            HostCommand::altitude(id, alt),
            HostCommand::at_altitude(id, alt, HostCommand::vnav_on(id)),
            HostCommand::at_altitude(id, alt, HostCommand::lnav_on(id)),
        ],
        Strategy::Reso2 | Strategy::Reso9 => vec![
            HostCommand::speed(id, spd),
            HostCommand::altitude(id, alt),
            HostCommand::at_speed(id, spd, HostCommand::vnav_on(id)),
            HostCommand::at_speed(id, spd, HostCommand::lnav_on(id)),
        ],
        Strategy::Reso3 | Strategy::Reso6 | Strategy::Reso7 => vec![
            HostCommand::altitude(id, alt),
            HostCommand::at_altitude(id, alt, HostCommand::lnav_on(id)),
            HostCommand::at_altitude(id, alt, HostCommand::vnav_on(id)),
        ],
        Strategy::Reso4 | Strategy::Reso8 => {
            let mut commands = Vec::new();
            if let Some(vs) = resolution.recovery_vs() {
                commands.push(HostCommand::VerticalSpeed {
                    id: id.to_string(),
                    vs_mps: vs,
                });
            }
            commands.push(HostCommand::vnav_on(id));
            commands
        }
    }
}

/// Aircraft that left its resolution this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub aircraft: String,
    pub strategy: Strategy,
    /// False when the resolution was dropped without recovery commands
    pub commanded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryOutcome {
    pub active: usize,
    pub resolved_pairs: usize,
    pub recovered: Vec<Recovered>,
}

/// Persistent resolution-pair bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RecoveryTracker {
    pairs: BTreeSet<(String, String)>,
}

impl RecoveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &(String, String)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Forget every pair that references `id`.
    pub fn purge(&mut self, id: &str) {
        self.pairs.retain(|(own, int)| own != id && int != id);
    }

    /// Run one recovery pass after the resolver.
    pub fn update(
        &mut self,
        aircraft: &mut [Aircraft],
        detection: &Detection,
        layer_height_m: f64,
        lookahead_s: f64,
        queue: &mut CommandQueue,
    ) -> RecoveryOutcome {
        self.pairs
            .extend(detection.pairs.iter().map(|pair| pair.ids()));

        let index: HashMap<String, usize> = aircraft
            .iter()
            .enumerate()
            .map(|(idx, ac)| (ac.id.clone(), idx))
            .collect();

        let mut change_active: BTreeMap<usize, bool> = BTreeMap::new();
        let mut resolved = Vec::new();
        for pair in &self.pairs {
            let (own_id, int_id) = pair;
            let Some(&own_idx) = index.get(own_id) else {
                resolved.push(pair.clone());
                continue;
            };
            let keep = match index.get(int_id) {
                Some(&int_idx) => {
                    let view: &[Aircraft] = aircraft;
                    let own = &view[own_idx];
                    let direction_clear = || recovery_clear(view, own_idx, layer_height_m, lookahead_s);
                    assess_pair(own, &view[int_idx], layer_height_m, direction_clear).keeps_active()
                }
                None => false,
            };
            if keep {
                change_active.insert(own_idx, true);
            } else {
                change_active.entry(own_idx).or_insert(false);
                resolved.push(pair.clone());
                aircraft[own_idx].reso.remove_intruder(int_id);
            }
        }
        for pair in &resolved {
            self.pairs.remove(pair);
        }

        let mut outcome = RecoveryOutcome {
            resolved_pairs: resolved.len(),
            ..RecoveryOutcome::default()
        };

        // Second pass over all aircraft once every pair is known.
        for (idx, ac) in aircraft.iter_mut().enumerate() {
            ac.reso.active = change_active.get(&idx).copied().unwrap_or(false);
            if ac.reso.active {
                outcome.active += 1;
                fly_resolution(ac);
            }
        }

        for idx in 0..aircraft.len() {
            if aircraft[idx].reso.active {
                continue;
            }
            aircraft[idx].reso.release_channels();
            if aircraft[idx].reso.resolution.is_none() {
                continue;
            }

            let evidence = if aircraft[idx].route.active_waypoint().is_none() {
                Evidence::NoActiveWaypoint
            } else {
                Evidence::Inactive {
                    probe_clear: recovery_clear(aircraft, idx, layer_height_m, lookahead_s),
                }
            };

            let ac = &mut aircraft[idx];
            let strategy = ac.reso.strategy();
            match transition(&ac.reso.resolution, evidence) {
                Step::Continue => fly_resolution(ac),
                Step::Release => {
                    ac.reso.clear();
                    outcome.recovered.push(Recovered {
                        aircraft: ac.id.clone(),
                        strategy,
                        commanded: false,
                    });
                }
                Step::Recover => {
                    let resolution = std::mem::take(&mut ac.reso.resolution);
                    restore_route(ac);
                    if let Some(vs) = match resolution.strategy() {
                        Strategy::Reso4 | Strategy::Reso8 => resolution.recovery_vs(),
                        _ => None,
                    } {
                        ac.autopilot.vs_mps = vs;
                    }
                    queue.extend(recovery_commands(ac, &resolution));
                    ac.reso.clear();
                    tracing::info!("{} recovered from {}", ac.id, strategy);
                    outcome.recovered.push(Recovered {
                        aircraft: ac.id.clone(),
                        strategy,
                        commanded: true,
                    });
                }
            }
        }

        tracing::debug!(
            "recovery: {} pair(s) tracked, {} active, {} recovered",
            self.pairs.len(),
            outcome.active,
            outcome.recovered.len()
        );
        outcome
    }
}

/// Put the pre-resolution route back, keeping the current progress along it.
fn restore_route(aircraft: &mut Aircraft) {
    let Some(mut route) = aircraft.reso.pre_resolution_route.take() else {
        return;
    };
    if let Some(active) = aircraft.route.active_index() {
        if active < route.waypoints.len() {
            route.active = Some(active);
        }
    }
    aircraft.route = route;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Waypoint;
    use crate::spatial::meters_to_lon;

    const LAT: f64 = 48.2;
    const LON: f64 = 16.3;

    fn east(m: f64) -> f64 {
        LON + meters_to_lon(m, LAT)
    }

    fn wp(lon: f64, alt: f64, spd: f64) -> Waypoint {
        Waypoint {
            name: String::new(),
            lat: LAT,
            lon,
            altitude_m: alt,
            speed_mps: spd,
            turn: false,
        }
    }

    fn reso2() -> Resolution {
        Resolution::Reso2 {
            speed_mps: 5.0,
            recovery_speed_mps: 10.0,
        }
    }

    #[test]
    fn approaching_pair_stays_active() {
        let mut own = Aircraft::new("D2", LAT, LON, 30.0).with_velocity(10.0, 90.0, 0.0);
        own.reso.assign(reso2());
        let int = Aircraft::new("D1", LAT, east(300.0), 30.0).with_velocity(10.0, 270.0, 0.0);
        let evidence = assess_pair(&own, &int, 10.0, || true);
        assert!(!evidence.past_cpa);
        assert!(evidence.keeps_active());
    }

    #[test]
    fn diverging_pair_is_released() {
        let mut own = Aircraft::new("D2", LAT, LON, 30.0).with_velocity(10.0, 270.0, 0.0);
        own.reso.assign(reso2());
        let int = Aircraft::new("D1", LAT, east(300.0), 30.0).with_velocity(10.0, 90.0, 0.0);
        let evidence = assess_pair(&own, &int, 10.0, || true);
        assert!(evidence.past_cpa);
        assert!(!evidence.keeps_active());
    }

    #[test]
    fn speed_strategy_waits_for_double_radius() {
        let mut own = Aircraft::new("D2", LAT, LON, 30.0).with_velocity(10.0, 270.0, 0.0);
        own.reso.assign(reso2());
        let int = Aircraft::new("D1", LAT, east(80.0), 30.0).with_velocity(10.0, 90.0, 0.0);
        let evidence = assess_pair(&own, &int, 10.0, || true);
        assert!(evidence.past_cpa);
        assert!(evidence.distance_not_ok);
        assert!(evidence.keeps_active());
    }

    #[test]
    fn stationary_pair_counts_as_past_cpa() {
        let mut own = Aircraft::new("D2", LAT, LON, 30.0);
        own.reso.assign(reso2());
        let int = Aircraft::new("D1", LAT, east(120.0), 30.0);
        let evidence = assess_pair(&own, &int, 10.0, || false);
        assert!(evidence.past_cpa);
        assert!(!evidence.keeps_active());
    }

    #[test]
    fn hover_pair_released_when_original_direction_clear() {
        let mut own = Aircraft::new("D7", LAT, LON, 30.0).with_velocity(10.0, 90.0, 0.0);
        own.reso.assign(Resolution::Reso6 {
            alt_m: 40.0,
            vs_mps: 5.0,
            recovery_vs_mps: 5.0,
        });
        let int = Aircraft::new("D1", LAT, east(300.0), 50.0).with_velocity(10.0, 270.0, 0.0);
        assert!(!assess_pair(&own, &int, 10.0, || true).keeps_active());
        assert!(assess_pair(&own, &int, 10.0, || false).keeps_active());
    }

    #[test]
    fn climb_and_speed_recovers_when_speed_alone_is_clear() {
        let mut own = Aircraft::new("D5", LAT, LON, 30.0).with_velocity(0.0, 90.0, 0.0);
        own.reso.assign(Resolution::Reso5 {
            alt_m: 30.0,
            vs_mps: 0.0,
            speed_mps: 0.0,
            recovery_vs_mps: -5.0,
            recovery_speed_mps: 10.0,
        });
        assert_eq!(recovery_maneuvers(&own, 10.0, 20.0).len(), 2);

        // Directly below: descending runs into it, speeding up passes over it.
        let below = Aircraft::new("D1", LAT, east(10.0), 20.0);
        let mut aircraft = vec![own, below];
        assert!(predicts_conflict(
            &aircraft,
            0,
            None,
            Maneuver::vertical(ProbeDirection::Descend, &aircraft[0].perf, 10.0)
        ));
        assert!(recovery_clear(&aircraft, 0, 10.0, 20.0));

        // Traffic ahead on the same level blocks the speed option too.
        aircraft.push(Aircraft::new("D3", LAT, east(100.0), 30.0));
        assert!(!recovery_clear(&aircraft, 0, 10.0, 20.0));
    }

    #[test]
    fn transition_table() {
        let r = reso2();
        assert_eq!(transition(&r, Evidence::Active), Step::Continue);
        assert_eq!(transition(&r, Evidence::Inactive { probe_clear: true }), Step::Recover);
        assert_eq!(transition(&r, Evidence::Inactive { probe_clear: false }), Step::Continue);
        assert_eq!(transition(&r, Evidence::NoActiveWaypoint), Step::Release);
        assert_eq!(transition(&Resolution::None, Evidence::NoActiveWaypoint), Step::Continue);
    }

    #[test]
    fn recovery_commands_for_speed_strategy() {
        let ac = Aircraft::new("D2", LAT, LON, 30.0).with_route(vec![wp(east(500.0), 30.0, 10.0)]);
        let rendered: Vec<String> = recovery_commands(&ac, &reso2())
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(rendered.len(), 4);
        assert!(rendered[0].starts_with("SPD D2 19.4"));
        assert!(rendered[2].starts_with("D2 ATSPD"));
        assert!(rendered[3].ends_with("LNAV D2 ON"));
    }

    #[test]
    fn tracker_recovers_after_divergence_and_restores_route() {
        let route = vec![wp(east(-800.0), 30.0, 10.0), wp(east(-1600.0), 30.0, 10.0)];
        let mut own = Aircraft::new("D2", LAT, LON, 30.0)
            .with_velocity(10.0, 270.0, 0.0)
            .with_route(route.clone());
        own.reso.pre_resolution_route = Some(own.route.clone());
        own.reso.assign(reso2());
        own.reso.add_intruder("D1");
        if let Some(wp) = own.route.active_waypoint_mut() {
            wp.speed_mps = 5.0;
        }
        let int = Aircraft::new("D1", LAT, east(400.0), 30.0).with_velocity(10.0, 90.0, 0.0);
        let mut aircraft = vec![own, int];

        let mut tracker = RecoveryTracker::new();
        let detection = Detection::default();
        tracker.pairs.insert(("D2".into(), "D1".into()));

        let mut queue = CommandQueue::new();
        let outcome = tracker.update(&mut aircraft, &detection, 10.0, 20.0, &mut queue);
        assert!(tracker.is_empty());
        assert_eq!(outcome.recovered.len(), 1);
        assert!(outcome.recovered[0].commanded);
        let own = &aircraft[0];
        assert_eq!(own.reso.strategy(), Strategy::None);
        assert!(own.reso.is_consistent());
        assert!(own.reso.intruders.is_empty());
        assert_eq!(own.route.waypoints[0].speed_mps, 10.0);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn tracker_drops_pairs_of_deleted_aircraft() {
        let mut own = Aircraft::new("D2", LAT, LON, 30.0).with_velocity(10.0, 90.0, 0.0);
        own.reso.assign(reso2());
        own.reso.add_intruder("D9");
        let mut aircraft = vec![own];
        let mut tracker = RecoveryTracker::new();
        tracker.pairs.insert(("D2".into(), "D9".into()));
        tracker.pairs.insert(("D9".into(), "D2".into()));
        let mut queue = CommandQueue::new();
        tracker.update(&mut aircraft, &Detection::default(), 10.0, 20.0, &mut queue);
        assert!(tracker.is_empty());
        assert!(aircraft[0].reso.intruders.is_empty());
        // No route to resume: the resolution is dropped without commands.
        assert_eq!(aircraft[0].reso.strategy(), Strategy::None);
        assert!(queue.is_empty());
    }

    #[test]
    fn purge_removes_both_directions() {
        let mut tracker = RecoveryTracker::new();
        tracker.pairs.insert(("D1".into(), "D2".into()));
        tracker.pairs.insert(("D2".into(), "D1".into()));
        tracker.pairs.insert(("D3".into(), "D4".into()));
        tracker.purge("D1");
        assert_eq!(tracker.len(), 1);
    }
}
