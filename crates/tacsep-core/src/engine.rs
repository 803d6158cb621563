//! The tactical engine: owns the per-run pipeline state and drives detection,
//! resolution, recovery, the checkers, ETA bookkeeping and rerouting against a
//! [`WorldState`].

use crate::checks::{self, CheckReport, GeofenceChecker};
use crate::commands::{CommandQueue, HostCommand};
use crate::conflict::{ConflictDetector, Detection};
use crate::error::{Result, TacticalError};
use crate::eta;
use crate::geofence::GeofenceStore;
use crate::intent::compute_intent;
use crate::models::{Aircraft, LayerTable};
use crate::recovery::{Recovered, RecoveryTracker};
use crate::reroute::{RerouteOutcome, RerouteReason, Rerouter};
use crate::resolver::{Decision, MaccGroup, Resolver};
use crate::rules::TacticalRules;

/// Everything the tactical core reads and mutates during a tick.
#[derive(Debug, Default)]
pub struct WorldState {
    pub aircraft: Vec<Aircraft>,
    pub geofences: GeofenceStore,
    /// Commands for the host, applied at the start of the next tick
    pub commands: CommandQueue,
    pub sim_time_s: f64,
}

impl WorldState {
    pub fn new(geofences: GeofenceStore) -> Self {
        Self {
            geofences,
            ..Self::default()
        }
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.aircraft.iter().position(|ac| ac.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Aircraft> {
        self.aircraft.iter().find(|ac| ac.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Aircraft> {
        self.aircraft.iter_mut().find(|ac| ac.id == id)
    }

    /// Add an aircraft, replacing one with the same id.
    pub fn upsert(&mut self, aircraft: Aircraft) {
        match self.index_of(&aircraft.id) {
            Some(idx) => self.aircraft[idx] = aircraft,
            None => self.aircraft.push(aircraft),
        }
    }
}

/// Summary of one conflict detection and resolution pass.
#[derive(Debug, Clone, Default)]
pub struct CdReport {
    pub conflicts: usize,
    pub los: usize,
    pub decisions: Vec<Decision>,
    pub groups: Vec<MaccGroup>,
    pub recovered: Vec<Recovered>,
    pub active: usize,
}

pub struct TacticalEngine {
    layers: LayerTable,
    rules: TacticalRules,
    detector: ConflictDetector,
    tracker: RecoveryTracker,
    checker: GeofenceChecker,
    rerouter: Option<Rerouter>,
    last_detection: Detection,
}

impl TacticalEngine {
    pub fn new(layers: LayerTable, rules: TacticalRules) -> Self {
        Self {
            detector: ConflictDetector::new(rules.lookahead_s),
            layers,
            rules,
            tracker: RecoveryTracker::new(),
            checker: GeofenceChecker::new(),
            rerouter: None,
            last_detection: Detection::default(),
        }
    }

    pub fn with_rerouter(mut self, rerouter: Rerouter) -> Self {
        self.rerouter = Some(rerouter);
        self
    }

    pub fn layers(&self) -> &LayerTable {
        &self.layers
    }

    pub fn rules(&self) -> &TacticalRules {
        &self.rules
    }

    pub fn tracker(&self) -> &RecoveryTracker {
        &self.tracker
    }

    pub fn rerouter(&self) -> Option<&Rerouter> {
        self.rerouter.as_ref()
    }

    pub fn last_detection(&self) -> &Detection {
        &self.last_detection
    }

    /// Intent, detection, intent filter, resolution and recovery, in that order.
    pub fn detect_and_resolve(&mut self, world: &mut WorldState) -> CdReport {
        for ac in world.aircraft.iter_mut() {
            ac.intent = compute_intent(ac, self.rules.intent_lookahead_s, self.rules.vertical_maneuver_eps_m);
        }

        let mut detection = self.detector.detect(&world.aircraft);
        let raw = detection.conflict_count();
        self.detector.filter_by_intent(&mut detection, &world.aircraft);
        if raw != detection.conflict_count() {
            tracing::debug!(
                "intent filter removed {} of {} conflict pair(s)",
                raw - detection.conflict_count(),
                raw
            );
        }
        for (a, b) in &detection.los_pairs {
            tracing::warn!("loss of separation between {} and {}", a, b);
        }

        let resolved = Resolver::new(&self.layers).resolve(&mut world.aircraft, &detection);
        let recovery = self.tracker.update(
            &mut world.aircraft,
            &detection,
            self.layers.layer_height_m,
            self.rules.lookahead_s,
            &mut world.commands,
        );

        let report = CdReport {
            conflicts: detection.conflict_count(),
            los: detection.los_pairs.len(),
            decisions: resolved.decisions,
            groups: resolved.groups,
            recovered: recovery.recovered,
            active: recovery.active,
        };
        self.last_detection = detection;
        report
    }

    /// Geofence, overshoot and descend checkers. Landed aircraft are deleted.
    pub fn run_checks(&mut self, world: &mut WorldState) -> CheckReport {
        let report = checks::run_checks(
            &mut world.aircraft,
            &world.geofences,
            &mut self.checker,
            &self.rules,
            &mut world.commands,
        );
        for id in &report.landed {
            tracing::info!("{} landed", id);
            self.delete_aircraft(world, id);
        }
        report
    }

    /// ETA, STA and delay bookkeeping plus delay-driven speed changes.
    pub fn update_eta(&self, world: &mut WorldState) {
        let now = world.sim_time_s;
        for ac in world.aircraft.iter_mut() {
            if eta::update_eta(ac, now).is_some() {
                eta::update_speed(ac, &self.layers, &self.rules, &mut world.commands);
            }
        }
    }

    /// Replan the route of `id` over the street graph.
    pub fn reroute(&mut self, world: &mut WorldState, id: &str, reason: RerouteReason) -> Result<RerouteOutcome> {
        let idx = world
            .index_of(id)
            .ok_or_else(|| TacticalError::UnknownAircraft(id.to_string()))?;
        let Some(rerouter) = self.rerouter.as_mut() else {
            tracing::warn!("{} {} reroute requested without a street graph, holding", id, reason);
            world.commands.push(HostCommand::speed(id, 0.0));
            return Ok(RerouteOutcome {
                success: false,
                message: format!("{id} could not be rerouted: no street graph loaded"),
                path: Vec::new(),
                attempts: 0,
            });
        };
        let outcome = rerouter.reroute(
            &world.aircraft[idx],
            &self.layers,
            &world.geofences,
            world.sim_time_s,
            reason,
            &mut world.commands,
        );
        let ac = &mut world.aircraft[idx];
        if outcome.success {
            // The snapshot would restore the abandoned route on recovery.
            ac.reso.pre_resolution_route = None;
            if let Some(checks) = ac.checks.as_mut() {
                checks.overshot = false;
                checks.final_wpt_dist_m = self.rules.overshoot_sentinel_m;
            }
        }
        Ok(outcome)
    }

    /// Remove an aircraft and every reference to it.
    pub fn delete_aircraft(&mut self, world: &mut WorldState, id: &str) -> bool {
        let Some(idx) = world.index_of(id) else {
            return false;
        };
        let removed = world.aircraft.remove(idx);
        self.tracker.purge(id);
        for ac in world.aircraft.iter_mut() {
            ac.reso.remove_intruder(id);
        }
        world.commands.purge(id);
        if let Some(rerouter) = self.rerouter.as_mut() {
            rerouter.purge(id);
        }
        if let Some(fence) = removed.loiter_geofence.as_deref() {
            world.geofences.remove(fence);
        }
        // Pair indices of the last pass refer to the old slice.
        self.last_detection = Detection::default();
        tracing::info!("{} deleted", id);
        true
    }

    /// Count down loiter geofences and drop expired occupancy bookings.
    pub fn tick_expiry(&mut self, world: &mut WorldState, dt_s: f64) -> Vec<String> {
        let expired = world.geofences.tick_expiry(dt_s);
        if let Some(rerouter) = self.rerouter.as_mut() {
            let dropped = rerouter.purge_expired(world.sim_time_s);
            if !dropped.is_empty() {
                tracing::debug!("expired occupancy bookings: {:?}", dropped);
            }
        }
        expired
    }
}
