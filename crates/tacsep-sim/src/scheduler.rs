//! Fixed-timestep scheduler.
//!
//! Owns the world, the tactical engine and the host model. Each tick applies
//! queued commands, flies the host, then runs detection/resolution, the
//! checkers and ETA bookkeeping at their own cadences, and finally counts
//! down geofence expiry.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::time::interval;

use tacsep_core::eta;
use tacsep_core::models::Aircraft;
use tacsep_core::{
    Geofence, HostCommand, RerouteOutcome, RerouteReason, Rerouter, StreetGraph, TacticalEngine, WorldState,
};

use crate::config::Config;
use crate::host::{Applied, HostModel};
use crate::operator::{self, CommandOutcome, OperatorCommand};
use crate::report::{RunReport, RunStats};
use crate::scenario::{Scenario, ScheduledCommand};

/// Ceiling of loiter geofences created with an aircraft.
pub const LOITER_CEILING_M: f64 = 10_000.0;

/// Rounds of queue draining per tick; commands emitted while dispatching
/// (reroute sequences) are applied in the same tick.
const MAX_DISPATCH_ROUNDS: usize = 4;

pub struct Simulator {
    world: WorldState,
    engine: TacticalEngine,
    host: HostModel,
    config: Config,
    scenario: String,
    schedule: Vec<ScheduledCommand>,
    next_scheduled: usize,
    stats: RunStats,
    started_at: DateTime<Utc>,
    next_cd_s: f64,
    next_check_s: f64,
    next_eta_s: f64,
    duration_s: Option<f64>,
}

impl Simulator {
    /// Build a simulator from a scenario. Config paths override the scenario's.
    pub fn from_scenario(scenario: &Scenario, config: Config) -> anyhow::Result<Self> {
        let rules = match &config.rules_path {
            Some(_) => config.load_rules()?,
            None => scenario.rules.clone().unwrap_or_default(),
        };
        let layers = scenario.layer_table();
        let mut world = scenario.build_world(&layers, &rules)?;
        if let Some(path) = &config.geofences_path {
            let count = world
                .geofences
                .load(path)
                .with_context(|| format!("loading geofences from {}", path.display()))?;
            tracing::info!("loaded {} geofence(s) from {}", count, path.display());
        }

        let reroute_rules = rules.reroute.clone();
        let mut engine = TacticalEngine::new(layers, rules);
        if let Some(path) = config.graph_path.as_ref().or(scenario.graph.as_ref()) {
            let graph = StreetGraph::load(path).with_context(|| format!("loading street graph {}", path.display()))?;
            engine = engine.with_rerouter(Rerouter::new(graph, reroute_rules));
        } else {
            tracing::warn!("no street graph configured, reroutes will hold aircraft");
        }

        let mut schedule = scenario.commands.clone();
        schedule.sort_by(|a, b| a.at_s.total_cmp(&b.at_s));

        tracing::info!(
            "scenario {}: {} aircraft, {} geofence(s), {} scheduled command(s)",
            scenario.name,
            world.aircraft.len(),
            world.geofences.len(),
            schedule.len()
        );

        Ok(Self {
            world,
            engine,
            host: HostModel::new(),
            config,
            scenario: scenario.name.clone(),
            schedule,
            next_scheduled: 0,
            stats: RunStats::default(),
            started_at: Utc::now(),
            next_cd_s: 0.0,
            next_check_s: 0.0,
            next_eta_s: 0.0,
            duration_s: scenario.duration_s,
        })
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn engine(&self) -> &TacticalEngine {
        &self.engine
    }

    pub fn host(&self) -> &HostModel {
        &self.host
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn sim_time_s(&self) -> f64 {
        self.world.sim_time_s
    }

    /// Whether the scenario duration has elapsed.
    pub fn finished(&self) -> bool {
        self.duration_s.is_some_and(|d| self.world.sim_time_s >= d)
    }

    /// Advance the simulation by one timestep.
    pub fn tick(&mut self) {
        let dt = self.config.dt_s;
        self.run_scheduled();
        self.drain_queue();

        let layers = self.engine.layers().clone();
        for command in self.host.step(&mut self.world, &layers, dt) {
            self.dispatch(command);
        }
        self.world.sim_time_s += dt;
        let now = self.world.sim_time_s;

        if now + 1e-9 >= self.next_cd_s {
            self.next_cd_s = now + self.config.cd_dt_s;
            let report = self.engine.detect_and_resolve(&mut self.world);
            self.stats.conflict_pairs += report.conflicts;
            self.stats.los_pairs += report.los;
            self.stats.recoveries += report.recovered.len();
            self.stats.max_active_pairs = self.stats.max_active_pairs.max(report.active);
            for decision in &report.decisions {
                tracing::info!(
                    "{} resolves conflict with {}: {}",
                    decision.aircraft,
                    decision.intruder,
                    decision.strategy.description()
                );
                *self.stats.resolutions.entry(decision.strategy.to_string()).or_default() += 1;
            }
        }

        if now + 1e-9 >= self.next_check_s {
            self.next_check_s = now + self.config.check_dt_s;
            let report = self.engine.run_checks(&mut self.world);
            self.stats.geofence_reroute_requests += report.geofence_reroutes;
            self.stats.overshoots += report.overshoots;
            self.stats.descents_staged += report.descents_staged;
            for id in report.landed {
                self.host.purge(&id);
                self.stats.landed.push(id);
            }
        }

        if now + 1e-9 >= self.next_eta_s {
            self.next_eta_s = now + self.config.eta_dt_s;
            self.engine.update_eta(&mut self.world);
        }

        for name in self.engine.tick_expiry(&mut self.world, dt) {
            for ac in self.world.aircraft.iter_mut() {
                if ac.loiter_geofence.as_deref() == Some(name.as_str()) {
                    ac.loiter_geofence = None;
                }
            }
            self.stats.expired_geofences.push(name);
        }
        self.stats.ticks += 1;
    }

    /// Run `ticks` timesteps, stopping early when the scenario duration elapses.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            if self.finished() {
                break;
            }
            self.tick();
        }
    }

    /// Run paced against the wall clock, one tick per `dt`.
    pub async fn run_realtime(&mut self, ticks: u64) {
        let mut ticker = interval(Duration::from_secs_f64(self.config.dt_s));
        for _ in 0..ticks {
            ticker.tick().await;
            if self.finished() {
                break;
            }
            self.tick();
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport::new(&self.scenario, self.started_at, &self.world, &self.stats)
    }

    fn run_scheduled(&mut self) {
        while let Some(next) = self.schedule.get(self.next_scheduled) {
            if next.at_s > self.world.sim_time_s + 1e-9 {
                break;
            }
            let line = next.command.clone();
            self.next_scheduled += 1;
            let outcome = self.execute(&line);
            if outcome.success {
                tracing::info!("{}: {}", line, outcome.message);
            } else {
                tracing::warn!("{}: {}", line, outcome.message);
            }
        }
    }

    fn drain_queue(&mut self) {
        for _ in 0..MAX_DISPATCH_ROUNDS {
            let batch = self.world.commands.drain();
            if batch.is_empty() {
                return;
            }
            for command in batch {
                self.dispatch(command);
            }
        }
        if !self.world.commands.is_empty() {
            tracing::debug!("command queue still busy, continuing next tick");
        }
    }

    /// Hand a command to the host, handling the ones it forwards.
    pub fn dispatch(&mut self, command: HostCommand) {
        tracing::trace!("dispatch {}", command);
        let Applied::Forward(command) = self.host.apply(&mut self.world, command) else {
            return;
        };
        match command {
            HostCommand::Delete { id } => {
                self.delete(&id);
            }
            HostCommand::RerouteGeofence { id } => {
                self.reroute(&id, RerouteReason::Geofence);
            }
            HostCommand::RerouteOvershoot { id } => {
                self.reroute(&id, RerouteReason::Overshoot);
            }
            HostCommand::Echo { text } => tracing::info!("{}", text),
            other => tracing::debug!("ignoring forwarded {}", other),
        }
    }

    fn delete(&mut self, id: &str) -> bool {
        self.host.purge(id);
        let deleted = self.engine.delete_aircraft(&mut self.world, id);
        if deleted {
            self.stats.deleted.push(id.to_string());
        }
        deleted
    }

    fn reroute(&mut self, id: &str, reason: RerouteReason) -> CommandOutcome {
        // Conditional commands of the abandoned route must not fire.
        self.host.purge(id);
        match self.engine.reroute(&mut self.world, id, reason) {
            Ok(RerouteOutcome { success, message, .. }) => {
                if success {
                    self.stats.reroutes_ok += 1;
                } else {
                    self.stats.reroutes_failed += 1;
                }
                CommandOutcome { success, message }
            }
            Err(err) => {
                self.stats.reroutes_failed += 1;
                CommandOutcome::fail(err.to_string())
            }
        }
    }

    /// Execute one operator command line.
    pub fn execute(&mut self, line: &str) -> CommandOutcome {
        let outcome = match operator::parse(line) {
            Ok(command) => self.execute_command(command),
            Err(err) => CommandOutcome::fail(err.to_string()),
        };
        if !outcome.success {
            self.stats.operator_failures += 1;
        }
        outcome
    }

    fn execute_command(&mut self, command: OperatorCommand) -> CommandOutcome {
        match command {
            OperatorCommand::Geofence {
                name,
                top,
                bottom,
                coordinates,
            } => {
                let created = Geofence::new(name.clone(), coordinates, top, bottom)
                    .and_then(|fence| self.world.geofences.insert(fence));
                match created {
                    Ok(true) => CommandOutcome::ok(format!("geofence {name} replaced")),
                    Ok(false) => CommandOutcome::ok(format!("geofence {name} created")),
                    Err(err) => CommandOutcome::fail(err.to_string()),
                }
            }
            OperatorCommand::DelGeofence { name } => match self.world.geofences.remove(&name) {
                Some(_) => CommandOutcome::ok(format!("geofence {name} deleted")),
                None => CommandOutcome::fail(format!("no geofence named {name}")),
            },
            OperatorCommand::SaveGeofences { path } => {
                let Some(path) = self.geofence_file(path) else {
                    return CommandOutcome::fail("no geofence file given");
                };
                match self.world.geofences.save(&path) {
                    Ok(()) => CommandOutcome::ok(format!(
                        "saved {} geofence(s) to {}",
                        self.world.geofences.len(),
                        path.display()
                    )),
                    Err(err) => CommandOutcome::fail(err.to_string()),
                }
            }
            OperatorCommand::LoadGeofences { path } => {
                let Some(path) = self.geofence_file(path) else {
                    return CommandOutcome::fail("no geofence file given");
                };
                match self.world.geofences.load(&path) {
                    Ok(count) => CommandOutcome::ok(format!("loaded {count} geofence(s) from {}", path.display())),
                    Err(err) => CommandOutcome::fail(err.to_string()),
                }
            }
            OperatorCommand::RerouteGeofence { id } => self.reroute(&id, RerouteReason::Geofence),
            OperatorCommand::RerouteOvershoot { id } => self.reroute(&id, RerouteReason::Overshoot),
            OperatorCommand::EchoAcGeofence { id } => match self.world.get(&id) {
                Some(ac) => {
                    let (route, inside) = ac
                        .checks
                        .as_ref()
                        .map(|c| (c.route_in_geofence, c.aircraft_in_geofence))
                        .unwrap_or_default();
                    CommandOutcome::ok(format!("{id} route in geofence: {route}, aircraft in geofence: {inside}"))
                }
                None => unknown(&id),
            },
            OperatorCommand::EchoAcOvershot { id } => match self.world.get(&id) {
                Some(ac) => {
                    let overshot = ac.checks.as_ref().is_some_and(|c| c.overshot);
                    CommandOutcome::ok(format!("{id} overshot: {overshot}"))
                }
                None => unknown(&id),
            },
            OperatorCommand::SetPriority { id, priority } => match self.world.get_mut(&id) {
                Some(ac) => {
                    ac.priority = priority;
                    CommandOutcome::ok(format!("{id} priority set to {priority}"))
                }
                None => unknown(&id),
            },
            OperatorCommand::SetSta { id, seconds } => {
                let now = self.world.sim_time_s;
                match self.world.get_mut(&id) {
                    Some(ac) => {
                        eta::set_sta(ac, now, seconds);
                        CommandOutcome::ok(format!("{id} STA set to {:.1}", now + seconds))
                    }
                    None => unknown(&id),
                }
            }
            OperatorCommand::Del { id } => {
                if self.delete(&id) {
                    CommandOutcome::ok(format!("{id} deleted"))
                } else {
                    unknown(&id)
                }
            }
            OperatorCommand::CreLoiter {
                id,
                lat,
                lon,
                altitude_m,
                duration_s,
                coordinates,
            } => self.create_loiter(id, lat, lon, altitude_m, duration_s, coordinates),
        }
    }

    fn geofence_file(&self, path: Option<PathBuf>) -> Option<PathBuf> {
        path.or_else(|| self.config.geofences_path.clone())
    }

    fn create_loiter(
        &mut self,
        id: String,
        lat: f64,
        lon: f64,
        altitude_m: f64,
        duration_s: f64,
        coordinates: Vec<f64>,
    ) -> CommandOutcome {
        if self.world.get(&id).is_some() {
            return CommandOutcome::fail(format!("{id} already exists"));
        }
        if !(duration_s.is_finite() && duration_s > 0.0) {
            return CommandOutcome::fail(format!("{id}: loiter duration must be positive"));
        }
        let name = format!("LOITER{id}");
        let fence = match Geofence::new(name.clone(), coordinates, LOITER_CEILING_M, 0.0) {
            Ok(fence) => fence.with_expiry(duration_s),
            Err(err) => return CommandOutcome::fail(err.to_string()),
        };
        if let Err(err) = self.world.geofences.insert(fence) {
            return CommandOutcome::fail(err.to_string());
        }

        let rules = self.engine.rules();
        let layer = self
            .engine
            .layers()
            .layer_for_altitude(altitude_m)
            .map(|l| l.name.clone())
            .unwrap_or_default();
        let mut ac = Aircraft::new(id.clone(), lat, lon, altitude_m)
            .with_layer(layer)
            .with_protection(rules.default_rpz_m, rules.default_hpz_m);
        ac.loiter_geofence = Some(name.clone());
        self.world.upsert(ac);
        CommandOutcome::ok(format!("{id} loitering in {name} for {duration_s:.0} s"))
    }
}

fn unknown(id: &str) -> CommandOutcome {
    CommandOutcome::fail(format!("unknown aircraft {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacsep_core::spatial::meters_to_lon;

    const SCENARIO: &str = r#"{
        "name": "unit",
        "layers": [
            {"name": "reso_0", "lower_alt_m": 0.0, "upper_alt_m": 9.144, "lower_speed_mps": 0.0, "upper_speed_mps": 10.0},
            {"name": "cruising_1", "lower_alt_m": 9.144, "upper_alt_m": 18.288, "lower_speed_mps": 5.0, "upper_speed_mps": 15.0},
            {"name": "reso_1", "lower_alt_m": 18.288, "upper_alt_m": 27.432, "lower_speed_mps": 0.0, "upper_speed_mps": 10.0}
        ],
        "aircraft": [
            {"id": "D1", "lat": 52.0, "lon": 4.0, "altitude_m": 12.0, "speed_mps": 10.0, "track_deg": 90.0,
             "route": [{"lat": 52.0, "lon": 4.01, "altitude_m": 12.0, "speed_mps": 10.0}]}
        ],
        "commands": [
            {"at_s": 1.0, "command": "SETPRIORITY D1 4"},
            {"at_s": 0.0, "command": "GEOFENCE far 60 0 53.0 5.0 53.0 5.01 52.99 5.01"}
        ]
    }"#;

    fn simulator() -> Simulator {
        let scenario = Scenario::from_json_str(SCENARIO).unwrap();
        Simulator::from_scenario(&scenario, Config::default()).unwrap()
    }

    #[test]
    fn scheduled_commands_run_in_time_order() {
        let mut sim = simulator();
        sim.tick();
        assert!(sim.world().geofences.get("far").is_some());
        assert_eq!(sim.world().get("D1").unwrap().priority, 1);
        sim.run(2);
        assert_eq!(sim.world().get("D1").unwrap().priority, 4);
        assert_eq!(sim.stats().ticks, 3);
    }

    #[test]
    fn host_flies_along_the_route() {
        let mut sim = simulator();
        let start = sim.world().get("D1").unwrap().lon;
        sim.run(4);
        let ac = sim.world().get("D1").unwrap();
        assert!(ac.lon > start);
        assert!((sim.sim_time_s() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn operator_failures_are_reported() {
        let mut sim = simulator();
        let outcome = sim.execute("SETPRIORITY NOPE 2");
        assert!(!outcome.success);
        assert_eq!(outcome.message, "unknown aircraft NOPE");
        assert!(!sim.execute("GEOFENCE bad 60 0 52 4").success);
        assert!(!sim.execute("SAVEGEOFENCES").success);
        assert_eq!(sim.stats().operator_failures, 3);
    }

    #[test]
    fn reroute_without_graph_holds_aircraft() {
        let mut sim = simulator();
        let outcome = sim.execute("REROUTEGEOFENCE D1");
        assert!(!outcome.success);
        assert!(outcome.message.contains("no street graph"));
        sim.tick();
        assert_eq!(sim.world().get("D1").unwrap().autopilot.tas_mps, 0.0);
        assert_eq!(sim.stats().reroutes_failed, 1);
    }

    #[test]
    fn loiter_fence_expires_and_delete_cleans_up() {
        let mut sim = simulator();
        let d = meters_to_lon(100.0, 52.0);
        let line = format!(
            "CRELOITER L1 52.0 4.1 20 1.0 51.999 {} 52.001 {} 52.001 {}",
            4.1 - d,
            4.1 - d,
            4.1 + d
        );
        let outcome = sim.execute(&line);
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(sim.world().get("L1").unwrap().loiter_geofence.as_deref(), Some("LOITERL1"));
        assert!(!sim.execute(&line).success);

        sim.run(3);
        assert!(sim.world().geofences.get("LOITERL1").is_none());
        assert!(sim.world().get("L1").unwrap().loiter_geofence.is_none());
        assert_eq!(sim.stats().expired_geofences, vec!["LOITERL1".to_string()]);

        assert!(sim.execute("DEL l1").success);
        assert!(sim.world().get("L1").is_none());
        assert!(!sim.execute("DEL L1").success);
    }

    #[test]
    fn echo_commands_report_check_flags() {
        let mut sim = simulator();
        sim.tick();
        let outcome = sim.execute("ECHOACOVERSHOT D1");
        assert!(outcome.success);
        assert_eq!(outcome.message, "D1 overshot: false");
        assert!(sim.execute("ECHOACGEOFENCE D1").message.contains("route in geofence: false"));
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_run_is_paced_by_interval() {
        let mut sim = simulator();
        let before = tokio::time::Instant::now();
        sim.run_realtime(5).await;
        assert_eq!(sim.stats().ticks, 5);
        // The first interval tick completes immediately.
        assert!(before.elapsed() >= Duration::from_secs(2));
    }
}
