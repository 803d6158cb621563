//! End-to-end scenarios driven through the scheduler.

use std::path::PathBuf;

use tacsep_core::spatial::meters_to_lon;
use tacsep_core::{HostCommand, Strategy};
use tacsep_sim::{Config, Scenario, Simulator};

const LAYERS: &str = r#"[
    {"name": "reso_0", "lower_alt_m": 0.0, "upper_alt_m": 9.144, "lower_speed_mps": 2.0, "upper_speed_mps": 10.0},
    {"name": "cruising_1", "lower_alt_m": 9.144, "upper_alt_m": 18.288, "lower_speed_mps": 5.0, "upper_speed_mps": 15.0},
    {"name": "reso_1", "lower_alt_m": 18.288, "upper_alt_m": 27.432, "lower_speed_mps": 2.0, "upper_speed_mps": 10.0}
]"#;

fn simulator(aircraft: &str, commands: &str) -> Simulator {
    let json = format!(r#"{{"name": "test", "layers": {LAYERS}, "aircraft": {aircraft}, "commands": {commands}}}"#);
    let scenario = Scenario::from_json_str(&json).unwrap();
    Simulator::from_scenario(&scenario, Config::default()).unwrap()
}

/// Two aircraft head-on in a resolution layer, 440 m apart at 10 m/s each.
fn head_on(extra: &str) -> String {
    let east = 4.0 + meters_to_lon(440.0, 52.0);
    format!(
        r#"[
        {{"id": "D1", "lat": 52.0, "lon": 4.0, "altitude_m": 5.0, "speed_mps": 10.0, "track_deg": 90.0, "priority": 1,
          "route": [{{"lat": 52.0, "lon": 4.02, "altitude_m": 5.0, "speed_mps": 10.0}}]}},
        {{"id": "D2", "lat": 52.0, "lon": {east}, "altitude_m": 5.0, "speed_mps": 10.0, "track_deg": 270.0, "priority": 2,
          "route": [{{"lat": 52.0, "lon": 3.98, "altitude_m": 5.0, "speed_mps": 10.0}}]}}
        {extra}
    ]"#
    )
}

#[test]
fn head_on_conflict_in_resolution_layer_uses_speed_strategy() {
    let mut sim = simulator(&head_on(""), "[]");
    sim.tick();

    let d2 = sim.world().get("D2").unwrap();
    assert_eq!(d2.reso.strategy(), Strategy::Reso2);
    assert!(d2.reso.channels.tas);
    let speed = d2.reso.resolution.targets().speed_mps.unwrap();
    assert!((2.0..=10.0).contains(&speed), "speed {speed} outside layer limits");

    assert_eq!(sim.world().get("D1").unwrap().reso.strategy(), Strategy::None);
    assert!(sim.stats().resolutions.get("RESO2").copied().unwrap_or(0) >= 1);
    assert!(sim.stats().conflict_pairs >= 2);

    // The host flies the resolution speed instead of the waypoint speed.
    sim.run(6);
    let d2 = sim.world().get("D2").unwrap();
    assert!(d2.ground_speed_mps < 10.0);
}

#[test]
fn deleted_aircraft_leave_no_resolution_pairs() {
    let far = r#", {"id": "D3", "lat": 52.1, "lon": 4.1, "altitude_m": 5.0}"#;
    let mut sim = simulator(&head_on(far), r#"[{"at_s": 3.0, "command": "DEL D1"}]"#);
    for _ in 0..20 {
        sim.tick();
        let world = sim.world();
        for (a, b) in sim.engine().tracker().pairs() {
            assert!(world.get(a).is_some(), "pair references deleted {a}");
            assert!(world.get(b).is_some(), "pair references deleted {b}");
        }
        for ac in &world.aircraft {
            assert!(ac.reso.intruders.iter().all(|id| world.get(id).is_some()));
        }
    }
    assert!(sim.world().get("D1").is_none());
    assert_eq!(sim.stats().deleted, vec!["D1".to_string()]);
    assert!(sim.world().commands.iter().all(|c| c.aircraft_id() != Some("D1")));
}

#[test]
fn overshoot_requests_one_reroute_and_resets_tracking() {
    // Flying away from its only waypoint: 120 m at the first check, 180 m at the second.
    let lon = 4.0 + meters_to_lon(114.0, 52.0);
    let aircraft = format!(
        r#"[{{"id": "O1", "lat": 52.0, "lon": {lon}, "altitude_m": 12.0, "speed_mps": 12.0, "track_deg": 90.0,
              "lnav": false, "vnav": false,
              "route": [{{"lat": 52.0, "lon": 4.0, "altitude_m": 12.0, "speed_mps": 12.0}}]}}]"#
    );
    let mut sim = simulator(&aircraft, "[]");

    sim.run(11);
    let checks = sim.world().get("O1").unwrap().checks.clone().unwrap();
    assert!(checks.overshot);
    assert_eq!(checks.final_wpt_dist_m, 99_999.0);
    let queued = sim
        .world()
        .commands
        .iter()
        .filter(|c| matches!(c, HostCommand::RerouteOvershoot { id } if id == "O1"))
        .count();
    assert_eq!(queued, 1);

    sim.run(20);
    assert_eq!(sim.stats().overshoots, 1);
    // No street graph: the reroute fails and the aircraft holds.
    assert_eq!(sim.stats().reroutes_failed, 1);
    assert_eq!(sim.world().get("O1").unwrap().autopilot.tas_mps, 0.0);
}

#[test]
fn aircraft_inside_new_geofence_is_not_rerouted() {
    let aircraft = r#"[
        {"id": "D1", "lat": 52.0, "lon": 4.0, "altitude_m": 12.0, "speed_mps": 10.0, "track_deg": 90.0,
         "route": [{"lat": 52.0, "lon": 4.01, "altitude_m": 12.0, "speed_mps": 10.0}]},
        {"id": "D2", "lat": 52.01, "lon": 3.99, "altitude_m": 12.0, "speed_mps": 10.0, "track_deg": 145.0,
         "route": [{"lat": 51.99, "lon": 4.01, "altitude_m": 12.0, "speed_mps": 10.0}]}
    ]"#;
    let commands = r#"[{"at_s": 1.0, "command": "GEOFENCE works 60 0 51.9995 3.999 52.0005 3.999 52.0005 4.003 51.9995 4.003"}]"#;
    let mut sim = simulator(aircraft, commands);
    sim.run(12);

    let d1 = sim.world().get("D1").unwrap();
    let checks = d1.checks.clone().unwrap();
    assert!(checks.aircraft_in_geofence);
    assert!(checks.route_in_geofence);
    assert_eq!(d1.autopilot.tas_mps, 10.0);

    // Only the aircraft approaching from outside asks for a reroute.
    assert_eq!(sim.stats().geofence_reroute_requests, 1);
    assert_eq!(sim.stats().reroutes_failed, 1);
    assert_eq!(sim.world().get("D2").unwrap().autopilot.tas_mps, 0.0);
}

#[test]
fn demo_scenario_reroutes_around_geofence() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/crossing.json");
    let scenario = Scenario::load(&path).unwrap();
    let mut sim = Simulator::from_scenario(&scenario, Config::default()).unwrap();
    sim.run(40);

    assert_eq!(sim.stats().reroutes_ok, 1);
    assert_eq!(sim.stats().reroutes_failed, 0);
    let rerouter = sim.engine().rerouter().unwrap();
    assert!(rerouter.ledger().has_booking("D3"));

    let d3 = sim.world().get("D3").unwrap();
    assert!(d3.route.waypoints.len() >= 4);
    assert!(d3.route.waypoints.iter().all(|wp| wp.name.starts_with("D3")));
    assert!(!sim.stats().resolutions.is_empty());

    let report = sim.report();
    assert_eq!(report.scenario, "crossing");
    assert_eq!(report.aircraft.len(), 3);
}
