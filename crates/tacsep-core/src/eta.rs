//! Arrival time estimation and delay-driven speed adjustment.

use crate::commands::{CommandQueue, HostCommand};
use crate::models::{Aircraft, LayerTable, Waypoint};
use crate::rules::TacticalRules;
use crate::spatial::haversine_distance;

fn leg_time(from: (f64, f64, f64), to: &Waypoint, speed_mps: f64, vs_mps: f64) -> f64 {
    let (lat, lon, alt) = from;
    if lat == to.lat && lon == to.lon {
        if vs_mps.abs() > 0.0 {
            (alt - to.altitude_m).abs() / vs_mps.abs()
        } else {
            0.0
        }
    } else if speed_mps > 0.0 {
        haversine_distance(lat, lon, to.lat, to.lon) / speed_mps
    } else {
        0.0
    }
}

/// Seconds needed to fly the rest of the route.
///
/// Each leg is flown at the speed of the waypoint it starts from; hovering
/// legs fall back to the performance cruise speed.
pub fn remaining_time_s(aircraft: &Aircraft) -> Option<f64> {
    let route = &aircraft.route;
    let active = route.active_index()?;
    let vs = aircraft.perf.vs_max_mps;
    let fallback = aircraft.perf.max_speed_mps;
    let speed_or_fallback = |s: f64| if s > 0.0 { s } else { fallback };

    let first_speed = active
        .checked_sub(1)
        .and_then(|i| route.waypoints.get(i))
        .or_else(|| route.waypoints.get(active))
        .map(|wp| wp.speed_mps)
        .unwrap_or(0.0);
    let mut total = leg_time(
        (aircraft.lat, aircraft.lon, aircraft.altitude_m),
        &route.waypoints[active],
        speed_or_fallback(first_speed),
        vs,
    );

    for w in route.waypoints[active..].windows(2) {
        let from = &w[0];
        total += leg_time(
            (from.lat, from.lon, from.altitude_m),
            &w[1],
            speed_or_fallback(from.speed_mps),
            vs,
        );
    }
    Some(total)
}

/// Refresh ETA, STA and delay. STA is re-planned whenever the waypoint count changes.
pub fn update_eta(aircraft: &mut Aircraft, now_s: f64) -> Option<f64> {
    let remaining = remaining_time_s(aircraft)?;
    let eta = now_s + remaining;
    let count = aircraft.route.waypoints.len();
    if count != aircraft.eta.route_len || aircraft.eta.sta_s.is_none() {
        aircraft.eta.sta_s = Some(eta);
        aircraft.eta.route_len = count;
        tracing::debug!("{} STA set to {:.0}s", aircraft.id, eta);
    }
    aircraft.eta.eta_s = Some(eta);
    aircraft.eta.delay_s = aircraft.eta.sta_s.unwrap_or(eta) - eta;
    Some(aircraft.eta.delay_s)
}

/// Operator override of the scheduled arrival time.
pub fn set_sta(aircraft: &mut Aircraft, now_s: f64, seconds_from_now: f64) {
    aircraft.eta.sta_s = Some(now_s + seconds_from_now);
    aircraft.eta.route_len = aircraft.route.waypoints.len();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedAction {
    Hold,
    SpeedUp,
    SlowDown,
    Resume,
}

fn turn_ahead(aircraft: &Aircraft, active: usize) -> bool {
    let wps = &aircraft.route.waypoints;
    wps.get(active).is_some_and(|w| w.turn) || wps.get(active + 1).is_some_and(|w| w.turn)
}

fn resume(aircraft: &mut Aircraft, queue: &mut CommandQueue, why: &str) -> SpeedAction {
    let id = aircraft.id.as_str();
    queue.push(HostCommand::lnav_on(id));
    queue.push(HostCommand::vnav_on(id));
    queue.push(HostCommand::Echo {
        text: format!("{id} {why}, back to wpt speed"),
    });
    aircraft.eta.speed_adjusted = false;
    SpeedAction::Resume
}

/// Speed a cruising aircraft up or down to absorb its delay.
pub fn update_speed(
    aircraft: &mut Aircraft,
    layers: &LayerTable,
    rules: &TacticalRules,
    queue: &mut CommandQueue,
) -> SpeedAction {
    if aircraft.reso.channels.any() {
        return SpeedAction::Hold;
    }
    let Some(layer) = layers.get(&aircraft.layer).filter(|l| l.is_cruising()).cloned() else {
        return SpeedAction::Hold;
    };
    let Some(active) = aircraft.route.active_index() else {
        return SpeedAction::Hold;
    };
    if aircraft.phase != crate::models::FlightPhase::Cruise || active == 0 {
        return SpeedAction::Hold;
    }

    let near_destination = aircraft.route.is_final_active() || aircraft.route.is_second_to_last_active();
    let delay = aircraft.eta.delay_s;
    let id = aircraft.id.clone();

    if !aircraft.eta.speed_adjusted {
        if near_destination || turn_ahead(aircraft, active) {
            return SpeedAction::Hold;
        }
        let (speed, action, verb) = if delay < rules.speed_up_delay_s {
            (layer.upper_speed_mps, SpeedAction::SpeedUp, "speeding up")
        } else if delay > rules.slow_down_delay_s {
            (layer.lower_speed_mps, SpeedAction::SlowDown, "slowing down")
        } else {
            return SpeedAction::Hold;
        };
        queue.push(HostCommand::speed(&id, speed));
        queue.push(HostCommand::Echo {
            text: format!("{id} is {verb}"),
        });
        aircraft.eta.speed_adjusted = true;
        tracing::debug!("{} is {} (delay {:.1}s)", id, verb, delay);
        return action;
    }

    if near_destination {
        resume(aircraft, queue, "close to destination")
    } else if delay.abs() < rules.settle_delay_s {
        resume(aircraft, queue, "is on schedule")
    } else if turn_ahead(aircraft, active) {
        resume(aircraft, queue, "turn ahead")
    } else {
        SpeedAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Layer;
    use crate::spatial::meters_to_lon;

    const LAT: f64 = 52.0;
    const LON: f64 = 4.0;

    fn wp(east_m: f64, alt: f64, spd: f64, turn: bool) -> Waypoint {
        Waypoint {
            name: String::new(),
            lat: LAT,
            lon: LON + meters_to_lon(east_m, LAT),
            altitude_m: alt,
            speed_mps: spd,
            turn,
        }
    }

    fn layers() -> LayerTable {
        LayerTable::new(vec![Layer {
            name: "cruising_1".into(),
            lower_alt_m: 20.0,
            upper_alt_m: 40.0,
            lower_speed_mps: 5.0,
            upper_speed_mps: 15.0,
            direction_deg: None,
        }])
    }

    fn cruiser() -> Aircraft {
        let mut ac = Aircraft::new("D1", LAT, LON, 30.0)
            .with_velocity(10.0, 90.0, 0.0)
            .with_layer("cruising_1")
            .with_route(vec![
                wp(0.0, 30.0, 10.0, false),
                wp(1000.0, 30.0, 10.0, false),
                wp(2000.0, 30.0, 10.0, false),
                wp(3000.0, 30.0, 10.0, false),
                wp(3000.0, 0.0, 0.0, false),
            ]);
        ac.route.active = Some(1);
        ac
    }

    #[test]
    fn remaining_time_sums_legs_and_vertical_segment() {
        let ac = cruiser();
        let t = remaining_time_s(&ac).unwrap();
        // 3000 m at 10 m/s plus 30 m at 5 m/s
        assert!((t - 306.0).abs() < 1.0, "{t}");
    }

    #[test]
    fn sta_follows_route_changes() {
        let mut ac = cruiser();
        assert_eq!(update_eta(&mut ac, 0.0).map(|d| d.round()), Some(0.0));
        let sta = ac.eta.sta_s.unwrap();
        update_eta(&mut ac, 100.0);
        assert_eq!(ac.eta.sta_s, Some(sta));
        assert!((ac.eta.delay_s + 100.0).abs() < 1e-6);

        ac.route.push(wp(4000.0, 0.0, 0.0, false));
        update_eta(&mut ac, 100.0);
        assert!(ac.eta.delay_s.abs() < 1e-6);
    }

    #[test]
    fn late_cruiser_speeds_up_then_resumes() {
        let mut ac = cruiser();
        let mut queue = CommandQueue::new();
        let rules = TacticalRules::default();
        ac.eta.delay_s = -40.0;
        assert_eq!(update_speed(&mut ac, &layers(), &rules, &mut queue), SpeedAction::SpeedUp);
        assert_eq!(queue.drain()[0], HostCommand::speed("D1", 15.0));
        assert_eq!(update_speed(&mut ac, &layers(), &rules, &mut queue), SpeedAction::Hold);

        ac.eta.delay_s = -5.0;
        assert_eq!(update_speed(&mut ac, &layers(), &rules, &mut queue), SpeedAction::Resume);
        let commands = queue.drain();
        assert!(commands.contains(&HostCommand::lnav_on("D1")));
        assert!(commands.contains(&HostCommand::vnav_on("D1")));
        assert!(!ac.eta.speed_adjusted);
    }

    #[test]
    fn early_cruiser_slows_down() {
        let mut ac = cruiser();
        let mut queue = CommandQueue::new();
        ac.eta.delay_s = 40.0;
        let action = update_speed(&mut ac, &layers(), &TacticalRules::default(), &mut queue);
        assert_eq!(action, SpeedAction::SlowDown);
        assert_eq!(queue.drain()[0], HostCommand::speed("D1", 5.0));
    }

    #[test]
    fn no_adjustment_before_turn_or_outside_cruising_layer() {
        let mut ac = cruiser();
        let mut queue = CommandQueue::new();
        ac.eta.delay_s = -40.0;
        ac.route.waypoints[2].turn = true;
        assert_eq!(update_speed(&mut ac, &layers(), &TacticalRules::default(), &mut queue), SpeedAction::Hold);

        let mut other = cruiser().with_layer("reso_0");
        other.eta.delay_s = -40.0;
        assert_eq!(update_speed(&mut other, &layers(), &TacticalRules::default(), &mut queue), SpeedAction::Hold);
        assert!(queue.is_empty());
    }
}
