//! Intent estimation: a lookahead polyline along the active route plus a target altitude.

use crate::models::Aircraft;
use crate::spatial::{bearing, haversine_distance, offset_by_bearing, LatLon};

/// Predicted path and target altitude of one aircraft.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intent {
    pub line: Vec<LatLon>,
    pub target_alt_m: f64,
}

impl Intent {
    /// A single-point intent carries no lookahead information.
    pub fn is_degenerate(&self) -> bool {
        self.line.len() < 2
    }
}

/// Build the intent of `aircraft` for `lookahead_s` seconds.
///
/// Walks the route from the active waypoint, absorbing whole legs while they fit
/// in the `ground speed × lookahead` budget, and ends on a synthesized point
/// along the next leg when the budget runs out.
pub fn compute_intent(aircraft: &Aircraft, lookahead_s: f64, maneuver_eps_m: f64) -> Intent {
    let target_alt_m =
        if (aircraft.selected_altitude_m - aircraft.altitude_m).abs() > maneuver_eps_m {
            aircraft.selected_altitude_m
        } else {
            aircraft.altitude_m
        };

    let start = aircraft.position();
    let mut line = vec![start];
    let budget = (aircraft.ground_speed_mps * lookahead_s).max(0.0);
    if !budget.is_finite() || budget <= 0.0 {
        return Intent { line, target_alt_m };
    }

    let mut travelled = 0.0;
    let mut current = start;
    for waypoint in aircraft.route.remaining() {
        let next = waypoint.position();
        let leg = haversine_distance(current.0, current.1, next.0, next.1);
        if travelled + leg < budget {
            travelled += leg;
            if leg > 0.0 {
                line.push(next);
            }
            current = next;
            continue;
        }
        let rest = budget - travelled;
        let brg = bearing(current.0, current.1, next.0, next.1);
        line.push(offset_by_bearing(current.0, current.1, rest, brg));
        break;
    }

    Intent { line, target_alt_m }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Waypoint;
    use crate::spatial::{meters_to_lon, polyline_length_m};

    fn wp(lat: f64, lon: f64) -> Waypoint {
        Waypoint {
            name: String::new(),
            lat,
            lon,
            altitude_m: 30.0,
            speed_mps: 10.0,
            turn: false,
        }
    }

    fn east(meters: f64) -> f64 {
        16.0 + meters_to_lon(meters, 48.0)
    }

    #[test]
    fn no_route_gives_single_point() {
        let ac = Aircraft::new("D1", 48.0, 16.0, 30.0).with_velocity(10.0, 90.0, 0.0);
        let intent = compute_intent(&ac, 20.0, 1.0);
        assert!(intent.is_degenerate());
        assert_eq!(intent.line[0], (48.0, 16.0));
    }

    #[test]
    fn truncates_inside_a_long_leg() {
        let ac = Aircraft::new("D1", 48.0, 16.0, 30.0)
            .with_velocity(10.0, 90.0, 0.0)
            .with_route(vec![wp(48.0, east(1000.0))]);
        let intent = compute_intent(&ac, 20.0, 1.0);
        assert_eq!(intent.line.len(), 2);
        let len = polyline_length_m(&intent.line);
        assert!((len - 200.0).abs() < 0.5, "got {len}");
    }

    #[test]
    fn absorbs_short_legs_and_stays_within_budget() {
        let ac = Aircraft::new("D1", 48.0, 16.0, 30.0)
            .with_velocity(10.0, 90.0, 0.0)
            .with_route(vec![
                wp(48.0, east(50.0)),
                wp(48.0005, east(50.0)),
                wp(48.0005, east(400.0)),
            ]);
        let intent = compute_intent(&ac, 20.0, 1.0);
        assert_eq!(intent.line.len(), 4);
        let len = polyline_length_m(&intent.line);
        assert!(len <= 200.0 + 1e-3, "intent length {len} exceeds budget");
        assert!((len - 200.0).abs() < 0.5);
    }

    #[test]
    fn route_shorter_than_budget_ends_at_destination() {
        let ac = Aircraft::new("D1", 48.0, 16.0, 30.0)
            .with_velocity(10.0, 90.0, 0.0)
            .with_route(vec![wp(48.0, east(60.0))]);
        let intent = compute_intent(&ac, 20.0, 1.0);
        assert_eq!(intent.line.len(), 2);
        assert!(polyline_length_m(&intent.line) <= 200.0);
    }

    #[test]
    fn target_altitude_follows_selected_when_maneuvering() {
        let mut ac = Aircraft::new("D1", 48.0, 16.0, 30.0);
        ac.selected_altitude_m = 60.0;
        assert_eq!(compute_intent(&ac, 20.0, 1.0).target_alt_m, 60.0);
        ac.selected_altitude_m = 30.5;
        assert_eq!(compute_intent(&ac, 20.0, 1.0).target_alt_m, 30.0);
    }
}
