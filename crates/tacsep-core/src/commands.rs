//! Host stack commands emitted by the tactical core.
//!
//! Values are carried in SI units and rendered in host units (feet, knots,
//! nautical miles) when a command is formatted as stack text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Meters per foot.
pub const FT: f64 = 0.3048;
/// Meters per second per knot.
pub const KTS: f64 = 0.514444;
/// Meters per nautical mile.
pub const NM: f64 = 1852.0;
/// Meters per second per foot-per-minute.
pub const FPM: f64 = FT / 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostCommand {
    DelRoute {
        id: String,
    },
    Speed {
        id: String,
        speed_mps: f64,
    },
    Altitude {
        id: String,
        altitude_m: f64,
    },
    VerticalSpeed {
        id: String,
        vs_mps: f64,
    },
    Lnav {
        id: String,
        on: bool,
    },
    Vnav {
        id: String,
        on: bool,
    },
    AddWaypoint {
        id: String,
        lat: f64,
        lon: f64,
        altitude_m: f64,
        speed_mps: f64,
        turn: bool,
    },
    DelWaypoint {
        id: String,
        name: String,
    },
    Delete {
        id: String,
    },
    /// Run `then` once the aircraft passes the given altitude.
    AtAltitude {
        id: String,
        altitude_m: f64,
        then: Box<HostCommand>,
    },
    /// Run `then` once the aircraft reaches the given speed.
    AtSpeed {
        id: String,
        speed_mps: f64,
        then: Box<HostCommand>,
    },
    /// Run `then` once the aircraft is within `distance_m` of the point.
    AtDistance {
        id: String,
        lat: f64,
        lon: f64,
        distance_m: f64,
        then: Box<HostCommand>,
    },
    RerouteGeofence {
        id: String,
    },
    RerouteOvershoot {
        id: String,
    },
    Echo {
        text: String,
    },
}

impl HostCommand {
    /// Aircraft the command refers to, if any.
    pub fn aircraft_id(&self) -> Option<&str> {
        match self {
            HostCommand::DelRoute { id }
            | HostCommand::Speed { id, .. }
            | HostCommand::Altitude { id, .. }
            | HostCommand::VerticalSpeed { id, .. }
            | HostCommand::Lnav { id, .. }
            | HostCommand::Vnav { id, .. }
            | HostCommand::AddWaypoint { id, .. }
            | HostCommand::DelWaypoint { id, .. }
            | HostCommand::Delete { id }
            | HostCommand::AtAltitude { id, .. }
            | HostCommand::AtSpeed { id, .. }
            | HostCommand::AtDistance { id, .. }
            | HostCommand::RerouteGeofence { id }
            | HostCommand::RerouteOvershoot { id } => Some(id.as_str()),
            HostCommand::Echo { .. } => None,
        }
    }

    pub fn at_altitude(id: &str, altitude_m: f64, then: HostCommand) -> Self {
        HostCommand::AtAltitude {
            id: id.to_string(),
            altitude_m,
            then: Box::new(then),
        }
    }

    pub fn at_speed(id: &str, speed_mps: f64, then: HostCommand) -> Self {
        HostCommand::AtSpeed {
            id: id.to_string(),
            speed_mps,
            then: Box::new(then),
        }
    }

    pub fn lnav_on(id: &str) -> Self {
        HostCommand::Lnav { id: id.to_string(), on: true }
    }

    pub fn vnav_on(id: &str) -> Self {
        HostCommand::Vnav { id: id.to_string(), on: true }
    }

    pub fn speed(id: &str, speed_mps: f64) -> Self {
        HostCommand::Speed { id: id.to_string(), speed_mps }
    }

    pub fn altitude(id: &str, altitude_m: f64) -> Self {
        HostCommand::Altitude { id: id.to_string(), altitude_m }
    }
}

/// Render a number without trailing zeros, at most four decimals.
fn num(value: f64) -> String {
    let text = format!("{:.4}", value);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::DelRoute { id } => write!(f, "DELRTE {id}"),
            HostCommand::Speed { id, speed_mps } => write!(f, "SPD {id} {}", num(speed_mps / KTS)),
            HostCommand::Altitude { id, altitude_m } => {
                write!(f, "ALT {id} {}", num(altitude_m / FT))
            }
            HostCommand::VerticalSpeed { id, vs_mps } => write!(f, "VS {id} {}", num(vs_mps / FPM)),
            HostCommand::Lnav { id, on } => write!(f, "LNAV {id} {}", on_off(*on)),
            HostCommand::Vnav { id, on } => write!(f, "VNAV {id} {}", on_off(*on)),
            HostCommand::AddWaypoint {
                id,
                lat,
                lon,
                altitude_m,
                speed_mps,
                turn,
            } => write!(
                f,
                "ADDWPT {id} {} {} {} {} {}",
                num(*lat),
                num(*lon),
                num(altitude_m / FT),
                num(speed_mps / KTS),
                if *turn { "FLYOVER" } else { "FLYBY" }
            ),
            HostCommand::DelWaypoint { id, name } => write!(f, "DELWPT {id} {name}"),
            HostCommand::Delete { id } => write!(f, "DEL {id}"),
            HostCommand::AtAltitude { id, altitude_m, then } => {
                write!(f, "{id} ATALT {} {then}", num(altitude_m / FT))
            }
            HostCommand::AtSpeed { id, speed_mps, then } => {
                write!(f, "{id} ATSPD {} {then}", num(speed_mps / KTS))
            }
            HostCommand::AtDistance {
                id,
                lat,
                lon,
                distance_m,
                then,
            } => write!(
                f,
                "{id} ATDIST {} {} {} {then}",
                num(*lat),
                num(*lon),
                num(distance_m / NM)
            ),
            HostCommand::RerouteGeofence { id } => write!(f, "REROUTEGEOFENCE {id}"),
            HostCommand::RerouteOvershoot { id } => write!(f, "REROUTEOVERSHOOT {id}"),
            HostCommand::Echo { text } => write!(f, "ECHO {text}"),
        }
    }
}

/// Commands waiting for the host to pick them up at the start of the next tick.
#[derive(Debug, Default, Clone)]
pub struct CommandQueue {
    pending: Vec<HostCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: HostCommand) {
        tracing::debug!("queued: {}", command);
        self.pending.push(command);
    }

    /// Queue a command unless an identical one is already pending.
    pub fn push_unique(&mut self, command: HostCommand) -> bool {
        if self.pending.contains(&command) {
            return false;
        }
        self.push(command);
        true
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = HostCommand>) {
        for command in commands {
            self.push(command);
        }
    }

    pub fn drain(&mut self) -> Vec<HostCommand> {
        std::mem::take(&mut self.pending)
    }

    /// Drop every pending command addressed to a deleted aircraft.
    pub fn purge(&mut self, id: &str) {
        self.pending.retain(|c| c.aircraft_id() != Some(id));
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostCommand> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
