//! Operator stack commands.
//!
//! Lines are whitespace or comma separated, command word first, e.g.
//! `GEOFENCE works 60 0 52.0 4.0 52.0 4.01 51.99 4.01`. Distances and
//! altitudes are metres, times are seconds.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// The (success, message) pair every operator command reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperatorError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0}")]
    Unknown(String),

    #[error("{command}: missing {name}")]
    Missing { command: &'static str, name: &'static str },

    #[error("{command}: invalid {name} '{value}'")]
    Invalid {
        command: &'static str,
        name: &'static str,
        value: String,
    },

    #[error("{command}: expected lat/lon pairs for at least 3 vertices, got {count} value(s)")]
    Vertices { command: &'static str, count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Geofence {
        name: String,
        top: f64,
        bottom: f64,
        coordinates: Vec<f64>,
    },
    DelGeofence {
        name: String,
    },
    SaveGeofences {
        path: Option<PathBuf>,
    },
    LoadGeofences {
        path: Option<PathBuf>,
    },
    RerouteGeofence {
        id: String,
    },
    RerouteOvershoot {
        id: String,
    },
    EchoAcGeofence {
        id: String,
    },
    EchoAcOvershot {
        id: String,
    },
    SetPriority {
        id: String,
        priority: u32,
    },
    SetSta {
        id: String,
        seconds: f64,
    },
    Del {
        id: String,
    },
    CreLoiter {
        id: String,
        lat: f64,
        lon: f64,
        altitude_m: f64,
        duration_s: f64,
        coordinates: Vec<f64>,
    },
}

struct Args<'a> {
    command: &'static str,
    tokens: std::slice::Iter<'a, &'a str>,
}

impl<'a> Args<'a> {
    fn text(&mut self, name: &'static str) -> Result<String, OperatorError> {
        self.tokens
            .next()
            .map(|s| s.to_string())
            .ok_or(OperatorError::Missing {
                command: self.command,
                name,
            })
    }

    fn id(&mut self) -> Result<String, OperatorError> {
        self.text("aircraft id").map(|s| s.to_uppercase())
    }

    fn number<T: std::str::FromStr>(&mut self, name: &'static str) -> Result<T, OperatorError> {
        let raw = self.text(name)?;
        raw.parse().map_err(|_| OperatorError::Invalid {
            command: self.command,
            name,
            value: raw,
        })
    }

    fn optional_path(&mut self) -> Option<PathBuf> {
        self.tokens.next().map(PathBuf::from)
    }

    fn coordinates(&mut self) -> Result<Vec<f64>, OperatorError> {
        let mut values = Vec::new();
        for _ in 0..self.tokens.len() {
            values.push(self.number::<f64>("coordinate")?);
        }
        if values.len() < 6 || values.len() % 2 != 0 {
            return Err(OperatorError::Vertices {
                command: self.command,
                count: values.len(),
            });
        }
        Ok(values)
    }
}

/// Parse one operator line.
pub fn parse(line: &str) -> Result<OperatorCommand, OperatorError> {
    let tokens: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    let Some((head, rest)) = tokens.split_first() else {
        return Err(OperatorError::Empty);
    };
    let word = head.to_uppercase();
    let command: &'static str = match word.as_str() {
        "GEOFENCE" => "GEOFENCE",
        "DELGEOFENCE" => "DELGEOFENCE",
        "SAVEGEOFENCES" => "SAVEGEOFENCES",
        "LOADGEOFENCES" => "LOADGEOFENCES",
        "REROUTEGEOFENCE" => "REROUTEGEOFENCE",
        "REROUTEOVERSHOOT" => "REROUTEOVERSHOOT",
        "ECHOACGEOFENCE" => "ECHOACGEOFENCE",
        "ECHOACOVERSHOT" => "ECHOACOVERSHOT",
        "SETPRIORITY" => "SETPRIORITY",
        "SETSTA" => "SETSTA",
        "DEL" => "DEL",
        "CRELOITER" => "CRELOITER",
        _ => return Err(OperatorError::Unknown(word)),
    };
    let mut args = Args {
        command,
        tokens: rest.iter(),
    };

    let parsed = match command {
        "GEOFENCE" => OperatorCommand::Geofence {
            name: args.text("name")?,
            top: args.number("top")?,
            bottom: args.number("bottom")?,
            coordinates: args.coordinates()?,
        },
        "DELGEOFENCE" => OperatorCommand::DelGeofence {
            name: args.text("name")?,
        },
        "SAVEGEOFENCES" => OperatorCommand::SaveGeofences {
            path: args.optional_path(),
        },
        "LOADGEOFENCES" => OperatorCommand::LoadGeofences {
            path: args.optional_path(),
        },
        "REROUTEGEOFENCE" => OperatorCommand::RerouteGeofence { id: args.id()? },
        "REROUTEOVERSHOOT" => OperatorCommand::RerouteOvershoot { id: args.id()? },
        "ECHOACGEOFENCE" => OperatorCommand::EchoAcGeofence { id: args.id()? },
        "ECHOACOVERSHOT" => OperatorCommand::EchoAcOvershot { id: args.id()? },
        "SETPRIORITY" => OperatorCommand::SetPriority {
            id: args.id()?,
            priority: args.number("priority")?,
        },
        "SETSTA" => OperatorCommand::SetSta {
            id: args.id()?,
            seconds: args.number("seconds")?,
        },
        "DEL" => OperatorCommand::Del { id: args.id()? },
        _ => OperatorCommand::CreLoiter {
            id: args.id()?,
            lat: args.number("lat")?,
            lon: args.number("lon")?,
            altitude_m: args.number("altitude")?,
            duration_s: args.number("duration")?,
            coordinates: args.coordinates()?,
        },
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geofence_with_commas() {
        let cmd = parse("geofence works,60,0, 52.0 4.0 52.0 4.01 51.99 4.01").unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::Geofence {
                name: "works".into(),
                top: 60.0,
                bottom: 0.0,
                coordinates: vec![52.0, 4.0, 52.0, 4.01, 51.99, 4.01],
            }
        );
    }

    #[test]
    fn geofence_needs_three_vertices() {
        assert_eq!(
            parse("GEOFENCE works 60 0 52.0 4.0 52.0 4.01"),
            Err(OperatorError::Vertices {
                command: "GEOFENCE",
                count: 4
            })
        );
        assert!(matches!(
            parse("GEOFENCE works 60 0 52.0 4.0 52.0 4.01 51.99"),
            Err(OperatorError::Vertices { count: 5, .. })
        ));
    }

    #[test]
    fn aircraft_ids_are_uppercased() {
        assert_eq!(
            parse("setpriority d7 3").unwrap(),
            OperatorCommand::SetPriority {
                id: "D7".into(),
                priority: 3
            }
        );
    }

    #[test]
    fn errors_name_the_problem() {
        assert_eq!(parse("   "), Err(OperatorError::Empty));
        assert_eq!(parse("FLY D1"), Err(OperatorError::Unknown("FLY".into())));
        assert_eq!(
            parse("SETSTA D1"),
            Err(OperatorError::Missing {
                command: "SETSTA",
                name: "seconds"
            })
        );
        let err = parse("SETPRIORITY D1 high").unwrap_err();
        assert_eq!(err.to_string(), "SETPRIORITY: invalid priority 'high'");
    }

    #[test]
    fn creloiter_and_optional_paths() {
        let cmd = parse("CRELOITER L1 52 4 30 120 52 4 52 4.01 51.99 4.01").unwrap();
        assert!(matches!(cmd, OperatorCommand::CreLoiter { ref id, duration_s, .. } if id == "L1" && duration_s == 120.0));
        assert_eq!(parse("SAVEGEOFENCES").unwrap(), OperatorCommand::SaveGeofences { path: None });
        assert_eq!(
            parse("LOADGEOFENCES fences.json").unwrap(),
            OperatorCommand::LoadGeofences {
                path: Some(PathBuf::from("fences.json"))
            }
        );
    }
}
