pub mod checks;
pub mod commands;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod eta;
pub mod geofence;
pub mod graph;
pub mod intent;
pub mod models;
pub mod priority;
pub mod probe;
pub mod recovery;
pub mod reroute;
pub mod resolution;
pub mod resolver;
pub mod rules;
pub mod spatial;

pub use checks::{CheckReport, GeofenceChecker};
pub use commands::{CommandQueue, HostCommand};
pub use conflict::{ConflictDetector, ConflictPair, Detection};
pub use engine::{CdReport, TacticalEngine, WorldState};
pub use error::{Result, TacticalError};
pub use geofence::{Geofence, GeofenceStore};
pub use graph::StreetGraph;
pub use models::{Aircraft, FlightPhase, Layer, LayerTable, Performance, Route, Waypoint};
pub use reroute::{RerouteOutcome, RerouteReason, Rerouter};
pub use resolution::{Resolution, Strategy};
pub use rules::TacticalRules;
pub use spatial::haversine_distance;
