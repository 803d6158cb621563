//! Error types for the tactical core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TacticalError>;

#[derive(Error, Debug)]
pub enum TacticalError {
    #[error("unknown aircraft {0}")]
    UnknownAircraft(String),

    #[error("unknown layer {0}")]
    UnknownLayer(String),

    #[error("no layer {direction} {layer}")]
    NoAdjacentLayer {
        layer: String,
        direction: &'static str,
    },

    #[error("invalid geofence {name}: {reason}")]
    InvalidGeofence { name: String, reason: String },

    #[error("unknown geofence {0}")]
    UnknownGeofence(String),

    #[error("aircraft {0} has no active route")]
    NoRoute(String),

    #[error("street graph has no nodes")]
    EmptyGraph,

    #[error("no path from node {from} to node {to}")]
    NoPath { from: u64, to: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
