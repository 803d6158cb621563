//! Forward conflict probe: would a maneuver held for a while create a conflict?

use crate::conflict::{pair_geometry, StateVector};
use crate::models::{Aircraft, Performance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDirection {
    Climb,
    Descend,
}

/// Hypothetical ownship maneuver to test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Maneuver {
    pub vs_mps: Option<f64>,
    pub gs_mps: Option<f64>,
    pub lookahead_s: f64,
}

impl Maneuver {
    /// Climb at `vs_max` or descend at `vs_min` for the time needed to cross one layer.
    pub fn vertical(direction: ProbeDirection, perf: &Performance, layer_height_m: f64) -> Self {
        let vs = match direction {
            ProbeDirection::Climb => perf.vs_max_mps,
            ProbeDirection::Descend => perf.vs_min_mps,
        };
        Self {
            vs_mps: Some(vs),
            gs_mps: None,
            lookahead_s: (layer_height_m / vs).abs(),
        }
    }

    /// Fly the current track at `gs_mps` for `lookahead_s`.
    pub fn speed(gs_mps: f64, lookahead_s: f64) -> Self {
        Self {
            vs_mps: None,
            gs_mps: Some(gs_mps),
            lookahead_s,
        }
    }
}

/// True when the maneuver is predicted to produce a conflict.
///
/// Probes against `intruder` only when given, otherwise against every other
/// aircraft. Anything that prevents a valid forward simulation counts as a
/// predicted conflict.
pub fn predicts_conflict(
    aircraft: &[Aircraft],
    own_idx: usize,
    intruder: Option<usize>,
    maneuver: Maneuver,
) -> bool {
    let Some(own) = aircraft.get(own_idx) else {
        return true;
    };
    if !maneuver.lookahead_s.is_finite() || maneuver.lookahead_s <= 0.0 {
        return true;
    }

    let mut state = StateVector::of(own);
    if let Some(gs) = maneuver.gs_mps {
        let trk = own.track_deg.to_radians();
        state.gs_east_mps = gs * trk.sin();
        state.gs_north_mps = gs * trk.cos();
    }
    if let Some(vs) = maneuver.vs_mps {
        state.vs_mps = vs;
    }
    if !state.is_finite() {
        return true;
    }

    let collides = |other_idx: usize| -> bool {
        let Some(other) = aircraft.get(other_idx) else {
            return false;
        };
        let other_state = StateVector::of(other);
        if !other_state.is_finite() {
            return true;
        }
        let rpz = own.rpz_m.max(other.rpz_m);
        let hpz = own.hpz_m.max(other.hpz_m);
        pair_geometry(&state, &other_state, rpz, hpz, maneuver.lookahead_s).conflict
    };

    match intruder {
        Some(idx) if idx != own_idx => collides(idx),
        Some(_) => false,
        None => (0..aircraft.len())
            .filter(|idx| *idx != own_idx)
            .any(collides),
    }
}
