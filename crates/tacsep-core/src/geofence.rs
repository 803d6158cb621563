//! Named 3D no-fly volumes with a bounding-box grid index.
//!
//! The store keeps fences keyed by name and mirrors every fence's bounding box
//! into a uniform lat/lon grid for candidate lookup. Each change bumps a
//! version counter that caches compare against.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::error::{Result, TacticalError};
use crate::spatial::{point_in_polygon, polyline_intersects_polygon, BoundingBox, LatLon};

/// Default grid cell size in degrees (roughly 1 km).
pub const DEFAULT_CELL_DEG: f64 = 0.01;

/// Horizontal polygon plus vertical band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub name: String,
    /// Flat lat/lon pairs: `[lat0, lon0, lat1, lon1, ...]`
    pub coordinates: Vec<f64>,
    /// Upper altitude in metres
    pub top: f64,
    /// Lower altitude in metres
    pub bottom: f64,
    /// Seconds until a loiter fence is removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_s: Option<f64>,
}

impl Geofence {
    pub fn new(name: impl Into<String>, coordinates: Vec<f64>, top: f64, bottom: f64) -> Result<Self> {
        let fence = Self {
            name: name.into(),
            coordinates,
            top,
            bottom,
            expires_in_s: None,
        };
        fence.validate()?;
        Ok(fence)
    }

    pub fn with_expiry(mut self, seconds: f64) -> Self {
        self.expires_in_s = Some(seconds);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| TacticalError::InvalidGeofence {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }
        if self.coordinates.len() % 2 != 0 {
            return Err(invalid("odd number of coordinates"));
        }
        if self.coordinates.len() < 6 {
            return Err(invalid("at least 3 vertices required"));
        }
        if self.coordinates.iter().any(|c| !c.is_finite()) {
            return Err(invalid("non-finite coordinate"));
        }
        if self.top < self.bottom {
            return Err(invalid("top below bottom"));
        }
        Ok(())
    }

    pub fn polygon(&self) -> Vec<LatLon> {
        self.coordinates
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.polygon())
    }

    pub fn contains(&self, point: LatLon) -> bool {
        point_in_polygon(point, &self.polygon())
    }

    pub fn intersects_line(&self, line: &[LatLon]) -> bool {
        polyline_intersects_polygon(line, &self.polygon())
    }

    /// Vertical band overlaps `[low, high]`.
    pub fn overlaps_band(&self, low_m: f64, high_m: f64) -> bool {
        low_m <= self.top && high_m >= self.bottom
    }
}

type Cell = (i64, i64);

/// Name-keyed geofence store with a grid bounding-box index.
#[derive(Debug, Clone)]
pub struct GeofenceStore {
    fences: BTreeMap<String, Geofence>,
    boxes: HashMap<String, BoundingBox>,
    grid: HashMap<Cell, BTreeSet<String>>,
    cell_deg: f64,
    version: u64,
}

impl Default for GeofenceStore {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_DEG)
    }
}

impl GeofenceStore {
    pub fn new(cell_deg: f64) -> Self {
        Self {
            fences: BTreeMap::new(),
            boxes: HashMap::new(),
            grid: HashMap::new(),
            cell_deg: if cell_deg > 0.0 { cell_deg } else { DEFAULT_CELL_DEG },
            version: 0,
        }
    }

    /// Incremented on every create, replace or delete.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Geofence> {
        self.fences.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Geofence> {
        self.fences.values()
    }

    /// Add or replace a fence. Returns true when a fence of that name existed.
    pub fn insert(&mut self, fence: Geofence) -> Result<bool> {
        fence.validate()?;
        let bbox = fence.bbox().ok_or_else(|| TacticalError::InvalidGeofence {
            name: fence.name.clone(),
            reason: "empty polygon".into(),
        })?;
        let replaced = self.unindex(&fence.name);
        for cell in self.cells(&bbox) {
            self.grid.entry(cell).or_default().insert(fence.name.clone());
        }
        self.boxes.insert(fence.name.clone(), bbox);
        self.fences.insert(fence.name.clone(), fence);
        self.version += 1;
        Ok(replaced)
    }

    pub fn remove(&mut self, name: &str) -> Option<Geofence> {
        let fence = self.fences.remove(name)?;
        self.unindex(name);
        self.version += 1;
        Some(fence)
    }

    pub fn clear(&mut self) {
        if self.fences.is_empty() {
            return;
        }
        self.fences.clear();
        self.boxes.clear();
        self.grid.clear();
        self.version += 1;
    }

    fn unindex(&mut self, name: &str) -> bool {
        let Some(bbox) = self.boxes.remove(name) else {
            return false;
        };
        for cell in self.cells(&bbox) {
            if let Some(names) = self.grid.get_mut(&cell) {
                names.remove(name);
                if names.is_empty() {
                    self.grid.remove(&cell);
                }
            }
        }
        true
    }

    fn cell_of(&self, lat: f64, lon: f64) -> Cell {
        (
            (lat / self.cell_deg).floor() as i64,
            (lon / self.cell_deg).floor() as i64,
        )
    }

    fn cells(&self, bbox: &BoundingBox) -> Vec<Cell> {
        let (lat0, lon0) = self.cell_of(bbox.min_lat, bbox.min_lon);
        let (lat1, lon1) = self.cell_of(bbox.max_lat, bbox.max_lon);
        let mut cells = Vec::new();
        for i in lat0..=lat1 {
            for j in lon0..=lon1 {
                cells.push((i, j));
            }
        }
        cells
    }

    /// Fences whose bounding box intersects `bbox`.
    pub fn candidates(&self, bbox: &BoundingBox) -> Vec<&Geofence> {
        let mut names = BTreeSet::new();
        for cell in self.cells(bbox) {
            if let Some(in_cell) = self.grid.get(&cell) {
                names.extend(in_cell.iter());
            }
        }
        names
            .into_iter()
            .filter(|name| self.boxes.get(*name).is_some_and(|b| b.intersects(bbox)))
            .filter_map(|name| self.fences.get(name))
            .collect()
    }

    /// Fences the polyline may cross, before the precise polygon test.
    pub fn candidates_for_line(&self, line: &[LatLon]) -> Vec<&Geofence> {
        match BoundingBox::from_points(line) {
            Some(bbox) => self.candidates(&bbox),
            None => Vec::new(),
        }
    }

    /// Count down loiter fences and remove the expired ones.
    pub fn tick_expiry(&mut self, dt_s: f64) -> Vec<String> {
        let mut expired = Vec::new();
        for fence in self.fences.values_mut() {
            if let Some(remaining) = fence.expires_in_s.as_mut() {
                *remaining -= dt_s;
                if *remaining <= 0.0 {
                    expired.push(fence.name.clone());
                }
            }
        }
        for name in &expired {
            self.remove(name);
            tracing::info!("geofence {} expired", name);
        }
        expired
    }

    /// Every fence appears in the grid under exactly the cells of its bounding box.
    pub fn is_index_consistent(&self) -> bool {
        if self.fences.len() != self.boxes.len() {
            return false;
        }
        for (name, fence) in &self.fences {
            let Some(bbox) = self.boxes.get(name) else {
                return false;
            };
            if fence.bbox().as_ref() != Some(bbox) {
                return false;
            }
            let indexed = self
                .cells(bbox)
                .iter()
                .all(|cell| self.grid.get(cell).is_some_and(|names| names.contains(name)));
            if !indexed {
                return false;
            }
        }
        self.grid
            .values()
            .flatten()
            .all(|name| self.fences.contains_key(name))
    }

    /// Name-keyed JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.fences)?)
    }

    /// Load fences from a name-keyed JSON object, returning how many were added.
    pub fn load_json_str(&mut self, json: &str) -> Result<usize> {
        let fences: BTreeMap<String, Geofence> = serde_json::from_str(json)?;
        let mut loaded = 0;
        for (_, fence) in fences {
            self.insert(fence)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let text = std::fs::read_to_string(path)?;
        self.load_json_str(&text)
    }
}
