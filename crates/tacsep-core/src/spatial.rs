//! Spatial math for conflict detection, intent projection and geofence tests.
//!
//! Positions are `(lat, lon)` pairs in decimal degrees. Planar work is done in a
//! local east/north frame in meters around a reference point, which is accurate
//! enough for the few-kilometer extents tactical separation deals with.

use serde::{Deserialize, Serialize};

pub type LatLon = (f64, f64);

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate distance between two points in meters using Haversine formula.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Flat-earth east/north offset in meters from point 1 to point 2.
///
/// Uses the mean latitude for longitude scaling, which is what the CPA tests
/// need: a cheap vector that can be dotted with relative velocity.
pub fn flat_offset_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    let mean_lat = (0.5 * (lat1 + lat2)).to_radians();
    let east = EARTH_RADIUS_M * (lon2 - lon1).to_radians() * mean_lat.cos();
    let north = EARTH_RADIUS_M * (lat2 - lat1).to_radians();
    (east, north)
}

// ==== ENU (East-North-Up) Coordinate Conversion ====

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Convert a north/south offset in meters to degrees latitude.
pub fn meters_to_lat(meters: f64, ref_lat_deg: f64) -> f64 {
    meters / meters_per_deg_lat(ref_lat_deg).max(1e-9)
}

/// Convert an east/west offset in meters to degrees longitude.
pub fn meters_to_lon(meters: f64, ref_lat_deg: f64) -> f64 {
    meters / meters_per_deg_lon(ref_lat_deg).max(1e-9)
}

pub fn lat_to_meters(deg: f64, ref_lat_deg: f64) -> f64 {
    deg * meters_per_deg_lat(ref_lat_deg)
}

pub fn lon_to_meters(deg: f64, ref_lat_deg: f64) -> f64 {
    deg * meters_per_deg_lon(ref_lat_deg)
}

/// Local tangent-plane frame anchored at a reference point.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    ref_lat: f64,
    ref_lon: f64,
}

impl LocalFrame {
    pub fn new(ref_lat: f64, ref_lon: f64) -> Self {
        Self { ref_lat, ref_lon }
    }

    /// Frame centered on the mean of the given points.
    pub fn around(points: &[LatLon]) -> Self {
        if points.is_empty() {
            return Self::new(0.0, 0.0);
        }
        let n = points.len() as f64;
        let lat = points.iter().map(|p| p.0).sum::<f64>() / n;
        let lon = points.iter().map(|p| p.1).sum::<f64>() / n;
        Self::new(lat, lon)
    }

    /// (east, north) in meters.
    pub fn to_xy(&self, point: LatLon) -> (f64, f64) {
        (
            lon_to_meters(point.1 - self.ref_lon, self.ref_lat),
            lat_to_meters(point.0 - self.ref_lat, self.ref_lat),
        )
    }
}

/// Calculate bearing from point 1 to point 2 in radians.
/// Returns bearing in radians, 0 = north, π/2 = east.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Bearing in degrees normalized to [0, 360).
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    bearing(lat1, lon1, lat2, lon2).to_degrees().rem_euclid(360.0)
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `lat`, `lon` - Starting position in degrees
/// * `distance_m` - Distance in meters
/// * `bearing_rad` - Bearing in radians (0 = north, π/2 = east)
pub fn offset_by_bearing(lat: f64, lon: f64, distance_m: f64, bearing_rad: f64) -> LatLon {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

/// Absolute heading change in degrees between two bearings, in [0, 180].
pub fn heading_change_deg(from_deg: f64, to_deg: f64) -> f64 {
    let diff = (to_deg - from_deg).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Length of a polyline in meters.
pub fn polyline_length_m(points: &[LatLon]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(w[0].0, w[0].1, w[1].0, w[1].1))
        .sum()
}

pub(crate) fn segments_intersect_2d(
    a1: (f64, f64),
    a2: (f64, f64),
    b1: (f64, f64),
    b2: (f64, f64),
) -> bool {
    // Tolerance in meters on locally projected coordinates.
    const EPS_M: f64 = 1e-6;

    fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    }

    fn within(a: f64, b: f64, value: f64) -> bool {
        let min = a.min(b) - EPS_M;
        let max = a.max(b) + EPS_M;
        value >= min && value <= max
    }

    fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
        within(p.0, q.0, r.0) && within(p.1, q.1, r.1)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if o1.abs() <= EPS_M && on_segment(a1, a2, b1) {
        return true;
    }
    if o2.abs() <= EPS_M && on_segment(a1, a2, b2) {
        return true;
    }
    if o3.abs() <= EPS_M && on_segment(b1, b2, a1) {
        return true;
    }
    if o4.abs() <= EPS_M && on_segment(b1, b2, a2) {
        return true;
    }

    let a_crosses = (o1 > EPS_M && o2 < -EPS_M) || (o1 < -EPS_M && o2 > EPS_M);
    let b_crosses = (o3 > EPS_M && o4 < -EPS_M) || (o3 < -EPS_M && o4 > EPS_M);
    a_crosses && b_crosses
}

fn point_segment_distance_xy(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let sx = b.0 - a.0;
    let sy = b.1 - a.1;
    let px = p.0 - a.0;
    let py = p.1 - a.1;
    let seg_len_sq = sx * sx + sy * sy;
    if seg_len_sq < 0.0001 {
        return (px * px + py * py).sqrt();
    }
    let t = ((px * sx + py * sy) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * sx;
    let dy = py - t * sy;
    (dx * dx + dy * dy).sqrt()
}

fn segment_distance_xy(a1: (f64, f64), a2: (f64, f64), b1: (f64, f64), b2: (f64, f64)) -> f64 {
    if segments_intersect_2d(a1, a2, b1, b2) {
        return 0.0;
    }
    point_segment_distance_xy(a1, b1, b2)
        .min(point_segment_distance_xy(a2, b1, b2))
        .min(point_segment_distance_xy(b1, a1, a2))
        .min(point_segment_distance_xy(b2, a1, a2))
}

/// Nearest distance between two polylines in meters.
///
/// A single-point polyline is treated as a point. Returns `None` when either
/// input is empty.
pub fn polyline_distance_m(a: &[LatLon], b: &[LatLon]) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    let frame = LocalFrame::around(&all);

    let project = |line: &[LatLon]| -> Vec<((f64, f64), (f64, f64))> {
        let xy: Vec<(f64, f64)> = line.iter().map(|p| frame.to_xy(*p)).collect();
        if xy.len() == 1 {
            vec![(xy[0], xy[0])]
        } else {
            xy.windows(2).map(|w| (w[0], w[1])).collect()
        }
    };

    let segs_a = project(a);
    let segs_b = project(b);
    let mut best = f64::INFINITY;
    for (a1, a2) in &segs_a {
        for (b1, b2) in &segs_b {
            best = best.min(segment_distance_xy(*a1, *a2, *b1, *b2));
            if best <= 0.0 {
                return Some(0.0);
            }
        }
    }
    Some(best)
}

/// Ray casting point-in-polygon test.
pub fn point_in_polygon(point: LatLon, polygon: &[LatLon]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (lat, lon) = point;
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (lat_i, lon_i) = polygon[i];
        let (lat_j, lon_j) = polygon[j];
        if ((lat_i > lat) != (lat_j > lat))
            && (lon < (lon_j - lon_i) * (lat - lat_i) / (lat_j - lat_i) + lon_i)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// True when a polyline touches the polygon: any vertex inside or any edge crossing.
pub fn polyline_intersects_polygon(line: &[LatLon], polygon: &[LatLon]) -> bool {
    if line.is_empty() || polygon.len() < 3 {
        return false;
    }
    if line.iter().any(|p| point_in_polygon(*p, polygon)) {
        return true;
    }
    let mut all = Vec::with_capacity(line.len() + polygon.len());
    all.extend_from_slice(line);
    all.extend_from_slice(polygon);
    let frame = LocalFrame::around(&all);
    let ring: Vec<(f64, f64)> = polygon.iter().map(|p| frame.to_xy(*p)).collect();
    let path: Vec<(f64, f64)> = line.iter().map(|p| frame.to_xy(*p)).collect();

    for seg in path.windows(2) {
        for k in 0..ring.len() {
            let e1 = ring[k];
            let e2 = ring[(k + 1) % ring.len()];
            if segments_intersect_2d(seg[0], seg[1], e1, e2) {
                return true;
            }
        }
    }
    false
}

/// Axis-aligned lat/lon bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn from_points(points: &[LatLon]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            min_lat: first.0,
            min_lon: first.1,
            max_lat: first.0,
            max_lon: first.1,
        };
        for p in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(p.0);
            bbox.min_lon = bbox.min_lon.min(p.1);
            bbox.max_lat = bbox.max_lat.max(p.0);
            bbox.max_lon = bbox.max_lon.max(p.1);
        }
        Some(bbox)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
            && self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
    }

    pub fn contains(&self, point: LatLon) -> bool {
        point.0 >= self.min_lat
            && point.0 <= self.max_lat
            && point.1 >= self.min_lon
            && point.1 <= self.max_lon
    }

    /// Rectangle ring, counter-clockwise from the south-west corner.
    pub fn ring(&self) -> [LatLon; 4] {
        [
            (self.min_lat, self.min_lon),
            (self.min_lat, self.max_lon),
            (self.max_lat, self.max_lon),
            (self.max_lat, self.min_lon),
        ]
    }

    /// True when the segment touches the box.
    pub fn intersects_segment(&self, a: LatLon, b: LatLon) -> bool {
        if self.contains(a) || self.contains(b) {
            return true;
        }
        polyline_intersects_polygon(&[a, b], &self.ring())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // ~111km between these points (1 degree latitude)
        let dist = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111_194.0).abs() < 100.0);
    }

    #[test]
    fn test_haversine_same_point() {
        let dist = haversine_distance(52.0, 4.37, 52.0, 4.37);
        assert!(dist < 0.001);
    }

    #[test]
    fn offset_then_distance_matches() {
        let (lat, lon) = offset_by_bearing(52.0, 4.0, 250.0, std::f64::consts::FRAC_PI_2);
        let dist = haversine_distance(52.0, 4.0, lat, lon);
        assert!((dist - 250.0).abs() < 0.5, "got {dist}");
        assert!((bearing_deg(52.0, 4.0, lat, lon) - 90.0).abs() < 0.1);
    }

    #[test]
    fn crossing_segments_have_zero_distance() {
        let base_lat = 48.2;
        let base_lon = 16.3;
        let delta = meters_to_lat(100.0, base_lat);
        let dist = polyline_distance_m(
            &[(base_lat, base_lon), (base_lat + delta, base_lon + delta)],
            &[(base_lat + delta, base_lon), (base_lat, base_lon + delta)],
        )
        .unwrap();
        assert!(dist < 0.001, "expected crossing segments distance 0, got {dist}");
    }

    #[test]
    fn parallel_polylines_report_their_gap() {
        let lat = 48.2;
        let gap = meters_to_lat(80.0, lat);
        let a = vec![(lat, 16.30), (lat, 16.31)];
        let b = vec![(lat + gap, 16.30), (lat + gap, 16.31)];
        let dist = polyline_distance_m(&a, &b).unwrap();
        assert!((dist - 80.0).abs() < 1.0, "got {dist}");
    }

    #[test]
    fn single_point_polyline_distance() {
        let lat = 48.2;
        let a = vec![(lat, 16.30)];
        let b = vec![(lat, 16.30), (lat + meters_to_lat(100.0, lat), 16.30)];
        assert!(polyline_distance_m(&a, &b).unwrap() < 0.01);
        assert!(polyline_distance_m(&[], &b).is_none());
    }

    #[test]
    fn point_in_square_polygon() {
        let square = vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        assert!(point_in_polygon((0.5, 0.5), &square));
        assert!(!point_in_polygon((1.5, 0.5), &square));
    }

    #[test]
    fn line_through_polygon_without_vertices_inside() {
        let square = vec![(0.0, 0.0), (0.0, 0.001), (0.001, 0.001), (0.001, 0.0)];
        let line = vec![(0.0005, -0.001), (0.0005, 0.002)];
        assert!(polyline_intersects_polygon(&line, &square));
        let miss = vec![(0.002, -0.001), (0.002, 0.002)];
        assert!(!polyline_intersects_polygon(&miss, &square));
    }

    #[test]
    fn heading_change_wraps() {
        assert!((heading_change_deg(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((heading_change_deg(0.0, 180.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn bbox_segment_intersection() {
        let bbox = BoundingBox::from_points(&[(0.0, 0.0), (0.001, 0.001)]).unwrap();
        assert!(bbox.intersects_segment((0.0005, -0.01), (0.0005, 0.01)));
        assert!(!bbox.intersects_segment((0.01, -0.01), (0.01, 0.01)));
    }
}
