//! Geodesy helpers

use crate::types::GeoPoint;

/// Mean Earth radius (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two points (meters), haversine formula
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Arithmetic centroid of lat/lng pairs
///
/// Accurate for the tens-to-hundreds of meters spreads tracks and clusters
/// cover; not meant for points straddling the antimeridian.
pub fn centroid<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<GeoPoint> {
    let (mut lat, mut lng, mut n) = (0.0, 0.0, 0usize);
    for p in points {
        lat += p.lat;
        lng += p.lng;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(GeoPoint::new(lat / n as f64, lng / n as f64))
    }
}
