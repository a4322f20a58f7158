// core/geo.rs

// Small geodesy helpers shared by the simulator and navigation behaviors.
// Distances are haversine, local offsets use an equirectangular approximation,
// which is accurate enough over the few kilometers a drone covers.

use super::entities::LatLon;
use nalgebra::Vector2;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Wraps an angle into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Signed difference `target - current` wrapped into (-180, 180]
pub fn heading_error(current: f64, target: f64) -> f64 {
    let diff = normalize_degrees(target - current);
    if diff > 180.0 { diff - 360.0 } else { diff }
}

/// Great-circle distance in meters
pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from `a` to `b` in [0, 360), clockwise from north
pub fn bearing_degrees(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlon = (b.lon - a.lon).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalize_degrees(y.atan2(x).to_degrees())
}

/// Moves `origin` by a local (east, north) offset in meters
pub fn offset(origin: LatLon, east_north: Vector2<f64>) -> LatLon {
    let dlat = east_north.y / EARTH_RADIUS_M;
    let dlon = east_north.x / (EARTH_RADIUS_M * origin.lat.to_radians().cos());
    LatLon::new(origin.lat + dlat.to_degrees(), origin.lon + dlon.to_degrees())
}

/// Unit vector (east, north) for a compass heading
pub fn heading_vector(heading_degrees: f64) -> Vector2<f64> {
    let rad = heading_degrees.to_radians();
    Vector2::new(rad.sin(), rad.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(360.0, 0.0)]
    #[case(-90.0, 270.0)]
    #[case(725.0, 5.0)]
    fn test_normalize(#[case] input: f64, #[case] expected: f64) {
        assert!((normalize_degrees(input) - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case(10.0, 20.0, 10.0)]
    #[case(350.0, 10.0, 20.0)]
    #[case(10.0, 350.0, -20.0)]
    #[case(0.0, 180.0, 180.0)]
    fn test_heading_error(#[case] current: f64, #[case] target: f64, #[case] expected: f64) {
        assert!((heading_error(current, target) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_cardinal() {
        let origin = LatLon::new(38.7, -9.1);
        let north = offset(origin, Vector2::new(0.0, 100.0));
        let east = offset(origin, Vector2::new(100.0, 0.0));
        assert!(bearing_degrees(origin, north) < 0.1 || bearing_degrees(origin, north) > 359.9);
        assert!((bearing_degrees(origin, east) - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_offset_distance_roundtrip() {
        let origin = LatLon::new(38.7, -9.1);
        let moved = offset(origin, Vector2::new(30.0, 40.0));
        assert!((distance_m(origin, moved) - 50.0).abs() < 0.1);
    }
}
