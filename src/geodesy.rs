//! Spherical-earth helpers: haversine distance, initial bearing, forward
//! projection and circular angle arithmetic. All functions are total; NaN
//! inputs propagate.

use crate::types::GeoPoint;

/// Mean earth radius, meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine).
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` toward `b`, degrees in [0, 360).
///
/// Coincident points yield an arbitrary (but finite) direction.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let y = d_lon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lon.cos();
    normalize_angle(y.atan2(x).to_degrees())
}

/// Point reached after travelling `distance_m` along `bearing_deg` from `origin`.
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi1 = origin.latitude.to_radians();
    let lambda1 = origin.longitude.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    GeoPoint::new(phi2.to_degrees(), normalize_longitude(lambda2.to_degrees()))
}

/// Wrap any angle into [0, 360).
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Shortest signed rotation from `b` to `a`, degrees in (-180, 180].
pub fn signed_angle_difference(a: f64, b: f64) -> f64 {
    let d = normalize_angle(a) - normalize_angle(b);
    if d > 180.0 {
        d - 360.0
    } else if d <= -180.0 {
        d + 360.0
    } else {
        d
    }
}

fn normalize_longitude(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

/// Length of one degree of latitude and of longitude at `latitude`, meters.
pub fn meters_per_degree(latitude: f64) -> (f64, f64) {
    let per_deg = EARTH_RADIUS_M.to_radians();
    let lon = per_deg * latitude.to_radians().cos();
    // Keep the longitude scale usable right at the poles
    (per_deg, lon.abs().max(1e-6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const BLOQUE_A: GeoPoint = GeoPoint::new(4.6609819622582, -74.0596161549797);
    const BLOQUE_B: GeoPoint = GeoPoint::new(4.6612256555812, -74.0595379523924);

    #[test]
    fn test_distance_symmetric() {
        let pairs = [
            (BLOQUE_A, BLOQUE_B),
            (GeoPoint::new(35.0, 139.0), GeoPoint::new(36.0, 139.5)),
            (GeoPoint::new(-33.9, 151.2), GeoPoint::new(51.5, -0.1)),
        ];
        for (a, b) in pairs {
            assert_abs_diff_eq!(distance(a, b), distance(b, a), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_abs_diff_eq!(distance(BLOQUE_A, BLOQUE_A), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_one_degree_latitude() {
        // ~111.2 km per degree on a 6371 km sphere
        let d = distance(GeoPoint::new(35.0, 139.0), GeoPoint::new(36.0, 139.0));
        assert!((d - 111_195.0).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn test_bearing_cardinals() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert_abs_diff_eq!(bearing(origin, GeoPoint::new(1.0, 0.0)), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(origin, GeoPoint::new(0.0, 1.0)), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(origin, GeoPoint::new(-1.0, 0.0)), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing(origin, GeoPoint::new(0.0, -1.0)), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bearing_destination_round_trip() {
        let pairs = [
            (BLOQUE_A, BLOQUE_B),
            (GeoPoint::new(48.85, 2.35), GeoPoint::new(48.86, 2.29)),
            (GeoPoint::new(-12.0, -77.0), GeoPoint::new(-12.3, -76.8)),
        ];
        for (a, b) in pairs {
            let d = distance(a, b);
            let projected = destination_point(a, bearing(a, b), d);
            assert_abs_diff_eq!(distance(a, projected), d, epsilon = 1e-3);
            assert!(distance(projected, b) < 0.01, "projected {:?} vs {:?}", projected, b);
        }
    }

    #[test]
    fn test_destination_wraps_longitude() {
        let p = destination_point(GeoPoint::new(0.0, 179.9999), 90.0, 100.0);
        assert!(p.longitude < -179.0 && p.longitude >= -180.0, "got {}", p.longitude);
    }

    #[test]
    fn test_normalize_angle() {
        assert_abs_diff_eq!(normalize_angle(370.0), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(normalize_angle(-10.0), 350.0, epsilon = 1e-9);
        assert_abs_diff_eq!(normalize_angle(720.0), 0.0, epsilon = 1e-9);
        assert!(normalize_angle(-1e-15) < 360.0);
    }

    #[test]
    fn test_signed_difference_takes_short_way() {
        assert_abs_diff_eq!(signed_angle_difference(10.0, 350.0), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(signed_angle_difference(350.0, 10.0), -20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(signed_angle_difference(180.0, 0.0), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(signed_angle_difference(0.0, 180.0), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nan_propagates() {
        assert!(distance(GeoPoint::new(f64::NAN, 0.0), BLOQUE_A).is_nan());
    }
}
