//! Spherical geometry on a mean-radius Earth.
//!
//! Pure functions shared by the conditioner (speed checks), the tracker
//! (path length) and the territory engine (loop closure, enclosed area).

use terra_env::GeoPoint;

/// Mean Earth radius used by every distance and area computation.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine).
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Clamp: rounding can push h a hair above 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` to `to`, in degrees within [0, 360).
pub fn bearing(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlng = (to.lng - from.lng).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();

    let degrees = y.atan2(x).to_degrees().rem_euclid(360.0);
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

/// Unsigned area in m² enclosed by a ring on the sphere.
///
/// The ring may be open or closed; a repeated closing point contributes
/// nothing. Fewer than 3 points yields 0.
///
/// Sums the signed areas of the polar triangles formed by each edge and the
/// north pole (spherical excess via half-colatitude tangents), which stays
/// exact for both tiny and continental rings.
pub fn polygon_area(ring: &[GeoPoint]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let mut total = 0.0;
    let prev = ring[ring.len() - 1];
    let mut prev_tan_lat = half_colatitude_tan(prev.lat);
    let mut prev_lng = prev.lng.to_radians();

    for point in ring {
        let tan_lat = half_colatitude_tan(point.lat);
        let lng = point.lng.to_radians();
        total += polar_triangle_area(tan_lat, lng, prev_tan_lat, prev_lng);
        prev_tan_lat = tan_lat;
        prev_lng = lng;
    }

    (total * EARTH_RADIUS_M * EARTH_RADIUS_M).abs()
}

/// Sum of consecutive great-circle distances along a polyline.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Displaces `origin` by local metric offsets.
///
/// Equirectangular approximation around `origin`; accurate to well under a
/// meter over the few-kilometer extents of a single run.
pub fn offset(origin: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
    let dlng = (east_m / (EARTH_RADIUS_M * origin.lat.to_radians().cos())).to_degrees();
    GeoPoint::new(origin.lat + dlat, origin.lng + dlng)
}

fn half_colatitude_tan(lat_degrees: f64) -> f64 {
    ((std::f64::consts::FRAC_PI_2 - lat_degrees.to_radians()) / 2.0).tan()
}

fn polar_triangle_area(tan1: f64, lng1: f64, tan2: f64, lng2: f64) -> f64 {
    let delta_lng = lng1 - lng2;
    let t = tan1 * tan2;
    2.0 * (t * delta_lng.sin()).atan2(1.0 + t * delta_lng.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const LONDON: GeoPoint = GeoPoint {
        lat: 51.5074,
        lng: -0.1278,
    };

    fn square(origin: GeoPoint, side_m: f64) -> Vec<GeoPoint> {
        vec![
            origin,
            offset(origin, 0.0, side_m),
            offset(origin, side_m, side_m),
            offset(origin, side_m, 0.0),
        ]
    }

    #[test]
    fn test_known_city_distance() {
        let sf = GeoPoint::new(37.7749, -122.4194);
        let la = GeoPoint::new(34.0522, -118.2437);

        // Approximately 559 km
        assert!((distance(sf, la) - 559_000.0).abs() < 10_000.0);
    }

    #[test]
    fn test_offset_distance_matches_request() {
        let north = offset(LONDON, 100.0, 0.0);
        let east = offset(LONDON, 0.0, 100.0);

        assert_relative_eq!(distance(LONDON, north), 100.0, epsilon = 1e-6);
        assert_relative_eq!(distance(LONDON, east), 100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_cardinal_bearings() {
        assert_relative_eq!(bearing(LONDON, offset(LONDON, 50.0, 0.0)), 0.0, epsilon = 1e-6);
        assert_relative_eq!(bearing(LONDON, offset(LONDON, 0.0, 50.0)), 90.0, epsilon = 1e-3);
        assert_relative_eq!(bearing(LONDON, offset(LONDON, -50.0, 0.0)), 180.0, epsilon = 1e-6);
        assert_relative_eq!(bearing(LONDON, offset(LONDON, 0.0, -50.0)), 270.0, epsilon = 1e-3);
    }

    #[test]
    fn test_square_area_open_and_closed() {
        let mut ring = square(LONDON, 100.0);
        let open_area = polygon_area(&ring);
        assert!((open_area - 10_000.0).abs() < 10_000.0 * 0.01, "area = {open_area}");

        ring.push(ring[0]);
        assert_relative_eq!(polygon_area(&ring), open_area, max_relative = 1e-9);
    }

    #[test]
    fn test_area_ignores_orientation() {
        let ring = square(LONDON, 250.0);
        let mut reversed = ring.clone();
        reversed.reverse();

        assert_relative_eq!(polygon_area(&ring), polygon_area(&reversed), max_relative = 1e-9);
    }

    #[test]
    fn test_degenerate_rings_have_no_area() {
        assert_eq!(polygon_area(&[]), 0.0);
        assert_eq!(polygon_area(&[LONDON, offset(LONDON, 10.0, 0.0)]), 0.0);
    }

    #[test]
    fn test_polyline_length() {
        let points = vec![
            LONDON,
            offset(LONDON, 30.0, 0.0),
            offset(LONDON, 30.0, 40.0),
        ];
        assert_relative_eq!(polyline_length(&points), 70.0, epsilon = 1e-2);
        assert_eq!(polyline_length(&points[..1]), 0.0);
    }

    fn any_point() -> impl Strategy<Value = GeoPoint> {
        (-80.0f64..80.0, -179.0f64..179.0).prop_map(|(lat, lng)| GeoPoint::new(lat, lng))
    }

    proptest! {
        #[test]
        fn prop_distance_to_self_is_zero(p in any_point()) {
            prop_assert_eq!(distance(p, p), 0.0);
        }

        #[test]
        fn prop_distance_is_symmetric(a in any_point(), b in any_point()) {
            let ab = distance(a, b);
            let ba = distance(b, a);
            prop_assert!((ab - ba).abs() <= 1e-6 * ab.max(1.0));
        }

        #[test]
        fn prop_bearing_in_range(a in any_point(), b in any_point()) {
            let deg = bearing(a, b);
            prop_assert!((0.0..360.0).contains(&deg));
        }
    }
}
