//! Great-circle distances on a spherical Earth.
//!
//! Every distance in the crate (route length, checkpoint spacing, arrival
//! radius, time budget) goes through [`haversine_distance`], so the whole
//! engine agrees on one Earth model.

use safepath_env::Coordinate;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine great-circle distance between two coordinates in meters.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a polyline: the sum of its consecutive segment lengths.
pub fn path_length(points: &[Coordinate]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(pair[0], pair[1]))
        .sum()
}

/// Longitude offset in degrees that spans `meters` along the equator.
///
/// Handy for building polylines of an exact length.
pub fn equatorial_degrees(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_M).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_degree_of_longitude_on_equator() {
        let d = haversine_distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert_relative_eq!(d, EARTH_RADIUS_M * std::f64::consts::PI / 180.0, epsilon = 1e-6);
        assert_relative_eq!(d, 111_194.926_644_558_7, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_and_symmetry() {
        let delhi = Coordinate::new(28.7041, 77.1025);
        let agra = Coordinate::new(27.1767, 78.0081);

        assert_eq!(haversine_distance(delhi, delhi), 0.0);
        assert_relative_eq!(
            haversine_distance(delhi, agra),
            haversine_distance(agra, delhi),
            epsilon = 1e-9
        );
        // Roughly 190 km as the crow flies
        let d = haversine_distance(delhi, agra);
        assert!(d > 185_000.0 && d < 195_000.0, "got {d}");
    }

    #[test]
    fn test_antipodal_points() {
        let d = haversine_distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert_relative_eq!(d, EARTH_RADIUS_M * std::f64::consts::PI, epsilon = 1e-6);
    }

    #[test]
    fn test_path_length() {
        let step = equatorial_degrees(2_500.0);
        let route = [
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, step),
            Coordinate::new(0.0, 2.0 * step),
        ];
        assert_relative_eq!(path_length(&route), 5_000.0, epsilon = 1e-6);
        assert_eq!(path_length(&route[..1]), 0.0);
        assert_eq!(path_length(&[]), 0.0);
    }
}
