//! Geographic utilities: distances, bearings and a locally-flat metric frame.

use geo::{Distance, Haversine, Point};
use std::f64::consts::{PI, TAU};

use crate::GpsPoint;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two GPS points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert a distance in meters to (latitude degrees, longitude degrees)
/// at the given latitude.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> (f64, f64) {
    let lat_deg = (meters / EARTH_RADIUS_M).to_degrees();
    // Clamp so polar latitudes don't blow up the longitude span
    let cos_lat = latitude.to_radians().cos().max(0.01);
    (lat_deg, lat_deg / cos_lat)
}

/// Initial great-circle bearing from `from` to `to`, in radians clockwise
/// from north, normalized to [0, 2π).
pub fn initial_bearing(from: &GpsPoint, to: &GpsPoint) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_lambda = (to.longitude - from.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    y.atan2(x).rem_euclid(TAU)
}

/// Signed heading change from one bearing to another, wrapped to (-π, π].
/// Positive values are right turns.
pub fn heading_change(from_bearing: f64, to_bearing: f64) -> f64 {
    let delta = (to_bearing - from_bearing).rem_euclid(TAU);
    if delta > PI {
        delta - TAU
    } else {
        delta
    }
}

/// Wrap a longitude difference to [-180, 180] degrees.
fn wrap_longitude_delta(delta: f64) -> f64 {
    if delta > 180.0 {
        delta - 360.0
    } else if delta < -180.0 {
        delta + 360.0
    } else {
        delta
    }
}

/// Equirectangular projection around an origin.
///
/// Accurate to well under a meter for the few-kilometer neighbourhoods the
/// projector works in, and cheap enough to run per vertex.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin: GpsPoint,
    cos_lat: f64,
}

impl LocalFrame {
    /// Create a frame whose (0, 0) is `origin`.
    pub fn centered_on(origin: GpsPoint) -> Self {
        Self {
            origin,
            cos_lat: origin.latitude.to_radians().cos(),
        }
    }

    /// Project a point into the frame, in meters (x east, y north).
    pub fn to_xy(&self, point: &GpsPoint) -> (f64, f64) {
        let d_lng = wrap_longitude_delta(point.longitude - self.origin.longitude);
        let x = d_lng.to_radians() * EARTH_RADIUS_M * self.cos_lat;
        let y = (point.latitude - self.origin.latitude).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }

    /// Map frame coordinates back to a GPS point.
    pub fn to_point(&self, x: f64, y: f64) -> GpsPoint {
        let latitude = self.origin.latitude + (y / EARTH_RADIUS_M).to_degrees();
        let longitude = if self.cos_lat.abs() < 1e-12 {
            self.origin.longitude
        } else {
            self.origin.longitude + (x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees()
        };
        GpsPoint::new(latitude, longitude)
    }

    /// Planar distance between two points in this frame.
    pub fn distance(&self, a: &GpsPoint, b: &GpsPoint) -> f64 {
        let (ax, ay) = self.to_xy(a);
        let (bx, by) = self.to_xy(b);
        (bx - ax).hypot(by - ay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        let london = GpsPoint::new(51.5074, -0.1278);
        let paris = GpsPoint::new(48.8566, 2.3522);
        let distance = haversine_distance(&london, &paris);
        assert!((distance - 343_500.0).abs() < 2_000.0, "got {}", distance);
    }

    #[test]
    fn test_polyline_length() {
        let points: Vec<GpsPoint> = (0..5)
            .map(|i| GpsPoint::new(51.5 + i as f64 * 0.001, -0.12))
            .collect();
        let length = polyline_length(&points);
        // 4 segments of ~111m
        assert!((length - 444.8).abs() < 2.0, "got {}", length);
        assert_eq!(polyline_length(&points[..1]), 0.0);
        assert_eq!(polyline_length(&[]), 0.0);
    }

    #[test]
    fn test_initial_bearing_cardinal() {
        let origin = GpsPoint::new(0.0, 0.0);
        let north = initial_bearing(&origin, &GpsPoint::new(0.01, 0.0));
        let east = initial_bearing(&origin, &GpsPoint::new(0.0, 0.01));
        let south = initial_bearing(&origin, &GpsPoint::new(-0.01, 0.0));
        let west = initial_bearing(&origin, &GpsPoint::new(0.0, -0.01));

        assert!(north.abs() < 1e-9 || (north - TAU).abs() < 1e-9);
        assert!((east - PI / 2.0).abs() < 1e-9);
        assert!((south - PI).abs() < 1e-9);
        assert!((west - 3.0 * PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_heading_change_wraps() {
        assert!((heading_change(0.0, PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert!((heading_change(PI / 2.0, 0.0) + PI / 2.0).abs() < 1e-12);
        // 350° -> 10° is a 20° right turn, not a 340° left one
        let delta = heading_change(350f64.to_radians(), 10f64.to_radians());
        assert!((delta - 20f64.to_radians()).abs() < 1e-9);
        assert!((heading_change(0.0, PI).abs() - PI).abs() < 1e-12);
    }

    #[test]
    fn test_local_frame_round_trip_and_distance() {
        let origin = GpsPoint::new(51.5074, -0.1278);
        let frame = LocalFrame::centered_on(origin);
        let p = GpsPoint::new(51.5084, -0.1268);

        let (x, y) = frame.to_xy(&p);
        let back = frame.to_point(x, y);
        assert!((back.latitude - p.latitude).abs() < 1e-9);
        assert!((back.longitude - p.longitude).abs() < 1e-9);

        let planar = frame.distance(&origin, &p);
        let great_circle = haversine_distance(&origin, &p);
        assert!((planar - great_circle).abs() < 0.5);
    }

    #[test]
    fn test_meters_to_degrees() {
        let (dlat, dlng) = meters_to_degrees(111_195.0, 60.0);
        assert!((dlat - 1.0).abs() < 0.01);
        assert!((dlng - 2.0).abs() < 0.02);
    }
}
