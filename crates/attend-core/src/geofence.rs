//! Circular geofence check on the WGS-84 mean sphere.
//!
//! Callers pass whatever the client sent; anything that does not parse
//! to a valid latitude/longitude pair fails the check instead of erroring.

use serde::{Deserialize, Serialize};

/// IUGG mean Earth radius in meters.
const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// A validated coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Returns `None` for non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle (haversine) surface distance in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_MEAN_RADIUS_M * c
    }
}

/// A coordinate as submitted by a client: a JSON number or a numeric string.
///
/// Any other JSON value still deserializes, as `Other`, and never parses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl Coordinate {
    pub fn parse(&self) -> Option<f64> {
        match self {
            Coordinate::Number(v) => Some(*v),
            Coordinate::Text(s) => s.trim().parse().ok(),
            Coordinate::Other(_) => None,
        }
    }
}

impl From<f64> for Coordinate {
    fn from(v: f64) -> Self {
        Coordinate::Number(v)
    }
}

impl From<&str> for Coordinate {
    fn from(s: &str) -> Self {
        Coordinate::Text(s.to_string())
    }
}

/// Allowed area: a center point plus an inclusive radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFence {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl GeoFence {
    pub fn new(center: GeoPoint, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// Distance from the center, or `None` if the input is not a valid point.
    pub fn distance_to(&self, lat: &Coordinate, lon: &Coordinate) -> Option<f64> {
        let point = GeoPoint::new(lat.parse()?, lon.parse()?)?;
        Some(point.distance_m(&self.center))
    }

    /// True iff the point parses and lies within `radius_m` (boundary inclusive).
    pub fn within_allowed_area(&self, lat: &Coordinate, lon: &Coordinate) -> bool {
        match self.distance_to(lat, lon) {
            Some(d) => d <= self.radius_m,
            None => {
                tracing::debug!(?lat, ?lon, "unparseable coordinates rejected");
                false
            }
        }
    }
}
