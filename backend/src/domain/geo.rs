//! Geospatial primitives shared by dispatch and live tracking.
//!
//! Distances use the haversine great-circle approximation, which is
//! accurate to well under a percent at city scale and needs no external
//! routing call.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Mean Earth radius in metres.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Validation failures for raw coordinate input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatesError {
    /// Latitude must lie within [-90, 90] degrees.
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    /// Longitude must lie within [-180, 180] degrees.
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// A WGS-84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinates {
    /// Build a validated point; rejects out-of-range values without rounding.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinatesError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinatesError::LatitudeOutOfRange(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinatesError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }
}

/// Great-circle distance between two points in metres.
#[must_use]
pub fn haversine_meters(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Initial bearing from `from` towards `to`, in degrees clockwise from north.
#[must_use]
pub fn initial_bearing_degrees(from: Coordinates, to: Coordinates) -> f64 {
    let lat_a = from.lat.to_radians();
    let lat_b = to.lat.to_radians();
    let d_lng = (to.lng - from.lng).to_radians();

    let y = d_lng.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lng.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}
