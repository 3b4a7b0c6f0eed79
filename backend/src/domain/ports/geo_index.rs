//! Port for proximity queries over reachable drivers.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::geo::Coordinates;
use crate::domain::ride::{ActorId, VehicleClass};

/// Errors raised by geo index adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoIndexError {
    /// The spatial query failed.
    #[error("geo index query failed: {message}")]
    Query {
        /// Adapter-provided failure detail.
        message: String,
    },
}

impl GeoIndexError {
    /// Query execution failure.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// A candidate driver returned by a proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDriver {
    /// Driver identifier.
    pub driver_id: ActorId,
    /// Last known position.
    pub coords: Coordinates,
    /// Declared vehicle class.
    pub vehicle_class: VehicleClass,
}

/// Port for finding reachable, available drivers near a point.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Drivers of `class` within `radius_meters` of `point`, available and
    /// reachable, ordered by proximity and capped at `limit`.
    async fn find_near(
        &self,
        point: Coordinates,
        radius_meters: f64,
        class: VehicleClass,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, GeoIndexError>;
}
