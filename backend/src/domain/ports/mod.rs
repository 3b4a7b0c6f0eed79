//! Outbound ports consumed by the dispatch domain.
//!
//! Each port lives in its own module together with its error enum and,
//! where useful, a fixture implementation for tests that do not exercise
//! that boundary.

mod geo_index;
mod ride_repository;
mod route_service;

pub use geo_index::{GeoIndex, GeoIndexError, NearbyDriver};
pub use ride_repository::{RideRepository, RideRepositoryError};
pub use route_service::{FixtureRouteService, RouteQuote, RouteService, RouteServiceError};

#[cfg(test)]
pub use geo_index::MockGeoIndex;
#[cfg(test)]
pub use ride_repository::MockRideRepository;
#[cfg(test)]
pub use route_service::MockRouteService;
