//! Port for the external routing and fare provider.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::geo::Coordinates;
use crate::domain::ride::VehicleClass;

/// Errors raised by route service adapters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteServiceError {
    /// The provider could not be reached or answered with an error.
    #[error("route provider unreachable: {message}")]
    Unreachable {
        /// Adapter-provided failure detail.
        message: String,
    },
    /// The provider could not resolve an address.
    #[error("address could not be resolved: {address}")]
    AddressNotFound {
        /// The offending address.
        address: String,
    },
}

impl RouteServiceError {
    /// Provider transport failure.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Unresolvable address.
    pub fn address_not_found(address: impl Into<String>) -> Self {
        Self::AddressNotFound {
            address: address.into(),
        }
    }
}

/// Distance, duration and per-class fares between two addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteQuote {
    /// Route distance in metres.
    pub distance_meters: f64,
    /// Estimated travel time in seconds.
    pub duration_seconds: f64,
    /// Monetary fare per vehicle class.
    pub fares: HashMap<VehicleClass, f64>,
}

impl RouteQuote {
    /// Fare for the requested class, if the provider quoted one.
    #[must_use]
    pub fn fare_for(&self, class: VehicleClass) -> Option<f64> {
        self.fares.get(&class).copied()
    }
}

/// Port for fare quoting and one-shot geocoding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteService: Send + Sync {
    /// Quote distance, duration and fares between two addresses.
    async fn quote(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<RouteQuote, RouteServiceError>;

    /// Resolve an address to coordinates.
    async fn geocode(&self, address: &str) -> Result<Coordinates, RouteServiceError>;
}

/// Fixture provider with configurable canned answers, for tests and for
/// running the engine without an upstream.
#[derive(Debug, Clone)]
pub struct FixtureRouteService {
    quote: RouteQuote,
    /// Point returned for every geocode call.
    point: Coordinates,
}

impl FixtureRouteService {
    /// Build a fixture around a canned quote and geocode answer.
    #[must_use]
    pub fn new(quote: RouteQuote, point: Coordinates) -> Self {
        Self { quote, point }
    }
}

impl Default for FixtureRouteService {
    fn default() -> Self {
        let mut fares = HashMap::new();
        fares.insert(VehicleClass::Car, 10.0);
        fares.insert(VehicleClass::Bike, 4.0);
        Self {
            quote: RouteQuote {
                distance_meters: 5_000.0,
                duration_seconds: 600.0,
                fares,
            },
            point: Coordinates { lat: 7.80, lng: -72.45 },
        }
    }
}

#[async_trait]
impl RouteService for FixtureRouteService {
    async fn quote(
        &self,
        _origin: &str,
        _destination: &str,
    ) -> Result<RouteQuote, RouteServiceError> {
        Ok(self.quote.clone())
    }

    async fn geocode(&self, _address: &str) -> Result<Coordinates, RouteServiceError> {
        Ok(self.point)
    }
}
