//! Reqwest-backed route/fare provider adapter.
//!
//! Owns transport details only: request serialisation, timeout and HTTP
//! error mapping, and JSON decoding into the port's quote type. The
//! provider is consulted once per ride creation; it is never asked per
//! location sample.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::domain::geo::Coordinates;
use crate::domain::ports::{RouteQuote, RouteService, RouteServiceError};
use crate::domain::ride::VehicleClass;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire shape of the provider's quote response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteDto {
    distance_meters: f64,
    duration_seconds: f64,
    /// Fares keyed by class name; unknown classes are ignored.
    fares: HashMap<String, f64>,
}

/// Wire shape of the provider's geocode response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeocodeDto {
    lat: f64,
    lng: f64,
}

/// Route service adapter performing HTTP GET requests against one
/// provider endpoint.
pub struct HttpRouteService {
    client: Client,
    base: Url,
}

impl HttpRouteService {
    /// Build an adapter with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(base: Url) -> Result<Self, reqwest::Error> {
        Self::with_timeout(base, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build an adapter with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn with_timeout(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RouteServiceError> {
        self.base
            .join(path)
            .map_err(|err| RouteServiceError::unreachable(format!("bad provider url: {err}")))
    }
}

#[async_trait]
impl RouteService for HttpRouteService {
    async fn quote(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<RouteQuote, RouteServiceError> {
        let url = self.endpoint("route")?;
        let response = self
            .client
            .get(url)
            .query(&[("origin", origin), ("destination", destination)])
            .send()
            .await
            .map_err(|err| RouteServiceError::unreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RouteServiceError::unreachable(format!(
                "provider answered {}",
                response.status()
            )));
        }
        let dto: QuoteDto = response
            .json()
            .await
            .map_err(|err| RouteServiceError::unreachable(format!("bad quote body: {err}")))?;

        let fares = dto
            .fares
            .iter()
            .filter_map(|(name, fare)| VehicleClass::parse(name).map(|class| (class, *fare)))
            .collect();
        Ok(RouteQuote {
            distance_meters: dto.distance_meters,
            duration_seconds: dto.duration_seconds,
            fares,
        })
    }

    async fn geocode(&self, address: &str) -> Result<Coordinates, RouteServiceError> {
        let url = self.endpoint("geocode")?;
        let response = self
            .client
            .get(url)
            .query(&[("address", address)])
            .send()
            .await
            .map_err(|err| RouteServiceError::unreachable(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RouteServiceError::address_not_found(address));
        }
        if !response.status().is_success() {
            return Err(RouteServiceError::unreachable(format!(
                "provider answered {}",
                response.status()
            )));
        }
        let dto: GeocodeDto = response
            .json()
            .await
            .map_err(|err| RouteServiceError::unreachable(format!("bad geocode body: {err}")))?;
        Coordinates::new(dto.lat, dto.lng)
            .map_err(|err| RouteServiceError::unreachable(format!("provider sent {err}")))
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.

    use super::*;

    #[test]
    fn quote_dto_parses_known_classes_and_ignores_the_rest() {
        let dto: QuoteDto = serde_json::from_value(serde_json::json!({
            "distanceMeters": 5000.0,
            "durationSeconds": 600.0,
            "fares": { "car": 10.0, "moto": 4.0, "boat": 99.0 }
        }))
        .expect("valid dto");

        let fares: HashMap<VehicleClass, f64> = dto
            .fares
            .iter()
            .filter_map(|(name, fare)| VehicleClass::parse(name).map(|class| (class, *fare)))
            .collect();
        assert_eq!(fares.get(&VehicleClass::Car), Some(&10.0));
        assert_eq!(fares.get(&VehicleClass::Bike), Some(&4.0));
        assert_eq!(fares.len(), 2);
    }
}
