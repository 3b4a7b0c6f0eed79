//! Server configuration from the environment.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

/// Default bind address when `DISPATCH_BIND_ADDR` is unset.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Configuration problems that should abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `DISPATCH_BIND_ADDR` did not parse as a socket address.
    #[error("invalid bind address {value:?}: {source}")]
    BindAddr {
        /// The offending value.
        value: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },
    /// `DISPATCH_ROUTING_URL` did not parse as a URL.
    #[error("invalid routing url {value:?}: {source}")]
    RoutingUrl {
        /// The offending value.
        value: String,
        /// Parse failure.
        source: url::ParseError,
    },
}

/// Runtime server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Route provider base URL. `None` selects the canned fixture
    /// provider, for development and tests.
    pub routing_url: Option<Url>,
}

impl ServerConfig {
    /// Read configuration from `DISPATCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a variable is set but unparsable;
    /// unset variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(
            env::var("DISPATCH_BIND_ADDR").ok(),
            env::var("DISPATCH_ROUTING_URL").ok(),
        )
    }

    fn from_values(
        bind_addr: Option<String>,
        routing_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_raw = bind_addr.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let bind_addr = bind_raw.parse().map_err(|source| ConfigError::BindAddr {
            value: bind_raw,
            source,
        })?;
        let routing_url = routing_url
            .map(|raw| {
                Url::parse(&raw).map_err(|source| ConfigError::RoutingUrl { value: raw, source })
            })
            .transpose()?;
        Ok(Self {
            bind_addr,
            routing_url,
        })
    }
}
