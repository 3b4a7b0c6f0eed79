//! Backend entry-point: wires REST endpoints, WebSocket entry, and the
//! background sweepers.

use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

use dispatch::server::{self, ServerConfig};

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let config = ServerConfig::from_env().map_err(std::io::Error::other)?;
    server::run(config).await
}
