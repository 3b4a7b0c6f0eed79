//! Server construction and wiring.
//!
//! `build_engine` assembles the domain services over their ports; `run`
//! binds the HTTP server, spawns the background sweepers, and serves
//! until shutdown. The in-memory ride store is the only store adapter;
//! swapping in a durable one means implementing
//! [`crate::domain::ports::RideRepository`] and changing one line here.

mod config;

pub use config::{ConfigError, DEFAULT_BIND_ADDR, ServerConfig};

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use mockable::{Clock, DefaultClock};
use tracing::info;

use crate::api::health::{self, HealthState};
use crate::api::rides;
use crate::domain::ports::{FixtureRouteService, RideRepository, RouteService};
use crate::domain::{
    DispatchConfig, DispatchMatcher, ExpirationSweeper, LocationStreamProcessor,
    MaintenanceSweeper, PresenceRegistry, RideLifecycleService,
};
use crate::outbound::memory::{InMemoryRideStore, PresenceGeoIndex};
use crate::outbound::routing::HttpRouteService;
use crate::ws::{self, state::WsState};

/// The assembled engine, ready to serve.
pub struct Engine {
    /// Ride creation and lifecycle transitions.
    pub lifecycle: Arc<RideLifecycleService>,
    /// Dependency bundle for WebSocket sessions.
    pub ws_state: WsState,
    /// Cancels overdue pending rides.
    pub expiration: ExpirationSweeper,
    /// Evicts idle presence entries and stale dedup pairs.
    pub maintenance: MaintenanceSweeper,
}

/// Assemble the domain services over their ports.
///
/// # Errors
///
/// Returns an error when the HTTP route provider client cannot be
/// constructed.
pub fn build_engine(config: &ServerConfig) -> Result<Engine, reqwest::Error> {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let presence = Arc::new(PresenceRegistry::new());
    let rides: Arc<dyn RideRepository> = Arc::new(InMemoryRideStore::new());
    let geo = Arc::new(PresenceGeoIndex::new(Arc::clone(&presence)));

    let routes: Arc<dyn RouteService> = match &config.routing_url {
        Some(url) => {
            info!(url = %url, "using http route provider");
            Arc::new(HttpRouteService::new(url.clone())?)
        }
        None => {
            info!("no routing url configured; using fixture route provider");
            Arc::new(FixtureRouteService::default())
        }
    };

    let matcher = Arc::new(DispatchMatcher::new(
        Arc::clone(&rides),
        geo,
        Arc::clone(&presence),
        Arc::clone(&clock),
        DispatchConfig::default(),
    ));
    let lifecycle = Arc::new(RideLifecycleService::new(
        Arc::clone(&rides),
        routes,
        Arc::clone(&presence),
        Arc::clone(&matcher),
        Arc::clone(&clock),
    ));
    let locations = Arc::new(LocationStreamProcessor::new(
        Arc::clone(&rides),
        Arc::clone(&presence),
        Arc::clone(&clock),
    ));
    let ws_state = WsState::new(
        Arc::clone(&presence),
        Arc::clone(&matcher),
        locations,
        Arc::clone(&rides),
        Arc::clone(&clock),
    );
    let expiration = ExpirationSweeper::new(
        Arc::clone(&rides),
        Arc::clone(&presence),
        Arc::clone(&clock),
    );
    let maintenance = MaintenanceSweeper::new(presence, matcher, clock);

    Ok(Engine {
        lifecycle,
        ws_state,
        expiration,
        maintenance,
    })
}

/// Bind and serve until shutdown.
///
/// # Errors
///
/// Returns an error when the engine cannot be assembled or the listener
/// cannot bind.
pub async fn run(config: ServerConfig) -> std::io::Result<()> {
    let engine = build_engine(&config).map_err(std::io::Error::other)?;
    let Engine {
        lifecycle,
        ws_state,
        expiration,
        maintenance,
    } = engine;

    tokio::spawn(expiration.run());
    tokio::spawn(maintenance.run());

    let health_state = web::Data::new(HealthState::new());
    // Clone for the server factory so the readiness probe stays accessible.
    let server_health_state = health_state.clone();
    let lifecycle = web::Data::from(lifecycle);
    let ws_state = web::Data::new(ws_state);

    let server = HttpServer::new(move || {
        let app = App::new()
            .app_data(server_health_state.clone())
            .app_data(lifecycle.clone())
            .app_data(ws_state.clone())
            .service(rides::create_ride)
            .service(rides::accept_ride)
            .service(rides::start_ride)
            .service(rides::complete_ride)
            .service(rides::cancel_ride)
            .service(rides::active_ride)
            .service(ws::ws_entry)
            .service(health::ready)
            .service(health::live);

        #[cfg(debug_assertions)]
        let app = app.service(crate::doc::openapi_json);

        app
    })
    .bind(config.bind_addr)?;

    info!(addr = %config.bind_addr, "dispatch engine listening");
    health_state.mark_ready();
    server.run().await
}
