//! Shared WebSocket adapter state.
//!
//! WebSocket entry points depend on the domain services and ports they
//! drive instead of constructing them. This makes the adapter testable
//! with deterministic test doubles and keeps side effects out of the
//! session loop.

use std::sync::Arc;

use mockable::Clock;

use crate::domain::ports::RideRepository;
use crate::domain::{DispatchMatcher, LocationStreamProcessor, PresenceRegistry};

/// Dependency bundle for WebSocket handlers and sessions.
#[derive(Clone)]
pub struct WsState {
    /// Channel registry shared with the domain services.
    pub presence: Arc<PresenceRegistry>,
    /// Matcher driving late-joiner reconciliation.
    pub matcher: Arc<DispatchMatcher>,
    /// Location ingest pipeline.
    pub locations: Arc<LocationStreamProcessor>,
    /// Ride store, consulted by the rejoin path.
    pub rides: Arc<dyn RideRepository>,
    /// Injected clock.
    pub clock: Arc<dyn Clock>,
}

impl WsState {
    /// Construct state from explicit dependencies.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        matcher: Arc<DispatchMatcher>,
        locations: Arc<LocationStreamProcessor>,
        rides: Arc<dyn RideRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            presence,
            matcher,
            locations,
            rides,
            clock,
        }
    }
}
