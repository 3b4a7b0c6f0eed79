//! Wire-level message definitions for the WebSocket adapter.
//!
//! Inbound frames carry an `event` discriminator and a `data` payload.
//! Outbound frames reuse [`crate::domain::OutboundEvent`] directly; its
//! serde tagging already matches the public contract.

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{ActorKind, VehicleClass};

/// Raw client-supplied position. Validated by the domain, not here.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// First frame a client must send: identify and register presence.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Rider or driver identifier.
    pub actor_id: String,
    /// Whether this session belongs to a rider or a driver.
    pub kind: ActorKind,
    /// Declared vehicle class; drivers only.
    pub vehicle_class: Option<VehicleClass>,
    /// Initial position; drivers only.
    pub location: Option<RawPoint>,
    /// Initial availability; drivers only, defaults to available.
    pub online: Option<bool>,
}

/// Driver availability toggle.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOnlineRequest {
    /// Desired availability.
    pub online: bool,
}

/// Periodic driver position report.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdateRequest {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Heading, degrees clockwise from north.
    pub heading: Option<f64>,
    /// Speed in km/h.
    pub speed: Option<f64>,
    /// Accuracy radius in metres.
    pub accuracy: Option<f64>,
    /// Ride the driver is servicing.
    pub ride_id: Option<Uuid>,
}

/// Re-attach a reconnected session to an active ride's feed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinRideRequest {
    /// Ride to re-join.
    pub ride_id: Uuid,
}

/// Every frame a client may send after the upgrade.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Identify the session and register presence.
    #[serde(rename = "join")]
    Join(JoinRequest),
    /// Toggle driver availability.
    #[serde(rename = "driver:toggleOnline")]
    ToggleOnline(ToggleOnlineRequest),
    /// Report a driver position sample.
    #[serde(rename = "driver:locationUpdate")]
    LocationUpdate(LocationUpdateRequest),
    /// Re-attach to an active ride after a reconnect.
    #[serde(rename = "rejoin-ride")]
    RejoinRide(RejoinRideRequest),
}
