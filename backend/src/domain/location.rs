//! Location stream processor.
//!
//! Ingests driver position samples, persists them for dispatch accuracy,
//! and relays a rate-limited feed to the interested rider. Throttling
//! suppresses redundant noise without starving genuinely fast movement:
//! a sample is relayed once a second has passed since the last relay or
//! once the driver has moved more than five metres, whichever comes
//! first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::domain::error::DomainError;
use crate::domain::geo::{Coordinates, haversine_meters, initial_bearing_degrees};
use crate::domain::ports::RideRepository;
use crate::domain::presence::{OutboundEvent, PresenceRegistry};
use crate::domain::ride::{ActorId, Ride, RideId, RideStatus};

/// Minimum interval between relays to the rider, per driver.
pub const RELAY_MIN_INTERVAL: Duration = Duration::seconds(1);

/// Displacement that forces a relay regardless of the interval, metres.
pub const RELAY_MIN_DISPLACEMENT_METERS: f64 = 5.0;

/// Displacement below which a computed heading would be noise, metres.
const HEADING_MIN_DISPLACEMENT_METERS: f64 = 1.0;

/// Assumed speed when the client reports none, km/h.
pub const DEFAULT_SPEED_KMH: f64 = 30.0;

/// Raw position sample from a driver client. Coordinates arrive
/// unvalidated.
#[derive(Debug, Clone)]
pub struct LocationSample {
    /// Latitude in degrees, unvalidated.
    pub lat: f64,
    /// Longitude in degrees, unvalidated.
    pub lng: f64,
    /// Client-reported heading, degrees clockwise from north.
    pub heading: Option<f64>,
    /// Client-reported speed, km/h.
    pub speed_kmh: Option<f64>,
    /// Client-reported accuracy radius, metres.
    pub accuracy_meters: Option<f64>,
    /// Ride the driver is servicing, when tracking is expected.
    pub ride_id: Option<RideId>,
}

/// Normalized position event relayed to the rider and ride watchers.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationUpdate {
    /// Tracked ride.
    pub ride_id: RideId,
    /// Reporting driver.
    pub driver_id: ActorId,
    /// Validated position.
    pub coords: Coordinates,
    /// Heading, degrees clockwise from north.
    pub heading: f64,
    /// Speed in km/h, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    /// Accuracy radius in metres, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    /// Great-circle distance to the current target, metres.
    pub distance_to_target_meters: f64,
    /// Estimated minutes to the current target.
    pub eta_minutes: i64,
}

#[derive(Debug, Clone, Copy)]
struct RelayState {
    last_sample: Coordinates,
    heading: f64,
    last_relay: Option<(Coordinates, DateTime<Utc>)>,
}

/// Per-process tracker relaying driver positions to riders.
pub struct LocationStreamProcessor {
    rides: Arc<dyn RideRepository>,
    presence: Arc<PresenceRegistry>,
    clock: Arc<dyn Clock>,
    relay: Mutex<HashMap<ActorId, RelayState>>,
}

impl LocationStreamProcessor {
    /// Assemble the processor over its ports.
    #[must_use]
    pub fn new(
        rides: Arc<dyn RideRepository>,
        presence: Arc<PresenceRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rides,
            presence,
            clock,
            relay: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one driver sample. The validated position is always
    /// persisted against the driver's presence before any throttling
    /// decision; the returned update is `Some` only when the sample was
    /// relayed to the rider.
    pub async fn ingest(
        &self,
        driver_id: &ActorId,
        sample: LocationSample,
    ) -> Result<Option<DriverLocationUpdate>, DomainError> {
        let coords = Coordinates::new(sample.lat, sample.lng)
            .map_err(|error| DomainError::invalid_location(error.to_string()))?;
        let now = self.clock.utc();

        self.presence
            .update_driver_position(driver_id, coords, sample.ride_id, now);

        let (heading, last_relay) = self.advance_state(driver_id, coords, sample.heading);

        let Some(ride_id) = sample.ride_id else {
            return Ok(None);
        };
        let Some(ride) = self.lookup_ride(ride_id).await else {
            return Ok(None);
        };
        let Some(target) = tracking_target(&ride) else {
            return Ok(None);
        };

        if !should_relay(last_relay, coords, now) {
            return Ok(None);
        }

        let distance_to_target_meters = haversine_meters(coords, target);
        let speed_kmh = sample.speed_kmh.filter(|speed| *speed > 0.0);
        let eta_minutes = eta_minutes(
            distance_to_target_meters,
            speed_kmh.unwrap_or(DEFAULT_SPEED_KMH),
        );

        let update = DriverLocationUpdate {
            ride_id,
            driver_id: driver_id.clone(),
            coords,
            heading,
            speed_kmh,
            accuracy_meters: sample.accuracy_meters,
            distance_to_target_meters,
            eta_minutes,
        };

        self.mark_relayed(driver_id, coords, now);
        let event = OutboundEvent::DriverLocation(update.clone());
        self.presence.send_to_actor(&ride.rider, event.clone());
        self.presence.send_to_ride(ride_id, &event);
        Ok(Some(update))
    }

    /// Forget a driver's relay state, e.g. on disconnect.
    pub fn forget(&self, driver_id: &ActorId) {
        self.relay
            .lock()
            .expect("relay lock poisoned")
            .remove(driver_id);
    }

    /// Fold the sample into the per-driver state and return the heading
    /// to publish plus the last relay checkpoint.
    fn advance_state(
        &self,
        driver_id: &ActorId,
        coords: Coordinates,
        reported_heading: Option<f64>,
    ) -> (f64, Option<(Coordinates, DateTime<Utc>)>) {
        let mut relay = self.relay.lock().expect("relay lock poisoned");
        let state = relay.entry(driver_id.clone()).or_insert(RelayState {
            last_sample: coords,
            heading: reported_heading.unwrap_or(0.0),
            last_relay: None,
        });

        let heading = reported_heading.unwrap_or_else(|| {
            let displacement = haversine_meters(state.last_sample, coords);
            if displacement > HEADING_MIN_DISPLACEMENT_METERS {
                initial_bearing_degrees(state.last_sample, coords)
            } else {
                state.heading
            }
        });
        state.heading = heading;
        state.last_sample = coords;
        (heading, state.last_relay)
    }

    fn mark_relayed(&self, driver_id: &ActorId, coords: Coordinates, now: DateTime<Utc>) {
        if let Some(state) = self
            .relay
            .lock()
            .expect("relay lock poisoned")
            .get_mut(driver_id)
        {
            state.last_relay = Some((coords, now));
        }
    }

    async fn lookup_ride(&self, ride_id: RideId) -> Option<Ride> {
        match self.rides.find(ride_id).await {
            Ok(ride) => ride,
            Err(error) => {
                // Best-effort path: a store hiccup drops one relay, never
                // the sample ingestion that already happened.
                warn!(ride_id = %ride_id, error = %error, "ride lookup failed during relay");
                None
            }
        }
    }
}

/// Where the driver is heading: the pickup until the ride starts, the
/// destination while it is ongoing, nowhere otherwise.
fn tracking_target(ride: &Ride) -> Option<Coordinates> {
    match ride.status {
        RideStatus::Accepted => Some(ride.pickup),
        RideStatus::Ongoing => Some(ride.destination),
        RideStatus::Pending | RideStatus::Completed | RideStatus::Cancelled => None,
    }
}

fn should_relay(
    last_relay: Option<(Coordinates, DateTime<Utc>)>,
    coords: Coordinates,
    now: DateTime<Utc>,
) -> bool {
    match last_relay {
        None => true,
        Some((last_coords, last_at)) => {
            now - last_at >= RELAY_MIN_INTERVAL
                || haversine_meters(last_coords, coords) > RELAY_MIN_DISPLACEMENT_METERS
        }
    }
}

/// Minutes to cover `distance_meters` at `speed_kmh`, rounded up.
fn eta_minutes(distance_meters: f64, speed_kmh: f64) -> i64 {
    let hours = distance_meters / 1_000.0 / speed_kmh;
    (hours * 60.0).ceil() as i64
}
