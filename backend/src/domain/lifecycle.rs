//! Ride lifecycle manager.
//!
//! Owns the ride state machine. Every transition precondition is enforced
//! by a conditional update at the store boundary, so concurrent callers
//! race on the document, not on in-process state. Channel notifications
//! here are best-effort: a failed push is logged and swallowed and never
//! fails the lifecycle operation that triggered it.

use std::sync::Arc;

use mockable::Clock;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::domain::dispatch::DispatchMatcher;
use crate::domain::error::DomainError;
use crate::domain::ports::{RideRepository, RideRepositoryError, RouteService, RouteServiceError};
use crate::domain::presence::{OutboundEvent, PresenceRegistry};
use crate::domain::ride::{
    ActorId, CancelParty, OTP_MAX_ATTEMPTS, Ride, RideDraft, RideId, RideStatus, VehicleClass,
};

/// Validated inputs for creating a ride.
#[derive(Debug, Clone)]
pub struct CreateRideCommand {
    /// Requesting rider.
    pub rider: ActorId,
    /// Pickup address as entered.
    pub pickup_address: String,
    /// Destination address as entered.
    pub destination_address: String,
    /// Requested vehicle class.
    pub vehicle_class: VehicleClass,
    /// Rider's chosen payment method.
    pub payment_method: String,
}

/// Cancellation request naming the acting party.
#[derive(Debug, Clone)]
pub struct CancelRideCommand {
    /// Who is cancelling.
    pub party: CancelParty,
    /// The acting rider or driver.
    pub actor: ActorId,
}

/// Status notification pushed to a ride's parties.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RidePartyNotice {
    /// Affected ride.
    pub ride_id: RideId,
    /// Status after the transition.
    pub status: RideStatus,
    /// Assigned driver, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<ActorId>,
}

/// Notification that a ride was cancelled and by whom.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RideCancelledNotice {
    /// Affected ride.
    pub ride_id: RideId,
    /// The cancelling party.
    pub cancelled_by: CancelParty,
}

/// Notification that a pending ride expired unanswered.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RideExpiredNotice {
    /// Affected ride.
    pub ride_id: RideId,
}

fn map_repository_error(error: RideRepositoryError) -> DomainError {
    match error {
        RideRepositoryError::Unavailable { message } => {
            DomainError::internal(format!("ride store unavailable: {message}"))
        }
        RideRepositoryError::Query { message } => {
            DomainError::internal(format!("ride store error: {message}"))
        }
    }
}

fn map_route_error(error: RouteServiceError) -> DomainError {
    match error {
        RouteServiceError::Unreachable { message } => {
            DomainError::upstream_unavailable(format!("route provider unreachable: {message}"))
        }
        RouteServiceError::AddressNotFound { address } => {
            DomainError::invalid_request(format!("address could not be resolved: {address}"))
        }
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid_request(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

/// Service owning ride creation and every lifecycle transition.
pub struct RideLifecycleService {
    rides: Arc<dyn RideRepository>,
    routes: Arc<dyn RouteService>,
    presence: Arc<PresenceRegistry>,
    matcher: Arc<DispatchMatcher>,
    clock: Arc<dyn Clock>,
}

impl RideLifecycleService {
    /// Assemble the service over its ports.
    #[must_use]
    pub fn new(
        rides: Arc<dyn RideRepository>,
        routes: Arc<dyn RouteService>,
        presence: Arc<PresenceRegistry>,
        matcher: Arc<DispatchMatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rides,
            routes,
            presence,
            matcher,
            clock,
        }
    }

    /// Create a pending ride: resolve the route once, quote the fare,
    /// generate the one-time code, persist, then broadcast to nearby
    /// drivers in a detached task so the creator's response is not
    /// delayed by fan-out.
    pub async fn create_ride(&self, command: CreateRideCommand) -> Result<Ride, DomainError> {
        require_non_empty(command.rider.as_str(), "rider")?;
        require_non_empty(&command.pickup_address, "pickup address")?;
        require_non_empty(&command.destination_address, "destination address")?;
        require_non_empty(&command.payment_method, "payment method")?;

        let quote = self
            .routes
            .quote(&command.pickup_address, &command.destination_address)
            .await
            .map_err(map_route_error)?;
        let fare = quote.fare_for(command.vehicle_class).ok_or_else(|| {
            DomainError::upstream_unavailable(format!(
                "provider quoted no fare for class {}",
                command.vehicle_class
            ))
        })?;
        let pickup = self
            .routes
            .geocode(&command.pickup_address)
            .await
            .map_err(map_route_error)?;
        let destination = self
            .routes
            .geocode(&command.destination_address)
            .await
            .map_err(map_route_error)?;

        let ride = Ride::create(
            RideDraft {
                rider: command.rider,
                pickup_address: command.pickup_address,
                pickup,
                destination_address: command.destination_address,
                destination,
                vehicle_class: command.vehicle_class,
                fare,
                payment_method: command.payment_method,
            },
            self.clock.utc(),
        );
        self.rides
            .create(&ride)
            .await
            .map_err(map_repository_error)?;
        info!(ride_id = %ride.id, rider = %ride.rider, class = %ride.vehicle_class, "ride created");

        let matcher = Arc::clone(&self.matcher);
        let broadcast_ride = ride.clone();
        tokio::spawn(async move {
            matcher.broadcast_new_ride(&broadcast_ride).await;
        });

        Ok(ride)
    }

    /// Race to accept a pending ride. Exactly one concurrent caller wins;
    /// the rest observe [`DomainError::already_taken`].
    pub async fn accept_ride(
        &self,
        ride_id: RideId,
        driver: &ActorId,
    ) -> Result<Ride, DomainError> {
        let now = self.clock.utc();
        match self
            .rides
            .accept(ride_id, driver, now)
            .await
            .map_err(map_repository_error)?
        {
            Some(ride) => {
                info!(ride_id = %ride.id, driver = %driver, "ride accepted");
                self.notify(
                    &ride.rider,
                    OutboundEvent::RideAccepted(RidePartyNotice {
                        ride_id: ride.id,
                        status: ride.status,
                        driver: ride.driver.clone(),
                    }),
                );
                Ok(ride)
            }
            None => match self.rides.find(ride_id).await.map_err(map_repository_error)? {
                Some(_) => Err(DomainError::already_taken("ride is no longer available")),
                None => Err(DomainError::not_found("unknown ride")),
            },
        }
    }

    /// Start an accepted ride once the driver supplies the rider's
    /// one-time code. Expiry is checked before the code itself; the code
    /// value is never logged.
    pub async fn start_ride(
        &self,
        ride_id: RideId,
        driver: &ActorId,
        supplied_otp: &str,
    ) -> Result<Ride, DomainError> {
        let ride = self
            .rides
            .find(ride_id)
            .await
            .map_err(map_repository_error)?
            .ok_or_else(|| DomainError::not_found("unknown ride"))?;

        if ride.status != RideStatus::Accepted || ride.driver.as_ref() != Some(driver) {
            return Err(DomainError::not_accepted(
                "ride is not accepted by this driver",
            ));
        }
        if ride.otp.is_exhausted() {
            return Err(DomainError::otp_exhausted(
                "verification attempts exhausted; request the ride again",
            ));
        }
        if ride.otp.is_expired(self.clock.utc()) {
            return Err(DomainError::otp_expired("one-time code expired"));
        }
        if supplied_otp != ride.otp.code {
            let attempts = self
                .rides
                .record_otp_attempt(ride_id)
                .await
                .map_err(map_repository_error)?;
            if attempts >= OTP_MAX_ATTEMPTS {
                return Err(DomainError::otp_exhausted(
                    "verification attempts exhausted; request the ride again",
                ));
            }
            let remaining = OTP_MAX_ATTEMPTS - attempts;
            return Err(DomainError::invalid_otp("one-time code mismatch")
                .with_details(serde_json::json!({ "attemptsRemaining": remaining })));
        }

        match self
            .rides
            .begin(ride_id, driver, self.clock.utc())
            .await
            .map_err(map_repository_error)?
        {
            Some(ride) => {
                info!(ride_id = %ride.id, driver = %driver, "ride started");
                self.notify(
                    &ride.rider,
                    OutboundEvent::RideStarted(RidePartyNotice {
                        ride_id: ride.id,
                        status: ride.status,
                        driver: ride.driver.clone(),
                    }),
                );
                Ok(ride)
            }
            None => Err(DomainError::not_accepted(
                "ride is not accepted by this driver",
            )),
        }
    }

    /// Complete an ongoing ride.
    pub async fn complete_ride(
        &self,
        ride_id: RideId,
        driver: &ActorId,
    ) -> Result<Ride, DomainError> {
        match self
            .rides
            .complete(ride_id, driver, self.clock.utc())
            .await
            .map_err(map_repository_error)?
        {
            Some(ride) => {
                info!(ride_id = %ride.id, driver = %driver, "ride completed");
                self.presence.clear_active_ride(driver, ride.id);
                self.notify(
                    &ride.rider,
                    OutboundEvent::RideCompleted(RidePartyNotice {
                        ride_id: ride.id,
                        status: ride.status,
                        driver: ride.driver.clone(),
                    }),
                );
                Ok(ride)
            }
            None => match self.rides.find(ride_id).await.map_err(map_repository_error)? {
                Some(_) => Err(DomainError::not_ongoing(
                    "ride is not ongoing for this driver",
                )),
                None => Err(DomainError::not_found("unknown ride")),
            },
        }
    }

    /// Cancel a non-terminal ride. Either party may cancel; the acting
    /// party is verified against the ride and recorded on it.
    pub async fn cancel_ride(
        &self,
        ride_id: RideId,
        command: CancelRideCommand,
    ) -> Result<Ride, DomainError> {
        let ride = self
            .rides
            .find(ride_id)
            .await
            .map_err(map_repository_error)?
            .ok_or_else(|| DomainError::not_found("unknown ride"))?;

        let authorized = match command.party {
            CancelParty::Rider => ride.rider == command.actor,
            CancelParty::Driver => ride.driver.as_ref() == Some(&command.actor),
            CancelParty::System => false,
        };
        if !authorized {
            return Err(DomainError::invalid_request(
                "actor is not a party to this ride",
            ));
        }

        match self
            .rides
            .cancel(ride_id, command.party, self.clock.utc())
            .await
            .map_err(map_repository_error)?
        {
            Some(cancelled) => {
                info!(ride_id = %cancelled.id, cancelled_by = ?command.party, "ride cancelled");
                if let Some(driver) = &cancelled.driver {
                    self.presence.clear_active_ride(driver, cancelled.id);
                }
                let notice = RideCancelledNotice {
                    ride_id: cancelled.id,
                    cancelled_by: command.party,
                };
                match command.party {
                    CancelParty::Rider => {
                        if let Some(driver) = &cancelled.driver {
                            self.notify(driver, OutboundEvent::RideCancelled(notice));
                        }
                    }
                    CancelParty::Driver | CancelParty::System => {
                        self.notify(&cancelled.rider, OutboundEvent::RideCancelled(notice));
                    }
                }
                Ok(cancelled)
            }
            None => Err(DomainError::invalid_request("ride is already finished")),
        }
    }

    /// The rider's current non-terminal ride, if any.
    pub async fn active_ride_for(&self, rider: &ActorId) -> Result<Option<Ride>, DomainError> {
        self.rides
            .find_active_for_rider(rider)
            .await
            .map_err(map_repository_error)
    }

    fn notify(&self, actor: &ActorId, event: OutboundEvent) {
        if !self.presence.send_to_actor(actor, event) {
            debug!(actor = %actor, "lifecycle notification dropped");
        }
    }
}

// Sweeper notifications share the lifecycle's vocabulary; keep the
// warn-and-swallow policy in one place.
pub(crate) fn notify_expired(presence: &PresenceRegistry, ride: &Ride) {
    let delivered = presence.send_to_actor(
        &ride.rider,
        OutboundEvent::RideExpired(RideExpiredNotice { ride_id: ride.id }),
    );
    if !delivered {
        warn!(ride_id = %ride.id, rider = %ride.rider, "expiry notification dropped");
    }
}
