//! Ride REST handlers.
//!
//! Thin adapters over [`RideLifecycleService`]: decode the request, call
//! the service, encode the outcome. The one-time code appears only in
//! rider-facing responses; driver-facing views withhold it.

use actix_web::{HttpResponse, get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::{
    ActorId, CancelParty, CancelRideCommand, Coordinates, CreateRideCommand, DomainError, Ride,
    RideId, RideLifecycleService, RideStatus, VehicleClass,
};

/// Request body for creating a ride.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    /// Requesting rider.
    pub rider_id: String,
    /// Pickup address as entered.
    pub pickup_address: String,
    /// Destination address as entered.
    pub destination_address: String,
    /// Requested vehicle class.
    pub vehicle_class: VehicleClass,
    /// Rider's chosen payment method.
    pub payment_method: String,
}

/// Request body for driver-initiated transitions.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverActionRequest {
    /// Acting driver.
    pub driver_id: String,
}

/// Request body for starting a ride at pickup.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartRideRequest {
    /// Acting driver.
    pub driver_id: String,
    /// One-time code disclosed by the rider.
    pub otp: String,
}

/// Request body for cancelling a ride.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelRideRequest {
    /// Which party is cancelling.
    pub party: CancelParty,
    /// The acting rider or driver.
    pub actor_id: String,
}

/// A ride as returned over HTTP.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RideResponse {
    /// Ride identifier.
    pub id: RideId,
    /// Requesting rider.
    pub rider: ActorId,
    /// Assigned driver, once accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<ActorId>,
    /// Pickup address as entered.
    pub pickup_address: String,
    /// Pickup point.
    pub pickup: Coordinates,
    /// Destination address as entered.
    pub destination_address: String,
    /// Destination point.
    pub destination: Coordinates,
    /// Requested vehicle class.
    pub vehicle_class: VehicleClass,
    /// Quoted fare.
    pub fare: f64,
    /// Rider's chosen payment method.
    pub payment_method: String,
    /// Lifecycle state.
    pub status: RideStatus,
    /// Cancelling party, when cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelParty>,
    /// One-time pickup code. Present only in rider-facing responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    /// One-time code expiry. Present only in rider-facing responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_expires_at: Option<DateTime<Utc>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl RideResponse {
    /// Rider-facing view, one-time code included.
    #[must_use]
    pub fn for_rider(ride: Ride) -> Self {
        let mut view = Self::for_driver(ride.clone());
        view.otp = Some(ride.otp.code);
        view.otp_expires_at = Some(ride.otp.expires_at);
        view
    }

    /// Driver-facing view, one-time code withheld.
    #[must_use]
    pub fn for_driver(ride: Ride) -> Self {
        Self {
            id: ride.id,
            rider: ride.rider,
            driver: ride.driver,
            pickup_address: ride.pickup_address,
            pickup: ride.pickup,
            destination_address: ride.destination_address,
            destination: ride.destination,
            vehicle_class: ride.vehicle_class,
            fare: ride.fare,
            payment_method: ride.payment_method,
            status: ride.status,
            cancelled_by: ride.cancelled_by,
            otp: None,
            otp_expires_at: None,
            created_at: ride.created_at,
            updated_at: ride.updated_at,
        }
    }
}

/// Create a pending ride and broadcast it to nearby drivers.
#[utoipa::path(
    post,
    path = "/rides",
    request_body = CreateRideRequest,
    responses(
        (status = 201, description = "Ride created", body = RideResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 502, description = "Route provider unavailable", body = ApiError)
    ),
    tags = ["rides"],
    operation_id = "createRide"
)]
#[post("/rides")]
pub async fn create_ride(
    service: web::Data<RideLifecycleService>,
    body: web::Json<CreateRideRequest>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let ride = service
        .create_ride(CreateRideCommand {
            rider: ActorId::new(body.rider_id),
            pickup_address: body.pickup_address,
            destination_address: body.destination_address,
            vehicle_class: body.vehicle_class,
            payment_method: body.payment_method,
        })
        .await?;
    Ok(HttpResponse::Created().json(RideResponse::for_rider(ride)))
}

/// Race to accept a pending ride. The first driver wins; the rest get 409.
#[utoipa::path(
    post,
    path = "/rides/{id}/accept",
    params(("id" = Uuid, Path, description = "Ride identifier")),
    request_body = DriverActionRequest,
    responses(
        (status = 200, description = "Ride accepted", body = RideResponse),
        (status = 404, description = "Unknown ride", body = ApiError),
        (status = 409, description = "Ride no longer available", body = ApiError)
    ),
    tags = ["rides"],
    operation_id = "acceptRide"
)]
#[post("/rides/{id}/accept")]
pub async fn accept_ride(
    service: web::Data<RideLifecycleService>,
    path: web::Path<Uuid>,
    body: web::Json<DriverActionRequest>,
) -> ApiResult<web::Json<RideResponse>> {
    let driver = ActorId::new(body.into_inner().driver_id);
    let ride = service
        .accept_ride(RideId::from(path.into_inner()), &driver)
        .await?;
    Ok(web::Json(RideResponse::for_driver(ride)))
}

/// Start an accepted ride once the driver supplies the rider's one-time code.
#[utoipa::path(
    post,
    path = "/rides/{id}/start",
    params(("id" = Uuid, Path, description = "Ride identifier")),
    request_body = StartRideRequest,
    responses(
        (status = 200, description = "Ride started", body = RideResponse),
        (status = 403, description = "One-time code rejected", body = ApiError),
        (status = 404, description = "Unknown ride", body = ApiError),
        (status = 409, description = "Ride not accepted by this driver", body = ApiError)
    ),
    tags = ["rides"],
    operation_id = "startRide"
)]
#[post("/rides/{id}/start")]
pub async fn start_ride(
    service: web::Data<RideLifecycleService>,
    path: web::Path<Uuid>,
    body: web::Json<StartRideRequest>,
) -> ApiResult<web::Json<RideResponse>> {
    let body = body.into_inner();
    let driver = ActorId::new(body.driver_id);
    let ride = service
        .start_ride(RideId::from(path.into_inner()), &driver, &body.otp)
        .await?;
    Ok(web::Json(RideResponse::for_driver(ride)))
}

/// Complete an ongoing ride.
#[utoipa::path(
    post,
    path = "/rides/{id}/complete",
    params(("id" = Uuid, Path, description = "Ride identifier")),
    request_body = DriverActionRequest,
    responses(
        (status = 200, description = "Ride completed", body = RideResponse),
        (status = 404, description = "Unknown ride", body = ApiError),
        (status = 409, description = "Ride not ongoing for this driver", body = ApiError)
    ),
    tags = ["rides"],
    operation_id = "completeRide"
)]
#[post("/rides/{id}/complete")]
pub async fn complete_ride(
    service: web::Data<RideLifecycleService>,
    path: web::Path<Uuid>,
    body: web::Json<DriverActionRequest>,
) -> ApiResult<web::Json<RideResponse>> {
    let driver = ActorId::new(body.into_inner().driver_id);
    let ride = service
        .complete_ride(RideId::from(path.into_inner()), &driver)
        .await?;
    Ok(web::Json(RideResponse::for_driver(ride)))
}

/// Cancel a non-terminal ride on behalf of one of its parties.
#[utoipa::path(
    post,
    path = "/rides/{id}/cancel",
    params(("id" = Uuid, Path, description = "Ride identifier")),
    request_body = CancelRideRequest,
    responses(
        (status = 200, description = "Ride cancelled", body = RideResponse),
        (status = 400, description = "Actor is not a party to this ride", body = ApiError),
        (status = 404, description = "Unknown ride", body = ApiError)
    ),
    tags = ["rides"],
    operation_id = "cancelRide"
)]
#[post("/rides/{id}/cancel")]
pub async fn cancel_ride(
    service: web::Data<RideLifecycleService>,
    path: web::Path<Uuid>,
    body: web::Json<CancelRideRequest>,
) -> ApiResult<web::Json<RideResponse>> {
    let body = body.into_inner();
    let ride = service
        .cancel_ride(
            RideId::from(path.into_inner()),
            CancelRideCommand {
                party: body.party,
                actor: ActorId::new(body.actor_id),
            },
        )
        .await?;
    Ok(web::Json(RideResponse::for_driver(ride)))
}

/// The rider's current non-terminal ride, used by clients to resume after
/// a reconnect.
#[utoipa::path(
    get,
    path = "/riders/{riderId}/rides/active",
    params(("riderId" = String, Path, description = "Rider identifier")),
    responses(
        (status = 200, description = "Active ride", body = RideResponse),
        (status = 404, description = "No active ride", body = ApiError)
    ),
    tags = ["rides"],
    operation_id = "activeRideForRider"
)]
#[get("/riders/{rider_id}/rides/active")]
pub async fn active_ride(
    service: web::Data<RideLifecycleService>,
    path: web::Path<String>,
) -> ApiResult<web::Json<RideResponse>> {
    let rider = ActorId::new(path.into_inner());
    let ride = service
        .active_ride_for(&rider)
        .await?
        .ok_or_else(|| DomainError::not_found("rider has no active ride"))?;
    Ok(web::Json(RideResponse::for_rider(ride)))
}
