//! Core dispatch domain: entities, services, and outbound ports.

pub mod dispatch;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod location;
pub mod ports;
pub mod presence;
pub mod ride;
pub mod sweeper;

pub use dispatch::{DispatchConfig, DispatchMatcher, OfferDedupCache, RideOffer};
pub use error::{DomainError, ErrorCode};
pub use geo::{Coordinates, CoordinatesError, haversine_meters, initial_bearing_degrees};
pub use lifecycle::{
    CancelRideCommand, CreateRideCommand, RideCancelledNotice, RideExpiredNotice,
    RideLifecycleService, RidePartyNotice,
};
pub use location::{DriverLocationUpdate, LocationSample, LocationStreamProcessor};
pub use presence::{
    ActorKind, DriverDetails, DriverSnapshot, OnlineDriver, OutboundEvent, PresenceRegistry,
};
pub use ride::{
    ActorId, CancelParty, OTP_MAX_ATTEMPTS, OTP_TTL, Otp, Ride, RideDraft, RideId, RideStatus,
    VehicleClass,
};
pub use sweeper::{EXPIRATION_WINDOW, ExpirationSweeper, MaintenanceSweeper};
