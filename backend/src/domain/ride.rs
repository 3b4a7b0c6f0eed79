//! The ride entity and its lifecycle vocabulary.
//!
//! A ride is created by a rider, raced over by drivers, gated by a
//! one-time code at pickup, and retained forever once terminal. All
//! consistency-critical mutations happen through conditional updates on
//! the [`crate::domain::ports::RideRepository`] port, never here.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::geo::Coordinates;

/// How long a freshly generated one-time code stays valid.
pub const OTP_TTL: Duration = Duration::minutes(10);

/// Failed one-time code attempts tolerated before the ride becomes
/// unstartable.
pub const OTP_MAX_ATTEMPTS: u32 = 3;

/// Opaque ride identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct RideId(Uuid);

impl RideId {
    /// Mint a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RideId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RideId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a rider or driver, issued by the out-of-scope account
/// system and treated as opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Wrap a raw identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Vehicle class requested by the rider and declared by drivers.
///
/// The wire format accepts the legacy Spanish aliases still sent by older
/// clients (`carro`, `moto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    /// Four-wheeled car.
    #[serde(alias = "carro")]
    Car,
    /// Motorbike.
    #[serde(alias = "moto")]
    Bike,
}

impl VehicleClass {
    /// Parse a class name, accepting legacy aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "car" | "carro" => Some(Self::Car),
            "bike" | "moto" => Some(Self::Bike),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Car => f.write_str("car"),
            Self::Bike => f.write_str("bike"),
        }
    }
}

/// Ride lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    /// Created, not yet accepted by any driver.
    Pending,
    /// Exactly one driver committed to the pickup.
    Accepted,
    /// One-time code verified; ride in progress.
    Ongoing,
    /// Driver completed the trip.
    Completed,
    /// Cancelled by a party or expired by the sweeper.
    Cancelled,
}

impl RideStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Which party cancelled a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CancelParty {
    /// The requesting rider.
    Rider,
    /// The assigned (or would-be) driver.
    Driver,
    /// The expiration sweeper.
    System,
}

/// One-time pickup code disclosed by the rider to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Otp {
    /// Six decimal digits.
    pub code: String,
    /// Instant after which even a correct code is rejected.
    pub expires_at: DateTime<Utc>,
    /// Failed verification attempts so far.
    pub attempts: u32,
}

impl Otp {
    /// Draw a fresh six-digit code from the OS CSPRNG.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let code: u32 = OsRng.gen_range(0..1_000_000);
        Self {
            code: format!("{code:06}"),
            expires_at: now + OTP_TTL,
            attempts: 0,
        }
    }

    /// Whether the code is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the attempt ceiling has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= OTP_MAX_ATTEMPTS
    }
}

/// Inputs captured once at creation time.
#[derive(Debug, Clone)]
pub struct RideDraft {
    /// Requesting rider.
    pub rider: ActorId,
    /// Pickup address as entered.
    pub pickup_address: String,
    /// Pickup point resolved once at creation.
    pub pickup: Coordinates,
    /// Destination address as entered.
    pub destination_address: String,
    /// Destination point resolved once at creation.
    pub destination: Coordinates,
    /// Requested vehicle class.
    pub vehicle_class: VehicleClass,
    /// Quoted fare for the requested class.
    pub fare: f64,
    /// Rider's chosen payment method.
    pub payment_method: String,
}

/// The central dispatch entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    /// Opaque identifier.
    pub id: RideId,
    /// Requesting rider; always set.
    pub rider: ActorId,
    /// Winning driver; unset while pending, set exactly once at acceptance.
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
    /// Quoted fare for the requested class.
    pub fare: f64,
    /// Rider's chosen payment method.
    pub payment_method: String,
    /// One-time pickup code.
    pub otp: Otp,
    /// Drivers already offered this ride. Grow-only.
    pub offered_to: HashSet<ActorId>,
    /// Lifecycle state.
    pub status: RideStatus,
    /// Party that cancelled the ride, when cancelled.
    pub cancelled_by: Option<CancelParty>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    /// Materialise a new pending ride from validated creation inputs.
    #[must_use]
    pub fn create(draft: RideDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: RideId::new(),
            rider: draft.rider,
            driver: None,
            pickup_address: draft.pickup_address,
            pickup: draft.pickup,
            destination_address: draft.destination_address,
            destination: draft.destination,
            vehicle_class: draft.vehicle_class,
            fare: draft.fare,
            payment_method: draft.payment_method,
            otp: Otp::generate(now),
            offered_to: HashSet::new(),
            status: RideStatus::Pending,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Age of the ride at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.

    use rstest::rstest;

    use super::*;

    fn draft() -> RideDraft {
        RideDraft {
            rider: ActorId::from("rider-1"),
            pickup_address: "A".to_owned(),
            pickup: Coordinates::new(7.80, -72.45).expect("valid pickup"),
            destination_address: "B".to_owned(),
            destination: Coordinates::new(7.85, -72.40).expect("valid destination"),
            vehicle_class: VehicleClass::Car,
            fare: 12.5,
            payment_method: "cash".to_owned(),
        }
    }

    #[test]
    fn created_ride_is_pending_with_six_digit_otp() {
        let now = Utc::now();
        let ride = Ride::create(draft(), now);

        assert_eq!(ride.status, RideStatus::Pending);
        assert!(ride.driver.is_none());
        assert!(ride.offered_to.is_empty());
        assert_eq!(ride.otp.code.len(), 6);
        assert!(ride.otp.code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(ride.otp.expires_at, now + OTP_TTL);
        assert_eq!(ride.otp.attempts, 0);
    }

    #[rstest]
    #[case("car", Some(VehicleClass::Car))]
    #[case("carro", Some(VehicleClass::Car))]
    #[case("CARRO", Some(VehicleClass::Car))]
    #[case("bike", Some(VehicleClass::Bike))]
    #[case("moto", Some(VehicleClass::Bike))]
    #[case("boat", None)]
    fn vehicle_class_parsing_accepts_legacy_aliases(
        #[case] raw: &str,
        #[case] expected: Option<VehicleClass>,
    ) {
        assert_eq!(VehicleClass::parse(raw), expected);
    }

    #[test]
    fn vehicle_class_deserializes_legacy_aliases() {
        let class: VehicleClass = serde_json::from_str("\"moto\"").expect("legacy alias");
        assert_eq!(class, VehicleClass::Bike);
    }

    #[rstest]
    #[case(RideStatus::Pending, false)]
    #[case(RideStatus::Accepted, false)]
    #[case(RideStatus::Ongoing, false)]
    #[case(RideStatus::Completed, true)]
    #[case(RideStatus::Cancelled, true)]
    fn terminal_states(#[case] status: RideStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn otp_expiry_and_exhaustion() {
        let now = Utc::now();
        let mut otp = Otp::generate(now);
        assert!(!otp.is_expired(now + OTP_TTL));
        assert!(otp.is_expired(now + OTP_TTL + Duration::seconds(1)));

        otp.attempts = OTP_MAX_ATTEMPTS - 1;
        assert!(!otp.is_exhausted());
        otp.attempts = OTP_MAX_ATTEMPTS;
        assert!(otp.is_exhausted());
    }
}
