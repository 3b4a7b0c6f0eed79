//! Port for ride persistence over a document store.
//!
//! Every consistency-critical mutation is a single conditional update:
//! the adapter must apply precondition and write atomically (a
//! compare-and-swap or equivalent), never as a read-then-write pair. A
//! `None` return from a transition method means the precondition did not
//! hold at the store; callers translate that into the appropriate domain
//! error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::ride::{ActorId, CancelParty, Ride, RideId, VehicleClass};

/// Errors raised by ride repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RideRepositoryError {
    /// The store could not be reached.
    #[error("ride store unavailable: {message}")]
    Unavailable {
        /// Adapter-provided failure detail.
        message: String,
    },
    /// A query or mutation failed during execution.
    #[error("ride store query failed: {message}")]
    Query {
        /// Adapter-provided failure detail.
        message: String,
    },
}

impl RideRepositoryError {
    /// Store-unreachable failure.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Query execution failure.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// Port for ride reads and atomic conditional writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RideRepository: Send + Sync {
    /// Persist a freshly created ride.
    async fn create(&self, ride: &Ride) -> Result<(), RideRepositoryError>;

    /// Find a ride by id.
    async fn find(&self, id: RideId) -> Result<Option<Ride>, RideRepositoryError>;

    /// Find the rider's most recent non-terminal ride, if any.
    async fn find_active_for_rider(
        &self,
        rider: &ActorId,
    ) -> Result<Option<Ride>, RideRepositoryError>;

    /// Atomically set status to accepted and assign `driver`, only if the
    /// ride is currently pending. Returns the updated ride, or `None` when
    /// the ride is missing or no longer pending. Exactly one concurrent
    /// caller may observe `Some`.
    async fn accept(
        &self,
        id: RideId,
        driver: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError>;

    /// Atomically transition accepted to ongoing, only if `driver` is the
    /// assigned driver.
    async fn begin(
        &self,
        id: RideId,
        driver: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError>;

    /// Atomically transition ongoing to completed, only if `driver` is the
    /// assigned driver.
    async fn complete(
        &self,
        id: RideId,
        driver: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError>;

    /// Atomically transition any non-terminal status to cancelled,
    /// recording the cancelling party.
    async fn cancel(
        &self,
        id: RideId,
        by: CancelParty,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError>;

    /// Atomic set-add of `driver` to the ride's offered set. Returns
    /// `true` only when the driver was newly added.
    async fn add_offered_driver(
        &self,
        id: RideId,
        driver: &ActorId,
    ) -> Result<bool, RideRepositoryError>;

    /// Atomically increment the one-time-code attempt counter, returning
    /// the new count.
    async fn record_otp_attempt(&self, id: RideId) -> Result<u32, RideRepositoryError>;

    /// Pending rides of the given class created after `created_after` and
    /// not yet offered to `exclude`.
    async fn find_offerable(
        &self,
        class: VehicleClass,
        created_after: DateTime<Utc>,
        exclude: &ActorId,
    ) -> Result<Vec<Ride>, RideRepositoryError>;

    /// Bulk conditional update: cancel every ride still pending that was
    /// created before `cutoff`, returning the rides just expired. Rides
    /// already transitioned elsewhere are excluded by the status filter.
    async fn expire_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ride>, RideRepositoryError>;
}
