//! In-memory adapters for the ride store and geo index ports.
//!
//! The ride store keeps every document behind one mutex, which makes each
//! conditional operation atomic exactly as the document-store contract
//! requires: precondition check and write happen under the same lock, so
//! concurrent acceptance attempts race on the lock and exactly one
//! observes the pending precondition. Used by tests and by the store-less
//! default bootstrap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::geo::{Coordinates, haversine_meters};
use crate::domain::ports::{
    GeoIndex, GeoIndexError, NearbyDriver, RideRepository, RideRepositoryError,
};
use crate::domain::presence::PresenceRegistry;
use crate::domain::ride::{ActorId, CancelParty, Ride, RideId, RideStatus, VehicleClass};

/// Mutex-backed ride store with document-store conditional-update
/// semantics.
#[derive(Debug, Default)]
pub struct InMemoryRideStore {
    rides: Mutex<HashMap<RideId, Ride>>,
}

impl InMemoryRideStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RideId, Ride>> {
        self.rides.lock().expect("ride store lock poisoned")
    }
}

#[async_trait]
impl RideRepository for InMemoryRideStore {
    async fn create(&self, ride: &Ride) -> Result<(), RideRepositoryError> {
        self.lock().insert(ride.id, ride.clone());
        Ok(())
    }

    async fn find(&self, id: RideId) -> Result<Option<Ride>, RideRepositoryError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_active_for_rider(
        &self,
        rider: &ActorId,
    ) -> Result<Option<Ride>, RideRepositoryError> {
        let rides = self.lock();
        Ok(rides
            .values()
            .filter(|ride| &ride.rider == rider && !ride.status.is_terminal())
            .max_by_key(|ride| ride.created_at)
            .cloned())
    }

    async fn accept(
        &self,
        id: RideId,
        driver: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError> {
        let mut rides = self.lock();
        let Some(ride) = rides.get_mut(&id) else {
            return Ok(None);
        };
        if ride.status != RideStatus::Pending {
            return Ok(None);
        }
        ride.status = RideStatus::Accepted;
        ride.driver = Some(driver.clone());
        ride.updated_at = now;
        Ok(Some(ride.clone()))
    }

    async fn begin(
        &self,
        id: RideId,
        driver: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError> {
        let mut rides = self.lock();
        let Some(ride) = rides.get_mut(&id) else {
            return Ok(None);
        };
        if ride.status != RideStatus::Accepted || ride.driver.as_ref() != Some(driver) {
            return Ok(None);
        }
        ride.status = RideStatus::Ongoing;
        ride.updated_at = now;
        Ok(Some(ride.clone()))
    }

    async fn complete(
        &self,
        id: RideId,
        driver: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError> {
        let mut rides = self.lock();
        let Some(ride) = rides.get_mut(&id) else {
            return Ok(None);
        };
        if ride.status != RideStatus::Ongoing || ride.driver.as_ref() != Some(driver) {
            return Ok(None);
        }
        ride.status = RideStatus::Completed;
        ride.updated_at = now;
        Ok(Some(ride.clone()))
    }

    async fn cancel(
        &self,
        id: RideId,
        by: CancelParty,
        now: DateTime<Utc>,
    ) -> Result<Option<Ride>, RideRepositoryError> {
        let mut rides = self.lock();
        let Some(ride) = rides.get_mut(&id) else {
            return Ok(None);
        };
        if ride.status.is_terminal() {
            return Ok(None);
        }
        ride.status = RideStatus::Cancelled;
        ride.cancelled_by = Some(by);
        ride.updated_at = now;
        Ok(Some(ride.clone()))
    }

    async fn add_offered_driver(
        &self,
        id: RideId,
        driver: &ActorId,
    ) -> Result<bool, RideRepositoryError> {
        let mut rides = self.lock();
        let Some(ride) = rides.get_mut(&id) else {
            return Err(RideRepositoryError::query(format!("unknown ride {id}")));
        };
        Ok(ride.offered_to.insert(driver.clone()))
    }

    async fn record_otp_attempt(&self, id: RideId) -> Result<u32, RideRepositoryError> {
        let mut rides = self.lock();
        let Some(ride) = rides.get_mut(&id) else {
            return Err(RideRepositoryError::query(format!("unknown ride {id}")));
        };
        ride.otp.attempts += 1;
        Ok(ride.otp.attempts)
    }

    async fn find_offerable(
        &self,
        class: VehicleClass,
        created_after: DateTime<Utc>,
        exclude: &ActorId,
    ) -> Result<Vec<Ride>, RideRepositoryError> {
        let rides = self.lock();
        Ok(rides
            .values()
            .filter(|ride| {
                ride.status == RideStatus::Pending
                    && ride.vehicle_class == class
                    && ride.created_at > created_after
                    && !ride.offered_to.contains(exclude)
            })
            .cloned()
            .collect())
    }

    async fn expire_pending_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ride>, RideRepositoryError> {
        let mut rides = self.lock();
        let mut expired = Vec::new();
        for ride in rides.values_mut() {
            if ride.status == RideStatus::Pending && ride.created_at < cutoff {
                ride.status = RideStatus::Cancelled;
                ride.cancelled_by = Some(CancelParty::System);
                ride.updated_at = now;
                expired.push(ride.clone());
            }
        }
        Ok(expired)
    }
}

/// Geo index reading the presence registry's online-driver snapshot.
///
/// Dispatch accuracy follows from the location processor always
/// refreshing presence positions before any relay throttling.
pub struct PresenceGeoIndex {
    presence: Arc<PresenceRegistry>,
}

impl PresenceGeoIndex {
    /// Build an index over the given registry.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl GeoIndex for PresenceGeoIndex {
    async fn find_near(
        &self,
        point: Coordinates,
        radius_meters: f64,
        class: VehicleClass,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, GeoIndexError> {
        let mut candidates: Vec<(f64, NearbyDriver)> = self
            .presence
            .online_drivers()
            .into_iter()
            .filter(|driver| driver.vehicle_class == class)
            .filter_map(|driver| {
                let distance = haversine_meters(point, driver.coords);
                (distance <= radius_meters).then_some((
                    distance,
                    NearbyDriver {
                        driver_id: driver.driver_id,
                        coords: driver.coords,
                        vehicle_class: driver.vehicle_class,
                    },
                ))
            })
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        candidates.truncate(limit);
        Ok(candidates.into_iter().map(|(_, driver)| driver).collect())
    }
}
