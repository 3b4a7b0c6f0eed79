//! Dispatch matcher: broadcast fan-out and late-joiner reconciliation.
//!
//! Broadcasting is fire-and-forget per recipient: one unreachable driver
//! never aborts the rest of the fan-out, and only drivers the push
//! actually reached are recorded as offered, so an undelivered offer can
//! still be made on reconnect. The dedup cache is an advisory fast path
//! only; the ride's offered set at the store stays authoritative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use mockable::Clock;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::domain::geo::{Coordinates, haversine_meters};
use crate::domain::ports::{GeoIndex, RideRepository};
use crate::domain::presence::{OutboundEvent, PresenceRegistry};
use crate::domain::ride::{ActorId, Ride, RideId, VehicleClass};

/// Tunables for candidate search and offer fan-out.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Search radius per vehicle class, metres.
    pub radius_overrides: HashMap<VehicleClass, f64>,
    /// Radius for classes without an override, metres.
    pub default_radius_meters: f64,
    /// Candidate cap for the initial broadcast.
    pub broadcast_limit: usize,
    /// Concurrent recipients during fan-out.
    pub fanout_width: usize,
    /// Maximum ride age for late-joiner offers.
    pub freshness_window: Duration,
    /// Late-joiner offers kept per reconciliation.
    pub late_join_limit: usize,
    /// Dedup cache entry lifetime. Wider than the freshness window as in
    /// the source system; harmless because the cache is advisory only.
    pub dedup_ttl: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let mut radius_overrides = HashMap::new();
        radius_overrides.insert(VehicleClass::Car, 15_000.0);
        radius_overrides.insert(VehicleClass::Bike, 8_000.0);
        Self {
            radius_overrides,
            default_radius_meters: 10_000.0,
            broadcast_limit: 50,
            fanout_width: 8,
            freshness_window: Duration::minutes(5),
            late_join_limit: 5,
            dedup_ttl: Duration::minutes(10),
        }
    }
}

impl DispatchConfig {
    /// Search radius for a class, metres.
    #[must_use]
    pub fn search_radius_meters(&self, class: VehicleClass) -> f64 {
        self.radius_overrides
            .get(&class)
            .copied()
            .unwrap_or(self.default_radius_meters)
    }
}

/// Ephemeral (ride, driver) pairs already offered, to short-circuit
/// duplicate offers without a store round trip.
#[derive(Debug, Default)]
pub struct OfferDedupCache {
    entries: Mutex<HashMap<(RideId, ActorId), DateTime<Utc>>>,
}

impl OfferDedupCache {
    /// Whether the pair was already offered (per this process's memory).
    #[must_use]
    pub fn contains(&self, ride: RideId, driver: &ActorId) -> bool {
        self.entries
            .lock()
            .expect("dedup lock poisoned")
            .contains_key(&(ride, driver.clone()))
    }

    /// Record an offered pair.
    pub fn mark(&self, ride: RideId, driver: ActorId, now: DateTime<Utc>) {
        self.entries
            .lock()
            .expect("dedup lock poisoned")
            .insert((ride, driver), now);
    }

    /// Drop entries older than `ttl`. Returns the purge count.
    pub fn purge_older_than(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().expect("dedup lock poisoned");
        let before = entries.len();
        entries.retain(|_, offered_at| now - *offered_at <= ttl);
        before - entries.len()
    }
}

/// A ride offer pushed to a driver's channel. Never carries the one-time
/// code; the rider discloses that at pickup.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RideOffer {
    /// Offered ride.
    pub ride_id: RideId,
    /// Requesting rider.
    pub rider: ActorId,
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
    /// Rider's payment method.
    pub payment_method: String,
    /// Ride creation instant.
    pub created_at: DateTime<Utc>,
    /// Seconds left in the freshness window; late-join offers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_seconds: Option<i64>,
    /// Marks offers delivered through the late-joiner path.
    pub is_late_join_offer: bool,
}

impl RideOffer {
    fn from_ride(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id,
            rider: ride.rider.clone(),
            pickup_address: ride.pickup_address.clone(),
            pickup: ride.pickup,
            destination_address: ride.destination_address.clone(),
            destination: ride.destination,
            vehicle_class: ride.vehicle_class,
            fare: ride.fare,
            payment_method: ride.payment_method.clone(),
            created_at: ride.created_at,
            time_remaining_seconds: None,
            is_late_join_offer: false,
        }
    }

    fn late_join(ride: &Ride, time_remaining: Duration) -> Self {
        Self {
            time_remaining_seconds: Some(time_remaining.num_seconds().max(0)),
            is_late_join_offer: true,
            ..Self::from_ride(ride)
        }
    }
}

/// Computes which drivers receive a new request and which pending
/// requests reach a driver that just became available.
pub struct DispatchMatcher {
    rides: Arc<dyn RideRepository>,
    geo: Arc<dyn GeoIndex>,
    presence: Arc<PresenceRegistry>,
    dedup: OfferDedupCache,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl DispatchMatcher {
    /// Assemble a matcher over its ports.
    #[must_use]
    pub fn new(
        rides: Arc<dyn RideRepository>,
        geo: Arc<dyn GeoIndex>,
        presence: Arc<PresenceRegistry>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            rides,
            geo,
            presence,
            dedup: OfferDedupCache::default(),
            clock,
            config,
        }
    }

    /// The advisory dedup cache, exposed for the periodic purge.
    #[must_use]
    pub fn dedup_cache(&self) -> &OfferDedupCache {
        &self.dedup
    }

    /// Dispatch tunables.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Offer a new pending ride to nearby eligible drivers. Returns how
    /// many drivers the offer reached.
    pub async fn broadcast_new_ride(&self, ride: &Ride) -> usize {
        let radius = self.config.search_radius_meters(ride.vehicle_class);
        let candidates = match self
            .geo
            .find_near(
                ride.pickup,
                radius,
                ride.vehicle_class,
                self.config.broadcast_limit,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(ride_id = %ride.id, error = %error, "candidate search failed; ride stays pending");
                return 0;
            }
        };

        let reached = AtomicUsize::new(0);
        futures_util::stream::iter(candidates)
            .for_each_concurrent(self.config.fanout_width, |candidate| {
                let reached = &reached;
                async move {
                    if self.offer_candidate(ride, &candidate.driver_id).await {
                        reached.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        let reached = reached.into_inner();
        info!(ride_id = %ride.id, reached, "broadcast complete");
        reached
    }

    /// Re-evaluate a driver that just became reachable and available
    /// against every still-fresh pending ride. Returns how many offers
    /// were pushed.
    pub async fn reconcile_late_joiner(
        &self,
        driver_id: &ActorId,
        location: Coordinates,
        class: VehicleClass,
    ) -> usize {
        let now = self.clock.utc();
        let created_after = now - self.config.freshness_window;
        let mut candidates = match self
            .rides
            .find_offerable(class, created_after, driver_id)
            .await
        {
            Ok(rides) => rides,
            Err(error) => {
                warn!(driver_id = %driver_id, error = %error, "offerable query failed");
                return 0;
            }
        };

        candidates.sort_by(|a, b| {
            haversine_meters(location, a.pickup).total_cmp(&haversine_meters(location, b.pickup))
        });
        candidates.truncate(self.config.late_join_limit);

        let mut offered = 0;
        for ride in &candidates {
            // Advisory fast path; the store check below stays authoritative.
            if self.dedup.contains(ride.id, driver_id) {
                debug!(ride_id = %ride.id, driver_id = %driver_id, "dedup cache hit; skipping");
                continue;
            }
            let time_remaining = self.config.freshness_window - ride.age(now);
            if self
                .offer_late_join(ride, driver_id, RideOffer::late_join(ride, time_remaining))
                .await
            {
                offered += 1;
            }
        }
        if offered > 0 {
            info!(driver_id = %driver_id, offered, "late-joiner reconciliation complete");
        }
        offered
    }

    /// Broadcast-path offer: push first, record only when the driver was
    /// actually reached. An unreachable candidate stays out of the
    /// offered set so the late-joiner path can still reach it later.
    async fn offer_candidate(&self, ride: &Ride, driver_id: &ActorId) -> bool {
        let delivered = self
            .presence
            .send_to_actor(driver_id, OutboundEvent::NewRide(RideOffer::from_ride(ride)));
        if !delivered {
            debug!(ride_id = %ride.id, driver_id = %driver_id, "candidate unreachable; left offerable");
            return false;
        }
        match self.rides.add_offered_driver(ride.id, driver_id).await {
            Ok(_) => {}
            Err(error) => {
                // The offer did reach the driver; bookkeeping catches up
                // at the authoritative set-add on any later offer path.
                warn!(ride_id = %ride.id, driver_id = %driver_id, error = %error, "offer bookkeeping failed after delivery");
            }
        }
        self.dedup
            .mark(ride.id, driver_id.clone(), self.clock.utc());
        true
    }

    /// Late-join offer: the authoritative set-add comes first, so a pair
    /// raced by a concurrent reconciliation is never pushed twice.
    async fn offer_late_join(&self, ride: &Ride, driver_id: &ActorId, offer: RideOffer) -> bool {
        match self.rides.add_offered_driver(ride.id, driver_id).await {
            Ok(true) => {}
            Ok(false) => {
                // Already offered; refresh the cache so the fast path holds.
                self.dedup
                    .mark(ride.id, driver_id.clone(), self.clock.utc());
                return false;
            }
            Err(error) => {
                warn!(ride_id = %ride.id, driver_id = %driver_id, error = %error, "offer bookkeeping failed; skipping recipient");
                return false;
            }
        }
        self.dedup
            .mark(ride.id, driver_id.clone(), self.clock.utc());
        self.presence
            .send_to_actor(driver_id, OutboundEvent::NewRide(offer))
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.

    use mockable::DefaultClock;
    use rstest::rstest;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::domain::ports::{MockGeoIndex, MockRideRepository, NearbyDriver};
    use crate::domain::presence::{ActorKind, DriverDetails};
    use crate::domain::ride::{RideDraft, RideStatus};

    fn point(lat: f64, lng: f64) -> Coordinates {
        Coordinates::new(lat, lng).expect("valid point")
    }

    fn pending_ride(class: VehicleClass, created_at: DateTime<Utc>) -> Ride {
        let mut ride = Ride::create(
            RideDraft {
                rider: ActorId::from("rider-1"),
                pickup_address: "A".to_owned(),
                pickup: point(7.80, -72.45),
                destination_address: "B".to_owned(),
                destination: point(7.85, -72.40),
                vehicle_class: class,
                fare: 10.0,
                payment_method: "cash".to_owned(),
            },
            created_at,
        );
        ride.status = RideStatus::Pending;
        ride
    }

    fn connect_driver(
        presence: &PresenceRegistry,
        id: &str,
        class: VehicleClass,
    ) -> UnboundedReceiver<OutboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        presence.register(
            ActorId::from(id),
            ActorKind::Driver,
            tx,
            Some(DriverDetails {
                vehicle_class: class,
                coords: Some(point(7.81, -72.46)),
                online: true,
            }),
            Utc::now(),
        );
        rx
    }

    fn matcher(rides: MockRideRepository, geo: MockGeoIndex) -> (DispatchMatcher, Arc<PresenceRegistry>) {
        let presence = Arc::new(PresenceRegistry::new());
        let matcher = DispatchMatcher::new(
            Arc::new(rides),
            Arc::new(geo),
            Arc::clone(&presence),
            Arc::new(DefaultClock),
            DispatchConfig::default(),
        );
        (matcher, presence)
    }

    #[rstest]
    #[case(VehicleClass::Car, 15_000.0)]
    #[case(VehicleClass::Bike, 8_000.0)]
    fn class_specific_search_radius(#[case] class: VehicleClass, #[case] expected: f64) {
        let config = DispatchConfig::default();
        assert_eq!(config.search_radius_meters(class), expected);
    }

    #[test]
    fn dedup_cache_purges_only_stale_entries() {
        let cache = OfferDedupCache::default();
        let now = Utc::now();
        let ride_a = RideId::new();
        let ride_b = RideId::new();
        cache.mark(ride_a, ActorId::from("d1"), now - Duration::minutes(11));
        cache.mark(ride_b, ActorId::from("d1"), now - Duration::minutes(2));

        assert_eq!(cache.purge_older_than(Duration::minutes(10), now), 1);
        assert!(!cache.contains(ride_a, &ActorId::from("d1")));
        assert!(cache.contains(ride_b, &ActorId::from("d1")));
    }

    #[tokio::test]
    async fn broadcast_reaches_connected_candidates_and_records_offers() {
        let ride = pending_ride(VehicleClass::Car, Utc::now());
        let mut geo = MockGeoIndex::new();
        geo.expect_find_near().returning(|_, _, _, _| {
            Ok(vec![
                NearbyDriver {
                    driver_id: ActorId::from("d1"),
                    coords: Coordinates { lat: 7.81, lng: -72.46 },
                    vehicle_class: VehicleClass::Car,
                },
                NearbyDriver {
                    driver_id: ActorId::from("d2"),
                    coords: Coordinates { lat: 7.82, lng: -72.47 },
                    vehicle_class: VehicleClass::Car,
                },
            ])
        });
        let mut rides = MockRideRepository::new();
        // Only the reached driver is recorded as offered.
        rides
            .expect_add_offered_driver()
            .times(1)
            .returning(|_, _| Ok(true));

        let (matcher, presence) = matcher(rides, geo);
        let mut rx1 = connect_driver(&presence, "d1", VehicleClass::Car);
        // d2 never connected: its failure must not abort d1's offer.

        assert_eq!(matcher.broadcast_new_ride(&ride).await, 1);
        let event = rx1.try_recv().expect("offer delivered");
        match event {
            OutboundEvent::NewRide(offer) => {
                assert_eq!(offer.ride_id, ride.id);
                assert!(!offer.is_late_join_offer);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matcher.dedup_cache().contains(ride.id, &ActorId::from("d1")));
    }

    #[tokio::test]
    async fn unreachable_candidate_is_not_recorded_as_offered() {
        let ride = pending_ride(VehicleClass::Car, Utc::now());
        let mut geo = MockGeoIndex::new();
        geo.expect_find_near().returning(|_, _, _, _| {
            Ok(vec![NearbyDriver {
                driver_id: ActorId::from("d1"),
                coords: Coordinates { lat: 7.81, lng: -72.46 },
                vehicle_class: VehicleClass::Car,
            }])
        });
        let mut rides = MockRideRepository::new();
        rides.expect_add_offered_driver().never();

        let (matcher, presence) = matcher(rides, geo);
        // Registered but the receiver is gone: the push cannot land.
        let rx = connect_driver(&presence, "d1", VehicleClass::Car);
        drop(rx);

        assert_eq!(matcher.broadcast_new_ride(&ride).await, 0);
        assert!(
            !matcher.dedup_cache().contains(ride.id, &ActorId::from("d1")),
            "an undelivered offer must leave the pair offerable"
        );
    }

    #[tokio::test]
    async fn late_joiner_offer_carries_time_remaining_and_flag() {
        let created_at = Utc::now() - Duration::minutes(2);
        let ride = pending_ride(VehicleClass::Bike, created_at);
        let ride_id = ride.id;
        let mut rides = MockRideRepository::new();
        rides
            .expect_find_offerable()
            .returning(move |_, _, _| Ok(vec![ride.clone()]));
        rides
            .expect_add_offered_driver()
            .returning(|_, _| Ok(true));

        let (matcher, presence) = matcher(rides, MockGeoIndex::new());
        let mut rx = connect_driver(&presence, "d1", VehicleClass::Bike);

        let offered = matcher
            .reconcile_late_joiner(&ActorId::from("d1"), point(7.84, -72.45), VehicleClass::Bike)
            .await;
        assert_eq!(offered, 1);

        match rx.try_recv().expect("offer delivered") {
            OutboundEvent::NewRide(offer) => {
                assert_eq!(offer.ride_id, ride_id);
                assert!(offer.is_late_join_offer);
                let remaining = offer.time_remaining_seconds.expect("time remaining");
                assert!((175..=185).contains(&remaining), "got {remaining}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeating_reconciliation_never_offers_the_same_pair_twice() {
        let ride = pending_ride(VehicleClass::Car, Utc::now());
        let ride_for_query = ride.clone();
        let mut rides = MockRideRepository::new();
        rides
            .expect_find_offerable()
            .returning(move |_, _, _| Ok(vec![ride_for_query.clone()]));
        // The authoritative set-add accepts the pair exactly once.
        rides
            .expect_add_offered_driver()
            .times(1)
            .returning(|_, _| Ok(true));

        let (matcher, presence) = matcher(rides, MockGeoIndex::new());
        let mut rx = connect_driver(&presence, "d1", VehicleClass::Car);

        let driver = ActorId::from("d1");
        let location = point(7.81, -72.46);
        assert_eq!(
            matcher
                .reconcile_late_joiner(&driver, location, VehicleClass::Car)
                .await,
            1
        );
        assert_eq!(
            matcher
                .reconcile_late_joiner(&driver, location, VehicleClass::Car)
                .await,
            0
        );

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second offer must be suppressed");
    }

    #[tokio::test]
    async fn late_joiner_keeps_only_the_closest_rides() {
        let now = Utc::now();
        let mut far = pending_ride(VehicleClass::Car, now);
        far.pickup = point(8.60, -71.20);
        let mut rides_by_distance: Vec<Ride> = (0..6i32)
            .map(|i| {
                let mut ride = pending_ride(VehicleClass::Car, now);
                ride.pickup = point(7.80 + 0.001 * f64::from(i), -72.45);
                ride
            })
            .collect();
        rides_by_distance.push(far.clone());
        let query_result = rides_by_distance.clone();

        let mut rides = MockRideRepository::new();
        rides
            .expect_find_offerable()
            .returning(move |_, _, _| Ok(query_result.clone()));
        rides
            .expect_add_offered_driver()
            .times(5)
            .returning(|_, _| Ok(true));

        let (matcher, presence) = matcher(rides, MockGeoIndex::new());
        let _rx = connect_driver(&presence, "d1", VehicleClass::Car);

        let offered = matcher
            .reconcile_late_joiner(&ActorId::from("d1"), point(7.80, -72.45), VehicleClass::Car)
            .await;
        assert_eq!(offered, 5);
        assert!(
            !matcher.dedup_cache().contains(far.id, &ActorId::from("d1")),
            "farthest ride must fall outside the late-join cap"
        );
    }
}
