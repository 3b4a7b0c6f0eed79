//! Engine-level flows across the real services and the in-memory store.
//!
//! These tests wire the domain exactly as the server does and assert on
//! the events that reach rider and driver channels.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dispatch::domain::ports::{FixtureRouteService, RideRepository};
use dispatch::domain::{
    ActorId, ActorKind, Coordinates, DispatchConfig, DispatchMatcher, DriverDetails,
    ErrorCode, ExpirationSweeper, LocationSample, LocationStreamProcessor, OutboundEvent,
    PresenceRegistry, Ride, RideDraft, RideLifecycleService, VehicleClass,
};
use dispatch::outbound::memory::{InMemoryRideStore, PresenceGeoIndex};
use mockable::DefaultClock;
use tokio::sync::mpsc::{self, UnboundedReceiver};

struct Harness {
    rides: Arc<dyn RideRepository>,
    presence: Arc<PresenceRegistry>,
    matcher: Arc<DispatchMatcher>,
    lifecycle: Arc<RideLifecycleService>,
    locations: Arc<LocationStreamProcessor>,
    sweeper: ExpirationSweeper,
}

fn harness() -> Harness {
    let rides: Arc<dyn RideRepository> = Arc::new(InMemoryRideStore::new());
    let presence = Arc::new(PresenceRegistry::new());
    let clock = Arc::new(DefaultClock);
    let geo = Arc::new(PresenceGeoIndex::new(Arc::clone(&presence)));
    let matcher = Arc::new(DispatchMatcher::new(
        Arc::clone(&rides),
        geo,
        Arc::clone(&presence),
        clock.clone(),
        DispatchConfig::default(),
    ));
    let lifecycle = Arc::new(RideLifecycleService::new(
        Arc::clone(&rides),
        Arc::new(FixtureRouteService::default()),
        Arc::clone(&presence),
        Arc::clone(&matcher),
        clock.clone(),
    ));
    let locations = Arc::new(LocationStreamProcessor::new(
        Arc::clone(&rides),
        Arc::clone(&presence),
        clock.clone(),
    ));
    let sweeper = ExpirationSweeper::new(
        Arc::clone(&rides),
        Arc::clone(&presence),
        clock,
    );
    Harness {
        rides,
        presence,
        matcher,
        lifecycle,
        locations,
        sweeper,
    }
}

fn connect(
    harness: &Harness,
    actor: &str,
    kind: ActorKind,
    driver: Option<DriverDetails>,
) -> UnboundedReceiver<OutboundEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    harness
        .presence
        .register(ActorId::from(actor), kind, tx, driver, Utc::now());
    rx
}

fn pending_ride(created_at: chrono::DateTime<Utc>) -> Ride {
    Ride::create(
        RideDraft {
            rider: ActorId::from("rider-1"),
            pickup_address: "Av. Principal 5".to_owned(),
            pickup: Coordinates::new(7.80, -72.45).expect("valid pickup"),
            destination_address: "Terminal".to_owned(),
            destination: Coordinates::new(7.85, -72.40).expect("valid destination"),
            vehicle_class: VehicleClass::Car,
            fare: 10.0,
            payment_method: "cash".to_owned(),
        },
        created_at,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_accepts_yield_exactly_one_winner() {
    let harness = harness();
    let ride = pending_ride(Utc::now());
    harness.rides.create(&ride).await.expect("seed ride");

    let mut handles = Vec::new();
    for i in 0..8 {
        let lifecycle = Arc::clone(&harness.lifecycle);
        let id = ride.id;
        handles.push(tokio::spawn(async move {
            lifecycle
                .accept_ride(id, &ActorId::new(format!("driver-{i}")))
                .await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(ride) => {
                assert!(ride.driver.is_some());
                winners += 1;
            }
            Err(error) => {
                assert_eq!(error.code(), ErrorCode::AlreadyTaken);
                losers += 1;
            }
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 7);
}

#[tokio::test]
async fn sweeper_expires_overdue_rides_and_notifies_once() {
    let harness = harness();
    let mut rider_rx = connect(&harness, "rider-1", ActorKind::Rider, None);
    let overdue = pending_ride(Utc::now() - Duration::minutes(11));
    let fresh = pending_ride(Utc::now());
    harness.rides.create(&overdue).await.expect("seed overdue");
    harness.rides.create(&fresh).await.expect("seed fresh");

    assert_eq!(harness.sweeper.tick().await.expect("sweep"), 1);
    match rider_rx.try_recv().expect("expiry notice") {
        OutboundEvent::RideExpired(notice) => assert_eq!(notice.ride_id, overdue.id),
        other => panic!("unexpected event: {other:?}"),
    }

    // A repeat tick finds nothing new and never double-notifies.
    assert_eq!(harness.sweeper.tick().await.expect("sweep"), 0);
    assert!(rider_rx.try_recv().is_err());

    let fresh_after = harness
        .rides
        .find(fresh.id)
        .await
        .expect("query")
        .expect("fresh ride kept");
    assert_eq!(fresh_after.status, dispatch::domain::RideStatus::Pending);
}

#[tokio::test]
async fn accepted_ride_positions_reach_the_rider_with_an_eta() {
    let harness = harness();
    let mut rider_rx = connect(&harness, "rider-1", ActorKind::Rider, None);
    let _driver_rx = connect(
        &harness,
        "driver-1",
        ActorKind::Driver,
        Some(DriverDetails {
            vehicle_class: VehicleClass::Car,
            coords: None,
            online: true,
        }),
    );
    let ride = pending_ride(Utc::now());
    harness.rides.create(&ride).await.expect("seed ride");
    let driver = ActorId::from("driver-1");
    harness
        .rides
        .accept(ride.id, &driver, Utc::now())
        .await
        .expect("query")
        .expect("accepted");

    let update = harness
        .locations
        .ingest(
            &driver,
            LocationSample {
                lat: 7.79,
                lng: -72.45,
                heading: Some(10.0),
                speed_kmh: Some(30.0),
                accuracy_meters: None,
                ride_id: Some(ride.id),
            },
        )
        .await
        .expect("valid sample")
        .expect("first sample relays");
    assert!(update.eta_minutes >= 1);
    assert!(update.distance_to_target_meters > 0.0);

    match rider_rx.try_recv().expect("location event") {
        OutboundEvent::DriverLocation(event) => {
            assert_eq!(event.ride_id, ride.id);
            assert_eq!(event.driver_id, driver);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // A near-identical sample within the same second is persisted but
    // not relayed.
    let suppressed = harness
        .locations
        .ingest(
            &driver,
            LocationSample {
                lat: 7.790_01,
                lng: -72.45,
                heading: None,
                speed_kmh: Some(30.0),
                accuracy_meters: None,
                ride_id: Some(ride.id),
            },
        )
        .await
        .expect("valid sample");
    assert!(suppressed.is_none());
    assert!(rider_rx.try_recv().is_err());

    let snapshot = harness
        .presence
        .driver_snapshot(&driver)
        .expect("driver present");
    let coords = snapshot.coords.expect("position persisted");
    assert!((coords.lat - 7.790_01).abs() < 1e-9);
}

#[tokio::test]
async fn undelivered_broadcast_offer_can_still_reach_the_driver_later() {
    let harness = harness();
    // The driver's session died without deregistering: the channel is gone.
    let stale_rx = connect(
        &harness,
        "driver-1",
        ActorKind::Driver,
        Some(DriverDetails {
            vehicle_class: VehicleClass::Car,
            coords: Some(Coordinates::new(7.801, -72.451).expect("valid point")),
            online: true,
        }),
    );
    drop(stale_rx);
    let ride = pending_ride(Utc::now());
    harness.rides.create(&ride).await.expect("seed ride");

    assert_eq!(harness.matcher.broadcast_new_ride(&ride).await, 0);
    let stored = harness
        .rides
        .find(ride.id)
        .await
        .expect("query")
        .expect("exists");
    assert!(
        stored.offered_to.is_empty(),
        "a driver the offer never reached must stay offerable"
    );

    // The driver reconnects; reconciliation delivers the still-fresh ride.
    let mut driver_rx = connect(
        &harness,
        "driver-1",
        ActorKind::Driver,
        Some(DriverDetails {
            vehicle_class: VehicleClass::Car,
            coords: Some(Coordinates::new(7.801, -72.451).expect("valid point")),
            online: true,
        }),
    );
    let offered = harness
        .matcher
        .reconcile_late_joiner(
            &ActorId::from("driver-1"),
            Coordinates::new(7.801, -72.451).expect("valid point"),
            VehicleClass::Car,
        )
        .await;
    assert_eq!(offered, 1);
    match driver_rx.try_recv().expect("offer delivered") {
        OutboundEvent::NewRide(offer) => {
            assert_eq!(offer.ride_id, ride.id);
            assert!(offer.is_late_join_offer);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_coordinates_are_rejected_without_touching_presence() {
    let harness = harness();
    let _driver_rx = connect(
        &harness,
        "driver-1",
        ActorKind::Driver,
        Some(DriverDetails {
            vehicle_class: VehicleClass::Car,
            coords: None,
            online: true,
        }),
    );
    let driver = ActorId::from("driver-1");

    let error = harness
        .locations
        .ingest(
            &driver,
            LocationSample {
                lat: 97.0,
                lng: -72.45,
                heading: None,
                speed_kmh: None,
                accuracy_meters: None,
                ride_id: None,
            },
        )
        .await
        .expect_err("latitude out of range");
    assert_eq!(error.code(), ErrorCode::InvalidLocation);

    let snapshot = harness
        .presence
        .driver_snapshot(&driver)
        .expect("driver present");
    assert!(snapshot.coords.is_none());
}
