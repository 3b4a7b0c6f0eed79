//! Presence and channel registry.
//!
//! Tracks which rider or driver is reachable on which real-time channel.
//! The registry is process-scoped state constructed at server startup and
//! shared as an `Arc`; channel-event handlers mutate it concurrently
//! behind `std::sync` locks that are never held across an await point.
//! It is non-authoritative: losing it costs extra duplicate-check round
//! trips, never correctness, because the ride store's offered set remains
//! the source of truth.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::domain::dispatch::RideOffer;
use crate::domain::geo::Coordinates;
use crate::domain::lifecycle::{RideCancelledNotice, RideExpiredNotice, RidePartyNotice};
use crate::domain::location::DriverLocationUpdate;
use crate::domain::ride::{ActorId, RideId, VehicleClass};

/// How long a presence entry may stay idle before the sweep evicts it.
pub const PRESENCE_MAX_IDLE: Duration = Duration::hours(1);

/// Interval between presence sweeps.
pub const PRESENCE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Kind of connected actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    /// A passenger.
    Rider,
    /// A driver.
    Driver,
}

/// Events pushed to connected clients. Best-effort: delivery is never
/// guaranteed and never retried.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// A ride offer for a driver. The one-time code is withheld.
    NewRide(RideOffer),
    /// The rider's pending ride expired unanswered.
    RideExpired(RideExpiredNotice),
    /// Live driver position relayed to the rider and ride watchers.
    DriverLocation(DriverLocationUpdate),
    /// A driver committed to the rider's ride.
    RideAccepted(RidePartyNotice),
    /// The one-time code was verified; the ride is underway.
    RideStarted(RidePartyNotice),
    /// The driver completed the trip.
    RideCompleted(RidePartyNotice),
    /// A party cancelled the ride.
    RideCancelled(RideCancelledNotice),
    /// The session was re-attached to an active ride's feed.
    RejoinRideSuccess(RidePartyNotice),
    /// The ride could not be re-joined.
    RejoinRideError {
        /// Why the rejoin was refused.
        reason: String,
    },
}

/// Driver-specific details supplied at registration.
#[derive(Debug, Clone)]
pub struct DriverDetails {
    /// Declared vehicle class.
    pub vehicle_class: VehicleClass,
    /// Last known position, when the client supplied one.
    pub coords: Option<Coordinates>,
    /// Whether the driver joined accepting work.
    pub online: bool,
}

/// Point-in-time view of a driver's presence.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSnapshot {
    /// Declared vehicle class.
    pub vehicle_class: VehicleClass,
    /// Last known position.
    pub coords: Option<Coordinates>,
    /// Availability flag.
    pub online: bool,
    /// Ride currently serviced, if any.
    pub active_ride: Option<RideId>,
}

/// An online driver with a usable position, as seen by the geo index.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineDriver {
    /// Driver identifier.
    pub driver_id: ActorId,
    /// Last known position.
    pub coords: Coordinates,
    /// Declared vehicle class.
    pub vehicle_class: VehicleClass,
}

#[derive(Debug)]
struct DriverState {
    vehicle_class: VehicleClass,
    coords: Option<Coordinates>,
    online: bool,
    active_ride: Option<RideId>,
}

#[derive(Debug)]
struct PresenceEntry {
    kind: ActorKind,
    channel: UnboundedSender<OutboundEvent>,
    last_seen: DateTime<Utc>,
    driver: Option<DriverState>,
}

/// Registry of live channels plus per-ride watch lists.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<ActorId, PresenceEntry>>,
    ride_watchers: RwLock<HashMap<RideId, HashSet<ActorId>>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the live channel for an actor. A later join
    /// replaces the earlier channel; at most one is live per actor.
    pub fn register(
        &self,
        actor: ActorId,
        kind: ActorKind,
        channel: UnboundedSender<OutboundEvent>,
        driver: Option<DriverDetails>,
        now: DateTime<Utc>,
    ) {
        let entry = PresenceEntry {
            kind,
            channel,
            last_seen: now,
            driver: driver.map(|d| DriverState {
                vehicle_class: d.vehicle_class,
                coords: d.coords,
                online: d.online,
                active_ride: None,
            }),
        };
        self.entries
            .write()
            .expect("presence lock poisoned")
            .insert(actor, entry);
    }

    /// Drop an actor's presence and any ride watches it held.
    pub fn disconnect(&self, actor: &ActorId) {
        self.entries
            .write()
            .expect("presence lock poisoned")
            .remove(actor);
        let mut watchers = self.ride_watchers.write().expect("presence lock poisoned");
        watchers.retain(|_, set| {
            set.remove(actor);
            !set.is_empty()
        });
    }

    /// Refresh the last-activity stamp, e.g. on a heartbeat.
    pub fn mark_seen(&self, actor: &ActorId, now: DateTime<Utc>) {
        if let Some(entry) = self
            .entries
            .write()
            .expect("presence lock poisoned")
            .get_mut(actor)
        {
            entry.last_seen = now;
        }
    }

    /// Toggle a driver's availability. Returns the driver's snapshot when
    /// the flag transitioned offline to online (the late-joiner trigger),
    /// `None` otherwise.
    pub fn set_availability(
        &self,
        driver_id: &ActorId,
        online: bool,
        now: DateTime<Utc>,
    ) -> Option<DriverSnapshot> {
        let mut entries = self.entries.write().expect("presence lock poisoned");
        let entry = entries.get_mut(driver_id)?;
        let state = entry.driver.as_mut()?;
        entry.last_seen = now;
        let came_online = online && !state.online;
        state.online = online;
        came_online.then(|| DriverSnapshot {
            vehicle_class: state.vehicle_class,
            coords: state.coords,
            online: state.online,
            active_ride: state.active_ride,
        })
    }

    /// Record a driver's latest position (and serviced ride) and refresh
    /// the activity stamp. Position persistence is never throttled.
    pub fn update_driver_position(
        &self,
        driver_id: &ActorId,
        coords: Coordinates,
        active_ride: Option<RideId>,
        now: DateTime<Utc>,
    ) {
        if let Some(entry) = self
            .entries
            .write()
            .expect("presence lock poisoned")
            .get_mut(driver_id)
        {
            entry.last_seen = now;
            if let Some(state) = entry.driver.as_mut() {
                state.coords = Some(coords);
                if active_ride.is_some() {
                    state.active_ride = active_ride;
                }
            }
        }
    }

    /// Drop a driver's serviced-ride marker once that ride ends. A no-op
    /// when the driver already moved on to a different ride.
    pub fn clear_active_ride(&self, driver_id: &ActorId, ride: RideId) {
        if let Some(entry) = self
            .entries
            .write()
            .expect("presence lock poisoned")
            .get_mut(driver_id)
        {
            if let Some(state) = entry.driver.as_mut() {
                if state.active_ride == Some(ride) {
                    state.active_ride = None;
                }
            }
        }
    }

    /// Current snapshot of a driver's presence, if connected.
    #[must_use]
    pub fn driver_snapshot(&self, driver_id: &ActorId) -> Option<DriverSnapshot> {
        let entries = self.entries.read().expect("presence lock poisoned");
        let state = entries.get(driver_id)?.driver.as_ref()?;
        Some(DriverSnapshot {
            vehicle_class: state.vehicle_class,
            coords: state.coords,
            online: state.online,
            active_ride: state.active_ride,
        })
    }

    /// Whether the actor currently holds a live channel.
    #[must_use]
    pub fn is_connected(&self, actor: &ActorId) -> bool {
        self.entries
            .read()
            .expect("presence lock poisoned")
            .contains_key(actor)
    }

    /// All online drivers with a known position.
    #[must_use]
    pub fn online_drivers(&self) -> Vec<OnlineDriver> {
        let entries = self.entries.read().expect("presence lock poisoned");
        entries
            .iter()
            .filter(|(_, entry)| matches!(entry.kind, ActorKind::Driver))
            .filter_map(|(id, entry)| {
                let state = entry.driver.as_ref()?;
                if !state.online {
                    return None;
                }
                Some(OnlineDriver {
                    driver_id: id.clone(),
                    coords: state.coords?,
                    vehicle_class: state.vehicle_class,
                })
            })
            .collect()
    }

    /// Best-effort push to an actor's channel. A no-op when the actor is
    /// unreachable; the platform favours availability over guaranteed
    /// delivery for real-time signals.
    pub fn send_to_actor(&self, actor: &ActorId, event: OutboundEvent) -> bool {
        let entries = self.entries.read().expect("presence lock poisoned");
        match entries.get(actor) {
            Some(entry) => {
                let delivered = entry.channel.send(event).is_ok();
                if !delivered {
                    debug!(actor = %actor, "channel closed; dropping event");
                }
                delivered
            }
            None => {
                debug!(actor = %actor, "actor unreachable; dropping event");
                false
            }
        }
    }

    /// Subscribe an actor's channel to a ride's feed.
    pub fn watch_ride(&self, ride: RideId, actor: ActorId) {
        self.ride_watchers
            .write()
            .expect("presence lock poisoned")
            .entry(ride)
            .or_default()
            .insert(actor);
    }

    /// Best-effort push to every channel watching a ride. Returns how many
    /// watchers the event reached.
    pub fn send_to_ride(&self, ride: RideId, event: &OutboundEvent) -> usize {
        let watcher_ids: Vec<ActorId> = {
            let watchers = self.ride_watchers.read().expect("presence lock poisoned");
            watchers
                .get(&ride)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        watcher_ids
            .iter()
            .filter(|actor| self.send_to_actor(actor, event.clone()))
            .count()
    }

    /// Evict entries idle for longer than `max_idle`, preventing unbounded
    /// growth from abandoned connections. Returns the eviction count.
    pub fn sweep_stale(&self, max_idle: Duration, now: DateTime<Utc>) -> usize {
        let evicted: Vec<ActorId> = {
            let entries = self.entries.read().expect("presence lock poisoned");
            entries
                .iter()
                .filter(|(_, entry)| now - entry.last_seen > max_idle)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for actor in &evicted {
            self.disconnect(actor);
        }
        evicted.len()
    }
}
