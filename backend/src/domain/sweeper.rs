//! Periodic maintenance tasks.
//!
//! The expiration sweeper imposes the hard timeout on the pending state:
//! one bulk conditional update per tick, one notification per newly
//! expired ride. The maintenance sweeper evicts stale presence entries
//! and purges the offer dedup cache. A failed tick is logged and retried
//! on the next interval; the loops never die.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use mockable::Clock;
use tracing::{debug, error, info};

use crate::domain::dispatch::DispatchMatcher;
use crate::domain::lifecycle::notify_expired;
use crate::domain::ports::{RideRepository, RideRepositoryError};
use crate::domain::presence::{PRESENCE_MAX_IDLE, PRESENCE_SWEEP_INTERVAL, PresenceRegistry};

/// Maximum age of a pending ride before the sweeper cancels it.
pub const EXPIRATION_WINDOW: Duration = Duration::minutes(10);

/// Interval between expiration sweeps.
pub const EXPIRATION_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Cancels pending rides that outlived the expiration window and tells
/// their requesters.
pub struct ExpirationSweeper {
    rides: Arc<dyn RideRepository>,
    presence: Arc<PresenceRegistry>,
    clock: Arc<dyn Clock>,
    window: Duration,
    interval: StdDuration,
}

impl ExpirationSweeper {
    /// Build a sweeper with the standard window and interval.
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
            window: EXPIRATION_WINDOW,
            interval: EXPIRATION_SWEEP_INTERVAL,
        }
    }

    /// Override the window and interval, for tests and tuning.
    #[must_use]
    pub fn with_timing(mut self, window: Duration, interval: StdDuration) -> Self {
        self.window = window;
        self.interval = interval;
        self
    }

    /// One sweep: bulk-cancel overdue pending rides and notify each
    /// requester exactly once. Rides already transitioned elsewhere are
    /// excluded by the store's status filter, so a repeat tick never
    /// double-notifies.
    pub async fn tick(&self) -> Result<usize, RideRepositoryError> {
        let now = self.clock.utc();
        let cutoff = now - self.window;
        let expired = self.rides.expire_pending_before(cutoff, now).await?;
        for ride in &expired {
            notify_expired(&self.presence, ride);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale pending rides");
        }
        Ok(expired.len())
    }

    /// Run the sweep loop forever. A failed tick is logged and the loop
    /// continues on the next interval.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if let Err(err) = self.tick().await {
                error!(error = %err, "expiration sweep failed; retrying next tick");
            }
        }
    }
}

/// Evicts idle presence entries and stale dedup cache pairs.
pub struct MaintenanceSweeper {
    presence: Arc<PresenceRegistry>,
    matcher: Arc<DispatchMatcher>,
    clock: Arc<dyn Clock>,
    max_idle: Duration,
    interval: StdDuration,
}

impl MaintenanceSweeper {
    /// Build a sweeper with the standard idle window and interval.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        matcher: Arc<DispatchMatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            presence,
            matcher,
            clock,
            max_idle: PRESENCE_MAX_IDLE,
            interval: PRESENCE_SWEEP_INTERVAL,
        }
    }

    /// One sweep over presence entries and the dedup cache.
    pub fn tick(&self) {
        let now = self.clock.utc();
        let evicted = self.presence.sweep_stale(self.max_idle, now);
        let purged = self
            .matcher
            .dedup_cache()
            .purge_older_than(self.matcher.config().dedup_ttl, now);
        if evicted > 0 || purged > 0 {
            debug!(evicted, purged, "presence maintenance sweep");
        }
    }

    /// Run the maintenance loop forever.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}
