//! Staleness filtering of replayed events.

use chrono::{DateTime, Utc};

use crate::models::event::EventTimestamp;

/// Grace window opened by dispatcher initialisation.
///
/// Inside the window, events stamped before initialisation are replays of
/// history and are stale. Once the window has elapsed every event is
/// accepted regardless of its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessWindow {
    initialized_at_ms: i64,
    grace_ms: i64,
}

impl StalenessWindow {
    /// Window opened at `initialized_at` lasting `grace_ms`.
    #[must_use]
    pub fn new(initialized_at: DateTime<Utc>, grace_ms: u64) -> Self {
        Self {
            initialized_at_ms: initialized_at.timestamp_millis(),
            grace_ms: i64::try_from(grace_ms).unwrap_or(i64::MAX),
        }
    }

    /// Initialisation time in epoch milliseconds.
    #[must_use]
    pub fn initialized_at_ms(&self) -> i64 {
        self.initialized_at_ms
    }

    /// Whether the window is still open at `now`.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis().saturating_sub(self.initialized_at_ms) < self.grace_ms
    }

    /// Whether an event stamped `timestamp` and received at `now` is stale.
    ///
    /// Events without a usable timestamp are never stale.
    #[must_use]
    pub fn is_stale(&self, timestamp: Option<&EventTimestamp>, now: DateTime<Utc>) -> bool {
        if !self.is_open(now) {
            return false;
        }
        timestamp
            .and_then(EventTimestamp::to_millis)
            .is_some_and(|ms| ms < self.initialized_at_ms)
    }
}
