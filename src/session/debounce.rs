//! Per-file debouncing of session change notifications.
//!
//! [`Debouncer`] holds no timers of its own; the caller feeds notifications
//! with the current instant, sleeps until [`Debouncer::next_deadline`], and
//! collects due events with [`Debouncer::drain_due`].
//!
//! Each key has at most one pending change. A notification restarts the quiet
//! period unless the burst has already lasted `max_wait`, in which case the
//! merged change is returned immediately. Deadlines never extend past
//! `first_seen + max_wait`, so a continuous stream of writes still surfaces
//! within `max_wait`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::WatcherConfig;
use crate::models::session::{ChangeType, SessionChangeEvent};

/// Identity of a debounced file: the watched base directory plus session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    /// Watched base directory the file was seen under.
    pub scope: PathBuf,
    /// Session id (record file stem).
    pub session_id: String,
}

impl DebounceKey {
    /// Key for `session_id` under `scope`.
    #[must_use]
    pub fn new(scope: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug)]
struct Pending {
    event: SessionChangeEvent,
    first_seen: Instant,
    deadline: Instant,
}

/// Coalesces bursts of notifications per [`DebounceKey`].
#[derive(Debug)]
pub struct Debouncer {
    debounce: Duration,
    max_wait: Duration,
    pending: HashMap<DebounceKey, Pending>,
}

impl Debouncer {
    /// Debouncer with a `debounce` quiet period and a `max_wait` burst cap.
    #[must_use]
    pub fn new(debounce: Duration, max_wait: Duration) -> Self {
        Self {
            debounce,
            max_wait: max_wait.max(debounce),
            pending: HashMap::new(),
        }
    }

    /// Debouncer using the watcher settings.
    #[must_use]
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(
            Duration::from_millis(config.debounce_ms),
            Duration::from_millis(config.max_debounce_ms),
        )
    }

    /// Record a notification observed at `now`.
    ///
    /// Returns the merged change when the burst for `key` has reached the
    /// maximum wait; the key is then no longer pending.
    pub fn on_notification(
        &mut self,
        key: DebounceKey,
        event: SessionChangeEvent,
        now: Instant,
    ) -> Option<SessionChangeEvent> {
        let Some(pending) = self.pending.get_mut(&key) else {
            self.pending.insert(
                key,
                Pending {
                    event,
                    first_seen: now,
                    deadline: now + self.debounce,
                },
            );
            return None;
        };

        let merged = merge(&pending.event, event);
        if now.saturating_duration_since(pending.first_seen) >= self.max_wait {
            self.pending.remove(&key);
            return Some(merged);
        }

        pending.event = merged;
        pending.deadline = (now + self.debounce).min(pending.first_seen + self.max_wait);
        None
    }

    /// Remove and return every change whose deadline is at or before `now`,
    /// earliest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<SessionChangeEvent> {
        let due: Vec<DebounceKey> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut drained: Vec<Pending> = due
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect();
        drained.sort_by_key(|p| p.deadline);
        drained.into_iter().map(|p| p.event).collect()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Number of keys with a pending change.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending change.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// The latest classification wins, except that a pending creation is not
/// downgraded to an update.
fn merge(pending: &SessionChangeEvent, incoming: SessionChangeEvent) -> SessionChangeEvent {
    if pending.change_type == ChangeType::Created && incoming.change_type == ChangeType::Updated {
        return SessionChangeEvent {
            change_type: ChangeType::Created,
            ..incoming
        };
    }
    incoming
}
