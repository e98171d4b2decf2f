//! Bookkeeping for open connections and their in-flight requests.
//!
//! Event handlers on connection threads are the writers; the drain loop reads
//! through [`ConnectionRegistry::snapshot`]. Both sides go through a single
//! mutex so no reader ever observes a half-applied update.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::MetricsSink;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Identifier assigned to an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection request accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Connection the record describes.
    pub id: ConnectionId,
    /// Requests started on this connection.
    pub total_requests: u64,
    /// Responses completed on this connection.
    pub total_responses: u64,
    /// Requests started but not yet completed.
    pub active_requests: u64,
    /// When the connection was registered.
    pub opened_at: Instant,
    /// When the latest request started.
    pub last_request_at: Option<Instant>,
    /// When the latest response completed.
    pub last_response_at: Option<Instant>,
}

impl ConnectionRecord {
    fn new(id: ConnectionId, now: Instant) -> Self {
        Self {
            id,
            total_requests: 0,
            total_responses: 0,
            active_requests: 0,
            opened_at: now,
            last_request_at: None,
            last_response_at: None,
        }
    }

    /// True when no request is in flight.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.active_requests == 0
    }

    /// Time since the connection was registered.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    /// Time since the last response, or zero when none completed.
    #[must_use]
    pub fn idle_duration(&self, now: Instant) -> Duration {
        self.last_response_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at))
    }
}

/// One entry of a [`ConnectionRegistry::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionActivity {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Requests in flight at the time of the snapshot.
    pub active_requests: u64,
}

/// Errors reported by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A connection was registered twice while still open.
    #[error("connection {id} was already registered; previous record replaced")]
    DuplicateConnection {
        /// Identifier that collided.
        id: ConnectionId,
    },
}

/// Tracks every open connection.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Builds an empty registry reporting to `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionRecord>> {
        // Every mutation completes under the guard, so a panic elsewhere
        // cannot leave a record half-written.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking `id` with zeroed counters.
    ///
    /// A duplicate is logged and overwritten; the error is returned so the
    /// caller can surface the broken invariant.
    pub fn register_connection(&self, id: ConnectionId) -> Result<(), RegistryError> {
        let previous = self
            .lock()
            .insert(id, ConnectionRecord::new(id, Instant::now()));
        self.metrics.connection_opened();
        match previous {
            None => {
                self.metrics.idle_connections_changed(1);
                Ok(())
            }
            Some(stale) => {
                if !stale.is_idle() {
                    self.metrics.idle_connections_changed(1);
                }
                warn!(
                    target: REGISTRY_TARGET,
                    connection = %id,
                    stale_active_requests = stale.active_requests,
                    "duplicate connection registration"
                );
                Err(RegistryError::DuplicateConnection { id })
            }
        }
    }

    /// Accounts for a request starting on `id`. Unknown ids are ignored.
    pub fn record_request_start(&self, id: ConnectionId) {
        let became_busy = {
            let mut connections = self.lock();
            let Some(record) = connections.get_mut(&id) else {
                debug!(
                    target: REGISTRY_TARGET,
                    connection = %id,
                    "request start for unknown connection"
                );
                return;
            };
            let was_idle = record.is_idle();
            record.total_requests += 1;
            record.active_requests += 1;
            record.last_request_at = Some(Instant::now());
            was_idle
        };
        if became_busy {
            self.metrics.idle_connections_changed(-1);
        }
    }

    /// Accounts for a response completing on `id`. Unknown ids, and
    /// connections with nothing in flight, are ignored.
    pub fn record_request_end(&self, id: ConnectionId) {
        let became_idle = {
            let mut connections = self.lock();
            let Some(record) = connections.get_mut(&id) else {
                debug!(
                    target: REGISTRY_TARGET,
                    connection = %id,
                    "request end for unknown connection"
                );
                return;
            };
            if record.active_requests == 0 {
                debug!(
                    target: REGISTRY_TARGET,
                    connection = %id,
                    "request end without a matching start"
                );
                return;
            }
            record.total_responses += 1;
            record.active_requests -= 1;
            record.last_response_at = Some(Instant::now());
            record.is_idle()
        };
        if became_idle {
            self.metrics.idle_connections_changed(1);
        }
    }

    /// Stops tracking `id`, returning its final record. A second call
    /// returns `None`.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.lock().remove(&id)?;
        let now = Instant::now();
        self.metrics.connection_closed();
        if record.is_idle() {
            self.metrics.idle_connections_changed(-1);
        }
        self.metrics.observe_idle_duration(record.idle_duration(now));
        debug!(
            target: REGISTRY_TARGET,
            connection = %id,
            lifetime_ms = record.age(now).as_millis(),
            requests = record.total_requests,
            "connection removed"
        );
        Some(record)
    }

    /// Active request counts for every registered connection, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionActivity> {
        let mut activity: Vec<_> = self
            .lock()
            .values()
            .map(|record| ConnectionActivity {
                id: record.id,
                active_requests: record.active_requests,
            })
            .collect();
        activity.sort_unstable_by_key(|entry| entry.id);
        activity
    }

    /// Runs `action` on every idle connection while holding the registry
    /// lock, so no request can start between the idleness check and the
    /// action. Returns how many calls reported success.
    ///
    /// `action` must not call back into the registry.
    pub fn for_each_idle(&self, mut action: impl FnMut(ConnectionId) -> bool) -> usize {
        let connections = self.lock();
        let mut idle: Vec<_> = connections
            .values()
            .filter(|record| record.is_idle())
            .map(|record| record.id)
            .collect();
        idle.sort_unstable();
        idle.into_iter().filter(|id| action(*id)).count()
    }

    /// Copy of the record for `id`, if it is registered.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.lock().get(&id).cloned()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ConnectionMetrics;
    use rstest::{fixture, rstest};

    fn id(raw: u64) -> ConnectionId {
        ConnectionId::new(raw)
    }

    struct Fixture {
        registry: ConnectionRegistry,
        metrics: Arc<ConnectionMetrics>,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let metrics = Arc::new(ConnectionMetrics::new());
        Fixture {
            registry: ConnectionRegistry::new(metrics.clone()),
            metrics,
        }
    }

    fn assert_invariants(record: &ConnectionRecord) {
        assert!(record.total_responses <= record.total_requests);
        assert_eq!(
            record.active_requests,
            record.total_requests - record.total_responses
        );
    }

    #[rstest]
    fn registered_connections_start_idle(fixture: Fixture) {
        fixture
            .registry
            .register_connection(id(1))
            .expect("first registration");
        let record = fixture.registry.get(id(1)).expect("record");
        assert_eq!(record.total_requests, 0);
        assert_eq!(record.active_requests, 0);
        assert!(record.last_request_at.is_none());
        assert_eq!(fixture.metrics.snapshot().idle, 1);
    }

    #[rstest]
    fn duplicate_registration_overwrites(fixture: Fixture) {
        let registry = &fixture.registry;
        registry.register_connection(id(7)).expect("register");
        registry.record_request_start(id(7));
        let error = registry
            .register_connection(id(7))
            .expect_err("duplicate should be reported");
        assert_eq!(error, RegistryError::DuplicateConnection { id: id(7) });
        let record = registry.get(id(7)).expect("record");
        assert_eq!(record.total_requests, 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(fixture.metrics.snapshot().idle, 1);
    }

    #[rstest]
    fn request_lifecycle_updates_counters(fixture: Fixture) {
        let registry = &fixture.registry;
        registry.register_connection(id(1)).expect("register");
        registry.record_request_start(id(1));
        let busy = registry.get(id(1)).expect("record");
        assert_eq!(busy.active_requests, 1);
        assert!(busy.last_request_at.is_some());
        assert_eq!(fixture.metrics.snapshot().idle, 0);

        registry.record_request_end(id(1));
        let idle = registry.get(id(1)).expect("record");
        assert_eq!(idle.total_requests, 1);
        assert_eq!(idle.total_responses, 1);
        assert_eq!(idle.active_requests, 0);
        assert!(idle.last_response_at.is_some());
        assert_eq!(fixture.metrics.snapshot().idle, 1);
    }

    #[rstest]
    #[case::balanced(&[true, false, true, false])]
    #[case::pipelined(&[true, true, true, false, false, false])]
    #[case::stray_ends(&[false, false, true, false, false])]
    #[case::unfinished(&[true, true, false])]
    fn invariants_hold_for_any_event_sequence(fixture: Fixture, #[case] events: &[bool]) {
        let registry = &fixture.registry;
        registry.register_connection(id(3)).expect("register");
        for start in events {
            if *start {
                registry.record_request_start(id(3));
            } else {
                registry.record_request_end(id(3));
            }
            assert_invariants(&registry.get(id(3)).expect("record"));
        }
    }

    #[rstest]
    fn unknown_connections_are_ignored(fixture: Fixture) {
        let registry = &fixture.registry;
        registry.record_request_start(id(9));
        registry.record_request_end(id(9));
        assert!(registry.is_empty());
        assert!(registry.remove_connection(id(9)).is_none());
        assert_eq!(fixture.metrics.snapshot(), ConnectionMetrics::new().snapshot());
    }

    #[rstest]
    fn removal_is_idempotent_and_observes_idle_time(fixture: Fixture) {
        let registry = &fixture.registry;
        registry.register_connection(id(2)).expect("register");
        let removed = registry.remove_connection(id(2)).expect("first removal");
        assert_eq!(removed.id, id(2));
        assert!(registry.remove_connection(id(2)).is_none());

        let snapshot = fixture.metrics.snapshot();
        assert_eq!(snapshot.opened, 1);
        assert_eq!(snapshot.closed, 1);
        assert_eq!(snapshot.idle, 0);
        assert_eq!(snapshot.idle_duration_count(), 1);
        assert_eq!(snapshot.idle_duration_buckets[0], 1);
    }

    #[rstest]
    fn age_counts_from_registration(fixture: Fixture) {
        let before = Instant::now();
        fixture.registry.register_connection(id(5)).expect("register");
        let record = fixture.registry.get(id(5)).expect("record");
        assert!(record.opened_at >= before);

        let later = record.opened_at + Duration::from_secs(3);
        assert_eq!(record.age(later), Duration::from_secs(3));
        assert_eq!(record.age(before), Duration::ZERO);
    }

    #[rstest]
    fn removing_busy_connection_keeps_idle_gauge_balanced(fixture: Fixture) {
        let registry = &fixture.registry;
        registry.register_connection(id(4)).expect("register");
        registry.record_request_start(id(4));
        registry.remove_connection(id(4)).expect("removal");
        assert_eq!(fixture.metrics.snapshot().idle, 0);
    }

    #[rstest]
    fn snapshot_lists_activity_in_id_order(fixture: Fixture) {
        let registry = &fixture.registry;
        for raw in [3, 1, 2] {
            registry.register_connection(id(raw)).expect("register");
        }
        registry.record_request_start(id(2));
        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot,
            vec![
                ConnectionActivity { id: id(1), active_requests: 0 },
                ConnectionActivity { id: id(2), active_requests: 1 },
                ConnectionActivity { id: id(3), active_requests: 0 },
            ]
        );
    }

    #[rstest]
    fn for_each_idle_skips_busy_connections(fixture: Fixture) {
        let registry = &fixture.registry;
        for raw in [1, 2, 3] {
            registry.register_connection(id(raw)).expect("register");
        }
        registry.record_request_start(id(2));
        let mut visited = Vec::new();
        let succeeded = registry.for_each_idle(|conn| {
            visited.push(conn);
            conn != id(3)
        });
        assert_eq!(visited, vec![id(1), id(3)]);
        assert_eq!(succeeded, 1);
    }

    #[rstest]
    fn concurrent_events_preserve_invariants(fixture: Fixture) {
        let registry = Arc::new(fixture.registry);
        for raw in 0..8 {
            registry.register_connection(id(raw)).expect("register");
        }
        let workers: Vec<_> = (0..8)
            .map(|raw| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        registry.record_request_start(id(raw));
                        registry.record_request_end(id(raw));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }
        for entry in registry.snapshot() {
            assert_eq!(entry.active_requests, 0);
            let record = registry.get(entry.id).expect("record");
            assert_eq!(record.total_requests, 200);
            assert_invariants(&record);
        }
        assert_eq!(fixture.metrics.snapshot().idle, 8);
    }
}
