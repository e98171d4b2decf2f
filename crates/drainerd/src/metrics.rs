//! Connection-lifecycle metrics.
//!
//! The registry reports every lifecycle transition to a [`MetricsSink`].
//! [`RecorderMetrics`] forwards to whichever `metrics` recorder the process
//! installs; exporter wiring lives outside this crate. [`ConnectionMetrics`]
//! keeps the values in memory so the daemon can log a summary and tests can
//! assert on them.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Counter of accepted connections.
pub const SOCKET_OPENED_TOTAL: &str = "drainerd_socket_opened_count_total";
/// Counter of closed connections.
pub const SOCKET_CLOSED_TOTAL: &str = "drainerd_socket_closed_count_total";
/// Gauge of connections with no request in flight.
pub const IDLE_SOCKET_COUNT: &str = "drainerd_idle_socket_count";
/// Histogram of seconds from the last response to the connection closing.
pub const IDLE_DURATION_UNTIL_CLOSED: &str = "drainerd_idle_duration_until_socket_closed";

/// Upper bounds, in seconds, of the idle-duration histogram buckets.
pub const IDLE_DURATION_BUCKETS: [u64; 11] = [0, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024];

/// Receives connection-lifecycle observations.
pub trait MetricsSink: Send + Sync {
    /// A connection was accepted.
    fn connection_opened(&self);

    /// A connection was closed.
    fn connection_closed(&self);

    /// Adjusts the number of connections with no request in flight.
    fn idle_connections_changed(&self, delta: i64);

    /// Records how long a connection sat idle after its last response before
    /// it closed.
    fn observe_idle_duration(&self, idle: Duration);
}

impl<T> MetricsSink for Arc<T>
where
    T: MetricsSink + ?Sized,
{
    fn connection_opened(&self) {
        (**self).connection_opened();
    }

    fn connection_closed(&self) {
        (**self).connection_closed();
    }

    fn idle_connections_changed(&self, delta: i64) {
        (**self).idle_connections_changed(delta);
    }

    fn observe_idle_duration(&self, idle: Duration) {
        (**self).observe_idle_duration(idle);
    }
}

/// Sink that discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn connection_opened(&self) {}

    fn connection_closed(&self) {}

    fn idle_connections_changed(&self, _delta: i64) {}

    fn observe_idle_duration(&self, _idle: Duration) {}
}

impl<A, B> MetricsSink for (A, B)
where
    A: MetricsSink,
    B: MetricsSink,
{
    fn connection_opened(&self) {
        self.0.connection_opened();
        self.1.connection_opened();
    }

    fn connection_closed(&self) {
        self.0.connection_closed();
        self.1.connection_closed();
    }

    fn idle_connections_changed(&self, delta: i64) {
        self.0.idle_connections_changed(delta);
        self.1.idle_connections_changed(delta);
    }

    fn observe_idle_duration(&self, idle: Duration) {
        self.0.observe_idle_duration(idle);
        self.1.observe_idle_duration(idle);
    }
}

/// Registers descriptions for every series [`RecorderMetrics`] emits with
/// the installed recorder. Repeated calls are harmless.
pub fn describe_metrics() {
    describe_counter!(SOCKET_OPENED_TOTAL, "Increases on new TCP socket connection.");
    describe_counter!(SOCKET_CLOSED_TOTAL, "Increases on TCP socket disconnect.");
    describe_gauge!(IDLE_SOCKET_COUNT, "Total idle TCP sockets.");
    describe_histogram!(
        IDLE_DURATION_UNTIL_CLOSED,
        metrics::Unit::Seconds,
        "Time from the last response to the socket being closed."
    );
}

/// Sink that forwards to the process-wide `metrics` recorder.
///
/// Histogram buckets are an exporter concern; exporters should use
/// [`IDLE_DURATION_BUCKETS`] for [`IDLE_DURATION_UNTIL_CLOSED`].
#[derive(Debug, Clone, Copy)]
pub struct RecorderMetrics;

impl RecorderMetrics {
    /// Describes the exported series and returns the sink.
    #[must_use]
    pub fn new() -> Self {
        describe_metrics();
        Self
    }
}

impl Default for RecorderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for RecorderMetrics {
    fn connection_opened(&self) {
        counter!(SOCKET_OPENED_TOTAL).increment(1);
    }

    fn connection_closed(&self) {
        counter!(SOCKET_CLOSED_TOTAL).increment(1);
    }

    fn idle_connections_changed(&self, delta: i64) {
        let step = f64::from(u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX));
        let idle = gauge!(IDLE_SOCKET_COUNT);
        if delta < 0 {
            idle.decrement(step);
        } else {
            idle.increment(step);
        }
    }

    fn observe_idle_duration(&self, idle: Duration) {
        histogram!(IDLE_DURATION_UNTIL_CLOSED).record(idle.as_secs_f64());
    }
}

/// In-memory counters, gauge and histogram.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    opened: AtomicU64,
    closed: AtomicU64,
    idle: AtomicI64,
    buckets: [AtomicU64; IDLE_DURATION_BUCKETS.len()],
    overflow: AtomicU64,
    idle_millis_sum: AtomicU64,
}

/// Point-in-time copy of [`ConnectionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Connections accepted.
    pub opened: u64,
    /// Connections closed.
    pub closed: u64,
    /// Connections currently idle.
    pub idle: i64,
    /// Observations per bucket of [`IDLE_DURATION_BUCKETS`]; non-cumulative.
    pub idle_duration_buckets: Vec<u64>,
    /// Observations above the last bucket bound.
    pub idle_duration_overflow: u64,
    /// Sum of all observed idle durations.
    pub idle_duration_sum: Duration,
}

impl MetricsSnapshot {
    /// Total number of idle-duration observations.
    #[must_use]
    pub fn idle_duration_count(&self) -> u64 {
        self.idle_duration_buckets.iter().sum::<u64>() + self.idle_duration_overflow
    }
}

impl ConnectionMetrics {
    /// Builds an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            idle_duration_buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            idle_duration_overflow: self.overflow.load(Ordering::Relaxed),
            idle_duration_sum: Duration::from_millis(self.idle_millis_sum.load(Ordering::Relaxed)),
        }
    }
}

impl MetricsSink for ConnectionMetrics {
    fn connection_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    fn idle_connections_changed(&self, delta: i64) {
        self.idle.fetch_add(delta, Ordering::Relaxed);
    }

    fn observe_idle_duration(&self, idle: Duration) {
        let seconds = idle.as_secs();
        let slot = IDLE_DURATION_BUCKETS
            .iter()
            .position(|bound| seconds <= *bound)
            .and_then(|index| self.buckets.get(index));
        match slot {
            Some(bucket) => bucket.fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
        let millis = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        self.idle_millis_sum.fetch_add(millis, Ordering::Relaxed);
    }
}
