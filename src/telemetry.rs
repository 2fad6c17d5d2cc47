//! Telemetry metric name constants and the pull-based snapshot.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops. Recording is
//! side-effect-only and can never fail a request.
//!
//! For monitoring setups without a recorder, [`RouterMetrics`] keeps the
//! same counters in process-local atomics and
//! [`Router::metrics()`](crate::Router::metrics) exposes them as an
//! immutable [`MetricsSnapshot`].
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `stage` — pipeline stage: "retrieval", "queue_wait", "dispatch"
//! - `status` — outcome: "ok" or "error"
//! - `kind` — error kind (see [`MuninnError::kind`](crate::MuninnError::kind))
//! - `priority` — admission class: "interactive", "batch", "background"

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Total requests routed, terminal outcomes only.
///
/// Labels: `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "muninn_requests_total";

/// End-to-end request duration in seconds, as observed by the caller.
///
/// Labels: `status`.
pub const REQUEST_DURATION_SECONDS: &str = "muninn_request_duration_seconds";

/// Per-stage latency in seconds.
///
/// Labels: `stage` ("retrieval" | "queue_wait" | "dispatch").
pub const STAGE_DURATION_SECONDS: &str = "muninn_stage_duration_seconds";

/// Total cache hits on completed entries.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total cache misses (first caller of a fingerprint episode).
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total callers coalesced onto an already in-flight computation.
pub const COALESCED_TOTAL: &str = "muninn_coalesced_total";

/// Total retry attempts (not counting the initial dispatch).
pub const RETRIES_TOTAL: &str = "muninn_retries_total";

/// Total admissions rejected with a backpressure signal.
///
/// Labels: `priority`.
pub const OVERLOADED_TOTAL: &str = "muninn_overloaded_total";

/// Total terminal errors surfaced to callers.
///
/// Labels: `kind`.
pub const ERRORS_TOTAL: &str = "muninn_errors_total";

/// Total retrieval attempts that degraded to an unaugmented prompt.
pub const RETRIEVAL_DEGRADED_TOTAL: &str = "muninn_retrieval_degraded_total";

/// Current depth of the admission queue.
pub const QUEUE_DEPTH: &str = "muninn_queue_depth";

/// Backend dispatches currently in flight.
pub const INFLIGHT_DISPATCHES: &str = "muninn_inflight_dispatches";

/// Process-local router counters.
///
/// Owned by the [`Router`](crate::Router); incremented alongside the
/// `metrics` facade emissions so a snapshot is available even when no
/// recorder is installed. All operations are relaxed atomics — telemetry
/// never blocks a request path.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub(crate) requests: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) coalesced: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) overloaded: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) retrieval_degraded: AtomicU64,
}

impl RouterMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of router counters and gauges.
///
/// Immutable once taken; suitable for a pull-based monitoring endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Terminal request outcomes observed so far.
    pub requests_total: u64,
    /// Lookups served from a completed cache entry.
    pub cache_hits_total: u64,
    /// Lookups that began a new computation.
    pub cache_misses_total: u64,
    /// Callers attached to an already running computation.
    pub coalesced_total: u64,
    /// Retry attempts beyond the initial dispatch.
    pub retries_total: u64,
    /// Admissions rejected with a backpressure signal.
    pub overloaded_total: u64,
    /// Terminal errors surfaced to callers.
    pub errors_total: u64,
    /// Retrievals that degraded to an unaugmented prompt.
    pub retrieval_degraded_total: u64,
    /// Requests currently waiting in the admission queue.
    pub queue_depth: u64,
    /// Generation slots currently free.
    pub available_slots: u64,
    /// Distinct fingerprints with a computation in flight.
    pub inflight_fingerprints: u64,
    /// Completed entries currently cached.
    pub cached_entries: u64,
}

impl RouterMetrics {
    /// Fold the atomic counters into a snapshot; the caller supplies the
    /// gauges read from the owning components.
    pub(crate) fn snapshot(
        &self,
        queue_depth: u64,
        available_slots: u64,
        inflight_fingerprints: u64,
        cached_entries: u64,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests.load(Ordering::Relaxed),
            cache_hits_total: self.cache_hits.load(Ordering::Relaxed),
            cache_misses_total: self.cache_misses.load(Ordering::Relaxed),
            coalesced_total: self.coalesced.load(Ordering::Relaxed),
            retries_total: self.retries.load(Ordering::Relaxed),
            overloaded_total: self.overloaded.load(Ordering::Relaxed),
            errors_total: self.errors.load(Ordering::Relaxed),
            retrieval_degraded_total: self.retrieval_degraded.load(Ordering::Relaxed),
            queue_depth,
            available_slots,
            inflight_fingerprints,
            cached_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let m = RouterMetrics::new();
        RouterMetrics::incr(&m.requests);
        RouterMetrics::incr(&m.requests);
        RouterMetrics::incr(&m.cache_hits);

        let snap = m.snapshot(3, 2, 1, 7);
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.cache_hits_total, 1);
        assert_eq!(snap.cache_misses_total, 0);
        assert_eq!(snap.queue_depth, 3);
        assert_eq!(snap.available_slots, 2);
        assert_eq!(snap.inflight_fingerprints, 1);
        assert_eq!(snap.cached_entries, 7);
    }

    #[test]
    fn snapshot_is_immutable_copy() {
        let m = RouterMetrics::new();
        let before = m.snapshot(0, 0, 0, 0);
        RouterMetrics::incr(&m.requests);
        let after = m.snapshot(0, 0, 0, 0);
        assert_eq!(before.requests_total, 0);
        assert_eq!(after.requests_total, 1);
    }
}
