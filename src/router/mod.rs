//! The request router.
//!
//! [`Router`] wires the pipeline together: validate → render template →
//! best-effort retrieval → fingerprint → cache/coalesce → admission →
//! dispatch → retry → cache write. It is an explicitly constructed
//! service object (see [`Muninn::builder`](crate::Muninn::builder)),
//! passed by reference to callers; there is no ambient global instance.
//!
//! Cache-missing computations run in a spawned task and are shared by
//! every caller with the same fingerprint. A caller whose deadline
//! elapses detaches from its wait point; the computation keeps running
//! and its result still lands in the cache for later arrivals.

mod builder;

pub use builder::{Muninn, MuninnBuilder};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::admission::AdmissionController;
use crate::cache::{CacheStore, FlightGuard, Lookup, SharedFlight};
use crate::config::RouterConfig;
use crate::dispatch::Dispatcher;
use crate::fingerprint::fingerprint;
use crate::retrieval::Augmenter;
use crate::retry::RetryConfig;
use crate::telemetry::{self, MetricsSnapshot, RouterMetrics};
use crate::types::{CacheOutcome, Priority, RouteRequest, RouteResponse, TemplateRegistry};
use crate::{MuninnError, Result};

pub(crate) struct RouterInner {
    pub(crate) config: RouterConfig,
    pub(crate) templates: TemplateRegistry,
    pub(crate) cache: CacheStore,
    pub(crate) admission: AdmissionController,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) augmenter: Augmenter,
    pub(crate) retry: RetryConfig,
    pub(crate) metrics: RouterMetrics,
    pub(crate) closed: AtomicBool,
}

/// Request router in front of a shared inference backend.
///
/// Cheap to clone; clones share all state. Construct via
/// [`Muninn::builder`](crate::Muninn::builder).
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub(crate) fn new(inner: RouterInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Route one request through the pipeline.
    ///
    /// Returns the payload and how it was obtained (cache hit, fresh
    /// dispatch, or coalesced onto another caller's computation).
    /// Errors carry a stable [`kind()`](MuninnError::kind) so calling
    /// services can distinguish backpressure from hard failures.
    #[instrument(
        skip(self, request),
        fields(
            caller = %request.caller,
            template = %request.template_id,
            priority = %request.priority,
        )
    )]
    pub async fn route(&self, request: RouteRequest) -> Result<RouteResponse> {
        let start = Instant::now();
        let outcome = self.route_inner(request).await;
        self.record_terminal(&outcome, start);
        outcome
    }

    async fn route_inner(&self, request: RouteRequest) -> Result<RouteResponse> {
        request.validate()?;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(MuninnError::ShuttingDown);
        }

        let prompt = self
            .inner
            .templates
            .render(&request.template_id, &request.parameters)?;

        // Retrieval runs before fingerprinting so the retrieved-context
        // ids are part of the request identity: a changed index produces
        // a miss, not a stale answer. Best-effort and bounded — a dead
        // index degrades to the bare prompt.
        let augmented = self.inner.augmenter.augment(prompt).await;
        if augmented.degraded {
            RouterMetrics::incr(&self.inner.metrics.retrieval_degraded);
        }

        let key = fingerprint(
            &request.template_id,
            &request.parameters,
            &augmented.context_ids,
        );

        let (flight, outcome) = match self.inner.cache.lookup_or_begin(key) {
            Lookup::Hit(payload) => {
                RouterMetrics::incr(&self.inner.metrics.cache_hits);
                return Ok(RouteResponse {
                    payload,
                    cache: CacheOutcome::Hit,
                });
            }
            Lookup::InFlight(flight) => {
                RouterMetrics::incr(&self.inner.metrics.coalesced);
                debug!(fingerprint = %key, "coalesced onto in-flight computation");
                (flight, CacheOutcome::Coalesced)
            }
            Lookup::Miss(guard, flight) => {
                RouterMetrics::incr(&self.inner.metrics.cache_misses);
                self.spawn_flight(request.priority, augmented.prompt, guard);
                (flight, CacheOutcome::Miss)
            }
        };

        self.await_flight(flight, outcome, &request).await
    }

    /// Wait for the shared computation under this caller's deadline.
    ///
    /// An elapsed deadline detaches only this caller; the flight keeps
    /// running for everyone else and for the cache.
    async fn await_flight(
        &self,
        flight: SharedFlight,
        outcome: CacheOutcome,
        request: &RouteRequest,
    ) -> Result<RouteResponse> {
        match tokio::time::timeout(request.timeout, flight).await {
            Ok(Ok(payload)) => Ok(RouteResponse {
                payload,
                cache: outcome,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MuninnError::DeadlineExceeded {
                timeout: request.timeout,
            }),
        }
    }

    /// Run the compute pipeline for a cache-miss episode in its own
    /// task, so no single caller's cancellation can kill it.
    fn spawn_flight(&self, priority: Priority, prompt: String, guard: FlightGuard) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match inner.execute(priority, &prompt).await {
                Ok(payload) => inner.cache.complete(guard, payload),
                Err(e) => inner.cache.fail(guard, e),
            }
        });
    }

    fn record_terminal(&self, outcome: &Result<RouteResponse>, start: Instant) {
        RouterMetrics::incr(&self.inner.metrics.requests);
        let status = match outcome {
            Ok(_) => "ok",
            Err(e) => {
                RouterMetrics::incr(&self.inner.metrics.errors);
                if matches!(e, MuninnError::Overloaded { .. }) {
                    RouterMetrics::incr(&self.inner.metrics.overloaded);
                }
                metrics::counter!(telemetry::ERRORS_TOTAL, "kind" => e.kind()).increment(1);
                "error"
            }
        };
        metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => status).increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "status" => status)
            .record(start.elapsed().as_secs_f64());
    }

    /// The configuration this router was built with.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Point-in-time counters and gauges for pull-based monitoring.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(
            self.inner.admission.queue_depth(),
            self.inner.admission.available_slots(),
            self.inner.cache.inflight_count(),
            self.inner.cache.entry_count(),
        )
    }

    /// Stop accepting work: new routes and queued admissions resolve
    /// with [`MuninnError::ShuttingDown`]. Dispatches already holding a
    /// slot run to completion.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.admission.close();
    }
}

impl RouterInner {
    /// One cache-miss episode: admit → dispatch, retrying transient
    /// failures with backoff. Each attempt resubmits through the
    /// admission gate, so retries compete for slots like new work.
    async fn execute(&self, priority: Priority, prompt: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            let ticket = self.admission.admit(priority).await?;
            match self.dispatcher.dispatch(prompt, ticket).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < self.retry.max_attempts {
                        RouterMetrics::incr(&self.metrics.retries);
                        metrics::counter!(telemetry::RETRIES_TOTAL).increment(1);
                        let delay = self.retry.effective_delay(attempt, e.retry_after());
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = self.retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after transient error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(MuninnError::Aborted))
    }
}
