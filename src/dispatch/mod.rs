//! Backend dispatch with per-call timeout.
//!
//! The dispatcher owns the actual backend call. Every dispatch is
//! bounded by the configured per-call timeout — distinct from the
//! caller's overall deadline, which has already absorbed queueing time.
//! An elapsed timeout abandons the call and classifies it transient.
//!
//! The admitted [`SlotTicket`] moves into `dispatch`, so the slot is
//! released exactly once when the ticket drops — on success, failure
//! and timeout alike.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::admission::SlotTicket;
use crate::backend::{GenerateParams, InferenceBackend};
use crate::telemetry;
use crate::{MuninnError, Result};

/// Classified outcome of one backend dispatch.
pub type DispatchResult = Result<String>;

/// Owns the call into the inference backend.
pub struct Dispatcher {
    backend: Arc<dyn InferenceBackend>,
    params: GenerateParams,
    timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over `backend` with a per-call `timeout`.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        params: GenerateParams,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            params,
            timeout,
        }
    }

    /// Run one generation while holding `ticket`.
    ///
    /// The ticket is consumed and dropped on every path, which releases
    /// the slot exactly once. On timeout the underlying call is dropped
    /// — the backend may keep computing, the router considers the
    /// attempt abandoned and transient.
    pub async fn dispatch(&self, prompt: &str, ticket: SlotTicket) -> DispatchResult {
        let _slot = ticket;
        let start = Instant::now();
        metrics::gauge!(telemetry::INFLIGHT_DISPATCHES).increment(1.0);

        let result = match tokio::time::timeout(
            self.timeout,
            self.backend.generate(prompt, &self.params),
        )
        .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MuninnError::BackendTimeout {
                timeout: self.timeout,
            }),
        };

        metrics::gauge!(telemetry::INFLIGHT_DISPATCHES).decrement(1.0);
        let elapsed = start.elapsed();
        metrics::histogram!(telemetry::STAGE_DURATION_SECONDS, "stage" => "dispatch")
            .record(elapsed.as_secs_f64());
        debug!(
            backend = self.backend.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            ok = result.is_ok(),
            "dispatch finished"
        );
        result
    }
}
