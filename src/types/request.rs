//! Inbound request types.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MuninnError, Result};

/// Admission priority class.
///
/// Within a class, requests are served in arrival order; across classes,
/// a free slot always goes to the highest class with a waiter. An
/// already-admitted lower-class request is never preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Latency-sensitive callers (dashboards, interactive forms).
    Interactive,
    /// Default class for service-to-service calls.
    Batch,
    /// Bulk work that can wait behind everything else.
    Background,
}

impl Priority {
    /// Queue index, highest priority first.
    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Interactive => 0,
            Priority::Batch => 1,
            Priority::Background => 2,
        }
    }

    /// Label for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Interactive => "interactive",
            Priority::Batch => "batch",
            Priority::Background => "background",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inference request from a calling service.
///
/// Parameters are kept in a `BTreeMap` so the mapping is canonically
/// ordered before fingerprinting — two requests that set the same
/// parameters in a different order are the same request.
///
/// ```rust
/// # use muninn::{RouteRequest, Priority};
/// # use std::time::Duration;
/// let request = RouteRequest::new("crawler", "seo_summary")
///     .parameter("domain", "example.com")
///     .priority(Priority::Interactive)
///     .timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Calling service identity, for logs and telemetry.
    pub caller: String,

    /// Prompt template reference, resolved by the router's registry.
    pub template_id: String,

    /// Resolved template parameters, canonically ordered.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Admission priority class.
    #[serde(default = "default_priority")]
    pub priority: Priority,

    /// Overall caller deadline, covering queueing, dispatch and retries.
    /// Elapsing detaches this caller; a shared computation keeps running.
    #[serde(default = "default_timeout", with = "timeout_ms", rename = "timeout_ms")]
    pub timeout: Duration,
}

fn default_priority() -> Priority {
    Priority::Batch
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl RouteRequest {
    /// Create a request for the given caller and template.
    pub fn new(caller: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            template_id: template_id.into(),
            parameters: BTreeMap::new(),
            priority: default_priority(),
            timeout: default_timeout(),
        }
    }

    /// Set one template parameter.
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the priority class.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the overall caller deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject malformed requests before they reach the fingerprinter.
    ///
    /// Caller errors — never retried, never cached.
    pub fn validate(&self) -> Result<()> {
        if self.template_id.is_empty() {
            return Err(MuninnError::InvalidRequest(
                "missing template_id".to_string(),
            ));
        }
        if self.caller.is_empty() {
            return Err(MuninnError::InvalidRequest("missing caller".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(MuninnError::InvalidRequest(
                "timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod timeout_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
