//! Muninn error types

use std::time::Duration;

/// Muninn error types.
///
/// Variants map onto the caller-visible `error_kind` taxonomy: caller
/// errors are never retried, transient backend errors are retried up to
/// the configured attempt cap, permanent backend errors surface
/// immediately, and admission rejection carries a retry hint instead of
/// queueing past the bound.
///
/// `Clone` is required so one terminal failure can resolve every caller
/// coalesced onto the same in-flight computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MuninnError {
    // Caller errors — rejected before fingerprinting, never retried
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    // Admission rejection — queue at capacity, caller retries later
    #[error("router overloaded, retry after {retry_after:?}")]
    Overloaded { retry_after: Duration },

    // Transient backend errors
    #[error("backend call timed out after {timeout:?}")]
    BackendTimeout { timeout: Duration },

    #[error("backend connection failed: {0}")]
    Connection(String),

    #[error("backend busy, retry after {retry_after:?}")]
    BackendBusy { retry_after: Option<Duration> },

    #[error("backend unavailable ({status}): {message}")]
    BackendUnavailable { status: u16, message: String },

    // Permanent backend errors
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    // Caller deadline elapsed while waiting; detaches this caller only,
    // the shared computation keeps running
    #[error("caller deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },

    // Retrieval failure — internal to the augmenter, degraded and never
    // surfaced as a request failure
    #[error("context index error: {0}")]
    Index(String),

    // Lifecycle
    #[error("router is shutting down")]
    ShuttingDown,

    /// The in-flight computation was dropped before producing a result.
    #[error("in-flight computation aborted")]
    Aborted,

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MuninnError {
    /// Whether this error is worth retrying through the admission gate.
    ///
    /// Covers backend timeouts, connection failures and backend-reported
    /// overload. Admission rejection is deliberately *not* transient —
    /// the caller is expected to back off, the router never re-queues
    /// internally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MuninnError::BackendTimeout { .. }
                | MuninnError::Connection(_)
                | MuninnError::BackendBusy { .. }
                | MuninnError::BackendUnavailable { .. }
        )
    }

    /// Extract a suggested retry delay, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MuninnError::Overloaded { retry_after } => Some(*retry_after),
            MuninnError::BackendBusy { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable snake_case kind string for the caller-facing `error_kind`
    /// field. Calling services branch on this to decide between a retry
    /// affordance and a hard failure.
    pub fn kind(&self) -> &'static str {
        match self {
            MuninnError::InvalidRequest(_) => "invalid_request",
            MuninnError::UnknownTemplate(_) => "unknown_template",
            MuninnError::Overloaded { .. } => "overloaded",
            MuninnError::BackendTimeout { .. } => "backend_timeout",
            MuninnError::Connection(_) => "connection",
            MuninnError::BackendBusy { .. } => "backend_busy",
            MuninnError::BackendUnavailable { .. } => "backend_unavailable",
            MuninnError::Rejected { .. } => "backend_rejected",
            MuninnError::DeadlineExceeded { .. } => "deadline_exceeded",
            MuninnError::Index(_) => "index_unavailable",
            MuninnError::ShuttingDown => "shutting_down",
            MuninnError::Aborted => "aborted",
            MuninnError::Configuration(_) => "configuration",
        }
    }

    /// Whether this error originated from the caller's own request
    /// (malformed input, unknown template). Caller errors are never
    /// retried and never cached.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MuninnError::InvalidRequest(_) | MuninnError::UnknownTemplate(_)
        )
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
