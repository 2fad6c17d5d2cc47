//! Response types returned to calling services.

use serde::{Deserialize, Serialize};

/// How the response payload was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    /// Served from a completed cache entry; no backend work.
    Hit,
    /// First caller of this fingerprint episode; one backend dispatch ran.
    Miss,
    /// Attached to a computation another caller already started.
    Coalesced,
}

impl CacheOutcome {
    /// Label for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Coalesced => "coalesced",
        }
    }
}

/// A successful routing outcome.
///
/// Errors are carried by [`MuninnError`](crate::MuninnError), whose
/// [`kind()`](crate::MuninnError::kind) supplies the wire-level
/// `error_kind` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResponse {
    /// Generated text from the backend (or the cache).
    pub payload: String,

    /// Whether this payload came from the cache, a fresh dispatch, or a
    /// coalesced in-flight computation.
    pub cache: CacheOutcome,
}
