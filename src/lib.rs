//! Muninn - coalescing request router for shared LLM inference backends
//!
//! Every service that needs inference from a shared, slot-bounded
//! model-serving backend routes through one `Router`: requests are
//! fingerprinted, identical concurrent requests share a single backend
//! call, completed responses are cached with a TTL, prompts are
//! enriched from a context index before dispatch, and a priority-aware
//! admission gate keeps concurrent backend work within the backend's
//! parallel capacity — rejecting loudly, with a retry hint, instead of
//! queueing without bound.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use muninn::{Muninn, HttpBackend, RouteRequest, RouterConfig, Priority};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let router = Muninn::builder()
//!         .config(RouterConfig::from_env()?)
//!         .backend(Arc::new(HttpBackend::new("http://llm:8080")))
//!         .template("seo_summary", "Summarize the SEO posture of {domain}.")
//!         .build()?;
//!
//!     let response = router.route(
//!         RouteRequest::new("audit-service", "seo_summary")
//!             .parameter("domain", "example.com")
//!             .priority(Priority::Interactive),
//!     ).await?;
//!
//!     println!("{} ({:?})", response.payload, response.cache);
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - At most one backend computation per fingerprint is in flight at a
//!   time; concurrent identical requests coalesce onto it.
//! - Concurrent dispatches never exceed the configured slot count, and
//!   the admission queue never grows past its bound.
//! - Failed computations are never cached; cached responses are never
//!   served past their TTL.
//! - A caller's deadline detaches that caller only — shared
//!   computations run to completion for everyone else.

pub mod admission;
pub mod backend;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod retrieval;
pub mod retry;
pub mod router;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use backend::{GenerateParams, HttpBackend, InferenceBackend};
pub use config::RouterConfig;
pub use error::{MuninnError, Result};
pub use fingerprint::{Fingerprint, fingerprint};
pub use retrieval::{ContextIndex, Passage};
pub use retry::RetryConfig;
pub use router::{Muninn, MuninnBuilder, Router};
pub use telemetry::MetricsSnapshot;
pub use types::{CacheOutcome, Priority, RouteRequest, RouteResponse, TemplateRegistry};
