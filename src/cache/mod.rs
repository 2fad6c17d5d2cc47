//! Response cache with single-flight request coalescing.
//!
//! [`CacheStore`] owns two structures: a moka cache of completed
//! entries (TTL + capacity bounded, expired entries evicted lazily on
//! lookup) and a map of fingerprint → in-flight computation. The
//! in-flight map is the serialization point for the router's most
//! important invariant: at most one backend computation per fingerprint
//! is ever running. [`lookup_or_begin`](CacheStore::lookup_or_begin)
//! checks the cache and registers a placeholder in one indivisible
//! step — the first caller of an episode gets [`Lookup::Miss`] and the
//! obligation to compute; every concurrent caller gets
//! [`Lookup::InFlight`] and attaches to the same [`Shared`] future.
//!
//! Failures resolve all waiters but are never written to the cache, so
//! the next arrival after a failure starts a fresh episode.
//!
//! # Future extensibility: shared/distributed caching
//!
//! Completed entries are keyed by a SHA-256 content fingerprint that is
//! stable across processes, so a redis-backed store for multiple router
//! instances can reuse the key scheme unchanged; only the moka cache
//! would move behind a trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use moka::sync::Cache;
use tokio::sync::oneshot;
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::telemetry;
use crate::{MuninnError, Result};

/// Terminal outcome of one in-flight computation, delivered to every
/// coalesced waiter.
pub type FlightResult = Result<String>;

/// Handle to a computation in progress. Cloning attaches another
/// waiter; the result is cached inside the future once resolved, so
/// late clones complete immediately.
pub type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

type InFlightMap = Arc<Mutex<HashMap<Fingerprint, SharedFlight>>>;

/// A completed response retained until its TTL elapses.
#[derive(Debug)]
pub struct CacheEntry {
    payload: String,
    created_at: Instant,
    hits: AtomicU64,
}

impl CacheEntry {
    fn new(payload: String) -> Self {
        Self {
            payload,
            created_at: Instant::now(),
            hits: AtomicU64::new(0),
        }
    }

    /// Times this entry has been served.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Time since the entry was written.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Outcome of an atomic cache lookup.
pub enum Lookup {
    /// A completed entry within its TTL; no backend work needed.
    Hit(String),
    /// Another caller is computing this fingerprint; await the flight.
    InFlight(SharedFlight),
    /// First caller of this episode. The guard must be handed back via
    /// [`CacheStore::complete`] or [`CacheStore::fail`]; the flight is
    /// what this caller awaits, same as everyone who coalesces later.
    Miss(FlightGuard, SharedFlight),
}

/// Obligation to resolve an in-flight computation.
///
/// Held by the task computing a fingerprint episode. Dropping the guard
/// without resolving (e.g. the task panicked) removes the placeholder
/// and aborts the waiters instead of wedging them.
pub struct FlightGuard {
    fingerprint: Fingerprint,
    tx: Option<oneshot::Sender<FlightResult>>,
    inflight: InFlightMap,
}

impl FlightGuard {
    /// Fingerprint this guard is responsible for.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn resolve(mut self, result: FlightResult) {
        lock(&self.inflight).remove(&self.fingerprint);
        if let Some(tx) = self.tx.take() {
            // All waiters may have detached already; nothing to deliver to.
            let _ = tx.send(result);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            lock(&self.inflight).remove(&self.fingerprint);
            // tx drops here; waiters observe RecvError and map it to Aborted.
        }
    }
}

/// Cache of completed responses plus the in-flight coalescing map.
pub struct CacheStore {
    entries: Cache<Fingerprint, Arc<CacheEntry>>,
    inflight: InFlightMap,
}

impl CacheStore {
    /// Create a store with the given entry bound and TTL.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self {
            entries,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Atomic check-and-register.
    ///
    /// Exactly one caller per fingerprint episode receives
    /// [`Lookup::Miss`]; the check of both maps and the placeholder
    /// insert happen under one lock, so two concurrent misses for the
    /// same fingerprint can never both begin a computation.
    pub fn lookup_or_begin(&self, fingerprint: Fingerprint) -> Lookup {
        let mut inflight = lock(&self.inflight);
        if let Some(entry) = self.entries.get(&fingerprint) {
            entry.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
            debug!(
                %fingerprint,
                hits = entry.hit_count(),
                age_secs = entry.age().as_secs(),
                "cache hit"
            );
            return Lookup::Hit(entry.payload.clone());
        }
        if let Some(flight) = inflight.get(&fingerprint) {
            metrics::counter!(telemetry::COALESCED_TOTAL).increment(1);
            return Lookup::InFlight(flight.clone());
        }

        let (tx, rx) = oneshot::channel();
        let flight: SharedFlight = rx
            .map(|received| received.unwrap_or(Err(MuninnError::Aborted)))
            .boxed()
            .shared();
        inflight.insert(fingerprint, flight.clone());
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        let guard = FlightGuard {
            fingerprint,
            tx: Some(tx),
            inflight: Arc::clone(&self.inflight),
        };
        Lookup::Miss(guard, flight)
    }

    /// Write the completed entry, then resolve every waiter.
    ///
    /// Insertion happens before the placeholder is removed, so a caller
    /// arriving in between sees the cache hit rather than a fresh miss.
    pub fn complete(&self, guard: FlightGuard, payload: String) {
        self.entries.insert(
            guard.fingerprint,
            Arc::new(CacheEntry::new(payload.clone())),
        );
        guard.resolve(Ok(payload));
    }

    /// Resolve every waiter with the error. No entry is written —
    /// failures are never cached.
    pub fn fail(&self, guard: FlightGuard, error: MuninnError) {
        guard.resolve(Err(error));
    }

    /// Distinct fingerprints currently being computed.
    pub fn inflight_count(&self) -> u64 {
        lock(&self.inflight).len() as u64
    }

    /// Completed entries currently cached.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

/// A poisoned map is still structurally sound; recover rather than
/// wedge every subsequent request.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
