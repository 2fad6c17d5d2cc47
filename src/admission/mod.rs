//! Admission control for the backend's generation slots.
//!
//! A counting gate sized to the backend's parallel capacity, fronted by
//! three per-class FIFO queues bounded by a configured depth. When every
//! slot is busy and the queue is full, admission is rejected immediately
//! with a backpressure signal — the router never queues past the bound.
//!
//! Ordering: within a class, arrival order; across classes, a freed slot
//! always goes to the highest class with a waiter. A lower-class request
//! that already holds a slot is never preempted.
//!
//! All state lives behind a single mutex (slot counter plus queues), so
//! no code path ever holds two locks. Slots are RAII: dropping a
//! [`SlotTicket`] hands the slot to the next waiter or frees it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::telemetry;
use crate::types::Priority;
use crate::{MuninnError, Result};

const CLASSES: usize = 3;

struct Waiter {
    tx: oneshot::Sender<SlotTicket>,
    enqueued_at: Instant,
}

struct State {
    available: usize,
    queues: [VecDeque<Waiter>; CLASSES],
    queued: usize,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    max_queue_depth: usize,
    /// Suggested backoff for rejected admissions: the per-call dispatch
    /// timeout, i.e. the longest a current slot holder can run before a
    /// slot frees.
    retry_after: Duration,
}

/// One admitted generation slot.
///
/// Dropping the ticket releases the slot exactly once — the dispatcher
/// moves it into the call so release happens on success, failure and
/// timeout alike.
pub struct SlotTicket {
    inner: Option<Arc<Inner>>,
}

impl SlotTicket {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Take the slot out without releasing it; used when a grant could
    /// not be delivered and the slot goes to the next waiter instead.
    fn defuse(mut self) {
        self.inner.take();
    }
}

impl std::fmt::Debug for SlotTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTicket")
            .field("held", &self.inner.is_some())
            .finish()
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

/// Bounded-concurrency gate plus priority queue.
///
/// Cheap to clone; clones share the same slots and queues.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    /// Create a gate with `max_parallel_slots` slots and a queue bounded
    /// to `max_queue_depth` waiters across all classes.
    pub fn new(max_parallel_slots: usize, max_queue_depth: usize, retry_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    available: max_parallel_slots,
                    queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                    queued: 0,
                    closed: false,
                }),
                max_queue_depth,
                retry_after,
            }),
        }
    }

    /// Wait for a generation slot.
    ///
    /// Resolves with a [`SlotTicket`] once a slot is granted, or rejects
    /// immediately with [`MuninnError::Overloaded`] when the queue is at
    /// capacity. Queued waiters are served per-class FIFO, highest class
    /// first.
    pub async fn admit(&self, priority: Priority) -> Result<SlotTicket> {
        let rx = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(MuninnError::ShuttingDown);
            }
            if state.available > 0 {
                // Slots are only available when no one is queued, so an
                // immediate grant cannot jump ahead of a waiter.
                state.available -= 1;
                return Ok(SlotTicket::new(Arc::clone(&self.inner)));
            }
            if state.queued >= self.inner.max_queue_depth {
                metrics::counter!(telemetry::OVERLOADED_TOTAL, "priority" => priority.as_str())
                    .increment(1);
                return Err(MuninnError::Overloaded {
                    retry_after: self.inner.retry_after,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.queues[priority.index()].push_back(Waiter {
                tx,
                enqueued_at: Instant::now(),
            });
            state.queued += 1;
            metrics::gauge!(telemetry::QUEUE_DEPTH).set(state.queued as f64);
            rx
        };

        match rx.await {
            Ok(ticket) => Ok(ticket),
            // Sender dropped without a grant: the gate was closed.
            Err(_) => Err(MuninnError::ShuttingDown),
        }
    }

    /// Requests currently waiting in the queue.
    pub fn queue_depth(&self) -> u64 {
        lock(&self.inner.state).queued as u64
    }

    /// Generation slots currently free.
    pub fn available_slots(&self) -> u64 {
        lock(&self.inner.state).available as u64
    }

    /// Close the gate: reject new admissions and drain queued waiters
    /// with a shutdown error. Slots already granted finish normally.
    pub fn close(&self) {
        let drained: Vec<Waiter> = {
            let mut state = lock(&self.inner.state);
            state.closed = true;
            state.queued = 0;
            metrics::gauge!(telemetry::QUEUE_DEPTH).set(0.0);
            state.queues.iter_mut().flat_map(|q| q.drain(..)).collect()
        };
        // Dropping the senders outside the lock resolves each waiter's
        // receive with an error.
        drop(drained);
    }
}

impl Inner {
    fn release(self: &Arc<Self>) {
        loop {
            let waiter = {
                let mut state = lock(&self.state);
                match pop_next(&mut state) {
                    Some(waiter) => {
                        state.queued -= 1;
                        metrics::gauge!(telemetry::QUEUE_DEPTH).set(state.queued as f64);
                        waiter
                    }
                    None => {
                        state.available += 1;
                        return;
                    }
                }
            };
            let waited = waiter.enqueued_at.elapsed();
            let ticket = SlotTicket::new(Arc::clone(self));
            match waiter.tx.send(ticket) {
                Ok(()) => {
                    metrics::histogram!(telemetry::STAGE_DURATION_SECONDS, "stage" => "queue_wait")
                        .record(waited.as_secs_f64());
                    debug!(waited_ms = waited.as_millis() as u64, "slot granted to waiter");
                    return;
                }
                Err(ticket) => {
                    // Waiter detached while queued; pass the slot on.
                    ticket.defuse();
                }
            }
        }
    }
}

/// Highest class with a waiter, FIFO within the class.
fn pop_next(state: &mut State) -> Option<Waiter> {
    state.queues.iter_mut().find_map(VecDeque::pop_front)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
