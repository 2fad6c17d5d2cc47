//! End-to-end router behaviour with mock backends and indexes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio_test::assert_ok;

use muninn::retrieval::{ContextIndex, Passage};
use muninn::{
    CacheOutcome, GenerateParams, InferenceBackend, Muninn, MuninnError, Priority, Result,
    RouteRequest, Router, RouterConfig,
};

// ============================================================================
// Mock backends
// ============================================================================

/// One scripted behaviour per backend call.
#[derive(Clone, Copy)]
enum Step {
    Ok(&'static str),
    Busy,
    Reject,
    Hang,
}

/// Backend that consumes a script, one step per call, and records
/// every prompt it receives.
struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _params: &GenerateParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Ok("default"));
        match step {
            Step::Ok(text) => Ok(text.to_string()),
            Step::Busy => Err(MuninnError::BackendBusy { retry_after: None }),
            Step::Reject => Err(MuninnError::Rejected {
                status: 400,
                message: "invalid prompt".to_string(),
            }),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("never".to_string())
            }
        }
    }
}

/// Backend that signals each entry and waits for the test to release it.
struct GatedBackend {
    calls: AtomicU32,
    entered: mpsc::UnboundedSender<()>,
    release: Semaphore,
}

impl GatedBackend {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                calls: AtomicU32::new(0),
                entered: tx,
                release: Semaphore::new(0),
            }),
            rx,
        )
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _prompt: &str, _params: &GenerateParams) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.entered.send(());
        let permit = self.release.acquire().await.expect("release semaphore");
        permit.forget();
        Ok(format!("result-{n}"))
    }
}

// ============================================================================
// Mock indexes
// ============================================================================

struct FailingIndex;

#[async_trait]
impl ContextIndex for FailingIndex {
    fn name(&self) -> &str {
        "failing"
    }

    async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<Passage>> {
        Err(MuninnError::Index("connection refused".to_string()))
    }
}

struct SwappableIndex {
    passages: Mutex<Vec<Passage>>,
}

impl SwappableIndex {
    fn new(passages: Vec<Passage>) -> Arc<Self> {
        Arc::new(Self {
            passages: Mutex::new(passages),
        })
    }

    fn swap(&self, passages: Vec<Passage>) {
        *self.passages.lock().unwrap() = passages;
    }
}

#[async_trait]
impl ContextIndex for SwappableIndex {
    fn name(&self) -> &str {
        "swappable"
    }

    async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<Passage>> {
        Ok(self.passages.lock().unwrap().clone())
    }
}

fn passage(id: &str, text: &str) -> Passage {
    Passage {
        id: id.to_string(),
        text: text.to_string(),
        score: 1.0,
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_retry_config() -> RouterConfig {
    RouterConfig::new()
        .retry_initial_delay(Duration::from_millis(1))
        .retry_jitter(false)
        .retrieval_enabled(false)
}

fn build_router(backend: Arc<dyn InferenceBackend>, config: RouterConfig) -> Router {
    Muninn::builder()
        .config(config)
        .backend(backend)
        .template("seo_summary", "Summarize the SEO posture of {domain}.")
        .template("keyword_audit", "Audit keywords for {domain}.")
        .build()
        .unwrap()
}

fn summary_request(domain: &str) -> RouteRequest {
    RouteRequest::new("test-caller", "seo_summary").parameter("domain", domain)
}

// ============================================================================
// Coalescing and caching
// ============================================================================

#[tokio::test]
async fn concurrent_identical_requests_share_one_dispatch() {
    let (backend, mut entered) = GatedBackend::new();
    let router = build_router(
        backend.clone(),
        fast_retry_config().max_parallel_slots(1),
    );

    let first = tokio::spawn({
        let router = router.clone();
        async move { router.route(summary_request("example.com")).await }
    });
    entered.recv().await.unwrap();

    let second = tokio::spawn({
        let router = router.clone();
        async move { router.route(summary_request("example.com")).await }
    });
    while router.metrics().coalesced_total < 1 {
        tokio::task::yield_now().await;
    }

    backend.release.add_permits(1);
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(backend.call_count(), 1, "backend must see exactly one call");
    assert_eq!(first.payload, second.payload);
    assert_eq!(first.cache, CacheOutcome::Miss);
    assert_eq!(second.cache, CacheOutcome::Coalesced);
}

#[tokio::test]
async fn completed_response_served_from_cache() {
    let backend = ScriptedBackend::new(&[Step::Ok("summary")]);
    let router = build_router(backend.clone(), fast_retry_config());

    let first = assert_ok!(router.route(summary_request("example.com")).await);
    let second = assert_ok!(router.route(summary_request("example.com")).await);

    assert_eq!(first.cache, CacheOutcome::Miss);
    assert_eq!(second.cache, CacheOutcome::Hit);
    assert_eq!(second.payload, "summary");
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn cached_response_expires_after_ttl() {
    let backend = ScriptedBackend::new(&[Step::Ok("one"), Step::Ok("two")]);
    let router = build_router(
        backend.clone(),
        fast_retry_config().cache_ttl(Duration::from_millis(30)),
    );

    let first = router.route(summary_request("example.com")).await.unwrap();
    assert_eq!(first.cache, CacheOutcome::Miss);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = router.route(summary_request("example.com")).await.unwrap();
    assert_eq!(second.cache, CacheOutcome::Miss, "expired entry must miss");
    assert_eq!(second.payload, "two");
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn different_parameters_do_not_share_cache() {
    let backend = ScriptedBackend::new(&[Step::Ok("a"), Step::Ok("b")]);
    let router = build_router(backend.clone(), fast_retry_config());

    router.route(summary_request("example.com")).await.unwrap();
    let other = router.route(summary_request("example.org")).await.unwrap();
    assert_eq!(other.cache, CacheOutcome::Miss);
    assert_eq!(backend.call_count(), 2);
}

// ============================================================================
// Admission and backpressure
// ============================================================================

#[tokio::test]
async fn queue_overflow_rejected_with_retry_hint() {
    let (backend, mut entered) = GatedBackend::new();
    let config = fast_retry_config()
        .max_parallel_slots(1)
        .max_queue_depth(2)
        .backend_timeout(Duration::from_secs(7));
    let router = build_router(backend.clone(), config);

    // Occupy the only slot.
    let holder = tokio::spawn({
        let router = router.clone();
        async move { router.route(summary_request("slot-holder.com")).await }
    });
    entered.recv().await.unwrap();

    // Two distinct requests queue behind it.
    let queued: Vec<_> = ["q1.com", "q2.com"]
        .iter()
        .map(|domain| {
            let router = router.clone();
            let request = summary_request(domain);
            tokio::spawn(async move { router.route(request).await })
        })
        .collect();
    while router.metrics().queue_depth < 2 {
        tokio::task::yield_now().await;
    }

    // The third arrival is rejected immediately.
    let err = router
        .route(summary_request("q3.com"))
        .await
        .unwrap_err();
    match &err {
        MuninnError::Overloaded { retry_after } => {
            assert_eq!(*retry_after, Duration::from_secs(7));
        }
        other => panic!("expected overloaded, got {other:?}"),
    }
    assert_eq!(err.kind(), "overloaded");

    backend.release.add_permits(3);
    holder.await.unwrap().unwrap();
    for handle in queued {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn dispatches_never_exceed_slot_count() {
    struct CountingBackend {
        concurrent: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait]
    impl InferenceBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _prompt: &str, _params: &GenerateParams) -> Result<String> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".to_string())
        }
    }

    let backend = Arc::new(CountingBackend {
        concurrent: AtomicU32::new(0),
        peak: AtomicU32::new(0),
    });
    let router = build_router(
        backend.clone(),
        fast_retry_config().max_parallel_slots(2).max_queue_depth(64),
    );

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let router = router.clone();
            let request = summary_request(&format!("domain-{i}.com"));
            tokio::spawn(async move { router.route(request).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(
        backend.peak.load(Ordering::SeqCst) <= 2,
        "concurrent dispatches exceeded slot count"
    );
    assert_eq!(router.metrics().available_slots, 2);
}

// ============================================================================
// Retry policy
// ============================================================================

#[tokio::test]
async fn transient_timeout_retried_then_succeeds() {
    let backend = ScriptedBackend::new(&[Step::Hang, Step::Ok("recovered")]);
    let config = fast_retry_config()
        .backend_timeout(Duration::from_millis(40))
        .max_retry_attempts(3);
    let router = build_router(backend.clone(), config);

    let start = Instant::now();
    let response = router.route(summary_request("example.com")).await.unwrap();

    assert_eq!(response.payload, "recovered");
    assert_eq!(response.cache, CacheOutcome::Miss);
    assert_eq!(backend.call_count(), 2, "one timeout, one retry");
    assert!(
        start.elapsed() >= Duration::from_millis(40),
        "latency must reflect the timed-out attempt"
    );
    assert_eq!(router.metrics().retries_total, 1);
}

#[tokio::test]
async fn retries_bounded_and_failure_not_cached() {
    let backend = ScriptedBackend::new(&[Step::Busy, Step::Busy, Step::Busy, Step::Busy]);
    let router = build_router(
        backend.clone(),
        fast_retry_config().max_retry_attempts(2),
    );

    let err = router
        .route(summary_request("example.com"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(backend.call_count(), 2, "attempts bounded by config");

    // The failure was not cached: the next request dispatches again.
    let err = router
        .route(summary_request("example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "backend_busy");
    assert_eq!(backend.call_count(), 4);
}

#[tokio::test]
async fn permanent_rejection_not_retried() {
    let backend = ScriptedBackend::new(&[Step::Reject]);
    let router = build_router(
        backend.clone(),
        fast_retry_config().max_retry_attempts(3),
    );

    let err = router
        .route(summary_request("example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, MuninnError::Rejected { status: 400, .. }));
    assert_eq!(err.kind(), "backend_rejected");
    assert_eq!(backend.call_count(), 1, "permanent errors are not retried");
}

// ============================================================================
// Retrieval augmentation
// ============================================================================

#[tokio::test]
async fn index_failure_degrades_to_unaugmented_prompt() {
    let backend = ScriptedBackend::new(&[Step::Ok("ok")]);
    let router = Muninn::builder()
        .config(RouterConfig::new().retry_jitter(false))
        .backend(backend.clone())
        .context_index(Arc::new(FailingIndex))
        .template("seo_summary", "Summarize the SEO posture of {domain}.")
        .build()
        .unwrap();

    let response = router.route(summary_request("example.com")).await.unwrap();
    assert_eq!(response.payload, "ok");
    assert_eq!(
        backend.prompts(),
        vec!["Summarize the SEO posture of example.com."],
        "prompt must dispatch unaugmented"
    );
    assert_eq!(router.metrics().retrieval_degraded_total, 1);
}

#[tokio::test]
async fn retrieved_context_feeds_prompt_and_fingerprint() {
    let backend = ScriptedBackend::new(&[Step::Ok("a"), Step::Ok("b")]);
    let index = SwappableIndex::new(vec![passage("doc-1", "example.com sells widgets")]);
    let router = Muninn::builder()
        .config(RouterConfig::new().retry_jitter(false))
        .backend(backend.clone())
        .context_index(index.clone())
        .template("seo_summary", "Summarize the SEO posture of {domain}.")
        .build()
        .unwrap();

    let first = router.route(summary_request("example.com")).await.unwrap();
    assert_eq!(first.cache, CacheOutcome::Miss);
    assert!(backend.prompts()[0].contains("example.com sells widgets"));

    // Same request, same context: cache hit.
    let second = router.route(summary_request("example.com")).await.unwrap();
    assert_eq!(second.cache, CacheOutcome::Hit);

    // Context changed: the fingerprint changes, so the cache misses.
    index.swap(vec![passage("doc-2", "example.com sells gadgets")]);
    let third = router.route(summary_request("example.com")).await.unwrap();
    assert_eq!(third.cache, CacheOutcome::Miss);
    assert_eq!(backend.call_count(), 2);
}

// ============================================================================
// Caller errors, deadlines, lifecycle
// ============================================================================

#[tokio::test]
async fn unknown_template_is_caller_error() {
    let backend = ScriptedBackend::new(&[]);
    let router = build_router(backend.clone(), fast_retry_config());

    let err = router
        .route(RouteRequest::new("svc", "nonexistent"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unknown_template");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn missing_template_id_rejected_before_fingerprinting() {
    let backend = ScriptedBackend::new(&[]);
    let router = build_router(backend.clone(), fast_retry_config());

    let err = router.route(RouteRequest::new("svc", "")).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn caller_deadline_detaches_without_killing_flight() {
    let (backend, mut entered) = GatedBackend::new();
    let router = build_router(backend.clone(), fast_retry_config());

    let request = summary_request("example.com").timeout(Duration::from_millis(30));
    let waiter = tokio::spawn({
        let router = router.clone();
        async move { router.route(request).await }
    });
    entered.recv().await.unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "deadline_exceeded");

    // The computation survives the detached caller and lands in the cache.
    backend.release.add_permits(1);
    let response = loop {
        let response = router
            .route(summary_request("example.com").timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        if response.cache == CacheOutcome::Hit {
            break response;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(response.payload, "result-1");
    assert_eq!(backend.call_count(), 1, "flight ran exactly once");
}

#[tokio::test]
async fn shutdown_rejects_new_requests() {
    let backend = ScriptedBackend::new(&[Step::Ok("ok")]);
    let router = build_router(backend.clone(), fast_retry_config());

    router.route(summary_request("example.com")).await.unwrap();
    router.shutdown();

    let err = router
        .route(summary_request("example.org"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "shutting_down");
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn priority_classes_round_trip_through_router() {
    let backend = ScriptedBackend::new(&[Step::Ok("a"), Step::Ok("b"), Step::Ok("c")]);
    let router = build_router(backend.clone(), fast_retry_config());

    for (i, priority) in [Priority::Interactive, Priority::Batch, Priority::Background]
        .into_iter()
        .enumerate()
    {
        let response = router
            .route(summary_request(&format!("domain-{i}.com")).priority(priority))
            .await
            .unwrap();
        assert_eq!(response.cache, CacheOutcome::Miss);
    }
    assert_eq!(backend.call_count(), 3);
}
