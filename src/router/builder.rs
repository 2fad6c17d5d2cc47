//! Builder for configuring router instances.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::admission::AdmissionController;
use crate::backend::{GenerateParams, InferenceBackend};
use crate::cache::CacheStore;
use crate::config::RouterConfig;
use crate::dispatch::Dispatcher;
use crate::retrieval::{Augmenter, AugmenterConfig, ContextIndex};
use crate::retry::RetryConfig;
use crate::telemetry::RouterMetrics;
use crate::types::TemplateRegistry;
use crate::{MuninnError, Result};

use super::{Router, RouterInner};

/// Main entry point for creating router instances.
pub struct Muninn;

impl Muninn {
    /// Create a new builder for configuring the router.
    pub fn builder() -> MuninnBuilder {
        MuninnBuilder::new()
    }
}

/// Builder for configuring router instances.
///
/// ```rust,no_run
/// # use muninn::{Muninn, RouterConfig, HttpBackend};
/// # use std::sync::Arc;
/// # fn main() -> muninn::Result<()> {
/// let router = Muninn::builder()
///     .config(RouterConfig::new().max_parallel_slots(4))
///     .backend(Arc::new(HttpBackend::new("http://llm:8080")))
///     .template("seo_summary", "Summarize the SEO posture of {domain}.")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct MuninnBuilder {
    config: RouterConfig,
    backend: Option<Arc<dyn InferenceBackend>>,
    index: Option<Arc<dyn ContextIndex>>,
    templates: TemplateRegistry,
    params: GenerateParams,
}

impl MuninnBuilder {
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
            backend: None,
            index: None,
            templates: TemplateRegistry::new(),
            params: GenerateParams::default(),
        }
    }

    /// Set the router configuration.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the inference backend (required).
    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the context index for retrieval augmentation (optional).
    /// Without one, prompts dispatch unaugmented.
    pub fn context_index(mut self, index: Arc<dyn ContextIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Register a prompt template.
    pub fn template(mut self, id: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.register(id, body);
        self
    }

    /// Set sampling parameters forwarded to the backend.
    pub fn generate_params(mut self, params: GenerateParams) -> Self {
        self.params = params;
        self
    }

    /// Validate the configuration and start the router.
    pub fn build(self) -> Result<Router> {
        self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| MuninnError::Configuration("no backend configured".to_string()))?;

        let cache = CacheStore::new(self.config.cache_max_entries, self.config.cache_ttl);
        let admission = AdmissionController::new(
            self.config.max_parallel_slots,
            self.config.max_queue_depth,
            self.config.backend_timeout,
        );
        let dispatcher = Dispatcher::new(backend, self.params, self.config.backend_timeout);
        let augmenter = Augmenter::new(
            self.index,
            AugmenterConfig {
                enabled: self.config.retrieval_enabled,
                max_passages: self.config.retrieval_max_passages,
                context_budget: self.config.retrieval_context_budget,
                timeout: self.config.retrieval_timeout,
            },
        );
        let retry = RetryConfig::new()
            .max_attempts(self.config.max_retry_attempts)
            .initial_delay(self.config.retry_initial_delay)
            .max_delay(self.config.retry_max_delay)
            .jitter(self.config.retry_jitter);

        Ok(Router::new(RouterInner {
            config: self.config,
            templates: self.templates,
            cache,
            admission,
            dispatcher,
            augmenter,
            retry,
            metrics: RouterMetrics::new(),
            closed: AtomicBool::new(false),
        }))
    }
}

impl Default for MuninnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullBackend;

    #[async_trait]
    impl InferenceBackend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }

        async fn generate(&self, _prompt: &str, _params: &GenerateParams) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn build_requires_backend() {
        let result = Muninn::builder().build();
        assert!(matches!(result, Err(MuninnError::Configuration(_))));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = Muninn::builder()
            .config(RouterConfig::new().max_parallel_slots(0))
            .backend(Arc::new(NullBackend))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn build_succeeds_with_backend() {
        let router = Muninn::builder()
            .backend(Arc::new(NullBackend))
            .template("t", "hello")
            .build()
            .unwrap();
        let snapshot = router.metrics();
        assert_eq!(snapshot.requests_total, 0);
        assert_eq!(snapshot.available_slots, 4);
    }
}
