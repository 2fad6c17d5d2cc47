//! Router configuration.
//!
//! One explicit struct with named, typed fields covering admission,
//! caching, retry and retrieval behaviour. Services either construct it
//! in code with the builder methods or load it from `MUNINN_*`
//! environment variables via [`RouterConfig::from_env`].

use std::time::Duration;

use serde::Deserialize;

use crate::{MuninnError, Result};

/// Router configuration.
///
/// ```rust
/// # use muninn::RouterConfig;
/// # use std::time::Duration;
/// let config = RouterConfig::new()
///     .max_parallel_slots(4)
///     .max_queue_depth(32)
///     .cache_ttl(Duration::from_secs(600))
///     .backend_timeout(Duration::from_secs(20));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Parallel generation slots the backend exposes. Admission never
    /// dispatches more than this many concurrent backend calls.
    /// Default: 4.
    pub max_parallel_slots: usize,
    /// Maximum admitted-but-not-dispatched requests held in the priority
    /// queue. The next admission attempt past this bound is rejected
    /// immediately with a backpressure signal. Default: 32.
    pub max_queue_depth: usize,
    /// Time-to-live for completed cache entries. Default: 1 hour.
    #[serde(with = "secs")]
    pub cache_ttl: Duration,
    /// Maximum number of completed cache entries. Default: 10,000.
    pub cache_max_entries: u64,
    /// Maximum dispatch attempts per request, including the initial one.
    /// 1 = no retry. Default: 3.
    pub max_retry_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    #[serde(with = "millis")]
    pub retry_initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    #[serde(with = "millis")]
    pub retry_max_delay: Duration,
    /// Whether to add random jitter to retry delays. Default: true.
    pub retry_jitter: bool,
    /// Per-call timeout for one backend dispatch, distinct from the
    /// caller's overall deadline. Default: 30s.
    #[serde(with = "millis")]
    pub backend_timeout: Duration,
    /// Whether to query the context index before dispatch. Default: true.
    pub retrieval_enabled: bool,
    /// Maximum passages appended to a prompt. Default: 4.
    pub retrieval_max_passages: usize,
    /// Character budget for appended context. Default: 4,000.
    pub retrieval_context_budget: usize,
    /// Bound on one index lookup before degrading to the unaugmented
    /// prompt. Default: 2s.
    #[serde(with = "millis")]
    pub retrieval_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_parallel_slots: 4,
            max_queue_depth: 32,
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 10_000,
            max_retry_attempts: 3,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            retry_jitter: true,
            backend_timeout: Duration::from_secs(30),
            retrieval_enabled: true,
            retrieval_max_passages: 4,
            retrieval_context_budget: 4_000,
            retrieval_timeout: Duration::from_secs(2),
        }
    }
}

impl RouterConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of parallel backend generation slots.
    pub fn max_parallel_slots(mut self, n: usize) -> Self {
        self.max_parallel_slots = n;
        self
    }

    /// Set the maximum admission queue depth.
    pub fn max_queue_depth(mut self, n: usize) -> Self {
        self.max_queue_depth = n;
        self
    }

    /// Set the time-to-live for completed cache entries.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the maximum number of completed cache entries.
    pub fn cache_max_entries(mut self, n: u64) -> Self {
        self.cache_max_entries = n;
        self
    }

    /// Set maximum dispatch attempts (including the initial request).
    pub fn max_retry_attempts(mut self, n: u32) -> Self {
        self.max_retry_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Enable or disable retry jitter.
    pub fn retry_jitter(mut self, enabled: bool) -> Self {
        self.retry_jitter = enabled;
        self
    }

    /// Set the per-call backend dispatch timeout.
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Enable or disable retrieval augmentation.
    pub fn retrieval_enabled(mut self, enabled: bool) -> Self {
        self.retrieval_enabled = enabled;
        self
    }

    /// Set the maximum passages appended to a prompt.
    pub fn retrieval_max_passages(mut self, n: usize) -> Self {
        self.retrieval_max_passages = n;
        self
    }

    /// Set the character budget for appended context.
    pub fn retrieval_context_budget(mut self, chars: usize) -> Self {
        self.retrieval_context_budget = chars;
        self
    }

    /// Set the bound on one index lookup.
    pub fn retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout = timeout;
        self
    }

    /// Load configuration from `MUNINN_*` environment variables,
    /// starting from the defaults. Unset variables keep their default;
    /// unparsable values are configuration errors.
    ///
    /// Durations are given in seconds (`MUNINN_CACHE_TTL_SECONDS`) or
    /// milliseconds (`MUNINN_BACKEND_TIMEOUT_MS`,
    /// `MUNINN_RETRY_INITIAL_DELAY_MS`, `MUNINN_RETRY_MAX_DELAY_MS`,
    /// `MUNINN_RETRIEVAL_TIMEOUT_MS`), matching the wire-level names.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("MUNINN_MAX_PARALLEL_SLOTS")? {
            config.max_parallel_slots = n;
        }
        if let Some(n) = env_parse::<usize>("MUNINN_MAX_QUEUE_DEPTH")? {
            config.max_queue_depth = n;
        }
        if let Some(secs) = env_parse::<u64>("MUNINN_CACHE_TTL_SECONDS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<u64>("MUNINN_CACHE_MAX_ENTRIES")? {
            config.cache_max_entries = n;
        }
        if let Some(n) = env_parse::<u32>("MUNINN_MAX_RETRY_ATTEMPTS")? {
            config.max_retry_attempts = n;
        }
        if let Some(ms) = env_parse::<u64>("MUNINN_RETRY_INITIAL_DELAY_MS")? {
            config.retry_initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("MUNINN_RETRY_MAX_DELAY_MS")? {
            config.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_parse::<bool>("MUNINN_RETRY_JITTER")? {
            config.retry_jitter = enabled;
        }
        if let Some(ms) = env_parse::<u64>("MUNINN_BACKEND_TIMEOUT_MS")? {
            config.backend_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_parse::<bool>("MUNINN_RETRIEVAL_ENABLED")? {
            config.retrieval_enabled = enabled;
        }
        if let Some(n) = env_parse::<usize>("MUNINN_RETRIEVAL_MAX_PASSAGES")? {
            config.retrieval_max_passages = n;
        }
        if let Some(n) = env_parse::<usize>("MUNINN_RETRIEVAL_CONTEXT_BUDGET")? {
            config.retrieval_context_budget = n;
        }
        if let Some(ms) = env_parse::<u64>("MUNINN_RETRIEVAL_TIMEOUT_MS")? {
            config.retrieval_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the rest of the router relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_slots == 0 {
            return Err(MuninnError::Configuration(
                "max_parallel_slots must be at least 1".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(MuninnError::Configuration(
                "max_retry_attempts must be at least 1 (1 = no retry)".to_string(),
            ));
        }
        if self.backend_timeout.is_zero() {
            return Err(MuninnError::Configuration(
                "backend_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            MuninnError::Configuration(format!("Failed to parse {name}={raw:?}"))
        }),
        Err(_) => Ok(None),
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
