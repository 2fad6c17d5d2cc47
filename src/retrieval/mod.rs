//! Retrieval-augmented prompt enrichment.
//!
//! The [`Augmenter`] queries an external document/context index for
//! passages relevant to the rendered prompt, ranks them, truncates to
//! the configured character budget and appends them before dispatch.
//! The ids of the passages used become part of the request fingerprint,
//! so a change in retrieved context produces a cache miss rather than a
//! stale cached answer.
//!
//! Enrichment is best-effort: an unreachable or slow index degrades to
//! the unaugmented prompt (logged, counted) and never fails a request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;
use crate::telemetry;

/// One ranked passage from the context index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Stable document/chunk identifier; feeds the fingerprint.
    pub id: String,
    /// Passage text appended to the prompt.
    pub text: String,
    /// Relevance score, higher is better.
    pub score: f32,
}

/// External document/context index.
///
/// Implementations wrap whatever store the platform runs (a vector
/// index, a search service). `retrieve` returns passages ranked by
/// relevance; the augmenter re-sorts by score and applies the budget.
#[async_trait]
pub trait ContextIndex: Send + Sync {
    /// Index name for logs and metrics.
    fn name(&self) -> &str;

    /// Fetch up to `limit` passages relevant to `query`.
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>>;
}

/// Augmentation bounds, carved out of the router config.
#[derive(Debug, Clone)]
pub struct AugmenterConfig {
    /// Master switch; disabled means prompts pass through untouched.
    pub enabled: bool,
    /// Maximum passages appended to one prompt.
    pub max_passages: usize,
    /// Character budget for appended context.
    pub context_budget: usize,
    /// Bound on one index lookup before degrading.
    pub timeout: Duration,
}

/// A prompt after best-effort enrichment.
#[derive(Debug, Clone)]
pub struct AugmentedPrompt {
    /// Prompt text to dispatch, context appended when available.
    pub prompt: String,
    /// Ids of the passages used, in appended order. Empty when
    /// retrieval was disabled, degraded or returned nothing.
    pub context_ids: Vec<String>,
    /// True when the index failed or timed out and the prompt went
    /// through unaugmented.
    pub degraded: bool,
}

impl AugmentedPrompt {
    fn unaugmented(prompt: String) -> Self {
        Self {
            prompt,
            context_ids: Vec::new(),
            degraded: false,
        }
    }

    fn degraded(prompt: String) -> Self {
        Self {
            degraded: true,
            ..Self::unaugmented(prompt)
        }
    }
}

/// Best-effort retrieval augmenter.
pub struct Augmenter {
    index: Option<Arc<dyn ContextIndex>>,
    config: AugmenterConfig,
}

impl Augmenter {
    /// Create an augmenter. Without an index, every prompt passes
    /// through unaugmented regardless of configuration.
    pub fn new(index: Option<Arc<dyn ContextIndex>>, config: AugmenterConfig) -> Self {
        Self { index, config }
    }

    /// Enrich a rendered prompt with relevant context.
    ///
    /// Never fails a request: index errors and timeouts degrade to the
    /// unaugmented prompt.
    pub async fn augment(&self, prompt: String) -> AugmentedPrompt {
        let Some(index) = &self.index else {
            return AugmentedPrompt::unaugmented(prompt);
        };
        if !self.config.enabled || self.config.max_passages == 0 {
            return AugmentedPrompt::unaugmented(prompt);
        }

        let start = Instant::now();
        let retrieved = tokio::time::timeout(
            self.config.timeout,
            index.retrieve(&prompt, self.config.max_passages),
        )
        .await;
        metrics::histogram!(telemetry::STAGE_DURATION_SECONDS, "stage" => "retrieval")
            .record(start.elapsed().as_secs_f64());

        let passages = match retrieved {
            Ok(Ok(passages)) => passages,
            Ok(Err(e)) => {
                warn!(index = index.name(), error = %e, "context index unavailable, dispatching unaugmented");
                metrics::counter!(telemetry::RETRIEVAL_DEGRADED_TOTAL).increment(1);
                return AugmentedPrompt::degraded(prompt);
            }
            Err(_) => {
                warn!(
                    index = index.name(),
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "context index timed out, dispatching unaugmented"
                );
                metrics::counter!(telemetry::RETRIEVAL_DEGRADED_TOTAL).increment(1);
                return AugmentedPrompt::degraded(prompt);
            }
        };

        if passages.is_empty() {
            return AugmentedPrompt::unaugmented(prompt);
        }
        apply_context(prompt, passages, &self.config)
    }
}

/// Rank, truncate to budget and append.
fn apply_context(prompt: String, mut passages: Vec<Passage>, config: &AugmenterConfig) -> AugmentedPrompt {
    passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    passages.truncate(config.max_passages);

    let mut context_ids = Vec::new();
    let mut appended = String::new();
    let mut remaining = config.context_budget;
    for passage in &passages {
        if remaining == 0 {
            break;
        }
        let text = truncate_chars(&passage.text, remaining);
        if text.is_empty() {
            break;
        }
        remaining -= text.chars().count();
        appended.push_str("\n- ");
        appended.push_str(text);
        context_ids.push(passage.id.clone());
    }

    if context_ids.is_empty() {
        return AugmentedPrompt::unaugmented(prompt);
    }

    debug!(
        passages = context_ids.len(),
        chars = appended.len(),
        "prompt augmented with retrieved context"
    );
    let prompt = format!("{prompt}\n\nRelevant context:{appended}");
    AugmentedPrompt {
        prompt,
        context_ids,
        degraded: false,
    }
}

/// Cut at a char boundary so multi-byte text stays valid UTF-8.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
