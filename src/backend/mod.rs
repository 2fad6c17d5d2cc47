//! Inference backend trait and sampling options.
//!
//! The backend is a black box with bounded parallelism and variable
//! latency; the router only assumes `generate(prompt, params) → text`
//! and an error taxonomy split into transient and permanent failures.
//! [`HttpBackend`] is the bundled implementation for an HTTP completion
//! endpoint; tests and embedded setups supply their own.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Sampling options forwarded to the backend on every dispatch.
///
/// Configured once on the router; request identity comes from the
/// template and parameters, not from sampling knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Sampling temperature. Higher values make output more random.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Sequences where generation should stop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl GenerateParams {
    /// Create params with backend defaults for everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max tokens.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top_p.
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Add a stop sequence.
    pub fn stop_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.stop_sequences.push(sequence.into());
        self
    }
}

/// The model-serving backend the router dispatches to.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Run one generation. Errors must be classified: transient
    /// failures (overload, connection loss) are retried by the router,
    /// permanent rejections surface immediately.
    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String>;
}
