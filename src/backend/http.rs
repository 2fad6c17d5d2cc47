//! HTTP inference backend.
//!
//! Client for a llama.cpp-style completion endpoint: one POST to
//! `{base_url}/completion` with the prompt and sampling options,
//! returning generated text. HTTP statuses map onto the router's error
//! taxonomy — 429/503 are backend overload (transient, `Retry-After`
//! honoured), other 4xx are permanent rejections, everything else
//! transient.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerateParams, InferenceBackend};
use crate::{MuninnError, Result};

/// Backend client for an HTTP completion endpoint.
pub struct HttpBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_predict: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

impl HttpBackend {
    /// Create a backend client for `base_url`.
    ///
    /// No connect timeout is set here; the dispatcher bounds every call
    /// with the configured per-call timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            name: "http".to_string(),
            base_url: trim_trailing_slash(base_url.into()),
            client: reqwest::Client::new(),
        }
    }

    /// Override the backend name used in logs and metrics.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn map_status(status: reqwest::StatusCode, retry_after: Option<Duration>, body: String) -> MuninnError {
        let code = status.as_u16();
        match code {
            429 | 503 => MuninnError::BackendBusy { retry_after },
            400..=499 => MuninnError::Rejected {
                status: code,
                message: body,
            },
            _ => MuninnError::BackendUnavailable {
                status: code,
                message: body,
            },
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String> {
        let request = CompletionRequest {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop_sequences.clone(),
        };

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| MuninnError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, retry_after, body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| MuninnError::Connection(format!("malformed backend response: {e}")))?;
        Ok(completion.content)
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
