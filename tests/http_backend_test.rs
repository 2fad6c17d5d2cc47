//! HTTP backend wire behaviour against a mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use muninn::{GenerateParams, HttpBackend, InferenceBackend, MuninnError};

#[tokio::test]
async fn successful_completion_returns_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({
            "prompt": "Summarize example.com",
            "n_predict": 128,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": "example.com looks healthy"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri());
    let params = GenerateParams::new().max_tokens(128);
    let text = backend
        .generate("Summarize example.com", &params)
        .await
        .unwrap();
    assert_eq!(text, "example.com looks healthy");
}

#[tokio::test]
async fn rate_limit_maps_to_transient_busy_with_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_string("slot exhausted"),
        )
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri());
    let err = backend
        .generate("p", &GenerateParams::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    assert!(matches!(err, MuninnError::BackendBusy { .. }));
}

#[tokio::test]
async fn service_unavailable_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri());
    let err = backend
        .generate("p", &GenerateParams::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn bad_request_is_permanent_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(400).set_body_string("prompt exceeds context"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri());
    let err = backend
        .generate("p", &GenerateParams::new())
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    match err {
        MuninnError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "prompt exceeds context");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri());
    let err = backend
        .generate("p", &GenerateParams::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(
        err,
        MuninnError::BackendUnavailable { status: 502, .. }
    ));
}

#[tokio::test]
async fn connection_failure_is_transient() {
    // Nothing listens on this port.
    let backend = HttpBackend::new("http://127.0.0.1:1");
    let err = backend
        .generate("p", &GenerateParams::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, MuninnError::Connection(_)));
}

#[tokio::test]
async fn malformed_body_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri());
    let err = backend
        .generate("p", &GenerateParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MuninnError::Connection(_)));
}
