//! Aggregator Integration Tests
//!
//! Real mock backends (axum servers on 127.0.0.1:0) queried through the
//! default [`EndpointInvoker`], together with an embedded entry backed by a
//! static script loader.
//!
//! Test Scenarios:
//! 1. Remote and embedded entries answered in one request
//! 2. Backend errors (HTTP status, bad JSON, timeouts) isolated per entry
//! 3. Request text encoding and truncation seen by the backend
//! 4. Registry loaded from a file
//! 5. Encrypted backend URLs kept out of error records

use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
use markbench_aggregator::{
    Aggregator, AggregatorConfig, DefaultSanitizer, EndpointInvoker, FileRegistrySource,
    PassphraseSource, RegistryCache, RegistryConfig,
};
use markbench_common::cipher::StringCipher;
use markbench_common::ReferenceImplementation;
use markbench_engine::{EmbeddedEngine, StaticScriptLoader};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const FAKE_MARKDOWN_IT: &str = r#"
    var markdownit = function () {
        return { render: function (src) { return '<p>' + src + '</p>\n'; } };
    };
"#;

// ============================================================================
// Test Helpers
// ============================================================================

async fn echo(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let text = params.get("text").cloned().unwrap_or_default();
    Json(json!({ "html": format!("<p>{}</p>", text), "version": "mock-1" }))
}

async fn slow(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    echo(Query(params)).await
}

/// Starts a mock backend farm and returns its base URL.
async fn spawn_backends() -> String {
    let app = Router::new()
        .route("/echo", get(echo))
        .route("/slow", get(slow))
        .route("/status", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .route("/garbage", get(|| async { "<html>not json</html>" }))
        .route("/empty", get(|| async { Json(json!({ "html": null })) }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn registry_document(base: &str) -> String {
    json!([
        { "name": "echo", "url": format!("{}/echo", base), "lang": "Rust", "repo": "https://echo.test", "cmark": true },
        { "name": "slow", "url": format!("{}/slow", base), "lang": "C", "repo": "https://slow.test" },
        { "name": "status", "url": format!("{}/status", base), "lang": "Go", "repo": "https://status.test" },
        { "name": "garbage", "url": format!("{}/garbage", base), "lang": "PHP", "repo": "https://garbage.test" },
        { "name": "empty", "url": format!("{}/empty", base), "lang": "Lua", "repo": "https://empty.test" },
        { "name": "markdown-it", "url": "js:markdown-it", "lang": "JavaScript", "repo": "https://github.com/markdown-it/markdown-it", "cmark": true }
    ])
    .to_string()
}

/// Builds an aggregator reading its registry from a temporary file.
fn aggregator(document: &str, config: AggregatorConfig) -> (Aggregator, tempfile::NamedTempFile) {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), document).unwrap();

    let registry = RegistryCache::new(
        Arc::new(FileRegistrySource::new(file.path())),
        RegistryConfig {
            passphrase: PassphraseSource::Fixed("secret".into()),
            ..Default::default()
        },
    );
    let loader = StaticScriptLoader::new()
        .with_source(ReferenceImplementation::MarkdownIt, FAKE_MARKDOWN_IT);
    let engine = Arc::new(EmbeddedEngine::new(Arc::new(loader)));
    let invoker = EndpointInvoker::new(reqwest::Client::new(), engine);

    let aggregator = Aggregator::new(
        Arc::new(registry),
        Arc::new(invoker),
        Arc::new(DefaultSanitizer::new().unwrap()),
        config,
    );
    (aggregator, file)
}

fn short_timeout() -> AggregatorConfig {
    AggregatorConfig {
        backend_timeout: Duration::from_millis(1500),
        ..Default::default()
    }
}

// ============================================================================
// Scatter-gather
// ============================================================================

#[tokio::test]
async fn test_every_entry_answers_once() {
    let base = spawn_backends().await;
    let (aggregator, _file) = aggregator(&registry_document(&base), short_timeout());

    let envelopes = aggregator.collect("# hi").await.unwrap();
    assert_eq!(envelopes.len(), 6);

    let mut names: Vec<_> = envelopes.iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["echo", "empty", "garbage", "markdown-it", "slow", "status"]);
}

#[tokio::test]
async fn test_remote_and_embedded_results() {
    let base = spawn_backends().await;
    let (aggregator, _file) = aggregator(&registry_document(&base), short_timeout());

    let envelopes = aggregator.collect("# hi").await.unwrap();

    let echo = envelopes.iter().find(|e| e.name == "echo").unwrap();
    assert_eq!(echo.html, "<p># hi</p>");
    assert_eq!(echo.html_clean, "<p># hi</p>");
    assert_eq!(echo.html_safe, "<p># hi</p>");
    assert_eq!(echo.version.as_deref(), Some("mock-1"));
    assert_eq!(echo.cmark, Some(true));
    assert!(echo.error.is_none());

    let embedded = envelopes.iter().find(|e| e.name == "markdown-it").unwrap();
    assert_eq!(embedded.html, "<p># hi</p>\n");
    assert_eq!(embedded.html_clean, "<p># hi</p>");
    assert_eq!(embedded.version.as_deref(), Some("8.4.0"));
    assert_eq!(embedded.lang, "JavaScript");
}

#[tokio::test]
async fn test_backend_failures_are_isolated() {
    let base = spawn_backends().await;
    let (aggregator, _file) = aggregator(&registry_document(&base), short_timeout());

    let envelopes = aggregator.collect("x").await.unwrap();
    let by_name = |name: &str| envelopes.iter().find(|e| e.name == name).unwrap();

    let status = by_name("status");
    assert!(status.error.as_deref().unwrap().contains("500"));
    assert_eq!(status.repo, "https://status.test");

    let garbage = by_name("garbage");
    assert!(garbage.error.as_deref().unwrap().starts_with("Invalid response"));

    let slow = by_name("slow");
    assert_eq!(slow.error.as_deref(), Some("Request timeout after 1500ms"));
    assert_eq!(slow.html, "");

    let empty = by_name("empty");
    assert!(empty.error.is_none());
    assert_eq!(empty.html_clean, "");

    assert_eq!(envelopes.iter().filter(|e| e.is_error()).count(), 3);
}

#[tokio::test]
async fn test_timed_out_backend_comes_last() {
    let base = spawn_backends().await;
    let (aggregator, _file) = aggregator(&registry_document(&base), short_timeout());

    let envelopes = aggregator.collect("x").await.unwrap();
    assert_eq!(envelopes.last().unwrap().name, "slow");
}

// ============================================================================
// Request text
// ============================================================================

#[tokio::test]
async fn test_text_reaches_backend_intact() {
    let base = spawn_backends().await;
    let document = json!([{ "name": "echo", "url": format!("{}/echo", base), "lang": "Rust", "repo": "#" }]).to_string();
    let (aggregator, _file) = aggregator(&document, AggregatorConfig::default());

    let text = "a & b = c?\n*ü* +1";
    let envelopes = aggregator.collect(text).await.unwrap();
    assert_eq!(envelopes[0].html, format!("<p>{}</p>", text));
}

#[tokio::test]
async fn test_text_truncated_to_limit() {
    let base = spawn_backends().await;
    let document = json!([{ "name": "echo", "url": format!("{}/echo", base), "lang": "Rust", "repo": "#" }]).to_string();
    let (aggregator, _file) = aggregator(&document, AggregatorConfig::default());

    let envelopes = aggregator.collect(&"x".repeat(1500)).await.unwrap();
    assert_eq!(envelopes[0].html, format!("<p>{}</p>", "x".repeat(1000)));
}

// ============================================================================
// Encrypted entries
// ============================================================================

#[tokio::test]
async fn test_failing_encrypted_backend_does_not_reveal_url() {
    let base = spawn_backends().await;
    let hidden_status = StringCipher::encrypt(&format!("{}/status", base), "secret").unwrap();
    let hidden_closed = StringCipher::encrypt("http://127.0.0.1:1/render", "secret").unwrap();
    let document = json!([
        { "name": "status", "url": hidden_status, "lang": "Go", "repo": "#" },
        { "name": "closed", "url": hidden_closed, "lang": "C", "repo": "#" }
    ])
    .to_string();
    let (aggregator, _file) = aggregator(&document, short_timeout());

    let envelopes = aggregator.collect("private text").await.unwrap();
    assert_eq!(envelopes.len(), 2);

    for envelope in &envelopes {
        let error = envelope.error.as_deref().unwrap();
        assert!(!error.contains("127.0.0.1"), "{}", error);
        assert!(!error.contains("private"), "{}", error);
    }

    let status = envelopes.iter().find(|e| e.name == "status").unwrap();
    assert!(status.error.as_deref().unwrap().contains("500"));

    let closed = envelopes.iter().find(|e| e.name == "closed").unwrap();
    assert!(closed.error.as_deref().unwrap().to_lowercase().contains("refused"));
}
