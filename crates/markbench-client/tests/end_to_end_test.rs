//! End-to-End Tests
//!
//! A real aggregation server (registry served over HTTP, one mock remote
//! backend, one embedded reference implementation) queried through
//! [`MarkbenchClient`].
//!
//! Test Scenarios:
//! 1. One record per implementation, streamed as each completes
//! 2. Request text truncated before it reaches the backends
//! 3. Per-client throttling
//! 4. Registry outage

use axum::{extract::Query, routing::get, Json, Router};
use markbench_aggregator::{
    Aggregator, AggregatorConfig, DefaultSanitizer, EndpointInvoker, HttpRegistrySource,
    HttpServer, PassphraseSource, RegistryCache, RegistryConfig,
};
use markbench_client::MarkbenchClient;
use markbench_common::rate_limit::{AdmissionController, DenyReason, ThrottleConfig};
use markbench_common::{MarkbenchError, ReferenceImplementation};
use markbench_engine::{EmbeddedEngine, StaticScriptLoader};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

const FAKE_COMMONMARK: &str = r#"
    var commonmark = {
        Parser: function () { this.parse = function (src) { return src.replace(/^# /, ''); }; },
        HtmlRenderer: function () { this.render = function (doc) { return '<h1>' + doc + '</h1>\n'; }; }
    };
"#;

// ============================================================================
// Test Helpers
// ============================================================================

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Serves the registry document at `/registry.json` and a backend at `/render`
/// that answers after `delay`.
async fn spawn_backend(delay: Duration) -> String {
    let registry = Arc::new(std::sync::OnceLock::<String>::new());

    let render = move |Query(params): Query<HashMap<String, String>>| async move {
        tokio::time::sleep(delay).await;
        let text = params.get("text").cloned().unwrap_or_default();
        Json(json!({ "html": format!("<h1>{}</h1>", text.trim_start_matches("# ")) }))
    };

    let document = registry.clone();
    let app = Router::new()
        .route("/render", get(render))
        .route(
            "/registry.json",
            get(move || {
                let document = document.clone();
                async move { document.get().cloned().unwrap_or_default() }
            }),
        );

    let base = spawn(app).await;
    registry
        .set(
            json!([
                { "name": "remote", "url": format!("{}/render", base), "lang": "Rust", "repo": "https://remote.test", "cmark": true },
                { "name": "commonmark.js", "url": "js:commonmark.js", "lang": "JavaScript", "repo": "https://github.com/commonmark/commonmark.js", "cmark": true }
            ])
            .to_string(),
        )
        .unwrap();
    base
}

/// Starts an aggregation server whose registry lives at `registry_url`.
async fn spawn_server(registry_url: String, throttle: ThrottleConfig) -> MarkbenchClient {
    let registry = RegistryCache::new(
        Arc::new(HttpRegistrySource::new(registry_url, Duration::from_secs(5)).unwrap()),
        RegistryConfig {
            passphrase: PassphraseSource::Fixed("secret".into()),
            ..Default::default()
        },
    );
    let loader = StaticScriptLoader::new()
        .with_source(ReferenceImplementation::CommonMarkJs, FAKE_COMMONMARK);
    let engine = Arc::new(EmbeddedEngine::new(Arc::new(loader)));
    let aggregator = Aggregator::new(
        Arc::new(registry),
        Arc::new(EndpointInvoker::new(reqwest_client(), engine)),
        Arc::new(DefaultSanitizer::new().unwrap()),
        AggregatorConfig::default(),
    );

    let server = HttpServer::new(Arc::new(aggregator), AdmissionController::new(throttle));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    MarkbenchClient::new(format!("http://{}", addr)).unwrap()
}

fn reqwest_client() -> reqwest::Client {
    reqwest::Client::new()
}

fn unthrottled() -> ThrottleConfig {
    ThrottleConfig {
        max_requests_per_second: 0.0,
        ..Default::default()
    }
}

// ============================================================================
// Rendering
// ============================================================================

#[tokio::test]
async fn test_one_record_per_implementation() {
    let backend = spawn_backend(Duration::ZERO).await;
    let client = spawn_server(format!("{}/registry.json", backend), unthrottled()).await;

    let envelopes = client.render("# hi").await.unwrap();
    assert_eq!(envelopes.len(), 2);

    for envelope in &envelopes {
        assert!(envelope.error.is_none(), "{:?}", envelope);
        assert_eq!(envelope.html_clean, "<h1>hi</h1>");
        assert_eq!(envelope.html_safe, "<h1>hi</h1>");
        assert_eq!(envelope.cmark, Some(true));
    }

    let embedded = envelopes.iter().find(|e| e.name == "commonmark.js").unwrap();
    assert_eq!(embedded.version.as_deref(), Some("0.28.1"));
}

#[tokio::test]
async fn test_records_stream_as_they_complete() {
    let backend = spawn_backend(Duration::from_millis(800)).await;
    let client = spawn_server(format!("{}/registry.json", backend), unthrottled()).await;

    // Warm up the registry and the embedded engine.
    client.render("warm").await.unwrap();

    let started = Instant::now();
    let mut arrivals = Vec::new();
    let received = client
        .render_each("# hi", |envelope| arrivals.push((envelope.name, started.elapsed())))
        .await
        .unwrap();

    assert_eq!(received, 2);
    assert_eq!(arrivals[0].0, "commonmark.js");
    assert!(arrivals[0].1 < Duration::from_millis(600));
    assert_eq!(arrivals[1].0, "remote");
    assert!(arrivals[1].1 >= Duration::from_millis(800));
}

#[tokio::test]
async fn test_text_is_truncated() {
    let backend = spawn_backend(Duration::ZERO).await;
    let client = spawn_server(format!("{}/registry.json", backend), unthrottled()).await;

    let envelopes = client.render(&"y".repeat(1200)).await.unwrap();
    let remote = envelopes.iter().find(|e| e.name == "remote").unwrap();
    assert_eq!(remote.html, format!("<h1>{}</h1>", "y".repeat(1000)));
}

// ============================================================================
// Admission and failures
// ============================================================================

#[tokio::test]
async fn test_rapid_second_request_is_denied() {
    let backend = spawn_backend(Duration::ZERO).await;
    let throttle = ThrottleConfig {
        max_requests_per_second: 0.5,
        ..Default::default()
    };
    let client = spawn_server(format!("{}/registry.json", backend), throttle).await;

    assert_eq!(client.render("a").await.unwrap().len(), 2);

    let denied = client.render("b").await.unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].name, "unknown");
    assert_eq!(denied[0].html, DenyReason::RateExceeded.message());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(client.render("c").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_registry_outage_is_503() {
    let backend = spawn_backend(Duration::ZERO).await;
    let client = spawn_server(format!("{}/missing.json", backend), unthrottled()).await;

    let err = client.render("x").await.unwrap_err();
    match err {
        MarkbenchError::Transport(message) => assert!(message.contains("503"), "{}", message),
        other => panic!("Expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let backend = spawn_backend(Duration::ZERO).await;
    let registry_url = format!("{}/registry.json", backend);
    let client = spawn_server(registry_url, ThrottleConfig::default()).await;

    let health_url = client.render_url().replace("/api/get", "/__health");
    let response = reqwest_client().get(health_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}
