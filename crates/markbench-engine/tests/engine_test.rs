//! Embedded Engine Integration Tests
//!
//! Tests cover lazy loading, retry after a failed load, load sharing between
//! concurrent first uses, and fetching scripts from an HTTP mirror.
//!
//! Real reference scripts are replaced with small stand-ins exposing the same
//! globals, so no network access is needed.

use async_trait::async_trait;
use axum::{routing::get, Router};
use markbench_common::{MarkbenchError, ReferenceImplementation, Result};
use markbench_engine::{
    EmbeddedEngine, HttpScriptLoader, PinnedScript, ScriptLoader, StaticScriptLoader,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const FAKE_COMMONMARK: &str = r#"
    var commonmark = {
        Parser: function () { this.parse = function (src) { return src.replace(/^# /, ''); }; },
        HtmlRenderer: function () { this.render = function (doc) { return '<h1>' + doc + '</h1>\n'; }; }
    };
"#;

const FAKE_MARKDOWN_IT: &str = r#"
    var markdownit = function () {
        return { render: function (src) { return '<p>' + src + '</p>\n'; } };
    };
"#;

/// Loader that fails a configurable number of times before succeeding.
struct FlakyLoader {
    failures_left: AtomicUsize,
    loads: AtomicUsize,
    delay: Duration,
}

impl FlakyLoader {
    fn new(failures: usize, delay: Duration) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            loads: AtomicUsize::new(0),
            delay,
        }
    }
}

#[async_trait]
impl ScriptLoader for FlakyLoader {
    async fn load(&self, script: &PinnedScript) -> Result<String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MarkbenchError::ScriptLoad("mirror unreachable".into()));
        }

        Ok(match script.reference {
            ReferenceImplementation::CommonMarkJs => FAKE_COMMONMARK.to_string(),
            ReferenceImplementation::MarkdownIt => FAKE_MARKDOWN_IT.to_string(),
        })
    }
}

async fn spawn_mirror() -> String {
    let app = Router::new().route(
        "/scripts/markdown-it.min.js",
        get(|| async { FAKE_MARKDOWN_IT }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/scripts", addr)
}

// ============================================================================
// Rendering
// ============================================================================

#[tokio::test]
async fn test_render_both_references() {
    let loader = StaticScriptLoader::new()
        .with_source(ReferenceImplementation::CommonMarkJs, FAKE_COMMONMARK)
        .with_source(ReferenceImplementation::MarkdownIt, FAKE_MARKDOWN_IT);
    let engine = EmbeddedEngine::new(Arc::new(loader));

    let output = engine
        .render(ReferenceImplementation::CommonMarkJs, "# hi")
        .await
        .unwrap();
    assert_eq!(output.html, "<h1>hi</h1>\n");
    assert_eq!(output.version, "0.28.1");

    let output = engine
        .render(ReferenceImplementation::MarkdownIt, "hi")
        .await
        .unwrap();
    assert_eq!(output.html, "<p>hi</p>\n");
    assert_eq!(output.version, "8.4.0");
}

#[tokio::test]
async fn test_scripts_load_lazily() {
    let loader = StaticScriptLoader::new()
        .with_source(ReferenceImplementation::MarkdownIt, FAKE_MARKDOWN_IT);
    let engine = EmbeddedEngine::new(Arc::new(loader));

    assert!(!engine.is_loaded(ReferenceImplementation::MarkdownIt));
    engine
        .render(ReferenceImplementation::MarkdownIt, "x")
        .await
        .unwrap();
    assert!(engine.is_loaded(ReferenceImplementation::MarkdownIt));
    assert!(!engine.is_loaded(ReferenceImplementation::CommonMarkJs));
}

#[tokio::test]
async fn test_missing_source_is_load_error() {
    let engine = EmbeddedEngine::new(Arc::new(StaticScriptLoader::new()));

    let err = engine
        .render(ReferenceImplementation::CommonMarkJs, "x")
        .await
        .unwrap_err();
    assert!(matches!(err, MarkbenchError::ScriptLoad(_)));
}

// ============================================================================
// Load caching
// ============================================================================

#[tokio::test]
async fn test_failed_load_is_retried() {
    let loader = Arc::new(FlakyLoader::new(1, Duration::ZERO));
    let engine = EmbeddedEngine::new(loader.clone());

    assert!(engine
        .render(ReferenceImplementation::MarkdownIt, "x")
        .await
        .is_err());
    assert!(!engine.is_loaded(ReferenceImplementation::MarkdownIt));

    let output = engine
        .render(ReferenceImplementation::MarkdownIt, "x")
        .await
        .unwrap();
    assert_eq!(output.html, "<p>x</p>\n");

    engine
        .render(ReferenceImplementation::MarkdownIt, "y")
        .await
        .unwrap();
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_first_use_loads_once() {
    let loader = Arc::new(FlakyLoader::new(0, Duration::from_millis(50)));
    let engine = Arc::new(EmbeddedEngine::new(loader.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .render(ReferenceImplementation::MarkdownIt, &i.to_string())
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output.html, format!("<p>{}</p>\n", i));
    }
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}

// ============================================================================
// HTTP loader
// ============================================================================

#[tokio::test]
async fn test_http_loader_uses_mirror() {
    let mirror = spawn_mirror().await;
    let loader = HttpScriptLoader::new().unwrap().with_mirror(format!("{}/", mirror));

    let script = PinnedScript::of(ReferenceImplementation::MarkdownIt);
    assert_eq!(
        loader.source_url(script),
        format!("{}/markdown-it.min.js", mirror)
    );

    let engine = EmbeddedEngine::new(Arc::new(loader));
    let output = engine
        .render(ReferenceImplementation::MarkdownIt, "mirrored")
        .await
        .unwrap();
    assert_eq!(output.html, "<p>mirrored</p>\n");
}

#[tokio::test]
async fn test_http_loader_not_found() {
    let mirror = spawn_mirror().await;
    let loader = HttpScriptLoader::new().unwrap().with_mirror(mirror);

    let err = loader
        .load(PinnedScript::of(ReferenceImplementation::CommonMarkJs))
        .await
        .unwrap_err();
    assert!(matches!(err, MarkbenchError::ScriptLoad(_)));
    assert!(err.to_string().contains("404"), "{}", err);
}

#[test]
fn test_http_loader_defaults_to_pinned_url() {
    let loader = HttpScriptLoader::new().unwrap();
    let script = PinnedScript::of(ReferenceImplementation::CommonMarkJs);
    assert_eq!(loader.source_url(script), script.url);
}

