//! Endpoint Invoker
//!
//! Evaluates one request text against one registry entry. Remote entries are
//! queried over HTTP, embedded entries are rendered in-process. Both produce
//! the same [`RawRender`] shape.

use async_trait::async_trait;
use markbench_common::protocol::error::{error_chain_message, MarkbenchError, Result};
use markbench_common::Endpoint;
use markbench_engine::EmbeddedEngine;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Unsanitized output of one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRender {
    /// Backend HTML; empty when the backend returned none
    pub html: String,
    /// Version reported by the backend, if any
    pub version: Option<String>,
}

/// Strategy evaluating a request text against an endpoint.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(&self, endpoint: &Endpoint, text: &str) -> Result<RawRender>;
}

/// Default invoker dispatching on the endpoint variant.
pub struct EndpointInvoker {
    http_client: reqwest::Client,
    engine: Arc<EmbeddedEngine>,
}

impl EndpointInvoker {
    pub fn new(http_client: reqwest::Client, engine: Arc<EmbeddedEngine>) -> Self {
        Self {
            http_client,
            engine,
        }
    }

    /// Builds the request URL of a remote endpoint.
    ///
    /// The text is form-encoded and appended as the `text` parameter.
    ///
    /// # Example
    ///
    /// ```
    /// use markbench_aggregator::invoker::EndpointInvoker;
    ///
    /// assert_eq!(
    ///     EndpointInvoker::request_url("http://a.test/render?", "# hi & bye"),
    ///     "http://a.test/render?text=%23+hi+%26+bye"
    /// );
    /// ```
    pub fn request_url(base: &str, text: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(text.as_bytes()).collect();
        format!("{}text={}", base, encoded)
    }

    async fn invoke_remote(&self, base: &str, text: &str) -> Result<RawRender> {
        let url = Self::request_url(base, text);
        debug!("GET {}", base);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| remote_failure("Request failed", base, e))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| remote_failure("Reading response failed", base, e))?;

        parse_remote_body(&body)
    }
}

#[async_trait]
impl Invoke for EndpointInvoker {
    async fn invoke(&self, endpoint: &Endpoint, text: &str) -> Result<RawRender> {
        match endpoint {
            Endpoint::Remote { url } => self.invoke_remote(url, text).await,
            Endpoint::Embedded(reference) => {
                let output = self.engine.render(*reference, text).await?;
                Ok(RawRender {
                    html: output.html,
                    version: Some(output.version),
                })
            }
        }
    }
}

/// Converts a reqwest failure into a transport error.
///
/// Remote URLs may come from encrypted registry entries, so the URL is only
/// logged; the message keeps the full cause chain without it.
fn remote_failure(context: &str, base: &str, error: reqwest::Error) -> MarkbenchError {
    let cause = error_chain_message(&error.without_url());
    debug!("GET {} failed: {}", base, cause);
    MarkbenchError::Transport(format!("{}: {}", context, cause))
}

/// Extracts the `html` and `version` fields of a backend response.
///
/// A missing, null or blank `html` is the empty string, not an error. A body
/// that is not a JSON object is an invalid response.
pub fn parse_remote_body(body: &[u8]) -> Result<RawRender> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        MarkbenchError::InvalidResponse(format!("Backend returned invalid JSON: {}", e))
    })?;

    let object = value.as_object().ok_or_else(|| {
        MarkbenchError::InvalidResponse("Backend response is not a JSON object".into())
    })?;

    let html = match object.get("html") {
        Some(Value::String(html)) if !html.trim().is_empty() => html.clone(),
        Some(Value::String(_)) | Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let version = object.get("version").and_then(|version| match version {
        Value::String(v) => Some(v.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(RawRender { html, version })
}
