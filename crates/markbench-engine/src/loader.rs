//! Script source loading
//!
//! The engine never reads script sources directly. It asks a
//! [`ScriptLoader`], so deployments can fetch the pinned scripts over HTTP
//! while tests supply small stand-ins.

use async_trait::async_trait;
use markbench_common::protocol::error::{error_chain_message, MarkbenchError, Result};
use markbench_common::ReferenceImplementation;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::reference::PinnedScript;

/// Source of pinned script text.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    /// Returns the source text of `script`.
    async fn load(&self, script: &PinnedScript) -> Result<String>;
}

/// Loads scripts from their pinned URL, or from a mirror.
///
/// A mirror is a base URL serving the pinned files under their original file
/// names (e.g. `<mirror>/markdown-it.min.js`).
#[derive(Clone)]
pub struct HttpScriptLoader {
    http_client: reqwest::Client,
    mirror: Option<String>,
}

impl HttpScriptLoader {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                MarkbenchError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http_client,
            mirror: None,
        })
    }

    /// Fetches scripts from `base_url` instead of their pinned location.
    pub fn with_mirror(mut self, base_url: impl Into<String>) -> Self {
        self.mirror = Some(base_url.into());
        self
    }

    /// URL the source of `script` is fetched from.
    pub fn source_url(&self, script: &PinnedScript) -> String {
        match &self.mirror {
            Some(base) => {
                let file_name = script.url.rsplit('/').next().unwrap_or(script.url);
                format!("{}/{}", base.trim_end_matches('/'), file_name)
            }
            None => script.url.to_string(),
        }
    }
}

#[async_trait]
impl ScriptLoader for HttpScriptLoader {
    async fn load(&self, script: &PinnedScript) -> Result<String> {
        let url = self.source_url(script);
        info!("Downloading {} {} from {}", script.reference, script.version, url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| load_failure("fetch", &url, e))?;

        response
            .text()
            .await
            .map_err(|e| load_failure("read", &url, e))
    }
}

fn load_failure(action: &str, url: &str, error: reqwest::Error) -> MarkbenchError {
    MarkbenchError::ScriptLoad(format!(
        "Failed to {} {}: {}",
        action,
        url,
        error_chain_message(&error.without_url())
    ))
}

/// Serves script sources held in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticScriptLoader {
    sources: HashMap<ReferenceImplementation, String>,
}

impl StaticScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the source of one reference implementation.
    pub fn with_source(
        mut self,
        reference: ReferenceImplementation,
        source: impl Into<String>,
    ) -> Self {
        self.sources.insert(reference, source.into());
        self
    }
}

#[async_trait]
impl ScriptLoader for StaticScriptLoader {
    async fn load(&self, script: &PinnedScript) -> Result<String> {
        self.sources.get(&script.reference).cloned().ok_or_else(|| {
            MarkbenchError::ScriptLoad(format!("No source available for {}", script.reference))
        })
    }
}
