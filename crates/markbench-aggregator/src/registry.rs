//! Registry Cache
//!
//! The registry lists every backend implementation the aggregator queries.
//! It is fetched from a remote document, decoded once, and kept as an
//! immutable snapshot until it is older than the refresh interval.
//!
//! # Concurrency
//!
//! - Readers load the current snapshot through an `ArcSwapOption` and never
//!   take a lock while it is fresh
//! - Refreshes are serialized by an async mutex; the freshness check is
//!   repeated after acquiring it, so a burst of stale readers triggers one fetch
//! - A new snapshot is published with a single atomic swap
//!
//! # Failure Policy
//!
//! | Failure | Snapshot cached | No snapshot |
//! |---------|-----------------|-------------|
//! | fetch (network, I/O, timeout) | serve stale | error |
//! | missing passphrase | serve stale | error |
//! | malformed document | error | error |

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use markbench_common::protocol::error::{error_chain_message, MarkbenchError, Result};
use markbench_common::{decode_registry, ImplementationEntry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::RegistryConfig;

/// Where the registry document is read from.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Returns the raw registry document.
    async fn fetch(&self) -> Result<String>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Reads the registry document over HTTP.
pub struct HttpRegistrySource {
    http_client: reqwest::Client,
    url: String,
}

impl HttpRegistrySource {
    /// Creates a source for `url`, giving up on a fetch after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                MarkbenchError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn fetch(&self) -> Result<String> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| fetch_failure("GET", &self.url, e))?;

        response
            .text()
            .await
            .map_err(|e| fetch_failure("Reading", &self.url, e))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn fetch_failure(action: &str, url: &str, error: reqwest::Error) -> MarkbenchError {
    MarkbenchError::RegistryFetch(format!(
        "{} {} failed: {}",
        action,
        url,
        error_chain_message(&error.without_url())
    ))
}

/// Reads the registry document from a local file.
pub struct FileRegistrySource {
    path: PathBuf,
}

impl FileRegistrySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistrySource for FileRegistrySource {
    async fn fetch(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An immutable, timestamped copy of the registry entries.
#[derive(Debug)]
pub struct RegistrySnapshot {
    /// Entries in document order
    pub entries: Vec<Arc<ImplementationEntry>>,
    /// When the document was fetched
    pub fetched_at: Instant,
}

impl RegistrySnapshot {
    /// Returns whether the snapshot is younger than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.fetched_at.elapsed() < max_age
    }
}

/// Cache of the registry with serve-stale semantics.
///
/// Once a snapshot has been loaded successfully, [`RegistryCache::entries`]
/// never fails because of a fetch failure.
pub struct RegistryCache {
    source: Arc<dyn RegistrySource>,
    config: RegistryConfig,
    current: ArcSwapOption<RegistrySnapshot>,
    refresh_lock: Mutex<()>,
}

impl RegistryCache {
    pub fn new(source: Arc<dyn RegistrySource>, config: RegistryConfig) -> Self {
        Self {
            source,
            config,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the published snapshot, if any, without refreshing it.
    pub fn snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current.load_full()
    }

    /// Returns the current entries, refreshing the snapshot if it is stale.
    pub async fn entries(&self) -> Result<Vec<Arc<ImplementationEntry>>> {
        Ok(self.current_snapshot().await?.entries.clone())
    }

    /// Returns a fresh snapshot, or the stale one when a refresh fails
    /// recoverably.
    pub async fn current_snapshot(&self) -> Result<Arc<RegistrySnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;

        // another task may have refreshed while we waited
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        match self.refresh().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match self.current.load_full() {
                Some(stale) if serves_stale(&e) => {
                    if matches!(e, MarkbenchError::Configuration(_)) {
                        error!("Registry refresh failed, serving cached snapshot: {}", e);
                    } else {
                        warn!("Registry refresh failed, serving cached snapshot: {}", e);
                    }
                    Ok(stale)
                }
                _ => {
                    error!("Registry refresh from {} failed: {}", self.source.describe(), e);
                    Err(e)
                }
            },
        }
    }

    /// Fetches, decodes and publishes a new snapshot unconditionally.
    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>> {
        let passphrase = self.config.passphrase.resolve()?;
        let document = self.source.fetch().await?;
        let entries = decode_registry(&document, &passphrase)?;

        let snapshot = Arc::new(RegistrySnapshot {
            entries: entries.into_iter().map(Arc::new).collect(),
            fetched_at: Instant::now(),
        });
        self.current.store(Some(snapshot.clone()));

        info!(
            "Registry refreshed from {}: {} entries",
            self.source.describe(),
            snapshot.entries.len()
        );
        Ok(snapshot)
    }

    fn fresh_snapshot(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current
            .load_full()
            .filter(|snapshot| snapshot.is_fresh(self.config.refresh_interval))
    }
}

fn serves_stale(error: &MarkbenchError) -> bool {
    error.is_fetch_failure() || matches!(error, MarkbenchError::Configuration(_))
}
