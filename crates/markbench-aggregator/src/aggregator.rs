//! Scatter-Gather Aggregator
//!
//! One request text is evaluated against every registry entry concurrently.
//! Each completed evaluation becomes one [`ResultEnvelope`]; envelopes are
//! written to the response in completion order, one at a time, by a single
//! consumer.

use futures::FutureExt;
use markbench_common::protocol::error::{MarkbenchError, Result};
use markbench_common::transport::encode_record;
use markbench_common::{ImplementationEntry, RenderedHtml, ResultEnvelope};
use rand::seq::SliceRandom;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AggregatorConfig;
use crate::invoker::Invoke;
use crate::registry::RegistryCache;
use crate::sanitize::HtmlSanitizer;

/// Work in flight for one request.
///
/// Every spawned unit sends exactly one envelope, even when the invoker or
/// the sanitizer panics; the receiver closes once all of them have finished.
pub struct Dispatch {
    /// Number of envelopes that will be produced
    pub expected: usize,
    receiver: mpsc::UnboundedReceiver<ResultEnvelope>,
}

impl Dispatch {
    /// Waits for the next completed envelope, or `None` when all are done.
    pub async fn next(&mut self) -> Option<ResultEnvelope> {
        self.receiver.recv().await
    }
}

/// Fans a request out to every registry entry and gathers the results.
pub struct Aggregator {
    registry: Arc<RegistryCache>,
    invoker: Arc<dyn Invoke>,
    sanitizer: Arc<dyn HtmlSanitizer>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(
        registry: Arc<RegistryCache>,
        invoker: Arc<dyn Invoke>,
        sanitizer: Arc<dyn HtmlSanitizer>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            registry,
            invoker,
            sanitizer,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<RegistryCache> {
        &self.registry
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Truncates `text` to the configured maximum number of characters.
    pub fn clamp_text(&self, text: &str) -> String {
        match text.char_indices().nth(self.config.max_text_length) {
            Some((cut, _)) => text[..cut].to_string(),
            None => text.to_string(),
        }
    }

    /// Starts evaluating `text` against every registry entry.
    ///
    /// Entries are visited in random order so no backend is consistently
    /// queried first. A registry failure is returned before anything is
    /// spawned; failures of individual backends end up in their envelopes.
    ///
    /// # Arguments
    ///
    /// * `text` - Markdown source; truncated to the configured maximum
    ///
    /// # Returns
    ///
    /// A [`Dispatch`] yielding one envelope per entry
    pub async fn dispatch(&self, text: &str) -> Result<Dispatch> {
        let mut entries = self.registry.entries().await?;
        entries.shuffle(&mut rand::thread_rng());

        let text: Arc<str> = Arc::from(self.clamp_text(text));
        let (sender, receiver) = mpsc::unbounded_channel();
        let expected = entries.len();
        debug!("Dispatching {} chars to {} backends", text.chars().count(), expected);

        for entry in entries {
            let sender = sender.clone();
            let invoker = self.invoker.clone();
            let sanitizer = self.sanitizer.clone();
            let text = text.clone();
            let timeout = self.config.backend_timeout;

            tokio::spawn(async move {
                let start = Instant::now();
                let unit = evaluate(&entry, invoker.as_ref(), sanitizer.as_ref(), &text, timeout);
                let envelope = match AssertUnwindSafe(unit).catch_unwind().await {
                    Ok(envelope) => envelope,
                    Err(panic) => {
                        let message = panic_message(&*panic);
                        warn!("Backend {} panicked: {}", entry.name, message);
                        let failure =
                            MarkbenchError::Internal(format!("Evaluation panicked: {}", message));
                        ResultEnvelope::from_outcome(&entry, Err(failure), start.elapsed())
                    }
                };
                // The receiver is gone when the caller stopped reading.
                let _ = sender.send(envelope);
            });
        }

        Ok(Dispatch { expected, receiver })
    }

    /// Writes every envelope of `dispatch` to `writer` as it completes.
    ///
    /// Each record is flushed before the next one is written. Writing stops
    /// at the first I/O error (usually a client that went away); the
    /// remaining units still run to completion and their results are dropped.
    ///
    /// # Returns
    ///
    /// The number of records written
    pub async fn write_records<W>(mut dispatch: Dispatch, mut writer: W) -> usize
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;

        while let Some(envelope) = dispatch.next().await {
            let record = match encode_record(&envelope) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Dropping record for {}: {}", envelope.name, e);
                    continue;
                }
            };

            let sent = async {
                writer.write_all(&record).await?;
                writer.flush().await
            }
            .await;

            if let Err(e) = sent {
                warn!(
                    "Response stream closed after {} of {} records: {}",
                    written, dispatch.expected, e
                );
                return written;
            }
            written += 1;
        }

        if let Err(e) = writer.shutdown().await {
            debug!("Failed to close response stream: {}", e);
        }
        written
    }

    /// Dispatches `text` and streams the records to `writer`.
    pub async fn render_to<W>(&self, text: &str, writer: W) -> Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let dispatch = self.dispatch(text).await?;
        Ok(Self::write_records(dispatch, writer).await)
    }

    /// Dispatches `text` and collects every envelope in completion order.
    pub async fn collect(&self, text: &str) -> Result<Vec<ResultEnvelope>> {
        let mut dispatch = self.dispatch(text).await?;
        let mut envelopes = Vec::with_capacity(dispatch.expected);
        while let Some(envelope) = dispatch.next().await {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }
}

/// Runs one unit of work: invoke, sanitize and wrap.
///
/// The elapsed time covers the backend call and sanitization.
async fn evaluate(
    entry: &ImplementationEntry,
    invoker: &dyn Invoke,
    sanitizer: &dyn HtmlSanitizer,
    text: &str,
    timeout: Duration,
) -> ResultEnvelope {
    let start = Instant::now();

    let outcome = match tokio::time::timeout(timeout, invoker.invoke(&entry.endpoint, text)).await {
        Ok(Ok(raw)) => sanitize(sanitizer, raw.html, raw.version),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(MarkbenchError::Timeout(timeout.as_millis() as u64)),
    };

    if let Err(e) = &outcome {
        warn!("Backend {} failed: {}", entry.name, e);
    }

    ResultEnvelope::from_outcome(entry, outcome, start.elapsed())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown cause".to_string()
    }
}

fn sanitize(
    sanitizer: &dyn HtmlSanitizer,
    html: String,
    version: Option<String>,
) -> Result<RenderedHtml> {
    if html.trim().is_empty() {
        return Ok(RenderedHtml {
            html,
            version,
            ..Default::default()
        });
    }

    let (html_clean, html_safe) = sanitizer.clean(&html)?;
    Ok(RenderedHtml {
        html,
        html_clean,
        html_safe,
        version,
    })
}
