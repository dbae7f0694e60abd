use futures::StreamExt;
use markbench_common::protocol::error::{MarkbenchError, Result};
use markbench_common::transport::RecordDecoder;
use markbench_common::ResultEnvelope;
use tracing::debug;

/// Client for a markbench aggregation server.
///
/// Records are handed out as they arrive, so a caller can display the
/// fastest implementations while slower ones are still rendering.
#[derive(Clone)]
pub struct MarkbenchClient {
    server_url: String,
    http_client: reqwest::Client,
}

impl MarkbenchClient {
    /// Creates a client for the server at `server_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(server_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| {
                MarkbenchError::Transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Returns the URL of the render endpoint.
    pub fn render_url(&self) -> String {
        format!("{}/api/get", self.server_url)
    }

    /// Renders `text` on every implementation and collects the records in
    /// arrival order.
    pub async fn render(&self, text: &str) -> Result<Vec<ResultEnvelope>> {
        let mut envelopes = Vec::new();
        self.render_each(text, |envelope| envelopes.push(envelope)).await?;
        Ok(envelopes)
    }

    /// Renders `text` and calls `on_record` for each record as soon as it
    /// has been received in full.
    ///
    /// # Arguments
    ///
    /// * `text` - Markdown source
    /// * `on_record` - Called once per record, in arrival order
    ///
    /// # Returns
    ///
    /// The number of records received
    pub async fn render_each<F>(&self, text: &str, mut on_record: F) -> Result<usize>
    where
        F: FnMut(ResultEnvelope),
    {
        let url = self.render_url();
        let response = self
            .http_client
            .get(&url)
            .query(&[("text", text)])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| MarkbenchError::Transport(format!("Request to {} failed: {}", url, e)))?;

        let mut decoder = RecordDecoder::new();
        let mut received = 0;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                MarkbenchError::Transport(format!("Reading response from {} failed: {}", url, e))
            })?;
            decoder.push(&chunk);

            while let Some(envelope) = decoder.next_record()? {
                received += 1;
                on_record(envelope);
            }
        }

        if let Some(envelope) = decoder.finish()? {
            received += 1;
            on_record(envelope);
        }

        debug!("Received {} records from {}", received, url);
        Ok(received)
    }
}
