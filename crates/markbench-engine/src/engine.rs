use markbench_common::protocol::error::{MarkbenchError, Result};
use markbench_common::ReferenceImplementation;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::loader::ScriptLoader;
use crate::reference::PinnedScript;
use crate::runtime::ScriptWorker;

/// Output of one embedded rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub html: String,
    /// Pinned version of the implementation that rendered
    pub version: String,
}

/// In-process renderer for the reference implementations
///
/// Each implementation gets its own [`ScriptWorker`], started the first time
/// it is needed. Concurrent first uses share one load. A failed load leaves
/// the slot empty, so the next request tries again.
///
/// # Example
///
/// ```no_run
/// use markbench_common::ReferenceImplementation;
/// use markbench_engine::{EmbeddedEngine, HttpScriptLoader};
/// use std::sync::Arc;
///
/// # async fn example() -> markbench_common::Result<()> {
/// let engine = EmbeddedEngine::new(Arc::new(HttpScriptLoader::new()?));
/// let output = engine.render(ReferenceImplementation::CommonMarkJs, "# hi").await?;
/// assert_eq!(output.html, "<h1>hi</h1>\n");
/// # Ok(())
/// # }
/// ```
pub struct EmbeddedEngine {
    loader: Arc<dyn ScriptLoader>,
    workers: HashMap<ReferenceImplementation, OnceCell<ScriptWorker>>,
}

impl EmbeddedEngine {
    pub fn new(loader: Arc<dyn ScriptLoader>) -> Self {
        let workers = ReferenceImplementation::ALL
            .into_iter()
            .map(|reference| (reference, OnceCell::new()))
            .collect();

        Self { loader, workers }
    }

    /// Render `input` with a reference implementation, loading it if needed
    ///
    /// # Arguments
    ///
    /// * `reference` - The implementation to render with
    /// * `input` - Markdown text
    ///
    /// # Returns
    ///
    /// The rendered HTML and the implementation's pinned version
    pub async fn render(
        &self,
        reference: ReferenceImplementation,
        input: &str,
    ) -> Result<EngineOutput> {
        let worker = self.worker(reference).await?;
        let html = worker.render(input).await?;

        Ok(EngineOutput {
            html,
            version: worker.script().version.to_string(),
        })
    }

    /// Returns whether the implementation's script is loaded
    pub fn is_loaded(&self, reference: ReferenceImplementation) -> bool {
        self.workers
            .get(&reference)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    async fn worker(&self, reference: ReferenceImplementation) -> Result<&ScriptWorker> {
        let script = PinnedScript::of(reference);
        let cell = self.workers.get(&reference).ok_or_else(|| {
            MarkbenchError::ScriptLoad(format!("{} is not available", reference))
        })?;

        cell.get_or_try_init(|| async {
            let started = match self.loader.load(script).await {
                Ok(source) => ScriptWorker::start(script, source).await,
                Err(e) => Err(e),
            };

            match &started {
                Ok(_) => info!("Loaded {} {}", script.reference, script.version),
                Err(e) => warn!("Failed to load {}: {}", script.reference, e),
            }
            started
        })
        .await
    }
}
