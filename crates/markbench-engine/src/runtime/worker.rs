use std::sync::mpsc;
use std::thread;

use markbench_common::protocol::error::{MarkbenchError, Result};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::context::ScriptContext;
use crate::reference::PinnedScript;

/// Stack size of worker threads. Minified parsers recurse deeply.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

struct RenderJob {
    input: String,
    reply: oneshot::Sender<Result<String>>,
}

/// A dedicated thread owning one [`ScriptContext`]
///
/// Render requests are queued to the thread and evaluated one at a time.
/// Dropping the worker closes the queue; the thread exits once the queued
/// requests are done.
pub struct ScriptWorker {
    script: &'static PinnedScript,
    jobs: mpsc::Sender<RenderJob>,
}

impl ScriptWorker {
    /// Start a worker and load `source` on it
    ///
    /// Resolves once the script is loaded. A load failure stops the thread
    /// and is returned as `MarkbenchError::ScriptLoad`.
    pub async fn start(script: &'static PinnedScript, source: String) -> Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<RenderJob>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name(format!("markbench-js-{}", script.reference))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || run_worker(script, source, ready_tx, jobs_rx))
            .map_err(|e| MarkbenchError::ScriptLoad(format!("Failed to spawn worker: {}", e)))?;

        ready_rx.await.map_err(|_| {
            MarkbenchError::ScriptLoad(format!("{} worker exited during load", script.reference))
        })??;

        Ok(Self {
            script,
            jobs: jobs_tx,
        })
    }

    /// The script this worker evaluates
    pub fn script(&self) -> &'static PinnedScript {
        self.script
    }

    /// Render markdown text on the worker thread
    pub async fn render(&self, input: impl Into<String>) -> Result<String> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(RenderJob {
                input: input.into(),
                reply,
            })
            .map_err(|_| self.stopped())?;

        response.await.map_err(|_| self.stopped())?
    }

    fn stopped(&self) -> MarkbenchError {
        MarkbenchError::ScriptExecution(format!("{} worker has stopped", self.script.reference))
    }
}

fn run_worker(
    script: &'static PinnedScript,
    source: String,
    ready: oneshot::Sender<Result<()>>,
    jobs: mpsc::Receiver<RenderJob>,
) {
    let mut context = match ScriptContext::load(&source, script) {
        Ok(context) => context,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    drop(source);

    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Ok(job) = jobs.recv() {
        let result = context.render(&job.input);
        if let Err(e) = &result {
            warn!("{} render failed: {}", script.reference, e);
        }
        // the caller may have given up waiting
        let _ = job.reply.send(result);
    }

    debug!("{} worker stopped", script.reference);
}
