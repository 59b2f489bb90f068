use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::audio::AudioWindow;
use crate::engine::{Engine, EnginePrompt, GenerationStep, SamplingParams};
use crate::error::{Result, TranscribeError};
use crate::transcribe::assembler::GenerationOutput;
use crate::transcribe::prompt::PromptBuilder;

/// Id of the engine request for one window: `<parent>-<window index>`
pub fn sub_request_id(parent_id: &str, window_index: usize) -> String {
    format!("{}-{}", parent_id, window_index)
}

/// Fans windows out to the engine and gathers their final generations
#[derive(Clone)]
pub struct RequestOrchestrator {
    engine: Arc<dyn Engine>,
    timeout: Option<Duration>,
}

impl RequestOrchestrator {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            timeout: None,
        }
    }

    /// Give up on the whole request after `timeout` (no limit by default)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submit every window concurrently and wait for all of them.
    ///
    /// Outputs come back in window order whatever order the engine finishes
    /// them in. If `cancel` fires, a sub-request fails, or the timeout
    /// elapses, every sub-request the engine accepted and has not finished
    /// is cancelled on the engine and no output is returned.
    #[instrument(skip_all, fields(parent_id = %parent_id, windows = windows.len()))]
    pub async fn transcribe(
        &self,
        parent_id: &str,
        windows: &[AudioWindow],
        prompts: &PromptBuilder,
        params: &SamplingParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<GenerationOutput>> {
        let request_ids: Vec<String> = windows
            .iter()
            .map(|window| sub_request_id(parent_id, window.index))
            .collect();

        // Set once the engine has accepted the sub-request.
        let scheduled: Vec<AtomicBool> = windows.iter().map(|_| AtomicBool::new(false)).collect();

        let mut pending: FuturesUnordered<_> = windows
            .iter()
            .zip(&request_ids)
            .enumerate()
            .map(|(slot, (window, request_id))| {
                let engine = Arc::clone(&self.engine);
                let prompt = prompts.build(window);
                let params = params.clone();
                let request_id = request_id.clone();
                let window_index = window.index;
                let accepted = &scheduled[slot];

                async move {
                    let output =
                        consume(engine, prompt, params, request_id, window_index, accepted).await;
                    (slot, output)
                }
            })
            .collect();

        info!("Dispatching {} window(s) for {}", request_ids.len(), parent_id);

        let deadline = self.timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        let mut outputs: Vec<Option<GenerationOutput>> = vec![None; windows.len()];
        let mut done = vec![false; windows.len()];

        let outcome: Result<()> = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break Err(TranscribeError::Cancelled(parent_id.to_string()));
                }

                _ = sleep_until(deadline) => {
                    break Err(TranscribeError::Timeout(parent_id.to_string()));
                }

                next = pending.next() => match next {
                    Some((slot, Ok(output))) => {
                        debug!("{} completed ({} tokens)", request_ids[slot], output.token_ids.len());
                        done[slot] = true;
                        outputs[slot] = Some(output);
                    }
                    Some((slot, Err(e))) => {
                        error!("{} failed: {}", request_ids[slot], e);
                        done[slot] = true;
                        break Err(e);
                    }
                    None => break Ok(()),
                }
            }
        };

        // Stop consuming the remaining streams before aborting them.
        drop(pending);

        if let Err(e) = outcome {
            let remaining: Vec<&String> = request_ids
                .iter()
                .enumerate()
                .filter(|&(slot, _)| !done[slot] && scheduled[slot].load(Ordering::SeqCst))
                .map(|(_, request_id)| request_id)
                .collect();

            warn!(
                "Aborting {}: cancelling {} in-flight sub-request(s) ({})",
                parent_id,
                remaining.len(),
                e
            );

            for request_id in remaining {
                if let Err(cancel_err) = self.engine.cancel(request_id).await {
                    error!("Failed to cancel {}: {}", request_id, cancel_err);
                }
            }
            return Err(e);
        }

        info!("All {} window(s) completed for {}", outputs.len(), parent_id);
        Ok(outputs.into_iter().flatten().collect())
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drain one engine stream, keeping only its last (cumulative) step
async fn consume(
    engine: Arc<dyn Engine>,
    prompt: EnginePrompt,
    params: SamplingParams,
    request_id: String,
    window_index: usize,
    accepted: &AtomicBool,
) -> Result<GenerationOutput> {
    let mut stream = engine.schedule(prompt, params, request_id.clone()).await?;
    accepted.store(true, Ordering::SeqCst);

    let mut last: Option<GenerationStep> = None;
    while let Some(step) = stream.next().await {
        last = Some(step?);
    }

    let step = last.ok_or_else(|| {
        TranscribeError::Engine(format!("{} ended without producing output", request_id))
    })?;

    if !step.finished {
        warn!("{} stream ended before a finished step", request_id);
    }

    Ok(GenerationOutput {
        window_index,
        token_ids: step.token_ids,
        logprobs: step.logprobs,
    })
}
