//! Scripted engine
//!
//! Replays a fixed token script for every window instead of running a model.
//! Used by the test suite and by the binary when no inference backend is
//! linked in. Windows are matched by the `-<index>` suffix of the
//! sub-request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use super::tokenizer::{Tokenizer, END_OF_TEXT};
use super::{
    Engine, EnginePrompt, GenerationStep, Logprob, ModelConfig, OutputStream, SamplingParams,
    SchedulerObserver,
};
use crate::error::{Result, TranscribeError};
use crate::monitor::LoadSample;

/// How a scripted generation ends once its tokens are exhausted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedEnding {
    /// Last step is flagged finished
    #[default]
    Finish,
    /// Stream yields an engine error
    Fail(String),
    /// Stream never completes
    Hang,
}

/// Output script for one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedReply {
    /// Generated tokens in order, with the sampled token's logprob
    pub tokens: Vec<Logprob>,
    #[serde(default)]
    pub ending: ScriptedEnding,
}

impl ScriptedReply {
    pub fn new(tokens: impl IntoIterator<Item = (u32, f32)>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token_id, logprob)| Logprob { token_id, logprob })
                .collect(),
            ending: ScriptedEnding::Finish,
        }
    }

    /// Tokens only, every step with a logprob of zero
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        Self::new(ids.into_iter().map(|id| (id, 0.0)))
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.ending = ScriptedEnding::Fail(message.into());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.ending = ScriptedEnding::Hang;
        self
    }
}

/// Parse a JSON object of `{"<window index>": ScriptedReply}`
pub fn replies_from_json(data: &str) -> Result<HashMap<usize, ScriptedReply>> {
    serde_json::from_str(data)
        .map_err(|e| TranscribeError::Validation(format!("invalid engine script: {}", e)))
}

struct EngineState {
    submitted: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    finished: watch::Sender<usize>,
    max_in_flight: usize,
    observer: Option<Arc<dyn SchedulerObserver>>,
}

impl EngineState {
    fn tick(&self) {
        if let Some(observer) = &self.observer {
            let active = self.in_flight.load(Ordering::SeqCst);
            observer.on_schedule(LoadSample {
                in_flight: active.min(self.max_in_flight),
                in_queue: active.saturating_sub(self.max_in_flight),
                max_in_flight: self.max_in_flight,
            });
        }
    }
}

/// Holds one in-flight slot for as long as the output stream lives
struct InFlightSlot(Arc<EngineState>);

impl InFlightSlot {
    fn acquire(state: Arc<EngineState>) -> Self {
        state.in_flight.fetch_add(1, Ordering::SeqCst);
        state.tick();
        Self(state)
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.tick();
    }
}

/// Engine that replays scripted replies
pub struct ScriptedEngine {
    tokenizer: Arc<dyn Tokenizer>,
    model_config: ModelConfig,
    replies: HashMap<usize, ScriptedReply>,
    default_reply: ScriptedReply,
    state: Arc<EngineState>,
}

impl ScriptedEngine {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, max_model_len: usize) -> Self {
        Self::with_observer(tokenizer, max_model_len, 256, None)
    }

    /// Create an engine that reports every scheduling tick to `observer`
    pub fn with_observer(
        tokenizer: Arc<dyn Tokenizer>,
        max_model_len: usize,
        max_in_flight: usize,
        observer: Option<Arc<dyn SchedulerObserver>>,
    ) -> Self {
        info!(
            "Scripted engine initialized (max_model_len={}, max_in_flight={})",
            max_model_len, max_in_flight
        );

        let (finished, _) = watch::channel(0);

        Self {
            tokenizer,
            model_config: ModelConfig { max_model_len },
            replies: HashMap::new(),
            default_reply: ScriptedReply::from_ids([END_OF_TEXT]),
            state: Arc::new(EngineState {
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                finished,
                max_in_flight,
                observer,
            }),
        }
    }

    /// Script the reply for window `index`
    pub fn with_reply(mut self, index: usize, reply: ScriptedReply) -> Self {
        self.replies.insert(index, reply);
        self
    }

    pub fn with_replies(mut self, replies: HashMap<usize, ScriptedReply>) -> Self {
        self.replies.extend(replies);
        self
    }

    /// Reply for windows without a script
    pub fn with_default_reply(mut self, reply: ScriptedReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Request ids submitted so far, in submission order
    pub fn submitted(&self) -> Vec<String> {
        self.state.submitted.lock().clone()
    }

    /// Request ids passed to `cancel`, in call order
    pub fn cancelled(&self) -> Vec<String> {
        self.state.cancelled.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` generations have finished
    pub async fn wait_for_finished(&self, count: usize) {
        let mut finished = self.state.finished.subscribe();
        // The sender lives as long as `self`, so this cannot fail while awaited.
        let _ = finished.wait_for(|&done| done >= count).await;
    }

    fn reply_for(&self, request_id: &str) -> ScriptedReply {
        request_id
            .rsplit_once('-')
            .and_then(|(_, index)| index.parse::<usize>().ok())
            .and_then(|index| self.replies.get(&index))
            .unwrap_or(&self.default_reply)
            .clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn tokenizer(&self) -> Result<Arc<dyn Tokenizer>> {
        Ok(Arc::clone(&self.tokenizer))
    }

    async fn config(&self) -> Result<ModelConfig> {
        Ok(self.model_config)
    }

    async fn schedule(
        &self,
        prompt: EnginePrompt,
        params: SamplingParams,
        request_id: String,
    ) -> Result<OutputStream> {
        debug!(
            "Scheduling {} ({} audio samples, {} decoder tokens, max_tokens={})",
            request_id,
            prompt.encoder.audio.len(),
            prompt.decoder_token_ids.len(),
            params.max_tokens
        );

        self.state.submitted.lock().push(request_id.clone());

        let reply = self.reply_for(&request_id);
        let state = Arc::clone(&self.state);
        let with_logprobs = params.logprobs.is_some();

        let stream = async_stream::stream! {
            let _slot = InFlightSlot::acquire(Arc::clone(&state));

            let tokens: Vec<Logprob> = reply.tokens.into_iter().take(params.max_tokens).collect();
            let finishes = reply.ending == ScriptedEnding::Finish;
            let mut token_ids = Vec::with_capacity(tokens.len());
            let mut logprobs = Vec::with_capacity(tokens.len());

            for (position, token) in tokens.iter().enumerate() {
                token_ids.push(token.token_id);
                logprobs.push(vec![*token]);
                state.tick();

                yield Ok(GenerationStep {
                    request_id: request_id.clone(),
                    token_ids: token_ids.clone(),
                    logprobs: with_logprobs.then(|| logprobs.clone()),
                    finished: finishes && position + 1 == tokens.len(),
                });
                tokio::task::yield_now().await;
            }

            match reply.ending {
                ScriptedEnding::Finish => {
                    if tokens.is_empty() {
                        yield Ok(GenerationStep {
                            request_id: request_id.clone(),
                            token_ids: Vec::new(),
                            logprobs: with_logprobs.then(Vec::new),
                            finished: true,
                        });
                    }
                    state.finished.send_modify(|done| *done += 1);
                }
                ScriptedEnding::Fail(message) => {
                    yield Err(TranscribeError::Engine(format!("{}: {}", request_id, message)));
                }
                ScriptedEnding::Hang => {
                    std::future::pending::<()>().await;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn cancel(&self, request_id: &str) -> Result<()> {
        info!("Cancelling request {}", request_id);
        self.state.cancelled.lock().push(request_id.to_string());
        Ok(())
    }
}
