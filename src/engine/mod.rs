//! Boundary contract with the sequence-to-sequence inference engine
//!
//! The engine itself (model execution, KV cache, tensor batching) lives
//! outside this crate. Everything here is consumed through the [`Engine`]
//! trait:
//! - `tokenizer()` / `config()` - metadata needed before prompting
//! - `schedule()` - submit one prompt, receive a stream of output steps
//! - `cancel()` - abort an in-flight request by id
//!
//! Scheduling ticks are observed through a [`SchedulerObserver`] registered
//! at construction time.

pub mod scripted;
pub mod tokenizer;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::monitor::LoadSample;

pub use scripted::{ScriptedEngine, ScriptedReply, ScriptedEnding};
pub use tokenizer::{Tokenizer, WhisperVocabulary};

/// Model-level configuration exposed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum decoder sequence length (prompt + generated tokens)
    pub max_model_len: usize,
}

/// Prompt for one window: encoder audio plus decoder seed tokens
#[derive(Debug, Clone)]
pub struct EnginePrompt {
    pub encoder: EncoderPrompt,
    pub decoder_token_ids: Vec<u32>,
}

/// Encoder side of a prompt
#[derive(Debug, Clone)]
pub struct EncoderPrompt {
    pub audio: Arc<[f32]>,
    pub sample_rate: u32,
}

/// Sampling options sent with every sub-request
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    /// Number of top log-probabilities to return per step (None = disabled)
    pub logprobs: Option<u32>,
    pub skip_special_tokens: bool,
    pub detokenize: bool,
}

/// Log-probability of one candidate token at a decoding step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Logprob {
    pub token_id: u32,
    pub logprob: f32,
}

/// Candidates for one decoding step; the sampled token comes first
pub type StepLogprobs = Vec<Logprob>;

/// One step of engine output. Token ids and logprobs are cumulative, so the
/// last step of a stream carries the whole generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStep {
    pub request_id: String,
    pub token_ids: Vec<u32>,
    pub logprobs: Option<Vec<StepLogprobs>>,
    pub finished: bool,
}

pub type OutputStream = BoxStream<'static, Result<GenerationStep>>;

/// Receives a load sample every time the engine's scheduler runs
pub trait SchedulerObserver: Send + Sync {
    fn on_schedule(&self, sample: LoadSample);
}

/// Inference engine boundary
#[async_trait]
pub trait Engine: Send + Sync {
    /// Tokenizer matching the served model
    async fn tokenizer(&self) -> Result<Arc<dyn Tokenizer>>;

    /// Model configuration
    async fn config(&self) -> Result<ModelConfig>;

    /// Submit a prompt under `request_id`
    ///
    /// Returns a stream of cumulative output steps, ending after the step
    /// flagged `finished`.
    async fn schedule(
        &self,
        prompt: EnginePrompt,
        params: SamplingParams,
        request_id: String,
    ) -> Result<OutputStream>;

    /// Abort an in-flight request
    async fn cancel(&self, request_id: &str) -> Result<()>;
}
