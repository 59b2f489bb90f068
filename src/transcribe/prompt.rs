use crate::audio::AudioWindow;
use crate::engine::{EncoderPrompt, EnginePrompt, SamplingParams, Tokenizer};
use crate::error::{Result, TranscribeError};
use crate::transcribe::language::Language;
use crate::transcribe::segment::TIMESTAMP_ZERO_TOKEN;

const START_OF_TRANSCRIPT_TOKEN: &str = "<|startoftranscript|>";
const TRANSCRIBE_TOKEN: &str = "<|transcribe|>";

/// Length of the decoder preamble:
/// `<|startoftranscript|><|lang|><|transcribe|><|0.00|>`
pub const DECODER_PREAMBLE_LEN: usize = 4;

/// Builds the engine prompt for each window.
///
/// Control token ids are resolved once per request. Every window is decoded
/// from relative time zero, so the timestamp anchor is always `<|0.00|>`;
/// the window offset is applied when segments are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBuilder {
    start_of_transcript: u32,
    language: u32,
    task: u32,
    timestamp_anchor: u32,
}

impl PromptBuilder {
    pub fn new(tokenizer: &dyn Tokenizer, language: Language) -> Result<Self> {
        let resolve = |token: &str| {
            tokenizer.token_to_id(token).ok_or_else(|| {
                TranscribeError::Tokenizer(format!("vocabulary has no {} token", token))
            })
        };

        Ok(Self {
            start_of_transcript: resolve(START_OF_TRANSCRIPT_TOKEN)?,
            language: resolve(&language.token())?,
            task: resolve(TRANSCRIBE_TOKEN)?,
            timestamp_anchor: resolve(TIMESTAMP_ZERO_TOKEN)?,
        })
    }

    /// Decoder seed tokens shared by every window
    pub fn decoder_token_ids(&self) -> Vec<u32> {
        vec![
            self.start_of_transcript,
            self.language,
            self.task,
            self.timestamp_anchor,
        ]
    }

    /// Prompt for one window. The window's samples are shared, not copied.
    pub fn build(&self, window: &AudioWindow) -> EnginePrompt {
        EnginePrompt {
            encoder: EncoderPrompt {
                audio: window.samples.clone(),
                sample_rate: window.sample_rate,
            },
            decoder_token_ids: self.decoder_token_ids(),
        }
    }
}

/// Sampling parameters for every window of a request.
///
/// Generation may use whatever the decoder preamble leaves of the model's
/// context; per-step logprobs are only requested for verbose responses.
pub fn sampling_params(
    max_model_len: usize,
    temperature: f32,
    verbose: bool,
    top_logprobs: u32,
) -> SamplingParams {
    SamplingParams {
        max_tokens: max_model_len.saturating_sub(DECODER_PREAMBLE_LEN),
        temperature,
        logprobs: verbose.then_some(top_logprobs),
        skip_special_tokens: false,
        detokenize: false,
    }
}
