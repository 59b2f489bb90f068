use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::audio::{ChunkConfig, Waveform, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_DURATION_SECS};
use crate::engine::Engine;
use crate::error::{Result, TranscribeError};
use crate::transcribe::assembler::TranscriptAssembler;
use crate::transcribe::orchestrator::RequestOrchestrator;
use crate::transcribe::pool::DecodePool;
use crate::transcribe::prompt::{sampling_params, PromptBuilder};
use crate::transcribe::segment::{DecodeOptions, LogprobScope};
use crate::transcribe::types::{
    ResponseFormat, Transcription, TranscriptionRequest, TranscriptionResponse,
    VerboseTranscription,
};

/// Per-request context supplied by the transport
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Parent id for every engine sub-request
    pub request_id: String,

    /// Fires when the client goes away
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// An endpoint implementation the transport calls into
#[async_trait]
pub trait Handler: Send + Sync {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn invoke(&self, request: Self::Request, ctx: RequestContext) -> Result<Self::Response>;
}

/// Tunables for [`TranscriptionHandler`]
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionSettings {
    pub window_duration_secs: u32,
    pub sample_rate: u32,
    /// Candidates per step requested for verbose responses
    pub top_logprobs: u32,
    pub logprob_scope: LogprobScope,
    pub decode_workers: Option<usize>,
    pub request_timeout: Option<Duration>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            window_duration_secs: DEFAULT_WINDOW_DURATION_SECS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            top_logprobs: 100,
            logprob_scope: LogprobScope::Window,
            decode_workers: None,
            request_timeout: None,
        }
    }
}

/// Audio in, transcript out
pub struct TranscriptionHandler {
    engine: Arc<dyn Engine>,
    orchestrator: RequestOrchestrator,
    pool: DecodePool,
    settings: TranscriptionSettings,
}

impl TranscriptionHandler {
    pub fn new(engine: Arc<dyn Engine>, settings: TranscriptionSettings) -> Self {
        info!(
            "Transcription handler ready ({}s windows at {} Hz)",
            settings.window_duration_secs, settings.sample_rate
        );

        Self {
            orchestrator: RequestOrchestrator::new(Arc::clone(&engine))
                .with_timeout(settings.request_timeout),
            pool: DecodePool::new(settings.decode_workers),
            engine,
            settings,
        }
    }

    pub fn settings(&self) -> &TranscriptionSettings {
        &self.settings
    }
}

#[async_trait]
impl Handler for TranscriptionHandler {
    type Request = TranscriptionRequest;
    type Response = TranscriptionResponse;

    #[instrument(
        skip_all,
        fields(
            request_id = %ctx.request_id,
            language = %request.language,
            format = %request.response_format,
        )
    )]
    async fn invoke(
        &self,
        request: TranscriptionRequest,
        ctx: RequestContext,
    ) -> Result<TranscriptionResponse> {
        request.validate()?;

        let verbose = request.response_format.is_verbose();
        let chunking = ChunkConfig::new(self.settings.window_duration_secs, self.settings.sample_rate);

        let file = request.file.clone();
        let content_type = request.content_type.clone();
        let audio = self.pool.run(move || {
            let waveform = Waveform::decode(&file, content_type.as_deref(), chunking.sample_rate)?;
            Ok((waveform.duration_secs(), chunking.chunk(&waveform.samples)))
        });
        let metadata = async { tokio::try_join!(self.engine.tokenizer(), self.engine.config()) };

        let ((duration, windows), (tokenizer, model_config)) = tokio::try_join!(audio, metadata)?;

        if ctx.cancel.is_cancelled() {
            return Err(TranscribeError::Cancelled(ctx.request_id));
        }

        info!(
            "Transcribing {:.2}s of audio in {} window(s)",
            duration,
            windows.len()
        );

        let prompts = PromptBuilder::new(tokenizer.as_ref(), request.language)?;
        let params = sampling_params(
            model_config.max_model_len,
            request.temperature,
            verbose,
            self.settings.top_logprobs,
        );

        let outputs = self
            .orchestrator
            .transcribe(&ctx.request_id, &windows, &prompts, &params, &ctx.cancel)
            .await?;

        let assembler = TranscriptAssembler::new(tokenizer, self.settings.window_duration_secs)?;
        let options = DecodeOptions {
            temperature: request.temperature,
            logprob_scope: self.settings.logprob_scope,
        };
        let (segments, text) = self
            .pool
            .run(move || assembler.assemble(&outputs, &options))
            .await?;

        info!("Transcribed {} segment(s) for {}", segments.len(), ctx.request_id);

        Ok(match request.response_format {
            ResponseFormat::Json => TranscriptionResponse::Json(Transcription { text }),
            ResponseFormat::Text => TranscriptionResponse::Text(text),
            ResponseFormat::VerboseJson => TranscriptionResponse::VerboseJson(VerboseTranscription {
                text,
                language: request.language,
                duration,
                segments,
                word: None,
            }),
        })
    }
}
