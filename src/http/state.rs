use std::sync::Arc;

use crate::monitor::LoadMonitor;
use crate::transcribe::{Handler, Language, TranscriptionRequest, TranscriptionResponse};

/// Default request body limit (200 MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 200 * 1024 * 1024;

/// The transcription endpoint's implementation
pub type TranscriptionService =
    dyn Handler<Request = TranscriptionRequest, Response = TranscriptionResponse>;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Handles `POST /v1/audio/transcriptions`
    pub transcriptions: Arc<TranscriptionService>,

    /// Feeds `GET /state`
    pub monitor: LoadMonitor,

    /// Used when the form has no `language` field
    pub default_language: Language,

    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(transcriptions: Arc<TranscriptionService>, monitor: LoadMonitor) -> Self {
        Self {
            transcriptions,
            monitor,
            default_language: Language::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_default_language(mut self, language: Language) -> Self {
        self.default_language = language;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}
