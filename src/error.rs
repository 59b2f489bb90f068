use thiserror::Error;

/// All errors produced by the transcription pipeline.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("{0} is not a valid ISO-639-1 language format")]
    InvalidLanguage(String),

    #[error("response_format '{0}' is not implemented")]
    UnsupportedResponseFormat(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("audio decoding failed: {0}")]
    AudioDecode(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("request {0} was cancelled")]
    Cancelled(String),

    #[error("request {0} timed out")]
    Timeout(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TranscribeError {
    /// True for errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLanguage(_) | Self::Validation(_) | Self::AudioDecode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TranscribeError>;
