use std::fmt;
use std::str::FromStr;

use axum::body::Bytes;
use serde::Serialize;

use crate::error::{Result, TranscribeError};
use crate::transcribe::language::Language;
use crate::transcribe::segment::Segment;

/// Output format requested by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
    VerboseJson,
}

impl ResponseFormat {
    /// Verbose responses carry segments and request per-step logprobs
    pub fn is_verbose(self) -> bool {
        matches!(self, Self::VerboseJson)
    }
}

impl FromStr for ResponseFormat {
    type Err = TranscribeError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "verbose_json" => Ok(Self::VerboseJson),
            "srt" | "vtt" => Err(TranscribeError::UnsupportedResponseFormat(value.to_string())),
            other => Err(TranscribeError::Validation(format!(
                "unknown response_format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::VerboseJson => "verbose_json",
        })
    }
}

/// A validated transcription request
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Encoded audio file
    pub file: Bytes,

    /// MIME type sent with the file part, used as a demuxer hint
    pub content_type: Option<String>,

    pub language: Language,

    /// Accepted for compatibility; not used for decoding
    pub prompt: Option<String>,

    /// Accepted for compatibility; the served model is fixed
    pub model: Option<String>,

    pub temperature: f32,

    pub response_format: ResponseFormat,
}

impl TranscriptionRequest {
    pub fn new(file: impl Into<Bytes>) -> Self {
        Self {
            file: file.into(),
            content_type: None,
            language: Language::default(),
            prompt: None,
            model: None,
            temperature: 0.0,
            response_format: ResponseFormat::default(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = response_format;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(TranscribeError::Validation(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Parse the `temperature` form field
pub fn parse_temperature(value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| TranscribeError::Validation(format!("invalid temperature '{}'", value)))
}

/// `json` response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcription {
    pub text: String,
}

/// Word-level alignment; reserved, never produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Word {
    pub word: String,
    pub start: f32,
    pub end: f32,
}

/// `verbose_json` response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerboseTranscription {
    pub text: String,

    pub language: Language,

    /// Duration of the input audio in seconds, without window padding
    pub duration: f32,

    pub segments: Vec<Segment>,

    pub word: Option<Vec<Word>>,
}

/// Transcript in the requested format
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionResponse {
    Json(Transcription),
    Text(String),
    VerboseJson(VerboseTranscription),
}

impl TranscriptionResponse {
    pub fn text(&self) -> &str {
        match self {
            Self::Json(transcription) => &transcription.text,
            Self::Text(text) => text,
            Self::VerboseJson(transcription) => &transcription.text,
        }
    }
}
