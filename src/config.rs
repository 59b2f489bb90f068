use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::audio::{DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_DURATION_SECS};
use crate::transcribe::{Language, LogprobScope, TranscriptionSettings};

/// Environment variables override file values, e.g.
/// `LOQA_TRANSCRIBE_SERVICE__HTTP__PORT=9000`.
pub const ENV_PREFIX: &str = "LOQA_TRANSCRIBE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transcription: TranscriptionConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-transcribe".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// Largest accepted request body
    pub max_body_mb: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            max_body_mb: 200,
        }
    }
}

impl HttpConfig {
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub window_duration_sec: u32,
    pub sample_rate: u32,
    /// Defaults to `max(2, cores - 1)`
    pub decode_workers: Option<usize>,
    /// Top candidates per step requested for verbose responses
    pub logprobs: u32,
    pub logprob_scope: LogprobScope,
    pub default_language: String,
    /// No limit when unset
    pub request_timeout_secs: Option<u64>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            window_duration_sec: DEFAULT_WINDOW_DURATION_SECS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            decode_workers: None,
            logprobs: 100,
            logprob_scope: LogprobScope::Window,
            default_language: "en".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl TranscriptionConfig {
    pub fn settings(&self) -> TranscriptionSettings {
        TranscriptionSettings {
            window_duration_secs: self.window_duration_sec,
            sample_rate: self.sample_rate,
            top_logprobs: self.logprobs,
            logprob_scope: self.logprob_scope,
            decode_workers: self.decode_workers,
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn default_language(&self) -> Result<Language> {
        self.default_language
            .parse::<Language>()
            .context("invalid transcription.default_language")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_model_len: usize,
    pub max_in_flight: usize,
    /// `tokenizer.json` of the served model; the built-in Whisper
    /// vocabulary is used when unset
    pub tokenizer_path: Option<PathBuf>,
    /// JSON replies for the scripted engine
    pub script_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_model_len: 448,
            max_in_flight: 256,
            tokenizer_path: None,
            script_path: None,
        }
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) layered under the
    /// environment.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("invalid configuration")?;
        cfg.validate()?;

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transcription.window_duration_sec == 0 {
            bail!("transcription.window_duration_sec must be positive");
        }
        if self.transcription.sample_rate == 0 {
            bail!("transcription.sample_rate must be positive");
        }
        if self.engine.max_model_len == 0 {
            bail!("engine.max_model_len must be positive");
        }
        self.transcription.default_language()?;
        Ok(())
    }
}
