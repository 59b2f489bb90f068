pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod monitor;
pub mod transcribe;

pub use audio::{chunk_waveform, AudioWindow, ChunkConfig, Waveform};
pub use config::Config;
pub use engine::{Engine, ScriptedEngine, ScriptedReply, SchedulerObserver, Tokenizer, WhisperVocabulary};
pub use error::{Result, TranscribeError};
pub use http::{create_router, AppState};
pub use monitor::{LoadMonitor, LoadSample};
pub use transcribe::{
    Handler, Language, RequestContext, ResponseFormat, Segment, TranscriptionHandler,
    TranscriptionRequest, TranscriptionResponse, TranscriptionSettings,
};
