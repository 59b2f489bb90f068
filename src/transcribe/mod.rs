//! Transcription pipeline
//!
//! waveform → windows → concurrent engine sub-requests → per-window segment
//! decoding → assembled transcript.

pub mod assembler;
pub mod handler;
pub mod language;
pub mod orchestrator;
pub mod pool;
pub mod prompt;
pub mod segment;
pub mod types;

pub use assembler::{clean_up_tokenization, GenerationOutput, TranscriptAssembler};
pub use handler::{Handler, RequestContext, TranscriptionHandler, TranscriptionSettings};
pub use language::Language;
pub use orchestrator::{sub_request_id, RequestOrchestrator};
pub use pool::DecodePool;
pub use prompt::{sampling_params, PromptBuilder};
pub use segment::{compression_ratio, DecodeOptions, LogprobScope, Segment, SegmentDecoder};
pub use types::{
    ResponseFormat, Transcription, TranscriptionRequest, TranscriptionResponse,
    VerboseTranscription,
};
