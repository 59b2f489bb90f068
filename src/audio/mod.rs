pub mod chunk;
pub mod decode;

pub use chunk::{
    chunk_waveform, AudioWindow, ChunkConfig, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_DURATION_SECS,
};
pub use decode::Waveform;
