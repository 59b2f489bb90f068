use std::sync::Arc;
use tracing::debug;

/// Default window length accepted by the encoder
pub const DEFAULT_WINDOW_DURATION_SECS: u32 = 30;

/// Sample rate the engine family expects
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// Chunk configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Duration of each window in seconds (default: 30)
    pub window_duration_secs: u32,
    /// Sample rate of the waveform being chunked
    pub sample_rate: u32,
}

impl ChunkConfig {
    pub fn new(window_duration_secs: u32, sample_rate: u32) -> Self {
        Self {
            window_duration_secs,
            sample_rate,
        }
    }

    /// Number of samples in every window
    pub fn window_samples(&self) -> usize {
        self.window_duration_secs as usize * self.sample_rate as usize
    }

    pub fn chunk(&self, waveform: &[f32]) -> Vec<AudioWindow> {
        chunk_waveform(waveform, self.window_duration_secs, self.sample_rate)
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DURATION_SECS, DEFAULT_SAMPLE_RATE)
    }
}

/// A fixed-length slice of the input waveform
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// Window number (0-indexed)
    pub index: usize,
    /// Window length in seconds
    pub duration_secs: u32,
    /// Sample rate
    pub sample_rate: u32,
    /// Exactly `duration_secs * sample_rate` samples, zero-padded at the tail
    pub samples: Arc<[f32]>,
}

impl AudioWindow {
    /// Absolute start of this window in seconds
    pub fn time_offset_secs(&self) -> f32 {
        (self.index as u64 * self.duration_secs as u64) as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Split a mono waveform into equal windows of `window_duration_secs`.
///
/// The tail is padded with silence up to the next window boundary. Lengths
/// that are already an exact multiple of the window are never padded; an
/// empty waveform yields a single silent window.
pub fn chunk_waveform(
    waveform: &[f32],
    window_duration_secs: u32,
    sample_rate: u32,
) -> Vec<AudioWindow> {
    let window_samples = window_duration_secs as usize * sample_rate as usize;
    if window_samples == 0 {
        return Vec::new();
    }

    let remainder = waveform.len() % window_samples;
    let padding = if waveform.is_empty() {
        window_samples
    } else if remainder == 0 {
        0
    } else {
        window_samples - remainder
    };

    let padded_len = waveform.len() + padding;
    let count = padded_len / window_samples;

    debug!(
        "Chunking {} samples into {} window(s) of {}s ({} padding samples)",
        waveform.len(),
        count,
        window_duration_secs,
        padding
    );

    (0..count)
        .map(|index| {
            let start = index * window_samples;
            let end = (start + window_samples).min(waveform.len());

            let mut samples = Vec::with_capacity(window_samples);
            if start < end {
                samples.extend_from_slice(&waveform[start..end]);
            }
            samples.resize(window_samples, 0.0);

            AudioWindow {
                index,
                duration_secs: window_duration_secs,
                sample_rate,
                samples: samples.into(),
            }
        })
        .collect()
}
