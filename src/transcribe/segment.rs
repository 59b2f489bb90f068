//! Timestamp-token segment decoding
//!
//! A window's generation interleaves text tokens with timestamp tokens. The
//! decoder scans them left to right: even-numbered timestamps close a
//! segment, odd-numbered ones open the next one. Times are window-relative
//! in the token stream and are rebased onto the window's absolute offset.

use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::tokenizer::parse_timestamp_centis;
use crate::engine::{StepLogprobs, Tokenizer};
use crate::error::{Result, TranscribeError};

/// Token marking 0.00s; every id at or above it is a timestamp
pub const TIMESTAMP_ZERO_TOKEN: &str = "<|0.00|>";

/// Which decoding steps feed a segment's `avg_logprob`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogprobScope {
    /// Every step of the window (historical behaviour)
    #[default]
    Window,
    /// Only the steps inside the segment's own token span
    Segment,
}

/// Per-request options applied while decoding segments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    pub temperature: f32,
    pub logprob_scope: LogprobScope,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            logprob_scope: LogprobScope::Window,
        }
    }
}

/// One segment of the transcribed text and the corresponding details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Unique identifier of the segment, increasing across the transcript
    pub id: usize,

    /// Start time of the segment in seconds
    pub start: f32,

    /// End time of the segment in seconds
    pub end: f32,

    /// Text content of the segment
    pub text: String,

    /// Token ids of the segment's span
    pub tokens: Vec<u32>,

    /// Temperature used for generating the segment
    pub temperature: f32,

    /// Average logprob; absent when logprobs were not requested.
    /// Lower than -1 usually means the decode failed.
    pub avg_logprob: Option<f32>,

    /// Compression ratio of the text; above 2.4 usually means repetition
    pub compression_ratio: f32,

    /// Probability of no speech (not computed)
    pub no_speech_prob: Option<f32>,
}

/// Segments decoded from one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSegments {
    pub segments: Vec<Segment>,

    /// Window ends on a timestamp that opened a segment with no text after it
    pub open_ended: bool,
}

/// UTF-8 length of `text` divided by its zlib-compressed length.
///
/// Empty text has a ratio of 0.
pub fn compression_ratio(text: &str) -> f32 {
    if text.is_empty() {
        return 0.0;
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(text.as_bytes()).is_err() {
        return 0.0;
    }

    match encoder.finish() {
        Ok(compressed) if !compressed.is_empty() => {
            text.len() as f32 / compressed.len() as f32
        }
        _ => 0.0,
    }
}

/// Mean logprob of the sampled token over `steps`
fn average_logprob(steps: &[StepLogprobs]) -> Option<f32> {
    let sampled: Vec<f32> = steps
        .iter()
        .filter_map(|candidates| candidates.first())
        .map(|candidate| candidate.logprob)
        .collect();

    if sampled.is_empty() {
        return None;
    }
    Some(sampled.iter().sum::<f32>() / sampled.len() as f32)
}

/// Turns one window's token stream into transcript segments
#[derive(Clone)]
pub struct SegmentDecoder {
    tokenizer: Arc<dyn Tokenizer>,
    timestamp_begin: u32,
}

impl SegmentDecoder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {
        let timestamp_begin = tokenizer.token_to_id(TIMESTAMP_ZERO_TOKEN).ok_or_else(|| {
            TranscribeError::Tokenizer(format!("vocabulary has no {} token", TIMESTAMP_ZERO_TOKEN))
        })?;

        Ok(Self {
            tokenizer,
            timestamp_begin,
        })
    }

    pub fn is_timestamp(&self, token_id: u32) -> bool {
        token_id >= self.timestamp_begin
    }

    /// Window-relative time of a timestamp token, in centiseconds
    fn timestamp_centis(&self, token_id: u32) -> Result<u32> {
        let token = self.tokenizer.id_to_token(token_id).ok_or_else(|| {
            TranscribeError::Tokenizer(format!("unknown timestamp token id {}", token_id))
        })?;

        parse_timestamp_centis(&token).ok_or_else(|| {
            TranscribeError::Tokenizer(format!("{} is not a timestamp token", token))
        })
    }

    /// Decode one window.
    ///
    /// `window_time_offset` is added to every timestamp and
    /// `segment_id_offset` to every segment id, so callers pass the window's
    /// absolute start and the number of segments already produced.
    pub fn decode(
        &self,
        token_ids: &[u32],
        logprobs: Option<&[StepLogprobs]>,
        window_time_offset: f32,
        segment_id_offset: usize,
        options: &DecodeOptions,
    ) -> Result<WindowSegments> {
        let positions: Vec<usize> = token_ids
            .iter()
            .enumerate()
            .filter(|&(_, &id)| self.is_timestamp(id))
            .map(|(position, _)| position)
            .collect();

        if positions.is_empty() {
            return Ok(WindowSegments::default());
        }

        let open_ended = matches!(
            token_ids,
            [.., text, timestamp] if !self.is_timestamp(*text) && self.is_timestamp(*timestamp)
        );

        let window_logprob = logprobs.and_then(average_logprob);
        let mut segments = Vec::with_capacity(positions.len() / 2 + 1);
        let mut slice_start = 0;
        let mut pending_start_centis = 0;

        for (t, &position) in positions.iter().enumerate() {
            let centis = self.timestamp_centis(token_ids[position])?;

            if t % 2 == 1 {
                pending_start_centis = centis;
                continue;
            }

            let span = &token_ids[slice_start..position];
            let text_ids: Vec<u32> = span
                .iter()
                .copied()
                .filter(|&id| !self.is_timestamp(id))
                .collect();
            let text = self.tokenizer.decode(&text_ids, true)?;

            let avg_logprob = match options.logprob_scope {
                LogprobScope::Window => window_logprob,
                LogprobScope::Segment => logprobs.and_then(|steps| {
                    let end = position.min(steps.len());
                    average_logprob(&steps[slice_start.min(end)..end])
                }),
            };

            let start = window_time_offset + pending_start_centis as f32 / 100.0;
            let end = (window_time_offset + centis as f32 / 100.0).max(start);

            segments.push(Segment {
                id: segment_id_offset + t / 2,
                start,
                end,
                compression_ratio: compression_ratio(&text),
                text,
                tokens: span.to_vec(),
                temperature: options.temperature,
                avg_logprob,
                no_speech_prob: None,
            });

            slice_start = position;
        }

        debug!(
            "Decoded {} segment(s) from {} tokens at offset {:.2}s (open_ended={})",
            segments.len(),
            token_ids.len(),
            window_time_offset,
            open_ended
        );

        Ok(WindowSegments {
            segments,
            open_ended,
        })
    }
}
