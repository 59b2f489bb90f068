use std::sync::Arc;

use tracing::debug;

use crate::engine::{StepLogprobs, Tokenizer};
use crate::error::Result;
use crate::transcribe::segment::{DecodeOptions, Segment, SegmentDecoder};

/// Final generation of one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    /// Window number the output belongs to
    pub window_index: usize,
    pub token_ids: Vec<u32>,
    pub logprobs: Option<Vec<StepLogprobs>>,
}

/// Joins per-window generations into one transcript
#[derive(Clone)]
pub struct TranscriptAssembler {
    tokenizer: Arc<dyn Tokenizer>,
    decoder: SegmentDecoder,
    window_duration_secs: u32,
}

impl TranscriptAssembler {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, window_duration_secs: u32) -> Result<Self> {
        let decoder = SegmentDecoder::new(Arc::clone(&tokenizer))?;
        Ok(Self {
            tokenizer,
            decoder,
            window_duration_secs,
        })
    }

    /// Decode every window in order and the full text once.
    ///
    /// `outputs` must be in window order. Segment times are rebased by
    /// `window_index * window_duration_secs` and ids continue from the
    /// previous windows' count.
    pub fn assemble(
        &self,
        outputs: &[GenerationOutput],
        options: &DecodeOptions,
    ) -> Result<(Vec<Segment>, String)> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut all_tokens: Vec<u32> = Vec::new();

        for output in outputs {
            let time_offset =
                (output.window_index as u64 * self.window_duration_secs as u64) as f32;

            let window = self.decoder.decode(
                &output.token_ids,
                output.logprobs.as_deref(),
                time_offset,
                segments.len(),
                options,
            )?;

            if window.open_ended {
                debug!(
                    "Window {} ends inside a segment at {:.2}s",
                    output.window_index, time_offset
                );
            }

            segments.extend(window.segments);
            all_tokens.extend_from_slice(&output.token_ids);
        }

        // Timestamps are not always registered as special tokens, so the
        // tokenizer's own skipping cannot be relied on to drop them.
        let text_ids: Vec<u32> = all_tokens
            .iter()
            .copied()
            .filter(|&id| !self.decoder.is_timestamp(id))
            .collect();
        let text = clean_up_tokenization(&self.tokenizer.decode(&text_ids, true)?);

        debug!(
            "Assembled {} segment(s) from {} window(s), {} tokens",
            segments.len(),
            outputs.len(),
            all_tokens.len()
        );

        Ok((segments, text))
    }
}

/// Remove the spaces BPE decoding leaves before punctuation and inside
/// contractions, then collapse runs of whitespace.
pub fn clean_up_tokenization(text: &str) -> String {
    const REPLACEMENTS: [(&str, &str); 10] = [
        (" .", "."),
        (" ?", "?"),
        (" !", "!"),
        (" ,", ","),
        (" ' ", "'"),
        (" n't", "n't"),
        (" 'm", "'m"),
        (" 's", "'s"),
        (" 've", "'ve"),
        (" 're", "'re"),
    ];

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    REPLACEMENTS
        .iter()
        .fold(collapsed, |acc, (from, to)| acc.replace(from, to))
}
