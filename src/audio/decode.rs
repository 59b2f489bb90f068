use std::io::Cursor;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::error::{Result, TranscribeError};

/// Input frames per resampler call
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

fn decode_error(stage: &str, e: impl std::fmt::Display) -> TranscribeError {
    TranscribeError::AudioDecode(format!("{}: {}", stage, e))
}

/// Mono PCM audio at a fixed sample rate
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode an uploaded audio file into mono samples at `target_rate`.
    ///
    /// The container is probed from the bytes, with `content_type` as a
    /// hint. Every channel layout is averaged down to mono.
    pub fn decode(data: &[u8], content_type: Option<&str>, target_rate: u32) -> Result<Self> {
        let mut track = AudioTrack::open(data, content_type)?;
        let samples = track.read_mono()?;

        if samples.is_empty() {
            return Err(TranscribeError::AudioDecode(
                "no audio samples decoded".to_string(),
            ));
        }

        let samples = if track.sample_rate == target_rate {
            samples
        } else {
            debug!("Resampling {}Hz -> {}Hz", track.sample_rate, target_rate);
            resample(&samples, track.sample_rate, target_rate)?
        };

        let waveform = Self::new(samples, target_rate);
        info!(
            "Audio decoded: {:.1}s at {}Hz mono (source {}Hz, up to {} channels)",
            waveform.duration_secs(),
            target_rate,
            track.sample_rate,
            track.max_channels
        );

        Ok(waveform)
    }

    /// Duration of the audio in seconds
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Default track of a probed container with its decoder
struct AudioTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    max_channels: usize,
}

impl AudioTrack {
    fn open(data: &[u8], content_type: Option<&str>) -> Result<Self> {
        let source = MediaSourceStream::new(Box::new(Cursor::new(data.to_vec())), Default::default());

        let mut hint = Hint::new();
        if let Some(mime) = content_type {
            hint.mime_type(mime);
        }

        let format = symphonia::default::get_probe()
            .format(
                &hint,
                source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| decode_error("probe", e))?
            .format;

        let track = format
            .default_track()
            .ok_or_else(|| TranscribeError::AudioDecode("no audio track found".to_string()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| TranscribeError::AudioDecode("unknown sample rate".to_string()))?;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| decode_error("codec", e))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            max_channels: 0,
        })
    }

    /// Decode every packet of the track, averaging each frame to mono.
    ///
    /// The channel count is taken from each decoded buffer, not from the
    /// container header, which some demuxers leave unset.
    fn read_mono(&mut self) -> Result<Vec<f32>> {
        let mut mono = Vec::new();

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(decode_error("packet", e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt audio packet: {}", e);
                    continue;
                }
                Err(e) => return Err(decode_error("decode", e)),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let channels = decoded.spec().channels.count().max(1);
            self.max_channels = self.max_channels.max(channels);

            let mut buffer = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            buffer.copy_interleaved_ref(decoded);
            mix_to_mono(buffer.samples(), channels, &mut mono);
        }

        Ok(mono)
    }
}

fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Convert mono audio between fixed rates.
///
/// The tail is zero-padded to a whole resampler chunk and the result cut
/// back to the duration of the input.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Cubic,
        RESAMPLE_CHUNK_FRAMES,
        1,
    )
    .map_err(|e| decode_error("resampler init", e))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected + resampler.output_frames_max());
    let mut block = vec![vec![0f32; resampler.output_frames_max()]; 1];
    let mut input = vec![0f32; RESAMPLE_CHUNK_FRAMES];

    for chunk in samples.chunks(RESAMPLE_CHUNK_FRAMES) {
        input[..chunk.len()].copy_from_slice(chunk);
        input[chunk.len()..].fill(0.0);

        let (_, produced) = resampler
            .process_into_buffer(&[&input[..]], &mut block, None)
            .map_err(|e| decode_error("resample", e))?;
        output.extend_from_slice(&block[0][..produced]);
    }

    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_mix_averages_each_frame() {
        let mut out = Vec::new();
        mix_to_mono(&[0.5, -0.5, 1.0, 0.0, 0.25, 0.75], 2, &mut out);
        assert_eq!(out, vec![0.0, 0.5, 0.5]);

        mix_to_mono(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out.len(), 5);
    }
}
