use std::collections::HashMap;

use crate::error::{Result, TranscribeError};

/// Token id <-> text mapping used to build prompts and decode generations
pub trait Tokenizer: Send + Sync {
    fn token_to_id(&self, token: &str) -> Option<u32>;

    fn id_to_token(&self, id: u32) -> Option<String>;

    /// Decode ids to text, optionally dropping special/control tokens
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;
}

pub const END_OF_TEXT: u32 = 50257;
pub const START_OF_TRANSCRIPT: u32 = 50258;
pub const FIRST_LANGUAGE: u32 = 50259;
pub const TRANSLATE: u32 = 50359;
pub const TRANSCRIBE: u32 = 50360;
pub const START_OF_LM: u32 = 50361;
pub const START_OF_PREV: u32 = 50362;
pub const NO_SPEECH: u32 = 50363;
pub const NO_TIMESTAMPS: u32 = 50364;
pub const TIMESTAMP_BEGIN: u32 = 50365;

/// `<|0.00|>` through `<|30.00|>` in 20ms steps
pub const TIMESTAMP_COUNT: u32 = 1501;

const TIMESTAMP_STEP_CENTIS: u32 = 2;

/// Language tokens in vocabulary order, starting at [`FIRST_LANGUAGE`]
const LANGUAGE_TOKENS: [&str; 100] = [
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su", "yue",
];

/// Parse a timestamp control token such as `<|12.34|>` into centiseconds.
///
/// The format is fixed: one or more integer digits, a dot, exactly two
/// fractional digits.
pub fn parse_timestamp_centis(token: &str) -> Option<u32> {
    let inner = token.strip_prefix("<|")?.strip_suffix("|>")?;
    let (seconds, fraction) = inner.split_once('.')?;

    if seconds.is_empty()
        || fraction.len() != 2
        || !seconds.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let seconds: u32 = seconds.parse().ok()?;
    let fraction: u32 = fraction.parse().ok()?;
    seconds.checked_mul(100)?.checked_add(fraction)
}

fn format_timestamp(centis: u32) -> String {
    format!("<|{}.{:02}|>", centis / 100, centis % 100)
}

/// Built-in Whisper multilingual vocabulary.
///
/// Special tokens follow the Whisper layout exactly. Ordinary text tokens
/// are registered explicitly with [`WhisperVocabulary::with_text_token`];
/// serving a real model should use the model's `tokenizer.json` instead.
#[derive(Debug, Clone, Default)]
pub struct WhisperVocabulary {
    text_tokens: HashMap<u32, String>,
    text_ids: HashMap<String, u32>,
}

impl WhisperVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a text token (id must be below [`END_OF_TEXT`])
    pub fn with_text_token(mut self, id: u32, text: impl Into<String>) -> Self {
        debug_assert!(id < END_OF_TEXT, "text token id {} overlaps special tokens", id);
        let text = text.into();
        self.text_ids.insert(text.clone(), id);
        self.text_tokens.insert(id, text);
        self
    }

    pub fn with_text_tokens<I, S>(self, tokens: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        tokens
            .into_iter()
            .fold(self, |vocab, (id, text)| vocab.with_text_token(id, text))
    }

    /// Id of the timestamp token for `seconds`, snapped down to the 20ms grid
    pub fn timestamp_id(seconds: f32) -> u32 {
        let centis = (seconds * 100.0).round().max(0.0) as u32;
        let step = (centis / TIMESTAMP_STEP_CENTIS).min(TIMESTAMP_COUNT - 1);
        TIMESTAMP_BEGIN + step
    }

    fn special_token(id: u32) -> Option<String> {
        let name = match id {
            END_OF_TEXT => "endoftext",
            START_OF_TRANSCRIPT => "startoftranscript",
            TRANSLATE => "translate",
            TRANSCRIBE => "transcribe",
            START_OF_LM => "startoflm",
            START_OF_PREV => "startofprev",
            NO_SPEECH => "nospeech",
            NO_TIMESTAMPS => "notimestamps",
            FIRST_LANGUAGE..=TRANSLATE => *LANGUAGE_TOKENS.get((id - FIRST_LANGUAGE) as usize)?,
            _ if (TIMESTAMP_BEGIN..TIMESTAMP_BEGIN + TIMESTAMP_COUNT).contains(&id) => {
                return Some(format_timestamp(
                    (id - TIMESTAMP_BEGIN) * TIMESTAMP_STEP_CENTIS,
                ));
            }
            _ => return None,
        };
        Some(format!("<|{}|>", name))
    }

    fn special_id(token: &str) -> Option<u32> {
        if let Some(centis) = parse_timestamp_centis(token) {
            if centis % TIMESTAMP_STEP_CENTIS != 0 {
                return None;
            }
            let step = centis / TIMESTAMP_STEP_CENTIS;
            return (step < TIMESTAMP_COUNT).then_some(TIMESTAMP_BEGIN + step);
        }

        let name = token.strip_prefix("<|")?.strip_suffix("|>")?;
        let id = match name {
            "endoftext" => END_OF_TEXT,
            "startoftranscript" => START_OF_TRANSCRIPT,
            "translate" => TRANSLATE,
            "transcribe" => TRANSCRIBE,
            "startoflm" => START_OF_LM,
            "startofprev" => START_OF_PREV,
            "nospeech" => NO_SPEECH,
            "notimestamps" => NO_TIMESTAMPS,
            code => {
                let position = LANGUAGE_TOKENS.iter().position(|&lang| lang == code)?;
                FIRST_LANGUAGE + position as u32
            }
        };
        Some(id)
    }
}

impl Tokenizer for WhisperVocabulary {
    fn token_to_id(&self, token: &str) -> Option<u32> {
        Self::special_id(token).or_else(|| self.text_ids.get(token).copied())
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        if id >= END_OF_TEXT {
            Self::special_token(id)
        } else {
            self.text_tokens.get(&id).cloned()
        }
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut text = String::new();
        for &id in ids {
            if id >= END_OF_TEXT {
                if skip_special_tokens {
                    continue;
                }
                let token = Self::special_token(id)
                    .ok_or_else(|| TranscribeError::Tokenizer(format!("unknown token id {}", id)))?;
                text.push_str(&token);
            } else {
                let token = self
                    .text_tokens
                    .get(&id)
                    .ok_or_else(|| TranscribeError::Tokenizer(format!("unknown token id {}", id)))?;
                text.push_str(token);
            }
        }
        Ok(text)
    }
}

// The lookups live on `TokenizerImpl`; go through `Deref` explicitly so the
// calls do not resolve back to this impl.
#[cfg(feature = "hf-tokenizer")]
impl Tokenizer for tokenizers::Tokenizer {
    fn token_to_id(&self, token: &str) -> Option<u32> {
        (**self).token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        (**self).id_to_token(id)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        (**self)
            .decode(ids, skip_special_tokens)
            .map_err(|e| TranscribeError::Tokenizer(e.to_string()))
    }
}

/// Load a HuggingFace `tokenizer.json`
#[cfg(feature = "hf-tokenizer")]
pub fn load_tokenizer_file(
    path: impl AsRef<std::path::Path>,
) -> Result<std::sync::Arc<dyn Tokenizer>> {
    let path = path.as_ref();
    let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
        TranscribeError::Tokenizer(format!("Failed to load {}: {}", path.display(), e))
    })?;
    Ok(std::sync::Arc::new(tokenizer))
}
