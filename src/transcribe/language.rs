use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::TranscribeError;

/// ISO-639-1 codes accepted by the transcription endpoint
const SUPPORTED_LANGUAGES: [(&str, &str); 57] = [
    ("af", "Afrikaans"),
    ("ar", "Arabic"),
    ("hy", "Armenian"),
    ("az", "Azerbaijani"),
    ("be", "Belarusian"),
    ("bs", "Bosnian"),
    ("bg", "Bulgarian"),
    ("ca", "Catalan"),
    ("zh", "Chinese"),
    ("hr", "Croatian"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("nl", "Dutch"),
    ("en", "English"),
    ("et", "Estonian"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("gl", "Galician"),
    ("de", "German"),
    ("el", "Greek"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hu", "Hungarian"),
    ("is", "Icelandic"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("kn", "Kannada"),
    ("kk", "Kazakh"),
    ("ko", "Korean"),
    ("lv", "Latvian"),
    ("lt", "Lithuanian"),
    ("mk", "Macedonian"),
    ("ms", "Malay"),
    ("mr", "Marathi"),
    ("mi", "Maori"),
    ("ne", "Nepali"),
    ("no", "Norwegian"),
    ("fa", "Persian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sr", "Serbian"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("es", "Spanish"),
    ("sw", "Swahili"),
    ("sv", "Swedish"),
    ("tl", "Tagalog"),
    ("ta", "Tamil"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("vi", "Vietnamese"),
    ("cy", "Welsh"),
];

/// A validated spoken language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Language {
    code: &'static str,
    name: &'static str,
}

impl Language {
    pub fn english() -> Self {
        Self {
            code: "en",
            name: "English",
        }
    }

    /// ISO-639-1 code, e.g. `en`
    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decoder control token selecting this language
    pub fn token(&self) -> String {
        format!("<|{}|>", self.code)
    }

    pub fn all() -> impl Iterator<Item = Language> {
        SUPPORTED_LANGUAGES
            .iter()
            .map(|&(code, name)| Language { code, name })
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::english()
    }
}

impl FromStr for Language {
    type Err = TranscribeError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        Self::all()
            .find(|language| language.code == code)
            .ok_or_else(|| TranscribeError::InvalidLanguage(code.to_string()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_codes() {
        let french: Language = "fr".parse().unwrap();
        assert_eq!(french.name(), "French");
        assert_eq!(french.token(), "<|fr|>");
        assert_eq!(Language::all().count(), 57);
    }

    #[test]
    fn rejects_unknown_codes() {
        let err = "xx".parse::<Language>().unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidLanguage(code) if code == "xx"));
        assert!("EN".parse::<Language>().is_err());
    }
}
