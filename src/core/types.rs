use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;

/// Audio codecs the importer accepts. Stored in the database as the
/// canonical lowercase name, mirrored by the schema's CHECK allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AudioType {
    Mp3,
    Mpeg,
    Wav,
    Ogg,
    Flac,
    Aac,
    M4a,
    Wma,
    Ac3,
    Mp2,
    Opus,
    Webm,
}

impl AudioType {
    pub const ALL: [AudioType; 12] = [
        AudioType::Mp3,
        AudioType::Mpeg,
        AudioType::Wav,
        AudioType::Ogg,
        AudioType::Flac,
        AudioType::Aac,
        AudioType::M4a,
        AudioType::Wma,
        AudioType::Ac3,
        AudioType::Mp2,
        AudioType::Opus,
        AudioType::Webm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioType::Mp3 => "mp3",
            AudioType::Mpeg => "mpeg",
            AudioType::Wav => "wav",
            AudioType::Ogg => "ogg",
            AudioType::Flac => "flac",
            AudioType::Aac => "aac",
            AudioType::M4a => "m4a",
            AudioType::Wma => "wma",
            AudioType::Ac3 => "ac3",
            AudioType::Mp2 => "mp2",
            AudioType::Opus => "opus",
            AudioType::Webm => "webm",
        }
    }
}

impl FromStr for AudioType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|t| t.as_str() == lower)
            .copied()
            .ok_or_else(|| Error::Validation(format!("unsupported audio type: {s}")))
    }
}

impl fmt::Display for AudioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whisper model sizes. `.en` variants are English-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum WhisperModel {
    #[serde(rename = "tiny")]
    #[sqlx(rename = "tiny")]
    Tiny,
    #[serde(rename = "tiny.en")]
    #[sqlx(rename = "tiny.en")]
    TinyEn,
    #[serde(rename = "base")]
    #[sqlx(rename = "base")]
    Base,
    #[serde(rename = "base.en")]
    #[sqlx(rename = "base.en")]
    BaseEn,
    #[serde(rename = "small")]
    #[sqlx(rename = "small")]
    Small,
    #[serde(rename = "small.en")]
    #[sqlx(rename = "small.en")]
    SmallEn,
    #[serde(rename = "medium")]
    #[sqlx(rename = "medium")]
    Medium,
    #[serde(rename = "medium.en")]
    #[sqlx(rename = "medium.en")]
    MediumEn,
    #[serde(rename = "large")]
    #[sqlx(rename = "large")]
    Large,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::TinyEn => "tiny.en",
            WhisperModel::Base => "base",
            WhisperModel::BaseEn => "base.en",
            WhisperModel::Small => "small",
            WhisperModel::SmallEn => "small.en",
            WhisperModel::Medium => "medium",
            WhisperModel::MediumEn => "medium.en",
            WhisperModel::Large => "large",
        }
    }

    /// English-only models reject non-English language hints.
    pub fn is_english_only(&self) -> bool {
        matches!(
            self,
            WhisperModel::TinyEn
                | WhisperModel::BaseEn
                | WhisperModel::SmallEn
                | WhisperModel::MediumEn
        )
    }
}

impl FromStr for WhisperModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiny" => Ok(WhisperModel::Tiny),
            "tiny.en" => Ok(WhisperModel::TinyEn),
            "base" => Ok(WhisperModel::Base),
            "base.en" => Ok(WhisperModel::BaseEn),
            "small" => Ok(WhisperModel::Small),
            "small.en" => Ok(WhisperModel::SmallEn),
            "medium" => Ok(WhisperModel::Medium),
            "medium.en" => Ok(WhisperModel::MediumEn),
            "large" => Ok(WhisperModel::Large),
            _ => Err(Error::Validation(format!("unsupported model: {s}"))),
        }
    }
}

impl fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for WhisperModel {
    fn default() -> Self {
        WhisperModel::Base
    }
}

/// Spoken-language hint passed to whisper. `Unknown` asks the engine to
/// auto-detect (no `--language` flag on the command line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum Language {
    #[serde(rename = "unknown")]
    #[sqlx(rename = "unknown")]
    Unknown,
    #[sqlx(rename = "English")]
    English,
    #[sqlx(rename = "Chinese")]
    Chinese,
    #[sqlx(rename = "German")]
    German,
    #[sqlx(rename = "Spanish")]
    Spanish,
    #[sqlx(rename = "Russian")]
    Russian,
    #[sqlx(rename = "Korean")]
    Korean,
    #[sqlx(rename = "French")]
    French,
    #[sqlx(rename = "Japanese")]
    Japanese,
    #[sqlx(rename = "Portuguese")]
    Portuguese,
    #[sqlx(rename = "Turkish")]
    Turkish,
    #[sqlx(rename = "Polish")]
    Polish,
    #[sqlx(rename = "Catalan")]
    Catalan,
    #[sqlx(rename = "Dutch")]
    Dutch,
    #[sqlx(rename = "Arabic")]
    Arabic,
    #[sqlx(rename = "Swedish")]
    Swedish,
    #[sqlx(rename = "Italian")]
    Italian,
    #[sqlx(rename = "Indonesian")]
    Indonesian,
    #[sqlx(rename = "Hindi")]
    Hindi,
    #[sqlx(rename = "Finnish")]
    Finnish,
    #[sqlx(rename = "Vietnamese")]
    Vietnamese,
    #[sqlx(rename = "Hebrew")]
    Hebrew,
    #[sqlx(rename = "Ukrainian")]
    Ukrainian,
    #[sqlx(rename = "Greek")]
    Greek,
}

impl Language {
    pub const ALL: [Language; 24] = [
        Language::Unknown,
        Language::English,
        Language::Chinese,
        Language::German,
        Language::Spanish,
        Language::Russian,
        Language::Korean,
        Language::French,
        Language::Japanese,
        Language::Portuguese,
        Language::Turkish,
        Language::Polish,
        Language::Catalan,
        Language::Dutch,
        Language::Arabic,
        Language::Swedish,
        Language::Italian,
        Language::Indonesian,
        Language::Hindi,
        Language::Finnish,
        Language::Vietnamese,
        Language::Hebrew,
        Language::Ukrainian,
        Language::Greek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::English => "English",
            Language::Chinese => "Chinese",
            Language::German => "German",
            Language::Spanish => "Spanish",
            Language::Russian => "Russian",
            Language::Korean => "Korean",
            Language::French => "French",
            Language::Japanese => "Japanese",
            Language::Portuguese => "Portuguese",
            Language::Turkish => "Turkish",
            Language::Polish => "Polish",
            Language::Catalan => "Catalan",
            Language::Dutch => "Dutch",
            Language::Arabic => "Arabic",
            Language::Swedish => "Swedish",
            Language::Italian => "Italian",
            Language::Indonesian => "Indonesian",
            Language::Hindi => "Hindi",
            Language::Finnish => "Finnish",
            Language::Vietnamese => "Vietnamese",
            Language::Hebrew => "Hebrew",
            Language::Ukrainian => "Ukrainian",
            Language::Greek => "Greek",
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| Error::Validation(format!("unsupported language: {s}")))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Unknown
    }
}

/// Lifecycle of one transcription run: queued -> processing -> complete | error.
/// Rows never leave a terminal status; re-runs create new rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Queued => "queued",
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Complete => "complete",
            TranscriptionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranscriptionStatus::Complete | TranscriptionStatus::Error
        )
    }
}

impl fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_type_parse() {
        assert_eq!("mp3".parse::<AudioType>().unwrap(), AudioType::Mp3);
        assert_eq!("FLAC".parse::<AudioType>().unwrap(), AudioType::Flac);
        assert!(matches!(
            "exe".parse::<AudioType>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_model_parse_round_trip() {
        for s in ["tiny", "base.en", "medium", "large"] {
            assert_eq!(s.parse::<WhisperModel>().unwrap().as_str(), s);
        }
        assert!("huge".parse::<WhisperModel>().is_err());
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("English".parse::<Language>().unwrap(), Language::English);
        assert_eq!("english".parse::<Language>().unwrap(), Language::English);
        assert_eq!("unknown".parse::<Language>().unwrap(), Language::Unknown);
        assert!("Klingon".parse::<Language>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TranscriptionStatus::Queued.is_terminal());
        assert!(!TranscriptionStatus::Processing.is_terminal());
        assert!(TranscriptionStatus::Complete.is_terminal());
        assert!(TranscriptionStatus::Error.is_terminal());
    }
}
