use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::core::types::{AudioType, Language, TranscriptionStatus, WhisperModel};

/// A user-imported audio item. Owns its transcriptions; `active_transcription`
/// points at the run whose lines the UI layer should show.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Entry {
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub created: DateTime<Utc>,
    pub in_queue: bool,
    pub queue_weight: i64,
    pub active_transcription: Option<String>,
    pub audio_type: AudioType,
    pub audio_path: String,
    pub audio_name: String,
    pub audio_language: Language,
    pub audio_duration: f64,
    pub audio_added_on: DateTime<Utc>,
}

/// One run of the whisper CLI against an entry's audio. Immutable once
/// `complete` or `error`; re-runs create new rows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transcription {
    pub uuid: String,
    pub entry: String,
    pub transcribed_on: DateTime<Utc>,
    pub path: String,
    pub model: WhisperModel,
    pub language: Language,
    pub status: TranscriptionStatus,
    pub progress: i64,
    pub translated: bool,
    pub error: Option<String>,
    pub completed_on: Option<DateTime<Utc>>,
}

/// A single timed text segment in one version of a transcription's output.
/// Version 0 is the engine's raw output; edits always produce a new version.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Line {
    pub uuid: String,
    pub transcription: String,
    pub version: i64,
    #[sqlx(rename = "line_index")]
    #[serde(rename = "index")]
    pub index: i64,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Process-wide UI preferences, a singleton row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Settings {
    pub dark_mode: bool,
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            language: "English".to_string(),
        }
    }
}

/// Arguments for creating an entry. Enum-valued fields arrive as strings and
/// are validated against the allow-lists on ingress. `duration` is the audio
/// length in seconds; zero means unknown and disables streamed progress.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub name: String,
    pub description: String,
    pub audio_type: String,
    pub language: String,
    pub duration: f64,
}

/// Mirror of an entry's config fields, written to `entry_config.json` inside
/// the entry directory for external inspection. The database row stays
/// authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryConfig {
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub created: DateTime<Utc>,
    pub in_queue: bool,
    pub queue_weight: i64,
    pub active_transcription: Option<String>,
}

impl From<&Entry> for EntryConfig {
    fn from(entry: &Entry) -> Self {
        Self {
            uuid: entry.uuid.clone(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            created: entry.created,
            in_queue: entry.in_queue,
            queue_weight: entry.queue_weight,
            active_transcription: entry.active_transcription.clone(),
        }
    }
}

/// Mirror of an entry's audio fields, written to `audio/parameters.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParameters {
    #[serde(rename = "type")]
    pub audio_type: AudioType,
    pub path: String,
    pub name: String,
    pub language: Language,
    pub duration: f64,
    pub added_on: DateTime<Utc>,
}

impl From<&Entry> for AudioParameters {
    fn from(entry: &Entry) -> Self {
        Self {
            audio_type: entry.audio_type,
            path: entry.audio_path.clone(),
            name: entry.audio_name.clone(),
            language: entry.audio_language,
            duration: entry.audio_duration,
            added_on: entry.audio_added_on,
        }
    }
}

/// Snapshot written to `transcription.json` in the output directory when a
/// run completes, version-0 lines included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSidecar {
    pub uuid: String,
    pub entry: String,
    pub transcribed_on: DateTime<Utc>,
    pub completed_on: DateTime<Utc>,
    pub model: WhisperModel,
    pub language: Language,
    pub status: TranscriptionStatus,
    pub progress: i64,
    pub translated: bool,
    pub lines: Vec<Line>,
}
