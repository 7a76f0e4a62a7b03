use std::path::Path;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::models::Line;
use crate::core::vtt::{self, Cue};

/// One edit operation against a copy of a base version, addressed by index.
#[derive(Debug, Clone)]
pub enum LineEdit {
    Insert {
        index: usize,
        text: String,
        start: f64,
        end: f64,
    },
    Update {
        index: usize,
        text: Option<String>,
        start: Option<f64>,
        end: Option<f64>,
    },
    Delete {
        index: usize,
    },
}

/// Versioned access to a transcription's lines. Versions are immutable
/// snapshots: every edit copies the base version and persists the result
/// under the next version number. Callers track which version is active.
pub struct LineEditor {
    db: Arc<Database>,
}

impl LineEditor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Lines of one version, ordered by index.
    pub async fn get_version(&self, transcription_id: &str, version: i64) -> Result<Vec<Line>> {
        let lines = self.db.lines_for_version(transcription_id, version).await?;
        if lines.is_empty() {
            return Err(Error::NotFound(format!(
                "version {version} of transcription {transcription_id}"
            )));
        }
        Ok(lines)
    }

    pub async fn latest_version(&self, transcription_id: &str) -> Result<i64> {
        self.db
            .max_line_version(transcription_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("lines for transcription {transcription_id}"))
            })
    }

    /// Copy `base_version`, apply the edits in order, renumber the indices to
    /// be contiguous from 0, and persist the result as the next unused
    /// version. The base version is never touched.
    pub async fn create_version(
        &self,
        transcription_id: &str,
        base_version: i64,
        edits: &[LineEdit],
    ) -> Result<i64> {
        let base = self.get_version(transcription_id, base_version).await?;
        let mut working: Vec<(String, f64, f64)> = base
            .into_iter()
            .map(|l| (l.text, l.start, l.end))
            .collect();

        for edit in edits {
            match edit {
                LineEdit::Insert {
                    index,
                    text,
                    start,
                    end,
                } => {
                    if *index > working.len() {
                        return Err(Error::Validation(format!(
                            "insert index {index} out of range (len {})",
                            working.len()
                        )));
                    }
                    check_times(*start, *end)?;
                    working.insert(*index, (text.clone(), *start, *end));
                }
                LineEdit::Update {
                    index,
                    text,
                    start,
                    end,
                } => {
                    let slot = working.get_mut(*index).ok_or_else(|| {
                        Error::Validation(format!("update index {index} out of range"))
                    })?;
                    if let Some(text) = text {
                        slot.0 = text.clone();
                    }
                    if let Some(start) = start {
                        slot.1 = *start;
                    }
                    if let Some(end) = end {
                        slot.2 = *end;
                    }
                    check_times(slot.1, slot.2)?;
                }
                LineEdit::Delete { index } => {
                    if *index >= working.len() {
                        return Err(Error::Validation(format!(
                            "delete index {index} out of range"
                        )));
                    }
                    working.remove(*index);
                }
            }
        }

        // An empty version would be indistinguishable from a missing one.
        if working.is_empty() {
            return Err(Error::Validation(
                "edits would leave the version empty".to_string(),
            ));
        }

        let next_version = self.db.max_line_version(transcription_id).await?.unwrap_or(0) + 1;
        let lines: Vec<Line> = working
            .into_iter()
            .enumerate()
            .map(|(index, (text, start, end))| Line {
                uuid: Uuid::new_v4().to_string(),
                transcription: transcription_id.to_string(),
                version: next_version,
                index: index as i64,
                text,
                start,
                end,
            })
            .collect();

        self.db.insert_line_version(&lines).await?;
        info!(
            "Created version {next_version} of transcription {transcription_id} ({} lines)",
            lines.len()
        );
        Ok(next_version)
    }

    /// Write a version back out as a WebVTT document.
    pub async fn export_vtt(
        &self,
        transcription_id: &str,
        version: i64,
        dest: &Path,
    ) -> Result<()> {
        let lines = self.get_version(transcription_id, version).await?;
        let cues: Vec<Cue> = lines
            .iter()
            .map(|l| Cue {
                start_ms: (l.start * 1000.0).round() as u64,
                end_ms: (l.end * 1000.0).round() as u64,
                text: l.text.clone(),
            })
            .collect();
        std::fs::write(dest, vtt::serialize(&cues))?;
        Ok(())
    }
}

fn check_times(start: f64, end: f64) -> Result<()> {
    if start < 0.0 || end < start {
        return Err(Error::Validation(format!(
            "invalid cue times: start {start}, end {end}"
        )));
    }
    Ok(())
}
