use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::models::{AudioParameters, Entry, EntryConfig, NewEntry};
use crate::core::types::{AudioType, Language};

pub const ENTRY_CONFIG_FILE: &str = "entry_config.json";
pub const AUDIO_PARAMETERS_FILE: &str = "parameters.json";

/// Creates, queues, and deletes entries, and owns the per-entry directory
/// layout: `<data_root>/store/data/<uuid>/{audio,transcriptions}`.
pub struct EntryManager {
    db: Arc<Database>,
    config: Config,
}

impl EntryManager {
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        Self { db, config }
    }

    /// Import an audio file as a new entry. Directory creation, the audio
    /// copy, the sidecar writes, and the row insert are one logical step: if
    /// any of them fails, the entry directory is removed and no row remains.
    pub async fn create_entry(&self, source: &Path, args: NewEntry) -> Result<Entry> {
        let audio_type: AudioType = args.audio_type.parse()?;
        let language: Language = args.language.parse()?;
        if !args.duration.is_finite() || args.duration < 0.0 {
            return Err(Error::Validation(format!(
                "invalid audio duration: {}",
                args.duration
            )));
        }

        let audio_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Validation(format!("source path has no file name: {source:?}"))
            })?;

        let uuid = Uuid::new_v4().to_string();
        let entry_dir = self.config.entry_dir(&uuid);
        info!("Creating entry {uuid} for {source:?}");

        let now = Utc::now();
        let entry = Entry {
            uuid: uuid.clone(),
            name: args.name,
            description: args.description,
            created: now,
            in_queue: false,
            queue_weight: 0,
            active_transcription: None,
            audio_type,
            audio_path: entry_dir
                .join("audio")
                .join(&audio_name)
                .to_string_lossy()
                .into_owned(),
            audio_name,
            audio_language: language,
            audio_duration: args.duration,
            audio_added_on: now,
        };

        match self.populate_entry_dir(&entry_dir, source, &entry).await {
            Ok(()) => {
                info!("Entry {uuid} created");
                Ok(entry)
            }
            Err(e) => {
                // Leave no partial entry behind.
                if entry_dir.exists() {
                    if let Err(cleanup) = std::fs::remove_dir_all(&entry_dir) {
                        warn!("Failed to clean up entry dir {entry_dir:?}: {cleanup}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn populate_entry_dir(
        &self,
        entry_dir: &Path,
        source: &Path,
        entry: &Entry,
    ) -> Result<()> {
        std::fs::create_dir_all(entry_dir.join("audio"))?;
        std::fs::create_dir_all(entry_dir.join("transcriptions"))?;

        std::fs::copy(source, &entry.audio_path)?;

        write_json(
            &entry_dir.join(ENTRY_CONFIG_FILE),
            &EntryConfig::from(entry),
        )?;
        write_json(
            &entry_dir.join("audio").join(AUDIO_PARAMETERS_FILE),
            &AudioParameters::from(entry),
        )?;

        self.db.insert_entry(entry).await?;
        Ok(())
    }

    /// Mark an entry for transcription; lower weight runs first.
    pub async fn set_queued(&self, entry_id: &str, weight: i64) -> Result<()> {
        self.db.set_queued(entry_id, weight).await?;
        self.refresh_sidecar(entry_id).await
    }

    pub async fn set_dequeued(&self, entry_id: &str) -> Result<()> {
        self.db.set_dequeued(entry_id).await?;
        self.refresh_sidecar(entry_id).await
    }

    /// Remove the entry row, its transcriptions and lines, and the on-disk
    /// directory tree.
    pub async fn delete_entry(&self, entry_id: &str) -> Result<()> {
        self.db.delete_entry_rows(entry_id).await?;

        let entry_dir = self.config.entry_dir(entry_id);
        if entry_dir.exists() {
            std::fs::remove_dir_all(&entry_dir)?;
        }
        info!("Deleted entry {entry_id}");
        Ok(())
    }

    pub fn entry_dir(&self, entry_id: &str) -> PathBuf {
        self.config.entry_dir(entry_id)
    }

    /// Rewrite `entry_config.json` after a row change. The sidecar is a
    /// mirror for external inspection; failures to write it are non-fatal.
    async fn refresh_sidecar(&self, entry_id: &str) -> Result<()> {
        let entry = self.db.get_entry(entry_id).await?;
        let path = self.config.entry_dir(entry_id).join(ENTRY_CONFIG_FILE);
        if let Err(e) = write_json(&path, &EntryConfig::from(&entry)) {
            warn!("Failed to refresh sidecar for entry {entry_id}: {e}");
        }
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Validation(format!("cannot serialize {path:?}: {e}")))?;
    std::fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_setup(dir: &Path) -> (Config, PathBuf) {
        let config = Config::load(Some(dir)).unwrap();
        config.ensure_layout().unwrap();
        let source = dir.join("clip.mp3");
        std::fs::write(&source, b"not really audio").unwrap();
        (config, source)
    }

    fn new_entry_args() -> NewEntry {
        NewEntry {
            name: "test entry".to_string(),
            description: "test description".to_string(),
            audio_type: "mp3".to_string(),
            language: "English".to_string(),
            duration: 42.5,
        }
    }

    #[tokio::test]
    async fn test_create_entry_success() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config.clone());

        let entry = manager.create_entry(&source, new_entry_args()).await.unwrap();
        assert!(!entry.in_queue);
        assert_eq!(entry.queue_weight, 0);
        assert_eq!(entry.audio_type, AudioType::Mp3);
        assert_eq!(entry.audio_language, Language::English);
        assert_eq!(entry.audio_duration, 42.5);

        // Persisted row matches the returned entry.
        let stored = db.get_entry(&entry.uuid).await.unwrap();
        assert_eq!(stored.audio_type, entry.audio_type);
        assert_eq!(stored.audio_language, entry.audio_language);
        assert_eq!(stored.audio_name, "clip.mp3");

        // On-disk layout: audio copy plus both sidecars.
        let entry_dir = config.entry_dir(&entry.uuid);
        assert!(entry_dir.join("audio/clip.mp3").exists());
        assert!(entry_dir.join("transcriptions").is_dir());
        assert!(entry_dir.join(ENTRY_CONFIG_FILE).exists());
        assert!(entry_dir.join("audio").join(AUDIO_PARAMETERS_FILE).exists());
    }

    #[tokio::test]
    async fn test_create_entry_rejects_bad_audio_type() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config);

        let mut args = new_entry_args();
        args.audio_type = "exe".to_string();
        let err = manager.create_entry(&source, args).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(db.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_entry_rejects_negative_duration() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config);

        let mut args = new_entry_args();
        args.duration = -1.0;
        let err = manager.create_entry(&source, args).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(db.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_entry_cleans_up_on_copy_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config.clone());

        let missing = dir.path().join("does-not-exist.mp3");
        let err = manager
            .create_entry(&missing, new_entry_args())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        // No partial row and no orphaned directories.
        assert!(db.list_entries().await.unwrap().is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(config.data_dir())
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config.clone());

        let entry = manager.create_entry(&source, new_entry_args()).await.unwrap();
        let entry_dir = config.entry_dir(&entry.uuid);

        let raw = std::fs::read_to_string(entry_dir.join(ENTRY_CONFIG_FILE)).unwrap();
        let sidecar: EntryConfig = serde_json::from_str(&raw).unwrap();
        let stored = db.get_entry(&entry.uuid).await.unwrap();
        assert_eq!(sidecar, EntryConfig::from(&stored));

        let raw = std::fs::read_to_string(
            entry_dir.join("audio").join(AUDIO_PARAMETERS_FILE),
        )
        .unwrap();
        let params: AudioParameters = serde_json::from_str(&raw).unwrap();
        assert_eq!(params, AudioParameters::from(&stored));
    }

    #[tokio::test]
    async fn test_queue_updates_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config.clone());

        let entry = manager.create_entry(&source, new_entry_args()).await.unwrap();
        manager.set_queued(&entry.uuid, 2).await.unwrap();

        let raw = std::fs::read_to_string(
            config.entry_dir(&entry.uuid).join(ENTRY_CONFIG_FILE),
        )
        .unwrap();
        let sidecar: EntryConfig = serde_json::from_str(&raw).unwrap();
        assert!(sidecar.in_queue);
        assert_eq!(sidecar.queue_weight, 2);
    }

    #[tokio::test]
    async fn test_delete_entry_removes_rows_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = test_setup(dir.path());
        let db = Database::in_memory().await.unwrap();
        let manager = EntryManager::new(db.clone(), config.clone());

        let entry = manager.create_entry(&source, new_entry_args()).await.unwrap();
        let entry_dir = config.entry_dir(&entry.uuid);
        assert!(entry_dir.exists());

        manager.delete_entry(&entry.uuid).await.unwrap();
        assert!(!entry_dir.exists());
        assert!(db.get_entry(&entry.uuid).await.is_err());

        assert!(matches!(
            manager.delete_entry(&entry.uuid).await,
            Err(Error::NotFound(_))
        ));
    }
}
