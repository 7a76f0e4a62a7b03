use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::types::{Language, WhisperModel};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub whisper: WhisperConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Whisper CLI binary, resolved through PATH when not absolute.
    pub binary: PathBuf,
    pub model: WhisperModel,
    pub device: String,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Upper bound on simultaneous whisper processes.
    pub max_concurrent: usize,
    /// Wall-clock limit per job; on expiry the subprocess is killed and the
    /// transcription marked as an error.
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_root = ProjectDirs::from("org", "stagewhisper", "stagewhisper")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./stagewhisper-data"));
        Self { data_root }
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("whisper"),
            model: WhisperModel::Base,
            device: "cpu".to_string(),
            language: Language::Unknown,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            timeout_secs: 3600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            whisper: WhisperConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the data root, falling back to defaults when
    /// the file does not exist yet.
    pub fn load(data_root: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(root) = data_root {
            config.storage.data_root = root.to_path_buf();
        }

        let path = config.storage.data_root.join(CONFIG_FILE);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            config = toml::from_str(&raw)
                .map_err(|e| Error::Validation(format!("bad config file {path:?}: {e}")))?;
            if let Some(root) = data_root {
                config.storage.data_root = root.to_path_buf();
            }
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| Error::Validation(format!("cannot serialize config: {e}")))?;
        std::fs::create_dir_all(&self.storage.data_root)?;
        std::fs::write(self.storage.data_root.join(CONFIG_FILE), raw)?;
        Ok(())
    }

    /// `<data_root>/store` — everything the app persists lives under here.
    pub fn store_dir(&self) -> PathBuf {
        self.storage.data_root.join("store")
    }

    /// `<data_root>/store/data` — one directory per entry.
    pub fn data_dir(&self) -> PathBuf {
        self.store_dir().join("data")
    }

    pub fn database_path(&self) -> PathBuf {
        self.store_dir().join("database.sqlite")
    }

    pub fn entry_dir(&self, entry_uuid: &str) -> PathBuf {
        self.data_dir().join(entry_uuid)
    }

    /// Create the on-disk store layout if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.whisper.model, WhisperModel::Base);
        assert_eq!(config.whisper.device, "cpu");
        assert_eq!(config.jobs.max_concurrent, 2);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load(Some(dir.path())).unwrap();
        config.whisper.model = WhisperModel::SmallEn;
        config.jobs.max_concurrent = 4;
        config.save().unwrap();

        let reloaded = Config::load(Some(dir.path())).unwrap();
        assert_eq!(reloaded.whisper.model, WhisperModel::SmallEn);
        assert_eq!(reloaded.jobs.max_concurrent, 4);
    }

    #[test]
    fn test_store_layout_paths() {
        let config = Config::load(Some(Path::new("/tmp/sw"))).unwrap();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/sw/store/database.sqlite")
        );
        assert_eq!(
            config.entry_dir("abc"),
            PathBuf::from("/tmp/sw/store/data/abc")
        );
    }
}
