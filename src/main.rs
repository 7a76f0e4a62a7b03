use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use stagewhisper::core::config::Config;
use stagewhisper::core::database::Database;
use stagewhisper::core::entry::EntryManager;
use stagewhisper::core::lines::LineEditor;
use stagewhisper::core::models::NewEntry;
use stagewhisper::core::runner::{JobParams, JobRunner};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data root directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an audio file as a new entry
    Import {
        /// Path to the audio file
        audio: PathBuf,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        /// Audio container type (defaults to the file extension)
        #[arg(long)]
        audio_type: Option<String>,

        /// Spoken language of the audio
        #[arg(long, default_value = "unknown")]
        language: String,

        /// Audio length in seconds; enables streamed progress reporting
        #[arg(long, default_value_t = 0.0)]
        duration: f64,

        /// Queue the entry for transcription right away
        #[arg(long)]
        queue: bool,
    },

    /// List all entries
    List,

    /// Add an entry to the transcription queue
    Queue {
        entry: String,

        /// Lower weight runs first
        #[arg(long, default_value_t = 0)]
        weight: i64,
    },

    /// Remove an entry from the transcription queue
    Dequeue { entry: String },

    /// Transcribe every queued entry
    Run,

    /// Transcribe a single entry and wait for it to finish
    Transcribe {
        entry: String,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Override the entry's audio language
        #[arg(long)]
        language: Option<String>,

        /// Translate the output to English
        #[arg(long)]
        translate: bool,
    },

    /// Delete an entry, its transcriptions, and its files
    Delete { entry: String },

    /// Print the lines of a transcription version
    Lines {
        transcription: String,

        /// Version to print (defaults to the latest)
        #[arg(long)]
        version: Option<i64>,
    },

    /// Export a transcription version as a WebVTT file
    Export {
        transcription: String,
        dest: PathBuf,

        #[arg(long)]
        version: Option<i64>,
    },

    /// Show or update application preferences
    Settings {
        #[arg(long)]
        dark_mode: Option<bool>,

        /// Interface language
        #[arg(long)]
        language: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagewhisper=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(args.data_root.as_deref())?;
    config.ensure_layout()?;
    let db = Database::open(&config.database_path())
        .await
        .context("failed to open the store")?;

    match args.command {
        Command::Import {
            audio,
            name,
            description,
            audio_type,
            language,
            duration,
            queue,
        } => {
            let audio_type = match audio_type {
                Some(t) => t,
                None => audio
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
                    .context("cannot infer audio type; pass --audio-type")?,
            };
            let name = name.unwrap_or_else(|| {
                audio
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            let manager = EntryManager::new(db.clone(), config.clone());
            let entry = manager
                .create_entry(
                    &audio,
                    NewEntry {
                        name,
                        description,
                        audio_type,
                        language,
                        duration,
                    },
                )
                .await?;
            if queue {
                manager.set_queued(&entry.uuid, 0).await?;
            }
            println!("{}", entry.uuid);
        }

        Command::List => {
            for entry in db.list_entries().await? {
                let state = if entry.in_queue {
                    format!("queued (weight {})", entry.queue_weight)
                } else if entry.active_transcription.is_some() {
                    "transcribed".to_string()
                } else {
                    "idle".to_string()
                };
                println!("{}  {}  {}  [{}]", entry.uuid, entry.name, entry.audio_name, state);
            }
        }

        Command::Queue { entry, weight } => {
            let manager = EntryManager::new(db.clone(), config.clone());
            manager.set_queued(&entry, weight).await?;
            info!("Entry {entry} queued with weight {weight}");
        }

        Command::Dequeue { entry } => {
            let manager = EntryManager::new(db.clone(), config.clone());
            manager.set_dequeued(&entry).await?;
            info!("Entry {entry} removed from the queue");
        }

        Command::Run => {
            let runner = JobRunner::new(db.clone(), config.clone());
            let started = runner.run_queue().await?;
            info!("Queue drained; {started} transcription(s) run");
        }

        Command::Transcribe {
            entry,
            model,
            language,
            translate,
        } => {
            let row = db.get_entry(&entry).await?;
            let mut params = JobParams::for_entry(&config, &row);
            if let Some(model) = model {
                params.model = model.parse()?;
            }
            if let Some(language) = language {
                params.language = language.parse()?;
            }
            if translate {
                params.translate = true;
            }

            let runner = JobRunner::new(db.clone(), config.clone());
            let handle = runner.start(&entry, params).await?;
            let transcription_id = handle.transcription_id.clone();
            handle.wait().await?;

            let editor = LineEditor::new(db.clone());
            for line in editor.get_version(&transcription_id, 0).await? {
                println!("{}", line.text);
            }
        }

        Command::Delete { entry } => {
            let manager = EntryManager::new(db.clone(), config.clone());
            manager.delete_entry(&entry).await?;
        }

        Command::Lines {
            transcription,
            version,
        } => {
            let editor = LineEditor::new(db.clone());
            let version = match version {
                Some(v) => v,
                None => editor.latest_version(&transcription).await?,
            };
            for line in editor.get_version(&transcription, version).await? {
                println!("[{:>8.3} --> {:>8.3}] {}", line.start, line.end, line.text);
            }
        }

        Command::Export {
            transcription,
            dest,
            version,
        } => {
            if dest.extension().and_then(|e| e.to_str()) != Some("vtt") {
                bail!("export destination must end in .vtt");
            }
            let editor = LineEditor::new(db.clone());
            let version = match version {
                Some(v) => v,
                None => editor.latest_version(&transcription).await?,
            };
            editor.export_vtt(&transcription, version, &dest).await?;
            info!("Wrote version {version} of {transcription} to {dest:?}");
        }

        Command::Settings {
            dark_mode,
            language,
        } => {
            let mut settings = db.get_settings().await?;
            if dark_mode.is_none() && language.is_none() {
                println!("dark_mode: {}", settings.dark_mode);
                println!("language:  {}", settings.language);
                return Ok(());
            }
            if let Some(dark_mode) = dark_mode {
                settings.dark_mode = dark_mode;
            }
            if let Some(language) = language {
                settings.language = language;
            }
            db.set_settings(&settings).await?;

            // Preferences mirror for external inspection; the row stays
            // authoritative.
            let raw = serde_json::to_string_pretty(&settings)?;
            std::fs::write(config.store_dir().join("app_preferences.json"), raw)?;
        }
    }

    Ok(())
}
