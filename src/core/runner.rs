use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::{Config, WhisperConfig};
use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::models::{Entry, Line, Transcription, TranscriptionSidecar};
use crate::core::types::{Language, TranscriptionStatus, WhisperModel};
use crate::core::vtt;

const STDERR_TAIL_LINES: usize = 20;
pub const TRANSCRIPTION_SIDECAR_FILE: &str = "transcription.json";

/// Parameters for one whisper run.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub model: WhisperModel,
    pub language: Language,
    pub translate: bool,
}

impl JobParams {
    /// Defaults for queue-driven runs: the configured model, the entry's
    /// audio language, and translation to English for non-English audio.
    pub fn for_entry(config: &Config, entry: &Entry) -> Self {
        let language = if entry.audio_language == Language::Unknown {
            config.whisper.language
        } else {
            entry.audio_language
        };
        Self {
            model: config.whisper.model,
            language,
            translate: !matches!(language, Language::English | Language::Unknown),
        }
    }
}

/// Handle to a running transcription job. Completion is observed by awaiting
/// `wait` (or by polling the transcription row); cancellation kills the
/// subprocess and records an error status with a cancellation reason.
#[derive(Debug)]
pub struct JobHandle {
    pub transcription_id: String,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl JobHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Process(format!("job task failed: {e}"))),
        }
    }
}

/// Spawns and supervises whisper subprocesses, one per entry at most, and
/// drains the entry queue through a bounded worker pool.
pub struct JobRunner {
    db: Arc<Database>,
    config: Config,
}

impl JobRunner {
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        Self { db, config }
    }

    /// Start a transcription for an entry. At most one transcription per
    /// entry may be in a non-terminal status; a second start fails with
    /// `AlreadyRunning` and leaves the store untouched.
    pub async fn start(&self, entry_id: &str, params: JobParams) -> Result<JobHandle> {
        let entry = self.db.get_entry(entry_id).await?;

        let uuid = Uuid::new_v4().to_string();
        let output_dir = self
            .config
            .entry_dir(entry_id)
            .join("transcriptions")
            .join(&uuid);
        std::fs::create_dir_all(&output_dir)?;

        let transcription = Transcription {
            uuid: uuid.clone(),
            entry: entry.uuid.clone(),
            transcribed_on: Utc::now(),
            path: output_dir.to_string_lossy().into_owned(),
            model: params.model,
            language: params.language,
            status: TranscriptionStatus::Queued,
            progress: 0,
            translated: params.translate,
            error: None,
            completed_on: None,
        };

        if !self.db.insert_transcription_if_idle(&transcription).await? {
            let _ = std::fs::remove_dir_all(&output_dir);
            return Err(Error::AlreadyRunning(entry_id.to_string()));
        }

        info!(
            "Queued transcription {uuid} for entry {entry_id} (model {}, language {})",
            params.model, params.language
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let db = self.db.clone();
        let whisper = self.config.whisper.clone();
        let timeout = Duration::from_secs(self.config.jobs.timeout_secs);
        let task = tokio::spawn(run_job(
            db,
            whisper,
            timeout,
            entry,
            transcription,
            output_dir,
            cancel_rx,
        ));

        Ok(JobHandle {
            transcription_id: uuid,
            cancel_tx,
            task,
        })
    }

    /// Drain the queue: claim entries FIFO by weight then creation time and
    /// transcribe them, at most `jobs.max_concurrent` at once. Returns the
    /// number of jobs started once the queue is empty and all jobs have
    /// reached a terminal status.
    pub async fn run_queue(&self) -> Result<usize> {
        let limit = self.config.jobs.max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut jobs = JoinSet::new();
        let mut started = 0usize;

        loop {
            match self.db.next_queued().await? {
                Some(entry) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Process(format!("worker pool closed: {e}")))?;
                    let params = JobParams::for_entry(&self.config, &entry);
                    match self.start(&entry.uuid, params).await {
                        Ok(handle) => {
                            started += 1;
                            let id = handle.transcription_id.clone();
                            jobs.spawn(async move {
                                if let Err(e) = handle.wait().await {
                                    warn!("Transcription {id} failed: {e}");
                                }
                                drop(permit);
                            });
                        }
                        // Another caller raced us to this entry; it is no
                        // longer idle and next_queued will skip it.
                        Err(Error::AlreadyRunning(_)) => drop(permit),
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    if jobs.join_next().await.is_none() {
                        break;
                    }
                }
            }
        }

        Ok(started)
    }
}

async fn run_job(
    db: Arc<Database>,
    whisper: WhisperConfig,
    timeout: Duration,
    entry: Entry,
    transcription: Transcription,
    output_dir: PathBuf,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<()> {
    let uuid = transcription.uuid.clone();
    let result = drive_process(
        &db,
        &whisper,
        timeout,
        &entry,
        &transcription,
        &output_dir,
        &mut cancel_rx,
    )
    .await;

    if let Err(ref e) = result {
        let message = e.to_string();
        warn!("Transcription {uuid} failed: {message}");
        if let Err(store_err) = db.fail_transcription(&uuid, &message).await {
            warn!("Failed to record error for transcription {uuid}: {store_err}");
        }
    }

    result
}

enum ProcessOutcome {
    Exited(std::process::ExitStatus),
    Cancelled,
    TimedOut,
}

async fn drive_process(
    db: &Database,
    whisper: &WhisperConfig,
    timeout: Duration,
    entry: &Entry,
    transcription: &Transcription,
    output_dir: &Path,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut cmd = Command::new(&whisper.binary);
    cmd.arg("--output_dir")
        .arg(output_dir)
        .arg("--task")
        .arg(if transcription.translated {
            "translate"
        } else {
            "transcribe"
        })
        .arg("--model")
        .arg(transcription.model.as_str())
        .arg("--device")
        .arg(&whisper.device);
    if transcription.language != Language::Unknown {
        cmd.arg("--language").arg(transcription.language.as_str());
    }
    cmd.arg(&entry.audio_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Spawning whisper: {cmd:?}");
    let mut child = cmd.spawn().map_err(|e| {
        Error::Process(format!("failed to spawn {:?}: {e}", whisper.binary))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("whisper stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Process("whisper stderr not captured".to_string()))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_tail: VecDeque<String> = VecDeque::new();
    let mut saw_output = false;
    let mut stdout_done = false;
    let mut stderr_done = false;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    // Both pipes close when the process exits, ending this loop.
    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => match line {
                Ok(Some(line)) => {
                    if !saw_output {
                        saw_output = true;
                        db.mark_processing(&transcription.uuid).await?;
                    }
                    if let Some(progress) = progress_from_line(&line, entry.audio_duration) {
                        db.bump_progress(&transcription.uuid, progress).await?;
                    }
                    debug!("whisper[{}] {line}", transcription.uuid);
                }
                _ => stdout_done = true,
            },
            line = stderr_lines.next_line(), if !stderr_done => match line {
                Ok(Some(line)) => {
                    if !saw_output {
                        saw_output = true;
                        db.mark_processing(&transcription.uuid).await?;
                    }
                    if !line.trim().is_empty() {
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line);
                    }
                }
                _ => stderr_done = true,
            },
            _ = wait_for_cancel(cancel_rx) => {
                kill(&mut child).await;
                return Err(Error::Process("cancelled by user".to_string()));
            }
            _ = &mut deadline => {
                kill(&mut child).await;
                return Err(Error::Process(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )));
            }
        }
    }

    let outcome = tokio::select! {
        status = child.wait() => ProcessOutcome::Exited(
            status.map_err(|e| Error::Process(format!("wait failed: {e}")))?,
        ),
        _ = wait_for_cancel(cancel_rx) => ProcessOutcome::Cancelled,
        _ = &mut deadline => ProcessOutcome::TimedOut,
    };

    let status = match outcome {
        ProcessOutcome::Exited(status) => status,
        ProcessOutcome::Cancelled => {
            kill(&mut child).await;
            return Err(Error::Process("cancelled by user".to_string()));
        }
        ProcessOutcome::TimedOut => {
            kill(&mut child).await;
            return Err(Error::Process(format!(
                "timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    if !status.success() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let tail: Vec<String> = stderr_tail.into_iter().collect();
        let message = if tail.is_empty() {
            format!("whisper exited with code {code}")
        } else {
            format!("whisper exited with code {code}: {}", tail.join(" / "))
        };
        return Err(Error::Process(message));
    }

    finalize_complete(db, entry, transcription, output_dir).await
}

/// Parse the generated VTT into version-0 lines and commit the terminal
/// transition, then mirror the result into a `transcription.json` sidecar.
async fn finalize_complete(
    db: &Database,
    entry: &Entry,
    transcription: &Transcription,
    output_dir: &Path,
) -> Result<()> {
    let vtt_path = output_dir.join(format!("{}.vtt", entry.audio_name));
    let raw = std::fs::read_to_string(&vtt_path)
        .map_err(|e| Error::Process(format!("missing transcript {vtt_path:?}: {e}")))?;
    let cues = vtt::parse(&raw)?;
    if cues.is_empty() {
        return Err(Error::Process(format!("transcript {vtt_path:?} has no cues")));
    }

    let completed_on = Utc::now();
    let lines: Vec<Line> = cues
        .into_iter()
        .enumerate()
        .map(|(index, cue)| Line {
            uuid: Uuid::new_v4().to_string(),
            transcription: transcription.uuid.clone(),
            version: 0,
            index: index as i64,
            text: cue.text,
            start: cue.start_ms as f64 / 1000.0,
            end: cue.end_ms as f64 / 1000.0,
        })
        .collect();

    if !db
        .complete_transcription(&transcription.uuid, completed_on, &lines)
        .await?
    {
        return Err(Error::Process(
            "cancelled before completion was recorded".to_string(),
        ));
    }

    let sidecar = TranscriptionSidecar {
        uuid: transcription.uuid.clone(),
        entry: entry.uuid.clone(),
        transcribed_on: transcription.transcribed_on,
        completed_on,
        model: transcription.model,
        language: transcription.language,
        status: TranscriptionStatus::Complete,
        progress: 100,
        translated: transcription.translated,
        lines,
    };
    match serde_json::to_string_pretty(&sidecar) {
        Ok(json) => {
            if let Err(e) = std::fs::write(output_dir.join(TRANSCRIPTION_SIDECAR_FILE), json) {
                warn!(
                    "Failed to write sidecar for transcription {}: {e}",
                    transcription.uuid
                );
            }
        }
        Err(e) => warn!(
            "Failed to serialize sidecar for transcription {}: {e}",
            transcription.uuid
        ),
    }

    info!(
        "Transcription {} complete ({} lines)",
        transcription.uuid,
        sidecar.lines.len()
    );
    Ok(())
}

/// Resolves when cancellation is requested; pends forever once the handle
/// side has gone away.
async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill whisper process: {e}");
    }
}

/// Progress from a verbose whisper segment stamp like
/// `[00:12.000 --> 00:17.000]  text`, as a percentage of the audio length.
/// Capped below 100; only completion reports 100.
fn progress_from_line(line: &str, duration_secs: f64) -> Option<i64> {
    if duration_secs <= 0.0 {
        return None;
    }
    let (_, rest) = line.split_once("-->")?;
    let stamp = rest.trim().split(']').next()?.trim();
    let end_ms = vtt::parse_timestamp(stamp)?;
    let pct = (end_ms as f64 / 1000.0) / duration_secs * 100.0;
    Some(pct.clamp(0.0, 99.0) as i64)
}
