use chrono::{DateTime, Utc};
use sqlx::{query, query_as};

use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::models::{Entry, Line, Settings, Transcription};

impl Database {
    // ---- Entries ----

    pub async fn insert_entry(&self, e: &Entry) -> Result<()> {
        query(
            r#"
            INSERT INTO entries (
                uuid, name, description, created, in_queue, queue_weight,
                active_transcription, audio_type, audio_path, audio_name,
                audio_language, audio_duration, audio_added_on
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&e.uuid)
        .bind(&e.name)
        .bind(&e.description)
        .bind(e.created)
        .bind(e.in_queue)
        .bind(e.queue_weight)
        .bind(&e.active_transcription)
        .bind(e.audio_type)
        .bind(&e.audio_path)
        .bind(&e.audio_name)
        .bind(e.audio_language)
        .bind(e.audio_duration)
        .bind(e.audio_added_on)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_entry(&self, uuid: &str) -> Result<Entry> {
        query_as::<_, Entry>("SELECT * FROM entries WHERE uuid = ?1")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("entry {uuid}")))
    }

    pub async fn list_entries(&self) -> Result<Vec<Entry>> {
        let entries = query_as::<_, Entry>("SELECT * FROM entries ORDER BY created DESC")
            .fetch_all(self.pool())
            .await?;
        Ok(entries)
    }

    pub async fn set_queued(&self, uuid: &str, weight: i64) -> Result<()> {
        let result = query(
            "UPDATE entries SET in_queue = TRUE, queue_weight = ?1 WHERE uuid = ?2",
        )
        .bind(weight)
        .bind(uuid)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entry {uuid}")));
        }
        Ok(())
    }

    pub async fn set_dequeued(&self, uuid: &str) -> Result<()> {
        let result = query(
            "UPDATE entries SET in_queue = FALSE, queue_weight = 0 WHERE uuid = ?1",
        )
        .bind(uuid)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entry {uuid}")));
        }
        Ok(())
    }

    /// Delete an entry plus all of its transcriptions and lines in a single
    /// transaction. Schema-level ON DELETE CASCADE covers the children as
    /// well; the explicit deletes keep the operation correct even on stores
    /// opened without foreign-key enforcement.
    pub async fn delete_entry_rows(&self, uuid: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        query(
            r#"
            DELETE FROM lines WHERE transcription IN
                (SELECT uuid FROM transcriptions WHERE entry = ?1)
            "#,
        )
        .bind(uuid)
        .execute(&mut *tx)
        .await?;

        query("DELETE FROM transcriptions WHERE entry = ?1")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;

        let result = query("DELETE FROM entries WHERE uuid = ?1")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("entry {uuid}")));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Next entry to transcribe: FIFO by queue weight ascending, ties broken
    /// by creation time, skipping entries that already have an active run.
    pub async fn next_queued(&self) -> Result<Option<Entry>> {
        let entry = query_as::<_, Entry>(
            r#"
            SELECT * FROM entries
            WHERE in_queue = TRUE
              AND uuid NOT IN (
                  SELECT entry FROM transcriptions
                  WHERE status IN ('queued', 'processing')
              )
            ORDER BY queue_weight ASC, created ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(entry)
    }

    // ---- Transcriptions ----

    /// Insert a new queued transcription unless the entry already has one in
    /// a non-terminal status. The guard and the insert are a single statement
    /// so concurrent starts cannot both succeed.
    pub async fn insert_transcription_if_idle(&self, t: &Transcription) -> Result<bool> {
        let result = query(
            r#"
            INSERT INTO transcriptions (
                uuid, entry, transcribed_on, path, model, language,
                status, progress, translated, error, completed_on
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            WHERE NOT EXISTS (
                SELECT 1 FROM transcriptions
                WHERE entry = ?2 AND status IN ('queued', 'processing')
            )
            "#,
        )
        .bind(&t.uuid)
        .bind(&t.entry)
        .bind(t.transcribed_on)
        .bind(&t.path)
        .bind(t.model)
        .bind(t.language)
        .bind(t.status)
        .bind(t.progress)
        .bind(t.translated)
        .bind(&t.error)
        .bind(t.completed_on)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_transcription(&self, uuid: &str) -> Result<Transcription> {
        query_as::<_, Transcription>("SELECT * FROM transcriptions WHERE uuid = ?1")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("transcription {uuid}")))
    }

    pub async fn transcriptions_for_entry(&self, entry: &str) -> Result<Vec<Transcription>> {
        let rows = query_as::<_, Transcription>(
            "SELECT * FROM transcriptions WHERE entry = ?1 ORDER BY transcribed_on DESC",
        )
        .bind(entry)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn active_transcription_for_entry(
        &self,
        entry: &str,
    ) -> Result<Option<Transcription>> {
        let row = query_as::<_, Transcription>(
            r#"
            SELECT * FROM transcriptions
            WHERE entry = ?1 AND status IN ('queued', 'processing')
            LIMIT 1
            "#,
        )
        .bind(entry)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// queued -> processing, on the first output from the subprocess.
    pub async fn mark_processing(&self, uuid: &str) -> Result<()> {
        query("UPDATE transcriptions SET status = 'processing' WHERE uuid = ?1 AND status = 'queued'")
            .bind(uuid)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Progress never regresses; stale reports are absorbed by MAX.
    pub async fn bump_progress(&self, uuid: &str, progress: i64) -> Result<()> {
        query(
            r#"
            UPDATE transcriptions SET progress = MAX(progress, ?1)
            WHERE uuid = ?2 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(progress.clamp(0, 100))
        .bind(uuid)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Terminal transition to `complete`: stores the version-0 lines, stamps
    /// `completed_on`, points the entry's active transcription at this run,
    /// and clears the entry's queue flags, all in one transaction.
    ///
    /// Returns false when the row had already reached a terminal status (a
    /// cancellation that raced the process exit); nothing is written then.
    pub async fn complete_transcription(
        &self,
        uuid: &str,
        completed_on: DateTime<Utc>,
        lines: &[Line],
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let result = query(
            r#"
            UPDATE transcriptions
            SET status = 'complete', progress = 100, error = NULL, completed_on = ?1
            WHERE uuid = ?2 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(completed_on)
        .bind(uuid)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for line in lines {
            query(
                r#"
                INSERT INTO lines (uuid, transcription, version, line_index, text, start, "end")
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&line.uuid)
            .bind(&line.transcription)
            .bind(line.version)
            .bind(line.index)
            .bind(&line.text)
            .bind(line.start)
            .bind(line.end)
            .execute(&mut *tx)
            .await?;
        }

        query(
            r#"
            UPDATE entries
            SET active_transcription = ?1, in_queue = FALSE, queue_weight = 0
            WHERE uuid = (SELECT entry FROM transcriptions WHERE uuid = ?1)
            "#,
        )
        .bind(uuid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Terminal transition to `error` (failure, cancellation, or timeout).
    /// Clears the owning entry's queue flags; no automatic retry anywhere.
    pub async fn fail_transcription(&self, uuid: &str, error: &str) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let result = query(
            r#"
            UPDATE transcriptions SET status = 'error', error = ?1
            WHERE uuid = ?2 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(error)
        .bind(uuid)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        query(
            r#"
            UPDATE entries SET in_queue = FALSE, queue_weight = 0
            WHERE uuid = (SELECT entry FROM transcriptions WHERE uuid = ?1)
            "#,
        )
        .bind(uuid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ---- Lines ----

    pub async fn lines_for_version(&self, transcription: &str, version: i64) -> Result<Vec<Line>> {
        let lines = query_as::<_, Line>(
            r#"
            SELECT * FROM lines
            WHERE transcription = ?1 AND version = ?2
            ORDER BY line_index ASC
            "#,
        )
        .bind(transcription)
        .bind(version)
        .fetch_all(self.pool())
        .await?;
        Ok(lines)
    }

    pub async fn max_line_version(&self, transcription: &str) -> Result<Option<i64>> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM lines WHERE transcription = ?1",
        )
        .bind(transcription)
        .fetch_one(self.pool())
        .await?;
        Ok(version)
    }

    /// Persist a whole new version at once. Fails if any (version, index)
    /// slot already exists; versions are immutable after creation.
    pub async fn insert_line_version(&self, lines: &[Line]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for line in lines {
            query(
                r#"
                INSERT INTO lines (uuid, transcription, version, line_index, text, start, "end")
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&line.uuid)
            .bind(&line.transcription)
            .bind(line.version)
            .bind(line.index)
            .bind(&line.text)
            .bind(line.start)
            .bind(line.end)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ---- Settings ----

    pub async fn get_settings(&self) -> Result<Settings> {
        let settings = query_as::<_, Settings>(
            "SELECT dark_mode, language FROM settings WHERE id = 1",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(settings)
    }

    pub async fn set_settings(&self, settings: &Settings) -> Result<()> {
        query("UPDATE settings SET dark_mode = ?1, language = ?2 WHERE id = 1")
            .bind(settings.dark_mode)
            .bind(&settings.language)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AudioType, Language, TranscriptionStatus, WhisperModel};
    use uuid::Uuid;

    fn sample_entry(name: &str) -> Entry {
        Entry {
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            created: Utc::now(),
            in_queue: false,
            queue_weight: 0,
            active_transcription: None,
            audio_type: AudioType::Mp3,
            audio_path: format!("/tmp/{name}.mp3"),
            audio_name: format!("{name}.mp3"),
            audio_language: Language::English,
            audio_duration: 0.0,
            audio_added_on: Utc::now(),
        }
    }

    fn sample_transcription(entry: &str) -> Transcription {
        Transcription {
            uuid: Uuid::new_v4().to_string(),
            entry: entry.to_string(),
            transcribed_on: Utc::now(),
            path: "/tmp/out".to_string(),
            model: WhisperModel::Base,
            language: Language::English,
            status: TranscriptionStatus::Queued,
            progress: 0,
            translated: false,
            error: None,
            completed_on: None,
        }
    }

    fn sample_line(transcription: &str, version: i64, index: i64) -> Line {
        Line {
            uuid: Uuid::new_v4().to_string(),
            transcription: transcription.to_string(),
            version,
            index,
            text: format!("line {index}"),
            start: index as f64,
            end: index as f64 + 1.0,
        }
    }

    #[tokio::test]
    async fn test_entry_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("round-trip");
        db.insert_entry(&entry).await.unwrap();

        let loaded = db.get_entry(&entry.uuid).await.unwrap();
        assert_eq!(loaded.name, "round-trip");
        assert_eq!(loaded.audio_type, AudioType::Mp3);
        assert_eq!(loaded.audio_language, Language::English);
        assert!(!loaded.in_queue);
        assert_eq!(loaded.queue_weight, 0);
    }

    #[tokio::test]
    async fn test_get_entry_not_found() {
        let db = Database::in_memory().await.unwrap();
        assert!(matches!(
            db.get_entry("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_flags() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("queued");
        db.insert_entry(&entry).await.unwrap();

        db.set_queued(&entry.uuid, 3).await.unwrap();
        let loaded = db.get_entry(&entry.uuid).await.unwrap();
        assert!(loaded.in_queue);
        assert_eq!(loaded.queue_weight, 3);

        db.set_dequeued(&entry.uuid).await.unwrap();
        let loaded = db.get_entry(&entry.uuid).await.unwrap();
        assert!(!loaded.in_queue);
        assert_eq!(loaded.queue_weight, 0);

        assert!(matches!(
            db.set_queued("missing", 0).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_next_queued_orders_by_weight_then_created() {
        let db = Database::in_memory().await.unwrap();
        let heavy = sample_entry("heavy");
        let light = sample_entry("light");
        db.insert_entry(&heavy).await.unwrap();
        db.insert_entry(&light).await.unwrap();
        db.set_queued(&heavy.uuid, 5).await.unwrap();
        db.set_queued(&light.uuid, 1).await.unwrap();

        let next = db.next_queued().await.unwrap().unwrap();
        assert_eq!(next.uuid, light.uuid);

        // An active run hides the entry from the queue scan.
        let t = sample_transcription(&light.uuid);
        assert!(db.insert_transcription_if_idle(&t).await.unwrap());
        let next = db.next_queued().await.unwrap().unwrap();
        assert_eq!(next.uuid, heavy.uuid);
    }

    #[tokio::test]
    async fn test_single_active_transcription_per_entry() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("single");
        db.insert_entry(&entry).await.unwrap();

        let first = sample_transcription(&entry.uuid);
        let second = sample_transcription(&entry.uuid);
        assert!(db.insert_transcription_if_idle(&first).await.unwrap());
        assert!(!db.insert_transcription_if_idle(&second).await.unwrap());

        // Exactly one active row remains.
        let active = db
            .active_transcription_for_entry(&entry.uuid)
            .await
            .unwrap();
        assert_eq!(active.unwrap().uuid, first.uuid);

        // A terminal run frees the slot for a brand-new one.
        db.fail_transcription(&first.uuid, "boom").await.unwrap();
        assert!(db.insert_transcription_if_idle(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("progress");
        db.insert_entry(&entry).await.unwrap();
        let t = sample_transcription(&entry.uuid);
        db.insert_transcription_if_idle(&t).await.unwrap();
        db.mark_processing(&t.uuid).await.unwrap();

        db.bump_progress(&t.uuid, 40).await.unwrap();
        db.bump_progress(&t.uuid, 25).await.unwrap();
        let loaded = db.get_transcription(&t.uuid).await.unwrap();
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.status, TranscriptionStatus::Processing);
    }

    #[tokio::test]
    async fn test_complete_sets_active_and_clears_queue() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("complete");
        db.insert_entry(&entry).await.unwrap();
        db.set_queued(&entry.uuid, 2).await.unwrap();

        let t = sample_transcription(&entry.uuid);
        db.insert_transcription_if_idle(&t).await.unwrap();

        let lines = vec![sample_line(&t.uuid, 0, 0), sample_line(&t.uuid, 0, 1)];
        assert!(db
            .complete_transcription(&t.uuid, Utc::now(), &lines)
            .await
            .unwrap());

        let loaded = db.get_transcription(&t.uuid).await.unwrap();
        assert_eq!(loaded.status, TranscriptionStatus::Complete);
        assert_eq!(loaded.progress, 100);
        assert!(loaded.completed_on.is_some());

        let owner = db.get_entry(&entry.uuid).await.unwrap();
        assert_eq!(owner.active_transcription.as_deref(), Some(t.uuid.as_str()));
        assert!(!owner.in_queue);

        assert_eq!(db.lines_for_version(&t.uuid, 0).await.unwrap().len(), 2);

        // Terminal rows stay terminal.
        assert!(!db.fail_transcription(&t.uuid, "late error").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_requires_error_message() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("fail");
        db.insert_entry(&entry).await.unwrap();
        let t = sample_transcription(&entry.uuid);
        db.insert_transcription_if_idle(&t).await.unwrap();

        assert!(db
            .fail_transcription(&t.uuid, "model not found")
            .await
            .unwrap());
        let loaded = db.get_transcription(&t.uuid).await.unwrap();
        assert_eq!(loaded.status, TranscriptionStatus::Error);
        assert_eq!(loaded.error.as_deref(), Some("model not found"));
    }

    #[tokio::test]
    async fn test_delete_entry_cascades() {
        let db = Database::in_memory().await.unwrap();
        let entry = sample_entry("cascade");
        db.insert_entry(&entry).await.unwrap();
        let t = sample_transcription(&entry.uuid);
        db.insert_transcription_if_idle(&t).await.unwrap();
        db.complete_transcription(&t.uuid, Utc::now(), &[sample_line(&t.uuid, 0, 0)])
            .await
            .unwrap();

        db.delete_entry_rows(&entry.uuid).await.unwrap();
        assert!(db.get_entry(&entry.uuid).await.is_err());
        assert!(db.get_transcription(&t.uuid).await.is_err());
        assert!(db.lines_for_version(&t.uuid, 0).await.unwrap().is_empty());

        assert!(matches!(
            db.delete_entry_rows(&entry.uuid).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_settings_singleton() {
        let db = Database::in_memory().await.unwrap();
        let initial = db.get_settings().await.unwrap();
        assert_eq!(initial, Settings::default());

        let updated = Settings {
            dark_mode: true,
            language: "German".to_string(),
        };
        db.set_settings(&updated).await.unwrap();
        assert_eq!(db.get_settings().await.unwrap(), updated);
    }
}
