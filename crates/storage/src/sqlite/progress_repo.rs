use gate_core::model::{StudentId, SubjectId, TopicId, TopicProgress};

use super::{
    SqliteRepository,
    mapping::{completions_to_json, id_to_i64, map_progress_row},
};
use crate::repository::{ProgressRepository, StorageError};

/// Attempts before write contention stops being retried.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// `Conflict` is internal to this layer; once the retry budget is spent the
/// contention is reported as a backend failure like any other.
fn contention_exhausted() -> StorageError {
    StorageError::Connection(format!(
        "write contention persisted after {MAX_WRITE_ATTEMPTS} attempts"
    ))
}

/// SQLITE_BUSY / SQLITE_LOCKED show up as transient conflicts; everything
/// else is a real connection failure.
fn map_sqlx(e: sqlx::Error) -> StorageError {
    if let Some(db) = e.as_database_error() {
        if matches!(db.code().as_deref(), Some("5" | "6")) {
            return StorageError::Conflict;
        }
    }
    StorageError::Connection(e.to_string())
}

impl SqliteRepository {
    async fn fetch_progress(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
    ) -> Result<Option<TopicProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                student_id, topic_id, subject_id, is_unlocked, unlocked_at,
                cheat_sheet_read, read_at, completed_quizzes, is_completed, completed_at
            FROM topic_progress
            WHERE student_id = ?1 AND topic_id = ?2
            ",
        )
        .bind(id_to_i64("student_id", student_id.value())?)
        .bind(id_to_i64("topic_id", topic_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn try_upsert(&self, progress: &TopicProgress) -> Result<TopicProgress, StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query(
            r"
            SELECT
                student_id, topic_id, subject_id, is_unlocked, unlocked_at,
                cheat_sheet_read, read_at, completed_quizzes, is_completed, completed_at
            FROM topic_progress
            WHERE student_id = ?1 AND topic_id = ?2
            ",
        )
        .bind(id_to_i64("student_id", progress.student_id().value())?)
        .bind(id_to_i64("topic_id", progress.topic_id().value())?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        // Merge monotonically with whatever the row holds now; a concurrent
        // writer that slipped in between the caller's read and this write
        // cannot be lost.
        let merged = match row.as_ref().map(map_progress_row).transpose()? {
            Some(mut stored) => {
                stored.absorb(progress);
                stored
            }
            None => progress.clone(),
        };

        sqlx::query(
            r"
            INSERT INTO topic_progress (
                student_id, topic_id, subject_id, is_unlocked, unlocked_at,
                cheat_sheet_read, read_at, completed_quizzes, is_completed, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(student_id, topic_id) DO UPDATE SET
                is_unlocked = excluded.is_unlocked,
                unlocked_at = excluded.unlocked_at,
                cheat_sheet_read = excluded.cheat_sheet_read,
                read_at = excluded.read_at,
                completed_quizzes = excluded.completed_quizzes,
                is_completed = excluded.is_completed,
                completed_at = excluded.completed_at
            ",
        )
        .bind(id_to_i64("student_id", merged.student_id().value())?)
        .bind(id_to_i64("topic_id", merged.topic_id().value())?)
        .bind(id_to_i64("subject_id", merged.subject_id().value())?)
        .bind(merged.is_unlocked())
        .bind(merged.unlocked_at())
        .bind(merged.cheat_sheet_read())
        .bind(merged.read_at())
        .bind(completions_to_json(merged.completed_quizzes())?)
        .bind(merged.is_completed())
        .bind(merged.completed_at())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(merged)
    }
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
    ) -> Result<Option<TopicProgress>, StorageError> {
        self.fetch_progress(student_id, topic_id).await
    }

    async fn get_or_create(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
        subject_id: SubjectId,
    ) -> Result<TopicProgress, StorageError> {
        let default = TopicProgress::new_locked(student_id, topic_id, subject_id);

        // Create-then-read: the insert is a no-op when another writer won
        // the race, and the follow-up read observes whichever record exists.
        sqlx::query(
            r"
            INSERT INTO topic_progress (
                student_id, topic_id, subject_id, is_unlocked, unlocked_at,
                cheat_sheet_read, read_at, completed_quizzes, is_completed, completed_at
            )
            VALUES (?1, ?2, ?3, 0, NULL, 0, NULL, ?4, 0, NULL)
            ON CONFLICT(student_id, topic_id) DO NOTHING
            ",
        )
        .bind(id_to_i64("student_id", student_id.value())?)
        .bind(id_to_i64("topic_id", topic_id.value())?)
        .bind(id_to_i64("subject_id", subject_id.value())?)
        .bind(completions_to_json(default.completed_quizzes())?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        self.fetch_progress(student_id, topic_id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn upsert(&self, progress: &TopicProgress) -> Result<TopicProgress, StorageError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_upsert(progress).await {
                Ok(merged) => return Ok(merged),
                Err(StorageError::Conflict) if attempts < MAX_WRITE_ATTEMPTS => {}
                Err(StorageError::Conflict) => return Err(contention_exhausted()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_by_subject(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Vec<TopicProgress>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                student_id, topic_id, subject_id, is_unlocked, unlocked_at,
                cheat_sheet_read, read_at, completed_quizzes, is_completed, completed_at
            FROM topic_progress
            WHERE student_id = ?1 AND subject_id = ?2
            ORDER BY topic_id ASC
            ",
        )
        .bind(id_to_i64("student_id", student_id.value())?)
        .bind(id_to_i64("subject_id", subject_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(map_progress_row).collect()
    }

    async fn list_by_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<TopicProgress>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                student_id, topic_id, subject_id, is_unlocked, unlocked_at,
                cheat_sheet_read, read_at, completed_quizzes, is_completed, completed_at
            FROM topic_progress
            WHERE student_id = ?1
            ORDER BY subject_id ASC, topic_id ASC
            ",
        )
        .bind(id_to_i64("student_id", student_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(map_progress_row).collect()
    }
}
