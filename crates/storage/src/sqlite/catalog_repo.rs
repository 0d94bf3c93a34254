use gate_core::model::{AttemptId, QuizAttempt, QuizId, QuizSet, SubjectId, Topic, TopicId};

use super::{
    SqliteRepository,
    mapping::{
        id_to_i64, map_attempt_row, map_quiz_set_row, map_topic_row, prerequisites_to_json,
    },
};
use crate::repository::{AttemptSource, QuizSetCatalog, StorageError, TopicCatalog};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

impl SqliteRepository {
    /// Seed a topic into the catalog tables (used by the seeder and tests;
    /// the engine only ever reads the catalog).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn insert_topic(&self, topic: &Topic) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO topics (id, subject_id, topic_order, prerequisites, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                subject_id = excluded.subject_id,
                topic_order = excluded.topic_order,
                prerequisites = excluded.prerequisites,
                is_active = excluded.is_active
            ",
        )
        .bind(id_to_i64("topic_id", topic.id().value())?)
        .bind(id_to_i64("subject_id", topic.subject_id().value())?)
        .bind(i64::from(topic.order()))
        .bind(prerequisites_to_json(topic.prerequisites())?)
        .bind(topic.is_active())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    /// Seed a topic/quiz binding.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn insert_quiz_set(&self, quiz_set: &QuizSet) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO quiz_sets (id, topic_id, quiz_id, is_active)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                topic_id = excluded.topic_id,
                quiz_id = excluded.quiz_id,
                is_active = excluded.is_active
            ",
        )
        .bind(id_to_i64("quiz_set_id", quiz_set.id().value())?)
        .bind(id_to_i64("topic_id", quiz_set.topic_id().value())?)
        .bind(id_to_i64("quiz_id", quiz_set.quiz_id().value())?)
        .bind(quiz_set.is_active())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    /// Seed a graded attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn insert_attempt(&self, attempt: &QuizAttempt) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO quiz_attempts (id, score, percentage)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                score = excluded.score,
                percentage = excluded.percentage
            ",
        )
        .bind(id_to_i64("attempt_id", attempt.id().value())?)
        .bind(attempt.score())
        .bind(attempt.percentage())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TopicCatalog for SqliteRepository {
    async fn get_topic(&self, id: TopicId) -> Result<Topic, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, subject_id, topic_order, prerequisites, is_active
            FROM topics
            WHERE id = ?1
            ",
        )
        .bind(id_to_i64("topic_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => map_topic_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn list_by_subject(&self, subject_id: SubjectId) -> Result<Vec<Topic>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, subject_id, topic_order, prerequisites, is_active
            FROM topics
            WHERE subject_id = ?1
            ORDER BY topic_order ASC, id ASC
            ",
        )
        .bind(id_to_i64("subject_id", subject_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_topic_row).collect()
    }
}

#[async_trait::async_trait]
impl QuizSetCatalog for SqliteRepository {
    async fn list_by_topic(&self, topic_id: TopicId) -> Result<Vec<QuizSet>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic_id, quiz_id, is_active
            FROM quiz_sets
            WHERE topic_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(id_to_i64("topic_id", topic_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_quiz_set_row).collect()
    }

    async fn list_by_quiz(&self, quiz_id: QuizId) -> Result<Vec<QuizSet>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic_id, quiz_id, is_active
            FROM quiz_sets
            WHERE quiz_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(id_to_i64("quiz_id", quiz_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_quiz_set_row).collect()
    }
}

#[async_trait::async_trait]
impl AttemptSource for SqliteRepository {
    async fn get_attempt(&self, id: AttemptId) -> Result<QuizAttempt, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, score, percentage
            FROM quiz_attempts
            WHERE id = ?1
            ",
        )
        .bind(id_to_i64("attempt_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => map_attempt_row(&row),
            None => Err(StorageError::NotFound),
        }
    }
}
