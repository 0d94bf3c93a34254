use gate_core::model::{
    AttemptId, QuizAttempt, QuizCompletion, QuizId, QuizSet, QuizSetId, StudentId, SubjectId,
    Topic, TopicId, TopicProgress,
};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn student_id_from_i64(v: i64) -> Result<StudentId, StorageError> {
    Ok(StudentId::new(i64_to_u64("student_id", v)?))
}

pub(crate) fn topic_id_from_i64(v: i64) -> Result<TopicId, StorageError> {
    Ok(TopicId::new(i64_to_u64("topic_id", v)?))
}

pub(crate) fn subject_id_from_i64(v: i64) -> Result<SubjectId, StorageError> {
    Ok(SubjectId::new(i64_to_u64("subject_id", v)?))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

/// Prerequisite lists are stored as a JSON array of topic ids.
pub(crate) fn prerequisites_to_json(prerequisites: &[TopicId]) -> Result<String, StorageError> {
    let raw: Vec<u64> = prerequisites.iter().map(TopicId::value).collect();
    serde_json::to_string(&raw).map_err(ser)
}

pub(crate) fn prerequisites_from_json(raw: &str) -> Result<Vec<TopicId>, StorageError> {
    let ids: Vec<u64> = serde_json::from_str(raw).map_err(ser)?;
    Ok(ids.into_iter().map(TopicId::new).collect())
}

/// Completed-quiz entries are stored as one JSON column; entries carry their
/// own (quiz_id, attempt_id) uniqueness so the merge stays in domain code.
pub(crate) fn completions_to_json(completions: &[QuizCompletion]) -> Result<String, StorageError> {
    serde_json::to_string(completions).map_err(ser)
}

pub(crate) fn completions_from_json(raw: &str) -> Result<Vec<QuizCompletion>, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn map_topic_row(row: &sqlx::sqlite::SqliteRow) -> Result<Topic, StorageError> {
    let id = topic_id_from_i64(row.try_get("id").map_err(ser)?)?;
    let subject_id = subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?;
    let order_i64: i64 = row.try_get("topic_order").map_err(ser)?;
    let order = u32::try_from(order_i64)
        .map_err(|_| StorageError::Serialization(format!("invalid topic_order: {order_i64}")))?;
    let prerequisites = prerequisites_from_json(
        row.try_get::<String, _>("prerequisites").map_err(ser)?.as_str(),
    )?;
    let is_active: bool = row.try_get("is_active").map_err(ser)?;
    Ok(Topic::new(id, subject_id, order, prerequisites, is_active))
}

pub(crate) fn map_quiz_set_row(row: &sqlx::sqlite::SqliteRow) -> Result<QuizSet, StorageError> {
    let id = QuizSetId::new(i64_to_u64("quiz_set_id", row.try_get("id").map_err(ser)?)?);
    let topic_id = topic_id_from_i64(row.try_get("topic_id").map_err(ser)?)?;
    let quiz_id = quiz_id_from_i64(row.try_get("quiz_id").map_err(ser)?)?;
    let is_active: bool = row.try_get("is_active").map_err(ser)?;
    Ok(QuizSet::new(id, topic_id, quiz_id, is_active))
}

pub(crate) fn map_attempt_row(row: &sqlx::sqlite::SqliteRow) -> Result<QuizAttempt, StorageError> {
    let id = AttemptId::new(i64_to_u64("attempt_id", row.try_get("id").map_err(ser)?)?);
    let score: f64 = row.try_get("score").map_err(ser)?;
    let percentage: f64 = row.try_get("percentage").map_err(ser)?;
    Ok(QuizAttempt::new(id, score, percentage))
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<TopicProgress, StorageError> {
    let student_id = student_id_from_i64(row.try_get("student_id").map_err(ser)?)?;
    let topic_id = topic_id_from_i64(row.try_get("topic_id").map_err(ser)?)?;
    let subject_id = subject_id_from_i64(row.try_get("subject_id").map_err(ser)?)?;
    let is_unlocked: bool = row.try_get("is_unlocked").map_err(ser)?;
    let unlocked_at: Option<chrono::DateTime<chrono::Utc>> =
        row.try_get("unlocked_at").map_err(ser)?;
    let cheat_sheet_read: bool = row.try_get("cheat_sheet_read").map_err(ser)?;
    let read_at: Option<chrono::DateTime<chrono::Utc>> = row.try_get("read_at").map_err(ser)?;
    let completed_quizzes = completions_from_json(
        row.try_get::<String, _>("completed_quizzes")
            .map_err(ser)?
            .as_str(),
    )?;
    let is_completed: bool = row.try_get("is_completed").map_err(ser)?;
    let completed_at: Option<chrono::DateTime<chrono::Utc>> =
        row.try_get("completed_at").map_err(ser)?;

    Ok(TopicProgress::from_persisted(
        student_id,
        topic_id,
        subject_id,
        is_unlocked,
        unlocked_at,
        cheat_sheet_read,
        read_at,
        completed_quizzes,
        is_completed,
        completed_at,
    ))
}
