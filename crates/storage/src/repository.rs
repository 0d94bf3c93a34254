use async_trait::async_trait;
use gate_core::model::{
    AttemptId, QuizAttempt, QuizId, QuizSet, StudentId, SubjectId, Topic, TopicId, TopicProgress,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The Progress Store: one durable record per (student, topic).
///
/// Write paths are race-safe: `get_or_create` tolerates concurrent first
/// creation for the same key, and `upsert` resolves concurrent updates with
/// a monotonic field-wise merge, returning the authoritative post-write
/// record so callers never need a read-after-write round trip.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the record for a (student, topic) pair, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures. A missing record is
    /// `Ok(None)`, not an error.
    async fn get(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
    ) -> Result<Option<TopicProgress>, StorageError>;

    /// Return the existing record or create the locked default.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be created or read.
    async fn get_or_create(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
        subject_id: SubjectId,
    ) -> Result<TopicProgress, StorageError>;

    /// Persist a record, merging monotonically with any concurrent write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if persistence fails after internal retries.
    async fn upsert(&self, progress: &TopicProgress) -> Result<TopicProgress, StorageError>;

    /// All records for a student within one subject.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_by_subject(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Vec<TopicProgress>, StorageError>;

    /// All records for a student across subjects.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_by_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<TopicProgress>, StorageError>;
}

/// Read-only view of the topic catalog (authored elsewhere).
#[async_trait]
pub trait TopicCatalog: Send + Sync {
    /// Fetch a topic by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_topic(&self, id: TopicId) -> Result<Topic, StorageError>;

    /// All topics of a subject, active or not, in catalog order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures. An unknown subject yields
    /// an empty list.
    async fn list_by_subject(&self, subject_id: SubjectId) -> Result<Vec<Topic>, StorageError>;
}

/// Read-only view of the topic/quiz binding catalog.
#[async_trait]
pub trait QuizSetCatalog: Send + Sync {
    /// Bindings attached to a topic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_by_topic(&self, topic_id: TopicId) -> Result<Vec<QuizSet>, StorageError>;

    /// Bindings attached to a quiz (a quiz may bind to several topics).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_by_quiz(&self, quiz_id: QuizId) -> Result<Vec<QuizSet>, StorageError>;
}

/// Read-only view of graded quiz attempts.
#[async_trait]
pub trait AttemptSource: Send + Sync {
    /// Fetch an attempt by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_attempt(&self, id: AttemptId) -> Result<QuizAttempt, StorageError>;
}

/// Simple in-memory backend for testing and prototyping.
///
/// Implements the Progress Store plus all three catalog traits; tests seed
/// the catalogs through the `insert_*` helpers.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<(StudentId, TopicId), TopicProgress>>>,
    topics: Arc<Mutex<HashMap<TopicId, Topic>>>,
    quiz_sets: Arc<Mutex<Vec<QuizSet>>>,
    attempts: Arc<Mutex<HashMap<AttemptId, QuizAttempt>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a topic into the catalog.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert_topic(&self, topic: Topic) {
        self.topics
            .lock()
            .expect("topic catalog lock")
            .insert(topic.id(), topic);
    }

    /// Seed a topic/quiz binding into the catalog.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert_quiz_set(&self, quiz_set: QuizSet) {
        self.quiz_sets
            .lock()
            .expect("quiz set catalog lock")
            .push(quiz_set);
    }

    /// Seed a graded attempt.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert_attempt(&self, attempt: QuizAttempt) {
        self.attempts
            .lock()
            .expect("attempt source lock")
            .insert(attempt.id(), attempt);
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
    ) -> Result<Option<TopicProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(student_id, topic_id)).cloned())
    }

    async fn get_or_create(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
        subject_id: SubjectId,
    ) -> Result<TopicProgress, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard
            .entry((student_id, topic_id))
            .or_insert_with(|| TopicProgress::new_locked(student_id, topic_id, subject_id));
        Ok(record.clone())
    }

    async fn upsert(&self, progress: &TopicProgress) -> Result<TopicProgress, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (progress.student_id(), progress.topic_id());
        match guard.get_mut(&key) {
            Some(stored) => {
                stored.absorb(progress);
                Ok(stored.clone())
            }
            None => {
                guard.insert(key, progress.clone());
                Ok(progress.clone())
            }
        }
    }

    async fn list_by_subject(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<Vec<TopicProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .filter(|p| p.student_id() == student_id && p.subject_id() == subject_id)
            .cloned()
            .collect())
    }

    async fn list_by_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<TopicProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .filter(|p| p.student_id() == student_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TopicCatalog for InMemoryRepository {
    async fn get_topic(&self, id: TopicId) -> Result<Topic, StorageError> {
        let guard = self
            .topics
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_by_subject(&self, subject_id: SubjectId) -> Result<Vec<Topic>, StorageError> {
        let guard = self
            .topics
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut topics: Vec<Topic> = guard
            .values()
            .filter(|t| t.subject_id() == subject_id)
            .cloned()
            .collect();
        topics.sort_by_key(|t| (t.order(), t.id()));
        Ok(topics)
    }
}

#[async_trait]
impl QuizSetCatalog for InMemoryRepository {
    async fn list_by_topic(&self, topic_id: TopicId) -> Result<Vec<QuizSet>, StorageError> {
        let guard = self
            .quiz_sets
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .filter(|qs| qs.topic_id() == topic_id)
            .copied()
            .collect())
    }

    async fn list_by_quiz(&self, quiz_id: QuizId) -> Result<Vec<QuizSet>, StorageError> {
        let guard = self
            .quiz_sets
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .filter(|qs| qs.quiz_id() == quiz_id)
            .copied()
            .collect())
    }
}

#[async_trait]
impl AttemptSource for InMemoryRepository {
    async fn get_attempt(&self, id: AttemptId) -> Result<QuizAttempt, StorageError> {
        let guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).copied().ok_or(StorageError::NotFound)
    }
}

/// Aggregates the store and catalogs behind trait objects for easy backend
/// swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub topics: Arc<dyn TopicCatalog>,
    pub quiz_sets: Arc<dyn QuizSetCatalog>,
    pub attempts: Arc<dyn AttemptSource>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self::from_in_memory(repo)
    }

    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let topics: Arc<dyn TopicCatalog> = Arc::new(repo.clone());
        let quiz_sets: Arc<dyn QuizSetCatalog> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptSource> = Arc::new(repo);
        Self {
            progress,
            topics,
            quiz_sets,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::model::QuizCompletion;
    use gate_core::time::fixed_now;

    #[tokio::test]
    async fn get_or_create_returns_single_record_per_key() {
        let repo = InMemoryRepository::new();
        let student = StudentId::new(1);
        let topic = TopicId::new(2);
        let subject = SubjectId::new(3);

        let first = repo.get_or_create(student, topic, subject).await.unwrap();
        let second = repo.get_or_create(student, topic, subject).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_unlocked());

        let stored = repo.get(student, topic).await.unwrap();
        assert_eq!(stored, Some(first));
    }

    #[tokio::test]
    async fn upsert_merges_with_stored_record() {
        let repo = InMemoryRepository::new();
        let student = StudentId::new(1);
        let topic = TopicId::new(2);
        let subject = SubjectId::new(3);
        let now = fixed_now();

        let mut unlocked = repo.get_or_create(student, topic, subject).await.unwrap();
        unlocked.unlock(now);
        repo.upsert(&unlocked).await.unwrap();

        // A concurrent writer started from the pre-unlock record.
        let mut stale = TopicProgress::new_locked(student, topic, subject);
        stale.record_quiz_completion(QuizCompletion {
            quiz_id: QuizId::new(5),
            attempt_id: AttemptId::new(6),
            completed_at: now,
            score: 8.0,
            percentage: 80.0,
        });
        let merged = repo.upsert(&stale).await.unwrap();

        assert!(merged.is_unlocked());
        assert_eq!(merged.total_quizzes_completed(), 1);
    }

    #[tokio::test]
    async fn catalog_lookups_filter_by_subject_and_quiz() {
        let repo = InMemoryRepository::new();
        let subject = SubjectId::new(1);
        repo.insert_topic(Topic::new(TopicId::new(1), subject, 0, vec![], true));
        repo.insert_topic(Topic::new(TopicId::new(2), subject, 1, vec![TopicId::new(1)], true));
        repo.insert_topic(Topic::new(TopicId::new(9), SubjectId::new(2), 0, vec![], true));
        repo.insert_quiz_set(QuizSet::new(
            gate_core::model::QuizSetId::new(1),
            TopicId::new(1),
            QuizId::new(7),
            true,
        ));

        let topics = TopicCatalog::list_by_subject(&repo, subject).await.unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].id(), TopicId::new(1));

        let bindings = repo.list_by_quiz(QuizId::new(7)).await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].topic_id(), TopicId::new(1));

        assert!(matches!(
            repo.get_topic(TopicId::new(99)).await,
            Err(StorageError::NotFound)
        ));
    }
}
