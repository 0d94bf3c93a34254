use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use gate_core::model::{
    AttemptId, ProgressEvent, QuizCompletion, QuizId, StudentId, SubjectId, Topic, TopicId,
    TopicProgress,
};
use gate_core::{Clock, GatingPolicy};
use storage::repository::{
    AttemptSource, ProgressRepository, QuizSetCatalog, Storage, StorageError, TopicCatalog,
};

use crate::error::EngineError;

/// Result of fanning a quiz-completion event out to its bound topics.
#[derive(Debug, Clone, PartialEq)]
pub enum QuizCompletionOutcome {
    /// At least one topic was bound; carries the first affected topic's
    /// final record.
    Applied(TopicProgress),
    /// The quiz is bound to no topic. A valid outcome, not an error.
    NotApplicable,
}

/// The progress/gating state machine.
///
/// Applies cheat-sheet-read and quiz-completed events to per-(student,
/// topic) records, evaluates the completion rule, and walks the subject's
/// prerequisite graph to unlock newly eligible topics. Holds no state of
/// its own between calls; the Progress Store is the sole source of truth.
#[derive(Clone)]
pub struct ProgressEngine {
    clock: Clock,
    policy: GatingPolicy,
    progress: Arc<dyn ProgressRepository>,
    topics: Arc<dyn TopicCatalog>,
    quiz_sets: Arc<dyn QuizSetCatalog>,
    attempts: Arc<dyn AttemptSource>,
}

impl ProgressEngine {
    #[must_use]
    pub fn new(clock: Clock, policy: GatingPolicy, storage: &Storage) -> Self {
        Self {
            clock,
            policy,
            progress: Arc::clone(&storage.progress),
            topics: Arc::clone(&storage.topics),
            quiz_sets: Arc::clone(&storage.quiz_sets),
            attempts: Arc::clone(&storage.attempts),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &GatingPolicy {
        &self.policy
    }

    /// Dispatches an upstream event to its handler.
    ///
    /// # Errors
    ///
    /// Propagates the same errors as the per-event methods.
    pub async fn apply(&self, event: ProgressEvent) -> Result<QuizCompletionOutcome, EngineError> {
        match event {
            ProgressEvent::CheatSheetRead {
                student_id,
                topic_id,
            } => {
                let record = self.mark_cheat_sheet_read(student_id, topic_id).await?;
                Ok(QuizCompletionOutcome::Applied(record))
            }
            ProgressEvent::QuizCompleted {
                student_id,
                quiz_id,
                attempt_id,
            } => self.record_quiz_completion(student_id, quiz_id, attempt_id).await,
        }
    }

    /// Marks a topic's study material as read and re-evaluates completion.
    ///
    /// Re-application is a no-op. If the topic newly completes, the cascade
    /// walk unlocks every downstream topic that became eligible.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::TopicNotFound` for an unknown or deactivated
    /// topic, `EngineError::InvalidState` if the stored record disagrees
    /// with the catalog about the topic's subject, or
    /// `EngineError::Storage` on persistence failures.
    pub async fn mark_cheat_sheet_read(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
    ) -> Result<TopicProgress, EngineError> {
        let topic = self.lookup_topic(topic_id).await?;
        let now = self.clock.now();

        let mut record = self.load_record(student_id, &topic).await?;
        let newly_read = record.mark_cheat_sheet_read(now);
        let newly_completed = self.evaluate(&mut record, &topic, now).await?;

        if newly_read || newly_completed {
            record = self.progress.upsert(&record).await?;
        }

        if newly_completed {
            info!(student = %student_id, topic = %topic_id, "topic completed");
            self.cascade_unlock(student_id, topic.subject_id()).await?;
            if let Some(fresh) = self.progress.get(student_id, topic_id).await? {
                record = fresh;
            }
        }

        Ok(record)
    }

    /// Applies a graded quiz attempt to every topic the quiz is bound to.
    ///
    /// Each bound topic is updated independently under its own idempotency
    /// guard; delivering the same (quiz, attempt) twice never double-counts.
    /// A quiz with no active binding to an active topic yields
    /// `NotApplicable`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AttemptNotFound` for an unknown attempt, or
    /// `EngineError::Storage` on persistence failures.
    pub async fn record_quiz_completion(
        &self,
        student_id: StudentId,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    ) -> Result<QuizCompletionOutcome, EngineError> {
        let attempt = match self.attempts.get_attempt(attempt_id).await {
            Ok(attempt) => attempt,
            Err(StorageError::NotFound) => return Err(EngineError::AttemptNotFound(attempt_id)),
            Err(e) => return Err(e.into()),
        };

        let bindings: Vec<_> = self
            .quiz_sets
            .list_by_quiz(quiz_id)
            .await?
            .into_iter()
            .filter(|qs| qs.is_active())
            .collect();
        if bindings.is_empty() {
            debug!(quiz = %quiz_id, "quiz bound to no topic, nothing to apply");
            return Ok(QuizCompletionOutcome::NotApplicable);
        }

        let now = self.clock.now();
        let mut first_affected: Option<TopicProgress> = None;

        for binding in bindings {
            // A binding left pointing at a deactivated topic contributes
            // nothing, same as an inactive binding.
            let topic = match self.lookup_topic(binding.topic_id()).await {
                Ok(topic) => topic,
                Err(EngineError::TopicNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let mut record = self.load_record(student_id, &topic).await?;

            let appended = record.record_quiz_completion(QuizCompletion {
                quiz_id,
                attempt_id,
                completed_at: now,
                score: attempt.score(),
                percentage: attempt.percentage(),
            });
            if !appended {
                debug!(
                    student = %student_id,
                    topic = %topic.id(),
                    quiz = %quiz_id,
                    attempt = %attempt_id,
                    "duplicate quiz completion skipped"
                );
            }
            let newly_completed = self.evaluate(&mut record, &topic, now).await?;

            if appended || newly_completed {
                record = self.progress.upsert(&record).await?;
            }

            if newly_completed {
                info!(student = %student_id, topic = %topic.id(), "topic completed");
                self.cascade_unlock(student_id, topic.subject_id()).await?;
                if let Some(fresh) = self.progress.get(student_id, topic.id()).await? {
                    record = fresh;
                }
            }

            if first_affected.is_none() {
                first_affected = Some(record);
            }
        }

        match first_affected {
            Some(record) => Ok(QuizCompletionOutcome::Applied(record)),
            None => Ok(QuizCompletionOutcome::NotApplicable),
        }
    }

    /// Walks the subject's topics and unlocks every one whose prerequisites
    /// are now fully satisfied.
    ///
    /// One pass suffices: eligibility depends only on other topics'
    /// completion, and no topic can complete during the walk, so a repeated
    /// sweep would find nothing new. Each unlock write is idempotent and
    /// monotonic, so racing cascades converge.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Storage` on persistence failures.
    pub async fn cascade_unlock(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<(), EngineError> {
        let topics: Vec<Topic> = self
            .topics
            .list_by_subject(subject_id)
            .await?
            .into_iter()
            .filter(Topic::is_active)
            .collect();

        let mut records: HashMap<TopicId, TopicProgress> = self
            .progress
            .list_by_subject(student_id, subject_id)
            .await?
            .into_iter()
            .map(|p| (p.topic_id(), p))
            .collect();

        let now = self.clock.now();
        for topic in &topics {
            let already_unlocked = records
                .get(&topic.id())
                .is_some_and(TopicProgress::is_unlocked);
            if already_unlocked {
                continue;
            }
            if !self.unlock_eligible(topic, &records) {
                continue;
            }

            let mut record = self
                .progress
                .get_or_create(student_id, topic.id(), subject_id)
                .await?;
            if record.unlock(now) {
                record = self.progress.upsert(&record).await?;
                info!(student = %student_id, topic = %topic.id(), "topic unlocked");
            }
            records.insert(topic.id(), record);
        }

        Ok(())
    }

    /// Root topics unlock unconditionally; everything else needs every
    /// listed prerequisite completed.
    fn unlock_eligible(&self, topic: &Topic, records: &HashMap<TopicId, TopicProgress>) -> bool {
        if self.policy.is_root(topic) {
            return true;
        }
        if topic.has_no_prerequisites() {
            return false;
        }
        topic.prerequisites().iter().all(|prereq| {
            records
                .get(prereq)
                .is_some_and(TopicProgress::is_completed)
        })
    }

    /// Deactivated topics are invisible to the engine; they resolve the
    /// same as missing ones.
    async fn lookup_topic(&self, topic_id: TopicId) -> Result<Topic, EngineError> {
        match self.topics.get_topic(topic_id).await {
            Ok(topic) if topic.is_active() => Ok(topic),
            Ok(_) | Err(StorageError::NotFound) => Err(EngineError::TopicNotFound(topic_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_record(
        &self,
        student_id: StudentId,
        topic: &Topic,
    ) -> Result<TopicProgress, EngineError> {
        let record = self
            .progress
            .get_or_create(student_id, topic.id(), topic.subject_id())
            .await?;
        if record.subject_id() != topic.subject_id() {
            return Err(EngineError::InvalidState(format!(
                "progress record for topic {} carries subject {} but the catalog says {}",
                topic.id(),
                record.subject_id(),
                topic.subject_id()
            )));
        }
        Ok(record)
    }

    /// Re-evaluates the completion rule against the topic's active quiz
    /// bindings. Returns true if the record newly completed.
    async fn evaluate(
        &self,
        record: &mut TopicProgress,
        topic: &Topic,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let quiz_ids = self.active_quiz_ids(topic.id()).await?;
        Ok(record.evaluate_completion(&quiz_ids, &self.policy, now))
    }

    async fn active_quiz_ids(&self, topic_id: TopicId) -> Result<Vec<QuizId>, EngineError> {
        let mut quiz_ids: Vec<QuizId> = self
            .quiz_sets
            .list_by_topic(topic_id)
            .await?
            .into_iter()
            .filter(|qs| qs.is_active())
            .map(|qs| qs.quiz_id())
            .collect();
        quiz_ids.sort_unstable();
        quiz_ids.dedup();
        Ok(quiz_ids)
    }
}
