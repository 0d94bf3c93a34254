use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use gate_core::model::{StudentId, SubjectId, Topic, TopicId, TopicProgress};
use gate_core::{Clock, GatingPolicy};
use storage::repository::{ProgressRepository, Storage, StorageError, TopicCatalog};

use crate::error::EngineError;

/// Aggregate view of a student's standing within one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectProgress {
    pub subject_id: SubjectId,
    pub total_topics: u32,
    pub completed_topics: u32,
    pub progress_percentage: f64,
    pub topics: Vec<TopicProgress>,
}

/// Read-only projections over the Progress Store.
///
/// Unlike the engine, queries never apply events; the only write they may
/// perform is persisting a record for a topic that is found to be newly
/// unlock-eligible on first read.
#[derive(Clone)]
pub struct ProgressQueries {
    clock: Clock,
    policy: GatingPolicy,
    progress: Arc<dyn ProgressRepository>,
    topics: Arc<dyn TopicCatalog>,
}

impl ProgressQueries {
    #[must_use]
    pub fn new(clock: Clock, policy: GatingPolicy, storage: &Storage) -> Self {
        Self {
            clock,
            policy,
            progress: Arc::clone(&storage.progress),
            topics: Arc::clone(&storage.topics),
        }
    }

    /// The stored record for (student, topic), or a freshly-evaluated one.
    ///
    /// When no record exists yet, the topic's current unlock eligibility is
    /// checked: a root topic, or one whose prerequisites are all completed,
    /// gets a new unlocked record persisted on the spot. An ineligible
    /// topic yields a transient locked projection that is not persisted.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::TopicNotFound` for an unknown topic, or
    /// `EngineError::Storage` on persistence failures.
    pub async fn get_topic_progress(
        &self,
        student_id: StudentId,
        topic_id: TopicId,
    ) -> Result<TopicProgress, EngineError> {
        let topic = match self.topics.get_topic(topic_id).await {
            Ok(topic) => topic,
            Err(StorageError::NotFound) => return Err(EngineError::TopicNotFound(topic_id)),
            Err(e) => return Err(e.into()),
        };

        if let Some(record) = self.progress.get(student_id, topic_id).await? {
            return Ok(record);
        }

        if self.currently_eligible(student_id, &topic).await? {
            let mut record = self
                .progress
                .get_or_create(student_id, topic_id, topic.subject_id())
                .await?;
            if record.unlock(self.clock.now()) {
                record = self.progress.upsert(&record).await?;
                info!(student = %student_id, topic = %topic_id, "topic unlocked on first read");
            }
            return Ok(record);
        }

        Ok(TopicProgress::new_locked(
            student_id,
            topic_id,
            topic.subject_id(),
        ))
    }

    /// All records for the subject plus completion totals over its active
    /// topics, records ordered by catalog topic order.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SubjectNotFound` when the catalog holds no
    /// topics for the subject, or `EngineError::Storage` on persistence
    /// failures.
    pub async fn get_subject_progress(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
    ) -> Result<SubjectProgress, EngineError> {
        let catalog = self.topics.list_by_subject(subject_id).await?;
        if catalog.is_empty() {
            return Err(EngineError::SubjectNotFound(subject_id));
        }

        let active_ids: Vec<TopicId> = catalog
            .iter()
            .filter(|t| t.is_active())
            .map(Topic::id)
            .collect();

        let mut records = self.progress.list_by_subject(student_id, subject_id).await?;
        sort_by_catalog_order(&mut records, &catalog);

        let total_topics = u32::try_from(active_ids.len()).unwrap_or(u32::MAX);
        let completed_topics = u32::try_from(
            records
                .iter()
                .filter(|r| r.is_completed() && active_ids.contains(&r.topic_id()))
                .count(),
        )
        .unwrap_or(u32::MAX);

        let progress_percentage = if total_topics == 0 {
            0.0
        } else {
            round2(f64::from(completed_topics) / f64::from(total_topics) * 100.0)
        };

        Ok(SubjectProgress {
            subject_id,
            total_topics,
            completed_topics,
            progress_percentage,
            topics: records,
        })
    }

    /// Every record the student has, across subjects, ordered by subject id
    /// then the topic's catalog order.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Storage` on persistence failures.
    pub async fn get_student_progress(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<TopicProgress>, EngineError> {
        let records = self.progress.list_by_student(student_id).await?;

        let mut subjects: Vec<SubjectId> = records.iter().map(TopicProgress::subject_id).collect();
        subjects.sort_unstable();
        subjects.dedup();

        let mut order_by_topic: HashMap<TopicId, u32> = HashMap::new();
        for subject_id in &subjects {
            for topic in self.topics.list_by_subject(*subject_id).await? {
                order_by_topic.insert(topic.id(), topic.order());
            }
        }

        let mut records = records;
        records.sort_by_key(|r| {
            (
                r.subject_id(),
                order_by_topic.get(&r.topic_id()).copied().unwrap_or(u32::MAX),
                r.topic_id(),
            )
        });
        Ok(records)
    }

    async fn currently_eligible(
        &self,
        student_id: StudentId,
        topic: &Topic,
    ) -> Result<bool, EngineError> {
        if self.policy.is_root(topic) {
            return Ok(true);
        }
        if topic.has_no_prerequisites() {
            return Ok(false);
        }
        for prereq in topic.prerequisites() {
            let completed = self
                .progress
                .get(student_id, *prereq)
                .await?
                .is_some_and(|r| r.is_completed());
            if !completed {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn sort_by_catalog_order(records: &mut [TopicProgress], catalog: &[Topic]) {
    let order: HashMap<TopicId, u32> = catalog.iter().map(|t| (t.id(), t.order())).collect();
    records.sort_by_key(|r| {
        (
            order.get(&r.topic_id()).copied().unwrap_or(u32::MAX),
            r.topic_id(),
        )
    });
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
