use serde::{Deserialize, Serialize};

use crate::model::ids::{AttemptId, QuizId, QuizSetId, SubjectId, TopicId};

/// An addressable unit of learning content within a subject.
///
/// Topics are authored elsewhere; the gating engine only reads them. The
/// `order` field positions the topic within its subject, and `prerequisites`
/// lists the topics a student must complete before this one may unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    id: TopicId,
    subject_id: SubjectId,
    order: u32,
    prerequisites: Vec<TopicId>,
    is_active: bool,
}

impl Topic {
    #[must_use]
    pub fn new(
        id: TopicId,
        subject_id: SubjectId,
        order: u32,
        prerequisites: Vec<TopicId>,
        is_active: bool,
    ) -> Self {
        Self {
            id,
            subject_id,
            order,
            prerequisites,
            is_active,
        }
    }

    #[must_use]
    pub fn id(&self) -> TopicId {
        self.id
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn prerequisites(&self) -> &[TopicId] {
        &self.prerequisites
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// True when the topic lists no prerequisites at all.
    #[must_use]
    pub fn has_no_prerequisites(&self) -> bool {
        self.prerequisites.is_empty()
    }
}

/// A binding between a topic and a quiz.
///
/// Many-to-many: one quiz may be bound to several topics, and a topic may
/// require several quizzes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSet {
    id: QuizSetId,
    topic_id: TopicId,
    quiz_id: QuizId,
    is_active: bool,
}

impl QuizSet {
    #[must_use]
    pub fn new(id: QuizSetId, topic_id: TopicId, quiz_id: QuizId, is_active: bool) -> Self {
        Self {
            id,
            topic_id,
            quiz_id,
            is_active,
        }
    }

    #[must_use]
    pub fn id(&self) -> QuizSetId {
        self.id
    }

    #[must_use]
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

/// A graded quiz attempt, as reported by the quiz-taking subsystem.
///
/// The engine never computes scores; it only compares `percentage` against
/// the configured pass threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuizAttempt {
    id: AttemptId,
    score: f64,
    percentage: f64,
}

impl QuizAttempt {
    #[must_use]
    pub fn new(id: AttemptId, score: f64, percentage: f64) -> Self {
        Self {
            id,
            score,
            percentage,
        }
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_accessors() {
        let topic = Topic::new(
            TopicId::new(2),
            SubjectId::new(1),
            1,
            vec![TopicId::new(1)],
            true,
        );
        assert_eq!(topic.id(), TopicId::new(2));
        assert_eq!(topic.subject_id(), SubjectId::new(1));
        assert_eq!(topic.order(), 1);
        assert_eq!(topic.prerequisites(), &[TopicId::new(1)]);
        assert!(topic.is_active());
        assert!(!topic.has_no_prerequisites());
    }

    #[test]
    fn quiz_set_accessors() {
        let set = QuizSet::new(QuizSetId::new(1), TopicId::new(2), QuizId::new(3), true);
        assert_eq!(set.topic_id(), TopicId::new(2));
        assert_eq!(set.quiz_id(), QuizId::new(3));
        assert!(set.is_active());
    }

    #[test]
    fn attempt_carries_score_and_percentage() {
        let attempt = QuizAttempt::new(AttemptId::new(9), 15.0, 75.0);
        assert_eq!(attempt.id(), AttemptId::new(9));
        assert!((attempt.score() - 15.0).abs() < f64::EPSILON);
        assert!((attempt.percentage() - 75.0).abs() < f64::EPSILON);
    }
}
