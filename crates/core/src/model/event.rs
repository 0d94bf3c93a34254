use serde::{Deserialize, Serialize};

use crate::model::ids::{AttemptId, QuizId, StudentId, TopicId};

/// The two upstream events the engine reacts to, as a tagged variant so the
/// dispatch stays exhaustive and type-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// A student opened and read a topic's study material.
    CheatSheetRead {
        student_id: StudentId,
        topic_id: TopicId,
    },
    /// A graded quiz attempt was submitted. The engine fans this out to
    /// every topic the quiz is bound to.
    QuizCompleted {
        student_id: StudentId,
        quiz_id: QuizId,
        attempt_id: AttemptId,
    },
}

impl ProgressEvent {
    #[must_use]
    pub fn student_id(&self) -> StudentId {
        match self {
            ProgressEvent::CheatSheetRead { student_id, .. }
            | ProgressEvent::QuizCompleted { student_id, .. } => *student_id,
        }
    }
}
