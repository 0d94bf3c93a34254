//! Shared error types for the services crate.

use thiserror::Error;

use gate_core::model::{AttemptId, SubjectId, TopicId};
use storage::repository::StorageError;

/// Errors emitted by the progress engine and query surface.
///
/// A quiz bound to no topic is deliberately absent here: that case is a
/// valid outcome (`QuizCompletionOutcome::NotApplicable`), not a failure.
/// Store-level write races never surface either; the storage layer retries
/// them internally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("topic {0} does not exist")]
    TopicNotFound(TopicId),

    #[error("subject {0} does not exist")]
    SubjectNotFound(SubjectId),

    #[error("quiz attempt {0} does not exist")]
    AttemptNotFound(AttemptId),

    #[error("invalid progress state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
