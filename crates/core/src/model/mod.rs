mod catalog;
mod event;
mod ids;
mod progress;

pub use catalog::{QuizAttempt, QuizSet, Topic};
pub use event::ProgressEvent;
pub use ids::{AttemptId, ParseIdError, QuizId, QuizSetId, StudentId, SubjectId, TopicId};
pub use progress::{QuizCompletion, TopicProgress};
