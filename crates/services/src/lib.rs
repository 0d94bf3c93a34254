#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod queries;

pub use gate_core::{Clock, GatingPolicy};

pub use engine::{ProgressEngine, QuizCompletionOutcome};
pub use error::EngineError;
pub use queries::{ProgressQueries, SubjectProgress};
