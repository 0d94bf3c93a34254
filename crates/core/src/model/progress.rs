use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{AttemptId, QuizId, StudentId, SubjectId, TopicId};
use crate::policy::GatingPolicy;

/// One passing-or-not quiz completion recorded against a topic.
///
/// Entries are append-only and unique by `(quiz_id, attempt_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuizCompletion {
    pub quiz_id: QuizId,
    pub attempt_id: AttemptId,
    pub completed_at: DateTime<Utc>,
    pub score: f64,
    pub percentage: f64,
}

/// The durable per-(student, topic) progress record.
///
/// State machine: `LOCKED → UNLOCKED → COMPLETED`. Both `is_unlocked` and
/// `is_completed` are monotonic; once set they are never cleared, and the
/// record itself is never deleted. All mutators report whether they changed
/// anything, so callers can skip redundant writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicProgress {
    student_id: StudentId,
    topic_id: TopicId,
    subject_id: SubjectId,
    is_unlocked: bool,
    unlocked_at: Option<DateTime<Utc>>,
    cheat_sheet_read: bool,
    read_at: Option<DateTime<Utc>>,
    completed_quizzes: Vec<QuizCompletion>,
    is_completed: bool,
    completed_at: Option<DateTime<Utc>>,
}

impl TopicProgress {
    /// Creates the default record: locked, unread, no quiz completions.
    #[must_use]
    pub fn new_locked(student_id: StudentId, topic_id: TopicId, subject_id: SubjectId) -> Self {
        Self {
            student_id,
            topic_id,
            subject_id,
            is_unlocked: false,
            unlocked_at: None,
            cheat_sheet_read: false,
            read_at: None,
            completed_quizzes: Vec::new(),
            is_completed: false,
            completed_at: None,
        }
    }

    /// Rebuilds a record from persisted fields without revalidation.
    #[must_use]
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn from_persisted(
        student_id: StudentId,
        topic_id: TopicId,
        subject_id: SubjectId,
        is_unlocked: bool,
        unlocked_at: Option<DateTime<Utc>>,
        cheat_sheet_read: bool,
        read_at: Option<DateTime<Utc>>,
        completed_quizzes: Vec<QuizCompletion>,
        is_completed: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
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
        }
    }

    // Accessors
    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    #[must_use]
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.is_unlocked
    }

    #[must_use]
    pub fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        self.unlocked_at
    }

    #[must_use]
    pub fn cheat_sheet_read(&self) -> bool {
        self.cheat_sheet_read
    }

    #[must_use]
    pub fn read_at(&self) -> Option<DateTime<Utc>> {
        self.read_at
    }

    #[must_use]
    pub fn completed_quizzes(&self) -> &[QuizCompletion] {
        &self.completed_quizzes
    }

    /// Count of recorded quiz completions, derived from the entry list.
    #[must_use]
    pub fn total_quizzes_completed(&self) -> u32 {
        u32::try_from(self.completed_quizzes.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Marks the topic's study material as read.
    ///
    /// Returns true if the flag was newly set; re-application is a no-op.
    pub fn mark_cheat_sheet_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.cheat_sheet_read {
            return false;
        }
        self.cheat_sheet_read = true;
        self.read_at = Some(now);
        true
    }

    /// Appends a quiz completion entry under the idempotency guard.
    ///
    /// Returns true only on an actual append: an entry with the same
    /// `(quiz_id, attempt_id)` already present leaves the record untouched.
    pub fn record_quiz_completion(&mut self, completion: QuizCompletion) -> bool {
        let duplicate = self
            .completed_quizzes
            .iter()
            .any(|c| c.quiz_id == completion.quiz_id && c.attempt_id == completion.attempt_id);
        if duplicate {
            return false;
        }
        self.completed_quizzes.push(completion);
        true
    }

    /// Transitions `LOCKED → UNLOCKED`. Returns true if newly unlocked.
    pub fn unlock(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_unlocked {
            return false;
        }
        self.is_unlocked = true;
        self.unlocked_at = Some(now);
        true
    }

    /// True when at least one completion for `quiz_id` meets the threshold.
    #[must_use]
    pub fn has_passing_attempt(&self, quiz_id: QuizId, pass_threshold: f64) -> bool {
        self.completed_quizzes
            .iter()
            .any(|c| c.quiz_id == quiz_id && c.percentage >= pass_threshold)
    }

    /// Quiz ids from `active_quiz_ids` still lacking a passing attempt.
    ///
    /// This is the "what is left to do" projection; an unmet condition is
    /// normal state, not an error.
    #[must_use]
    pub fn missing_quiz_passes(
        &self,
        active_quiz_ids: &[QuizId],
        pass_threshold: f64,
    ) -> Vec<QuizId> {
        active_quiz_ids
            .iter()
            .copied()
            .filter(|&quiz_id| !self.has_passing_attempt(quiz_id, pass_threshold))
            .collect()
    }

    /// Re-evaluates the `UNLOCKED → COMPLETED` transition.
    ///
    /// Completion requires the cheat sheet read and, for every quiz in
    /// `active_quiz_ids`, at least one recorded completion at or above the
    /// policy threshold. A topic bound to no quizzes needs only the
    /// cheat-sheet condition. Already-completed records are terminal;
    /// re-evaluation is a no-op. Returns true if the record newly completed.
    pub fn evaluate_completion(
        &mut self,
        active_quiz_ids: &[QuizId],
        policy: &GatingPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_completed {
            return false;
        }
        if !self.cheat_sheet_read {
            return false;
        }
        let all_quizzes_passed = active_quiz_ids
            .iter()
            .all(|&quiz_id| self.has_passing_attempt(quiz_id, policy.pass_threshold()));
        if !all_quizzes_passed {
            return false;
        }
        self.is_completed = true;
        self.completed_at = Some(now);
        true
    }

    /// Merges another record for the same (student, topic) into this one.
    ///
    /// The merge is monotonic: booleans are OR-ed, their timestamps keep the
    /// earliest observed value, and quiz completions are unioned by
    /// `(quiz_id, attempt_id)`. Storage backends use this to resolve
    /// concurrent read-modify-write races; applying it in either direction
    /// converges to the same record.
    pub fn absorb(&mut self, other: &TopicProgress) {
        if other.cheat_sheet_read && !self.cheat_sheet_read {
            self.cheat_sheet_read = true;
            self.read_at = other.read_at;
        } else if self.cheat_sheet_read && other.cheat_sheet_read {
            self.read_at = earliest(self.read_at, other.read_at);
        }

        if other.is_unlocked && !self.is_unlocked {
            self.is_unlocked = true;
            self.unlocked_at = other.unlocked_at;
        } else if self.is_unlocked && other.is_unlocked {
            self.unlocked_at = earliest(self.unlocked_at, other.unlocked_at);
        }

        for completion in &other.completed_quizzes {
            self.record_quiz_completion(*completion);
        }

        if other.is_completed && !self.is_completed {
            self.is_completed = true;
            self.completed_at = other.completed_at;
        } else if self.is_completed && other.is_completed {
            self.completed_at = earliest(self.completed_at, other.completed_at);
        }
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn build_record() -> TopicProgress {
        TopicProgress::new_locked(StudentId::new(1), TopicId::new(10), SubjectId::new(100))
    }

    fn completion(quiz: u64, attempt: u64, percentage: f64) -> QuizCompletion {
        QuizCompletion {
            quiz_id: QuizId::new(quiz),
            attempt_id: AttemptId::new(attempt),
            completed_at: fixed_now(),
            score: percentage / 10.0,
            percentage,
        }
    }

    #[test]
    fn default_record_is_locked_and_empty() {
        let record = build_record();
        assert!(!record.is_unlocked());
        assert!(!record.cheat_sheet_read());
        assert!(!record.is_completed());
        assert_eq!(record.total_quizzes_completed(), 0);
    }

    #[test]
    fn cheat_sheet_read_is_idempotent() {
        let mut record = build_record();
        let first = fixed_now();
        assert!(record.mark_cheat_sheet_read(first));
        assert!(!record.mark_cheat_sheet_read(first + Duration::hours(1)));
        assert_eq!(record.read_at(), Some(first));
    }

    #[test]
    fn duplicate_quiz_completion_is_rejected() {
        let mut record = build_record();
        assert!(record.record_quiz_completion(completion(1, 1, 75.0)));
        assert!(!record.record_quiz_completion(completion(1, 1, 75.0)));
        assert_eq!(record.total_quizzes_completed(), 1);
    }

    #[test]
    fn same_quiz_different_attempt_is_appended() {
        let mut record = build_record();
        assert!(record.record_quiz_completion(completion(1, 1, 40.0)));
        assert!(record.record_quiz_completion(completion(1, 2, 80.0)));
        assert_eq!(record.total_quizzes_completed(), 2);
    }

    #[test]
    fn unlock_is_monotonic() {
        let mut record = build_record();
        let first = fixed_now();
        assert!(record.unlock(first));
        assert!(!record.unlock(first + Duration::hours(1)));
        assert!(record.is_unlocked());
        assert_eq!(record.unlocked_at(), Some(first));
    }

    #[test]
    fn completion_requires_cheat_sheet() {
        let mut record = build_record();
        let policy = GatingPolicy::default();
        record.record_quiz_completion(completion(1, 1, 90.0));
        assert!(!record.evaluate_completion(&[QuizId::new(1)], &policy, fixed_now()));
        assert!(!record.is_completed());
    }

    #[test]
    fn completion_requires_passing_percentage() {
        let mut record = build_record();
        let policy = GatingPolicy::default();
        record.mark_cheat_sheet_read(fixed_now());
        record.record_quiz_completion(completion(1, 1, 59.9));
        assert!(!record.evaluate_completion(&[QuizId::new(1)], &policy, fixed_now()));

        record.record_quiz_completion(completion(1, 2, 60.0));
        assert!(record.evaluate_completion(&[QuizId::new(1)], &policy, fixed_now()));
        assert!(record.is_completed());
    }

    #[test]
    fn completion_with_no_bound_quizzes_needs_only_cheat_sheet() {
        let mut record = build_record();
        let policy = GatingPolicy::default();
        assert!(!record.evaluate_completion(&[], &policy, fixed_now()));
        record.mark_cheat_sheet_read(fixed_now());
        assert!(record.evaluate_completion(&[], &policy, fixed_now()));
    }

    #[test]
    fn completion_is_terminal() {
        let mut record = build_record();
        let policy = GatingPolicy::default();
        let first = fixed_now();
        record.mark_cheat_sheet_read(first);
        assert!(record.evaluate_completion(&[], &policy, first));
        assert!(!record.evaluate_completion(&[], &policy, first + Duration::hours(1)));
        assert_eq!(record.completed_at(), Some(first));
    }

    #[test]
    fn evaluation_order_does_not_matter() {
        let policy = GatingPolicy::default();
        let quizzes = [QuizId::new(1)];
        let now = fixed_now();

        // cheat sheet first, then quiz
        let mut a = build_record();
        a.mark_cheat_sheet_read(now);
        a.evaluate_completion(&quizzes, &policy, now);
        a.record_quiz_completion(completion(1, 1, 75.0));
        a.evaluate_completion(&quizzes, &policy, now);

        // quiz first, then cheat sheet
        let mut b = build_record();
        b.record_quiz_completion(completion(1, 1, 75.0));
        b.evaluate_completion(&quizzes, &policy, now);
        b.mark_cheat_sheet_read(now);
        b.evaluate_completion(&quizzes, &policy, now);

        assert!(a.is_completed());
        assert!(b.is_completed());
    }

    #[test]
    fn missing_quiz_passes_lists_unmet_quizzes() {
        let mut record = build_record();
        record.record_quiz_completion(completion(1, 1, 90.0));
        record.record_quiz_completion(completion(2, 2, 30.0));
        let missing =
            record.missing_quiz_passes(&[QuizId::new(1), QuizId::new(2), QuizId::new(3)], 60.0);
        assert_eq!(missing, vec![QuizId::new(2), QuizId::new(3)]);
    }

    #[test]
    fn absorb_is_monotonic_and_deduplicates() {
        let now = fixed_now();
        let later = now + Duration::hours(2);

        let mut stored = build_record();
        stored.unlock(now);
        stored.record_quiz_completion(completion(1, 1, 70.0));

        let mut incoming = build_record();
        incoming.unlock(later);
        incoming.mark_cheat_sheet_read(later);
        incoming.record_quiz_completion(completion(1, 1, 70.0));
        incoming.record_quiz_completion(completion(2, 5, 85.0));

        stored.absorb(&incoming);

        assert!(stored.is_unlocked());
        assert_eq!(stored.unlocked_at(), Some(now));
        assert!(stored.cheat_sheet_read());
        assert_eq!(stored.read_at(), Some(later));
        assert_eq!(stored.total_quizzes_completed(), 2);
    }

    #[test]
    fn absorb_converges_in_either_direction() {
        let now = fixed_now();

        let mut left = build_record();
        left.unlock(now);
        left.record_quiz_completion(completion(1, 1, 70.0));

        let mut right = build_record();
        right.mark_cheat_sheet_read(now);
        right.record_quiz_completion(completion(2, 2, 80.0));

        let mut ab = left.clone();
        ab.absorb(&right);
        let mut ba = right.clone();
        ba.absorb(&left);

        assert_eq!(ab.is_unlocked(), ba.is_unlocked());
        assert_eq!(ab.cheat_sheet_read(), ba.cheat_sheet_read());
        assert_eq!(ab.total_quizzes_completed(), ba.total_quizzes_completed());
    }
}
