use gate_core::model::{
    AttemptId, QuizAttempt, QuizCompletion, QuizId, QuizSet, QuizSetId, StudentId, SubjectId,
    Topic, TopicId, TopicProgress,
};
use gate_core::time::fixed_now;
use storage::repository::{AttemptSource, ProgressRepository, QuizSetCatalog, TopicCatalog};
use storage::sqlite::SqliteRepository;

const STUDENT: StudentId = StudentId::new(1);
const SUBJECT: SubjectId = SubjectId::new(100);

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
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

#[tokio::test]
async fn progress_roundtrip_preserves_all_fields() {
    let repo = connect("memdb_roundtrip").await;
    let now = fixed_now();

    let mut record = repo
        .get_or_create(STUDENT, TopicId::new(1), SUBJECT)
        .await
        .expect("create");
    assert!(!record.is_unlocked());

    record.unlock(now);
    record.mark_cheat_sheet_read(now);
    record.record_quiz_completion(completion(10, 1, 75.0));
    let written = repo.upsert(&record).await.expect("upsert");

    let fetched = repo
        .get(STUDENT, TopicId::new(1))
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(fetched, written);
    assert!(fetched.is_unlocked());
    assert!(fetched.cheat_sheet_read());
    assert_eq!(fetched.total_quizzes_completed(), 1);
    assert_eq!(fetched.unlocked_at(), Some(now));
}

#[tokio::test]
async fn get_or_create_is_stable_across_calls() {
    let repo = connect("memdb_get_or_create").await;

    let first = repo
        .get_or_create(STUDENT, TopicId::new(2), SUBJECT)
        .await
        .expect("first");
    let second = repo
        .get_or_create(STUDENT, TopicId::new(2), SUBJECT)
        .await
        .expect("second");
    assert_eq!(first, second);

    let all = ProgressRepository::list_by_subject(&repo, STUDENT, SUBJECT)
        .await
        .expect("list");
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn upsert_merges_concurrent_histories() {
    let repo = connect("memdb_merge").await;
    let now = fixed_now();

    // Two writers both started from the freshly-created record.
    let base = repo
        .get_or_create(STUDENT, TopicId::new(3), SUBJECT)
        .await
        .expect("create");

    let mut writer_a = base.clone();
    writer_a.unlock(now);
    writer_a.record_quiz_completion(completion(10, 1, 80.0));
    repo.upsert(&writer_a).await.expect("first upsert");

    let mut writer_b = base;
    writer_b.mark_cheat_sheet_read(now);
    writer_b.record_quiz_completion(completion(10, 1, 80.0));
    writer_b.record_quiz_completion(completion(11, 2, 90.0));
    let merged = repo.upsert(&writer_b).await.expect("second upsert");

    // Neither writer's fields were lost, and the duplicate entry collapsed.
    assert!(merged.is_unlocked());
    assert!(merged.cheat_sheet_read());
    assert_eq!(merged.total_quizzes_completed(), 2);
}

#[tokio::test]
async fn list_by_student_spans_subjects() {
    let repo = connect("memdb_list_student").await;
    let other = SubjectId::new(200);

    repo.get_or_create(STUDENT, TopicId::new(1), SUBJECT)
        .await
        .expect("first");
    repo.get_or_create(STUDENT, TopicId::new(9), other)
        .await
        .expect("second");
    repo.get_or_create(StudentId::new(2), TopicId::new(1), SUBJECT)
        .await
        .expect("other student");

    let records = repo.list_by_student(STUDENT).await.expect("list");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.student_id() == STUDENT));
}

#[tokio::test]
async fn catalog_tables_roundtrip() {
    let repo = connect("memdb_catalog").await;

    let t1 = Topic::new(TopicId::new(1), SUBJECT, 0, vec![], true);
    let t2 = Topic::new(TopicId::new(2), SUBJECT, 2, vec![TopicId::new(1)], true);
    repo.insert_topic(&t1).await.expect("t1");
    repo.insert_topic(&t2).await.expect("t2");
    repo.insert_quiz_set(&QuizSet::new(
        QuizSetId::new(1),
        TopicId::new(1),
        QuizId::new(10),
        true,
    ))
    .await
    .expect("quiz set");
    repo.insert_attempt(&QuizAttempt::new(AttemptId::new(5), 7.5, 75.0))
        .await
        .expect("attempt");

    let topics = TopicCatalog::list_by_subject(&repo, SUBJECT)
        .await
        .expect("topics");
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[0], t1);
    assert_eq!(topics[1].prerequisites(), &[TopicId::new(1)]);

    let bindings = repo.list_by_quiz(QuizId::new(10)).await.expect("bindings");
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].topic_id(), TopicId::new(1));

    let by_topic = repo.list_by_topic(TopicId::new(1)).await.expect("by topic");
    assert_eq!(by_topic, bindings);

    let attempt = repo.get_attempt(AttemptId::new(5)).await.expect("attempt");
    assert!((attempt.percentage() - 75.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn completed_record_survives_a_stale_write() {
    let repo = connect("memdb_stale").await;
    let now = fixed_now();

    let mut record = repo
        .get_or_create(STUDENT, TopicId::new(4), SUBJECT)
        .await
        .expect("create");
    record.unlock(now);
    record.mark_cheat_sheet_read(now);
    record.evaluate_completion(&[], &gate_core::GatingPolicy::default(), now);
    assert!(record.is_completed());
    repo.upsert(&record).await.expect("complete");

    // A stale writer that never saw the completion cannot undo it.
    let stale = TopicProgress::new_locked(STUDENT, TopicId::new(4), SUBJECT);
    let merged = repo.upsert(&stale).await.expect("stale upsert");
    assert!(merged.is_completed());
    assert!(merged.is_unlocked());
    assert!(merged.cheat_sheet_read());
}
