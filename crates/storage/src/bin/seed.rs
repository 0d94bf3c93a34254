use std::fmt;

use gate_core::model::{
    AttemptId, QuizAttempt, QuizId, QuizSet, QuizSetId, SubjectId, Topic, TopicId,
};
use storage::sqlite::SqliteRepository;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    subject_id: SubjectId,
    topics: u32,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidSubjectId { raw: String },
    InvalidTopics { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidSubjectId { raw } => write!(f, "invalid --subject-id value: {raw}"),
            ArgsError::InvalidTopics { raw } => write!(f, "invalid --topics value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("GATE_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut subject_id = std::env::var("GATE_SUBJECT_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| SubjectId::new(100), SubjectId::new);
        let mut topics = std::env::var("GATE_TOPICS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(4);

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--subject-id" => {
                    let value = require_value(&mut args, "--subject-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidSubjectId { raw: value.clone() })?;
                    subject_id = SubjectId::new(parsed);
                }
                "--topics" => {
                    let value = require_value(&mut args, "--topics")?;
                    topics = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidTopics { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            subject_id,
            topics,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --subject-id <id>         Subject to seed (default: 100)");
    eprintln!("  --topics <n>              Length of the prerequisite chain (default: 4)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  GATE_DB_URL, GATE_SUBJECT_ID, GATE_TOPICS");
}

/// Seeds a demo subject: a prerequisite chain of topics, one quiz bound to
/// each topic, and a passing attempt per quiz so the gating flow can be
/// exercised end to end.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let repo = SqliteRepository::connect(&args.db_url).await?;
    repo.migrate().await?;

    let base = args.subject_id.value() * 1_000;
    for i in 0..u64::from(args.topics) {
        let topic_id = TopicId::new(base + i + 1);
        let prerequisites = if i == 0 {
            vec![]
        } else {
            vec![TopicId::new(base + i)]
        };
        let order = u32::try_from(i).unwrap_or(u32::MAX);
        let topic = Topic::new(topic_id, args.subject_id, order, prerequisites, true);
        repo.insert_topic(&topic).await?;

        let quiz_id = QuizId::new(base + 500 + i);
        repo.insert_quiz_set(&QuizSet::new(
            QuizSetId::new(base + 700 + i),
            topic_id,
            quiz_id,
            true,
        ))
        .await?;

        repo.insert_attempt(&QuizAttempt::new(
            AttemptId::new(base + 900 + i),
            8.0,
            80.0,
        ))
        .await?;
    }

    println!(
        "seeded subject {} with a {}-topic prerequisite chain into {}",
        args.subject_id, args.topics, args.db_url
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("seed failed: {e}");
        std::process::exit(1);
    }
}
