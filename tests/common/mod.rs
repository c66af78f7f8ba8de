#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use mentor_core::config::CoreConfig;
use mentor_core::db::Database;
use mentor_core::services::lifecycle::{self, NewTask, StudyTask, TaskMetadata};
use mentor_core::services::outcome::{self, ProcessingOutcome};
use mentor_core::services::paths::{self, PathConfig, PathMode, StudyPath};
use mentor_core::subjects::Subject;
use mentor_core::types::{
    HiddenTestBatch, ProblemMetadata, SubmissionResult, SubmissionStatus, TestBatch,
};

pub async fn test_db() -> Database {
    Database::connect_in_memory()
        .await
        .expect("in-memory database")
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub async fn create_path(db: &Database, learner_id: &str, mode: PathMode) -> StudyPath {
    let mut tx = db.pool().begin().await.expect("begin");
    let config = PathConfig {
        mode,
        ..PathConfig::default()
    };
    let path = paths::create(&mut *tx, learner_id, "interview-prep", config, t0())
        .await
        .expect("create path");
    tx.commit().await.expect("commit");
    path
}

pub fn new_task(problem: &ProblemMetadata, scheduled_at: DateTime<Utc>) -> NewTask {
    NewTask {
        problem_id: problem.problem_id.clone(),
        module: problem.subject.as_str().to_string(),
        topic_tags: problem.topics.clone(),
        difficulty: problem.difficulty,
        scheduled_at,
        metadata: TaskMetadata::default(),
    }
}

pub async fn create_task(
    db: &Database,
    path: &StudyPath,
    problem: &ProblemMetadata,
    now: DateTime<Utc>,
) -> StudyTask {
    let mut tx = db.pool().begin().await.expect("begin");
    let task = lifecycle::create(&mut *tx, path, new_task(problem, now), now)
        .await
        .expect("create task");
    tx.commit().await.expect("commit");
    task
}

pub fn problem(problem_id: &str, topics: &[&str], difficulty: i64) -> ProblemMetadata {
    ProblemMetadata {
        problem_id: problem_id.to_string(),
        subject: Subject::Coding,
        topics: topics.iter().map(|t| t.to_string()).collect(),
        outcomes: Vec::new(),
        difficulty,
        target_complexity: None,
        target_time_seconds: 600,
    }
}

pub fn submission(task: &StudyTask, status: SubmissionStatus) -> SubmissionResult {
    let passed = matches!(status, SubmissionStatus::Passed);
    SubmissionResult {
        submission_id: Uuid::new_v4(),
        task_id: task.id,
        status,
        visible: TestBatch {
            passed: if passed { 3 } else { 1 },
            total: 3,
        },
        hidden: HiddenTestBatch {
            passed: if passed { 5 } else { 2 },
            total: 5,
            categories: if passed {
                Vec::new()
            } else {
                vec!["edge-cases".to_string()]
            },
        },
        exec_ms: Some(120_000),
    }
}

/// Creates, starts, and evaluates one attempt on `problem` through the
/// outcome processor.
pub async fn attempt(
    db: &Database,
    config: &CoreConfig,
    path: &StudyPath,
    problem: &ProblemMetadata,
    status: SubmissionStatus,
    now: DateTime<Utc>,
) -> ProcessingOutcome {
    let task = create_task(db, path, problem, now).await;
    lifecycle::start(db.pool(), task.id, now).await.expect("start task");
    let result = submission(&lifecycle::get(db.pool(), task.id).await.expect("task"), status);
    outcome::process(db.pool(), config, &result, problem, now)
        .await
        .expect("process submission")
}

/// Evaluates one submission against a task that is already in progress.
pub async fn attempt_on_started(
    db: &Database,
    config: &CoreConfig,
    task: &StudyTask,
    problem: &ProblemMetadata,
    now: DateTime<Utc>,
) -> ProcessingOutcome {
    let current = lifecycle::get(db.pool(), task.id).await.expect("task");
    let result = submission(&current, SubmissionStatus::Passed);
    outcome::process(db.pool(), config, &result, problem, now)
        .await
        .expect("process submission")
}

pub async fn count_events(db: &Database, task_id: Uuid) -> usize {
    lifecycle::events(db.pool(), task_id)
        .await
        .expect("events")
        .len()
}
