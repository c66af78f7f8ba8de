//! Submission outcome processing.
//!
//! One evaluated submission updates mastery, the review queue, and the
//! task lifecycle inside a single transaction keyed by submission id.
//! Replays return the stored outcome without touching any state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::services::lifecycle::{self, EvaluationSignals};
use crate::services::mastery::{self, AttemptSignal, KeyType};
use crate::services::{paths, review};
use crate::types::{ProblemMetadata, SubmissionResult, SubmissionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryDelta {
    pub key_type: KeyType,
    pub key_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    pub bucket: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub graduated: bool,
}

/// Consolidated result of processing one submission; stored verbatim
/// in the idempotency ledger and returned unchanged on replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub submission_id: Uuid,
    pub task_id: Uuid,
    pub learner_id: String,
    pub status: SubmissionStatus,
    pub score: f64,
    pub mastery: Vec<MasteryDelta>,
    pub review: Option<ReviewSnapshot>,
    #[serde(skip)]
    pub replayed: bool,
}

pub async fn process(
    pool: &SqlitePool,
    config: &CoreConfig,
    result: &SubmissionResult,
    problem: &ProblemMetadata,
    now: DateTime<Utc>,
) -> CoreResult<ProcessingOutcome> {
    result.validate()?;
    if problem.problem_id.trim().is_empty() {
        return Err(CoreError::CollaboratorUnavailable(
            "problem metadata missing from catalog",
        ));
    }

    let mut tx = pool.begin().await?;

    // The idempotency check lives inside the same transaction that
    // performs the update, so a retry of a committed submission always
    // observes the ledger row.
    let existing = sqlx::query("SELECT outcome FROM processed_submissions WHERE submission_id = ?")
        .bind(result.submission_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if let Some(row) = existing {
        let raw: String = row.try_get("outcome").unwrap_or_default();
        let mut outcome: ProcessingOutcome = serde_json::from_str(&raw)?;
        outcome.replayed = true;
        tracing::debug!(submission_id = %result.submission_id, "submission already processed");
        return Ok(outcome);
    }

    let task = lifecycle::get_tx(&mut *tx, result.task_id).await?;
    if task.problem_id != problem.problem_id {
        return Err(CoreError::validation(format!(
            "problem metadata {} does not match task problem {}",
            problem.problem_id, task.problem_id
        )));
    }
    let path = paths::get_in_tx(&mut *tx, task.path_id).await?;
    let learner_id = path.learner_id.clone();

    let score = result.test_score();
    let passed = result.status.is_pass();
    let hint_level = task.hints_used.clamp(0, 3) as u8;
    let time_ratio = compute_time_ratio(result.exec_ms, problem.target_time_seconds);

    let signals = EvaluationSignals {
        status: result.status,
        score,
        tests_passed: result.passed_tests(),
        tests_total: result.total_tests(),
        runtime_ms: result.exec_ms,
        failure_categories: result.hidden.categories.clone(),
        hints_used: task.hints_used,
    };

    // Fixed lock order: the task row is touched before the review item
    // to keep concurrent submissions deadlock-free.
    lifecycle::record_evaluation_tx(&mut *tx, task.id, score, signals, now).await?;

    let review_item = review::apply_outcome(
        &mut *tx,
        config,
        &learner_id,
        &task.problem_id,
        problem.subject,
        problem.difficulty,
        passed,
        now,
    )
    .await?;

    let attempt = AttemptSignal {
        subject: problem.subject,
        status: result.status,
        hint_level,
        time_ratio,
    };
    let mut deltas = Vec::with_capacity(problem.topics.len() + problem.outcomes.len());
    for topic in &problem.topics {
        let record =
            mastery::update(&mut *tx, config, &learner_id, KeyType::Topic, topic, attempt, now)
                .await?;
        deltas.push(MasteryDelta {
            key_type: KeyType::Topic,
            key_id: record.key_id,
            score: record.score,
        });
    }
    for outcome_key in &problem.outcomes {
        let record = mastery::update(
            &mut *tx,
            config,
            &learner_id,
            KeyType::Outcome,
            outcome_key,
            attempt,
            now,
        )
        .await?;
        deltas.push(MasteryDelta {
            key_type: KeyType::Outcome,
            key_id: record.key_id,
            score: record.score,
        });
    }

    let outcome = ProcessingOutcome {
        submission_id: result.submission_id,
        task_id: task.id,
        learner_id: learner_id.clone(),
        status: result.status,
        score,
        mastery: deltas,
        review: review_item.map(|item| ReviewSnapshot {
            bucket: item.bucket,
            due_at: item.due_at,
            graduated: item.is_graduated(),
        }),
        replayed: false,
    };

    sqlx::query(
        "INSERT INTO processed_submissions (submission_id, task_id, outcome, created_at_ms) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(result.submission_id.to_string())
    .bind(task.id.to_string())
    .bind(serde_json::to_string(&outcome)?)
    .bind(db::to_ms(now))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        submission_id = %result.submission_id,
        task_id = %task.id,
        learner_id = %learner_id,
        status = result.status.as_str(),
        score,
        "submission outcome processed"
    );

    Ok(outcome)
}

fn compute_time_ratio(exec_ms: Option<i64>, target_time_seconds: i64) -> f64 {
    let Some(exec_ms) = exec_ms else {
        return 1.0;
    };
    if target_time_seconds <= 0 || exec_ms <= 0 {
        return 1.0;
    }
    (exec_ms as f64 / 1000.0) / target_time_seconds as f64
}
