//! Study-task lifecycle: state machine plus append-only event log.
//!
//! Every transition is one atomic unit: the row mutation and the event
//! append commit or roll back together. Replaying a task's events in
//! order reproduces its status and counters.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::services::paths::StudyPath;
use crate::types::{NextItem, ProblemMetadata, SelectionReason, SubmissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Completed,
    Skipped,
    Expired,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    Created,
    Started,
    Submitted,
    Evaluated,
    HintRequested,
    TutorInteraction,
    StatusChanged,
}

impl TaskEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Submitted => "submitted",
            Self::Evaluated => "evaluated",
            Self::HintRequested => "hint_requested",
            Self::TutorInteraction => "tutor_interaction",
            Self::StatusChanged => "status_changed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "started" => Some(Self::Started),
            "submitted" => Some(Self::Submitted),
            "evaluated" => Some(Self::Evaluated),
            "hint_requested" => Some(Self::HintRequested),
            "tutor_interaction" => Some(Self::TutorInteraction),
            "status_changed" => Some(Self::StatusChanged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Generated,
    ReviewInjection,
    Manual,
}

/// Typed task metadata; `extra` holds unstructured provenance only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    pub source: TaskSource,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            source: TaskSource::Generated,
            extra: BTreeMap::new(),
        }
    }
}

impl TaskMetadata {
    pub fn from_source(source: TaskSource) -> Self {
        Self {
            source,
            extra: BTreeMap::new(),
        }
    }
}

/// Categorized signals captured by one evaluation; stored as the
/// `evaluated` event payload and echoed into the consolidated outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSignals {
    pub status: SubmissionStatus,
    pub score: f64,
    pub tests_passed: i64,
    pub tests_total: i64,
    #[serde(default)]
    pub runtime_ms: Option<i64>,
    #[serde(default)]
    pub failure_categories: Vec<String>,
    pub hints_used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusChange {
    from: TaskStatus,
    to: TaskStatus,
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyTask {
    pub id: Uuid,
    pub path_id: Uuid,
    pub problem_id: String,
    pub module: String,
    pub topic_tags: Vec<String>,
    pub difficulty: i64,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub score: Option<f64>,
    pub hints_used: i64,
    pub metadata: TaskMetadata,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub problem_id: String,
    pub module: String,
    pub topic_tags: Vec<String>,
    pub difficulty: i64,
    pub scheduled_at: DateTime<Utc>,
    pub metadata: TaskMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: Uuid,
    pub event_type: TaskEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub async fn create(
    conn: &mut SqliteConnection,
    path: &StudyPath,
    input: NewTask,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    if !(1..=5).contains(&input.difficulty) {
        return Err(CoreError::validation(format!(
            "difficulty {} outside 1..=5",
            input.difficulty
        )));
    }
    if input.problem_id.trim().is_empty() {
        return Err(CoreError::validation("empty problem_id"));
    }

    let task = StudyTask {
        id: Uuid::new_v4(),
        path_id: path.id,
        problem_id: input.problem_id,
        module: input.module,
        topic_tags: input.topic_tags,
        difficulty: input.difficulty,
        scheduled_at: input.scheduled_at,
        started_at: None,
        completed_at: None,
        status: TaskStatus::Scheduled,
        score: None,
        hints_used: 0,
        metadata: input.metadata,
        version: 0,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO study_tasks \
         (id, path_id, problem_id, module, topic_tags, difficulty, scheduled_at_ms, \
          status, hints_used, metadata, version, created_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 0, ?)",
    )
    .bind(task.id.to_string())
    .bind(task.path_id.to_string())
    .bind(&task.problem_id)
    .bind(&task.module)
    .bind(serde_json::to_string(&task.topic_tags)?)
    .bind(task.difficulty)
    .bind(db::to_ms(task.scheduled_at))
    .bind(task.status.as_str())
    .bind(serde_json::to_string(&task.metadata)?)
    .bind(db::to_ms(now))
    .execute(&mut *conn)
    .await?;

    append_event(
        conn,
        task.id,
        TaskEventType::Created,
        serde_json::json!({}),
        now,
    )
    .await?;

    Ok(task)
}

pub async fn create_batch(
    conn: &mut SqliteConnection,
    path: &StudyPath,
    inputs: Vec<NewTask>,
    now: DateTime<Utc>,
) -> CoreResult<Vec<StudyTask>> {
    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        created.push(create(conn, path, input, now).await?);
    }
    Ok(created)
}

/// scheduled → in_progress.
pub async fn start(pool: &SqlitePool, task_id: Uuid, now: DateTime<Utc>) -> CoreResult<StudyTask> {
    let mut tx = pool.begin().await?;
    let task = start_tx(&mut *tx, task_id, now).await?;
    tx.commit().await?;
    Ok(task)
}

pub async fn start_tx(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    let task = get_tx(conn, task_id).await?;
    if task.status != TaskStatus::Scheduled {
        return Err(invalid_transition(&task, "start"));
    }

    guarded_update(
        conn,
        &task,
        "status = ?, started_at_ms = ?",
        vec![
            Bindable::Text(TaskStatus::InProgress.as_str().to_string()),
            Bindable::Int(db::to_ms(now)),
        ],
    )
    .await?;

    append_event(
        conn,
        task.id,
        TaskEventType::Started,
        serde_json::json!({}),
        now,
    )
    .await?;

    get_tx(conn, task_id).await
}

/// in_progress → completed, carrying the evaluation result. Appends
/// `submitted` then `evaluated` so the log captures both phases.
pub async fn record_evaluation(
    pool: &SqlitePool,
    task_id: Uuid,
    score: f64,
    signals: EvaluationSignals,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    let mut tx = pool.begin().await?;
    let task = record_evaluation_tx(&mut *tx, task_id, score, signals, now).await?;
    tx.commit().await?;
    Ok(task)
}

pub async fn record_evaluation_tx(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    score: f64,
    signals: EvaluationSignals,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    if !(0.0..=1.0).contains(&score) {
        return Err(CoreError::validation(format!("score {score} outside 0..=1")));
    }

    let task = get_tx(conn, task_id).await?;
    if task.status != TaskStatus::InProgress {
        return Err(invalid_transition(&task, "record_evaluation"));
    }

    guarded_update(
        conn,
        &task,
        "status = ?, score = ?, completed_at_ms = ?",
        vec![
            Bindable::Text(TaskStatus::Completed.as_str().to_string()),
            Bindable::Float(score),
            Bindable::Int(db::to_ms(now)),
        ],
    )
    .await?;

    append_event(
        conn,
        task.id,
        TaskEventType::Submitted,
        serde_json::json!({
            "tests_passed": signals.tests_passed,
            "tests_total": signals.tests_total,
            "runtime_ms": signals.runtime_ms,
        }),
        now,
    )
    .await?;
    append_event(
        conn,
        task.id,
        TaskEventType::Evaluated,
        serde_json::to_value(&signals)?,
        now,
    )
    .await?;

    get_tx(conn, task_id).await
}

/// scheduled | in_progress → skipped (user-initiated).
pub async fn skip(pool: &SqlitePool, task_id: Uuid, now: DateTime<Utc>) -> CoreResult<StudyTask> {
    let mut tx = pool.begin().await?;

    let task = get_tx(&mut *tx, task_id).await?;
    if task.status.is_terminal() {
        return Err(invalid_transition(&task, "skip"));
    }

    guarded_update(
        &mut *tx,
        &task,
        "status = ?",
        vec![Bindable::Text(TaskStatus::Skipped.as_str().to_string())],
    )
    .await?;

    append_event(
        &mut *tx,
        task.id,
        TaskEventType::StatusChanged,
        serde_json::to_value(StatusChange {
            from: task.status,
            to: TaskStatus::Skipped,
            reason: "user_skip".to_string(),
        })?,
        now,
    )
    .await?;

    let task = get_tx(&mut *tx, task_id).await?;
    tx.commit().await?;
    Ok(task)
}

/// scheduled → expired once the grace window has elapsed and the task
/// never started. Idempotent: expiring an expired task is a no-op and
/// appends nothing.
pub async fn expire(
    pool: &SqlitePool,
    task_id: Uuid,
    grace: chrono::Duration,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    let mut tx = pool.begin().await?;
    let task = expire_tx(&mut *tx, task_id, grace, now).await?;
    tx.commit().await?;
    Ok(task)
}

pub async fn expire_tx(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    grace: chrono::Duration,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    let task = get_tx(conn, task_id).await?;

    if task.status == TaskStatus::Expired {
        return Ok(task);
    }
    if task.status != TaskStatus::Scheduled || task.started_at.is_some() {
        return Err(invalid_transition(&task, "expire"));
    }
    if now <= task.scheduled_at + grace {
        return Err(CoreError::validation(format!(
            "task {} is within its expiry grace window",
            task.id
        )));
    }

    guarded_update(
        conn,
        &task,
        "status = ?",
        vec![Bindable::Text(TaskStatus::Expired.as_str().to_string())],
    )
    .await?;

    append_event(
        conn,
        task.id,
        TaskEventType::StatusChanged,
        serde_json::to_value(StatusChange {
            from: task.status,
            to: TaskStatus::Expired,
            reason: "expiry_sweep".to_string(),
        })?,
        now,
    )
    .await?;

    get_tx(conn, task_id).await
}

/// Increments the hint counter; no status change.
pub async fn record_hint(
    pool: &SqlitePool,
    task_id: Uuid,
    now: DateTime<Utc>,
) -> CoreResult<StudyTask> {
    let mut tx = pool.begin().await?;

    let task = get_tx(&mut *tx, task_id).await?;
    if task.status.is_terminal() {
        return Err(invalid_transition(&task, "record_hint"));
    }

    guarded_update(
        &mut *tx,
        &task,
        "hints_used = hints_used + 1",
        Vec::new(),
    )
    .await?;

    append_event(
        &mut *tx,
        task.id,
        TaskEventType::HintRequested,
        serde_json::json!({ "hints_used": task.hints_used + 1 }),
        now,
    )
    .await?;

    let task = get_tx(&mut *tx, task_id).await?;
    tx.commit().await?;
    Ok(task)
}

/// Records one tutor exchange in the audit log; no status change.
pub async fn record_tutor_exchange(
    pool: &SqlitePool,
    task_id: Uuid,
    role: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let mut tx = pool.begin().await?;

    let task = get_tx(&mut *tx, task_id).await?;
    if task.status.is_terminal() {
        return Err(invalid_transition(&task, "record_tutor_exchange"));
    }

    append_event(
        &mut *tx,
        task.id,
        TaskEventType::TutorInteraction,
        serde_json::json!({ "role": role }),
        now,
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Creates scheduled tasks for a selection round, skipping problems
/// that already have an open task in the path. Review items missing
/// from the catalog fall back to their review-queue snapshot.
pub async fn schedule_selection(
    conn: &mut SqliteConnection,
    path: &StudyPath,
    selection: &[NextItem],
    catalog: &[ProblemMetadata],
    now: DateTime<Utc>,
) -> CoreResult<Vec<StudyTask>> {
    let by_id: HashMap<&str, &ProblemMetadata> = catalog
        .iter()
        .map(|meta| (meta.problem_id.as_str(), meta))
        .collect();
    let open = open_problem_ids(conn, path.id).await?;

    let mut created = Vec::new();
    for item in selection {
        if open.contains(&item.problem_id) {
            continue;
        }

        let source = match item.reason {
            SelectionReason::Review => TaskSource::ReviewInjection,
            SelectionReason::Recommended => TaskSource::Generated,
        };

        let input = if let Some(meta) = by_id.get(item.problem_id.as_str()) {
            NewTask {
                problem_id: meta.problem_id.clone(),
                module: meta.subject.as_str().to_string(),
                topic_tags: meta.topics.clone(),
                difficulty: meta.difficulty.clamp(1, 5),
                scheduled_at: now,
                metadata: TaskMetadata::from_source(source),
            }
        } else if item.reason == SelectionReason::Review {
            let row = sqlx::query(
                "SELECT subject, difficulty FROM review_items \
                 WHERE learner_id = ? AND problem_id = ?",
            )
            .bind(&path.learner_id)
            .bind(&item.problem_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| CoreError::not_found("review_item", item.problem_id.clone()))?;

            let subject_raw: String = row.try_get("subject").unwrap_or_default();
            let module = crate::subjects::Subject::parse(&subject_raw)
                .map(|s| s.profile().review_module)
                .unwrap_or("review");

            NewTask {
                problem_id: item.problem_id.clone(),
                module: module.to_string(),
                topic_tags: Vec::new(),
                difficulty: row.try_get::<i64, _>("difficulty").unwrap_or(1).clamp(1, 5),
                scheduled_at: now,
                metadata: TaskMetadata::from_source(TaskSource::ReviewInjection),
            }
        } else {
            return Err(CoreError::CollaboratorUnavailable(
                "candidate metadata missing from catalog",
            ));
        };

        created.push(create(conn, path, input, now).await?);
    }

    Ok(created)
}

pub async fn get(pool: &SqlitePool, task_id: Uuid) -> CoreResult<StudyTask> {
    let row = sqlx::query(TASK_SELECT)
        .bind(task_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| CoreError::not_found("study_task", task_id.to_string()))?;
    map_task_row(&row)
}

pub async fn get_tx(conn: &mut SqliteConnection, task_id: Uuid) -> CoreResult<StudyTask> {
    let row = sqlx::query(TASK_SELECT)
        .bind(task_id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| CoreError::not_found("study_task", task_id.to_string()))?;
    map_task_row(&row)
}

/// Ordered event timeline for one task, for audit and recovery.
pub async fn events(pool: &SqlitePool, task_id: Uuid) -> CoreResult<Vec<TaskEvent>> {
    let rows = sqlx::query(
        "SELECT id, task_id, event_type, payload, created_at_ms \
         FROM task_events WHERE task_id = ? ORDER BY id ASC",
    )
    .bind(task_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_event_row).collect()
}

/// Earliest scheduled task across the learner's paths.
pub async fn next_scheduled(pool: &SqlitePool, learner_id: &str) -> CoreResult<Option<StudyTask>> {
    let row = sqlx::query(
        "SELECT t.id, t.path_id, t.problem_id, t.module, t.topic_tags, t.difficulty, \
                t.scheduled_at_ms, t.started_at_ms, t.completed_at_ms, t.status, t.score, \
                t.hints_used, t.metadata, t.version, t.created_at_ms \
         FROM study_tasks t JOIN study_paths p ON p.id = t.path_id \
         WHERE p.learner_id = ? AND t.status = 'scheduled' \
         ORDER BY t.scheduled_at_ms ASC LIMIT 1",
    )
    .bind(learner_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_task_row).transpose()
}

pub async fn list_for_learner(
    pool: &SqlitePool,
    learner_id: &str,
    module: Option<&str>,
    status: Option<TaskStatus>,
    limit: usize,
) -> CoreResult<Vec<StudyTask>> {
    let mut sql = String::from(
        "SELECT t.id, t.path_id, t.problem_id, t.module, t.topic_tags, t.difficulty, \
                t.scheduled_at_ms, t.started_at_ms, t.completed_at_ms, t.status, t.score, \
                t.hints_used, t.metadata, t.version, t.created_at_ms \
         FROM study_tasks t JOIN study_paths p ON p.id = t.path_id \
         WHERE p.learner_id = ?",
    );
    if module.is_some() {
        sql.push_str(" AND t.module = ?");
    }
    if status.is_some() {
        sql.push_str(" AND t.status = ?");
    }
    sql.push_str(" ORDER BY t.scheduled_at_ms DESC LIMIT ?");

    let mut query = sqlx::query(&sql).bind(learner_id);
    if let Some(module) = module {
        query = query.bind(module);
    }
    if let Some(status) = status {
        query = query.bind(status.as_str());
    }
    query = query.bind(limit as i64);

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(map_task_row).collect()
}

/// Derived view of a task reconstructed purely from its event log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedTask {
    pub status: TaskStatus,
    pub score: Option<f64>,
    pub hints_used: i64,
}

/// Folds the ordered event sequence into the task's derived state.
pub fn replay(events: &[TaskEvent]) -> CoreResult<ReplayedTask> {
    let mut state = ReplayedTask {
        status: TaskStatus::Scheduled,
        score: None,
        hints_used: 0,
    };

    for event in events {
        match event.event_type {
            TaskEventType::Created => {}
            TaskEventType::Started => state.status = TaskStatus::InProgress,
            TaskEventType::Submitted | TaskEventType::TutorInteraction => {}
            TaskEventType::Evaluated => {
                let signals: EvaluationSignals = serde_json::from_value(event.payload.clone())?;
                state.status = TaskStatus::Completed;
                state.score = Some(signals.score);
            }
            TaskEventType::HintRequested => state.hints_used += 1,
            TaskEventType::StatusChanged => {
                let change: StatusChange = serde_json::from_value(event.payload.clone())?;
                state.status = change.to;
            }
        }
    }

    Ok(state)
}

/// Whether the event sequence is a legal walk of the state machine.
pub fn validate_event_path(events: &[TaskEvent]) -> bool {
    let mut status: Option<TaskStatus> = None;

    for (idx, event) in events.iter().enumerate() {
        match event.event_type {
            TaskEventType::Created => {
                if idx != 0 {
                    return false;
                }
                status = Some(TaskStatus::Scheduled);
            }
            TaskEventType::Started => {
                if status != Some(TaskStatus::Scheduled) {
                    return false;
                }
                status = Some(TaskStatus::InProgress);
            }
            TaskEventType::Submitted => {
                if status != Some(TaskStatus::InProgress) {
                    return false;
                }
            }
            TaskEventType::Evaluated => {
                if status != Some(TaskStatus::InProgress) {
                    return false;
                }
                status = Some(TaskStatus::Completed);
            }
            TaskEventType::HintRequested | TaskEventType::TutorInteraction => {
                if !matches!(
                    status,
                    Some(TaskStatus::Scheduled) | Some(TaskStatus::InProgress)
                ) {
                    return false;
                }
            }
            TaskEventType::StatusChanged => {
                let Ok(change) = serde_json::from_value::<StatusChange>(event.payload.clone())
                else {
                    return false;
                };
                if status != Some(change.from) {
                    return false;
                }
                let legal = match change.to {
                    TaskStatus::Skipped => !change.from.is_terminal(),
                    TaskStatus::Expired => change.from == TaskStatus::Scheduled,
                    _ => false,
                };
                if !legal {
                    return false;
                }
                status = Some(change.to);
            }
        }
    }

    true
}

async fn open_problem_ids(
    conn: &mut SqliteConnection,
    path_id: Uuid,
) -> CoreResult<HashSet<String>> {
    let rows = sqlx::query(
        "SELECT problem_id FROM study_tasks \
         WHERE path_id = ? AND status IN ('scheduled', 'in_progress')",
    )
    .bind(path_id.to_string())
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.try_get::<String, _>("problem_id").ok())
        .collect())
}

enum Bindable {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Version-guarded task update; zero affected rows means a concurrent
/// writer won and the caller must retry.
async fn guarded_update(
    conn: &mut SqliteConnection,
    task: &StudyTask,
    set_clause: &str,
    values: Vec<Bindable>,
) -> CoreResult<()> {
    let sql = format!(
        "UPDATE study_tasks SET {set_clause}, version = version + 1 \
         WHERE id = ? AND version = ?"
    );
    let mut query = sqlx::query(&sql);
    for value in values {
        query = match value {
            Bindable::Text(v) => query.bind(v),
            Bindable::Int(v) => query.bind(v),
            Bindable::Float(v) => query.bind(v),
        };
    }
    let result = query
        .bind(task.id.to_string())
        .bind(task.version)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::ConcurrencyConflict {
            kind: "study_task",
            id: task.id.to_string(),
        });
    }
    Ok(())
}

async fn append_event(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    event_type: TaskEventType,
    payload: serde_json::Value,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO task_events (task_id, event_type, payload, created_at_ms) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(event_type.as_str())
    .bind(payload.to_string())
    .bind(db::to_ms(now))
    .execute(conn)
    .await?;
    Ok(())
}

fn invalid_transition(task: &StudyTask, action: &'static str) -> CoreError {
    tracing::error!(
        task_id = %task.id,
        status = task.status.as_str(),
        action,
        "invalid task transition"
    );
    CoreError::InvalidTransition {
        task_id: task.id.to_string(),
        status: task.status.as_str().to_string(),
        action,
    }
}

const TASK_SELECT: &str = "SELECT id, path_id, problem_id, module, topic_tags, difficulty, \
         scheduled_at_ms, started_at_ms, completed_at_ms, status, score, hints_used, \
         metadata, version, created_at_ms \
         FROM study_tasks WHERE id = ?";

fn map_task_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<StudyTask> {
    let id_raw: String = row.try_get("id").unwrap_or_default();
    let path_raw: String = row.try_get("path_id").unwrap_or_default();
    let status_raw: String = row.try_get("status").unwrap_or_default();
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| CoreError::validation(format!("unknown task status '{status_raw}'")))?;

    let tags_raw: String = row.try_get("topic_tags").unwrap_or_else(|_| "[]".to_string());
    let metadata_raw: String = row.try_get("metadata").unwrap_or_else(|_| "{}".to_string());

    Ok(StudyTask {
        id: Uuid::parse_str(&id_raw)
            .map_err(|_| CoreError::validation(format!("malformed task id '{id_raw}'")))?,
        path_id: Uuid::parse_str(&path_raw)
            .map_err(|_| CoreError::validation(format!("malformed path id '{path_raw}'")))?,
        problem_id: row.try_get("problem_id").unwrap_or_default(),
        module: row.try_get("module").unwrap_or_default(),
        topic_tags: serde_json::from_str(&tags_raw)?,
        difficulty: row.try_get("difficulty").unwrap_or(1),
        scheduled_at: db::from_ms(row.try_get("scheduled_at_ms").unwrap_or(0)),
        started_at: db::opt_from_ms(row.try_get("started_at_ms").ok().flatten()),
        completed_at: db::opt_from_ms(row.try_get("completed_at_ms").ok().flatten()),
        status,
        score: row.try_get("score").ok().flatten(),
        hints_used: row.try_get("hints_used").unwrap_or(0),
        metadata: serde_json::from_str(&metadata_raw)?,
        version: row.try_get("version").unwrap_or(0),
        created_at: db::from_ms(row.try_get("created_at_ms").unwrap_or(0)),
    })
}

fn map_event_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<TaskEvent> {
    let task_raw: String = row.try_get("task_id").unwrap_or_default();
    let type_raw: String = row.try_get("event_type").unwrap_or_default();
    let event_type = TaskEventType::parse(&type_raw)
        .ok_or_else(|| CoreError::validation(format!("unknown event type '{type_raw}'")))?;
    let payload_raw: String = row.try_get("payload").unwrap_or_else(|_| "{}".to_string());

    Ok(TaskEvent {
        id: row.try_get("id").unwrap_or(0),
        task_id: Uuid::parse_str(&task_raw)
            .map_err(|_| CoreError::validation(format!("malformed task id '{task_raw}'")))?,
        event_type,
        payload: serde_json::from_str(&payload_raw)?,
        created_at: db::from_ms(row.try_get("created_at_ms").unwrap_or(0)),
    })
}
