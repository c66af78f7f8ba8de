//! Study paths: per-learner containers grouping scheduled tasks for
//! one track.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    Curriculum,
    FreePractice,
}

impl PathMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Curriculum => "curriculum",
            Self::FreePractice => "free_practice",
        }
    }
}

/// Typed path configuration. `extra` is reserved for unstructured
/// provenance data only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub mode: PathMode,
    #[serde(default)]
    pub daily_task_target: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            mode: PathMode::Curriculum,
            daily_task_target: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyPath {
    pub id: Uuid,
    pub learner_id: String,
    pub track_id: String,
    pub config: PathConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn create(
    conn: &mut SqliteConnection,
    learner_id: &str,
    track_id: &str,
    config: PathConfig,
    now: DateTime<Utc>,
) -> CoreResult<StudyPath> {
    if learner_id.trim().is_empty() || track_id.trim().is_empty() {
        return Err(CoreError::validation("learner_id and track_id are required"));
    }

    let path = StudyPath {
        id: Uuid::new_v4(),
        learner_id: learner_id.to_string(),
        track_id: track_id.to_string(),
        config,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO study_paths (id, learner_id, track_id, config, created_at_ms, updated_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(path.id.to_string())
    .bind(&path.learner_id)
    .bind(&path.track_id)
    .bind(serde_json::to_string(&path.config)?)
    .bind(db::to_ms(now))
    .bind(db::to_ms(now))
    .execute(conn)
    .await?;

    Ok(path)
}

pub async fn get(pool: &SqlitePool, path_id: Uuid) -> CoreResult<StudyPath> {
    let row = sqlx::query(
        "SELECT id, learner_id, track_id, config, created_at_ms, updated_at_ms \
         FROM study_paths WHERE id = ?",
    )
    .bind(path_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| CoreError::not_found("study_path", path_id.to_string()))?;

    map_row(&row)
}

pub(crate) async fn get_in_tx(conn: &mut SqliteConnection, path_id: Uuid) -> CoreResult<StudyPath> {
    let row = sqlx::query(
        "SELECT id, learner_id, track_id, config, created_at_ms, updated_at_ms \
         FROM study_paths WHERE id = ?",
    )
    .bind(path_id.to_string())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| CoreError::not_found("study_path", path_id.to_string()))?;

    map_row(&row)
}

pub async fn list_for_learner(pool: &SqlitePool, learner_id: &str) -> CoreResult<Vec<StudyPath>> {
    let rows = sqlx::query(
        "SELECT id, learner_id, track_id, config, created_at_ms, updated_at_ms \
         FROM study_paths WHERE learner_id = ? ORDER BY created_at_ms DESC",
    )
    .bind(learner_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_row).collect()
}

/// All free-practice paths, for the review-injection sweep.
pub async fn list_free_practice(pool: &SqlitePool) -> CoreResult<Vec<StudyPath>> {
    let rows = sqlx::query(
        "SELECT id, learner_id, track_id, config, created_at_ms, updated_at_ms \
         FROM study_paths ORDER BY created_at_ms ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut out = Vec::new();
    for row in &rows {
        let path = map_row(row)?;
        if path.config.mode == PathMode::FreePractice {
            out.push(path);
        }
    }
    Ok(out)
}

fn map_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<StudyPath> {
    let id_raw: String = row.try_get("id").unwrap_or_default();
    let id = Uuid::parse_str(&id_raw)
        .map_err(|_| CoreError::validation(format!("malformed path id '{id_raw}'")))?;
    let config_raw: String = row.try_get("config").unwrap_or_else(|_| "{}".to_string());
    let config: PathConfig = serde_json::from_str(&config_raw)?;

    Ok(StudyPath {
        id,
        learner_id: row.try_get("learner_id").unwrap_or_default(),
        track_id: row.try_get("track_id").unwrap_or_default(),
        config,
        created_at: db::from_ms(row.try_get("created_at_ms").unwrap_or(0)),
        updated_at: db::from_ms(row.try_get("updated_at_ms").unwrap_or(0)),
    })
}
