//! Mastery tracking: one EMA-smoothed proficiency score per
//! (learner, topic-or-outcome key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::config::CoreConfig;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::subjects::Subject;
use crate::types::SubmissionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Topic,
    Outcome,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Outcome => "outcome",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "topic" => Some(Self::Topic),
            "outcome" => Some(Self::Outcome),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryRecord {
    pub learner_id: String,
    pub key_type: KeyType,
    pub key_id: String,
    pub score: f64,
    pub ema: f64,
    pub updated_at: DateTime<Utc>,
}

impl MasteryRecord {
    /// Absent records read as zero-valued. Callers must treat this as
    /// "unknown", not necessarily "weak".
    pub fn absent(learner_id: &str, key_type: KeyType, key_id: &str) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            key_type,
            key_id: key_id.to_string(),
            score: 0.0,
            ema: 0.0,
            updated_at: db::from_ms(0),
        }
    }
}

/// Per-attempt evidence feeding one mastery update.
#[derive(Debug, Clone, Copy)]
pub struct AttemptSignal {
    pub subject: Subject,
    pub status: SubmissionStatus,
    /// Highest hint tier consumed, 0..=3.
    pub hint_level: u8,
    /// actual_time / target_time, > 0.
    pub time_ratio: f64,
}

/// Maps one attempt onto a [0, 100] credit signal. Full credit is a
/// first-try pass within target time; hints and overrun scale a pass
/// down per the subject profile; anything else earns near-zero credit.
pub fn attempt_signal(signal: AttemptSignal) -> CoreResult<f64> {
    if signal.hint_level > 3 {
        return Err(CoreError::validation(format!(
            "hint_level {} outside 0..=3",
            signal.hint_level
        )));
    }
    if !signal.time_ratio.is_finite() || signal.time_ratio <= 0.0 {
        return Err(CoreError::validation("time_ratio must be positive"));
    }

    let profile = signal.subject.profile();
    let value = match signal.status {
        SubmissionStatus::Passed => {
            let hint_factor = 1.0 - profile.hint_penalty_per_level * f64::from(signal.hint_level);
            let time_factor = if signal.time_ratio <= profile.time_overrun_grace {
                1.0
            } else {
                (profile.time_overrun_grace / signal.time_ratio).max(0.4)
            };
            100.0 * hint_factor.max(0.0) * time_factor
        }
        SubmissionStatus::Failed => 10.0,
        SubmissionStatus::Timeout => 5.0,
        SubmissionStatus::Error => 0.0,
    };

    Ok(value.clamp(0.0, 100.0))
}

pub fn fold_ema(ema: f64, signal: f64, alpha: f64) -> f64 {
    alpha * signal + (1.0 - alpha) * ema
}

/// Upserts the record for one key inside the caller's transaction.
pub async fn update(
    conn: &mut SqliteConnection,
    config: &CoreConfig,
    learner_id: &str,
    key_type: KeyType,
    key_id: &str,
    signal: AttemptSignal,
    now: DateTime<Utc>,
) -> CoreResult<MasteryRecord> {
    if key_id.trim().is_empty() {
        return Err(CoreError::validation("empty mastery key"));
    }
    let credit = attempt_signal(signal)?;

    let current: Option<f64> = sqlx::query(
        "SELECT ema FROM mastery_records \
         WHERE learner_id = ? AND key_type = ? AND key_id = ?",
    )
    .bind(learner_id)
    .bind(key_type.as_str())
    .bind(key_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| row.try_get::<f64, _>("ema").unwrap_or(0.0));

    // First signal for a key starts from the neutral default, so an
    // opening failure lands below neutral and an opening pass above it.
    let ema = fold_ema(
        current.unwrap_or(config.unknown_mastery_neutral),
        credit,
        config.ema_alpha,
    );
    let score = ema.clamp(0.0, 100.0);

    sqlx::query(
        "INSERT INTO mastery_records (learner_id, key_type, key_id, score, ema, updated_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (learner_id, key_type, key_id) \
         DO UPDATE SET score = excluded.score, ema = excluded.ema, \
                       updated_at_ms = excluded.updated_at_ms",
    )
    .bind(learner_id)
    .bind(key_type.as_str())
    .bind(key_id)
    .bind(score)
    .bind(ema)
    .bind(db::to_ms(now))
    .execute(&mut *conn)
    .await?;

    Ok(MasteryRecord {
        learner_id: learner_id.to_string(),
        key_type,
        key_id: key_id.to_string(),
        score,
        ema,
        updated_at: now,
    })
}

pub async fn get(
    pool: &SqlitePool,
    learner_id: &str,
    key_type: KeyType,
    key_id: &str,
) -> CoreResult<MasteryRecord> {
    let row = sqlx::query(
        "SELECT score, ema, updated_at_ms FROM mastery_records \
         WHERE learner_id = ? AND key_type = ? AND key_id = ?",
    )
    .bind(learner_id)
    .bind(key_type.as_str())
    .bind(key_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(MasteryRecord::absent(learner_id, key_type, key_id));
    };

    Ok(MasteryRecord {
        learner_id: learner_id.to_string(),
        key_type,
        key_id: key_id.to_string(),
        score: row.try_get::<f64, _>("score").unwrap_or(0.0),
        ema: row.try_get::<f64, _>("ema").unwrap_or(0.0),
        updated_at: db::from_ms(row.try_get::<i64, _>("updated_at_ms").unwrap_or(0)),
    })
}

/// Batch read of topic scores for the recommender. Keys without a
/// record are absent from the map.
pub async fn get_topic_scores(
    pool: &SqlitePool,
    learner_id: &str,
    key_ids: &[String],
) -> CoreResult<std::collections::HashMap<String, f64>> {
    let mut out = std::collections::HashMap::new();
    if key_ids.is_empty() {
        return Ok(out);
    }

    let placeholders = vec!["?"; key_ids.len()].join(", ");
    let sql = format!(
        "SELECT key_id, score FROM mastery_records \
         WHERE learner_id = ? AND key_type = 'topic' AND key_id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql).bind(learner_id);
    for key in key_ids {
        query = query.bind(key);
    }

    for row in query.fetch_all(pool).await? {
        let key: String = row.try_get("key_id").unwrap_or_default();
        let score: f64 = row.try_get("score").unwrap_or(0.0);
        out.insert(key, score);
    }
    Ok(out)
}
