//! Spaced-repetition review scheduler.
//!
//! One `ReviewItem` per (learner, problem), moving through buckets 0..=7.
//! Bucket 7 is graduated and terminal; a graduated item is never due.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::config::CoreConfig;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::services::paths::{PathMode, StudyPath};
use crate::subjects::Subject;

pub const GRADUATED_BUCKET: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub learner_id: String,
    pub problem_id: String,
    pub subject: Subject,
    pub bucket: i64,
    /// None iff the item has graduated.
    pub due_at: Option<DateTime<Utc>>,
    pub difficulty: i64,
    pub review_count: i64,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub last_injected_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    pub fn is_graduated(&self) -> bool {
        self.bucket >= GRADUATED_BUCKET
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewStats {
    pub total: i64,
    pub due: i64,
    pub by_bucket: [i64; 8],
    pub graduated: i64,
}

/// Target state produced by one pass/fail transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub bucket: i64,
    /// Days until the item resurfaces; None when graduated.
    pub due_in_days: Option<i64>,
}

/// The bucket state machine. `None` in means no item exists yet; `None`
/// out means no item should be created. A failure anywhere resets to
/// bucket 0 (full demotion, not decrement); graduation is terminal.
pub fn next_state(config: &CoreConfig, current: Option<i64>, passed: bool) -> Option<BucketState> {
    match (current, passed) {
        (Some(bucket), _) if bucket >= config.graduation_bucket => Some(BucketState {
            bucket: config.graduation_bucket,
            due_in_days: None,
        }),
        (None, true) => None,
        (None, false) => Some(BucketState {
            bucket: 0,
            due_in_days: Some(0),
        }),
        (Some(bucket), true) => {
            let next = (bucket + 1).min(config.graduation_bucket);
            if next >= config.graduation_bucket {
                Some(BucketState {
                    bucket: config.graduation_bucket,
                    due_in_days: None,
                })
            } else {
                Some(BucketState {
                    bucket: next,
                    due_in_days: Some(config.interval_days(next)),
                })
            }
        }
        (Some(_), false) => Some(BucketState {
            bucket: 0,
            due_in_days: Some(0),
        }),
    }
}

/// Applies one evaluated outcome to the (learner, problem) item inside
/// the caller's transaction. Returns the resulting item, or None when
/// a pass on an untracked problem leaves the queue untouched.
pub async fn apply_outcome(
    conn: &mut SqliteConnection,
    config: &CoreConfig,
    learner_id: &str,
    problem_id: &str,
    subject: Subject,
    difficulty: i64,
    passed: bool,
    now: DateTime<Utc>,
) -> CoreResult<Option<ReviewItem>> {
    let existing = sqlx::query(
        "SELECT bucket, review_count, version FROM review_items \
         WHERE learner_id = ? AND problem_id = ?",
    )
    .bind(learner_id)
    .bind(problem_id)
    .fetch_optional(&mut *conn)
    .await?;

    let current = existing
        .as_ref()
        .map(|row| row.try_get::<i64, _>("bucket").unwrap_or(0));

    // Graduated items are terminal.
    if current.is_some_and(|b| b >= config.graduation_bucket) {
        return fetch_item(conn, learner_id, problem_id).await;
    }

    let Some(target) = next_state(config, current, passed) else {
        return Ok(None);
    };
    let due_at_ms = target
        .due_in_days
        .map(|days| db::to_ms(now + Duration::days(days)));

    match existing {
        Some(row) => {
            let version: i64 = row.try_get("version").unwrap_or(0);
            let updated = sqlx::query(
                "UPDATE review_items \
                 SET bucket = ?, due_at_ms = ?, review_count = review_count + 1, \
                     last_reviewed_at_ms = ?, updated_at_ms = ?, version = version + 1 \
                 WHERE learner_id = ? AND problem_id = ? AND version = ?",
            )
            .bind(target.bucket)
            .bind(due_at_ms)
            .bind(db::to_ms(now))
            .bind(db::to_ms(now))
            .bind(learner_id)
            .bind(problem_id)
            .bind(version)
            .execute(&mut *conn)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(CoreError::ConcurrencyConflict {
                    kind: "review_item",
                    id: format!("{learner_id}/{problem_id}"),
                });
            }
        }
        None => {
            sqlx::query(
                "INSERT INTO review_items \
                 (learner_id, problem_id, subject, bucket, due_at_ms, difficulty, \
                  review_count, last_reviewed_at_ms, version, created_at_ms, updated_at_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, 1, ?, 0, ?, ?)",
            )
            .bind(learner_id)
            .bind(problem_id)
            .bind(subject.as_str())
            .bind(target.bucket)
            .bind(due_at_ms)
            .bind(difficulty.clamp(1, 5))
            .bind(db::to_ms(now))
            .bind(db::to_ms(now))
            .bind(db::to_ms(now))
            .execute(&mut *conn)
            .await?;
        }
    }

    fetch_item(conn, learner_id, problem_id).await
}

/// Explicitly seeds an item at bucket 0, due immediately. A no-op when
/// the item already exists.
pub async fn seed(
    conn: &mut SqliteConnection,
    learner_id: &str,
    problem_id: &str,
    subject: Subject,
    difficulty: i64,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO review_items \
         (learner_id, problem_id, subject, bucket, due_at_ms, difficulty, \
          review_count, version, created_at_ms, updated_at_ms) \
         VALUES (?, ?, ?, 0, ?, ?, 0, 0, ?, ?) \
         ON CONFLICT (learner_id, problem_id) DO NOTHING",
    )
    .bind(learner_id)
    .bind(problem_id)
    .bind(subject.as_str())
    .bind(db::to_ms(now))
    .bind(difficulty.clamp(1, 5))
    .bind(db::to_ms(now))
    .bind(db::to_ms(now))
    .execute(conn)
    .await?;
    Ok(())
}

/// Due items ordered by (bucket ASC, due_at ASC): fragile knowledge
/// ahead of strict recency.
pub async fn get_due(
    pool: &SqlitePool,
    learner_id: &str,
    subject: Option<Subject>,
    limit: usize,
    now: DateTime<Utc>,
) -> CoreResult<Vec<ReviewItem>> {
    let mut sql = String::from(
        "SELECT learner_id, problem_id, subject, bucket, due_at_ms, difficulty, \
                review_count, last_reviewed_at_ms, last_injected_at_ms \
         FROM review_items \
         WHERE learner_id = ? AND bucket < ? AND due_at_ms IS NOT NULL AND due_at_ms <= ?",
    );
    if subject.is_some() {
        sql.push_str(" AND subject = ?");
    }
    sql.push_str(" ORDER BY bucket ASC, due_at_ms ASC LIMIT ?");

    let mut query = sqlx::query(&sql)
        .bind(learner_id)
        .bind(GRADUATED_BUCKET)
        .bind(db::to_ms(now));
    if let Some(subject) = subject {
        query = query.bind(subject.as_str());
    }
    query = query.bind(limit as i64);

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(map_row).collect()
}

/// Marks up to `max_items` due items as injected into a free-practice
/// path and returns their problem ids. Fixed curricular paths never
/// receive injections.
pub async fn inject(
    conn: &mut SqliteConnection,
    path: &StudyPath,
    max_items: usize,
    now: DateTime<Utc>,
) -> CoreResult<Vec<String>> {
    if path.config.mode != PathMode::FreePractice {
        return Err(CoreError::validation(format!(
            "review injection requires a free-practice path, got {} for path {}",
            path.config.mode.as_str(),
            path.id
        )));
    }

    let rows = sqlx::query(
        "SELECT problem_id FROM review_items \
         WHERE learner_id = ? AND bucket < ? AND due_at_ms IS NOT NULL AND due_at_ms <= ? \
         ORDER BY bucket ASC, due_at_ms ASC LIMIT ?",
    )
    .bind(&path.learner_id)
    .bind(GRADUATED_BUCKET)
    .bind(db::to_ms(now))
    .bind(max_items as i64)
    .fetch_all(&mut *conn)
    .await?;

    let mut injected = Vec::with_capacity(rows.len());
    for row in rows {
        let problem_id: String = row.try_get("problem_id").unwrap_or_default();
        sqlx::query(
            "UPDATE review_items SET last_injected_at_ms = ?, updated_at_ms = ? \
             WHERE learner_id = ? AND problem_id = ?",
        )
        .bind(db::to_ms(now))
        .bind(db::to_ms(now))
        .bind(&path.learner_id)
        .bind(&problem_id)
        .execute(&mut *conn)
        .await?;
        injected.push(problem_id);
    }

    Ok(injected)
}

pub async fn get_item(
    pool: &SqlitePool,
    learner_id: &str,
    problem_id: &str,
) -> CoreResult<Option<ReviewItem>> {
    let row = sqlx::query(
        "SELECT learner_id, problem_id, subject, bucket, due_at_ms, difficulty, \
                review_count, last_reviewed_at_ms, last_injected_at_ms \
         FROM review_items WHERE learner_id = ? AND problem_id = ?",
    )
    .bind(learner_id)
    .bind(problem_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_row).transpose()
}

pub async fn stats(pool: &SqlitePool, learner_id: &str, now: DateTime<Utc>) -> CoreResult<ReviewStats> {
    let rows = sqlx::query(
        "SELECT bucket, COUNT(*) AS count, \
                SUM(CASE WHEN due_at_ms IS NOT NULL AND due_at_ms <= ? THEN 1 ELSE 0 END) AS due \
         FROM review_items WHERE learner_id = ? GROUP BY bucket",
    )
    .bind(db::to_ms(now))
    .bind(learner_id)
    .fetch_all(pool)
    .await?;

    let mut stats = ReviewStats {
        total: 0,
        due: 0,
        by_bucket: [0; 8],
        graduated: 0,
    };
    for row in rows {
        let bucket: i64 = row.try_get("bucket").unwrap_or(0);
        let count: i64 = row.try_get("count").unwrap_or(0);
        let due: i64 = row.try_get("due").unwrap_or(0);
        stats.total += count;
        if (0..=GRADUATED_BUCKET).contains(&bucket) {
            stats.by_bucket[bucket as usize] += count;
        }
        if bucket >= GRADUATED_BUCKET {
            stats.graduated += count;
        } else {
            stats.due += due;
        }
    }
    Ok(stats)
}

/// Removes graduated items untouched for longer than the retention
/// window. Storage bounding only; never affects live scheduling.
pub async fn prune_graduated(
    conn: &mut SqliteConnection,
    config: &CoreConfig,
    now: DateTime<Utc>,
) -> CoreResult<u64> {
    let cutoff = db::to_ms(now - config.graduated_retention);
    let result = sqlx::query(
        "DELETE FROM review_items \
         WHERE bucket >= ? AND last_reviewed_at_ms IS NOT NULL AND last_reviewed_at_ms < ?",
    )
    .bind(GRADUATED_BUCKET)
    .bind(cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

async fn fetch_item(
    conn: &mut SqliteConnection,
    learner_id: &str,
    problem_id: &str,
) -> CoreResult<Option<ReviewItem>> {
    let row = sqlx::query(
        "SELECT learner_id, problem_id, subject, bucket, due_at_ms, difficulty, \
                review_count, last_reviewed_at_ms, last_injected_at_ms \
         FROM review_items WHERE learner_id = ? AND problem_id = ?",
    )
    .bind(learner_id)
    .bind(problem_id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(map_row).transpose()
}

fn map_row(row: &sqlx::sqlite::SqliteRow) -> CoreResult<ReviewItem> {
    let subject_raw: String = row.try_get("subject").unwrap_or_default();
    let subject = Subject::parse(&subject_raw)
        .ok_or_else(|| CoreError::validation(format!("unknown subject '{subject_raw}'")))?;

    Ok(ReviewItem {
        learner_id: row.try_get("learner_id").unwrap_or_default(),
        problem_id: row.try_get("problem_id").unwrap_or_default(),
        subject,
        bucket: row.try_get("bucket").unwrap_or(0),
        due_at: db::opt_from_ms(row.try_get("due_at_ms").ok().flatten()),
        difficulty: row.try_get("difficulty").unwrap_or(1),
        review_count: row.try_get("review_count").unwrap_or(0),
        last_reviewed_at: db::opt_from_ms(row.try_get("last_reviewed_at_ms").ok().flatten()),
        last_injected_at: db::opt_from_ms(row.try_get("last_injected_at_ms").ok().flatten()),
    })
}
