mod common;

use chrono::Duration;

use mentor_core::config::CoreConfig;
use mentor_core::services::lifecycle::{self, TaskEventType, TaskStatus};
use mentor_core::services::paths::PathMode;
use mentor_core::workers::task_expiry;
use mentor_core::CoreError;

use common::{problem, t0};

#[tokio::test]
async fn full_lifecycle_appends_an_auditable_event_trail() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;
    let p1 = problem("p1", &["graphs"], 2);

    let task = common::create_task(&db, &path, &p1, t0()).await;
    assert_eq!(task.status, TaskStatus::Scheduled);

    lifecycle::start(db.pool(), task.id, t0() + Duration::minutes(1))
        .await
        .unwrap();
    lifecycle::record_hint(db.pool(), task.id, t0() + Duration::minutes(5))
        .await
        .unwrap();
    lifecycle::record_tutor_exchange(db.pool(), task.id, "learner", t0() + Duration::minutes(6))
        .await
        .unwrap();
    common::attempt_on_started(&db, &config, &task, &p1, t0() + Duration::minutes(10)).await;

    let events = lifecycle::events(db.pool(), task.id).await.unwrap();
    let kinds: Vec<TaskEventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            TaskEventType::Created,
            TaskEventType::Started,
            TaskEventType::HintRequested,
            TaskEventType::TutorInteraction,
            TaskEventType::Submitted,
            TaskEventType::Evaluated,
        ]
    );
    assert!(lifecycle::validate_event_path(&events));

    // Replaying the log reproduces the row's derived state.
    let replayed = lifecycle::replay(&events).unwrap();
    let task = lifecycle::get(db.pool(), task.id).await.unwrap();
    assert_eq!(replayed.status, task.status);
    assert_eq!(replayed.score, task.score);
    assert_eq!(replayed.hints_used, task.hints_used);
    assert_eq!(task.hints_used, 1);
}

#[tokio::test]
async fn starting_twice_is_an_invalid_transition() {
    let db = common::test_db().await;
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;
    let task = common::create_task(&db, &path, &problem("p1", &["graphs"], 2), t0()).await;

    lifecycle::start(db.pool(), task.id, t0()).await.unwrap();
    let err = lifecycle::start(db.pool(), task.id, t0()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    // The failed call appended nothing.
    let events = lifecycle::events(db.pool(), task.id).await.unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn skip_is_allowed_from_scheduled_and_in_progress() {
    let db = common::test_db().await;
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    let scheduled = common::create_task(&db, &path, &problem("p1", &["graphs"], 2), t0()).await;
    let skipped = lifecycle::skip(db.pool(), scheduled.id, t0()).await.unwrap();
    assert_eq!(skipped.status, TaskStatus::Skipped);

    let started = common::create_task(&db, &path, &problem("p2", &["graphs"], 2), t0()).await;
    lifecycle::start(db.pool(), started.id, t0()).await.unwrap();
    let skipped = lifecycle::skip(db.pool(), started.id, t0()).await.unwrap();
    assert_eq!(skipped.status, TaskStatus::Skipped);

    let err = lifecycle::skip(db.pool(), started.id, t0()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn expiry_is_idempotent_with_exactly_one_event() {
    // Scenario E.
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;
    let task = common::create_task(&db, &path, &problem("p1", &["graphs"], 2), t0()).await;

    let after_grace = t0() + config.expiry_grace + Duration::minutes(1);
    let expired = lifecycle::expire(db.pool(), task.id, config.expiry_grace, after_grace)
        .await
        .unwrap();
    assert_eq!(expired.status, TaskStatus::Expired);

    let events = lifecycle::events(db.pool(), task.id).await.unwrap();
    let status_changes = events
        .iter()
        .filter(|e| e.event_type == TaskEventType::StatusChanged)
        .count();
    assert_eq!(status_changes, 1);

    // Re-invoking is a no-op, not an error, and appends nothing.
    let again = lifecycle::expire(db.pool(), task.id, config.expiry_grace, after_grace)
        .await
        .unwrap();
    assert_eq!(again.status, TaskStatus::Expired);
    let events = lifecycle::events(db.pool(), task.id).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == TaskEventType::StatusChanged)
            .count(),
        1
    );
    assert!(lifecycle::validate_event_path(&events));
}

#[tokio::test]
async fn expiry_respects_the_grace_window_and_started_tasks() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    let fresh = common::create_task(&db, &path, &problem("p1", &["graphs"], 2), t0()).await;
    let too_early = lifecycle::expire(
        db.pool(),
        fresh.id,
        config.expiry_grace,
        t0() + Duration::minutes(5),
    )
    .await;
    assert!(matches!(too_early, Err(CoreError::Validation(_))));

    let started = common::create_task(&db, &path, &problem("p2", &["graphs"], 2), t0()).await;
    lifecycle::start(db.pool(), started.id, t0()).await.unwrap();
    let err = lifecycle::expire(
        db.pool(),
        started.id,
        config.expiry_grace,
        t0() + config.expiry_grace + Duration::days(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn expiry_sweep_expires_only_overdue_scheduled_tasks() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    let overdue = common::create_task(&db, &path, &problem("p1", &["graphs"], 2), t0()).await;
    let recent_time = t0() + config.expiry_grace;
    let recent = common::create_task(&db, &path, &problem("p2", &["graphs"], 2), recent_time).await;
    let started = common::create_task(&db, &path, &problem("p3", &["graphs"], 2), t0()).await;
    lifecycle::start(db.pool(), started.id, t0()).await.unwrap();

    let sweep_time = t0() + config.expiry_grace + Duration::minutes(1);
    let expired = task_expiry::run_expiry_sweep(&db, &config, sweep_time)
        .await
        .unwrap();
    assert_eq!(expired, 1);

    assert_eq!(
        lifecycle::get(db.pool(), overdue.id).await.unwrap().status,
        TaskStatus::Expired
    );
    assert_eq!(
        lifecycle::get(db.pool(), recent.id).await.unwrap().status,
        TaskStatus::Scheduled
    );
    assert_eq!(
        lifecycle::get(db.pool(), started.id).await.unwrap().status,
        TaskStatus::InProgress
    );

    // A second sweep finds nothing new.
    let expired = task_expiry::run_expiry_sweep(&db, &config, sweep_time)
        .await
        .unwrap();
    assert_eq!(expired, 0);
}

#[tokio::test]
async fn listing_and_next_scheduled_follow_schedule_order() {
    let db = common::test_db().await;
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    let mut tx = db.pool().begin().await.unwrap();
    let batch = lifecycle::create_batch(
        &mut *tx,
        &path,
        vec![
            common::new_task(&problem("p2", &["graphs"], 2), t0() + Duration::hours(2)),
            common::new_task(&problem("p1", &["graphs"], 2), t0()),
        ],
        t0(),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    let (second, first) = (batch[0].clone(), batch[1].clone());

    let next = lifecycle::next_scheduled(db.pool(), "learner-1")
        .await
        .unwrap()
        .expect("a scheduled task");
    assert_eq!(next.id, first.id);

    let all = lifecycle::list_for_learner(db.pool(), "learner-1", None, None, 10)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.id);

    let none = lifecycle::list_for_learner(
        db.pool(),
        "learner-1",
        Some("math"),
        Some(TaskStatus::Scheduled),
        10,
    )
    .await
    .unwrap();
    assert!(none.is_empty());
}
