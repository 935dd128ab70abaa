//! Progress reconciliation integration tests.

mod common;

use std::sync::Arc;

use common::{admin, drain, other_student, student, TestApp, COURSE_ID, STUDENT_ID};
use course_service::error::CourseError;
use course_service::models::{Actor, InitProgress, Progress, ProgressOutcome};
use course_service::services::{CourseEvent, CourseStore};
use rand::seq::SliceRandom;

fn chapter(chapter_id: &str) -> InitProgress {
    InitProgress {
        course_id: COURSE_ID.to_string(),
        chapter_id: chapter_id.to_string(),
    }
}

async fn initialized(app: &TestApp, chapter_id: &str) -> Progress {
    app.progress
        .initialize(&student(), chapter(chapter_id))
        .await
        .expect("Failed to initialize progress")
}

#[tokio::test]
async fn initialize_is_get_or_create() {
    let app = TestApp::new();

    let first = initialized(&app, "chapter-1").await;
    assert_eq!(first.id, Progress::id_for(STUDENT_ID, "chapter-1"));
    assert_eq!(first.watched_duration, 0.0);

    app.progress
        .report_progress(&student(), &first.id, 42.0, 300.0)
        .await
        .unwrap();

    let again = initialized(&app, "chapter-1").await;
    assert_eq!(again.watched_duration, 42.0);
    assert_eq!(again.created_at, first.created_at);
}

#[tokio::test]
async fn late_reports_never_move_progress_backwards() {
    let app = TestApp::new();
    let record = initialized(&app, "chapter-1").await;

    let (progress, outcome) = app
        .progress
        .report_progress(&student(), &record.id, 45.0, 300.0)
        .await
        .unwrap();
    assert_eq!(outcome, ProgressOutcome::Advanced);
    assert_eq!(progress.watched_percent, 15);

    let (progress, outcome) = app
        .progress
        .report_progress(&student(), &record.id, 30.0, 300.0)
        .await
        .unwrap();
    assert_eq!(outcome, ProgressOutcome::Stale);
    assert_eq!(progress.watched_duration, 45.0);
    assert_eq!(progress.watched_percent, 15);
}

#[tokio::test]
async fn shuffled_reports_converge_on_the_maximum() {
    let app = TestApp::new();
    let record = initialized(&app, "chapter-1").await;

    let mut positions: Vec<f64> = (1..=60).map(|n| f64::from(n) * 10.0).collect();
    positions.shuffle(&mut rand::thread_rng());

    let mut previous = 0.0;
    for watched in positions {
        let (progress, _) = app
            .progress
            .report_progress(&student(), &record.id, watched, 600.0)
            .await
            .unwrap();
        assert!(progress.watched_duration >= previous);
        previous = progress.watched_duration;
    }

    let stored = app.progress.get(&student(), &record.id).await.unwrap();
    assert_eq!(stored.watched_duration, 600.0);
    assert_eq!(stored.watched_percent, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_keep_the_largest_position() {
    let app = Arc::new(TestApp::new());
    let record = initialized(&app, "chapter-1").await;

    let handles: Vec<_> = (1..=32)
        .map(|n| {
            let app = Arc::clone(&app);
            let id = record.id.clone();
            tokio::spawn(async move {
                app.progress
                    .report_progress(&student(), &id, f64::from(n) * 5.0, 200.0)
                    .await
            })
        })
        .collect();

    for joined in futures::future::join_all(handles).await {
        joined.expect("task panicked").expect("report failed");
    }

    let stored = app.progress.get(&student(), &record.id).await.unwrap();
    assert_eq!(stored.watched_duration, 160.0);
    assert_eq!(stored.watched_percent, 80);
}

#[tokio::test]
async fn completion_is_sticky() {
    let app = TestApp::new();
    let record = initialized(&app, "chapter-1").await;
    let mut events = app.events.subscribe();

    app.progress
        .report_progress(&student(), &record.id, 120.0, 300.0)
        .await
        .unwrap();
    let (completed, outcome) = app
        .progress
        .mark_complete(&student(), &record.id, 300.0)
        .await
        .unwrap();
    assert_eq!(outcome, ProgressOutcome::Completed);
    assert!(completed.is_completed);
    assert_eq!(completed.watched_duration, 300.0);
    assert_eq!(completed.watched_percent, 100);

    // A late partial report cannot undo completion.
    let (progress, outcome) = app
        .progress
        .report_progress(&student(), &record.id, 60.0, 300.0)
        .await
        .unwrap();
    assert_eq!(outcome, ProgressOutcome::Stale);
    assert!(progress.is_completed);
    assert_eq!(progress.watched_percent, 100);

    let (_, outcome) = app
        .progress
        .mark_complete(&student(), &record.id, 300.0)
        .await
        .unwrap();
    assert_eq!(outcome, ProgressOutcome::AlreadyCompleted);

    let completions = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, CourseEvent::ChapterCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn invalid_durations_are_rejected() {
    let app = TestApp::new();
    let record = initialized(&app, "chapter-1").await;

    for (watched, total) in [(-1.0, 300.0), (f64::NAN, 300.0), (10.0, f64::INFINITY)] {
        let err = app
            .progress
            .report_progress(&student(), &record.id, watched, total)
            .await
            .unwrap_err();
        assert!(matches!(err, CourseError::Validation(_)));
    }

    let stored = app.progress.get(&student(), &record.id).await.unwrap();
    assert_eq!(stored.watched_duration, 0.0);
}

#[tokio::test]
async fn progress_belongs_to_its_user() {
    let app = TestApp::new();
    let record = initialized(&app, "chapter-1").await;

    let err = app
        .progress
        .report_progress(&other_student(), &record.id, 10.0, 100.0)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));

    let err = app
        .progress
        .get(&other_student(), &record.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));
    assert!(app.progress.get(&admin(), &record.id).await.is_ok());

    let err = app
        .progress
        .report_progress(&student(), "missing_chapter", 10.0, 100.0)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::NotFound { .. }));
}

#[tokio::test]
async fn underscored_ids_get_separate_records() {
    let app = TestApp::new();
    let left = Actor::student("a_b");
    let right = Actor::student("a");

    let left_record = app
        .progress
        .initialize(&left, chapter("c"))
        .await
        .unwrap();
    let right_record = app
        .progress
        .initialize(&right, chapter("b_c"))
        .await
        .unwrap();

    assert_ne!(left_record.id, right_record.id);
    assert_eq!(left_record.user_id, "a_b");
    assert_eq!(right_record.user_id, "a");
    assert_eq!(right_record.chapter_id, "b_c");

    app.progress
        .report_progress(&left, &left_record.id, 30.0, 100.0)
        .await
        .unwrap();
    let (progress, outcome) = app
        .progress
        .report_progress(&right, &right_record.id, 60.0, 100.0)
        .await
        .unwrap();
    assert_eq!(outcome, ProgressOutcome::Advanced);
    assert_eq!(progress.watched_duration, 60.0);

    let stored = app.progress.get(&left, &left_record.id).await.unwrap();
    assert_eq!(stored.watched_duration, 30.0);
}

#[tokio::test]
async fn initialize_refuses_a_record_owned_by_another_user() {
    let app = TestApp::new();
    let mut foreign = Progress::new("intruder", COURSE_ID, "chapter-1", app.now());
    foreign.id = Progress::id_for(STUDENT_ID, "chapter-1");
    app.store.get_or_insert_progress(foreign).await.unwrap();

    let err = app
        .progress
        .initialize(&student(), chapter("chapter-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));
}

#[tokio::test]
async fn course_summary_aggregates_chapters() {
    let app = TestApp::new();
    let first = initialized(&app, "chapter-1").await;
    let second = initialized(&app, "chapter-2").await;
    initialized(&app, "chapter-3").await;

    app.progress
        .mark_complete(&student(), &first.id, 300.0)
        .await
        .unwrap();
    app.progress
        .report_progress(&student(), &second.id, 90.0, 400.0)
        .await
        .unwrap();

    let summary = app
        .progress
        .course_summary(&student(), COURSE_ID)
        .await
        .unwrap();
    assert_eq!(summary.chapters_tracked, 3);
    assert_eq!(summary.chapters_completed, 1);
    assert_eq!(summary.completed_chapter_ids, vec!["chapter-1".to_string()]);
    assert_eq!(summary.total_watched_seconds, 390.0);
}
