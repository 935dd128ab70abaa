//! Progress reconciliation: merges concurrent watch-time reports into one
//! monotonic record per (user, chapter).

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::error::{CourseError, Result};
use crate::models::{Actor, CourseProgressSummary, InitProgress, Progress, ProgressOutcome};
use crate::services::clock::Clock;
use crate::services::events::{CourseEvent, EventBus};
use crate::services::metrics::record_progress_report;
use crate::services::retry::{retry_transaction, RetryConfig};
use crate::services::store::CourseStore;
use crate::services::track_failure;

pub struct ProgressTracker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    retry: RetryConfig,
}

impl<S> Clone for ProgressTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: CourseStore> ProgressTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, events: EventBus, retry: RetryConfig) -> Self {
        Self {
            store,
            clock,
            events,
            retry,
        }
    }

    /// Get-or-create the caller's record for a chapter.
    #[instrument(skip(self, input), fields(user_id = %actor.user_id, chapter_id = %input.chapter_id))]
    pub async fn initialize(&self, actor: &Actor, input: InitProgress) -> Result<Progress> {
        input.validate()?;

        let record = Progress::new(
            &actor.user_id,
            &input.course_id,
            &input.chapter_id,
            self.clock.now(),
        );
        let (progress, created) = self
            .store
            .get_or_insert_progress(record)
            .await
            .inspect_err(track_failure("initialize_progress"))?;

        if progress.user_id != actor.user_id || progress.chapter_id != input.chapter_id {
            warn!(
                progress_id = %progress.id,
                owner = %progress.user_id,
                "Progress id owned by another record"
            );
            return Err(CourseError::forbidden("progress record belongs to another user"));
        }

        if created {
            info!(progress_id = %progress.id, "Progress record created");
        }
        Ok(progress)
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn get(&self, actor: &Actor, progress_id: &str) -> Result<Progress> {
        let progress = self
            .store
            .get_progress(progress_id)
            .await?
            .ok_or_else(|| CourseError::not_found("progress", progress_id))?;
        actor.require_owner_or_admin(&progress.user_id, "view this progress")?;
        Ok(progress)
    }

    /// Merge a playback report. Watched time never moves backwards.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn report_progress(
        &self,
        actor: &Actor,
        progress_id: &str,
        watched_seconds: f64,
        total_seconds: f64,
    ) -> Result<(Progress, ProgressOutcome)> {
        const OP: &str = "report_progress";
        let now = self.clock.now();
        let mut mutate = |progress: &mut Progress| -> Result<ProgressOutcome> {
            actor.require_owner(&progress.user_id, "report progress")?;
            progress.merge_report(watched_seconds, total_seconds, now)
        };

        let (progress, outcome) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_progress(progress_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        record_progress_report(outcome.as_str());
        debug!(
            progress_id,
            outcome = outcome.as_str(),
            watched = progress.watched_duration,
            percent = progress.watched_percent,
            "Progress merged"
        );
        Ok((progress, outcome))
    }

    /// Mark the chapter complete. Completion wins over any partial report.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn mark_complete(
        &self,
        actor: &Actor,
        progress_id: &str,
        total_seconds: f64,
    ) -> Result<(Progress, ProgressOutcome)> {
        const OP: &str = "mark_complete";
        let now = self.clock.now();
        let mut mutate = |progress: &mut Progress| -> Result<ProgressOutcome> {
            actor.require_owner(&progress.user_id, "complete this chapter")?;
            progress.complete(total_seconds, now)
        };

        let (progress, outcome) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_progress(progress_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        record_progress_report(outcome.as_str());
        if outcome == ProgressOutcome::Completed {
            info!(progress_id, chapter_id = %progress.chapter_id, "Chapter completed");
            self.events.publish(CourseEvent::ChapterCompleted {
                progress_id: progress.id.clone(),
                user_id: progress.user_id.clone(),
                course_id: progress.course_id.clone(),
                chapter_id: progress.chapter_id.clone(),
            });
        }
        Ok((progress, outcome))
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn course_summary(
        &self,
        actor: &Actor,
        course_id: &str,
    ) -> Result<CourseProgressSummary> {
        let records = self.store.list_progress(&actor.user_id, course_id).await?;
        Ok(CourseProgressSummary::from_records(course_id, &records))
    }
}
