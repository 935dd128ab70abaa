//! Progress model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::error::{CourseError, Result};

/// Per-(user, chapter) watch progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub chapter_id: String,
    pub is_completed: bool,
    pub watched_duration: f64,
    pub total_duration: f64,
    pub watched_percent: i32,
    pub last_watched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a single report or completion did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutcome {
    /// Watched duration moved forward.
    Advanced,
    /// Report was at or behind the stored position.
    Stale,
    /// Chapter was marked complete by this call.
    Completed,
    /// Chapter was already complete.
    AlreadyCompleted,
}

impl ProgressOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressOutcome::Advanced => "advanced",
            ProgressOutcome::Stale => "stale",
            ProgressOutcome::Completed => "completed",
            ProgressOutcome::AlreadyCompleted => "already_completed",
        }
    }
}

/// Input for initializing progress on a chapter.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitProgress {
    #[validate(length(min = 1, message = "courseId is required"))]
    pub course_id: String,
    #[validate(length(min = 1, message = "chapterId is required"))]
    pub chapter_id: String,
}

/// Aggregate of a user's progress across one course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressSummary {
    pub course_id: String,
    pub chapters_tracked: usize,
    pub chapters_completed: usize,
    pub total_watched_seconds: f64,
    pub completed_chapter_ids: Vec<String>,
}

/// Namespace for deterministic progress ids.
const PROGRESS_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3c2e_9d4a_5e70_8a21_c4d3_07f5_92be);

fn check_seconds(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(CourseError::validation(format!(
            "{} must be a finite, non-negative number of seconds",
            field
        )));
    }
    Ok(())
}

fn percent_of(watched: f64, total: f64) -> i32 {
    ((100.0 * watched / total).round()).clamp(0.0, 100.0) as i32
}

impl Progress {
    /// Stable id of the (user, chapter) record. The user id is length
    /// prefixed so no two pairs hash the same name.
    pub fn id_for(user_id: &str, chapter_id: &str) -> String {
        let name = format!("{}:{}:{}", user_id.len(), user_id, chapter_id);
        Uuid::new_v5(&PROGRESS_NAMESPACE, name.as_bytes()).to_string()
    }

    pub fn new(user_id: &str, course_id: &str, chapter_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::id_for(user_id, chapter_id),
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            chapter_id: chapter_id.to_string(),
            is_completed: false,
            watched_duration: 0.0,
            total_duration: 0.0,
            watched_percent: 0,
            last_watched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge an observed playback position into the record.
    ///
    /// The watched duration only ever grows, so a slow writer reporting an
    /// older position cannot erase progress. A zero total leaves the stored
    /// total and percent as they were.
    pub fn merge_report(
        &mut self,
        observed_watched: f64,
        observed_total: f64,
        now: DateTime<Utc>,
    ) -> Result<ProgressOutcome> {
        check_seconds("watchedDuration", observed_watched)?;
        check_seconds("totalDuration", observed_total)?;

        let outcome = if observed_watched > self.watched_duration {
            self.watched_duration = observed_watched;
            ProgressOutcome::Advanced
        } else {
            ProgressOutcome::Stale
        };

        if self.is_completed {
            self.watched_percent = 100;
        } else if observed_total > 0.0 {
            self.total_duration = observed_total;
            self.watched_percent = percent_of(self.watched_duration, observed_total);
        }
        self.last_watched_at = Some(now);
        self.updated_at = now;
        Ok(outcome)
    }

    /// Mark the chapter finished. Completion is sticky; calling this again
    /// only refreshes timestamps.
    pub fn complete(&mut self, total: f64, now: DateTime<Utc>) -> Result<ProgressOutcome> {
        check_seconds("totalDuration", total)?;

        let first = !self.is_completed;
        self.is_completed = true;
        if total > 0.0 {
            self.total_duration = total;
        }
        self.watched_duration = self.watched_duration.max(total);
        self.watched_percent = 100;
        self.last_watched_at = Some(now);
        self.updated_at = now;

        Ok(if first {
            ProgressOutcome::Completed
        } else {
            ProgressOutcome::AlreadyCompleted
        })
    }
}

impl CourseProgressSummary {
    pub fn from_records(course_id: &str, records: &[Progress]) -> Self {
        let mut completed_chapter_ids: Vec<String> = records
            .iter()
            .filter(|p| p.is_completed)
            .map(|p| p.chapter_id.clone())
            .collect();
        completed_chapter_ids.sort();

        Self {
            course_id: course_id.to_string(),
            chapters_tracked: records.len(),
            chapters_completed: completed_chapter_ids.len(),
            total_watched_seconds: records.iter().map(|p| p.watched_duration).sum(),
            completed_chapter_ids,
        }
    }
}
