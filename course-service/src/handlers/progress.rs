//! Progress handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{CompleteProgressRequest, ProgressUpdateResponse, ReportProgressRequest};
use crate::models::{Actor, CourseProgressSummary, InitProgress, Progress};
use crate::services::CourseStore;
use crate::startup::AppState;

/// Get-or-create the caller's progress record for a chapter.
pub async fn initialize<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Json(payload): Json<InitProgress>,
) -> Result<(StatusCode, Json<Progress>), AppError> {
    let progress = state.progress.initialize(&actor, payload).await?;
    Ok((StatusCode::OK, Json(progress)))
}

pub async fn get_progress<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(progress_id): Path<String>,
) -> Result<Json<Progress>, AppError> {
    Ok(Json(state.progress.get(&actor, &progress_id).await?))
}

pub async fn report<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(progress_id): Path<String>,
    Json(payload): Json<ReportProgressRequest>,
) -> Result<Json<ProgressUpdateResponse>, AppError> {
    let (progress, outcome) = state
        .progress
        .report_progress(
            &actor,
            &progress_id,
            payload.watched_duration,
            payload.total_duration,
        )
        .await?;
    Ok(Json(ProgressUpdateResponse { progress, outcome }))
}

pub async fn complete<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(progress_id): Path<String>,
    Json(payload): Json<CompleteProgressRequest>,
) -> Result<Json<ProgressUpdateResponse>, AppError> {
    let (progress, outcome) = state
        .progress
        .mark_complete(&actor, &progress_id, payload.total_duration)
        .await?;
    Ok(Json(ProgressUpdateResponse { progress, outcome }))
}

pub async fn course_summary<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(course_id): Path<String>,
) -> Result<Json<CourseProgressSummary>, AppError> {
    Ok(Json(state.progress.course_summary(&actor, &course_id).await?))
}
