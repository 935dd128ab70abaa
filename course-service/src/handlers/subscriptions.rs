//! Subscription handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{AccessQuery, ExtendSubscriptionRequest};
use crate::models::{Actor, Subscription};
use crate::services::{CourseAccess, CourseStore, SubscriptionOverview};
use crate::startup::AppState;

pub async fn list_subscriptions<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(user_id): Path<String>,
) -> Result<Json<SubscriptionOverview>, AppError> {
    let overview = state
        .subscriptions
        .list_subscriptions(&actor, &user_id)
        .await?;
    Ok(Json(overview))
}

pub async fn course_access<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path((user_id, course_id)): Path<(String, String)>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<CourseAccess>, AppError> {
    query.validate()?;
    let access = state
        .subscriptions
        .has_access(&actor, &user_id, &course_id, query.chapter_order)
        .await?;
    Ok(Json(access))
}

/// Student activates their approved subscription.
pub async fn start_course<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(course_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state.subscriptions.start_course(&actor, &course_id).await?;
    Ok(Json(subscription))
}

pub async fn extend_subscription<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path((user_id, course_id)): Path<(String, String)>,
    Json(payload): Json<ExtendSubscriptionRequest>,
) -> Result<Json<Subscription>, AppError> {
    payload.validate()?;
    let subscription = state
        .subscriptions
        .extend_subscription(&actor, &user_id, &course_id, payload.months)
        .await?;
    Ok(Json(subscription))
}

pub async fn revoke_subscription<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path((user_id, course_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .subscriptions
        .revoke_subscription(&actor, &user_id, &course_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
