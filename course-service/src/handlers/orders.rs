//! Order handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    ApprovalResponse, DepositConfirmationResponse, ListOrdersQuery, ListOrdersResponse, OrderResponse,
    PendingDepositsResponse, UpdateDeliveryRequest, UpdateTrackingRequest,
};
use crate::models::{Actor, CreateOrder};
use crate::services::CourseStore;
use crate::startup::AppState;

/// Place an order for the calling student.
pub async fn create_order<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Json(payload): Json<CreateOrder>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let order = state.orders.create_order(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

pub async fn list_orders<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ListOrdersResponse>, AppError> {
    let filter = query.into_filter()?;
    let orders = state.orders.list_orders(&actor, filter).await?;
    Ok(Json(ListOrdersResponse {
        total: orders.len(),
        orders: orders.into_iter().map(OrderResponse::from).collect(),
    }))
}

pub async fn pending_deposits<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
) -> Result<Json<PendingDepositsResponse>, AppError> {
    let count = state.orders.pending_deposit_count(&actor).await?;
    Ok(Json(PendingDepositsResponse { count }))
}

pub async fn get_order<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.get_order(&actor, order_id).await?;
    Ok(Json(order.into()))
}

/// Owner reports the bank transfer. Repeats answer 200 with `alreadyRequested`.
pub async fn confirm_deposit<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<DepositConfirmationResponse>, AppError> {
    let confirmation = state.orders.confirm_deposit(&actor, order_id).await?;
    Ok(Json(DepositConfirmationResponse {
        order: confirmation.order.into(),
        already_requested: confirmation.already_requested,
    }))
}

pub async fn approve_order<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApprovalResponse>, AppError> {
    let approval = state.orders.approve_order(&actor, order_id).await?;
    Ok(Json(approval.into()))
}

pub async fn cancel_order<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.cancel_order(&actor, order_id).await?;
    Ok(Json(order.into()))
}

pub async fn update_delivery<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateDeliveryRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .orders
        .update_delivery_status(&actor, order_id, payload.delivery_status)
        .await?;
    Ok(Json(order.into()))
}

pub async fn update_tracking<S: CourseStore>(
    State(state): State<AppState<S>>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateTrackingRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    payload.validate()?;
    let order = state
        .orders
        .update_tracking_number(
            &actor,
            order_id,
            &payload.tracking_number,
            payload.carrier.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(order.into()))
}
