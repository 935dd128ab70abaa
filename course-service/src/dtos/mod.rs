//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{CourseError, Result};
use crate::models::{
    DeliveryStatus, ListOrdersFilter, Order, OrderStatus, Progress, ProgressOutcome, Subscription,
};
use crate::services::Approval;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub has_textbook: bool,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            has_textbook: order.has_textbook(),
            order,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub deposit_confirmed: Option<bool>,
}

impl ListOrdersQuery {
    pub fn into_filter(self) -> Result<ListOrdersFilter> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(
                OrderStatus::from_string(&raw.to_ascii_uppercase())
                    .ok_or_else(|| CourseError::validation(format!("unknown order status {}", raw)))?,
            ),
            None => None,
        };
        Ok(ListOrdersFilter {
            user_id: self.user_id,
            status,
            deposit_confirmed: self.deposit_confirmed,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersResponse {
    pub orders: Vec<OrderResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDepositsResponse {
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositConfirmationResponse {
    pub order: OrderResponse,
    pub already_requested: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub order: OrderResponse,
    pub subscription: Subscription,
}

impl From<Approval> for ApprovalResponse {
    fn from(approval: Approval) -> Self {
        Self {
            order: approval.order.into(),
            subscription: approval.subscription,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeliveryRequest {
    pub delivery_status: DeliveryStatus,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrackingRequest {
    #[validate(length(min = 1, message = "trackingNumber is required"))]
    pub tracking_number: String,
    #[serde(default)]
    pub carrier: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccessQuery {
    #[validate(range(min = 1, message = "chapterOrder starts at 1"))]
    pub chapter_order: u32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExtendSubscriptionRequest {
    #[validate(range(min = 1, max = 60, message = "months must be between 1 and 60"))]
    pub months: i32,
}

/// Watch times are checked by the progress model, which rejects negative
/// and non-finite values before touching the stored record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProgressRequest {
    pub watched_duration: f64,
    #[serde(default)]
    pub total_duration: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteProgressRequest {
    pub total_duration: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateResponse {
    pub progress: Progress,
    pub outcome: ProgressOutcome,
}
