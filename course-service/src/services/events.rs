//! Domain events for downstream consumers such as notification delivery.
//!
//! Events are published only after the owning transaction has committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::DeliveryStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CourseEvent {
    #[serde(rename_all = "camelCase")]
    OrderCreated {
        order_id: Uuid,
        user_id: String,
        course_id: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DepositConfirmationRequested {
        order_id: Uuid,
        user_id: String,
        depositor_name: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    OrderApproved {
        order_id: Uuid,
        user_id: String,
        course_id: String,
        months: i32,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    OrderCancelled {
        order_id: Uuid,
        user_id: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    DeliveryStatusChanged {
        order_id: Uuid,
        user_id: String,
        status: DeliveryStatus,
    },
    #[serde(rename_all = "camelCase")]
    TrackingNumberUpdated {
        order_id: Uuid,
        user_id: String,
        tracking_number: String,
        carrier: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CourseStarted {
        user_id: String,
        course_id: String,
        end_date: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionExtended {
        user_id: String,
        course_id: String,
        months: i32,
        end_date: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionRevoked { user_id: String, course_id: String },
    #[serde(rename_all = "camelCase")]
    ChapterCompleted {
        progress_id: String,
        user_id: String,
        course_id: String,
        chapter_id: String,
    },
}

impl CourseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CourseEvent::OrderCreated { .. } => "order_created",
            CourseEvent::DepositConfirmationRequested { .. } => "deposit_confirmation_requested",
            CourseEvent::OrderApproved { .. } => "order_approved",
            CourseEvent::OrderCancelled { .. } => "order_cancelled",
            CourseEvent::DeliveryStatusChanged { .. } => "delivery_status_changed",
            CourseEvent::TrackingNumberUpdated { .. } => "tracking_number_updated",
            CourseEvent::CourseStarted { .. } => "course_started",
            CourseEvent::SubscriptionExtended { .. } => "subscription_extended",
            CourseEvent::SubscriptionRevoked { .. } => "subscription_revoked",
            CourseEvent::ChapterCompleted { .. } => "chapter_completed",
        }
    }
}

/// Fan-out of committed domain events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CourseEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CourseEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: CourseEvent) {
        let name = event.name();
        // No subscribers is not an error; the transition itself stays queryable.
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "Event published"),
            Err(_) => debug!(event = name, "Event dropped, no subscribers"),
        }
    }
}
