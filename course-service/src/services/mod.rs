//! Services module for course-service.

pub mod clock;
pub mod database;
pub mod events;
pub mod memory;
pub mod metrics;
pub mod orders;
pub mod progress;
pub mod retry;
pub mod store;
pub mod subscriptions;

use tracing::warn;

use crate::error::CourseError;

pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use events::{CourseEvent, EventBus};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use orders::{Approval, DepositConfirmation, OrderLifecycle};
pub use progress::ProgressTracker;
pub use retry::RetryConfig;
pub use store::CourseStore;
pub use subscriptions::{
    CourseAccess, CourseSubscriptionView, LegacyAccess, SubscriptionLifecycle,
    SubscriptionOverview,
};

/// Log and count a failed engine operation.
pub(crate) fn track_failure(operation: &'static str) -> impl Fn(&CourseError) {
    move |err: &CourseError| {
        warn!(operation, error = %err, "Operation failed");
        self::metrics::record_error(err.kind(), operation);
    }
}
