//! Domain models for course-service.

mod actor;
mod order;
mod progress;
mod subscription;

pub use actor::{Actor, Role};
pub use order::{
    CreateOrder, DeliveryStatus, ListOrdersFilter, Order, OrderStatus, ShippingAddress,
    TextbookOrder,
};
pub use progress::{CourseProgressSummary, InitProgress, Progress, ProgressOutcome};
pub use subscription::{
    add_calendar_months, resolve, AccessStatus, Subscription, SubscriptionStatus, UserAccount,
};
