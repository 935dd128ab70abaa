//! HTTP handlers for course-service.

pub mod orders;
pub mod progress;
pub mod subscriptions;
