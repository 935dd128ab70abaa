//! Subscription lifecycle: derived access status, student activation, and
//! admin extension and revocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{CourseError, Result};
use crate::models::{AccessStatus, Actor, Subscription, UserAccount};
use crate::services::clock::Clock;
use crate::services::events::{CourseEvent, EventBus};
use crate::services::metrics::record_subscription_operation;
use crate::services::retry::{retry_transaction, RetryConfig};
use crate::services::store::CourseStore;
use crate::services::track_failure;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSubscriptionView {
    pub course_id: String,
    pub status: AccessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_days: Option<i64>,
    pub subscription: Subscription,
}

/// Account-wide access from before per-course subscriptions existed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAccess {
    pub status: AccessStatus,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOverview {
    pub user_id: String,
    pub courses: Vec<CourseSubscriptionView>,
    /// Present only while the account has no per-course map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy: Option<LegacyAccess>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAccess {
    pub user_id: String,
    pub course_id: String,
    pub chapter_order: u32,
    pub status: AccessStatus,
    pub has_access: bool,
}

pub struct SubscriptionLifecycle<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    retry: RetryConfig,
}

impl<S> Clone for SubscriptionLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: CourseStore> SubscriptionLifecycle<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, events: EventBus, retry: RetryConfig) -> Self {
        Self {
            store,
            clock,
            events,
            retry,
        }
    }

    async fn account(&self, user_id: &str) -> Result<UserAccount> {
        Ok(self
            .store
            .get_account(user_id)
            .await?
            .unwrap_or_else(|| UserAccount::new(user_id)))
    }

    /// Derived status of `user_id` for `course_id` at the current time.
    #[instrument(skip(self))]
    pub async fn status(&self, user_id: &str, course_id: &str) -> Result<AccessStatus> {
        let account = self.account(user_id).await?;
        Ok(account.course_status(course_id, self.clock.now()))
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn list_subscriptions(
        &self,
        actor: &Actor,
        user_id: &str,
    ) -> Result<SubscriptionOverview> {
        actor.require_owner_or_admin(user_id, "view these subscriptions")?;
        let account = self.account(user_id).await?;
        let now = self.clock.now();

        let courses = account
            .course_subscriptions
            .iter()
            .flatten()
            .map(|(course_id, sub)| CourseSubscriptionView {
                course_id: course_id.clone(),
                status: account.course_status(course_id, now),
                remaining_days: sub.remaining_days(now),
                subscription: sub.clone(),
            })
            .collect();

        let legacy = match account.course_subscriptions {
            None if account.is_paid => Some(LegacyAccess {
                status: account.legacy_status(now),
                subscription_end_date: account.subscription_end_date,
            }),
            _ => None,
        };

        Ok(SubscriptionOverview {
            user_id: account.user_id,
            courses,
            legacy,
        })
    }

    /// Content gate. The first chapter of every course is free.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn has_access(
        &self,
        actor: &Actor,
        user_id: &str,
        course_id: &str,
        chapter_order: u32,
    ) -> Result<CourseAccess> {
        actor.require_owner_or_admin(user_id, "check this access")?;
        let account = self.account(user_id).await?;
        let now = self.clock.now();

        Ok(CourseAccess {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            chapter_order,
            status: account.course_status(course_id, now),
            has_access: account.has_access(course_id, chapter_order, now),
        })
    }

    /// Student activation of an approved subscription. Fixes the access
    /// window to `now .. now + months`.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn start_course(&self, actor: &Actor, course_id: &str) -> Result<Subscription> {
        const OP: &str = "start_course";
        let now = self.clock.now();
        let mut mutate = |account: &mut UserAccount| -> Result<Subscription> {
            let subscription = account.subscription_mut(course_id).ok_or_else(|| {
                CourseError::invalid_state(format!("no subscription for course {}", course_id))
            })?;
            subscription.start(now)?;
            Ok(subscription.clone())
        };

        let (_, subscription) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_account(&actor.user_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        let end_date = subscription.end_date.unwrap_or(now);
        record_subscription_operation("started");
        info!(course_id, end_date = %end_date, "Course started");
        self.events.publish(CourseEvent::CourseStarted {
            user_id: actor.user_id.clone(),
            course_id: course_id.to_string(),
            end_date,
        });

        Ok(subscription)
    }

    /// Admin grant or renewal, independent of orders.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn extend_subscription(
        &self,
        actor: &Actor,
        user_id: &str,
        course_id: &str,
        months: i32,
    ) -> Result<Subscription> {
        const OP: &str = "extend_subscription";
        actor.require_admin("extending subscriptions").inspect_err(track_failure(OP))?;

        let now = self.clock.now();
        let mut mutate = |account: &mut UserAccount| -> Result<Subscription> {
            account.extend_subscription(course_id, months, now)
        };
        let (_, subscription) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_account(user_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        let end_date = subscription.end_date.unwrap_or(now);
        record_subscription_operation("extended");
        info!(user_id, course_id, months, end_date = %end_date, "Subscription extended");
        self.events.publish(CourseEvent::SubscriptionExtended {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            months,
            end_date,
        });

        Ok(subscription)
    }

    /// Remove the course entry entirely.
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn revoke_subscription(
        &self,
        actor: &Actor,
        user_id: &str,
        course_id: &str,
    ) -> Result<Subscription> {
        const OP: &str = "revoke_subscription";
        actor.require_admin("revoking subscriptions").inspect_err(track_failure(OP))?;

        let mut mutate = |account: &mut UserAccount| -> Result<Subscription> {
            account.remove_subscription(course_id).ok_or_else(|| {
                CourseError::not_found("subscription", format!("{}/{}", user_id, course_id))
            })
        };
        let (_, removed) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_account(user_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        record_subscription_operation("revoked");
        info!(user_id, course_id, "Subscription revoked");
        self.events.publish(CourseEvent::SubscriptionRevoked {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
        });

        Ok(removed)
    }
}
