//! Subscription model.
//!
//! Subscriptions live on the user account as a map keyed by course id. The
//! stored `status` is only part of the picture; [`resolve`] derives the
//! access status from the stored fields and the current time.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CourseError, Result};

/// Stored subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Ready,
    Active,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Ready => "READY",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Expired => "EXPIRED",
        }
    }
}

/// Derived access status of a user for one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessStatus {
    None,
    Pending,
    Ready,
    Active,
    Expired,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::None => "NONE",
            AccessStatus::Pending => "PENDING",
            AccessStatus::Ready => "READY",
            AccessStatus::Active => "ACTIVE",
            AccessStatus::Expired => "EXPIRED",
        }
    }
}

/// Per-course access grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub approved: bool,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub is_started: bool,
    pub months: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Add calendar months, keeping the day of month and letting it overflow
/// into the following month (Jan 31 + 1 month is Mar 2 or Mar 3).
///
/// Returns `None` when the result is outside the representable range.
pub fn add_calendar_months(start: DateTime<Utc>, months: i32) -> Option<DateTime<Utc>> {
    let total = start.year().checked_mul(12)? + start.month0() as i32;
    let total = total.checked_add(months)?;
    let first = NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)?;
    let date = first.checked_add_days(Days::new(u64::from(start.day() - 1)))?;
    Some(date.and_time(start.time()).and_utc())
}

fn window_end(start: DateTime<Utc>, months: i32) -> Result<DateTime<Utc>> {
    add_calendar_months(start, months).ok_or_else(|| {
        CourseError::validation(format!("{} months from {} is out of range", months, start))
    })
}

/// Derive the access status of a single subscription.
pub fn resolve(subscription: Option<&Subscription>, now: DateTime<Utc>) -> AccessStatus {
    let Some(sub) = subscription else {
        return AccessStatus::None;
    };
    if !sub.approved {
        return AccessStatus::Pending;
    }
    if !sub.has_started() {
        return AccessStatus::Ready;
    }
    match sub.end_date {
        Some(end) if end > now => AccessStatus::Active,
        Some(_) => AccessStatus::Expired,
        None if sub.status == SubscriptionStatus::Expired => AccessStatus::Expired,
        None => AccessStatus::Active,
    }
}

impl Subscription {
    /// Fresh grant written when an order is approved.
    pub fn from_approved_order(order_id: Uuid, months: i32, now: DateTime<Utc>) -> Self {
        Self {
            approved: true,
            status: SubscriptionStatus::Ready,
            is_started: false,
            months,
            order_id: Some(order_id),
            approved_at: Some(now),
            start_date: None,
            end_date: None,
        }
    }

    /// Older records may carry an ACTIVE status without the started flag.
    pub fn has_started(&self) -> bool {
        self.is_started || self.status != SubscriptionStatus::Ready
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.approved {
            return Err(CourseError::invalid_state("subscription is not approved yet"));
        }
        if self.has_started() {
            return Err(CourseError::invalid_state("course has already been started"));
        }
        if self.months < 1 {
            return Err(CourseError::invalid_state(format!(
                "subscription has no valid duration ({} months)",
                self.months
            )));
        }

        self.end_date = Some(window_end(now, self.months)?);
        self.start_date = Some(now);
        self.status = SubscriptionStatus::Active;
        self.is_started = true;
        Ok(())
    }

    /// Whole days left on an active subscription with an end date.
    pub fn remaining_days(&self, now: DateTime<Utc>) -> Option<i64> {
        match (resolve(Some(self), now), self.end_date) {
            (AccessStatus::Active, Some(end)) => Some((end - now).num_days()),
            _ => None,
        }
    }
}

/// User account document holding the per-course subscription map and the
/// deprecated account-wide flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub user_id: String,
    #[serde(default)]
    pub course_subscriptions: Option<BTreeMap<String, Subscription>>,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub subscription_end_date: Option<DateTime<Utc>>,
}

impl UserAccount {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            course_subscriptions: None,
            is_paid: false,
            subscription_end_date: None,
        }
    }

    pub fn subscription(&self, course_id: &str) -> Option<&Subscription> {
        self.course_subscriptions.as_ref()?.get(course_id)
    }

    pub fn subscription_mut(&mut self, course_id: &str) -> Option<&mut Subscription> {
        self.course_subscriptions.as_mut()?.get_mut(course_id)
    }

    pub fn course_status(&self, course_id: &str, now: DateTime<Utc>) -> AccessStatus {
        match &self.course_subscriptions {
            Some(map) => match map.get(course_id) {
                Some(sub) => resolve(Some(sub), now),
                None => AccessStatus::Pending,
            },
            None => self.legacy_status(now),
        }
    }

    /// Deprecated account-wide access. Only consulted while the account has
    /// no per-course map at all.
    ///
    /// Unpaid accounts have no access. A paid account is `Expired` once its
    /// end date is at or before `now`, and `Active` otherwise, including
    /// when no end date is recorded.
    pub fn legacy_status(&self, now: DateTime<Utc>) -> AccessStatus {
        if !self.is_paid {
            return AccessStatus::None;
        }
        match self.subscription_end_date {
            Some(end) if end <= now => AccessStatus::Expired,
            _ => AccessStatus::Active,
        }
    }

    /// The first chapter of every course is free.
    pub fn has_access(&self, course_id: &str, chapter_order: u32, now: DateTime<Utc>) -> bool {
        chapter_order == 1 || self.course_status(course_id, now) == AccessStatus::Active
    }

    /// Insert or replace the subscription for a course. Replacing discards the
    /// previous window entirely.
    pub fn put_subscription(&mut self, course_id: &str, subscription: Subscription) {
        self.course_subscriptions
            .get_or_insert_with(BTreeMap::new)
            .insert(course_id.to_string(), subscription);
    }

    /// Push the end date out by `months`, starting from the current end date
    /// when it is still in the future and from `now` otherwise.
    pub fn extend_subscription(
        &mut self,
        course_id: &str,
        months: i32,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        if !(1..=60).contains(&months) {
            return Err(CourseError::validation("months must be between 1 and 60"));
        }

        let existing = self.subscription(course_id).cloned();
        let base = existing
            .as_ref()
            .and_then(|s| s.end_date)
            .filter(|end| *end > now)
            .unwrap_or(now);
        let end_date = window_end(base, months)?;

        let subscription = Subscription {
            approved: true,
            status: SubscriptionStatus::Active,
            is_started: true,
            months,
            order_id: existing.as_ref().and_then(|s| s.order_id),
            approved_at: existing.as_ref().and_then(|s| s.approved_at).or(Some(now)),
            start_date: existing.as_ref().and_then(|s| s.start_date).or(Some(base)),
            end_date: Some(end_date),
        };
        self.put_subscription(course_id, subscription.clone());
        Ok(subscription)
    }

    /// Remove the course entry. An emptied map is cleared back to `None` so
    /// the legacy fallback sees the account as it was before any grant.
    pub fn remove_subscription(&mut self, course_id: &str) -> Option<Subscription> {
        let map = self.course_subscriptions.as_mut()?;
        let removed = map.remove(course_id);
        if map.is_empty() {
            self.course_subscriptions = None;
        }
        removed
    }
}
