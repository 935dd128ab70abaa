//! Order model.
//!
//! An order is a manual bank-transfer purchase request for course access,
//! optionally bundled with a printed textbook that has to be shipped.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{CourseError, Result};

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "PENDING_PAYMENT" => Some(OrderStatus::PendingPayment),
            "PAID" => Some(OrderStatus::Paid),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::PendingPayment)
    }
}

/// Shipping progress of a textbook, only meaningful once the order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Preparing,
    Shipped,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Preparing => "PREPARING",
            DeliveryStatus::Shipped => "SHIPPED",
            DeliveryStatus::Delivered => "DELIVERED",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "PREPARING" => Some(DeliveryStatus::Preparing),
            "SHIPPED" => Some(DeliveryStatus::Shipped),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(custom(function = "not_blank"))]
    pub recipient_name: String,
    #[validate(custom(function = "not_blank"))]
    pub phone: String,
    #[validate(custom(function = "not_blank"))]
    pub postal_code: String,
    #[validate(custom(function = "not_blank"))]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_detail: Option<String>,
}

/// Textbook part of an order. Present iff the student asked for a textbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextbookOrder {
    pub textbook_amount: Decimal,
    pub shipping_address: ShippingAddress,
    pub delivery_status: Option<DeliveryStatus>,
    pub tracking_number: Option<String>,
    pub tracking_carrier: Option<String>,
}

/// Order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: Uuid,
    pub user_id: String,
    pub course_id: String,
    pub course_name: String,
    pub months: i32,
    pub course_amount: Decimal,
    pub amount: Decimal,
    pub depositor_name: String,
    pub status: OrderStatus,
    pub deposit_confirmed: bool,
    pub deposit_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub textbook: Option<TextbookOrder>,
}

/// Input for placing an order.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    #[validate(custom(function = "not_blank"))]
    pub course_id: String,
    #[validate(custom(function = "not_blank"))]
    pub course_name: String,
    #[validate(range(min = 1, max = 60, message = "months must be between 1 and 60"))]
    pub months: i32,
    pub course_amount: Decimal,
    #[validate(custom(function = "not_blank"))]
    pub depositor_name: String,
    #[serde(default)]
    pub has_textbook: bool,
    #[serde(default)]
    pub textbook_amount: Option<Decimal>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
}

/// Filter parameters for listing orders.
#[derive(Debug, Clone, Default)]
pub struct ListOrdersFilter {
    pub user_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub deposit_confirmed: Option<bool>,
}

impl ListOrdersFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.as_deref().map_or(true, |u| order.user_id == u)
            && self.status.map_or(true, |s| order.status == s)
            && self
                .deposit_confirmed
                .map_or(true, |c| order.deposit_confirmed == c)
    }
}

fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn is_negative(value: Decimal) -> bool {
    value.is_sign_negative() && !value.is_zero()
}

impl CreateOrder {
    /// Validate the request and build a PENDING_PAYMENT order owned by `user_id`.
    ///
    /// Textbook fields are ignored unless `has_textbook` is set, in which case
    /// both the textbook price and a complete shipping address are required.
    pub fn into_order(self, order_id: Uuid, user_id: &str, now: DateTime<Utc>) -> Result<Order> {
        self.validate()?;
        if is_negative(self.course_amount) {
            return Err(CourseError::validation("courseAmount must not be negative"));
        }

        let textbook = if self.has_textbook {
            let textbook_amount = self
                .textbook_amount
                .ok_or_else(|| CourseError::validation("textbookAmount is required with a textbook"))?;
            if is_negative(textbook_amount) {
                return Err(CourseError::validation("textbookAmount must not be negative"));
            }
            let shipping_address = self
                .shipping_address
                .ok_or_else(|| CourseError::validation("shippingAddress is required with a textbook"))?;
            shipping_address.validate()?;

            Some(TextbookOrder {
                textbook_amount,
                shipping_address,
                delivery_status: None,
                tracking_number: None,
                tracking_carrier: None,
            })
        } else {
            None
        };

        let amount = self.course_amount
            + textbook
                .as_ref()
                .map(|t| t.textbook_amount)
                .unwrap_or(Decimal::ZERO);

        Ok(Order {
            order_id,
            user_id: user_id.to_string(),
            course_id: self.course_id.trim().to_string(),
            course_name: self.course_name.trim().to_string(),
            months: self.months,
            course_amount: self.course_amount,
            amount,
            depositor_name: self.depositor_name.trim().to_string(),
            status: OrderStatus::PendingPayment,
            deposit_confirmed: false,
            deposit_confirmed_at: None,
            created_at: now,
            paid_at: None,
            cancelled_at: None,
            textbook,
        })
    }
}

impl Order {
    pub fn has_textbook(&self) -> bool {
        self.textbook.is_some()
    }

    fn require_pending(&self, action: &str) -> Result<()> {
        if self.status != OrderStatus::PendingPayment {
            return Err(CourseError::invalid_state(format!(
                "cannot {} order {} in status {}",
                action,
                self.order_id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Mark the bank transfer as done. Returns `false` when it was already
    /// marked, leaving the original timestamp untouched.
    pub fn confirm_deposit(&mut self, now: DateTime<Utc>) -> Result<bool> {
        self.require_pending("confirm deposit for")?;
        if self.deposit_confirmed {
            return Ok(false);
        }
        self.deposit_confirmed = true;
        self.deposit_confirmed_at = Some(now);
        Ok(true)
    }

    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.require_pending("approve")?;
        self.status = OrderStatus::Paid;
        self.paid_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.require_pending("cancel")?;
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        Ok(())
    }

    fn shippable_textbook(&mut self) -> Result<&mut TextbookOrder> {
        if self.status != OrderStatus::Paid {
            return Err(CourseError::invalid_state(format!(
                "order {} is {}, delivery can only be tracked for PAID orders",
                self.order_id,
                self.status.as_str()
            )));
        }
        let order_id = self.order_id;
        self.textbook.as_mut().ok_or_else(|| {
            CourseError::invalid_state(format!("order {} has no textbook to deliver", order_id))
        })
    }

    pub fn set_delivery_status(&mut self, status: DeliveryStatus) -> Result<()> {
        self.shippable_textbook()?.delivery_status = Some(status);
        Ok(())
    }

    pub fn set_tracking(&mut self, tracking_number: &str, carrier: &str) -> Result<()> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(CourseError::validation("trackingNumber must not be blank"));
        }
        let textbook = self.shippable_textbook()?;
        textbook.tracking_number = Some(tracking_number.to_string());
        textbook.tracking_carrier = Some(carrier.trim().to_string()).filter(|c| !c.is_empty());
        Ok(())
    }
}
