//! Order lifecycle: PENDING_PAYMENT -> PAID | CANCELLED.
//!
//! Approval marks the order PAID and provisions a READY subscription on the
//! owner's account in a single store transaction.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CourseError, Result};
use crate::models::{
    Actor, CreateOrder, DeliveryStatus, ListOrdersFilter, Order, OrderStatus, Subscription,
    UserAccount,
};
use crate::services::clock::Clock;
use crate::services::events::{CourseEvent, EventBus};
use crate::services::metrics::record_order_transition;
use crate::services::retry::{retry_transaction, RetryConfig};
use crate::services::store::CourseStore;
use crate::services::track_failure;

/// Result of a deposit confirmation request.
#[derive(Debug, Clone)]
pub struct DepositConfirmation {
    pub order: Order,
    /// The deposit had already been marked before this call.
    pub already_requested: bool,
}

/// Result of approving an order.
#[derive(Debug, Clone)]
pub struct Approval {
    pub order: Order,
    pub subscription: Subscription,
}

pub struct OrderLifecycle<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    retry: RetryConfig,
}

impl<S> Clone for OrderLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: CourseStore> OrderLifecycle<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, events: EventBus, retry: RetryConfig) -> Self {
        Self {
            store,
            clock,
            events,
            retry,
        }
    }

    /// Place a PENDING_PAYMENT order owned by the caller.
    #[instrument(skip(self, input), fields(user_id = %actor.user_id, course_id = %input.course_id))]
    pub async fn create_order(&self, actor: &Actor, input: CreateOrder) -> Result<Order> {
        const OP: &str = "create_order";
        let now = self.clock.now();
        let order = input
            .into_order(Uuid::new_v4(), &actor.user_id, now)
            .inspect_err(track_failure(OP))?;

        self.store
            .insert_order(&order)
            .await
            .inspect_err(track_failure(OP))?;

        record_order_transition("created");
        info!(
            order_id = %order.order_id,
            amount = %order.amount,
            has_textbook = order.has_textbook(),
            "Order created"
        );
        self.events.publish(CourseEvent::OrderCreated {
            order_id: order.order_id,
            user_id: order.user_id.clone(),
            course_id: order.course_id.clone(),
            at: now,
        });

        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CourseError::not_found("order", order_id))?;
        actor.require_owner_or_admin(&order.user_id, "view this order")?;
        Ok(order)
    }

    /// Admins see every order; students only their own.
    #[instrument(skip(self, filter), fields(user_id = %actor.user_id))]
    pub async fn list_orders(&self, actor: &Actor, mut filter: ListOrdersFilter) -> Result<Vec<Order>> {
        if !actor.is_admin() {
            match filter.user_id.as_deref() {
                Some(user_id) if user_id != actor.user_id => {
                    return Err(CourseError::forbidden("students may only list their own orders"));
                }
                _ => filter.user_id = Some(actor.user_id.clone()),
            }
        }
        self.store.list_orders(&filter).await
    }

    /// Orders whose deposit was reported but which are not yet approved.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn pending_deposit_count(&self, actor: &Actor) -> Result<usize> {
        actor.require_admin("viewing pending deposits")?;
        let filter = ListOrdersFilter {
            status: Some(OrderStatus::PendingPayment),
            deposit_confirmed: Some(true),
            ..Default::default()
        };
        Ok(self.store.list_orders(&filter).await?.len())
    }

    /// Owner reports that the bank transfer has been made.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn confirm_deposit(&self, actor: &Actor, order_id: Uuid) -> Result<DepositConfirmation> {
        const OP: &str = "confirm_deposit";
        let now = self.clock.now();
        let mut mutate = |order: &mut Order| -> Result<bool> {
            actor.require_owner(&order.user_id, "confirm the deposit")?;
            order.confirm_deposit(now)
        };

        let (order, newly_requested) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_order(order_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        if newly_requested {
            record_order_transition("deposit_confirmed");
            info!(order_id = %order_id, "Deposit confirmation requested");
            self.events.publish(CourseEvent::DepositConfirmationRequested {
                order_id,
                user_id: order.user_id.clone(),
                depositor_name: order.depositor_name.clone(),
                at: now,
            });
        } else {
            info!(order_id = %order_id, "Deposit confirmation already requested");
        }

        Ok(DepositConfirmation {
            order,
            already_requested: !newly_requested,
        })
    }

    /// Mark the order PAID and grant a READY subscription for its course,
    /// replacing any subscription the user already holds for that course.
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn approve_order(&self, actor: &Actor, order_id: Uuid) -> Result<Approval> {
        const OP: &str = "approve_order";
        actor.require_admin("approving orders").inspect_err(track_failure(OP))?;

        let now = self.clock.now();
        let mut mutate = |order: &mut Order, account: &mut UserAccount| -> Result<Subscription> {
            order.approve(now)?;
            let subscription = Subscription::from_approved_order(order.order_id, order.months, now);
            account.put_subscription(&order.course_id, subscription.clone());
            Ok(subscription)
        };

        let (order, _, subscription) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_order_and_account(order_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        record_order_transition("approved");
        info!(
            order_id = %order_id,
            owner_id = %order.user_id,
            course_id = %order.course_id,
            months = order.months,
            "Order approved, subscription provisioned"
        );
        self.events.publish(CourseEvent::OrderApproved {
            order_id,
            user_id: order.user_id.clone(),
            course_id: order.course_id.clone(),
            months: order.months,
            at: now,
        });

        Ok(Approval {
            order,
            subscription,
        })
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn cancel_order(&self, actor: &Actor, order_id: Uuid) -> Result<Order> {
        const OP: &str = "cancel_order";
        actor.require_admin("cancelling orders").inspect_err(track_failure(OP))?;

        let now = self.clock.now();
        let mut mutate = |order: &mut Order| -> Result<()> { order.cancel(now) };
        let (order, ()) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_order(order_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        record_order_transition("cancelled");
        info!(order_id = %order_id, "Order cancelled");
        self.events.publish(CourseEvent::OrderCancelled {
            order_id,
            user_id: order.user_id.clone(),
            at: now,
        });

        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn update_delivery_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<Order> {
        const OP: &str = "update_delivery_status";
        actor.require_admin("updating deliveries").inspect_err(track_failure(OP))?;

        let mut mutate = |order: &mut Order| -> Result<()> { order.set_delivery_status(status) };
        let (order, ()) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_order(order_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        record_order_transition("delivery_updated");
        info!(order_id = %order_id, delivery_status = status.as_str(), "Delivery status updated");
        self.events.publish(CourseEvent::DeliveryStatusChanged {
            order_id,
            user_id: order.user_id.clone(),
            status,
        });

        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn update_tracking_number(
        &self,
        actor: &Actor,
        order_id: Uuid,
        tracking_number: &str,
        carrier: &str,
    ) -> Result<Order> {
        const OP: &str = "update_tracking_number";
        actor.require_admin("updating tracking numbers").inspect_err(track_failure(OP))?;

        let mut mutate =
            |order: &mut Order| -> Result<()> { order.set_tracking(tracking_number, carrier) };
        let (order, ()) = retry_transaction!(
            self.retry,
            OP,
            self.store.update_order(order_id, &mut mutate).await
        )
        .inspect_err(track_failure(OP))?;

        let textbook = order.textbook.as_ref();
        let tracking_number = textbook
            .and_then(|t| t.tracking_number.clone())
            .unwrap_or_default();
        let carrier = textbook.and_then(|t| t.tracking_carrier.clone());

        record_order_transition("tracking_updated");
        info!(order_id = %order_id, tracking_number = %tracking_number, "Tracking number updated");
        self.events.publish(CourseEvent::TrackingNumberUpdated {
            order_id,
            user_id: order.user_id.clone(),
            tracking_number,
            carrier,
        });

        Ok(order)
    }
}
