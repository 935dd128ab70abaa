//! Order lifecycle integration tests: placement, deposit, approval and
//! the textbook delivery sub-flow.

mod common;

use common::{
    admin, drain, order_input, other_student, student, textbook_order_input, TestApp, COURSE_ID,
    STUDENT_ID,
};
use course_service::error::CourseError;
use course_service::models::{
    AccessStatus, DeliveryStatus, ListOrdersFilter, OrderStatus, SubscriptionStatus,
};
use course_service::services::{CourseEvent, CourseStore, RetryConfig};
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::test]
async fn create_order_starts_pending_with_course_amount() {
    let app = TestApp::new();

    let order = app
        .orders
        .create_order(&student(), {
            let mut input = order_input(3);
            input.course_amount = Decimal::new(300_000, 0);
            input
        })
        .await
        .unwrap();

    assert_eq!(order.amount, Decimal::new(300_000, 0));
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.user_id, STUDENT_ID);
    assert!(!order.deposit_confirmed);
    assert!(order.textbook.is_none());
    assert_eq!(order.created_at, app.now());
}

#[tokio::test]
async fn textbook_order_adds_textbook_amount() {
    let app = TestApp::new();

    let order = app
        .orders
        .create_order(&student(), textbook_order_input(6))
        .await
        .unwrap();

    assert_eq!(order.amount, Decimal::new(124_000, 0));
    let textbook = order.textbook.expect("textbook part");
    assert_eq!(textbook.textbook_amount, Decimal::new(25_000, 0));
    assert!(textbook.delivery_status.is_none());
}

#[tokio::test]
async fn invalid_orders_are_rejected_without_writes() {
    let app = TestApp::new();

    let mut missing_address = textbook_order_input(3);
    missing_address.shipping_address = None;
    let mut zero_months = order_input(0);
    zero_months.depositor_name = "Kim".to_string();
    let mut blank_depositor = order_input(3);
    blank_depositor.depositor_name = "   ".to_string();
    let mut negative = order_input(3);
    negative.course_amount = Decimal::new(-1, 0);

    for input in [missing_address, zero_months, blank_depositor, negative] {
        let err = app.orders.create_order(&student(), input).await.unwrap_err();
        assert!(
            matches!(err, CourseError::Validation(_) | CourseError::InvalidFields(_)),
            "unexpected error: {err:?}"
        );
    }

    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn deposit_then_approval_provisions_ready_subscription() {
    let app = TestApp::new();
    let order = app.deposited_order(3).await;
    assert!(order.deposit_confirmed);
    assert_eq!(order.deposit_confirmed_at, Some(app.now()));

    let approval = app.orders.approve_order(&admin(), order.order_id).await.unwrap();

    assert_eq!(approval.order.status, OrderStatus::Paid);
    assert_eq!(approval.order.paid_at, Some(app.now()));
    assert_eq!(approval.subscription.status, SubscriptionStatus::Ready);
    assert!(approval.subscription.approved);
    assert!(!approval.subscription.is_started);
    assert_eq!(approval.subscription.months, 3);
    assert_eq!(approval.subscription.order_id, Some(order.order_id));
    assert!(approval.subscription.end_date.is_none());

    let status = app.subscriptions.status(STUDENT_ID, COURSE_ID).await.unwrap();
    assert_eq!(status, AccessStatus::Ready);
}

#[tokio::test]
async fn repeated_deposit_confirmation_is_idempotent() {
    let app = TestApp::new();
    let order = app.deposited_order(3).await;
    let first_confirmed_at = order.deposit_confirmed_at;

    app.advance_days(1);
    let again = app
        .orders
        .confirm_deposit(&student(), order.order_id)
        .await
        .unwrap();

    assert!(again.already_requested);
    assert_eq!(again.order.deposit_confirmed_at, first_confirmed_at);
}

#[tokio::test]
async fn only_the_owner_may_confirm_a_deposit() {
    let app = TestApp::new();
    let order = app
        .orders
        .create_order(&student(), order_input(3))
        .await
        .unwrap();

    let err = app
        .orders
        .confirm_deposit(&other_student(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));

    let err = app
        .orders
        .confirm_deposit(&admin(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));
}

#[tokio::test]
async fn approving_twice_fails_and_keeps_the_first_approval() {
    let app = TestApp::new();
    let order = app.approved_order(3).await;
    let paid_at = order.paid_at;

    app.advance_days(2);
    let err = app
        .orders
        .approve_order(&admin(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::InvalidState(_)));

    let stored = app.orders.get_order(&admin(), order.order_id).await.unwrap();
    assert_eq!(stored.paid_at, paid_at);
}

#[tokio::test]
async fn students_cannot_approve_or_cancel() {
    let app = TestApp::new();
    let order = app.deposited_order(3).await;

    let err = app
        .orders
        .approve_order(&student(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));

    let err = app
        .orders
        .cancel_order(&student(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));

    let stored = app.orders.get_order(&student(), order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PendingPayment);
}

#[tokio::test]
async fn cancelling_a_paid_order_fails() {
    let app = TestApp::new();
    let order = app.approved_order(3).await;

    let err = app
        .orders
        .cancel_order(&admin(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::InvalidState(_)));

    let stored = app.orders.get_order(&admin(), order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert!(stored.cancelled_at.is_none());
}

#[tokio::test]
async fn cancelled_orders_are_terminal() {
    let app = TestApp::new();
    let order = app.deposited_order(3).await;

    let cancelled = app.orders.cancel_order(&admin(), order.order_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancelled_at, Some(app.now()));

    let err = app
        .orders
        .approve_order(&admin(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::InvalidState(_)));

    let err = app
        .orders
        .confirm_deposit(&student(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::InvalidState(_)));

    let status = app.subscriptions.status(STUDENT_ID, COURSE_ID).await.unwrap();
    assert_eq!(status, AccessStatus::None);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new();

    let err = app
        .orders
        .approve_order(&admin(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::NotFound { .. }));
}

#[tokio::test]
async fn approval_survives_transient_commit_conflicts() {
    let app = TestApp::with_retry(RetryConfig::immediate(3));
    let order = app.deposited_order(3).await;

    app.store.fail_next_commits(2);
    let approval = app.orders.approve_order(&admin(), order.order_id).await.unwrap();

    assert_eq!(approval.order.status, OrderStatus::Paid);
    let status = app.subscriptions.status(STUDENT_ID, COURSE_ID).await.unwrap();
    assert_eq!(status, AccessStatus::Ready);
}

#[tokio::test]
async fn failed_approval_leaves_order_and_account_untouched() {
    let app = TestApp::with_retry(RetryConfig::no_retry());
    let order = app.deposited_order(3).await;
    let mut events = app.events.subscribe();

    app.store.fail_next_commits(1);
    let err = app
        .orders
        .approve_order(&admin(), order.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::TransactionConflict { .. }));

    let stored = app.orders.get_order(&admin(), order.order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PendingPayment);
    assert!(stored.paid_at.is_none());
    assert!(app.store.get_account(STUDENT_ID).await.unwrap().is_none());
    assert!(drain(&mut events).is_empty());

    // A later attempt goes through cleanly.
    app.orders.approve_order(&admin(), order.order_id).await.unwrap();
    let status = app.subscriptions.status(STUDENT_ID, COURSE_ID).await.unwrap();
    assert_eq!(status, AccessStatus::Ready);
}

#[tokio::test]
async fn approval_replaces_an_existing_subscription() {
    let app = TestApp::new();
    app.approved_order(3).await;
    app.subscriptions.start_course(&student(), COURSE_ID).await.unwrap();
    app.advance_days(10);

    let second = app.approved_order(6).await;

    let account = app.store.get_account(STUDENT_ID).await.unwrap().unwrap();
    let subscription = account.subscription(COURSE_ID).unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Ready);
    assert_eq!(subscription.months, 6);
    assert_eq!(subscription.order_id, Some(second.order_id));
    assert!(subscription.end_date.is_none());
}

#[tokio::test]
async fn textbook_delivery_requires_paid_order() {
    let app = TestApp::new();
    let order = app
        .orders
        .create_order(&student(), textbook_order_input(3))
        .await
        .unwrap();

    let err = app
        .orders
        .update_delivery_status(&admin(), order.order_id, DeliveryStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::InvalidState(_)));

    app.orders.confirm_deposit(&student(), order.order_id).await.unwrap();
    app.orders.approve_order(&admin(), order.order_id).await.unwrap();

    let shipped = app
        .orders
        .update_delivery_status(&admin(), order.order_id, DeliveryStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(
        shipped.textbook.as_ref().and_then(|t| t.delivery_status),
        Some(DeliveryStatus::Shipped)
    );

    let tracked = app
        .orders
        .update_tracking_number(&admin(), order.order_id, " 6123-4567-8901 ", "CJ Logistics")
        .await
        .unwrap();
    let textbook = tracked.textbook.unwrap();
    assert_eq!(textbook.tracking_number.as_deref(), Some("6123-4567-8901"));
    assert_eq!(textbook.tracking_carrier.as_deref(), Some("CJ Logistics"));
}

#[tokio::test]
async fn delivery_updates_need_a_textbook_and_a_tracking_number() {
    let app = TestApp::new();
    let order = app.approved_order(3).await;

    let err = app
        .orders
        .update_delivery_status(&admin(), order.order_id, DeliveryStatus::Preparing)
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::InvalidState(_)));

    let err = app
        .orders
        .update_tracking_number(&admin(), order.order_id, "  ", "")
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Validation(_)));
}

#[tokio::test]
async fn students_list_only_their_own_orders() {
    let app = TestApp::new();
    app.deposited_order(3).await;
    app.orders
        .create_order(&other_student(), order_input(1))
        .await
        .unwrap();

    let mine = app
        .orders
        .list_orders(&student(), ListOrdersFilter::default())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine.iter().all(|o| o.user_id == STUDENT_ID));

    let err = app
        .orders
        .list_orders(
            &student(),
            ListOrdersFilter {
                user_id: Some(other_student().user_id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CourseError::Forbidden(_)));

    let everything = app
        .orders
        .list_orders(&admin(), ListOrdersFilter::default())
        .await
        .unwrap();
    assert_eq!(everything.len(), 2);

    assert_eq!(app.orders.pending_deposit_count(&admin()).await.unwrap(), 1);
    assert!(app.orders.pending_deposit_count(&student()).await.is_err());
}

#[tokio::test]
async fn committed_transitions_publish_events() {
    let app = TestApp::new();
    let mut events = app.events.subscribe();

    let order = app.approved_order(3).await;

    let names: Vec<&str> = drain(&mut events).iter().map(CourseEvent::name).collect();
    assert_eq!(
        names,
        vec!["order_created", "deposit_confirmation_requested", "order_approved"]
    );

    app.orders
        .confirm_deposit(&student(), order.order_id)
        .await
        .unwrap_err();
    assert!(drain(&mut events).is_empty());
}
