//! Test helper module for course-service integration tests.
//!
//! Engines run over the in-memory store and a manual clock so that expiry
//! scenarios are deterministic. `TestServer` serves the same state on a
//! random port for API tests. `TestDatabase` gives each PostgreSQL test its
//! own schema when `TEST_DATABASE_URL` is set.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use course_service::config::{CourseConfig, StoreConfig};
use course_service::models::{Actor, CreateOrder, Order, ShippingAddress};
use course_service::services::{
    init_metrics, Clock, CourseEvent, CourseStore, Database, EventBus, ManualClock, MemoryStore,
    OrderLifecycle, ProgressTracker, RetryConfig, SubscriptionLifecycle,
};
use course_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::broadcast;

pub const STUDENT_ID: &str = "student-1";
pub const OTHER_STUDENT_ID: &str = "student-2";
pub const ADMIN_ID: &str = "admin-1";
pub const COURSE_ID: &str = "rust-101";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn student() -> Actor {
    Actor::student(STUDENT_ID)
}

pub fn other_student() -> Actor {
    Actor::student(OTHER_STUDENT_ID)
}

pub fn admin() -> Actor {
    Actor::admin(ADMIN_ID)
}

pub fn test_config(retry: RetryConfig) -> CourseConfig {
    CourseConfig {
        common: CoreConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0, // Random port
        },
        service_name: "course-service".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        store: StoreConfig::Memory,
        transactions: retry,
        event_buffer_size: 64,
    }
}

pub fn order_input(months: i32) -> CreateOrder {
    CreateOrder {
        course_id: COURSE_ID.to_string(),
        course_name: "Rust for Beginners".to_string(),
        months,
        course_amount: Decimal::new(99_000, 0),
        depositor_name: "Kim Minsu".to_string(),
        has_textbook: false,
        textbook_amount: None,
        shipping_address: None,
    }
}

pub fn textbook_order_input(months: i32) -> CreateOrder {
    CreateOrder {
        has_textbook: true,
        textbook_amount: Some(Decimal::new(25_000, 0)),
        shipping_address: Some(ShippingAddress {
            recipient_name: "Kim Minsu".to_string(),
            phone: "010-1234-5678".to_string(),
            postal_code: "06236".to_string(),
            address: "123 Teheran-ro, Gangnam-gu".to_string(),
            address_detail: Some("Suite 501".to_string()),
        }),
        ..order_input(months)
    }
}

/// Engines wired over one shared store, clock and event bus.
pub struct TestApp<S = MemoryStore> {
    pub store: Arc<S>,
    pub clock: ManualClock,
    pub events: EventBus,
    pub orders: OrderLifecycle<S>,
    pub subscriptions: SubscriptionLifecycle<S>,
    pub progress: ProgressTracker<S>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_retry(RetryConfig::immediate(5))
    }

    pub fn with_retry(retry: RetryConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), retry)
    }
}

impl<S: CourseStore> TestApp<S> {
    pub fn with_store(store: Arc<S>, retry: RetryConfig) -> Self {
        init_metrics();
        let clock = ManualClock::new(start_time());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let events = EventBus::new(64);

        Self {
            orders: OrderLifecycle::new(
                Arc::clone(&store),
                Arc::clone(&shared_clock),
                events.clone(),
                retry.clone(),
            ),
            subscriptions: SubscriptionLifecycle::new(
                Arc::clone(&store),
                Arc::clone(&shared_clock),
                events.clone(),
                retry.clone(),
            ),
            progress: ProgressTracker::new(Arc::clone(&store), shared_clock, events.clone(), retry),
            store,
            clock,
            events,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    /// Place an order as the default student and report the deposit.
    pub async fn deposited_order(&self, months: i32) -> Order {
        let order = self
            .orders
            .create_order(&student(), order_input(months))
            .await
            .expect("Failed to create order");
        self.orders
            .confirm_deposit(&student(), order.order_id)
            .await
            .expect("Failed to confirm deposit")
            .order
    }

    /// Order, deposit and approval for the default student.
    pub async fn approved_order(&self, months: i32) -> Order {
        let order = self.deposited_order(months).await;
        self.orders
            .approve_order(&admin(), order.order_id)
            .await
            .expect("Failed to approve order")
            .order
    }
}

/// Collect every event already published on the receiver.
pub fn drain(receiver: &mut broadcast::Receiver<CourseEvent>) -> Vec<CourseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// HTTP server over an in-memory store, bound to a random local port.
pub struct TestServer {
    pub http_address: String,
    pub http_port: u16,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn spawn() -> Self {
        init_metrics();
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(start_time());

        let app = Application::build_with_store(
            test_config(RetryConfig::immediate(5)),
            Arc::clone(&store),
            Arc::new(clock.clone()),
        )
        .await
        .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        Self {
            http_address,
            http_port,
            clock,
            store,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub fn as_student(&self, builder: reqwest::RequestBuilder, user_id: &str) -> reqwest::RequestBuilder {
        builder
            .header("X-User-ID", user_id)
            .header("X-User-Role", "student")
    }

    pub fn as_admin(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-User-ID", ADMIN_ID)
            .header("X-User-Role", "admin")
    }
}

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// PostgreSQL URL for store tests. Those tests are skipped when unset.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_course_{}_{}", std::process::id(), counter)
}

/// A migrated schema of its own, plus a raw pool on it for assertions.
pub struct TestDatabase {
    pub store: Arc<Database>,
    pub pool: PgPool,
    base_url: String,
    schema_name: String,
}

impl TestDatabase {
    /// `None` when no test database is configured.
    pub async fn connect() -> Option<Self> {
        let Some(base_url) = get_test_database_url() else {
            eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL store test");
            return None;
        };
        let schema_name = unique_schema_name();

        let setup = PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&setup)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&setup)
            .await
            .expect("Failed to create test schema");
        setup.close().await;

        // Use ? or & depending on whether URL already has query parameters
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let store = Database::new(&url, 10, 1)
            .await
            .expect("Failed to create test database");
        store
            .run_migrations()
            .await
            .expect("Failed to run migrations");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("Failed to connect to test schema");

        Some(Self {
            store: Arc::new(store),
            pool,
            base_url,
            schema_name,
        })
    }

    pub fn app(&self) -> TestApp<Database> {
        TestApp::with_store(Arc::clone(&self.store), RetryConfig::immediate(10))
    }

    /// Drop the schema.
    pub async fn cleanup(&self) {
        self.pool.close().await;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
            .ok();

        if let Some(pool) = pool {
            let _ = sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await;
            pool.close().await;
        }
    }
}
