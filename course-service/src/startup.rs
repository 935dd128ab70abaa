//! Application startup and lifecycle management.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::{CourseConfig, StoreConfig};
use crate::handlers;
use crate::services::{
    get_metrics, init_metrics, Clock, CourseStore, Database, EventBus, MemoryStore,
    OrderLifecycle, ProgressTracker, SubscriptionLifecycle, SystemClock,
};

/// Shared application state.
pub struct AppState<S> {
    pub config: CourseConfig,
    pub store: Arc<S>,
    pub orders: OrderLifecycle<S>,
    pub subscriptions: SubscriptionLifecycle<S>,
    pub progress: ProgressTracker<S>,
    pub events: EventBus,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            orders: self.orders.clone(),
            subscriptions: self.subscriptions.clone(),
            progress: self.progress.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: CourseStore> AppState<S> {
    pub fn new(config: CourseConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        let retry = config.transactions.clone();

        Self {
            orders: OrderLifecycle::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                events.clone(),
                retry.clone(),
            ),
            subscriptions: SubscriptionLifecycle::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                events.clone(),
                retry.clone(),
            ),
            progress: ProgressTracker::new(Arc::clone(&store), clock, events.clone(), retry),
            config,
            store,
            events,
        }
    }
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check<S: CourseStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check<S: CourseStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Build the HTTP router over any store.
pub fn router<S: CourseStore>(state: AppState<S>) -> Router {
    let api = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order::<S>).get(handlers::orders::list_orders::<S>),
        )
        .route(
            "/orders/pending-deposits",
            get(handlers::orders::pending_deposits::<S>),
        )
        .route("/orders/:id", get(handlers::orders::get_order::<S>))
        .route(
            "/orders/:id/deposit-confirmation",
            post(handlers::orders::confirm_deposit::<S>),
        )
        .route("/orders/:id/approve", post(handlers::orders::approve_order::<S>))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order::<S>))
        .route("/orders/:id/delivery", put(handlers::orders::update_delivery::<S>))
        .route("/orders/:id/tracking", put(handlers::orders::update_tracking::<S>))
        .route(
            "/users/:user_id/subscriptions",
            get(handlers::subscriptions::list_subscriptions::<S>),
        )
        .route(
            "/users/:user_id/courses/:course_id/access",
            get(handlers::subscriptions::course_access::<S>),
        )
        .route(
            "/users/:user_id/subscriptions/:course_id",
            axum::routing::delete(handlers::subscriptions::revoke_subscription::<S>),
        )
        .route(
            "/users/:user_id/subscriptions/:course_id/extend",
            post(handlers::subscriptions::extend_subscription::<S>),
        )
        .route(
            "/courses/:course_id/start",
            post(handlers::subscriptions::start_course::<S>),
        )
        .route(
            "/courses/:course_id/progress",
            get(handlers::progress::course_summary::<S>),
        )
        .route("/progress", post(handlers::progress::initialize::<S>))
        .route("/progress/:id", get(handlers::progress::get_progress::<S>))
        .route("/progress/:id/report", post(handlers::progress::report::<S>))
        .route("/progress/:id/complete", post(handlers::progress::complete::<S>))
        .route_layer(middleware::from_fn(metrics_middleware));

    Router::new()
        .route("/health", get(health_check::<S>))
        .route("/ready", get(readiness_check::<S>))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    router: Router,
    events: EventBus,
}

impl Application {
    /// Build the application with the configured store and the system clock.
    pub async fn build(config: CourseConfig) -> Result<Self, AppError> {
        init_metrics();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        match config.store.clone() {
            StoreConfig::Postgres(database) => {
                let db = Database::new(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;

                Self::build_with_store(config, Arc::new(db), clock).await
            }
            StoreConfig::Memory => {
                tracing::warn!("Using in-memory store, data is lost on shutdown");
                Self::build_with_store(config, Arc::new(MemoryStore::new()), clock).await
            }
        }
    }

    /// Build the application over an explicit store and clock.
    pub async fn build_with_store<S: CourseStore>(
        config: CourseConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();
        let state = AppState::new(config.clone(), store, clock);
        let events = state.events.clone();

        let http_addr = config.common.bind_address();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        Ok(Self {
            http_port,
            http_listener,
            router: router(state),
            events,
        })
    }

    /// Get the HTTP port the server is bound to.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Bus on which committed domain events are published.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Run the server until stopped.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        tracing::info!(
            service = "course-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, self.router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ManualClock, RetryConfig};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = CourseConfig {
            common: service_core::config::Config::default(),
            service_name: "course-service".to_string(),
            service_version: "test".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            store: StoreConfig::Memory,
            transactions: RetryConfig::no_retry(),
            event_buffer_size: 8,
        };
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
        );
        router(state)
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_require_a_caller() {
        let response = app()
            .oneshot(Request::get("/orders").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn static_segments_win_over_order_ids() {
        let response = app()
            .oneshot(
                Request::get("/orders/pending-deposits")
                    .header("x-user-id", "admin-1")
                    .header("x-user-role", "admin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
