//! Postgres store for course-service.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{from_sqlx, CourseError, Result};
use crate::models::{
    DeliveryStatus, ListOrdersFilter, Order, OrderStatus, Progress, ShippingAddress,
    Subscription, TextbookOrder, UserAccount,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::CourseStore;

const ORDER_COLUMNS: &str = "order_id, user_id, course_id, course_name, months, course_amount, \
     amount, depositor_name, status, deposit_confirmed, deposit_confirmed_at, created_at, \
     paid_at, cancelled_at, has_textbook, textbook_amount, shipping_address, delivery_status, \
     tracking_number, tracking_carrier";

const PROGRESS_COLUMNS: &str = "id, user_id, course_id, chapter_id, is_completed, \
     watched_duration, total_duration, watched_percent, last_watched_at, created_at, updated_at";

#[derive(Debug, FromRow)]
struct OrderRow {
    order_id: Uuid,
    user_id: String,
    course_id: String,
    course_name: String,
    months: i32,
    course_amount: Decimal,
    amount: Decimal,
    depositor_name: String,
    status: String,
    deposit_confirmed: bool,
    deposit_confirmed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    has_textbook: bool,
    textbook_amount: Option<Decimal>,
    shipping_address: Option<Json<ShippingAddress>>,
    delivery_status: Option<String>,
    tracking_number: Option<String>,
    tracking_carrier: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = CourseError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let status = OrderStatus::from_string(&row.status).ok_or_else(|| {
            CourseError::Database(anyhow::anyhow!(
                "order {} has unknown status {}",
                row.order_id,
                row.status
            ))
        })?;

        let textbook = if row.has_textbook {
            let shipping_address = row.shipping_address.map(|j| j.0).ok_or_else(|| {
                CourseError::Database(anyhow::anyhow!(
                    "textbook order {} has no shipping address",
                    row.order_id
                ))
            })?;
            Some(TextbookOrder {
                textbook_amount: row.textbook_amount.unwrap_or(Decimal::ZERO),
                shipping_address,
                delivery_status: row
                    .delivery_status
                    .as_deref()
                    .and_then(DeliveryStatus::from_string),
                tracking_number: row.tracking_number,
                tracking_carrier: row.tracking_carrier,
            })
        } else {
            None
        };

        Ok(Order {
            order_id: row.order_id,
            user_id: row.user_id,
            course_id: row.course_id,
            course_name: row.course_name,
            months: row.months,
            course_amount: row.course_amount,
            amount: row.amount,
            depositor_name: row.depositor_name,
            status,
            deposit_confirmed: row.deposit_confirmed,
            deposit_confirmed_at: row.deposit_confirmed_at,
            created_at: row.created_at,
            paid_at: row.paid_at,
            cancelled_at: row.cancelled_at,
            textbook,
        })
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    user_id: String,
    course_subscriptions: Option<Json<BTreeMap<String, Subscription>>>,
    is_paid: bool,
    subscription_end_date: Option<DateTime<Utc>>,
}

impl From<AccountRow> for UserAccount {
    fn from(row: AccountRow) -> Self {
        UserAccount {
            user_id: row.user_id,
            course_subscriptions: row.course_subscriptions.map(|j| j.0),
            is_paid: row.is_paid,
            subscription_end_date: row.subscription_end_date,
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "course-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| from_sqlx(operation, e))
    }

    async fn lock_order(
        tx: &mut Transaction<'static, Postgres>,
        operation: &str,
        order_id: Uuid,
    ) -> Result<Order> {
        let sql = format!("SELECT {} FROM orders WHERE order_id = $1 FOR UPDATE", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| from_sqlx(operation, e))?
            .ok_or_else(|| CourseError::not_found("order", order_id))?;
        Order::try_from(row)
    }

    /// Lock the account row, creating an empty one first so there is always
    /// a row to lock.
    async fn lock_account(
        tx: &mut Transaction<'static, Postgres>,
        operation: &str,
        user_id: &str,
    ) -> Result<UserAccount> {
        sqlx::query("INSERT INTO user_accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| from_sqlx(operation, e))?;

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT user_id, course_subscriptions, is_paid, subscription_end_date
            FROM user_accounts WHERE user_id = $1 FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| from_sqlx(operation, e))?;
        Ok(row.into())
    }

    async fn write_order(
        tx: &mut Transaction<'static, Postgres>,
        operation: &str,
        order: &Order,
    ) -> Result<()> {
        let textbook = order.textbook.as_ref();
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, deposit_confirmed = $3, deposit_confirmed_at = $4, paid_at = $5,
                cancelled_at = $6, delivery_status = $7, tracking_number = $8,
                tracking_carrier = $9, updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order.order_id)
        .bind(order.status.as_str())
        .bind(order.deposit_confirmed)
        .bind(order.deposit_confirmed_at)
        .bind(order.paid_at)
        .bind(order.cancelled_at)
        .bind(textbook.and_then(|t| t.delivery_status).map(|s| s.as_str()))
        .bind(textbook.and_then(|t| t.tracking_number.clone()))
        .bind(textbook.and_then(|t| t.tracking_carrier.clone()))
        .execute(&mut **tx)
        .await
        .map_err(|e| from_sqlx(operation, e))?;
        Ok(())
    }

    async fn write_account(
        tx: &mut Transaction<'static, Postgres>,
        operation: &str,
        account: &UserAccount,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_accounts
            SET course_subscriptions = $2, is_paid = $3, subscription_end_date = $4, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(&account.user_id)
        .bind(account.course_subscriptions.as_ref().map(Json))
        .bind(account.is_paid)
        .bind(account.subscription_end_date)
        .execute(&mut **tx)
        .await
        .map_err(|e| from_sqlx(operation, e))?;
        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>, operation: &str) -> Result<()> {
        tx.commit().await.map_err(|e| from_sqlx(operation, e))
    }
}

#[async_trait]
impl CourseStore for Database {
    #[instrument(skip(self, order), fields(order_id = %order.order_id, user_id = %order.user_id))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order"])
            .start_timer();

        let textbook = order.textbook.as_ref();
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, course_id, course_name, months, course_amount,
                amount, depositor_name, status, deposit_confirmed, created_at, has_textbook,
                textbook_amount, shipping_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.order_id)
        .bind(&order.user_id)
        .bind(&order.course_id)
        .bind(&order.course_name)
        .bind(order.months)
        .bind(order.course_amount)
        .bind(order.amount)
        .bind(&order.depositor_name)
        .bind(order.status.as_str())
        .bind(order.deposit_confirmed)
        .bind(order.created_at)
        .bind(order.has_textbook())
        .bind(textbook.map(|t| t.textbook_amount))
        .bind(textbook.map(|t| Json(&t.shipping_address)))
        .execute(&self.pool)
        .await
        .map_err(|e| from_sqlx("insert_order", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let sql = format!("SELECT {} FROM orders WHERE order_id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| from_sqlx("get_order", e))?;

        timer.observe_duration();
        row.map(Order::try_from).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list_orders(&self, filter: &ListOrdersFilter) -> Result<Vec<Order>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_orders"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM orders
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::BOOLEAN IS NULL OR deposit_confirmed = $3)
            ORDER BY created_at DESC
            "#,
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(filter.user_id.as_deref())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.deposit_confirmed)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| from_sqlx("list_orders", e))?;

        timer.observe_duration();
        rows.into_iter().map(Order::try_from).collect()
    }

    #[instrument(skip(self, f))]
    async fn update_order<T, F>(&self, order_id: Uuid, mut f: F) -> Result<(Order, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Order) -> Result<T> + Send,
    {
        const OP: &str = "update_order";
        let timer = DB_QUERY_DURATION.with_label_values(&[OP]).start_timer();

        let mut tx = self.begin(OP).await?;
        let mut order = Self::lock_order(&mut tx, OP, order_id).await?;
        let value = f(&mut order)?;
        Self::write_order(&mut tx, OP, &order).await?;
        Self::commit(tx, OP).await?;

        timer.observe_duration();
        Ok((order, value))
    }

    #[instrument(skip(self, f))]
    async fn update_order_and_account<T, F>(
        &self,
        order_id: Uuid,
        mut f: F,
    ) -> Result<(Order, UserAccount, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Order, &mut UserAccount) -> Result<T> + Send,
    {
        const OP: &str = "update_order_and_account";
        let timer = DB_QUERY_DURATION.with_label_values(&[OP]).start_timer();

        // Lock order: order row, then account row.
        let mut tx = self.begin(OP).await?;
        let mut order = Self::lock_order(&mut tx, OP, order_id).await?;
        let mut account = Self::lock_account(&mut tx, OP, &order.user_id).await?;
        let value = f(&mut order, &mut account)?;
        Self::write_order(&mut tx, OP, &order).await?;
        Self::write_account(&mut tx, OP, &account).await?;
        Self::commit(tx, OP).await?;

        timer.observe_duration();
        Ok((order, account, value))
    }

    #[instrument(skip(self))]
    async fn get_account(&self, user_id: &str) -> Result<Option<UserAccount>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT user_id, course_subscriptions, is_paid, subscription_end_date
            FROM user_accounts WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| from_sqlx("get_account", e))?;

        timer.observe_duration();
        Ok(row.map(UserAccount::from))
    }

    #[instrument(skip(self, f))]
    async fn update_account<T, F>(&self, user_id: &str, mut f: F) -> Result<(UserAccount, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut UserAccount) -> Result<T> + Send,
    {
        const OP: &str = "update_account";
        let timer = DB_QUERY_DURATION.with_label_values(&[OP]).start_timer();

        let mut tx = self.begin(OP).await?;
        let mut account = Self::lock_account(&mut tx, OP, user_id).await?;
        let value = f(&mut account)?;
        Self::write_account(&mut tx, OP, &account).await?;
        Self::commit(tx, OP).await?;

        timer.observe_duration();
        Ok((account, value))
    }

    #[instrument(skip(self, progress), fields(progress_id = %progress.id))]
    async fn get_or_insert_progress(&self, progress: Progress) -> Result<(Progress, bool)> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_or_insert_progress"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO progress ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id, chapter_id) DO NOTHING
            RETURNING {cols}
            "#,
            cols = PROGRESS_COLUMNS
        );
        let inserted = sqlx::query_as::<_, Progress>(&sql)
            .bind(&progress.id)
            .bind(&progress.user_id)
            .bind(&progress.course_id)
            .bind(&progress.chapter_id)
            .bind(progress.is_completed)
            .bind(progress.watched_duration)
            .bind(progress.total_duration)
            .bind(progress.watched_percent)
            .bind(progress.last_watched_at)
            .bind(progress.created_at)
            .bind(progress.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| from_sqlx("get_or_insert_progress", e))?;

        let result = match inserted {
            Some(created) => (created, true),
            None => {
                let sql = format!(
                    "SELECT {} FROM progress WHERE user_id = $1 AND chapter_id = $2",
                    PROGRESS_COLUMNS
                );
                let existing = sqlx::query_as::<_, Progress>(&sql)
                    .bind(&progress.user_id)
                    .bind(&progress.chapter_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| from_sqlx("get_or_insert_progress", e))?
                    .ok_or_else(|| CourseError::not_found("progress", &progress.id))?;
                (existing, false)
            }
        };

        timer.observe_duration();
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn get_progress(&self, progress_id: &str) -> Result<Option<Progress>> {
        let sql = format!("SELECT {} FROM progress WHERE id = $1", PROGRESS_COLUMNS);
        sqlx::query_as::<_, Progress>(&sql)
            .bind(progress_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| from_sqlx("get_progress", e))
    }

    #[instrument(skip(self))]
    async fn list_progress(&self, user_id: &str, course_id: &str) -> Result<Vec<Progress>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_progress"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM progress WHERE user_id = $1 AND course_id = $2 ORDER BY chapter_id",
            PROGRESS_COLUMNS
        );
        let records = sqlx::query_as::<_, Progress>(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| from_sqlx("list_progress", e))?;

        timer.observe_duration();
        Ok(records)
    }

    #[instrument(skip(self, f))]
    async fn update_progress<T, F>(&self, progress_id: &str, mut f: F) -> Result<(Progress, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Progress) -> Result<T> + Send,
    {
        const OP: &str = "update_progress";
        let timer = DB_QUERY_DURATION.with_label_values(&[OP]).start_timer();

        let mut tx = self.begin(OP).await?;
        let sql = format!("SELECT {} FROM progress WHERE id = $1 FOR UPDATE", PROGRESS_COLUMNS);
        let mut progress = sqlx::query_as::<_, Progress>(&sql)
            .bind(progress_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| from_sqlx(OP, e))?
            .ok_or_else(|| CourseError::not_found("progress", progress_id))?;

        let value = f(&mut progress)?;

        sqlx::query(
            r#"
            UPDATE progress
            SET is_completed = $2, watched_duration = $3, total_duration = $4,
                watched_percent = $5, last_watched_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(&progress.id)
        .bind(progress.is_completed)
        .bind(progress.watched_duration)
        .bind(progress.total_duration)
        .bind(progress.watched_percent)
        .bind(progress.last_watched_at)
        .bind(progress.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| from_sqlx(OP, e))?;
        Self::commit(tx, OP).await?;

        timer.observe_duration();
        Ok((progress, value))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| from_sqlx("health_check", e))?;

        timer.observe_duration();
        Ok(())
    }
}
