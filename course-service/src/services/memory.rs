//! In-memory store with the same transactional contract as Postgres.
//!
//! A single `RwLock` serializes writers, so every `update_*` call observes the
//! latest committed state. Closures run on copies and their results are
//! written back only on success, which gives all-or-nothing commits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{CourseError, Result};
use crate::models::{ListOrdersFilter, Order, Progress, UserAccount};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::CourseStore;

#[derive(Debug, Default, Clone)]
struct State {
    orders: HashMap<Uuid, Order>,
    accounts: HashMap<String, UserAccount>,
    progress: HashMap<String, Progress>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    failing_commits: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the next `n` transactional commits with a conflict, after the
    /// closure has run but before anything is written.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Seed or overwrite an account directly, bypassing any transaction.
    pub async fn put_account(&self, account: UserAccount) {
        self.state
            .write()
            .await
            .accounts
            .insert(account.user_id.clone(), account);
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    fn check_commit(&self, operation: &str) -> Result<()> {
        let injected = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(operation, "Injected commit failure");
            return Err(CourseError::conflict(operation));
        }
        Ok(())
    }
}

#[async_trait]
impl CourseStore for MemoryStore {
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order"])
            .start_timer();
        self.state
            .write()
            .await
            .orders
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, filter: &ListOrdersFilter) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    #[instrument(skip(self, f))]
    async fn update_order<T, F>(&self, order_id: Uuid, mut f: F) -> Result<(Order, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Order) -> Result<T> + Send,
    {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_order"])
            .start_timer();
        let mut state = self.state.write().await;

        let mut order = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| CourseError::not_found("order", order_id))?;
        let value = f(&mut order)?;

        self.check_commit("update_order")?;
        state.orders.insert(order_id, order.clone());
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
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_order_and_account"])
            .start_timer();
        let mut state = self.state.write().await;

        let mut order = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| CourseError::not_found("order", order_id))?;
        let mut account = state
            .accounts
            .get(&order.user_id)
            .cloned()
            .unwrap_or_else(|| UserAccount::new(order.user_id.clone()));
        let value = f(&mut order, &mut account)?;

        self.check_commit("update_order_and_account")?;
        state.orders.insert(order_id, order.clone());
        state
            .accounts
            .insert(account.user_id.clone(), account.clone());
        Ok((order, account, value))
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<UserAccount>> {
        Ok(self.state.read().await.accounts.get(user_id).cloned())
    }

    #[instrument(skip(self, f))]
    async fn update_account<T, F>(&self, user_id: &str, mut f: F) -> Result<(UserAccount, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut UserAccount) -> Result<T> + Send,
    {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_account"])
            .start_timer();
        let mut state = self.state.write().await;

        let mut account = state
            .accounts
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserAccount::new(user_id));
        let value = f(&mut account)?;

        self.check_commit("update_account")?;
        state.accounts.insert(user_id.to_string(), account.clone());
        Ok((account, value))
    }

    #[instrument(skip(self, progress), fields(progress_id = %progress.id))]
    async fn get_or_insert_progress(&self, progress: Progress) -> Result<(Progress, bool)> {
        let mut state = self.state.write().await;
        let existing = state.progress.get(&progress.id).or_else(|| {
            state
                .progress
                .values()
                .find(|p| p.user_id == progress.user_id && p.chapter_id == progress.chapter_id)
        });
        if let Some(existing) = existing {
            return Ok((existing.clone(), false));
        }
        state.progress.insert(progress.id.clone(), progress.clone());
        Ok((progress, true))
    }

    async fn get_progress(&self, progress_id: &str) -> Result<Option<Progress>> {
        Ok(self.state.read().await.progress.get(progress_id).cloned())
    }

    async fn list_progress(&self, user_id: &str, course_id: &str) -> Result<Vec<Progress>> {
        let state = self.state.read().await;
        let mut records: Vec<Progress> = state
            .progress
            .values()
            .filter(|p| p.user_id == user_id && p.course_id == course_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.chapter_id.cmp(&b.chapter_id));
        Ok(records)
    }

    #[instrument(skip(self, f))]
    async fn update_progress<T, F>(&self, progress_id: &str, mut f: F) -> Result<(Progress, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Progress) -> Result<T> + Send,
    {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_progress"])
            .start_timer();
        let mut state = self.state.write().await;

        let mut progress = state
            .progress
            .get(progress_id)
            .cloned()
            .ok_or_else(|| CourseError::not_found("progress", progress_id))?;
        let value = f(&mut progress)?;

        self.check_commit("update_progress")?;
        state
            .progress
            .insert(progress_id.to_string(), progress.clone());
        Ok((progress, value))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
