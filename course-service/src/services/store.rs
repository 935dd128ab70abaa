//! Storage seam between the lifecycle engines and persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ListOrdersFilter, Order, Progress, UserAccount};

/// Persistence for orders, user accounts and progress records.
///
/// The `update_*` methods are read-modify-write transactions: the store reads
/// and locks the current record(s), hands them to `f`, and persists the
/// mutated values only if `f` returns `Ok`. An `Err` from `f` leaves storage
/// untouched. A concurrent-modification abort surfaces as
/// `CourseError::TransactionConflict`; callers retry by invoking the method
/// again with the same closure, which then sees fresh state.
#[async_trait]
pub trait CourseStore: Send + Sync + 'static {
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;

    /// Orders matching `filter`, newest first.
    async fn list_orders(&self, filter: &ListOrdersFilter) -> Result<Vec<Order>>;

    async fn update_order<T, F>(&self, order_id: Uuid, f: F) -> Result<(Order, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Order) -> Result<T> + Send;

    /// Update an order together with its owner's account as one atomic unit.
    /// The owner's account is created empty if it does not exist yet.
    async fn update_order_and_account<T, F>(
        &self,
        order_id: Uuid,
        f: F,
    ) -> Result<(Order, UserAccount, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Order, &mut UserAccount) -> Result<T> + Send;

    async fn get_account(&self, user_id: &str) -> Result<Option<UserAccount>>;

    /// Update a user account, creating an empty one first if needed.
    async fn update_account<T, F>(&self, user_id: &str, f: F) -> Result<(UserAccount, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut UserAccount) -> Result<T> + Send;

    /// Insert `progress` unless a record with the same id exists. Returns the
    /// stored record and whether it was created by this call.
    async fn get_or_insert_progress(&self, progress: Progress) -> Result<(Progress, bool)>;

    async fn get_progress(&self, progress_id: &str) -> Result<Option<Progress>>;

    async fn list_progress(&self, user_id: &str, course_id: &str) -> Result<Vec<Progress>>;

    async fn update_progress<T, F>(&self, progress_id: &str, f: F) -> Result<(Progress, T)>
    where
        T: Send + 'static,
        F: FnMut(&mut Progress) -> Result<T> + Send;

    async fn health_check(&self) -> Result<()>;
}
