// ============================================================================
// Order Store - durable records for the fulfillment engine
// ============================================================================
//
// Every component talks to persistence through `OrderStore`. Implementations
// must make `update_order` / `update_provider` atomic: the mutation runs
// against the freshest copy of the record and is persisted only if it returns
// Ok. That single guarantee is what keeps concurrent workers, webhooks and
// sweeps from double-processing an order.
//
// ============================================================================

mod in_memory;
mod lock;
mod postgres;

pub use in_memory::InMemoryStore;
pub use lock::{with_lock, LockGuard, LockOutcome};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::{
    AutomationLog, Order, OrderCommand, OrderError, OrderStatus, PaymentStatus, PendingAsyncOrder,
    PendingStatus, Provider,
};
use crate::utils::CircuitBreakerError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Rejected(#[from] OrderError),

    #[error(transparent)]
    Circuit(#[from] CircuitBreakerError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type OrderMutation = Box<dyn FnOnce(&mut Order) -> Result<(), StoreError> + Send>;
pub type ProviderMutation = Box<dyn FnOnce(&mut Provider) -> Result<(), StoreError> + Send>;

/// Equality and substring filter over orders. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub statuses: Vec<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub updated_before: Option<DateTime<Utc>>,
    pub correlation_contains: Option<String>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && self.payment_status.is_none_or(|status| order.payment_status == status)
            && self.updated_before.is_none_or(|cutoff| order.updated < cutoff)
            && self
                .correlation_contains
                .as_deref()
                .is_none_or(|needle| order.correlation_id.contains(needle))
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    // Orders
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError>;
    async fn update_order(&self, id: &str, mutation: OrderMutation) -> Result<Order, StoreError>;
    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    // Providers
    /// Creates the provider or updates its configuration fields (name,
    /// priority, is_active); breaker fields of an existing record are kept.
    async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError>;
    async fn get_provider(&self, id: &str) -> Result<Option<Provider>, StoreError>;
    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError>;
    async fn update_provider(&self, id: &str, mutation: ProviderMutation) -> Result<Provider, StoreError>;

    // Async correlation
    /// Fails with `Duplicate` when another order already holds a pending
    /// record for `request_id`; re-inserting for the same order is a no-op.
    async fn insert_pending(&self, pending: &PendingAsyncOrder) -> Result<(), StoreError>;
    /// Latest record for `request_id`, preferring one still pending.
    async fn find_pending(&self, request_id: &str) -> Result<Option<PendingAsyncOrder>, StoreError>;
    /// Moves a pending record to `status`; false if none was pending.
    async fn resolve_pending(&self, request_id: &str, status: PendingStatus) -> Result<bool, StoreError>;

    // Audit trail
    async fn append_log(&self, log: &AutomationLog) -> Result<(), StoreError>;
    async fn list_logs(&self, order_id: &str) -> Result<Vec<AutomationLog>, StoreError>;

    // Named locks
    /// Takes the lock if it is free or its previous holder's lease expired.
    async fn try_acquire_lock(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn release_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError>;
}

/// Runs a state-machine command inside the store's atomic update.
pub async fn apply_command(
    store: &dyn OrderStore,
    order_id: &str,
    command: OrderCommand,
) -> Result<Order, StoreError> {
    store
        .update_order(
            order_id,
            Box::new(move |order: &mut Order| order.apply(&command, Utc::now()).map_err(StoreError::from)),
        )
        .await
}
