use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{OrderFilter, OrderMutation, OrderStore, ProviderMutation, StoreError};
use crate::domain::{AutomationLog, Order, PendingAsyncOrder, PendingStatus, Provider};
use crate::utils::circuit_breaker::to_chrono;

/// Process-local store for tests and single-node development runs.
#[derive(Default)]
pub struct InMemoryStore {
    orders: Mutex<HashMap<String, Order>>,
    providers: Mutex<HashMap<String, Provider>>,
    pending: Mutex<Vec<PendingAsyncOrder>>,
    logs: Mutex<Vec<AutomationLog>>,
    locks: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    latency: Option<Duration>,
    pending_unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed delay before every operation to simulate a remote store.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Makes the correlation table fail, as an unreachable collection would.
    pub fn set_pending_unavailable(&self, unavailable: bool) {
        self.pending_unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_pending_available(&self) -> Result<(), StoreError> {
        if self.pending_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("pending_async_orders".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.delay().await;
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(format!("order {}", order.id)));
        }
        if orders.values().any(|o| o.correlation_id == order.correlation_id) {
            return Err(StoreError::Duplicate(format!("correlation_id {}", order.correlation_id)));
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        self.delay().await;
        Ok(self.orders.lock().await.get(id).cloned())
    }

    async fn update_order(&self, id: &str, mutation: OrderMutation) -> Result<Order, StoreError> {
        self.delay().await;
        let mut orders = self.orders.lock().await;
        let current = orders
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

        let mut updated = current.clone();
        mutation(&mut updated)?;
        orders.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        self.delay().await;
        let orders = self.orders.lock().await;
        let mut matched: Vec<Order> = orders.values().filter(|o| filter.matches(o)).cloned().collect();
        matched.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        self.delay().await;
        let mut providers = self.providers.lock().await;
        match providers.get_mut(&provider.id) {
            Some(existing) => {
                existing.name = provider.name.clone();
                existing.priority = provider.priority;
                existing.is_active = provider.is_active;
                existing.updated = Utc::now();
            }
            None => {
                providers.insert(provider.id.clone(), provider.clone());
            }
        }
        Ok(())
    }

    async fn get_provider(&self, id: &str) -> Result<Option<Provider>, StoreError> {
        self.delay().await;
        Ok(self.providers.lock().await.get(id).cloned())
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        self.delay().await;
        let mut providers: Vec<Provider> = self.providers.lock().await.values().cloned().collect();
        providers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(providers)
    }

    async fn update_provider(&self, id: &str, mutation: ProviderMutation) -> Result<Provider, StoreError> {
        self.delay().await;
        let mut providers = self.providers.lock().await;
        let current = providers
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("provider {id}")))?;

        let mut updated = current.clone();
        mutation(&mut updated)?;
        providers.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn insert_pending(&self, pending: &PendingAsyncOrder) -> Result<(), StoreError> {
        self.delay().await;
        self.check_pending_available()?;
        let mut records = self.pending.lock().await;
        let open = records
            .iter()
            .find(|p| p.request_id == pending.request_id && p.status == PendingStatus::Pending);
        match open {
            Some(existing) if existing.order_id == pending.order_id => Ok(()),
            Some(existing) => Err(StoreError::Duplicate(format!(
                "request {} is pending for order {}",
                existing.request_id, existing.order_id
            ))),
            None => {
                records.push(pending.clone());
                Ok(())
            }
        }
    }

    async fn find_pending(&self, request_id: &str) -> Result<Option<PendingAsyncOrder>, StoreError> {
        self.delay().await;
        self.check_pending_available()?;
        let records = self.pending.lock().await;
        let mut candidates: Vec<&PendingAsyncOrder> =
            records.iter().filter(|p| p.request_id == request_id).collect();
        candidates.sort_by_key(|p| (p.status == PendingStatus::Pending, p.created_at));
        Ok(candidates.last().map(|p| (*p).clone()))
    }

    async fn resolve_pending(&self, request_id: &str, status: PendingStatus) -> Result<bool, StoreError> {
        self.delay().await;
        self.check_pending_available()?;
        let mut records = self.pending.lock().await;
        match records
            .iter_mut()
            .find(|p| p.request_id == request_id && p.status == PendingStatus::Pending)
        {
            Some(record) => {
                record.status = status;
                record.resolved_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_log(&self, log: &AutomationLog) -> Result<(), StoreError> {
        self.delay().await;
        self.logs.lock().await.push(log.clone());
        Ok(())
    }

    async fn list_logs(&self, order_id: &str) -> Result<Vec<AutomationLog>, StoreError> {
        self.delay().await;
        Ok(self
            .logs
            .lock()
            .await
            .iter()
            .filter(|log| log.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn try_acquire_lock(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.delay().await;
        let now = Utc::now();
        let mut locks = self.locks.lock().await;
        if let Some((_, expires_at)) = locks.get(name) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        locks.insert(name.to_string(), (holder.to_string(), now + to_chrono(ttl)));
        Ok(true)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        self.delay().await;
        let mut locks = self.locks.lock().await;
        match locks.get(name) {
            Some((current, _)) if current == holder => {
                locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
