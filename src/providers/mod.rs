// ============================================================================
// Suppliers - upstream eSIM provisioning partners
// ============================================================================
//
// `SupplierClient` is the seam between the engine and a wholesale supplier's
// API. The registry pairs each client with its persisted `Provider` record
// (priority, breaker state) and decides which one gets the next attempt.
//
// ============================================================================

mod health;
mod http_client;
mod registry;

pub use health::{HealthReport, HealthStatus, ProviderHealth};
pub use http_client::HttpSupplierClient;
pub use registry::{ProviderRegistry, RegistryConfig, Selection};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::EsimArtifacts;
use crate::utils::{IsTransient, RetryConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseRequest {
    pub sku: String,
    pub quantity: i32,
    pub customer_email: String,
    /// Sent as the supplier-side idempotency key.
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// Provisioned synchronously.
    Completed {
        artifacts: EsimArtifacts,
        provider_order_id: Option<String>,
    },
    /// Provisioning continues out of band; a webhook will carry the result.
    Accepted { request_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimUsage {
    pub iccid: String,
    pub data_used_mb: f64,
    pub data_total_mb: f64,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SupplierError {
    /// 5xx or transport failure; worth another attempt.
    #[error("Transient supplier error: {0}")]
    Transient(String),
    /// 4xx such as out of stock or invalid SKU.
    #[error("Supplier rejected request: {0}")]
    Permanent(String),
    /// No answer in time; the purchase may or may not have happened.
    #[error("Supplier call timed out after {0:?}")]
    Timeout(Duration),
}

impl IsTransient for SupplierError {
    fn is_transient(&self) -> bool {
        matches!(self, SupplierError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Unknown supplier: {0}")]
    UnknownSupplier(String),
    #[error("Daily usage lookup limit reached for {0}")]
    QuotaExceeded(String),
    #[error(transparent)]
    Supplier(#[from] SupplierError),
}

#[async_trait]
pub trait SupplierClient: Send + Sync {
    async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseOutcome, SupplierError>;
    async fn get_sim_usage(&self, iccid: &str) -> Result<SimUsage, SupplierError>;
}

/// A supplier client plus the call budget it runs under.
#[derive(Clone)]
pub struct SupplierEntry {
    pub client: Arc<dyn SupplierClient>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl SupplierEntry {
    pub fn new(client: Arc<dyn SupplierClient>) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Supplier clients keyed by provider id.
#[derive(Clone, Default)]
pub struct SupplierDirectory {
    entries: HashMap<String, SupplierEntry>,
}

impl SupplierDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider_id: impl Into<String>, entry: SupplierEntry) {
        self.entries.insert(provider_id.into(), entry);
    }

    pub fn with(mut self, provider_id: impl Into<String>, entry: SupplierEntry) -> Self {
        self.insert(provider_id, entry);
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<&SupplierEntry> {
        self.entries.get(provider_id)
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.entries.contains_key(provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retried() {
        assert!(SupplierError::Transient("503".into()).is_transient());
        assert!(!SupplierError::Permanent("out of stock".into()).is_transient());
        assert!(!SupplierError::Timeout(Duration::from_secs(30)).is_transient());
    }
}
