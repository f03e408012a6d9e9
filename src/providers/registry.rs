use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::health::{HealthReport, ProviderHealth};
use super::{SimUsage, SupplierDirectory, SupplierEntry, UsageError};
use crate::domain::Provider;
use crate::metrics::Metrics;
use crate::store::{OrderStore, StoreError};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitState, DailyQuota, Transition, TtlCache};

// ============================================================================
// Provider Registry
// ============================================================================
//
// Ranks active providers by priority and gates each one through its circuit
// breaker. Breaker state lives on the Provider record, so every write goes
// through the store's atomic update and drops the cached provider list.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub breaker: CircuitBreakerConfig,
    pub provider_cache_ttl: Duration,
    pub usage_cache_ttl: Duration,
    /// `get_sim_usage` calls allowed per ICCID per UTC day
    pub usage_daily_limit: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            provider_cache_ttl: Duration::from_secs(30),
            usage_cache_ttl: Duration::from_secs(300),
            usage_daily_limit: 90,
        }
    }
}

/// The provider chosen for an attempt.
#[derive(Clone)]
pub struct Selection {
    pub provider: Provider,
    pub supplier: SupplierEntry,
    /// True when this attempt holds the half-open probe claim.
    pub probe: bool,
}

pub struct ProviderRegistry {
    store: Arc<dyn OrderStore>,
    breaker: CircuitBreaker,
    suppliers: SupplierDirectory,
    provider_cache: TtlCache<&'static str, Vec<Provider>>,
    usage_cache: TtlCache<String, SimUsage>,
    usage_quota: DailyQuota,
    metrics: Option<Arc<Metrics>>,
}

const PROVIDERS_KEY: &str = "providers";

impl ProviderRegistry {
    pub fn new(store: Arc<dyn OrderStore>, suppliers: SupplierDirectory, config: RegistryConfig) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::new(config.breaker),
            suppliers,
            provider_cache: TtlCache::new(config.provider_cache_ttl),
            usage_cache: TtlCache::new(config.usage_cache_ttl),
            usage_quota: DailyQuota::new(config.usage_daily_limit),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registers configured providers, keeping any persisted breaker state.
    pub async fn sync(&self, providers: &[Provider]) -> Result<(), StoreError> {
        for provider in providers {
            if !self.suppliers.contains(&provider.id) {
                tracing::warn!(provider = %provider.id, "Provider has no supplier client configured");
            }
            self.store.upsert_provider(provider).await?;
        }
        self.invalidate().await;
        tracing::info!(count = providers.len(), "Providers synchronized");
        Ok(())
    }

    pub async fn invalidate(&self) {
        self.provider_cache.invalidate(&PROVIDERS_KEY).await;
    }

    /// All providers ordered by priority, served from the cache when fresh.
    pub async fn providers(&self) -> Result<Vec<Provider>, StoreError> {
        if let Some(cached) = self.provider_cache.get(&PROVIDERS_KEY).await {
            return Ok(cached);
        }
        let providers = self.store.list_providers().await?;
        self.provider_cache.insert(PROVIDERS_KEY, providers.clone()).await;
        Ok(providers)
    }

    /// Highest-priority eligible provider, or `None` when every one is
    /// inactive, open, or has its half-open probe taken.
    pub async fn select(&self) -> Result<Option<Selection>, StoreError> {
        let now = Utc::now();

        for provider in self.providers().await? {
            if !provider.is_active {
                continue;
            }
            let Some(supplier) = self.suppliers.get(&provider.id) else {
                continue;
            };

            match self.breaker.effective_state(&provider, now) {
                CircuitState::Closed => {
                    return Ok(Some(Selection {
                        provider,
                        supplier: supplier.clone(),
                        probe: false,
                    }));
                }
                CircuitState::Open => {
                    tracing::debug!(provider = %provider.id, "Skipping provider with open circuit");
                }
                CircuitState::HalfOpen => match self.claim_probe(&provider.id).await {
                    Ok(claimed) => {
                        tracing::info!(provider = %provider.id, "Claimed half-open probe");
                        return Ok(Some(Selection {
                            probe: claimed.circuit_breaker_state == CircuitState::HalfOpen,
                            provider: claimed,
                            supplier: supplier.clone(),
                        }));
                    }
                    Err(StoreError::Circuit(e)) => {
                        tracing::debug!(provider = %provider.id, reason = %e, "Provider not available for probe");
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        Ok(None)
    }

    async fn claim_probe(&self, provider_id: &str) -> Result<Provider, StoreError> {
        let breaker = self.breaker.clone();
        let (tx, mut rx) = oneshot::channel();
        let result = self
            .store
            .update_provider(
                provider_id,
                Box::new(move |provider: &mut Provider| {
                    let now = Utc::now();
                    let transition = breaker.refresh(provider, now);
                    let claimed = breaker.claim_probe(provider, now);
                    let _ = tx.send(transition);
                    claimed.map_err(StoreError::from)
                }),
            )
            .await;
        // A rejected claim still observed the cooldown transition, but the
        // store discarded it along with the claim.
        if result.is_ok() {
            self.observe(provider_id, rx.try_recv().ok().flatten());
        }
        self.invalidate().await;
        result
    }

    pub async fn record_success(&self, provider_id: &str) -> Result<Option<Transition>, StoreError> {
        let breaker = self.breaker.clone();
        self.update_breaker(provider_id, move |provider| breaker.record_success(provider, Utc::now()))
            .await
    }

    pub async fn record_failure(&self, provider_id: &str) -> Result<Option<Transition>, StoreError> {
        let breaker = self.breaker.clone();
        self.update_breaker(provider_id, move |provider| breaker.record_failure(provider, Utc::now()))
            .await
    }

    /// Gives up a probe claim without judging the provider's health.
    pub async fn release_probe(&self, provider_id: &str) -> Result<(), StoreError> {
        self.update_breaker(provider_id, |provider| {
            provider.probe_started_at = None;
            None
        })
        .await?;
        Ok(())
    }

    pub async fn reset(&self, provider_id: &str) -> Result<Option<Transition>, StoreError> {
        let breaker = self.breaker.clone();
        self.update_breaker(provider_id, move |provider| breaker.reset(provider, Utc::now()))
            .await
    }

    async fn update_breaker<F>(&self, provider_id: &str, change: F) -> Result<Option<Transition>, StoreError>
    where
        F: FnOnce(&mut Provider) -> Option<Transition> + Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        self.store
            .update_provider(
                provider_id,
                Box::new(move |provider: &mut Provider| {
                    let _ = tx.send(change(provider));
                    Ok(())
                }),
            )
            .await?;
        self.invalidate().await;

        let transition = rx.try_recv().ok().flatten();
        self.observe(provider_id, transition);
        Ok(transition)
    }

    fn observe(&self, provider_id: &str, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        tracing::info!(
            provider = provider_id,
            from = %transition.from,
            to = %transition.to,
            "Circuit breaker transition"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_breaker_transition(provider_id, transition);
        }
    }

    /// Effective breaker state as of now, cooldown applied.
    pub async fn current_state(&self, provider_id: &str) -> Result<CircuitState, StoreError> {
        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("provider {provider_id}")))?;
        Ok(self.breaker.effective_state(&provider, Utc::now()))
    }

    pub async fn health(&self) -> Result<HealthReport, StoreError> {
        let now = Utc::now();
        let providers = self
            .store
            .list_providers()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| {
                let state = self.breaker.effective_state(&p, now);
                if let Some(metrics) = &self.metrics {
                    metrics.update_circuit_breaker_state(&p.id, state);
                }
                ProviderHealth {
                    state,
                    success_rate: p.success_rate,
                    consecutive_failures: p.consecutive_failures,
                    id: p.id,
                    name: p.name,
                }
            })
            .collect();
        Ok(HealthReport::from_providers(providers, now))
    }

    /// Usage for an ICCID, cached and capped per day since suppliers meter
    /// these lookups.
    pub async fn sim_usage(&self, provider_id: &str, iccid: &str) -> Result<SimUsage, UsageError> {
        let key = format!("{provider_id}:{iccid}");
        if let Some(cached) = self.usage_cache.get(&key).await {
            return Ok(cached);
        }

        let supplier = self
            .suppliers
            .get(provider_id)
            .ok_or_else(|| UsageError::UnknownSupplier(provider_id.to_string()))?;

        if !self.usage_quota.try_acquire(iccid).await {
            tracing::warn!(iccid = iccid, "SIM usage daily quota exhausted");
            return Err(UsageError::QuotaExceeded(iccid.to_string()));
        }

        let usage = supplier.client.get_sim_usage(iccid).await?;
        self.usage_cache.insert(key, usage.clone()).await;
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PurchaseOutcome, PurchaseRequest, SupplierClient, SupplierError};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UsageOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SupplierClient for UsageOnly {
        async fn purchase(&self, _request: &PurchaseRequest) -> Result<PurchaseOutcome, SupplierError> {
            Err(SupplierError::Permanent("not used".to_string()))
        }

        async fn get_sim_usage(&self, iccid: &str) -> Result<SimUsage, SupplierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SimUsage {
                iccid: iccid.to_string(),
                data_used_mb: 120.0,
                data_total_mb: 1024.0,
                expires_at: None,
            })
        }
    }

    fn registry(store: Arc<InMemoryStore>, config: RegistryConfig) -> (ProviderRegistry, Arc<UsageOnly>) {
        let client = Arc::new(UsageOnly {
            calls: AtomicUsize::new(0),
        });
        let suppliers = SupplierDirectory::new()
            .with("P1", SupplierEntry::new(client.clone()))
            .with("P2", SupplierEntry::new(client.clone()));
        (ProviderRegistry::new(store, suppliers, config), client)
    }

    #[tokio::test]
    async fn test_select_prefers_lowest_priority_closed() {
        let store = Arc::new(InMemoryStore::new());
        let (registry, _) = registry(store, RegistryConfig::default());
        registry
            .sync(&[Provider::new("P2", "Second", 2), Provider::new("P1", "First", 1)])
            .await
            .unwrap();

        let selection = registry.select().await.unwrap().unwrap();
        assert_eq!(selection.provider.id, "P1");
        assert!(!selection.probe);
    }

    #[tokio::test]
    async fn test_inactive_and_unconfigured_providers_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let (registry, _) = registry(store, RegistryConfig::default());
        let mut inactive = Provider::new("P1", "First", 1);
        inactive.is_active = false;
        registry
            .sync(&[inactive, Provider::new("P9", "Unknown", 2), Provider::new("P2", "Second", 3)])
            .await
            .unwrap();

        let selection = registry.select().await.unwrap().unwrap();
        assert_eq!(selection.provider.id, "P2");
    }

    #[tokio::test]
    async fn test_threshold_failures_open_the_circuit() {
        let store = Arc::new(InMemoryStore::new());
        let (registry, _) = registry(store, RegistryConfig::default());
        registry.sync(&[Provider::new("P1", "First", 1)]).await.unwrap();

        for _ in 0..4 {
            assert_eq!(registry.record_failure("P1").await.unwrap(), None);
        }
        let transition = registry.record_failure("P1").await.unwrap().unwrap();
        assert_eq!(transition.to, CircuitState::Open);
        assert_eq!(registry.current_state("P1").await.unwrap(), CircuitState::Open);
        assert!(registry.select().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_half_open_probe_is_single_flight() {
        let store = Arc::new(InMemoryStore::new());
        let config = RegistryConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(20),
                ..CircuitBreakerConfig::default()
            },
            ..RegistryConfig::default()
        };
        let (registry, _) = registry(store, config);
        registry.sync(&[Provider::new("P1", "First", 1)]).await.unwrap();
        registry.record_failure("P1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let first = registry.select().await.unwrap().unwrap();
        assert!(first.probe);
        assert!(registry.select().await.unwrap().is_none());

        let transition = registry.record_success("P1").await.unwrap().unwrap();
        assert_eq!(transition.to, CircuitState::Closed);
        assert!(!registry.select().await.unwrap().unwrap().probe);
    }

    #[tokio::test]
    async fn test_sim_usage_is_cached_and_rate_limited() {
        let store = Arc::new(InMemoryStore::new());
        let config = RegistryConfig {
            usage_daily_limit: 1,
            usage_cache_ttl: Duration::from_millis(10),
            ..RegistryConfig::default()
        };
        let (registry, client) = registry(store, config);

        registry.sim_usage("P1", "8982").await.unwrap();
        registry.sim_usage("P1", "8982").await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = registry.sim_usage("P1", "8982").await.unwrap_err();
        assert!(matches!(err, UsageError::QuotaExceeded(_)));
    }
}
