use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::domain::Provider;
use crate::providers::RegistryConfig;
use crate::sweeper::SweeperConfig;
use crate::utils::{CircuitBreakerConfig, RetryConfig};
use crate::webhooks::SignatureScheme;

// ============================================================================
// Configuration
// ============================================================================
//
// Everything comes from the environment (a `.env` file is loaded first when
// present). Supplier definitions live in a JSON file named by SUPPLIERS_FILE;
// their secrets are read from the environment variables the file names.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// development | staging | production
    pub environment: String,
    /// PostgreSQL connection URL; the in-memory store is used without one
    /// in development
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub http_port: u16,
    pub metrics_port: u16,
    /// Shared secret for the /cron endpoints (x-cron-secret)
    pub cron_secret: String,
    /// Token for the /admin endpoints (x-admin-token)
    pub admin_token: String,
    pub payment_gateway_url: Option<String>,
    pub payment_secret_key: Option<String>,
    /// Delivery webhook of the customer messaging service
    pub notify_webhook_url: Option<String>,
    pub breaker: CircuitBreakerConfig,
    pub sweeper: SweeperConfig,
    pub provider_cache_ttl: Duration,
    pub usage_cache_ttl: Duration,
    pub usage_daily_limit: u32,
    pub batch_size: usize,
    pub suppliers: Vec<SupplierConfig>,
}

/// One upstream supplier as declared in the suppliers file.
#[derive(Debug, Clone, Deserialize)]
pub struct SupplierConfig {
    pub id: String,
    pub name: String,
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Environment variable holding the webhook signing secret
    #[serde(default)]
    pub webhook_secret_env: Option<String>,
    #[serde(default)]
    pub signature_scheme: SignatureScheme,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl SupplierConfig {
    pub fn provider(&self) -> Provider {
        let mut provider = Provider::new(&self.id, &self.name, self.priority);
        provider.is_active = self.is_active;
        provider
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_attempts(self.max_attempts, Duration::from_millis(self.initial_backoff_ms))
    }

    pub fn api_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.api_key_env).with_context(|| format!("{} must be set for supplier {}", self.api_key_env, self.id))
    }

    pub fn webhook_secret(&self) -> anyhow::Result<Option<String>> {
        match &self.webhook_secret_env {
            Some(name) => std::env::var(name)
                .map(Some)
                .with_context(|| format!("{name} must be set for supplier {}", self.id)),
            None => Ok(None),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Secrets must be set outside development.
    fn require_secret(name: &str, environment: &str) -> anyhow::Result<String> {
        match env_opt(name) {
            Some(value) => Ok(value),
            None if environment == "development" => Ok(format!("dev-{name}-not-for-production")),
            None => bail!("{name} must be set in {environment} environment"),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        // A missing .env is normal in deployed environments.
        let _ = dotenvy::dotenv();

        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let database_url = env_opt("DATABASE_URL");
        if database_url.is_none() && environment != "development" {
            bail!("DATABASE_URL must be set in {environment} environment");
        }

        let suppliers = match env_opt("SUPPLIERS_FILE") {
            Some(path) => load_suppliers(Path::new(&path))?,
            None => {
                tracing::warn!("SUPPLIERS_FILE not set; no suppliers configured");
                Vec::new()
            }
        };

        let defaults = CircuitBreakerConfig::default();
        let breaker = CircuitBreakerConfig {
            failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", defaults.failure_threshold),
            cooldown: Duration::from_secs(env_or("BREAKER_COOLDOWN_SECS", defaults.cooldown.as_secs())),
            probe_timeout: Duration::from_secs(env_or("BREAKER_PROBE_TIMEOUT_SECS", defaults.probe_timeout.as_secs())),
            smoothing: env_or("BREAKER_SMOOTHING", defaults.smoothing),
        };
        if !(0.0..=1.0).contains(&breaker.smoothing) {
            bail!("BREAKER_SMOOTHING must be between 0 and 1");
        }

        let sweeper = SweeperConfig {
            stale_after: Duration::from_secs(env_or("SWEEP_STALE_AFTER_SECS", 300)),
            lock_ttl: Duration::from_secs(env_or("SWEEP_LOCK_TTL_SECS", 300)),
            batch_limit: env_or("SWEEP_BATCH_LIMIT", 100),
        };

        Ok(Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            http_port: env_or("HTTP_PORT", 8080),
            metrics_port: env_or("METRICS_PORT", 9090),
            cron_secret: Self::require_secret("CRON_SECRET", &environment)?,
            admin_token: Self::require_secret("ADMIN_TOKEN", &environment)?,
            payment_gateway_url: env_opt("PAYMENT_GATEWAY_URL"),
            payment_secret_key: env_opt("PAYMENT_SECRET_KEY"),
            notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
            breaker,
            sweeper,
            provider_cache_ttl: Duration::from_secs(env_or("PROVIDER_CACHE_TTL_SECS", 30)),
            usage_cache_ttl: Duration::from_secs(env_or("USAGE_CACHE_TTL_SECS", 300)),
            usage_daily_limit: env_or("USAGE_DAILY_LIMIT", 90),
            batch_size: env_or("PROCESS_BATCH_SIZE", 20),
            suppliers,
            environment,
        })
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            breaker: self.breaker.clone(),
            provider_cache_ttl: self.provider_cache_ttl,
            usage_cache_ttl: self.usage_cache_ttl,
            usage_daily_limit: self.usage_daily_limit,
        }
    }
}

pub fn load_suppliers(path: &Path) -> anyhow::Result<Vec<SupplierConfig>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_suppliers(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_suppliers(raw: &str) -> anyhow::Result<Vec<SupplierConfig>> {
    let suppliers: Vec<SupplierConfig> = serde_json::from_str(raw)?;
    let mut seen = std::collections::HashSet::new();
    for supplier in &suppliers {
        if !seen.insert(supplier.id.as_str()) {
            bail!("duplicate supplier id {}", supplier.id);
        }
    }
    Ok(suppliers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suppliers_with_defaults() {
        let suppliers = parse_suppliers(
            r#"[
                {"id": "P1", "name": "Alpha", "priority": 1, "base_url": "https://alpha.example",
                 "api_key_env": "ALPHA_KEY", "webhook_secret_env": "ALPHA_WEBHOOK", "signature_scheme": "timestamped"},
                {"id": "P2", "name": "Beta", "priority": 2, "base_url": "https://beta.example",
                 "api_key_env": "BETA_KEY", "is_active": false, "max_attempts": 5}
            ]"#,
        )
        .unwrap();

        assert_eq!(suppliers.len(), 2);
        assert_eq!(suppliers[0].signature_scheme, SignatureScheme::Timestamped);
        assert_eq!(suppliers[0].timeout(), Duration::from_secs(30));
        assert!(suppliers[0].provider().is_active);
        assert_eq!(suppliers[1].signature_scheme, SignatureScheme::Hex);
        assert!(!suppliers[1].provider().is_active);
        assert_eq!(suppliers[1].retry().max_attempts, 5);
    }

    #[test]
    fn test_duplicate_supplier_ids_rejected() {
        let err = parse_suppliers(
            r#"[
                {"id": "P1", "name": "A", "priority": 1, "base_url": "x", "api_key_env": "K"},
                {"id": "P1", "name": "B", "priority": 2, "base_url": "y", "api_key_env": "K"}
            ]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate supplier id"));
    }
}
