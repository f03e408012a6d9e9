use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::utils::CircuitState;

// ============================================================================
// Health derived from supplier circuit states
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub id: String,
    pub name: String,
    pub state: CircuitState,
    pub success_rate: f64,
    pub consecutive_failures: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub status: HealthStatus,
    pub providers: Vec<ProviderHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Only active providers count; an inactive one is neither usable nor failing.
    pub fn from_providers(providers: Vec<ProviderHealth>, checked_at: DateTime<Utc>) -> Self {
        let status = overall_status(&providers);
        Self {
            status,
            providers,
            checked_at,
        }
    }
}

fn overall_status(providers: &[ProviderHealth]) -> HealthStatus {
    if providers.is_empty() {
        return HealthStatus::Unhealthy("no active providers".to_string());
    }

    let usable = providers.iter().filter(|p| p.state != CircuitState::Open).count();
    let closed = providers.iter().filter(|p| p.state == CircuitState::Closed).count();

    if usable == 0 {
        HealthStatus::Unhealthy("every provider circuit is open".to_string())
    } else if closed < providers.len() {
        let impaired: Vec<&str> = providers
            .iter()
            .filter(|p| p.state != CircuitState::Closed)
            .map(|p| p.id.as_str())
            .collect();
        HealthStatus::Degraded(format!("impaired providers: {}", impaired.join(", ")))
    } else {
        HealthStatus::Healthy
    }
}
