use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::CircuitState;

/// Upstream eSIM supplier and its persisted health.
///
/// The circuit-breaker fields are written only by [`crate::utils::CircuitBreaker`]
/// transitions applied through the store; configuration owns the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// Lower is tried first.
    pub priority: i32,
    pub is_active: bool,
    pub circuit_breaker_state: CircuitState,
    /// Smoothed success fraction in `0.0..=1.0`.
    pub success_rate: f64,
    pub consecutive_failures: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Set while a half-open probe is in flight.
    pub probe_started_at: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

impl Provider {
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            is_active: true,
            circuit_breaker_state: CircuitState::Closed,
            success_rate: 1.0,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_started_at: None,
            updated: Utc::now(),
        }
    }
}
