use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::Provider;

// ============================================================================
// Circuit Breaker Pattern Implementation
// ============================================================================
//
// Tracks supplier health on the persisted Provider record so every invocation
// sees the same state. The breaker itself holds only configuration; callers
// run these transitions inside the store's atomic read-modify-write.
//
// States:
// - Closed: Normal operation, attempts pass through
// - Open: Too many consecutive failures, supplier skipped
// - HalfOpen: Cooldown elapsed, exactly one probe attempt allowed
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,     // Normal operation
    Open,       // Blocking attempts
    HalfOpen,   // Testing recovery
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding used by metrics (0=Closed, 1=Open, 2=HalfOpen).
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            other => Err(format!("unknown circuit state: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed
    pub cooldown: Duration,
    /// A probe claim older than this is considered abandoned
    pub probe_timeout: Duration,
    /// Weight of the newest outcome in `success_rate`
    pub smoothing: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(30),
            smoothing: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Half-open probe already in flight")]
    ProbeInFlight,
}

#[derive(Clone, Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// State as of `now`, with an expired cooldown read as HalfOpen.
    pub fn effective_state(&self, provider: &Provider, now: DateTime<Utc>) -> CircuitState {
        match provider.circuit_breaker_state {
            CircuitState::Open if self.cooldown_elapsed(provider, now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Persists the Open -> HalfOpen cooldown transition.
    pub fn refresh(&self, provider: &mut Provider, now: DateTime<Utc>) -> Option<Transition> {
        let effective = self.effective_state(provider, now);
        if effective == provider.circuit_breaker_state {
            return None;
        }
        tracing::info!(provider = %provider.id, "Circuit breaker transitioning to HalfOpen");
        self.set_state(provider, effective, now)
    }

    /// Reserve the attempt slot. Closed circuits need no reservation.
    pub fn claim_probe(&self, provider: &mut Provider, now: DateTime<Utc>) -> Result<(), CircuitBreakerError> {
        self.refresh(provider, now);
        match provider.circuit_breaker_state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(CircuitBreakerError::CircuitOpen),
            CircuitState::HalfOpen => {
                if self.probe_in_flight(provider, now) {
                    return Err(CircuitBreakerError::ProbeInFlight);
                }
                provider.probe_started_at = Some(now);
                provider.updated = now;
                Ok(())
            }
        }
    }

    pub fn record_success(&self, provider: &mut Provider, now: DateTime<Utc>) -> Option<Transition> {
        self.refresh(provider, now);

        provider.consecutive_failures = 0;
        provider.success_rate = self.smooth(provider.success_rate, 1.0);
        provider.probe_started_at = None;
        provider.updated = now;

        match provider.circuit_breaker_state {
            CircuitState::HalfOpen => {
                tracing::info!(provider = %provider.id, "Circuit breaker closing after successful probe");
                provider.last_failure_at = None;
                self.set_state(provider, CircuitState::Closed, now)
            }
            CircuitState::Closed => None,
            CircuitState::Open => {
                // A racing attempt started before the circuit opened.
                tracing::warn!(provider = %provider.id, "Success recorded while circuit is open");
                None
            }
        }
    }

    pub fn record_failure(&self, provider: &mut Provider, now: DateTime<Utc>) -> Option<Transition> {
        self.refresh(provider, now);

        provider.consecutive_failures += 1;
        provider.last_failure_at = Some(now);
        provider.success_rate = self.smooth(provider.success_rate, 0.0);
        provider.probe_started_at = None;
        provider.updated = now;

        match provider.circuit_breaker_state {
            CircuitState::Closed => {
                if provider.consecutive_failures >= self.config.failure_threshold as i32 {
                    tracing::warn!(
                        provider = %provider.id,
                        failures = provider.consecutive_failures,
                        "Circuit breaker opening"
                    );
                    self.set_state(provider, CircuitState::Open, now)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(provider = %provider.id, "Failure during half-open, reopening circuit");
                self.set_state(provider, CircuitState::Open, now)
            }
            CircuitState::Open => None,
        }
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self, provider: &mut Provider, now: DateTime<Utc>) -> Option<Transition> {
        tracing::info!(provider = %provider.id, "Circuit breaker manually reset");
        provider.consecutive_failures = 0;
        provider.last_failure_at = None;
        provider.probe_started_at = None;
        self.set_state(provider, CircuitState::Closed, now)
    }

    fn set_state(&self, provider: &mut Provider, to: CircuitState, now: DateTime<Utc>) -> Option<Transition> {
        let from = provider.circuit_breaker_state;
        provider.circuit_breaker_state = to;
        provider.updated = now;
        (from != to).then_some(Transition { from, to })
    }

    fn cooldown_elapsed(&self, provider: &Provider, now: DateTime<Utc>) -> bool {
        match provider.last_failure_at {
            Some(last_failure) => now - last_failure >= to_chrono(self.config.cooldown),
            None => true,
        }
    }

    fn probe_in_flight(&self, provider: &Provider, now: DateTime<Utc>) -> bool {
        provider
            .probe_started_at
            .is_some_and(|started| now - started < to_chrono(self.config.probe_timeout))
    }

    fn smooth(&self, current: f64, outcome: f64) -> f64 {
        let alpha = self.config.smoothing.clamp(0.0, 1.0);
        (current * (1.0 - alpha) + outcome * alpha).clamp(0.0, 1.0)
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}
