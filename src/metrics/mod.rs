// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

use crate::utils::{CircuitState, Transition};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Fulfillment attempts and their outcomes
// - Supplier call latency and retry attempts
// - Webhook reconciliation results
// - Stuck-order sweeps
// - Circuit breaker states and transitions
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Fulfillment Metrics
    pub fulfillment_attempts: IntCounterVec,
    pub fulfillment_outcomes: IntCounterVec,

    // Supplier Metrics
    pub provider_call_duration: HistogramVec,
    pub retry_attempts_total: IntCounterVec,

    // Reconciliation Metrics
    pub webhooks_received: IntCounterVec,

    // Sweeper Metrics
    pub sweeps_total: IntCounterVec,
    pub orders_reset: IntCounter,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let fulfillment_attempts = IntCounterVec::new(
            Opts::new("fulfillment_attempts_total", "Fulfillment attempts by trigger"),
            &["trigger"],
        )?;
        registry.register(Box::new(fulfillment_attempts.clone()))?;

        let fulfillment_outcomes = IntCounterVec::new(
            Opts::new("fulfillment_outcomes_total", "Fulfillment attempt outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(fulfillment_outcomes.clone()))?;

        let provider_call_duration = HistogramVec::new(
            HistogramOpts::new("provider_call_duration_seconds", "Supplier purchase call duration")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider", "result"],
        )?;
        registry.register(Box::new(provider_call_duration.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Supplier call attempts beyond the first"),
            &["provider"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let webhooks_received = IntCounterVec::new(
            Opts::new("webhooks_received_total", "Supplier webhooks by reconciliation result"),
            &["supplier", "result"],
        )?;
        registry.register(Box::new(webhooks_received.clone()))?;

        let sweeps_total = IntCounterVec::new(
            Opts::new("stuck_order_sweeps_total", "Stuck-order sweep runs"),
            &["result"],
        )?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let orders_reset = IntCounter::new("stuck_orders_reset_total", "Orders re-queued by the sweeper")?;
        registry.register(Box::new(orders_reset.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state per provider (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["provider"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["provider", "from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            fulfillment_attempts,
            fulfillment_outcomes,
            provider_call_duration,
            retry_attempts_total,
            webhooks_received,
            sweeps_total,
            orders_reset,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_attempt(&self, trigger: &str) {
        self.fulfillment_attempts.with_label_values(&[trigger]).inc();
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.fulfillment_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_provider_call(&self, provider: &str, result: &str, duration_secs: f64) {
        self.provider_call_duration
            .with_label_values(&[provider, result])
            .observe(duration_secs);
    }

    pub fn record_retry_attempt(&self, provider: &str) {
        self.retry_attempts_total.with_label_values(&[provider]).inc();
    }

    pub fn record_webhook(&self, supplier: &str, result: &str) {
        self.webhooks_received.with_label_values(&[supplier, result]).inc();
    }

    pub fn record_sweep(&self, result: &str, reset: usize) {
        self.sweeps_total.with_label_values(&[result]).inc();
        self.orders_reset.inc_by(reset as u64);
    }

    pub fn update_circuit_breaker_state(&self, provider: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[provider])
            .set(state.as_gauge());
    }

    /// Helper to record circuit breaker transition
    pub fn record_circuit_breaker_transition(&self, provider: &str, transition: Transition) {
        self.circuit_breaker_transitions
            .with_label_values(&[provider, transition.from.as_str(), transition.to.as_str()])
            .inc();
        self.update_circuit_breaker_state(provider, transition.to);
    }
}
