use chrono::{DateTime, Utc};

use super::value_objects::{OrderStatus, PaymentStatus};

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Cannot {command} order in status: {status}")]
    InvalidStatusTransition {
        command: &'static str,
        status: OrderStatus,
    },

    #[error("Order status {status} does not allow retry (allowed: {allowed})")]
    NotRetryable { status: OrderStatus, allowed: String },

    #[error("Order status {status} does not allow refund (allowed: {allowed})")]
    NotRefundable { status: OrderStatus, allowed: String },

    #[error("Refund requires a paid order, payment status is {0}")]
    NotPaid(PaymentStatus),

    #[error("Invalid refund amount {amount} for order total {total}")]
    InvalidRefundAmount { amount: i64, total: i64 },

    #[error("Order changed at {updated}, after the staleness cutoff {cutoff}")]
    NotStale {
        updated: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },

    #[error("Supplier returned unusable provisioning data")]
    UnusableArtifacts,
}

pub(crate) fn join_statuses(statuses: &[OrderStatus]) -> String {
    statuses
        .iter()
        .map(OrderStatus::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
