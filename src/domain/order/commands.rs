use chrono::{DateTime, Utc};

use super::value_objects::EsimArtifacts;

// ============================================================================
// Order Commands - State machine inputs
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    /// Payment gateway confirmed the charge.
    ConfirmPayment { payment_key: String },
    /// A worker claims the order before calling a supplier.
    StartFulfillment,
    /// Supplier accepted an async purchase; the order stays in flight.
    RecordSupplierOrder {
        provider_id: String,
        provider_order_id: String,
    },
    Complete {
        provider_id: String,
        provider_order_id: Option<String>,
        artifacts: EsimArtifacts,
    },
    /// Customer received the eSIM.
    MarkDelivered,
    /// Retryable supplier errors exhausted the retry budget.
    ProviderFail {
        provider_id: String,
        error: String,
    },
    Fail {
        provider_id: Option<String>,
        error: String,
    },
    RequireManualFulfillment { reason: String },
    AdminRetry { reason: String },
    /// Stuck-order recovery; leaves `retry_count` untouched. Rejected when the
    /// order changed at or after `stale_before`.
    SweepReset {
        reason: String,
        stale_before: DateTime<Utc>,
    },
    Refund { amount: i64 },
}

impl OrderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::ConfirmPayment { .. } => "confirm_payment",
            OrderCommand::StartFulfillment => "start_fulfillment",
            OrderCommand::RecordSupplierOrder { .. } => "record_supplier_order",
            OrderCommand::Complete { .. } => "complete",
            OrderCommand::MarkDelivered => "mark_delivered",
            OrderCommand::ProviderFail { .. } => "provider_fail",
            OrderCommand::Fail { .. } => "fail",
            OrderCommand::RequireManualFulfillment { .. } => "require_manual_fulfillment",
            OrderCommand::AdminRetry { .. } => "admin_retry",
            OrderCommand::SweepReset { .. } => "sweep_reset",
            OrderCommand::Refund { .. } => "refund",
        }
    }
}
