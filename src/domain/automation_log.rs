use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// Automation Log - append-only audit trail
// ============================================================================
//
// One entry per fulfillment event, written once and never updated. The engine
// never reads these back; they exist for operators and post-mortems.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }
}

/// Step names recorded by the engine.
pub mod steps {
    pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";
    pub const PROVIDER_SELECTION: &str = "provider_selection";
    pub const PROVIDER_PURCHASE: &str = "provider_purchase";
    pub const ASYNC_ACCEPTED: &str = "async_accepted";
    pub const PROVIDER_TIMEOUT: &str = "provider_timeout";
    pub const WEBHOOK_COMPLETED: &str = "webhook_completed";
    pub const WEBHOOK_FAILED: &str = "webhook_failed";
    pub const CUSTOMER_NOTIFIED: &str = "customer_notified";
    pub const ADMIN_RETRY: &str = "admin_retry";
    pub const MANUAL_FULFILLMENT: &str = "manual_fulfillment";
    pub const REFUND: &str = "refund";
    pub const STUCK_ORDER_RESET: &str = "stuck_order_reset";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: String,
    pub order_id: String,
    pub step_name: String,
    pub status: LogStatus,
    pub provider_name: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AutomationLog {
    pub fn success(order_id: impl Into<String>, step_name: &str) -> Self {
        Self::new(order_id, step_name, LogStatus::Success)
    }

    pub fn failed(order_id: impl Into<String>, step_name: &str, error: impl Into<String>) -> Self {
        let mut log = Self::new(order_id, step_name, LogStatus::Failed);
        log.error_message = Some(error.into());
        log
    }

    fn new(order_id: impl Into<String>, step_name: &str, status: LogStatus) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            order_id: order_id.into(),
            step_name: step_name.to_string(),
            status,
            provider_name: None,
            error_message: None,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_name = Some(provider.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
