use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Order Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PaymentReceived,
    FulfillmentStarted,
    Completed,
    Delivered,
    ProviderFailed,
    Failed,
    PendingManualFulfillment,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::PaymentReceived,
        OrderStatus::FulfillmentStarted,
        OrderStatus::Completed,
        OrderStatus::Delivered,
        OrderStatus::ProviderFailed,
        OrderStatus::Failed,
        OrderStatus::PendingManualFulfillment,
        OrderStatus::Refunded,
        OrderStatus::PartiallyRefunded,
    ];

    /// States an admin retry may reset back to `pending`.
    pub const RETRYABLE: [OrderStatus; 5] = [
        OrderStatus::Failed,
        OrderStatus::ProviderFailed,
        OrderStatus::PendingManualFulfillment,
        OrderStatus::FulfillmentStarted,
        OrderStatus::PaymentReceived,
    ];

    /// States an admin refund may start from.
    pub const REFUNDABLE: [OrderStatus; 4] = [
        OrderStatus::Delivered,
        OrderStatus::PendingManualFulfillment,
        OrderStatus::ProviderFailed,
        OrderStatus::Failed,
    ];

    /// States the sweeper treats as in-flight work.
    pub const IN_FLIGHT: [OrderStatus; 2] = [
        OrderStatus::FulfillmentStarted,
        OrderStatus::PaymentReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaymentReceived => "payment_received",
            OrderStatus::FulfillmentStarted => "fulfillment_started",
            OrderStatus::Completed => "completed",
            OrderStatus::Delivered => "delivered",
            OrderStatus::ProviderFailed => "provider_failed",
            OrderStatus::Failed => "failed",
            OrderStatus::PendingManualFulfillment => "pending_manual_fulfillment",
            OrderStatus::Refunded => "refunded",
            OrderStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::ProviderFailed | OrderStatus::PendingManualFulfillment
        )
    }

    /// Fulfilled orders are the only ones carrying eSIM artifacts.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Delivered)
    }

    pub fn is_refund(&self) -> bool {
        matches!(self, OrderStatus::Refunded | OrderStatus::PartiallyRefunded)
    }

    /// Opaque status shown to end customers.
    pub fn customer_view(&self) -> &'static str {
        match self {
            OrderStatus::Completed | OrderStatus::Delivered => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded | OrderStatus::PartiallyRefunded => "refunded",
            _ => "processing",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Provisioning data handed back by a supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsimArtifacts {
    pub iccid: String,
    pub activation_code: String,
    pub qr_code: String,
}

impl EsimArtifacts {
    pub fn is_usable(&self) -> bool {
        !self.iccid.trim().is_empty() && !self.activation_code.trim().is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_forms_match_storage() {
        for status in OrderStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert!("maybe".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_customer_view_hides_internal_states() {
        assert_eq!(OrderStatus::ProviderFailed.customer_view(), "processing");
        assert_eq!(OrderStatus::PendingManualFulfillment.customer_view(), "processing");
        assert_eq!(OrderStatus::FulfillmentStarted.customer_view(), "processing");
        assert_eq!(OrderStatus::Delivered.customer_view(), "completed");
        assert_eq!(OrderStatus::Failed.customer_view(), "failed");
    }

    #[test]
    fn test_artifacts_usable_requires_iccid_and_code() {
        let artifacts = EsimArtifacts {
            iccid: "8982000000000000001".to_string(),
            activation_code: "LPA:1$smdp.example$ABC".to_string(),
            qr_code: String::new(),
        };
        assert!(artifacts.is_usable());

        let empty = EsimArtifacts {
            iccid: " ".to_string(),
            ..artifacts
        };
        assert!(!empty.is_usable());
    }
}
