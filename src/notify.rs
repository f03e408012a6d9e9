use async_trait::async_trait;
use std::time::Duration;

use crate::domain::Order;
use crate::utils::{retry_with_backoff, RetryConfig};

// ============================================================================
// Customer notification
// ============================================================================
//
// Best effort. A failed notification is logged by the caller and never moves
// the order backwards; a successful one marks the order delivered.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name recorded in the automation log.
    fn channel(&self) -> &str;
    async fn notify_fulfilled(&self, order: &Order) -> Result<(), NotifyError>;
}

/// Writes the notification to the log only; for local runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &str {
        "log"
    }

    async fn notify_fulfilled(&self, order: &Order) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %order.id,
            email = %order.customer_email,
            iccid = order.esim_iccid.as_deref().unwrap_or_default(),
            "eSIM ready for customer"
        );
        Ok(())
    }
}

/// Posts the delivery payload to a messaging service webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            retry: RetryConfig::conservative(),
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError(format!("HTTP {}", response.status().as_u16())))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn notify_fulfilled(&self, order: &Order) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "orderId": order.id,
            "customerName": order.customer_name,
            "email": order.customer_email,
            "phone": order.customer_phone,
            "productSku": order.product_sku,
            "iccid": order.esim_iccid,
            "activationCode": order.esim_activation_code,
            "qrCode": order.esim_qr_code,
        });

        retry_with_backoff(self.retry.clone(), |_attempt| self.send(&body))
            .await
            .into_result()
    }
}
