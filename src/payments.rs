use async_trait::async_trait;
use std::time::Duration;

// ============================================================================
// Payment gateway
// ============================================================================
//
// The gateway owns the money; the engine only asks it to confirm a charge at
// checkout and to cancel (fully or partially) on admin refund.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment gateway is not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub payment_key: String,
    pub reason: String,
    /// `None` cancels the whole charge.
    pub amount: Option<i64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm(&self, payment_key: &str, order_id: &str, amount: i64) -> Result<(), PaymentError>;
    async fn cancel(&self, request: &CancelRequest) -> Result<(), PaymentError>;
}

/// REST gateway using secret-key basic auth.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, secret_key: impl Into<String>) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), PaymentError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), text.trim());
        if status.is_server_error() {
            Err(PaymentError::Unavailable(message))
        } else {
            Err(PaymentError::Rejected(message))
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn confirm(&self, payment_key: &str, order_id: &str, amount: i64) -> Result<(), PaymentError> {
        self.post(
            "/v1/payments/confirm",
            serde_json::json!({
                "paymentKey": payment_key,
                "orderId": order_id,
                "amount": amount,
            }),
        )
        .await
    }

    async fn cancel(&self, request: &CancelRequest) -> Result<(), PaymentError> {
        let mut body = serde_json::json!({ "cancelReason": request.reason });
        if let Some(amount) = request.amount {
            body["cancelAmount"] = serde_json::json!(amount);
        }
        self.post(&format!("/v1/payments/{}/cancel", request.payment_key), body)
            .await
    }
}

/// Used when no gateway credentials are configured: confirmations are taken
/// as already settled upstream, and refunds are refused.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn confirm(&self, payment_key: &str, order_id: &str, _amount: i64) -> Result<(), PaymentError> {
        tracing::warn!(order_id = order_id, payment_key = payment_key, "Accepting payment without gateway confirmation");
        Ok(())
    }

    async fn cancel(&self, _request: &CancelRequest) -> Result<(), PaymentError> {
        Err(PaymentError::NotConfigured)
    }
}
