use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{PurchaseOutcome, PurchaseRequest, SimUsage, SupplierClient, SupplierError};
use crate::domain::EsimArtifacts;

/// Generic JSON supplier API with bearer-key auth.
///
/// `POST {base}/orders` answers either with the provisioned profile or with
/// an acceptance carrying the `requestId` its webhook will reference.
pub struct HttpSupplierClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseResponse {
    status: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    iccid: Option<String>,
    #[serde(default)]
    activation_code: Option<String>,
    #[serde(default)]
    qr_code: Option<String>,
}

impl HttpSupplierClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, SupplierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupplierError::Permanent(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    fn classify(&self, error: reqwest::Error) -> SupplierError {
        if error.is_timeout() {
            SupplierError::Timeout(self.timeout)
        } else {
            SupplierError::Transient(error.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SupplierError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
        if status.is_server_error() || status.as_u16() == 429 {
            Err(SupplierError::Transient(message))
        } else {
            Err(SupplierError::Permanent(message))
        }
    }
}

fn interpret(response: PurchaseResponse) -> Result<PurchaseOutcome, SupplierError> {
    match response.status.as_str() {
        "completed" | "success" => {
            let artifacts = EsimArtifacts {
                iccid: response.iccid.unwrap_or_default(),
                activation_code: response.activation_code.unwrap_or_default(),
                qr_code: response.qr_code.unwrap_or_default(),
            };
            if !artifacts.is_usable() {
                return Err(SupplierError::Permanent(
                    "completed response is missing iccid or activation code".to_string(),
                ));
            }
            Ok(PurchaseOutcome::Completed {
                artifacts,
                provider_order_id: response.order_id,
            })
        }
        "accepted" | "processing" | "pending" => {
            let request_id = response
                .request_id
                .or(response.order_id)
                .ok_or_else(|| SupplierError::Permanent("accepted response without requestId".to_string()))?;
            Ok(PurchaseOutcome::Accepted { request_id })
        }
        other => Err(SupplierError::Permanent(format!("unexpected purchase status: {other}"))),
    }
}

#[async_trait]
impl SupplierClient for HttpSupplierClient {
    async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseOutcome, SupplierError> {
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.correlation_id)
            .json(&serde_json::json!({
                "sku": request.sku,
                "quantity": request.quantity,
                "email": request.customer_email,
                "correlationId": request.correlation_id,
            }))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let body: PurchaseResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SupplierError::Permanent(format!("malformed purchase response: {e}")))?;

        interpret(body)
    }

    async fn get_sim_usage(&self, iccid: &str) -> Result<SimUsage, SupplierError> {
        let response = self
            .client
            .get(format!("{}/sims/{}/usage", self.base_url, iccid))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SupplierError::Permanent(format!("malformed usage response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> PurchaseResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_completed_response_yields_artifacts() {
        let outcome = interpret(response(serde_json::json!({
            "status": "completed",
            "orderId": "sup-1",
            "iccid": "8982000000000000001",
            "activationCode": "LPA:1$smdp.example$ABC",
            "qrCode": "data:image/png;base64,AAA"
        })))
        .unwrap();

        match outcome {
            PurchaseOutcome::Completed { artifacts, provider_order_id } => {
                assert_eq!(artifacts.iccid, "8982000000000000001");
                assert_eq!(provider_order_id.as_deref(), Some("sup-1"));
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_accepted_response_yields_request_id() {
        let outcome = interpret(response(serde_json::json!({
            "status": "accepted",
            "requestId": "r-42"
        })))
        .unwrap();
        assert_eq!(outcome, PurchaseOutcome::Accepted { request_id: "r-42".to_string() });
    }

    #[test]
    fn test_completed_without_iccid_is_permanent() {
        let err = interpret(response(serde_json::json!({ "status": "completed" }))).unwrap_err();
        assert!(matches!(err, SupplierError::Permanent(_)));
    }
}
