use serde::Deserialize;

use crate::domain::EsimArtifacts;

/// Supplier callback body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookPayload {
    #[serde(alias = "requestId")]
    pub request_id: String,
    pub status: WebhookStatus,
    #[serde(default)]
    pub data: Option<WebhookData>,
    #[serde(default)]
    pub error: Option<WebhookError>,
}

/// Failure detail: suppliers send either a bare message or an object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WebhookError {
    Message(String),
    Detail {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default, alias = "activationCode")]
    pub activation_code: Option<String>,
    #[serde(default, alias = "qrCode")]
    pub qr_code: Option<String>,
    #[serde(default, alias = "orderId")]
    pub provider_order_id: Option<String>,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Artifacts carried by a completion, if complete enough to hand out.
    pub fn artifacts(&self) -> Option<EsimArtifacts> {
        let data = self.data.as_ref()?;
        let artifacts = EsimArtifacts {
            iccid: data.iccid.clone()?,
            activation_code: data.activation_code.clone()?,
            qr_code: data.qr_code.clone().unwrap_or_default(),
        };
        artifacts.is_usable().then_some(artifacts)
    }

    pub fn provider_order_id(&self) -> Option<String> {
        self.data.as_ref().and_then(|d| d.provider_order_id.clone())
    }

    pub fn error_message(&self) -> String {
        let message = match &self.error {
            Some(WebhookError::Message(message)) => Some(message),
            Some(WebhookError::Detail { message, code }) => message.as_ref().or(code.as_ref()),
            None => None,
        };
        message
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| "Supplier reported failure without details".to_string())
    }

    pub fn error_code(&self) -> Option<&str> {
        match &self.error {
            Some(WebhookError::Detail { code: Some(code), .. }) => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completed_with_camel_case_data() {
        let payload = WebhookPayload::parse(
            br#"{"requestId":"r-7","status":"completed","data":{"iccid":"8982","activationCode":"LPA:1$x$y"}}"#,
        )
        .unwrap();
        assert_eq!(payload.status, WebhookStatus::Completed);
        let artifacts = payload.artifacts().unwrap();
        assert_eq!(artifacts.iccid, "8982");
        assert_eq!(artifacts.qr_code, "");
    }

    #[test]
    fn test_completed_without_activation_code_has_no_artifacts() {
        let payload =
            WebhookPayload::parse(br#"{"request_id":"r-7","status":"completed","data":{"iccid":"8982"}}"#).unwrap();
        assert!(payload.artifacts().is_none());
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        assert!(WebhookPayload::parse(br#"{"request_id":"r-7","status":"maybe"}"#).is_err());
        assert!(WebhookPayload::parse(b"not json").is_err());
    }

    #[test]
    fn test_failure_error_object_carries_message() {
        let payload = WebhookPayload::parse(
            br#"{"request_id":"r-42","status":"failed","error":{"message":"stock_exhausted","code":"E409"}}"#,
        )
        .unwrap();
        assert_eq!(payload.error_message(), "stock_exhausted");
        assert_eq!(payload.error_code(), Some("E409"));

        let plain = WebhookPayload::parse(br#"{"request_id":"r-42","status":"failed","error":"sold out"}"#).unwrap();
        assert_eq!(plain.error_message(), "sold out");
        assert_eq!(plain.error_code(), None);
    }

    #[test]
    fn test_error_object_without_message_falls_back_to_code() {
        let payload =
            WebhookPayload::parse(br#"{"request_id":"r-42","status":"failed","error":{"code":"E500"}}"#).unwrap();
        assert_eq!(payload.error_message(), "E500");
    }

    #[test]
    fn test_failure_message_defaults() {
        let payload = WebhookPayload::parse(br#"{"request_id":"r-7","status":"failed"}"#).unwrap();
        assert_eq!(payload.error_message(), "Supplier reported failure without details");
    }
}
