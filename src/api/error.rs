use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::domain::OrderError;
use crate::fulfillment::EngineError;
use crate::payments::PaymentError;
use crate::providers::UsageError;
use crate::store::StoreError;
use crate::webhooks::ReconcileError;

/// HTTP-facing error. Internal failures are logged here and reach the caller
/// as an opaque 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Webhook(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn allowed_statuses(error: &OrderError) -> Option<Vec<&str>> {
    match error {
        OrderError::NotRetryable { allowed, .. } | OrderError::NotRefundable { allowed, .. } => {
            Some(allowed.split(", ").collect())
        }
        _ => None,
    }
}

impl ApiError {
    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Rejected(_) | EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                EngineError::Payment(PaymentError::Rejected(_)) => StatusCode::BAD_REQUEST,
                EngineError::Payment(PaymentError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
                EngineError::Payment(PaymentError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Usage(UsageError::QuotaExceeded(_)) => StatusCode::TOO_MANY_REQUESTS,
                EngineError::Usage(UsageError::UnknownSupplier(_)) => StatusCode::NOT_FOUND,
                EngineError::Usage(UsageError::Supplier(_)) => StatusCode::BAD_GATEWAY,
                EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Webhook(e) => match e {
                ReconcileError::UnknownSupplier(_) | ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
                ReconcileError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                ReconcileError::Malformed(_) | ReconcileError::Rejected(_) => StatusCode::BAD_REQUEST,
                ReconcileError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.is_internal() {
            tracing::error!(error = %self, "Request failed");
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "Internal server error",
            }));
        }

        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });
        if let ApiError::Engine(EngineError::Rejected(order_error)) = self {
            if let Some(allowed) = allowed_statuses(order_error) {
                body["allowedStatuses"] = json!(allowed);
            }
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}
