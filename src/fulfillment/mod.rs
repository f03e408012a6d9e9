mod admin;
mod orchestrator;

pub use admin::{CustomerStatus, OrderDetails};
pub use orchestrator::{BatchReport, FulfillmentOutcome, FulfillmentService, PaymentConfirmation};

use crate::domain::OrderError;
use crate::payments::PaymentError;
use crate::providers::UsageError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Rejected(OrderError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Rejected(e) => EngineError::Rejected(e),
            other => EngineError::Store(other),
        }
    }
}

impl From<OrderError> for EngineError {
    fn from(error: OrderError) -> Self {
        EngineError::Rejected(error)
    }
}
