use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::OrderCommand;
use super::errors::{join_statuses, OrderError};
use super::value_objects::{EsimArtifacts, OrderStatus, PaymentStatus};

// ============================================================================
// Order - the unit of fulfillment work
// ============================================================================
//
// Every state change goes through `apply`, which validates the command against
// the current status before touching any field. Stores persist the result of
// `apply` inside a single atomic read-modify-write, so a rejected command never
// leaves a partially written order behind.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: String,
    pub correlation_id: String,

    // State
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_key: Option<String>,
    pub amount: i64,
    pub refunded_amount: i64,
    pub currency: String,

    // Customer
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,

    // Product
    pub product_sku: String,
    pub quantity: i32,

    // Supplier linkage
    pub provider_used: Option<String>,
    pub provider_order_id: Option<String>,

    // Fulfillment artifacts, only present once fulfilled
    pub esim_iccid: Option<String>,
    pub esim_activation_code: Option<String>,
    pub esim_qr_code: Option<String>,

    pub retry_count: i32,
    pub error_message: Option<String>,

    // Audit Trail
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for creating an order at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub amount: i64,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub product_sku: String,
    pub quantity: i32,
}

impl Order {
    pub fn new(input: NewOrder, now: DateTime<Utc>) -> Self {
        let id = format!("ord_{}", Uuid::now_v7().simple());
        Self::with_id(id, input, now)
    }

    pub fn with_id(id: impl Into<String>, input: NewOrder, now: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            correlation_id: correlation_token(&id),
            id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            payment_key: None,
            amount: input.amount,
            refunded_amount: 0,
            currency: input.currency,
            customer_name: input.customer_name,
            customer_email: input.customer_email,
            customer_phone: input.customer_phone,
            product_sku: input.product_sku,
            quantity: input.quantity,
            provider_used: None,
            provider_order_id: None,
            esim_iccid: None,
            esim_activation_code: None,
            esim_qr_code: None,
            retry_count: 0,
            error_message: None,
            created: now,
            updated: now,
            completed_at: None,
        }
    }

    /// Paid and not yet resolved: the states a supplier result may land on.
    pub fn awaiting_fulfillment(&self) -> bool {
        match self.status {
            OrderStatus::FulfillmentStarted | OrderStatus::PaymentReceived => true,
            OrderStatus::Pending => self.payment_status == PaymentStatus::Paid,
            _ => false,
        }
    }

    /// Whether a worker may claim this order for a new attempt.
    pub fn is_claimable(&self) -> bool {
        match self.status {
            OrderStatus::PaymentReceived => true,
            OrderStatus::Pending => self.payment_status == PaymentStatus::Paid,
            _ => false,
        }
    }

    pub fn has_artifacts(&self) -> bool {
        self.esim_iccid.is_some() || self.esim_activation_code.is_some() || self.esim_qr_code.is_some()
    }

    pub fn artifacts(&self) -> Option<EsimArtifacts> {
        Some(EsimArtifacts {
            iccid: self.esim_iccid.clone()?,
            activation_code: self.esim_activation_code.clone()?,
            qr_code: self.esim_qr_code.clone().unwrap_or_default(),
        })
    }

    /// Structural invariants every persisted order must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status.is_fulfilled() != self.has_artifacts() {
            return Err(format!(
                "artifacts present={} in status {}",
                self.has_artifacts(),
                self.status
            ));
        }
        if self.status.is_failure() && self.error_message.is_none() {
            return Err(format!("failure status {} without error message", self.status));
        }
        if (self.status.is_fulfilled() || self.status.is_refund()) && self.error_message.is_some() {
            return Err(format!("status {} carries an error message", self.status));
        }
        Ok(())
    }

    pub fn apply(&mut self, command: &OrderCommand, now: DateTime<Utc>) -> Result<(), OrderError> {
        let reject = |status| OrderError::InvalidStatusTransition {
            command: command.name(),
            status,
        };

        match command {
            OrderCommand::ConfirmPayment { payment_key } => {
                if self.status != OrderStatus::Pending || self.payment_status != PaymentStatus::Unpaid {
                    return Err(reject(self.status));
                }
                self.status = OrderStatus::PaymentReceived;
                self.payment_status = PaymentStatus::Paid;
                self.payment_key = Some(payment_key.clone());
            }

            OrderCommand::StartFulfillment => {
                if !self.is_claimable() {
                    return Err(reject(self.status));
                }
                self.status = OrderStatus::FulfillmentStarted;
            }

            OrderCommand::RecordSupplierOrder { provider_id, provider_order_id } => {
                if self.status != OrderStatus::FulfillmentStarted {
                    return Err(reject(self.status));
                }
                self.provider_used = Some(provider_id.clone());
                self.provider_order_id = Some(provider_order_id.clone());
            }

            OrderCommand::Complete { provider_id, provider_order_id, artifacts } => {
                if !self.awaiting_fulfillment() {
                    return Err(reject(self.status));
                }
                if !artifacts.is_usable() {
                    return Err(OrderError::UnusableArtifacts);
                }
                self.status = OrderStatus::Completed;
                self.provider_used = Some(provider_id.clone());
                if provider_order_id.is_some() {
                    self.provider_order_id = provider_order_id.clone();
                }
                self.esim_iccid = Some(artifacts.iccid.clone());
                self.esim_activation_code = Some(artifacts.activation_code.clone());
                self.esim_qr_code = Some(artifacts.qr_code.clone());
                self.error_message = None;
                self.completed_at = Some(now);
            }

            OrderCommand::MarkDelivered => {
                if self.status != OrderStatus::Completed {
                    return Err(reject(self.status));
                }
                self.status = OrderStatus::Delivered;
            }

            OrderCommand::ProviderFail { provider_id, error } => {
                if self.status != OrderStatus::FulfillmentStarted {
                    return Err(reject(self.status));
                }
                self.status = OrderStatus::ProviderFailed;
                self.provider_used = Some(provider_id.clone());
                self.error_message = Some(error.clone());
            }

            OrderCommand::Fail { provider_id, error } => {
                if !self.awaiting_fulfillment() {
                    return Err(reject(self.status));
                }
                self.status = OrderStatus::Failed;
                if provider_id.is_some() {
                    self.provider_used = provider_id.clone();
                }
                self.error_message = Some(error.clone());
            }

            OrderCommand::RequireManualFulfillment { reason } => {
                if !matches!(self.status, OrderStatus::Failed | OrderStatus::ProviderFailed) {
                    return Err(reject(self.status));
                }
                self.status = OrderStatus::PendingManualFulfillment;
                self.error_message = Some(reason.clone());
            }

            OrderCommand::AdminRetry { reason } => {
                if !OrderStatus::RETRYABLE.contains(&self.status) {
                    return Err(OrderError::NotRetryable {
                        status: self.status,
                        allowed: join_statuses(&OrderStatus::RETRYABLE),
                    });
                }
                self.status = OrderStatus::Pending;
                self.retry_count += 1;
                self.error_message = Some(reason.clone());
            }

            OrderCommand::SweepReset { reason, stale_before } => {
                if !OrderStatus::IN_FLIGHT.contains(&self.status) {
                    return Err(reject(self.status));
                }
                if self.updated >= *stale_before {
                    return Err(OrderError::NotStale {
                        updated: self.updated,
                        cutoff: *stale_before,
                    });
                }
                self.status = OrderStatus::Pending;
                self.error_message = Some(reason.clone());
            }

            OrderCommand::Refund { amount } => {
                if self.payment_status != PaymentStatus::Paid {
                    return Err(OrderError::NotPaid(self.payment_status));
                }
                if !OrderStatus::REFUNDABLE.contains(&self.status) {
                    return Err(OrderError::NotRefundable {
                        status: self.status,
                        allowed: join_statuses(&OrderStatus::REFUNDABLE),
                    });
                }
                if *amount <= 0 || *amount > self.amount {
                    return Err(OrderError::InvalidRefundAmount {
                        amount: *amount,
                        total: self.amount,
                    });
                }
                let full = *amount == self.amount;
                self.status = if full { OrderStatus::Refunded } else { OrderStatus::PartiallyRefunded };
                self.payment_status = if full { PaymentStatus::Refunded } else { PaymentStatus::PartiallyRefunded };
                self.refunded_amount = *amount;
                // A refunded eSIM is revoked; the automation log keeps the ICCID.
                self.esim_iccid = None;
                self.esim_activation_code = None;
                self.esim_qr_code = None;
                self.error_message = None;
            }
        }

        self.updated = now;
        Ok(())
    }
}

/// Idempotency token sent to suppliers for every attempt on an order.
pub fn correlation_token(order_id: &str) -> String {
    format!("ESIM-{order_id}")
}

// ============================================================================
// Unit Tests
// ============================================================================
