use serde::Serialize;

use super::{EngineError, FulfillmentOutcome, FulfillmentService};
use crate::domain::{steps, AutomationLog, Order, OrderCommand, OrderStatus};
use crate::payments::CancelRequest;
use crate::providers::SimUsage;
use crate::store::apply_command;

/// Order plus its audit trail, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub logs: Vec<AutomationLog>,
}

/// What a customer is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerStatus {
    pub order_id: String,
    pub status: &'static str,
}

impl FulfillmentService {
    async fn load(&self, order_id: &str) -> Result<Order, EngineError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }

    pub async fn order_details(&self, order_id: &str) -> Result<OrderDetails, EngineError> {
        let order = self.load(order_id).await?;
        let logs = self.store.list_logs(order_id).await?;
        Ok(OrderDetails { order, logs })
    }

    pub async fn customer_status(&self, order_id: &str) -> Result<CustomerStatus, EngineError> {
        let order = self.load(order_id).await?;
        Ok(CustomerStatus {
            order_id: order.id,
            status: order.status.customer_view(),
        })
    }

    /// Re-queues the order and immediately attempts it again.
    pub async fn retry_order(&self, order_id: &str, reason: Option<String>) -> Result<(Order, FulfillmentOutcome), EngineError> {
        let previous = self.load(order_id).await?;
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("retry requested from {}", previous.status));
        let command = OrderCommand::AdminRetry {
            reason: format!("Admin retry: {reason}"),
        };
        let requeued = apply_command(self.store.as_ref(), order_id, command).await?;

        self.log(
            AutomationLog::success(order_id, steps::ADMIN_RETRY)
                .with_metadata("previous_status", previous.status.as_str())
                .with_metadata("retry_count", requeued.retry_count)
                .with_metadata("reason", reason),
        )
        .await;
        tracing::info!(
            order_id = order_id,
            previous_status = %previous.status,
            retry_count = requeued.retry_count,
            "Order re-queued by admin"
        );

        let outcome = self.fulfill(order_id, "admin_retry").await?;
        let order = self.load(order_id).await?;
        Ok((order, outcome))
    }

    /// Hands a failed order to a human operator.
    pub async fn require_manual(&self, order_id: &str, reason: &str) -> Result<Order, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::InvalidRequest("reason is required".to_string()));
        }
        let command = OrderCommand::RequireManualFulfillment {
            reason: reason.to_string(),
        };
        let order = apply_command(self.store.as_ref(), order_id, command).await?;
        self.log(AutomationLog::success(order_id, steps::MANUAL_FULFILLMENT).with_metadata("reason", reason))
            .await;
        tracing::info!(order_id = order_id, "Order moved to manual fulfillment");
        Ok(order)
    }

    /// Cancels the charge at the gateway, then records the refund. Rejected
    /// refunds never reach the gateway.
    pub async fn refund_order(
        &self,
        order_id: &str,
        reason: Option<String>,
        amount: Option<i64>,
    ) -> Result<Order, EngineError> {
        let order = self.load(order_id).await?;
        let amount = amount.unwrap_or(order.amount);
        let command = OrderCommand::Refund { amount };

        let mut preview = order.clone();
        preview.apply(&command, chrono::Utc::now())?;

        let payment_key = order
            .payment_key
            .clone()
            .ok_or_else(|| EngineError::InvalidRequest("order has no payment key".to_string()))?;
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Refund requested by admin".to_string());

        let cancel = CancelRequest {
            payment_key,
            reason: reason.clone(),
            amount: (amount != order.amount).then_some(amount),
        };
        if let Err(e) = self.payments.cancel(&cancel).await {
            self.log(AutomationLog::failed(order_id, steps::REFUND, e.to_string()).with_metadata("amount", amount))
                .await;
            tracing::error!(order_id = order_id, error = %e, "Gateway refund failed");
            return Err(e.into());
        }

        let refunded = apply_command(self.store.as_ref(), order_id, command).await?;

        let mut log = AutomationLog::success(order_id, steps::REFUND)
            .with_metadata("amount", amount)
            .with_metadata("reason", reason)
            .with_metadata("previous_status", order.status.as_str());
        if let Some(iccid) = order.esim_iccid {
            log = log.with_metadata("revoked_iccid", iccid);
        }
        self.log(log).await;
        tracing::info!(order_id = order_id, amount = amount, status = %refunded.status, "Order refunded");

        Ok(refunded)
    }

    /// Data usage for a fulfilled order's eSIM.
    pub async fn sim_usage(&self, order_id: &str) -> Result<SimUsage, EngineError> {
        let order = self.load(order_id).await?;
        if !matches!(order.status, OrderStatus::Completed | OrderStatus::Delivered) {
            return Err(EngineError::InvalidRequest(format!("order is {}", order.status.customer_view())));
        }
        let (Some(provider_id), Some(iccid)) = (order.provider_used.as_deref(), order.esim_iccid.as_deref()) else {
            return Err(EngineError::InvalidRequest("order has no eSIM".to_string()));
        };
        Ok(self.registry.sim_usage(provider_id, iccid).await?)
    }
}
