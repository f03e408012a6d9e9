use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::EngineError;
use crate::domain::{
    steps, AutomationLog, EsimArtifacts, NewOrder, Order, OrderCommand, OrderError, OrderStatus,
    PaymentStatus, PendingAsyncOrder,
};
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::payments::PaymentGateway;
use crate::providers::{ProviderRegistry, PurchaseOutcome, PurchaseRequest, Selection, SupplierError};
use crate::store::{apply_command, OrderFilter, OrderStore, StoreError};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Fulfillment Orchestrator
// ============================================================================
//
// One attempt per call: claim the order, pick a supplier, buy, record the
// result. Whatever the supplier says becomes a state transition plus one
// automation log entry. Errors from the store after the claim leave the order
// in `fulfillment_started`, where the sweeper will find it.
//
// ============================================================================

const NO_PROVIDER_ERROR: &str = "No eligible provider: every supplier is inactive or circuit-open";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    Completed { provider_id: String },
    /// Parked until the supplier's webhook arrives.
    Accepted { provider_id: String, request_id: String },
    ProviderFailed { provider_id: String, error: String },
    Failed { provider_id: Option<String>, error: String },
    /// Outcome unknown; left in flight for the sweeper.
    TimedOut { provider_id: String },
    /// Someone else holds the order, or it is not awaiting fulfillment.
    NotClaimed { status: OrderStatus },
}

impl FulfillmentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FulfillmentOutcome::Completed { .. } => "completed",
            FulfillmentOutcome::Accepted { .. } => "accepted",
            FulfillmentOutcome::ProviderFailed { .. } => "provider_failed",
            FulfillmentOutcome::Failed { .. } => "failed",
            FulfillmentOutcome::TimedOut { .. } => "timed_out",
            FulfillmentOutcome::NotClaimed { .. } => "not_claimed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentConfirmation {
    pub order: Order,
    /// `None` when the confirmation was a duplicate.
    pub outcome: Option<FulfillmentOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub completed: usize,
    pub accepted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct FulfillmentService {
    pub(super) store: Arc<dyn OrderStore>,
    pub(super) registry: Arc<ProviderRegistry>,
    pub(super) payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    metrics: Option<Arc<Metrics>>,
    batch_size: usize,
}

impl FulfillmentService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        registry: Arc<ProviderRegistry>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry,
            payments,
            notifier,
            metrics: None,
            batch_size: 20,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Checkout: persists a new unpaid order.
    pub async fn create_order(&self, input: NewOrder) -> Result<Order, EngineError> {
        if input.amount <= 0 || input.quantity <= 0 {
            return Err(EngineError::InvalidRequest("amount and quantity must be positive".to_string()));
        }
        if input.product_sku.trim().is_empty() || input.customer_email.trim().is_empty() {
            return Err(EngineError::InvalidRequest("product_sku and customer_email are required".to_string()));
        }
        let order = Order::new(input, chrono::Utc::now());
        self.store.insert_order(&order).await?;
        tracing::info!(order_id = %order.id, sku = %order.product_sku, "Order created");
        Ok(order)
    }

    /// Records a gateway-confirmed payment and starts fulfillment right away.
    pub async fn confirm_payment(
        &self,
        order_id: &str,
        payment_key: &str,
        amount: i64,
    ) -> Result<PaymentConfirmation, EngineError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;

        if order.payment_status != PaymentStatus::Unpaid {
            if order.payment_key.as_deref() == Some(payment_key) {
                tracing::info!(order_id = %order.id, "Duplicate payment confirmation ignored");
                return Ok(PaymentConfirmation { order, outcome: None });
            }
            return Err(OrderError::InvalidStatusTransition {
                command: "confirm_payment",
                status: order.status,
            }
            .into());
        }
        if amount != order.amount {
            return Err(EngineError::InvalidRequest(format!(
                "amount {amount} does not match order total {}",
                order.amount
            )));
        }

        if let Err(e) = self.payments.confirm(payment_key, order_id, amount).await {
            self.log(AutomationLog::failed(order_id, steps::PAYMENT_CONFIRMED, e.to_string()))
                .await;
            return Err(e.into());
        }

        let command = OrderCommand::ConfirmPayment {
            payment_key: payment_key.to_string(),
        };
        apply_command(self.store.as_ref(), order_id, command).await?;
        self.log(AutomationLog::success(order_id, steps::PAYMENT_CONFIRMED).with_metadata("amount", amount))
            .await;
        tracing::info!(order_id = order_id, amount = amount, "Payment confirmed");

        let outcome = self.fulfill(order_id, "payment").await?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;
        Ok(PaymentConfirmation {
            order,
            outcome: Some(outcome),
        })
    }

    /// Attempts every claimable order, oldest first, up to the batch size.
    pub async fn process_ready_orders(&self) -> Result<BatchReport, EngineError> {
        let filter = OrderFilter {
            statuses: vec![OrderStatus::PaymentReceived, OrderStatus::Pending],
            payment_status: Some(PaymentStatus::Paid),
            limit: Some(self.batch_size),
            ..Default::default()
        };
        let orders = self.store.find_orders(&filter).await?;
        let mut report = BatchReport::default();

        for order in orders {
            report.processed += 1;
            match self.fulfill(&order.id, "batch").await {
                Ok(FulfillmentOutcome::Completed { .. }) => report.completed += 1,
                Ok(FulfillmentOutcome::Accepted { .. }) => report.accepted += 1,
                Ok(FulfillmentOutcome::NotClaimed { .. }) => report.skipped += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(order_id = %order.id, error = %e, "Fulfillment attempt errored");
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            completed = report.completed,
            accepted = report.accepted,
            failed = report.failed,
            "Batch processing finished"
        );
        Ok(report)
    }

    /// One fulfillment attempt for `order_id`.
    pub async fn fulfill(&self, order_id: &str, trigger: &str) -> Result<FulfillmentOutcome, EngineError> {
        if let Some(metrics) = &self.metrics {
            metrics.record_attempt(trigger);
        }

        let order = match apply_command(self.store.as_ref(), order_id, OrderCommand::StartFulfillment).await {
            Ok(order) => order,
            Err(StoreError::Rejected(OrderError::InvalidStatusTransition { status, .. })) => {
                tracing::debug!(order_id = order_id, status = %status, "Order not claimable");
                return Ok(self.finish(FulfillmentOutcome::NotClaimed { status }));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(order_id = %order.id, trigger = trigger, "Order claimed for fulfillment");

        let Some(selection) = self.registry.select().await? else {
            return self.fail_without_provider(&order).await.map(|o| self.finish(o));
        };
        tracing::info!(
            order_id = %order.id,
            provider = %selection.provider.id,
            probe = selection.probe,
            "Provider selected"
        );

        let request = PurchaseRequest {
            sku: order.product_sku.clone(),
            quantity: order.quantity,
            customer_email: order.customer_email.clone(),
            correlation_id: order.correlation_id.clone(),
        };

        let outcome = match self.call_supplier(&selection, &request).await {
            RetryResult::Success(PurchaseOutcome::Completed {
                artifacts,
                provider_order_id,
            }) => self.complete(&order, &selection, artifacts, provider_order_id).await?,
            RetryResult::Success(PurchaseOutcome::Accepted { request_id }) => {
                self.park(&order, &selection, request_id).await?
            }
            RetryResult::Failed(error) => self.exhausted(&order, &selection, error).await?,
            RetryResult::PermanentFailure(SupplierError::Timeout(_)) => self.timed_out(&order, &selection).await,
            RetryResult::PermanentFailure(error) => self.rejected(&order, &selection, error).await?,
        };

        Ok(self.finish(outcome))
    }

    async fn call_supplier(
        &self,
        selection: &Selection,
        request: &PurchaseRequest,
    ) -> RetryResult<PurchaseOutcome, SupplierError> {
        let entry = &selection.supplier;
        let provider_id = selection.provider.id.as_str();
        // A half-open probe is a single attempt.
        let retry = if selection.probe {
            RetryConfig {
                max_attempts: 1,
                ..entry.retry.clone()
            }
        } else {
            entry.retry.clone()
        };
        let metrics = self.metrics.clone();

        retry_on_transient(retry, |attempt| {
            let metrics = metrics.clone();
            async move {
                if attempt > 1 {
                    if let Some(metrics) = &metrics {
                        metrics.record_retry_attempt(provider_id);
                    }
                    tracing::warn!(provider = provider_id, attempt = attempt, "Retrying supplier purchase");
                }

                let started = Instant::now();
                let result = match tokio::time::timeout(entry.timeout, entry.client.purchase(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(SupplierError::Timeout(entry.timeout)),
                };

                if let Some(metrics) = &metrics {
                    let label = match &result {
                        Ok(_) => "ok",
                        Err(SupplierError::Transient(_)) => "transient",
                        Err(SupplierError::Permanent(_)) => "permanent",
                        Err(SupplierError::Timeout(_)) => "timeout",
                    };
                    metrics.record_provider_call(provider_id, label, started.elapsed().as_secs_f64());
                }
                result
            }
        })
        .await
    }

    async fn complete(
        &self,
        order: &Order,
        selection: &Selection,
        artifacts: EsimArtifacts,
        provider_order_id: Option<String>,
    ) -> Result<FulfillmentOutcome, EngineError> {
        let provider = &selection.provider;
        let command = OrderCommand::Complete {
            provider_id: provider.id.clone(),
            provider_order_id: provider_order_id.clone(),
            artifacts: artifacts.clone(),
        };
        // The supplier answered; settle the breaker even if the order write loses a race.
        self.breaker_success(&provider.id).await;
        let updated = apply_command(self.store.as_ref(), &order.id, command).await?;

        let mut log = AutomationLog::success(&order.id, steps::PROVIDER_PURCHASE)
            .with_provider(&provider.name)
            .with_metadata("mode", "sync")
            .with_metadata("iccid", artifacts.iccid);
        if let Some(id) = provider_order_id {
            log = log.with_metadata("provider_order_id", id);
        }
        self.log(log).await;
        tracing::info!(order_id = %order.id, provider = %provider.id, "Order fulfilled");

        self.deliver(&updated).await;
        Ok(FulfillmentOutcome::Completed {
            provider_id: provider.id.clone(),
        })
    }

    async fn park(
        &self,
        order: &Order,
        selection: &Selection,
        request_id: String,
    ) -> Result<FulfillmentOutcome, EngineError> {
        let provider = &selection.provider;

        // The correlation-id fallback still finds the order if this write fails.
        let pending = PendingAsyncOrder::new(&request_id, &order.id, &provider.id);
        if let Err(e) = self.store.insert_pending(&pending).await {
            tracing::warn!(order_id = %order.id, request_id = %request_id, error = %e, "Failed to record pending async order");
        }

        let command = OrderCommand::RecordSupplierOrder {
            provider_id: provider.id.clone(),
            provider_order_id: request_id.clone(),
        };
        self.breaker_success(&provider.id).await;
        apply_command(self.store.as_ref(), &order.id, command).await?;

        self.log(
            AutomationLog::success(&order.id, steps::ASYNC_ACCEPTED)
                .with_provider(&provider.name)
                .with_metadata("request_id", request_id.clone()),
        )
        .await;
        tracing::info!(order_id = %order.id, request_id = %request_id, "Supplier accepted async order");

        Ok(FulfillmentOutcome::Accepted {
            provider_id: provider.id.clone(),
            request_id,
        })
    }

    async fn exhausted(
        &self,
        order: &Order,
        selection: &Selection,
        error: SupplierError,
    ) -> Result<FulfillmentOutcome, EngineError> {
        let provider = &selection.provider;
        let message = error.to_string();
        let command = OrderCommand::ProviderFail {
            provider_id: provider.id.clone(),
            error: message.clone(),
        };
        self.breaker_failure(&provider.id).await;
        apply_command(self.store.as_ref(), &order.id, command).await?;

        self.log(
            AutomationLog::failed(&order.id, steps::PROVIDER_PURCHASE, &message)
                .with_provider(&provider.name)
                .with_metadata("retryable", true),
        )
        .await;
        tracing::warn!(order_id = %order.id, provider = %provider.id, error = %message, "Supplier retries exhausted");

        Ok(FulfillmentOutcome::ProviderFailed {
            provider_id: provider.id.clone(),
            error: message,
        })
    }

    async fn timed_out(&self, order: &Order, selection: &Selection) -> FulfillmentOutcome {
        let provider = &selection.provider;
        self.breaker_failure(&provider.id).await;
        self.log(
            AutomationLog::failed(
                &order.id,
                steps::PROVIDER_TIMEOUT,
                format!("No response within {:?}; outcome unknown", selection.supplier.timeout),
            )
            .with_provider(&provider.name),
        )
        .await;
        tracing::warn!(order_id = %order.id, provider = %provider.id, "Supplier call timed out; leaving order for the sweeper");

        FulfillmentOutcome::TimedOut {
            provider_id: provider.id.clone(),
        }
    }

    async fn rejected(
        &self,
        order: &Order,
        selection: &Selection,
        error: SupplierError,
    ) -> Result<FulfillmentOutcome, EngineError> {
        let provider = &selection.provider;
        let message = error.to_string();
        let command = OrderCommand::Fail {
            provider_id: Some(provider.id.clone()),
            error: message.clone(),
        };
        // A rejection says nothing about supplier health.
        if selection.probe {
            if let Err(e) = self.registry.release_probe(&provider.id).await {
                tracing::warn!(provider = %provider.id, error = %e, "Failed to release probe claim");
            }
        }
        apply_command(self.store.as_ref(), &order.id, command).await?;

        self.log(
            AutomationLog::failed(&order.id, steps::PROVIDER_PURCHASE, &message)
                .with_provider(&provider.name)
                .with_metadata("retryable", false),
        )
        .await;
        tracing::warn!(order_id = %order.id, provider = %provider.id, error = %message, "Supplier rejected order");

        Ok(FulfillmentOutcome::Failed {
            provider_id: Some(provider.id.clone()),
            error: message,
        })
    }

    async fn fail_without_provider(&self, order: &Order) -> Result<FulfillmentOutcome, EngineError> {
        let command = OrderCommand::Fail {
            provider_id: None,
            error: NO_PROVIDER_ERROR.to_string(),
        };
        apply_command(self.store.as_ref(), &order.id, command).await?;
        self.log(AutomationLog::failed(&order.id, steps::PROVIDER_SELECTION, NO_PROVIDER_ERROR))
            .await;
        tracing::error!(order_id = %order.id, "No eligible provider for order");

        Ok(FulfillmentOutcome::Failed {
            provider_id: None,
            error: NO_PROVIDER_ERROR.to_string(),
        })
    }

    /// Sends the eSIM to the customer and marks the order delivered.
    /// Failures are logged and swallowed.
    pub async fn deliver(&self, order: &Order) {
        let channel = self.notifier.channel().to_string();
        match self.notifier.notify_fulfilled(order).await {
            Ok(()) => {
                if let Err(e) = apply_command(self.store.as_ref(), &order.id, OrderCommand::MarkDelivered).await {
                    tracing::warn!(order_id = %order.id, error = %e, "Customer notified but order not marked delivered");
                    return;
                }
                self.log(AutomationLog::success(&order.id, steps::CUSTOMER_NOTIFIED).with_metadata("channel", channel))
                    .await;
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Customer notification failed");
                self.log(
                    AutomationLog::failed(&order.id, steps::CUSTOMER_NOTIFIED, e.to_string())
                        .with_metadata("channel", channel),
                )
                .await;
            }
        }
    }

    pub(super) async fn log(&self, entry: AutomationLog) {
        if let Err(e) = self.store.append_log(&entry).await {
            tracing::error!(order_id = %entry.order_id, step = %entry.step_name, error = %e, "Failed to append automation log");
        }
    }

    async fn breaker_success(&self, provider_id: &str) {
        if let Err(e) = self.registry.record_success(provider_id).await {
            tracing::warn!(provider = provider_id, error = %e, "Failed to record provider success");
        }
    }

    async fn breaker_failure(&self, provider_id: &str) {
        if let Err(e) = self.registry.record_failure(provider_id).await {
            tracing::warn!(provider = provider_id, error = %e, "Failed to record provider failure");
        }
    }

    fn finish(&self, outcome: FulfillmentOutcome) -> FulfillmentOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(outcome.label());
        }
        outcome
    }
}
