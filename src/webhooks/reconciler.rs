use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::payload::{WebhookPayload, WebhookStatus};
use super::signature::{verify_signature, SignatureError, SignatureScheme};
use crate::domain::{steps, AutomationLog, Order, OrderCommand, OrderError, PendingStatus};
use crate::fulfillment::FulfillmentService;
use crate::metrics::Metrics;
use crate::store::{apply_command, OrderFilter, OrderStore, StoreError};

// ============================================================================
// Webhook Reconciler
// ============================================================================
//
// Resolves an async supplier callback to its order in two steps: the pending
// correlation record for the request id, then a substring match against the
// orders' correlation ids. The second step runs when the first finds nothing
// or its table is unreachable. Callbacks for orders that already left the
// in-flight states are acknowledged without touching anything.
//
// ============================================================================

/// Shorter tokens match too many correlation ids to be trusted.
pub const MIN_FALLBACK_TOKEN_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct WebhookSecret {
    pub scheme: SignatureScheme,
    pub secret: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Unknown supplier: {0}")]
    UnknownSupplier(String),
    #[error("Invalid webhook signature: {0}")]
    Unauthorized(#[from] SignatureError),
    #[error("Malformed webhook payload: {0}")]
    Malformed(String),
    #[error("No order matches request {0}")]
    NotFound(String),
    #[error(transparent)]
    Rejected(OrderError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReconcileError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Rejected(e) => ReconcileError::Rejected(e),
            other => ReconcileError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub success: bool,
    pub order_id: String,
    /// The order had already been resolved; nothing changed. Kept out of the
    /// response body so a replay answers exactly like the first delivery.
    #[serde(skip)]
    pub replayed: bool,
}

/// Which lookup step found the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    PendingRecord,
    CorrelationId,
}

struct Located {
    order_id: String,
    provider_id: Option<String>,
    matched_by: MatchedBy,
}

pub struct WebhookReconciler {
    store: Arc<dyn OrderStore>,
    fulfillment: Arc<FulfillmentService>,
    secrets: HashMap<String, WebhookSecret>,
    metrics: Option<Arc<Metrics>>,
}

impl WebhookReconciler {
    pub fn new(fulfillment: Arc<FulfillmentService>, secrets: HashMap<String, WebhookSecret>) -> Self {
        Self {
            store: fulfillment.store().clone(),
            fulfillment,
            secrets,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Verifies, parses and applies one callback from `supplier`.
    pub async fn handle(
        &self,
        supplier: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.process(supplier, signature, body).await;
        if let Some(metrics) = &self.metrics {
            let label = match &result {
                Ok(outcome) if outcome.replayed => "replayed",
                Ok(_) => "applied",
                Err(ReconcileError::Unauthorized(_)) => "unauthorized",
                Err(ReconcileError::NotFound(_)) => "unmatched",
                Err(ReconcileError::Malformed(_)) => "malformed",
                Err(_) => "error",
            };
            metrics.record_webhook(supplier, label);
        }
        result
    }

    async fn process(
        &self,
        supplier: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let secret = self
            .secrets
            .get(supplier)
            .ok_or_else(|| ReconcileError::UnknownSupplier(supplier.to_string()))?;

        if let Err(e) = verify_signature(secret.scheme, &secret.secret, signature, body, Utc::now()) {
            tracing::warn!(supplier = supplier, error = %e, "Rejected webhook signature");
            return Err(e.into());
        }

        let payload = WebhookPayload::parse(body).map_err(|e| ReconcileError::Malformed(e.to_string()))?;
        tracing::info!(
            supplier = supplier,
            request_id = %payload.request_id,
            status = ?payload.status,
            "Webhook received"
        );

        let located = self
            .locate(&payload.request_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(payload.request_id.clone()))?;
        tracing::debug!(order_id = %located.order_id, matched_by = ?located.matched_by, "Webhook matched order");

        let order = self
            .store
            .get_order(&located.order_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(payload.request_id.clone()))?;

        if !order.awaiting_fulfillment() {
            tracing::info!(order_id = %order.id, status = %order.status, "Webhook replay acknowledged");
            return Ok(ReconcileOutcome {
                success: true,
                order_id: order.id,
                replayed: true,
            });
        }

        let provider_id = located
            .provider_id
            .or_else(|| order.provider_used.clone())
            .unwrap_or_else(|| supplier.to_string());

        match payload.status {
            WebhookStatus::Completed => self.complete(&order, &payload, provider_id).await,
            WebhookStatus::Failed => self.fail(&order, &payload, provider_id).await,
        }
    }

    async fn locate(&self, request_id: &str) -> Result<Option<Located>, ReconcileError> {
        match self.store.find_pending(request_id).await {
            Ok(Some(pending)) => {
                return Ok(Some(Located {
                    order_id: pending.order_id,
                    provider_id: Some(pending.provider_id),
                    matched_by: MatchedBy::PendingRecord,
                }))
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Pending lookup failed, falling back to correlation id");
            }
        }

        if request_id.len() < MIN_FALLBACK_TOKEN_LEN {
            return Ok(None);
        }

        let filter = OrderFilter {
            correlation_contains: Some(request_id.to_string()),
            limit: Some(2),
            ..Default::default()
        };
        let mut matches = self.store.find_orders(&filter).await?;
        if matches.len() > 1 {
            tracing::warn!(request_id = request_id, "Ambiguous correlation match ignored");
            return Ok(None);
        }

        Ok(matches.pop().map(|order| Located {
            order_id: order.id,
            provider_id: None,
            matched_by: MatchedBy::CorrelationId,
        }))
    }

    async fn complete(
        &self,
        order: &Order,
        payload: &WebhookPayload,
        provider_id: String,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let artifacts = payload
            .artifacts()
            .ok_or_else(|| ReconcileError::Malformed("completed webhook without iccid/activation code".to_string()))?;

        let command = OrderCommand::Complete {
            provider_id: provider_id.clone(),
            provider_order_id: payload.provider_order_id(),
            artifacts: artifacts.clone(),
        };
        let updated = match apply_command(self.store.as_ref(), &order.id, command).await {
            Ok(updated) => updated,
            Err(StoreError::Rejected(OrderError::InvalidStatusTransition { .. })) => {
                return Ok(self.raced(order));
            }
            Err(e) => return Err(e.into()),
        };

        self.resolve_pending(&payload.request_id, PendingStatus::Completed).await;
        self.log(
            AutomationLog::success(&order.id, steps::WEBHOOK_COMPLETED)
                .with_provider(provider_id)
                .with_metadata("request_id", payload.request_id.clone())
                .with_metadata("iccid", artifacts.iccid),
        )
        .await;
        tracing::info!(order_id = %order.id, "Order fulfilled by webhook");

        self.fulfillment.deliver(&updated).await;
        Ok(ReconcileOutcome {
            success: true,
            order_id: order.id.clone(),
            replayed: false,
        })
    }

    async fn fail(
        &self,
        order: &Order,
        payload: &WebhookPayload,
        provider_id: String,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let error = payload.error_message();
        let command = OrderCommand::Fail {
            provider_id: Some(provider_id.clone()),
            error: error.clone(),
        };
        match apply_command(self.store.as_ref(), &order.id, command).await {
            Ok(_) => {}
            Err(StoreError::Rejected(OrderError::InvalidStatusTransition { .. })) => {
                return Ok(self.raced(order));
            }
            Err(e) => return Err(e.into()),
        }

        self.resolve_pending(&payload.request_id, PendingStatus::Failed).await;
        let mut log = AutomationLog::failed(&order.id, steps::WEBHOOK_FAILED, &error)
            .with_provider(provider_id)
            .with_metadata("request_id", payload.request_id.clone());
        if let Some(code) = payload.error_code() {
            log = log.with_metadata("error_code", code);
        }
        self.log(log).await;
        tracing::warn!(order_id = %order.id, error = %error, "Supplier reported async failure");

        Ok(ReconcileOutcome {
            success: true,
            order_id: order.id.clone(),
            replayed: false,
        })
    }

    /// A concurrent delivery of the same callback won.
    fn raced(&self, order: &Order) -> ReconcileOutcome {
        tracing::info!(order_id = %order.id, "Webhook resolved concurrently; treating as replay");
        ReconcileOutcome {
            success: true,
            order_id: order.id.clone(),
            replayed: true,
        }
    }

    async fn resolve_pending(&self, request_id: &str, status: PendingStatus) {
        if let Err(e) = self.store.resolve_pending(request_id, status).await {
            tracing::warn!(request_id = request_id, error = %e, "Failed to resolve pending async order");
        }
    }

    async fn log(&self, entry: AutomationLog) {
        if let Err(e) = self.store.append_log(&entry).await {
            tracing::error!(order_id = %entry.order_id, step = %entry.step_name, error = %e, "Failed to append automation log");
        }
    }
}
