// ============================================================================
// HTTP API
// ============================================================================
//
// Thin actix-web handlers over the fulfillment service. Customers get opaque
// statuses; admin and cron routes require their shared secrets.
//
// ============================================================================

mod error;

pub use error::ApiError;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::domain::NewOrder;
use crate::fulfillment::{EngineError, FulfillmentService};
use crate::sweeper::StuckOrderSweeper;
use crate::webhooks::WebhookReconciler;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const SIGNATURE_HEADERS: [&str; 3] = ["x-signature", "x-webhook-signature", "webhook-signature"];

pub struct AppState {
    pub service: Arc<FulfillmentService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub sweeper: Arc<StuckOrderSweeper>,
    pub cron_secret: String,
    pub admin_token: String,
}

type State = web::Data<AppState>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/orders", web::post().to(create_order))
        .route("/orders/{id}/status", web::get().to(order_status))
        .route("/orders/{id}/usage", web::get().to(order_usage))
        .route("/payments/confirm", web::post().to(confirm_payment))
        .route("/webhooks/{supplier}", web::post().to(supplier_webhook))
        .service(
            web::scope("/admin/orders")
                .route("/{id}", web::get().to(admin_order))
                .route("/{id}/retry", web::post().to(admin_retry))
                .route("/{id}/refund", web::post().to(admin_refund))
                .route("/{id}/manual", web::post().to(admin_manual)),
        )
        .route("/admin/providers/{id}/reset", web::post().to(admin_reset_provider))
        .service(
            web::scope("/cron")
                .route("/sweep-stuck-orders", web::post().to(cron_sweep))
                .route("/process-orders", web::post().to(cron_process)),
        );
}

/// Compares digests so the check does not leak the secret's length or prefix.
fn secret_matches(provided: Option<&str>, expected: &str) -> bool {
    match provided {
        Some(provided) => Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes()),
        None => false,
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn require_admin(req: &HttpRequest, state: &AppState) -> Result<(), ApiError> {
    if secret_matches(header(req, ADMIN_TOKEN_HEADER), &state.admin_token) {
        Ok(())
    } else {
        tracing::warn!(path = %req.path(), "Rejected admin request");
        Err(ApiError::Unauthorized)
    }
}

fn require_cron(req: &HttpRequest, state: &AppState) -> Result<(), ApiError> {
    if secret_matches(header(req, CRON_SECRET_HEADER), &state.cron_secret) {
        Ok(())
    } else {
        tracing::warn!(path = %req.path(), "Rejected cron request");
        Err(ApiError::Unauthorized)
    }
}

async fn health(state: State) -> Result<HttpResponse, ApiError> {
    let report = state.service.registry().health().await?;
    if !report.status.is_healthy() {
        tracing::warn!(status = ?report.status, "Supplier health check reports problems");
    }
    let mut response = if report.status.is_unhealthy() {
        HttpResponse::ServiceUnavailable()
    } else {
        HttpResponse::Ok()
    };
    Ok(response.json(report))
}

// ---------------------------------------------------------------------------
// Customer-facing
// ---------------------------------------------------------------------------

async fn create_order(state: State, body: web::Json<NewOrder>) -> Result<HttpResponse, ApiError> {
    let order = state.service.create_order(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({
        "orderId": order.id,
        "status": order.status.customer_view(),
    })))
}

async fn order_status(state: State, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let status = state.service.customer_status(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

async fn order_usage(state: State, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let usage = state.service.sim_usage(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(usage))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPaymentRequest {
    order_id: String,
    payment_key: String,
    amount: i64,
}

async fn confirm_payment(state: State, body: web::Json<ConfirmPaymentRequest>) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    if request.payment_key.trim().is_empty() {
        return Err(ApiError::BadRequest("paymentKey is required".to_string()));
    }
    let confirmation = state
        .service
        .confirm_payment(&request.order_id, &request.payment_key, request.amount)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "orderId": confirmation.order.id,
        "status": confirmation.order.status.customer_view(),
    })))
}

// ---------------------------------------------------------------------------
// Supplier callbacks
// ---------------------------------------------------------------------------

async fn supplier_webhook(
    state: State,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let supplier = path.into_inner();
    let signature = SIGNATURE_HEADERS.iter().find_map(|name| header(&req, name));
    let outcome = state.reconciler.handle(&supplier, signature, &body).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

async fn admin_order(state: State, req: HttpRequest, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let details = state.service.order_details(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(details))
}

#[derive(Debug, Default, Deserialize)]
struct RetryRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn admin_retry(
    state: State,
    req: HttpRequest,
    path: web::Path<String>,
    body: Option<web::Json<RetryRequest>>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let reason = body.map(|b| b.into_inner()).unwrap_or_default().reason;
    let (order, outcome) = state.service.retry_order(&path.into_inner(), reason).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "order": order,
        "result": outcome,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct RefundRequest {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

async fn admin_refund(
    state: State,
    req: HttpRequest,
    path: web::Path<String>,
    body: Option<web::Json<RefundRequest>>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let order = state
        .service
        .refund_order(&path.into_inner(), request.reason, request.amount)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "order": order })))
}

#[derive(Debug, Deserialize)]
struct ManualRequest {
    reason: String,
}

async fn admin_manual(
    state: State,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ManualRequest>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let order = state.service.require_manual(&path.into_inner(), &body.reason).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "order": order })))
}

async fn admin_reset_provider(state: State, req: HttpRequest, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let provider_id = path.into_inner();
    let transition = state
        .service
        .registry()
        .reset(&provider_id)
        .await
        .map_err(EngineError::from)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "providerId": provider_id,
        "changed": transition.is_some(),
    })))
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

async fn cron_sweep(state: State, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    require_cron(&req, &state)?;
    let report = state.sweeper.sweep().await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn cron_process(state: State, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    require_cron(&req, &state)?;
    let report = state.service.process_ready_orders().await?;
    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matching() {
        assert!(secret_matches(Some("s3cret"), "s3cret"));
        assert!(!secret_matches(Some("s3cre"), "s3cret"));
        assert!(!secret_matches(None, "s3cret"));
    }
}
