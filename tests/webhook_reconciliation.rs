//! Async supplier callbacks: signature checks, correlation and replays.

mod common;

use common::{artifacts, Harness, HarnessBuilder, Reply, ScriptedSupplier, WEBHOOK_SECRET};

use chrono::Utc;
use esim_fulfillment::domain::{steps, OrderStatus, PendingStatus};
use esim_fulfillment::store::OrderStore;
use esim_fulfillment::webhooks::signature::{sign_hex, sign_timestamped};
use esim_fulfillment::webhooks::{ReconcileError, ReconcileOutcome, SignatureError, SignatureScheme};
use serde_json::json;

async fn deliver(h: &Harness, supplier: &str, body: &serde_json::Value) -> Result<ReconcileOutcome, ReconcileError> {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = sign_hex(WEBHOOK_SECRET, &raw);
    h.reconciler.handle(supplier, Some(&signature), &raw).await
}

async fn accepted(request_id: &str) -> (Harness, String) {
    let supplier = ScriptedSupplier::new(Reply::Accept(request_id.to_string()));
    let h = HarnessBuilder::new().supplier("P1", 1, supplier).build().await;
    let order = h.purchase(15_000).await;
    assert_eq!(order.status, OrderStatus::FulfillmentStarted);
    (h, order.id)
}

#[tokio::test]
async fn test_failed_webhook_marks_order_failed() {
    let (h, order_id) = accepted("r-42").await;

    let outcome = deliver(
        &h,
        "P1",
        &json!({ "request_id": "r-42", "status": "failed", "error": { "message": "stock_exhausted" } }),
    )
    .await
    .unwrap();

    assert!(outcome.success);
    assert!(!outcome.replayed);
    assert_eq!(outcome.order_id, order_id);

    let order = h.order(&order_id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.error_message.as_deref(), Some("stock_exhausted"));

    let pending = h.store.find_pending("r-42").await.unwrap().unwrap();
    assert_eq!(pending.status, PendingStatus::Failed);
    assert!(pending.resolved_at.is_some());

    let logs = h.store.list_logs(&order_id).await.unwrap();
    let failed = logs.iter().find(|l| l.step_name == steps::WEBHOOK_FAILED).unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("stock_exhausted"));
    assert_eq!(failed.metadata["request_id"], "r-42");
}

#[tokio::test]
async fn test_completed_webhook_fulfills_and_delivers() {
    let (h, order_id) = accepted("req-7781").await;
    let esim = artifacts(21);

    let outcome = deliver(
        &h,
        "P1",
        &json!({
            "requestId": "req-7781",
            "status": "completed",
            "data": {
                "iccid": &esim.iccid,
                "activationCode": &esim.activation_code,
                "qrCode": &esim.qr_code,
                "orderId": "sup-991",
            }
        }),
    )
    .await
    .unwrap();

    assert!(outcome.success);
    let order = h.order(&order_id).await;
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.esim_iccid.as_deref(), Some(esim.iccid.as_str()));
    assert_eq!(order.provider_order_id.as_deref(), Some("sup-991"));
    assert_eq!(order.provider_used.as_deref(), Some("P1"));
    assert!(h.steps(&order_id).await.ends_with(&[
        steps::WEBHOOK_COMPLETED.to_string(),
        steps::CUSTOMER_NOTIFIED.to_string(),
    ]));
    assert_eq!(
        h.store.find_pending("req-7781").await.unwrap().unwrap().status,
        PendingStatus::Completed
    );
}

#[tokio::test]
async fn test_replayed_webhook_is_a_no_op() {
    let (h, order_id) = accepted("r-42").await;
    let body = json!({ "request_id": "r-42", "status": "failed", "error": { "message": "stock_exhausted" } });

    let first = deliver(&h, "P1", &body).await.unwrap();
    let logs_after_first = h.store.list_logs(&order_id).await.unwrap().len();
    let order_after_first = h.order(&order_id).await;

    let second = deliver(&h, "P1", &body).await.unwrap();

    assert!(second.success);
    assert!(second.replayed);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
    assert_eq!(serde_json::to_value(&second).unwrap(), json!({ "success": true, "orderId": order_id }));
    assert_eq!(h.store.list_logs(&order_id).await.unwrap().len(), logs_after_first);
    assert_eq!(h.order(&order_id).await, order_after_first);
}

#[tokio::test]
async fn test_late_success_after_failure_is_ignored() {
    let (h, order_id) = accepted("r-43").await;
    deliver(&h, "P1", &json!({ "request_id": "r-43", "status": "failed", "error": "timeout upstream" }))
        .await
        .unwrap();

    let esim = artifacts(22);
    let late = deliver(
        &h,
        "P1",
        &json!({
            "request_id": "r-43",
            "status": "completed",
            "data": { "iccid": esim.iccid, "activation_code": esim.activation_code }
        }),
    )
    .await
    .unwrap();

    assert!(late.replayed);
    let order = h.order(&order_id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order.esim_iccid.is_none());
}

#[tokio::test]
async fn test_correlation_fallback_when_pending_table_unavailable() {
    let supplier = ScriptedSupplier::new(Reply::AcceptEcho);
    let h = HarnessBuilder::new().supplier("P1", 1, supplier).build().await;
    h.store.set_pending_unavailable(true);

    let order = h.purchase(15_000).await;
    assert_eq!(order.status, OrderStatus::FulfillmentStarted);

    let outcome = deliver(
        &h,
        "P1",
        &json!({ "request_id": order.correlation_id, "status": "failed", "error": "sold out" }),
    )
    .await
    .unwrap();

    assert_eq!(outcome.order_id, order.id);
    let order = h.order(&order.id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.provider_used.as_deref(), Some("P1"));
}

#[tokio::test]
async fn test_short_token_never_uses_fallback() {
    let supplier = ScriptedSupplier::new(Reply::Accept("r-1".to_string()));
    let h = HarnessBuilder::new().supplier("P1", 1, supplier).build().await;
    h.store.set_pending_unavailable(true);
    let order = h.purchase(15_000).await;

    let err = deliver(&h, "P1", &json!({ "request_id": "r-1", "status": "failed" }))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::NotFound(ref id) if id == "r-1"));
    assert_eq!(h.order(&order.id).await.status, OrderStatus::FulfillmentStarted);
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let (h, order_id) = accepted("r-42").await;

    let err = deliver(&h, "P1", &json!({ "request_id": "r-nope-123456", "status": "failed" }))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::NotFound(_)));
    assert_eq!(h.order(&order_id).await.status, OrderStatus::FulfillmentStarted);
}

#[tokio::test]
async fn test_bad_signature_is_rejected_before_any_change() {
    let (h, order_id) = accepted("r-42").await;
    let raw = serde_json::to_vec(&json!({ "request_id": "r-42", "status": "failed" })).unwrap();

    let forged = sign_hex("wrong-secret", &raw);
    let err = h.reconciler.handle("P1", Some(&forged), &raw).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized(SignatureError::Mismatch)));

    let err = h.reconciler.handle("P1", None, &raw).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized(SignatureError::Missing)));

    assert_eq!(h.order(&order_id).await.status, OrderStatus::FulfillmentStarted);
    assert_eq!(h.steps(&order_id).await, vec![steps::PAYMENT_CONFIRMED, steps::ASYNC_ACCEPTED]);
}

#[tokio::test]
async fn test_unknown_supplier_is_rejected() {
    let (h, _) = accepted("r-42").await;

    let err = deliver(&h, "P9", &json!({ "request_id": "r-42", "status": "failed" }))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::UnknownSupplier(_)));
}

#[tokio::test]
async fn test_completed_webhook_without_artifacts_is_malformed() {
    let (h, order_id) = accepted("r-44").await;

    let err = deliver(&h, "P1", &json!({ "request_id": "r-44", "status": "completed" }))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Malformed(_)));
    assert_eq!(h.order(&order_id).await.status, OrderStatus::FulfillmentStarted);
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let (h, _) = accepted("r-45").await;
    let raw = b"not json".to_vec();
    let signature = sign_hex(WEBHOOK_SECRET, &raw);

    let err = h.reconciler.handle("P1", Some(&signature), &raw).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Malformed(_)));
}

#[tokio::test]
async fn test_timestamped_signature_scheme() {
    let supplier = ScriptedSupplier::new(Reply::Accept("ts-req-1".to_string()));
    let h = HarnessBuilder::new()
        .supplier_with_scheme("P2", 1, supplier, SignatureScheme::Timestamped)
        .build()
        .await;
    let order = h.purchase(15_000).await;
    let raw = serde_json::to_vec(&json!({ "request_id": "ts-req-1", "status": "failed", "error": "x" })).unwrap();

    let stale = sign_timestamped(WEBHOOK_SECRET, &raw, Utc::now().timestamp() - 600);
    let err = h.reconciler.handle("P2", Some(&stale), &raw).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized(SignatureError::Expired)));

    let fresh = sign_timestamped(WEBHOOK_SECRET, &raw, Utc::now().timestamp());
    let outcome = h.reconciler.handle("P2", Some(&fresh), &raw).await.unwrap();
    assert_eq!(outcome.order_id, order.id);
    assert_eq!(h.order(&order.id).await.status, OrderStatus::Failed);
}
