#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esim_fulfillment::domain::{EsimArtifacts, NewOrder, Order, OrderCommand, Provider};
use esim_fulfillment::fulfillment::FulfillmentService;
use esim_fulfillment::notify::{Notifier, NotifyError};
use esim_fulfillment::payments::{CancelRequest, PaymentError, PaymentGateway};
use esim_fulfillment::providers::{
    ProviderRegistry, PurchaseOutcome, PurchaseRequest, RegistryConfig, SimUsage, SupplierClient,
    SupplierDirectory, SupplierEntry, SupplierError,
};
use esim_fulfillment::store::{apply_command, InMemoryStore, OrderStore};
use esim_fulfillment::sweeper::{StuckOrderSweeper, SweeperConfig};
use esim_fulfillment::utils::{CircuitBreakerConfig, RetryConfig};
use esim_fulfillment::webhooks::{SignatureScheme, WebhookReconciler, WebhookSecret};

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// One scripted supplier response.
#[derive(Clone, Debug)]
pub enum Reply {
    Complete(EsimArtifacts),
    Accept(String),
    /// Accepts and echoes the request's correlation id as the request id.
    AcceptEcho,
    Error(SupplierError),
    /// Never answers within any sane timeout.
    Hang,
    /// Answers with the inner reply after a pause.
    Delayed(Duration, Box<Reply>),
}

/// Supplier double that plays back queued replies, then repeats `fallback`.
pub struct ScriptedSupplier {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    requests: Mutex<Vec<PurchaseRequest>>,
}

impl ScriptedSupplier {
    pub fn new(fallback: Reply) -> Arc<Self> {
        Self::scripted(Vec::new(), fallback)
    }

    pub fn scripted(replies: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PurchaseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SupplierClient for ScriptedSupplier {
    async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseOutcome, SupplierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let reply = match reply {
            Reply::Delayed(pause, inner) => {
                tokio::time::sleep(pause).await;
                *inner
            }
            other => other,
        };

        match reply {
            Reply::Complete(artifacts) => Ok(PurchaseOutcome::Completed {
                artifacts,
                provider_order_id: Some(format!("sup-{}", request.correlation_id)),
            }),
            Reply::Accept(request_id) => Ok(PurchaseOutcome::Accepted { request_id }),
            Reply::AcceptEcho => Ok(PurchaseOutcome::Accepted {
                request_id: request.correlation_id.clone(),
            }),
            Reply::Error(error) => Err(error),
            Reply::Hang | Reply::Delayed(..) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(SupplierError::Transient("hung".to_string()))
            }
        }
    }

    async fn get_sim_usage(&self, iccid: &str) -> Result<SimUsage, SupplierError> {
        Ok(SimUsage {
            iccid: iccid.to_string(),
            data_used_mb: 256.0,
            data_total_mb: 5120.0,
            expires_at: None,
        })
    }
}

/// Gateway double that records every call.
#[derive(Default)]
pub struct RecordingGateway {
    pub confirms: Mutex<Vec<(String, String, i64)>>,
    pub cancels: Mutex<Vec<CancelRequest>>,
    pub fail_cancel: AtomicBool,
}

impl RecordingGateway {
    pub fn cancel_count(&self) -> usize {
        self.cancels.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn confirm(&self, payment_key: &str, order_id: &str, amount: i64) -> Result<(), PaymentError> {
        self.confirms
            .lock()
            .unwrap()
            .push((payment_key.to_string(), order_id.to_string(), amount));
        Ok(())
    }

    async fn cancel(&self, request: &CancelRequest) -> Result<(), PaymentError> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable("gateway down".to_string()));
        }
        self.cancels.lock().unwrap().push(request.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &str {
        "test"
    }

    async fn notify_fulfilled(&self, order: &Order) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("mailbox full".to_string()));
        }
        self.delivered.lock().unwrap().push(order.id.clone());
        Ok(())
    }
}

pub fn artifacts(n: u32) -> EsimArtifacts {
    EsimArtifacts {
        iccid: format!("89820000000000{n:05}"),
        activation_code: format!("LPA:1$smdp.example${n}"),
        qr_code: format!("data:image/png;base64,QR{n}"),
    }
}

pub fn new_order(amount: i64) -> NewOrder {
    NewOrder {
        amount,
        currency: "KRW".to_string(),
        customer_name: "Park".to_string(),
        customer_email: "park@example.com".to_string(),
        customer_phone: None,
        product_sku: "JP-5GB-7D".to_string(),
        quantity: 1,
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<ProviderRegistry>,
    pub service: Arc<FulfillmentService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub sweeper: Arc<StuckOrderSweeper>,
    pub payments: Arc<RecordingGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Builder for a fully wired engine over the in-memory store.
pub struct HarnessBuilder {
    store: Arc<InMemoryStore>,
    suppliers: Vec<(Provider, Arc<ScriptedSupplier>, SignatureScheme)>,
    max_attempts: u32,
    timeout: Duration,
    breaker: CircuitBreakerConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            suppliers: Vec::new(),
            max_attempts: 3,
            timeout: Duration::from_secs(5),
            breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn store(mut self, store: InMemoryStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn supplier(self, id: &str, priority: i32, client: Arc<ScriptedSupplier>) -> Self {
        self.supplier_with_scheme(id, priority, client, SignatureScheme::Hex)
    }

    pub fn supplier_with_scheme(
        mut self,
        id: &str,
        priority: i32,
        client: Arc<ScriptedSupplier>,
        scheme: SignatureScheme,
    ) -> Self {
        self.suppliers
            .push((Provider::new(id, format!("Supplier {id}"), priority), client, scheme));
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker.failure_threshold = threshold;
        self
    }

    pub async fn build(self) -> Harness {
        let store = self.store;
        let dyn_store: Arc<dyn OrderStore> = store.clone();

        let mut directory = SupplierDirectory::new();
        let mut secrets = HashMap::new();
        let mut providers = Vec::new();
        for (provider, client, scheme) in self.suppliers {
            directory.insert(
                provider.id.clone(),
                SupplierEntry::new(client)
                    .with_timeout(self.timeout)
                    .with_retry(fast_retry(self.max_attempts)),
            );
            secrets.insert(
                provider.id.clone(),
                WebhookSecret {
                    scheme,
                    secret: WEBHOOK_SECRET.to_string(),
                },
            );
            providers.push(provider);
        }

        let config = RegistryConfig {
            breaker: self.breaker,
            provider_cache_ttl: Duration::from_secs(30),
            usage_cache_ttl: Duration::from_secs(300),
            usage_daily_limit: 90,
        };
        let registry = Arc::new(ProviderRegistry::new(dyn_store.clone(), directory, config));
        registry.sync(&providers).await.unwrap();

        let payments = Arc::new(RecordingGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = Arc::new(FulfillmentService::new(
            dyn_store.clone(),
            registry.clone(),
            payments.clone(),
            notifier.clone(),
        ));
        let reconciler = Arc::new(WebhookReconciler::new(service.clone(), secrets));
        let sweeper = Arc::new(StuckOrderSweeper::new(dyn_store, SweeperConfig::default()));

        Harness {
            store,
            registry,
            service,
            reconciler,
            sweeper,
            payments,
            notifier,
        }
    }
}

impl Harness {
    pub async fn order(&self, id: &str) -> Order {
        self.store.get_order(id).await.unwrap().expect("order exists")
    }

    pub async fn steps(&self, id: &str) -> Vec<String> {
        self.store
            .list_logs(id)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.step_name)
            .collect()
    }

    /// Creates an order and records its payment without starting fulfillment.
    pub async fn paid_order(&self, amount: i64) -> Order {
        let order = self.service.create_order(new_order(amount)).await.unwrap();
        apply_command(
            self.store.as_ref(),
            &order.id,
            OrderCommand::ConfirmPayment {
                payment_key: format!("pk_{}", order.id),
            },
        )
        .await
        .unwrap()
    }

    /// Checkout plus payment confirmation, which runs the first attempt.
    pub async fn purchase(&self, amount: i64) -> Order {
        let order = self.service.create_order(new_order(amount)).await.unwrap();
        self.service
            .confirm_payment(&order.id, &format!("pk_{}", order.id), amount)
            .await
            .unwrap();
        self.order(&order.id).await
    }
}
