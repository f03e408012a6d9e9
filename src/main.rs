use actix_web::{web, App, HttpServer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use esim_fulfillment::api::{self, AppState};
use esim_fulfillment::config::Config;
use esim_fulfillment::fulfillment::FulfillmentService;
use esim_fulfillment::metrics::{self, Metrics};
use esim_fulfillment::notify::{LogNotifier, Notifier, WebhookNotifier};
use esim_fulfillment::payments::{HttpPaymentGateway, PaymentGateway, UnconfiguredGateway};
use esim_fulfillment::providers::{HttpSupplierClient, ProviderRegistry, SupplierDirectory, SupplierEntry};
use esim_fulfillment::store::{InMemoryStore, OrderStore, PgStore};
use esim_fulfillment::sweeper::StuckOrderSweeper;
use esim_fulfillment::webhooks::{WebhookReconciler, WebhookSecret};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,esim_fulfillment=debug"))
        )
        .init();

    tracing::info!("🚀 Starting eSIM fulfillment engine");

    let config = Config::from_env()?;
    tracing::info!(environment = %config.environment, suppliers = config.suppliers.len(), "Configuration loaded");

    // === 1. Order Store ===
    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pg = PgStore::connect(url, config.database_max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    // === 2. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 3. Suppliers and registry ===
    let mut directory = SupplierDirectory::new();
    let mut webhook_secrets = HashMap::new();
    let mut providers = Vec::with_capacity(config.suppliers.len());
    for supplier in &config.suppliers {
        let client = HttpSupplierClient::new(&supplier.base_url, supplier.api_key()?, supplier.timeout())?;
        directory.insert(
            &supplier.id,
            SupplierEntry::new(Arc::new(client))
                .with_timeout(supplier.timeout())
                .with_retry(supplier.retry()),
        );
        match supplier.webhook_secret()? {
            Some(secret) => {
                webhook_secrets.insert(
                    supplier.id.clone(),
                    WebhookSecret {
                        scheme: supplier.signature_scheme,
                        secret,
                    },
                );
            }
            None => tracing::info!(supplier = %supplier.id, "No webhook secret; callbacks from this supplier are refused"),
        }
        providers.push(supplier.provider());
    }

    let registry = Arc::new(ProviderRegistry::new(store.clone(), directory, config.registry()).with_metrics(metrics.clone()));
    registry.sync(&providers).await?;

    // === 4. External collaborators ===
    let payments: Arc<dyn PaymentGateway> = match (&config.payment_gateway_url, &config.payment_secret_key) {
        (Some(url), Some(key)) => Arc::new(HttpPaymentGateway::new(url, key.clone())?),
        _ => {
            tracing::warn!("Payment gateway not configured; refunds are disabled");
            Arc::new(UnconfiguredGateway)
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };

    // === 5. Engine components ===
    let service = Arc::new(
        FulfillmentService::new(store.clone(), registry.clone(), payments, notifier)
            .with_metrics(metrics.clone())
            .with_batch_size(config.batch_size),
    );
    let reconciler = Arc::new(WebhookReconciler::new(service.clone(), webhook_secrets).with_metrics(metrics.clone()));
    let sweeper = Arc::new(StuckOrderSweeper::new(store.clone(), config.sweeper.clone()).with_metrics(metrics.clone()));

    // Start metrics HTTP server in background thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    let health_registry = registry.clone();
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        system.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, health_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 6. Service API ===
    let state = web::Data::new(AppState {
        service,
        reconciler,
        sweeper,
        cron_secret: config.cron_secret.clone(),
        admin_token: config.admin_token.clone(),
    });

    tracing::info!("🌐 Serving API on http://0.0.0.0:{}", config.http_port);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind(("0.0.0.0", config.http_port))?
        .run()
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
