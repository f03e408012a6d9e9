// ============================================================================
// eSIM Order Fulfillment & Reconciliation Engine
// ============================================================================
//
// - domain/       - Order state machine, providers, audit records
// - store/        - Order Store trait, Postgres and in-memory backends, locks
// - providers/    - Supplier clients, registry and circuit breaking
// - fulfillment/  - Orchestrator and admin actions
// - webhooks/     - Signature checks and async reconciliation
// - sweeper       - Stuck-order recovery
// - api/          - actix-web routes
//
// ============================================================================

pub mod api;
pub mod config;
pub mod domain;
pub mod fulfillment;
pub mod metrics;
pub mod notify;
pub mod payments;
pub mod providers;
pub mod store;
pub mod sweeper;
pub mod utils;
pub mod webhooks;
