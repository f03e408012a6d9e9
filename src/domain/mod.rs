// ============================================================================
// Domain Layer - Records owned by the fulfillment engine
// ============================================================================
//
// - order/          - Order aggregate and its state machine
// - provider        - Supplier configuration and persisted health
// - pending         - Async request correlation records
// - automation_log  - Append-only audit trail
//
// ============================================================================

pub mod order;
pub mod provider;
pub mod pending;
pub mod automation_log;

pub use automation_log::{steps, AutomationLog, LogStatus};
pub use order::{EsimArtifacts, NewOrder, Order, OrderCommand, OrderError, OrderStatus, PaymentStatus};
pub use pending::{PendingAsyncOrder, PendingStatus};
pub use provider::Provider;
