// ============================================================================
// Order Domain - Fulfillment state machine
// ============================================================================
//
// - Value objects (OrderStatus, PaymentStatus, EsimArtifacts)
// - Commands (state machine inputs)
// - Errors (OrderError enum)
// - Aggregate (Order with transition rules)
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod errors;
pub mod aggregate;

pub use value_objects::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
