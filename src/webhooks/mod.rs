mod payload;
mod reconciler;
pub mod signature;

pub use payload::{WebhookData, WebhookError, WebhookPayload, WebhookStatus};
pub use reconciler::{MatchedBy, ReconcileError, ReconcileOutcome, WebhookReconciler, WebhookSecret, MIN_FALLBACK_TOKEN_LEN};
pub use signature::{verify_signature, SignatureError, SignatureScheme};
