pub mod cache;
pub mod circuit_breaker;
pub mod retry;

pub use cache::{DailyQuota, TtlCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, Transition};
pub use retry::{retry_on_transient, retry_with_backoff, IsTransient, RetryConfig, RetryResult};
