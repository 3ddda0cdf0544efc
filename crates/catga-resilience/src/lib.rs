//! Circuit breaker state machine plus the Timeout/Retry/Bulkhead/
//! CircuitBreaker resilience pipeline (spec §4.F).

pub mod bulkhead;
pub mod circuit_breaker;
pub mod pipeline;
pub mod registry;
pub mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use pipeline::{ResilienceConfig, ResiliencePipeline};
pub use registry::CircuitBreakerRegistry;
pub use retry::{backoff_delay, is_transient, RetryConfig};
