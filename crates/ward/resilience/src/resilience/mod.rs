//! Protection around risky operations.
//!
//! Provides named circuit breakers and a retry executor with exponential
//! backoff that can route each attempt through a breaker.

mod circuit_breaker;
mod registry;
mod retry;

pub(crate) use circuit_breaker::BreakerReporting;
pub use circuit_breaker::CircuitBreaker;
pub use registry::{BreakerStateCounts, CircuitBreakerRegistry};
pub use retry::{RetryExecutor, UNGUARDED_SOURCE};
