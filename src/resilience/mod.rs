//! Failure isolation: per-strategy circuit breakers and per-category
//! fallback chains.

pub mod circuit_breaker;
pub mod fallback;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerInfo, CircuitBreakerRegistry, CircuitState};
pub use fallback::{
    DegradedResponder, FallbackConfig, FallbackInfo, FallbackManager, FallbackStatus, DEGRADED_STRATEGY_NAME,
    DEGRADED_WARNING, STALE_WARNING,
};
