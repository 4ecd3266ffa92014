//! Crate-level error types.
//!
//! [`StrategyError`] is the taxonomy every execution path returns. The
//! classification helpers ([`StrategyError::is_retryable`],
//! [`StrategyError::is_recoverable`], [`StrategyError::counts_as_failure`]) are
//! what the runtime, the circuit breaker and the fallback chain branch on, so
//! the policy lives in one place.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// One problem found by [`crate::strategy::Strategy::validate_context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Offending field, when the problem is attributable to one.
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { field: None, message: message.into() }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: Some(field.into()), message: message.into() }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// FallbackAttempt
// ---------------------------------------------------------------------------

/// A fallback that was tried and failed, kept for the aggregate error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackAttempt {
    pub strategy: String,
    pub error: String,
}

fn format_attempts(attempts: &[FallbackAttempt]) -> String {
    if attempts.is_empty() {
        return "none attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// StrategyError
// ---------------------------------------------------------------------------

/// Every way a strategy invocation can fail.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StrategyError {
    /// The context failed the strategy's pre-checks. Never retried.
    #[error("strategy '{strategy}' rejected context: {}", join_errors(.errors))]
    Validation { strategy: String, errors: Vec<ValidationError> },

    /// The execution exceeded its deadline and was cancelled.
    #[error("strategy '{strategy}' timed out after {timeout:?}")]
    Timeout { strategy: String, timeout: Duration },

    /// The strategy body failed (returned an error, an unsuccessful result, or panicked).
    #[error("strategy '{strategy}' execution failed: {message}")]
    Execution { strategy: String, message: String },

    /// The breaker protecting the strategy is open; nothing was invoked.
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    /// Primary and every attempted fallback failed, and neither a cached result
    /// nor a degraded response was available.
    #[error("all fallback strategies failed (primary: {primary}; fallbacks: {})", format_attempts(.attempts))]
    FallbackExhausted { primary: String, attempts: Vec<FallbackAttempt> },

    #[error("strategy not found: {category}.{name}")]
    NotFound { category: String, name: String },

    #[error("no suitable strategy found for category '{category}'")]
    NoCandidate { category: String },

    #[error("invalid A/B test: {0}")]
    InvalidAbTest(String),
}

impl StrategyError {
    pub fn execution(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        StrategyError::Execution { strategy: strategy.into(), message: message.into() }
    }

    /// Name of the strategy (or breaker) the error is attributed to, if any.
    pub fn strategy_name(&self) -> Option<&str> {
        match self {
            StrategyError::Validation { strategy, .. }
            | StrategyError::Timeout { strategy, .. }
            | StrategyError::Execution { strategy, .. } => Some(strategy),
            StrategyError::CircuitOpen { breaker } => Some(breaker),
            StrategyError::NotFound { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether the runtime may spend retry budget on this error.
    ///
    /// Timeouts are retried only for strategies declared idempotent.
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            StrategyError::Execution { .. } => true,
            StrategyError::Timeout { .. } => idempotent,
            _ => false,
        }
    }

    /// Whether a fallback chain should absorb this error.
    ///
    /// Validation and breaker-open errors surface to the caller unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StrategyError::Execution { .. } | StrategyError::Timeout { .. })
    }

    /// Whether a circuit breaker should count this outcome as a failure.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, StrategyError::Validation { .. } | StrategyError::CircuitOpen { .. })
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors raised while loading [`crate::config::FrameworkConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
