//! # Stage: Strategy Contract
//!
//! ## Responsibility
//! Defines the async [`Strategy`] trait every interchangeable algorithm
//! implements, plus the data model that flows through an invocation
//! ([`StrategyContext`], [`StrategyResult`], [`StrategyConfig`],
//! [`StrategyMetrics`]).
//!
//! ## Guarantees
//! - Object safe: strategies are stored as `Arc<dyn Strategy<I, O>>`
//! - Capability tags ([`ContextKind`]) replace runtime type inspection
//!
//! ## NOT Responsible For
//! - Timeouts, retries, caching, metrics (see [`runtime`])
//! - Choosing which strategy runs (see [`crate::selector`])

pub mod config;
pub mod context;
pub mod metrics;
pub mod runtime;

use std::sync::Arc;

use async_trait::async_trait;

pub use config::{ExecutionMode, StrategyConfig, StrategyPriority};
pub use context::{ContextKind, StrategyContext, StrategyResult};
pub use metrics::{StrategyHealth, StrategyMetrics};
pub use runtime::StrategyRuntime;

use crate::error::{StrategyError, ValidationError};

/// Blanket bound for anything that crosses task boundaries as a payload.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// One interchangeable algorithm.
///
/// Implementations report business failure either by returning `Err` or by
/// returning a result with `success == false`; the runtime treats both the
/// same way.
#[async_trait]
pub trait Strategy<I: Payload, O: Payload>: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, context: StrategyContext<I>) -> Result<StrategyResult<O>, StrategyError>;

    /// Pre-checks run before every execution. An empty list means valid.
    fn validate_context(&self, _context: &StrategyContext<I>) -> Vec<ValidationError> {
        Vec::new()
    }

    /// Context kinds this strategy accepts. Include [`ContextKind::ANY`] to
    /// accept everything.
    fn supported_context_types(&self) -> Vec<ContextKind>;

    /// Kinds this strategy is especially good at; raises its selector score.
    fn preferred_context_types(&self) -> Vec<ContextKind> {
        Vec::new()
    }
}

/// Builds a strategy instance from its registered configuration.
pub type StrategyFactory<I, O> =
    Arc<dyn Fn(Arc<StrategyConfig>) -> Arc<dyn Strategy<I, O>> + Send + Sync>;

/// Wrap a closure as a [`StrategyFactory`].
pub fn factory<I, O, F>(f: F) -> StrategyFactory<I, O>
where
    I: Payload,
    O: Payload,
    F: Fn(Arc<StrategyConfig>) -> Arc<dyn Strategy<I, O>> + Send + Sync + 'static,
{
    Arc::new(f)
}
