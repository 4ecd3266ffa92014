//! # Stage: Strategy Runtime
//!
//! ## Responsibility
//! Wraps one [`Strategy`] instance and drives a single invocation through
//! validation, cache lookup, timeout-bounded execution with retries, metrics
//! recording and cache write-back.
//!
//! ## Guarantees
//! - A returned `Ok` is always a genuine success (`is_success()`)
//! - Timed-out work is cancelled: inline futures are dropped, spawned tasks
//!   are aborted (also when the caller itself is cancelled)
//! - Metrics are updated once per call, never per retry
//! - Validation failures never reach the strategy body and are never retried
//!
//! ## NOT Responsible For
//! - Circuit breaking or fallback (see [`crate::resilience`])
//! - Picking the strategy (see [`crate::selector`])

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    ContextKind, Payload, Strategy, StrategyConfig, StrategyContext, StrategyHealth, StrategyMetrics,
    StrategyResult,
};
use crate::cache::{cache_key, KeyScope, ResultCache};
use crate::error::StrategyError;
use crate::monitoring::PerformanceMonitor;

/// Entries kept in a runtime's own result cache.
pub const RUNTIME_CACHE_CAPACITY: usize = 100;

/// Success-rate floor used by [`StrategyRuntime::health`] unless overridden.
pub const DEFAULT_HEALTH_FLOOR: f64 = 0.95;

/// Aborts the spawned task when dropped. Aborting a finished task is a no-op.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Execution wrapper around one strategy instance.
pub struct StrategyRuntime<I, O> {
    strategy: Arc<dyn Strategy<I, O>>,
    config: Arc<StrategyConfig>,
    supported: Vec<ContextKind>,
    preferred: Vec<ContextKind>,
    metrics: Mutex<StrategyMetrics>,
    cache: ResultCache<O>,
    monitor: Option<Arc<PerformanceMonitor>>,
    health_floor: f64,
}

impl<I, O> StrategyRuntime<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    pub fn new(strategy: Arc<dyn Strategy<I, O>>, config: Arc<StrategyConfig>) -> Self {
        let supported = strategy.supported_context_types();
        let preferred = strategy.preferred_context_types();
        let cache = ResultCache::new(config.cache_ttl, RUNTIME_CACHE_CAPACITY, 1);
        Self {
            strategy,
            config,
            supported,
            preferred,
            metrics: Mutex::new(StrategyMetrics::default()),
            cache,
            monitor: None,
            health_floor: DEFAULT_HEALTH_FLOOR,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_health_floor(mut self, floor: f64) -> Self {
        self.health_floor = floor;
        self
    }

    /// Registered name. Taken from the configuration, not the instance.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &Arc<StrategyConfig> {
        &self.config
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy<I, O>> {
        &self.strategy
    }

    /// Whether the strategy accepts contexts of `kind`.
    pub fn supports(&self, kind: &ContextKind) -> bool {
        self.supported.iter().any(|k| k.accepts(kind))
    }

    /// Context affinity in [0, 100]: 50 baseline, +25 for a preferred kind.
    pub fn affinity(&self, kind: &ContextKind) -> f64 {
        let mut score: f64 = 50.0;
        if self.preferred.iter().any(|k| k.accepts(kind)) {
            score += 25.0;
        }
        score.min(100.0)
    }

    fn lock_metrics(&self) -> MutexGuard<'_, StrategyMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> StrategyMetrics {
        self.lock_metrics().clone()
    }

    pub fn health(&self) -> StrategyHealth {
        let metrics = self.metrics();
        StrategyHealth::from_metrics(self.name(), self.version(), &metrics, self.health_floor)
    }

    pub fn is_healthy(&self) -> bool {
        self.lock_metrics().is_healthy(self.health_floor)
    }

    pub fn reset_metrics(&self) {
        *self.lock_metrics() = StrategyMetrics::default();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the strategy once (plus retries) for `context`.
    pub async fn execute(&self, context: StrategyContext<I>) -> Result<StrategyResult<O>, StrategyError> {
        let errors = self.strategy.validate_context(&context);
        if !errors.is_empty() {
            debug!(strategy = %self.name(), errors = errors.len(), "context rejected");
            return Err(StrategyError::Validation { strategy: self.name().to_string(), errors });
        }

        let key = if self.config.cache_enabled {
            let key = cache_key(KeyScope::Strategy { name: self.name(), version: self.version() }, &context);
            if key.is_none() {
                warn!(strategy = %self.name(), "payload not serializable, skipping cache");
            }
            key
        } else {
            None
        };

        if let Some(key) = &key {
            let hit = self.cache.get(key);
            self.lock_metrics().record_cache_lookup(hit.is_some());
            if let Some(result) = hit {
                debug!(strategy = %self.name(), "cache hit");
                return Ok(result);
            }
        }

        let started = Instant::now();
        let outcome = self.run_with_retries(context).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(mut result) => {
                result.execution_time_ms = elapsed_ms;
                result.strategy_name = self.name().to_string();
                result.strategy_version = self.version().to_string();
                result.cache_hit = false;
                self.record(elapsed_ms, true, &result);
                if let Some(key) = key {
                    self.cache.insert_with_ttl(key, result.clone(), self.config.cache_ttl);
                }
                Ok(result)
            }
            Err(err) => {
                let mut failed: StrategyResult<()> = StrategyResult::failure(self.name(), err.to_string());
                failed.strategy_version = self.version().to_string();
                failed.execution_time_ms = elapsed_ms;
                self.record(elapsed_ms, false, &failed);
                Err(err)
            }
        }
    }

    fn record<T>(&self, elapsed_ms: f64, success: bool, result: &StrategyResult<T>) {
        self.lock_metrics().record_execution(elapsed_ms, success);
        if self.config.enable_monitoring {
            if let Some(monitor) = &self.monitor {
                monitor.track_execution(self.name(), self.version(), result);
            }
        }
    }

    async fn run_with_retries(&self, context: StrategyContext<I>) -> Result<StrategyResult<O>, StrategyError> {
        let max_attempts = self.config.retry_attempts.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_once(context.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) if attempt < max_attempts && err.is_retryable(self.config.idempotent) => {
                    debug!(strategy = %self.name(), attempt, error = %err, "retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_once(&self, context: StrategyContext<I>) -> Result<StrategyResult<O>, StrategyError> {
        let timeout = self.config.timeout;
        let outcome = if self.config.execution_mode.runs_inline() {
            match tokio::time::timeout(timeout, self.strategy.execute(context)).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(self.timed_out(timeout)),
            }
        } else {
            let strategy = Arc::clone(&self.strategy);
            let mut task = AbortOnDrop(tokio::spawn(async move { strategy.execute(context).await }));
            match tokio::time::timeout(timeout, &mut task.0).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_err)) => {
                    let message = if join_err.is_panic() { "strategy panicked" } else { "strategy task cancelled" };
                    warn!(strategy = %self.name(), "{message}");
                    Err(StrategyError::execution(self.name(), message))
                }
                Err(_) => {
                    task.0.abort();
                    return Err(self.timed_out(timeout));
                }
            }
        };

        let result = outcome?;
        if result.is_success() {
            Ok(result)
        } else {
            let message = result
                .error_message
                .unwrap_or_else(|| "strategy reported failure".to_string());
            Err(StrategyError::execution(self.name(), message))
        }
    }

    fn timed_out(&self, timeout: Duration) -> StrategyError {
        warn!(strategy = %self.name(), ?timeout, "execution timed out");
        StrategyError::Timeout { strategy: self.name().to_string(), timeout }
    }
}
