//! # Stage: Strategy Manager
//!
//! ## Responsibility
//! Composition root and public entry point. Wires the registry, selector,
//! circuit breakers, metrics collector, performance monitor, A/B testing
//! framework and per-category fallback managers, and exposes the execution
//! and admin operations on top of them.
//!
//! ## Guarantees
//! - Every component is built once by [`StrategyManagerBuilder::build`]; there
//!   is no global state
//! - Validation and breaker-open errors surface to the caller unchanged
//! - Parallel fan-out is bounded by a semaphore
//!
//! ## NOT Responsible For
//! - What strategies compute
//! - Installing a tracing subscriber (the binary does that)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::FrameworkConfig;
use crate::error::StrategyError;
use crate::monitoring::{
    AbTestAnalysis, AbTestConfig, AbTestingFramework, AlertCallback, MetricStatistics, MetricsCollector,
    PerformanceAlert, PerformanceMonitor,
};
use crate::registry::{Registration, StrategyInfo, StrategyRegistry};
use crate::resilience::{
    CircuitBreakerInfo, CircuitBreakerRegistry, DegradedResponder, FallbackManager, FallbackStatus,
};
use crate::selector::{SelectionAnalytics, StrategySelector};
use crate::strategy::context::now_ms;
use crate::strategy::{Payload, StrategyContext, StrategyResult, StrategyRuntime};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Concurrent executions allowed by [`StrategyManager::execute_parallel`].
    pub max_parallel: usize,
    /// Alternates tried when a category has no fallback manager.
    pub fallback_alternates: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { max_parallel: 10, fallback_alternates: 2 }
    }
}

/// Rewrites the context between pipeline steps.
pub type ContextTransform<I, O> = Arc<dyn Fn(StrategyContext<I>, &StrategyResult<O>) -> StrategyContext<I> + Send + Sync>;

/// One step of [`StrategyManager::execute_pipeline`].
pub struct PipelineStep<I, O> {
    pub category: String,
    pub strategy: Option<String>,
    pub transform: Option<ContextTransform<I, O>>,
}

impl<I, O> PipelineStep<I, O> {
    pub fn new(category: impl Into<String>) -> Self {
        Self { category: category.into(), strategy: None, transform: None }
    }

    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }

    /// Applied to the context after this step succeeds, before the next one.
    pub fn with_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(StrategyContext<I>, &StrategyResult<O>) -> StrategyContext<I> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub total_strategies: usize,
    pub instantiated_strategies: usize,
    pub healthy_strategies: usize,
    pub open_circuits: Vec<String>,
    pub degraded_categories: Vec<String>,
    pub active_alerts: usize,
}

/// Everything an operator would want to look at, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub generated_at_ms: u64,
    pub health: SystemHealth,
    pub metrics: BTreeMap<String, MetricStatistics>,
    pub strategies: Vec<StrategyInfo>,
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
    pub fallbacks: Vec<FallbackStatus>,
    pub selection: SelectionAnalytics,
    pub alerts: Vec<PerformanceAlert>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct StrategyManagerBuilder<I, O> {
    config: FrameworkConfig,
    registrations: Vec<Registration<I, O>>,
    fallback_chains: Vec<(String, Vec<(String, i32)>)>,
    responders: HashMap<String, DegradedResponder<I, O>>,
    alert_callbacks: Vec<AlertCallback>,
    seed: Option<u64>,
}

impl<I, O> StrategyManagerBuilder<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    fn new() -> Self {
        Self {
            config: FrameworkConfig::default(),
            registrations: Vec::new(),
            fallback_chains: Vec::new(),
            responders: HashMap::new(),
            alert_callbacks: Vec::new(),
            seed: None,
        }
    }

    pub fn config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a strategy. A `[[strategies]]` entry with the same name in the
    /// framework config replaces the registration's config at build time.
    pub fn register(mut self, registration: Registration<I, O>) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Give `category` a fallback manager trying `chain` (name, priority).
    pub fn fallback_chain<S: Into<String>>(mut self, category: impl Into<String>, chain: impl IntoIterator<Item = (S, i32)>) -> Self {
        let chain = chain.into_iter().map(|(n, p)| (n.into(), p)).collect();
        self.fallback_chains.push((category.into(), chain));
        self
    }

    pub fn degraded_responder<F>(mut self, category: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StrategyContext<I>, &StrategyError) -> O + Send + Sync + 'static,
    {
        self.responders.insert(category.into(), Arc::new(f));
        self
    }

    pub fn on_alert<F>(mut self, f: F) -> Self
    where
        F: Fn(&PerformanceAlert) -> Result<(), String> + Send + Sync + 'static,
    {
        self.alert_callbacks.push(Arc::new(f));
        self
    }

    /// Seed the A/B assignment and selector randomness.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> StrategyManager<I, O> {
        let config = self.config;
        let collector = MetricsCollector::new(config.collector.clone());
        let monitor = Arc::new(PerformanceMonitor::new(collector.clone(), config.monitor.clone()));
        for cb in self.alert_callbacks {
            monitor.add_alert_callback_arc(cb);
        }

        let registry = Arc::new(
            StrategyRegistry::new()
                .with_monitor(Arc::clone(&monitor))
                .with_health_floor(config.selector.health_floor),
        );
        for mut registration in self.registrations {
            if let Some(overridden) = config.strategy(registration.name()) {
                debug!(strategy = %overridden.name, "applying configured strategy overrides");
                registration.config = overridden.clone();
            }
            registry.register(registration);
        }

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let mut selector = StrategySelector::new(Arc::clone(&registry), config.selector.clone());
        let ab_tests = match self.seed {
            Some(seed) => {
                selector = selector.with_seed(seed);
                AbTestingFramework::with_seed(collector.clone(), seed)
            }
            None => AbTestingFramework::new(collector.clone()),
        };

        let mut responders = self.responders;
        let mut fallbacks = BTreeMap::new();
        for (category, chain) in self.fallback_chains {
            let mut fm = FallbackManager::new(
                category.clone(),
                config.fallback.clone(),
                Arc::clone(&registry),
                Arc::clone(&breakers),
            );
            if let Some(responder) = responders.remove(&category) {
                fm = fm.with_degraded_responder(responder);
            }
            for (name, priority) in chain {
                fm.add_fallback(name, priority);
            }
            fallbacks.insert(category, Arc::new(fm));
        }

        info!(
            strategies = registry.len(),
            fallback_categories = fallbacks.len(),
            "strategy manager ready"
        );

        StrategyManager {
            semaphore: Arc::new(Semaphore::new(config.manager.max_parallel.max(1))),
            config,
            registry,
            selector,
            breakers,
            collector,
            monitor,
            ab_tests,
            fallbacks,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct StrategyManager<I, O> {
    config: FrameworkConfig,
    registry: Arc<StrategyRegistry<I, O>>,
    selector: StrategySelector<I, O>,
    breakers: Arc<CircuitBreakerRegistry>,
    collector: MetricsCollector,
    monitor: Arc<PerformanceMonitor>,
    ab_tests: AbTestingFramework,
    fallbacks: BTreeMap<String, Arc<FallbackManager<I, O>>>,
    semaphore: Arc<Semaphore>,
}

impl<I, O> StrategyManager<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    pub fn builder() -> StrategyManagerBuilder<I, O> {
        StrategyManagerBuilder::new()
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry<I, O>> {
        &self.registry
    }

    pub fn selector(&self) -> &StrategySelector<I, O> {
        &self.selector
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn ab_tests(&self) -> &AbTestingFramework {
        &self.ab_tests
    }

    pub fn fallback_manager(&self, category: &str) -> Option<&Arc<FallbackManager<I, O>>> {
        self.fallbacks.get(category)
    }

    fn resolve(
        &self,
        category: &str,
        context: &StrategyContext<I>,
        name: Option<&str>,
    ) -> Result<Arc<StrategyRuntime<I, O>>, StrategyError> {
        match name {
            Some(name) => self.registry.get(category, name).ok_or_else(|| StrategyError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            }),
            None => self.selector.select_best(category, context, &[]),
        }
    }

    async fn run_guarded(
        &self,
        runtime: &StrategyRuntime<I, O>,
        context: StrategyContext<I>,
    ) -> Result<StrategyResult<O>, StrategyError> {
        let breaker = self.breakers.get_or_create(runtime.name());
        breaker.call(|| runtime.execute(context)).await
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `name` (or the selector's pick) for `category`, recovering through
    /// the fallback path when allowed.
    pub async fn execute_strategy(
        &self,
        category: &str,
        context: StrategyContext<I>,
        name: Option<&str>,
        fallback_enabled: bool,
    ) -> Result<StrategyResult<O>, StrategyError> {
        let primary = self.resolve(category, &context, name)?;
        if fallback_enabled {
            if let Some(cached) = self.fallbacks.get(category).and_then(|fm| fm.cached(&context)) {
                return Ok(cached);
            }
        }
        match self.run_guarded(&primary, context.clone()).await {
            Ok(result) => {
                if let Some(fm) = self.fallbacks.get(category) {
                    fm.remember(&context, &result);
                }
                Ok(result)
            }
            Err(err) if fallback_enabled && err.is_recoverable() => {
                self.recover(category, primary.name(), err, context).await
            }
            Err(err) => Err(err),
        }
    }

    async fn recover(
        &self,
        category: &str,
        primary: &str,
        error: StrategyError,
        context: StrategyContext<I>,
    ) -> Result<StrategyResult<O>, StrategyError> {
        if let Some(fm) = self.fallbacks.get(category) {
            return fm.recover(primary, error, context).await;
        }

        warn!(category, primary, error = %error, "primary failed, trying alternates");
        let mut excluded = vec![primary.to_string()];
        let mut last_error = error;
        for _ in 0..self.config.manager.fallback_alternates {
            let alternate = match self.selector.select_best(category, &context, &excluded) {
                Ok(rt) => rt,
                Err(_) => break,
            };
            excluded.push(alternate.name().to_string());
            match self.run_guarded(&alternate, context.clone()).await {
                Ok(mut result) => {
                    info!(category, alternate = %alternate.name(), "alternate strategy succeeded");
                    result.fallback_used = true;
                    result.metadata.insert("fallback_strategy".into(), Value::from(alternate.name()));
                    return Ok(result);
                }
                Err(err) => {
                    warn!(category, alternate = %alternate.name(), error = %err, "alternate strategy failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Run the A/B candidate set of `category` concurrently, at most `max`
    /// strategies. Failures come back as failed results.
    pub async fn execute_parallel(
        &self,
        category: &str,
        context: StrategyContext<I>,
        max: usize,
    ) -> Result<Vec<StrategyResult<O>>, StrategyError> {
        let mut candidates = self.selector.select_for_ab_test(category, &context);
        if candidates.is_empty() {
            return Err(StrategyError::NoCandidate { category: category.to_string() });
        }
        candidates.truncate(max.max(1));
        debug!(category, strategies = candidates.len(), "parallel execution");

        let runs = candidates.iter().map(|rt| {
            let ctx = context.clone();
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => self.run_guarded(rt, ctx).await,
                    Err(_) => Err(StrategyError::execution(rt.name(), "parallel executor shut down")),
                };
                outcome.unwrap_or_else(|err| {
                    let mut failed = StrategyResult::failure(rt.name(), err.to_string());
                    failed.strategy_version = rt.version().to_string();
                    failed
                })
            }
        });
        Ok(join_all(runs).await)
    }

    /// Run `steps` in order, feeding each step's (optionally transformed)
    /// context into the next. Stops at the first failing step.
    pub async fn execute_pipeline(
        &self,
        steps: Vec<PipelineStep<I, O>>,
        context: StrategyContext<I>,
    ) -> Result<StrategyResult<Vec<StrategyResult<O>>>, StrategyError> {
        let total = steps.len();
        let started = tokio::time::Instant::now();
        let mut results = Vec::with_capacity(total);
        let mut ctx = context;
        let mut failure = None;

        for (i, step) in steps.into_iter().enumerate() {
            match self.execute_strategy(&step.category, ctx.clone(), step.strategy.as_deref(), true).await {
                Ok(result) => {
                    if let Some(transform) = &step.transform {
                        ctx = transform(ctx, &result);
                    }
                    results.push(result);
                }
                Err(err) => {
                    warn!(step = i, category = %step.category, error = %err, "pipeline step failed");
                    failure = Some(format!("Pipeline failed at step {i}: {err}"));
                    break;
                }
            }
        }

        let completed = results.len();
        let mut out = StrategyResult::success(results)
            .with_metadata("pipeline_steps", total)
            .with_metadata("completed_steps", completed);
        out.strategy_name = "pipeline".to_string();
        out.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        out.fallback_used = out.data.iter().any(|r| r.fallback_used);
        if let Some(message) = failure {
            out.set_error(message);
        }
        Ok(out)
    }

    /// Run the strategy `user_id` is assigned to in `test_id` and record the
    /// outcome against the test.
    pub async fn execute_ab_test(
        &self,
        test_id: &str,
        user_id: &str,
        category: &str,
        context: StrategyContext<I>,
    ) -> Result<StrategyResult<O>, StrategyError> {
        let variant = self
            .ab_tests
            .assign_strategy(test_id, user_id)
            .ok_or_else(|| StrategyError::InvalidAbTest(format!("test '{test_id}' is not accepting traffic")))?;
        let context = context.with_user(user_id);
        match self.execute_strategy(category, context, Some(&variant), false).await {
            Ok(result) => {
                self.ab_tests.record_result(test_id, &variant, &result, user_id);
                Ok(result.with_metadata("ab_test_id", test_id).with_metadata("ab_variant", variant))
            }
            Err(err) => {
                let failed: StrategyResult<()> = StrategyResult::failure(&variant, err.to_string());
                self.ab_tests.record_result(test_id, &variant, &failed, user_id);
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    pub fn enable_strategy(&self, category: &str, name: &str) -> bool {
        self.registry.enable(category, name)
    }

    pub fn disable_strategy(&self, category: &str, name: &str) -> bool {
        self.registry.disable(category, name)
    }

    pub fn reset_circuit_breaker(&self, name: &str) -> bool {
        self.breakers.reset(name)
    }

    pub fn reset_all_circuit_breakers(&self) {
        self.breakers.reset_all();
        info!("all circuit breakers reset");
    }

    /// Clear the runtime caches of `category` (or one strategy in it) and the
    /// category's fallback cache.
    pub fn clear_strategy_cache(&self, category: &str, name: Option<&str>) {
        for (cat, rt) in self.registry.live_runtimes() {
            if cat == category && name.map_or(true, |n| n == rt.name()) {
                rt.clear_cache();
            }
        }
        if let Some(fm) = self.fallbacks.get(category) {
            fm.clear_cache();
        }
    }

    pub fn start_ab_test(&self, config: AbTestConfig) -> Result<(), StrategyError> {
        self.ab_tests.create_test(config)
    }

    pub fn stop_ab_test(&self, test_id: &str) -> Result<AbTestAnalysis, StrategyError> {
        self.ab_tests.stop_test(test_id)
    }

    pub fn system_health(&self) -> SystemHealth {
        let strategies = self.registry.list_strategies();
        let live: Vec<_> = strategies.iter().filter_map(|s| s.health.as_ref()).collect();
        let healthy = live.iter().filter(|h| h.healthy).count();
        let open_circuits = self.breakers.open_circuits();
        let degraded_categories: Vec<String> =
            self.fallbacks.iter().filter(|(_, fm)| fm.is_degraded()).map(|(c, _)| c.clone()).collect();
        let active_alerts = self.monitor.performance_alerts().len();

        let status = if !live.is_empty() && healthy == 0 {
            HealthStatus::Unhealthy
        } else if !open_circuits.is_empty() || !degraded_categories.is_empty() || healthy < live.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        SystemHealth {
            status,
            total_strategies: strategies.len(),
            instantiated_strategies: live.len(),
            healthy_strategies: healthy,
            open_circuits,
            degraded_categories,
            active_alerts,
        }
    }

    pub fn export_snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            generated_at_ms: now_ms(),
            health: self.system_health(),
            metrics: self.collector.all_statistics(None),
            strategies: self.registry.list_strategies(),
            circuit_breakers: self.breakers.infos(),
            fallbacks: self.fallbacks.values().map(|fm| fm.fallback_status()).collect(),
            selection: self.selector.selection_analytics(),
            alerts: self.monitor.performance_alerts(),
        }
    }

    /// Collector export over the last `window` (everything when `None`).
    pub fn export_metrics_json(&self, window: Option<Duration>) -> Value {
        self.collector.export_json(window)
    }
}
