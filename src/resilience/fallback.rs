//! # Stage: Fallback Manager
//!
//! ## Responsibility
//! Recovers a failed request for one category by walking a prioritized chain
//! of alternative strategies, then a stale cached result, then a degraded
//! response.
//!
//! ## Guarantees
//! - Fallbacks run one at a time, lowest priority value first (stable for ties)
//! - Disabled or unregistered fallbacks and fallbacks behind an open breaker
//!   are skipped without counting as attempts
//! - Degraded responses are always `success` and always carry a warning
//! - The shared cache evicts its oldest entries in batches when full
//!
//! ## NOT Responsible For
//! - Owning strategy instances (resolved through the registry per call)
//! - Selecting the primary strategy (see [`crate::selector`])

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::circuit_breaker::{CircuitBreakerInfo, CircuitBreakerRegistry};
use crate::cache::{cache_key, KeyScope, ResultCache};
use crate::error::{FallbackAttempt, StrategyError};
use crate::registry::StrategyRegistry;
use crate::strategy::{Payload, StrategyContext, StrategyResult, StrategyRuntime};

pub const DEGRADED_WARNING: &str = "Operating in degraded mode - limited functionality";
pub const STALE_WARNING: &str = "Using stale cached result - all strategies failed";
/// `strategy_name` of synthesized degraded responses.
pub const DEGRADED_STRATEGY_NAME: &str = "degraded_mode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Failed fallback attempts allowed per request.
    pub max_fallback_attempts: usize,
    /// Serve a fresh cached result before running the primary.
    pub prefer_cached_result: bool,
    pub degraded_mode_enabled: bool,
    /// Route fallbacks through their circuit breakers.
    pub circuit_breaker_enabled: bool,
    #[serde(with = "crate::config::duration_secs")]
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub cache_evict_batch: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_fallback_attempts: 3,
            prefer_cached_result: false,
            degraded_mode_enabled: true,
            circuit_breaker_enabled: true,
            cache_ttl: Duration::from_secs(30 * 60),
            cache_capacity: 100,
            cache_evict_batch: 20,
        }
    }
}

/// Produces the payload of a degraded response.
pub type DegradedResponder<I, O> = Arc<dyn Fn(&StrategyContext<I>, &StrategyError) -> O + Send + Sync>;

#[derive(Debug, Clone)]
struct FallbackEntry {
    name: String,
    priority: i32,
}

#[derive(Debug, Clone, Copy, Default)]
struct FallbackUsage {
    attempts: u64,
    successes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackInfo {
    pub name: String,
    pub priority: i32,
    pub available: bool,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub circuit_breaker: Option<CircuitBreakerInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatus {
    pub category: String,
    pub degraded_mode: bool,
    pub cache_size: usize,
    pub fallbacks: Vec<FallbackInfo>,
}

pub struct FallbackManager<I, O> {
    category: String,
    config: FallbackConfig,
    registry: Arc<StrategyRegistry<I, O>>,
    breakers: Arc<CircuitBreakerRegistry>,
    fallbacks: RwLock<Vec<FallbackEntry>>,
    usage: Mutex<HashMap<String, FallbackUsage>>,
    cache: ResultCache<O>,
    degraded: AtomicBool,
    responder: Option<DegradedResponder<I, O>>,
}

impl<I, O> FallbackManager<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    pub fn new(
        category: impl Into<String>,
        config: FallbackConfig,
        registry: Arc<StrategyRegistry<I, O>>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let cache = ResultCache::new(config.cache_ttl, config.cache_capacity, config.cache_evict_batch);
        Self {
            category: category.into(),
            config,
            registry,
            breakers,
            fallbacks: RwLock::new(Vec::new()),
            usage: Mutex::new(HashMap::new()),
            cache,
            degraded: AtomicBool::new(false),
            responder: None,
        }
    }

    pub fn with_degraded_responder(mut self, responder: DegradedResponder<I, O>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Add (or re-prioritize) a fallback. Lower priority runs first.
    pub fn add_fallback(&self, name: impl Into<String>, priority: i32) {
        let name = name.into();
        let mut fallbacks = self.fallbacks.write().unwrap_or_else(PoisonError::into_inner);
        fallbacks.retain(|f| f.name != name);
        debug!(category = %self.category, fallback = %name, priority, "fallback added");
        fallbacks.push(FallbackEntry { name, priority });
        fallbacks.sort_by_key(|f| f.priority);
    }

    pub fn remove_fallback(&self, name: &str) -> bool {
        let mut fallbacks = self.fallbacks.write().unwrap_or_else(PoisonError::into_inner);
        let before = fallbacks.len();
        fallbacks.retain(|f| f.name != name);
        fallbacks.len() != before
    }

    /// Fallback names in the order they would be tried.
    pub fn fallback_order(&self) -> Vec<String> {
        self.entries().into_iter().map(|f| f.name).collect()
    }

    fn entries(&self) -> Vec<FallbackEntry> {
        self.fallbacks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn note_attempt(&self, name: &str, success: bool) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        let u = usage.entry(name.to_string()).or_default();
        u.attempts += 1;
        if success {
            u.successes += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `primary`, recovering through the fallback chain on failure.
    pub async fn execute_with_fallback(
        &self,
        primary: &str,
        context: StrategyContext<I>,
    ) -> Result<StrategyResult<O>, StrategyError> {
        if let Some(cached) = self.cached(&context) {
            return Ok(cached);
        }
        let key = cache_key(KeyScope::Request, &context);

        let runtime = self.registry.get(&self.category, primary).ok_or_else(|| StrategyError::NotFound {
            category: self.category.clone(),
            name: primary.to_string(),
        })?;

        match self.run(&runtime, context.clone()).await {
            Ok(result) => {
                if let Some(k) = key {
                    self.cache.insert(k, result.clone());
                }
                Ok(result)
            }
            Err(err) if err.is_recoverable() => self.recover(primary, err, context).await,
            Err(err) => Err(err),
        }
    }

    /// Walk the chain after `primary` has failed with `primary_error`.
    pub async fn recover(
        &self,
        primary: &str,
        primary_error: StrategyError,
        context: StrategyContext<I>,
    ) -> Result<StrategyResult<O>, StrategyError> {
        let key = cache_key(KeyScope::Request, &context);
        warn!(category = %self.category, primary, error = %primary_error, "primary failed, trying fallbacks");

        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        for entry in self.entries() {
            if attempts.len() >= self.config.max_fallback_attempts {
                break;
            }
            if entry.name == primary {
                continue;
            }
            let Some(runtime) = self.registry.get(&self.category, &entry.name) else {
                debug!(category = %self.category, fallback = %entry.name, "fallback unavailable, skipped");
                continue;
            };
            if self.config.circuit_breaker_enabled && !self.breakers.get_or_create(&entry.name).allows_calls() {
                debug!(category = %self.category, fallback = %entry.name, "fallback circuit open, skipped");
                continue;
            }

            match self.run(&runtime, context.clone()).await {
                Ok(mut result) => {
                    self.note_attempt(&entry.name, true);
                    info!(category = %self.category, fallback = %entry.name, "fallback succeeded");
                    result.fallback_used = true;
                    result.metadata.insert("fallback_strategy".into(), Value::from(entry.name.clone()));
                    result.metadata.insert("primary_error".into(), Value::from(primary_error.to_string()));
                    if let Some(k) = key {
                        self.cache.insert(k, result.clone());
                    }
                    return Ok(result);
                }
                Err(StrategyError::CircuitOpen { .. }) => continue,
                Err(err) => {
                    self.note_attempt(&entry.name, false);
                    warn!(category = %self.category, fallback = %entry.name, error = %err, "fallback failed");
                    attempts.push(FallbackAttempt { strategy: entry.name.clone(), error: err.to_string() });
                }
            }
        }

        if let Some((mut stale, age)) = key.as_deref().and_then(|k| self.cache.get_stale(k)) {
            warn!(category = %self.category, age_secs = age.as_secs_f64(), "serving stale cached result");
            stale.fallback_used = true;
            stale.add_warning(STALE_WARNING);
            return Ok(stale);
        }

        if self.config.degraded_mode_enabled {
            return Ok(self.degraded_response(&context, &primary_error));
        }

        Err(StrategyError::FallbackExhausted { primary: primary_error.to_string(), attempts })
    }

    async fn run(&self, runtime: &StrategyRuntime<I, O>, context: StrategyContext<I>) -> Result<StrategyResult<O>, StrategyError> {
        if self.config.circuit_breaker_enabled {
            let breaker = self.breakers.get_or_create(runtime.name());
            breaker.call(|| runtime.execute(context)).await
        } else {
            runtime.execute(context).await
        }
    }

    fn degraded_response(&self, context: &StrategyContext<I>, error: &StrategyError) -> StrategyResult<O> {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(category = %self.category, "entering degraded mode");
        }
        let data = match &self.responder {
            Some(responder) => responder(context, error),
            None => O::default(),
        };
        let mut result = StrategyResult::success(data)
            .with_metadata("degraded_mode", true)
            .with_metadata("original_error", error.to_string());
        result.strategy_name = DEGRADED_STRATEGY_NAME.to_string();
        result.fallback_used = true;
        result.add_warning(DEGRADED_WARNING);
        result
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn exit_degraded_mode(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(category = %self.category, "left degraded mode");
        }
    }

    /// Fresh cached result for `context` when `prefer_cached_result` is set,
    /// marked `cache_hit` and `fallback_used`.
    pub fn cached(&self, context: &StrategyContext<I>) -> Option<StrategyResult<O>> {
        if !self.config.prefer_cached_result {
            return None;
        }
        let key = cache_key(KeyScope::Request, context)?;
        let mut cached = self.cache.get(&key)?;
        debug!(category = %self.category, "serving cached result");
        cached.fallback_used = true;
        Some(cached)
    }

    /// Store a successful result produced outside this manager so later
    /// failures of the same request can fall back to it.
    pub fn remember(&self, context: &StrategyContext<I>, result: &StrategyResult<O>) {
        if !result.is_success() {
            return;
        }
        if let Some(k) = cache_key(KeyScope::Request, context) {
            self.cache.insert(k, result.clone());
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Reset the breakers of every configured fallback.
    pub fn reset_circuit_breakers(&self) {
        for f in self.entries() {
            self.breakers.reset(&f.name);
        }
    }

    pub fn fallback_status(&self) -> FallbackStatus {
        let usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let fallbacks = self
            .entries()
            .into_iter()
            .map(|f| {
                let u = usage.get(&f.name).copied().unwrap_or_default();
                FallbackInfo {
                    available: self.registry.is_enabled(&self.category, &f.name),
                    attempts: u.attempts,
                    successes: u.successes,
                    success_rate: if u.attempts == 0 { 0.0 } else { u.successes as f64 / u.attempts as f64 },
                    circuit_breaker: self.breakers.get(&f.name).map(|b| b.state_info()),
                    name: f.name,
                    priority: f.priority,
                }
            })
            .collect();
        FallbackStatus {
            category: self.category.clone(),
            degraded_mode: self.is_degraded(),
            cache_size: self.cache.len(),
            fallbacks,
        }
    }
}
