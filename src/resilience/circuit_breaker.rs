//! # Stage: Circuit Breaker
//!
//! ## Responsibility
//! Tracks the outcomes of calls to one strategy and fails fast while the
//! strategy is considered down, probing it again after a recovery timeout.
//!
//! ## Guarantees
//! - Admission (including the Open → HalfOpen transition and probe permit
//!   acquisition) and every outcome write happen under one mutex
//! - At most `half_open_max_calls` probes are in flight; a dropped probe
//!   releases its permit
//! - Validation and breaker-open errors are neutral: they never trip or
//!   reset the breaker
//!
//! ## NOT Responsible For
//! - Retries or fallback (see [`crate::strategy::runtime`] and [`super::fallback`])

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StrategyError;

/// Outcomes considered by [`CircuitBreakerInfo::recent_success_rate`].
const RECENT_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time in Open before a probe is admitted.
    #[serde(with = "crate::config::duration_secs")]
    pub recovery_timeout: Duration,
    /// Probe successes needed to close again.
    pub success_threshold: u32,
    /// Size of the sliding outcome window.
    pub window_size: usize,
    /// Failure fraction of a full window that opens the breaker.
    pub failure_rate_threshold: f64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            window_size: 100,
            failure_rate_threshold: 0.5,
            half_open_max_calls: 1,
        }
    }
}

/// Serializable snapshot of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub seconds_since_last_failure: Option<f64>,
    pub last_error: Option<String>,
    pub recent_success_rate: f64,
    pub total_calls_in_window: usize,
    pub half_open_in_flight: u32,
    pub config: CircuitBreakerConfig,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_error: Option<String>,
    /// `true` = success, newest at the back.
    window: VecDeque<bool>,
    half_open_in_flight: u32,
    /// Bumped on every transition. Permits and outcomes from an older
    /// generation are ignored.
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_error: None,
            window: VecDeque::new(),
            half_open_in_flight: 0,
            generation: 0,
        }
    }

    fn recovery_elapsed(&self, timeout: Duration) -> bool {
        self.last_failure.map_or(true, |t| t.elapsed() >= timeout)
    }
}

/// Admission ticket for one call. Releases its half-open probe slot when
/// dropped.
struct ProbePermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
}

impl Drop for ProbePermit<'_> {
    fn drop(&mut self) {
        if self.probe {
            let mut s = self.breaker.lock();
            if s.generation == self.generation && s.half_open_in_flight > 0 {
                s.half_open_in_flight -= 1;
            }
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self { name: name.into(), config, state: Mutex::new(BreakerState::new()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_error(&self) -> StrategyError {
        StrategyError::CircuitOpen { breaker: self.name.clone() }
    }

    /// Run `f` if the breaker admits the call, recording its outcome.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, StrategyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StrategyError>>,
    {
        let permit = self.try_acquire()?;
        let outcome = f().await;
        {
            let mut s = self.lock();
            if s.generation != permit.generation {
                debug!(breaker = %self.name, "outcome from an earlier circuit state ignored");
            } else {
                match &outcome {
                    Ok(_) => self.on_success(&mut s),
                    Err(e) if e.counts_as_failure() => self.on_failure(&mut s, &e.to_string()),
                    Err(_) => {}
                }
            }
        }
        drop(permit);
        outcome
    }

    fn try_acquire(&self) -> Result<ProbePermit<'_>, StrategyError> {
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => Ok(ProbePermit { breaker: self, generation: s.generation, probe: false }),
            CircuitState::Open => {
                if !s.recovery_elapsed(self.config.recovery_timeout) {
                    return Err(self.open_error());
                }
                self.transition(&mut s, CircuitState::HalfOpen);
                s.half_open_in_flight = 1;
                Ok(ProbePermit { breaker: self, generation: s.generation, probe: true })
            }
            CircuitState::HalfOpen => {
                if s.half_open_in_flight >= self.config.half_open_max_calls {
                    return Err(self.open_error());
                }
                s.half_open_in_flight += 1;
                Ok(ProbePermit { breaker: self, generation: s.generation, probe: true })
            }
        }
    }

    fn push_outcome(&self, s: &mut BreakerState, success: bool) {
        s.window.push_back(success);
        while s.window.len() > self.config.window_size {
            s.window.pop_front();
        }
    }

    fn transition(&self, s: &mut BreakerState, to: CircuitState) {
        let from = s.state;
        if from == to {
            return;
        }
        s.state = to;
        s.generation += 1;
        s.half_open_in_flight = 0;
        match to {
            CircuitState::Open => {
                s.success_count = 0;
                warn!(breaker = %self.name, %from, failures = s.failure_count, "circuit opened");
            }
            CircuitState::HalfOpen => {
                s.success_count = 0;
                info!(breaker = %self.name, %from, "circuit half-open, probing");
            }
            CircuitState::Closed => {
                s.failure_count = 0;
                s.success_count = 0;
                s.window.clear();
                info!(breaker = %self.name, %from, "circuit closed");
            }
        }
    }

    pub fn record_success(&self) {
        let mut s = self.lock();
        self.on_success(&mut s);
    }

    fn on_success(&self, s: &mut BreakerState) {
        self.push_outcome(s, true);
        match s.state {
            CircuitState::Closed => s.failure_count = 0,
            CircuitState::HalfOpen => {
                s.success_count += 1;
                if s.success_count >= self.config.success_threshold {
                    self.transition(s, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, message: &str) {
        let mut s = self.lock();
        self.on_failure(&mut s, message);
    }

    fn on_failure(&self, s: &mut BreakerState, message: &str) {
        self.push_outcome(s, false);
        s.last_failure = Some(Instant::now());
        s.last_error = Some(message.to_string());
        match s.state {
            CircuitState::Closed => {
                s.failure_count += 1;
                let window_full = s.window.len() >= self.config.window_size;
                let failures = s.window.iter().filter(|ok| !**ok).count();
                let rate = failures as f64 / s.window.len().max(1) as f64;
                if s.failure_count >= self.config.failure_threshold
                    || (window_full && rate >= self.config.failure_rate_threshold)
                {
                    self.transition(s, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                s.failure_count += 1;
                self.transition(s, CircuitState::Open);
            }
            CircuitState::Open => s.failure_count += 1,
        }
    }

    /// Stored state. An Open breaker past its recovery timeout still reports
    /// Open until the next call moves it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a call made now would be admitted.
    pub fn allows_calls(&self) -> bool {
        let s = self.lock();
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => s.recovery_elapsed(self.config.recovery_timeout),
            CircuitState::HalfOpen => s.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    pub fn reset(&self) {
        let mut s = self.lock();
        self.transition(&mut s, CircuitState::Closed);
        s.last_failure = None;
        s.last_error = None;
        s.window.clear();
        s.failure_count = 0;
        s.success_count = 0;
    }

    pub fn state_info(&self) -> CircuitBreakerInfo {
        let s = self.lock();
        let recent: Vec<bool> = s.window.iter().rev().take(RECENT_WINDOW).copied().collect();
        let recent_success_rate = if recent.is_empty() {
            1.0
        } else {
            recent.iter().filter(|ok| **ok).count() as f64 / recent.len() as f64
        };
        CircuitBreakerInfo {
            name: self.name.clone(),
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            seconds_since_last_failure: s.last_failure.map(|t| t.elapsed().as_secs_f64()),
            last_error: s.last_error.clone(),
            recent_success_rate,
            total_calls_in_window: s.window.len(),
            half_open_in_flight: s.half_open_in_flight,
            config: self.config.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One breaker per strategy name.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self { default_config, breakers: RwLock::new(BTreeMap::new()) }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, || self.default_config.clone())
    }

    /// Like [`Self::get_or_create`], with a custom config for a new breaker.
    pub fn get_or_create_with(&self, name: &str, config: impl FnOnce() -> CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(b) = self.get(name) {
            return b;
        }
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config()))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        for b in breakers.values() {
            b.reset();
        }
    }

    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        breakers.iter().map(|(k, b)| (k.clone(), b.state())).collect()
    }

    pub fn infos(&self) -> Vec<CircuitBreakerInfo> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        breakers.values().map(|b| b.state_info()).collect()
    }

    pub fn open_circuits(&self) -> Vec<String> {
        self.states()
            .into_iter()
            .filter(|(_, s)| *s == CircuitState::Open)
            .map(|(k, _)| k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
                success_threshold: successes,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), StrategyError> {
        b.call(|| async { Err::<(), _>(StrategyError::execution("test", "boom")) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), StrategyError> {
        b.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let b = breaker(3, Duration::from_secs(60), 1);
        for _ in 0..3 {
            assert!(matches!(fail(&b).await, Err(StrategyError::Execution { .. })));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let r = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StrategyError>(())
            })
            .await;
        assert!(matches!(r, Err(StrategyError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(60), 1);
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        succeed(&b).await.unwrap();
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_then_close() {
        let b = breaker(1, Duration::from_secs(10), 2);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allows_calls());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(b.allows_calls());
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, Duration::from_secs(10), 2);
        fail(&b).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(matches!(succeed(&b).await, Err(StrategyError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_flight() {
        let b = Arc::new(breaker(1, Duration::from_secs(10), 1));
        fail(&b).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = b.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .call(|| async {
                    let _ = release_rx.await;
                    Ok::<_, StrategyError>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(matches!(succeed(&b).await, Err(StrategyError::CircuitOpen { .. })));

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_permit() {
        let b = Arc::new(breaker(1, Duration::from_secs(10), 1));
        fail(&b).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(11)).await;

        let probe_breaker = b.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .call(|| async {
                    std::future::pending::<()>().await;
                    Ok::<_, StrategyError>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert!(!b.allows_calls());
        probe.abort();
        let _ = probe.await;
        assert!(b.allows_calls());
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    fn held_call(
        b: &Arc<CircuitBreaker>,
    ) -> (tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), StrategyError>>) {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let held = b.clone();
        let task = tokio::spawn(async move {
            held.call(|| async {
                let _ = rx.await;
                Ok::<_, StrategyError>(())
            })
            .await
        });
        (tx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_admitted_before_open_cannot_close_breaker() {
        let b = Arc::new(breaker(1, Duration::from_secs(10), 1));
        let (slow_tx, slow) = held_call(&b);
        tokio::task::yield_now().await;

        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(11)).await;
        let (probe_tx, probe) = held_call(&b);
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        slow_tx.send(()).unwrap();
        slow.await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.state_info().success_count, 0);

        probe_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_validation_errors_are_neutral() {
        let b = breaker(1, Duration::from_secs(60), 1);
        let r = b
            .call(|| async { Err::<(), _>(StrategyError::Validation { strategy: "test".into(), errors: vec![] }) })
            .await;
        assert!(matches!(r, Err(StrategyError::Validation { .. })));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.state_info().total_calls_in_window, 0);
    }

    #[test]
    fn test_failure_rate_opens_full_window() {
        let b = CircuitBreaker::new(
            "rate",
            CircuitBreakerConfig { failure_threshold: 100, window_size: 4, ..CircuitBreakerConfig::default() },
        );
        b.record_failure("x");
        b.record_success();
        b.record_failure("x");
        assert_eq!(b.state(), CircuitState::Closed);
        b.record_success();
        b.record_failure("x");
        // window is [ok, fail, ok, fail] → 50 %
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_state_info_and_reset() {
        let b = breaker(5, Duration::from_secs(60), 1);
        b.record_success();
        b.record_failure("disk full");
        let info = b.state_info();
        assert_eq!(info.state, CircuitState::Closed);
        assert_eq!(info.failure_count, 1);
        assert_eq!(info.last_error.as_deref(), Some("disk full"));
        assert_eq!(info.total_calls_in_window, 2);
        assert!((info.recent_success_rate - 0.5).abs() < 1e-9);
        b.reset();
        let info = b.state_info();
        assert_eq!(info.failure_count, 0);
        assert!(info.last_error.is_none());
        assert_eq!(info.recent_success_rate, 1.0);
    }

    #[test]
    fn test_registry_one_breaker_per_name() {
        let reg = CircuitBreakerRegistry::default();
        let a1 = reg.get_or_create("a");
        let a2 = reg.get_or_create("a");
        assert!(Arc::ptr_eq(&a1, &a2));
        for _ in 0..5 {
            a1.record_failure("x");
        }
        assert_eq!(reg.open_circuits(), vec!["a".to_string()]);
        assert!(reg.reset("a"));
        assert!(!reg.reset("missing"));
        assert_eq!(reg.states().get("a"), Some(&CircuitState::Closed));
    }

    #[test]
    fn test_display_is_snake_case() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
