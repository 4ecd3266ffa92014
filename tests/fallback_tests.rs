use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strategy_runtime::registry::StrategyRegistry;
use strategy_runtime::resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, FallbackConfig, FallbackManager, DEGRADED_STRATEGY_NAME,
    DEGRADED_WARNING, STALE_WARNING,
};
use strategy_runtime::{
    factory, ContextKind, Registration, Strategy, StrategyConfig, StrategyContext, StrategyError, StrategyResult,
    ValidationError,
};

type CallLog = Arc<Mutex<Vec<String>>>;

struct Scripted {
    name: String,
    healthy: Arc<AtomicBool>,
    calls: CallLog,
}

#[async_trait]
impl Strategy<String, String> for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: StrategyContext<String>) -> Result<StrategyResult<String>, StrategyError> {
        self.calls.lock().unwrap().push(self.name.clone());
        if self.healthy.load(Ordering::SeqCst) {
            Ok(StrategyResult::success(format!("{}:{}", self.name, ctx.payload)))
        } else {
            Err(StrategyError::execution(&self.name, "scripted failure"))
        }
    }

    fn validate_context(&self, ctx: &StrategyContext<String>) -> Vec<ValidationError> {
        if ctx.payload.is_empty() {
            vec![ValidationError::for_field("payload", "empty")]
        } else {
            Vec::new()
        }
    }

    fn supported_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::ANY]
    }
}

struct Harness {
    registry: Arc<StrategyRegistry<String, String>>,
    breakers: Arc<CircuitBreakerRegistry>,
    calls: CallLog,
    switches: Vec<(String, Arc<AtomicBool>)>,
}

impl Harness {
    fn new(strategies: &[(&str, bool)]) -> Self {
        let registry = Arc::new(StrategyRegistry::new());
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut switches = Vec::new();
        for (name, ok) in strategies {
            let healthy = Arc::new(AtomicBool::new(*ok));
            switches.push((name.to_string(), healthy.clone()));
            let owned = name.to_string();
            let log = calls.clone();
            registry.register(Registration::new(
                "lookup",
                StrategyConfig::new(*name).with_retries(0).with_cache(false, Duration::ZERO),
                factory(move |_| {
                    Arc::new(Scripted { name: owned.clone(), healthy: healthy.clone(), calls: log.clone() })
                        as Arc<dyn Strategy<String, String>>
                }),
            ));
        }
        Self {
            registry,
            breakers: Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            calls,
            switches,
        }
    }

    fn manager(&self, config: FallbackConfig) -> FallbackManager<String, String> {
        FallbackManager::new("lookup", config, self.registry.clone(), self.breakers.clone())
    }

    fn set_healthy(&self, name: &str, ok: bool) {
        let (_, switch) = self.switches.iter().find(|(n, _)| n == name).unwrap();
        switch.store(ok, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn no_degraded() -> FallbackConfig {
    FallbackConfig { degraded_mode_enabled: false, ..FallbackConfig::default() }
}

#[tokio::test]
async fn test_fallbacks_run_in_priority_order() {
    let h = Harness::new(&[("primary", false), ("f1", false), ("f2", true)]);
    let fm = h.manager(no_degraded());
    fm.add_fallback("f2", 2);
    fm.add_fallback("f1", 1);
    assert_eq!(fm.fallback_order(), vec!["f1", "f2"]);

    let out = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert_eq!(h.calls(), vec!["primary", "f1", "f2"]);
    assert_eq!(out.data, "f2:q");
    assert!(out.fallback_used);
    assert_eq!(out.metadata["fallback_strategy"], "f2");

    let status = fm.fallback_status();
    assert_eq!(status.fallbacks[0].attempts, 1);
    assert_eq!(status.fallbacks[0].successes, 0);
    assert_eq!(status.fallbacks[1].successes, 1);
}

#[tokio::test]
async fn test_disabled_fallback_is_never_invoked() {
    let h = Harness::new(&[("primary", false), ("f1", true), ("f2", true)]);
    let fm = h.manager(no_degraded());
    fm.add_fallback("f1", 1);
    fm.add_fallback("f2", 2);
    h.registry.disable("lookup", "f1");

    let out = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert_eq!(out.data, "f2:q");
    assert!(!h.calls().contains(&"f1".to_string()));
    assert!(!fm.fallback_status().fallbacks[0].available);
}

#[tokio::test]
async fn test_fallback_behind_open_breaker_is_skipped() {
    let h = Harness::new(&[("primary", false), ("f1", true), ("f2", true)]);
    let fm = h.manager(no_degraded());
    fm.add_fallback("f1", 1);
    fm.add_fallback("f2", 2);
    let breaker = h.breakers.get_or_create("f1");
    for _ in 0..CircuitBreakerConfig::default().failure_threshold {
        breaker.record_failure("forced");
    }
    assert!(!breaker.allows_calls());

    let out = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert_eq!(out.data, "f2:q");
    assert_eq!(h.calls(), vec!["primary", "f2"]);
}

#[tokio::test]
async fn test_attempt_budget_limits_fallbacks() {
    let h = Harness::new(&[("primary", false), ("f1", false), ("f2", true)]);
    let fm = h.manager(FallbackConfig { max_fallback_attempts: 1, ..no_degraded() });
    fm.add_fallback("f1", 1);
    fm.add_fallback("f2", 2);

    let err = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap_err();
    assert_eq!(h.calls(), vec!["primary", "f1"]);
    match err {
        StrategyError::FallbackExhausted { attempts, .. } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].strategy, "f1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_exhausted_without_cache_or_degraded_mode() {
    let h = Harness::new(&[("primary", false), ("f1", false), ("f2", false)]);
    let fm = h.manager(no_degraded());
    fm.add_fallback("f1", 1);
    fm.add_fallback("f2", 2);

    let err = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap_err();
    assert!(matches!(err, StrategyError::FallbackExhausted { ref attempts, .. } if attempts.len() == 2));
    assert!(err.to_string().contains("scripted failure"));
    assert!(!fm.is_degraded());
}

#[tokio::test]
async fn test_degraded_response_when_everything_fails() {
    let h = Harness::new(&[("primary", false), ("f1", false)]);
    let fm = h
        .manager(FallbackConfig::default())
        .with_degraded_responder(Arc::new(|ctx: &StrategyContext<String>, _: &StrategyError| format!("static:{}", ctx.payload)));
    fm.add_fallback("f1", 1);

    let out = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert!(out.is_success());
    assert_eq!(out.data, "static:q");
    assert_eq!(out.strategy_name, DEGRADED_STRATEGY_NAME);
    assert!(out.warnings.iter().any(|w| w == DEGRADED_WARNING));
    assert_eq!(out.metadata["degraded_mode"], true);
    assert!(fm.is_degraded());

    fm.exit_degraded_mode();
    assert!(!fm.is_degraded());
}

#[tokio::test]
async fn test_stale_cached_result_served_after_failures() {
    let h = Harness::new(&[("primary", true), ("f1", false)]);
    let fm = h.manager(no_degraded());
    fm.add_fallback("f1", 1);

    let fresh = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert_eq!(fm.cache_len(), 1);

    h.set_healthy("primary", false);
    let stale = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert_eq!(stale.data, fresh.data);
    assert!(stale.fallback_used);
    assert!(stale.warnings.iter().any(|w| w == STALE_WARNING));

    fm.clear_cache();
    assert!(fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.is_err());
}

#[tokio::test]
async fn test_prefer_cached_skips_primary() {
    let h = Harness::new(&[("primary", true)]);
    let fm = h.manager(FallbackConfig { prefer_cached_result: true, ..no_degraded() });

    fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    let cached = fm.execute_with_fallback("primary", StrategyContext::new("q".to_string())).await.unwrap();
    assert_eq!(h.calls(), vec!["primary"]);
    assert!(cached.cache_hit);
    assert!(cached.fallback_used);

    fm.execute_with_fallback("primary", StrategyContext::new("other".to_string())).await.unwrap();
    assert_eq!(h.calls().len(), 2);
}

#[tokio::test]
async fn test_validation_error_is_not_recovered() {
    let h = Harness::new(&[("primary", true), ("f1", true)]);
    let fm = h.manager(FallbackConfig::default());
    fm.add_fallback("f1", 1);

    let err = fm.execute_with_fallback("primary", StrategyContext::new(String::new())).await.unwrap_err();
    assert!(matches!(err, StrategyError::Validation { .. }));
    assert!(h.calls().is_empty());
    assert!(!fm.is_degraded());
}

#[tokio::test]
async fn test_unknown_primary_is_not_found() {
    let h = Harness::new(&[("f1", true)]);
    let fm = h.manager(FallbackConfig::default());
    let err = fm.execute_with_fallback("ghost", StrategyContext::new("q".to_string())).await.unwrap_err();
    assert!(matches!(err, StrategyError::NotFound { .. }));
}
