//! Per-strategy configuration, fixed at registration time.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution priority. Lower value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPriority {
    Critical,
    High,
    Normal,
    Low,
    Fallback,
}

impl StrategyPriority {
    pub fn value(self) -> u8 {
        match self {
            StrategyPriority::Critical => 1,
            StrategyPriority::High => 2,
            StrategyPriority::Normal => 3,
            StrategyPriority::Low => 4,
            StrategyPriority::Fallback => 5,
        }
    }
}

impl std::fmt::Display for StrategyPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyPriority::Critical => "critical",
            StrategyPriority::High => "high",
            StrategyPriority::Normal => "normal",
            StrategyPriority::Low => "low",
            StrategyPriority::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

/// How the runtime drives the strategy body.
///
/// `Sync` runs the body inline on the calling task; every other mode runs it on
/// a spawned task that is aborted on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
    Parallel,
    Pipeline,
}

impl ExecutionMode {
    pub fn runs_inline(self) -> bool {
        matches!(self, ExecutionMode::Sync)
    }
}

/// Immutable configuration of one registered strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub name: String,
    pub version: String,
    pub priority: StrategyPriority,
    pub execution_mode: ExecutionMode,
    /// Hard deadline for one attempt.
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retry_attempts: u32,
    /// Timeouts are retried only when the strategy is safe to re-run.
    pub idempotent: bool,
    pub cache_enabled: bool,
    #[serde(with = "crate::config::duration_secs")]
    pub cache_ttl: Duration,
    pub feature_flags: BTreeMap<String, bool>,
    /// Names of strategies this one would like to fall back to. Advisory only;
    /// the fallback chain is configured on the fallback manager.
    pub fallback_strategies: Vec<String>,
    /// Report executions to the performance monitor when one is attached.
    pub enable_monitoring: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "unnamed".into(),
            version: "1.0.0".into(),
            priority: StrategyPriority::Normal,
            execution_mode: ExecutionMode::Async,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            idempotent: true,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            feature_flags: BTreeMap::new(),
            fallback_strategies: Vec::new(),
            enable_monitoring: true,
        }
    }
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_priority(mut self, priority: StrategyPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_cache(mut self, enabled: bool, ttl: Duration) -> Self {
        self.cache_enabled = enabled;
        self.cache_ttl = ttl;
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>, enabled: bool) -> Self {
        self.feature_flags.insert(feature.into(), enabled);
        self
    }

    pub fn with_fallbacks<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.fallback_strategies = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.feature_flags.get(feature).copied().unwrap_or(false)
    }

    /// `<name>_v<version>`, the key used for per-version monitoring series.
    pub fn versioned_name(&self) -> String {
        format!("{}_v{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = StrategyConfig::default();
        assert_eq!(cfg.version, "1.0.0");
        assert_eq!(cfg.priority, StrategyPriority::Normal);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.retry_attempts, 3);
        assert!(cfg.cache_enabled);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_priority_order_matches_value() {
        assert!(StrategyPriority::Critical < StrategyPriority::Fallback);
        assert_eq!(StrategyPriority::Critical.value(), 1);
        assert_eq!(StrategyPriority::Fallback.value(), 5);
    }

    #[test]
    fn test_feature_flags_default_off() {
        let cfg = StrategyConfig::new("s").with_feature("beta", true);
        assert!(cfg.is_feature_enabled("beta"));
        assert!(!cfg.is_feature_enabled("gamma"));
    }

    #[test]
    fn test_versioned_name() {
        let cfg = StrategyConfig::new("bmr").with_version("2.1.0");
        assert_eq!(cfg.versioned_name(), "bmr_v2.1.0");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: StrategyConfig = toml::from_str(
            r#"
            name = "fast"
            timeout = 0.5
            execution_mode = "sync"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.name, "fast");
        assert_eq!(cfg.timeout, Duration::from_millis(500));
        assert_eq!(cfg.execution_mode, ExecutionMode::Sync);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn test_only_sync_runs_inline() {
        assert!(ExecutionMode::Sync.runs_inline());
        assert!(!ExecutionMode::Async.runs_inline());
        assert!(!ExecutionMode::Pipeline.runs_inline());
    }
}
