//! Framework configuration loaded from TOML.
//!
//! Every section is optional; anything left out falls back to the component's
//! `Default`. Durations are written as (fractional) seconds.
//!
//! ```toml
//! [circuit_breaker]
//! failure_threshold = 5
//! recovery_timeout = 60.0
//!
//! [fallback]
//! prefer_cached_result = true
//!
//! [[strategies]]
//! name = "fast"
//! timeout = 0.5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::manager::ManagerConfig;
use crate::monitoring::{CollectorConfig, MonitorThresholds};
use crate::resilience::{CircuitBreakerConfig, FallbackConfig};
use crate::selector::SelectorConfig;
use crate::strategy::StrategyConfig;

/// Top-level configuration for a [`crate::manager::StrategyManager`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub manager: ManagerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub fallback: FallbackConfig,
    pub monitor: MonitorThresholds,
    pub collector: CollectorConfig,
    pub selector: SelectorConfig,
    /// Per-strategy overrides, matched by `name`.
    pub strategies: Vec<StrategyConfig>,
}

impl FrameworkConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: FrameworkConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Override for the strategy called `name`, if one was configured.
    pub fn strategy(&self, name: &str) -> Option<&StrategyConfig> {
        self.strategies.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if cb.success_threshold == 0 {
            return Err(invalid("circuit_breaker.success_threshold", "must be at least 1"));
        }
        if cb.window_size == 0 {
            return Err(invalid("circuit_breaker.window_size", "must be at least 1"));
        }
        if cb.half_open_max_calls == 0 {
            return Err(invalid("circuit_breaker.half_open_max_calls", "must be at least 1"));
        }
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
            return Err(invalid("circuit_breaker.failure_rate_threshold", "must be in (0, 1]"));
        }
        if self.fallback.cache_capacity == 0 {
            return Err(invalid("fallback.cache_capacity", "must be at least 1"));
        }
        if self.manager.max_parallel == 0 {
            return Err(invalid("manager.max_parallel", "must be at least 1"));
        }
        if self.collector.max_points_per_metric == 0 {
            return Err(invalid("collector.max_points_per_metric", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.selector.health_floor) {
            return Err(invalid("selector.health_floor", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.monitor.min_success_rate) {
            return Err(invalid("monitor.min_success_rate", "must be in [0, 1]"));
        }
        for s in &self.strategies {
            if s.name.trim().is_empty() {
                return Err(invalid("strategies.name", "must not be empty"));
            }
            if s.timeout.is_zero() {
                return Err(ConfigError::Invalid {
                    field: "strategies.timeout",
                    reason: format!("strategy '{}' has a zero timeout", s.name),
                });
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}

/// Serde adapter: `Duration` as floating-point seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration in seconds: {secs}")))
    }
}
