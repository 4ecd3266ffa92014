//! # Stage: Performance Monitor
//!
//! ## Responsibility
//! Tracks every strategy execution into the [`MetricsCollector`], keeps
//! per-strategy [`StrategyMetrics`] keyed by `<name>_v<version>`, and raises
//! alerts when executions are slow or success rates drop.
//!
//! ## Guarantees
//! - Recording never fails; alert callbacks that error or panic are logged
//!   and skipped
//! - No lock is held while callbacks run
//!
//! ## NOT Responsible For
//! - Acting on alerts (callers register callbacks)

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::collector::{labels, MetricStatistics, MetricsCollector, Trend};
use crate::strategy::{StrategyHealth, StrategyMetrics, StrategyResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorThresholds {
    pub max_execution_time_ms: f64,
    pub min_success_rate: f64,
    pub max_error_rate: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self { max_execution_time_ms: 5_000.0, min_success_rate: 0.95, max_error_rate: 0.05 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SlowExecution,
    LowSuccessRate,
    HighErrorRate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    /// `<name>_v<version>`
    pub strategy: String,
    pub value: f64,
    pub threshold: f64,
}

impl std::fmt::Display for PerformanceAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AlertKind::SlowExecution => write!(
                f,
                "{}: execution time {:.1}ms exceeds {:.1}ms",
                self.strategy, self.value, self.threshold
            ),
            AlertKind::LowSuccessRate => write!(
                f,
                "{}: success rate {:.3} below {:.3}",
                self.strategy, self.value, self.threshold
            ),
            AlertKind::HighErrorRate => write!(
                f,
                "{}: error rate {:.3} above {:.3}",
                self.strategy, self.value, self.threshold
            ),
        }
    }
}

pub type AlertCallback = Arc<dyn Fn(&PerformanceAlert) -> Result<(), String> + Send + Sync>;

/// Per-strategy report produced by [`PerformanceMonitor::performance_report`].
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub strategy: String,
    pub version: String,
    pub health: StrategyHealth,
    pub execution_time: Option<MetricStatistics>,
    pub execution_time_trend: Trend,
    pub alerts: Vec<PerformanceAlert>,
}

pub struct PerformanceMonitor {
    collector: MetricsCollector,
    thresholds: MonitorThresholds,
    strategies: Mutex<BTreeMap<String, StrategyMetrics>>,
    callbacks: RwLock<Vec<AlertCallback>>,
}

impl PerformanceMonitor {
    pub fn new(collector: MetricsCollector, thresholds: MonitorThresholds) -> Self {
        Self {
            collector,
            thresholds,
            strategies: Mutex::new(BTreeMap::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.thresholds
    }

    pub fn add_alert_callback<F>(&self, f: F)
    where
        F: Fn(&PerformanceAlert) -> Result<(), String> + Send + Sync + 'static,
    {
        self.add_alert_callback_arc(Arc::new(f));
    }

    pub fn add_alert_callback_arc(&self, f: AlertCallback) {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner).push(f);
    }

    /// Record one execution of `name` at `version`.
    pub fn track_execution<T>(&self, name: &str, version: &str, result: &StrategyResult<T>) {
        let key = series_key(name, version);
        let success = result.is_success();
        let tags = labels(&[("strategy", name), ("version", version)]);

        self.collector
            .record_timer(&format!("strategy_execution_time_{key}"), result.execution_time_ms, tags.clone());
        self.collector.record_counter(&format!("strategy_executions_{key}"), 1.0, tags.clone());
        if !success {
            self.collector.record_counter(&format!("strategy_errors_{key}"), 1.0, tags);
        }

        let snapshot = {
            let mut strategies = self.strategies.lock().unwrap_or_else(PoisonError::into_inner);
            let m = strategies.entry(key.clone()).or_default();
            m.record_execution(result.execution_time_ms, success);
            m.clone()
        };

        if result.execution_time_ms > self.thresholds.max_execution_time_ms {
            self.fire(PerformanceAlert {
                kind: AlertKind::SlowExecution,
                strategy: key.clone(),
                value: result.execution_time_ms,
                threshold: self.thresholds.max_execution_time_ms,
            });
        }
        if snapshot.success_rate < self.thresholds.min_success_rate {
            self.fire(PerformanceAlert {
                kind: AlertKind::LowSuccessRate,
                strategy: key,
                value: snapshot.success_rate,
                threshold: self.thresholds.min_success_rate,
            });
        }
    }

    fn fire(&self, alert: PerformanceAlert) {
        warn!(alert = %alert, "performance alert");
        let callbacks: Vec<AlertCallback> = match self.callbacks.read() {
            Ok(cbs) => cbs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for cb in callbacks {
            match catch_unwind(AssertUnwindSafe(|| cb(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, strategy = %alert.strategy, "alert callback failed"),
                Err(_) => error!(strategy = %alert.strategy, "alert callback panicked"),
            }
        }
    }

    pub fn strategy_metrics(&self, name: &str, version: &str) -> Option<StrategyMetrics> {
        self.strategies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&series_key(name, version))
            .cloned()
    }

    pub fn reset_strategy(&self, name: &str, version: &str) {
        self.strategies.lock().unwrap_or_else(PoisonError::into_inner).remove(&series_key(name, version));
    }

    /// Alerts that hold right now, across every tracked strategy.
    pub fn performance_alerts(&self) -> Vec<PerformanceAlert> {
        let strategies = self.strategies.lock().unwrap_or_else(PoisonError::into_inner);
        strategies.iter().flat_map(|(key, m)| self.alerts_for(key, m)).collect()
    }

    fn alerts_for(&self, key: &str, m: &StrategyMetrics) -> Vec<PerformanceAlert> {
        let t = &self.thresholds;
        let mut alerts = Vec::new();
        if m.execution_count == 0 {
            return alerts;
        }
        if m.average_execution_time_ms > t.max_execution_time_ms {
            alerts.push(PerformanceAlert {
                kind: AlertKind::SlowExecution,
                strategy: key.to_string(),
                value: m.average_execution_time_ms,
                threshold: t.max_execution_time_ms,
            });
        }
        if m.success_rate < t.min_success_rate {
            alerts.push(PerformanceAlert {
                kind: AlertKind::LowSuccessRate,
                strategy: key.to_string(),
                value: m.success_rate,
                threshold: t.min_success_rate,
            });
        }
        if m.error_rate() > t.max_error_rate {
            alerts.push(PerformanceAlert {
                kind: AlertKind::HighErrorRate,
                strategy: key.to_string(),
                value: m.error_rate(),
                threshold: t.max_error_rate,
            });
        }
        alerts
    }

    pub fn performance_report(&self, name: &str, version: &str, window: Option<Duration>) -> Option<PerformanceReport> {
        let key = series_key(name, version);
        let metrics = self.strategy_metrics(name, version)?;
        let timer = format!("strategy_execution_time_{key}");
        Some(PerformanceReport {
            strategy: name.to_string(),
            version: version.to_string(),
            health: StrategyHealth::from_metrics(name, version, &metrics, self.thresholds.min_success_rate),
            execution_time: self.collector.statistics(&timer, window),
            execution_time_trend: self.collector.trend(&timer, window),
            alerts: self.alerts_for(&key, &metrics),
        })
    }

    /// Every tracked `<name>_v<version>` key.
    pub fn tracked_strategies(&self) -> Vec<String> {
        self.strategies.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }
}

fn series_key(name: &str, version: &str) -> String {
    format!("{name}_v{version}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn result(ms: f64, ok: bool) -> StrategyResult<()> {
        let mut r = if ok { StrategyResult::success(()) } else { StrategyResult::failure("s", "boom") };
        r.execution_time_ms = ms;
        r
    }

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(MetricsCollector::default(), MonitorThresholds::default())
    }

    #[test]
    fn test_track_execution_records_series() {
        let m = monitor();
        m.track_execution("bmr", "1.0.0", &result(12.0, true));
        m.track_execution("bmr", "1.0.0", &result(8.0, false));
        let c = m.collector();
        assert_eq!(c.statistics("strategy_execution_time_bmr_v1.0.0", None).unwrap().count, 2);
        assert_eq!(c.statistics("strategy_executions_bmr_v1.0.0", None).unwrap().sum, 2.0);
        assert_eq!(c.statistics("strategy_errors_bmr_v1.0.0", None).unwrap().sum, 1.0);
        let sm = m.strategy_metrics("bmr", "1.0.0").unwrap();
        assert_eq!(sm.execution_count, 2);
        assert_eq!(sm.error_count, 1);
    }

    #[test]
    fn test_alerts_fire_and_callback_errors_are_contained() {
        let m = monitor();
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        m.add_alert_callback(|_| Err("sink offline".into()));
        m.add_alert_callback(|_| panic!("callback bug"));
        m.add_alert_callback(move |a| {
            assert_eq!(a.strategy, "slow_v1");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        m.track_execution("slow", "1", &result(6_000.0, true));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // recording still happened despite the failing callbacks
        assert_eq!(m.strategy_metrics("slow", "1").unwrap().execution_count, 1);
    }

    #[test]
    fn test_low_success_rate_alert() {
        let m = monitor();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        m.add_alert_callback(move |a| {
            sink.lock().unwrap().push(a.kind);
            Ok(())
        });
        m.track_execution("s", "1", &result(1.0, false));
        assert_eq!(*kinds.lock().unwrap(), vec![AlertKind::LowSuccessRate]);

        let current = m.performance_alerts();
        assert!(current.iter().any(|a| a.kind == AlertKind::LowSuccessRate));
        assert!(current.iter().any(|a| a.kind == AlertKind::HighErrorRate));
    }

    #[test]
    fn test_report_and_reset() {
        let m = monitor();
        assert!(m.performance_report("x", "1", None).is_none());
        m.track_execution("x", "1", &result(3.0, true));
        let report = m.performance_report("x", "1", None).unwrap();
        assert!(report.health.healthy);
        assert_eq!(report.execution_time.unwrap().mean, 3.0);
        assert!(report.alerts.is_empty());
        assert_eq!(m.tracked_strategies(), vec!["x_v1".to_string()]);
        m.reset_strategy("x", "1");
        assert!(m.strategy_metrics("x", "1").is_none());
    }
}
