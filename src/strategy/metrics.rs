//! Running counters owned by one strategy runtime.

use serde::Serialize;
use tokio::time::Instant;

/// Execution counters for a single strategy instance.
///
/// Updated only by the owning runtime (under its mutex); everyone else reads
/// clones.
#[derive(Debug, Clone)]
pub struct StrategyMetrics {
    pub execution_count: u64,
    pub error_count: u64,
    pub total_execution_time_ms: f64,
    pub average_execution_time_ms: f64,
    /// 1.0 until the first failure is recorded.
    pub success_rate: f64,
    pub last_execution: Option<Instant>,
    pub cache_lookups: u64,
    pub cache_hits: u64,
}

impl Default for StrategyMetrics {
    fn default() -> Self {
        Self {
            execution_count: 0,
            error_count: 0,
            total_execution_time_ms: 0.0,
            average_execution_time_ms: 0.0,
            success_rate: 1.0,
            last_execution: None,
            cache_lookups: 0,
            cache_hits: 0,
        }
    }
}

impl StrategyMetrics {
    pub fn record_execution(&mut self, execution_time_ms: f64, success: bool) {
        self.execution_count += 1;
        self.total_execution_time_ms += execution_time_ms;
        self.average_execution_time_ms = self.total_execution_time_ms / self.execution_count as f64;
        if !success {
            self.error_count += 1;
        }
        self.success_rate = 1.0 - self.error_count as f64 / self.execution_count as f64;
        self.last_execution = Some(Instant::now());
    }

    pub fn record_cache_lookup(&mut self, hit: bool) {
        self.cache_lookups += 1;
        if hit {
            self.cache_hits += 1;
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.cache_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.cache_lookups as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        1.0 - self.success_rate
    }

    /// Overall score in [0, 100]: reliability 40 %, speed 30 %, cache consistency 30 %.
    pub fn performance_score(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        let speed = (100.0 - self.average_execution_time_ms * 10.0).max(0.0);
        let reliability = self.success_rate * 100.0;
        let consistency = (self.cache_hit_rate() * 100.0).min(100.0);
        reliability * 0.4 + speed * 0.3 + consistency * 0.3
    }

    pub fn is_healthy(&self, success_floor: f64) -> bool {
        self.success_rate > success_floor
    }

    pub fn seconds_since_last_execution(&self) -> Option<f64> {
        self.last_execution.map(|t| t.elapsed().as_secs_f64())
    }
}

/// Serializable health view of one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyHealth {
    pub name: String,
    pub version: String,
    pub healthy: bool,
    pub performance_score: f64,
    pub execution_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub cache_hit_rate: f64,
    pub seconds_since_last_execution: Option<f64>,
}

impl StrategyHealth {
    pub fn from_metrics(name: &str, version: &str, metrics: &StrategyMetrics, success_floor: f64) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            healthy: metrics.is_healthy(success_floor),
            performance_score: metrics.performance_score(),
            execution_count: metrics.execution_count,
            error_count: metrics.error_count,
            success_rate: metrics.success_rate,
            average_execution_time_ms: metrics.average_execution_time_ms,
            cache_hit_rate: metrics.cache_hit_rate(),
            seconds_since_last_execution: metrics.seconds_since_last_execution(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metrics_are_healthy_with_zero_score() {
        let m = StrategyMetrics::default();
        assert_eq!(m.success_rate, 1.0);
        assert!(m.is_healthy(0.95));
        assert_eq!(m.performance_score(), 0.0);
    }

    #[test]
    fn test_record_execution_updates_rates() {
        let mut m = StrategyMetrics::default();
        m.record_execution(10.0, true);
        m.record_execution(30.0, false);
        assert_eq!(m.execution_count, 2);
        assert_eq!(m.error_count, 1);
        assert!((m.average_execution_time_ms - 20.0).abs() < 1e-9);
        assert!((m.success_rate - 0.5).abs() < 1e-9);
        assert!(m.last_execution.is_some());
    }

    #[test]
    fn test_performance_score_formula() {
        let mut m = StrategyMetrics::default();
        // 2 ms average → speed 80; reliability 100; no cache lookups → consistency 0
        m.record_execution(2.0, true);
        assert!((m.performance_score() - (100.0 * 0.4 + 80.0 * 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_performance_score_counts_cache_hits() {
        let mut m = StrategyMetrics::default();
        m.record_execution(20.0, true); // speed clamps to 0
        m.record_cache_lookup(true);
        m.record_cache_lookup(false);
        assert!((m.cache_hit_rate() - 0.5).abs() < 1e-9);
        assert!((m.performance_score() - (40.0 + 15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_health_floor_is_strict() {
        let mut m = StrategyMetrics::default();
        for _ in 0..19 {
            m.record_execution(1.0, true);
        }
        m.record_execution(1.0, false);
        // exactly 0.95 is not above the floor
        assert!(!m.is_healthy(0.95));
        assert!(m.is_healthy(0.9));
    }
}
