//! # Stage: A/B Testing
//!
//! ## Responsibility
//! Runs traffic-split experiments between strategies: validates test
//! definitions, assigns users to strategies (sticky per user), records
//! outcomes and decides a winner once enough samples are in.
//!
//! ## Guarantees
//! - A user keeps the strategy first assigned for the lifetime of a test
//! - Traffic splits must total 100 % (±0.01) and name only listed strategies
//! - Recording never fails; unknown tests are ignored
//!
//! ## NOT Responsible For
//! - Executing strategies (the manager runs the assigned strategy)

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::collector::{labels, MetricsCollector};
use crate::error::StrategyError;
use crate::strategy::StrategyResult;

/// Minimum samples on both sides before a p-value is computed.
pub const MIN_SAMPLES_FOR_P_VALUE: u64 = 30;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub test_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub strategies: Vec<String>,
    /// Strategy name → percentage of traffic.
    pub traffic_split: BTreeMap<String, f64>,
    #[serde(default = "default_min_samples")]
    pub minimum_sample_size: u64,
    #[serde(default = "default_confidence")]
    pub confidence_level: f64,
    #[serde(default = "default_max_duration", with = "crate::config::duration_secs")]
    pub max_duration: Duration,
    #[serde(default)]
    pub auto_promote_winner: bool,
}

fn default_min_samples() -> u64 {
    100
}

fn default_confidence() -> f64 {
    0.95
}

fn default_max_duration() -> Duration {
    Duration::from_secs(30 * 24 * 3600)
}

impl AbTestConfig {
    /// A test over `split`, listing the strategies in the order given.
    pub fn new<S: Into<String>>(test_id: impl Into<String>, split: impl IntoIterator<Item = (S, f64)>) -> Self {
        let mut strategies = Vec::new();
        let mut traffic_split = BTreeMap::new();
        for (name, pct) in split {
            let name = name.into();
            strategies.push(name.clone());
            traffic_split.insert(name, pct);
        }
        let test_id = test_id.into();
        Self {
            name: test_id.clone(),
            test_id,
            description: String::new(),
            strategies,
            traffic_split,
            minimum_sample_size: default_min_samples(),
            confidence_level: default_confidence(),
            max_duration: default_max_duration(),
            auto_promote_winner: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_minimum_sample_size(mut self, n: u64) -> Self {
        self.minimum_sample_size = n;
        self
    }

    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_max_duration(mut self, d: Duration) -> Self {
        self.max_duration = d;
        self
    }

    pub fn with_auto_promote(mut self, enabled: bool) -> Self {
        self.auto_promote_winner = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.traffic_split.is_empty() {
            return Err(invalid("traffic split is empty"));
        }
        let total: f64 = self.traffic_split.values().sum();
        if (total - 100.0).abs() > 0.01 {
            return Err(invalid(format!("traffic split must sum to 100, got {total}")));
        }
        for (name, pct) in &self.traffic_split {
            if !self.strategies.contains(name) {
                return Err(invalid(format!("split names unknown strategy '{name}'")));
            }
            if *pct < 0.0 {
                return Err(invalid(format!("negative traffic share for '{name}'")));
            }
        }
        if self.minimum_sample_size == 0 {
            return Err(invalid("minimum_sample_size must be at least 1"));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(invalid("confidence_level must be in (0, 1)"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> StrategyError {
    StrategyError::InvalidAbTest(reason.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl std::fmt::Display for AbTestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbTestStatus::Draft => "draft",
            AbTestStatus::Running => "running",
            AbTestStatus::Paused => "paused",
            AbTestStatus::Completed => "completed",
            AbTestStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Per-strategy accumulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct VariantStats {
    samples: u64,
    successes: u64,
    total_ms: f64,
}

impl VariantStats {
    fn record(&mut self, success: bool, ms: f64) {
        self.samples += 1;
        if success {
            self.successes += 1;
        }
        self.total_ms += ms;
    }

    fn success_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.successes as f64 / self.samples as f64
        }
    }

    fn mean_ms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ms / self.samples as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AbTestResult {
    pub strategy: String,
    pub sample_size: u64,
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub confidence_interval: (f64, f64),
    pub statistical_significance: bool,
    pub p_value: f64,
}

impl AbTestResult {
    /// Winner score: success rate weighted 0.7, speed 0.3.
    pub fn score(&self) -> f64 {
        0.7 * self.success_rate + 0.3 * (1.0 - self.average_execution_time_ms / 10_000.0).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AbTestAnalysis {
    pub test_id: String,
    pub status: AbTestStatus,
    pub results: Vec<AbTestResult>,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbTestSummary {
    pub config: AbTestConfig,
    pub status: AbTestStatus,
    pub elapsed_secs: f64,
    pub assigned_users: usize,
    pub analysis: AbTestAnalysis,
}

// ---------------------------------------------------------------------------
// Framework
// ---------------------------------------------------------------------------

struct AbTest {
    config: AbTestConfig,
    status: AbTestStatus,
    started_at: Instant,
    assignments: HashMap<String, String>,
    stats: HashMap<String, VariantStats>,
    winner: Option<String>,
}

impl AbTest {
    fn is_expired(&self) -> bool {
        self.started_at.elapsed() > self.config.max_duration
    }

    fn analyze(&self) -> Vec<AbTestResult> {
        let z = if self.config.confidence_level >= 0.95 { 1.96 } else { 1.645 };
        let empty = VariantStats::default();
        let stats: Vec<(&String, &VariantStats)> = self
            .config
            .strategies
            .iter()
            .map(|s| (s, self.stats.get(s).unwrap_or(&empty)))
            .collect();

        stats
            .iter()
            .enumerate()
            .map(|(i, (name, s))| {
                let n = s.samples;
                let rate = s.success_rate();
                let ci = if n == 0 {
                    (0.0, 0.0)
                } else {
                    let margin = z * (rate * (1.0 - rate) / n as f64).sqrt();
                    ((rate - margin).max(0.0), (rate + margin).min(1.0))
                };
                // compare against the best-performing other strategy, earliest on ties
                let best_other = stats
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, (_, o))| *o)
                    .fold(None::<&VariantStats>, |best, o| match best {
                        Some(b) if b.success_rate() >= o.success_rate() => Some(b),
                        _ => Some(o),
                    });
                AbTestResult {
                    strategy: (*name).clone(),
                    sample_size: n,
                    success_rate: rate,
                    average_execution_time_ms: s.mean_ms(),
                    confidence_interval: ci,
                    statistical_significance: n >= self.config.minimum_sample_size,
                    p_value: best_other.map_or(1.0, |o| two_proportion_p_value(s, o)),
                }
            })
            .collect()
    }
}

/// Two-sided p-value of a pooled two-proportion z-test.
fn two_proportion_p_value(a: &VariantStats, b: &VariantStats) -> f64 {
    if a.samples < MIN_SAMPLES_FOR_P_VALUE || b.samples < MIN_SAMPLES_FOR_P_VALUE {
        return 1.0;
    }
    let (n1, n2) = (a.samples as f64, b.samples as f64);
    let pooled = (a.successes + b.successes) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se <= 0.0 {
        return 1.0;
    }
    let z = (a.success_rate() - b.success_rate()) / se;
    (2.0 * standard_normal_upper_tail(z.abs())).min(1.0)
}

/// P(Z > x) for a standard normal Z.
fn standard_normal_upper_tail(x: f64) -> f64 {
    if x < 0.0 {
        return 1.0 - standard_normal_upper_tail(-x);
    }
    if x > 8.0 {
        return 0.0;
    }
    // Abramowitz & Stegun 26.2.17
    let t = 1.0 / (1.0 + 0.2316419 * x);
    let poly = t * (0.319381530 + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429))));
    let pdf = (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt();
    pdf * poly
}

fn pick_winner(results: &[AbTestResult]) -> Option<String> {
    let mut best: Option<&AbTestResult> = None;
    for r in results.iter().filter(|r| r.statistical_significance) {
        match best {
            Some(b) if b.score() >= r.score() => {}
            _ => best = Some(r),
        }
    }
    best.map(|r| r.strategy.clone())
}

/// Owns every A/B test and its assignments.
pub struct AbTestingFramework {
    collector: MetricsCollector,
    tests: Mutex<HashMap<String, AbTest>>,
    rng: Mutex<StdRng>,
}

impl AbTestingFramework {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector, tests: Mutex::new(HashMap::new()), rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Deterministic assignment sequence, for reproducible runs.
    pub fn with_seed(collector: MetricsCollector, seed: u64) -> Self {
        Self { collector, tests: Mutex::new(HashMap::new()), rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AbTest>> {
        self.tests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_test<R>(
        &self,
        test_id: &str,
        f: impl FnOnce(&mut AbTest) -> Result<R, StrategyError>,
    ) -> Result<R, StrategyError> {
        let mut tests = self.lock();
        let test = tests.get_mut(test_id).ok_or_else(|| invalid(format!("unknown test '{test_id}'")))?;
        f(test)
    }

    /// Validate and start a test.
    pub fn create_test(&self, config: AbTestConfig) -> Result<(), StrategyError> {
        config.validate()?;
        let mut tests = self.lock();
        if tests.contains_key(&config.test_id) {
            return Err(invalid(format!("test '{}' already exists", config.test_id)));
        }
        info!(test_id = %config.test_id, strategies = ?config.strategies, "A/B test started");
        tests.insert(
            config.test_id.clone(),
            AbTest {
                config,
                status: AbTestStatus::Running,
                started_at: Instant::now(),
                assignments: HashMap::new(),
                stats: HashMap::new(),
                winner: None,
            },
        );
        Ok(())
    }

    /// Strategy for `user_id`, or `None` when the test is unknown, not
    /// running, or past its maximum duration.
    pub fn assign_strategy(&self, test_id: &str, user_id: &str) -> Option<String> {
        let mut tests = self.lock();
        let test = tests.get_mut(test_id)?;
        if test.status != AbTestStatus::Running {
            return None;
        }
        if test.is_expired() {
            info!(test_id, "A/B test reached its maximum duration");
            test.status = AbTestStatus::Completed;
            return None;
        }
        if let Some(existing) = test.assignments.get(user_id) {
            return Some(existing.clone());
        }

        let draw: f64 = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_range(0.0..100.0);
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (name, pct) in &test.config.traffic_split {
            cumulative += pct;
            if draw < cumulative {
                chosen = Some(name.clone());
                break;
            }
        }
        let chosen = chosen.or_else(|| test.config.traffic_split.keys().next_back().cloned())?;
        test.assignments.insert(user_id.to_string(), chosen.clone());
        debug!(test_id, user_id, strategy = %chosen, "user assigned");
        Some(chosen)
    }

    /// Feed one outcome into the test and the metrics collector.
    pub fn record_result<T>(&self, test_id: &str, strategy: &str, result: &StrategyResult<T>, user_id: &str) {
        let success = result.is_success();
        let tags = labels(&[("test_id", test_id), ("strategy", strategy)]);
        self.collector.record_timer("ab_test_execution_time", result.execution_time_ms, tags.clone());
        let mut exec_tags = tags.clone();
        exec_tags.insert("success".into(), success.to_string());
        self.collector.record_counter("ab_test_executions", 1.0, exec_tags);
        if !success {
            self.collector.record_counter("ab_test_errors", 1.0, tags);
        }

        let mut tests = self.lock();
        match tests.get_mut(test_id) {
            Some(test) => test.stats.entry(strategy.to_string()).or_default().record(success, result.execution_time_ms),
            None => debug!(test_id, user_id, "result for unknown test ignored"),
        }
    }

    pub fn analyze_results(&self, test_id: &str) -> Result<AbTestAnalysis, StrategyError> {
        self.with_test(test_id, |test| {
            let results = test.analyze();
            let winner = test.winner.clone().or_else(|| pick_winner(&results));
            Ok(AbTestAnalysis { test_id: test_id.to_string(), status: test.status, results, winner })
        })
    }

    /// Best significant strategy, if any. Completes the test when
    /// `auto_promote_winner` is set.
    pub fn get_winner(&self, test_id: &str) -> Result<Option<String>, StrategyError> {
        self.with_test(test_id, |test| {
            if let Some(w) = &test.winner {
                return Ok(Some(w.clone()));
            }
            let winner = pick_winner(&test.analyze());
            if let Some(w) = &winner {
                if test.config.auto_promote_winner && test.status == AbTestStatus::Running {
                    info!(test_id, winner = %w, "A/B test winner promoted");
                    test.status = AbTestStatus::Completed;
                    test.winner = Some(w.clone());
                }
            }
            Ok(winner)
        })
    }

    /// Complete the test and return its final analysis.
    pub fn stop_test(&self, test_id: &str) -> Result<AbTestAnalysis, StrategyError> {
        self.with_test(test_id, |test| {
            if test.status != AbTestStatus::Cancelled {
                test.status = AbTestStatus::Completed;
            }
            Ok(())
        })?;
        info!(test_id, "A/B test stopped");
        self.analyze_results(test_id)
    }

    pub fn cancel_test(&self, test_id: &str) -> Result<(), StrategyError> {
        self.with_test(test_id, |test| {
            test.status = AbTestStatus::Cancelled;
            Ok(())
        })
    }

    pub fn pause_test(&self, test_id: &str) -> Result<(), StrategyError> {
        self.with_test(test_id, |test| match test.status {
            AbTestStatus::Running => {
                test.status = AbTestStatus::Paused;
                Ok(())
            }
            other => Err(invalid(format!("cannot pause test in state {other}"))),
        })
    }

    pub fn resume_test(&self, test_id: &str) -> Result<(), StrategyError> {
        self.with_test(test_id, |test| match test.status {
            AbTestStatus::Paused => {
                test.status = AbTestStatus::Running;
                Ok(())
            }
            other => Err(invalid(format!("cannot resume test in state {other}"))),
        })
    }

    pub fn status(&self, test_id: &str) -> Option<AbTestStatus> {
        self.lock().get(test_id).map(|t| t.status)
    }

    pub fn test_summary(&self, test_id: &str) -> Result<AbTestSummary, StrategyError> {
        let analysis = self.analyze_results(test_id)?;
        self.with_test(test_id, |test| {
            Ok(AbTestSummary {
                config: test.config.clone(),
                status: test.status,
                elapsed_secs: test.started_at.elapsed().as_secs_f64(),
                assigned_users: test.assignments.len(),
                analysis,
            })
        })
    }

    /// `(test_id, status)` for every known test, sorted by id.
    pub fn list_tests(&self) -> Vec<(String, AbTestStatus)> {
        let mut out: Vec<_> = self.lock().iter().map(|(id, t)| (id.clone(), t.status)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn framework() -> AbTestingFramework {
        AbTestingFramework::with_seed(MetricsCollector::default(), 7)
    }

    fn outcome(ok: bool, ms: f64) -> StrategyResult<()> {
        let mut r = if ok { StrategyResult::success(()) } else { StrategyResult::failure("x", "e") };
        r.execution_time_ms = ms;
        r
    }

    #[rstest]
    #[case(&[("a", 50.0), ("b", 49.0)], false)]
    #[case(&[("a", 50.0), ("b", 50.0)], true)]
    #[case(&[("a", 33.33), ("b", 33.33), ("c", 33.34)], true)]
    #[case(&[("a", 100.005)], true)]
    #[case(&[("a", 100.02)], false)]
    fn test_split_must_total_100(#[case] split: &[(&str, f64)], #[case] valid: bool) {
        let cfg = AbTestConfig::new("t", split.iter().map(|(n, p)| (*n, *p)));
        assert_eq!(framework().create_test(cfg).is_ok(), valid);
    }

    #[test]
    fn test_split_must_name_listed_strategies() {
        let mut cfg = AbTestConfig::new("t", [("a", 50.0), ("b", 50.0)]);
        cfg.strategies.retain(|s| s == "a");
        assert!(matches!(framework().create_test(cfg), Err(StrategyError::InvalidAbTest(_))));
    }

    #[test]
    fn test_duplicate_test_id_rejected() {
        let f = framework();
        f.create_test(AbTestConfig::new("t", [("a", 100.0)])).unwrap();
        assert!(f.create_test(AbTestConfig::new("t", [("a", 100.0)])).is_err());
    }

    #[test]
    fn test_assignment_is_sticky() {
        let f = framework();
        f.create_test(AbTestConfig::new("t", [("a", 50.0), ("b", 50.0)])).unwrap();
        let first = f.assign_strategy("t", "user-1").unwrap();
        for _ in 0..20 {
            assert_eq!(f.assign_strategy("t", "user-1").as_deref(), Some(first.as_str()));
        }
    }

    #[test]
    fn test_paused_and_unknown_tests_assign_nothing() {
        let f = framework();
        assert!(f.assign_strategy("missing", "u").is_none());
        f.create_test(AbTestConfig::new("t", [("a", 100.0)])).unwrap();
        f.pause_test("t").unwrap();
        assert!(f.assign_strategy("t", "u").is_none());
        f.resume_test("t").unwrap();
        assert_eq!(f.assign_strategy("t", "u").as_deref(), Some("a"));
        assert!(f.resume_test("t").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_test_stops_assigning() {
        let f = framework();
        f.create_test(AbTestConfig::new("t", [("a", 100.0)]).with_max_duration(Duration::from_secs(60)))
            .unwrap();
        assert!(f.assign_strategy("t", "u1").is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(f.assign_strategy("t", "u2").is_none());
        assert_eq!(f.status("t"), Some(AbTestStatus::Completed));
    }

    #[test]
    fn test_analysis_and_winner() {
        let f = framework();
        f.create_test(AbTestConfig::new("t", [("a", 50.0), ("b", 50.0)]).with_minimum_sample_size(50))
            .unwrap();
        for i in 0..100 {
            f.record_result("t", "a", &outcome(i % 10 != 0, 100.0), "u");
            f.record_result("t", "b", &outcome(i % 2 == 0, 100.0), "u");
        }
        let analysis = f.analyze_results("t").unwrap();
        let a = &analysis.results[0];
        let b = &analysis.results[1];
        assert_eq!(a.strategy, "a");
        assert!((a.success_rate - 0.9).abs() < 1e-9);
        assert!((b.success_rate - 0.5).abs() < 1e-9);
        assert!(a.statistical_significance);
        assert!(a.confidence_interval.0 < 0.9 && a.confidence_interval.1 > 0.9);
        assert!(a.confidence_interval.1 <= 1.0);
        assert!(a.p_value < 0.01, "p = {}", a.p_value);
        assert_eq!(analysis.winner.as_deref(), Some("a"));
        assert_eq!(f.get_winner("t").unwrap().as_deref(), Some("a"));
        // no auto-promotion configured
        assert_eq!(f.status("t"), Some(AbTestStatus::Running));
    }

    #[test]
    fn test_no_winner_below_minimum_samples() {
        let f = framework();
        f.create_test(AbTestConfig::new("t", [("a", 100.0)])).unwrap();
        f.record_result("t", "a", &outcome(true, 1.0), "u");
        assert_eq!(f.get_winner("t").unwrap(), None);
        let a = &f.analyze_results("t").unwrap().results[0];
        assert_eq!(a.p_value, 1.0);
        assert!(!a.statistical_significance);
    }

    #[test]
    fn test_auto_promote_completes_test() {
        let f = framework();
        f.create_test(
            AbTestConfig::new("t", [("a", 100.0)]).with_minimum_sample_size(3).with_auto_promote(true),
        )
        .unwrap();
        for _ in 0..3 {
            f.record_result("t", "a", &outcome(true, 5.0), "u");
        }
        assert_eq!(f.get_winner("t").unwrap().as_deref(), Some("a"));
        assert_eq!(f.status("t"), Some(AbTestStatus::Completed));
        assert!(f.assign_strategy("t", "new-user").is_none());
    }

    #[test]
    fn test_record_result_feeds_collector() {
        let collector = MetricsCollector::default();
        let f = AbTestingFramework::with_seed(collector.clone(), 1);
        f.create_test(AbTestConfig::new("t", [("a", 100.0)])).unwrap();
        f.record_result("t", "a", &outcome(false, 4.0), "u");
        let execs = collector.get_metric("ab_test_executions").unwrap();
        let point = execs.points().next().unwrap();
        assert_eq!(point.labels.get("success").map(String::as_str), Some("false"));
        assert_eq!(collector.statistics("ab_test_errors", None).unwrap().sum, 1.0);
        assert_eq!(collector.statistics("ab_test_execution_time", None).unwrap().mean, 4.0);
    }

    #[test]
    fn test_stop_and_summary() {
        let f = framework();
        f.create_test(AbTestConfig::new("t", [("a", 100.0)]).with_description("demo")).unwrap();
        f.assign_strategy("t", "u1");
        let summary = f.test_summary("t").unwrap();
        assert_eq!(summary.assigned_users, 1);
        assert_eq!(summary.config.description, "demo");
        let final_analysis = f.stop_test("t").unwrap();
        assert_eq!(final_analysis.status, AbTestStatus::Completed);
        assert_eq!(f.list_tests(), vec![("t".to_string(), AbTestStatus::Completed)]);
        assert!(f.analyze_results("nope").is_err());
    }

    #[test]
    fn test_normal_tail_reference_values() {
        assert!((standard_normal_upper_tail(0.0) - 0.5).abs() < 1e-6);
        assert!((standard_normal_upper_tail(1.96) - 0.025).abs() < 1e-3);
        assert!((standard_normal_upper_tail(-1.96) - 0.975).abs() < 1e-3);
    }
}
