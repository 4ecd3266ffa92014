//! Metrics collection, performance monitoring and A/B testing.

pub mod ab_testing;
pub mod collector;
pub mod monitor;

pub use ab_testing::{AbTestAnalysis, AbTestConfig, AbTestResult, AbTestStatus, AbTestSummary, AbTestingFramework};
pub use collector::{
    labels, CollectorConfig, Labels, MetricDataPoint, MetricStatistics, MetricType, MetricsCollector,
    PerformanceMetric, Trend,
};
pub use monitor::{AlertCallback, AlertKind, MonitorThresholds, PerformanceAlert, PerformanceMonitor, PerformanceReport};
