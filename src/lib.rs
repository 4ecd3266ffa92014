//! Strategy execution runtime.
//!
//! Interchangeable implementations of an operation ("strategies") are
//! registered per category, selected by score, executed with timeouts and
//! retries, isolated behind circuit breakers, recovered through prioritized
//! fallback chains, measured, and compared in A/B tests.
//!
//! [`manager::StrategyManager`] is the entry point.

pub mod cache;
pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod manager;
pub mod monitoring;
pub mod registry;
pub mod resilience;
pub mod selector;
pub mod strategy;

pub use config::FrameworkConfig;
pub use error::{ConfigError, StrategyError, ValidationError};
pub use manager::{PipelineStep, StrategyManager, StrategyManagerBuilder};
pub use registry::{Registration, StrategyRegistry};
pub use strategy::{
    factory, ContextKind, ExecutionMode, Strategy, StrategyConfig, StrategyContext, StrategyPriority, StrategyResult,
};
