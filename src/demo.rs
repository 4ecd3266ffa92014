//! # Stage: Demo Strategies
//!
//! ## Responsibility
//! A small pricing domain used by the binary and the integration tests:
//! four interchangeable pricing strategies, one discount strategy, and the
//! scenario runners that drive a [`StrategyManager`] through single, fallback,
//! parallel, pipeline and A/B executions.
//!
//! ## NOT Responsible For
//! - Printing (the binary formats [`ScenarioOutcome`] itself)

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::Scenario;
use crate::config::FrameworkConfig;
use crate::error::{StrategyError, ValidationError};
use crate::manager::{PipelineStep, StrategyManager};
use crate::monitoring::AbTestConfig;
use crate::registry::Registration;
use crate::strategy::{
    factory, ContextKind, ExecutionMode, Strategy, StrategyConfig, StrategyContext, StrategyPriority, StrategyResult,
};

pub const PRICING: &str = "pricing";
pub const DISCOUNT: &str = "discount";
pub const AB_TEST_ID: &str = "pricing_ab";

/// A request to price `quantity` units of `sku`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub sku: String,
    pub unit_price: f64,
    pub quantity: u32,
}

impl Quote {
    pub fn new(sku: impl Into<String>, unit_price: f64, quantity: u32) -> Self {
        Self { sku: sku.into(), unit_price, quantity }
    }

    pub fn list_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub rule: String,
}

impl Price {
    fn new(amount: f64, rule: &str) -> Self {
        Self { amount: (amount * 100.0).round() / 100.0, rule: rule.to_string() }
    }
}

fn validate_quote(ctx: &StrategyContext<Quote>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if ctx.payload.quantity == 0 {
        errors.push(ValidationError::for_field("quantity", "must be positive"));
    }
    if !ctx.payload.unit_price.is_finite() || ctx.payload.unit_price < 0.0 {
        errors.push(ValidationError::for_field("unit_price", "must be a non-negative number"));
    }
    errors
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Surge pricing backed by an unreliable upstream.
pub struct DynamicPricing {
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl DynamicPricing {
    pub fn new(failure_rate: f64, seed: u64) -> Self {
        Self { failure_rate: failure_rate.clamp(0.0, 1.0), rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

#[async_trait::async_trait]
impl Strategy<Quote, Price> for DynamicPricing {
    fn name(&self) -> &str {
        "dynamic"
    }

    fn version(&self) -> &str {
        "2.1.0"
    }

    async fn execute(&self, ctx: StrategyContext<Quote>) -> Result<StrategyResult<Price>, StrategyError> {
        let (fail, surge) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            (rng.gen_bool(self.failure_rate), rng.gen_range(1.0..1.3))
        };
        if fail {
            return Err(StrategyError::execution(self.name(), "demand feed unavailable"));
        }
        Ok(StrategyResult::success(Price::new(ctx.payload.list_total() * surge, "dynamic")).with_metadata("surge", surge))
    }

    fn validate_context(&self, ctx: &StrategyContext<Quote>) -> Vec<ValidationError> {
        validate_quote(ctx)
    }

    fn supported_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::ANY]
    }

    fn preferred_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::from("retail")]
    }
}

/// Model-scored pricing that never answers within its deadline.
pub struct ModelPricing {
    latency: Duration,
}

#[async_trait::async_trait]
impl Strategy<Quote, Price> for ModelPricing {
    fn name(&self) -> &str {
        "ml_model"
    }

    async fn execute(&self, ctx: StrategyContext<Quote>) -> Result<StrategyResult<Price>, StrategyError> {
        tokio::time::sleep(self.latency).await;
        Ok(StrategyResult::success(Price::new(ctx.payload.list_total() * 0.97, "ml_model")))
    }

    fn validate_context(&self, ctx: &StrategyContext<Quote>) -> Vec<ValidationError> {
        validate_quote(ctx)
    }

    fn supported_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::from("retail"), ContextKind::from("wholesale")]
    }
}

/// Volume tiers: 5% off from 10 units, 10% off from 100.
pub struct TieredPricing;

#[async_trait::async_trait]
impl Strategy<Quote, Price> for TieredPricing {
    fn name(&self) -> &str {
        "standard"
    }

    async fn execute(&self, ctx: StrategyContext<Quote>) -> Result<StrategyResult<Price>, StrategyError> {
        let factor = match ctx.payload.quantity {
            0..=9 => 1.0,
            10..=99 => 0.95,
            _ => 0.90,
        };
        Ok(StrategyResult::success(Price::new(ctx.payload.list_total() * factor, "standard")))
    }

    fn validate_context(&self, ctx: &StrategyContext<Quote>) -> Vec<ValidationError> {
        validate_quote(ctx)
    }

    fn supported_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::ANY]
    }
}

pub struct ListPricing;

#[async_trait::async_trait]
impl Strategy<Quote, Price> for ListPricing {
    fn name(&self) -> &str {
        "list_price"
    }

    async fn execute(&self, ctx: StrategyContext<Quote>) -> Result<StrategyResult<Price>, StrategyError> {
        Ok(StrategyResult::success(Price::new(ctx.payload.list_total(), "list_price")))
    }

    fn supported_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::ANY]
    }
}

/// Loyalty discount applied to an already priced quote.
pub struct LoyaltyDiscount;

#[async_trait::async_trait]
impl Strategy<Quote, Price> for LoyaltyDiscount {
    fn name(&self) -> &str {
        "loyalty"
    }

    async fn execute(&self, ctx: StrategyContext<Quote>) -> Result<StrategyResult<Price>, StrategyError> {
        let rate = if ctx.user_id.is_some() { 0.9 } else { 1.0 };
        Ok(StrategyResult::success(Price::new(ctx.payload.list_total() * rate, "loyalty")))
    }

    fn supported_context_types(&self) -> Vec<ContextKind> {
        vec![ContextKind::ANY]
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Manager with every demo strategy registered and a fallback chain
/// (`standard`, then `list_price`) for the pricing category.
pub fn build_manager(config: FrameworkConfig, failure_rate: f64, seed: u64) -> StrategyManager<Quote, Price> {
    StrategyManager::builder()
        .config(config)
        .seed(seed)
        .register(
            Registration::new(
                PRICING,
                StrategyConfig::new("dynamic")
                    .with_version("2.1.0")
                    .with_priority(StrategyPriority::High)
                    .with_retries(1)
                    .with_cache(false, Duration::ZERO),
                factory(move |_| Arc::new(DynamicPricing::new(failure_rate, seed)) as Arc<dyn Strategy<Quote, Price>>),
            )
            .with_tag("experimental"),
        )
        .register(
            Registration::new(
                PRICING,
                StrategyConfig::new("ml_model")
                    .with_mode(ExecutionMode::Async)
                    .with_timeout(Duration::from_millis(50))
                    .with_retries(0),
                factory(|_| {
                    Arc::new(ModelPricing { latency: Duration::from_millis(500) }) as Arc<dyn Strategy<Quote, Price>>
                }),
            )
            .with_tag("experimental"),
        )
        .register(Registration::new(
            PRICING,
            StrategyConfig::new("standard").with_mode(ExecutionMode::Sync),
            factory(|_| Arc::new(TieredPricing) as Arc<dyn Strategy<Quote, Price>>),
        ))
        .register(
            Registration::new(
                PRICING,
                StrategyConfig::new("list_price").with_priority(StrategyPriority::Fallback),
                factory(|_| Arc::new(ListPricing) as Arc<dyn Strategy<Quote, Price>>),
            )
            .with_tag("safe"),
        )
        .register(Registration::new(
            DISCOUNT,
            StrategyConfig::new("loyalty"),
            factory(|_| Arc::new(LoyaltyDiscount) as Arc<dyn Strategy<Quote, Price>>),
        ))
        .fallback_chain(PRICING, [("standard", 1), ("list_price", 2)])
        .degraded_responder(PRICING, |ctx: &StrategyContext<Quote>, _err: &StrategyError| {
            Price::new(ctx.payload.list_total(), "degraded")
        })
        .on_alert(|alert| {
            warn!(alert = %alert, "performance alert");
            Ok(())
        })
        .build()
}

fn quote_context(i: u32) -> StrategyContext<Quote> {
    let kind = if i % 3 == 0 { "wholesale" } else { "retail" };
    StrategyContext::new(Quote::new(format!("SKU-{:03}", i % 7), 12.5 + f64::from(i % 5), 1 + i * 3))
        .with_kind(kind)
        .with_metadata("channel", "demo")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub succeeded: usize,
    pub failed: usize,
    pub fallbacks: usize,
    pub notes: Vec<String>,
}

impl ScenarioOutcome {
    fn new(scenario: Scenario) -> Self {
        Self { scenario: scenario.to_string(), ..Self::default() }
    }

    fn tally(&mut self, result: &Result<StrategyResult<Price>, StrategyError>) {
        match result {
            Ok(r) if r.is_success() => {
                self.succeeded += 1;
                if r.fallback_used {
                    self.fallbacks += 1;
                }
            }
            Ok(r) => {
                self.failed += 1;
                self.notes.push(r.error_message.clone().unwrap_or_default());
            }
            Err(e) => {
                self.failed += 1;
                self.notes.push(e.to_string());
            }
        }
    }
}

pub async fn run_scenario(manager: &StrategyManager<Quote, Price>, scenario: Scenario, users: u32) -> Vec<ScenarioOutcome> {
    let mut outcomes = Vec::new();
    for s in scenario.expand() {
        info!(scenario = %s, "running scenario");
        let outcome = match s {
            Scenario::Single => single(manager).await,
            Scenario::Fallback => fallback(manager).await,
            Scenario::Parallel => parallel(manager).await,
            Scenario::Pipeline => pipeline(manager).await,
            Scenario::Ab => ab_test(manager, users).await,
            Scenario::All => continue,
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// Selector-chosen strategy per request, recovering through the chain.
pub async fn single(manager: &StrategyManager<Quote, Price>) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome::new(Scenario::Single);
    for i in 0..20 {
        let result = manager.execute_strategy(PRICING, quote_context(i), None, true).await;
        if let Ok(r) = &result {
            outcome.notes.push(format!("{} -> {:.2} via {}", r.strategy_name, r.data.amount, r.data.rule));
        }
        outcome.tally(&result);
    }
    outcome
}

/// The slow model always times out; the chain must answer instead.
pub async fn fallback(manager: &StrategyManager<Quote, Price>) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome::new(Scenario::Fallback);
    for i in 0..5 {
        let result = manager.execute_strategy(PRICING, quote_context(i), Some("ml_model"), true).await;
        if let Ok(r) = &result {
            let via = r.metadata.get("fallback_strategy").and_then(|v| v.as_str()).unwrap_or(&r.strategy_name);
            outcome.notes.push(format!("ml_model failed, answered by {via}"));
        }
        outcome.tally(&result);
    }
    let invalid = StrategyContext::new(Quote::new("SKU-000", 10.0, 0));
    let rejected = manager.execute_strategy(PRICING, invalid, Some("standard"), true).await;
    outcome.tally(&rejected);
    outcome
}

pub async fn parallel(manager: &StrategyManager<Quote, Price>) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome::new(Scenario::Parallel);
    match manager.execute_parallel(PRICING, quote_context(1), 4).await {
        Ok(results) => {
            for r in results {
                outcome.notes.push(format!("{}: success={} {:.2}", r.strategy_name, r.success, r.data.amount));
                outcome.tally(&Ok(r));
            }
        }
        Err(e) => outcome.tally(&Err(e)),
    }
    outcome
}

/// Price with `standard`, then apply the loyalty discount to that total.
pub async fn pipeline(manager: &StrategyManager<Quote, Price>) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome::new(Scenario::Pipeline);
    let steps = vec![
        PipelineStep::new(PRICING)
            .with_strategy("standard")
            .with_transform(|mut ctx: StrategyContext<Quote>, priced: &StrategyResult<Price>| {
                ctx.payload = Quote::new(ctx.payload.sku.clone(), priced.data.amount, 1);
                ctx
            }),
        PipelineStep::new(DISCOUNT).with_strategy("loyalty"),
    ];
    let ctx = quote_context(4).with_user("member-42");
    match manager.execute_pipeline(steps, ctx).await {
        Ok(run) => {
            for step in &run.data {
                outcome.notes.push(format!("{} -> {:.2}", step.strategy_name, step.data.amount));
                outcome.tally(&Ok(step.clone()));
            }
            if let Some(err) = run.error_message {
                outcome.failed += 1;
                outcome.notes.push(err);
            }
        }
        Err(e) => outcome.tally(&Err(e)),
    }
    outcome
}

/// Split `users` between `dynamic` and `standard` and report the analysis.
pub async fn ab_test(manager: &StrategyManager<Quote, Price>, users: u32) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome::new(Scenario::Ab);
    let config = AbTestConfig::new(AB_TEST_ID, [("dynamic", 50.0), ("standard", 50.0)])
        .with_description("surge pricing against volume tiers")
        .with_minimum_sample_size(30);
    if let Err(e) = manager.start_ab_test(config) {
        outcome.tally(&Err(e));
        return outcome;
    }
    for u in 0..users {
        let result = manager.execute_ab_test(AB_TEST_ID, &format!("user-{u}"), PRICING, quote_context(u)).await;
        outcome.tally(&result);
    }
    // Per-request failures are summarized by the analysis below.
    outcome.notes.clear();
    match manager.stop_ab_test(AB_TEST_ID) {
        Ok(analysis) => {
            for r in &analysis.results {
                outcome.notes.push(format!(
                    "{}: n={} success={:.1}% p={:.4}",
                    r.strategy,
                    r.sample_size,
                    r.success_rate * 100.0,
                    r.p_value
                ));
            }
            outcome.notes.push(format!("winner: {}", analysis.winner.as_deref().unwrap_or("none")));
        }
        Err(e) => outcome.notes.push(e.to_string()),
    }
    outcome
}
