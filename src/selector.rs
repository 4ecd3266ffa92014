//! # Stage: Strategy Selector
//!
//! ## Responsibility
//! Picks the best eligible strategy of a category for a given context, and
//! picks candidate sets for parallel / comparative runs.
//!
//! ## Guarantees
//! - Only strategies that accept the context kind, are not excluded and are
//!   healthy are eligible
//! - Scoring is deterministic; ties go to the earliest registration
//! - Selection history is bounded
//!
//! ## NOT Responsible For
//! - Executing anything

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StrategyError;
use crate::registry::StrategyRegistry;
use crate::strategy::context::now_ms;
use crate::strategy::{ContextKind, Payload, StrategyContext, StrategyRuntime};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Strategies at or below this success rate are not selected.
    pub health_floor: f64,
    pub history_capacity: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self { health_floor: 0.95, history_capacity: 1_000 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionRecord {
    pub timestamp_ms: u64,
    pub category: String,
    pub context_kind: String,
    pub selected: String,
    pub candidates: usize,
    /// `None` when the only candidate was returned unscored.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionAnalytics {
    pub total_selections: usize,
    pub by_strategy: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub average_candidates: f64,
}

/// Selection score of one runtime for contexts of `kind`.
pub fn score<I, O>(runtime: &StrategyRuntime<I, O>, kind: &ContextKind) -> f64
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    let m = runtime.metrics();
    let load_factor = match m.seconds_since_last_execution() {
        None => 100.0,
        Some(secs) => (secs / 60.0).min(100.0),
    };
    0.4 * m.performance_score() + 0.2 * load_factor + 0.2 * (m.success_rate * 100.0) + 0.2 * runtime.affinity(kind)
}

pub struct StrategySelector<I, O> {
    registry: Arc<StrategyRegistry<I, O>>,
    config: SelectorConfig,
    history: Mutex<VecDeque<SelectionRecord>>,
    rng: Mutex<StdRng>,
}

impl<I, O> StrategySelector<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    pub fn new(registry: Arc<StrategyRegistry<I, O>>, config: SelectorConfig) -> Self {
        Self { registry, config, history: Mutex::new(VecDeque::new()), rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn eligible(&self, category: &str, kind: &ContextKind, excluded: &[String]) -> Vec<Arc<StrategyRuntime<I, O>>> {
        self.registry
            .runtimes_in(category)
            .into_iter()
            .filter(|rt| rt.supports(kind))
            .filter(|rt| !excluded.iter().any(|e| e == rt.name()))
            .filter(|rt| rt.metrics().is_healthy(self.config.health_floor))
            .collect()
    }

    /// Highest-scoring eligible strategy of `category`.
    pub fn select_best(
        &self,
        category: &str,
        context: &StrategyContext<I>,
        excluded: &[String],
    ) -> Result<Arc<StrategyRuntime<I, O>>, StrategyError> {
        let candidates = self.eligible(category, &context.kind, excluded);
        let count = candidates.len();

        let (best, best_score) = if count == 1 {
            (candidates.into_iter().next(), None)
        } else {
            let mut best: Option<(Arc<StrategyRuntime<I, O>>, f64)> = None;
            for rt in candidates {
                let s = score(&rt, &context.kind);
                match &best {
                    Some((_, b)) if *b >= s => {}
                    _ => best = Some((rt, s)),
                }
            }
            match best {
                Some((rt, s)) => (Some(rt), Some(s)),
                None => (None, None),
            }
        };

        let best = best.ok_or_else(|| StrategyError::NoCandidate { category: category.to_string() })?;
        debug!(category, strategy = %best.name(), candidates = count, score = ?best_score, "strategy selected");
        self.remember(SelectionRecord {
            timestamp_ms: now_ms(),
            category: category.to_string(),
            context_kind: context.kind.to_string(),
            selected: best.name().to_string(),
            candidates: count,
            score: best_score,
        });
        Ok(best)
    }

    /// Top two strategies by performance score plus up to two random others.
    pub fn select_for_ab_test(&self, category: &str, context: &StrategyContext<I>) -> Vec<Arc<StrategyRuntime<I, O>>> {
        let mut candidates = self.eligible(category, &context.kind, &[]);
        candidates.sort_by(|a, b| b.metrics().performance_score().total_cmp(&a.metrics().performance_score()));
        let rest = candidates.split_off(candidates.len().min(2));
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        candidates.extend(rest.choose_multiple(&mut *rng, 2).cloned());
        candidates
    }

    fn remember(&self, record: SelectionRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(record);
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<SelectionRecord> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    pub fn selection_analytics(&self) -> SelectionAnalytics {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = SelectionAnalytics { total_selections: history.len(), ..SelectionAnalytics::default() };
        let mut candidate_sum = 0usize;
        for r in history.iter() {
            *out.by_strategy.entry(r.selected.clone()).or_default() += 1;
            *out.by_category.entry(r.category.clone()).or_default() += 1;
            candidate_sum += r.candidates;
        }
        if !history.is_empty() {
            out.average_candidates = candidate_sum as f64 / history.len() as f64;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registration;
    use crate::strategy::{factory, Strategy, StrategyConfig, StrategyResult};
    use async_trait::async_trait;

    struct Fixed {
        name: String,
        kinds: Vec<ContextKind>,
        preferred: Vec<ContextKind>,
        ok: bool,
    }

    #[async_trait]
    impl Strategy<u32, u32> for Fixed {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: StrategyContext<u32>) -> Result<StrategyResult<u32>, StrategyError> {
            if self.ok {
                Ok(StrategyResult::success(ctx.payload))
            } else {
                Err(StrategyError::execution(&self.name, "down"))
            }
        }

        fn supported_context_types(&self) -> Vec<ContextKind> {
            self.kinds.clone()
        }

        fn preferred_context_types(&self) -> Vec<ContextKind> {
            self.preferred.clone()
        }
    }

    fn add(reg: &StrategyRegistry<u32, u32>, name: &str, kinds: &[&'static str], preferred: &[&'static str], ok: bool) {
        let kinds: Vec<ContextKind> = kinds.iter().map(|k| ContextKind::from(*k)).collect();
        let preferred: Vec<ContextKind> = preferred.iter().map(|k| ContextKind::from(*k)).collect();
        let owned = name.to_string();
        reg.register(Registration::new(
            "calc",
            StrategyConfig::new(name).with_retries(0).with_cache(false, std::time::Duration::ZERO),
            factory(move |_| {
                Arc::new(Fixed { name: owned.clone(), kinds: kinds.clone(), preferred: preferred.clone(), ok })
                    as Arc<dyn Strategy<u32, u32>>
            }),
        ));
    }

    fn selector() -> (Arc<StrategyRegistry<u32, u32>>, StrategySelector<u32, u32>) {
        let reg = Arc::new(StrategyRegistry::new());
        let sel = StrategySelector::new(reg.clone(), SelectorConfig::default()).with_seed(3);
        (reg, sel)
    }

    #[test]
    fn test_no_candidate() {
        let (_, sel) = selector();
        let picked = sel.select_best("calc", &StrategyContext::new(1), &[]);
        assert!(matches!(picked, Err(StrategyError::NoCandidate { .. })));
    }

    #[test]
    fn test_kind_filter_and_single_candidate_unscored() {
        let (reg, sel) = selector();
        add(&reg, "a", &["text"], &[], true);
        add(&reg, "b", &["number"], &[], true);
        let ctx = StrategyContext::new(1).with_kind("number");
        assert_eq!(sel.select_best("calc", &ctx, &[]).unwrap().name(), "b");
        assert_eq!(sel.history()[0].score, None);
    }

    #[test]
    fn test_tie_goes_to_earliest_registration() {
        let (reg, sel) = selector();
        add(&reg, "first", &["*"], &[], true);
        add(&reg, "second", &["*"], &[], true);
        assert_eq!(sel.select_best("calc", &StrategyContext::new(1), &[]).unwrap().name(), "first");
    }

    #[test]
    fn test_preferred_kind_wins() {
        let (reg, sel) = selector();
        add(&reg, "generic", &["*"], &[], true);
        add(&reg, "specialist", &["*"], &["number"], true);
        let ctx = StrategyContext::new(1).with_kind("number");
        assert_eq!(sel.select_best("calc", &ctx, &[]).unwrap().name(), "specialist");
    }

    #[test]
    fn test_exclusion() {
        let (reg, sel) = selector();
        add(&reg, "a", &["*"], &[], true);
        add(&reg, "b", &["*"], &[], true);
        let best = sel.select_best("calc", &StrategyContext::new(1), &["a".to_string()]).unwrap();
        assert_eq!(best.name(), "b");
    }

    #[tokio::test]
    async fn test_unhealthy_strategies_are_not_selected() {
        let (reg, sel) = selector();
        add(&reg, "broken", &["*"], &[], false);
        add(&reg, "working", &["*"], &[], true);
        reg.get("calc", "broken").unwrap().execute(StrategyContext::new(1)).await.unwrap_err();
        assert_eq!(sel.select_best("calc", &StrategyContext::new(1), &[]).unwrap().name(), "working");
    }

    #[test]
    fn test_score_of_fresh_runtime() {
        let (reg, _) = selector();
        add(&reg, "a", &["*"], &[], true);
        let rt = reg.get("calc", "a").unwrap();
        // perf 0, load 100, success 100, affinity 50
        assert!((score(&rt, &ContextKind::DEFAULT) - (0.2 * 100.0 + 0.2 * 100.0 + 0.2 * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ab_selection_caps_at_four() {
        let (reg, sel) = selector();
        for name in ["a", "b", "c", "d", "e", "f"] {
            add(&reg, name, &["*"], &[], true);
        }
        let picked = sel.select_for_ab_test("calc", &StrategyContext::new(1));
        assert_eq!(picked.len(), 4);
        assert_eq!(picked[0].name(), "a");
        assert_eq!(picked[1].name(), "b");
    }

    #[test]
    fn test_history_bounded_and_analytics() {
        let reg = Arc::new(StrategyRegistry::new());
        let sel = StrategySelector::new(reg.clone(), SelectorConfig { history_capacity: 3, ..SelectorConfig::default() });
        add(&reg, "a", &["*"], &[], true);
        for _ in 0..5 {
            sel.select_best("calc", &StrategyContext::new(1), &[]).unwrap();
        }
        let analytics = sel.selection_analytics();
        assert_eq!(analytics.total_selections, 3);
        assert_eq!(analytics.by_strategy.get("a"), Some(&3));
        assert_eq!(analytics.average_candidates, 1.0);
    }
}
