//! # Stage: Strategy Registry
//!
//! ## Responsibility
//! Holds strategy registrations keyed by `(category, name)` and owns the
//! lazily created [`StrategyRuntime`] for each one.
//!
//! ## Guarantees
//! - `get` returns the same runtime on every call until the entry is
//!   disabled, re-registered or unregistered
//! - Registration order is preserved and drives listing order
//! - Re-registering a name replaces it in place and drops the old instance
//!
//! ## NOT Responsible For
//! - Scoring or picking between strategies (see [`crate::selector`])

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::monitoring::PerformanceMonitor;
use crate::strategy::{
    runtime::DEFAULT_HEALTH_FLOOR, Payload, StrategyConfig, StrategyFactory, StrategyHealth, StrategyPriority,
    StrategyRuntime,
};

/// Everything needed to build a strategy on demand.
pub struct Registration<I, O> {
    pub category: String,
    pub config: StrategyConfig,
    pub tags: BTreeSet<String>,
    pub factory: StrategyFactory<I, O>,
}

impl<I: Payload, O: Payload> Registration<I, O> {
    pub fn new(category: impl Into<String>, config: StrategyConfig, factory: StrategyFactory<I, O>) -> Self {
        Self { category: category.into(), config, tags: BTreeSet::new(), factory }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

struct Entry<I, O> {
    category: String,
    config: Arc<StrategyConfig>,
    tags: BTreeSet<String>,
    factory: StrategyFactory<I, O>,
    enabled: bool,
    instance: Option<Arc<StrategyRuntime<I, O>>>,
}

impl<I, O> Entry<I, O> {
    fn is(&self, category: &str, name: &str) -> bool {
        self.category == category && self.config.name == name
    }
}

/// Serializable description of one registration.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub category: String,
    pub name: String,
    pub version: String,
    pub priority: StrategyPriority,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub instantiated: bool,
    pub health: Option<StrategyHealth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub instantiated: usize,
    pub per_category: BTreeMap<String, usize>,
}

pub struct StrategyRegistry<I, O> {
    entries: RwLock<Vec<Entry<I, O>>>,
    monitor: Option<Arc<PerformanceMonitor>>,
    health_floor: f64,
}

impl<I, O> Default for StrategyRegistry<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> StrategyRegistry<I, O>
where
    I: Payload + Serialize,
    O: Payload + Default,
{
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()), monitor: None, health_floor: DEFAULT_HEALTH_FLOOR }
    }

    /// Runtimes created from now on report to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_health_floor(mut self, floor: f64) -> Self {
        self.health_floor = floor;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry<I, O>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry<I, O>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, registration: Registration<I, O>) {
        let Registration { category, config, tags, factory } = registration;
        let entry = Entry {
            category,
            config: Arc::new(config),
            tags,
            factory,
            enabled: true,
            instance: None,
        };
        let mut entries = self.write();
        match entries.iter_mut().find(|e| e.is(&entry.category, &entry.config.name)) {
            Some(existing) => {
                info!(category = %entry.category, strategy = %entry.config.name, version = %entry.config.version, "strategy re-registered");
                *existing = entry;
            }
            None => {
                info!(category = %entry.category, strategy = %entry.config.name, version = %entry.config.version, "strategy registered");
                entries.push(entry);
            }
        }
    }

    pub fn unregister(&self, category: &str, name: &str) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| !e.is(category, name));
        let removed = entries.len() != before;
        if removed {
            info!(category, strategy = name, "strategy unregistered");
        }
        removed
    }

    /// Runtime for `(category, name)`, created on first use. `None` when the
    /// strategy is unknown or disabled.
    pub fn get(&self, category: &str, name: &str) -> Option<Arc<StrategyRuntime<I, O>>> {
        {
            let entries = self.read();
            let entry = entries.iter().find(|e| e.is(category, name))?;
            if !entry.enabled {
                return None;
            }
            if let Some(rt) = &entry.instance {
                return Some(Arc::clone(rt));
            }
        }
        let mut entries = self.write();
        let entry = entries.iter_mut().find(|e| e.is(category, name))?;
        if !entry.enabled {
            return None;
        }
        if entry.instance.is_none() {
            entry.instance = Some(self.instantiate(Arc::clone(&entry.config), &entry.factory));
        }
        entry.instance.clone()
    }

    fn instantiate(&self, config: Arc<StrategyConfig>, factory: &StrategyFactory<I, O>) -> Arc<StrategyRuntime<I, O>> {
        let strategy = factory(Arc::clone(&config));
        debug!(strategy = %config.name, version = %config.version, "strategy instantiated");
        let mut runtime = StrategyRuntime::new(strategy, config).with_health_floor(self.health_floor);
        if let Some(monitor) = &self.monitor {
            runtime = runtime.with_monitor(Arc::clone(monitor));
        }
        Arc::new(runtime)
    }

    /// Enabled runtimes of `category` in registration order.
    pub fn runtimes_in(&self, category: &str) -> Vec<Arc<StrategyRuntime<I, O>>> {
        self.list_by_category(category)
            .iter()
            .filter_map(|name| self.get(category, name))
            .collect()
    }

    /// Runtimes that already exist, with their category.
    pub fn live_runtimes(&self) -> Vec<(String, Arc<StrategyRuntime<I, O>>)> {
        self.read()
            .iter()
            .filter_map(|e| e.instance.as_ref().map(|rt| (e.category.clone(), Arc::clone(rt))))
            .collect()
    }

    pub fn config(&self, category: &str, name: &str) -> Option<Arc<StrategyConfig>> {
        self.read().iter().find(|e| e.is(category, name)).map(|e| Arc::clone(&e.config))
    }

    pub fn contains(&self, category: &str, name: &str) -> bool {
        self.read().iter().any(|e| e.is(category, name))
    }

    pub fn is_enabled(&self, category: &str, name: &str) -> bool {
        self.read().iter().any(|e| e.is(category, name) && e.enabled)
    }

    /// Disable and drop the live instance.
    pub fn disable(&self, category: &str, name: &str) -> bool {
        let mut entries = self.write();
        match entries.iter_mut().find(|e| e.is(category, name)) {
            Some(e) => {
                e.enabled = false;
                e.instance = None;
                info!(category, strategy = name, "strategy disabled");
                true
            }
            None => false,
        }
    }

    pub fn enable(&self, category: &str, name: &str) -> bool {
        let mut entries = self.write();
        match entries.iter_mut().find(|e| e.is(category, name)) {
            Some(e) => {
                e.enabled = true;
                info!(category, strategy = name, "strategy enabled");
                true
            }
            None => false,
        }
    }

    /// Enabled strategy names of `category` in registration order.
    pub fn list_by_category(&self, category: &str) -> Vec<String> {
        self.read()
            .iter()
            .filter(|e| e.category == category && e.enabled)
            .map(|e| e.config.name.clone())
            .collect()
    }

    /// `(category, name)` of every enabled strategy carrying `tag`.
    pub fn list_by_tag(&self, tag: &str) -> Vec<(String, String)> {
        self.read()
            .iter()
            .filter(|e| e.enabled && e.tags.contains(tag))
            .map(|e| (e.category.clone(), e.config.name.clone()))
            .collect()
    }

    pub fn list_categories(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.read()
            .iter()
            .filter(|e| seen.insert(e.category.clone()))
            .map(|e| e.category.clone())
            .collect()
    }

    pub fn list_strategies(&self) -> Vec<StrategyInfo> {
        self.read()
            .iter()
            .map(|e| StrategyInfo {
                category: e.category.clone(),
                name: e.config.name.clone(),
                version: e.config.version.clone(),
                priority: e.config.priority,
                enabled: e.enabled,
                tags: e.tags.iter().cloned().collect(),
                instantiated: e.instance.is_some(),
                health: e.instance.as_ref().map(|rt| rt.health()),
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.read();
        let mut stats = RegistryStats { total: entries.len(), ..RegistryStats::default() };
        for e in entries.iter() {
            if e.enabled {
                stats.enabled += 1;
            } else {
                stats.disabled += 1;
            }
            if e.instance.is_some() {
                stats.instantiated += 1;
            }
            *stats.per_category.entry(e.category.clone()).or_default() += 1;
        }
        stats
    }

    pub fn clear(&self) {
        self.write().clear();
        info!("registry cleared");
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrategyError;
    use crate::strategy::{factory, ContextKind, Strategy, StrategyContext, StrategyResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo {
        version: String,
    }

    #[async_trait]
    impl Strategy<String, String> for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn version(&self) -> &str {
            &self.version
        }

        async fn execute(&self, ctx: StrategyContext<String>) -> Result<StrategyResult<String>, StrategyError> {
            Ok(StrategyResult::success(format!("{}:{}", self.version, ctx.payload)))
        }

        fn supported_context_types(&self) -> Vec<ContextKind> {
            vec![ContextKind::ANY]
        }
    }

    fn echo_registration(category: &str, name: &str, version: &str, built: Arc<AtomicU32>) -> Registration<String, String> {
        Registration::new(
            category,
            StrategyConfig::new(name).with_version(version),
            factory(move |cfg: Arc<StrategyConfig>| {
                built.fetch_add(1, Ordering::SeqCst);
                Arc::new(Echo { version: cfg.version.clone() }) as Arc<dyn Strategy<String, String>>
            }),
        )
    }

    #[test]
    fn test_get_creates_once() {
        let reg = StrategyRegistry::new();
        let built = Arc::new(AtomicU32::new(0));
        reg.register(echo_registration("text", "echo", "1.0.0", built.clone()));
        assert_eq!(built.load(Ordering::SeqCst), 0);
        let a = reg.get("text", "echo").unwrap();
        let b = reg.get("text", "echo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(reg.get("text", "missing").is_none());
        assert!(reg.get("other", "echo").is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_in_place() {
        let reg = StrategyRegistry::new();
        let built = Arc::new(AtomicU32::new(0));
        reg.register(echo_registration("text", "echo", "1.0.0", built.clone()));
        reg.register(echo_registration("text", "second", "1.0.0", built.clone()));
        let old = reg.get("text", "echo").unwrap();

        reg.register(echo_registration("text", "echo", "2.0.0", built.clone()));
        let new = reg.get("text", "echo").unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.version(), "2.0.0");
        assert_eq!(reg.list_by_category("text"), vec!["echo", "second"]);
        assert_eq!(reg.len(), 2);
        let out = new.execute(StrategyContext::new("hi".to_string())).await.unwrap();
        assert_eq!(out.data, "2.0.0:hi");
    }

    #[test]
    fn test_disable_evicts_and_enable_recreates() {
        let reg = StrategyRegistry::new();
        let built = Arc::new(AtomicU32::new(0));
        reg.register(echo_registration("text", "echo", "1.0.0", built.clone()));
        reg.get("text", "echo").unwrap();
        assert!(reg.disable("text", "echo"));
        assert!(reg.get("text", "echo").is_none());
        assert!(reg.list_by_category("text").is_empty());
        assert!(reg.enable("text", "echo"));
        reg.get("text", "echo").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert!(!reg.disable("text", "nope"));
    }

    #[test]
    fn test_listing_and_stats() {
        let reg = StrategyRegistry::new();
        let built = Arc::new(AtomicU32::new(0));
        reg.register(echo_registration("b", "one", "1", built.clone()).with_tag("fast"));
        reg.register(echo_registration("a", "two", "1", built.clone()).with_tags(["fast", "beta"]));
        reg.register(echo_registration("b", "three", "1", built.clone()));
        reg.disable("b", "three");
        reg.get("a", "two");

        assert_eq!(reg.list_categories(), vec!["b", "a"]);
        assert_eq!(reg.list_by_tag("fast"), vec![("b".to_string(), "one".to_string()), ("a".to_string(), "two".to_string())]);
        let stats = reg.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.enabled, 2);
        assert_eq!(stats.disabled, 1);
        assert_eq!(stats.instantiated, 1);
        assert_eq!(stats.per_category.get("b"), Some(&2));

        let infos = reg.list_strategies();
        let two = infos.iter().find(|i| i.name == "two").unwrap();
        assert!(two.instantiated);
        assert!(two.health.as_ref().unwrap().healthy);
        assert!(infos.iter().find(|i| i.name == "one").unwrap().health.is_none());

        assert!(reg.unregister("b", "one"));
        assert!(!reg.contains("b", "one"));
        reg.clear();
        assert!(reg.is_empty());
    }
}
