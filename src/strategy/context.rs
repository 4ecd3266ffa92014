//! Values that flow through a strategy invocation: the capability tag
//! ([`ContextKind`]), the input envelope ([`StrategyContext`]) and the output
//! envelope ([`StrategyResult`]).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// ContextKind
// ---------------------------------------------------------------------------

/// Stable tag naming what kind of payload a context carries.
///
/// Strategies declare the kinds they accept; the selector compares tags
/// instead of inspecting payload types at call time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKind(Cow<'static, str>);

impl ContextKind {
    /// Wildcard: a strategy declaring it accepts every kind.
    pub const ANY: ContextKind = ContextKind(Cow::Borrowed("*"));
    /// Kind given to contexts that do not set one.
    pub const DEFAULT: ContextKind = ContextKind(Cow::Borrowed("default"));

    pub fn new(kind: impl Into<Cow<'static, str>>) -> Self {
        ContextKind(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when a strategy declaring `self` accepts a context of `other`.
    pub fn accepts(&self, other: &ContextKind) -> bool {
        *self == Self::ANY || self == other
    }
}

impl Default for ContextKind {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ContextKind {
    fn from(s: &'static str) -> Self {
        ContextKind(Cow::Borrowed(s))
    }
}

impl From<String> for ContextKind {
    fn from(s: String) -> Self {
        ContextKind(Cow::Owned(s))
    }
}

// ---------------------------------------------------------------------------
// StrategyContext
// ---------------------------------------------------------------------------

/// Input handed to a strategy. The framework clones it per attempt and never
/// mutates the caller's copy.
#[derive(Debug, Clone)]
pub struct StrategyContext<T> {
    pub payload: T,
    pub kind: ContextKind,
    /// Correlation id, a fresh UUID v4 unless the caller supplies one.
    pub request_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    /// Creation time in epoch milliseconds.
    pub created_at_ms: u64,
}

impl<T> StrategyContext<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            kind: ContextKind::DEFAULT,
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            session_id: None,
            metadata: BTreeMap::new(),
            created_at_ms: now_ms(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<ContextKind>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Same correlation data, different payload. Used between pipeline steps.
    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> StrategyContext<U> {
        StrategyContext {
            payload: f(self.payload),
            kind: self.kind,
            request_id: self.request_id,
            user_id: self.user_id,
            session_id: self.session_id,
            metadata: self.metadata,
            created_at_ms: self.created_at_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// StrategyResult
// ---------------------------------------------------------------------------

/// Output of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult<T> {
    pub data: T,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: f64,
    pub strategy_name: String,
    pub strategy_version: String,
    pub cache_hit: bool,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl<T> StrategyResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            data,
            success: true,
            error_message: None,
            execution_time_ms: 0.0,
            strategy_name: String::new(),
            strategy_version: String::new(),
            cache_hit: false,
            fallback_used: false,
            warnings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// A failed result with a placeholder payload.
    pub fn failure(strategy_name: impl Into<String>, message: impl Into<String>) -> Self
    where
        T: Default,
    {
        let mut result = Self::success(T::default());
        result.strategy_name = strategy_name.into();
        result.set_error(message);
        result
    }

    pub fn is_success(&self) -> bool {
        self.success && self.error_message.is_none()
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error_message = Some(message.into());
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_kind_accepts_everything() {
        assert!(ContextKind::ANY.accepts(&ContextKind::new("nutrition")));
        assert!(ContextKind::new("pdf").accepts(&ContextKind::new("pdf")));
        assert!(!ContextKind::new("pdf").accepts(&ContextKind::new("nutrition")));
    }

    #[test]
    fn test_kind_equality_ignores_ownership() {
        assert_eq!(ContextKind::from("pdf"), ContextKind::from("pdf".to_string()));
    }

    #[test]
    fn test_context_defaults() {
        let ctx = StrategyContext::new(7u32);
        assert_eq!(ctx.kind, ContextKind::DEFAULT);
        assert_eq!(ctx.request_id.len(), 36);
        assert!(ctx.user_id.is_none());
        assert!(ctx.created_at_ms > 1_700_000_000_000);
    }

    #[test]
    fn test_context_builders() {
        let ctx = StrategyContext::new("x")
            .with_kind("report")
            .with_user("u1")
            .with_session("s1")
            .with_metadata("locale", "fr");
        assert_eq!(ctx.kind.as_str(), "report");
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert_eq!(ctx.session_id.as_deref(), Some("s1"));
        assert_eq!(ctx.metadata_value("locale"), Some(&Value::from("fr")));
    }

    #[test]
    fn test_map_payload_keeps_correlation() {
        let ctx = StrategyContext::new(2).with_user("u").with_request_id("r-1");
        let mapped = ctx.map_payload(|n| n.to_string());
        assert_eq!(mapped.payload, "2");
        assert_eq!(mapped.request_id, "r-1");
        assert_eq!(mapped.user_id.as_deref(), Some("u"));
    }

    #[test]
    fn test_failure_result_is_not_success() {
        let r: StrategyResult<String> = StrategyResult::failure("s", "boom");
        assert!(!r.is_success());
        assert_eq!(r.error_message.as_deref(), Some("boom"));
        assert_eq!(r.strategy_name, "s");
    }

    #[test]
    fn test_success_with_error_message_is_not_success() {
        let mut r = StrategyResult::success(1);
        assert!(r.is_success());
        r.error_message = Some("late".into());
        assert!(!r.is_success());
    }
}
