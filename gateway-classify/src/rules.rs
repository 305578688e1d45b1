//! Routing Rule Engine (C3, §4.3): an immutable, ordered rule list with a
//! mandatory catch-all, atomically swapped on reload.

use arc_swap::ArcSwap;
use gateway_core::model::{Mode, RoutingMetadata, RoutingRule};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum RuleEngineError {
    /// A reload would leave the rule set without a catch-all default; §4.3
    /// requires this be rejected, not silently applied.
    MissingCatchAll,
    Source(String),
}

impl std::fmt::Display for RuleEngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleEngineError::MissingCatchAll => write!(f, "rule set has no catch-all default"),
            RuleEngineError::Source(msg) => write!(f, "rule source error: {msg}"),
        }
    }
}

impl std::error::Error for RuleEngineError {}

/// Where a new rule list comes from on reload. A polling file-watch
/// implementation is provided below rather than pulling in a new
/// file-watcher dependency; a push-based [`RuleEngine::reload_now`] entry
/// point covers the "external signal" reload trigger.
pub trait RuleSource: Send + Sync + 'static {
    fn load(&self) -> Result<Vec<RoutingRule>, RuleEngineError>;
}

/// Reads an ordered rule list from a YAML file, re-read on every poll —
/// rule sets are small, so this is cheap relative to the reload interval.
pub struct YamlFileRuleSource {
    path: PathBuf,
}

impl YamlFileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleSource for YamlFileRuleSource {
    fn load(&self) -> Result<Vec<RoutingRule>, RuleEngineError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| RuleEngineError::Source(e.to_string()))?;
        serde_yaml::from_str(&text).map_err(|e| RuleEngineError::Source(e.to_string()))
    }
}

/// An in-memory source, primarily for tests and embedders that assemble
/// rules programmatically rather than from a file.
pub struct StaticRuleSource {
    rules: std::sync::Mutex<Vec<RoutingRule>>,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules: std::sync::Mutex::new(rules),
        }
    }

    pub fn set(&self, rules: Vec<RoutingRule>) {
        *self.rules.lock().unwrap() = rules;
    }
}

impl RuleSource for StaticRuleSource {
    fn load(&self) -> Result<Vec<RoutingRule>, RuleEngineError> {
        Ok(self.rules.lock().unwrap().clone())
    }
}

fn has_catch_all(rules: &[RoutingRule]) -> bool {
    rules.iter().any(RoutingRule::is_catch_all)
}

fn default_catch_all() -> RoutingRule {
    RoutingRule {
        priority_order: u32::MAX,
        name: "default".to_string(),
        tier: None,
        environment: None,
        account_type: None,
        workload_tag: None,
        class: gateway_core::model::MAX_PRIORITY,
        weight: 1.0,
        max_tokens_per_second: None,
        max_concurrent: None,
        max_queue_depth: None,
        queue_timeout: Duration::from_secs(30),
        quota_multiplier: 1.0,
        mode: Mode::AtLeast,
    }
}

/// Holds the current rule list behind a lock-free `ArcSwap`, readers never
/// block on a reload in flight (§4.3: "in-flight requests are unaffected").
pub struct RuleEngine {
    rules: ArcSwap<Vec<RoutingRule>>,
}

impl RuleEngine {
    /// Starts with a single built-in catch-all so `match_rule` is always
    /// total even before the first successful load.
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::from_pointee(vec![default_catch_all()]),
        }
    }

    pub fn with_rules(rules: Vec<RoutingRule>) -> Result<Self, RuleEngineError> {
        let engine = Self::new();
        engine.apply(rules)?;
        Ok(engine)
    }

    /// Linear scan in `priority_order`; first predicate match wins (§4.3).
    pub fn match_rule(&self, metadata: &RoutingMetadata) -> RoutingRule {
        let current = self.rules.load();
        let mut sorted: Vec<&RoutingRule> = current.iter().collect();
        sorted.sort_by_key(|r| r.priority_order);
        sorted
            .into_iter()
            .find(|rule| rule.matches(metadata))
            .cloned()
            .unwrap_or_else(default_catch_all)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.load().len()
    }

    fn apply(&self, rules: Vec<RoutingRule>) -> Result<(), RuleEngineError> {
        if !has_catch_all(&rules) {
            gateway_core::metrics::metrics()
                .rule_engine_reloads_total
                .with_label_values(&["rejected_no_catch_all"])
                .inc();
            return Err(RuleEngineError::MissingCatchAll);
        }
        self.rules.store(Arc::new(rules));
        gateway_core::metrics::metrics()
            .rule_engine_reloads_total
            .with_label_values(&["applied"])
            .inc();
        Ok(())
    }

    /// Push-based reload entry point for an external signal (§4.3).
    pub fn reload_now(&self, source: &dyn RuleSource) -> Result<(), RuleEngineError> {
        let rules = source.load()?;
        let result = self.apply(rules);
        if let Err(err) = &result {
            tracing::warn!(%err, "rule reload rejected, keeping previous rule set");
        }
        result
    }

    /// Spawn the periodic reload ticker (default 5 min per §4.3).
    pub fn spawn_reload_task(
        self: &Arc<Self>,
        source: Arc<dyn RuleSource>,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = this.reload_now(source.as_ref()) {
                            tracing::warn!(%err, "periodic rule reload failed");
                        }
                    }
                }
            }
        })
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
