//! Layered configuration (§6 "Configuration surface").
//!
//! Resolution order, lowest to highest priority:
//!
//! 1. `gateway.yaml` (base) — or an in-memory YAML string via
//!    [`GatewayConfig::from_yaml_str`].
//! 2. `gateway-{profile}.yaml` (profile override), deep-merged over the base.
//! 3. Environment variables of the form `GATEWAY_SCHEDULER__CLASS_COUNT`
//!    (double underscore = nesting separator), overlaid last.
//!
//! Field-level constraints are enforced with `garde`.

use crate::model::{ClassKind, Mode, RoutingRule};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Load(String),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
            ConfigError::Validation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    Strict,
    Wfq,
    Drr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    FailOpen,
    FailClosed,
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    Remote,
    Hybrid,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub class_kind: ClassKind,
    #[garde(range(min = 2, max = 100))]
    pub class_count: u8,
    #[garde(range(min = 0.0))]
    pub base_tokens_per_second: f64,
    #[garde(range(min = 0.0, max = 1.0))]
    pub decay_ratio: f64,
    #[garde(skip)]
    pub mode: Mode,
    #[garde(skip)]
    pub selection_policy: SelectionPolicy,
    #[garde(skip)]
    pub max_upgrade_distance: u8,
    #[garde(skip)]
    pub upgrade_quota: Vec<u32>,
    #[garde(skip)]
    pub max_preemptions: u32,
    #[garde(skip)]
    pub max_upgrade_time_secs: u64,
    #[garde(skip)]
    pub max_queue_depth: u32,
    #[garde(skip)]
    pub queue_timeout_secs: u64,
    #[garde(skip)]
    pub exec_timeout_secs: u64,
    /// Hard ceiling applied on top of `queue_timeout + exec_timeout` (§5):
    /// `deadline = min(queue_timeout + exec_timeout, overall_timeout_secs)`.
    #[garde(range(min = 1))]
    pub overall_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            class_kind: ClassKind::Priority,
            class_count: 5,
            base_tokens_per_second: 1000.0,
            decay_ratio: 0.5,
            mode: Mode::AtLeast,
            selection_policy: SelectionPolicy::Wfq,
            max_upgrade_distance: 10,
            upgrade_quota: vec![2; 5],
            max_preemptions: 1,
            max_upgrade_time_secs: 60,
            max_queue_depth: 1000,
            queue_timeout_secs: 30,
            exec_timeout_secs: 120,
            overall_timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct CapacityGuardConfig {
    #[garde(range(min = 0.0))]
    pub max_tokens_per_second: f64,
    #[garde(range(min = 0.0, max = 1.0))]
    pub internal_threshold: f64,
    #[garde(range(min = 1))]
    pub window_seconds: u64,
}

impl Default for CapacityGuardConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_second: 1000.0,
            internal_threshold: 0.90,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct TokenStoreConfig {
    #[garde(range(min = 1))]
    pub local_lru_size: usize,
    #[garde(range(min = 1))]
    pub shared_kv_ttl_secs: u64,
    #[garde(range(min = 1))]
    pub snapshot_refresh_interval_secs: u64,
    #[garde(skip)]
    pub enable_snapshot_cache: bool,
    #[garde(skip)]
    pub fail_mode: FailMode,
    #[garde(skip)]
    pub fail_open_quota: u64,
    #[garde(range(min = 1))]
    pub snapshot_max_staleness_secs: u64,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            local_lru_size: 10_000,
            shared_kv_ttl_secs: 300,
            snapshot_refresh_interval_secs: 3600,
            enable_snapshot_cache: true,
            fail_mode: FailMode::FailOpen,
            fail_open_quota: 1000,
            snapshot_max_staleness_secs: 7200,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[garde(skip)]
    pub trust_cidrs: Vec<String>,
    #[garde(skip)]
    pub require_token: bool,
    #[garde(skip)]
    pub allow_default: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            trust_cidrs: vec!["10.0.0.0/8".to_string()],
            require_token: false,
            allow_default: true,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[garde(skip)]
    pub kind: ProviderKind,
    #[garde(skip)]
    pub endpoint: String,
    #[garde(range(min = 1))]
    pub circuit_breaker_threshold: u32,
    #[garde(range(min = 1))]
    pub circuit_breaker_timeout_secs: u64,
    #[garde(skip)]
    pub degradation_mode: DegradationMode,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            endpoint: "http://localhost:9000".to_string(),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 30,
            degradation_mode: DegradationMode::FailOpen,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct DegradationConfig {
    #[garde(skip)]
    pub token_store_mode: FailMode,
    #[garde(skip)]
    pub token_store_fail_open_quota: u64,
    #[garde(skip)]
    pub provider_mode: DegradationMode,
    #[garde(range(min = 1))]
    pub circuit_breaker_threshold: u32,
    #[garde(range(min = 1))]
    pub circuit_breaker_timeout_secs: u64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            token_store_mode: FailMode::FailOpen,
            token_store_fail_open_quota: 1000,
            provider_mode: DegradationMode::FailOpen,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 30,
        }
    }
}

/// The full configuration surface (§6), assembled from per-component
/// sections authored and validated individually, then registered into one
/// top-level config struct.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[garde(dive)]
    pub scheduler: SchedulerConfig,
    #[garde(dive)]
    pub capacity: CapacityGuardConfig,
    #[garde(dive)]
    pub token_store: TokenStoreConfig,
    #[garde(dive)]
    pub classifier: ClassifierConfig,
    #[garde(dive)]
    pub provider: ProviderConfig,
    #[garde(dive)]
    pub degradation: DegradationConfig,
    #[garde(skip)]
    pub routing_rules: Vec<RoutingRule>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            capacity: CapacityGuardConfig::default(),
            token_store: TokenStoreConfig::default(),
            classifier: ClassifierConfig::default(),
            provider: ProviderConfig::default(),
            degradation: DegradationConfig::default(),
            routing_rules: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load from `gateway.yaml` (+ optional `gateway-{profile}.yaml`) in the
    /// current directory, then overlay `GATEWAY_*` environment variables.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        let base = read_optional(Path::new("gateway.yaml"))?;
        let profile_path = format!("gateway-{profile}.yaml");
        let overlay = read_optional(Path::new(&profile_path))?;
        Self::assemble(base.as_deref(), overlay.as_deref())
    }

    /// Build directly from a YAML string — the primary entry point for
    /// tests and for embedders that load config through their own means.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::assemble(Some(yaml), None)
    }

    fn assemble(base: Option<&str>, overlay: Option<&str>) -> Result<Self, ConfigError> {
        let mut value: serde_yaml::Value = match base {
            Some(text) => serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?,
            None => serde_yaml::Value::Mapping(Default::default()),
        };
        if let Some(text) = overlay {
            let over: serde_yaml::Value =
                serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            deep_merge(&mut value, over);
        }

        let mut flattened = HashMap::new();
        flatten("", &value, &mut flattened);
        for (env_key, env_val) in std::env::vars() {
            if let Some(rest) = env_key.strip_prefix("GATEWAY_") {
                let dotted = rest.to_lowercase().replace("__", ".");
                let parsed: serde_yaml::Value =
                    serde_yaml::from_str(&env_val).unwrap_or(serde_yaml::Value::String(env_val));
                flattened.insert(dotted, parsed);
            }
        }
        let merged = unflatten(flattened);

        // Defaults fill in anything the caller didn't specify: merge the
        // caller-provided tree *over* a fully-defaulted tree so partial
        // configs (as used throughout the test suite) still validate.
        let default_value = serde_yaml::to_value(GatewayConfig::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut base_with_defaults = default_value;
        deep_merge(&mut base_with_defaults, merged);

        let config: GatewayConfig = serde_yaml::from_value(base_with_defaults)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(config)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Load(format!("{}: {e}", path.display()))),
    }
}

/// Merge `b` into `a`, `b` wins on scalar conflicts; mappings merge
/// recursively key-by-key.
fn deep_merge(a: &mut serde_yaml::Value, b: serde_yaml::Value) {
    match (a, b) {
        (serde_yaml::Value::Mapping(am), serde_yaml::Value::Mapping(bm)) => {
            for (k, v) in bm {
                match am.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        am.insert(k, v);
                    }
                }
            }
        }
        (a_slot, b_val) => *a_slot = b_val,
    }
}

fn flatten(prefix: &str, value: &serde_yaml::Value, out: &mut HashMap<String, serde_yaml::Value>) {
    if let serde_yaml::Value::Mapping(map) = value {
        for (k, v) in map {
            let key_str = k.as_str().unwrap_or_default();
            let full = if prefix.is_empty() {
                key_str.to_string()
            } else {
                format!("{prefix}.{key_str}")
            };
            flatten(&full, v, out);
        }
    } else {
        out.insert(prefix.to_string(), value.clone());
    }
}

fn unflatten(flat: HashMap<String, serde_yaml::Value>) -> serde_yaml::Value {
    let mut root = serde_yaml::Mapping::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    serde_yaml::Value::Mapping(root)
}

fn insert_path(map: &mut serde_yaml::Mapping, parts: &[&str], value: serde_yaml::Value) {
    let key = serde_yaml::Value::String(parts[0].to_string());
    if parts.len() == 1 {
        map.insert(key, value);
        return;
    }
    let entry = map
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    if let serde_yaml::Value::Mapping(child) = entry {
        insert_path(child, &parts[1..], value);
    }
}
