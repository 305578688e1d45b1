//! Value types shared by every stage of the pipeline (§3 of the design spec).
//!
//! Nothing here owns a connection, a lock, or a background task — those live
//! in the crates that consume these types. `RoutingMetadata` and
//! `RoutingRule` are plain, `Clone`-able snapshots so they can be passed by
//! value across component boundaries without shared mutable state.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Whether an account belongs to the operator (`internal`) or a paying
/// customer (`external`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Internal,
    External,
}

/// Coarse routing tier. Distinct from [`AccountType`]: a `spot` or `premium`
/// external customer is still `AccountType::External`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Internal,
    External,
    Premium,
    Spot,
}

/// Token status as computed at fetch time from `revoked_at`/`expires_at`,
/// never stored directly (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Expired,
    Revoked,
    /// Synthesised by the degradation path; see [`RoutingMetadata::is_valid`].
    Degraded,
}

/// Which layer (or synthesis path) produced a [`RoutingMetadata`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Header,
    Token,
    Default,
    Degraded,
}

/// Scheduler admission mode (§4.6, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Strict,
    AtLeast,
}

/// Which layer of the token store satisfied a lookup (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLayer {
    LocalLru,
    SharedKv,
    Snapshot,
    Durable,
    Degraded,
}

/// Maximum value accepted for `priority_override` / `priority_tier` numeric
/// priority classes (§3: "integer 0-4").
pub const MAX_PRIORITY: u8 = 4;

/// Hard ceiling on the number of scheduler classes (§3, §8).
pub const MAX_CLASS_COUNT: u8 = 100;

/// Classes above this index require aggregated (not per-class) observability
/// per §8's boundary behaviour for `class_count = 100`.
pub const ADAPTIVE_METRIC_AGGREGATION_THRESHOLD: u8 = 20;

/// Routing metadata extracted for a single request (§3).
///
/// Read-only once produced: downstream components never mutate a
/// `RoutingMetadata` in place, they derive new requests or new cached
/// copies from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    /// Opaque identifier for the bearer credential; empty when unauthenticated.
    pub token_id: String,
    pub account_id: String,
    pub account_type: AccountType,
    pub priority_tier: PriorityTier,
    /// Free string: `production` / `staging` / `dev` / `unknown` / caller-supplied.
    pub environment: String,
    pub workload_tag: Option<String>,
    /// `0..=4`, overrides the rule-assigned class when present.
    pub priority_override: Option<u8>,
    pub weight_override: Option<f64>,
    /// 0 = unlimited.
    pub quota_tokens_per_period: u64,
    /// 0 = unlimited.
    pub quota_tokens_per_second: u64,
    pub status: TokenStatus,
    pub route_source: RouteSource,
}

impl RoutingMetadata {
    /// Build the default, unauthenticated policy metadata (§4.2 precedence 3).
    pub fn default_policy() -> Self {
        Self {
            token_id: String::new(),
            account_id: String::new(),
            account_type: AccountType::External,
            priority_tier: PriorityTier::External,
            environment: "unknown".to_string(),
            workload_tag: None,
            priority_override: None,
            weight_override: None,
            quota_tokens_per_period: 0,
            quota_tokens_per_second: 0,
            status: TokenStatus::Active,
            route_source: RouteSource::Default,
        }
    }

    /// Synthesise a fail-open degraded record (§3 invariant, §4.1, §4.8).
    ///
    /// Always `tier=external`, `priority_override=4`, and a quota clamped to
    /// `fail_open_quota`.
    pub fn degraded(token_id: impl Into<String>, fail_open_quota: u64) -> Self {
        Self {
            token_id: token_id.into(),
            account_id: String::new(),
            account_type: AccountType::External,
            priority_tier: PriorityTier::External,
            environment: "unknown".to_string(),
            workload_tag: None,
            priority_override: Some(MAX_PRIORITY),
            weight_override: None,
            quota_tokens_per_period: fail_open_quota,
            quota_tokens_per_second: 0,
            status: TokenStatus::Degraded,
            route_source: RouteSource::Degraded,
        }
    }

    /// Whether this record may be admitted at all. A record with
    /// `status != active` must never be admitted except via fail-open
    /// synthesis (which carries `status = Degraded`, not `Active`).
    pub fn is_admissible(&self) -> bool {
        matches!(self.status, TokenStatus::Active | TokenStatus::Degraded)
    }

    /// Validates the §3 invariant tying `status = degraded` to the
    /// synthesised shape. Used by tests and by stores that accept externally
    /// constructed metadata (e.g. a durable-store row masquerading as
    /// degraded would be a bug).
    pub fn check_degraded_invariant(&self, fail_open_quota: u64) -> bool {
        if self.status != TokenStatus::Degraded {
            return true;
        }
        self.priority_tier == PriorityTier::External
            && self.priority_override == Some(MAX_PRIORITY)
            && self.quota_tokens_per_period <= fail_open_quota
    }
}

/// Match predicates plus assignments for one routing rule (§3).
///
/// `priority_order` is the evaluation order (ascending = evaluated first)
/// and must be unique within the enabled rule set; the rule engine, not
/// this type, enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub priority_order: u32,
    pub name: String,

    // Match predicates — `None` is a wildcard.
    pub tier: Option<PriorityTier>,
    pub environment: Option<String>,
    pub account_type: Option<AccountType>,
    pub workload_tag: Option<String>,

    // Assignments.
    pub class: u8,
    pub weight: f64,
    pub max_tokens_per_second: Option<u64>,
    pub max_concurrent: Option<u32>,
    pub max_queue_depth: Option<u32>,
    #[serde(with = "duration_secs")]
    pub queue_timeout: Duration,
    pub quota_multiplier: f64,
    pub mode: Mode,
}

impl RoutingRule {
    /// A rule with no predicates matches everything; used as the mandatory
    /// catch-all default (§3 invariant: rules form a total function).
    pub fn is_catch_all(&self) -> bool {
        self.tier.is_none()
            && self.environment.is_none()
            && self.account_type.is_none()
            && self.workload_tag.is_none()
    }

    /// True if every non-wildcard predicate equals the corresponding
    /// metadata field (§4.3).
    pub fn matches(&self, metadata: &RoutingMetadata) -> bool {
        if let Some(tier) = self.tier {
            if tier != metadata.priority_tier {
                return false;
            }
        }
        if let Some(account_type) = self.account_type {
            if account_type != metadata.account_type {
                return false;
            }
        }
        if let Some(env) = &self.environment {
            if env != &metadata.environment {
                return false;
            }
        }
        if let Some(tag) = &self.workload_tag {
            match &metadata.workload_tag {
                Some(actual) if actual == tag => {}
                _ => return false,
            }
        }
        true
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Live capacity snapshot for one (model, provider) pair (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub max_tokens_per_second: f64,
    pub available_tokens_per_second: f64,
    pub max_concurrent: u32,
    pub current_concurrent: u32,
    pub max_context_tokens: u64,
    pub model_family: String,
    pub region: String,
    /// `[0, 1]`.
    pub availability: f64,
    pub p99_latency: Duration,
    /// `[0, 1]`.
    pub current_load: f64,
}

impl Capacity {
    /// Checks the §3 invariants; used by provider implementations in tests
    /// and debug assertions rather than enforced at construction (a
    /// momentarily-inconsistent snapshot during a race is a provider bug to
    /// surface, not one for this type to paper over).
    pub fn is_consistent(&self) -> bool {
        self.available_tokens_per_second <= self.max_tokens_per_second
            && self.current_concurrent <= self.max_concurrent
    }
}

/// The kind of scheduling unit a [`Class`] represents (§3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    Priority,
    Bucket,
}

/// A unified scheduling class — either a priority level or a capacity
/// bucket (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub kind: ClassKind,
    pub id: u8,
    pub capacity_tps: f64,
    pub mode: Mode,
    pub weight: f64,
}

/// Non-terminal/terminal lifecycle states for a [`Request`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Admitted,
    Executing,
    Completed,
    Failed,
    Rejected,
    Preempted,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed
                | RequestState::Failed
                | RequestState::Rejected
                | RequestState::Preempted
        )
    }
}

/// A single flight through the core (§3). Created at classification,
/// destroyed at a terminal state.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: String,
    pub token_id: String,
    pub account_id: String,
    pub arrived_at: Instant,
    pub estimated_tokens: u64,
    pub actual_tokens: Option<u64>,
    pub class_id: u8,
    pub effective_priority: u8,
    pub effective_weight: f64,
    pub mode: Mode,
    pub state: RequestState,
    /// Number of times this request has been soft-preempted (§4.6).
    pub preemption_count: u32,
    /// Number of classes this request has been opportunistically upgraded
    /// into relative to its home class; `0` if running in its home class.
    pub upgrade_distance: u8,
    /// The class this request was originally assigned before any upgrade.
    pub home_class_id: u8,
    /// Deadline for leaving the queue (§4.6, §5). Default is generous;
    /// callers set this from the matched [`RoutingRule`] via
    /// [`Request::with_timeouts`].
    pub queue_timeout: Duration,
    /// Deadline for provider execution once admitted (§5: "overall
    /// deadline = min(queue_timeout + exec_timeout, configured ceiling)").
    pub exec_timeout: Duration,
}

impl Request {
    pub fn new(request_id: impl Into<String>, metadata: &RoutingMetadata, class_id: u8, weight: f64, mode: Mode) -> Self {
        let effective_priority = metadata.priority_override.unwrap_or(class_id);
        Self {
            request_id: request_id.into(),
            token_id: metadata.token_id.clone(),
            account_id: metadata.account_id.clone(),
            arrived_at: Instant::now(),
            estimated_tokens: 0,
            actual_tokens: None,
            class_id,
            home_class_id: class_id,
            effective_priority,
            effective_weight: metadata.weight_override.unwrap_or(weight),
            mode,
            state: RequestState::Queued,
            preemption_count: 0,
            upgrade_distance: 0,
            queue_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(120),
        }
    }

    /// Override the queue/exec deadlines carried from the matched rule.
    pub fn with_timeouts(mut self, queue_timeout: Duration, exec_timeout: Duration) -> Self {
        self.queue_timeout = queue_timeout;
        self.exec_timeout = exec_timeout;
        self
    }

    /// `estimated_tokens = 0` is treated as `1` for accounting (§8 boundary
    /// behaviour).
    pub fn accounted_estimate(&self) -> u64 {
        self.estimated_tokens.max(1)
    }

    pub fn is_internal(&self, account_type: AccountType) -> bool {
        account_type == AccountType::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_metadata_satisfies_invariant() {
        let meta = RoutingMetadata::degraded("tok", 1000);
        assert!(meta.check_degraded_invariant(1000));
        assert_eq!(meta.priority_tier, PriorityTier::External);
        assert_eq!(meta.priority_override, Some(4));
    }

    #[test]
    fn active_metadata_trivially_satisfies_degraded_invariant() {
        let meta = RoutingMetadata::default_policy();
        assert!(meta.check_degraded_invariant(0));
    }

    #[test]
    fn catch_all_rule_matches_anything() {
        let rule = RoutingRule {
            priority_order: 100,
            name: "default".into(),
            tier: None,
            environment: None,
            account_type: None,
            workload_tag: None,
            class: 4,
            weight: 1.0,
            max_tokens_per_second: None,
            max_concurrent: None,
            max_queue_depth: None,
            queue_timeout: Duration::from_secs(5),
            quota_multiplier: 1.0,
            mode: Mode::Strict,
        };
        assert!(rule.is_catch_all());
        assert!(rule.matches(&RoutingMetadata::default_policy()));
    }

    #[test]
    fn rule_predicate_mismatch_rejects() {
        let mut rule = RoutingRule {
            priority_order: 1,
            name: "internal-prod".into(),
            tier: Some(PriorityTier::Internal),
            environment: Some("production".into()),
            account_type: None,
            workload_tag: None,
            class: 0,
            weight: 5.0,
            max_tokens_per_second: None,
            max_concurrent: None,
            max_queue_depth: None,
            queue_timeout: Duration::from_secs(5),
            quota_multiplier: 1.0,
            mode: Mode::Strict,
        };
        let mut meta = RoutingMetadata::default_policy();
        meta.priority_tier = PriorityTier::Internal;
        meta.environment = "production".into();
        assert!(rule.matches(&meta));

        meta.environment = "staging".into();
        assert!(!rule.matches(&meta));

        rule.environment = None;
        assert!(rule.matches(&meta));
    }

    #[test]
    fn routing_metadata_round_trips_through_json() {
        let meta = RoutingMetadata::degraded("abc", 500);
        let encoded = serde_json::to_string(&meta).unwrap();
        let decoded: RoutingMetadata = serde_json::from_str(&encoded).unwrap();
        assert_eq!(meta, decoded);
    }

    #[test]
    fn estimated_zero_is_accounted_as_one() {
        let meta = RoutingMetadata::default_policy();
        let mut req = Request::new("r1", &meta, 4, 1.0, Mode::Strict);
        req.estimated_tokens = 0;
        assert_eq!(req.accounted_estimate(), 1);
    }

    #[test]
    fn capacity_consistency_check() {
        let cap = Capacity {
            max_tokens_per_second: 100.0,
            available_tokens_per_second: 50.0,
            max_concurrent: 10,
            current_concurrent: 3,
            max_context_tokens: 8192,
            model_family: "gpt".into(),
            region: "us".into(),
            availability: 0.99,
            p99_latency: Duration::from_millis(200),
            current_load: 0.3,
        };
        assert!(cap.is_consistent());
    }
}
