//! `DegradationPolicy` (§4.8): the shape consulted by both the token store
//! (C1) and the provider facade (C7). Read-mostly, published by pointer
//! swap the same way the rule list and token snapshot are (§9).

use gateway_core::config::DegradationMode;
use std::time::Duration;

/// Circuit-breaker parameters shared by both policies; the breaker itself
/// lives with its consumer (`gateway-provider`'s remote path), this is just
/// the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerParams {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerParams {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Refresh cadence and alerting threshold for C1's snapshot cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotParams {
    pub refresh_interval: Duration,
    pub max_staleness: Duration,
}

impl Default for SnapshotParams {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            max_staleness: Duration::from_secs(300),
        }
    }
}

/// One policy instance: either the token-store or the provider policy.
/// `fail_open_quota` and `snapshot` are meaningless for the provider policy
/// (the provider degrades to zero capacity, not a synthesised quota) but are
/// kept on the same struct — callers only read the fields relevant to them,
/// matching §4.8's "two orthogonal policies" sharing one shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegradationPolicy {
    pub mode: DegradationMode,
    /// Token-store only: quota synthesised for degraded metadata (§4.1,
    /// §4.8 — "1-2 orders of magnitude below normal external quota").
    pub fail_open_quota: u64,
    pub circuit_breaker: CircuitBreakerParams,
    /// Token-store only.
    pub snapshot: SnapshotParams,
}

impl DegradationPolicy {
    pub fn token_store_default() -> Self {
        Self {
            mode: DegradationMode::FailOpen,
            fail_open_quota: 1000,
            circuit_breaker: CircuitBreakerParams::default(),
            snapshot: SnapshotParams::default(),
        }
    }

    pub fn provider_default() -> Self {
        Self {
            mode: DegradationMode::FailClosed,
            fail_open_quota: 0,
            circuit_breaker: CircuitBreakerParams::default(),
            snapshot: SnapshotParams::default(),
        }
    }
}
