//! Quota Manager (C5, §4.5): per-token periodic budget with
//! reserve/commit/rollback against an authoritative decrement-and-check
//! store.
//!
//! Reset cadence is generic over [`QuotaPeriod`] since spec.md calls the
//! calendar-month cadence "typical", not mandatory.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use gateway_core::metrics::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    Ok,
    Exceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPeriod {
    Monthly { reset_day: u32 },
    Rolling { seconds: u64 },
}

struct Balance {
    remaining: i64,
    limit: u64,
    period_started_at: DateTime<Utc>,
    /// Set when the balance was synthesised under degradation (§4.5: "the
    /// fail-open quota replaces the original and is enforced locally only,
    /// no commit is sent upstream").
    degraded: bool,
}

/// Tracks remaining budget per token, resetting it when the active period
/// rolls over.
pub struct QuotaManager {
    balances: DashMap<String, Balance>,
    period: QuotaPeriod,
}

impl QuotaManager {
    pub fn new(period: QuotaPeriod) -> Self {
        Self {
            balances: DashMap::new(),
            period,
        }
    }

    fn period_has_elapsed(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.period {
            QuotaPeriod::Monthly { reset_day } => {
                let next_reset = next_monthly_reset(started_at, reset_day);
                now >= next_reset
            }
            QuotaPeriod::Rolling { seconds } => now - started_at >= ChronoDuration::seconds(seconds as i64),
        }
    }

    /// Ensures a token has a live balance for the current period,
    /// (re)initialising it from `limit` if the previous period elapsed or
    /// no balance exists yet.
    fn ensure_current(&self, token_id: &str, limit: u64, now: DateTime<Utc>) {
        let needs_reset = match self.balances.get(token_id) {
            None => true,
            Some(entry) => !entry.degraded && self.period_has_elapsed(entry.period_started_at, now),
        };
        if needs_reset {
            self.balances.insert(
                token_id.to_string(),
                Balance {
                    remaining: limit as i64,
                    limit,
                    period_started_at: now,
                    degraded: false,
                },
            );
        }
    }

    /// §4.5 `reserve`: decrement-and-check against the authoritative
    /// in-process balance.
    pub fn reserve(&self, token_id: &str, limit: u64, estimated: u64, now: DateTime<Utc>) -> QuotaOutcome {
        if limit == 0 {
            return QuotaOutcome::Ok; // 0 = unlimited, per RoutingMetadata convention
        }
        self.ensure_current(token_id, limit, now);
        let mut entry = self.balances.get_mut(token_id).expect("ensure_current just inserted it");
        if entry.remaining < estimated as i64 {
            metrics().quota_exceeded_total.with_label_values(&[token_id]).inc();
            return QuotaOutcome::Exceeded;
        }
        entry.remaining -= estimated as i64;
        QuotaOutcome::Ok
    }

    /// §4.5 `commit`: reconcile the estimation delta against the balance
    /// already decremented by `reserve`.
    pub fn commit(&self, token_id: &str, actual: u64, estimated: u64) {
        if let Some(mut entry) = self.balances.get_mut(token_id) {
            entry.remaining -= actual as i64 - estimated as i64;
        }
    }

    /// §4.5 `rollback`: restore a reservation that never executed.
    pub fn rollback(&self, token_id: &str, estimated: u64) {
        if let Some(mut entry) = self.balances.get_mut(token_id) {
            entry.remaining += estimated as i64;
        }
    }

    /// Replace a token's balance with the fail-open quota under
    /// degradation; enforced locally only, never committed upstream.
    pub fn apply_degraded_quota(&self, token_id: &str, fail_open_quota: u64, now: DateTime<Utc>) {
        self.balances.insert(
            token_id.to_string(),
            Balance {
                remaining: fail_open_quota as i64,
                limit: fail_open_quota,
                period_started_at: now,
                degraded: true,
            },
        );
    }

    pub fn remaining(&self, token_id: &str) -> Option<i64> {
        self.balances.get(token_id).map(|e| e.remaining)
    }

    pub fn limit(&self, token_id: &str) -> Option<u64> {
        self.balances.get(token_id).map(|e| e.limit)
    }
}

fn next_monthly_reset(started_at: DateTime<Utc>, reset_day: u32) -> DateTime<Utc> {
    let (year, month) = if started_at.month() == 12 {
        (started_at.year() + 1, 1)
    } else {
        (started_at.year(), started_at.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, reset_day.clamp(1, 28), 0, 0, 0)
        .single()
        .unwrap_or(started_at + ChronoDuration::days(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_rollback_leaves_balance_unchanged() {
        let manager = QuotaManager::new(QuotaPeriod::Rolling { seconds: 3600 });
        let now = Utc::now();
        assert_eq!(manager.reserve("t1", 1000, 200, now), QuotaOutcome::Ok);
        assert_eq!(manager.remaining("t1"), Some(800));
        manager.rollback("t1", 200);
        assert_eq!(manager.remaining("t1"), Some(1000));
    }

    #[test]
    fn reserve_exceeding_balance_is_rejected() {
        let manager = QuotaManager::new(QuotaPeriod::Rolling { seconds: 3600 });
        let now = Utc::now();
        assert_eq!(manager.reserve("t1", 100, 50, now), QuotaOutcome::Ok);
        assert_eq!(manager.reserve("t1", 100, 60, now), QuotaOutcome::Exceeded);
    }

    #[test]
    fn commit_reconciles_estimation_delta() {
        let manager = QuotaManager::new(QuotaPeriod::Rolling { seconds: 3600 });
        let now = Utc::now();
        manager.reserve("t1", 1000, 200, now);
        manager.commit("t1", 150, 200);
        // only 150 actually spent, so 50 of the 200 reservation is refunded
        assert_eq!(manager.remaining("t1"), Some(850));
    }

    #[test]
    fn rolling_period_resets_after_elapsed() {
        let manager = QuotaManager::new(QuotaPeriod::Rolling { seconds: 1 });
        let now = Utc::now();
        manager.reserve("t1", 100, 100, now);
        assert_eq!(manager.remaining("t1"), Some(0));
        let later = now + ChronoDuration::seconds(2);
        manager.reserve("t1", 100, 10, later);
        assert_eq!(manager.remaining("t1"), Some(90));
    }

    #[test]
    fn degraded_quota_is_enforced_locally() {
        let manager = QuotaManager::new(QuotaPeriod::Rolling { seconds: 3600 });
        let now = Utc::now();
        manager.apply_degraded_quota("unknown-token", 1000, now);
        assert_eq!(manager.reserve("unknown-token", 1000, 500, now), QuotaOutcome::Ok);
        assert_eq!(manager.remaining("unknown-token"), Some(500));
    }

    #[test]
    fn unlimited_quota_always_admits() {
        let manager = QuotaManager::new(QuotaPeriod::Rolling { seconds: 3600 });
        let now = Utc::now();
        assert_eq!(manager.reserve("t1", 0, 1_000_000, now), QuotaOutcome::Ok);
        assert_eq!(manager.remaining("t1"), None);
    }
}
