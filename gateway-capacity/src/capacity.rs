//! Capacity Guard (C4, §4.4): admission control over a 60-second sliding
//! window, partitioned at minimum by internal vs external traffic.

use crate::window::RingWindow;
use dashmap::DashMap;
use gateway_core::model::{AccountType, Request};
use gateway_core::RoutingMetadata;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ok,
    InternalExhausted,
    GlobalExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacitySnapshot {
    pub internal_tokens_per_second: f64,
    pub external_tokens_per_second: f64,
    pub global_tokens_per_second: f64,
    pub max_tokens_per_second: f64,
    pub internal_threshold: f64,
    pub may_admit_external: bool,
}

struct Reservation {
    estimated: i64,
    account_type: AccountType,
}

/// Tracks internal/external token throughput over a ring-buffer sliding
/// window and enforces the admission contract of §4.4.
pub struct CapacityGuard {
    internal: RingWindow,
    external: RingWindow,
    class_partitions: DashMap<u8, RingWindow>,
    bucket_count: usize,
    max_tokens_per_second: f64,
    internal_threshold: f64,
    outstanding: DashMap<String, Reservation>,
    double_release_count: AtomicU64,
}

impl CapacityGuard {
    pub fn new(max_tokens_per_second: f64, internal_threshold: f64, window_seconds: usize) -> Self {
        Self {
            internal: RingWindow::new(window_seconds),
            external: RingWindow::new(window_seconds),
            class_partitions: DashMap::new(),
            bucket_count: window_seconds.max(1),
            max_tokens_per_second,
            internal_threshold,
            outstanding: DashMap::new(),
            double_release_count: AtomicU64::new(0),
        }
    }

    fn internal_tps(&self) -> f64 {
        self.internal.tokens_per_second()
    }

    fn external_tps(&self) -> f64 {
        self.external.tokens_per_second()
    }

    fn global_tps(&self) -> f64 {
        self.internal_tps() + self.external_tps()
    }

    /// Budget for the whole window at the configured rate, in raw tokens —
    /// the unit `try_acquire` actually accounts in, since a single
    /// request's `estimated_tokens` is a token count, not a rate.
    fn window_token_budget(&self) -> f64 {
        self.max_tokens_per_second * self.bucket_count as f64
    }

    /// `true` iff `internal_tps / max_tps < internal_threshold` (§4.4).
    pub fn may_admit_external(&self) -> bool {
        if self.max_tokens_per_second <= 0.0 {
            return false;
        }
        self.internal_tps() / self.max_tokens_per_second < self.internal_threshold
    }

    pub fn try_acquire(&self, request: &Request, metadata: &RoutingMetadata) -> AcquireOutcome {
        let amount = request.accounted_estimate() as f64;
        let projected_global = self.internal.sum() as f64 + self.external.sum() as f64 + amount;

        match metadata.account_type {
            AccountType::Internal => {
                if projected_global > self.window_token_budget() {
                    return AcquireOutcome::GlobalExhausted;
                }
            }
            AccountType::External => {
                if !self.may_admit_external() {
                    return AcquireOutcome::InternalExhausted;
                }
                if projected_global > self.window_token_budget() {
                    return AcquireOutcome::GlobalExhausted;
                }
            }
        }

        let estimate = request.accounted_estimate() as i64;
        self.window_for(metadata.account_type).record(estimate);
        self.class_partitions
            .entry(request.class_id)
            .or_insert_with(|| RingWindow::new(self.bucket_count))
            .record(estimate);
        self.outstanding.insert(
            request.request_id.clone(),
            Reservation {
                estimated: estimate,
                account_type: metadata.account_type,
            },
        );
        self.publish_gauges();
        AcquireOutcome::Ok
    }

    /// Reconciles estimated vs actual tokens for a previously-acquired
    /// request. A `request_id` with no matching outstanding reservation is
    /// a double-release and is logged and counted, not applied twice.
    pub fn release(&self, request: &Request, metadata: &RoutingMetadata, actual_tokens: u64) {
        let Some((_, reservation)) = self.outstanding.remove(&request.request_id) else {
            self.double_release_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(request_id = %request.request_id, "double release detected, ignoring");
            return;
        };
        let delta = actual_tokens as i64 - reservation.estimated;
        self.window_for(reservation.account_type).record(delta);
        self.class_partitions
            .entry(request.class_id)
            .or_insert_with(|| RingWindow::new(self.bucket_count))
            .record(delta);
        let _ = metadata;
        self.publish_gauges();
    }

    fn window_for(&self, account_type: AccountType) -> &RingWindow {
        match account_type {
            AccountType::Internal => &self.internal,
            AccountType::External => &self.external,
        }
    }

    pub fn status(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            internal_tokens_per_second: self.internal_tps(),
            external_tokens_per_second: self.external_tps(),
            global_tokens_per_second: self.global_tps(),
            max_tokens_per_second: self.max_tokens_per_second,
            internal_threshold: self.internal_threshold,
            may_admit_external: self.may_admit_external(),
        }
    }

    pub fn double_release_count(&self) -> u64 {
        self.double_release_count.load(Ordering::Relaxed)
    }

    fn publish_gauges(&self) {
        let metrics = gateway_core::metrics::metrics();
        let snapshot = self.status();
        let ratio = |used: f64| -> i64 {
            if snapshot.max_tokens_per_second <= 0.0 {
                0
            } else {
                ((used / snapshot.max_tokens_per_second) * 100.0).round() as i64
            }
        };
        metrics
            .capacity_utilisation_ratio
            .with_label_values(&["internal"])
            .set(ratio(snapshot.internal_tokens_per_second));
        metrics
            .capacity_utilisation_ratio
            .with_label_values(&["external"])
            .set(ratio(snapshot.external_tokens_per_second));
    }

    /// Rotate every partition's window by one bucket; called once per
    /// second by the background ticker.
    fn rotate(&self) {
        self.internal.rotate();
        self.external.rotate();
        for entry in self.class_partitions.iter() {
            entry.value().rotate();
        }
    }

    pub fn spawn_rotation_task(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => this.rotate(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::model::Mode;

    fn metadata(account_type: AccountType) -> RoutingMetadata {
        let mut meta = RoutingMetadata::default_policy();
        meta.account_type = account_type;
        meta
    }

    fn request(id: &str, estimated: u64, class_id: u8) -> Request {
        let meta = RoutingMetadata::default_policy();
        let mut req = Request::new(id, &meta, class_id, 1.0, Mode::Strict);
        req.estimated_tokens = estimated;
        req
    }

    #[test]
    fn reserve_then_release_with_matching_actual_leaves_window_consistent() {
        let guard = CapacityGuard::new(1000.0, 0.9, 60);
        let req = request("r1", 100, 0);
        let meta = metadata(AccountType::Internal);
        assert_eq!(guard.try_acquire(&req, &meta), AcquireOutcome::Ok);
        assert_eq!(guard.status().internal_tokens_per_second, 100.0 / 60.0);
        guard.release(&req, &meta, 100);
        assert_eq!(guard.status().internal_tokens_per_second, 100.0 / 60.0);
    }

    #[test]
    fn release_reconciles_estimation_delta() {
        let guard = CapacityGuard::new(1000.0, 0.9, 60);
        let req = request("r1", 100, 0);
        let meta = metadata(AccountType::Internal);
        guard.try_acquire(&req, &meta);
        guard.release(&req, &meta, 70);
        assert_eq!(guard.status().internal_tokens_per_second, 70.0 / 60.0);
    }

    #[test]
    fn double_release_is_detected_and_ignored() {
        let guard = CapacityGuard::new(1000.0, 0.9, 60);
        let req = request("r1", 100, 0);
        let meta = metadata(AccountType::Internal);
        guard.try_acquire(&req, &meta);
        guard.release(&req, &meta, 100);
        guard.release(&req, &meta, 100);
        assert_eq!(guard.double_release_count(), 1);
    }

    #[test]
    fn external_refused_once_internal_utilisation_crosses_threshold() {
        let guard = CapacityGuard::new(100.0, 0.5, 60);
        // push internal usage to just over 50% of 100 tps within the window
        let req = request("internal-big", 3100, 0);
        let meta = metadata(AccountType::Internal);
        assert_eq!(guard.try_acquire(&req, &meta), AcquireOutcome::Ok);
        assert!(!guard.may_admit_external());

        let ext_req = request("ext-1", 10, 0);
        let ext_meta = metadata(AccountType::External);
        assert_eq!(guard.try_acquire(&ext_req, &ext_meta), AcquireOutcome::InternalExhausted);
    }

    #[test]
    fn global_exhaustion_refuses_even_internal_traffic() {
        let guard = CapacityGuard::new(50.0, 0.9, 60);
        let req = request("r1", 10_000, 0);
        let meta = metadata(AccountType::Internal);
        assert_eq!(guard.try_acquire(&req, &meta), AcquireOutcome::GlobalExhausted);
    }
}
