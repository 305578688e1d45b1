//! Per-class scheduling state: the FIFO wait queue, running-request table,
//! and the counters the admission logic and selection policies read.

use gateway_core::model::Request;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A request waiting in a class queue, with the deadline at which it times
/// out of the queue (§4.6 "queue timeout expired ... reject").
pub struct QueuedRequest {
    pub request: Request,
    pub enqueued_at: Instant,
    pub queue_timeout: Duration,
}

impl QueuedRequest {
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.duration_since(self.enqueued_at) >= self.queue_timeout
    }
}

/// Bookkeeping for one admitted (running) request: which class it actually
/// occupies, and when, so the upgrade-decay sweep and preemption search can
/// find it.
pub struct RunningRequest {
    pub request: Request,
    pub admitted_at: Instant,
}

pub struct ClassState {
    pub id: u8,
    pub capacity_tps: f64,
    pub max_concurrent: u32,
    pub weight: f64,
    pub upgrade_quota: u32,
    pub queue: Mutex<VecDeque<QueuedRequest>>,
    pub running: Mutex<HashMap<String, RunningRequest>>,
    pub upgraded_count: AtomicU32,
    pub served_count: AtomicU64,
    pub drr_deficit: Mutex<f64>,
}

impl ClassState {
    pub fn new(id: u8, capacity_tps: f64, weight: f64, upgrade_quota: u32) -> Self {
        Self {
            id,
            capacity_tps,
            // Zero-capacity bucket classes (bottom buckets, §4.6) never have
            // room of their own; they only ever receive upgraded traffic.
            max_concurrent: capacity_tps.max(0.0).round() as u32,
            weight,
            upgrade_quota,
            queue: Mutex::new(VecDeque::new()),
            running: Mutex::new(HashMap::new()),
            upgraded_count: AtomicU32::new(0),
            served_count: AtomicU64::new(0),
            drr_deficit: Mutex::new(0.0),
        }
    }

    pub fn current_concurrent(&self) -> u32 {
        self.running.lock().unwrap().len() as u32
    }

    pub fn has_room(&self) -> bool {
        self.current_concurrent() < self.max_concurrent
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::model::Mode;

    #[test]
    fn zero_capacity_bucket_never_has_room() {
        let class = ClassState::new(9, 0.0, 0.2, 0);
        assert!(!class.has_room());
    }

    #[test]
    fn queue_timeout_detection() {
        let meta = gateway_core::RoutingMetadata::default_policy();
        let request = Request::new("r1", &meta, 0, 1.0, Mode::Strict);
        let queued = QueuedRequest {
            request,
            enqueued_at: Instant::now() - Duration::from_secs(10),
            queue_timeout: Duration::from_secs(5),
        };
        assert!(queued.is_timed_out(Instant::now()));
    }
}
