//! Admission engine (C6, §4.6): priority-class queues, the at-least upgrade
//! path, soft preemption, and the background sweepers that keep both honest
//! over time.
//!
//! The engine never talks to a provider itself — admitting a request only
//! means "this class has a concurrency slot for it now". Dispatch to C7 and
//! releasing the slot on completion are the caller's (the `gateway` crate's)
//! job, via [`Scheduler::release`].

use crate::class::{ClassState, QueuedRequest, RunningRequest};
use crate::policy;
use gateway_core::config::SelectionPolicy;
use gateway_core::model::{Mode, Request, RequestState};
use gateway_core::GatewayError;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted { class_id: u8 },
    Queued,
}

pub struct SchedulerConfig {
    pub selection_policy: SelectionPolicy,
    /// Largest `home_class_id - target_class_id` an at-least request may
    /// cross in one upgrade (§4.6).
    pub max_upgrade_distance: u8,
    /// How many times a single request may be soft-preempted before it is
    /// rejected outright instead of re-queued (§4.6).
    pub max_preemptions: u32,
    /// How long an upgraded request may occupy a higher class before the
    /// decay sweep returns it to its home queue (§4.6).
    pub max_upgrade_time: Duration,
    pub max_queue_depth: u32,
}

/// Requests the sweep pulled out of a queue because they aged past their
/// deadline; terminal, the caller only needs to report them.
pub struct SweepReport {
    pub timed_out: Vec<Request>,
    pub decayed: u32,
}

/// The full C6 capability: one [`ClassState`] per configured priority
/// class, ordered ascending by `class_id` (0 = highest capacity/priority).
pub struct Scheduler {
    classes: Vec<ClassState>,
    config: SchedulerConfig,
    preempted: std::sync::Mutex<Vec<Request>>,
}

impl Scheduler {
    pub fn new(classes: Vec<ClassState>, config: SchedulerConfig) -> Self {
        Self { classes, config, preempted: std::sync::Mutex::new(Vec::new()) }
    }

    /// Victims evicted by soft preemption since the last call (§4.6).
    /// Callers that track their own in-flight dispatch per request use this
    /// to cancel the one just evicted instead of letting it run to
    /// completion for nothing.
    pub fn drain_preempted(&self) -> Vec<Request> {
        std::mem::take(&mut self.preempted.lock().unwrap())
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class(&self, id: u8) -> Option<&ClassState> {
        self.classes.get(id as usize)
    }

    /// §4.6 admission attempt for a newly classified, rule-assigned
    /// request. Tries, in order: a free slot in its own class, freeing one
    /// via soft preemption, an at-least upgrade to a higher class, and
    /// finally the wait queue.
    pub fn admit(&self, mut request: Request) -> Result<AdmitOutcome, GatewayError> {
        let home = request.home_class_id as usize;
        if home >= self.classes.len() {
            return Err(GatewayError::InvalidRequest(format!("class {home} is not configured")));
        }

        if self.try_admit_into_class(home, &mut request) {
            return Ok(AdmitOutcome::Admitted { class_id: home as u8 });
        }

        if self.try_preempt_into(home, &mut request) {
            return Ok(AdmitOutcome::Admitted { class_id: home as u8 });
        }

        if request.mode == Mode::AtLeast {
            if let Some(target) = self.try_upgrade(home, &mut request) {
                return Ok(AdmitOutcome::Admitted { class_id: target as u8 });
            }
        }

        let class = &self.classes[home];
        if class.queue_len() as u32 >= self.config.max_queue_depth {
            gateway_core::metrics::metrics()
                .scheduler_rejections_total
                .with_label_values(&["queue_full"])
                .inc();
            return Err(GatewayError::QueueFull);
        }
        let queue_timeout = request.queue_timeout;
        class.queue.lock().unwrap().push_back(QueuedRequest {
            request,
            enqueued_at: Instant::now(),
            queue_timeout,
        });
        gateway_core::metrics::metrics()
            .scheduler_queue_depth
            .with_label_values(&[&gateway_core::metrics::class_label(home)])
            .set(class.queue_len() as i64);
        Ok(AdmitOutcome::Queued)
    }

    /// After a slot frees up (a release, or on a sweep tick), pull as many
    /// queued requests as now fit into running, honouring service order.
    /// Returns the admitted requests so the caller can dispatch them.
    pub fn drain_admissible(&self) -> Vec<(Request, u8)> {
        let mut admitted = Vec::new();
        for &idx in &policy::service_order(self.config.selection_policy, &self.classes) {
            let class = &self.classes[idx];
            while class.has_room() {
                let next = class.queue.lock().unwrap().pop_front();
                let Some(queued) = next else { break };
                if queued.is_timed_out(Instant::now()) {
                    gateway_core::metrics::metrics()
                        .scheduler_rejections_total
                        .with_label_values(&["queue_timeout"])
                        .inc();
                    continue;
                }
                let mut request = queued.request;
                if self.try_admit_into_class(idx, &mut request) {
                    admitted.push((request, idx as u8));
                } else {
                    // lost the race to another admission path; put it back.
                    class.queue.lock().unwrap().push_front(QueuedRequest {
                        request,
                        enqueued_at: queued.enqueued_at,
                        queue_timeout: queued.queue_timeout,
                    });
                    break;
                }
            }
            gateway_core::metrics::metrics()
                .scheduler_queue_depth
                .with_label_values(&[&gateway_core::metrics::class_label(idx)])
                .set(class.queue_len() as i64);
        }
        admitted
    }

    /// Free the concurrency slot a completed/failed request held, and
    /// return it so the caller can finalise its terminal state.
    pub fn release(&self, class_id: u8, request_id: &str) -> Option<Request> {
        let class = self.classes.get(class_id as usize)?;
        let removed = class.running.lock().unwrap().remove(request_id)?;
        if removed.request.home_class_id as usize != class_id as usize {
            class.upgraded_count.fetch_sub(1, Ordering::Relaxed);
        }
        Some(removed.request)
    }

    fn try_admit_into_class(&self, idx: usize, request: &mut Request) -> bool {
        let class = &self.classes[idx];
        if !class.has_room() {
            return false;
        }
        request.class_id = idx as u8;
        request.state = RequestState::Admitted;
        request.upgrade_distance = (request.home_class_id as i32 - idx as i32).unsigned_abs() as u8;
        let request_id = request.request_id.clone();
        class.running.lock().unwrap().insert(
            request_id,
            RunningRequest {
                request: request.clone(),
                admitted_at: Instant::now(),
            },
        );
        policy::record_service(self.config.selection_policy, class);
        gateway_core::metrics::metrics()
            .scheduler_admissions_total
            .with_label_values(&[&gateway_core::metrics::class_label(idx)])
            .inc();
        true
    }

    /// §4.6 at-least upgrade: scan classes with strictly higher capacity
    /// (lower id) than home, nearest first, subject to `max_upgrade_distance`
    /// and the target class's own `upgrade_quota`.
    fn try_upgrade(&self, home: usize, request: &mut Request) -> Option<usize> {
        let floor = home.saturating_sub(self.config.max_upgrade_distance as usize);
        for j in (floor..home).rev() {
            let class = &self.classes[j];
            if !class.has_room() {
                continue;
            }
            if class.upgraded_count.load(Ordering::Relaxed) >= class.upgrade_quota {
                continue;
            }
            if self.try_admit_into_class(j, request) {
                class.upgraded_count.fetch_add(1, Ordering::Relaxed);
                return Some(j);
            }
        }
        None
    }

    /// §4.6 soft preemption: a strict (or upgrade-exhausted at-least)
    /// request arriving at a full class may evict the running occupant
    /// upgraded from the lowest-priority home class, re-queuing it at its
    /// own home unless it has already been preempted `max_preemptions`
    /// times, in which case it is rejected outright.
    fn try_preempt_into(&self, idx: usize, request: &mut Request) -> bool {
        let class = &self.classes[idx];
        let candidate_id = {
            let running = class.running.lock().unwrap();
            running
                .iter()
                .filter(|(_, r)| r.request.home_class_id as usize != idx)
                .max_by_key(|(_, r)| r.request.home_class_id)
                .map(|(id, _)| id.clone())
        };
        let Some(candidate_id) = candidate_id else {
            return false;
        };
        let evicted = class.running.lock().unwrap().remove(&candidate_id);
        let Some(evicted) = evicted else { return false };
        class.upgraded_count.fetch_sub(1, Ordering::Relaxed);

        let mut victim = evicted.request;
        self.preempted.lock().unwrap().push(victim.clone());
        if victim.preemption_count >= self.config.max_preemptions {
            victim.state = RequestState::Rejected;
            tracing::info!(
                request_id = %victim.request_id,
                "preemption budget exhausted, rejecting instead of re-queueing"
            );
            gateway_core::metrics::metrics()
                .scheduler_rejections_total
                .with_label_values(&["preemption_budget_exhausted"])
                .inc();
        } else {
            victim.preemption_count += 1;
            victim.state = RequestState::Preempted;
            victim.upgrade_distance = 0;
            let home_idx = victim.home_class_id as usize;
            let queue_timeout = victim.queue_timeout;
            if let Some(home_class) = self.classes.get(home_idx) {
                home_class.queue.lock().unwrap().push_front(QueuedRequest {
                    request: victim,
                    enqueued_at: Instant::now(),
                    queue_timeout,
                });
            }
        }
        gateway_core::metrics::metrics()
            .scheduler_preemptions_total
            .with_label_values(&[&gateway_core::metrics::class_label(idx)])
            .inc();

        self.try_admit_into_class(idx, request)
    }

    /// §5 liveness sweep: evict timed-out queue entries and return
    /// upgrade-decayed occupants to their home queue. Run roughly once a
    /// second; see [`Scheduler::spawn_sweep_task`].
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut timed_out = Vec::new();
        let mut decayed = 0u32;

        for class in &self.classes {
            let mut queue = class.queue.lock().unwrap();
            let mut kept = std::collections::VecDeque::with_capacity(queue.len());
            while let Some(entry) = queue.pop_front() {
                if entry.is_timed_out(now) {
                    let mut request = entry.request;
                    request.state = RequestState::Rejected;
                    timed_out.push(request);
                } else {
                    kept.push_back(entry);
                }
            }
            *queue = kept;
        }

        for (idx, class) in self.classes.iter().enumerate() {
            let mut expired_ids = Vec::new();
            {
                let running = class.running.lock().unwrap();
                for (id, running_request) in running.iter() {
                    if running_request.request.home_class_id as usize == idx {
                        continue;
                    }
                    if now.duration_since(running_request.admitted_at) >= self.config.max_upgrade_time {
                        expired_ids.push(id.clone());
                    }
                }
            }
            for id in expired_ids {
                let removed = class.running.lock().unwrap().remove(&id);
                let Some(removed) = removed else { continue };
                class.upgraded_count.fetch_sub(1, Ordering::Relaxed);
                let mut request = removed.request;
                request.state = RequestState::Queued;
                request.upgrade_distance = 0;
                let home_idx = request.home_class_id as usize;
                let queue_timeout = request.queue_timeout;
                if let Some(home_class) = self.classes.get(home_idx) {
                    home_class.queue.lock().unwrap().push_front(QueuedRequest {
                        request,
                        enqueued_at: Instant::now(),
                        queue_timeout,
                    });
                }
                decayed += 1;
            }
        }

        gateway_core::metrics::metrics()
            .scheduler_rejections_total
            .with_label_values(&["queue_timeout"])
            .inc_by(timed_out.len() as u64);

        SweepReport { timed_out, decayed }
    }

    /// Spawn the background sweeper: queue-timeout eviction and upgrade
    /// decay, matched once per tick. `on_timeout` receives each terminally
    /// rejected request so the caller can finalise quota/capacity release;
    /// `on_decayed` is told how many requests returned to their home queue,
    /// since decay alone may free up room worth draining via
    /// [`Scheduler::drain_admissible`].
    pub fn spawn_sweep_task(
        self: std::sync::Arc<Self>,
        interval: Duration,
        token: CancellationToken,
        on_timeout: impl Fn(Request) + Send + Sync + 'static,
        on_decayed: impl Fn(u32) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep();
                        for request in report.timed_out {
                            on_timeout(request);
                        }
                        if report.decayed > 0 {
                            on_decayed(report.decayed);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::RoutingMetadata;

    fn classes() -> Vec<ClassState> {
        vec![
            ClassState::new(0, 2.0, 4.0, 1),
            ClassState::new(1, 1.0, 2.0, 1),
            ClassState::new(2, 1.0, 1.0, 0),
        ]
    }

    fn scheduler(max_upgrade_distance: u8, max_preemptions: u32) -> Scheduler {
        Scheduler::new(
            classes(),
            SchedulerConfig {
                selection_policy: SelectionPolicy::Strict,
                max_upgrade_distance,
                max_preemptions,
                max_upgrade_time: Duration::from_secs(60),
                max_queue_depth: 10,
            },
        )
    }

    fn request(id: &str, home: u8, mode: Mode) -> Request {
        let meta = RoutingMetadata::default_policy();
        Request::new(id, &meta, home, 1.0, mode)
    }

    #[test]
    fn strict_request_admits_into_home_class_when_room() {
        let sched = scheduler(2, 1);
        let outcome = sched.admit(request("r1", 0, Mode::Strict)).unwrap();
        assert_eq!(outcome, AdmitOutcome::Admitted { class_id: 0 });
    }

    #[test]
    fn strict_request_queues_when_home_class_full_and_never_upgrades() {
        let sched = scheduler(2, 1);
        // saturate class 2 (capacity 1)
        sched.admit(request("r0", 2, Mode::Strict)).unwrap();
        let outcome = sched.admit(request("r1", 2, Mode::Strict)).unwrap();
        assert_eq!(outcome, AdmitOutcome::Queued);
    }

    #[test]
    fn at_least_upgrades_into_higher_class_when_home_is_full() {
        let sched = scheduler(2, 1);
        sched.admit(request("r0", 2, Mode::Strict)).unwrap(); // fills class 2 (capacity 1)
        let outcome = sched.admit(request("r1", 2, Mode::AtLeast)).unwrap();
        match outcome {
            AdmitOutcome::Admitted { class_id } => assert!(class_id < 2),
            AdmitOutcome::Queued => panic!("expected an upgrade, not a queue"),
        }
    }

    #[test]
    fn zero_capacity_bucket_class_only_ever_upgrades() {
        let classes = vec![ClassState::new(0, 1.0, 1.0, 5), ClassState::new(1, 0.0, 0.2, 0)];
        let sched = Scheduler::new(
            classes,
            SchedulerConfig {
                selection_policy: SelectionPolicy::Strict,
                max_upgrade_distance: 1,
                max_preemptions: 1,
                max_upgrade_time: Duration::from_secs(60),
                max_queue_depth: 10,
            },
        );
        let outcome = sched.admit(request("r1", 1, Mode::AtLeast)).unwrap();
        assert_eq!(outcome, AdmitOutcome::Admitted { class_id: 0 });

        let outcome = sched.admit(request("r2", 1, Mode::Strict)).unwrap();
        assert_eq!(outcome, AdmitOutcome::Queued);
    }

    #[test]
    fn soft_preemption_evicts_the_most_upgraded_occupant() {
        let sched = scheduler(2, 1);
        // class 0 has capacity 2. Fill it with one native class-0 request
        // and one upgraded class-2 request.
        sched.admit(request("native", 0, Mode::Strict)).unwrap();
        sched.admit(request("upgraded", 2, Mode::AtLeast)).unwrap();
        assert!(!sched.class(0).unwrap().has_room());

        // a strict class-0 arrival should preempt the upgraded occupant.
        let outcome = sched.admit(request("priority", 0, Mode::Strict)).unwrap();
        assert_eq!(outcome, AdmitOutcome::Admitted { class_id: 0 });

        let home_queue_len = sched.class(2).unwrap().queue_len();
        assert_eq!(home_queue_len, 1, "the preempted request should be back in its home queue");
    }

    #[test]
    fn repeated_preemption_past_the_budget_rejects_instead_of_requeueing() {
        let sched = scheduler(2, 0); // max_preemptions = 0: first eviction is terminal
        sched.admit(request("native", 0, Mode::Strict)).unwrap();
        sched.admit(request("upgraded", 2, Mode::AtLeast)).unwrap();

        sched.admit(request("priority", 0, Mode::Strict)).unwrap();

        assert_eq!(sched.class(2).unwrap().queue_len(), 0, "victim was rejected, not re-queued");
    }

    #[test]
    fn queue_full_is_rejected() {
        let sched = Scheduler::new(
            vec![ClassState::new(0, 1.0, 1.0, 0)],
            SchedulerConfig {
                selection_policy: SelectionPolicy::Strict,
                max_upgrade_distance: 0,
                max_preemptions: 0,
                max_upgrade_time: Duration::from_secs(60),
                max_queue_depth: 1,
            },
        );
        sched.admit(request("r0", 0, Mode::Strict)).unwrap();
        sched.admit(request("r1", 0, Mode::Strict)).unwrap(); // queued, depth 1
        let err = sched.admit(request("r2", 0, Mode::Strict)).unwrap_err();
        assert_eq!(err, GatewayError::QueueFull);
    }

    #[test]
    fn release_frees_the_slot_and_decrements_upgraded_count_when_applicable() {
        let sched = scheduler(2, 1);
        sched.admit(request("r0", 2, Mode::Strict)).unwrap();
        sched.admit(request("r1", 2, Mode::AtLeast)).unwrap(); // upgraded somewhere above class 2
        let upgraded_into = (0..2).find(|&c| sched.class(c).unwrap().upgraded_count.load(Ordering::Relaxed) > 0).unwrap();
        sched.release(upgraded_into, "r1").unwrap();
        assert_eq!(sched.class(upgraded_into).unwrap().upgraded_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sweep_evicts_timed_out_queue_entries() {
        let sched = scheduler(0, 0);
        sched.admit(request("r0", 2, Mode::Strict)).unwrap(); // occupies the only slot
        let mut stale = request("r1", 2, Mode::Strict);
        stale.queue_timeout = Duration::from_millis(0);
        sched.admit(stale).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let report = sched.sweep();
        assert_eq!(report.timed_out.len(), 1);
        assert_eq!(report.timed_out[0].state, RequestState::Rejected);
    }
}
