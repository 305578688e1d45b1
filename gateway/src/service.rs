//! `GatewayService`: the per-request pipeline described in §5 — classify,
//! match a rule, reserve quota and capacity, admit into the scheduler, wait
//! out the queue if needed, dispatch to a provider, and release every hold
//! on the way to whatever terminal state the request reaches.

use crate::envelope::{route_source_label, ErrorResponse, GatewayOutcome, IncomingRequest, ResponseHeaders, SuccessResponse, UsageBlock};
use crate::usage::{UsageReport, UsageSink, UsageSource, UsageStatus};
use chrono::Utc;
use dashmap::DashMap;
use gateway_capacity::{AcquireOutcome, CapacityGuard, QuotaManager, QuotaOutcome};
use gateway_classify::Classifier;
use gateway_classify::RuleEngine;
use gateway_core::config::SchedulerConfig as CoreSchedulerConfig;
use gateway_core::model::{Request, RouteSource, RoutingMetadata};
use gateway_core::GatewayError;
use gateway_provider::{DispatchRequest, Provider};
use gateway_scheduler::{AdmitOutcome, Scheduler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Timing knobs that don't belong to any one component: the exec/overall
/// deadlines of §5, and how often the background tasks tick.
#[derive(Debug, Clone, Copy)]
pub struct GatewayServiceConfig {
    pub exec_timeout: Duration,
    pub overall_timeout: Duration,
    pub drain_interval: Duration,
    pub sweep_interval: Duration,
}

impl GatewayServiceConfig {
    pub fn from_scheduler_config(cfg: &CoreSchedulerConfig) -> Self {
        Self {
            exec_timeout: Duration::from_secs(cfg.exec_timeout_secs),
            overall_timeout: Duration::from_secs(cfg.overall_timeout_secs),
            drain_interval: Duration::from_millis(50),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

enum DispatchOutcome {
    Completed(Result<gateway_provider::DispatchResponse, GatewayError>),
    Cancelled,
    TimedOut,
}

fn quota_key(token_id: &str, account_id: &str) -> String {
    if !token_id.is_empty() {
        token_id.to_string()
    } else if !account_id.is_empty() {
        account_id.to_string()
    } else {
        "anonymous".to_string()
    }
}

pub struct GatewayService {
    classifier: Classifier,
    rule_engine: Arc<RuleEngine>,
    capacity: Arc<CapacityGuard>,
    quota: Arc<QuotaManager>,
    scheduler: Arc<Scheduler>,
    provider: Arc<dyn Provider>,
    usage_sink: Arc<dyn UsageSink>,
    config: GatewayServiceConfig,
    pending_admissions: DashMap<String, oneshot::Sender<u8>>,
    in_flight: DashMap<String, CancellationToken>,
}

impl GatewayService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Classifier,
        rule_engine: Arc<RuleEngine>,
        capacity: Arc<CapacityGuard>,
        quota: Arc<QuotaManager>,
        scheduler: Arc<Scheduler>,
        provider: Arc<dyn Provider>,
        usage_sink: Arc<dyn UsageSink>,
        config: GatewayServiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            classifier,
            rule_engine,
            capacity,
            quota,
            scheduler,
            provider,
            usage_sink,
            config,
            pending_admissions: DashMap::new(),
            in_flight: DashMap::new(),
        })
    }

    /// Starts the two tickers that keep admitted-but-queued requests moving:
    /// the scheduler's own liveness sweep, and a drain loop that resolves
    /// whichever waiter in [`Self::pending_admissions`] a newly freed slot
    /// belongs to. Both stop when `token` is cancelled.
    pub fn spawn_background_tasks(self: &Arc<Self>, token: CancellationToken) {
        let drain_service = Arc::clone(self);
        let drain_token = token.clone();
        let drain_interval = self.config.drain_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(drain_interval);
            loop {
                tokio::select! {
                    _ = drain_token.cancelled() => break,
                    _ = ticker.tick() => {
                        for (request, class_id) in drain_service.scheduler.drain_admissible() {
                            drain_service.resolve_admission(request, class_id);
                        }
                    }
                }
            }
        });

        let timeout_service = Arc::clone(self);
        let decay_service = Arc::clone(self);
        Arc::clone(&self.scheduler).spawn_sweep_task(
            self.config.sweep_interval,
            token,
            move |request| timeout_service.fail_timed_out(request),
            move |decayed| decay_service.note_decayed(decayed),
        );
    }

    fn note_decayed(&self, decayed: u32) {
        if decayed > 0 {
            tracing::debug!(decayed, "upgrade slots decayed back to home class");
        }
    }

    /// Called from the sweep ticker for every request evicted from a queue
    /// after `queue_timeout` (§5, §8 property 7). Frees the capacity and
    /// quota this request was still holding and wakes its waiter, if any,
    /// with nothing (dropping the sender — the waiting `await_admission`
    /// call then reports its own timeout).
    fn fail_timed_out(&self, request: Request) {
        self.pending_admissions.remove(&request.request_id);
        self.capacity.release(&request, &RoutingMetadata::default_policy(), 0);
        self.quota.rollback(&quota_key(&request.token_id, &request.account_id), request.accounted_estimate());
        gateway_core::metrics::metrics()
            .scheduler_rejections_total
            .with_label_values(&["queue_timeout"])
            .inc();
    }

    /// A slot freed up for `request` (drain) or `request` was newly admitted.
    /// If something is still waiting on it, wake it; otherwise nobody will
    /// ever claim the slot (the waiter already gave up, or this is a
    /// preemption re-admission that raced ahead of its retry loop), so free
    /// it here instead of holding it forever.
    fn resolve_admission(&self, request: Request, class_id: u8) {
        match self.pending_admissions.remove(&request.request_id) {
            Some((_, tx)) => {
                if tx.send(class_id).is_err() {
                    self.release_unclaimed(request, class_id);
                }
            }
            None => self.release_unclaimed(request, class_id),
        }
    }

    fn release_unclaimed(&self, request: Request, class_id: u8) {
        tracing::debug!(request_id = %request.request_id, "admitted slot went unclaimed, releasing");
        self.scheduler.release(class_id, &request.request_id);
        self.capacity.release(&request, &RoutingMetadata::default_policy(), 0);
        self.quota.rollback(&quota_key(&request.token_id, &request.account_id), request.accounted_estimate());
    }

    fn cancel_preempted_victims(&self) {
        for victim in self.scheduler.drain_preempted() {
            if let Some((_, token)) = self.in_flight.remove(&victim.request_id) {
                tracing::info!(request_id = %victim.request_id, "soft-preempted, cancelling its in-flight dispatch");
                token.cancel();
            }
        }
    }

    async fn await_admission(&self, request_id: &str, timeout: Duration) -> Option<u8> {
        let (tx, rx) = oneshot::channel();
        self.pending_admissions.insert(request_id.to_string(), tx);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(class_id)) => Some(class_id),
            Ok(Err(_)) => None,
            Err(_elapsed) => {
                self.pending_admissions.remove(request_id);
                None
            }
        }
    }

    async fn emit_usage(
        &self,
        request_id: &str,
        model: &str,
        metadata: &RoutingMetadata,
        prompt_tokens: u64,
        completion_tokens: u64,
        latency: Duration,
        status: UsageStatus,
        error_code: Option<String>,
    ) {
        self.usage_sink
            .record(UsageReport {
                request_id: request_id.to_string(),
                quote_id: None,
                supply_id: None,
                model: model.to_string(),
                prompt_tokens,
                completion_tokens,
                latency_ms: latency.as_millis() as u64,
                status,
                error_code,
                user_id: metadata.account_id.clone(),
                source: UsageSource::Proxy,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Runs one request through classify → rules → quota → capacity →
    /// scheduler → dispatch, releasing every hold it took along the way
    /// regardless of which stage it ends at.
    pub async fn handle_request(self: &Arc<Self>, incoming: IncomingRequest) -> GatewayOutcome {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let ctx = incoming.routing_context();
        let metadata = match self.classifier.classify(&ctx).await {
            Ok(m) => m,
            Err(err) => return Err(ErrorResponse::from_gateway_error(&request_id, &err, None)),
        };

        let rule = self.rule_engine.match_rule(&metadata);
        let route_source = route_source_label(metadata.route_source);

        let estimated_tokens = incoming.estimated_tokens.unwrap_or(0);
        if let Ok(provider_capacity) = self.provider.get_capacity(&incoming.model).await {
            if provider_capacity.max_context_tokens > 0 && estimated_tokens > provider_capacity.max_context_tokens {
                let err = GatewayError::InvalidRequest(format!(
                    "estimated_tokens {estimated_tokens} exceeds max_context_tokens {}",
                    provider_capacity.max_context_tokens
                ));
                return Err(ErrorResponse::from_gateway_error(&request_id, &err, None));
            }
        }

        let key = quota_key(&metadata.token_id, &metadata.account_id);
        let now = Utc::now();
        if metadata.route_source == RouteSource::Degraded && self.quota.remaining(&key).is_none() {
            self.quota.apply_degraded_quota(&key, metadata.quota_tokens_per_period, now);
        }
        let limit = (metadata.quota_tokens_per_period as f64 * rule.quota_multiplier).round().max(0.0) as u64;

        let mut request = Request::new(request_id.clone(), &metadata, rule.class, rule.weight, rule.mode)
            .with_timeouts(rule.queue_timeout, self.config.exec_timeout);
        request.estimated_tokens = estimated_tokens;
        let accounted = request.accounted_estimate();

        if self.quota.reserve(&key, limit, accounted, now) == QuotaOutcome::Exceeded {
            return Err(ErrorResponse::from_gateway_error(&request_id, &GatewayError::QuotaExceeded, None));
        }

        let acquire_err = match self.capacity.try_acquire(&request, &metadata) {
            AcquireOutcome::Ok => None,
            AcquireOutcome::InternalExhausted => Some(GatewayError::CapacityInternalExhausted),
            AcquireOutcome::GlobalExhausted => Some(GatewayError::CapacityGlobalExhausted),
        };
        if let Some(err) = acquire_err {
            self.quota.rollback(&key, accounted);
            return Err(ErrorResponse::from_gateway_error(&request_id, &err, Some(Duration::from_secs(1))));
        }

        let overall_deadline = std::cmp::min(rule.queue_timeout + self.config.exec_timeout, self.config.overall_timeout);

        let admit_result = self.scheduler.admit(request.clone());
        self.cancel_preempted_victims();

        let mut class_id = match admit_result {
            Ok(AdmitOutcome::Admitted { class_id }) => class_id,
            Ok(AdmitOutcome::Queued) => match self.await_admission(&request_id, rule.queue_timeout).await {
                Some(class_id) => class_id,
                None => {
                    self.capacity.release(&request, &metadata, 0);
                    self.quota.rollback(&key, accounted);
                    return Err(ErrorResponse::from_gateway_error(&request_id, &GatewayError::QueueTimeout, None));
                }
            },
            Err(err) => {
                self.capacity.release(&request, &metadata, 0);
                self.quota.rollback(&key, accounted);
                return Err(ErrorResponse::from_gateway_error(&request_id, &err, None));
            }
        };

        let queue_wait_ms = started.elapsed().as_millis() as u64;

        // §4.6: "provider errors propagate as request failures after one
        // retry against the same provider if idempotent". A non-streaming
        // dispatch hasn't yielded anything to the caller yet, so it is
        // always safe to retry once; a streaming one may have already
        // emitted chunks (§9) and is retried zero times.
        let mut retries_remaining = if incoming.streaming { 0 } else { 1 };

        let dispatch_outcome = loop {
            let remaining = overall_deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break DispatchOutcome::TimedOut;
            }

            let cancel = CancellationToken::new();
            self.in_flight.insert(request_id.clone(), cancel.clone());
            let dispatch_request = DispatchRequest {
                request_id: request_id.clone(),
                model: incoming.model.clone(),
                estimated_tokens: accounted,
                streaming: incoming.streaming,
            };
            let outcome = tokio::select! {
                res = self.provider.dispatch(dispatch_request) => DispatchOutcome::Completed(res),
                _ = tokio::time::sleep(remaining) => DispatchOutcome::TimedOut,
                _ = cancel.cancelled() => DispatchOutcome::Cancelled,
            };
            self.in_flight.remove(&request_id);

            match outcome {
                DispatchOutcome::Cancelled => {
                    let remaining_after = overall_deadline.saturating_sub(started.elapsed());
                    if remaining_after.is_zero() {
                        break DispatchOutcome::TimedOut;
                    }
                    match self.await_admission(&request_id, remaining_after).await {
                        Some(new_class_id) => {
                            class_id = new_class_id;
                            continue;
                        }
                        None => break DispatchOutcome::TimedOut,
                    }
                }
                DispatchOutcome::Completed(Err(err)) if retries_remaining > 0 => {
                    retries_remaining -= 1;
                    tracing::info!(request_id = %request_id, %err, "retrying idempotent dispatch against the same provider");
                    continue;
                }
                other => break other,
            }
        };

        if self.scheduler.release(class_id, &request_id).is_none() {
            tracing::debug!(request_id = %request_id, "scheduler slot already released");
        }

        match dispatch_outcome {
            DispatchOutcome::Completed(Ok(resp)) => {
                self.capacity.release(&request, &metadata, resp.total_tokens());
                self.quota.commit(&key, resp.total_tokens(), accounted);
                self.emit_usage(
                    &request_id,
                    &incoming.model,
                    &metadata,
                    resp.prompt_tokens,
                    resp.completion_tokens,
                    started.elapsed(),
                    UsageStatus::Ok,
                    None,
                )
                .await;
                Ok(SuccessResponse {
                    usage: UsageBlock { prompt_tokens: resp.prompt_tokens, completion_tokens: resp.completion_tokens },
                    headers: ResponseHeaders { request_id, class_id, route_source, queue_wait_ms },
                })
            }
            DispatchOutcome::Completed(Err(err)) => {
                self.capacity.release(&request, &metadata, 0);
                self.quota.rollback(&key, accounted);
                self.emit_usage(
                    &request_id,
                    &incoming.model,
                    &metadata,
                    0,
                    0,
                    started.elapsed(),
                    UsageStatus::Error,
                    Some(err.reason_code().to_string()),
                )
                .await;
                Err(ErrorResponse::from_gateway_error(&request_id, &err, Some(Duration::from_secs(1))))
            }
            DispatchOutcome::TimedOut => {
                self.capacity.release(&request, &metadata, 0);
                self.quota.rollback(&key, accounted);
                self.emit_usage(
                    &request_id,
                    &incoming.model,
                    &metadata,
                    0,
                    0,
                    started.elapsed(),
                    UsageStatus::Timeout,
                    Some("overall_deadline_exceeded".to_string()),
                )
                .await;
                let err = GatewayError::ProviderError("overall execution deadline exceeded".to_string());
                Err(ErrorResponse::from_gateway_error(&request_id, &err, None))
            }
            DispatchOutcome::Cancelled => unreachable!("the dispatch loop only ever breaks on Completed or TimedOut"),
        }
    }
}
