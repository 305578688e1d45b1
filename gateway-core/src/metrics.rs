//! Prometheus metrics shared across every pipeline stage.
//!
//! One process-wide registry, initialised lazily on first use via a plain
//! `OnceLock<Metrics>`. Each
//! component (`gateway-tokenstore`, `gateway-classify`, `gateway-capacity`,
//! `gateway-scheduler`, `gateway-provider`, `gateway-degradation`) calls the
//! recorder functions here rather than holding its own `Registry`, so a
//! single `/metrics` scrape (out of scope for this core — §1) sees
//! everything.

use prometheus::{opts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder, Encoder};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub registry: Registry,

    // Token store (C1)
    pub token_store_lookups_total: IntCounterVec,
    pub token_store_snapshot_staleness_seconds: IntGauge,

    // Classifier / rule engine (C2, C3)
    pub classifier_route_source_total: IntCounterVec,
    pub rule_engine_reloads_total: IntCounterVec,

    // Capacity guard (C4)
    pub capacity_utilisation_ratio: IntGaugeVec,

    // Quota manager (C5)
    pub quota_exceeded_total: IntCounterVec,

    // Scheduler (C6)
    pub scheduler_queue_depth: IntGaugeVec,
    pub scheduler_admissions_total: IntCounterVec,
    pub scheduler_rejections_total: IntCounterVec,
    pub scheduler_preemptions_total: IntCounterVec,

    // Provider (C7)
    pub provider_circuit_state: IntGaugeVec,
    pub provider_dispatch_duration_seconds: HistogramVec,

    // Degradation controller (C8)
    pub degradation_mode: IntGaugeVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let token_store_lookups_total = IntCounterVec::new(
            opts!("gateway_token_store_lookups_total", "Token store lookups by layer and outcome"),
            &["layer", "outcome"],
        )
        .expect("metric can be created");
        let token_store_snapshot_staleness_seconds = IntGauge::new(
            "gateway_token_store_snapshot_staleness_seconds",
            "Seconds since the snapshot cache last refreshed successfully",
        )
        .expect("metric can be created");

        let classifier_route_source_total = IntCounterVec::new(
            opts!("gateway_classifier_route_source_total", "Classified requests by route_source"),
            &["route_source"],
        )
        .expect("metric can be created");
        let rule_engine_reloads_total = IntCounterVec::new(
            opts!("gateway_rule_engine_reloads_total", "Rule engine reloads by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");

        let capacity_utilisation_ratio = IntGaugeVec::new(
            opts!("gateway_capacity_utilisation_percent", "Utilisation (0-100) by partition"),
            &["partition"],
        )
        .expect("metric can be created");

        let quota_exceeded_total = IntCounterVec::new(
            opts!("gateway_quota_exceeded_total", "Quota-exceeded rejections by token"),
            &["token_id"],
        )
        .expect("metric can be created");

        let scheduler_queue_depth = IntGaugeVec::new(
            opts!("gateway_scheduler_queue_depth", "Current queue depth by class"),
            &["class_id"],
        )
        .expect("metric can be created");
        let scheduler_admissions_total = IntCounterVec::new(
            opts!("gateway_scheduler_admissions_total", "Admitted requests by class"),
            &["class_id"],
        )
        .expect("metric can be created");
        let scheduler_rejections_total = IntCounterVec::new(
            opts!("gateway_scheduler_rejections_total", "Rejected requests by reason"),
            &["reason"],
        )
        .expect("metric can be created");
        let scheduler_preemptions_total = IntCounterVec::new(
            opts!("gateway_scheduler_preemptions_total", "Soft preemptions by class"),
            &["class_id"],
        )
        .expect("metric can be created");

        let provider_circuit_state = IntGaugeVec::new(
            opts!("gateway_provider_circuit_state", "0=closed 1=half_open 2=open"),
            &["provider"],
        )
        .expect("metric can be created");
        let provider_dispatch_duration_seconds = HistogramVec::new(
            prometheus::histogram_opts!(
                "gateway_provider_dispatch_duration_seconds",
                "Dispatch latency by provider"
            ),
            &["provider"],
        )
        .expect("metric can be created");

        let degradation_mode = IntGaugeVec::new(
            opts!("gateway_degradation_mode", "0=fail_open 1=fail_closed 2=cached"),
            &["policy"],
        )
        .expect("metric can be created");

        macro_rules! register {
            ($($metric:expr),* $(,)?) => {
                $(registry.register(Box::new($metric.clone())).expect("metric can be registered");)*
            };
        }
        register!(
            token_store_lookups_total,
            token_store_snapshot_staleness_seconds,
            classifier_route_source_total,
            rule_engine_reloads_total,
            capacity_utilisation_ratio,
            quota_exceeded_total,
            scheduler_queue_depth,
            scheduler_admissions_total,
            scheduler_rejections_total,
            scheduler_preemptions_total,
            provider_circuit_state,
            provider_dispatch_duration_seconds,
            degradation_mode,
        );

        Self {
            registry,
            token_store_lookups_total,
            token_store_snapshot_staleness_seconds,
            classifier_route_source_total,
            rule_engine_reloads_total,
            capacity_utilisation_ratio,
            quota_exceeded_total,
            scheduler_queue_depth,
            scheduler_admissions_total,
            scheduler_rejections_total,
            scheduler_preemptions_total,
            provider_circuit_state,
            provider_dispatch_duration_seconds,
            degradation_mode,
        }
    }
}

/// Get (initialising on first call) the process-wide metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Highest class index that gets its own label; classes beyond this one
/// collapse into a single `"20+"` bucket (§8: "class_count = 100 ... MUST
/// aggregate classes above index 20"), keeping per-class metric cardinality
/// bounded regardless of how many buckets a deployment configures.
pub const MAX_LABELLED_CLASS: usize = 20;

pub fn class_label(class_id: usize) -> String {
    if class_id > MAX_LABELLED_CLASS {
        "20+".to_string()
    } else {
        class_id.to_string()
    }
}

/// Encode all metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_singleton_is_stable() {
        let a = metrics() as *const Metrics;
        let b = metrics() as *const Metrics;
        assert_eq!(a, b);
    }

    #[test]
    fn encode_metrics_produces_text() {
        metrics().classifier_route_source_total.with_label_values(&["header"]).inc();
        let text = encode_metrics();
        assert!(text.contains("gateway_classifier_route_source_total"));
    }
}
