//! Usage reporting (§6): the record emitted to an external billing service
//! on every terminal request outcome. The billing service itself is out of
//! scope; this module only defines the report shape and a capability trait
//! for whatever sink an embedder plugs in, the same way [`gateway_provider::QuoteSource`]
//! models the marketplace side of a dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Ok,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    Consumer,
    Provider,
    Proxy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub request_id: String,
    pub quote_id: Option<String>,
    pub supply_id: Option<String>,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
    pub status: UsageStatus,
    pub error_code: Option<String>,
    pub user_id: String,
    pub source: UsageSource,
    pub timestamp: DateTime<Utc>,
}

/// Destination for completed-request usage reports. Production sinks
/// (a real billing pipeline) live outside this crate; [`LoggingUsageSink`]
/// is what embedders get until they wire one in.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, report: UsageReport);
}

pub struct LoggingUsageSink;

#[async_trait]
impl UsageSink for LoggingUsageSink {
    async fn record(&self, report: UsageReport) {
        tracing::info!(
            request_id = %report.request_id,
            model = %report.model,
            prompt_tokens = report.prompt_tokens,
            completion_tokens = report.completion_tokens,
            latency_ms = report.latency_ms,
            status = ?report.status,
            "usage report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_sink_accepts_a_report() {
        let sink = LoggingUsageSink;
        sink.record(UsageReport {
            request_id: "r1".into(),
            quote_id: None,
            supply_id: None,
            model: "gpt-x".into(),
            prompt_tokens: 10,
            completion_tokens: 5,
            latency_ms: 120,
            status: UsageStatus::Ok,
            error_code: None,
            user_id: "acct-1".into(),
            source: UsageSource::Proxy,
            timestamp: Utc::now(),
        })
        .await;
    }
}
