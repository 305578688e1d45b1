//! The C7 capability set (§4.7): the uniform shape every provider kind
//! implements, so the scheduler never special-cases local vs remote vs
//! hybrid capacity sources.

use async_trait::async_trait;
use gateway_core::model::Capacity;
use gateway_core::GatewayError;
use std::time::Duration;

/// What the provider actually does with an admitted request; the core has
/// no opinion on wire format, only on whether it produced usable output.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// `true` if the response was served as a stream of chunks rather than
    /// a single payload (§9: "restartable-on-retry but not restartable
    /// once-yielded").
    pub streamed: bool,
}

impl DispatchResponse {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One model/prompt flight handed to [`Provider::dispatch`]. Deliberately
/// minimal — the wire protocol to the upstream model lives entirely inside
/// the provider implementation (§1 scope).
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub request_id: String,
    pub model: String,
    pub estimated_tokens: u64,
    pub streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub state: HealthState,
    pub latency: Duration,
    /// `[0, 1]`.
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Remote,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub name: String,
    pub kind: ProviderKind,
    pub region: String,
    pub supported_models: Vec<String>,
}

/// The minimum operation set every capacity source exposes (§4.7). New
/// provider kinds are added by implementing this trait, not by extending a
/// type hierarchy (§9).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn get_capacity(&self, model: &str) -> Result<Capacity, GatewayError>;
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, GatewayError>;
    async fn health(&self) -> Health;
    fn metadata(&self) -> ProviderMetadata;
}
