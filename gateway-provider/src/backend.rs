//! The actual upstream call, abstracted away from the provider variants
//! that decide *whether* to make it. Speaking the upstream LLM wire
//! protocol is out of scope for this core (§1); `DispatchBackend` is the
//! seam a real HTTP/gRPC client plugs into, mirroring how `QuoteSource`
//! abstracts the marketplace call on the remote path.

use crate::facade::{DispatchRequest, DispatchResponse};
use async_trait::async_trait;
use gateway_core::GatewayError;

#[async_trait]
pub trait DispatchBackend: Send + Sync {
    async fn call(&self, endpoint: &str, request: &DispatchRequest) -> Result<DispatchResponse, GatewayError>;
}

/// Reference backend for tests: echoes back `estimated_tokens` split evenly
/// between prompt/completion, never fails. Production wiring supplies a
/// real HTTP client implementing [`DispatchBackend`].
pub struct EchoBackend;

#[async_trait]
impl DispatchBackend for EchoBackend {
    async fn call(&self, _endpoint: &str, request: &DispatchRequest) -> Result<DispatchResponse, GatewayError> {
        let half = request.estimated_tokens.max(1) / 2;
        Ok(DispatchResponse {
            prompt_tokens: half,
            completion_tokens: request.estimated_tokens.max(1) - half,
            streamed: request.streaming,
        })
    }
}

/// A backend that always fails, used to exercise circuit-breaker and
/// fail-mode paths in tests without a real upstream.
pub struct FailingBackend;

#[async_trait]
impl DispatchBackend for FailingBackend {
    async fn call(&self, _endpoint: &str, _request: &DispatchRequest) -> Result<DispatchResponse, GatewayError> {
        Err(GatewayError::ProviderError("upstream unreachable".to_string()))
    }
}
