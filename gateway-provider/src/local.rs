//! Local provider variant (§4.7): a single upstream endpoint with
//! statically configured maxima; `get_capacity` returns those maxima minus
//! live in-flight usage.

use crate::backend::DispatchBackend;
use crate::facade::{DispatchRequest, DispatchResponse, Health, HealthState, Provider, ProviderKind, ProviderMetadata};
use async_trait::async_trait;
use gateway_core::model::Capacity;
use gateway_core::GatewayError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct LocalProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub region: String,
    pub model_family: String,
    pub supported_models: Vec<String>,
    pub max_tokens_per_second: f64,
    pub max_concurrent: u32,
    pub max_context_tokens: u64,
}

/// Single-endpoint capacity source. Tracks only `current_concurrent`
/// itself; tokens/sec accounting for admission is the Capacity Guard's job
/// (C4) — this component just reports its own static ceiling.
pub struct LocalProvider {
    config: LocalProviderConfig,
    current_concurrent: AtomicU32,
    backend: Arc<dyn DispatchBackend>,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig, backend: Arc<dyn DispatchBackend>) -> Self {
        Self {
            config,
            current_concurrent: AtomicU32::new(0),
            backend,
        }
    }

    pub fn current_load(&self) -> f64 {
        let current = self.current_concurrent.load(Ordering::Relaxed) as f64;
        if self.config.max_concurrent == 0 {
            return 1.0;
        }
        (current / self.config.max_concurrent as f64).min(1.0)
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn get_capacity(&self, _model: &str) -> Result<Capacity, GatewayError> {
        let current = self.current_concurrent.load(Ordering::Relaxed);
        let load = self.current_load();
        Ok(Capacity {
            max_tokens_per_second: self.config.max_tokens_per_second,
            available_tokens_per_second: self.config.max_tokens_per_second * (1.0 - load),
            max_concurrent: self.config.max_concurrent,
            current_concurrent: current,
            max_context_tokens: self.config.max_context_tokens,
            model_family: self.config.model_family.clone(),
            region: self.config.region.clone(),
            availability: 1.0,
            p99_latency: Duration::from_millis(0),
            current_load: load,
        })
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, GatewayError> {
        self.current_concurrent.fetch_add(1, Ordering::Relaxed);
        let outcome = self.backend.call(&self.config.endpoint, &request).await;
        self.current_concurrent.fetch_sub(1, Ordering::Relaxed);
        outcome
    }

    async fn health(&self) -> Health {
        Health {
            state: HealthState::Healthy,
            latency: Duration::from_millis(0),
            error_rate: 0.0,
        }
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.config.name.clone(),
            kind: ProviderKind::Local,
            region: self.config.region.clone(),
            supported_models: self.config.supported_models.clone(),
        }
    }
}
