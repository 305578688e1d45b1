//! Hybrid provider variant (§4.7): "prefers local when
//! `local.current_load < threshold`, otherwise delegates to remote."
//! A thin routing shim over an already-constructed [`LocalProvider`] and
//! [`RemoteProvider`] pair — it owns no capacity or circuit state itself.

use crate::facade::{DispatchRequest, DispatchResponse, Health, HealthState, Provider, ProviderKind, ProviderMetadata};
use crate::local::LocalProvider;
use crate::remote::RemoteProvider;
use async_trait::async_trait;
use gateway_core::model::Capacity;
use gateway_core::GatewayError;
use std::sync::Arc;

pub struct HybridProviderConfig {
    pub name: String,
    pub region: String,
    /// `[0, 1]`. Below this, prefer local; at or above, delegate to remote.
    pub local_load_threshold: f64,
}

/// Routes each call to whichever backing provider its own load policy
/// currently favours. Neither backing provider's kind leaks to callers;
/// `metadata().kind` always reports `Hybrid`.
pub struct HybridProvider {
    config: HybridProviderConfig,
    local: Arc<LocalProvider>,
    remote: Arc<RemoteProvider>,
}

impl HybridProvider {
    pub fn new(config: HybridProviderConfig, local: Arc<LocalProvider>, remote: Arc<RemoteProvider>) -> Self {
        Self { config, local, remote }
    }

    fn prefers_local(&self) -> bool {
        self.local.current_load() < self.config.local_load_threshold
    }
}

#[async_trait]
impl Provider for HybridProvider {
    async fn get_capacity(&self, model: &str) -> Result<Capacity, GatewayError> {
        if self.prefers_local() {
            self.local.get_capacity(model).await
        } else {
            self.remote.get_capacity(model).await
        }
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, GatewayError> {
        if self.prefers_local() {
            self.local.dispatch(request).await
        } else {
            self.remote.dispatch(request).await
        }
    }

    async fn health(&self) -> Health {
        if self.prefers_local() {
            self.local.health().await
        } else {
            let remote = self.remote.health().await;
            // A remote-degraded hybrid is at worst "degraded" from the
            // caller's perspective: local remains a fallback.
            Health {
                state: match remote.state {
                    HealthState::Down => HealthState::Degraded,
                    other => other,
                },
                latency: remote.latency,
                error_rate: remote.error_rate,
            }
        }
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.config.name.clone(),
            kind: ProviderKind::Hybrid,
            region: self.config.region.clone(),
            supported_models: self.local.metadata().supported_models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EchoBackend, FailingBackend};
    use crate::local::LocalProviderConfig;
    use crate::quote::StaticQuoteSource;
    use crate::remote::RemoteProviderConfig;
    use gateway_degradation::DegradationController;

    fn local(max_concurrent: u32) -> Arc<LocalProvider> {
        Arc::new(LocalProvider::new(
            LocalProviderConfig {
                name: "local-pool".into(),
                endpoint: "http://localhost:9000".into(),
                region: "local".into(),
                model_family: "llama".into(),
                supported_models: vec!["llama-70b".into()],
                max_tokens_per_second: 500.0,
                max_concurrent,
                max_context_tokens: 8192,
            },
            Arc::new(EchoBackend),
        ))
    }

    fn remote() -> Arc<RemoteProvider> {
        Arc::new(RemoteProvider::new(
            RemoteProviderConfig {
                name: "supplier-a".into(),
                model_family: "llama".into(),
                supported_models: vec!["llama-70b".into()],
            },
            Arc::new(StaticQuoteSource::new()),
            Arc::new(FailingBackend),
            Arc::new(DegradationController::default()),
        ))
    }

    fn hybrid(threshold: f64, max_concurrent: u32) -> HybridProvider {
        HybridProvider::new(
            HybridProviderConfig {
                name: "hybrid-a".into(),
                region: "local".into(),
                local_load_threshold: threshold,
            },
            local(max_concurrent),
            remote(),
        )
    }

    #[tokio::test]
    async fn idle_local_is_preferred_under_threshold() {
        let provider = hybrid(0.9, 4);
        let cap = provider.get_capacity("llama-70b").await.unwrap();
        assert_eq!(cap.region, "local");
        assert_eq!(provider.metadata().kind, ProviderKind::Hybrid);
    }

    #[tokio::test]
    async fn zero_capacity_local_delegates_to_remote() {
        // max_concurrent = 0 forces current_load() to 1.0, always over threshold.
        let provider = hybrid(0.5, 0);
        let err = provider.dispatch(DispatchRequest {
            request_id: "r1".into(),
            model: "llama-70b".into(),
            estimated_tokens: 10,
            streaming: false,
        })
        .await
        .unwrap_err();
        assert_eq!(err, GatewayError::ProviderUnavailable);
    }
}
