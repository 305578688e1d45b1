//! Remote provider variant (§4.7): consults an external quote service,
//! dispatches against the quoted endpoint, and degrades via a circuit
//! breaker consistent with [`DegradationController`]'s provider policy.

use crate::backend::DispatchBackend;
use crate::circuit::{CircuitBreaker, CircuitState, Permit};
use crate::facade::{DispatchRequest, DispatchResponse, Health, HealthState, Provider, ProviderKind, ProviderMetadata};
use crate::quote::{QuoteError, QuoteSource};
use async_trait::async_trait;
use gateway_core::config::DegradationMode;
use gateway_core::model::Capacity;
use gateway_core::GatewayError;
use gateway_degradation::DegradationController;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct RemoteProviderConfig {
    pub name: String,
    pub model_family: String,
    pub supported_models: Vec<String>,
}

/// Quote-driven capacity source. `get_capacity` fetches (or reuses, if
/// `cached` mode is active) a quote and maps its throughput/availability
/// fields onto [`Capacity`]; `dispatch` uses the quote's endpoint and
/// signed token directly.
pub struct RemoteProvider {
    config: RemoteProviderConfig,
    quotes: Arc<dyn QuoteSource>,
    backend: Arc<dyn DispatchBackend>,
    breaker: CircuitBreaker,
    degradation: Arc<DegradationController>,
    consecutive_errors: AtomicU32,
    total_calls: AtomicU32,
}

impl RemoteProvider {
    pub fn new(
        config: RemoteProviderConfig,
        quotes: Arc<dyn QuoteSource>,
        backend: Arc<dyn DispatchBackend>,
        degradation: Arc<DegradationController>,
    ) -> Self {
        let params = degradation.provider_policy().circuit_breaker;
        Self {
            config,
            quotes,
            backend,
            breaker: CircuitBreaker::new(params.failure_threshold, params.open_timeout),
            degradation,
            consecutive_errors: AtomicU32::new(0),
            total_calls: AtomicU32::new(0),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn record_circuit_metric(&self) {
        let value = match self.breaker.state() {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        gateway_core::metrics::metrics()
            .provider_circuit_state
            .with_label_values(&[&self.config.name])
            .set(value);
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    /// While the breaker is `open`: `fail_open` returns zero capacity so
    /// the scheduler simply never targets this provider; `fail_closed`
    /// propagates an error (§4.7).
    async fn get_capacity(&self, model: &str) -> Result<Capacity, GatewayError> {
        if self.breaker.state() == CircuitState::Open {
            self.record_circuit_metric();
            return match self.degradation.provider_policy().mode {
                DegradationMode::FailOpen => Ok(zero_capacity(&self.config.model_family)),
                DegradationMode::FailClosed => Err(GatewayError::ProviderUnavailable),
                DegradationMode::Cached => Ok(zero_capacity(&self.config.model_family)),
            };
        }

        match self.quotes.quote(model).await {
            Ok(quote) => {
                self.record_circuit_metric();
                Ok(Capacity {
                    max_tokens_per_second: quote.throughput_tps,
                    available_tokens_per_second: quote.throughput_tps,
                    max_concurrent: u32::MAX,
                    current_concurrent: 0,
                    max_context_tokens: u64::MAX,
                    model_family: self.config.model_family.clone(),
                    region: quote.region,
                    availability: quote.availability,
                    p99_latency: Duration::from_millis(quote.p99_latency_ms),
                    current_load: 0.0,
                })
            }
            Err(QuoteError::NoSupply) => Err(GatewayError::ProviderUnavailable),
            Err(QuoteError::Unavailable(reason)) => {
                tracing::warn!(%reason, "remote quote source unavailable");
                match self.degradation.provider_policy().mode {
                    DegradationMode::FailOpen => Ok(zero_capacity(&self.config.model_family)),
                    DegradationMode::FailClosed | DegradationMode::Cached => Err(GatewayError::ProviderUnavailable),
                }
            }
        }
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, GatewayError> {
        let permit = self.breaker.permit();
        if permit == Permit::Denied {
            self.record_circuit_metric();
            return Err(GatewayError::ProviderUnavailable);
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let quote = match self.quotes.quote(&request.model).await {
            Ok(quote) => quote,
            Err(_) => {
                self.breaker.record_failure();
                self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                self.record_circuit_metric();
                return Err(GatewayError::ProviderUnavailable);
            }
        };
        if quote.is_expired(chrono::Utc::now()) {
            self.breaker.record_failure();
            self.record_circuit_metric();
            return Err(GatewayError::ProviderError("quote expired before dispatch".to_string()));
        }

        let timer = gateway_core::metrics::metrics()
            .provider_dispatch_duration_seconds
            .with_label_values(&[&self.config.name])
            .start_timer();
        let outcome = tokio::time::timeout(quote.exec_timeout(), self.backend.call(&quote.endpoint, &request)).await;
        timer.observe_duration();

        match outcome {
            Ok(Ok(response)) => {
                self.breaker.record_success();
                self.consecutive_errors.store(0, Ordering::Relaxed);
                self.record_circuit_metric();
                Ok(response)
            }
            Ok(Err(err)) => {
                self.breaker.record_failure();
                self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                self.record_circuit_metric();
                Err(err)
            }
            Err(_elapsed) => {
                self.breaker.record_failure();
                self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                self.record_circuit_metric();
                Err(GatewayError::ProviderError("exec_timeout elapsed".to_string()))
            }
        }
    }

    async fn health(&self) -> Health {
        let total = self.total_calls.load(Ordering::Relaxed).max(1) as f64;
        let errors = self.consecutive_errors.load(Ordering::Relaxed) as f64;
        let state = match self.breaker.state() {
            CircuitState::Closed => HealthState::Healthy,
            CircuitState::HalfOpen => HealthState::Degraded,
            CircuitState::Open => HealthState::Down,
        };
        Health {
            state,
            latency: Duration::from_millis(0),
            error_rate: (errors / total).min(1.0),
        }
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.config.name.clone(),
            kind: ProviderKind::Remote,
            region: "remote".to_string(),
            supported_models: self.config.supported_models.clone(),
        }
    }
}

fn zero_capacity(model_family: &str) -> Capacity {
    Capacity {
        max_tokens_per_second: 0.0,
        available_tokens_per_second: 0.0,
        max_concurrent: 0,
        current_concurrent: 0,
        max_context_tokens: 0,
        model_family: model_family.to_string(),
        region: "unknown".to_string(),
        availability: 0.0,
        p99_latency: Duration::from_secs(0),
        current_load: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EchoBackend, FailingBackend};
    use crate::quote::StaticQuoteSource;
    use gateway_degradation::{CircuitBreakerParams, DegradationPolicy};

    fn sample_quote() -> crate::quote::SupplyQuote {
        crate::quote::SupplyQuote {
            quote_id: "q1".into(),
            supply_id: "s1".into(),
            endpoint: "https://supplier.example".into(),
            signed_token: "signed".into(),
            price_per_mtoken: 2.0,
            supplier_price_per_mtoken: 1.5,
            commission_rate: 0.25,
            region: "us-east".into(),
            p99_latency_ms: 200,
            throughput_tps: 80.0,
            availability: 0.99,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(60),
            exec_timeout_sec: 5,
        }
    }

    fn degradation(mode: DegradationMode) -> Arc<DegradationController> {
        let policy = DegradationPolicy {
            mode,
            fail_open_quota: 0,
            circuit_breaker: CircuitBreakerParams {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(30),
            },
            snapshot: Default::default(),
        };
        Arc::new(DegradationController::new(DegradationPolicy::token_store_default(), policy))
    }

    #[tokio::test]
    async fn healthy_quote_maps_to_capacity() {
        let quotes = Arc::new(StaticQuoteSource::new());
        quotes.set("gpt-x", sample_quote());
        let provider = RemoteProvider::new(
            RemoteProviderConfig {
                name: "supplier-a".into(),
                model_family: "gpt".into(),
                supported_models: vec!["gpt-x".into()],
            },
            quotes,
            Arc::new(EchoBackend),
            degradation(DegradationMode::FailOpen),
        );
        let cap = provider.get_capacity("gpt-x").await.unwrap();
        assert_eq!(cap.max_tokens_per_second, 80.0);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures_and_fails_open_capacity() {
        let quotes = Arc::new(StaticQuoteSource::new());
        quotes.set("gpt-x", sample_quote());
        let provider = RemoteProvider::new(
            RemoteProviderConfig {
                name: "supplier-a".into(),
                model_family: "gpt".into(),
                supported_models: vec!["gpt-x".into()],
            },
            quotes,
            Arc::new(FailingBackend),
            degradation(DegradationMode::FailOpen),
        );

        for _ in 0..2 {
            let req = DispatchRequest {
                request_id: "r".into(),
                model: "gpt-x".into(),
                estimated_tokens: 10,
                streaming: false,
            };
            assert!(provider.dispatch(req).await.is_err());
        }
        assert_eq!(provider.circuit_state(), CircuitState::Open);

        let cap = provider.get_capacity("gpt-x").await.unwrap();
        assert_eq!(cap.available_tokens_per_second, 0.0, "open breaker in fail_open mode yields zero capacity, not an error");
    }

    #[tokio::test]
    async fn breaker_opens_and_fails_closed_propagates_error() {
        let quotes = Arc::new(StaticQuoteSource::new());
        quotes.set("gpt-x", sample_quote());
        let provider = RemoteProvider::new(
            RemoteProviderConfig {
                name: "supplier-a".into(),
                model_family: "gpt".into(),
                supported_models: vec!["gpt-x".into()],
            },
            quotes,
            Arc::new(FailingBackend),
            degradation(DegradationMode::FailClosed),
        );
        for _ in 0..2 {
            let req = DispatchRequest {
                request_id: "r".into(),
                model: "gpt-x".into(),
                estimated_tokens: 10,
                streaming: false,
            };
            let _ = provider.dispatch(req).await;
        }
        assert_eq!(provider.circuit_state(), CircuitState::Open);
        let err = provider.get_capacity("gpt-x").await.unwrap_err();
        assert_eq!(err, GatewayError::ProviderUnavailable);
    }

    #[tokio::test]
    async fn expired_quote_is_rejected_before_dispatch() {
        let quotes = Arc::new(StaticQuoteSource::new());
        let mut quote = sample_quote();
        quote.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        quotes.set("gpt-x", quote);
        let provider = RemoteProvider::new(
            RemoteProviderConfig {
                name: "supplier-a".into(),
                model_family: "gpt".into(),
                supported_models: vec!["gpt-x".into()],
            },
            quotes,
            Arc::new(EchoBackend),
            degradation(DegradationMode::FailOpen),
        );
        let req = DispatchRequest {
            request_id: "r".into(),
            model: "gpt-x".into(),
            estimated_tokens: 10,
            streaming: false,
        };
        let err = provider.dispatch(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderError(_)));
    }
}
