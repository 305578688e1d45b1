//! The controller itself (C8, §4.8): holds the two policies and nothing
//! else. It performs no circuit-breaking or caching itself — that state
//! lives with the component that acts on it (C1's snapshot cache, C7's
//! circuit breaker) — this is purely the read API those components consult
//! before deciding anything.

use crate::policy::DegradationPolicy;
use arc_swap::ArcSwap;
use gateway_core::config::DegradationMode;
use std::sync::Arc;

/// Cross-cutting policy source of truth. Cheap to clone (an `Arc` pair
/// under the hood); share one instance across C1 and C7.
pub struct DegradationController {
    token_store: ArcSwap<DegradationPolicy>,
    provider: ArcSwap<DegradationPolicy>,
}

fn mode_gauge_value(mode: DegradationMode) -> i64 {
    match mode {
        DegradationMode::FailOpen => 0,
        DegradationMode::FailClosed => 1,
        DegradationMode::Cached => 2,
    }
}

impl DegradationController {
    pub fn new(token_store: DegradationPolicy, provider: DegradationPolicy) -> Self {
        let controller = Self {
            token_store: ArcSwap::from_pointee(token_store),
            provider: ArcSwap::from_pointee(provider),
        };
        controller.publish_gauges();
        controller
    }

    pub fn token_store_policy(&self) -> DegradationPolicy {
        **self.token_store.load()
    }

    pub fn provider_policy(&self) -> DegradationPolicy {
        **self.provider.load()
    }

    /// Operators may tighten or relax a policy at runtime (e.g. switch the
    /// provider to `fail_closed` during an incident) without a restart.
    pub fn set_token_store_policy(&self, policy: DegradationPolicy) {
        tracing::info!(?policy, "token-store degradation policy updated");
        self.token_store.store(Arc::new(policy));
        gateway_core::metrics::metrics()
            .degradation_mode
            .with_label_values(&["token_store"])
            .set(mode_gauge_value(policy.mode));
    }

    pub fn set_provider_policy(&self, policy: DegradationPolicy) {
        tracing::info!(?policy, "provider degradation policy updated");
        self.provider.store(Arc::new(policy));
        gateway_core::metrics::metrics()
            .degradation_mode
            .with_label_values(&["provider"])
            .set(mode_gauge_value(policy.mode));
    }

    fn publish_gauges(&self) {
        let metrics = gateway_core::metrics::metrics();
        metrics
            .degradation_mode
            .with_label_values(&["token_store"])
            .set(mode_gauge_value(self.token_store_policy().mode));
        metrics
            .degradation_mode
            .with_label_values(&["provider"])
            .set(mode_gauge_value(self.provider_policy().mode));
    }
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new(DegradationPolicy::token_store_default(), DegradationPolicy::provider_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::config::DegradationMode;

    #[test]
    fn policies_are_independent() {
        let controller = DegradationController::default();
        assert_eq!(controller.token_store_policy().mode, DegradationMode::FailOpen);
        assert_eq!(controller.provider_policy().mode, DegradationMode::FailClosed);
    }

    #[test]
    fn updating_one_policy_does_not_affect_the_other() {
        let controller = DegradationController::default();
        let mut provider_policy = controller.provider_policy();
        provider_policy.mode = DegradationMode::Cached;
        controller.set_provider_policy(provider_policy);

        assert_eq!(controller.provider_policy().mode, DegradationMode::Cached);
        assert_eq!(controller.token_store_policy().mode, DegradationMode::FailOpen);
    }
}
