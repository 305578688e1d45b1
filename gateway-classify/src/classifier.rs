//! Classifier (C2, §4.2): header fast-path → token path → default policy.

use crate::headers::{RequestContext, TrustedOrigins, HEADER_ENVIRONMENT, HEADER_PRIORITY, HEADER_SOURCE, HEADER_WORKLOAD};
use gateway_core::config::ClassifierConfig;
use gateway_core::model::{AccountType, PriorityTier, RouteSource, MAX_PRIORITY};
use gateway_core::{GatewayError, RoutingMetadata};
use gateway_tokenstore::{TokenMetadataStore, TokenStoreError};
use std::sync::Arc;

pub struct Classifier {
    trusted: TrustedOrigins,
    require_token: bool,
    allow_default: bool,
    token_store: Arc<TokenMetadataStore>,
}

impl Classifier {
    pub fn new(config: &ClassifierConfig, token_store: Arc<TokenMetadataStore>) -> Result<Self, String> {
        Ok(Self {
            trusted: TrustedOrigins::parse(&config.trust_cidrs)?,
            require_token: config.require_token,
            allow_default: config.allow_default,
            token_store,
        })
    }

    /// §4.2's precedence: header fast-path, then token path, then default.
    pub async fn classify(&self, ctx: &RequestContext) -> Result<RoutingMetadata, GatewayError> {
        if let Some(source) = ctx.header(HEADER_SOURCE) {
            let result = self.classify_header_fast_path(ctx, source).await;
            if let Ok(meta) = &result {
                record_route_source(meta.route_source);
            }
            return result;
        }

        if let Some(token) = &ctx.bearer_token {
            let result = self.classify_token_path(token).await;
            if let Ok(meta) = &result {
                record_route_source(meta.route_source);
            }
            return result;
        }

        if self.require_token {
            return Err(GatewayError::Unauthenticated);
        }
        if self.allow_default {
            let meta = RoutingMetadata::default_policy();
            record_route_source(meta.route_source);
            Ok(meta)
        } else {
            Err(GatewayError::Unauthenticated)
        }
    }

    async fn classify_header_fast_path(&self, ctx: &RequestContext, source: &str) -> Result<RoutingMetadata, GatewayError> {
        let trusted = ctx.peer_addr.map(|addr| self.trusted.contains(addr)).unwrap_or(false);
        if !trusted {
            tracing::warn!(peer = ?ctx.peer_addr, "routing header present from untrusted origin");
            return Err(GatewayError::HeaderRoutingUntrusted);
        }

        let priority_tier = parse_tier(source).unwrap_or(PriorityTier::External);
        let account_type = match priority_tier {
            PriorityTier::Internal => AccountType::Internal,
            _ => AccountType::External,
        };
        let environment = ctx
            .header(HEADER_ENVIRONMENT)
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let workload_tag = ctx.header(HEADER_WORKLOAD).map(str::to_string);
        let priority_override = ctx
            .header(HEADER_PRIORITY)
            .and_then(|s| s.parse::<u8>().ok())
            .filter(|p| *p <= MAX_PRIORITY);

        let mut account_id = String::new();
        if let Some(token) = &ctx.bearer_token {
            match self.token_store.lookup(token).await {
                Ok((meta, _layer)) => account_id = meta.account_id,
                Err(err) => {
                    tracing::info!(%err, "bearer token accompanying header fast-path did not validate, tier taken from headers");
                }
            }
        }

        Ok(RoutingMetadata {
            token_id: String::new(),
            account_id,
            account_type,
            priority_tier,
            environment,
            workload_tag,
            priority_override,
            weight_override: None,
            quota_tokens_per_period: 0,
            quota_tokens_per_second: 0,
            status: gateway_core::model::TokenStatus::Active,
            route_source: RouteSource::Header,
        })
    }

    async fn classify_token_path(&self, raw_token: &str) -> Result<RoutingMetadata, GatewayError> {
        match self.token_store.lookup(raw_token).await {
            Ok((meta, _layer)) => Ok(meta),
            Err(TokenStoreError::NotFound) => Err(GatewayError::Unauthenticated),
            Err(TokenStoreError::Revoked) => Err(GatewayError::ForbiddenToken("revoked".to_string())),
            Err(TokenStoreError::Expired) => Err(GatewayError::ForbiddenToken("expired".to_string())),
            Err(TokenStoreError::AllStoresUnavailable) => Err(GatewayError::AllTokenStoresDown),
        }
    }
}

fn record_route_source(source: RouteSource) {
    let label = match source {
        RouteSource::Header => "header",
        RouteSource::Token => "token",
        RouteSource::Default => "default",
        RouteSource::Degraded => "degraded",
    };
    gateway_core::metrics::metrics()
        .classifier_route_source_total
        .with_label_values(&[label])
        .inc();
}

fn parse_tier(raw: &str) -> Option<PriorityTier> {
    match raw.to_ascii_lowercase().as_str() {
        "internal" => Some(PriorityTier::Internal),
        "external" => Some(PriorityTier::External),
        "premium" => Some(PriorityTier::Premium),
        "spot" => Some(PriorityTier::Spot),
        _ => None,
    }
}
