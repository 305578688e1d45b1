//! Shared data model, error kinds, configuration, and observability plumbing
//! for the gateway's classification → capacity → scheduling → dispatch
//! pipeline.
//!
//! This crate has no knowledge of HTTP, upstream wire protocols, or
//! persistence backends — it only defines the values that flow between the
//! components that do (`gateway-tokenstore`, `gateway-classify`,
//! `gateway-capacity`, `gateway-scheduler`, `gateway-provider`,
//! `gateway-degradation`).

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod metrics;
pub mod model;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use hash::hash_token;
pub use model::{
    AccountType, Capacity, Class, ClassKind, Mode, PriorityTier, Request, RequestState,
    RoutingMetadata, RoutingRule, StoreLayer, TokenStatus, RouteSource,
};
