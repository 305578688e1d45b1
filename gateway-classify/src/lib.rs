//! Classifier (C2) and Routing Rule Engine (C3): turns an inbound request
//! into `RoutingMetadata`, then matches that metadata against an ordered,
//! hot-reloadable rule list to produce allocation hints.

pub mod classifier;
pub mod headers;
pub mod rules;

pub use classifier::Classifier;
pub use headers::{RequestContext, TrustedOrigins};
pub use rules::{RuleEngine, RuleEngineError, RuleSource, StaticRuleSource, YamlFileRuleSource};
