//! Provider facade (C7, §4.7): local/remote/hybrid capacity sources behind
//! one capability set, so the scheduler and pipeline orchestration never
//! special-case which kind of upstream they're talking to.

pub mod backend;
pub mod circuit;
pub mod facade;
pub mod hybrid;
pub mod local;
pub mod quote;
pub mod remote;

pub use backend::{DispatchBackend, EchoBackend, FailingBackend};
pub use circuit::{CircuitBreaker, CircuitState, Permit};
pub use facade::{DispatchRequest, DispatchResponse, Health, HealthState, Provider, ProviderKind, ProviderMetadata};
pub use hybrid::{HybridProvider, HybridProviderConfig};
pub use local::{LocalProvider, LocalProviderConfig};
pub use quote::{QuoteError, QuoteSource, StaticQuoteSource, SupplyQuote};
pub use remote::{RemoteProvider, RemoteProviderConfig};
