//! Degradation Controller (C8, §4.8): the sole source of truth for whether
//! the token store or the provider is degraded right now, and how. C1 and
//! C7 read it; neither decides independently.

pub mod controller;
pub mod policy;

pub use controller::DegradationController;
pub use policy::{CircuitBreakerParams, DegradationPolicy, SnapshotParams};
