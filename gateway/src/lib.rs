//! Orchestration crate: wires the classifier (C2/C3), token store (C1, via
//! the classifier), capacity guard and quota manager (C4/C5), scheduler
//! (C6), provider dispatch (C7), and degradation controller (C8) into one
//! request/response pipeline (§5, §6).
//!
//! Everything upstream of `GatewayService` — HTTP/gRPC framing, the actual
//! LLM wire protocol, the billing backend behind [`usage::UsageSink`] — is
//! intentionally out of scope; this crate only owns the allocation decision
//! and the accounting that has to stay consistent around it.

pub mod envelope;
pub mod service;
pub mod usage;

pub use envelope::{ErrorResponse, GatewayOutcome, IncomingRequest, ResponseHeaders, SuccessResponse, UsageBlock};
pub use service::{GatewayService, GatewayServiceConfig};
pub use usage::{LoggingUsageSink, UsageReport, UsageSink, UsageSource, UsageStatus};
