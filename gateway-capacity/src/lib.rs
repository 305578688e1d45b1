//! Capacity Guard (C4) and Quota Manager (C5): admission control over a
//! sliding token/sec window, and per-token periodic budget enforcement.

pub mod capacity;
pub mod quota;
pub mod window;

pub use capacity::{AcquireOutcome, CapacityGuard, CapacitySnapshot};
pub use quota::{QuotaManager, QuotaOutcome, QuotaPeriod};
