//! Error kinds shared across the pipeline (§7).
//!
//! Each component reports its own kind; the caller in the chain decides
//! whether to map it or let it surface further. This crate has no HTTP
//! dependency, so the status/retriable mapping is exposed as plain data for
//! whatever surface embeds the gateway to consume.

use std::fmt;

/// One of the semantic error kinds from §7, transport-mapped by whatever
/// embeds this core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    Unauthenticated,
    ForbiddenToken(String),
    HeaderRoutingUntrusted,
    CapacityInternalExhausted,
    CapacityGlobalExhausted,
    QueueFull,
    QueueTimeout,
    QuotaExceeded,
    ProviderUnavailable,
    ProviderError(String),
    AllTokenStoresDown,
    InvalidRequest(String),
}

/// Numeric status code a transport should map this error to (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMapping {
    pub status: u16,
    pub reason_code: &'static str,
    pub retriable: bool,
}

impl GatewayError {
    pub fn mapping(&self) -> StatusMapping {
        match self {
            GatewayError::Unauthenticated => StatusMapping {
                status: 401,
                reason_code: "unauthenticated",
                retriable: false,
            },
            GatewayError::ForbiddenToken(_) => StatusMapping {
                status: 403,
                reason_code: "forbidden_token",
                retriable: false,
            },
            GatewayError::HeaderRoutingUntrusted => StatusMapping {
                status: 403,
                reason_code: "header_routing_untrusted",
                retriable: false,
            },
            GatewayError::CapacityInternalExhausted => StatusMapping {
                status: 503,
                reason_code: "capacity_internal_exhausted",
                retriable: true,
            },
            GatewayError::CapacityGlobalExhausted => StatusMapping {
                status: 503,
                reason_code: "capacity_global_exhausted",
                retriable: true,
            },
            GatewayError::QueueFull => StatusMapping {
                status: 503,
                reason_code: "queue_full",
                retriable: true,
            },
            GatewayError::QueueTimeout => StatusMapping {
                status: 504,
                reason_code: "queue_timeout",
                retriable: false,
            },
            GatewayError::QuotaExceeded => StatusMapping {
                status: 429,
                reason_code: "quota_exceeded",
                retriable: false,
            },
            GatewayError::ProviderUnavailable => StatusMapping {
                status: 503,
                reason_code: "provider_unavailable",
                retriable: true,
            },
            GatewayError::ProviderError(_) => StatusMapping {
                status: 502,
                reason_code: "provider_error",
                retriable: true,
            },
            GatewayError::AllTokenStoresDown => StatusMapping {
                status: 503,
                reason_code: "all_token_stores_down",
                retriable: true,
            },
            GatewayError::InvalidRequest(_) => StatusMapping {
                status: 400,
                reason_code: "invalid_request",
                retriable: false,
            },
        }
    }

    pub fn status(&self) -> u16 {
        self.mapping().status
    }

    pub fn reason_code(&self) -> &'static str {
        self.mapping().reason_code
    }

    pub fn is_retriable(&self) -> bool {
        self.mapping().retriable
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Unauthenticated => write!(f, "missing credential"),
            GatewayError::ForbiddenToken(reason) => write!(f, "token rejected: {reason}"),
            GatewayError::HeaderRoutingUntrusted => {
                write!(f, "routing header present from an untrusted origin")
            }
            GatewayError::CapacityInternalExhausted => {
                write!(f, "internal workload at threshold, external traffic refused")
            }
            GatewayError::CapacityGlobalExhausted => write!(f, "total capacity budget saturated"),
            GatewayError::QueueFull => write!(f, "class queue depth reached"),
            GatewayError::QueueTimeout => write!(f, "request aged out of queue"),
            GatewayError::QuotaExceeded => write!(f, "token quota spent for this period"),
            GatewayError::ProviderUnavailable => write!(f, "no provider available"),
            GatewayError::ProviderError(msg) => write!(f, "upstream provider error: {msg}"),
            GatewayError::AllTokenStoresDown => {
                write!(f, "no token store layer available, fail-closed active")
            }
            GatewayError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_429_non_retriable() {
        let mapping = GatewayError::QuotaExceeded.mapping();
        assert_eq!(mapping.status, 429);
        assert!(!mapping.retriable);
    }

    #[test]
    fn capacity_errors_are_retriable_503() {
        assert!(GatewayError::CapacityInternalExhausted.is_retriable());
        assert!(GatewayError::CapacityGlobalExhausted.is_retriable());
        assert_eq!(GatewayError::CapacityInternalExhausted.status(), 503);
    }

    #[test]
    fn queue_timeout_is_504_non_retriable() {
        let mapping = GatewayError::QueueTimeout.mapping();
        assert_eq!(mapping.status, 504);
        assert!(!mapping.retriable);
    }
}
