//! Header fast-path input shape and trust-CIDR matching (C2, §4.2).
//!
//! A transport-agnostic stand-in for whatever actually parses HTTP headers
//! upstream (out of scope per §1): the caller hands in a flat key/value view
//! plus the peer's source address.

use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;

/// Default header names mapping onto spec.md's abstract
/// `source`/`priority`/`environment`/`workload` fields, chosen to avoid
/// colliding with proxy-assigned meaning on a bare `source` header.
pub const HEADER_SOURCE: &str = "x-source";
pub const HEADER_PRIORITY: &str = "x-priority";
pub const HEADER_ENVIRONMENT: &str = "x-environment";
pub const HEADER_WORKLOAD: &str = "x-workload";

/// Minimal view of an inbound request the classifier needs: headers plus
/// the peer address used for trust-CIDR evaluation and the raw bearer
/// token, if any.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HashMap<String, String>,
    pub peer_addr: Option<IpAddr>,
    pub bearer_token: Option<String>,
}

impl RequestContext {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

/// Parses `trust_cidrs` config strings into `IpNet`s once, at construction,
/// rather than re-parsing per request.
#[derive(Debug, Clone)]
pub struct TrustedOrigins {
    nets: Vec<IpNet>,
}

impl TrustedOrigins {
    pub fn parse(cidrs: &[String]) -> Result<Self, String> {
        let mut nets = Vec::with_capacity(cidrs.len());
        for raw in cidrs {
            let net: IpNet = raw.parse().map_err(|e| format!("invalid trust CIDR {raw:?}: {e}"))?;
            nets.push(net);
        }
        Ok(Self { nets })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_v4_v6_cidrs() {
        let origins = TrustedOrigins::parse(&["10.0.0.0/8".into(), "::1/128".into()]).unwrap();
        assert!(origins.contains("10.1.2.3".parse().unwrap()));
        assert!(origins.contains("::1".parse().unwrap()));
        assert!(!origins.contains("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_cidr() {
        assert!(TrustedOrigins::parse(&["not-a-cidr".into()]).is_err());
    }
}
