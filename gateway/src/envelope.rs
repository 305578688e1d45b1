//! Request/response envelope (§6): the transport-agnostic shapes a caller
//! hands to and receives from a [`crate::GatewayService`]. Marshaling these
//! to and from an actual wire protocol (HTTP, gRPC, ...) is left to whatever
//! embeds this crate.

use gateway_classify::RequestContext;
use gateway_core::model::RouteSource;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

/// One inbound call. `headers`/`peer_addr`/`bearer_token` feed the
/// classifier fast-path exactly as [`RequestContext`] expects; the rest
/// describes the model call itself.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub headers: HashMap<String, String>,
    pub peer_addr: Option<IpAddr>,
    pub bearer_token: Option<String>,
    pub model: String,
    pub prompt: String,
    pub estimated_tokens: Option<u64>,
    pub streaming: bool,
}

impl IncomingRequest {
    pub(crate) fn routing_context(&self) -> RequestContext {
        RequestContext {
            headers: self.headers.clone(),
            peer_addr: self.peer_addr,
            bearer_token: self.bearer_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageBlock {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageBlock {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

pub(crate) fn route_source_label(source: RouteSource) -> &'static str {
    match source {
        RouteSource::Header => "header",
        RouteSource::Token => "token",
        RouteSource::Default => "default",
        RouteSource::Degraded => "degraded",
    }
}

/// Success headers, named after the `x-*` headers in §6.
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    pub request_id: String,
    pub class_id: u8,
    pub route_source: &'static str,
    pub queue_wait_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SuccessResponse {
    pub usage: UsageBlock,
    pub headers: ResponseHeaders,
}

#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: u16,
    pub reason_code: &'static str,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub request_id: String,
}

impl ErrorResponse {
    pub(crate) fn from_gateway_error(
        request_id: &str,
        err: &gateway_core::GatewayError,
        retry_after: Option<Duration>,
    ) -> Self {
        let mapping = err.mapping();
        Self {
            status: mapping.status,
            reason_code: mapping.reason_code,
            message: err.to_string(),
            retry_after: if mapping.retriable { retry_after } else { None },
            request_id: request_id.to_string(),
        }
    }
}

pub type GatewayOutcome = Result<SuccessResponse, ErrorResponse>;
