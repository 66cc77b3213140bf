//! Response bodies for the demo server.

use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of configured proxy rules
    pub rules: usize,
    pub uptime_seconds: u64,
}

/// Request details as seen by a handler behind the real IP middleware.
///
/// Header fields are `None` when the header is absent.
#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    /// `X-Real-Ip` after rewriting
    pub real_ip: Option<String>,
    /// `X-Forwarded-For` after rewriting
    pub forwarded_for: Option<String>,
    /// `RemoteAddr` header after rewriting
    pub remote_addr_header: Option<String>,
    /// Transport peer address of the connection
    pub peer_addr: Option<String>,
    pub method: String,
    pub path: String,
}
