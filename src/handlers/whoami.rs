//! Echo endpoint reporting the client address headers a handler receives.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName};

use crate::middleware::{REMOTE_ADDR_HEADER, X_FORWARDED_FOR, X_REAL_IP};
use crate::models::WhoAmIResponse;

/// Report the headers as rewritten by the real IP middleware.
///
/// Mounted as the router fallback, so any path answers.
pub async fn whoami(req: Request) -> Json<WhoAmIResponse> {
    let headers = req.headers();

    Json(WhoAmIResponse {
        real_ip: header(headers, &X_REAL_IP),
        forwarded_for: header(headers, &X_FORWARDED_FOR),
        remote_addr_header: header(headers, &REMOTE_ADDR_HEADER),
        peer_addr: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string()),
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    })
}

fn header(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
