//! Demo server routing with the real IP middleware in front.
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Real IP      │ ← Rewrites X-Real-Ip (never rejects)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `GET /health` - Health check
//! - anything else - `whoami` echo of the rewritten headers
//!
//! Serve with `into_make_service_with_connect_info::<SocketAddr>()` so rules
//! using the `RemoteAddr` source can see the connection peer.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppResult;
use crate::handlers;
use crate::middleware::{AddressFilter, RealIpLayer};
use crate::state::AppState;

/// Build the real IP layer described by the application config.
///
/// # Errors
///
/// Returns `AppError::InvalidRule` if a proxy rule does not compile.
pub fn build_real_ip_layer(state: &AppState) -> AppResult<RealIpLayer> {
    let config = &state.config;
    let filter = AddressFilter::from_cidrs(&config.ignored_ranges);
    if filter.is_enabled() {
        info!(
            ranges = config.ignored_ranges.len(),
            "Ignoring configured address ranges during real IP selection"
        );
    }

    Ok(RealIpLayer::from_config(&config.rules)?
        .with_name(config.middleware_name.clone())
        .with_address_policy(filter))
}

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// Returns `AppError::InvalidRule` if a proxy rule does not compile.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let real_ip = build_real_ip_layer(&state)?;

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .fallback(handlers::whoami)
        .layer(real_ip)
        .layer(TraceLayer::new_for_http());

    Ok(router.with_state(state))
}
