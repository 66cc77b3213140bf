//! # Real IP Gateway
//!
//! Tower middleware that determines the originating client address of a
//! request that passed through trusted reverse proxies, and rewrites the
//! forwarding headers so downstream handlers see one normalized address.
//!
//! - **Ordered rules**: each rule names a trusted proxy (by header value, or
//!   `*` for any caller) and where that proxy puts the client address
//! - **First valid wins**: forwarding lists are scanned left to right, ports
//!   are stripped, and the first parseable IP is used
//! - **Fail-open**: a fault never rejects or breaks a request; headers are
//!   simply left as received
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Axum / any tower HTTP stack                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RealIpLayer  (trust match → resolve → select → rewrite)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Next service / handler (sees X-Real-Ip)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use axum::{Router, routing::get};
//! use real_ip_gateway::{RealIpConfig, RealIpLayer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rules = RealIpConfig::from_json(
//!         r#"{"proxy": [{"proxyHeadername": "*", "realIP": "X-Forwarded-For"}]}"#,
//!     )?;
//!
//!     let app = Router::new()
//!         .route("/", get(|| async { "ok" }))
//!         .layer(RealIpLayer::from_config(&rules)?);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult, RewriteError};
pub use middleware::{RealIpConfig, RealIpLayer, RuleSet};
pub use routes::build_router;
pub use state::AppState;
