//! Real client IP resolution middleware.
//!
//! - **Rules** (`rule`): trusted proxy identities, compiled from configuration
//! - **Parsing** (`ip`): candidate splitting, port stripping, first-valid selection
//! - **Filtering** (`filter`): optional CIDR exclusions applied during selection
//! - **Layer** (`real_ip`): trust matching, header rewriting, fail-open service
//!
//! # Architecture
//!
//! ```text
//! Request → RealIpLayer ──────────────────────────────────────▶ Inner service
//!               │  trust match → resolve source → select IP         ▲
//!               │        (first rule that yields an address)        │
//!               └──▶ X-Real-Ip / X-Forwarded-For / RemoteAddr ──────┘
//! ```
//!
//! # Security Considerations
//!
//! - A wildcard rule (`proxyHeadername = "*"`) believes any caller. Only use it
//!   when the service is unreachable except through the proxy.
//! - Trust header values are compared in constant time.
//! - Private and loopback addresses are accepted unless an address filter is
//!   configured.

pub mod filter;
pub mod ip;
pub mod real_ip;
pub mod rule;

pub use filter::{AddressFilter, AddressPolicy, CidrRange, InvalidCidr};
pub use ip::{
    parse_candidate, parse_candidates, peer_host, resolve_source, select_first_valid,
    split_host_port,
};
pub use real_ip::{
    Outcome, REMOTE_ADDR_HEADER, RealIp, RealIpLayer, RealIpService, Resolution, X_FORWARDED_FOR,
    X_REAL_IP, apply, is_trusted,
};
pub use rule::{
    IpSource, ProxyRule, ProxyRuleConfig, RealIpConfig, RuleSet, TRANSPORT_PEER_SOURCE, TRUST_ANY,
    TrustCheck,
};
