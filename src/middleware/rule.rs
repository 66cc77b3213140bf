//! Proxy rule definitions.
//!
//! Rules arrive in their wire form ([`ProxyRuleConfig`], camelCase JSON keys)
//! and are compiled once into [`ProxyRule`] values before the middleware is
//! built. Compilation validates header names, so a bad rule is a startup
//! error instead of a per-request surprise.
//!
//! The `*` and `RemoteAddr` sentinels match only when written exactly. Padded
//! forms such as `" *"` are treated as header names and rejected.
//!
//! # Example
//!
//! ```json
//! {
//!   "proxy": [
//!     { "proxyHeadername": "X-From-Cdn", "proxyHeadervalue": "edge-7f3a",
//!       "realIP": "X-Forwarded-For", "overwriteXFF": true },
//!     { "proxyHeadername": "*", "realIP": "RemoteAddr" }
//!   ]
//! }
//! ```

use std::sync::Arc;

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Header name value that trusts every caller without inspecting headers.
pub const TRUST_ANY: &str = "*";

/// `realIP` value selecting the transport peer address as the IP source.
///
/// Distinct from [`REMOTE_ADDR_HEADER`](super::real_ip::REMOTE_ADDR_HEADER),
/// which is the header written when `overwriteRA` is set.
pub const TRANSPORT_PEER_SOURCE: &str = "RemoteAddr";

/// Root rule document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RealIpConfig {
    /// Ordered proxy rules; the first rule that yields an address wins.
    #[serde(default)]
    pub proxy: Vec<ProxyRuleConfig>,
}

impl RealIpConfig {
    /// Parse a JSON rule document.
    pub fn from_json(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compile every rule, reporting the first invalid one.
    pub fn compile(&self) -> AppResult<RuleSet> {
        self.proxy
            .iter()
            .enumerate()
            .map(|(index, rule)| ProxyRule::compile(index, rule))
            .collect::<AppResult<Vec<_>>>()
            .map(RuleSet::new)
    }
}

/// One trusted proxy identity, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyRuleConfig {
    /// Header used to recognise the proxy, or `*`.
    #[serde(rename = "proxyHeadername")]
    pub proxy_header_name: String,

    /// Expected value of `proxyHeadername`.
    #[serde(rename = "proxyHeadervalue", default)]
    pub proxy_header_value: String,

    /// Header carrying the client address, or `RemoteAddr`.
    #[serde(rename = "realIP")]
    pub real_ip: String,

    /// Replace `X-Forwarded-For` with the resolved address.
    #[serde(rename = "overwriteXFF", default)]
    pub overwrite_xff: bool,

    /// Set the `RemoteAddr` header to the resolved address.
    #[serde(rename = "overwriteRA", default)]
    pub overwrite_ra: bool,
}

/// How a rule decides that the caller is the trusted proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustCheck {
    /// Wildcard: every caller is trusted.
    Any,
    /// The named header must carry exactly this value.
    Header { name: HeaderName, value: Vec<u8> },
}

/// Where a rule reads the client address from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpSource {
    /// The connection peer address.
    TransportPeer,
    /// A request header, usually a multi-hop forwarding header.
    Header(HeaderName),
}

/// A compiled proxy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRule {
    pub trust: TrustCheck,
    pub source: IpSource,
    pub overwrite_forwarded_for: bool,
    pub overwrite_remote_addr: bool,
}

impl ProxyRule {
    fn compile(index: usize, config: &ProxyRuleConfig) -> AppResult<Self> {
        let trust = match config.proxy_header_name.as_str() {
            TRUST_ANY => TrustCheck::Any,
            name => TrustCheck::Header {
                name: parse_header_name(index, "proxyHeadername", name)?,
                value: config.proxy_header_value.clone().into_bytes(),
            },
        };

        let source = match config.real_ip.as_str() {
            TRANSPORT_PEER_SOURCE => IpSource::TransportPeer,
            name => IpSource::Header(parse_header_name(index, "realIP", name)?),
        };

        Ok(Self {
            trust,
            source,
            overwrite_forwarded_for: config.overwrite_xff,
            overwrite_remote_addr: config.overwrite_ra,
        })
    }
}

fn parse_header_name(index: usize, field: &str, name: &str) -> AppResult<HeaderName> {
    if name.is_empty() {
        return Err(AppError::invalid_rule(
            index,
            format!("{field} must not be empty"),
        ));
    }
    HeaderName::try_from(name)
        .map_err(|e| AppError::invalid_rule(index, format!("{field} {name:?}: {e}")))
}

/// Ordered, immutable list of compiled rules shared by every request.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<[ProxyRule]>,
}

impl RuleSet {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyRule> {
        self.rules.iter()
    }
}

impl FromIterator<ProxyRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = ProxyRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
