//! Real client IP middleware.
//!
//! # Evaluation
//!
//! ```text
//! for rule in rules (declaration order):
//!     trusted?   ── no ──▶ next rule
//!        │ yes
//!     read source (header or transport peer)
//!     parse candidates, pick first valid IP ── none ──▶ next rule
//!        │ found
//!     rewrite X-Real-Ip [+ X-Forwarded-For] [+ RemoteAddr], stop
//! forward request to inner service (always, exactly once)
//! ```
//!
//! # Fail-Open
//!
//! Evaluation and rewriting run inside a panic boundary. Any fault is logged
//! and the request continues with the headers it arrived with; the middleware
//! never produces a response of its own. Header mutations happen only after an
//! address has been fully resolved, so a fault cannot leave a half-rewritten
//! request behind.
//!
//! # Trust
//!
//! Header rules compare the configured value in constant time. Header names
//! are case-insensitive, values are case-sensitive. A missing header compares
//! as an empty value.

use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, error, info, trace, warn};

use super::filter::{AddressFilter, AddressPolicy};
use super::ip::{parse_candidates, resolve_source, select_first_valid};
use super::rule::{ProxyRule, RealIpConfig, RuleSet, TrustCheck};
use crate::error::{AppResult, RewriteError};
use crate::metrics;

/// Canonical real client address header, always written on success.
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Multi-hop forwarding header, replaced when `overwriteXFF` is set.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Header written when `overwriteRA` is set.
///
/// This is a plain request header; the connection peer address is never touched.
pub const REMOTE_ADDR_HEADER: HeaderName = HeaderName::from_static("remoteaddr");

/// Default name used in log events.
pub const DEFAULT_NAME: &str = "real-ip";

/// The rule that won and the address it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub rule_index: usize,
    pub ip: IpAddr,
}

/// Result of processing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Headers were rewritten from the given resolution.
    Rewritten(Resolution),
    /// No rule matched or no matched rule produced an address.
    Unresolved,
    /// Evaluation failed; headers were left as received.
    Faulted,
}

impl Outcome {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Rewritten(_) => "rewritten",
            Outcome::Unresolved => "unresolved",
            Outcome::Faulted => "faulted",
        }
    }
}

/// Check whether the caller is the proxy a rule trusts.
pub fn is_trusted(trust: &TrustCheck, headers: &HeaderMap) -> bool {
    match trust {
        TrustCheck::Any => true,
        TrustCheck::Header { name, value } => {
            let actual = headers
                .get(name)
                .map(HeaderValue::as_bytes)
                .unwrap_or_default();
            actual.ct_eq(value.as_slice()).into()
        }
    }
}

/// Write the resolved address according to `rule`'s overwrite flags.
///
/// The header value is built before anything is inserted, so on error the
/// map is unchanged.
pub fn apply(ip: IpAddr, rule: &ProxyRule, headers: &mut HeaderMap) -> Result<(), RewriteError> {
    // Formatted addresses are plain ASCII; `HeaderValue` has no infallible
    // constructor for them.
    let value = HeaderValue::try_from(ip.to_string())?;

    if rule.overwrite_forwarded_for {
        headers.insert(X_FORWARDED_FOR, value.clone());
    }
    if rule.overwrite_remote_addr {
        headers.insert(REMOTE_ADDR_HEADER, value.clone());
    }
    headers.insert(X_REAL_IP, value);
    Ok(())
}

/// Rule evaluation shared by the layer and every service it creates.
#[derive(Clone)]
pub struct RealIp {
    name: Arc<str>,
    rules: RuleSet,
    policy: Arc<dyn AddressPolicy>,
}

impl RealIp {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            name: Arc::from(DEFAULT_NAME),
            rules,
            policy: Arc::new(AddressFilter::accept_all()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Find the first rule that is trusted and yields a valid address.
    pub fn resolve(&self, headers: &HeaderMap, peer: &str) -> Option<Resolution> {
        self.find(headers, peer).map(|(resolution, _)| resolution)
    }

    fn find(&self, headers: &HeaderMap, peer: &str) -> Option<(Resolution, &ProxyRule)> {
        self.rules.iter().enumerate().find_map(|(rule_index, rule)| {
            if !is_trusted(&rule.trust, headers) {
                trace!(middleware = %self.name, rule = rule_index, "Rule not trusted for request");
                return None;
            }

            let raw = resolve_source(&rule.source, headers, peer);
            let Some(ip) = select_first_valid(parse_candidates(&raw), self.policy.as_ref()) else {
                debug!(
                    middleware = %self.name,
                    rule = rule_index,
                    raw = %raw,
                    "Trusted rule produced no valid address"
                );
                return None;
            };
            Some((Resolution { rule_index, ip }, rule))
        })
    }

    /// Resolve and rewrite, propagating faults.
    pub fn rewrite(&self, headers: &mut HeaderMap, peer: &str) -> Result<Outcome, RewriteError> {
        let Some((resolution, rule)) = self.find(headers, peer) else {
            return Ok(Outcome::Unresolved);
        };
        apply(resolution.ip, rule, headers)?;
        Ok(Outcome::Rewritten(resolution))
    }

    /// Resolve and rewrite without ever failing.
    ///
    /// Panics and rewrite errors are logged and reported as [`Outcome::Faulted`].
    pub fn process(&self, headers: &mut HeaderMap, peer: &str) -> Outcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.rewrite(headers, peer)))
            .unwrap_or_else(|payload| Err(RewriteError::Panicked(panic_message(&*payload))));

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    middleware = %self.name,
                    error = %e,
                    "Real IP evaluation failed, forwarding request unmodified"
                );
                Outcome::Faulted
            }
        };

        if let Outcome::Rewritten(resolution) = outcome {
            debug!(
                middleware = %self.name,
                rule = resolution.rule_index,
                real_ip = %resolution.ip,
                "Resolved client address"
            );
            metrics::record_rule_match(resolution.rule_index);
        }
        metrics::record_outcome(outcome.as_str());
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Transport peer address of the request, or an empty string when the server
/// was not started with connect info.
fn transport_peer<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default()
}

/// Real IP layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let config = RealIpConfig::from_json(r#"{"proxy":[{"proxyHeadername":"*","realIP":"X-Forwarded-For"}]}"#)?;
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(RealIpLayer::from_config(&config)?);
///
/// // Connect info is needed for rules reading `RemoteAddr`.
/// axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
/// ```
#[derive(Clone)]
pub struct RealIpLayer {
    real_ip: RealIp,
}

impl RealIpLayer {
    pub fn new(rules: RuleSet) -> Self {
        let layer = Self {
            real_ip: RealIp::new(rules),
        };
        if layer.real_ip.rules.is_empty() {
            warn!("No proxy rules configured, real IP middleware will pass requests through");
        } else {
            info!(rules = layer.real_ip.rules.len(), "Real IP rules loaded");
        }
        layer
    }

    /// Compile a rule document into a layer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRule` for rules with invalid header names.
    pub fn from_config(config: &RealIpConfig) -> AppResult<Self> {
        Ok(Self::new(config.compile()?))
    }

    /// Name reported in log events, useful when several instances are stacked.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.real_ip.name = Arc::from(name.into());
        self
    }

    /// Restrict which parsed addresses may be selected.
    pub fn with_address_policy<P: AddressPolicy>(mut self, policy: P) -> Self {
        self.real_ip.policy = Arc::new(policy);
        self
    }

    pub fn real_ip(&self) -> &RealIp {
        &self.real_ip
    }
}

impl<S> Layer<S> for RealIpLayer {
    type Service = RealIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RealIpService {
            inner,
            real_ip: self.real_ip.clone(),
        }
    }
}

/// Real IP service wrapper.
#[derive(Clone)]
pub struct RealIpService<S> {
    inner: S,
    real_ip: RealIp,
}

impl<S, B> Service<Request<B>> for RealIpService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let peer = transport_peer(&req);
        self.real_ip.process(req.headers_mut(), &peer);
        self.inner.call(req)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::rule::IpSource;

    fn header_rule(name: &'static str, value: &str, source: IpSource) -> ProxyRule {
        ProxyRule {
            trust: TrustCheck::Header {
                name: HeaderName::from_static(name),
                value: value.as_bytes().to_vec(),
            },
            source,
            overwrite_forwarded_for: false,
            overwrite_remote_addr: false,
        }
    }

    fn wildcard_rule(source: IpSource) -> ProxyRule {
        ProxyRule {
            trust: TrustCheck::Any,
            source,
            overwrite_forwarded_for: false,
            overwrite_remote_addr: false,
        }
    }

    fn xff() -> IpSource {
        IpSource::Header(X_FORWARDED_FOR)
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).unwrap();
            map.append(name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_is_trusted_wildcard() {
        assert!(is_trusted(&TrustCheck::Any, &HeaderMap::new()));
    }

    #[test]
    fn test_is_trusted_exact_value() {
        let rule = header_rule("x-from-cdn", "edge", xff());
        assert!(is_trusted(&rule.trust, &headers(&[("X-From-Cdn", "edge")])));
        assert!(!is_trusted(&rule.trust, &headers(&[("x-from-cdn", "Edge")])));
        assert!(!is_trusted(&rule.trust, &headers(&[("x-from-cdn", "edge2")])));
        assert!(!is_trusted(&rule.trust, &HeaderMap::new()));
    }

    #[test]
    fn test_is_trusted_empty_value_matches_missing_header() {
        let rule = header_rule("x-from-cdn", "", xff());
        assert!(is_trusted(&rule.trust, &HeaderMap::new()));
    }

    #[test]
    fn test_apply_only_real_ip_without_overwrite_flags() {
        let rule = wildcard_rule(xff());
        let mut map = headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1")]);

        apply("203.0.113.5".parse().unwrap(), &rule, &mut map).unwrap();

        assert_eq!(map.get(X_REAL_IP).unwrap(), "203.0.113.5");
        assert_eq!(map.get(X_FORWARDED_FOR).unwrap(), "203.0.113.5, 10.0.0.1");
        assert!(map.get(REMOTE_ADDR_HEADER).is_none());
    }

    #[test]
    fn test_apply_overwrites_replace_existing_values() {
        let rule = ProxyRule {
            overwrite_forwarded_for: true,
            overwrite_remote_addr: true,
            ..wildcard_rule(xff())
        };
        let mut map = headers(&[
            ("x-forwarded-for", "203.0.113.5"),
            ("x-forwarded-for", "10.0.0.1"),
            ("remoteaddr", "10.0.0.9"),
        ]);

        apply("203.0.113.5".parse().unwrap(), &rule, &mut map).unwrap();

        let forwarded: Vec<_> = map.get_all(X_FORWARDED_FOR).iter().collect();
        assert_eq!(forwarded, vec!["203.0.113.5"]);
        assert_eq!(map.get("RemoteAddr").unwrap(), "203.0.113.5");
        assert_eq!(map.get(X_REAL_IP).unwrap(), "203.0.113.5");
    }

    #[test]
    fn test_apply_accepts_every_address_form() {
        let rule = ProxyRule {
            overwrite_forwarded_for: true,
            ..wildcard_rule(xff())
        };

        for addr in ["0.0.0.0", "255.255.255.255", "::", "2001:db8::1", "fe80::1:2:3:4"] {
            let mut map = HeaderMap::new();
            apply(addr.parse().unwrap(), &rule, &mut map).unwrap();
            assert_eq!(map.get(X_REAL_IP).unwrap(), addr);
            assert_eq!(map.get(X_FORWARDED_FOR).unwrap(), addr);
        }
    }

    #[test]
    fn test_resolve_first_matching_rule_wins() {
        let real_ip = RealIp::new(RuleSet::new(vec![
            header_rule(
                "x-from-cdn",
                "edge",
                IpSource::Header(HeaderName::from_static("cf-connecting-ip")),
            ),
            wildcard_rule(xff()),
        ]));
        let map = headers(&[("x-forwarded-for", "198.51.100.1")]);

        let resolution = real_ip.resolve(&map, "").unwrap();
        assert_eq!(resolution.rule_index, 1);
        assert_eq!(resolution.ip, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_resolve_falls_through_when_trusted_rule_has_no_candidate() {
        let real_ip = RealIp::new(RuleSet::new(vec![
            wildcard_rule(IpSource::Header(HeaderName::from_static("cf-connecting-ip"))),
            wildcard_rule(IpSource::TransportPeer),
        ]));

        let resolution = real_ip.resolve(&HeaderMap::new(), "198.51.100.7:54321").unwrap();
        assert_eq!(resolution.rule_index, 1);
        assert_eq!(resolution.ip, "198.51.100.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_process_without_rules_is_unresolved() {
        let real_ip = RealIp::new(RuleSet::default());
        let mut map = headers(&[("x-forwarded-for", "203.0.113.5")]);
        let before = map.clone();

        assert_eq!(real_ip.process(&mut map, ""), Outcome::Unresolved);
        assert_eq!(map, before);
    }

    #[test]
    fn test_process_recovers_from_panicking_policy() {
        let layer = RealIpLayer::new(RuleSet::new(vec![
            wildcard_rule(xff()),
            wildcard_rule(IpSource::TransportPeer),
        ]))
        .with_address_policy(|_: &IpAddr| -> bool { panic!("policy exploded") });
        let mut map = headers(&[("x-forwarded-for", "203.0.113.5")]);
        let before = map.clone();

        let outcome = layer.real_ip().process(&mut map, "198.51.100.7:1");

        assert_eq!(outcome, Outcome::Faulted);
        assert_eq!(map, before);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom 1");

        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }

    #[test]
    fn test_transport_peer_from_connect_info() {
        let mut req = Request::new(());
        assert_eq!(transport_peer(&req), "");

        let addr: SocketAddr = "[2001:db8::1]:8443".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(transport_peer(&req), "[2001:db8::1]:8443");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Unresolved.as_str(), "unresolved");
        assert_eq!(Outcome::Faulted.as_str(), "faulted");
    }
}
