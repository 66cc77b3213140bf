//! Candidate parsing and address selection.
//!
//! # Pipeline
//!
//! ```text
//!   raw source value            "198.51.100.7:443, not-an-ip, 10.0.0.1"
//!          │
//!          ▼  parse_candidates   split on ',' and trim
//!   ["198.51.100.7:443", "not-an-ip", "10.0.0.1"]
//!          │
//!          ▼  select_first_valid strip ":port", parse, filter
//!   Some(198.51.100.7)          first accepted address wins
//! ```
//!
//! Nothing here fails: malformed tokens are skipped and a source with no
//! usable token yields `None`.

use std::borrow::Cow;
use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName};

use super::filter::AddressPolicy;
use super::rule::IpSource;

/// Split `host:port` the way socket address strings are written.
///
/// Accepts `host:port` and `[v6-host]:port`. The port is not validated and
/// may be empty. Returns `None` when there is no port, when an unbracketed
/// host contains a colon, or when brackets are misplaced.
pub fn split_host_port(addr: &str) -> Option<&str> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if host.contains('[') || port.contains(['[', ']']) {
            return None;
        }
        return Some(host);
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) || port.contains(['[', ']']) {
        return None;
    }
    Some(host)
}

/// Split a forwarding header value into trimmed, ordered candidates.
///
/// An empty value yields a single empty candidate.
pub fn parse_candidates(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim)
}

/// Parse one candidate, tolerating an optional port suffix.
///
/// IPv4-mapped IPv6 addresses are folded to their IPv4 form.
pub fn parse_candidate(token: &str) -> Option<IpAddr> {
    let host = split_host_port(token).unwrap_or(token);
    host.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Return the first candidate that parses and passes `filter`.
pub fn select_first_valid<'a, I, P>(candidates: I, filter: &P) -> Option<IpAddr>
where
    I: IntoIterator<Item = &'a str>,
    P: AddressPolicy + ?Sized,
{
    candidates
        .into_iter()
        .filter_map(parse_candidate)
        .find(|ip| filter.accepts(ip))
}

/// Host part of a transport peer address.
///
/// A bare address (or bare hostname) without a port is returned as-is;
/// anything else that fails to split yields an empty string.
pub fn peer_host(peer: &str) -> &str {
    match split_host_port(peer) {
        Some(host) => host,
        None if !peer.contains(':') || peer.parse::<IpAddr>().is_ok() => peer,
        None => "",
    }
}

/// Read the raw real-IP value designated by `source`.
pub fn resolve_source<'a>(
    source: &IpSource,
    headers: &'a HeaderMap,
    peer: &'a str,
) -> Cow<'a, str> {
    match source {
        IpSource::TransportPeer => Cow::Borrowed(peer_host(peer)),
        IpSource::Header(name) => header_text(headers, name),
    }
}

/// First value of `name`, empty when absent.
///
/// Bytes that are not valid UTF-8 become U+FFFD, so only the token holding
/// them fails to parse and the rest of the list stays usable.
fn header_text<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Cow<'a, str> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::filter::{AddressFilter, CidrRange};
    use axum::http::HeaderValue;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn select(raw: &str) -> Option<IpAddr> {
        select_first_valid(parse_candidates(raw), &AddressFilter::accept_all())
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("198.51.100.7:54321"), Some("198.51.100.7"));
        assert_eq!(split_host_port("[2001:db8::1]:443"), Some("2001:db8::1"));
        assert_eq!(split_host_port("example.com:80"), Some("example.com"));
        assert_eq!(split_host_port("1.2.3.4:"), Some("1.2.3.4"));
    }

    #[test]
    fn test_split_host_port_rejects_portless_forms() {
        assert_eq!(split_host_port("198.51.100.7"), None);
        assert_eq!(split_host_port("2001:db8::1"), None);
        assert_eq!(split_host_port("[2001:db8::1]"), None);
        assert_eq!(split_host_port("[::1]x80"), None);
        assert_eq!(split_host_port(""), None);
    }

    #[test]
    fn test_parse_candidates_preserves_order_and_trims() {
        let tokens: Vec<_> = parse_candidates("  203.0.113.5 ,10.0.0.1,  10.0.0.1 ").collect();
        assert_eq!(tokens, vec!["203.0.113.5", "10.0.0.1", "10.0.0.1"]);
    }

    #[test]
    fn test_parse_candidates_empty_yields_one_empty_token() {
        let tokens: Vec<_> = parse_candidates("").collect();
        assert_eq!(tokens, vec![""]);
    }

    #[test]
    fn test_select_first_valid_left_to_right() {
        assert_eq!(select("203.0.113.5, 10.0.0.1"), Some(ip("203.0.113.5")));
    }

    #[test]
    fn test_select_skips_invalid_candidates() {
        assert_eq!(select("not-an-ip, 203.0.113.9"), Some(ip("203.0.113.9")));
        assert_eq!(select(", , unknown, 2001:db8::7"), Some(ip("2001:db8::7")));
    }

    #[test]
    fn test_select_strips_ports() {
        assert_eq!(select("192.0.2.1:8080, 10.0.0.1"), Some(ip("192.0.2.1")));
        assert_eq!(select("[2001:db8::1]:443"), Some(ip("2001:db8::1")));
    }

    #[test]
    fn test_select_none_when_nothing_parses() {
        assert_eq!(select(""), None);
        assert_eq!(select("unknown, _hidden, 999.1.1.1"), None);
    }

    #[test]
    fn test_select_accepts_private_and_loopback() {
        assert_eq!(select("127.0.0.1"), Some(ip("127.0.0.1")));
        assert_eq!(select("10.0.0.1"), Some(ip("10.0.0.1")));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_folded() {
        assert_eq!(parse_candidate("::ffff:203.0.113.5"), Some(ip("203.0.113.5")));
    }

    #[test]
    fn test_select_with_filter_skips_ignored_ranges() {
        let filter = AddressFilter::ignoring(vec!["10.0.0.0/8".parse::<CidrRange>().unwrap()]);
        let selected = select_first_valid(parse_candidates("10.0.0.1, 203.0.113.5"), &filter);
        assert_eq!(selected, Some(ip("203.0.113.5")));
    }

    #[test]
    fn test_peer_host() {
        assert_eq!(peer_host("198.51.100.7:54321"), "198.51.100.7");
        assert_eq!(peer_host("[::1]:8080"), "::1");
        assert_eq!(peer_host("198.51.100.7"), "198.51.100.7");
        assert_eq!(peer_host("::1"), "::1");
        assert_eq!(peer_host("localhost"), "localhost");
        assert_eq!(peer_host("a:b:c"), "");
        assert_eq!(peer_host(""), "");
    }

    #[test]
    fn test_resolve_source_header_and_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "203.0.113.77".parse().unwrap());

        let from_header = IpSource::Header(HeaderName::from_static("cf-connecting-ip"));
        assert_eq!(
            resolve_source(&from_header, &headers, "10.0.0.2:1234"),
            "203.0.113.77"
        );
        assert_eq!(
            resolve_source(&IpSource::TransportPeer, &headers, "198.51.100.7:54321"),
            "198.51.100.7"
        );

        let missing = IpSource::Header(HeaderName::from_static("x-real-ip"));
        assert_eq!(resolve_source(&missing, &headers, ""), "");
    }

    #[test]
    fn test_non_utf8_token_does_not_hide_valid_candidates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_bytes(b"203.0.113.5, caf\xe9").unwrap(),
        );
        headers.insert(
            "cf-connecting-ip",
            HeaderValue::from_bytes(b"caf\xe9, 198.51.100.8").unwrap(),
        );

        let xff = IpSource::Header(HeaderName::from_static("x-forwarded-for"));
        let raw = resolve_source(&xff, &headers, "");
        assert_eq!(select(&raw), Some(ip("203.0.113.5")));

        let cf = IpSource::Header(HeaderName::from_static("cf-connecting-ip"));
        let raw = resolve_source(&cf, &headers, "");
        assert_eq!(select(&raw), Some(ip("198.51.100.8")));
    }
}
