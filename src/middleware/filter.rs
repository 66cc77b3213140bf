//! Optional address-class filtering for candidate selection.
//!
//! By default every syntactically valid address is accepted, including
//! private and loopback ones. Deployments that want to skip internal hops
//! (for example a load balancer that prepends its own address) can list the
//! ranges to ignore with `REAL_IP_IGNORED_RANGES`:
//!
//! ```text
//! REAL_IP_IGNORED_RANGES=10.0.0.0/8,fd00::/8,127.0.0.1
//! ```
//!
//! A bare address is treated as a single-host range (`/32` or `/128`).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use tracing::warn;

/// A network range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

/// Error returned for malformed CIDR strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCidr(String);

impl fmt::Display for InvalidCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid CIDR range {:?}", self.0)
    }
}

impl std::error::Error for InvalidCidr {}

impl FromStr for CidrRange {
    type Err = InvalidCidr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || InvalidCidr(s.to_string());

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max_prefix = max_prefix_len(&network);
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return Err(invalid());
        }

        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl CidrRange {
    /// Check whether `ip` lies inside this range. Families never match each other.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                u32::from(net) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix_len)).unwrap_or(0);
                u128::from(net) & mask == u128::from(*addr) & mask
            }
            _ => false,
        }
    }
}

fn max_prefix_len(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Decides whether a parsed candidate may be selected as the real IP.
///
/// Implemented by [`AddressFilter`] and by plain closures.
pub trait AddressPolicy: Send + Sync + 'static {
    fn accepts(&self, ip: &IpAddr) -> bool;
}

impl<F> AddressPolicy for F
where
    F: Fn(&IpAddr) -> bool + Send + Sync + 'static,
{
    fn accepts(&self, ip: &IpAddr) -> bool {
        self(ip)
    }
}

/// Ranges excluded from real-IP selection. Empty accepts everything.
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    ignored: Vec<CidrRange>,
}

impl AddressFilter {
    /// Accept every address.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn ignoring(ranges: Vec<CidrRange>) -> Self {
        Self { ignored: ranges }
    }

    /// Build a filter from CIDR strings, skipping (and logging) malformed entries.
    pub fn from_cidrs(cidrs: &[String]) -> Self {
        let ignored = cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<CidrRange>() {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(error = %e, "Skipping entry in REAL_IP_IGNORED_RANGES");
                    None
                }
            })
            .collect();
        Self { ignored }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ignored.is_empty()
    }
}

impl AddressPolicy for AddressFilter {
    #[inline]
    fn accepts(&self, ip: &IpAddr) -> bool {
        !self.ignored.iter().any(|range| range.contains(ip))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_ipv4_range() {
        let range: CidrRange = "10.0.0.0/8".parse().unwrap();
        assert_eq!(range.prefix_len, 8);
    }

    #[test]
    fn test_parse_bare_address_is_host_range() {
        let v4: CidrRange = "192.168.1.1".parse().unwrap();
        let v6: CidrRange = "::1".parse().unwrap();
        assert_eq!(v4.prefix_len, 32);
        assert_eq!(v6.prefix_len, 128);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-ip".parse::<CidrRange>().is_err());
        assert!("10.0.0.0/33".parse::<CidrRange>().is_err());
        assert!("10.0.0.0/x".parse::<CidrRange>().is_err());
        assert!("::/129".parse::<CidrRange>().is_err());
    }

    #[test]
    fn test_contains_ipv4() {
        let range: CidrRange = "172.16.0.0/12".parse().unwrap();
        assert!(range.contains(&ip("172.16.0.1")));
        assert!(range.contains(&ip("172.31.255.255")));
        assert!(!range.contains(&ip("172.32.0.1")));
        assert!(!range.contains(&ip("::1")));
    }

    #[test]
    fn test_contains_ipv6_and_zero_prefix() {
        let ula: CidrRange = "fd00::/8".parse().unwrap();
        assert!(ula.contains(&ip("fd12:3456::1")));
        assert!(!ula.contains(&ip("2001:db8::1")));

        let everything: CidrRange = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains(&ip("203.0.113.5")));
    }

    #[test]
    fn test_closure_policy() {
        let only_v6 = |ip: &IpAddr| ip.is_ipv6();
        assert!(only_v6.accepts(&ip("2001:db8::1")));
        assert!(!only_v6.accepts(&ip("203.0.113.5")));
    }

    #[test]
    fn test_default_filter_accepts_private_and_loopback() {
        let filter = AddressFilter::accept_all();
        assert!(!filter.is_enabled());
        assert!(filter.accepts(&ip("10.0.0.1")));
        assert!(filter.accepts(&ip("127.0.0.1")));
        assert!(filter.accepts(&ip("::1")));
    }

    #[test]
    fn test_from_cidrs_skips_invalid_entries() {
        let filter = AddressFilter::from_cidrs(&["10.0.0.0/8".to_string(), "bogus".to_string()]);
        assert!(filter.is_enabled());
        assert!(!filter.accepts(&ip("10.1.2.3")));
        assert!(filter.accepts(&ip("203.0.113.5")));
    }
}
