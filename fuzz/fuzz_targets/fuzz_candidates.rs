//! Fuzz testing for client address parsing.
//!
//! Header values and peer strings come straight from the network, so the
//! parsing path must never panic. This target also checks that whatever gets
//! selected round-trips through its own textual form, which is what the
//! middleware writes back into `X-Real-Ip`.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the candidate parsing fuzz target
//! cargo +nightly fuzz run fuzz_candidates
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_candidates -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `parse_candidates` / `select_first_valid`: header value splitting and selection
//! - `split_host_port` / `peer_host`: transport peer handling
//! - `CidrRange` parsing for ignored ranges
//! - `RealIpConfig::from_json` followed by rule compilation

#![no_main]

use std::net::IpAddr;

use libfuzzer_sys::fuzz_target;
use real_ip_gateway::middleware::{
    AddressFilter, CidrRange, RealIpConfig, parse_candidates, peer_host, select_first_valid,
    split_host_port,
};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let accept_all = AddressFilter::accept_all();
    if let Some(ip) = select_first_valid(parse_candidates(s), &accept_all) {
        // The selected address must be written back in a form that parses again
        let reparsed: IpAddr = ip.to_string().parse().unwrap();
        assert_eq!(reparsed, ip);
    }

    let _ = split_host_port(s);
    let host = peer_host(s);
    assert!(s.contains(host));

    if let Ok(range) = s.parse::<CidrRange>() {
        let _ = range.contains(&"203.0.113.5".parse().unwrap());
        let _ = range.contains(&"2001:db8::1".parse().unwrap());
    }

    if let Ok(config) = RealIpConfig::from_json(s) {
        let _ = config.compile();
    }
});
