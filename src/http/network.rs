//! Host classification for the local-development TLS override.

use std::net::{IpAddr, Ipv6Addr};

/// Returns true when `host` names this machine or a non-routable network.
///
/// Covers the `localhost` name, IPv4 loopback and private blocks
/// (10/8, 172.16/12, 192.168/16), IPv6 loopback and unique-local
/// addresses (fc00::/7), and IPv4-mapped forms of those. Anything that does
/// not parse as an IP address is treated as a public hostname, so TLS stays
/// on when in doubt.
pub fn is_local(host: &str) -> bool {
    let host = host.trim();
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let literal = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    match literal.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_loopback() || v4.is_private(),
            None => v6.is_loopback() || is_unique_local(&v6),
        },
        Err(_) => false,
    }
}

fn is_unique_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}
