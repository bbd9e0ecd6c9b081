//! Trusted-proxy-aware client address resolution.
//!
//! Forwarded-address headers are only consulted when the immediate peer
//! passes the configured trusted-proxy filter; otherwise a PROXY-protocol
//! preset or the peer address itself wins.

use std::net::{IpAddr, SocketAddr};

use http::header::HeaderMap;

/// Source and (optional) destination address of a proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedAddresses {
    /// The address the request originated from.
    pub source: SocketAddr,
    /// The address the client originally connected to, when known.
    pub destination: Option<SocketAddr>,
}

impl ProxiedAddresses {
    pub fn of(source: SocketAddr) -> Self {
        Self {
            source,
            destination: None,
        }
    }

    pub fn via(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            source,
            destination: Some(destination),
        }
    }
}

/// Where a client address may come from, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAddressSource {
    /// RFC 7239 `forwarded` header, first `for=` pair.
    Forwarded,
    /// `x-forwarded-for` header, first element.
    XForwardedFor,
    /// The immediate peer address.
    Peer,
}

/// Resolve the effective client address for a request.
///
/// `preset` carries addresses derived from the PROXY protocol, if the
/// listener is fronted that way.
pub fn determine_proxied_addresses(
    headers: &HeaderMap,
    sources: &[ClientAddressSource],
    trusted_proxy: &dyn Fn(&IpAddr) -> bool,
    peer: SocketAddr,
    preset: Option<&ProxiedAddresses>,
) -> ProxiedAddresses {
    if !trusted_proxy(&peer.ip()) {
        return preset.cloned().unwrap_or_else(|| ProxiedAddresses::of(peer));
    }

    for source in sources {
        let resolved = match source {
            ClientAddressSource::Forwarded => first_forwarded_for(headers),
            ClientAddressSource::XForwardedFor => first_x_forwarded_for(headers),
            ClientAddressSource::Peer => Some(peer),
        };
        if let Some(addr) = resolved {
            return ProxiedAddresses::of(addr);
        }
    }

    preset.cloned().unwrap_or_else(|| ProxiedAddresses::of(peer))
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<SocketAddr> {
    let value = headers.get(http::header::FORWARDED)?.to_str().ok()?;
    // forwarded: for=192.0.2.60;proto=http, for=198.51.100.17
    for element in value.split(',') {
        for pair in element.split(';') {
            let pair = pair.trim();
            if let Some(target) = pair
                .strip_prefix("for=")
                .or_else(|| pair.strip_prefix("For="))
            {
                if let Some(addr) = parse_address(target) {
                    return Some(addr);
                }
            }
        }
    }
    None
}

fn first_x_forwarded_for(headers: &HeaderMap) -> Option<SocketAddr> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    value.split(',').next().and_then(parse_address)
}

/// Parse a forwarded address token: bare IP, `ip:port`, bracketed IPv6
/// with or without port, optionally double-quoted. Missing ports become 0.
fn parse_address(token: &str) -> Option<SocketAddr> {
    let token = token.trim().trim_matches('"');
    if token.is_empty() || token.starts_with('_') {
        // RFC 7239 obfuscated identifier; carries no address.
        return None;
    }

    if let Ok(addr) = token.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = token.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, 0));
    }
    // Bracketed IPv6 without a port.
    if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Some(SocketAddr::new(ip, 0));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::net::Ipv4Addr;

    fn peer() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), 52000))
    }

    const ALL_SOURCES: &[ClientAddressSource] = &[
        ClientAddressSource::Forwarded,
        ClientAddressSource::XForwardedFor,
        ClientAddressSource::Peer,
    ];

    #[test]
    fn untrusted_peer_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.60"));

        let resolved =
            determine_proxied_addresses(&headers, ALL_SOURCES, &|_| false, peer(), None);
        assert_eq!(resolved.source, peer());
    }

    #[test]
    fn trusted_peer_follows_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::FORWARDED,
            HeaderValue::from_static("for=192.0.2.60;proto=https, for=198.51.100.17"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));

        let resolved = determine_proxied_addresses(&headers, ALL_SOURCES, &|_| true, peer(), None);
        assert_eq!(resolved.source.ip(), IpAddr::from(Ipv4Addr::new(192, 0, 2, 60)));
    }

    #[test]
    fn falls_through_missing_sources() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));

        let resolved = determine_proxied_addresses(&headers, ALL_SOURCES, &|_| true, peer(), None);
        assert_eq!(resolved.source.ip(), IpAddr::from(Ipv4Addr::new(203, 0, 113, 9)));
    }

    #[test]
    fn untrusted_peer_prefers_preset() {
        let preset = ProxiedAddresses::of(SocketAddr::from((Ipv4Addr::new(172, 16, 0, 9), 1234)));
        let resolved =
            determine_proxied_addresses(&HeaderMap::new(), ALL_SOURCES, &|_| false, peer(), Some(&preset));
        assert_eq!(resolved, preset);
    }

    #[test]
    fn parses_address_forms() {
        assert_eq!(
            parse_address("192.0.2.1:8080").map(|a| a.port()),
            Some(8080)
        );
        assert_eq!(parse_address("192.0.2.1").map(|a| a.port()), Some(0));
        assert!(parse_address("\"[2001:db8::1]:443\"").is_some());
        assert!(parse_address("[2001:db8::1]").is_some());
        assert!(parse_address("_hidden").is_none());
        assert!(parse_address("unknown").is_none());
    }
}
