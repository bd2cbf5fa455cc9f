//! Peer addresses: `ip:port` text to and from [`Endpoint`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// Where a peer can be reached: IPv4 address and port. Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddrV4);

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Endpoint(SocketAddrV4::new(ip, port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        self.0
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Endpoint(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port())
    }
}

impl FromStr for Endpoint {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parse `ip:port`. Exactly one `:`; IPv4 literal on the left, decimal port on the right.
pub fn parse(text: &str) -> Result<Endpoint, AddressError> {
    let invalid = |reason| AddressError::InvalidAddress {
        input: text.to_string(),
        reason,
    };
    let (ip, port) = text.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
    if port.contains(':') {
        return Err(invalid("more than one ':'"));
    }
    let ip: Ipv4Addr = ip.parse().map_err(|_| invalid("bad IPv4 address"))?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("port is not a number"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("port out of range"))?;
    Ok(Endpoint::new(ip, port))
}

/// Canonical `ip:port` text; inverse of [`parse`].
pub fn format(endpoint: &Endpoint) -> String {
    endpoint.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ip_and_port() {
        let e = parse("10.0.0.5:9999").unwrap();
        assert_eq!(e.ip(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(e.port(), 9999);
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "bad",
            "1.2.3.4",
            "1.2.3.4:notaport",
            "1.2.3.4:",
            "1.2.3.4:65536",
            "1.2.3.4:-1",
            "1.2.3.4:+80",
            "1.2.3:80",
            "1.2.3.4:80:81",
            ":80",
        ] {
            assert!(
                matches!(parse(bad), Err(AddressError::InvalidAddress { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn format_then_parse_is_identity() {
        let endpoints = [
            Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 0),
            Endpoint::new(Ipv4Addr::new(192, 168, 1, 20), 45679),
            Endpoint::new(Ipv4Addr::new(255, 255, 255, 255), u16::MAX),
        ];
        for e in endpoints {
            assert_eq!(parse(&format(&e)).unwrap(), e);
        }
    }

    #[test]
    fn from_str_matches_parse() {
        let e: Endpoint = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(e.to_string(), "127.0.0.1:4000");
    }
}
