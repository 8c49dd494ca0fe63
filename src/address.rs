//! IPv4 endpoint wrapper.
//!
//! Mirrors `std::net::SocketAddrV4` but keeps the narrower, immutable shape
//! the rest of the crate (and the original `InetAddress`) expects: an
//! octet quad plus a port, with no path for the bytes to change after
//! construction.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// An immutable IPv4 `ip:port` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    ip: Ipv4Addr,
    port: u16,
}

impl Address {
    /// Builds an address from a dotted-quad string and a port.
    ///
    /// # Panics
    ///
    /// Panics if `ip` is not a valid IPv4 dotted-quad. Callers that need a
    /// fallible parse should go through `ip.parse::<Ipv4Addr>()` themselves
    /// and use [`Address::from`].
    pub fn new(ip: &str, port: u16) -> Address {
        let ip: Ipv4Addr = ip.parse().expect("Address::new: invalid IPv4 address");
        Address { ip, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Address {
        Address {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Address {
        match addr {
            SocketAddr::V4(v4) => Address::from(v4),
            SocketAddr::V6(_) => panic!("Address: IPv6 is not supported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ip_port() {
        let addr = Address::new("127.0.0.1", 8080);
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
        assert_eq!(addr.ip(), Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn roundtrips_through_socket_addr() {
        let addr = Address::new("10.0.0.5", 443);
        let sock = addr.to_socket_addr();
        let back: Address = sock.into();
        assert_eq!(addr, back);
    }
}
