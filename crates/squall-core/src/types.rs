use std::{
	fmt,
	net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use serde::{Deserialize, Serialize};

/// Destination of an intercepted flow.
///
/// `IPv4`/`IPv6` carry an already parsed address; `Domain` is a textual
/// host that the remote end resolves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetAddr {
	Domain(String, u16),
	IPv4(Ipv4Addr, u16),
	IPv6(Ipv6Addr, u16),
}

impl TargetAddr {
	/// Builds the narrowest representation of `host:port`: an IPv4 or IPv6
	/// literal parses to its address form, anything else stays a domain.
	pub fn new(host: &str, port: u16) -> Self {
		if let Ok(v4) = host.parse::<Ipv4Addr>() {
			return Self::IPv4(v4, port);
		}
		if let Ok(v6) = host.parse::<Ipv6Addr>() {
			return Self::IPv6(v6, port);
		}
		Self::Domain(host.to_string(), port)
	}

	pub fn port(&self) -> u16 {
		match self {
			Self::Domain(_, port) | Self::IPv4(_, port) | Self::IPv6(_, port) => *port,
		}
	}

	/// Concrete socket address, `None` for unresolved domains.
	pub fn to_socket_addr(&self) -> Option<SocketAddr> {
		match self {
			Self::Domain(..) => None,
			Self::IPv4(ip, port) => Some(SocketAddr::from((*ip, *port))),
			Self::IPv6(ip, port) => Some(SocketAddr::from((*ip, *port))),
		}
	}
}

impl From<SocketAddr> for TargetAddr {
	fn from(addr: SocketAddr) -> Self {
		match addr.ip() {
			IpAddr::V4(ip) => Self::IPv4(ip, addr.port()),
			IpAddr::V6(ip) => Self::IPv6(ip, addr.port()),
		}
	}
}

impl fmt::Display for TargetAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Domain(domain, port) => write!(f, "{domain}:{port}"),
			Self::IPv4(ip, port) => write!(f, "{ip}:{port}"),
			Self::IPv6(ip, port) => write!(f, "[{ip}]:{port}"),
		}
	}
}
