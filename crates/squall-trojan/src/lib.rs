use std::{backtrace::Backtrace, net::SocketAddr};

use snafu::Snafu;

pub mod outbound;
pub mod proto;
mod tls;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
	#[snafu(display("Invalid server url {url:?}"))]
	BadUrl {
		url:       String,
		backtrace: Backtrace,
	},
	#[snafu(display("Server url {url:?} has no port"))]
	BadPort {
		url:       String,
		backtrace: Backtrace,
	},
	#[snafu(display("No usable address for host {host:?}"))]
	UnresolvableHost {
		host:      String,
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("Unable to reach server {server}"))]
	Dial {
		server:    SocketAddr,
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("TLS handshake with {server} failed"))]
	Tls {
		server:    SocketAddr,
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	TlsSetup {
		source:    rustls::Error,
		backtrace: Backtrace,
	},
	#[snafu(display("Preamble write to {server} failed"))]
	PreambleWrite {
		server:    SocketAddr,
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	LocalAddr {
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	Relay {
		source:    std::io::Error,
		backtrace: Backtrace,
	},
	Proto {
		source:    crate::proto::ProtoError,
		backtrace: Backtrace,
	},
}
