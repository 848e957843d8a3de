use std::{io::Result as IoResult, net::SocketAddr};

use crate::types::TargetAddr;

/// Local packet endpoint of one UDP association.
///
/// `read_to` yields the next datagram together with its target; `write_from`
/// delivers a datagram that arrived from `source`. A closed endpoint reports
/// `UnexpectedEof` from `read_to`. Dropping the endpoint closes it.
///
/// `read_to` must be cancellation safe: a datagram is either fully returned
/// or stays queued.
pub trait AbstractPacketConn: Send + Sync {
	/// Receives one datagram into `buf`, returning its length and target.
	fn read_to(&self, buf: &mut [u8]) -> impl Future<Output = IoResult<(usize, TargetAddr)>> + Send;

	/// Delivers one datagram that originated at `source`.
	fn write_from(&self, buf: &[u8], source: &TargetAddr) -> impl Future<Output = IoResult<usize>> + Send;

	/// Returns the local socket address identifying this association.
	fn local_addr(&self) -> IoResult<SocketAddr>;
}

/// Binds the packet contract to a plain UDP socket, where the datagram peer
/// stands in for the flow target.
#[derive(Debug)]
pub struct TokioPacketConn {
	io: tokio::net::UdpSocket,
}

impl TokioPacketConn {
	pub fn new(io: tokio::net::UdpSocket) -> Self {
		Self { io }
	}
}

impl AbstractPacketConn for TokioPacketConn {
	async fn read_to(&self, buf: &mut [u8]) -> IoResult<(usize, TargetAddr)> {
		let (num, peer) = self.io.recv_from(buf).await?;
		Ok((num, peer.into()))
	}

	async fn write_from(&self, buf: &[u8], source: &TargetAddr) -> IoResult<usize> {
		let target = source.to_socket_addr().ok_or_else(|| {
			std::io::Error::new(std::io::ErrorKind::InvalidInput, "domain source needs resolving")
		})?;
		self.io.send_to(buf, target).await
	}

	fn local_addr(&self) -> IoResult<SocketAddr> {
		self.io.local_addr()
	}
}
