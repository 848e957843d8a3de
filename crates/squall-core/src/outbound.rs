use crate::{tcp::AbstractTcpStream, types::TargetAddr, udp::AbstractPacketConn};

pub trait AbstractOutbound {
	/// TCP traffic which needs handled by outbound
	fn handle_tcp(
		&self,
		target_addr: TargetAddr,
		stream: impl AbstractTcpStream,
	) -> impl Future<Output = eyre::Result<()>> + Send;
	/// UDP traffic which needs handled by outbound
	fn handle_udp(
		&self,
		conn: impl AbstractPacketConn,
	) -> impl Future<Output = eyre::Result<()>> + Send;
}
