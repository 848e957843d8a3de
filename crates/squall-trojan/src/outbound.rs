use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::SinkExt as _;
use rustls::pki_types::ServerName;
use snafu::{IntoError as _, OptionExt as _, ResultExt as _};
use squall_core::{AbstractOutbound, AbstractTcpStream, info, io::copy_duplex, types::TargetAddr, udp::AbstractPacketConn, warn};
use tokio::{
	io::{AsyncWrite, AsyncWriteExt as _},
	net::TcpStream,
	time::timeout,
};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tokio_stream::StreamExt as _;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{
	BadPortSnafu, BadUrlSnafu, DialSnafu, Error, LocalAddrSnafu, PreambleWriteSnafu, ProtoSnafu,
	RelaySnafu, TlsSetupSnafu, TlsSnafu, UnresolvableHostSnafu,
	proto::{self, AUTH_LEN, Cmd, MAX_UDP_PAYLOAD, ProtoError, UdpRecord, UdpRecordCodec},
	tls,
};

pub struct TrojanOutboundOpts {
	/// Idle deadline for both directions of a UDP association carrier
	pub idle_timeout:     Duration,
	/// Accept any server certificate. Self-signed deployments only
	pub skip_cert_verify: bool,
}

impl Default for TrojanOutboundOpts {
	fn default() -> Self {
		Self {
			idle_timeout:     Duration::from_secs(60),
			skip_cert_verify: false,
		}
	}
}

/// Outbound handler tunneling intercepted flows to one trojan server.
///
/// Immutable once constructed; every flow dials its own TLS carrier and
/// shares nothing with other flows except the TLS session cache.
pub struct TrojanOutbound {
	server_addr:  SocketAddr,
	server_name:  ServerName<'static>,
	connector:    TlsConnector,
	auth:         [u8; AUTH_LEN],
	idle_timeout: Duration,
}

impl TrojanOutbound {
	/// Builds a handler from `scheme://password@host:port`. The host is
	/// resolved once for dialing; the textual host stays the TLS server
	/// name.
	pub async fn new(url: &str, opts: TrojanOutboundOpts) -> Result<Self, Error> {
		{
			#[cfg(feature = "aws-lc-rs")]
			let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
			#[cfg(feature = "ring")]
			let _ = rustls::crypto::ring::default_provider().install_default();
		}

		let (host, port, password) = parse_url(url)?;

		let server_addr = tokio::net::lookup_host((host.as_str(), port))
			.await
			.context(UnresolvableHostSnafu { host: host.clone() })?
			.next()
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "empty resolver answer"))
			.context(UnresolvableHostSnafu { host: host.clone() })?;

		let server_name = ServerName::try_from(host.clone())
			.ok()
			.context(BadUrlSnafu { url })?;

		let config = tls::tls_config(opts.skip_cert_verify).context(TlsSetupSnafu)?;

		Ok(Self {
			server_addr,
			server_name,
			connector: TlsConnector::from(Arc::new(config)),
			auth: proto::auth_key(&password),
			idle_timeout: opts.idle_timeout,
		})
	}

	/// Auth block written at the head of every carrier
	pub fn auth(&self) -> &[u8; AUTH_LEN] {
		&self.auth
	}

	pub fn server_addr(&self) -> SocketAddr {
		self.server_addr
	}

	/// TCP with keep-alive, upgraded to TLS against the handler config
	async fn dial(&self) -> Result<TlsStream<TcpStream>, Error> {
		let stream = TcpStream::connect(self.server_addr).await.context(DialSnafu {
			server: self.server_addr,
		})?;
		// keep-alive goes on the raw socket, ahead of the handshake
		socket2::SockRef::from(&stream)
			.set_keepalive(true)
			.context(DialSnafu {
				server: self.server_addr,
			})?;
		self.connector
			.connect(self.server_name.clone(), stream)
			.await
			.context(TlsSnafu {
				server: self.server_addr,
			})
	}

	async fn send_preamble(
		&self,
		carrier: &mut (impl AsyncWrite + Unpin),
		cmd: Cmd,
		addr: &TargetAddr,
	) -> Result<(), Error> {
		let preamble = proto::encode_preamble(&self.auth, cmd, addr).context(ProtoSnafu)?;
		carrier.write_all(&preamble).await.context(PreambleWriteSnafu {
			server: self.server_addr,
		})?;
		carrier.flush().await.context(PreambleWriteSnafu {
			server: self.server_addr,
		})
	}
}

impl AbstractOutbound for TrojanOutbound {
	async fn handle_tcp(&self, target_addr: TargetAddr, stream: impl AbstractTcpStream) -> eyre::Result<()> {
		let mut local = stream;
		let mut carrier = self.dial().await?;
		self.send_preamble(&mut carrier, Cmd::Connect, &target_addr).await?;
		info!(target: "[OUT]", "{target_addr} connected via {}", self.server_addr);

		let (sent, received, err) = copy_duplex(&mut local, &mut carrier).await;
		match err {
			Some(err) if !is_benign_disconnect(&err) => {
				warn!(target: "[OUT]", "{target_addr} aborted after {sent}B out / {received}B in: {err}");
				Err(RelaySnafu.into_error(err).into())
			}
			_ => {
				info!(target: "[OUT]", "{target_addr} done, {sent}B out / {received}B in");
				Ok(())
			}
		}
	}

	async fn handle_udp(&self, conn: impl AbstractPacketConn) -> eyre::Result<()> {
		let session = TargetAddr::from(conn.local_addr().context(LocalAddrSnafu)?);

		let mut carrier = self.dial().await?;
		self.send_preamble(&mut carrier, Cmd::UdpAssociate, &session).await?;
		info!(target: "[OUT]", "{session} associated via {}", self.server_addr);

		let (carrier_rd, carrier_wr) = tokio::io::split(carrier);
		let mut carrier_in = FramedRead::new(carrier_rd, UdpRecordCodec);
		let mut carrier_out = FramedWrite::new(carrier_wr, UdpRecordCodec);

		let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
		let mut datagrams_out = 0usize;
		let mut datagrams_in = 0usize;
		let mut session_err: Option<Error> = None;

		loop {
			tokio::select! {
			   record = timeout(self.idle_timeout, carrier_in.next()) => match record {
				  // idle deadline or carrier EOF, clean close
				  Err(_) => break,
				  Ok(None) => break,
				  Ok(Some(Ok(record))) => {
					 if let Err(err) = conn.write_from(&record.payload, &record.addr).await {
						if !is_benign_disconnect(&err) {
						   session_err = Some(RelaySnafu.into_error(err));
						}
						break;
					 }
					 datagrams_in += 1;
				  }
				  Ok(Some(Err(err))) => {
					 session_err = carrier_error(err);
					 break;
				  }
			   },
			   incoming = conn.read_to(&mut buf) => match incoming {
				  Ok((num, target)) => {
					 let record = UdpRecord {
						addr:    target,
						payload: Bytes::copy_from_slice(&buf[..num]),
					 };
					 match timeout(self.idle_timeout, carrier_out.send(record)).await {
						Err(_) => break,
						Ok(Ok(())) => datagrams_out += 1,
						Ok(Err(err)) => {
						   session_err = carrier_error(err);
						   break;
						}
					 }
				  }
				  // a closed local endpoint ends the association
				  Err(err) => {
					 if !is_benign_disconnect(&err) {
						session_err = Some(RelaySnafu.into_error(err));
					 }
					 break;
				  }
			   },
			}
		}

		// close_notify towards the server; the local endpoint closes on drop
		let _ = carrier_out.close().await;

		match session_err {
			Some(err) => {
				warn!(target: "[OUT]", "{session} aborted after {datagrams_out} out / {datagrams_in} in: {err}");
				Err(err.into())
			}
			None => {
				info!(target: "[OUT]", "{session} closed, {datagrams_out} out / {datagrams_in} in");
				Ok(())
			}
		}
	}
}

fn parse_url(raw: &str) -> Result<(String, u16, String), Error> {
	let url = url::Url::parse(raw).ok().context(BadUrlSnafu { url: raw })?;

	let host = match url.host() {
		Some(url::Host::Domain(domain)) => domain.to_string(),
		Some(url::Host::Ipv4(ip)) => ip.to_string(),
		Some(url::Host::Ipv6(ip)) => ip.to_string(),
		None => return BadUrlSnafu { url: raw }.fail(),
	};
	let port = url.port().context(BadPortSnafu { url: raw })?;

	let password = url.username();
	if password.is_empty() {
		return BadUrlSnafu { url: raw }.fail();
	}

	Ok((host, port, password.to_string()))
}

/// Peer went away in one of the expected ways; the relay reports success
fn is_benign_disconnect(err: &io::Error) -> bool {
	matches!(
		err.kind(),
		io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::TimedOut
	)
}

/// Carrier-side codec failure, with disconnects normalized away
fn carrier_error(err: ProtoError) -> Option<Error> {
	match &err {
		ProtoError::Io { source, .. } if is_benign_disconnect(source) => None,
		_ => Some(ProtoSnafu.into_error(err)),
	}
}
