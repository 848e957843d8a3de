//! End-to-end tests for the trojan outbound handler
//!
//! Each test runs a minimal in-process trojan server behind a self-signed
//! TLS listener and drives the handler against it.

use std::{
	io,
	net::{Ipv4Addr, SocketAddr},
	sync::Arc,
	time::{Duration, Instant},
};

use bytes::{BufMut, BytesMut};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use squall_core::{AbstractOutbound, types::TargetAddr, udp::AbstractPacketConn};
use squall_trojan::{
	outbound::{TrojanOutbound, TrojanOutboundOpts},
	proto::{self, AddressCodec},
};
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	net::TcpListener,
	sync::{Mutex, mpsc},
	time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Encoder;

const PASSWORD: &str = "test-password";

fn tls_acceptor() -> TlsAcceptor {
	#[cfg(feature = "aws-lc-rs")]
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
	#[cfg(feature = "ring")]
	let _ = rustls::crypto::ring::default_provider().install_default();

	let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
	let cert_der = CertificateDer::from(cert.cert);
	let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

	let config = rustls::ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(vec![cert_der], PrivateKeyDer::Pkcs8(key_der))
		.unwrap();
	TlsAcceptor::from(Arc::new(config))
}

async fn handler(listener: &TcpListener, idle_timeout: Duration) -> eyre::Result<TrojanOutbound> {
	let port = listener.local_addr()?.port();
	let outbound = TrojanOutbound::new(
		&format!("trojan://{PASSWORD}@127.0.0.1:{port}"),
		TrojanOutboundOpts {
			idle_timeout,
			skip_cert_verify: true,
		},
	)
	.await?;
	Ok(outbound)
}

async fn read_addr(stream: &mut (impl AsyncRead + Unpin)) -> eyre::Result<TargetAddr> {
	match stream.read_u8().await? {
		0x01 => {
			let mut octets = [0u8; 4];
			stream.read_exact(&mut octets).await?;
			let port = stream.read_u16().await?;
			Ok(TargetAddr::IPv4(octets.into(), port))
		}
		0x03 => {
			let len = stream.read_u8().await? as usize;
			let mut domain = vec![0u8; len];
			stream.read_exact(&mut domain).await?;
			let port = stream.read_u16().await?;
			Ok(TargetAddr::Domain(String::from_utf8(domain)?, port))
		}
		0x04 => {
			let mut octets = [0u8; 16];
			stream.read_exact(&mut octets).await?;
			let port = stream.read_u16().await?;
			Ok(TargetAddr::IPv6(octets.into(), port))
		}
		other => eyre::bail!("unknown address type {other:#04x}"),
	}
}

/// Reads and validates the carrier prologue, returning command and address
async fn read_preamble(
	stream: &mut (impl AsyncRead + Unpin),
	password: &str,
) -> eyre::Result<(u8, TargetAddr)> {
	let mut auth = [0u8; proto::AUTH_LEN];
	stream.read_exact(&mut auth).await?;
	eyre::ensure!(auth == proto::auth_key(password), "credential block mismatch");

	let cmd = stream.read_u8().await?;
	let addr = read_addr(stream).await?;

	let mut crlf = [0u8; 2];
	stream.read_exact(&mut crlf).await?;
	eyre::ensure!(crlf == [0x0d, 0x0a], "preamble not CRLF-terminated");

	Ok((cmd, addr))
}

async fn read_udp_record(
	stream: &mut (impl AsyncRead + Unpin),
) -> eyre::Result<(TargetAddr, Vec<u8>)> {
	let addr = read_addr(stream).await?;
	let len = stream.read_u16().await? as usize;
	let mut crlf = [0u8; 2];
	stream.read_exact(&mut crlf).await?;
	let mut payload = vec![0u8; len];
	stream.read_exact(&mut payload).await?;
	Ok((addr, payload))
}

async fn write_udp_record(
	stream: &mut (impl AsyncWrite + Unpin),
	addr: &TargetAddr,
	payload: &[u8],
) -> eyre::Result<()> {
	let mut buf = BytesMut::new();
	AddressCodec.encode(addr.clone(), &mut buf)?;
	buf.put_u16(payload.len() as u16);
	buf.put_slice(&[0x0d, 0x0a]);
	buf.put_slice(payload);
	stream.write_all(&buf).await?;
	Ok(())
}

/// Packet endpoint fed by channels; the session ends when the sender side
/// is dropped
struct MockPacketConn {
	local:     SocketAddr,
	outgoing:  Mutex<mpsc::UnboundedReceiver<(Vec<u8>, TargetAddr)>>,
	delivered: mpsc::UnboundedSender<(Vec<u8>, TargetAddr)>,
}

impl AbstractPacketConn for MockPacketConn {
	async fn read_to(&self, buf: &mut [u8]) -> io::Result<(usize, TargetAddr)> {
		match self.outgoing.lock().await.recv().await {
			Some((payload, target)) => {
				buf[..payload.len()].copy_from_slice(&payload);
				Ok((payload.len(), target))
			}
			None => Err(io::ErrorKind::UnexpectedEof.into()),
		}
	}

	async fn write_from(&self, buf: &[u8], source: &TargetAddr) -> io::Result<usize> {
		self.delivered
			.send((buf.to_vec(), source.clone()))
			.map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
		Ok(buf.len())
	}

	fn local_addr(&self) -> io::Result<SocketAddr> {
		Ok(self.local)
	}
}

#[test_log::test(tokio::test)]
async fn connect_relay_echoes_payload() -> eyre::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let outbound = handler(&listener, Duration::from_secs(30)).await?;
	let acceptor = tls_acceptor();
	let target = TargetAddr::IPv4(Ipv4Addr::new(93, 184, 216, 34), 80);

	let expect_target = target.clone();
	let server = tokio::spawn(async move {
		let (tcp, _) = listener.accept().await.unwrap();
		let mut tls = acceptor.accept(tcp).await.unwrap();

		let (cmd, addr) = read_preamble(&mut tls, PASSWORD).await.unwrap();
		assert_eq!(cmd, 0x01);
		assert_eq!(addr, expect_target);

		let mut buf = [0u8; 1024];
		loop {
			let num = tls.read(&mut buf).await.unwrap();
			if num == 0 {
				break;
			}
			tls.write_all(&buf[..num]).await.unwrap();
		}
		tls.shutdown().await.unwrap();
	});

	let (mut local, local_remote) = tokio::io::duplex(4096);
	let relay = tokio::spawn(async move { outbound.handle_tcp(target, local_remote).await });

	let request = b"GET / HTTP/1.0\r\n\r\n";
	local.write_all(request).await?;

	let mut echoed = [0u8; 18];
	local.read_exact(&mut echoed).await?;
	assert_eq!(&echoed, request);

	local.shutdown().await?;
	assert_eq!(local.read(&mut [0u8; 1]).await?, 0);

	relay.await??;
	server.await?;
	Ok(())
}

#[test_log::test(tokio::test)]
async fn connect_half_close_delivers_remaining_bytes() -> eyre::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let outbound = handler(&listener, Duration::from_secs(30)).await?;
	let acceptor = tls_acceptor();

	let server = tokio::spawn(async move {
		let (tcp, _) = listener.accept().await.unwrap();
		let mut tls = acceptor.accept(tcp).await.unwrap();
		let (cmd, _) = read_preamble(&mut tls, PASSWORD).await.unwrap();
		assert_eq!(cmd, 0x01);

		let mut upstream = vec![0u8; 100];
		tls.read_exact(&mut upstream).await.unwrap();
		assert_eq!(upstream, vec![0xab; 100]);
		// the local write side is closed now
		assert_eq!(tls.read(&mut [0u8; 1]).await.unwrap(), 0);

		// keep pushing in the reverse direction after the half-close
		tls.write_all(&[0x5e; 200]).await.unwrap();
		tls.shutdown().await.unwrap();
	});

	let (mut local, local_remote) = tokio::io::duplex(4096);
	let target = TargetAddr::Domain(String::from("example.com"), 443);
	let relay = tokio::spawn(async move { outbound.handle_tcp(target, local_remote).await });

	local.write_all(&[0xab; 100]).await?;
	local.shutdown().await?;

	let mut rest = Vec::new();
	local.read_to_end(&mut rest).await?;
	assert_eq!(rest, vec![0x5e; 200]);

	relay.await??;
	server.await?;
	Ok(())
}

#[test_log::test(tokio::test)]
async fn udp_association_reflects_datagrams() -> eyre::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let outbound = handler(&listener, Duration::from_secs(10)).await?;
	let acceptor = tls_acceptor();

	let local: SocketAddr = "127.0.0.1:55321".parse()?;
	let server = tokio::spawn(async move {
		let (tcp, _) = listener.accept().await.unwrap();
		let mut tls = acceptor.accept(tcp).await.unwrap();

		let (cmd, addr) = read_preamble(&mut tls, PASSWORD).await.unwrap();
		assert_eq!(cmd, 0x03);
		assert_eq!(addr, TargetAddr::IPv4(Ipv4Addr::new(127, 0, 0, 1), 55321));

		// reflect each record back with source = target
		for _ in 0..3 {
			let (target, payload) = read_udp_record(&mut tls).await.unwrap();
			write_udp_record(&mut tls, &target, &payload).await.unwrap();
		}

		// wait for the client to wind the session down
		while tls.read(&mut [0u8; 64]).await.unwrap_or(0) != 0 {}
	});

	let (out_tx, out_rx) = mpsc::unbounded_channel();
	let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
	let conn = MockPacketConn {
		local,
		outgoing: Mutex::new(out_rx),
		delivered: delivered_tx,
	};
	let relay = tokio::spawn(async move { outbound.handle_udp(conn).await });

	let datagrams = vec![
		(vec![0x01u8; 1], TargetAddr::IPv4(Ipv4Addr::new(10, 0, 0, 1), 53)),
		(vec![0x02u8; 1500], TargetAddr::Domain(String::from("example.com"), 4433)),
		(vec![0x03u8; 4096], TargetAddr::new("2001:db8::1", 9000)),
	];
	for datagram in &datagrams {
		out_tx.send(datagram.clone())?;
	}

	for expected in &datagrams {
		let delivered = timeout(Duration::from_secs(5), delivered_rx.recv())
			.await?
			.expect("delivery channel closed early");
		assert_eq!(&delivered, expected);
	}

	// local endpoint closes; the association must end cleanly
	drop(out_tx);
	relay.await??;
	server.await?;
	Ok(())
}

#[test_log::test(tokio::test)]
async fn udp_idle_timeout_closes_cleanly() -> eyre::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let outbound = handler(&listener, Duration::from_millis(100)).await?;
	let acceptor = tls_acceptor();

	let server = tokio::spawn(async move {
		let (tcp, _) = listener.accept().await.unwrap();
		let mut tls = acceptor.accept(tcp).await.unwrap();
		let (cmd, _) = read_preamble(&mut tls, PASSWORD).await.unwrap();
		assert_eq!(cmd, 0x03);
		while tls.read(&mut [0u8; 64]).await.unwrap_or(0) != 0 {}
	});

	let (out_tx, out_rx) = mpsc::unbounded_channel::<(Vec<u8>, TargetAddr)>();
	let (delivered_tx, _delivered_rx) = mpsc::unbounded_channel();
	let conn = MockPacketConn {
		local: "127.0.0.1:55322".parse()?,
		outgoing: Mutex::new(out_rx),
		delivered: delivered_tx,
	};

	let started = Instant::now();
	outbound.handle_udp(conn).await?;
	assert!(started.elapsed() < Duration::from_secs(2));

	drop(out_tx);
	server.await?;
	Ok(())
}

#[test_log::test(tokio::test)]
async fn dial_failure_surfaces_without_retry() -> eyre::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let outbound = handler(&listener, Duration::from_secs(1)).await?;
	drop(listener);

	let (_local, local_remote) = tokio::io::duplex(64);
	let result = outbound
		.handle_tcp(TargetAddr::new("example.com", 80), local_remote)
		.await;
	assert!(result.is_err());
	Ok(())
}
