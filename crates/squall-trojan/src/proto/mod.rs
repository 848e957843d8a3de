mod error;
pub use error::*;

pub mod addr;
pub use addr::*;

mod record;
pub use record::*;

use bytes::{BufMut, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use sha2::{Digest, Sha224};
use squall_core::types::TargetAddr;
use tokio_util::codec::Encoder;

/// Length of the hex-encoded SHA-224 password digest
pub const AUTH_HEX_LEN: usize = 56;
/// Digest plus its trailing CRLF
pub const AUTH_LEN: usize = AUTH_HEX_LEN + 2;

pub const CRLF: [u8; 2] = [0x0d, 0x0a];

/// Command byte following the auth block
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Cmd {
	Connect      = 0x01,
	UdpAssociate = 0x03,
	#[num_enum(catch_all)]
	Other(u8),
}

/// Fixed per-handler credential: `lowercase_hex(SHA224(password))` plus CRLF
pub fn auth_key(password: &str) -> [u8; AUTH_LEN] {
	let digest = Sha224::digest(password.as_bytes());
	let mut key = [0u8; AUTH_LEN];
	key[..AUTH_HEX_LEN].copy_from_slice(hex::encode(digest).as_bytes());
	key[AUTH_HEX_LEN] = CRLF[0];
	key[AUTH_HEX_LEN + 1] = CRLF[1];
	key
}

/// Prologue of every carrier: auth block, command, address record, CRLF.
/// Written as one contiguous buffer ahead of any payload byte.
pub fn encode_preamble(
	auth: &[u8; AUTH_LEN],
	cmd: Cmd,
	addr: &TargetAddr,
) -> Result<BytesMut, ProtoError> {
	let mut buf = BytesMut::with_capacity(AUTH_LEN + 1 + MAX_ADDR_LEN + 2);
	buf.put_slice(auth);
	buf.put_u8(cmd.into());
	AddressCodec.encode(addr.clone(), &mut buf)?;
	buf.put_slice(&CRLF);
	Ok(buf)
}

#[cfg(test)]
mod test {
	use std::net::Ipv4Addr;

	use squall_core::types::TargetAddr;

	use super::{AUTH_LEN, Cmd, auth_key, encode_preamble};

	#[test]
	fn auth_key_is_hex_sha224_plus_crlf() {
		let key = auth_key("hello");
		assert_eq!(
			&key[..56],
			b"ea09ae9cc6768c50fcee903ed054556e5bfc8347907f12598aa24193".as_slice()
		);
		assert_eq!(&key[56..], &[0x0d, 0x0a]);
	}

	#[test]
	fn connect_preamble_layout() {
		let auth = auth_key("hello");
		let target = TargetAddr::IPv4(Ipv4Addr::new(93, 184, 216, 34), 80);
		let preamble = encode_preamble(&auth, Cmd::Connect, &target).unwrap();

		assert_eq!(&preamble[..AUTH_LEN], auth.as_slice());
		assert_eq!(
			&preamble[AUTH_LEN..],
			&[0x01, 0x01, 0x5d, 0xb8, 0xd8, 0x22, 0x00, 0x50, 0x0d, 0x0a]
		);
	}

	#[test]
	fn associate_preamble_carries_source_endpoint() {
		let auth = auth_key("pw");
		let source = TargetAddr::new("192.168.1.10", 50000);
		let preamble = encode_preamble(&auth, Cmd::UdpAssociate, &source).unwrap();

		assert_eq!(preamble[AUTH_LEN], 0x03);
		assert_eq!(&preamble[AUTH_LEN + 1..AUTH_LEN + 2], &[0x01]);
		assert_eq!(preamble.len(), AUTH_LEN + 1 + 7 + 2);
	}
}
