use std::{
	net::{Ipv4Addr, Ipv6Addr},
	str,
};

use bytes::{Buf, BufMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use snafu::{ResultExt, ensure};
use squall_core::types::TargetAddr;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	BytesRemainingSnafu, DomainTooLongSnafu, EmptyDomainSnafu, FailParseDomainSnafu, ProtoError,
	UnknownAddressTypeSnafu,
};

/// Largest serialized address record: type, domain length, 255 byte domain,
/// port.
pub const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;

//-----------------------------------------------------------------------------
// Type Definitions
//-----------------------------------------------------------------------------

/// Codec for the SOCKS-style address record carried on every tunnel stream
#[derive(Debug, Clone, Copy)]
pub struct AddressCodec;

/// Address type indicators on the wire
#[derive(IntoPrimitive, FromPrimitive, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum AddressType {
	IPv4   = 0x01,
	Domain = 0x03,
	IPv6   = 0x04,
	#[num_enum(catch_all)]
	Other(u8),
}

//-----------------------------------------------------------------------------
// Codec Implementation
//-----------------------------------------------------------------------------

/// Serialized length of the record starting at `src[0]`, or `None` when the
/// leading bytes do not determine it yet. Only the type tag and the domain
/// length byte are inspected; nothing is consumed.
pub(crate) fn encoded_len(src: &[u8]) -> Result<Option<usize>, ProtoError> {
	let Some(&tag) = src.first() else {
		return Ok(None);
	};
	match AddressType::from(tag) {
		// Type (1) + IPv4 (4) + Port (2)
		AddressType::IPv4 => Ok(Some(1 + 4 + 2)),
		// Type (1) + IPv6 (16) + Port (2)
		AddressType::IPv6 => Ok(Some(1 + 16 + 2)),
		AddressType::Domain => {
			if src.len() < 2 {
				return Ok(None);
			}
			let domain_len = src[1] as usize;
			ensure!(domain_len > 0, EmptyDomainSnafu);
			// Type (1) + Length (1) + Domain + Port (2)
			Ok(Some(1 + 1 + domain_len + 2))
		}
		AddressType::Other(value) => UnknownAddressTypeSnafu { value }.fail(),
	}
}

impl Decoder for AddressCodec {
	type Error = ProtoError;
	type Item = TargetAddr;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		let Some(record_len) = encoded_len(src)? else {
			return Ok(None);
		};
		if src.len() < record_len {
			src.reserve(record_len - src.len());
			return Ok(None);
		}

		match AddressType::from(src.get_u8()) {
			AddressType::IPv4 => {
				let mut octets = [0; 4];
				src.copy_to_slice(&mut octets);
				let ip = Ipv4Addr::from(octets);
				let port = src.get_u16();
				Ok(Some(TargetAddr::IPv4(ip, port)))
			}
			AddressType::IPv6 => {
				let mut octets = [0; 16];
				src.copy_to_slice(&mut octets);
				let ip = Ipv6Addr::from(octets);
				let port = src.get_u16();
				Ok(Some(TargetAddr::IPv6(ip, port)))
			}
			AddressType::Domain => {
				let domain_len = src.get_u8() as usize;
				let domain = &src[..domain_len];
				let domain = str::from_utf8(domain)
					.context(FailParseDomainSnafu {
						raw: hex::encode(domain),
					})?
					.to_string();
				src.advance(domain_len);
				let port = src.get_u16();
				Ok(Some(TargetAddr::Domain(domain, port)))
			}
			_ => unreachable!(),
		}
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) if !buf.is_empty() => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<TargetAddr> for AddressCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: TargetAddr, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		match item {
			TargetAddr::IPv4(ip, port) => {
				// Type (1) + IPv4 (4) + Port (2)
				dst.reserve(1 + 4 + 2);
				dst.put_u8(AddressType::IPv4.into());
				dst.put_slice(&ip.octets());
				dst.put_u16(port);
			}
			TargetAddr::IPv6(ip, port) => {
				// Type (1) + IPv6 (16) + Port (2)
				dst.reserve(1 + 16 + 2);
				dst.put_u8(AddressType::IPv6.into());
				dst.put_slice(&ip.octets());
				dst.put_u16(port);
			}
			TargetAddr::Domain(domain, port) => {
				ensure!(!domain.is_empty(), EmptyDomainSnafu);
				if domain.len() > u8::MAX as usize {
					return DomainTooLongSnafu { domain }.fail();
				}

				// Type (1) + Length (1) + Domain + Port (2)
				dst.reserve(1 + 1 + domain.len() + 2);
				dst.put_u8(AddressType::Domain.into());
				dst.put_u8(domain.len() as u8);
				dst.put_slice(domain.as_bytes());
				dst.put_u16(port);
			}
		}
		Ok(())
	}
}

//-----------------------------------------------------------------------------
// Tests
//-----------------------------------------------------------------------------
