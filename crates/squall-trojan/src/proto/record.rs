use bytes::{Buf, BufMut, Bytes};
use snafu::ensure;
use squall_core::types::TargetAddr;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{
	AddressCodec, BytesRemainingSnafu, CRLF, PayloadOversizeSnafu, ProtoError, addr,
};

/// Largest datagram payload carried in one record. Max 65536
pub const MAX_UDP_PAYLOAD: usize = 4096;

/// One datagram on the carrier: `addr ‖ len:u16 ‖ CRLF ‖ payload`.
///
/// Outbound the address is the datagram's target, inbound it is the source.
#[derive(Debug, Clone, PartialEq)]
pub struct UdpRecord {
	pub addr:    TargetAddr,
	pub payload: Bytes,
}

/// Codec for the datagram records of one UDP association
#[derive(Debug, Clone, Copy)]
pub struct UdpRecordCodec;

impl Decoder for UdpRecordCodec {
	type Error = ProtoError;
	type Item = UdpRecord;

	fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		// Address, length and CRLF first; the record is consumed only once
		// every byte of it is buffered.
		let Some(addr_len) = addr::encoded_len(src)? else {
			return Ok(None);
		};
		if src.len() < addr_len + 4 {
			src.reserve(addr_len + 4 - src.len());
			return Ok(None);
		}

		let payload_len = u16::from_be_bytes([src[addr_len], src[addr_len + 1]]) as usize;
		ensure!(
			payload_len <= MAX_UDP_PAYLOAD,
			PayloadOversizeSnafu { size: payload_len }
		);
		if src.len() < addr_len + 4 + payload_len {
			src.reserve(addr_len + 4 + payload_len - src.len());
			return Ok(None);
		}

		let Some(addr) = AddressCodec.decode(src)? else {
			return Ok(None);
		};
		src.advance(2); // length
		src.advance(2); // CRLF, not validated
		let payload = src.split_to(payload_len).freeze();

		Ok(Some(UdpRecord { addr, payload }))
	}

	fn decode_eof(&mut self, buf: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.decode(buf) {
			Ok(None) if !buf.is_empty() => BytesRemainingSnafu.fail(),
			v => v,
		}
	}
}

impl Encoder<UdpRecord> for UdpRecordCodec {
	type Error = ProtoError;

	fn encode(&mut self, item: UdpRecord, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
		ensure!(
			item.payload.len() <= MAX_UDP_PAYLOAD,
			PayloadOversizeSnafu {
				size: item.payload.len()
			}
		);

		AddressCodec.encode(item.addr, dst)?;
		dst.put_u16(item.payload.len() as u16);
		dst.put_slice(&CRLF);
		dst.put(item.payload);
		Ok(())
	}
}
