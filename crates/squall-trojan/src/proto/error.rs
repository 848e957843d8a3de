use std::{backtrace::Backtrace, str::Utf8Error};

use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProtoError {
	#[snafu(display("Unable to decode address due to type {value}"))]
	UnknownAddressType {
		value:     u8,
		backtrace: Backtrace,
	},
	FailParseDomain {
		// HEX
		raw:       String,
		source:    Utf8Error,
		backtrace: Backtrace,
	},
	DomainTooLong {
		domain:    String,
		backtrace: Backtrace,
	},
	EmptyDomain {
		backtrace: Backtrace,
	},
	#[snafu(display("Datagram of {size} bytes exceeds the record limit"))]
	PayloadOversize {
		size:      usize,
		backtrace: Backtrace,
	},
	// Caller should yield
	BytesRemaining,
	Io {
		source:    std::io::Error,
		backtrace: Backtrace,
	},
}

impl From<std::io::Error> for ProtoError {
	// Framed transports funnel transport failures through the codec error
	#[inline(always)]
	fn from(source: std::io::Error) -> Self {
		use snafu::IntoError as _;
		IoSnafu.into_error(source)
	}
}
