//! Wwise packet framing: the byte layout that precedes each packet's payload inside
//! the `data` chunk, and a single-slot lookahead iterator over a run of packets.
//!
//! Mod-packets audio rewriting needs to know the *next* packet's mode before it has
//! finished writing the current one (to derive a window-transition bit). Rather than
//! thread that state through the caller, [`PacketIter`] exposes a `peek` that never
//! advances, so the one-packet lookahead lives in exactly one place.

use crate::error::WemToOggError;
use crate::riff::Endianness;

/// Which header layout precedes a packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketFraming {
	/// 2-byte size, no granule (`vorb.no_granule`).
	ModernNoGranule,
	/// 2-byte size, 4-byte granule.
	ModernWithGranule,
	/// 4-byte size, 4-byte granule (header-triad framing).
	Legacy
}

impl PacketFraming {
	fn header_len(self) -> usize {
		match self {
			Self::ModernNoGranule => 2,
			Self::ModernWithGranule => 6,
			Self::Legacy => 8
		}
	}
}

#[derive(Debug, Clone)]
pub(crate) struct PacketFrame {
	pub payload_offset: usize,
	pub size: usize,
	pub granule: u32,
	pub next_offset: usize,
	pub is_last: bool
}

/// Iterates packets framed one way over a byte range, exposing a one-packet lookahead.
pub(crate) struct PacketIter<'a> {
	data: &'a [u8],
	endianness: Endianness,
	framing: PacketFraming,
	offset: usize,
	end_offset: usize,
	lookahead: Option<Option<PacketFrame>>
}

impl<'a> PacketIter<'a> {
	pub(crate) fn new(
		data: &'a [u8],
		endianness: Endianness,
		framing: PacketFraming,
		start_offset: usize,
		end_offset: usize
	) -> Self {
		Self { data, endianness, framing, offset: start_offset, end_offset, lookahead: None }
	}

	fn read_one(&self, offset: usize) -> Result<Option<PacketFrame>, WemToOggError> {
		if offset >= self.end_offset {
			return Ok(None);
		}

		let header_len = self.framing.header_len();
		let header = self
			.data
			.get(offset..offset + header_len)
			.ok_or_else(|| WemToOggError::Parse("packet header runs past the data chunk".into()))?;

		let (size, granule) = match self.framing {
			PacketFraming::ModernNoGranule => (self.endianness.u16(&header[0..2]) as usize, 0u32),
			PacketFraming::ModernWithGranule => (
				self.endianness.u16(&header[0..2]) as usize,
				self.endianness.u32(&header[2..6])
			),
			PacketFraming::Legacy => (
				self.endianness.u32(&header[0..4]) as usize,
				self.endianness.u32(&header[4..8])
			)
		};

		let payload_offset = offset + header_len;
		let next_offset = payload_offset
			.checked_add(size)
			.ok_or_else(|| WemToOggError::Parse("packet size overflows the address space".into()))?;

		if next_offset > self.end_offset {
			return Err(WemToOggError::Parse("packet payload runs past the end of the data chunk".into()));
		}

		Ok(Some(PacketFrame {
			payload_offset,
			size,
			granule,
			next_offset,
			is_last: next_offset == self.end_offset
		}))
	}

	fn fill_lookahead(&mut self) -> Result<(), WemToOggError> {
		if self.lookahead.is_none() {
			self.lookahead = Some(self.read_one(self.offset)?);
		}
		Ok(())
	}

	/// Returns the next packet without advancing past it.
	pub(crate) fn peek(&mut self) -> Result<Option<&PacketFrame>, WemToOggError> {
		self.fill_lookahead()?;
		Ok(self.lookahead.as_ref().unwrap().as_ref())
	}

	/// Returns the next packet and advances past it.
	pub(crate) fn next_frame(&mut self) -> Result<Option<PacketFrame>, WemToOggError> {
		self.fill_lookahead()?;
		let frame = self.lookahead.take().unwrap();
		if let Some(frame) = &frame {
			self.offset = frame.next_offset;
		}
		Ok(frame)
	}

	pub(crate) fn payload(&self, frame: &PacketFrame) -> &'a [u8] {
		&self.data[frame.payload_offset..frame.payload_offset + frame.size]
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn iterates_modern_no_granule_packets() {
		let mut data = Vec::new();
		data.extend_from_slice(&3u16.to_le_bytes());
		data.extend_from_slice(&[1, 2, 3]);
		data.extend_from_slice(&2u16.to_le_bytes());
		data.extend_from_slice(&[4, 5]);

		let mut iter = PacketIter::new(&data, Endianness::Little, PacketFraming::ModernNoGranule, 0, data.len());

		let first = iter.next_frame().unwrap().unwrap();
		assert_eq!(first.size, 3);
		assert!(!first.is_last);
		assert_eq!(iter.payload(&first), &[1, 2, 3]);

		let second = iter.peek().unwrap().unwrap().clone();
		assert_eq!(second.size, 2);
		assert!(second.is_last);

		let consumed = iter.next_frame().unwrap().unwrap();
		assert_eq!(consumed.size, 2);
		assert!(iter.next_frame().unwrap().is_none());
	}

	#[test]
	fn peek_past_the_end_is_none() {
		let data = 0u16.to_le_bytes();
		let mut iter = PacketIter::new(&data, Endianness::Little, PacketFraming::ModernNoGranule, 0, data.len());
		assert!(iter.peek().unwrap().is_some());
		iter.next_frame().unwrap();
		assert!(iter.peek().unwrap().is_none());
	}

	#[test]
	fn truncated_header_is_a_parse_error() {
		let data = [0u8; 1];
		let mut iter = PacketIter::new(&data, Endianness::Little, PacketFraming::ModernNoGranule, 0, data.len());
		assert!(matches!(iter.next_frame(), Err(WemToOggError::Parse(_))));
	}
}
