//! The Ogg page writer: an LSB-first bit sink that packs bits into bytes, segments
//! the accumulated payload into Ogg pages, computes each page's CRC32 and emits it.
//!
//! Every packet this crate ever writes (the three header packets, and each audio
//! packet) occupies exactly one page, so this writer does not need to split a single
//! packet's payload across page boundaries except at the degenerate maximum page size
//! boundary tested in [`test`].

use std::io::{self, Write};

use log::trace;

use crate::crc;

const HEADER_LEN: usize = 27;
const MAX_SEGMENTS: usize = 255;
const MAX_PAYLOAD_LEN: usize = MAX_SEGMENTS * 255;

/// Packs bits LSB-first into an Ogg page payload and emits pages to the wrapped sink.
///
/// All pages share a fixed stream serial of `1`, per this crate's contract of
/// producing exactly one logical Vorbis stream per conversion.
pub(crate) struct OggPageWriter<W: Write> {
	sink: Option<W>,
	bit_buffer: u8,
	bits_stored: u8,
	payload: Vec<u8>,
	granule: u64,
	sequence: u32,
	first: bool,
	continued: bool,
	finished: bool
}

impl<W: Write> OggPageWriter<W> {
	pub(crate) fn new(sink: W) -> Self {
		Self {
			sink: Some(sink),
			bit_buffer: 0,
			bits_stored: 0,
			payload: Vec::new(),
			granule: 0,
			sequence: 0,
			first: true,
			continued: false,
			finished: false
		}
	}

	/// Writes a single bit to the current page's payload, least significant bit of
	/// a byte first.
	pub(crate) fn put_bit(&mut self, bit: bool) {
		if bit {
			self.bit_buffer |= 1 << self.bits_stored;
		}

		self.bits_stored += 1;

		if self.bits_stored == 8 {
			self.payload.push(self.bit_buffer);
			self.bit_buffer = 0;
			self.bits_stored = 0;
		}
	}

	/// Writes the `width` least significant bits of `value`, LSB first, `width <= 32`.
	pub(crate) fn write_bits(&mut self, value: u32, width: u8) {
		debug_assert!(width <= 32);

		for i in 0..width {
			self.put_bit((value >> i) & 1 != 0);
		}
	}

	/// Writes a single bitpacked flag.
	pub(crate) fn write_flag(&mut self, flag: bool) {
		self.put_bit(flag);
	}

	/// Writes consecutive whole bytes. A no-op convenience over repeated 8-bit
	/// [`Self::write_bits`] calls for byte-aligned payload copies.
	pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
		for &byte in bytes {
			self.write_bits(byte as u32, 8);
		}
	}

	/// Sets the granule position that will be written in the header of the next
	/// emitted page. Sticky across empty flushes, i.e. it survives until changed
	/// again or another page is actually written.
	pub(crate) fn set_granule(&mut self, granule: u64) {
		self.granule = granule;
	}

	fn flush_bit_buffer(&mut self) {
		if self.bits_stored != 0 {
			self.payload.push(self.bit_buffer);
			self.bit_buffer = 0;
			self.bits_stored = 0;
		}
	}

	/// Emits exactly one Ogg page if the current payload is non-empty, draining the
	/// bit buffer first. `next_continued` sets the `continued` flag that the
	/// following page will be written with; `last` marks this as the final page of
	/// the logical stream.
	pub(crate) fn flush_page(&mut self, next_continued: bool, last: bool) -> io::Result<()> {
		self.flush_bit_buffer();

		if self.payload.is_empty() {
			return Ok(());
		}

		if self.payload.len() > MAX_PAYLOAD_LEN {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"Ogg packet payload exceeds the maximum representable page size"
			));
		}

		let payload_len = self.payload.len();
		let full_segments = payload_len / 255;
		let remainder = (payload_len % 255) as u8;

		// A full page of exactly 255 * 255 bytes has no room left for a terminating
		// lacing value; such a packet must continue onto the next page
		let (segment_count, needs_terminator) = if full_segments == MAX_SEGMENTS && remainder == 0 {
			(MAX_SEGMENTS, false)
		} else {
			(full_segments + 1, true)
		};

		let mut page = Vec::with_capacity(HEADER_LEN + segment_count + payload_len);

		page.extend_from_slice(b"OggS");
		page.push(0); // stream structure version

		let header_type = (self.continued as u8)
			| ((self.first as u8) << 1)
			| ((last as u8) << 2);
		page.push(header_type);

		page.extend_from_slice(&self.granule.to_le_bytes());
		page.extend_from_slice(&1u32.to_le_bytes()); // fixed stream serial
		page.extend_from_slice(&self.sequence.to_le_bytes());
		page.extend_from_slice(&0u32.to_le_bytes()); // checksum placeholder

		page.push(segment_count as u8);

		for _ in 0..full_segments {
			page.push(255);
		}
		if needs_terminator {
			page.push(remainder);
		}

		page.extend_from_slice(&self.payload);

		let crc = crc::checksum(&page);
		page[22..26].copy_from_slice(&crc.to_le_bytes());

		trace!(
			"Flushing Ogg page #{} ({} payload bytes, granule {}, continued={}, last={})",
			self.sequence, payload_len, self.granule, self.continued, last
		);

		self.sink
			.as_mut()
			.expect("OggPageWriter used after into_inner")
			.write_all(&page)?;

		self.sequence += 1;
		self.first = false;
		self.continued = next_continued;
		self.payload.clear();

		if last {
			self.finished = true;
		}

		Ok(())
	}

	/// Consumes the writer, returning the wrapped sink. Any buffered payload is
	/// flushed as a non-final page first, unless a final page was already flushed.
	pub(crate) fn into_inner(mut self) -> io::Result<W> {
		if !self.finished {
			self.flush_page(false, false)?;
		}

		Ok(self.sink.take().expect("sink taken twice"))
	}
}

impl<W: Write> Drop for OggPageWriter<W> {
	fn drop(&mut self) {
		if self.sink.is_some() && !self.finished {
			let _ = self.flush_page(false, false);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn page_at(bytes: &[u8], offset: usize) -> &[u8] {
		&bytes[offset..]
	}

	#[test]
	fn emits_nothing_for_an_empty_page() {
		let mut out = Vec::new();
		let mut writer = OggPageWriter::new(&mut out);
		writer.flush_page(false, false).unwrap();
		assert!(out.is_empty());
	}

	#[test]
	fn single_small_page_has_correct_framing_and_crc() {
		let mut out = Vec::new();
		{
			let mut writer = OggPageWriter::new(&mut out);
			writer.set_granule(0);
			writer.write_bytes(&[1, 2, 3]);
			writer.flush_page(false, true).unwrap();
		}

		assert_eq!(&out[0..4], b"OggS");
		assert_eq!(out[4], 0);
		assert_eq!(out[5], 0b011, "first and last flags should be set");
		assert_eq!(out[26], 1, "one lacing segment for a 3-byte payload");
		assert_eq!(out[27], 3, "lacing value equals the payload length");
		assert_eq!(&out[28..31], &[1, 2, 3]);

		let mut crc_zeroed = out.clone();
		crc_zeroed[22..26].fill(0);
		let expected_crc = crc::checksum(&crc_zeroed);
		assert_eq!(&out[22..26], &expected_crc.to_le_bytes());
	}

	#[test]
	fn sequence_numbers_increment_with_no_gaps() {
		let mut out = Vec::new();
		{
			let mut writer = OggPageWriter::new(&mut out);
			for i in 0..3u32 {
				writer.write_bytes(&[i as u8]);
				writer.flush_page(false, i == 2).unwrap();
			}
		}

		// Locate the sequence number field (offset 18) of each of the three pages
		// by walking the lacing-derived payload lengths
		let mut offset = 0;
		for expected_seq in 0u32..3 {
			let page = page_at(&out, offset);
			let segment_count = page[26] as usize;
			let payload_len: usize = page[27..27 + segment_count]
				.iter()
				.map(|&b| b as usize)
				.sum();
			let seq = u32::from_le_bytes(page[18..22].try_into().unwrap());
			assert_eq!(seq, expected_seq);
			offset += HEADER_LEN + segment_count + payload_len;
		}
		assert_eq!(offset, out.len());
	}

	#[test]
	fn full_page_has_no_terminator_and_requests_continuation() {
		let mut out = Vec::new();
		{
			let mut writer = OggPageWriter::new(&mut out);
			writer.write_bytes(&vec![0xAB; MAX_PAYLOAD_LEN]);
			writer.flush_page(true, false).unwrap();
		}

		assert_eq!(out[26], 255, "255 lacing segments, all valued 255");
		assert!(out[27..27 + 255].iter().all(|&b| b == 255));
	}
}
