//! The audio packet rewriter: walks every packet after the setup header, writes a
//! granule position for each (direct or synthesized from block sizes) and rewrites
//! the packet body (byte-aligned passthrough, or packet-type/mode/window-transition
//! bits reconstructed for mod-packets framing).

use std::io::Write;

use vorbis_bitpack::BitpackReader;

use crate::error::WemToOggError;
use crate::ogg::OggPageWriter;
use crate::packet::{PacketFraming, PacketIter};
use crate::riff::Endianness;
use crate::setup::SetupResult;
use crate::util::{read_uint, width};

const GRANULE_SENTINEL: u32 = 0xFFFF_FFFF;

/// Extracts the mode number encoded in a packet's first byte, without consuming it
/// from a bit reader: `mod_packets` packets carry the mode at bit 0, others carry it
/// just past the packet-type bit.
fn mode_number(first_byte: u8, mod_packets: bool, mode_bits: u32) -> u32 {
	let shifted = if mod_packets { first_byte as u32 } else { (first_byte as u32) >> 1 };
	let mask = (1u32 << mode_bits) - 1;
	shifted & mask
}

/// Rewrites every audio packet in `data[start_offset..]`, framed as `framing`, into
/// one Ogg page each.
pub(crate) fn rewrite<W: Write>(
	data: &[u8],
	endianness: Endianness,
	framing: PacketFraming,
	start_offset: usize,
	no_granule: bool,
	mod_packets: bool,
	sample_count: u32,
	blocksize0_pow: u8,
	blocksize1_pow: u8,
	setup: &SetupResult,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	let blocksize0 = 1u32 << blocksize0_pow;
	let blocksize1 = 1u32 << blocksize1_pow;

	let mut iter = PacketIter::new(data, endianness, framing, start_offset, data.len());

	let mut prev_blocksize: Option<u32> = None;
	let mut granule_accumulator: u64 = 0;
	let mut prev_blockflag = false;

	while let Some(frame) = iter.next_frame()? {
		let payload = iter.payload(&frame);

		let granule = if !no_granule {
			if frame.granule != GRANULE_SENTINEL { frame.granule as u64 } else { 1 }
		} else {
			let curr_blockflag = if payload.is_empty() {
				false
			} else {
				let mode = mode_number(payload[0], mod_packets, setup.mode_bits);
				*setup.mode_blockflag.get(mode as usize).unwrap_or(&false)
			};
			let curr = if curr_blockflag { blocksize1 } else { blocksize0 };

			match prev_blocksize {
				None => {
					prev_blocksize = Some(curr);
				}
				Some(prev) => {
					granule_accumulator += (prev as u64 + curr as u64) / 4;
					prev_blocksize = Some(curr);
				}
			}

			if frame.is_last {
				if sample_count > 0 { sample_count as u64 } else { granule_accumulator }
			} else {
				granule_accumulator
			}
		};

		sink.set_granule(granule);

		if mod_packets {
			rewrite_mod_packet_body(payload, &mut iter, setup, &mut prev_blockflag, sink)?;
		} else {
			for &byte in payload {
				sink.write_bits(byte as u32, 8);
			}
		}

		sink.flush_page(false, frame.is_last)?;
	}

	Ok(())
}

fn rewrite_mod_packet_body<W: Write>(
	payload: &[u8],
	iter: &mut PacketIter<'_>,
	setup: &SetupResult,
	prev_blockflag: &mut bool,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	sink.write_flag(false); // packet type 0: audio

	if payload.is_empty() {
		return Ok(());
	}

	let mut reader = BitpackReader::new(payload);

	let mode_number = read_uint(&mut reader, width(setup.mode_bits))?;
	sink.write_bits(mode_number, setup.mode_bits as u8);

	let remaining_first_byte_bits = 8 - setup.mode_bits;
	let first_byte_tail = read_uint(&mut reader, width(remaining_first_byte_bits))?;

	let current_blockflag = *setup.mode_blockflag.get(mode_number as usize).unwrap_or(&false);

	if current_blockflag {
		let next_blockflag = match iter.peek()? {
			Some(next_frame) if next_frame.size > 0 => {
				let next_payload = iter.payload(next_frame);
				let next_mode = mode_number_from_first_byte(next_payload[0], setup.mode_bits);
				*setup.mode_blockflag.get(next_mode as usize).unwrap_or(&false)
			}
			_ => false
		};

		sink.write_flag(*prev_blockflag);
		sink.write_flag(next_blockflag);
	}

	*prev_blockflag = current_blockflag;

	sink.write_bits(first_byte_tail, remaining_first_byte_bits as u8);

	for &byte in &payload[1..] {
		sink.write_bits(byte as u32, 8);
	}

	Ok(())
}

/// `mod_packets` is always true wherever this is called from (only `mod_packets`
/// streams ever reconstruct window-transition bits), so the mode sits at bit 0.
fn mode_number_from_first_byte(first_byte: u8, mode_bits: u32) -> u32 {
	mode_number(first_byte, true, mode_bits)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::packet::PacketFraming;

	fn setup_with(mode_blockflag: Vec<bool>) -> SetupResult {
		let mode_bits = crate::util::ilog(mode_blockflag.len() as u32 - 1);
		SetupResult { mode_blockflag, mode_bits }
	}

	#[test]
	fn mode_number_shifts_for_non_mod_packets() {
		// packet type bit 0, mode bits "10" (2), nothing else set
		let byte = 0b0000_0101u8;
		assert_eq!(mode_number(byte, false, 2), 0b10);
		assert_eq!(mode_number(byte, true, 2), 0b01);
	}

	#[test]
	fn direct_granule_maps_sentinel_to_one() {
		let setup = setup_with(vec![false]);
		let mut data = Vec::new();
		data.extend_from_slice(&2u16.to_le_bytes());
		data.extend_from_slice(&GRANULE_SENTINEL.to_le_bytes());
		data.extend_from_slice(&[0xAA, 0xBB]);

		let mut out = Vec::new();
		{
			let mut sink = OggPageWriter::new(&mut out);
			rewrite(
				&data,
				Endianness::Little,
				PacketFraming::ModernWithGranule,
				0,
				false,
				false,
				0,
				8,
				11,
				&setup,
				&mut sink
			)
			.unwrap();
		}

		let granule = u64::from_le_bytes(out[6..14].try_into().unwrap());
		assert_eq!(granule, 1);
	}

	#[test]
	fn synthesized_granule_primes_on_first_packet() {
		let setup = setup_with(vec![false]);
		// Two no-granule packets, mode 0 (short window) each, one byte of body
		let mut data = Vec::new();
		data.extend_from_slice(&1u16.to_le_bytes());
		data.push(0b0000_0000); // packet type 0, mode 0
		data.extend_from_slice(&1u16.to_le_bytes());
		data.push(0b0000_0000);

		let mut out = Vec::new();
		{
			let mut sink = OggPageWriter::new(&mut out);
			rewrite(
				&data,
				Endianness::Little,
				PacketFraming::ModernNoGranule,
				0,
				true,
				false,
				1000,
				8,
				11,
				&setup,
				&mut sink
			)
			.unwrap();
		}

		// First page (priming packet) carries granule 0
		let first_granule = u64::from_le_bytes(out[6..14].try_into().unwrap());
		assert_eq!(first_granule, 0);

		let segment_count = out[26] as usize;
		let first_page_len = 27 + segment_count + 1;
		let second_page = &out[first_page_len..];
		let second_granule = u64::from_le_bytes(second_page[6..14].try_into().unwrap());
		// Last packet with a nonzero sample_count writes sample_count, not the
		// accumulated (blocksize0+blocksize0)/4 sum
		assert_eq!(second_granule, 1000);
	}

	#[test]
	fn mod_packets_long_window_writes_prev_and_next_blockflag() {
		let setup = setup_with(vec![false, true]);

		// Packet 1: mode 0 (short). Packet 2: mode 1 (long). Packet 3: mode 0 (short).
		// mode_bits = ilog(1) = 1.
		let mut data = Vec::new();
		data.extend_from_slice(&1u16.to_le_bytes());
		data.push(0b0000_0000);
		data.extend_from_slice(&1u16.to_le_bytes());
		data.push(0b0000_0001);
		data.extend_from_slice(&1u16.to_le_bytes());
		data.push(0b0000_0000);

		let mut out = Vec::new();
		{
			let mut sink = OggPageWriter::new(&mut out);
			rewrite(
				&data,
				Endianness::Little,
				PacketFraming::ModernNoGranule,
				0,
				true,
				true,
				0,
				8,
				11,
				&setup,
				&mut sink
			)
			.unwrap();
		}

		// Locate the second page's payload and check its first bits: type=0, mode=1,
		// prev_blockflag=0 (packet 1 was short), next_blockflag=0 (packet 3 is short)
		let first_segment_count = out[26] as usize;
		let first_page_len = 27 + first_segment_count + 1;
		let second_page = &out[first_page_len..];
		let second_segment_count = second_page[26] as usize;
		let second_payload = &second_page[27 + second_segment_count..];

		let byte = second_payload[0];
		assert_eq!(byte & 0b1, 0, "packet type bit");
		assert_eq!((byte >> 1) & 0b1, 1, "mode bit");
		assert_eq!((byte >> 2) & 0b1, 0, "prev blockflag");
		assert_eq!((byte >> 3) & 0b1, 0, "next blockflag");
	}

	#[test]
	fn empty_mod_packet_writes_only_the_type_bit() {
		let setup = setup_with(vec![false]);
		let mut data = Vec::new();
		data.extend_from_slice(&0u16.to_le_bytes()); // size 0

		let mut out = Vec::new();
		{
			let mut sink = OggPageWriter::new(&mut out);
			rewrite(
				&data,
				Endianness::Little,
				PacketFraming::ModernNoGranule,
				0,
				true,
				true,
				0,
				8,
				11,
				&setup,
				&mut sink
			)
			.unwrap();
		}

		// A single packet-type bit, flushed and padded to one byte
		let segment_count = out[26] as usize;
		let payload = &out[27 + segment_count..];
		assert_eq!(payload.len(), 1);
		assert_eq!(payload[0], 0);
	}
}
