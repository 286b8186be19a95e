//! RIFF/RIFX container parsing: chunk enumeration, `fmt`/`vorb` field extraction, and
//! `smpl` loop-point normalization.
//!
//! The whole input is read into memory up front (containers of this kind are small
//! compared to the audio streams they wrap elsewhere in Wwise's bank format), which
//! keeps every later component a plain byte-slice reader rather than a `Seek` user.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::error::WemToOggError;

/// Byte order the whole container was written in; follows the `RIFF`/`RIFX` magic and
/// is threaded through every later integer read in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endianness {
	Little,
	Big
}

impl Endianness {
	pub(crate) fn u16(self, bytes: &[u8]) -> u16 {
		match self {
			Self::Little => LittleEndian::read_u16(bytes),
			Self::Big => BigEndian::read_u16(bytes)
		}
	}

	pub(crate) fn u32(self, bytes: &[u8]) -> u32 {
		match self {
			Self::Little => LittleEndian::read_u32(bytes),
			Self::Big => BigEndian::read_u32(bytes)
		}
	}
}

/// The `fmt` chunk's GUID signature for the `0x28`-byte extensible variant: a plain
/// literal check, not an interpreted subformat (see the crate-level design notes).
const GUID_SIGNATURE: [u8; 16] = [
	0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71
];

/// The Wwise sentinel codec id that every recognized `fmt` chunk must carry.
const WWISE_CODEC_ID: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Fmt {
	pub channels: u16,
	pub sample_rate: u32,
	pub avg_bytes_per_second: u32
}

/// Fields carried by the `vorb` chunk, or synthesized from the `fmt` chunk's extended
/// tail when no `vorb` chunk is present. Offsets of `setup_packet_offset` and
/// `first_audio_packet_offset` are relative to the start of the `data` chunk's payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Vorb {
	pub sample_count: u32,
	pub setup_packet_offset: u32,
	pub first_audio_packet_offset: u32,
	pub blocksize0_pow: u8,
	pub blocksize1_pow: u8,
	/// Packet headers omit the granule position; it must be synthesized from block sizes.
	pub no_granule: bool,
	/// Audio packets omit the standard packet-type bit and carry only mode bits.
	pub mod_packets: bool,
	/// The three Vorbis header packets are present verbatim in the container, framed
	/// with legacy 8-byte packet headers, rather than needing to be synthesized.
	pub header_triad_present: bool
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopPoints {
	pub loop_start: u32,
	pub loop_end: u32
}

pub(crate) struct Container {
	pub endianness: Endianness,
	pub fmt: Fmt,
	pub vorb: Vorb,
	pub loop_points: Option<LoopPoints>,
	/// The `data` chunk's payload. `vorb.setup_packet_offset` and
	/// `vorb.first_audio_packet_offset` index into this slice.
	pub data: Vec<u8>
}

/// Reads `source` to exhaustion and parses it as a RIFF/RIFX-wrapped Wwise container.
pub(crate) fn parse<R: Read>(mut source: R) -> Result<Container, WemToOggError> {
	let mut bytes = Vec::new();
	source.read_to_end(&mut bytes)?;
	parse_bytes(&bytes)
}

fn parse_bytes(bytes: &[u8]) -> Result<Container, WemToOggError> {
	if bytes.len() < 12 {
		return Err(WemToOggError::Parse("file is too small to contain a RIFF header".into()));
	}

	let endianness = match &bytes[0..4] {
		b"RIFF" => Endianness::Little,
		b"RIFX" => Endianness::Big,
		_ => return Err(WemToOggError::Parse("missing RIFF/RIFX magic".into()))
	};

	let riff_size = endianness.u32(&bytes[4..8]) as u64;
	if riff_size + 8 > bytes.len() as u64 {
		return Err(WemToOggError::Parse(
			"declared RIFF size exceeds the file's actual size".into()
		));
	}
	if &bytes[8..12] != b"WAVE" {
		return Err(WemToOggError::Parse("RIFF form type is not WAVE".into()));
	}

	let riff_end = (riff_size + 8) as usize;
	let mut offset = 12usize;

	let mut fmt_payload: Option<&[u8]> = None;
	let mut vorb_payload: Option<&[u8]> = None;
	let mut smpl_payload: Option<&[u8]> = None;
	let mut data_payload: Option<&[u8]> = None;

	while offset < riff_end {
		if offset + 8 > bytes.len() {
			return Err(WemToOggError::Parse("chunk header is truncated".into()));
		}

		let tag = &bytes[offset..offset + 4];
		let size = endianness.u32(&bytes[offset + 4..offset + 8]) as usize;
		let payload_start = offset + 8;
		let payload_end = payload_start
			.checked_add(size)
			.ok_or_else(|| WemToOggError::Parse("chunk size overflows the address space".into()))?;

		if payload_end > riff_end || payload_end > bytes.len() {
			return Err(WemToOggError::Parse("chunk extends past the RIFF boundary".into()));
		}

		let payload = &bytes[payload_start..payload_end];
		trace!("chunk {:?} at {offset:#x}, {size} bytes", tag_as_str(tag));

		match tag {
			b"fmt " => fmt_payload = Some(payload),
			b"vorb" => vorb_payload = Some(payload),
			b"smpl" => smpl_payload = Some(payload),
			b"data" => data_payload = Some(payload),
			b"cue " | b"LIST" => debug!("{:?} chunk present, contents ignored", tag_as_str(tag)),
			other => debug!("skipping unrecognized chunk {:?}", tag_as_str(other))
		}

		// RIFF chunks are padded to an even byte boundary
		offset = payload_end + (size % 2);
	}

	let fmt_payload =
		fmt_payload.ok_or_else(|| WemToOggError::Parse("missing required 'fmt ' chunk".into()))?;
	let data_payload =
		data_payload.ok_or_else(|| WemToOggError::Parse("missing required 'data' chunk".into()))?;

	let (fmt, synthesized_vorb) = parse_fmt(endianness, fmt_payload)?;

	let vorb = match (synthesized_vorb, vorb_payload) {
		(Some(embedded), _) => parse_vorb(endianness, embedded, VorbLayout::Synthesized)?,
		(None, Some(payload)) => {
			let layout = vorb_layout_for_size(payload.len())?;
			parse_vorb(endianness, payload, layout)?
		}
		(None, None) => {
			return Err(WemToOggError::Parse(
				"file has neither a 'vorb' chunk nor a fmt-embedded equivalent".into()
			));
		}
	};

	let loop_points = match smpl_payload {
		Some(payload) => Some(parse_loop_points(endianness, payload, vorb.sample_count)?),
		None => None
	};

	Ok(Container { endianness, fmt, vorb, loop_points, data: data_payload.to_vec() })
}

fn tag_as_str(tag: &[u8]) -> std::borrow::Cow<'_, str> {
	String::from_utf8_lossy(tag)
}

/// Parses the `fmt` chunk. Returns the extracted fields, plus, for the `0x42`-byte
/// extended variant, the slice of fmt-embedded bytes that stand in for a `vorb` chunk
/// (the vorb-equivalent fields live at `fmt_offset + 0x18`).
fn parse_fmt<'a>(
	endianness: Endianness,
	payload: &'a [u8]
) -> Result<(Fmt, Option<&'a [u8]>), WemToOggError> {
	let fmt_size = payload.len();
	if ![0x12, 0x18, 0x28, 0x42].contains(&fmt_size) {
		return Err(WemToOggError::Parse(format!("unrecognized fmt chunk size {fmt_size:#x}")));
	}

	if endianness.u16(&payload[0..2]) != WWISE_CODEC_ID {
		return Err(WemToOggError::Parse("fmt codec id is not the Wwise sentinel 0xFFFF".into()));
	}

	let channels = endianness.u16(&payload[2..4]);
	let sample_rate = endianness.u32(&payload[4..8]);
	let avg_bytes_per_second = endianness.u32(&payload[8..12]);

	if fmt_size == 0x28 {
		let guid = &payload[0x18..0x18 + 16];
		if guid != GUID_SIGNATURE {
			return Err(WemToOggError::Parse(
				"fmt chunk is missing its expected GUID signature".into()
			));
		}
	}

	let fmt = Fmt { channels, sample_rate, avg_bytes_per_second };
	let embedded_vorb = (fmt_size == 0x42).then(|| &payload[0x18..]);

	Ok((fmt, embedded_vorb))
}

/// Selects which byte layout a `vorb` chunk follows, purely from its declared size.
#[derive(Debug, Clone, Copy)]
enum VorbLayout {
	/// No real `vorb` chunk; fields synthesized from the `fmt` chunk's extended tail.
	/// Shares its byte layout with [`Self::NoGranule`].
	Synthesized,
	/// Size `0x2A`.
	NoGranule,
	/// Size `0x28`: legacy header-triad framing.
	TriadOld,
	/// Size `0x2C`: header-triad framing.
	Triad,
	/// Sizes `0x32`, `0x34`: modern framing with an explicit per-packet granule.
	Modern
}

fn vorb_layout_for_size(size: usize) -> Result<VorbLayout, WemToOggError> {
	match size {
		0x28 => Ok(VorbLayout::TriadOld),
		0x2A => Ok(VorbLayout::NoGranule),
		0x2C => Ok(VorbLayout::Triad),
		0x32 | 0x34 => Ok(VorbLayout::Modern),
		other => Err(WemToOggError::Parse(format!("unrecognized vorb chunk size {other:#x}")))
	}
}

fn read_u32_at(payload: &[u8], endianness: Endianness, offset: usize) -> Result<u32, WemToOggError> {
	payload
		.get(offset..offset + 4)
		.map(|slice| endianness.u32(slice))
		.ok_or_else(|| WemToOggError::Parse("vorb-equivalent data is too short for its layout".into()))
}

fn read_u8_at(payload: &[u8], offset: usize) -> Result<u8, WemToOggError> {
	payload
		.get(offset)
		.copied()
		.ok_or_else(|| WemToOggError::Parse("vorb-equivalent data is too short for its layout".into()))
}

/// Values of the signal word at `vorb + 4` that mark standard (non-mod) packet
/// framing; any other value means mod packets are in use.
const STANDARD_PACKET_SIGNALS: [u32; 4] = [0x4A, 0x4B, 0x69, 0x70];

fn parse_vorb(endianness: Endianness, payload: &[u8], layout: VorbLayout) -> Result<Vorb, WemToOggError> {
	let sample_count = read_u32_at(payload, endianness, 0x00)?;

	match layout {
		VorbLayout::Synthesized | VorbLayout::NoGranule => {
			let mod_signal = read_u32_at(payload, endianness, 0x04)?;
			let setup_packet_offset = read_u32_at(payload, endianness, 0x10)?;
			let first_audio_packet_offset = read_u32_at(payload, endianness, 0x14)?;
			let blocksize0_pow = read_u8_at(payload, 0x28)?;
			let blocksize1_pow = read_u8_at(payload, 0x29)?;

			Ok(Vorb {
				sample_count,
				setup_packet_offset,
				first_audio_packet_offset,
				blocksize0_pow,
				blocksize1_pow,
				no_granule: true,
				mod_packets: !STANDARD_PACKET_SIGNALS.contains(&mod_signal),
				header_triad_present: false
			})
		}
		VorbLayout::TriadOld => {
			let setup_packet_offset = read_u32_at(payload, endianness, 0x18)?;
			let first_audio_packet_offset = read_u32_at(payload, endianness, 0x1c)?;
			let blocksize0_pow = read_u8_at(payload, 0x24)?;
			let blocksize1_pow = read_u8_at(payload, 0x25)?;

			Ok(Vorb {
				sample_count,
				setup_packet_offset,
				first_audio_packet_offset,
				blocksize0_pow,
				blocksize1_pow,
				no_granule: false,
				mod_packets: false,
				header_triad_present: true
			})
		}
		VorbLayout::Triad => {
			let setup_packet_offset = read_u32_at(payload, endianness, 0x1c)?;
			let first_audio_packet_offset = read_u32_at(payload, endianness, 0x20)?;
			let blocksize0_pow = read_u8_at(payload, 0x28)?;
			let blocksize1_pow = read_u8_at(payload, 0x29)?;

			Ok(Vorb {
				sample_count,
				setup_packet_offset,
				first_audio_packet_offset,
				blocksize0_pow,
				blocksize1_pow,
				no_granule: false,
				mod_packets: false,
				header_triad_present: true
			})
		}
		VorbLayout::Modern => {
			let setup_packet_offset = read_u32_at(payload, endianness, 0x10)?;
			let first_audio_packet_offset = read_u32_at(payload, endianness, 0x14)?;
			let blocksize0_pow = read_u8_at(payload, 0x28)?;
			let blocksize1_pow = read_u8_at(payload, 0x29)?;

			Ok(Vorb {
				sample_count,
				setup_packet_offset,
				first_audio_packet_offset,
				blocksize0_pow,
				blocksize1_pow,
				no_granule: false,
				mod_packets: false,
				header_triad_present: false
			})
		}
	}
}

/// Parses and normalizes the `smpl` chunk's sole supported loop. Wwise's `smpl` layout
/// matches the canonical RIFF `smpl` chunk: a 36-byte fixed header (ending in the loop
/// count at offset 0x1C) followed by 24-byte loop entries.
fn parse_loop_points(
	endianness: Endianness,
	payload: &[u8],
	sample_count: u32
) -> Result<LoopPoints, WemToOggError> {
	if payload.len() < 36 {
		return Err(WemToOggError::Parse("smpl chunk is too short for its fixed header".into()));
	}

	let loop_count = read_u32_at(payload, endianness, 0x1C)?;
	if loop_count != 1 {
		return Err(WemToOggError::Parse(format!(
			"smpl chunk declares {loop_count} loops; exactly one is supported"
		)));
	}

	if payload.len() < 36 + 24 {
		return Err(WemToOggError::Parse("smpl chunk is too short for its loop entry".into()));
	}

	let loop_start = read_u32_at(payload, endianness, 36 + 8)?;
	let raw_loop_end = read_u32_at(payload, endianness, 36 + 12)?;
	let loop_end = if raw_loop_end == 0 { sample_count } else { raw_loop_end + 1 };

	if !(loop_start < sample_count && loop_end <= sample_count && loop_start <= loop_end) {
		return Err(WemToOggError::Parse(
			"smpl loop points are inconsistent with the sample count".into()
		));
	}

	Ok(LoopPoints { loop_start, loop_end })
}

#[cfg(test)]
mod test {
	use super::*;

	fn little_endian_container(vorb_size: usize, extra_data: &[u8]) -> Vec<u8> {
		let mut fmt = vec![0xFFu8, 0xFF, 1, 0]; // codec id, mono
		fmt.extend_from_slice(&48_000u32.to_le_bytes()); // sample_rate
		fmt.extend_from_slice(&6_000u32.to_le_bytes()); // avg_bytes_per_second
		fmt.extend_from_slice(&0u16.to_le_bytes()); // block_align
		fmt.extend_from_slice(&0u16.to_le_bytes()); // bits_per_sample
		assert_eq!(fmt.len(), 0x12);

		let mut vorb = vec![0u8; vorb_size];
		vorb[0..4].copy_from_slice(&1000u32.to_le_bytes()); // sample_count
		vorb[0x10..0x14].copy_from_slice(&0u32.to_le_bytes()); // setup_packet_offset
		vorb[0x14..0x18].copy_from_slice(&4u32.to_le_bytes()); // first_audio_packet_offset
		vorb[0x28] = 8; // blocksize0_pow
		vorb[0x29] = 11; // blocksize1_pow

		let mut bytes = Vec::new();
		bytes.extend_from_slice(b"RIFF");
		bytes.extend_from_slice(&0u32.to_le_bytes()); // patched below
		bytes.extend_from_slice(b"WAVE");

		bytes.extend_from_slice(b"fmt ");
		bytes.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
		bytes.extend_from_slice(&fmt);

		bytes.extend_from_slice(b"vorb");
		bytes.extend_from_slice(&(vorb.len() as u32).to_le_bytes());
		bytes.extend_from_slice(&vorb);

		bytes.extend_from_slice(b"data");
		bytes.extend_from_slice(&(extra_data.len() as u32).to_le_bytes());
		bytes.extend_from_slice(extra_data);

		let riff_size = (bytes.len() - 8) as u32;
		bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());
		bytes
	}

	#[test]
	fn parses_a_minimal_no_granule_container() {
		let bytes = little_endian_container(0x2A, &[1, 2, 3, 4, 5]);
		let container = parse_bytes(&bytes).unwrap();

		assert_eq!(container.endianness, Endianness::Little);
		assert_eq!(container.fmt.channels, 1);
		assert_eq!(container.fmt.sample_rate, 48_000);
		assert_eq!(container.vorb.sample_count, 1000);
		assert_eq!(container.vorb.setup_packet_offset, 0);
		assert_eq!(container.vorb.first_audio_packet_offset, 4);
		assert_eq!(container.vorb.blocksize0_pow, 8);
		assert_eq!(container.vorb.blocksize1_pow, 11);
		assert!(container.vorb.no_granule);
		assert!(!container.vorb.header_triad_present);
		assert_eq!(container.data, &[1, 2, 3, 4, 5]);
	}

	#[test]
	fn rejects_bad_magic() {
		let mut bytes = little_endian_container(0x2A, &[]);
		bytes[0] = b'X';
		assert!(matches!(parse_bytes(&bytes), Err(WemToOggError::Parse(_))));
	}

	#[test]
	fn rejects_truncated_riff_size() {
		let mut bytes = little_endian_container(0x2A, &[]);
		bytes[4..8].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
		assert!(matches!(parse_bytes(&bytes), Err(WemToOggError::Parse(_))));
	}

	#[test]
	fn missing_data_chunk_is_a_parse_error() {
		let mut bytes = little_endian_container(0x2A, &[]);
		// Corrupt the "data" tag so the chunk is skipped as unrecognized
		let data_tag_offset = bytes.len() - 4 - 8;
		bytes[data_tag_offset..data_tag_offset + 4].copy_from_slice(b"xata");
		assert!(matches!(parse_bytes(&bytes), Err(WemToOggError::Parse(_))));
	}

	#[test]
	fn mod_packets_is_detected_from_the_signal_word() {
		let mut bytes = little_endian_container(0x2A, &[]);
		// vorb chunk starts right after fmt: RIFF(12) + "fmt "+size(8) + 0x12 + "vorb"+size(8)
		let vorb_payload_offset = 12 + 8 + 0x12 + 8;
		bytes[vorb_payload_offset + 4..vorb_payload_offset + 8].copy_from_slice(&0x4Au32.to_le_bytes());
		let container = parse_bytes(&bytes).unwrap();
		assert!(!container.vorb.mod_packets);
	}

	#[test]
	fn loop_end_zero_normalizes_to_sample_count() {
		let mut bytes = little_endian_container(0x2A, &[]);

		let mut smpl = vec![0u8; 36 + 24];
		smpl[0x1C..0x20].copy_from_slice(&1u32.to_le_bytes()); // loop_count
		smpl[36 + 8..36 + 12].copy_from_slice(&10u32.to_le_bytes()); // loop_start
		smpl[36 + 12..36 + 16].copy_from_slice(&0u32.to_le_bytes()); // loop_end == 0

		// Splice an "smpl" chunk in right before "data"
		let data_chunk_start = bytes.len() - 8;
		let mut spliced = bytes[..data_chunk_start].to_vec();
		spliced.extend_from_slice(b"smpl");
		spliced.extend_from_slice(&(smpl.len() as u32).to_le_bytes());
		spliced.extend_from_slice(&smpl);
		spliced.extend_from_slice(&bytes[data_chunk_start..]);
		let riff_size = (spliced.len() - 8) as u32;
		spliced[4..8].copy_from_slice(&riff_size.to_le_bytes());

		let container = parse_bytes(&spliced).unwrap();
		let loop_points = container.loop_points.unwrap();
		assert_eq!(loop_points.loop_start, 10);
		assert_eq!(loop_points.loop_end, 1000);
	}
}
