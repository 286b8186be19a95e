//! Codebook handling: a library of already-standard-form codebooks indexed by offset,
//! and the two ways a setup packet's codebook can reach the output stream.
//!
//! A Wwise setup packet selects each codebook one of three ways: by a 10-bit index
//! into a shared library of full, standard-form Vorbis codebooks (looked up and
//! relayed bit for bit); inline, in Wwise's own compacted encoding that abbreviates
//! the sync pattern and the dimensions/entries header (expanded back to standard
//! form here); or, under `--full-setup`, inline and already in standard form
//! (relayed the same way a library entry is).

use std::io::{Read, Write};
use std::sync::OnceLock;

use vorbis_bitpack::{BitpackReader, bitpacked_integer_width};

use crate::error::WemToOggError;
use crate::ogg::OggPageWriter;
use crate::util::{ilog, read_flag, read_uint, width};

/// Vorbis codebook sync pattern ("BCV"), Vorbis I spec section 3.2.1.
const CODEBOOK_SYNC: u32 = 0x564342;

/// A shared codebook library: a contiguous byte blob holding one or more full,
/// standard-form Vorbis codebooks back to back, indexed by an offset table.
///
/// An empty library (the [`Default`] value) is a valid configuration: it means every
/// setup packet in the input stores its codebooks inline, so no library lookups will
/// ever be attempted.
#[derive(Debug, Clone, Default)]
pub struct CodebookLibrary {
	data: Vec<u8>,
	/// Byte offset of the start of each codebook within `data`, plus one trailing
	/// sentinel equal to `data.len()`, so that codebook `i` spans
	/// `offsets[i]..offsets[i + 1]`.
	offsets: Vec<u32>
}

impl CodebookLibrary {
	/// A library with no codebooks in it.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Builds a library from a raw byte blob and its associated offset table.
	///
	/// `offsets` must be non-decreasing and its last entry must equal `data.len()`;
	/// this is the layout described in the crate documentation: a codebook file is
	/// the concatenation of per-codebook byte ranges followed by an offset table,
	/// the last four bytes of the file giving that table's own starting offset.
	pub fn from_raw_parts(data: Vec<u8>, offsets: Vec<u32>) -> Self {
		Self { data, offsets }
	}

	/// Number of codebooks held by this library.
	pub fn len(&self) -> usize {
		self.offsets.len().saturating_sub(1)
	}

	/// Whether this library holds no codebooks at all.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the raw bytes of library codebook `id`, already in standard,
	/// self-contained Vorbis form.
	pub fn get_codebook(&self, id: u32) -> Result<&[u8], WemToOggError> {
		let index = id as usize;
		let start = *self
			.offsets
			.get(index)
			.ok_or(WemToOggError::InvalidCodebookId(id))? as usize;
		let end = *self
			.offsets
			.get(index + 1)
			.ok_or(WemToOggError::InvalidCodebookId(id))? as usize;
		self.data
			.get(start..end)
			.ok_or(WemToOggError::InvalidCodebookId(id))
	}

	/// Parses a codebook library from the on-disk file format: the concatenation of
	/// per-codebook byte ranges, followed by a little-endian `u32` offset table whose
	/// own starting offset is given by the file's last four bytes.
	///
	/// Codebook count is `(file_size - table_offset) / 4 - 1`; the table's final entry
	/// is a sentinel equal to `table_offset` itself, so it doubles as the end offset of
	/// the last codebook.
	pub fn from_packed_bytes(bytes: &[u8]) -> Result<Self, WemToOggError> {
		if bytes.len() < 4 {
			return Err(WemToOggError::Parse(
				"codebook library file is too small to hold an offset table".into()
			));
		}

		let table_offset =
			u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap()) as usize;
		if table_offset > bytes.len() {
			return Err(WemToOggError::Parse(
				"codebook library's offset table starts past the end of the file".into()
			));
		}

		let table = &bytes[table_offset..];
		if table.len() % 4 != 0 {
			return Err(WemToOggError::Parse(
				"codebook library's offset table is not a whole number of entries".into()
			));
		}

		let offsets = table
			.chunks_exact(4)
			.map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
			.collect();

		Ok(Self::from_raw_parts(bytes[..table_offset].to_vec(), offsets))
	}
}

static EMBEDDED_DEFAULT_LIBRARY: OnceLock<CodebookLibrary> = OnceLock::new();
static EMBEDDED_AOTUV_LIBRARY: OnceLock<CodebookLibrary> = OnceLock::new();

/// The standard Vorbis reference encoder's bundled codebook set, matching the
/// reference converter's `packed_codebooks.bin`.
pub(crate) fn embedded_default_library() -> &'static CodebookLibrary {
	EMBEDDED_DEFAULT_LIBRARY.get_or_init(|| {
		CodebookLibrary::from_packed_bytes(include_bytes!("../resources/packed_codebooks.bin"))
			.expect("bundled default codebook library is well-formed")
	})
}

/// The aoTuV encoder's bundled codebook set, matching the reference converter's
/// `packed_codebooks_aoTuV603.bin`.
pub(crate) fn embedded_aotuv_library() -> &'static CodebookLibrary {
	EMBEDDED_AOTUV_LIBRARY.get_or_init(|| {
		CodebookLibrary::from_packed_bytes(include_bytes!(
			"../resources/packed_codebooks_aotuv603.bin"
		))
		.expect("bundled aoTuV codebook library is well-formed")
	})
}

/// Relays a single standard-form codebook, reading it with `reader` and writing it
/// to `sink`, validating but not altering its structure.
///
/// Shared by [`from_library`] (the bytes come from a [`CodebookLibrary`] entry) and
/// [`copy`] (the bytes are the next bits of the setup packet itself, under
/// `--inline-codebooks` or `--full-setup`).
fn relay_standard_form<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	let sync = read_uint(reader, bitpacked_integer_width!(24))?;
	if sync != CODEBOOK_SYNC {
		return Err(WemToOggError::Codebook("codebook is missing its sync pattern".into()));
	}
	sink.write_bits(CODEBOOK_SYNC, 24);

	let dimensions = read_uint(reader, bitpacked_integer_width!(16))?;
	sink.write_bits(dimensions, 16);

	let entries = read_uint(reader, bitpacked_integer_width!(24))?;
	sink.write_bits(entries, 24);

	relay_codeword_lengths_standard(reader, sink, entries)?;
	relay_lookup_table_standard(reader, sink, entries, dimensions)
}

/// Relays the `ordered` run-length codeword length encoding shared, bit for bit, by
/// both the standard and Wwise-compacted codebook encodings: a 5-bit initial length,
/// then repeated `ilog(entries_remaining)`-bit run lengths until every entry has one.
fn relay_ordered_lengths<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>,
	entries: u32
) -> Result<(), WemToOggError> {
	let initial_length = read_uint(reader, bitpacked_integer_width!(5))?;
	sink.write_bits(initial_length, 5);

	let mut current_entry = 0u32;
	while current_entry < entries {
		let bits = ilog(entries - current_entry);
		let number = read_uint(reader, width(bits))?;
		sink.write_bits(number, bits as u8);
		current_entry += number;
	}
	if current_entry != entries {
		return Err(WemToOggError::Codebook(
			"ordered codeword lengths overran the codebook's entry count".into()
		));
	}

	Ok(())
}

/// Relays the codeword length table of an already standard-form codebook: the
/// `ordered` case is shared with the compact encoding, but unordered per-entry
/// lengths are a fixed 5 bits wide on both sides of the relay.
fn relay_codeword_lengths_standard<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>,
	entries: u32
) -> Result<(), WemToOggError> {
	let ordered = read_flag(reader)?;
	sink.write_flag(ordered);

	if ordered {
		return relay_ordered_lengths(reader, sink, entries);
	}

	let sparse = read_flag(reader)?;
	sink.write_flag(sparse);

	for _ in 0..entries {
		if sparse {
			let present = read_flag(reader)?;
			sink.write_flag(present);
			if present {
				let length = read_uint(reader, bitpacked_integer_width!(5))?;
				sink.write_bits(length, 5);
			}
		} else {
			let length = read_uint(reader, bitpacked_integer_width!(5))?;
			sink.write_bits(length, 5);
		}
	}

	Ok(())
}

/// Relays the codeword length table of a Wwise-compacted codebook: the `ordered`
/// case is identical to the standard encoding, but the unordered case is packed
/// tighter, at a declared width rather than a fixed 5 bits. Each length read is
/// already in "length minus one" form, the same as the standard 5-bit field, so it
/// only needs widening, not arithmetic, on the way out.
fn relay_codeword_lengths_stripped<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>,
	entries: u32
) -> Result<(), WemToOggError> {
	let ordered = read_flag(reader)?;
	sink.write_flag(ordered);

	if ordered {
		return relay_ordered_lengths(reader, sink, entries);
	}

	let codeword_length_length = read_uint(reader, bitpacked_integer_width!(3))?;
	if !(1..=5).contains(&codeword_length_length) {
		return Err(WemToOggError::Parse(format!(
			"stripped codebook codeword length width {codeword_length_length} is out of range [1, 5]"
		)));
	}
	let length_width = width(codeword_length_length);

	let sparse = read_flag(reader)?;
	sink.write_flag(sparse);

	for _ in 0..entries {
		if sparse {
			let present = read_flag(reader)?;
			sink.write_flag(present);
			if present {
				let length = read_uint(reader, length_width)?;
				sink.write_bits(length, 5);
			}
		} else {
			let length = read_uint(reader, length_width)?;
			sink.write_bits(length, 5);
		}
	}

	Ok(())
}

/// Relays the shared payload of a type 1 or type 2 VQ lookup table: min/delta
/// values, value width, the sequence flag, then `quant_values` quantized values.
fn relay_lookup_payload<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>,
	quant_values: u32
) -> Result<(), WemToOggError> {
	let min_value = read_uint(reader, bitpacked_integer_width!(32))?;
	sink.write_bits(min_value, 32);
	let delta_value = read_uint(reader, bitpacked_integer_width!(32))?;
	sink.write_bits(delta_value, 32);
	let value_bits = read_uint(reader, bitpacked_integer_width!(4))? + 1;
	sink.write_bits(value_bits - 1, 4);
	let sequence_p = read_flag(reader)?;
	sink.write_flag(sequence_p);

	for _ in 0..quant_values {
		let value = read_uint(reader, width(value_bits))?;
		sink.write_bits(value, value_bits as u8);
	}

	Ok(())
}

/// Relays the VQ lookup table of an already standard-form codebook: 4-bit type in
/// and out. Lookup type 2 is explicitly rejected, matching the reference converter,
/// which never produces or consumes it.
fn relay_lookup_table_standard<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>,
	entries: u32,
	dimensions: u32
) -> Result<(), WemToOggError> {
	let lookup_type = read_uint(reader, bitpacked_integer_width!(4))?;
	sink.write_bits(lookup_type, 4);

	match lookup_type {
		0 => Ok(()),
		1 => relay_lookup_payload(reader, sink, book_map_type1_quantvals(entries, dimensions)),
		2 => Err(WemToOggError::Parse("codebook lookup type 2 is not supported".into())),
		other => Err(WemToOggError::Parse(format!("unsupported codebook lookup type {other}")))
	}
}

/// Relays the VQ lookup table of a Wwise-compacted codebook: a single input bit
/// (`0` or `1`, the only two lookup types Wwise's compact encoding can express)
/// widened to the standard 4-bit output field.
fn relay_lookup_table_stripped<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>,
	entries: u32,
	dimensions: u32
) -> Result<(), WemToOggError> {
	let lookup_type = read_flag(reader)?;
	sink.write_bits(lookup_type as u32, 4);

	if lookup_type {
		relay_lookup_payload(reader, sink, book_map_type1_quantvals(entries, dimensions))
	} else {
		Ok(())
	}
}

/// Looks up library codebook `codebook_id` and relays it into `sink`, bit for bit.
/// The library stores codebooks already in standard, self-contained form, so this is
/// a structural walk rather than an expansion.
pub(crate) fn from_library<W: Write>(
	library: &CodebookLibrary,
	codebook_id: u32,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	let bytes = library.get_codebook(codebook_id)?;
	let mut reader = BitpackReader::new(bytes);
	relay_standard_form(&mut reader, sink)
}

/// Relays an already standard-form codebook found inline in the setup packet itself,
/// used under `--inline-codebooks` for a file whose codebooks are self-contained, or
/// under `--full-setup` where every codebook is assumed to already be in standard form.
pub(crate) fn copy<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	relay_standard_form(reader, sink)
}

/// Expands a single codebook from Wwise's compact inline encoding (4-bit dimensions,
/// 14-bit entries, no sync pattern) into the standard form, reading directly from the
/// setup packet's own bit reader.
///
/// When `codebook_size` is given (the codebook's declared length in bytes, from the
/// setup packet framing), the number of bits consumed from `reader` is checked against
/// it once the codebook has been fully read: the reference converter's own rebuild
/// pads by one implicit byte, so the expected value is `total_bits_read / 8 + 1`
/// rather than a plain `ceil`.
pub(crate) fn rebuild<R: Read, W: Write>(
	reader: &mut BitpackReader<R>,
	codebook_size: Option<u64>,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	let bits_before = reader.total_bits_read();

	let dimensions = reader.read_unsigned_integer(bitpacked_integer_width!(4))? as u32;
	let entries = reader.read_unsigned_integer(bitpacked_integer_width!(14))?;

	sink.write_bits(CODEBOOK_SYNC, 24);
	sink.write_bits(dimensions, 16);
	sink.write_bits(entries, 24);

	relay_codeword_lengths_stripped(reader, sink, entries)?;
	relay_lookup_table_stripped(reader, sink, entries, dimensions)?;

	if let Some(expected) = codebook_size {
		let bits_read = reader.total_bits_read() - bits_before;
		let actual = bits_read / 8 + 1;
		if actual != expected {
			return Err(WemToOggError::SizeMismatch { expected, actual });
		}
	}

	Ok(())
}

/// Number of distinct quantized values needed for a type 1 (lattice) VQ lookup table:
/// the unique `vals` such that `vals ^ dimensions <= entries < (vals + 1) ^ dimensions`.
///
/// Vorbis I spec section 3.2.1, `book_maptype1_quantvals`.
pub(crate) fn book_map_type1_quantvals(entries: u32, dimensions: u32) -> u32 {
	if dimensions == 0 || entries == 0 {
		return 0;
	}

	let bits = ilog(entries);
	let mut vals = entries >> (((bits - 1) * (dimensions - 1)) / dimensions);

	while (vals as u64).pow(dimensions) > entries as u64 {
		vals -= 1;
	}
	while ((vals + 1) as u64).pow(dimensions) <= entries as u64 {
		vals += 1;
	}

	vals
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn empty_library_has_no_codebooks() {
		let library = CodebookLibrary::empty();
		assert!(library.is_empty());
		assert_eq!(library.len(), 0);
	}

	#[test]
	fn from_raw_parts_reports_correct_length() {
		let library = CodebookLibrary::from_raw_parts(vec![0; 10], vec![0, 4, 10]);
		assert_eq!(library.len(), 2);
		assert_eq!(library.get_codebook(0).unwrap().len(), 4);
		assert_eq!(library.get_codebook(1).unwrap().len(), 6);
	}

	#[test]
	fn from_packed_bytes_parses_a_single_codebook() {
		let mut data = vec![0xAAu8; 7];
		data.extend_from_slice(&0u32.to_le_bytes());
		data.extend_from_slice(&7u32.to_le_bytes());

		let library = CodebookLibrary::from_packed_bytes(&data).unwrap();
		assert_eq!(library.len(), 1);
		assert_eq!(library.get_codebook(0).unwrap(), &[0xAA; 7][..]);
	}

	#[test]
	fn from_packed_bytes_empty_library_has_no_codebooks() {
		let library = CodebookLibrary::from_packed_bytes(&0u32.to_le_bytes()).unwrap();
		assert!(library.is_empty());
	}

	#[test]
	fn embedded_libraries_parse_without_panicking() {
		assert!(embedded_default_library().is_empty());
		assert!(embedded_aotuv_library().is_empty());
	}

	#[test]
	fn lookup_of_out_of_range_id_is_invalid_codebook_id() {
		let library = CodebookLibrary::from_raw_parts(vec![0; 4], vec![0, 4]);
		let err = library.get_codebook(5).unwrap_err();
		assert!(matches!(err, WemToOggError::InvalidCodebookId(5)));
	}

	#[test]
	fn quantvals_matches_known_values() {
		// A single-dimension lookup always needs exactly `entries` quantized values
		assert_eq!(book_map_type1_quantvals(256, 1), 256);
		// Two-dimensional 16x16 lattice covering 256 entries needs 16 quantized values
		assert_eq!(book_map_type1_quantvals(256, 2), 16);
	}

	#[test]
	fn quantvals_never_overshoots_entries() {
		for entries in [1u32, 2, 5, 17, 100, 1000, 12345] {
			for dimensions in 1u32..=8 {
				let vals = book_map_type1_quantvals(entries, dimensions);
				assert!((vals as u64).pow(dimensions) <= entries as u64);
				assert!(((vals + 1) as u64).pow(dimensions) > entries as u64);
			}
		}
	}

	/// Builds a tiny non-ordered, non-sparse, lookup-type-0 standard codebook with 4
	/// entries of 2 bits each and one dimension, and checks it relays unchanged.
	#[test]
	fn from_library_relays_a_minimal_codebook_unchanged() {
		let mut raw = Vec::new();
		{
			let mut writer = vorbis_bitpack::BitpackWriter::new(&mut raw);
			writer
				.write_unsigned_integer(CODEBOOK_SYNC, bitpacked_integer_width!(24))
				.unwrap();
			writer.write_unsigned_integer(1, bitpacked_integer_width!(16)).unwrap(); // dimensions
			writer.write_unsigned_integer(4, bitpacked_integer_width!(24)).unwrap(); // entries
			writer.write_flag(false).unwrap(); // not ordered
			writer.write_flag(false).unwrap(); // not sparse
			for length in [1u32, 2, 2, 3] {
				writer
					.write_unsigned_integer(length, bitpacked_integer_width!(5))
					.unwrap();
			}
			writer.write_unsigned_integer(0, bitpacked_integer_width!(4)).unwrap(); // lookup type 0
		}

		let library = CodebookLibrary::from_raw_parts(raw, vec![0, 0]);
		let bytes_len = library.data.len() as u32;
		let library = CodebookLibrary::from_raw_parts(library.data, vec![0, bytes_len]);

		let mut out = Vec::new();
		{
			let mut sink = OggPageWriter::new(&mut out);
			from_library(&library, 0, &mut sink).unwrap();
			sink.flush_page(false, true).unwrap();
		}

		// Reconstitute the payload bytes (skipping the page header and lacing) and
		// check the relayed codebook round-trips through a fresh reader
		let segment_count = out[26] as usize;
		let payload = &out[27 + segment_count..];
		let mut reader = BitpackReader::new(payload);
		assert_eq!(reader.read_unsigned_integer(bitpacked_integer_width!(24)).unwrap(), CODEBOOK_SYNC);
		assert_eq!(reader.read_unsigned_integer(bitpacked_integer_width!(16)).unwrap(), 1);
		assert_eq!(reader.read_unsigned_integer(bitpacked_integer_width!(24)).unwrap(), 4);
	}
}
