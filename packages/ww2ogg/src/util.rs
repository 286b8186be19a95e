//! Small numeric helpers, and fallible-bit-read wrappers, shared by several
//! components of the rewriter.

use std::io::Read;

use vorbis_bitpack::{BitpackReader, BitpackedIntegerWidth};

use crate::error::{WemToOggError, map_eof_to_end_of_stream};

/// `ilog(v)`, as defined by the Vorbis I specification, section 9.2.1: the position
/// of the highest set bit, one-indexed, or `0` for `v == 0`.
///
/// Equivalently, `ilog(v) = floor(log2(v)) + 1` for `v > 0`.
pub(crate) const fn ilog(v: u32) -> u32 {
	32 - v.leading_zeros()
}

/// Reads a bitpacked unsigned integer, mapping an exhausted source to
/// [`WemToOggError::EndOfStream`] rather than a bare I/O error, per this crate's bit
/// reader contract.
pub(crate) fn read_uint<R: Read>(
	reader: &mut BitpackReader<R>,
	width: BitpackedIntegerWidth
) -> Result<u32, WemToOggError> {
	reader
		.read_unsigned_integer(width)
		.map_err(map_eof_to_end_of_stream)
}

/// Reads a single bitpacked flag, mapping an exhausted source to
/// [`WemToOggError::EndOfStream`].
pub(crate) fn read_flag<R: Read>(reader: &mut BitpackReader<R>) -> Result<bool, WemToOggError> {
	reader.read_flag().map_err(map_eof_to_end_of_stream)
}

/// Wraps a bit count (such as one returned by [`ilog`]) as a [`BitpackedIntegerWidth`].
/// `bits` is always in `0..=32` for every caller in this crate, so the conversion
/// cannot fail.
pub(crate) fn width(bits: u32) -> BitpackedIntegerWidth {
	BitpackedIntegerWidth::new(bits as u8).expect("bit widths used in this crate never exceed 32")
}

#[cfg(test)]
mod test {
	use super::ilog;

	#[test]
	fn ilog_works() {
		assert_eq!(ilog(0), 0);
		assert_eq!(ilog(1), 1);
		assert_eq!(ilog(2), 2);
		assert_eq!(ilog(3), 2);
		assert_eq!(ilog(4), 3);
		assert_eq!(ilog(7), 3);
		assert_eq!(ilog(8), 4);
		assert_eq!(ilog(u32::MAX), 32);
	}

	#[test]
	fn ilog_matches_its_defining_law() {
		for v in 1u32..=4096 {
			let bits = ilog(v);
			assert!(2u64.pow(bits - 1) <= v as u64);
			assert!((v as u64) < 2u64.pow(bits));
		}
	}
}
