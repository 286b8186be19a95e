//! Contains the error type returned by every fallible operation in this crate.

use std::io;

use thiserror::Error;

/// Every way a Wwise-to-Ogg Vorbis conversion can fail.
///
/// Variant names intentionally mirror the vocabulary used to reason about the
/// conversion (container parsing, codebook rebuilding, bitstream framing)
/// rather than any particular caller's error taxonomy.
#[derive(Debug, Error)]
pub enum WemToOggError {
	/// A requested input could not be opened or read from.
	#[error("could not open input {0:?}")]
	FileOpen(String),

	/// The RIFF/RIFX container, or a bitpacked field within it, is structurally
	/// invalid: a bad magic, a truncated chunk, an out-of-range value, and so on.
	#[error("malformed input: {0}")]
	Parse(String),

	/// The decoded material is syntactically plausible, but inconsistent with the
	/// codebook library in use. Usually means the wrong codebook library (standard
	/// vs. aoTuV) was selected.
	#[error("codebook data is inconsistent with the selected codebook library: {0}")]
	Codebook(String),

	/// A setup packet referenced a codebook library index that the loaded library
	/// does not contain.
	#[error(
		"codebook library has no entry for index {0} (the file may need inline codebooks, or a \
		 different library)"
	)]
	InvalidCodebookId(u32),

	/// A stripped codebook's declared byte length did not match the number of bytes
	/// actually consumed while rebuilding it. Treated as a [`Self::Codebook`]-family
	/// error by callers that dispatch on error kind.
	#[error("stripped codebook declared {expected} bytes but rebuilding it consumed {actual}")]
	SizeMismatch {
		/// The byte length the stripped codebook declared for itself.
		expected: u64,
		/// The byte length actually consumed while rebuilding the codebook.
		actual: u64
	},

	/// The bit-level source was exhausted before a requested read could complete.
	#[error("bit stream ended before the requested read could be completed")]
	EndOfStream,

	/// An I/O failure from the underlying byte source or sink that carries no
	/// conversion-specific meaning of its own.
	#[error(transparent)]
	Io(#[from] io::Error)
}

impl WemToOggError {
	/// Returns `true` for the family of errors that point at a codebook library
	/// mismatch rather than a structurally broken input. Callers that try several
	/// codebook libraries in turn should only retry on this family, never on
	/// [`WemToOggError::Parse`] or [`WemToOggError::FileOpen`].
	pub fn is_codebook_family(&self) -> bool {
		matches!(
			self,
			Self::Codebook(_) | Self::InvalidCodebookId(_) | Self::SizeMismatch { .. }
		)
	}
}

/// Maps an I/O error into [`WemToOggError::EndOfStream`] when it signals that the
/// underlying source was exhausted, leaving every other I/O error untouched.
pub(crate) fn map_eof_to_end_of_stream(err: io::Error) -> WemToOggError {
	if err.kind() == io::ErrorKind::UnexpectedEof {
		WemToOggError::EndOfStream
	} else {
		WemToOggError::Io(err)
	}
}
