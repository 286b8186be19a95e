//! Contains the configuration surface accepted by a [`Converter`](crate::Converter).

use std::borrow::Cow;

use crate::codebook::{self, CodebookLibrary};

/// Overrides the autodetected `mod_packets` framing of audio packets (see the `vorb`
/// chunk discussion in the crate documentation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketFormatOverride {
	/// Use whatever the `vorb` chunk (or embedded `fmt` fields) indicates.
	#[default]
	Auto,
	/// Force mod-packet framing regardless of what was detected.
	ForceMod,
	/// Force standard packet framing regardless of what was detected.
	ForceNoMod
}

/// Selects where rebuilt codebooks are sourced from.
///
/// [`Self::EmbeddedDefault`] and [`Self::EmbeddedAoTuV`] resolve to codebook sets
/// bundled into this crate itself as `include_bytes!` blobs, matching the reference
/// converter's own bundled `packed_codebooks.bin`/`packed_codebooks_aoTuV603.bin`.
/// Loading a library from an arbitrary external resource (a file path chosen at run
/// time) is outside this crate's contract: [`Self::External`] only ever consumes an
/// already-loaded [`CodebookLibrary`]'s lookup interface.
#[derive(Debug, Clone, Default)]
pub enum CodebookSource {
	/// The standard Vorbis reference encoder's codebook set.
	#[default]
	EmbeddedDefault,
	/// The aoTuV encoder's codebook set.
	EmbeddedAoTuV,
	/// A codebook library supplied by the caller.
	External(CodebookLibrary),
	/// Codebooks are never looked up by index; every codebook in every setup packet
	/// is expected to be stored inline.
	InlineOnly
}

impl CodebookSource {
	/// Resolves this selection to the [`CodebookLibrary`] it names. `InlineOnly`
	/// resolves to an empty library: correct because it is only ever consulted when a
	/// setup packet has already been routed away from library lookups entirely.
	pub(crate) fn resolve(&self) -> Cow<'_, CodebookLibrary> {
		match self {
			Self::EmbeddedDefault => Cow::Borrowed(codebook::embedded_default_library()),
			Self::EmbeddedAoTuV => Cow::Borrowed(codebook::embedded_aotuv_library()),
			Self::External(library) => Cow::Borrowed(library),
			Self::InlineOnly => Cow::Owned(CodebookLibrary::empty())
		}
	}
}

/// Options that shape how a single conversion is carried out. Defaults match the
/// reference Wwise-to-Ogg converter's own defaults.
#[derive(Debug, Clone, Default)]
pub struct ConversionSettings {
	/// Setup packets carry their codebooks inline rather than as library indices.
	pub inline_codebooks: bool,
	/// After codebooks, copy the remainder of the setup packet verbatim instead of
	/// rebuilding floors, residues, mappings and modes. Incompatible with
	/// `mod_packets` audio framing.
	pub full_setup: bool,
	/// Overrides the autodetected mod-packets framing of audio packets.
	pub force_packet_format: PacketFormatOverride,
	/// Where to source library codebooks from, when `inline_codebooks` is `false`.
	pub codebook_source: CodebookSource
}
