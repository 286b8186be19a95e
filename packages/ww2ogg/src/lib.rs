//! `ww2ogg` rebuilds standard, conformant Ogg Vorbis streams from Wwise-flavored
//! RIFF/RIFX Vorbis containers (commonly shipped with a `.wem` extension).
//!
//! Audiokinetic's Wwise middleware stores Vorbis audio with proprietary framing: it
//! strips the setup header down to references into a shared codebook library,
//! omits granule positions from some packet layouts, and in some variants drops the
//! standard packet-type bit from every audio packet ("mod packets"). None of this is
//! legal Vorbis on its own; no off-the-shelf Vorbis decoder will accept it. This
//! crate parses the Wwise container and setup header against the Vorbis I
//! specification, rebuilds every stripped field at the width a conformant decoder
//! expects, and re-encapsulates the result as a standard Ogg Vorbis bitstream with
//! correct lacing, granule positions, and page checksums.
//!
//! # Scope
//!
//! This crate performs container-to-container remuxing only. It does not decode
//! audio, does not resample, and does not transcode to any non-Vorbis codec. Tag
//! edits are limited to a fixed vendor string and, when the source carries a single
//! sample loop, `LoopStart`/`LoopEnd` user comments. It does not attempt to repair
//! inputs that are truncated or semantically inconsistent beyond what the Vorbis I
//! specification and the Wwise container format already tolerate.
//!
//! Two external concerns are deliberately left to callers: the on-disk codebook
//! library file format is accepted only through [`CodebookLibrary`]'s lookup
//! interface (how that blob was produced, embedded, or fetched is not this crate's
//! concern), and validating the produced Ogg stream by re-decoding it is left to
//! whatever Vorbis decoder the caller already trusts.
//!
//! # Entry point
//!
//! [`Converter`] is the only entry point most callers need: construct it from a
//! [`ConversionSettings`], then call [`Converter::convert`] with a seekable input
//! source and a byte sink.
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufWriter;
//!
//! use ww2ogg::{ConversionSettings, Converter};
//!
//! # fn main() -> Result<(), ww2ogg::WemToOggError> {
//! let input = File::open("example.wem")?;
//! let output = BufWriter::new(File::create("example.ogg")?);
//!
//! Converter::new(ConversionSettings::default()).convert(input, output)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Codebook libraries
//!
//! Most Wwise files reference codebooks by index into a shared library rather than
//! storing them inline. This crate bundles the same two libraries the reference
//! converter ships with — the standard Vorbis reference encoder's codebook set, and
//! the aoTuV encoder's — selectable through [`CodebookSource`]. Files whose setup
//! header was produced with a different encoder's codebooks will fail to convert
//! against the wrong library, usually surfacing as [`WemToOggError::Codebook`] or
//! [`WemToOggError::InvalidCodebookId`]; callers that want to retry with a different
//! library should check [`WemToOggError::is_codebook_family`] and retry into a fresh
//! output buffer, never on a `Parse` or `FileOpen` failure.
//!
//! # Logging
//!
//! This crate uses the [`log`](https://crates.io/crates/log) crate's facade for
//! diagnostics. It never installs a logger itself; callers (including this crate's
//! own test suite) choose and initialize one.

#![forbid(unsafe_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
#![deny(non_ascii_idents)]
#![deny(clippy::print_stdout)]
#![deny(clippy::unimplemented)]
#![warn(explicit_outlives_requirements)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]
#![warn(variant_size_differences)]
#![warn(clippy::empty_enum)]
#![warn(clippy::enum_glob_use)]
#![warn(clippy::float_cmp_const)]
#![warn(clippy::invalid_upcast_comparisons)]
#![warn(clippy::multiple_inherent_impl)]
#![warn(clippy::use_self)]
#![warn(clippy::used_underscore_binding)]
#![warn(clippy::redundant_feature_names)]

mod audio;
pub mod codebook;
mod conversion;
mod crc;
pub mod error;
mod ogg;
mod packet;
mod riff;
pub mod settings;
mod setup;
mod util;

pub use codebook::CodebookLibrary;
pub use conversion::Converter;
pub use error::WemToOggError;
pub use settings::{CodebookSource, ConversionSettings, PacketFormatOverride};
