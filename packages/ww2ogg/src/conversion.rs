//! The conversion entry point: parses a Wwise container, rewrites its three header
//! packets and its audio packets, and emits a standard Ogg Vorbis stream.
//!
//! A settings-carrying struct exposing a single `convert` method, so the core stays
//! agnostic of where bytes come from or go (a file, an in-memory buffer, or any other
//! `Read`/`Write` implementor).

use std::io::{Read, Seek, Write};

use vorbis_bitpack::BitpackReader;

use crate::error::WemToOggError;
use crate::ogg::OggPageWriter;
use crate::packet::{PacketFraming, PacketIter};
use crate::riff::{self, Container};
use crate::settings::{ConversionSettings, PacketFormatOverride};
use crate::{audio, setup};

/// A text tag identifying this crate's build, used as the synthesized comment
/// packet's vendor string.
static WW2OGG_VERSION_TAG: &str = concat!(
	"converted from Audiokinetic Wwise by ww2ogg ",
	env!("WW2OGG_VERSION"),
	env!("WW2OGG_BUILD_DATE_VERSION_SUFFIX")
);

/// Packet type bytes the legacy header-triad framing is expected to carry, in order.
const TRIAD_PACKET_TYPES: [u8; 3] = [1, 3, 5];

/// Converts a single Wwise-flavored RIFF/RIFX Vorbis container into a standard Ogg
/// Vorbis stream, using `settings` to resolve codebooks and override autodetected
/// packet framing.
#[derive(Debug, Clone, Default)]
pub struct Converter {
	settings: ConversionSettings
}

impl Converter {
	/// Builds a converter from the given settings.
	pub fn new(settings: ConversionSettings) -> Self {
		Self { settings }
	}

	/// Converts `source` into standard Ogg Vorbis, writing the result to `sink`.
	///
	/// `source` only needs to support `Read`; the whole container is buffered in
	/// memory before parsing (see the container parser's own documentation for why).
	pub fn convert<R: Read + Seek, W: Write>(&self, source: R, mut sink: W) -> Result<W, WemToOggError> {
		let container = riff::parse(source)?;
		let mut page_writer = OggPageWriter::new(&mut sink);

		let codebook_library = self.settings.codebook_source.resolve();

		let setup_result = if container.vorb.header_triad_present {
			let mode_bits = copy_header_triad(&container, &mut page_writer)?
				.ok_or_else(|| WemToOggError::Parse("header triad did not yield a setup packet".into()))?;
			mode_bits
		} else {
			write_identification_packet(&container, &mut page_writer)?;
			write_comment_packet(&container, &mut page_writer)?;
			write_synthesized_setup_packet(&container, &self.settings, &codebook_library, &mut page_writer)?
		};

		let framing = if container.vorb.header_triad_present {
			PacketFraming::Legacy
		} else if container.vorb.no_granule {
			PacketFraming::ModernNoGranule
		} else {
			PacketFraming::ModernWithGranule
		};

		let mod_packets = match self.settings.force_packet_format {
			PacketFormatOverride::Auto => container.vorb.mod_packets,
			PacketFormatOverride::ForceMod => true,
			PacketFormatOverride::ForceNoMod => false
		};

		audio::rewrite(
			&container.data,
			container.endianness,
			framing,
			container.vorb.first_audio_packet_offset as usize,
			container.vorb.no_granule,
			mod_packets,
			container.vorb.sample_count,
			container.vorb.blocksize0_pow,
			container.vorb.blocksize1_pow,
			&setup_result,
			&mut page_writer
		)?;

		page_writer.into_inner()?;
		Ok(sink)
	}
}

fn write_identification_packet<W: Write>(
	container: &Container,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	sink.write_bits(0x01, 8);
	sink.write_bytes(b"vorbis");
	sink.write_bits(0, 32); // vorbis_version
	sink.write_bits(container.fmt.channels as u32, 8);
	sink.write_bits(container.fmt.sample_rate, 32);
	sink.write_bits(0, 32); // bitrate_maximum
	sink.write_bits(container.fmt.avg_bytes_per_second * 8, 32); // bitrate_nominal
	sink.write_bits(0, 32); // bitrate_minimum
	sink.write_bits(container.vorb.blocksize0_pow as u32, 4);
	sink.write_bits(container.vorb.blocksize1_pow as u32, 4);
	sink.write_flag(true); // framing

	sink.set_granule(0);
	sink.flush_page(false, false)?;
	Ok(())
}

fn write_comment_packet<W: Write>(
	container: &Container,
	sink: &mut OggPageWriter<W>
) -> Result<(), WemToOggError> {
	sink.write_bits(0x03, 8);
	sink.write_bytes(b"vorbis");

	sink.write_bits(WW2OGG_VERSION_TAG.len() as u32, 32);
	sink.write_bytes(WW2OGG_VERSION_TAG.as_bytes());

	let comments: Vec<String> = match container.loop_points {
		Some(loop_points) => vec![
			format!("LoopStart={}", loop_points.loop_start),
			format!("LoopEnd={}", loop_points.loop_end),
		],
		None => Vec::new()
	};

	sink.write_bits(comments.len() as u32, 32);
	for comment in &comments {
		sink.write_bits(comment.len() as u32, 32);
		sink.write_bytes(comment.as_bytes());
	}

	sink.write_flag(true); // framing

	sink.set_granule(0);
	sink.flush_page(false, false)?;
	Ok(())
}

fn write_synthesized_setup_packet<W: Write>(
	container: &Container,
	settings: &ConversionSettings,
	codebook_library: &crate::codebook::CodebookLibrary,
	sink: &mut OggPageWriter<W>
) -> Result<setup::SetupResult, WemToOggError> {
	let setup_offset = container.vorb.setup_packet_offset as usize;
	let first_audio_offset = container.vorb.first_audio_packet_offset as usize;

	let framing =
		if container.vorb.no_granule { PacketFraming::ModernNoGranule } else { PacketFraming::ModernWithGranule };
	let mut iter = PacketIter::new(&container.data, container.endianness, framing, setup_offset, first_audio_offset);
	let frame = iter
		.next_frame()?
		.ok_or_else(|| WemToOggError::Parse("setup packet is missing from the data chunk".into()))?;
	let payload = iter.payload(&frame);

	let mut reader = BitpackReader::new(payload);
	let result = setup::rewrite(&mut reader, container.fmt.channels, settings, codebook_library, sink)?;

	sink.set_granule(0);
	sink.flush_page(false, false)?;

	Ok(result)
}

/// Copies the three Vorbis header packets present verbatim in the container (legacy
/// 8-byte framing), each to its own page. Returns the mode table derived from the
/// setup packet, the same way [`write_synthesized_setup_packet`] does for the
/// synthesized-triad shape, so the caller can drive the audio rewriter uniformly.
fn copy_header_triad<W: Write>(
	container: &Container,
	sink: &mut OggPageWriter<W>
) -> Result<Option<setup::SetupResult>, WemToOggError> {
	// The identification and comment packets precede the setup packet; all three are
	// framed legacy-style back to back, running from the start of the data chunk to
	// the first audio packet.
	let first_audio_offset = container.vorb.first_audio_packet_offset as usize;

	let mut iter =
		PacketIter::new(&container.data, container.endianness, PacketFraming::Legacy, 0, first_audio_offset);

	let mut mode_result = None;

	for (index, &expected_type) in TRIAD_PACKET_TYPES.iter().enumerate() {
		let frame = iter
			.next_frame()?
			.ok_or_else(|| WemToOggError::Parse("header triad is missing a packet".into()))?;
		let payload = iter.payload(&frame);

		if frame.granule != 0 {
			return Err(WemToOggError::Parse("header-triad packet has a nonzero granule".into()));
		}
		if payload.is_empty() || payload[0] != expected_type {
			return Err(WemToOggError::Parse(format!(
				"header-triad packet {index} has the wrong packet type byte"
			)));
		}

		if index == 2 {
			// The setup header's codebooks are always relayed via passthrough copy
			// here, regardless of --full-setup: a present triad's codebooks are
			// already in standard form, because they came from a real Vorbis stream.
			mode_result = Some(copy_setup_packet_body(payload, sink)?);
		} else {
			sink.write_bytes(payload);
		}

		sink.set_granule(0);
		sink.flush_page(false, false)?;
	}

	Ok(mode_result)
}

fn copy_setup_packet_body<W: Write>(
	payload: &[u8],
	sink: &mut OggPageWriter<W>
) -> Result<setup::SetupResult, WemToOggError> {
	sink.write_bytes(&payload[0..7]);

	let mut reader = BitpackReader::new(&payload[7..]);
	let codebook_count = crate::util::read_uint(&mut reader, crate::util::width(8))? + 1;
	sink.write_bits(codebook_count - 1, 8);

	for _ in 0..codebook_count {
		crate::codebook::copy(&mut reader, sink)?;
	}

	// A present header triad was produced by a real encoder, so the remainder of the
	// setup packet (time-domain placeholder through the framing bit) is already in
	// standard form; relay it bit for bit instead of attempting to parse it again.
	loop {
		match reader.read_bit() {
			Ok(bit) => sink.put_bit(bit != 0),
			Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
			Err(err) => return Err(WemToOggError::Io(err))
		}
	}

	// A present triad carries no mode table of its own making available to the audio
	// rewriter; mod-packets framing never co-occurs with header_triad_present (see
	// the vorb chunk layouts), so the audio rewriter never consults it in this shape.
	Ok(setup::SetupResult { mode_blockflag: Vec::new(), mode_bits: 0 })
}
