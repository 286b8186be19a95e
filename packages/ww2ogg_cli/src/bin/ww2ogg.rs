use std::borrow::Cow;
use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write, stdout};
use std::process::exit;
use std::time::Instant;

use getopts::Options;
use log::info;
use stderrlog::ColorChoice;
use ww2ogg::codebook::CodebookLibrary;
use ww2ogg::settings::{CodebookSource, PacketFormatOverride};
use ww2ogg::{ConversionSettings, Converter, WemToOggError};

fn main() {
	exit(match run() {
		Ok(_) => 0,
		Err(err) => {
			eprintln!("{err}");
			1
		}
	})
}

fn run() -> Result<(), Cow<'static, str>> {
	let mut options = Options::new();

	options
		.optflag("h", "help", "Prints information about the accepted command line arguments and exits.")
		.optflag("", "version", "Prints version information and exits.")
		.optflag("q", "quiet", "Only print error messages, unless -h is specified.")
		.optflagmulti("v", "verbose", "Increases the verbosity of the messages. Can be repeated.")
		.optflag(
			"",
			"inline-codebooks",
			"Assumes the input's setup header stores its codebooks inline, rather than by index \
			 into a shared codebook library."
		)
		.optflag(
			"",
			"full-setup",
			"After the codebooks, copies the remainder of the setup header verbatim instead of \
			 rebuilding floors, residues, mappings and modes. Incompatible with mod-packets audio \
			 framing."
		)
		.optopt(
			"",
			"packet-format",
			"Overrides autodetection of the audio packets' framing.\nValid values: auto, mod, no-mod",
			"FORMAT"
		)
		.optopt(
			"",
			"codebooks",
			"Selects which codebook library to resolve library-indexed codebooks against.\n\
			 Valid values: default, aotuv, inline, or a path to an external packed codebook file.",
			"SOURCE"
		)
		.optopt("o", "output", "Output file path. Defaults to stdout when omitted.", "FILE");

	let matches = options.parse(env::args().skip(1)).map_err(|err| {
		format!("{err}\nRun {} -h to see command line argument help", env!("CARGO_BIN_NAME"))
	})?;

	if matches.opt_present("h") {
		print_header();
		println!();
		println!("Usage:");
		print!("    {} [OPTION]... <input file>", env!("CARGO_BIN_NAME"));
		println!("{}", options.usage(""));
		return Ok(());
	}

	if matches.opt_present("version") {
		print_header();
		return Ok(());
	}

	let quiet_mode = matches.opt_present("q");
	if !quiet_mode {
		print_header();
		println!();
	}

	if matches.free.len() != 1 {
		return Err(format!(
			"Exactly one input file must be specified. Run {} -h to see command line argument help",
			env!("CARGO_BIN_NAME")
		))?;
	}

	init_logging(matches.opt_count("v"), quiet_mode);

	let input_file_name = &*matches.free[0];
	let input_file = BufReader::new(
		File::open(input_file_name).map_err(|err| format!("Could not open input file: {err}"))?
	);

	let settings = build_settings(&matches)?;

	let conversion_begin = Instant::now();
	let converter = Converter::new(settings);

	match matches.opt_str("o") {
		Some(output_file_name) => {
			let output_file = BufWriter::new(
				File::create(&output_file_name)
					.map_err(|err| format!("Could not open output file: {err}"))?
			);
			convert(&converter, input_file, output_file, input_file_name)?;
		}
		None => {
			// stdout is not seekable, so buffer in memory first; the converter's
			// sink only ever needs to be Write.
			let buffer = convert(&converter, input_file, Vec::new(), input_file_name)?;
			stdout()
				.lock()
				.write_all(&buffer)
				.map_err(|err| format!("Could not write to stdout: {err}"))?;
		}
	}

	info!("Conversion completed in {:.3} s. Have a nice day!", conversion_begin.elapsed().as_secs_f64());

	Ok(())
}

fn convert<R: Read + Seek, W: Write>(
	converter: &Converter,
	input: R,
	output: W,
	input_file_name: &str
) -> Result<W, Cow<'static, str>> {
	info!("Converting {input_file_name}...");
	converter
		.convert(input, output)
		.map_err(|err| format_conversion_error(&err, input_file_name).into())
}

fn format_conversion_error(err: &WemToOggError, input_file_name: &str) -> String {
	match err {
		WemToOggError::InvalidCodebookId(id) => format!(
			"Error while converting {input_file_name}: codebook library has no entry for index {id}. \
			 The file may need --inline-codebooks, or a different --codebooks library."
		),
		other if other.is_codebook_family() => format!(
			"Error while converting {input_file_name}: {other}. This usually means the wrong \
			 codebook library was selected; try --codebooks aotuv or --inline-codebooks."
		),
		other => format!("Error while converting {input_file_name}: {other}")
	}
}

fn build_settings(matches: &getopts::Matches) -> Result<ConversionSettings, Cow<'static, str>> {
	let mut settings = ConversionSettings {
		inline_codebooks: matches.opt_present("inline-codebooks"),
		full_setup: matches.opt_present("full-setup"),
		..Default::default()
	};

	if let Some(value) = matches.opt_str("packet-format") {
		settings.force_packet_format = parse_packet_format(&value)?;
	}

	if let Some(value) = matches.opt_str("codebooks") {
		settings.codebook_source = parse_codebook_source(&value)?;
	}

	Ok(settings)
}

fn parse_packet_format(value: &str) -> Result<PacketFormatOverride, Cow<'static, str>> {
	match value {
		"auto" => Ok(PacketFormatOverride::Auto),
		"mod" => Ok(PacketFormatOverride::ForceMod),
		"no-mod" => Ok(PacketFormatOverride::ForceNoMod),
		other => Err(format!("Invalid value for --packet-format: {other}").into())
	}
}

fn parse_codebook_source(value: &str) -> Result<CodebookSource, Cow<'static, str>> {
	match value {
		"default" => Ok(CodebookSource::EmbeddedDefault),
		"aotuv" => Ok(CodebookSource::EmbeddedAoTuV),
		"inline" => Ok(CodebookSource::InlineOnly),
		path => {
			let mut bytes = Vec::new();
			File::open(path)
				.and_then(|mut file| file.read_to_end(&mut bytes))
				.map_err(|err| format!("Could not open codebook library {path}: {err}"))?;
			let library = CodebookLibrary::from_packed_bytes(&bytes)
				.map_err(|err| format!("Could not parse codebook library {path}: {err}"))?;
			Ok(CodebookSource::External(library))
		}
	}
}

fn init_logging(verbosity_level: usize, quiet_mode: bool) {
	stderrlog::new()
		.module("ww2ogg")
		.verbosity(2 + verbosity_level)
		.show_level(false)
		.quiet(quiet_mode)
		.color(ColorChoice::Never)
		.init()
		.unwrap();
}

fn print_header() {
	println!("ww2ogg {} ({})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_DESCRIPTION"));
}
