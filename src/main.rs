use std::fs;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::{debug, Level};

use z80_as::{Assembler, InstructionSet, Output, Settings};

/// Two-pass macro assembler for the Z80
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
	/// Source file to assemble
	source: PathBuf,

	/// Binary output, every page in page order
	output: Option<PathBuf>,

	/// Exported labels, written as `.equ` assignments
	export: Option<PathBuf>,

	/// Treat label and macro names as case sensitive
	#[arg(long)]
	case_sensitive: bool,

	/// Stop at the first error
	#[arg(long)]
	strict: bool,

	/// Instruction table to use instead of the bundled Z80 one
	#[arg(long, value_name = "FILE")]
	table: Option<PathBuf>,

	/// Extra directory searched by `.include` and `.incbin`
	#[arg(short = 'I', long = "include", value_name = "DIR")]
	include_dirs: Vec<PathBuf>,

	/// Seed for `.dbrnd` and `.dwrnd`
	#[arg(long)]
	seed: Option<u64>,

	/// More output, repeat for more detail
	#[arg(short, long, action = ArgAction::Count)]
	verbose: u8,
}

fn exports(output: &Output) -> String {
	let mut text = String::new();
	for (name, value) in output.exports() {
		let line = if value >= 0.0 && value.fract() == 0.0 {
			format!("{name} .equ ${:04X}\n", value as i64)
		} else {
			format!("{name} .equ {value}\n")
		};
		text.push_str(&line);
	}
	text
}

fn main() -> Result<()> {
	let args = Args::parse();
	let level = match args.verbose {
		0 => Level::INFO,
		1 => Level::DEBUG,
		_ => Level::TRACE,
	};
	tracing_subscriber::fmt()
		.compact()
		.without_time()
		.with_max_level(level)
		.init();

	let settings = Settings {
		case_sensitive: args.case_sensitive,
		strict: args.strict,
		include_dirs: args.include_dirs,
		seed: args.seed,
		..Default::default()
	};
	let mut assembler = Assembler::new(settings);
	if let Some(path) = &args.table {
		let table = InstructionSet::load(path).map_err(z80_as::Error::from)?;
		assembler = assembler.with_table(table);
	}
	let output = assembler.assemble(&args.source)?;

	if let Some(path) = &args.output {
		let binary = output.binary();
		debug!("writing {} byte(s) to '{}'", binary.len(), path.display());
		fs::write(path, binary)
			.into_diagnostic()
			.wrap_err_with(|| format!("unable to write '{}'", path.display()))?;
	}
	if let Some(path) = &args.export {
		fs::write(path, exports(&output))
			.into_diagnostic()
			.wrap_err_with(|| format!("unable to write '{}'", path.display()))?;
	}
	Ok(())
}
