//! Directive families. Every handler receives the statement text after the directive name.

use super::{directive_name, Flow, Pass};
use crate::error::Error;
use crate::source::{FileId, Position};
use crate::text::{split_word, unquote};

pub(crate) mod conditional;
pub(crate) mod data;
pub(crate) mod define;
pub(crate) mod file;
pub(crate) mod flow;
pub(crate) mod message;
pub(crate) mod module;
pub(crate) mod paging;
pub(crate) mod variables;

/// Directives whose operands name macros and must reach them unexpanded.
const NAMES_MACROS: &[&str] = &[
	"define", "undefine", "undef", "defcont", "deflong", "enddeflong",
	"ifdef", "ifndef", "elseifdef", "elseifndef",
];

pub(crate) fn names_macro(text: &str, column0: bool) -> bool {
	let (mut word, rest) = split_word(text);
	if directive_name(word).is_none() && (column0 || word.ends_with(':')) {
		word = split_word(rest).0;
	}
	directive_name(word).is_some_and(|name| NAMES_MACROS.contains(&name.as_str()))
}

/// A quoted string argument, or the bare text.
pub(crate) fn text_argument(arg: &str) -> String {
	unquote(arg).unwrap_or_else(|| arg.trim().to_string())
}

pub(crate) fn expect_arguments(name: &str, args: &[&str], min: usize, max: usize) -> Result<(), Error> {
	if args.len() < min || args.len() > max {
		let expected = if min == max {
			min.to_string()
		} else {
			format!("{min} to {max}")
		};
		return Err(Error::directive(format!(
			".{name} expects {expected} argument(s), found {}",
			args.len(),
		)));
	}
	Ok(())
}

pub(super) fn run(pass: &mut Pass, file: FileId, pos: Position, name: &str, rest: &str) -> Result<Flow, Error> {
	match name {
		"module" | "endmodule" | "using" | "nestmodules" | "local" | "global" | "localprefix" | "export" => {
			module::run(pass, name, rest)?
		}
		"db" | "byte" | "dw" | "word" | "dl" | "long" | "dfloat" | "text" | "asc" | "fill" | "ds" | "block"
		| "dbrnd" | "dwrnd" | "dbsin" | "dwsin" | "dbcos" | "dwcos" | "dbtan" | "dwtan" | "asciimap"
		| "align" => data::run(pass, name, rest)?,
		"define" | "defcont" | "deflong" | "enddeflong" | "undefine" | "undef" => define::run(pass, name, rest)?,
		"struct" | "endstruct" | "var" | "tvar" | "varloc" => variables::run(pass, name, rest)?,
		"for" | "repeat" | "loop" | "end" => return flow::run(pass, file, pos, name, rest),
		"include" => return file::include(pass, rest),
		"incbin" | "fopen" | "fread" | "fseek" | "fsize" | "fclose" => file::run(pass, name, rest)?,
		"org" | "defpage" | "page" | "emptyfill" | "squish" | "unsquish" | "relocate" | "endrelocate"
		| "binarymode" => paging::run(pass, name, rest)?,
		"echo" | "warn" | "fail" | "error" | "breakpoint" | "bp" => message::run(pass, name, rest)?,
		"equ" => return Err(Error::directive(".equ needs a label")),
		_ => return Err(Error::directive(format!("unknown directive '.{name}'"))),
	}
	Ok(Flow::Done)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn macro_names_stay_unexpanded() {
		assert!(names_macro("#define x 1", true));
		assert!(names_macro("\t.IFDEF x", false));
		assert!(names_macro("label: .undef x", false));
		assert!(names_macro("label .defcont y", true));
		assert!(!names_macro(".db x", false));
		assert!(!names_macro("define x", false));
	}

	#[test]
	fn text_arguments() {
		assert_eq!(text_argument("\"a b\""), "a b");
		assert_eq!(text_argument(" ti83p "), "ti83p");
	}
}
