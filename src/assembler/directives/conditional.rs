use tracing::trace;

use crate::assembler::{directive_name, Pass};
use crate::error::Error;
use crate::text::split_word;

pub(crate) fn handles(name: &str) -> bool {
	matches!(
		name,
		"if" | "ifdef" | "ifndef" | "elseif" | "elseifdef" | "elseifndef" | "else" | "endif"
	)
}

/// `.elseif` statements, the only conditional whose expression is read from an inactive block.
pub(crate) fn is_alternative(text: &str) -> bool {
	directive_name(split_word(text).0).is_some_and(|name| name == "elseif")
}

fn defined(pass: &Pass, name: &str) -> Result<bool, Error> {
	let name = name.trim();
	if name.is_empty() {
		return Err(Error::directive("missing name"));
	}
	Ok(pass.ctx.macros.contains(name) || pass.ctx.resolve_label(name).is_some())
}

fn condition(pass: &mut Pass, name: &str, rest: &str) -> Result<bool, Error> {
	match name.trim_start_matches("else") {
		"ifdef" => defined(pass, rest),
		"ifndef" => defined(pass, rest).map(|found| !found),
		_ if rest.trim().is_empty() => Err(Error::directive(format!(".{name} without a condition"))),
		_ => Ok(pass.ctx.eval(rest)? != 0.0),
	}
}

/// Conditionals run even inside inactive blocks, to keep the nesting straight.
pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let mut stack = std::mem::take(&mut pass.ctx.conditionals);
	let result = match name {
		"if" | "ifdef" | "ifndef" => stack.open(|| condition(pass, name, rest)),
		"elseif" | "elseifdef" | "elseifndef" => stack.alternative(|| condition(pass, name, rest)),
		"else" => stack.otherwise(),
		_ => stack.close(),
	};
	trace!(depth = stack.depth(), active = stack.active(), "{name}");
	pass.ctx.conditionals = stack;
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn alternatives() {
		assert!(is_alternative("\t.ELSEIF x > 1"));
		assert!(is_alternative("#elseif FOO"));
		assert!(!is_alternative(".elseifdef FOO"));
		assert!(!is_alternative(".if FOO"));
	}
}
