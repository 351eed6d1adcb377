use tracing::trace;

use crate::assembler::{directive_name, Flow, Pass};
use crate::error::Error;
use crate::macros::parse_definition;
use crate::text::split_word;

pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let macros = &mut pass.ctx.macros;
	match name {
		"define" => {
			let (name, replacement) = parse_definition(rest)?;
			macros.define(&name, replacement);
		}
		"defcont" => macros.append(rest)?,
		"deflong" => {
			let (name, replacement) = parse_definition(rest)?;
			if !replacement.template.is_empty() {
				return Err(Error::directive(format!(".deflong {name}: the body starts on the next line")));
			}
			pass.ctx.long_macro = Some((name, replacement));
		}
		"enddeflong" => return Err(Error::directive(".enddeflong without .deflong")),
		_ => {
			let target = rest.trim();
			if target.is_empty() {
				return Err(Error::directive(format!(".{name} expects a macro name")));
			}
			macros.undefine(target)?;
		}
	}
	Ok(())
}

/// Adds a statement to the `.deflong` body being collected, or closes it.
pub(crate) fn collect(pass: &mut Pass, text: &str) -> Result<Flow, Error> {
	let (word, _) = split_word(text);
	if directive_name(word).is_some_and(|name| name == "enddeflong") {
		if let Some((name, replacement)) = pass.ctx.long_macro.take() {
			trace!("long macro {name} complete");
			pass.ctx.macros.define(&name, replacement);
		}
		return Ok(Flow::Done);
	}
	if let Some((_, replacement)) = pass.ctx.long_macro.as_mut() {
		let template = &mut replacement.template;
		if !template.is_empty() {
			template.push_str(" \\ ");
		}
		template.push_str(text);
	}
	Ok(Flow::Done)
}
