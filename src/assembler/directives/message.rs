use crate::assembler::Pass;
use crate::context::{Breakpoint, PassKind};
use crate::error::{Error, Severity};
use crate::text::{arguments, unquote};

/// Joins strings and evaluated expressions into one message.
fn compose(pass: &mut Pass, rest: &str) -> Result<String, Error> {
	let mut out = String::new();
	for arg in arguments(rest) {
		match arg.starts_with('"').then(|| unquote(arg)).flatten() {
			Some(text) => out.push_str(&text),
			None => {
				let value = pass.ctx.eval(arg)?;
				if value.fract() == 0.0 {
					out.push_str(&(value as i64).to_string());
				} else {
					out.push_str(&value.to_string());
				}
			}
		}
	}
	Ok(out)
}

/// Messages and breakpoints only take effect in the assembling pass.
pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	if pass.ctx.pass != PassKind::Assemble {
		return Ok(());
	}
	match name {
		"echo" => {
			let msg = compose(pass, rest)?;
			pass.ctx.report(Severity::Message, msg);
		}
		"warn" => {
			let msg = compose(pass, rest)?;
			pass.ctx.report(Severity::Warning, msg);
		}
		"fail" | "error" => return Err(Error::directive(compose(pass, rest)?)),
		_ => {
			let Some(location) = pass.ctx.location else {
				return Ok(());
			};
			pass.ctx.breakpoints.push(Breakpoint {
				address: pass.ctx.address() as u32,
				page: pass.ctx.pages.number(),
				location,
			});
		}
	}
	Ok(())
}
