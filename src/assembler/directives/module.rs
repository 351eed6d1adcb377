use tracing::debug;

use super::{expect_arguments, text_argument};
use crate::assembler::Pass;
use crate::context::PassKind;
use crate::error::Error;
use crate::symbols::validate_name;
use crate::text::arguments;

fn switch(name: &str, arg: &str) -> Result<bool, Error> {
	match arg.trim().to_ascii_lowercase().as_str() {
		"on" | "true" | "1" => Ok(true),
		"off" | "false" | "0" => Ok(false),
		other => Err(Error::directive(format!(".{name} expects on or off, found '{other}'"))),
	}
}

pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let ctx = &mut pass.ctx;
	let args = arguments(rest);
	match name {
		"module" => {
			expect_arguments(name, &args, 1, 1)?;
			let module = args[0];
			if module.contains('.') {
				return Err(Error::directive(format!("module name '{module}' cannot be a path")));
			}
			validate_name(module)?;
			ctx.enter_module(module);
			debug!("module {}", ctx.symbols.module(ctx.module).name);
		}
		"endmodule" => ctx.leave_module()?,
		"using" => {
			if args.is_empty() {
				return Err(Error::directive(".using expects a module"));
			}
			for module in args {
				if ctx.symbols.find_module(ctx.module, module).is_none() && ctx.pass == PassKind::Assemble {
					return Err(Error::directive(format!("unknown module '{module}'")));
				}
				ctx.symbols.add_using(ctx.module, module);
			}
		}
		"nestmodules" => {
			expect_arguments(name, &args, 1, 1)?;
			ctx.nest_modules = switch(name, args[0])?;
		}
		"local" => ctx.all_local = true,
		"global" => ctx.all_local = false,
		"localprefix" => {
			expect_arguments(name, &args, 1, 1)?;
			ctx.settings.local_prefix = text_argument(args[0]);
		}
		"export" => {
			if args.is_empty() {
				return Err(Error::directive(".export expects a label"));
			}
			if ctx.pass == PassKind::Assemble {
				let module = ctx.module;
				ctx.exports.extend(args.into_iter().map(|label| (label.to_string(), module)));
			}
		}
		_ => unreachable!("{name}"),
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn switches() {
		assert_eq!(switch("nestmodules", " ON").ok(), Some(true));
		assert_eq!(switch("nestmodules", "0").ok(), Some(false));
		assert!(switch("nestmodules", "maybe").is_err());
	}
}
