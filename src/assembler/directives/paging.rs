use tracing::debug;

use super::{expect_arguments, text_argument};
use crate::assembler::Pass;
use crate::error::Error;
use crate::text::arguments;

pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let args = arguments(rest);
	let ctx = &mut pass.ctx;
	match name {
		"org" => {
			expect_arguments(name, &args, 1, 1)?;
			let address = ctx.eval_u32(args[0])?;
			ctx.pages.set_pc(address);
		}
		"defpage" => {
			expect_arguments(name, &args, 3, 4)?;
			let number = ctx.eval_u32(args[0])?;
			let origin = ctx.eval_u32(args[1])?;
			let size = ctx.eval_u32(args[2])?;
			let fill = match args.get(3) {
				Some(fill) => Some(ctx.eval_int(fill)? as u8),
				None => None,
			};
			ctx.pages.define(number, origin, size, fill)?;
			debug!("page {number}: ${origin:04X}, {size} byte(s)");
		}
		"page" => {
			expect_arguments(name, &args, 1, 1)?;
			let number = ctx.eval_u32(args[0])?;
			ctx.pages.select(number)?;
		}
		"emptyfill" => {
			expect_arguments(name, &args, 1, 1)?;
			ctx.pages.empty_fill = ctx.eval_int(args[0])? as u8;
		}
		"squish" => ctx.pages.squish = true,
		"unsquish" => ctx.pages.squish = false,
		"relocate" => {
			expect_arguments(name, &args, 1, 1)?;
			if ctx.relocation.is_some() {
				return Err(Error::directive(".relocate inside .relocate"));
			}
			let address = ctx.eval_int(args[0])?;
			ctx.relocation = Some(address - ctx.pages.pc() as i64);
		}
		"endrelocate" => {
			if ctx.relocation.take().is_none() {
				return Err(Error::directive(".endrelocate without .relocate"));
			}
		}
		"binarymode" => {
			expect_arguments(name, &args, 1, 1)?;
			ctx.binary_mode = Some(text_argument(args[0]).to_ascii_lowercase());
		}
		_ => unreachable!("{name}"),
	}
	Ok(())
}
