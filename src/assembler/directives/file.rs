//! Source inclusion, binary inclusion and file handles.

use std::path::PathBuf;

use tracing::debug;

use super::{expect_arguments, text_argument};
use crate::assembler::{Flow, Pass, MAX_INCLUDE_DEPTH};
use crate::error::Error;
use crate::source::FileHandle;
use crate::symbols::{LabelDef, LabelFlags};
use crate::text::arguments;
use crate::Name;

fn resolve(pass: &Pass, arg: &str) -> PathBuf {
	pass.store.resolve(&text_argument(arg), pass.ctx.file)
}

pub(crate) fn include(pass: &mut Pass, rest: &str) -> Result<Flow, Error> {
	let args = arguments(rest);
	expect_arguments("include", &args, 1, 1)?;
	if pass.ctx.include_depth >= MAX_INCLUDE_DEPTH {
		return Err(Error::directive(format!("includes nested deeper than {MAX_INCLUDE_DEPTH}")));
	}
	let path = resolve(pass, args[0]);
	let file = pass.store.load(&path)?;
	pass.ctx.include_depth += 1;
	let stopped = pass.run_file(file);
	pass.ctx.include_depth -= 1;
	Ok(if stopped? { Flow::Stop } else { Flow::Done })
}

/// Bytes `start..start + length` of the file, clamped to its size.
fn incbin(pass: &mut Pass, args: &[&str]) -> Result<(), Error> {
	expect_arguments("incbin", args, 1, 3)?;
	let path = resolve(pass, args[0]);
	let start = match args.get(1) {
		Some(start) => pass.ctx.eval_u32(start)? as usize,
		None => 0,
	};
	let length = match args.get(2) {
		Some(length) => Some(pass.ctx.eval_u32(length)? as usize),
		None => None,
	};
	let data = pass.store.binary(&path)?;
	let start = start.min(data.len());
	let end = length.map_or(data.len(), |length| (start + length).min(data.len()));
	let data = data[start..end].to_vec();
	debug!("{} byte(s) from '{}'", data.len(), path.display());
	pass.ctx.emit(&data)?;
	Ok(())
}

fn read_le(bytes: &[u8]) -> u64 {
	bytes.iter().rev().fold(0, |acc, &byte| (acc << 8) | byte as u64)
}

fn handle<'p>(pass: &'p mut Pass, name: &str) -> Result<&'p mut FileHandle, Error> {
	pass.ctx
		.handles
		.get_mut(name.trim())
		.ok_or_else(|| Error::directive(format!("no open file '{}'", name.trim())))
}

fn define_value(pass: &mut Pass, name: &str, value: f64) -> Result<(), Error> {
	let def = LabelDef {
		value,
		location: pass.ctx.location,
		count: 1,
		flags: LabelFlags { constant: true, ..Default::default() },
		..Default::default()
	};
	pass.ctx.define_label(name.trim(), def, true)?;
	Ok(())
}

pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let args = arguments(rest);
	match name {
		"incbin" => incbin(pass, &args)?,
		"fopen" => {
			expect_arguments(name, &args, 2, 2)?;
			let path = resolve(pass, args[1]);
			// fail here rather than on the first read
			pass.store.binary(&path)?;
			let handle: Name = args[0].into();
			pass.ctx.handles.insert(handle, FileHandle { path, position: 0 });
		}
		"fread" => {
			expect_arguments(name, &args, 2, 3)?;
			let width = match args.get(2) {
				Some(width) => pass.ctx.eval_u32(width)? as usize,
				None => 1,
			};
			if !(1..=8).contains(&width) {
				return Err(Error::directive(format!("cannot read {width} byte(s) at once")));
			}
			let FileHandle { path, position } = handle(pass, args[0])?.clone();
			let data = pass.store.binary(&path)?;
			let bytes = data.get(position..position + width).ok_or_else(|| {
				Error::directive(format!("read past the end of '{}'", path.display()))
			})?;
			let value = read_le(bytes);
			handle(pass, args[0])?.position += width;
			define_value(pass, args[1], value as f64)?;
		}
		"fseek" => {
			expect_arguments(name, &args, 2, 2)?;
			let offset = pass.ctx.eval_u32(args[1])? as usize;
			handle(pass, args[0])?.position = offset;
		}
		"fsize" => {
			expect_arguments(name, &args, 2, 2)?;
			let path = handle(pass, args[0])?.path.clone();
			let size = pass.store.binary(&path)?.len();
			define_value(pass, args[1], size as f64)?;
		}
		"fclose" => {
			expect_arguments(name, &args, 1, 1)?;
			if pass.ctx.handles.remove(args[0]).is_none() {
				return Err(Error::directive(format!("no open file '{}'", args[0])));
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
	fn reads_are_little_endian() {
		assert_eq!(read_le(&[0x34, 0x12]), 0x1234);
		assert_eq!(read_le(&[0xFF]), 0xFF);
		assert_eq!(read_le(&[]), 0);
	}
}
