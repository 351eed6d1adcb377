//! Data emission: bytes, words, strings, fills and generated tables.

use std::f64::consts::TAU;

use rand::Rng;
use tracing::trace;

use super::expect_arguments;
use crate::assembler::Pass;
use crate::error::{Error, Severity};
use crate::expr::types::DataType;
use crate::text::{arguments, unquote};

/// Most entries a generated table may have.
const MAX_TABLE: usize = 0x10000;

pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let args = arguments(rest);
	match name {
		"db" | "byte" | "text" | "asc" => values(pass, name, &args, 1),
		"dw" | "word" => values(pass, name, &args, 2),
		"dl" | "long" => values(pass, name, &args, 4),
		"dfloat" => floats(pass, &args),
		"fill" => {
			expect_arguments(name, &args, 1, 2)?;
			fill(pass, args[0], Some(args.get(1).copied().unwrap_or("0")))
		}
		"ds" | "block" => {
			expect_arguments(name, &args, 1, 2)?;
			fill(pass, args[0], args.get(1).copied())
		}
		"align" => {
			expect_arguments(name, &args, 1, 1)?;
			let boundary = pass.ctx.eval_int(args[0])?;
			if boundary <= 0 {
				return Err(Error::directive(format!("cannot align to {boundary}")));
			}
			let pc = pass.ctx.pages.pc() as i64;
			pass.ctx.pages.advance(((boundary - pc % boundary) % boundary) as u32);
			Ok(())
		}
		"dbrnd" => random(pass, name, &args, 1),
		"dwrnd" => random(pass, name, &args, 2),
		"dbsin" | "dbcos" | "dbtan" => trig(pass, name, &args, 1),
		"dwsin" | "dwcos" | "dwtan" => trig(pass, name, &args, 2),
		"asciimap" => ascii_map(pass, &args),
		_ => unreachable!("{name}"),
	}
}

/// Integer type of `width` bytes. Values may use either its signed or unsigned range.
fn int_type(width: usize) -> DataType {
	DataType::Int { bytes: width as u8, signed: false }
}

fn int_bytes(value: i64, width: usize) -> Vec<u8> {
	int_type(width).byte_representation(value as f64).unwrap_or_default()
}

/// Out of range values are truncated with a warning, or rejected in strict mode.
fn check_range(pass: &mut Pass, value: i64, width: usize) -> Result<(), Error> {
	if int_type(width).fits(value as f64) {
		return Ok(());
	}
	let msg = format!("value {value} does not fit in {width} byte(s)");
	if pass.ctx.settings.strict {
		return Err(Error::directive(msg));
	}
	pass.ctx.report(Severity::Warning, format!("{msg}, truncated"));
	Ok(())
}

/// A double quoted argument as a string.
fn string_argument(arg: &str) -> Option<String> {
	if arg.starts_with('"') {
		unquote(arg)
	} else {
		None
	}
}

/// `.db`, `.dw`, `.dl`, `.text`. Strings give one value per character.
///
/// Every argument is emitted even when one fails, so addresses stay in step.
fn values(pass: &mut Pass, name: &str, args: &[&str], width: usize) -> Result<(), Error> {
	if args.is_empty() {
		return Err(Error::directive(format!(".{name} expects at least one value")));
	}
	let mut out = Vec::new();
	let mut failure = None;
	for arg in args {
		if let Some(text) = string_argument(arg) {
			for ch in text.chars() {
				out.extend(int_bytes(pass.ctx.char_byte(ch) as i64, width));
			}
			continue;
		}
		if pass.ctx.pass.is_labels() {
			out.resize(out.len() + width, 0);
			continue;
		}
		let value = pass
			.ctx
			.eval_int(arg)
			.map_err(Error::from)
			.and_then(|value| check_range(pass, value, width).map(|_| value));
		let value = value.unwrap_or_else(|e| {
			failure.get_or_insert(e);
			0
		});
		out.extend(int_bytes(value, width));
	}
	pass.ctx.emit(&out)?;
	failure.map_or(Ok(()), Err)
}

fn floats(pass: &mut Pass, args: &[&str]) -> Result<(), Error> {
	if args.is_empty() {
		return Err(Error::directive(".dfloat expects at least one value"));
	}
	let mut out = Vec::with_capacity(args.len() * 9);
	let mut failure = None;
	for arg in args {
		let value = if pass.ctx.pass.is_labels() {
			0.0
		} else {
			pass.ctx.eval(arg).unwrap_or_else(|e| {
				failure.get_or_insert(Error::from(e));
				0.0
			})
		};
		out.extend(DataType::Float.byte_representation(value).unwrap_or_default());
	}
	pass.ctx.emit(&out)?;
	failure.map_or(Ok(()), Err)
}

fn count(pass: &mut Pass, arg: &str) -> Result<u32, Error> {
	let count = pass.ctx.eval_int(arg)?;
	u32::try_from(count).map_err(|_| Error::directive(format!("invalid count {count}")))
}

/// `.fill`/`.ds`. Without a value the program counter only moves.
fn fill(pass: &mut Pass, count_arg: &str, value: Option<&str>) -> Result<(), Error> {
	let count = count(pass, count_arg)?;
	let Some(value) = value else {
		pass.ctx.pages.advance(count);
		return Ok(());
	};
	if pass.ctx.pass.is_labels() {
		pass.ctx.pages.advance(count);
		return Ok(());
	}
	let value = pass.ctx.eval_int(value)?;
	check_range(pass, value, 1)?;
	for _ in 0..count {
		pass.ctx.emit(&[value as u8])?;
	}
	Ok(())
}

fn random(pass: &mut Pass, name: &str, args: &[&str], width: usize) -> Result<(), Error> {
	expect_arguments(name, args, 3, 3)?;
	let count = count(pass, args[0])? as usize;
	if pass.ctx.pass.is_labels() {
		pass.ctx.pages.advance((count * width) as u32);
		return Ok(());
	}
	let min = pass.ctx.eval_int(args[1])?;
	let max = pass.ctx.eval_int(args[2])?;
	if min > max {
		return Err(Error::directive(format!("empty range {min} to {max}")));
	}
	check_range(pass, min, width)?;
	check_range(pass, max, width)?;
	let mut out = Vec::with_capacity(count * width);
	for _ in 0..count {
		let value = pass.ctx.rng.gen_range(min..=max);
		out.extend(int_bytes(value, width));
	}
	pass.ctx.emit(&out)?;
	Ok(())
}

/// Values of a `.dbsin`-style table: `amplitude * f(angle * 2pi / angles) + offset`.
fn table_values(name: &str, params: [f64; 6]) -> Result<Vec<i64>, Error> {
	let [angles, amplitude, start, end, step, offset] = params;
	if angles == 0.0 {
		return Err(Error::directive("a full turn cannot be 0 angles"));
	}
	if step == 0.0 || (end - start).signum() * step.signum() < 0.0 {
		return Err(Error::directive(format!("step {step} never reaches {end} from {start}")));
	}
	let func: fn(f64) -> f64 = match &name[2..] {
		"sin" => f64::sin,
		"cos" => f64::cos,
		_ => f64::tan,
	};
	let mut out = Vec::new();
	let mut angle = start;
	while (step > 0.0 && angle <= end) || (step < 0.0 && angle >= end) {
		if out.len() == MAX_TABLE {
			return Err(Error::directive(format!("table longer than {MAX_TABLE} entries")));
		}
		out.push((amplitude * func(angle * TAU / angles) + offset).round() as i64);
		angle += step;
	}
	Ok(out)
}

fn trig(pass: &mut Pass, name: &str, args: &[&str], width: usize) -> Result<(), Error> {
	expect_arguments(name, args, 6, 6)?;
	let mut params = [0.0; 6];
	for (param, arg) in params.iter_mut().zip(args) {
		*param = pass.ctx.eval(arg)?;
	}
	let values = table_values(name, params)?;
	trace!("{} entries", values.len());
	if pass.ctx.pass.is_labels() {
		pass.ctx.pages.advance((values.len() * width) as u32);
		return Ok(());
	}
	let mut out = Vec::with_capacity(values.len() * width);
	for value in values {
		check_range(pass, value, width)?;
		out.extend(int_bytes(value, width));
	}
	pass.ctx.emit(&out)?;
	Ok(())
}

/// `.asciimap from[, to], expr`. `{*}` in `expr` stands for the character being mapped.
fn ascii_map(pass: &mut Pass, args: &[&str]) -> Result<(), Error> {
	expect_arguments("asciimap", args, 2, 3)?;
	let (from, to, expr) = match args {
		[from, expr] => (*from, *from, *expr),
		[from, to, expr] => (*from, *to, *expr),
		_ => unreachable!(),
	};
	let from = pass.ctx.eval_int(from)?;
	let to = pass.ctx.eval_int(to)?;
	if !(0..=255).contains(&from) || !(0..=255).contains(&to) || from > to {
		return Err(Error::directive(format!("invalid character range {from} to {to}")));
	}
	for ch in from..=to {
		let value = pass.ctx.eval_int(&expr.replace("{*}", &ch.to_string()))?;
		check_range(pass, value, 1)?;
		pass.ctx.ascii_map[ch as usize] = value as u8;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sine_table() -> Result<(), Error> {
		let values = table_values("dbsin", [4.0, 100.0, 0.0, 3.0, 1.0, 128.0])?;
		assert_eq!(values, [128, 228, 128, 28]);
		let values = table_values("dwcos", [360.0, 10.0, 0.0, 180.0, 90.0, 0.0])?;
		assert_eq!(values, [10, 0, -10]);
		Ok(())
	}

	#[test]
	fn descending_table() -> Result<(), Error> {
		assert_eq!(table_values("dbsin", [4.0, 1.0, 1.0, 0.0, -1.0, 0.0])?, [1, 0]);
		Ok(())
	}

	#[test]
	fn bad_tables() {
		assert!(table_values("dbsin", [4.0, 1.0, 0.0, 3.0, 0.0, 0.0]).is_err());
		assert!(table_values("dbsin", [4.0, 1.0, 0.0, 3.0, -1.0, 0.0]).is_err());
		assert!(table_values("dbtan", [0.0, 1.0, 0.0, 3.0, 1.0, 0.0]).is_err());
	}

	#[test]
	fn integers_accept_either_reading() {
		assert_eq!(int_bytes(-1, 2), [0xFF, 0xFF]);
		assert_eq!(int_bytes(0x123456, 3), [0x56, 0x34, 0x12]);
		assert!(int_type(1).fits(-128.0) && int_type(1).fits(255.0));
		assert!(!int_type(1).fits(256.0) && !int_type(1).fits(-129.0));
	}

	#[test]
	fn strings_need_double_quotes() {
		assert_eq!(string_argument("\"hi\""), Some("hi".into()));
		assert_eq!(string_argument("'h'"), None);
	}
}
