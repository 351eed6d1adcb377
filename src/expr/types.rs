use std::fmt;

use crate::Name;

/// Type attached to variables, struct members and casts.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
	Int { bytes: u8, signed: bool },
	Fixed { int_bits: u8, frac_bits: u8, signed: bool },
	/// TI-style BCD float: sign byte, biased exponent, seven mantissa bytes
	Float,
	Char,
	Struct(Name),
}

impl DataType {
	/// Built-in type names. Struct types are resolved by the caller.
	pub fn builtin(name: &str) -> Option<Self> {
		let lower = name.to_ascii_lowercase();
		let ty = match lower.as_str() {
			"byte" => Self::Int { bytes: 1, signed: false },
			"sbyte" => Self::Int { bytes: 1, signed: true },
			"word" => Self::Int { bytes: 2, signed: false },
			"sword" => Self::Int { bytes: 2, signed: true },
			"uint24" => Self::Int { bytes: 3, signed: false },
			"int24" => Self::Int { bytes: 3, signed: true },
			"dword" => Self::Int { bytes: 4, signed: false },
			"sdword" => Self::Int { bytes: 4, signed: true },
			"char" => Self::Char,
			"float" | "tifloat" => Self::Float,
			_ => return Self::fixed(&lower),
		};
		Some(ty)
	}

	/// `fixed8.8` / `ufixed4.12`
	fn fixed(name: &str) -> Option<Self> {
		let (signed, bits) = if let Some(bits) = name.strip_prefix("ufixed") {
			(false, bits)
		} else {
			(true, name.strip_prefix("fixed")?)
		};
		let (int_bits, frac_bits) = bits.split_once('.')?;
		let int_bits: u8 = int_bits.parse().ok()?;
		let frac_bits: u8 = frac_bits.parse().ok()?;
		let total = int_bits as u32 + frac_bits as u32;
		if total == 0 || total > 32 {
			return None;
		}
		Some(Self::Fixed { int_bits, frac_bits, signed })
	}

	/// Size in bytes, `None` for structs.
	pub fn size(&self) -> Option<u32> {
		match self {
			Self::Int { bytes, .. } => Some(*bytes as u32),
			Self::Fixed { int_bits, frac_bits, .. } => Some((*int_bits as u32 + *frac_bits as u32).div_ceil(8)),
			Self::Float => Some(9),
			Self::Char => Some(1),
			Self::Struct(_) => None,
		}
	}

	fn int_range(bits: u32, signed: bool) -> (f64, f64) {
		if signed {
			let half = 2f64.powi(bits as i32 - 1);
			(-half, half - 1.0)
		} else {
			(0.0, 2f64.powi(bits as i32) - 1.0)
		}
	}

	/// Saturating conversion of `value` into this type's domain.
	pub fn cast(&self, value: f64) -> f64 {
		match self {
			Self::Int { bytes, signed } => {
				let (min, max) = Self::int_range(*bytes as u32 * 8, *signed);
				value.trunc().clamp(min, max)
			}
			Self::Fixed { int_bits, frac_bits, signed } => {
				let scale = 2f64.powi(*frac_bits as i32);
				let (min, max) = Self::int_range(*int_bits as u32 + *frac_bits as u32, *signed);
				(value * scale).trunc().clamp(min, max) / scale
			}
			Self::Char => value.trunc().clamp(0.0, 255.0),
			Self::Float | Self::Struct(_) => value,
		}
	}

	/// Whether `value` can be stored without truncation of its integer part.
	pub fn fits(&self, value: f64) -> bool {
		match self {
			// Integers accept both signed and unsigned readings of the same width.
			Self::Int { bytes, .. } => {
				let bits = *bytes as u32 * 8;
				let (min, _) = Self::int_range(bits, true);
				let (_, max) = Self::int_range(bits, false);
				(min..=max).contains(&value.trunc())
			}
			Self::Fixed { int_bits, frac_bits, signed } => {
				let (min, max) = Self::int_range(*int_bits as u32 + *frac_bits as u32, *signed);
				(min..=max).contains(&(value * 2f64.powi(*frac_bits as i32)).trunc())
			}
			Self::Char => (0.0..=255.0).contains(&value.trunc()),
			Self::Float | Self::Struct(_) => true,
		}
	}

	/// Little-endian bytes of `value` in this type, `None` for structs.
	pub fn byte_representation(&self, value: f64) -> Option<Vec<u8>> {
		match self {
			Self::Int { bytes, .. } => Some(le_bytes(value.trunc() as i64, *bytes as usize)),
			Self::Fixed { int_bits, frac_bits, .. } => {
				let raw = (value * 2f64.powi(*frac_bits as i32)).round() as i64;
				let bytes = (*int_bits as usize + *frac_bits as usize).div_ceil(8);
				Some(le_bytes(raw, bytes))
			}
			Self::Char => Some(vec![value.trunc() as i64 as u8]),
			Self::Float => Some(ti_float(value).to_vec()),
			Self::Struct(_) => None,
		}
	}
}

impl fmt::Display for DataType {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Int { bytes: 1, signed: false } => write!(fmt, "byte"),
			Self::Int { bytes: 1, signed: true } => write!(fmt, "sbyte"),
			Self::Int { bytes: 2, signed: false } => write!(fmt, "word"),
			Self::Int { bytes: 2, signed: true } => write!(fmt, "sword"),
			Self::Int { bytes: 3, signed: false } => write!(fmt, "uint24"),
			Self::Int { bytes: 3, signed: true } => write!(fmt, "int24"),
			Self::Int { bytes: 4, signed: false } => write!(fmt, "dword"),
			Self::Int { bytes: 4, signed: true } => write!(fmt, "sdword"),
			Self::Int { bytes, signed } => write!(fmt, "int{}{}", bytes * 8, if *signed { "" } else { "u" }),
			Self::Fixed { int_bits, frac_bits, signed: true } => write!(fmt, "fixed{int_bits}.{frac_bits}"),
			Self::Fixed { int_bits, frac_bits, signed: false } => write!(fmt, "ufixed{int_bits}.{frac_bits}"),
			Self::Float => write!(fmt, "float"),
			Self::Char => write!(fmt, "char"),
			Self::Struct(name) => write!(fmt, "{name}"),
		}
	}
}

pub(crate) fn le_bytes(value: i64, count: usize) -> Vec<u8> {
	value.to_le_bytes().into_iter().take(count).collect()
}

/// Encodes `value` as a 9-byte TI BCD float.
pub fn ti_float(value: f64) -> [u8; 9] {
	let mut out = [0u8; 9];
	if value == 0.0 || !value.is_finite() {
		out[1] = 0x80;
		return out;
	}
	if value < 0.0 {
		out[0] = 0x80;
	}
	// "d.ddddddddddddde±x", rounding done by the formatter
	let formatted = format!("{:.13e}", value.abs());
	let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
	let exponent: i32 = exponent.parse().unwrap_or(0);
	out[1] = (0x80 + exponent.clamp(-128, 127)) as u8;
	let digits: Vec<u8> = mantissa
		.bytes()
		.filter(u8::is_ascii_digit)
		.map(|d| d - b'0')
		.collect();
	for (idx, pair) in digits.chunks(2).take(7).enumerate() {
		let hi = pair[0];
		let lo = pair.get(1).copied().unwrap_or(0);
		out[2 + idx] = hi << 4 | lo;
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtin_names() {
		assert_eq!(DataType::builtin("WORD"), Some(DataType::Int { bytes: 2, signed: false }));
		assert_eq!(DataType::builtin("fixed8.8"), Some(DataType::Fixed { int_bits: 8, frac_bits: 8, signed: true }));
		assert_eq!(DataType::builtin("ufixed4.4").and_then(|t| t.size()), Some(1));
		assert_eq!(DataType::builtin("fixed40.8"), None);
		assert_eq!(DataType::builtin("Point"), None);
	}

	#[test]
	fn casts_saturate() {
		let byte = DataType::builtin("byte").unwrap();
		assert_eq!(byte.cast(300.0), 255.0);
		assert_eq!(byte.cast(-4.0), 0.0);
		let sbyte = DataType::builtin("sbyte").unwrap();
		assert_eq!(sbyte.cast(-200.0), -128.0);
		assert_eq!(sbyte.cast(12.9), 12.0);
		let fixed = DataType::builtin("ufixed4.4").unwrap();
		assert_eq!(fixed.cast(1.3), 1.25);
		assert_eq!(fixed.cast(100.0), 15.9375);
	}

	#[test]
	fn integer_bytes_are_little_endian() {
		let word = DataType::builtin("word").unwrap();
		assert_eq!(word.byte_representation(0x1234 as f64), Some(vec![0x34, 0x12]));
		assert_eq!(word.byte_representation(-1.0), Some(vec![0xFF, 0xFF]));
		assert!(word.fits(-32768.0));
		assert!(word.fits(65535.0));
		assert!(!word.fits(65536.0));
	}

	#[test]
	fn fixed_point_bytes() {
		let fixed = DataType::builtin("fixed8.8").unwrap();
		assert_eq!(fixed.byte_representation(1.5), Some(vec![0x80, 0x01]));
		assert_eq!(fixed.byte_representation(-1.0), Some(vec![0x00, 0xFF]));
	}

	#[test]
	fn ti_floats() {
		assert_eq!(ti_float(0.0), [0x00, 0x80, 0, 0, 0, 0, 0, 0, 0]);
		assert_eq!(ti_float(1.0), [0x00, 0x80, 0x10, 0, 0, 0, 0, 0, 0]);
		assert_eq!(ti_float(-2.5), [0x80, 0x80, 0x25, 0, 0, 0, 0, 0, 0]);
		assert_eq!(ti_float(100.0), [0x00, 0x82, 0x10, 0, 0, 0, 0, 0, 0]);
		assert_eq!(ti_float(0.5), [0x00, 0x7F, 0x50, 0, 0, 0, 0, 0, 0]);
		assert_eq!(ti_float(3.14159265358979), [0x00, 0x80, 0x31, 0x41, 0x59, 0x26, 0x53, 0x58, 0x98]);
	}
}
