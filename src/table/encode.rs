use std::fmt;

use super::{Encoding, Instruction};
use crate::expr::types::le_bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
	OutOfRange { value: i64, min: i64, max: i64 },
	BranchRange { offset: i64 },
	BitIndex(i64),
	Arguments { expected: usize, found: usize },
}

impl std::error::Error for EncodeError {}

impl fmt::Display for EncodeError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::OutOfRange { value, min, max } => write!(fmt, "value {value} out of range ({min} to {max})"),
			Self::BranchRange { offset } => write!(fmt, "relative jump out of range ({offset})"),
			Self::BitIndex(bit) => write!(fmt, "bit index {bit} out of range (0 to 7)"),
			Self::Arguments { expected, found } => write!(fmt, "expected {expected} operand(s), found {found}"),
		}
	}
}

/// Accepted range of a value stored in `bytes` bytes, signed or unsigned.
fn range(bytes: usize) -> (i64, i64) {
	if bytes >= 8 {
		return (i64::MIN, i64::MAX);
	}
	let bits = 8 * bytes as u32;
	(-(1i64 << (bits - 1)), (1i64 << bits) - 1)
}

fn first(args: &[i64]) -> Result<i64, EncodeError> {
	args.first()
		.copied()
		.ok_or(EncodeError::Arguments { expected: 1, found: 0 })
}

fn fit(value: i64, bytes: usize) -> Result<Vec<u8>, EncodeError> {
	let (min, max) = range(bytes);
	if !(min..=max).contains(&value) {
		return Err(EncodeError::OutOfRange { value, min, max });
	}
	Ok(le_bytes(value, bytes))
}

/// Machine code for `ins` with evaluated operands `args`, placed at `address`.
pub fn encode(ins: &Instruction, args: &[i64], address: i64) -> Result<Vec<u8>, EncodeError> {
	let expected = ins.arity();
	if args.len() != expected {
		return Err(EncodeError::Arguments { expected, found: args.len() });
	}
	let size = ins.size as usize;
	let trailing = size.saturating_sub(ins.opcode.len());
	let mut out = ins.opcode.clone();
	match ins.encoding {
		Encoding::NoTouch | Encoding::Swap => {
			let Some(&arg) = args.first() else {
				return Ok(out);
			};
			let mut value = arg.checked_shl(ins.shift).unwrap_or_default() | ins.or as i64;
			if ins.encoding == Encoding::Swap {
				value = ((value & 0xFF) << 8) | ((value >> 8) & 0xFF);
			}
			if trailing == 0 {
				if let Some(last) = out.last_mut() {
					*last |= fit(value, 1)?[0];
				}
			} else {
				out.extend(fit(value, trailing)?);
			}
		}
		Encoding::R1 | Encoding::R2 => {
			let offset = first(args)? - (address + size as i64);
			let bytes = if ins.encoding == Encoding::R1 { 1 } else { 2 };
			let half = 1i64 << (8 * bytes - 1);
			if !(-half..half).contains(&offset) {
				return Err(EncodeError::BranchRange { offset });
			}
			out.extend(le_bytes(offset, bytes));
		}
		Encoding::ZIdX => match args {
			[disp, value] => {
				out.extend(fit(*disp, 1)?);
				out.extend(fit(*value, 1)?);
			}
			// DD CB d op
			[disp] if ins.opcode.len() == 3 && size == 4 => {
				let last = out.pop().unwrap_or_default();
				out.extend(fit(*disp, 1)?);
				out.push(last);
			}
			[disp] => out.extend(fit(*disp, trailing.max(1))?),
			_ => {}
		},
		Encoding::ZBit => {
			let bit = first(args)?;
			if !(0..=7).contains(&bit) {
				return Err(EncodeError::BitIndex(bit));
			}
			let bits = (bit as u8) << 3;
			let last = out.pop().unwrap_or_default();
			if let Some(&disp) = args.get(1) {
				out.extend(fit(disp, 1)?);
			}
			out.push(last | bits);
		}
		Encoding::Rst => {
			let base = out.first().copied().unwrap_or_default() as i64;
			let value = fit(base + first(args)?, 1)?;
			out = value;
		}
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ins(operands: &str, opcode: &[u8], size: u32, encoding: Encoding) -> Instruction {
		Instruction {
			mnemonic: "TEST".into(),
			operands: operands.into(),
			opcode: opcode.to_vec(),
			size,
			encoding,
			shift: 0,
			or: 0,
		}
	}

	#[test]
	fn immediate_bytes() {
		let ld = ins("HL,*", &[0x21], 3, Encoding::NoTouch);
		assert_eq!(encode(&ld, &[0x1234], 0), Ok(vec![0x21, 0x34, 0x12]));
		assert_eq!(encode(&ld, &[-1], 0), Ok(vec![0x21, 0xFF, 0xFF]));
		assert!(matches!(encode(&ld, &[0x10000], 0), Err(EncodeError::OutOfRange { .. })));
		let ld = ins("A,*", &[0x3E], 2, Encoding::NoTouch);
		assert!(encode(&ld, &[-128], 0).is_ok());
		assert!(encode(&ld, &[-129], 0).is_err());
		assert!(encode(&ld, &[256], 0).is_err());
	}

	#[test]
	fn relative_branch() {
		let jr = ins("*", &[0x18], 2, Encoding::R1);
		// target = address + size + 100
		assert_eq!(encode(&jr, &[0x8000 + 2 + 100], 0x8000), Ok(vec![0x18, 0x64]));
		assert_eq!(encode(&jr, &[0x8000], 0x8000), Ok(vec![0x18, 0xFE]));
		assert_eq!(
			encode(&jr, &[0x8000 + 2 + 200], 0x8000),
			Err(EncodeError::BranchRange { offset: 200 }),
		);
		assert_eq!(encode(&jr, &[0x8000 + 2 - 128], 0x8000), Ok(vec![0x18, 0x80]));
	}

	#[test]
	fn indexed() {
		let ld = ins("(IX+*),*", &[0xDD, 0x36], 4, Encoding::ZIdX);
		assert_eq!(encode(&ld, &[-2, 0x55], 0), Ok(vec![0xDD, 0x36, 0xFE, 0x55]));
		let ld = ins("A,(IX+*)", &[0xDD, 0x7E], 3, Encoding::ZIdX);
		assert_eq!(encode(&ld, &[5], 0), Ok(vec![0xDD, 0x7E, 0x05]));
		let rlc = ins("(IX+*)", &[0xDD, 0xCB, 0x06], 4, Encoding::ZIdX);
		assert_eq!(encode(&rlc, &[3], 0), Ok(vec![0xDD, 0xCB, 0x03, 0x06]));
	}

	#[test]
	fn bit_operations() {
		let bit = ins("*,A", &[0xCB, 0x47], 2, Encoding::ZBit);
		assert_eq!(encode(&bit, &[7], 0), Ok(vec![0xCB, 0x7F]));
		assert_eq!(encode(&bit, &[8], 0), Err(EncodeError::BitIndex(8)));
		let set = ins("*,(IY+*)", &[0xFD, 0xCB, 0xC6], 4, Encoding::ZBit);
		assert_eq!(encode(&set, &[1, 4], 0), Ok(vec![0xFD, 0xCB, 0x04, 0xCE]));
	}

	#[test]
	fn restart_and_swap() {
		let rst = ins("*", &[0xC7], 1, Encoding::Rst);
		assert_eq!(encode(&rst, &[0x38], 0), Ok(vec![0xFF]));
		let swap = ins("*", &[0x01], 3, Encoding::Swap);
		assert_eq!(encode(&swap, &[0x1234], 0), Ok(vec![0x01, 0x12, 0x34]));
	}

	#[test]
	fn rules_without_operands_fail() {
		let jr = ins("", &[0x18], 2, Encoding::R1);
		assert_eq!(encode(&jr, &[], 0), Err(EncodeError::Arguments { expected: 1, found: 0 }));
		let rst = ins("", &[0xC7], 1, Encoding::Rst);
		assert!(encode(&rst, &[], 0).is_err());
		let wide = ins("*", &[0x01], 10, Encoding::NoTouch);
		assert!(encode(&wide, &[-1], 0).is_ok());
	}

	#[test]
	fn operand_count() {
		let nop = ins("", &[0x00], 1, Encoding::NoTouch);
		assert_eq!(encode(&nop, &[], 0), Ok(vec![0x00]));
		assert_eq!(encode(&nop, &[1], 0), Err(EncodeError::Arguments { expected: 0, found: 1 }));
	}
}
