//! Instruction table: loading, operand matching and encoding.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::text::squeeze;
use crate::Name;

mod encode;
mod grammar;
pub mod matcher;

pub use encode::{encode, EncodeError};

const Z80_TABLE: &str = include_str!("../../tables/z80.tab");

#[derive(Debug)]
pub enum TableError {
	Io(PathBuf, std::io::Error),
	Syntax(String),
	UnknownRule { line: usize, rule: String },
	Opcode { line: usize, opcode: String },
	Size { line: usize, mnemonic: Name },
	/// A row its rule cannot encode
	Form { line: usize, mnemonic: Name, problem: &'static str },
}

impl std::error::Error for TableError {}

impl fmt::Display for TableError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Io(path, e) => write!(fmt, "unable to read table '{}': {e}", path.display()),
			Self::Syntax(msg) => write!(fmt, "instruction table: {msg}"),
			Self::UnknownRule { line, rule } => write!(fmt, "instruction table line {line}: unknown rule '{rule}'"),
			Self::Opcode { line, opcode } => write!(fmt, "instruction table line {line}: bad opcode '{opcode}'"),
			Self::Size { line, mnemonic } => {
				write!(fmt, "instruction table line {line}: size of '{mnemonic}' smaller than its opcode")
			}
			Self::Form { line, mnemonic, problem } => write!(fmt, "instruction table line {line}: '{mnemonic}' {problem}"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
	/// Operand appended as little-endian bytes
	NoTouch,
	/// 8-bit relative branch
	R1,
	/// 16-bit relative branch
	R2,
	/// Index register displacement (and immediate)
	ZIdX,
	/// Bit number folded into the last opcode byte
	ZBit,
	/// Restart vector added to the opcode
	Rst,
	/// Byte swapped 16-bit operand
	Swap,
}

impl FromStr for Encoding {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s.to_ascii_uppercase().as_str() {
			"NOP" => Self::NoTouch,
			"R1" => Self::R1,
			"R2" => Self::R2,
			"ZIX" => Self::ZIdX,
			"ZBIT" => Self::ZBit,
			"RST" => Self::Rst,
			"SWAP" => Self::Swap,
			_ => return Err(()),
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
	pub mnemonic: Name,
	/// Upper case pattern, `*` for each operand expression
	pub operands: Name,
	/// Fixed bytes in emission order
	pub opcode: Vec<u8>,
	pub size: u32,
	pub encoding: Encoding,
	pub shift: u32,
	pub or: u32,
}

impl Instruction {
	pub fn arity(&self) -> usize {
		self.operands.matches('*').count()
	}
}

/// A matched instruction form with the operand expressions it captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
	pub index: usize,
	pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Group {
	bare: Option<usize>,
	exact: HashMap<Name, usize>,
	wildcard: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct InstructionSet {
	instructions: Vec<Instruction>,
	groups: HashMap<Name, Group>,
}

impl InstructionSet {
	/// The bundled Z80 table.
	pub fn z80() -> Result<Self, TableError> {
		Self::parse(Z80_TABLE)
	}

	pub fn parse(src: &str) -> Result<Self, TableError> {
		Ok(Self::from_instructions(grammar::parse(src)?))
	}

	pub fn load(path: &Path) -> Result<Self, TableError> {
		let src = std::fs::read_to_string(path).map_err(|e| TableError::Io(path.to_owned(), e))?;
		Self::parse(&src)
	}

	pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
		let mut groups: HashMap<Name, Group> = HashMap::new();
		for (idx, ins) in instructions.iter().enumerate() {
			let group = groups.entry(ins.mnemonic.clone()).or_default();
			if ins.operands.is_empty() {
				group.bare.get_or_insert(idx);
			} else if ins.arity() == 0 {
				group.exact.entry(ins.operands.clone()).or_insert(idx);
			} else {
				group.wildcard.push(idx);
			}
		}
		debug!("{} instruction forms, {} mnemonics", instructions.len(), groups.len());
		Self { instructions, groups }
	}

	pub fn is_mnemonic(&self, word: &str) -> bool {
		self.groups.contains_key(word.to_ascii_uppercase().as_str())
	}

	pub fn instruction(&self, index: usize) -> &Instruction {
		&self.instructions[index]
	}

	/// Finds the form of `mnemonic` for `operands`: the bare form, then exact operand text,
	/// then wildcard forms in table order.
	pub fn find(&self, mnemonic: &str, operands: &str) -> Option<Match> {
		let group = self.groups.get(mnemonic.to_ascii_uppercase().as_str())?;
		let text = squeeze(operands);
		if text.is_empty() {
			return group.bare.map(|index| Match { index, args: Vec::new() });
		}
		let upper = text.to_ascii_uppercase();
		if let Some(&index) = group.exact.get(upper.as_str()) {
			return Some(Match { index, args: Vec::new() });
		}
		group.wildcard.iter().find_map(|&index| {
			let caps = matcher::capture(&self.instructions[index].operands, &text)?;
			Some(Match {
				index,
				args: caps.into_iter().map(String::from).collect(),
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	type TestResult = Result<(), TableError>;

	fn opcode(set: &InstructionSet, mnemonic: &str, operands: &str) -> Option<(Vec<u8>, Vec<String>)> {
		set.find(mnemonic, operands)
			.map(|m| (set.instruction(m.index).opcode.clone(), m.args))
	}

	#[test]
	fn bundled_table_loads() -> TestResult {
		let set = InstructionSet::z80()?;
		assert!(set.is_mnemonic("ld"));
		assert!(set.is_mnemonic("DJNZ"));
		assert!(!set.is_mnemonic("mov"));
		Ok(())
	}

	#[test]
	fn exact_forms_win() -> TestResult {
		let set = InstructionSet::z80()?;
		assert_eq!(opcode(&set, "ld", "a, b"), Some((vec![0x78], vec![])));
		assert_eq!(opcode(&set, "nop", ""), Some((vec![0x00], vec![])));
		assert_eq!(opcode(&set, "ex", "af,af'"), Some((vec![0x08], vec![])));
		assert_eq!(opcode(&set, "jp", "(hl)"), Some((vec![0xE9], vec![])));
		assert_eq!(opcode(&set, "ld", "a,(ix)"), Some((vec![0xDD, 0x7E, 0x00], vec![])));
		Ok(())
	}

	#[test]
	fn wildcard_order() -> TestResult {
		let set = InstructionSet::z80()?;
		assert_eq!(opcode(&set, "LD", "A,(IX+3)"), Some((vec![0xDD, 0x7E], vec!["3".into()])));
		assert_eq!(opcode(&set, "LD", "A,(label)"), Some((vec![0x3A], vec!["label".into()])));
		assert_eq!(opcode(&set, "LD", "A,label"), Some((vec![0x3E], vec!["label".into()])));
		assert_eq!(opcode(&set, "LD", "a,(1)+(2)"), Some((vec![0x3E], vec!["(1)+(2)".into()])));
		assert_eq!(opcode(&set, "JP", "nz,loop"), Some((vec![0xC2], vec!["loop".into()])));
		assert_eq!(opcode(&set, "jp", "loop"), Some((vec![0xC3], vec!["loop".into()])));
		assert_eq!(opcode(&set, "bit", "3,(iy-1)"), Some((vec![0xFD, 0xCB, 0x46], vec!["3".into(), "-1".into()])));
		Ok(())
	}

	#[test]
	fn unknown_forms() -> TestResult {
		let set = InstructionSet::z80()?;
		assert_eq!(set.find("mov", "a,b"), None);
		assert_eq!(set.find("ld", ""), None);
		assert_eq!(set.find("nop", "a"), None);
		Ok(())
	}
}
