use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use tracing::{instrument, trace};

use super::{Encoding, Instruction, TableError};

#[derive(Parser)]
#[grammar = "table/table.pest"]
struct TableParser;

fn rename_rules(rule: &Rule) -> String {
	match rule {
		Rule::EOI => "end of file",
		Rule::row | Rule::table => "instruction row",
		Rule::mnemonic => "mnemonic",
		Rule::operands => "operands",
		Rule::opcode => "opcode bytes",
		Rule::size => "size",
		Rule::encoding => "encoding rule",
		Rule::shift => "shift",
		Rule::or_mask => "or mask",
		_ => "token",
	}
	.to_owned()
}

#[instrument(skip_all)]
pub(super) fn parse(src: &str) -> Result<Vec<Instruction>, TableError> {
	let table = TableParser::parse(Rule::table, src)
		.map_err(|e| TableError::Syntax(e.renamed_rules(rename_rules).to_string()))?;
	let mut out = Vec::new();
	for pair in table.flatten().filter(|pair| pair.as_rule() == Rule::row) {
		trace!("row '{}'", pair.as_str());
		out.push(parse_row(pair)?);
	}
	Ok(out)
}

fn parse_row(row: Pair<Rule>) -> Result<Instruction, TableError> {
	let (line, _) = row.line_col();
	let mut ins = Instruction {
		mnemonic: "".into(),
		operands: "".into(),
		opcode: Vec::new(),
		size: 0,
		encoding: Encoding::NoTouch,
		shift: 0,
		or: 0,
	};
	for field in row.into_inner() {
		let txt = field.as_str();
		match field.as_rule() {
			Rule::mnemonic => ins.mnemonic = txt.to_ascii_uppercase().into(),
			Rule::operands if txt == "\"\"" => {}
			Rule::operands => ins.operands = txt.to_ascii_uppercase().into(),
			Rule::opcode => {
				ins.opcode = (0..txt.len())
					.step_by(2)
					.map(|idx| u8::from_str_radix(&txt[idx..idx + 2], 16))
					.collect::<Result<_, _>>()
					.map_err(|_| TableError::Opcode { line, opcode: txt.into() })?;
			}
			Rule::size => {
				ins.size = txt
					.parse()
					.map_err(|_| TableError::Size { line, mnemonic: ins.mnemonic.clone() })?;
			}
			Rule::encoding => {
				ins.encoding = txt
					.parse()
					.map_err(|_| TableError::UnknownRule { line, rule: txt.into() })?;
			}
			Rule::shift => {
				ins.shift = txt
					.parse()
					.map_err(|_| TableError::Syntax(format!("line {line}: bad shift '{txt}'")))?;
			}
			Rule::or_mask => {
				ins.or = u32::from_str_radix(txt, 16)
					.map_err(|_| TableError::Syntax(format!("line {line}: bad or mask '{txt}'")))?;
			}
			_ => unreachable!("{field}"),
		}
	}
	if (ins.size as usize) < ins.opcode.len() {
		return Err(TableError::Size { line, mnemonic: ins.mnemonic });
	}
	let trailing = ins.size as usize - ins.opcode.len();
	let problem = match ins.encoding {
		Encoding::R1 | Encoding::R2 | Encoding::ZBit | Encoding::Rst if ins.arity() == 0 => {
			Some("needs an operand for its rule")
		}
		_ if trailing > 4 => Some("has more than 4 operand bytes"),
		_ if ins.shift >= 32 => Some("shifts its operand by 32 bits or more"),
		_ => None,
	};
	match problem {
		Some(problem) => Err(TableError::Form { line, mnemonic: ins.mnemonic, problem }),
		None => Ok(ins),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_rows_and_comments() -> Result<(), TableError> {
		let src = "; header\n\nNOP \"\" 00 1 NOP\nld a,(ix+*) DD7E 3 ZIX ; trailing\nIM * ED46 2 NOP 3 8\n";
		let rows = parse(src)?;
		assert_eq!(rows.len(), 3);
		assert_eq!(rows[0].operands.as_ref(), "");
		assert_eq!(rows[1].mnemonic.as_ref(), "LD");
		assert_eq!(rows[1].operands.as_ref(), "A,(IX+*)");
		assert_eq!(rows[1].opcode, [0xDD, 0x7E]);
		assert_eq!(rows[1].encoding, Encoding::ZIdX);
		assert_eq!((rows[2].shift, rows[2].or), (3, 8));
		Ok(())
	}

	#[test]
	fn rejects_bad_rows() {
		assert!(matches!(parse("LD A,* 3E 2 FOO\n"), Err(TableError::UnknownRule { .. })));
		assert!(matches!(parse("LD A,* 3E3E3E 2 NOP\n"), Err(TableError::Size { .. })));
		assert!(matches!(parse("LD A,* 3E\n"), Err(TableError::Syntax(_))));
		assert!(matches!(parse("JR \"\" 18 2 R1\n"), Err(TableError::Form { line: 1, .. })));
		assert!(matches!(parse("RST \"\" C7 1 RST\n"), Err(TableError::Form { .. })));
		assert!(matches!(parse("LD HL,* 21 9 NOP\n"), Err(TableError::Form { .. })));
		assert!(matches!(parse("IM * ED46 2 NOP 40\n"), Err(TableError::Form { .. })));
	}
}
