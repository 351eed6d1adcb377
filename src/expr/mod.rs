//! Text rewriting expression evaluator.
//!
//! Braces, literals and parenthesised groups are rewritten into plain numbers first; what
//! remains is tokenised once and split at the last operator of the loosest precedence group.

use std::fmt;

use tracing::trace;

use crate::symbols::reusable::ReusableRef;
use crate::text::{is_name_char, opens_quote, quoted_end, unescape};

pub mod number;
pub mod types;

use number::{format_number, parse_number};
use types::DataType;

const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
	Empty,
	Malformed(String),
	UnknownLabel(String),
	UnknownFunction(String),
	DivideByZero,
	UnbalancedParens(String),
	UnterminatedString(String),
	Reusable(String),
	NotIntegral(f64),
	TooDeep,
}

impl std::error::Error for ExprError {}

impl fmt::Display for ExprError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Empty => write!(fmt, "expression expected"),
			Self::Malformed(txt) => write!(fmt, "malformed expression '{txt}'"),
			Self::UnknownLabel(name) => write!(fmt, "label '{name}' not found"),
			Self::UnknownFunction(name) => write!(fmt, "unknown function '{name}'"),
			Self::DivideByZero => write!(fmt, "division by zero"),
			Self::UnbalancedParens(txt) => write!(fmt, "unbalanced brackets in '{txt}'"),
			Self::UnterminatedString(txt) => write!(fmt, "unterminated string in '{txt}'"),
			Self::Reusable(txt) => write!(fmt, "invalid reusable label reference '{{{txt}}}'"),
			Self::NotIntegral(val) => write!(fmt, "value {val} is not an integer"),
			Self::TooDeep => write!(fmt, "expression nested too deeply"),
		}
	}
}

/// What an expression can see of the assembler.
pub trait Environment {
	/// Value of a label, recording the reference.
	fn label(&mut self, name: &str) -> Result<f64, ExprError>;
	/// Page number of a label (`:name`).
	fn page(&mut self, name: &str) -> Result<f64, ExprError>;
	/// Current program counter (`$`).
	fn address(&self) -> f64;
	fn reusable(&mut self, target: ReusableRef) -> Result<f64, ExprError>;
	/// Byte size of a type, struct or variable.
	fn size_of(&mut self, name: &str) -> Result<f64, ExprError>;
	fn is_defined(&mut self, name: &str) -> bool;
	/// Byte a character of a string literal stands for.
	fn map_char(&self, ch: char) -> u8 {
		ch as u32 as u8
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
	Or,
	And,
	BitOr,
	BitXor,
	BitAnd,
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	Shl,
	Shr,
	Add,
	Sub,
	Mul,
	Div,
	Rem,
}

/// Longest spelling first.
const OPERATORS: &[(&str, Op)] = &[
	("||", Op::Or),
	("&&", Op::And),
	("==", Op::Eq),
	("!=", Op::Ne),
	("<>", Op::Ne),
	("<=", Op::Le),
	(">=", Op::Ge),
	("<<", Op::Shl),
	(">>", Op::Shr),
	("|", Op::BitOr),
	("^", Op::BitXor),
	("&", Op::BitAnd),
	("=", Op::Eq),
	("<", Op::Lt),
	(">", Op::Gt),
	("+", Op::Add),
	("-", Op::Sub),
	("*", Op::Mul),
	("/", Op::Div),
	("%", Op::Rem),
];

impl Op {
	/// Binding strength, loosest is 0.
	fn group(self) -> u8 {
		match self {
			Self::Or => 0,
			Self::And => 1,
			Self::BitOr => 2,
			Self::BitXor => 3,
			Self::BitAnd => 4,
			Self::Eq | Self::Ne => 5,
			Self::Lt | Self::Le | Self::Gt | Self::Ge => 6,
			Self::Shl | Self::Shr => 7,
			Self::Add | Self::Sub => 8,
			Self::Mul | Self::Div | Self::Rem => 9,
		}
	}

	fn apply(self, lhs: f64, rhs: f64) -> Result<f64, ExprError> {
		let truth = |b: bool| if b { 1.0 } else { 0.0 };
		let (l, r) = (lhs as i64, rhs as i64);
		Ok(match self {
			Self::Or => truth(lhs != 0.0 || rhs != 0.0),
			Self::And => truth(lhs != 0.0 && rhs != 0.0),
			Self::BitOr => (l | r) as f64,
			Self::BitXor => (l ^ r) as f64,
			Self::BitAnd => (l & r) as f64,
			Self::Eq => truth(lhs == rhs),
			Self::Ne => truth(lhs != rhs),
			Self::Lt => truth(lhs < rhs),
			Self::Le => truth(lhs <= rhs),
			Self::Gt => truth(lhs > rhs),
			Self::Ge => truth(lhs >= rhs),
			Self::Shl => l.checked_shl(r.clamp(0, 64) as u32).unwrap_or(0) as f64,
			Self::Shr => l.checked_shr(r.clamp(0, 64) as u32).unwrap_or(if l < 0 { -1 } else { 0 }) as f64,
			Self::Add => lhs + rhs,
			Self::Sub => lhs - rhs,
			Self::Mul => lhs * rhs,
			Self::Div if rhs == 0.0 => return Err(ExprError::DivideByZero),
			Self::Div => lhs / rhs,
			Self::Rem if rhs == 0.0 => return Err(ExprError::DivideByZero),
			Self::Rem => lhs % rhs,
		})
	}
}

/// Evaluates `text` against `env`.
pub fn evaluate<E: Environment + ?Sized>(env: &mut E, text: &str) -> Result<f64, ExprError> {
	Evaluator { env, depth: 0 }.eval(text)
}

struct Evaluator<'e, E: ?Sized> {
	env: &'e mut E,
	depth: usize,
}

impl<E: Environment + ?Sized> Evaluator<'_, E> {
	fn eval(&mut self, text: &str) -> Result<f64, ExprError> {
		let text = text.trim();
		if text.is_empty() {
			return Err(ExprError::Empty);
		}
		self.depth += 1;
		if self.depth > MAX_DEPTH {
			return Err(ExprError::TooDeep);
		}
		trace!(text, "evaluating");
		let result = self.rewrite(text);
		self.depth -= 1;
		result
	}

	fn rewrite(&mut self, text: &str) -> Result<f64, ExprError> {
		let text = self.replace_braces(text)?;
		let text = self.replace_literals(&text)?;
		let text = self.replace_parens(&text)?;
		if let Some((cond, yes, no)) = split_ternary(&text) {
			let cond = self.eval(cond)?;
			return self.eval(if cond != 0.0 { yes } else { no });
		}
		let (values, ops) = self.tokenise(&text)?;
		reduce(&values, &ops)
	}

	/// `{+}`, `{--}`, `{@-1}`
	fn replace_braces(&mut self, text: &str) -> Result<String, ExprError> {
		let mut out = String::with_capacity(text.len());
		let mut rest = text;
		while let Some(open) = find_outside_literals(rest, '{') {
			let close = rest[open..]
				.find('}')
				.map(|idx| open + idx)
				.ok_or_else(|| ExprError::Malformed(text.into()))?;
			let inner = &rest[open + 1..close];
			let target = ReusableRef::parse(inner).ok_or_else(|| ExprError::Reusable(inner.into()))?;
			out.push_str(&rest[..open]);
			out.push_str(&format_number(self.env.reusable(target)?));
			rest = &rest[close + 1..];
		}
		out.push_str(rest);
		Ok(out)
	}

	/// String and character literals become their packed little-endian value.
	fn replace_literals(&mut self, text: &str) -> Result<String, ExprError> {
		let mut out = String::with_capacity(text.len());
		let mut last = 0;
		let mut idx = 0;
		while let Some(ch) = text[idx..].chars().next() {
			if (ch == '"' || ch == '\'') && opens_quote(text, idx) {
				let end = quoted_end(text, idx).ok_or_else(|| ExprError::UnterminatedString(text.into()))?;
				let body = unescape(&text[idx + 1..end - 1]);
				let packed = body
					.chars()
					.take(8)
					.enumerate()
					.fold(0u64, |acc, (n, ch)| acc | (self.env.map_char(ch) as u64) << (8 * n));
				out.push_str(&text[last..idx]);
				out.push_str(&format_number(packed as f64));
				idx = end;
				last = end;
				continue;
			}
			idx += ch.len_utf8();
		}
		out.push_str(&text[last..]);
		Ok(out)
	}

	/// Resolves the innermost group repeatedly until no brackets are left.
	fn replace_parens(&mut self, text: &str) -> Result<String, ExprError> {
		let mut text = text.to_string();
		loop {
			let Some(close) = text.find(')') else {
				if text.contains('(') {
					return Err(ExprError::UnbalancedParens(text));
				}
				return Ok(text);
			};
			let open = text[..close].rfind('(').ok_or_else(|| ExprError::UnbalancedParens(text.clone()))?;
			let start = text[..open]
				.char_indices()
				.rev()
				.take_while(|&(_, ch)| is_name_char(ch))
				.last()
				.map_or(open, |(idx, _)| idx);
			let name = &text[start..open];
			let inner = &text[open + 1..close];
			let value = self.call(name, inner)?;
			text.replace_range(start..=close, &format_number(value));
		}
	}

	fn call(&mut self, name: &str, inner: &str) -> Result<f64, ExprError> {
		let math: Option<fn(f64) -> f64> = match name.to_ascii_lowercase().as_str() {
			"" => return self.eval(inner),
			"sizeof" => return self.env.size_of(inner.trim()),
			"defined" => return Ok(if self.env.is_defined(inner.trim()) { 1.0 } else { 0.0 }),
			"abs" => Some(f64::abs),
			"sqrt" => Some(f64::sqrt),
			"sin" => Some(f64::sin),
			"cos" => Some(f64::cos),
			"tan" => Some(f64::tan),
			"asin" => Some(f64::asin),
			"acos" => Some(f64::acos),
			"atan" => Some(f64::atan),
			"log" => Some(f64::ln),
			"exp" => Some(f64::exp),
			"floor" => Some(f64::floor),
			"ceil" => Some(f64::ceil),
			"round" => Some(f64::round),
			"int" => Some(f64::trunc),
			_ => None,
		};
		if let Some(func) = math {
			return Ok(func(self.eval(inner)?));
		}
		match DataType::builtin(name) {
			Some(ty) => Ok(ty.cast(self.eval(inner)?)),
			None => Err(ExprError::UnknownFunction(name.into())),
		}
	}

	/// Alternating operands and operators, with unary prefixes already applied.
	fn tokenise(&mut self, text: &str) -> Result<(Vec<f64>, Vec<Op>), ExprError> {
		let malformed = || ExprError::Malformed(text.into());
		let mut values = Vec::new();
		let mut ops = Vec::new();
		let mut rest = text.trim_start();
		loop {
			let (value, after) = self.operand(rest).ok_or_else(malformed)??;
			values.push(value);
			rest = after.trim_start();
			if rest.is_empty() {
				return Ok((values, ops));
			}
			let (spelling, op) = OPERATORS
				.iter()
				.find(|(spelling, _)| rest.starts_with(spelling))
				.ok_or_else(malformed)?;
			ops.push(*op);
			rest = rest[spelling.len()..].trim_start();
		}
	}

	/// Reads one operand from the front of `text`. `None` when `text` does not start with one.
	fn operand<'t>(&mut self, text: &'t str) -> Option<Result<(f64, &'t str), ExprError>> {
		let mut chars = text.chars();
		let first = chars.next()?;
		let next = chars.next();
		let unary = |op: fn(f64) -> f64, rest: &'t str, me: &mut Self| {
			me.operand(rest.trim_start())
				.map(|res| res.map(|(value, rest)| (op(value), rest)))
		};
		match first {
			'¬' | '-' => unary(|v| -v, &text[first.len_utf8()..], self),
			'+' => unary(|v| v, &text[1..], self),
			'~' => unary(|v| !(v as i64) as f64, &text[1..], self),
			'!' => unary(|v| if v == 0.0 { 1.0 } else { 0.0 }, &text[1..], self),
			'%' if matches!(next, Some('0' | '1')) => literal(text),
			'@' if next.is_some_and(|c| c.is_digit(8)) => literal(text),
			'$' if next.is_some_and(|c| c.is_ascii_hexdigit()) => literal(text),
			'$' => Some(Ok((self.env.address(), &text[1..]))),
			':' => {
				let (name, rest) = take_name(&text[1..]);
				if name.is_empty() {
					return None;
				}
				Some(self.env.page(name).map(|page| (page, rest)))
			}
			'.' if next.is_some_and(|c| c.is_ascii_digit()) => {
				let (body, rest) = take_name(text);
				Some(parse_number(&format!("0{body}")).map(|v| (v, rest)).ok_or_else(|| ExprError::Malformed(body.into())))
			}
			c if c.is_ascii_digit() => literal(text),
			c if is_name_char(c) => {
				let (name, rest) = take_name(text);
				Some(self.env.label(name).map(|value| (value, rest)))
			}
			_ => None,
		}
	}
}

fn take_name(text: &str) -> (&str, &str) {
	let end = text.find(|c: char| !is_name_char(c)).unwrap_or(text.len());
	text.split_at(end)
}

fn literal(text: &str) -> Option<Result<(f64, &str), ExprError>> {
	let mut chars = text.char_indices();
	chars.next();
	let end = chars
		.find(|&(_, c)| !is_name_char(c) || c == '.' && text.starts_with('$'))
		.map_or(text.len(), |(idx, _)| idx);
	let (body, rest) = text.split_at(end);
	Some(
		parse_number(body)
			.map(|value| (value, rest))
			.ok_or_else(|| ExprError::Malformed(body.into())),
	)
}

fn reduce(values: &[f64], ops: &[Op]) -> Result<f64, ExprError> {
	let Some(loosest) = ops.iter().map(|op| op.group()).min() else {
		return Ok(values[0]);
	};
	let split = ops
		.iter()
		.rposition(|op| op.group() == loosest)
		.unwrap_or_default();
	let lhs = reduce(&values[..=split], &ops[..split])?;
	let rhs = reduce(&values[split + 1..], &ops[split + 1..])?;
	ops[split].apply(lhs, rhs)
}

fn find_outside_literals(text: &str, target: char) -> Option<usize> {
	let mut idx = 0;
	while let Some(ch) = text[idx..].chars().next() {
		if (ch == '"' || ch == '\'') && opens_quote(text, idx) {
			if let Some(end) = quoted_end(text, idx) {
				idx = end;
				continue;
			}
		}
		if ch == target {
			return Some(idx);
		}
		idx += ch.len_utf8();
	}
	None
}

/// A `:` directly after an operator, `?` or another `:` is the page operator.
fn is_page_colon(text: &str, idx: usize) -> bool {
	text[..idx]
		.trim_end()
		.chars()
		.next_back()
		.map_or(true, |ch| "+-*/%&|^~!<>=?:¬".contains(ch))
}

/// `cond ? yes : no` at the first `?`, with nested ternaries in either branch.
fn split_ternary(text: &str) -> Option<(&str, &str, &str)> {
	let question = text.find('?')?;
	let mut depth = 0;
	for (idx, ch) in text.char_indices().skip_while(|&(idx, _)| idx <= question) {
		match ch {
			'?' => depth += 1,
			':' if is_page_colon(text, idx) => {}
			':' if depth == 0 => return Some((&text[..question], &text[question + 1..idx], &text[idx + 1..])),
			':' => depth -= 1,
			_ => {}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	#[derive(Default)]
	struct Env {
		labels: HashMap<&'static str, f64>,
		references: Vec<String>,
	}

	impl Environment for Env {
		fn label(&mut self, name: &str) -> Result<f64, ExprError> {
			self.references.push(name.into());
			self.labels.get(name).copied().ok_or_else(|| ExprError::UnknownLabel(name.into()))
		}

		fn page(&mut self, name: &str) -> Result<f64, ExprError> {
			self.label(name).map(|_| 2.0)
		}

		fn address(&self) -> f64 {
			0x8000 as f64
		}

		fn reusable(&mut self, target: ReusableRef) -> Result<f64, ExprError> {
			Ok(100.0 + target.run as f64 + target.offset as f64)
		}

		fn size_of(&mut self, name: &str) -> Result<f64, ExprError> {
			DataType::builtin(name)
				.and_then(|ty| ty.size())
				.map(f64::from)
				.ok_or_else(|| ExprError::UnknownLabel(name.into()))
		}

		fn is_defined(&mut self, name: &str) -> bool {
			self.labels.contains_key(name)
		}
	}

	fn env() -> Env {
		Env {
			labels: HashMap::from([("start", 0x4000 as f64), ("count", 3.0), ("_local", 7.0), ("a.b", 9.0)]),
			references: Vec::new(),
		}
	}

	macro_rules! test_expr {
		($name:ident, $input:expr, $value:expr) => {
			#[test]
			fn $name() {
				assert_eq!(evaluate(&mut env(), $input), Ok($value as f64));
			}
		};
	}

	test_expr!(left_assoc_sub,   "1-2-3",         -4);
	test_expr!(precedence,       "2+3*4",         14);
	test_expr!(left_assoc_div,   "16/4/2",        2);
	test_expr!(parens,           "(2+3)*4",       20);
	test_expr!(nested_parens,    "((1+1)*(2+2))", 8);
	test_expr!(unary_minus,      "-3*-2",         6);
	test_expr!(double_negation,  "--5",           5);
	test_expr!(bitwise,          "$F0 | %1010 & $0F", 0xFA);
	test_expr!(modulo,           "10 % 3",        1);
	test_expr!(binary_after_op,  "10 % %11",      1);
	test_expr!(shifts,           "1 << 4 >> 2",   4);
	test_expr!(comparison,       "3 < 4 && 2 == 2", 1);
	test_expr!(not_equal,        "3 <> 3 || 1 != 1", 0);
	test_expr!(complement,       "~0 & $FF",      0xFF);
	test_expr!(logical_not,      "!0 + !5",       1);
	test_expr!(labels,           "start + count", 0x4003);
	test_expr!(dotted_label,     "a.b * 2",       18);
	test_expr!(local_label,      "_local",        7);
	test_expr!(current_address,  "$ + 2",         0x8002);
	test_expr!(page_operator,    ":start",        2);
	test_expr!(char_literal,     "'A' + 1",       66);
	test_expr!(string_literal,   "\"AB\"",        0x4241);
	test_expr!(ternary,          "count > 2 ? 10 : 20", 10);
	test_expr!(ternary_else,     "count > 5 ? 10 : 20", 20);
	test_expr!(nested_ternary,   "1 ? 0 ? 1 : 2 : 3", 2);
	test_expr!(ternary_page,     "1 ? :start : 0", 2);
	test_expr!(cast,             "byte(300)",     255);
	test_expr!(signed_cast,      "sbyte(-200)",   -128);
	test_expr!(sizeof,           "sizeof(word) * 2", 4);
	test_expr!(defined,          "defined(start) + defined(nope)", 1);
	test_expr!(math,             "int(sqrt(17))", 4);
	test_expr!(fraction,         "0.5 * 3",       1.5);
	test_expr!(hex_suffix,       "0FFh + 1",      256);
	test_expr!(reusable,         "{++} + {@-1}",  202);

	#[test]
	fn errors() {
		assert_eq!(evaluate(&mut env(), ""), Err(ExprError::Empty));
		assert_eq!(evaluate(&mut env(), "1/0"), Err(ExprError::DivideByZero));
		assert!(matches!(evaluate(&mut env(), "(1+2"), Err(ExprError::UnbalancedParens(_))));
		assert!(matches!(evaluate(&mut env(), "1+2)"), Err(ExprError::UnbalancedParens(_))));
		assert!(matches!(evaluate(&mut env(), "2 3"), Err(ExprError::Malformed(_))));
		assert!(matches!(evaluate(&mut env(), "1 +"), Err(ExprError::Malformed(_))));
		assert!(matches!(evaluate(&mut env(), "\"abc"), Err(ExprError::UnterminatedString(_))));
		assert!(matches!(evaluate(&mut env(), "frob(1)"), Err(ExprError::UnknownFunction(_))));
		assert!(matches!(evaluate(&mut env(), "{x}"), Err(ExprError::Reusable(_))));
		assert!(matches!(evaluate(&mut env(), "missing"), Err(ExprError::UnknownLabel(_))));
	}

	#[test]
	fn references_are_recorded() {
		let mut env = env();
		evaluate(&mut env, "start + count * start").unwrap();
		assert_eq!(env.references, ["start", "count", "start"]);
	}
}
