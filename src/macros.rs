//! `.define` style macros with argument pattern matching.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::text::{opens_quote, quoted_end, split_top_level, unquote};
use crate::Name;

const MAX_DEPTH: usize = 64;

/// Characters that end a word when looking for macro names.
const SEPARATORS: &str = "+-*/%&|^~!<>=(),;:\\'\"[]{}?";

#[derive(Debug, Clone, PartialEq)]
pub enum MacroError {
	InvalidName(String),
	Unbalanced(String),
	TooDeep(String),
	UnknownMacro(String),
}

impl std::error::Error for MacroError {}

impl fmt::Display for MacroError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::InvalidName(name) => write!(fmt, "invalid macro name '{name}'"),
			Self::Unbalanced(txt) => write!(fmt, "unbalanced macro arguments in '{txt}'"),
			Self::TooDeep(name) => write!(fmt, "macro '{name}' expands recursively more than {MAX_DEPTH} levels"),
			Self::UnknownMacro(name) => write!(fmt, "macro '{name}' is not defined"),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
	/// Named parameter, matches any argument
	Wildcard(Name),
	/// Quoted text, matches the same text ignoring case
	Text(String),
	/// Expression, matches an argument evaluating to the same value
	Value(String),
}

impl Slot {
	fn parse(arg: &str) -> Self {
		let arg = arg.trim();
		if let Some(text) = unquote(arg) {
			return Self::Text(text);
		}
		let ident = arg.starts_with(|c: char| c.is_alphabetic() || c == '_')
			&& arg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
		if ident {
			Self::Wildcard(arg.into())
		} else {
			Self::Value(arg.into())
		}
	}

	fn is_wildcard(&self) -> bool {
		matches!(self, Self::Wildcard(_))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
	/// `None` for a macro written without parentheses
	pub slots: Option<Vec<Slot>>,
	pub template: String,
}

impl Replacement {
	/// Number of slots that are not wildcards.
	pub fn rank(&self) -> usize {
		self.slots
			.as_ref()
			.map_or(0, |slots| slots.iter().filter(|slot| !slot.is_wildcard()).count())
	}

	fn same_signature(&self, other: &Self) -> bool {
		match (&self.slots, &other.slots) {
			(None, None) => true,
			(Some(a), Some(b)) => {
				a.len() == b.len()
					&& a.iter().zip(b).all(|pair| match pair {
						(Slot::Wildcard(_), Slot::Wildcard(_)) => true,
						(Slot::Text(x), Slot::Text(y)) => x.eq_ignore_ascii_case(y),
						(Slot::Value(x), Slot::Value(y)) => x == y,
						_ => false,
					})
			}
			_ => false,
		}
	}
}

/// Parses `name(a, b) template`, `name template` or a bare `name`.
pub fn parse_definition(text: &str) -> Result<(Name, Replacement), MacroError> {
	let text = text.trim();
	let end = text
		.find(|c: char| c.is_whitespace() || c == '(')
		.unwrap_or(text.len());
	let name = &text[..end];
	let valid = name.starts_with(|c: char| c.is_alphabetic() || c == '_' || c == '.')
		&& !name.contains(|c: char| SEPARATORS.contains(c));
	if !valid {
		return Err(MacroError::InvalidName(name.into()));
	}
	let rest = &text[end..];
	let (slots, template) = if rest.starts_with('(') {
		let close = closing_paren(rest).ok_or_else(|| MacroError::Unbalanced(text.into()))?;
		let inner = &rest[1..close];
		let slots = if inner.trim().is_empty() {
			Vec::new()
		} else {
			split_top_level(inner, ',').into_iter().map(Slot::parse).collect()
		};
		(Some(slots), rest[close + 1..].trim())
	} else {
		(None, rest.trim())
	};
	Ok((name.into(), Replacement { slots, template: template.into() }))
}

/// Byte index of the `)` closing the `(` at the start of `text`.
fn closing_paren(text: &str) -> Option<usize> {
	crate::text::top_level(text)
		.find(|&(_, ch, depth)| ch == ')' && depth == 1)
		.map(|(idx, _, _)| idx)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'t> {
	Word(&'t str),
	Other(&'t str),
}

/// Words, separators and whole literals with their byte offsets. Concatenating the pieces
/// gives back `text`.
fn tokens(text: &str) -> Vec<(usize, Token<'_>)> {
	let mut out = Vec::new();
	let mut idx = 0;
	while let Some(ch) = text[idx..].chars().next() {
		let end = if (ch == '"' || ch == '\'') && opens_quote(text, idx) {
			let end = quoted_end(text, idx).unwrap_or(text.len());
			out.push((idx, Token::Other(&text[idx..end])));
			end
		} else if ch.is_whitespace() || SEPARATORS.contains(ch) {
			out.push((idx, Token::Other(&text[idx..idx + ch.len_utf8()])));
			idx + ch.len_utf8()
		} else {
			let end = text[idx..]
				.find(|c: char| c.is_whitespace() || SEPARATORS.contains(c))
				.map_or(text.len(), |n| idx + n);
			out.push((idx, Token::Word(&text[idx..end])));
			end
		};
		idx = end;
	}
	out
}

#[derive(Debug, Clone, Default)]
pub struct MacroTable {
	macros: HashMap<Name, Vec<Replacement>>,
	last: Option<(Name, Replacement)>,
	case_sensitive: bool,
}

impl MacroTable {
	pub fn new(case_sensitive: bool) -> Self {
		Self { case_sensitive, ..Default::default() }
	}

	fn key(&self, name: &str) -> Name {
		if self.case_sensitive {
			name.into()
		} else {
			name.to_lowercase().into()
		}
	}

	pub fn is_empty(&self) -> bool {
		self.macros.is_empty()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.macros.contains_key(&self.key(name))
	}

	/// Adds a replacement. One with the same signature is overwritten.
	pub fn define(&mut self, name: &str, replacement: Replacement) {
		trace!(name, template = %replacement.template, "defining macro");
		let key = self.key(name);
		let list = self.macros.entry(key.clone()).or_default();
		match list.iter_mut().find(|r| r.same_signature(&replacement)) {
			Some(existing) => *existing = replacement.clone(),
			None => list.push(replacement.clone()),
		}
		// stable, so equal ranks keep definition order
		list.sort_by(|a, b| b.rank().cmp(&a.rank()));
		self.last = Some((key, replacement));
	}

	pub fn undefine(&mut self, name: &str) -> Result<(), MacroError> {
		let key = self.key(name);
		self.macros
			.remove(&key)
			.map(|_| ())
			.ok_or_else(|| MacroError::UnknownMacro(name.into()))
	}

	/// `.defcont`: appends to the replacement defined last.
	pub fn append(&mut self, text: &str) -> Result<(), MacroError> {
		let Some((key, last)) = self.last.as_mut() else {
			return Err(MacroError::UnknownMacro(".defcont".into()));
		};
		let list = self
			.macros
			.get_mut(key)
			.ok_or_else(|| MacroError::UnknownMacro(key.to_string()))?;
		let Some(target) = list.iter_mut().find(|r| r.same_signature(last)) else {
			return Err(MacroError::UnknownMacro(key.to_string()));
		};
		target.template.push_str(text);
		last.template.push_str(text);
		Ok(())
	}

	/// Expands every macro in `text`. `eval` evaluates the expression slots and arguments.
	pub fn expand(&self, text: &str, eval: &mut dyn FnMut(&str) -> Option<f64>) -> Result<String, MacroError> {
		if self.macros.is_empty() {
			return Ok(text.into());
		}
		self.expand_at(text, eval, 0)
	}

	fn expand_at(&self, text: &str, eval: &mut dyn FnMut(&str) -> Option<f64>, depth: usize) -> Result<String, MacroError> {
		let mut out = String::with_capacity(text.len());
		let mut idx = 0;
		for (start, token) in tokens(text) {
			let (Token::Word(word) | Token::Other(word)) = token;
			if start < idx {
				// consumed as part of an argument list
				continue;
			}
			idx = start + word.len();
			let Token::Word(word) = token else {
				out.push_str(word);
				continue;
			};
			let Some(list) = self.macros.get(&self.key(word)) else {
				out.push_str(word);
				continue;
			};
			let (args, after) = call_arguments(&text[idx..]);
			let args = match args {
				Some(Err(())) => return Err(MacroError::Unbalanced(text.into())),
				Some(Ok(args)) => Some(args),
				None => None,
			};
			let Some((replacement, consumed)) = self.select(list, args.as_deref(), eval, depth)? else {
				out.push_str(word);
				continue;
			};
			if depth >= MAX_DEPTH {
				return Err(MacroError::TooDeep(word.into()));
			}
			if consumed {
				idx += after;
			}
			let body = substitute(replacement, args.as_deref().unwrap_or_default(), self.case_sensitive);
			out.push_str(&self.expand_at(&body, eval, depth + 1)?);
		}
		Ok(out)
	}

	/// Best replacement for a call. The flag says whether the argument list was used.
	fn select<'r>(
		&self,
		list: &'r [Replacement],
		args: Option<&[&str]>,
		eval: &mut dyn FnMut(&str) -> Option<f64>,
		depth: usize,
	) -> Result<Option<(&'r Replacement, bool)>, MacroError> {
		if let Some(args) = args {
			for replacement in list {
				let Some(slots) = &replacement.slots else { continue };
				if slots.len() == args.len() && self.slots_match(slots, args, eval, depth)? {
					return Ok(Some((replacement, true)));
				}
			}
		}
		Ok(list.iter().find(|r| r.slots.is_none()).map(|r| (r, false)))
	}

	fn slots_match(
		&self,
		slots: &[Slot],
		args: &[&str],
		eval: &mut dyn FnMut(&str) -> Option<f64>,
		depth: usize,
	) -> Result<bool, MacroError> {
		for (slot, arg) in slots.iter().zip(args) {
			let matched = match slot {
				Slot::Wildcard(_) => true,
				Slot::Text(text) => unquote(arg)
					.as_deref()
					.unwrap_or(arg.trim())
					.eq_ignore_ascii_case(text),
				Slot::Value(expected) => {
					let arg = self.expand_at(arg, eval, depth + 1)?;
					match (eval(expected), eval(&arg)) {
						(Some(a), Some(b)) => a == b,
						_ => false,
					}
				}
			};
			if !matched {
				return Ok(false);
			}
		}
		Ok(true)
	}
}

/// Argument list directly following a macro name: `Some(Ok(args))` and the bytes consumed, or
/// `None` when no `(` follows.
fn call_arguments(text: &str) -> (Option<Result<Vec<&str>, ()>>, usize) {
	let trimmed = text.trim_start();
	if !trimmed.starts_with('(') {
		return (None, 0);
	}
	let skipped = text.len() - trimmed.len();
	let Some(close) = closing_paren(trimmed) else {
		return (Some(Err(())), 0);
	};
	let inner = &trimmed[1..close];
	let args = if inner.trim().is_empty() {
		Vec::new()
	} else {
		split_top_level(inner, ',').into_iter().map(str::trim).collect()
	};
	(Some(Ok(args)), skipped + close + 1)
}

/// Template with every wildcard parameter replaced by its argument.
fn substitute(replacement: &Replacement, args: &[&str], case_sensitive: bool) -> String {
	let Some(slots) = &replacement.slots else {
		return replacement.template.clone();
	};
	let params: Vec<(&str, &str)> = slots
		.iter()
		.zip(args)
		.filter_map(|(slot, arg)| match slot {
			Slot::Wildcard(name) => Some((name.as_ref(), *arg)),
			_ => None,
		})
		.collect();
	let mut out = String::with_capacity(replacement.template.len());
	for (_, token) in tokens(&replacement.template) {
		match token {
			Token::Word(word) => {
				let arg = params.iter().find(|(name, _)| {
					if case_sensitive {
						*name == word
					} else {
						name.eq_ignore_ascii_case(word)
					}
				});
				out.push_str(arg.map_or(word, |(_, arg)| arg));
			}
			Token::Other(other) => out.push_str(other),
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	type TestResult = Result<(), MacroError>;

	fn table(defs: &[&str]) -> Result<MacroTable, MacroError> {
		let mut table = MacroTable::new(false);
		for def in defs {
			let (name, replacement) = parse_definition(def)?;
			table.define(&name, replacement);
		}
		Ok(table)
	}

	fn no_eval(text: &str) -> Option<f64> {
		crate::expr::number::parse_number(text.trim())
	}

	#[test]
	fn object_like() -> TestResult {
		let table = table(&["SCREEN $4000", "width 96"])?;
		assert_eq!(table.expand("ld hl,screen+WIDTH", &mut no_eval)?, "ld hl,$4000+96");
		// words containing the name are left alone
		assert_eq!(table.expand("ld a,screen_x", &mut no_eval)?, "ld a,screen_x");
		Ok(())
	}

	#[test]
	fn function_like() -> TestResult {
		let table = table(&["add16(r, v) ld de,v \\ add r,de"])?;
		assert_eq!(table.expand("add16(hl, 5)", &mut no_eval)?, "ld de,5 \\ add hl,de");
		// without arguments the name stays
		assert_eq!(table.expand("add16", &mut no_eval)?, "add16");
		Ok(())
	}

	#[test]
	fn most_specific_wins() -> TestResult {
		let table = table(&[
			"shift(reg, n) .repeat n \\ sla reg \\ .loop",
			"shift(reg, 1) sla reg",
			"shift(\"a\", 1) add a,a",
		])?;
		assert_eq!(table.expand("shift(A, 1)", &mut no_eval)?, "add a,a");
		assert_eq!(table.expand("shift(b, 1)", &mut no_eval)?, "sla b");
		assert_eq!(table.expand("shift(b, $01)", &mut no_eval)?, "sla b");
		assert_eq!(table.expand("shift(c, 3)", &mut no_eval)?, ".repeat 3 \\ sla c \\ .loop");
		Ok(())
	}

	#[test]
	fn nested_expansion() -> TestResult {
		let table = table(&["inner(x) x*2", "outer(y) inner(y)+1"])?;
		assert_eq!(table.expand("outer(inner(3))", &mut no_eval)?, "3*2*2+1");
		Ok(())
	}

	#[test]
	fn strings_are_not_expanded() -> TestResult {
		let table = table(&["name value"])?;
		assert_eq!(table.expand(".db \"name\", name", &mut no_eval)?, ".db \"name\", value");
		Ok(())
	}

	#[test]
	fn recursion_is_bounded() -> TestResult {
		let table = table(&["loop loop+1"])?;
		assert!(matches!(table.expand("loop", &mut no_eval), Err(MacroError::TooDeep(_))));
		Ok(())
	}

	#[test]
	fn redefinition_and_continuation() -> TestResult {
		let mut table = table(&["x 1", "x 2"])?;
		assert_eq!(table.expand("x", &mut no_eval)?, "2");
		table.append(" + 3")?;
		assert_eq!(table.expand("x", &mut no_eval)?, "2 + 3");
		table.undefine("X")?;
		assert_eq!(table.expand("x", &mut no_eval)?, "x");
		assert!(table.undefine("x").is_err());
		Ok(())
	}

	#[test]
	fn invalid_names() {
		assert!(parse_definition("1abc 5").is_err());
		assert!(parse_definition("a+b 5").is_err());
		assert!(parse_definition("f(a, b 5").is_err());
	}
}
