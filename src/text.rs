
/// Characters allowed inside a label or macro name.
pub(crate) fn is_name_char(ch: char) -> bool {
	ch.is_alphanumeric() || ch == '_' || ch == '.'
}

/// Whether the quote character at byte `idx` opens a literal.
///
/// A `'` glued to an identifier (`af'`) is part of the identifier.
pub(crate) fn opens_quote(text: &str, idx: usize) -> bool {
	match text.as_bytes()[idx] {
		b'"' => true,
		b'\'' => !text[..idx]
			.chars()
			.next_back()
			.is_some_and(|ch| ch.is_alphanumeric() || ch == '_'),
		_ => false,
	}
}

/// Byte index one past the closing quote of the literal opened at `start`.
pub(crate) fn quoted_end(text: &str, start: usize) -> Option<usize> {
	let bytes = text.as_bytes();
	let quote = bytes[start];
	let mut idx = start + 1;
	while idx < bytes.len() {
		match bytes[idx] {
			b'\\' => idx += 2,
			b if b == quote => return Some(idx + 1),
			_ => idx += 1,
		}
	}
	None
}

/// Walks `text`, yielding `(byte index, char, paren depth)` for every character outside of
/// string and character literals.
pub(crate) struct TopLevel<'a> {
	text: &'a str,
	idx: usize,
	depth: i32,
}

pub(crate) fn top_level(text: &str) -> TopLevel<'_> {
	TopLevel { text, idx: 0, depth: 0 }
}

impl Iterator for TopLevel<'_> {
	type Item = (usize, char, i32);

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let ch = self.text[self.idx..].chars().next()?;
			let idx = self.idx;
			if (ch == '"' || ch == '\'') && opens_quote(self.text, idx) {
				if let Some(end) = quoted_end(self.text, idx) {
					self.idx = end;
					continue;
				}
			}
			self.idx += ch.len_utf8();
			let depth = self.depth;
			match ch {
				'(' | '[' => self.depth += 1,
				')' | ']' => self.depth -= 1,
				_ => {}
			}
			return Some((idx, ch, depth));
		}
	}
}

/// Splits at every `sep` outside of literals and brackets.
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut start = 0;
	for (idx, ch, depth) in top_level(text) {
		if ch == sep && depth == 0 {
			parts.push(&text[start..idx]);
			start = idx + ch.len_utf8();
		}
	}
	parts.push(&text[start..]);
	parts
}

/// Comma separated directive arguments, trimmed. An empty argument list yields no arguments.
pub(crate) fn arguments(text: &str) -> Vec<&str> {
	if text.trim().is_empty() {
		return Vec::new();
	}
	split_top_level(text, ',')
		.into_iter()
		.map(str::trim)
		.collect()
}

/// Whether every opening bracket is closed, ignoring literals.
pub(crate) fn balanced(text: &str) -> bool {
	let mut depth = 0;
	for (_, ch, _) in top_level(text) {
		match ch {
			'(' | '[' => depth += 1,
			')' | ']' => {
				depth -= 1;
				if depth < 0 {
					return false;
				}
			}
			_ => {}
		}
	}
	depth == 0 && quotes_closed(text)
}

fn quotes_closed(text: &str) -> bool {
	let mut idx = 0;
	while idx < text.len() {
		let Some(ch) = text[idx..].chars().next() else { break };
		if ch == '"' && quoted_end(text, idx).is_none() {
			return false;
		}
		if (ch == '"' || ch == '\'') && opens_quote(text, idx) {
			if let Some(end) = quoted_end(text, idx) {
				idx = end;
				continue;
			}
		}
		idx += ch.len_utf8();
	}
	true
}

/// Removes whitespace outside of literals.
pub(crate) fn squeeze(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut last = 0;
	for (idx, ch, _) in top_level(text) {
		out.push_str(&text[last..idx]);
		if !ch.is_whitespace() {
			out.push(ch);
		}
		last = idx + ch.len_utf8();
	}
	out.push_str(&text[last..]);
	out
}

/// Decodes a whole quoted literal (`"text"` or `'c'`) into its characters.
pub(crate) fn unquote(text: &str) -> Option<String> {
	let text = text.trim();
	let first = text.chars().next()?;
	if (first != '"' && first != '\'') || quoted_end(text, 0) != Some(text.len()) {
		return None;
	}
	Some(unescape(&text[1..text.len() - 1]))
}

pub(crate) fn unescape(body: &str) -> String {
	let mut out = String::with_capacity(body.len());
	let mut chars = body.chars();
	while let Some(ch) = chars.next() {
		if ch != '\\' {
			out.push(ch);
			continue;
		}
		match chars.next() {
			Some('n') => out.push('\n'),
			Some('r') => out.push('\r'),
			Some('t') => out.push('\t'),
			Some('0') => out.push('\0'),
			Some(other) => out.push(other),
			None => out.push('\\'),
		}
	}
	out
}

/// Splits the leading word off `text`, returning `(word, rest)`.
pub(crate) fn split_word(text: &str) -> (&str, &str) {
	let text = text.trim_start();
	match text.find(char::is_whitespace) {
		Some(idx) => (&text[..idx], text[idx..].trim_start()),
		None => (text, ""),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_ignores_nested_and_quoted_commas() {
		assert_eq!(
			arguments("1, (2,3), \"a,b\", ','"),
			vec!["1", "(2,3)", "\"a,b\"", "','"],
		);
	}

	#[test]
	fn apostrophe_after_identifier_is_not_a_quote() {
		assert_eq!(squeeze("af, af'"), "af,af'");
		assert_eq!(split_top_level("ex af,af' \\ ld a,'\\\\'", '\\').len(), 2);
	}

	#[test]
	fn balance_checks_brackets_and_strings() {
		assert!(balanced("(1+(2))"));
		assert!(!balanced("5)+(3"));
		assert!(!balanced("\"open"));
		assert!(balanced("')'"));
	}

	#[test]
	fn unquote_decodes_escapes() {
		assert_eq!(unquote("\"a\\n\\\"b\"").as_deref(), Some("a\n\"b"));
		assert_eq!(unquote("'x'").as_deref(), Some("x"));
		assert_eq!(unquote("\"ab\" + 1"), None);
	}
}
