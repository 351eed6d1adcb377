use crate::text::balanced;

/// Matches operand `text` against a table pattern where `*` stands for an expression.
///
/// Literal characters compare case-insensitively, captures are sliced from `text` as written.
/// Wildcards are greedy and backtrack; a capture must be non-empty with balanced brackets and
/// quotes. `+*` also accepts a negative displacement (`(ix-2)`).
pub fn capture<'t>(pattern: &str, text: &'t str) -> Option<Vec<&'t str>> {
	let upper = text.to_ascii_uppercase();
	let mut caps = Vec::new();
	matches(pattern.as_bytes(), upper.as_bytes(), text, 0, &mut caps).then_some(caps)
}

fn matches<'t>(pat: &[u8], upper: &[u8], text: &'t str, pos: usize, caps: &mut Vec<&'t str>) -> bool {
	match pat.split_first() {
		None => pos == upper.len(),
		Some((b'*', rest)) => {
			for end in (pos + 1..=upper.len()).rev() {
				if !text.is_char_boundary(end) {
					continue;
				}
				let cap = &text[pos..end];
				if !balanced(cap) {
					continue;
				}
				caps.push(cap);
				if matches(rest, upper, text, end, caps) {
					return true;
				}
				caps.pop();
			}
			false
		}
		Some((b'+', rest)) if rest.first() == Some(&b'*') && upper.get(pos) == Some(&b'-') => {
			matches(rest, upper, text, pos, caps)
		}
		Some((&ch, rest)) => upper.get(pos) == Some(&ch) && matches(rest, upper, text, pos + 1, caps),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	macro_rules! test_capture {
		($name:ident, $pattern:expr, $text:expr, $caps:expr) => {
			#[test]
			fn $name() {
				let caps: Option<Vec<&str>> = $caps;
				assert_eq!(capture($pattern, $text), caps);
			}
		};
	}

	test_capture!(plain,          "A,*",        "a,label+1",   Some(vec!["label+1"]));
	test_capture!(indirect,       "A,(*)",      "a,(buffer)",  Some(vec!["buffer"]));
	test_capture!(not_indirect,   "A,(*)",      "a,(1)+(2)",   None);
	test_capture!(unbalanced,     "(*)",        "(5)+(3)",     None);
	test_capture!(indexed,        "(IX+*),*",   "(ix+4),'a'",  Some(vec!["4", "'a'"]));
	test_capture!(negative_disp,  "A,(IY+*)",   "A,(iy-2)",    Some(vec!["-2"]));
	test_capture!(two_wildcards,  "*,(IX+*)",   "7,(IX+off)",  Some(vec!["7", "off"]));
	test_capture!(literal_case,   "A,*",        "A,'x'",       Some(vec!["'x'"]));
	test_capture!(empty_capture,  "A,*",        "A,",          None);
	test_capture!(mismatch,       "HL,*",       "DE,5",        None);
	test_capture!(comma_in_string, "*",         "\"a,b\"",     Some(vec!["\"a,b\""]));
}
