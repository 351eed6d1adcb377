
fn from_radix(digits: &str, radix: u32) -> Option<f64> {
	let digits = digits.replace('_', "");
	if digits.is_empty() {
		return None;
	}
	u64::from_str_radix(&digits, radix).ok().map(|n| n as f64)
}

fn from_decimal(txt: &str) -> Option<f64> {
	let txt = txt.replace('_', "");
	let mut seen_dot = false;
	for ch in txt.chars() {
		match ch {
			'0'..='9' => {}
			'.' if !seen_dot => seen_dot = true,
			_ => return None,
		}
	}
	if txt.is_empty() || txt == "." {
		return None;
	}
	txt.parse::<f64>().ok()
}

/// Parses a numeric literal.
///
/// Prefixes: `$` hex, `%` binary, `@` octal. Suffixes: `h` hex, `b` binary, `o`/`q` octal,
/// `d` decimal. Anything else starting with a digit is decimal, optionally with a fraction.
pub fn parse_number(txt: &str) -> Option<f64> {
	let mut chars = txt.chars();
	match chars.next()? {
		'$' => from_radix(chars.as_str(), 16),
		'%' => from_radix(chars.as_str(), 2),
		'@' => from_radix(chars.as_str(), 8),
		c if c.is_ascii_digit() => {
			let last = txt.char_indices().next_back().map_or(0, |(idx, _)| idx);
			let (body, suffix) = txt.split_at(last);
			match suffix {
				"h" | "H" => from_radix(body, 16),
				"b" | "B" if body.chars().all(|c| matches!(c, '0' | '1' | '_')) => from_radix(body, 2),
				"o" | "O" | "q" | "Q" => from_radix(body, 8),
				"d" | "D" => from_decimal(body),
				_ => from_decimal(txt),
			}
		}
		_ => None,
	}
}

/// Text form of a value that [`parse_number`] and the evaluator read back exactly.
///
/// Negative values use the `¬` marker so they are never mistaken for a subtraction.
pub fn format_number(value: f64) -> String {
	if value < 0.0 {
		format!("¬{}", -value)
	} else {
		format!("{value}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	macro_rules! test_number {
		($name:ident, $input:expr, $value:expr) => {
			#[test]
			fn $name() {
				assert_eq!(parse_number($input), $value);
			}
		};
	}

	test_number!(decimal,        "1234",     Some(1234.0));
	test_number!(fraction,       "2.5",      Some(2.5));
	test_number!(hex_prefix,     "$FF",      Some(255.0));
	test_number!(hex_suffix,     "0C000h",   Some(49152.0));
	test_number!(hex_b_digit,    "1Bh",      Some(27.0));
	test_number!(bin_prefix,     "%1010",    Some(10.0));
	test_number!(bin_suffix,     "0101b",    Some(5.0));
	test_number!(oct_prefix,     "@17",      Some(15.0));
	test_number!(oct_suffix,     "17o",      Some(15.0));
	test_number!(underscores,    "%1111_0000", Some(240.0));
	test_number!(lone_dollar,    "$",        None);
	test_number!(label,          "start",    None);
	test_number!(bad_binary,     "12b",      None);
	test_number!(double_dot,     "1.2.3",    None);

	#[test]
	fn formatted_values_read_back() {
		assert_eq!(format_number(-3.0), "¬3");
		assert_eq!(parse_number(&format_number(0.1)), Some(0.1));
		assert_eq!(parse_number(&format_number(65535.0)), Some(65535.0));
	}
}
