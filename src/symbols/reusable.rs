use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
	/// `+`, `++`, ... refer to the next definition
	Forward,
	/// `-`, `--`, ... refer to the previous definition
	Backward,
	/// `@` refers to the previous bookmark, offsets move through the list
	Bookmark,
}

/// A reusable label reference, the text between `{` and `}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReusableRef {
	pub polarity: Polarity,
	pub run: usize,
	pub offset: i64,
}

impl ReusableRef {
	pub fn parse(text: &str) -> Option<Self> {
		let text = text.trim();
		if let Some(offset) = text.strip_prefix('@') {
			let offset = match offset.trim() {
				"" => 0,
				o => o.strip_prefix('+').unwrap_or(o).trim().parse().ok()?,
			};
			return Some(Self { polarity: Polarity::Bookmark, run: 1, offset });
		}
		let (polarity, run) = Self::run(text)?;
		Some(Self { polarity, run, offset: 0 })
	}

	/// `@`, `+++` or `--` written as a label.
	pub fn definition(text: &str) -> Option<(Polarity, usize)> {
		match text {
			"@" => Some((Polarity::Bookmark, 1)),
			_ => Self::run(text),
		}
	}

	fn run(text: &str) -> Option<(Polarity, usize)> {
		let polarity = match text.chars().next()? {
			'+' => Polarity::Forward,
			'-' => Polarity::Backward,
			_ => return None,
		};
		let first = text.as_bytes()[0];
		text.bytes()
			.all(|b| b == first)
			.then_some((polarity, text.len()))
	}
}

/// Instances of every reusable label seen so far in a pass, per polarity and run length.
///
/// The number of instances doubles as the cursor: entries before it come from the current
/// pass, entries at or after it are read from the previous pass.
#[derive(Debug, Clone, Default)]
pub struct ReusableLabels {
	trackers: HashMap<(Polarity, usize), Vec<f64>>,
}

impl ReusableLabels {
	pub fn define(&mut self, polarity: Polarity, run: usize, value: f64) {
		self.trackers.entry((polarity, run)).or_default().push(value);
	}

	fn instances(&self, polarity: Polarity, run: usize) -> &[f64] {
		self.trackers
			.get(&(polarity, run))
			.map(Vec::as_slice)
			.unwrap_or_default()
	}

	/// Value of `target` at the current point, `None` when no such definition exists.
	pub fn resolve(&self, previous: &ReusableLabels, target: ReusableRef) -> Option<f64> {
		let current = self.instances(target.polarity, target.run);
		let cursor = current.len() as i64;
		let index = match target.polarity {
			Polarity::Forward => cursor,
			Polarity::Backward => cursor - 1,
			Polarity::Bookmark => cursor - 1 + target.offset,
		};
		let index = usize::try_from(index).ok()?;
		current
			.get(index)
			.or_else(|| previous.instances(target.polarity, target.run).get(index))
			.copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_references() {
		assert_eq!(
			ReusableRef::parse("++"),
			Some(ReusableRef { polarity: Polarity::Forward, run: 2, offset: 0 }),
		);
		assert_eq!(
			ReusableRef::parse("@-2"),
			Some(ReusableRef { polarity: Polarity::Bookmark, run: 1, offset: -2 }),
		);
		assert_eq!(ReusableRef::parse("@+1").map(|r| r.offset), Some(1));
		assert_eq!(ReusableRef::parse("+-"), None);
		assert_eq!(ReusableRef::parse("x"), None);
		assert_eq!(ReusableRef::definition("---"), Some((Polarity::Backward, 3)));
	}

	#[test]
	fn forward_references_read_the_previous_pass() {
		let mut previous = ReusableLabels::default();
		for addr in [10.0, 20.0, 30.0] {
			previous.define(Polarity::Forward, 1, addr);
		}
		let mut current = ReusableLabels::default();
		let fwd = ReusableRef::parse("+").unwrap();
		assert_eq!(current.resolve(&previous, fwd), Some(10.0));
		current.define(Polarity::Forward, 1, 10.0);
		current.define(Polarity::Forward, 1, 20.0);
		assert_eq!(current.resolve(&previous, fwd), Some(30.0));
		current.define(Polarity::Forward, 1, 30.0);
		assert_eq!(current.resolve(&previous, fwd), None);
	}

	#[test]
	fn backward_and_bookmarks() {
		let previous = ReusableLabels::default();
		let mut current = ReusableLabels::default();
		let back = ReusableRef::parse("-").unwrap();
		assert_eq!(current.resolve(&previous, back), None);
		current.define(Polarity::Backward, 1, 4.0);
		current.define(Polarity::Backward, 2, 8.0);
		assert_eq!(current.resolve(&previous, back), Some(4.0));
		current.define(Polarity::Bookmark, 1, 1.0);
		current.define(Polarity::Bookmark, 1, 2.0);
		assert_eq!(current.resolve(&previous, ReusableRef::parse("@").unwrap()), Some(2.0));
		assert_eq!(current.resolve(&previous, ReusableRef::parse("@-1").unwrap()), Some(1.0));
		assert_eq!(current.resolve(&previous, ReusableRef::parse("@-2").unwrap()), None);
	}
}
