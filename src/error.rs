use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::expr::ExprError;
use crate::macros::MacroError;
use crate::page::PageError;
use crate::symbols::SymbolError;
use crate::table::{EncodeError, TableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	/// Informational, never counted as a failure
	Message,
	/// Counted, does not stop assembly
	Warning,
	/// Counted, aborts the current file in strict mode
	Error,
}

impl fmt::Display for Severity {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Message => write!(fmt, "message"),
			Self::Warning => write!(fmt, "warning"),
			Self::Error => write!(fmt, "error"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
	pub severity: Severity,
	pub file: Option<PathBuf>,
	pub line: Option<usize>,
	pub message: String,
}

impl fmt::Display for Diagnostic {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match (&self.file, self.line) {
			(Some(file), Some(line)) => write!(fmt, "{}:{line}: ", file.display())?,
			(Some(file), None) => write!(fmt, "{}: ", file.display())?,
			_ => {}
		}
		write!(fmt, "{}: {}", self.severity, self.message)
	}
}

/// Every diagnostic raised over all passes, each distinct one logged once.
#[derive(Debug, Default)]
pub struct Diagnostics {
	entries: Vec<Diagnostic>,
	seen: HashSet<Diagnostic>,
}

impl Diagnostics {
	/// Records `diag`, returning `false` when an identical one was already reported.
	pub fn report(&mut self, diag: Diagnostic) -> bool {
		if !self.seen.insert(diag.clone()) {
			return false;
		}
		match diag.severity {
			Severity::Message => info!("{diag}"),
			Severity::Warning => warn!("{diag}"),
			Severity::Error => error!("{diag}"),
		}
		self.entries.push(diag);
		true
	}

	pub fn entries(&self) -> &[Diagnostic] {
		&self.entries
	}

	pub fn count(&self, severity: Severity) -> usize {
		self.entries
			.iter()
			.filter(|diag| diag.severity == severity)
			.count()
	}

	pub fn error_count(&self) -> usize {
		self.count(Severity::Error)
	}

	pub fn warning_count(&self) -> usize {
		self.count(Severity::Warning)
	}
}

#[derive(Debug, miette::Diagnostic)]
pub enum Error {
	#[diagnostic(code(z80_as::io))]
	Io(PathBuf, std::io::Error),
	#[diagnostic(code(z80_as::expression))]
	Expr(ExprError),
	#[diagnostic(code(z80_as::symbol))]
	Symbol(SymbolError),
	#[diagnostic(code(z80_as::macros))]
	Macro(MacroError),
	#[diagnostic(code(z80_as::table))]
	Table(TableError),
	#[diagnostic(code(z80_as::encode))]
	Encode(EncodeError),
	#[diagnostic(code(z80_as::page))]
	Page(PageError),
	#[diagnostic(code(z80_as::directive))]
	Directive(String),
	/// Unknown mnemonic or operands no instruction form accepts
	#[diagnostic(code(z80_as::instruction))]
	Instruction(String),
	/// The assembling pass reached an instruction the final labels pass never matched.
	#[diagnostic(
		code(z80_as::desync),
		help("the passes observed different program structure; check conditionals on forward references")
	)]
	Desync { file: PathBuf, line: usize, detail: String },
	/// Assembly stopped after reporting errors.
	#[diagnostic(code(z80_as::aborted))]
	Aborted { errors: usize },
}

impl Error {
	pub(crate) fn directive(msg: impl Into<String>) -> Self {
		Self::Directive(msg.into())
	}

	/// Errors that end assembly regardless of strict mode.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Desync { .. } | Self::Aborted { .. })
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(_, e) => Some(e),
			Self::Expr(e) => Some(e),
			Self::Symbol(e) => Some(e),
			Self::Macro(e) => Some(e),
			Self::Table(e) => Some(e),
			Self::Encode(e) => Some(e),
			Self::Page(e) => Some(e),
			_ => None,
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Io(path, e) => write!(fmt, "unable to read '{}': {e}", path.display()),
			Self::Expr(e) => write!(fmt, "{e}"),
			Self::Symbol(e) => write!(fmt, "{e}"),
			Self::Macro(e) => write!(fmt, "{e}"),
			Self::Table(e) => write!(fmt, "{e}"),
			Self::Encode(e) => write!(fmt, "{e}"),
			Self::Page(e) => write!(fmt, "{e}"),
			Self::Directive(msg) | Self::Instruction(msg) => write!(fmt, "{msg}"),
			Self::Desync { file, line, detail } => write!(
				fmt,
				"pass desynchronisation at {}:{line}: {detail}",
				file.display(),
			),
			Self::Aborted { errors } => write!(fmt, "assembly failed with {errors} error(s)"),
		}
	}
}

macro_rules! impl_from {
	($($source:ty => $variant:ident),* $(,)?) => {$(
		impl From<$source> for Error {
			fn from(other: $source) -> Self {
				Self::$variant(other)
			}
		}
	)*};
}

impl_from! {
	ExprError => Expr,
	SymbolError => Symbol,
	MacroError => Macro,
	TableError => Table,
	EncodeError => Encode,
	PageError => Page,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn diag(severity: Severity, line: usize, message: &str) -> Diagnostic {
		Diagnostic {
			severity,
			file: Some("main.asm".into()),
			line: Some(line),
			message: message.into(),
		}
	}

	#[test_log::test]
	fn duplicates_are_reported_once() {
		let mut diags = Diagnostics::default();
		assert!(diags.report(diag(Severity::Error, 3, "bad")));
		assert!(!diags.report(diag(Severity::Error, 3, "bad")));
		assert!(diags.report(diag(Severity::Error, 4, "bad")));
		assert!(diags.report(diag(Severity::Warning, 3, "bad")));
		assert_eq!(diags.error_count(), 2);
		assert_eq!(diags.warning_count(), 1);
	}

	#[test]
	fn display_includes_position() {
		assert_eq!(
			diag(Severity::Warning, 7, "overlap").to_string(),
			"main.asm:7: warning: overlap",
		);
	}
}
