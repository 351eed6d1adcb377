//! Per-pass assembler state.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use crate::error::{Diagnostic, Diagnostics, Error, Severity};
use crate::expr::{self, Environment, ExprError};
use crate::macros::{MacroError, MacroTable, Replacement};
use crate::page::{PageError, Pages};
use crate::source::{FileHandle, FileId, Location, Position};
use crate::symbols::reusable::{ReusableLabels, ReusableRef};
use crate::symbols::structs::{StructDef, StructTable};
use crate::symbols::vars::VarArea;
use crate::symbols::{Label, LabelDef, LabelId, ModuleId, Scope, SymbolError, Symbols};
use crate::Name;

/// Assembler configuration, copied into every pass.
#[derive(Debug, Clone)]
pub struct Settings {
	pub case_sensitive: bool,
	/// Abort the current file on the first directive error
	pub strict: bool,
	pub include_dirs: Vec<PathBuf>,
	pub local_prefix: String,
	/// Seed for `.dbrnd`/`.dwrnd`, entropy when unset
	pub seed: Option<u64>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			case_sensitive: false,
			strict: false,
			include_dirs: Vec::new(),
			local_prefix: "_".into(),
			seed: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
	DraftLabels,
	FinalLabels,
	Assemble,
}

impl PassKind {
	pub fn is_labels(self) -> bool {
		self != Self::Assemble
	}
}

#[derive(Debug, Clone, Copy)]
struct Frame {
	active: bool,
	/// Some branch at this depth was already taken
	taken: bool,
	parent_active: bool,
	seen_else: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConditionalStack {
	frames: Vec<Frame>,
}

impl ConditionalStack {
	pub fn active(&self) -> bool {
		self.frames.last().map_or(true, |frame| frame.active)
	}

	pub fn depth(&self) -> usize {
		self.frames.len()
	}

	/// Whether an `.elseif` reached now would consult its condition.
	pub fn alternative_pending(&self) -> bool {
		self.frames
			.last()
			.is_some_and(|frame| frame.parent_active && !frame.taken && !frame.seen_else)
	}

	/// Opens a block. `cond` is only consulted when the enclosing block is active.
	pub fn open<E>(&mut self, cond: impl FnOnce() -> Result<bool, E>) -> Result<(), E> {
		let parent_active = self.active();
		let active = parent_active && cond()?;
		self.frames.push(Frame {
			active,
			taken: active,
			parent_active,
			seen_else: false,
		});
		Ok(())
	}

	/// `.elseif` family. `cond` is only consulted when no earlier branch was taken.
	pub fn alternative<E>(&mut self, cond: impl FnOnce() -> Result<bool, E>) -> Result<(), Error>
	where
		Error: From<E>,
	{
		let frame = self.frames.last_mut().ok_or_else(|| Error::directive("elseif without if"))?;
		if frame.seen_else {
			return Err(Error::directive("elseif after else"));
		}
		if !frame.parent_active || frame.taken {
			frame.active = false;
			return Ok(());
		}
		let active = cond()?;
		frame.active = active;
		frame.taken = active;
		Ok(())
	}

	pub fn otherwise(&mut self) -> Result<(), Error> {
		let frame = self.frames.last_mut().ok_or_else(|| Error::directive("else without if"))?;
		if frame.seen_else {
			return Err(Error::directive("duplicate else"));
		}
		frame.seen_else = true;
		frame.active = frame.parent_active && !frame.taken;
		frame.taken = true;
		Ok(())
	}

	pub fn close(&mut self) -> Result<(), Error> {
		self.frames
			.pop()
			.map(|_| ())
			.ok_or_else(|| Error::directive("endif without if"))
	}
}

/// An open `.for` or `.repeat` block.
#[derive(Debug, Clone)]
pub struct ForLoopState {
	pub file: FileId,
	/// First statement of the body
	pub resume: Position,
	pub counter: Option<Name>,
	pub value: f64,
	pub end: f64,
	pub step: f64,
	/// Iterations left for `.repeat`
	pub remaining: Option<u64>,
	pub iterations: usize,
}

/// A `.var`/`.tvar` to place once the draft pass is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
	pub label: String,
	pub module: ModuleId,
	pub temporary: bool,
	pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
	pub address: u32,
	pub page: u32,
	pub location: Location,
}

/// One byte of output and the statement that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
	pub address: u32,
	pub page: u32,
	pub location: Option<Location>,
	pub value: u8,
}

/// Everything one pass knows. Built fresh for each pass.
pub struct AssemblerContext<'a> {
	pub settings: Settings,
	pub pass: PassKind,
	pub symbols: Symbols,
	/// Symbol tree of the previous pass, for forward references
	pub previous: &'a Symbols,
	pub reusable: ReusableLabels,
	pub previous_reusable: &'a ReusableLabels,
	/// Variable addresses by qualified name
	pub allocation: &'a HashMap<String, u32>,
	pub diagnostics: &'a mut Diagnostics,

	pub module: ModuleId,
	pub module_stack: Vec<ModuleId>,
	pub nest_modules: bool,
	pub all_local: bool,

	pub conditionals: ConditionalStack,
	pub loops: Vec<ForLoopState>,
	/// Depth of zero-trip loop bodies being skipped
	pub skipped_loops: usize,
	pub macros: MacroTable,
	/// `.deflong` body being collected
	pub long_macro: Option<(Name, Replacement)>,
	pub structs: StructTable,
	/// `.struct` being declared
	pub open_struct: Option<StructDef>,
	pub var_areas: Vec<VarArea>,
	pub var_decls: Vec<VarDecl>,

	pub pages: Pages,
	/// Added to the program counter to give label addresses
	pub relocation: Option<i64>,
	pub ascii_map: Vec<u8>,
	pub rng: StdRng,
	pub handles: HashMap<Name, FileHandle>,

	pub file: Option<FileId>,
	pub file_path: PathBuf,
	pub location: Option<Location>,
	pub include_depth: usize,
	/// Labels a labels pass could not resolve yet
	pub unresolved: usize,

	pub exports: Vec<(String, ModuleId)>,
	pub pending_references: Vec<(String, ModuleId, Location)>,
	pub breakpoints: Vec<Breakpoint>,
	pub emissions: Vec<Emission>,
	pub binary_mode: Option<String>,

	/// Set while macro slots are matched: lookups leave no trace
	quiet: bool,
}

impl<'a> AssemblerContext<'a> {
	pub fn new(
		settings: Settings,
		pass: PassKind,
		previous: &'a Symbols,
		previous_reusable: &'a ReusableLabels,
		allocation: &'a HashMap<String, u32>,
		diagnostics: &'a mut Diagnostics,
	) -> Self {
		let rng = match settings.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		Self {
			symbols: Symbols::new(settings.case_sensitive),
			macros: MacroTable::new(settings.case_sensitive),
			settings,
			pass,
			previous,
			reusable: ReusableLabels::default(),
			previous_reusable,
			allocation,
			diagnostics,
			module: Symbols::NONAME,
			module_stack: Vec::new(),
			nest_modules: false,
			all_local: false,
			conditionals: ConditionalStack::default(),
			loops: Vec::new(),
			skipped_loops: 0,
			long_macro: None,
			structs: StructTable::default(),
			open_struct: None,
			var_areas: Vec::new(),
			var_decls: Vec::new(),
			pages: Pages::default(),
			relocation: None,
			ascii_map: (0..=255).collect(),
			rng,
			handles: HashMap::new(),
			file: None,
			file_path: PathBuf::new(),
			location: None,
			include_depth: 0,
			unresolved: 0,
			exports: Vec::new(),
			pending_references: Vec::new(),
			breakpoints: Vec::new(),
			emissions: Vec::new(),
			binary_mode: None,
			quiet: false,
		}
	}

	pub fn report(&mut self, severity: Severity, message: impl Into<String>) {
		let file = (!self.file_path.as_os_str().is_empty()).then(|| self.file_path.clone());
		self.diagnostics.report(Diagnostic {
			severity,
			file,
			line: self.location.map(|loc| loc.line),
			message: message.into(),
		});
	}

	/// Address a label defined here receives.
	pub fn address(&self) -> i64 {
		self.pages.pc() as i64 + self.relocation.unwrap_or_default()
	}

	pub fn resolve_label(&self, name: &str) -> Option<LabelId> {
		let scope = Scope {
			module: self.module,
			local_prefix: &self.settings.local_prefix,
			all_local: self.all_local,
		};
		self.symbols.resolve(name, &scope)
	}

	/// The label as the previous pass finished it.
	pub fn previous_label(&self, name: &str) -> Option<&'a Label> {
		let previous = self.previous;
		let scope = Scope {
			module: previous.equivalent_module(&self.symbols, self.module),
			local_prefix: &self.settings.local_prefix,
			all_local: self.all_local,
		};
		previous.resolve(name, &scope).map(|id| previous.label(id))
	}

	pub fn define_label(&mut self, name: &str, def: LabelDef, force: bool) -> Result<LabelId, SymbolError> {
		let scope = Scope {
			module: self.module,
			local_prefix: &self.settings.local_prefix,
			all_local: self.all_local,
		};
		let id = self.symbols.define(name, &scope, def, force)?;
		trace!("{} = {}", self.symbols.display_name(id), self.symbols.label(id).value);
		Ok(id)
	}

	fn record_reference(&mut self, id: LabelId) {
		if self.quiet {
			return;
		}
		if let (PassKind::Assemble, Some(loc)) = (self.pass, self.location) {
			self.symbols.label_mut(id).references.push(loc);
		}
	}

	/// Current label value, then the previous pass's, recording the reference.
	fn lookup(&mut self, name: &str) -> Option<&Label> {
		if let Some(id) = self.resolve_label(name) {
			self.record_reference(id);
			return Some(self.symbols.label(id));
		}
		let label = self.previous_label(name)?;
		if let (PassKind::Assemble, Some(loc), false) = (self.pass, self.location, self.quiet) {
			self.pending_references.push((name.into(), self.module, loc));
		}
		Some(label)
	}

	fn unresolved_label(&mut self, name: &str) -> Result<f64, ExprError> {
		if self.pass.is_labels() && !self.quiet {
			trace!("'{name}' not resolved yet");
			self.unresolved += 1;
			Ok(0.0)
		} else {
			Err(ExprError::UnknownLabel(name.into()))
		}
	}

	/// Evaluates an expression. Labels passes treat failures caused by unresolved labels as 0.
	pub fn eval(&mut self, text: &str) -> Result<f64, ExprError> {
		let before = self.unresolved;
		match expr::evaluate(self, text) {
			Err(_) if self.pass.is_labels() && self.unresolved > before => Ok(0.0),
			result => result,
		}
	}

	/// Evaluates an expression an integer directive consumes.
	pub fn eval_int(&mut self, text: &str) -> Result<i64, ExprError> {
		let value = self.eval(text)?;
		if self.settings.strict && value.fract() != 0.0 {
			return Err(ExprError::NotIntegral(value));
		}
		Ok(value.trunc() as i64)
	}

	pub fn eval_u32(&mut self, text: &str) -> Result<u32, Error> {
		let value = self.eval_int(text)?;
		u32::try_from(value).map_err(|_| Error::directive(format!("{value} out of range")))
	}

	/// Expands macros in `text`. Expression slots are evaluated against this context without
	/// counting unresolved names or recording references; an unresolved argument matches no slot.
	pub fn expand_macros(&mut self, text: &str) -> Result<String, MacroError> {
		if self.macros.is_empty() {
			return Ok(text.into());
		}
		let macros = std::mem::take(&mut self.macros);
		self.quiet = true;
		let result = macros.expand(text, &mut |arg| expr::evaluate(self, arg).ok());
		self.quiet = false;
		self.macros = macros;
		result
	}

	/// Emits `bytes` at the program counter. Labels passes only move the counter.
	pub fn emit(&mut self, bytes: &[u8]) -> Result<(), PageError> {
		if self.pass.is_labels() {
			self.pages.advance(bytes.len() as u32);
			return Ok(());
		}
		for &value in bytes {
			let address = self.pages.write(value)?;
			self.emissions.push(Emission {
				address,
				page: self.pages.number(),
				location: self.location,
				value,
			});
		}
		Ok(())
	}

	/// Byte a character stands for in strings, after `.asciimap`.
	pub fn char_byte(&self, ch: char) -> u8 {
		match usize::try_from(ch as u32) {
			Ok(idx) if idx < self.ascii_map.len() => self.ascii_map[idx],
			_ => ch as u32 as u8,
		}
	}

	pub fn enter_module(&mut self, name: &str) {
		let parent = if self.nest_modules && self.module != Symbols::NONAME {
			self.module
		} else {
			Symbols::ROOT
		};
		self.module_stack.push(self.module);
		self.module = self.symbols.enter_module(parent, name);
	}

	pub fn leave_module(&mut self) -> Result<(), Error> {
		self.module = self
			.module_stack
			.pop()
			.ok_or_else(|| Error::directive("endmodule without module"))?;
		Ok(())
	}

	/// Attaches references made before their label was defined.
	pub fn resolve_pending(&mut self) {
		for (name, module, loc) in std::mem::take(&mut self.pending_references) {
			let scope = Scope {
				module,
				local_prefix: &self.settings.local_prefix,
				all_local: self.all_local,
			};
			if let Some(id) = self.symbols.resolve(&name, &scope) {
				self.symbols.label_mut(id).references.push(loc);
			}
		}
	}
}

impl Environment for AssemblerContext<'_> {
	fn label(&mut self, name: &str) -> Result<f64, ExprError> {
		match self.lookup(name).map(|label| label.value) {
			Some(value) => Ok(value),
			None => self.unresolved_label(name),
		}
	}

	fn page(&mut self, name: &str) -> Result<f64, ExprError> {
		match self.lookup(name).map(|label| label.page) {
			Some(page) => Ok(page as f64),
			None => self.unresolved_label(name),
		}
	}

	fn address(&self) -> f64 {
		AssemblerContext::address(self) as f64
	}

	fn reusable(&mut self, target: ReusableRef) -> Result<f64, ExprError> {
		match self.reusable.resolve(self.previous_reusable, target) {
			Some(value) => Ok(value),
			None if self.pass.is_labels() && !self.quiet => {
				self.unresolved += 1;
				Ok(0.0)
			}
			None => Err(ExprError::Reusable(format!("{:?} {}", target.polarity, target.run))),
		}
	}

	fn size_of(&mut self, name: &str) -> Result<f64, ExprError> {
		if let Ok(ty) = self.structs.resolve_type(name) {
			return self
				.structs
				.size_of(&ty)
				.map(f64::from)
				.map_err(|e| ExprError::Malformed(e.to_string()));
		}
		match self.lookup(name).map(|label| label.size) {
			Some(size) => Ok(size as f64),
			None => self.unresolved_label(name),
		}
	}

	fn is_defined(&mut self, name: &str) -> bool {
		self.resolve_label(name).is_some()
	}

	fn map_char(&self, ch: char) -> u8 {
		self.char_byte(ch)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::macros::parse_definition;

	#[test]
	fn one_branch_per_chain() -> Result<(), Error> {
		for selected in 0..4 {
			let mut stack = ConditionalStack::default();
			let mut taken = Vec::new();
			stack.open(|| Ok::<_, Error>(selected == 0))?;
			if stack.active() {
				taken.push(0);
			}
			for branch in 1..3 {
				stack.alternative(|| Ok::<_, Error>(selected == branch))?;
				if stack.active() {
					taken.push(branch);
				}
			}
			stack.otherwise()?;
			if stack.active() {
				taken.push(3);
			}
			stack.close()?;
			assert_eq!(taken, [selected]);
			assert!(stack.active());
		}
		Ok(())
	}

	#[test]
	fn inactive_parents_suppress_children() -> Result<(), Error> {
		let mut stack = ConditionalStack::default();
		stack.open(|| Ok::<_, Error>(false))?;
		let mut consulted = false;
		stack.open(|| {
			consulted = true;
			Ok::<_, Error>(true)
		})?;
		assert!(!consulted);
		assert!(!stack.active());
		stack.otherwise()?;
		assert!(!stack.active());
		stack.close()?;
		stack.otherwise()?;
		assert!(stack.active());
		assert!(stack.otherwise().is_err());
		stack.close()?;
		assert!(stack.close().is_err());
		Ok(())
	}

	#[test]
	fn forward_references_read_previous_pass() -> Result<(), Error> {
		let mut previous = Symbols::new(false);
		let scope = Scope { module: Symbols::NONAME, local_prefix: "_", all_local: false };
		previous.define("later", &scope, LabelDef::value(0x1234 as f64), false)?;
		let reusable = ReusableLabels::default();
		let allocation = HashMap::new();
		let mut diagnostics = Diagnostics::default();
		let mut ctx = AssemblerContext::new(
			Settings::default(),
			PassKind::FinalLabels,
			&previous,
			&reusable,
			&allocation,
			&mut diagnostics,
		);
		assert_eq!(ctx.eval("later + 1"), Ok(0x1235 as f64));
		assert_eq!(ctx.eval("missing * 2"), Ok(0.0));
		assert_eq!(ctx.unresolved, 1);
		// failures caused by unresolved labels are not errors yet
		assert_eq!(ctx.eval("1 / missing"), Ok(0.0));
		ctx.pass = PassKind::Assemble;
		assert_eq!(ctx.eval("missing"), Err(ExprError::UnknownLabel("missing".into())));
		Ok(())
	}

	#[test]
	fn pending_alternatives() -> Result<(), Error> {
		let mut stack = ConditionalStack::default();
		assert!(!stack.alternative_pending());
		stack.open(|| Ok::<_, Error>(false))?;
		assert!(!stack.active());
		assert!(stack.alternative_pending());
		stack.alternative(|| Ok::<_, Error>(true))?;
		assert!(!stack.alternative_pending());
		stack.open(|| Ok::<_, Error>(false))?;
		assert!(stack.alternative_pending());
		stack.otherwise()?;
		assert!(!stack.alternative_pending());
		Ok(())
	}

	#[test]
	fn macro_slots_leave_no_trace() -> Result<(), Error> {
		let mut previous = Symbols::new(false);
		let scope = Scope { module: Symbols::NONAME, local_prefix: "_", all_local: false };
		previous.define("later", &scope, LabelDef::value(1.0), false)?;
		let reusable = ReusableLabels::default();
		let allocation = HashMap::new();
		let mut diagnostics = Diagnostics::default();
		let mut ctx = AssemblerContext::new(
			Settings::default(),
			PassKind::FinalLabels,
			&previous,
			&reusable,
			&allocation,
			&mut diagnostics,
		);
		let (name, replacement) = parse_definition("pick(1) one")?;
		ctx.macros.define(&name, replacement);
		assert_eq!(ctx.expand_macros("pick(missing)")?, "pick(missing)");
		assert_eq!(ctx.unresolved, 0);

		ctx.pass = PassKind::Assemble;
		ctx.location = Some(Location { file: FileId(0), line: 1 });
		assert_eq!(ctx.expand_macros("pick(later)")?, "one");
		assert!(ctx.pending_references.is_empty());
		assert_eq!(ctx.eval("later"), Ok(1.0));
		assert_eq!(ctx.pending_references.len(), 1);
		Ok(())
	}

	#[test]
	fn strict_mode_rejects_fractions() {
		let previous = Symbols::new(false);
		let reusable = ReusableLabels::default();
		let allocation = HashMap::new();
		let mut diagnostics = Diagnostics::default();
		let settings = Settings { strict: true, ..Default::default() };
		let mut ctx = AssemblerContext::new(settings, PassKind::Assemble, &previous, &reusable, &allocation, &mut diagnostics);
		assert_eq!(ctx.eval_int("7 / 2"), Err(ExprError::NotIntegral(3.5)));
		assert_eq!(ctx.eval_int("8 / 2"), Ok(4));
	}
}
