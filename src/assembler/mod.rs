//! Pass driver: walks the sources once per pass and dispatches every statement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, trace};

use crate::context::{AssemblerContext, Breakpoint, Emission, PassKind, Settings, VarDecl};
use crate::error::{Diagnostic, Diagnostics, Error, Severity};
use crate::page::Pages;
use crate::source::{Annotation, FileId, Location, Position, SourceStore};
use crate::symbols::reusable::{ReusableLabels, ReusableRef};
use crate::symbols::vars::{self, TempScope, VarArea, VarRequest};
use crate::symbols::{validate_name, LabelDef, LabelFlags, ModuleId, Scope, SymbolError, Symbols};
use crate::table::{encode, InstructionSet};
use crate::text::{split_word, squeeze};

pub(crate) mod directives;


/// Deepest `.include` nesting accepted.
pub(crate) const MAX_INCLUDE_DEPTH: usize = 64;

/// What the line loop does after a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
	Done,
	/// Statement text left after a label
	Remainder(String),
	/// Continue at another statement of the same file
	Jump(Position),
	/// `.end`
	Stop,
}

/// Everything the assembling pass produced.
#[derive(Debug)]
pub struct Output {
	pub pages: Pages,
	pub symbols: Symbols,
	pub breakpoints: Vec<Breakpoint>,
	pub emissions: Vec<Emission>,
	pub binary_mode: Option<String>,
	/// Source paths, indexed by the file ids of [`Location`]s
	pub files: Vec<PathBuf>,
}

impl Output {
	/// Image of every page in page order.
	pub fn binary(&self) -> Vec<u8> {
		self.pages
			.iter()
			.flat_map(|page| page.image(self.pages.empty_fill))
			.collect()
	}

	pub fn file_path(&self, file: FileId) -> Option<&Path> {
		self.files.get(file.0).map(PathBuf::as_path)
	}

	/// Exported labels with their values, in definition order.
	pub fn exports(&self) -> Vec<(String, f64)> {
		self.symbols
			.labels()
			.filter(|(_, label)| label.exported)
			.map(|(id, label)| (self.symbols.display_name(id), label.value))
			.collect()
	}

	/// Value of a label as seen from outside every module.
	pub fn label(&self, name: &str) -> Option<f64> {
		let scope = Scope {
			module: Symbols::NONAME,
			local_prefix: "_",
			all_local: false,
		};
		self.symbols
			.resolve(name, &scope)
			.map(|id| self.symbols.label(id).value)
	}
}

/// State one pass leaves for the next.
struct PassOutput {
	symbols: Symbols,
	reusable: ReusableLabels,
	pages: Pages,
	var_areas: Vec<VarArea>,
	var_decls: Vec<VarDecl>,
	breakpoints: Vec<Breakpoint>,
	emissions: Vec<Emission>,
	binary_mode: Option<String>,
}

pub struct Assembler {
	settings: Settings,
	table: Option<InstructionSet>,
	store: SourceStore,
	diagnostics: Diagnostics,
}

impl Assembler {
	pub fn new(settings: Settings) -> Self {
		Self {
			store: SourceStore::new(settings.include_dirs.clone()),
			settings,
			table: None,
			diagnostics: Diagnostics::default(),
		}
	}

	/// Uses `table` instead of the bundled Z80 table.
	pub fn with_table(mut self, table: InstructionSet) -> Self {
		self.table = Some(table);
		self
	}

	/// Makes `text` available as the file `path`, ahead of the file system.
	pub fn add_source(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
		self.store.add_memory(path.into(), text.into());
	}

	/// Diagnostics of the last [`Assembler::assemble`].
	pub fn diagnostics(&self) -> &Diagnostics {
		&self.diagnostics
	}

	#[instrument(skip_all, fields(source = %path.display()))]
	pub fn assemble(&mut self, path: &Path) -> Result<Output, Error> {
		self.diagnostics = Diagnostics::default();
		self.store.clear_annotations();
		let table = match self.table.take() {
			Some(table) => table,
			None => InstructionSet::z80()?,
		};
		let table = &*self.table.insert(table);
		let main = self.store.load(path)?;

		let empty = Symbols::new(self.settings.case_sensitive);
		let no_reusable = ReusableLabels::default();
		let no_allocation = HashMap::new();
		let draft = run_pass(
			&self.settings,
			PassKind::DraftLabels,
			&mut self.store,
			table,
			(&empty, &no_reusable, &no_allocation),
			&mut self.diagnostics,
			main,
		)?;
		abort_on_errors(&self.diagnostics)?;

		let allocation = match allocate_variables(&draft) {
			Ok(allocation) => allocation,
			Err(e) => {
				self.diagnostics.report(Diagnostic {
					severity: Severity::Error,
					file: None,
					line: None,
					message: e.to_string(),
				});
				return Err(Error::Aborted { errors: self.diagnostics.error_count() });
			}
		};
		debug!("{} variable(s) placed", allocation.len());

		let final_labels = run_pass(
			&self.settings,
			PassKind::FinalLabels,
			&mut self.store,
			table,
			(&draft.symbols, &draft.reusable, &allocation),
			&mut self.diagnostics,
			main,
		)?;
		let assembled = run_pass(
			&self.settings,
			PassKind::Assemble,
			&mut self.store,
			table,
			(&final_labels.symbols, &final_labels.reusable, &allocation),
			&mut self.diagnostics,
			main,
		)?;

		for page in assembled.pages.iter() {
			for (start, end) in page.overlaps() {
				self.diagnostics.report(Diagnostic {
					severity: Severity::Warning,
					file: None,
					line: None,
					message: format!("page {}: ${start:04X}-${end:04X} written more than once", page.number),
				});
			}
		}
		abort_on_errors(&self.diagnostics)?;
		info!(
			"{} byte(s), {} warning(s)",
			assembled.emissions.len(),
			self.diagnostics.warning_count(),
		);
		Ok(Output {
			pages: assembled.pages,
			symbols: assembled.symbols,
			breakpoints: assembled.breakpoints,
			emissions: assembled.emissions,
			binary_mode: assembled.binary_mode,
			files: self.store.paths(),
		})
	}
}

fn abort_on_errors(diagnostics: &Diagnostics) -> Result<(), Error> {
	match diagnostics.error_count() {
		0 => Ok(()),
		errors => Err(Error::Aborted { errors }),
	}
}

#[instrument(skip_all, fields(pass = ?kind))]
fn run_pass<'a>(
	settings: &Settings,
	kind: PassKind,
	store: &'a mut SourceStore,
	table: &'a InstructionSet,
	(previous, previous_reusable, allocation): (&'a Symbols, &'a ReusableLabels, &'a HashMap<String, u32>),
	diagnostics: &'a mut Diagnostics,
	main: FileId,
) -> Result<PassOutput, Error> {
	let ctx = AssemblerContext::new(settings.clone(), kind, previous, previous_reusable, allocation, diagnostics);
	let mut pass = Pass { ctx, store, table };
	pass.run_file(main)?;
	pass.finish();
	let ctx = pass.ctx;
	debug!("{} unresolved reference(s)", ctx.unresolved);
	Ok(PassOutput {
		symbols: ctx.symbols,
		reusable: ctx.reusable,
		pages: ctx.pages,
		var_areas: ctx.var_areas,
		var_decls: ctx.var_decls,
		breakpoints: ctx.breakpoints,
		emissions: ctx.emissions,
		binary_mode: ctx.binary_mode,
	})
}

/// Places every variable the draft pass declared, keyed by qualified label name.
fn allocate_variables(draft: &PassOutput) -> Result<HashMap<String, u32>, SymbolError> {
	let mut areas = draft.var_areas.clone();
	let requests: Vec<VarRequest> = draft
		.var_decls
		.iter()
		.filter(|decl| !decl.temporary)
		.map(|decl| VarRequest { name: decl.label.clone(), size: decl.size })
		.collect();
	let mut placed = vars::allocate(&mut areas, &requests)?;
	let roots = [Symbols::ROOT, Symbols::GLOBAL, Symbols::NONAME];
	let temporaries = TempScope {
		vars: temporaries_in(&draft.var_decls, &roots),
		children: roots
			.iter()
			.flat_map(|&root| draft.symbols.module(root).children())
			.map(|&child| temp_scope(&draft.symbols, &draft.var_decls, child))
			.collect(),
	};
	placed.extend(vars::allocate_scoped(&mut areas, &temporaries)?);
	Ok(placed.into_iter().collect())
}

fn temporaries_in(decls: &[VarDecl], modules: &[ModuleId]) -> Vec<VarRequest> {
	decls
		.iter()
		.filter(|decl| decl.temporary && modules.contains(&decl.module))
		.map(|decl| VarRequest { name: decl.label.clone(), size: decl.size })
		.collect()
}

fn temp_scope(symbols: &Symbols, decls: &[VarDecl], module: ModuleId) -> TempScope {
	TempScope {
		vars: temporaries_in(decls, &[module]),
		children: symbols
			.module(module)
			.children()
			.iter()
			.map(|&child| temp_scope(symbols, decls, child))
			.collect(),
	}
}

/// `.x`/`#x` as the lower case directive name.
pub(crate) fn directive_name(word: &str) -> Option<String> {
	let name = word.strip_prefix('.').or_else(|| word.strip_prefix('#'))?;
	(!name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric()))
		.then(|| name.to_ascii_lowercase())
}

/// `name = expr` or `name .equ expr`.
fn assignment(text: &str) -> Option<(&str, &str)> {
	let (word, rest) = split_word(text);
	let (next, value) = split_word(rest);
	if directive_name(next).is_some_and(|name| name == "equ") {
		return Some((word.strip_suffix(':').unwrap_or(word), value));
	}
	let idx = text.find('=')?;
	let (name, value) = (text[..idx].trim(), &text[idx + 1..]);
	if value.starts_with('=') || validate_name(name).is_err() {
		return None;
	}
	Some((name, value.trim()))
}

/// One pass over the sources.
pub(crate) struct Pass<'a> {
	pub(crate) ctx: AssemblerContext<'a>,
	pub(crate) store: &'a mut SourceStore,
	pub(crate) table: &'a InstructionSet,
}

impl Pass<'_> {
	/// Runs a whole file, returning `true` when `.end` was reached.
	pub(crate) fn run_file(&mut self, file: FileId) -> Result<bool, Error> {
		let saved = (self.ctx.file, self.ctx.file_path.clone(), self.ctx.location);
		self.ctx.file = Some(file);
		self.ctx.file_path = self.store.file(file).path.clone();
		let loops = self.ctx.loops.len();
		trace!("entering '{}'", self.ctx.file_path.display());

		let mut pos = Position { line: 0, statement: 0 };
		let result = loop {
			let Some(line) = self.store.file(file).lines.get(pos.line) else {
				break Ok(false);
			};
			if pos.statement >= line.len() {
				pos = Position { line: pos.line + 1, statement: 0 };
				continue;
			}
			self.ctx.location = Some(Location { file, line: pos.line + 1 });
			match self.statement(file, pos) {
				Ok(Flow::Jump(to)) => pos = to,
				Ok(Flow::Stop) => break Ok(true),
				Ok(_) => pos.statement += 1,
				Err(e) if e.is_fatal() => break Err(e),
				Err(e) => {
					self.ctx.report(Severity::Error, e.to_string());
					if self.ctx.settings.strict {
						break Err(Error::Aborted { errors: self.ctx.diagnostics.error_count() });
					}
					pos.statement += 1;
				}
			}
		};

		if self.ctx.loops.len() > loops && result.is_ok() {
			self.ctx.report(Severity::Error, "loop without .loop");
		}
		self.ctx.loops.truncate(loops);
		(self.ctx.file, self.ctx.file_path, self.ctx.location) = saved;
		result
	}

	/// Checks what a file left open and settles exports and references.
	fn finish(&mut self) {
		self.ctx.location = None;
		if self.ctx.conditionals.depth() > 0 {
			self.ctx.report(Severity::Error, ".if without .endif");
		}
		if self.ctx.long_macro.is_some() {
			self.ctx.report(Severity::Error, ".deflong without .enddeflong");
		}
		if self.ctx.open_struct.is_some() {
			self.ctx.report(Severity::Error, ".struct without .endstruct");
		}
		if self.ctx.pass != PassKind::Assemble {
			return;
		}
		for (name, module) in std::mem::take(&mut self.ctx.exports) {
			let scope = Scope {
				module,
				local_prefix: &self.ctx.settings.local_prefix,
				all_local: self.ctx.all_local,
			};
			match self.ctx.symbols.resolve(&name, &scope) {
				Some(id) => self.ctx.symbols.label_mut(id).exported = true,
				None => self.ctx.report(Severity::Error, format!("cannot export unknown label '{name}'")),
			}
		}
		self.ctx.resolve_pending();
	}

	fn statement(&mut self, file: FileId, pos: Position) -> Result<Flow, Error> {
		self.expand(file, pos)?;
		let Some(stmt) = self.store.file(file).statement(pos) else {
			return Ok(Flow::Done);
		};
		let (text, column0) = (stmt.text.clone(), stmt.column0);
		let mut flow = self.dispatch(file, pos, &text, column0)?;
		while let Flow::Remainder(rest) = flow {
			flow = self.dispatch(file, pos, &rest, false)?;
		}
		Ok(flow)
	}

	/// Expands macros in a statement the first time active code reaches it.
	fn expand(&mut self, file: FileId, pos: Position) -> Result<(), Error> {
		if self.ctx.long_macro.is_some() || self.ctx.skipped_loops > 0 {
			return Ok(());
		}
		let Some(stmt) = self.store.file(file).statement(pos) else {
			return Ok(());
		};
		let text = stmt.text.clone();
		// an `.elseif` is evaluated while its block is still inactive
		let active = self.ctx.conditionals.active()
			|| (self.ctx.conditionals.alternative_pending() && directives::conditional::is_alternative(&text));
		if stmt.expanded || !active {
			return Ok(());
		}
		let expanded = if directives::names_macro(&text, stmt.column0) {
			text.clone()
		} else {
			self.ctx.expand_macros(&text)?
		};
		let source = self.store.file_mut(file);
		if expanded == text {
			if let Some(stmt) = source.statement_mut(pos) {
				stmt.expanded = true;
			}
		} else {
			trace!("'{text}' -> '{expanded}'");
			source.splice(pos, &expanded);
		}
		Ok(())
	}

	fn dispatch(&mut self, file: FileId, pos: Position, text: &str, column0: bool) -> Result<Flow, Error> {
		let text = text.trim();
		if text.is_empty() {
			return Ok(Flow::Done);
		}
		if self.ctx.long_macro.is_some() {
			return directives::define::collect(self, text);
		}
		if self.ctx.skipped_loops > 0 {
			directives::flow::skip(self, text);
			return Ok(Flow::Done);
		}
		let (word, rest) = split_word(text);
		let directive = directive_name(word);
		if let Some(name) = directive.as_deref().filter(|name| directives::conditional::handles(name)) {
			directives::conditional::run(self, name, rest)?;
			return Ok(Flow::Done);
		}
		if !self.ctx.conditionals.active() {
			return Ok(Flow::Done);
		}
		if let Some(name) = directive {
			return directives::run(self, file, pos, &name, rest);
		}
		if let Some((name, value)) = assignment(text) {
			self.assign(name, value)?;
			return Ok(Flow::Done);
		}
		if column0 || word.ends_with(':') {
			self.define_address_label(word.strip_suffix(':').unwrap_or(word))?;
			return Ok(match rest {
				"" => Flow::Done,
				rest => Flow::Remainder(rest.into()),
			});
		}
		if self.table.is_mnemonic(word) {
			self.instruction(file, pos, word, rest)?;
			return Ok(Flow::Done);
		}
		Err(Error::Instruction(format!("unknown instruction '{word}'")))
	}

	/// `name = expr`, redefinable.
	fn assign(&mut self, name: &str, value: &str) -> Result<(), Error> {
		let value = self.ctx.eval(value)?;
		let def = LabelDef {
			value,
			page: self.ctx.pages.number(),
			location: self.ctx.location,
			count: 1,
			flags: LabelFlags { constant: true, ..Default::default() },
			..Default::default()
		};
		self.ctx.define_label(name, def, true)?;
		Ok(())
	}

	fn define_address_label(&mut self, name: &str) -> Result<(), Error> {
		let address = self.ctx.address() as f64;
		if let Some((polarity, run)) = ReusableRef::definition(name) {
			self.ctx.reusable.define(polarity, run, address);
			return Ok(());
		}
		let def = LabelDef {
			value: address,
			page: self.ctx.pages.number(),
			location: self.ctx.location,
			count: 1,
			..Default::default()
		};
		self.ctx.define_label(name, def, false)?;
		if self.ctx.pass == PassKind::Assemble {
			if let Some(previous) = self.ctx.previous_label(name).filter(|label| label.value != address) {
				return Err(Error::directive(format!(
					"phase error: '{name}' was ${:04X} in the labels pass, ${:04X} now",
					previous.value as i64, address as i64,
				)));
			}
		}
		Ok(())
	}

	fn instruction(&mut self, file: FileId, pos: Position, mnemonic: &str, operands: &str) -> Result<(), Error> {
		let key = squeeze(operands);
		if self.ctx.pass.is_labels() {
			let matched = self
				.table
				.find(mnemonic, operands)
				.ok_or_else(|| Error::Instruction(format!("operands not understood: '{mnemonic} {operands}'")))?;
			let size = self.table.instruction(matched.index).size;
			if let Some(stmt) = self.store.file_mut(file).statement_mut(pos) {
				stmt.annotation = Some(Annotation { pass: self.ctx.pass, operands: key, matched });
			}
			self.ctx.pages.advance(size);
			return Ok(());
		}

		let annotation = self.store.file(file).statement(pos).and_then(|stmt| stmt.annotation.clone());
		let matched = match annotation {
			Some(ann) if ann.pass == PassKind::FinalLabels && ann.operands == key => ann.matched,
			ann => {
				let detail = match ann {
					None => format!("'{mnemonic} {operands}' was never matched"),
					Some(ann) if ann.pass != PassKind::FinalLabels => {
						format!("'{mnemonic} {operands}' was skipped by the final labels pass")
					}
					Some(ann) => format!("operands '{}' changed to '{key}'", ann.operands),
				};
				return Err(Error::Desync {
					file: self.ctx.file_path.clone(),
					line: pos.line + 1,
					detail,
				});
			}
		};
		let ins = self.table.instruction(matched.index);
		let bytes = matched
			.args
			.iter()
			.map(|arg| self.ctx.eval_int(arg))
			.collect::<Result<Vec<_>, _>>()
			.map_err(Error::from)
			.and_then(|args| Ok(encode(ins, &args, self.ctx.address())?));
		match bytes {
			Ok(bytes) => Ok(self.ctx.emit(&bytes)?),
			Err(e) => {
				// keep later addresses in step with the labels passes
				self.ctx.pages.advance(ins.size);
				Err(e)
			}
		}
	}
}
