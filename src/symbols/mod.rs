use std::collections::HashMap;
use std::fmt;

use crate::expr::types::DataType;
use crate::source::Location;
use crate::Name;

pub mod reusable;
pub mod structs;
pub mod vars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(usize);

/// Characters that can never appear in a label name.
const INVALID: &[char] = &['+', '-', '*', '/', ':', '(', ')', '<', '>', '&', '%', '^', '|'];

#[derive(Debug)]
pub enum SymbolError {
	InvalidName(Name),
	Redefined { name: Name, previous: Option<Location> },
	UnknownModule(Name),
	UnknownType(Name),
	RecursiveStruct(Name),
	StructRedefined(Name),
	AllocationFailed { name: String, size: u32, free: u32 },
}

impl std::error::Error for SymbolError {}

impl fmt::Display for SymbolError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::InvalidName(name) => write!(fmt, "invalid label name '{name}'"),
			Self::Redefined { name, previous: Some(loc) } => {
				write!(fmt, "label '{name}' already defined (line {})", loc.line)
			}
			Self::Redefined { name, previous: None } => write!(fmt, "label '{name}' already defined"),
			Self::UnknownModule(name) => write!(fmt, "unknown module '{name}'"),
			Self::UnknownType(name) => write!(fmt, "unknown type '{name}'"),
			Self::RecursiveStruct(name) => write!(fmt, "struct '{name}' cannot contain itself"),
			Self::StructRedefined(name) => write!(fmt, "struct '{name}' already defined"),
			Self::AllocationFailed { name, size, free } => write!(
				fmt,
				"unable to allocate {size} byte(s) for variable '{name}' ({free} byte(s) free in the largest area)",
			),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelFlags {
	/// Declared with `.var`/`.tvar` and placed by the allocator
	pub variable: bool,
	/// Declared with `.tvar`
	pub temporary: bool,
	/// Assigned with `=`/`.equ` or a loop counter, may be redefined
	pub constant: bool,
	/// Offset label produced by a struct expansion
	pub member: bool,
}

#[derive(Debug, Clone)]
pub struct Label {
	pub name: Name,
	pub module: ModuleId,
	pub value: f64,
	pub page: u32,
	pub location: Option<Location>,
	pub exported: bool,
	pub ty: Option<DataType>,
	pub count: u32,
	pub size: u32,
	pub flags: LabelFlags,
	pub references: Vec<Location>,
}

/// Everything about a label a definition supplies.
#[derive(Debug, Clone, Default)]
pub struct LabelDef {
	pub value: f64,
	pub page: u32,
	pub location: Option<Location>,
	pub ty: Option<DataType>,
	pub count: u32,
	pub size: u32,
	pub flags: LabelFlags,
}

impl LabelDef {
	pub fn value(value: f64) -> Self {
		Self { value, count: 1, ..Default::default() }
	}
}

#[derive(Debug, Clone)]
pub struct Module {
	pub name: Name,
	pub parent: Option<ModuleId>,
	children: HashMap<Name, ModuleId>,
	child_order: Vec<ModuleId>,
	labels: HashMap<Name, LabelId>,
	using: Vec<Name>,
}

impl Module {
	fn new(name: &str, parent: Option<ModuleId>) -> Self {
		Self {
			name: name.into(),
			parent,
			children: HashMap::new(),
			child_order: Vec::new(),
			labels: HashMap::new(),
			using: Vec::new(),
		}
	}

	pub fn children(&self) -> &[ModuleId] {
		&self.child_order
	}
}

/// How the current position sees unqualified names.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
	pub module: ModuleId,
	pub local_prefix: &'a str,
	pub all_local: bool,
}

impl Scope<'_> {
	pub fn is_local(&self, name: &str) -> bool {
		self.all_local || (!self.local_prefix.is_empty() && name.starts_with(self.local_prefix))
	}
}

#[derive(Debug, Clone, Copy)]
enum Start {
	This,
	Root,
	Global,
}

/// Splits `a.b.c` into an optional explicit start, intermediate modules and the leaf name.
fn parse_path(name: &str) -> (Option<Start>, Vec<&str>, &str) {
	let mut parts: Vec<&str> = name.split('.').collect();
	let leaf = parts.pop().unwrap_or_default();
	let start = match parts.first().map(|p| p.to_ascii_lowercase()) {
		Some(p) if p == "this" => Some(Start::This),
		Some(p) if p == "root" => Some(Start::Root),
		Some(p) if p == "global" => Some(Start::Global),
		_ => None,
	};
	if start.is_some() {
		parts.remove(0);
	}
	(start, parts, leaf)
}

pub fn validate_name(name: &str) -> Result<(), SymbolError> {
	let invalid = name.is_empty()
		|| name.starts_with(|c: char| c.is_ascii_digit())
		|| name.split('.').any(str::is_empty)
		|| name.chars().any(|c| INVALID.contains(&c) || c.is_whitespace() || "\"'{},$@#=!~?;\\".contains(c));
	if invalid {
		Err(SymbolError::InvalidName(name.into()))
	} else {
		Ok(())
	}
}

/// Module tree plus label arena. Module and label ids are stable indices.
#[derive(Debug, Clone)]
pub struct Symbols {
	modules: Vec<Module>,
	labels: Vec<Label>,
	case_sensitive: bool,
}

impl Symbols {
	/// Anonymous root, parent of every `.module`.
	pub const ROOT: ModuleId = ModuleId(0);
	/// Home of labels without the local prefix.
	pub const GLOBAL: ModuleId = ModuleId(1);
	/// Default scope outside of any module.
	pub const NONAME: ModuleId = ModuleId(2);

	pub fn new(case_sensitive: bool) -> Self {
		Self {
			modules: vec![
				Module::new("", None),
				Module::new("global", None),
				Module::new("noname", None),
			],
			labels: Vec::new(),
			case_sensitive,
		}
	}

	fn key(&self, name: &str) -> Name {
		if self.case_sensitive {
			name.into()
		} else {
			name.to_lowercase().into()
		}
	}

	pub fn module(&self, id: ModuleId) -> &Module {
		&self.modules[id.0]
	}

	pub fn label(&self, id: LabelId) -> &Label {
		&self.labels[id.0]
	}

	pub fn label_mut(&mut self, id: LabelId) -> &mut Label {
		&mut self.labels[id.0]
	}

	/// Labels in definition order.
	pub fn labels(&self) -> impl Iterator<Item = (LabelId, &Label)> {
		self.labels.iter().enumerate().map(|(idx, lbl)| (LabelId(idx), lbl))
	}

	pub fn child(&self, parent: ModuleId, name: &str) -> Option<ModuleId> {
		self.modules[parent.0].children.get(&self.key(name)).copied()
	}

	/// Finds or creates the child module `name` of `parent`.
	pub fn enter_module(&mut self, parent: ModuleId, name: &str) -> ModuleId {
		if let Some(id) = self.child(parent, name) {
			return id;
		}
		let id = ModuleId(self.modules.len());
		self.modules.push(Module::new(name, Some(parent)));
		let key = self.key(name);
		let module = &mut self.modules[parent.0];
		module.children.insert(key, id);
		module.child_order.push(id);
		id
	}

	pub fn add_using(&mut self, module: ModuleId, name: &str) {
		let name: Name = name.into();
		let using = &mut self.modules[module.0].using;
		if !using.contains(&name) {
			using.push(name);
		}
	}

	fn label_in(&self, module: ModuleId, leaf: &str) -> Option<LabelId> {
		self.modules[module.0].labels.get(&self.key(leaf)).copied()
	}

	fn start_module(&self, start: Start, current: ModuleId) -> ModuleId {
		match start {
			Start::This => current,
			Start::Root => Self::ROOT,
			Start::Global => Self::GLOBAL,
		}
	}

	/// Modules a relative path may start from: the current module and its ancestors, then the
	/// permanent roots.
	fn search_chain(&self, current: ModuleId) -> Vec<ModuleId> {
		let mut chain = vec![current];
		let mut cursor = self.modules[current.0].parent;
		while let Some(id) = cursor {
			chain.push(id);
			cursor = self.modules[id.0].parent;
		}
		for root in [Self::ROOT, Self::GLOBAL, Self::NONAME] {
			if !chain.contains(&root) {
				chain.push(root);
			}
		}
		chain
	}

	fn walk(&self, base: ModuleId, path: &[&str]) -> Option<ModuleId> {
		path.iter().try_fold(base, |module, name| self.child(module, name))
	}

	fn walk_create(&mut self, base: ModuleId, path: &[&str]) -> ModuleId {
		path.iter().fold(base, |module, name| self.enter_module(module, name))
	}

	/// Resolves a module path (`a.b`) relative to `current`.
	pub fn find_module(&self, current: ModuleId, path: &str) -> Option<ModuleId> {
		let parts: Vec<&str> = path.split('.').collect();
		self.search_chain(current)
			.into_iter()
			.find_map(|base| self.walk(base, &parts))
	}

	fn using_modules(&self, module: ModuleId) -> Vec<ModuleId> {
		self.modules[module.0]
			.using
			.iter()
			.filter_map(|name| self.find_module(module, name))
			.collect()
	}

	/// Resolves a (possibly dotted) label name as seen from `scope`.
	pub fn resolve(&self, name: &str, scope: &Scope) -> Option<LabelId> {
		let (start, modules, leaf) = parse_path(name);
		match start {
			Some(start) => {
				let base = self.start_module(start, scope.module);
				let module = self.walk(base, &modules)?;
				self.label_in(module, leaf)
			}
			None if !modules.is_empty() => self
				.search_chain(scope.module)
				.into_iter()
				.filter_map(|base| self.walk(base, &modules))
				.find_map(|module| self.label_in(module, leaf)),
			None if scope.is_local(leaf) => self
				.label_in(scope.module, leaf)
				.or_else(|| {
					self.using_modules(scope.module)
						.into_iter()
						.find_map(|module| self.label_in(module, leaf))
				})
				.or_else(|| self.label_in(Self::GLOBAL, leaf)),
			None => self.label_in(Self::GLOBAL, leaf),
		}
	}

	/// Module a definition of `name` from `scope` lands in, creating missing modules.
	fn target_module(&mut self, start: Option<Start>, modules: &[&str], leaf: &str, scope: &Scope) -> ModuleId {
		match start {
			Some(start) => {
				let base = self.start_module(start, scope.module);
				self.walk_create(base, modules)
			}
			None if !modules.is_empty() => {
				let existing = self
					.search_chain(scope.module)
					.into_iter()
					.find_map(|base| self.walk(base, modules));
				match existing {
					Some(module) => module,
					None => self.walk_create(scope.module, modules),
				}
			}
			None if scope.is_local(leaf) => scope.module,
			None => Self::GLOBAL,
		}
	}

	/// Defines `name`. Without `force` an existing label in the same scope is an error.
	pub fn define(&mut self, name: &str, scope: &Scope, def: LabelDef, force: bool) -> Result<LabelId, SymbolError> {
		validate_name(name)?;
		let (start, modules, leaf) = parse_path(name);
		let module = self.target_module(start, &modules, leaf, scope);
		self.insert(module, leaf, def, force)
	}

	/// Defines `path` (`member` or `inner.member`) below the module named after `base`.
	pub fn define_member(&mut self, base: LabelId, path: &str, def: LabelDef) -> Result<LabelId, SymbolError> {
		let owner = self.labels[base.0].module;
		let base_name = self.labels[base.0].name.clone();
		let mut module = self.enter_module(owner, &base_name);
		let mut parts: Vec<&str> = path.split('.').collect();
		let leaf = parts.pop().unwrap_or_default();
		for part in parts {
			module = self.enter_module(module, part);
		}
		self.insert(module, leaf, def, true)
	}

	fn insert(&mut self, module: ModuleId, leaf: &str, def: LabelDef, force: bool) -> Result<LabelId, SymbolError> {
		let key = self.key(leaf);
		if let Some(&id) = self.modules[module.0].labels.get(&key) {
			let label = &mut self.labels[id.0];
			if !force {
				return Err(SymbolError::Redefined {
					name: label.name.clone(),
					previous: label.location,
				});
			}
			label.value = def.value;
			label.page = def.page;
			label.location = def.location.or(label.location);
			label.ty = def.ty;
			label.count = def.count;
			label.size = def.size;
			label.flags = def.flags;
			return Ok(id);
		}
		let id = LabelId(self.labels.len());
		self.labels.push(Label {
			name: leaf.into(),
			module,
			value: def.value,
			page: def.page,
			location: def.location,
			exported: false,
			ty: def.ty,
			count: def.count,
			size: def.size,
			flags: def.flags,
			references: Vec::new(),
		});
		self.modules[module.0].labels.insert(key, id);
		Ok(id)
	}

	fn module_names(&self, mut id: ModuleId) -> (ModuleId, Vec<Name>) {
		let mut names = Vec::new();
		while let Some(parent) = self.modules[id.0].parent {
			names.push(self.modules[id.0].name.clone());
			id = parent;
		}
		names.reverse();
		(id, names)
	}

	/// Module in `self` at the same path as `id` in `other`, or its nearest existing ancestor.
	pub fn equivalent_module(&self, other: &Symbols, id: ModuleId) -> ModuleId {
		let (root, names) = other.module_names(id);
		let mut module = root;
		for name in &names {
			match self.child(module, name) {
				Some(child) => module = child,
				None => break,
			}
		}
		module
	}

	/// Unique name of a label across passes (`global.start`, `root.io._port`).
	pub fn qualified_name(&self, id: LabelId) -> String {
		let label = &self.labels[id.0];
		let (root, names) = self.module_names(label.module);
		let root = match root {
			Self::GLOBAL => "global",
			Self::NONAME => "noname",
			_ => "root",
		};
		let mut out = String::from(root);
		for name in names.iter().chain(std::iter::once(&label.name)) {
			out.push('.');
			out.push_str(name);
		}
		out
	}

	/// Name as written in source for globals, dotted module path otherwise.
	pub fn display_name(&self, id: LabelId) -> String {
		let label = &self.labels[id.0];
		let (_, names) = self.module_names(label.module);
		let mut parts: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
		parts.push(&label.name);
		parts.join(".")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	type TestResult = Result<(), SymbolError>;

	fn scope(module: ModuleId) -> Scope<'static> {
		Scope { module, local_prefix: "_", all_local: false }
	}

	#[test]
	fn globals_are_visible_everywhere() -> TestResult {
		let mut syms = Symbols::new(false);
		let io = syms.enter_module(Symbols::ROOT, "io");
		syms.define("Start", &scope(io), LabelDef::value(1.0), false)?;
		let found = syms.resolve("start", &scope(Symbols::NONAME)).unwrap();
		assert_eq!(syms.label(found).value, 1.0);
		assert_eq!(syms.qualified_name(found), "global.Start");
		Ok(())
	}

	#[test]
	fn locals_stay_in_their_module() -> TestResult {
		let mut syms = Symbols::new(false);
		let a = syms.enter_module(Symbols::ROOT, "a");
		let b = syms.enter_module(Symbols::ROOT, "b");
		syms.define("_x", &scope(a), LabelDef::value(1.0), false)?;
		syms.define("_x", &scope(b), LabelDef::value(2.0), false)?;
		assert_eq!(syms.label(syms.resolve("_x", &scope(a)).unwrap()).value, 1.0);
		assert_eq!(syms.label(syms.resolve("_x", &scope(b)).unwrap()).value, 2.0);
		assert_eq!(syms.label(syms.resolve("a._x", &scope(b)).unwrap()).value, 1.0);
		assert_eq!(syms.label(syms.resolve("root.b._x", &scope(a)).unwrap()).value, 2.0);
		assert!(syms.resolve("_x", &scope(Symbols::NONAME)).is_none());
		Ok(())
	}

	#[test]
	fn using_imports_locals() -> TestResult {
		let mut syms = Symbols::new(false);
		let gfx = syms.enter_module(Symbols::ROOT, "gfx");
		let game = syms.enter_module(Symbols::ROOT, "game");
		syms.define("_width", &scope(gfx), LabelDef::value(96.0), false)?;
		assert!(syms.resolve("_width", &scope(game)).is_none());
		syms.add_using(game, "gfx");
		assert_eq!(syms.label(syms.resolve("_width", &scope(game)).unwrap()).value, 96.0);
		Ok(())
	}

	#[test]
	fn redefinition_requires_force() -> TestResult {
		let mut syms = Symbols::new(true);
		syms.define("value", &scope(Symbols::NONAME), LabelDef::value(1.0), false)?;
		assert!(matches!(
			syms.define("value", &scope(Symbols::NONAME), LabelDef::value(2.0), false),
			Err(SymbolError::Redefined { .. }),
		));
		let id = syms.define("value", &scope(Symbols::NONAME), LabelDef::value(3.0), true)?;
		assert_eq!(syms.label(id).value, 3.0);
		// case sensitive tree keeps these apart
		syms.define("VALUE", &scope(Symbols::NONAME), LabelDef::value(4.0), false)?;
		Ok(())
	}

	#[test]
	fn invalid_names_are_rejected() {
		for name in ["a+b", "x:y", "(z)", "1abc", "a..b", "p|q", ""] {
			assert!(validate_name(name).is_err(), "{name}");
		}
		assert!(validate_name("this._ok.name").is_ok());
	}

	#[test]
	fn dotted_definitions_create_modules() -> TestResult {
		let mut syms = Symbols::new(false);
		let id = syms.define("this.inner.value", &scope(Symbols::NONAME), LabelDef::value(7.0), false)?;
		assert_eq!(syms.qualified_name(id), "noname.inner.value");
		assert_eq!(syms.resolve("inner.value", &scope(Symbols::NONAME)), Some(id));
		Ok(())
	}

	#[test]
	fn equivalent_modules_map_across_trees() {
		let mut first = Symbols::new(false);
		let a = first.enter_module(Symbols::ROOT, "a");
		let ab = first.enter_module(a, "b");
		let mut second = Symbols::new(false);
		let a2 = second.enter_module(Symbols::ROOT, "a");
		assert_eq!(second.equivalent_module(&first, ab), a2);
		let ab2 = second.enter_module(a2, "b");
		assert_eq!(second.equivalent_module(&first, ab), ab2);
		assert_eq!(first.equivalent_module(&second, Symbols::GLOBAL), Symbols::GLOBAL);
	}
}
