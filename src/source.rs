//! Source files, loaded once and shared by every pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::context::PassKind;
use crate::error::Error;
use crate::table::Match;
use crate::text::{opens_quote, quoted_end, split_top_level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) usize);

/// A physical line, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
	pub file: FileId,
	pub line: usize,
}

/// Statement index inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
	pub line: usize,
	pub statement: usize,
}

/// Instruction form matched for a statement, read back by the assembling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
	pub pass: PassKind,
	pub operands: String,
	pub matched: Match,
}

#[derive(Debug, Clone)]
pub struct Statement {
	pub text: String,
	/// First statement of a line that starts in column zero
	pub column0: bool,
	/// Macros already expanded into `text`
	pub expanded: bool,
	pub annotation: Option<Annotation>,
}

impl Statement {
	fn new(text: &str, column0: bool) -> Self {
		Self {
			text: text.into(),
			column0,
			expanded: false,
			annotation: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct SourceFile {
	pub path: PathBuf,
	/// Statements per line, `lines[0]` is line 1
	pub lines: Vec<Vec<Statement>>,
}

impl SourceFile {
	pub fn parse(path: PathBuf, text: &str) -> Self {
		let lines = strip_comments(text)
			.iter()
			.map(|line| split_statements(line))
			.collect();
		Self { path, lines }
	}

	pub fn statement(&self, pos: Position) -> Option<&Statement> {
		self.lines.get(pos.line)?.get(pos.statement)
	}

	pub fn statement_mut(&mut self, pos: Position) -> Option<&mut Statement> {
		self.lines.get_mut(pos.line)?.get_mut(pos.statement)
	}

	/// Replaces the statement at `pos` with the pieces of `text` split at backslashes.
	pub fn splice(&mut self, pos: Position, text: &str) {
		let Some(line) = self.lines.get_mut(pos.line) else { return };
		let column0 = line.get(pos.statement).is_some_and(|stmt| stmt.column0);
		let pieces: Vec<Statement> = split_top_level(text, '\\')
			.into_iter()
			.enumerate()
			.map(|(idx, piece)| {
				let mut stmt = Statement::new(piece.trim_end(), column0 && idx == 0);
				stmt.expanded = true;
				stmt
			})
			.collect();
		line.splice(pos.statement..=pos.statement, pieces);
	}
}

/// Removes `;` and `/* */` comments, block comments may span lines.
fn strip_comments(text: &str) -> Vec<String> {
	let mut out = Vec::new();
	let mut in_block = false;
	for line in text.lines() {
		let mut kept = String::with_capacity(line.len());
		let mut idx = 0;
		while idx < line.len() {
			let rest = &line[idx..];
			if in_block {
				match rest.find("*/") {
					Some(end) => {
						in_block = false;
						idx += end + 2;
						// keep statements on either side apart
						kept.push(' ');
						continue;
					}
					None => break,
				}
			}
			let Some(ch) = rest.chars().next() else { break };
			if (ch == '"' || ch == '\'') && opens_quote(line, idx) {
				if let Some(end) = quoted_end(line, idx) {
					kept.push_str(&line[idx..end]);
					idx = end;
					continue;
				}
			}
			if ch == ';' {
				break;
			}
			if rest.starts_with("/*") {
				in_block = true;
				idx += 2;
				continue;
			}
			kept.push(ch);
			idx += ch.len_utf8();
		}
		out.push(kept);
	}
	out
}

fn split_statements(line: &str) -> Vec<Statement> {
	if line.trim().is_empty() {
		return Vec::new();
	}
	let column0 = !line.starts_with(char::is_whitespace);
	split_top_level(line, '\\')
		.into_iter()
		.enumerate()
		.filter(|(_, piece)| !piece.trim().is_empty())
		.map(|(idx, piece)| Statement::new(piece.trim_end(), column0 && idx == 0))
		.collect()
}

/// Handle opened with `.fopen`.
#[derive(Debug, Clone)]
pub struct FileHandle {
	pub path: PathBuf,
	pub position: usize,
}

/// Every file the assembly touches. Sources are parsed once, binaries read once.
#[derive(Debug, Default)]
pub struct SourceStore {
	files: Vec<SourceFile>,
	by_path: HashMap<PathBuf, FileId>,
	memory: HashMap<PathBuf, String>,
	binaries: HashMap<PathBuf, Vec<u8>>,
	include_dirs: Vec<PathBuf>,
}

impl SourceStore {
	pub fn new(include_dirs: Vec<PathBuf>) -> Self {
		Self { include_dirs, ..Default::default() }
	}

	/// Registers an in-memory file, found before the file system.
	pub fn add_memory(&mut self, path: PathBuf, text: String) {
		self.memory.insert(path, text);
	}

	fn exists(&self, path: &Path) -> bool {
		self.memory.contains_key(path) || path.is_file()
	}

	/// Looks `name` up next to the including file, then in the include directories.
	pub fn resolve(&self, name: &str, including: Option<FileId>) -> PathBuf {
		let name = Path::new(name);
		let mut candidates = Vec::new();
		if let Some(dir) = including.and_then(|id| self.files[id.0].path.parent()) {
			candidates.push(dir.join(name));
		}
		candidates.push(name.to_owned());
		candidates.extend(self.include_dirs.iter().map(|dir| dir.join(name)));
		candidates
			.into_iter()
			.find(|path| self.exists(path))
			.unwrap_or_else(|| name.to_owned())
	}

	pub fn load(&mut self, path: &Path) -> Result<FileId, Error> {
		if let Some(&id) = self.by_path.get(path) {
			return Ok(id);
		}
		let text = match self.memory.get(path) {
			Some(text) => text.clone(),
			None => std::fs::read_to_string(path).map_err(|e| Error::Io(path.to_owned(), e))?,
		};
		debug!("loaded '{}'", path.display());
		let id = FileId(self.files.len());
		self.files.push(SourceFile::parse(path.to_owned(), &text));
		self.by_path.insert(path.to_owned(), id);
		Ok(id)
	}

	pub fn binary(&mut self, path: &Path) -> Result<&[u8], Error> {
		if !self.binaries.contains_key(path) {
			let data = match self.memory.get(path) {
				Some(text) => text.as_bytes().to_vec(),
				None => std::fs::read(path).map_err(|e| Error::Io(path.to_owned(), e))?,
			};
			self.binaries.insert(path.to_owned(), data);
		}
		Ok(self.binaries.get(path).map(Vec::as_slice).unwrap_or_default())
	}

	pub fn file(&self, id: FileId) -> &SourceFile {
		&self.files[id.0]
	}

	pub fn file_mut(&mut self, id: FileId) -> &mut SourceFile {
		&mut self.files[id.0]
	}

	/// Forgets every instruction match, so a new assembly cannot read stale ones.
	pub fn clear_annotations(&mut self) {
		for stmt in self.files.iter_mut().flat_map(|file| file.lines.iter_mut().flatten()) {
			stmt.annotation = None;
		}
	}

	pub fn paths(&self) -> Vec<PathBuf> {
		self.files.iter().map(|file| file.path.clone()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn texts(file: &SourceFile) -> Vec<Vec<(&str, bool)>> {
		file.lines
			.iter()
			.map(|line| line.iter().map(|stmt| (stmt.text.as_str(), stmt.column0)).collect())
			.collect()
	}

	#[test]
	fn comments_are_stripped() {
		let file = SourceFile::parse(
			"a.asm".into(),
			"start: ld a,';' ; load\n\tnop /* one\n still\n done */ halt\n.db \"/*\"",
		);
		assert_eq!(
			texts(&file),
			vec![
				vec![("start: ld a,';'", true)],
				vec![("\tnop", false)],
				vec![],
				vec![("  halt", false)],
				vec![(".db \"/*\"", true)],
			],
		);
	}

	#[test]
	fn statements_split_at_backslash() {
		let file = SourceFile::parse("a.asm".into(), "loop ld a,'\\\\' \\ djnz loop\n");
		assert_eq!(texts(&file), vec![vec![("loop ld a,'\\\\'", true), (" djnz loop", false)]]);
	}

	#[test]
	fn splice_replaces_one_statement() {
		let mut file = SourceFile::parse("a.asm".into(), "  m \\ nop");
		file.splice(Position { line: 0, statement: 0 }, "ld a,1 \\ ld b,2");
		assert_eq!(texts(&file), vec![vec![("ld a,1", false), (" ld b,2", false), (" nop", false)]]);
		assert!(file.lines[0][1].expanded);
	}

	#[test]
	fn memory_files_resolve_first() -> Result<(), Error> {
		let mut store = SourceStore::default();
		store.add_memory("lib/inc.asm".into(), "nop".into());
		store.add_memory("main.asm".into(), ".include \"lib/inc.asm\"".into());
		let main = store.load(Path::new("main.asm"))?;
		let path = store.resolve("lib/inc.asm", Some(main));
		assert_eq!(path, PathBuf::from("lib/inc.asm"));
		let inc = store.load(&path)?;
		assert_eq!(store.load(&path)?, inc);
		assert_eq!(store.file(inc).lines.len(), 1);
		Ok(())
	}
}
