use std::collections::HashMap;

use super::SymbolError;
use crate::expr::types::DataType;
use crate::Name;

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
	pub name: Name,
	pub ty: DataType,
	pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
	pub name: Name,
	pub members: Vec<Member>,
}

/// One offset label produced by expanding a struct, `path` relative to the variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
	pub path: String,
	pub ty: DataType,
	pub count: u32,
	pub offset: u32,
}

/// Splits `type[count]` into the type name and the count expression.
pub fn split_array(text: &str) -> (&str, Option<&str>) {
	let text = text.trim();
	match text.strip_suffix(']').and_then(|t| t.split_once('[')) {
		Some((ty, count)) => (ty.trim(), Some(count.trim())),
		None => (text, None),
	}
}

#[derive(Debug, Clone, Default)]
pub struct StructTable {
	defs: HashMap<Name, StructDef>,
}

impl StructTable {
	fn key(name: &str) -> Name {
		name.to_ascii_lowercase().into()
	}

	pub fn define(&mut self, def: StructDef) -> Result<(), SymbolError> {
		let key = Self::key(&def.name);
		if self.defs.contains_key(&key) {
			return Err(SymbolError::StructRedefined(def.name));
		}
		self.defs.insert(key, def);
		Ok(())
	}

	pub fn get(&self, name: &str) -> Option<&StructDef> {
		self.defs.get(&Self::key(name))
	}

	/// Built-in type or a declared struct.
	pub fn resolve_type(&self, name: &str) -> Result<DataType, SymbolError> {
		if let Some(ty) = DataType::builtin(name) {
			return Ok(ty);
		}
		self.get(name)
			.map(|def| DataType::Struct(def.name.clone()))
			.ok_or_else(|| SymbolError::UnknownType(name.into()))
	}

	pub fn size_of(&self, ty: &DataType) -> Result<u32, SymbolError> {
		self.size_checked(ty, &mut Vec::new())
	}

	fn size_checked(&self, ty: &DataType, open: &mut Vec<Name>) -> Result<u32, SymbolError> {
		let DataType::Struct(name) = ty else {
			return Ok(ty.size().unwrap_or_default());
		};
		let key = Self::key(name);
		if open.contains(&key) {
			return Err(SymbolError::RecursiveStruct(name.clone()));
		}
		let def = self.defs.get(&key).ok_or_else(|| SymbolError::UnknownType(name.clone()))?;
		open.push(key);
		let mut size = 0;
		for member in &def.members {
			size += self.size_checked(&member.ty, open)? * member.count;
		}
		open.pop();
		Ok(size)
	}

	/// Every member of a struct typed variable with its offset, nested structs flattened into
	/// dotted paths. Array members expose their first element.
	pub fn flatten(&self, ty: &DataType) -> Result<Vec<Field>, SymbolError> {
		let mut fields = Vec::new();
		self.flatten_into(ty, "", 0, &mut fields, &mut Vec::new())?;
		Ok(fields)
	}

	fn flatten_into(
		&self,
		ty: &DataType,
		prefix: &str,
		base: u32,
		fields: &mut Vec<Field>,
		open: &mut Vec<Name>,
	) -> Result<(), SymbolError> {
		let DataType::Struct(name) = ty else {
			return Ok(());
		};
		let key = Self::key(name);
		if open.contains(&key) {
			return Err(SymbolError::RecursiveStruct(name.clone()));
		}
		let def = self.defs.get(&key).ok_or_else(|| SymbolError::UnknownType(name.clone()))?;
		open.push(key);
		let mut offset = base;
		for member in &def.members {
			let path = if prefix.is_empty() {
				member.name.to_string()
			} else {
				format!("{prefix}.{}", member.name)
			};
			fields.push(Field {
				path: path.clone(),
				ty: member.ty.clone(),
				count: member.count,
				offset,
			});
			self.flatten_into(&member.ty, &path, offset, fields, open)?;
			offset += self.size_of(&member.ty)? * member.count;
		}
		open.pop();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	type TestResult = Result<(), SymbolError>;

	fn member(name: &str, ty: DataType, count: u32) -> Member {
		Member { name: name.into(), ty, count }
	}

	fn table() -> Result<StructTable, SymbolError> {
		let mut table = StructTable::default();
		let byte = DataType::Int { bytes: 1, signed: false };
		let word = DataType::Int { bytes: 2, signed: false };
		table.define(StructDef {
			name: "Point".into(),
			members: vec![member("x", byte.clone(), 1), member("y", byte, 1)],
		})?;
		table.define(StructDef {
			name: "Sprite".into(),
			members: vec![
				member("pos", DataType::Struct("Point".into()), 1),
				member("tiles", word, 4),
				member("path", DataType::Struct("point".into()), 2),
			],
		})?;
		Ok(table)
	}

	#[test]
	fn sizes_include_nested_structs() -> TestResult {
		let table = table()?;
		assert_eq!(table.size_of(&table.resolve_type("point")?)?, 2);
		assert_eq!(table.size_of(&table.resolve_type("Sprite")?)?, 2 + 8 + 4);
		Ok(())
	}

	#[test]
	fn flatten_produces_offsets() -> TestResult {
		let table = table()?;
		let fields = table.flatten(&DataType::Struct("Sprite".into()))?;
		let offsets: Vec<(&str, u32)> = fields.iter().map(|f| (f.path.as_str(), f.offset)).collect();
		assert_eq!(
			offsets,
			[("pos", 0), ("pos.x", 0), ("pos.y", 1), ("tiles", 2), ("path", 10), ("path.x", 10), ("path.y", 11)],
		);
		Ok(())
	}

	#[test]
	fn self_nesting_is_rejected() -> TestResult {
		let mut table = StructTable::default();
		table.define(StructDef {
			name: "Node".into(),
			members: vec![member("next", DataType::Struct("Node".into()), 1)],
		})?;
		assert!(matches!(
			table.size_of(&DataType::Struct("Node".into())),
			Err(SymbolError::RecursiveStruct(_)),
		));
		Ok(())
	}

	#[test]
	fn array_suffix() {
		assert_eq!(split_array("word[ 4 ]"), ("word", Some("4")));
		assert_eq!(split_array(" Point "), ("Point", None));
	}
}
