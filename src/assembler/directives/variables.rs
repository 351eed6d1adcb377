//! Struct declarations and variables placed in `.varloc` areas.

use tracing::trace;

use super::expect_arguments;
use crate::assembler::Pass;
use crate::context::{PassKind, VarDecl};
use crate::error::Error;
use crate::expr::types::DataType;
use crate::symbols::structs::{split_array, Member, StructDef};
use crate::symbols::vars::VarArea;
use crate::symbols::{validate_name, LabelDef, LabelFlags};
use crate::text::arguments;

pub(crate) fn run(pass: &mut Pass, name: &str, rest: &str) -> Result<(), Error> {
	let args = arguments(rest);
	match name {
		"struct" => {
			expect_arguments(name, &args, 1, 1)?;
			if let Some(open) = &pass.ctx.open_struct {
				return Err(Error::directive(format!(".struct inside .struct {}", open.name)));
			}
			validate_name(args[0])?;
			pass.ctx.open_struct = Some(StructDef { name: args[0].into(), members: Vec::new() });
		}
		"endstruct" => end_struct(pass)?,
		"var" | "tvar" => {
			expect_arguments(name, &args, 2, 2)?;
			declare(pass, args[0], args[1], name == "tvar")?;
		}
		"varloc" => {
			expect_arguments(name, &args, 2, 2)?;
			let start = pass.ctx.eval_u32(args[0])?;
			let size = pass.ctx.eval_u32(args[1])?;
			pass.ctx.var_areas.push(VarArea::new(start, size));
		}
		_ => unreachable!("{name}"),
	}
	Ok(())
}

/// `type`, `type[count]` or a byte count.
fn var_type(pass: &mut Pass, text: &str) -> Result<(DataType, u32), Error> {
	let (name, count) = split_array(text);
	let count = match count {
		Some(count) => pass.ctx.eval_u32(count)?,
		None => 1,
	};
	match pass.ctx.structs.resolve_type(name) {
		Ok(ty) => Ok((ty, count)),
		Err(_) if name.starts_with(|c: char| c.is_ascii_digit() || c == '$' || c == '%' || c == '(') => {
			let bytes = pass.ctx.eval_u32(name)?;
			Ok((DataType::Int { bytes: 1, signed: false }, bytes * count))
		}
		Err(e) => Err(e.into()),
	}
}

fn end_struct(pass: &mut Pass) -> Result<(), Error> {
	let def = pass
		.ctx
		.open_struct
		.take()
		.ok_or_else(|| Error::directive(".endstruct without .struct"))?;
	let name = def.name.clone();
	pass.ctx.structs.define(def)?;
	let ty = DataType::Struct(name.clone());
	let fields = pass.ctx.structs.flatten(&ty)?;
	trace!("struct {name}: {} byte(s)", pass.ctx.structs.size_of(&ty)?);
	for field in fields {
		let size = pass.ctx.structs.size_of(&field.ty)? * field.count;
		let def = LabelDef {
			value: field.offset as f64,
			location: pass.ctx.location,
			ty: Some(field.ty),
			count: field.count,
			size,
			flags: LabelFlags { member: true, ..Default::default() },
			..Default::default()
		};
		pass.ctx.define_label(&format!("{name}.{}", field.path), def, true)?;
	}
	Ok(())
}

fn declare(pass: &mut Pass, ty: &str, name: &str, temporary: bool) -> Result<(), Error> {
	let (ty, count) = var_type(pass, ty)?;
	if let Some(open) = pass.ctx.open_struct.as_mut() {
		if temporary {
			return Err(Error::directive(".tvar cannot declare a struct member"));
		}
		validate_name(name)?;
		if open.members.iter().any(|member| member.name.eq_ignore_ascii_case(name)) {
			return Err(Error::directive(format!("{} already has a member '{name}'", open.name)));
		}
		open.members.push(Member { name: name.into(), ty, count });
		return Ok(());
	}

	let size = pass.ctx.structs.size_of(&ty)? * count;
	if size == 0 {
		return Err(Error::directive(format!("variable '{name}' has no size")));
	}
	let flags = LabelFlags { variable: true, temporary, ..Default::default() };
	let def = LabelDef {
		value: 0.0,
		page: pass.ctx.pages.number(),
		location: pass.ctx.location,
		ty: Some(ty.clone()),
		count,
		size,
		flags,
	};
	let id = pass.ctx.define_label(name, def, false)?;
	let qualified = pass.ctx.symbols.qualified_name(id);
	let address = match pass.ctx.allocation.get(&qualified) {
		Some(&address) => address,
		None if pass.ctx.pass == PassKind::Assemble => {
			return Err(Error::directive(format!("variable '{name}' was never allocated")));
		}
		None => 0,
	};
	pass.ctx.symbols.label_mut(id).value = address as f64;

	for field in pass.ctx.structs.flatten(&ty)? {
		let def = LabelDef {
			value: (address + field.offset) as f64,
			page: pass.ctx.pages.number(),
			location: pass.ctx.location,
			size: pass.ctx.structs.size_of(&field.ty)? * field.count,
			ty: Some(field.ty),
			count: field.count,
			flags: LabelFlags { member: true, ..flags },
		};
		pass.ctx.symbols.define_member(id, &field.path, def)?;
	}
	pass.ctx.var_decls.push(VarDecl {
		label: qualified,
		module: pass.ctx.module,
		temporary,
		size,
	});
	Ok(())
}
