use super::SymbolError;

/// Memory region declared with `.varloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarArea {
	pub start: u32,
	pub size: u32,
	pub used: u32,
}

impl VarArea {
	pub fn new(start: u32, size: u32) -> Self {
		Self { start, size, used: 0 }
	}

	pub fn free(&self) -> u32 {
		self.size - self.used
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRequest {
	/// Qualified label name, the allocation key
	pub name: String,
	pub size: u32,
}

/// Temporaries declared in one module, with the modules nested in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempScope {
	pub vars: Vec<VarRequest>,
	pub children: Vec<TempScope>,
}

/// Places `vars`, largest first, each into the area with the most free space.
pub fn allocate(areas: &mut [VarArea], vars: &[VarRequest]) -> Result<Vec<(String, u32)>, SymbolError> {
	let mut order: Vec<&VarRequest> = vars.iter().collect();
	order.sort_by(|a, b| b.size.cmp(&a.size));
	let mut placed = Vec::with_capacity(order.len());
	for var in order {
		let best = areas
			.iter_mut()
			.reduce(|best, area| if area.free() > best.free() { area } else { best });
		let free = best.as_ref().map_or(0, |area| area.free());
		let area = match best {
			Some(area) if area.free() >= var.size => area,
			_ => {
				return Err(SymbolError::AllocationFailed {
					name: var.name.clone(),
					size: var.size,
					free,
				})
			}
		};
		placed.push((var.name.clone(), area.start + area.used));
		area.used += var.size;
	}
	Ok(placed)
}

/// Allocates a tree of temporaries. Sibling scopes start from the same free space, so their
/// temporaries overlap.
pub fn allocate_scoped(areas: &mut [VarArea], scope: &TempScope) -> Result<Vec<(String, u32)>, SymbolError> {
	let mut placed = allocate(areas, &scope.vars)?;
	for child in &scope.children {
		let saved = areas.to_vec();
		placed.extend(allocate_scoped(areas, child)?);
		areas.copy_from_slice(&saved);
	}
	Ok(placed)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn req(name: &str, size: u32) -> VarRequest {
		VarRequest { name: name.into(), size }
	}

	#[test]
	fn packs_largest_first() -> Result<(), SymbolError> {
		let mut areas = [VarArea::new(0xC000, 10)];
		let placed = allocate(&mut areas, &[req("small", 4), req("large", 6)])?;
		assert_eq!(placed, [("large".to_string(), 0xC000), ("small".to_string(), 0xC006)]);
		assert_eq!(areas[0].free(), 0);
		assert!(matches!(
			allocate(&mut areas, &[req("extra", 1)]),
			Err(SymbolError::AllocationFailed { size: 1, free: 0, .. }),
		));
		Ok(())
	}

	#[test]
	fn prefers_area_with_most_space() -> Result<(), SymbolError> {
		let mut areas = [VarArea::new(0x100, 4), VarArea::new(0x200, 8)];
		let placed = allocate(&mut areas, &[req("a", 3), req("b", 3), req("c", 3)])?;
		assert_eq!(
			placed,
			[("a".to_string(), 0x200), ("b".to_string(), 0x203), ("c".to_string(), 0x100)],
		);
		Ok(())
	}

	#[test]
	fn no_areas_fails() {
		assert!(allocate(&mut [], &[req("x", 1)]).is_err());
		assert_eq!(allocate(&mut [], &[]).map(|v| v.len()).ok(), Some(0));
	}

	#[test]
	fn sibling_temporaries_overlap() -> Result<(), SymbolError> {
		let mut areas = [VarArea::new(0, 16)];
		let tree = TempScope {
			vars: vec![req("outer", 2)],
			children: vec![
				TempScope { vars: vec![req("a.t", 4)], children: vec![] },
				TempScope { vars: vec![req("b.t", 3)], children: vec![] },
			],
		};
		let placed = allocate_scoped(&mut areas, &tree)?;
		assert_eq!(
			placed,
			[("outer".to_string(), 0), ("a.t".to_string(), 2), ("b.t".to_string(), 2)],
		);
		assert_eq!(areas[0].used, 2);
		Ok(())
	}
}
