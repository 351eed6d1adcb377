//! Output pages: sparse byte cells with write counts.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
	Redefined(u32),
	/// Page 0 was already redefined or written to
	Locked,
	Unknown(u32),
	OutOfBounds { page: u32, address: u32 },
}

impl std::error::Error for PageError {}

impl fmt::Display for PageError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Redefined(page) => write!(fmt, "page {page} already defined"),
			Self::Locked => write!(fmt, "page 0 can only be redefined once, before any output"),
			Self::Unknown(page) => write!(fmt, "page {page} not defined"),
			Self::OutOfBounds { page, address } => write!(fmt, "address ${address:04X} outside of page {page}"),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
	pub value: u8,
	pub writes: u32,
	/// Written while `.squish` was active
	pub squished: bool,
}

#[derive(Debug, Clone)]
pub struct Page {
	pub number: u32,
	pub origin: Option<u32>,
	pub size: Option<u32>,
	pub fill: Option<u8>,
	/// Program counter, an absolute address
	pub pc: u32,
	cells: BTreeMap<u32, Cell>,
}

impl Page {
	fn new(number: u32, origin: Option<u32>, size: Option<u32>, fill: Option<u8>) -> Self {
		Self {
			number,
			origin,
			size,
			fill,
			pc: origin.unwrap_or_default(),
			cells: BTreeMap::new(),
		}
	}

	/// Declared origin, else the lowest written address.
	pub fn start(&self) -> u32 {
		self.origin
			.or_else(|| self.cells.keys().next().copied())
			.unwrap_or_default()
	}

	pub fn cells(&self) -> impl Iterator<Item = (u32, &Cell)> {
		self.cells.iter().map(|(addr, cell)| (*addr, cell))
	}

	pub fn is_empty(&self) -> bool {
		self.cells.is_empty()
	}

	fn contains(&self, address: u32) -> bool {
		match (self.origin, self.size) {
			(Some(origin), Some(size)) => address >= origin && address - origin < size,
			_ => true,
		}
	}

	/// Contiguous image from [`Page::start`]: the declared size, else up to the highest written
	/// address. Unwritten cells take the fill value.
	pub fn image(&self, default_fill: u8) -> Vec<u8> {
		let start = self.start();
		let len = match self.size {
			Some(size) => size as usize,
			None => self
				.cells
				.keys()
				.next_back()
				.map_or(0, |last| (last - start) as usize + 1),
		};
		let mut out = vec![self.fill.unwrap_or(default_fill); len];
		for (addr, cell) in self.cells.range(start..) {
			if let Some(byte) = out.get_mut((addr - start) as usize) {
				*byte = cell.value;
			}
		}
		out
	}

	/// Ranges of addresses written more than once.
	pub fn overlaps(&self) -> Vec<(u32, u32)> {
		let mut ranges: Vec<(u32, u32)> = Vec::new();
		for (&addr, _) in self.cells.iter().filter(|(_, cell)| cell.writes > 1) {
			match ranges.last_mut() {
				Some((_, end)) if *end + 1 == addr => *end = addr,
				_ => ranges.push((addr, addr)),
			}
		}
		ranges
	}
}

#[derive(Debug, Clone)]
pub struct Pages {
	pages: BTreeMap<u32, Page>,
	current: u32,
	page0_locked: bool,
	pub squish: bool,
	pub empty_fill: u8,
}

impl Default for Pages {
	fn default() -> Self {
		Self {
			pages: BTreeMap::from([(0, Page::new(0, None, None, None))]),
			current: 0,
			page0_locked: false,
			squish: false,
			empty_fill: 0,
		}
	}
}

impl Pages {
	/// `.defpage`
	pub fn define(&mut self, number: u32, origin: u32, size: u32, fill: Option<u8>) -> Result<(), PageError> {
		if number == 0 {
			if self.page0_locked || !self.pages[&0].is_empty() {
				return Err(PageError::Locked);
			}
			self.page0_locked = true;
		} else if self.pages.contains_key(&number) {
			return Err(PageError::Redefined(number));
		}
		self.pages.insert(number, Page::new(number, Some(origin), Some(size), fill));
		Ok(())
	}

	/// `.page`
	pub fn select(&mut self, number: u32) -> Result<(), PageError> {
		if !self.pages.contains_key(&number) {
			return Err(PageError::Unknown(number));
		}
		self.current = number;
		Ok(())
	}

	pub fn current(&self) -> &Page {
		&self.pages[&self.current]
	}

	fn current_mut(&mut self) -> &mut Page {
		self.pages.entry(self.current).or_insert_with(|| Page::new(0, None, None, None))
	}

	pub fn number(&self) -> u32 {
		self.current
	}

	pub fn pc(&self) -> u32 {
		self.current().pc
	}

	/// `.org`
	pub fn set_pc(&mut self, address: u32) {
		self.current_mut().pc = address;
	}

	/// Moves the program counter without writing, as in the labels passes and `.ds`.
	pub fn advance(&mut self, count: u32) {
		let page = self.current_mut();
		page.pc = page.pc.wrapping_add(count);
	}

	/// Writes `value` at the program counter and advances it, returning the address written.
	pub fn write(&mut self, value: u8) -> Result<u32, PageError> {
		let squished = self.squish;
		let page = self.current_mut();
		let address = page.pc;
		if !page.contains(address) {
			return Err(PageError::OutOfBounds { page: page.number, address });
		}
		let cell = page.cells.entry(address).or_default();
		cell.value = value;
		cell.writes += 1;
		cell.squished = squished;
		page.pc = address.wrapping_add(1);
		Ok(address)
	}

	pub fn get(&self, number: u32) -> Option<&Page> {
		self.pages.get(&number)
	}

	/// Pages in number order.
	pub fn iter(&self) -> impl Iterator<Item = &Page> {
		self.pages.values()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	type TestResult = Result<(), PageError>;

	#[test]
	fn org_and_write() -> TestResult {
		let mut pages = Pages::default();
		pages.set_pc(0x8000);
		for byte in [1, 2, 3] {
			pages.write(byte)?;
		}
		let page = pages.current();
		assert_eq!(page.start(), 0x8000);
		assert_eq!(page.image(0), [1, 2, 3]);
		assert_eq!(pages.pc(), 0x8003);
		Ok(())
	}

	#[test]
	fn gaps_are_filled() -> TestResult {
		let mut pages = Pages::default();
		pages.empty_fill = 0xFF;
		pages.write(1)?;
		pages.advance(2);
		pages.write(2)?;
		assert_eq!(pages.current().image(pages.empty_fill), [1, 0xFF, 0xFF, 2]);
		Ok(())
	}

	#[test]
	fn overlaps_are_ranges() -> TestResult {
		let mut pages = Pages::default();
		pages.set_pc(0x10);
		for byte in 0..4 {
			pages.write(byte)?;
		}
		pages.set_pc(0x11);
		pages.write(9)?;
		pages.write(9)?;
		pages.set_pc(0x20);
		pages.write(1)?;
		pages.set_pc(0x20);
		pages.write(1)?;
		assert_eq!(pages.current().overlaps(), [(0x11, 0x12), (0x20, 0x20)]);
		Ok(())
	}

	#[test]
	fn page_zero_redefined_once() -> TestResult {
		let mut pages = Pages::default();
		pages.define(0, 0x4000, 0x100, None)?;
		assert_eq!(pages.define(0, 0x4000, 0x100, None), Err(PageError::Locked));
		let mut pages = Pages::default();
		pages.write(0)?;
		assert_eq!(pages.define(0, 0, 0x10, None), Err(PageError::Locked));
		Ok(())
	}

	#[test]
	fn sized_pages_bound_writes() -> TestResult {
		let mut pages = Pages::default();
		pages.define(1, 0x4000, 2, Some(0xEE))?;
		assert_eq!(pages.define(1, 0, 1, None), Err(PageError::Redefined(1)));
		assert_eq!(pages.select(5), Err(PageError::Unknown(5)));
		pages.select(1)?;
		assert_eq!(pages.pc(), 0x4000);
		pages.write(0xAA)?;
		assert_eq!(pages.current().image(0), [0xAA, 0xEE]);
		pages.write(0xBB)?;
		assert_eq!(pages.write(0xCC), Err(PageError::OutOfBounds { page: 1, address: 0x4002 }));
		Ok(())
	}
}
