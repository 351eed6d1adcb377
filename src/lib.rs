//! Two-pass macro assembler for Z80-family instruction sets.
//!
//! Sources go through a draft labels pass, variable allocation, a final labels pass and the
//! assembling pass. Each pass starts from a fresh [`context::AssemblerContext`]; forward
//! references read the symbols the previous pass finished with.

pub mod assembler;
pub mod context;
pub mod error;
pub mod expr;
pub mod macros;
pub mod page;
pub mod source;
pub mod symbols;
pub mod table;
mod text;

pub type Name = Box<str>;

pub use assembler::{Assembler, Output};
pub use context::{Breakpoint, Emission, Settings};
pub use error::{Diagnostic, Diagnostics, Error, Severity};
pub use table::InstructionSet;
