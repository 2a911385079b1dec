//! Assemblers for the three instruction sets the M3 board emulator executes.
//!
//! [`native`] and [`bytecode`] are builder-style assemblers used by hosts and
//! tests to lay out flash and SRAM images; [`t8`] is a small text assembler
//! for the T8 toy CPU.

/// Label-resolving bytecode assembler.
pub mod bytecode;
/// Structured assembly error types.
pub mod errors;
/// Label-resolving native assembler with literal pools.
pub mod native;
/// Label table shared by the assemblers.
pub mod symbols;
/// T8 text assembler.
pub mod t8;
/// Native instruction encoder.
pub mod thumb;

pub use errors::{AsmError, AsmErrorKind};
pub use symbols::SymbolTable;

#[cfg(test)]
use tempfile as _;

/// An assembled, fully resolved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Load address of `bytes[0]`.
    pub origin: u32,
    /// Image contents.
    pub bytes: Vec<u8>,
    /// Every label defined while assembling.
    pub symbols: SymbolTable,
}

impl Image {
    /// Address of `label`, if defined.
    #[must_use]
    pub fn address_of(&self, label: &str) -> Option<u32> {
        self.symbols.get(label)
    }

    /// Address one past the last byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn end(&self) -> u32 {
        self.origin.wrapping_add(self.bytes.len() as u32)
    }
}
