//! Label-resolving assembler for the stack bytecode.
//!
//! Functions open with [`BytecodeAssembler::func`], which emits `fn n` and
//! binds parameter names to frame slots `0..n`. Locals declared with
//! [`BytecodeAssembler::def`] take slots from `n + 4` upward; they must be
//! declared at the top of the function, before anything else is left on
//! the stack, because `def` simply pushes the initial value into place.
//!
//! Function entries are padded to even addresses: native code enters
//! bytecode through an interworking branch with bit 0 clear, so an odd entry
//! would be taken as a Thumb target.
//!
//! Jump operands are offsets from the enclosing `fn` instruction, `call`
//! operands are offsets into flash bank 1, and `callr` operands count back
//! from the call instruction itself.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::collections::HashMap;

use m3_emulator_core::bytecode::Comparison;
use m3_emulator_core::{Opcode, FLASH1_START};

use crate::errors::{AsmError, AsmErrorKind};
use crate::symbols::SymbolTable;
use crate::Image;

/// Slots `n..n+4` of an `n`-argument frame hold the saved caller linkage.
const LINKAGE_SLOTS: u32 = 4;

/// Filler before an entry point; never executed. Matches erased flash.
const PADDING: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reference {
    /// Offset from the function base.
    Jump { function: u32 },
    /// Offset from [`FLASH1_START`].
    Direct,
    /// Distance back from the instruction.
    Relative { at: u32 },
}

#[derive(Debug, Clone)]
struct Fixup {
    offset: usize,
    label: String,
    reference: Reference,
}

#[derive(Debug, Clone)]
struct Function {
    base: u32,
    slots: HashMap<String, u8>,
    next_local: u32,
}

/// Builder for a bytecode image.
#[derive(Debug, Clone)]
pub struct BytecodeAssembler {
    origin: u32,
    bytes: Vec<u8>,
    symbols: SymbolTable,
    fixups: Vec<Fixup>,
    function: Option<Function>,
}

impl BytecodeAssembler {
    /// Starts an image loaded at `origin`.
    #[must_use]
    pub fn new(origin: u32) -> Self {
        Self {
            origin,
            bytes: Vec::new(),
            symbols: SymbolTable::new(),
            fixups: Vec::new(),
            function: None,
        }
    }

    /// Address the next byte will be placed at.
    #[must_use]
    pub fn here(&self) -> u32 {
        self.origin.wrapping_add(self.bytes.len() as u32)
    }

    /// Defines `name` at the current address.
    ///
    /// # Errors
    ///
    /// Fails if `name` is already defined.
    pub fn label(&mut self, name: &str) -> Result<(), AsmError> {
        let here = self.here();
        self.symbols.define(name, here)
    }

    /// Binds `name` to an address assembled elsewhere, such as a function
    /// already in flash or a native routine.
    ///
    /// # Errors
    ///
    /// Fails if `name` is already defined.
    pub fn import(&mut self, name: &str, address: u32) -> Result<(), AsmError> {
        self.symbols.define(name, address)
    }

    /// Starts function `name`, emitting `fn n` for its parameters.
    ///
    /// The entry is moved to the next even address first.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate label or parameter name, or more than 255
    /// parameters.
    pub fn func(&mut self, name: &str, params: &[&str]) -> Result<(), AsmError> {
        let nargs = u8::try_from(params.len()).map_err(|_| AsmErrorKind::OutOfRange {
            field: "parameter count",
            value: params.len() as i64,
        })?;
        if self.here() & 1 != 0 {
            self.bytes.push(PADDING);
        }
        let base = self.here();
        self.symbols.define(name, base)?;
        let mut slots = HashMap::new();
        for (index, param) in (0_u8..).zip(params) {
            if slots.insert((*param).to_string(), index).is_some() {
                return Err(AsmErrorKind::DuplicateLabel {
                    name: (*param).to_string(),
                }
                .into());
            }
        }
        self.function = Some(Function {
            base,
            slots,
            next_local: u32::from(nargs) + LINKAGE_SLOTS,
        });
        self.raw(Opcode::Fn, &[nargs]);
        Ok(())
    }

    /// Declares local `name` and pushes its initial value.
    ///
    /// # Errors
    ///
    /// Fails outside a function, on a name already in use, or when the
    /// frame runs out of addressable slots.
    pub fn def(&mut self, name: &str, initial: u32) -> Result<(), AsmError> {
        let function = self
            .function
            .as_mut()
            .ok_or(AsmErrorKind::OutsideFunction)?;
        let slot = u8::try_from(function.next_local).map_err(|_| AsmErrorKind::OutOfRange {
            field: "frame slot",
            value: i64::from(function.next_local),
        })?;
        if function.slots.contains_key(name) {
            return Err(AsmErrorKind::DuplicateLabel {
                name: name.to_string(),
            }
            .into());
        }
        function.slots.insert(name.to_string(), slot);
        function.next_local += 1;
        self.push(initial);
        Ok(())
    }

    /// `get` of a named parameter or local.
    ///
    /// # Errors
    ///
    /// Fails outside a function or for an undeclared name.
    pub fn get(&mut self, name: &str) -> Result<(), AsmError> {
        self.slot_op(Opcode::Get, name)
    }

    /// `set` of a named parameter or local.
    ///
    /// # Errors
    ///
    /// Fails outside a function or for an undeclared name.
    pub fn set(&mut self, name: &str) -> Result<(), AsmError> {
        self.slot_op(Opcode::Set, name)
    }

    /// `ptr` to a named parameter or local.
    ///
    /// # Errors
    ///
    /// Fails outside a function or for an undeclared name.
    pub fn ptr(&mut self, name: &str) -> Result<(), AsmError> {
        self.slot_op(Opcode::Ptr, name)
    }

    fn slot_op(&mut self, opcode: Opcode, name: &str) -> Result<(), AsmError> {
        let function = self.function.as_ref().ok_or(AsmErrorKind::OutsideFunction)?;
        let slot = *function
            .slots
            .get(name)
            .ok_or_else(|| AsmErrorKind::UnknownName {
                name: name.to_string(),
            })?;
        self.raw(opcode, &[slot]);
        Ok(())
    }

    /// Emits an opcode without operand (`add`, `load`, `ret`, ...).
    ///
    /// # Errors
    ///
    /// Fails for opcodes that carry an operand; use the dedicated method.
    pub fn op(&mut self, opcode: Opcode) -> Result<(), AsmError> {
        if opcode.operand_bytes() != 0 {
            return Err(AsmErrorKind::InvalidOperand {
                detail: format!("'{}' takes an operand", opcode.mnemonic()),
            }
            .into());
        }
        self.raw(opcode, &[]);
        Ok(())
    }

    /// Pushes `value` using the shortest constant form.
    pub fn push(&mut self, value: u32) {
        match value {
            0 => self.raw(Opcode::Cst0, &[]),
            1 => self.raw(Opcode::Cst1, &[]),
            2..=0xFF => self.raw(Opcode::Cst8, &[value as u8]),
            _ => self.raw(Opcode::Cst, &value.to_le_bytes()),
        }
    }

    /// `goto label` within the current function.
    ///
    /// # Errors
    ///
    /// Fails outside a function.
    pub fn jump(&mut self, label: &str) -> Result<(), AsmError> {
        self.jump_with(Opcode::Goto, label)
    }

    /// Pops `y` then `x` and jumps to `label` when `x <comparison> y`.
    ///
    /// # Errors
    ///
    /// Fails outside a function.
    pub fn branch(&mut self, comparison: Comparison, label: &str) -> Result<(), AsmError> {
        let opcode = match comparison {
            Comparison::Lt => Opcode::IfLt,
            Comparison::Eq => Opcode::IfEq,
            Comparison::Gt => Opcode::IfGt,
            Comparison::Le => Opcode::IfLe,
            Comparison::Ne => Opcode::IfNe,
            Comparison::Ge => Opcode::IfGe,
        };
        self.jump_with(opcode, label)
    }

    fn jump_with(&mut self, opcode: Opcode, label: &str) -> Result<(), AsmError> {
        let function = self
            .function
            .as_ref()
            .ok_or(AsmErrorKind::OutsideFunction)?
            .base;
        self.reference(opcode, label, Reference::Jump { function });
        Ok(())
    }

    /// `call label`, for functions placed in flash bank 1.
    pub fn call(&mut self, label: &str) {
        self.reference(Opcode::Call, label, Reference::Direct);
    }

    /// `callr label`, for functions placed before the call.
    pub fn callr(&mut self, label: &str) {
        let at = self.here();
        self.reference(Opcode::CallR, label, Reference::Relative { at });
    }

    /// `calld`: calls the address on top of the stack.
    pub fn calld(&mut self) {
        self.raw(Opcode::CallD, &[]);
    }

    /// `ret`.
    pub fn ret(&mut self) {
        self.raw(Opcode::Ret, &[]);
    }

    /// `retv`.
    pub fn retv(&mut self) {
        self.raw(Opcode::RetV, &[]);
    }

    /// `blx`: pops a native target and its argument and calls it.
    pub fn blx(&mut self) {
        self.raw(Opcode::Blx, &[]);
    }

    /// Appends a little-endian data word.
    pub fn word(&mut self, value: u32) {
        self.bytes.extend(value.to_le_bytes());
    }

    fn raw(&mut self, opcode: Opcode, operand: &[u8]) {
        self.bytes.push(opcode.as_u8());
        self.bytes.extend_from_slice(operand);
    }

    fn reference(&mut self, opcode: Opcode, label: &str, reference: Reference) {
        self.bytes.push(opcode.as_u8());
        self.fixups.push(Fixup {
            offset: self.bytes.len(),
            label: label.to_string(),
            reference,
        });
        self.bytes.extend([0, 0]);
    }

    /// Resolves every label reference and returns the image.
    ///
    /// # Errors
    ///
    /// Fails on an undefined label or an operand outside `0..=0xFFFF`.
    pub fn finish(mut self) -> Result<Image, AsmError> {
        for fixup in &self.fixups {
            let target = i64::from(self.symbols.resolve(&fixup.label)?);
            let (field, value) = match fixup.reference {
                Reference::Jump { function } => ("jump offset", target - i64::from(function)),
                Reference::Direct => ("call offset", target - i64::from(FLASH1_START)),
                Reference::Relative { at } => ("callr distance", i64::from(at) - target),
            };
            let operand = u16::try_from(value)
                .map_err(|_| AsmErrorKind::OutOfRange { field, value })?;
            self.bytes[fixup.offset..fixup.offset + 2].copy_from_slice(&operand.to_le_bytes());
        }
        Ok(Image {
            origin: self.origin,
            bytes: self.bytes,
            symbols: self.symbols,
        })
    }
}
