//! IT block bookkeeping.
//!
//! `IT` loads an 8-bit ITSTATE: the base condition in bits 7:5 and a mask
//! whose low bits also supply bit 4 of the condition for each following
//! instruction. The state advances after every instruction in the block.

use crate::decoder::{Condition, DataOp, Instruction};
use crate::state::GeneralRegister;

/// ITSTATE between instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItState(u8);

impl ItState {
    /// Wraps raw ITSTATE bits.
    #[must_use]
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// State loaded by `IT firstcond, mask`.
    #[must_use]
    pub const fn start(firstcond: Condition, mask: u8) -> Self {
        Self(((firstcond as u8) << 4) | (mask & 0xF))
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Inside an IT block.
    #[must_use]
    pub const fn is_active(self) -> bool {
        self.0 & 0xF != 0
    }

    /// The current instruction is the last one of the block.
    #[must_use]
    pub const fn is_last(self) -> bool {
        self.0 & 0xF == 0x8
    }

    /// Condition of the current instruction. `None` for the `AL` encodings.
    #[must_use]
    pub const fn condition(self) -> Option<Condition> {
        Condition::from_u4((self.0 >> 4) as u16)
    }

    /// State for the next instruction.
    #[must_use]
    pub const fn advance(self) -> Self {
        if self.0 & 0x7 == 0 {
            Self(0)
        } else {
            Self((self.0 & 0xE0) | ((self.0 << 1) & 0x1F))
        }
    }

    /// Whether `instruction` may appear at the current position of the block.
    ///
    /// Nested `IT` and conditional branches are never allowed; anything that
    /// writes PC must be last.
    #[must_use]
    pub const fn permits(self, instruction: Instruction) -> bool {
        match instruction {
            Instruction::It { .. }
            | Instruction::BranchCond { .. }
            | Instruction::CompareBranch { .. } => false,
            Instruction::Branch { .. }
            | Instruction::Bl { .. }
            | Instruction::Bx { .. }
            | Instruction::Blx { .. }
            | Instruction::Tbb { .. }
            | Instruction::Pop { pc: true, .. }
            | Instruction::MovHigh {
                rd: GeneralRegister::Pc,
                ..
            }
            | Instruction::AddHigh {
                rdn: GeneralRegister::Pc,
                ..
            } => self.is_last(),
            _ => true,
        }
    }
}

/// Narrow ALU encodings that set flags outside an IT block and leave them
/// untouched inside one.
#[must_use]
pub const fn flags_suppressed(instruction: Instruction) -> bool {
    match instruction {
        Instruction::ShiftImm { .. }
        | Instruction::AddReg { .. }
        | Instruction::SubReg { .. }
        | Instruction::AddImm3 { .. }
        | Instruction::SubImm3 { .. }
        | Instruction::MovImm { .. }
        | Instruction::AddImm8 { .. }
        | Instruction::SubImm8 { .. } => true,
        Instruction::DataProc { op, .. } => !matches!(op, DataOp::Tst | DataOp::Cmp),
        _ => false,
    }
}
