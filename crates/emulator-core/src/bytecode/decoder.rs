//! Bytecode decoding into a resolved instruction form.
//!
//! Call targets are resolved to absolute addresses here, so the interpreter
//! never consults a relocation table.

use super::opcode::Opcode;
use crate::memory::FLASH1_START;

/// Two-operand arithmetic and logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Wrapping add.
    Add,
    /// Wrapping subtract.
    Sub,
    /// Wrapping multiply.
    Mul,
    /// Unsigned divide; a zero divisor yields zero.
    Div,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Shift left; amounts of 32 or more yield zero.
    Lsl,
    /// Logical shift right; amounts of 32 or more yield zero.
    Lsr,
}

impl BinaryOp {
    /// Computes `x op y`.
    #[must_use]
    pub const fn apply(self, x: u32, y: u32) -> u32 {
        match self {
            Self::Add => x.wrapping_add(y),
            Self::Sub => x.wrapping_sub(y),
            Self::Mul => x.wrapping_mul(y),
            Self::Div => match x.checked_div(y) {
                Some(quotient) => quotient,
                None => 0,
            },
            Self::And => x & y,
            Self::Or => x | y,
            Self::Lsl => match x.checked_shl(y) {
                Some(value) => value,
                None => 0,
            },
            Self::Lsr => match x.checked_shr(y) {
                Some(value) => value,
                None => 0,
            },
        }
    }
}

/// Signed comparison guarding a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    /// `x < y`.
    Lt,
    /// `x == y`.
    Eq,
    /// `x > y`.
    Gt,
    /// `x <= y`.
    Le,
    /// `x != y`.
    Ne,
    /// `x >= y`.
    Ge,
}

impl Comparison {
    /// Evaluates the comparison on two's-complement operands.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn holds(self, x: u32, y: u32) -> bool {
        let (x, y) = (x as i32, y as i32);
        match self {
            Self::Lt => x < y,
            Self::Eq => x == y,
            Self::Gt => x > y,
            Self::Le => x <= y,
            Self::Ne => x != y,
            Self::Ge => x >= y,
        }
    }
}

/// Resolved call target, tagged with the encoding that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// `call c`: flash bank 1 base plus `c`.
    Direct(u32),
    /// `callr c`: `c` bytes before the call instruction.
    Relative(u32),
}

impl CallTarget {
    /// Absolute entry address.
    #[must_use]
    pub const fn address(self) -> u32 {
        match self {
            Self::Direct(address) | Self::Relative(address) => address,
        }
    }
}

/// A decoded bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BytecodeInstruction {
    /// `cst_0`, `cst_1`, `cst8`, `cst`.
    Push(u32),
    /// Arithmetic and logic.
    Binary(BinaryOp),
    /// `goto` when `condition` is `None`, otherwise a compare-and-jump.
    Jump {
        /// Guard; `None` always jumps.
        condition: Option<Comparison>,
        /// Offset from the current function base.
        offset: u16,
    },
    /// `load`.
    Load,
    /// `store`.
    Store,
    /// `ptr i`.
    Ptr(u8),
    /// `get i`.
    Get(u8),
    /// `set i`.
    Set(u8),
    /// `pop`.
    Pop,
    /// `fn n`.
    Fn(u8),
    /// `call` or `callr`.
    Call(CallTarget),
    /// `calld`.
    CallIndirect,
    /// `ret`.
    Ret,
    /// `retv`.
    RetValue,
    /// `blx`.
    Blx,
}

/// Decodes `opcode` located at `addr` with its already-fetched operand.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn decode(opcode: Opcode, operand: u32, addr: u32) -> BytecodeInstruction {
    use BytecodeInstruction as I;
    let byte = operand as u8;
    let half = operand as u16;
    let jump = |condition| I::Jump {
        condition,
        offset: half,
    };
    match opcode {
        Opcode::Cst0 => I::Push(0),
        Opcode::Cst1 => I::Push(1),
        Opcode::Cst8 | Opcode::Cst => I::Push(operand),
        Opcode::Add => I::Binary(BinaryOp::Add),
        Opcode::Sub => I::Binary(BinaryOp::Sub),
        Opcode::Mul => I::Binary(BinaryOp::Mul),
        Opcode::Div => I::Binary(BinaryOp::Div),
        Opcode::And => I::Binary(BinaryOp::And),
        Opcode::Or => I::Binary(BinaryOp::Or),
        Opcode::Lsl => I::Binary(BinaryOp::Lsl),
        Opcode::Lsr => I::Binary(BinaryOp::Lsr),
        Opcode::IfLt => jump(Some(Comparison::Lt)),
        Opcode::IfEq => jump(Some(Comparison::Eq)),
        Opcode::IfGt => jump(Some(Comparison::Gt)),
        Opcode::IfLe => jump(Some(Comparison::Le)),
        Opcode::IfNe => jump(Some(Comparison::Ne)),
        Opcode::IfGe => jump(Some(Comparison::Ge)),
        Opcode::Goto => jump(None),
        Opcode::Load => I::Load,
        Opcode::Store => I::Store,
        Opcode::Ptr => I::Ptr(byte),
        Opcode::Get => I::Get(byte),
        Opcode::Set => I::Set(byte),
        Opcode::Pop => I::Pop,
        Opcode::Fn => I::Fn(byte),
        Opcode::Call => I::Call(CallTarget::Direct(FLASH1_START.wrapping_add(u32::from(half)))),
        Opcode::CallR => I::Call(CallTarget::Relative(addr.wrapping_sub(u32::from(half)))),
        Opcode::CallD => I::CallIndirect,
        Opcode::Ret => I::Ret,
        Opcode::RetV => I::RetValue,
        Opcode::Blx => I::Blx,
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, BinaryOp, BytecodeInstruction, CallTarget, Comparison};
    use crate::bytecode::opcode::Opcode;
    use rstest::rstest;

    #[rstest]
    #[case(BinaryOp::Div, 7, 0, 0)]
    #[case(BinaryOp::Div, 7, 2, 3)]
    #[case(BinaryOp::Div, 0xFFFF_FFFE, 2, 0x7FFF_FFFF)]
    #[case(BinaryOp::Lsl, 1, 31, 0x8000_0000)]
    #[case(BinaryOp::Lsl, 1, 32, 0)]
    #[case(BinaryOp::Lsr, 0x8000_0000, 40, 0)]
    #[case(BinaryOp::Sub, 3, 5, 0xFFFF_FFFE)]
    fn binary_edge_cases(#[case] op: BinaryOp, #[case] x: u32, #[case] y: u32, #[case] expected: u32) {
        assert_eq!(op.apply(x, y), expected);
    }

    #[test]
    fn comparisons_are_signed() {
        assert!(Comparison::Lt.holds(0xFFFF_FFFF, 0));
        assert!(Comparison::Ge.holds(0, 0xFFFF_FFFF));
        assert!(Comparison::Le.holds(3, 3));
        assert!(!Comparison::Ne.holds(3, 3));
    }

    #[test]
    fn call_targets_resolve_at_decode_time() {
        assert_eq!(
            decode(Opcode::Call, 0x0120, 0x2007_0000),
            BytecodeInstruction::Call(CallTarget::Direct(0x000C_0120))
        );
        assert_eq!(
            decode(Opcode::CallR, 0x0010, 0x0008_0140),
            BytecodeInstruction::Call(CallTarget::Relative(0x0008_0130))
        );
        assert_eq!(CallTarget::Relative(0x0008_0130).address(), 0x0008_0130);
    }

    #[test]
    fn constants_and_slots_keep_their_operands() {
        assert_eq!(decode(Opcode::Cst1, 0, 0), BytecodeInstruction::Push(1));
        assert_eq!(
            decode(Opcode::Cst, 0xDEAD_BEEF, 0),
            BytecodeInstruction::Push(0xDEAD_BEEF)
        );
        assert_eq!(decode(Opcode::Get, 3, 0), BytecodeInstruction::Get(3));
        assert_eq!(
            decode(Opcode::Goto, 0x40, 0),
            BytecodeInstruction::Jump {
                condition: None,
                offset: 0x40
            }
        );
    }
}
