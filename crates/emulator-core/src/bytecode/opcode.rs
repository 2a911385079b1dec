//! Bytecode opcode table.

/// One-byte bytecode opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    /// Push 0.
    Cst0 = 0,
    /// Push 1.
    Cst1 = 1,
    /// Push an 8-bit constant.
    Cst8 = 2,
    /// Push a 32-bit constant.
    Cst = 3,
    /// `x + y`.
    Add = 4,
    /// `x - y`.
    Sub = 5,
    /// `x * y`.
    Mul = 6,
    /// Unsigned `x / y`.
    Div = 7,
    /// `x & y`.
    And = 8,
    /// `x | y`.
    Or = 9,
    /// `x << y`.
    Lsl = 10,
    /// `x >> y`.
    Lsr = 11,
    /// Jump when `x < y`.
    IfLt = 12,
    /// Jump when `x == y`.
    IfEq = 13,
    /// Jump when `x > y`.
    IfGt = 14,
    /// Jump when `x <= y`.
    IfLe = 15,
    /// Jump when `x != y`.
    IfNe = 16,
    /// Jump when `x >= y`.
    IfGe = 17,
    /// Unconditional jump.
    Goto = 18,
    /// Word load.
    Load = 19,
    /// Word store.
    Store = 20,
    /// Address of a frame slot.
    Ptr = 21,
    /// Read a frame slot.
    Get = 22,
    /// Write a frame slot.
    Set = 23,
    /// Discard the top of stack.
    Pop = 24,
    /// Function prologue.
    Fn = 25,
    /// Direct call.
    Call = 26,
    /// Position-independent call.
    CallR = 27,
    /// Indirect call.
    CallD = 28,
    /// Return without a value.
    Ret = 29,
    /// Return with a value.
    RetV = 30,
    /// Native call.
    Blx = 31,
}

impl Opcode {
    /// Every opcode in encoding order.
    pub const ALL: [Self; 32] = [
        Self::Cst0,
        Self::Cst1,
        Self::Cst8,
        Self::Cst,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::And,
        Self::Or,
        Self::Lsl,
        Self::Lsr,
        Self::IfLt,
        Self::IfEq,
        Self::IfGt,
        Self::IfLe,
        Self::IfNe,
        Self::IfGe,
        Self::Goto,
        Self::Load,
        Self::Store,
        Self::Ptr,
        Self::Get,
        Self::Set,
        Self::Pop,
        Self::Fn,
        Self::Call,
        Self::CallR,
        Self::CallD,
        Self::Ret,
        Self::RetV,
        Self::Blx,
    ];

    /// Decodes an opcode byte.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        if (byte as usize) < Self::ALL.len() {
            Some(Self::ALL[byte as usize])
        } else {
            None
        }
    }

    /// Encoded opcode byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Width of the little-endian operand following the opcode byte.
    #[must_use]
    pub const fn operand_bytes(self) -> u32 {
        match self {
            Self::Cst8 | Self::Ptr | Self::Get | Self::Set | Self::Fn => 1,
            Self::IfLt
            | Self::IfEq
            | Self::IfGt
            | Self::IfLe
            | Self::IfNe
            | Self::IfGe
            | Self::Goto
            | Self::Call
            | Self::CallR => 2,
            Self::Cst => 4,
            _ => 0,
        }
    }

    /// Assembler mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Cst0 => "cst_0",
            Self::Cst1 => "cst_1",
            Self::Cst8 => "cst8",
            Self::Cst => "cst",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::And => "and",
            Self::Or => "or",
            Self::Lsl => "lsl",
            Self::Lsr => "lsr",
            Self::IfLt => "iflt",
            Self::IfEq => "ifeq",
            Self::IfGt => "ifgt",
            Self::IfLe => "ifle",
            Self::IfNe => "ifne",
            Self::IfGe => "ifge",
            Self::Goto => "goto",
            Self::Load => "load",
            Self::Store => "store",
            Self::Ptr => "ptr",
            Self::Get => "get",
            Self::Set => "set",
            Self::Pop => "pop",
            Self::Fn => "fn",
            Self::Call => "call",
            Self::CallR => "callr",
            Self::CallD => "calld",
            Self::Ret => "ret",
            Self::RetV => "retv",
            Self::Blx => "blx",
        }
    }

    /// Looks an opcode up by mnemonic.
    #[must_use]
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::Opcode;

    #[test]
    fn table_is_dense_and_ordered() {
        for (index, op) in Opcode::ALL.into_iter().enumerate() {
            assert_eq!(usize::from(op.as_u8()), index);
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Opcode::from_u8(32), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Opcode::Cst.operand_bytes(), 4);
        assert_eq!(Opcode::CallR.operand_bytes(), 2);
        assert_eq!(Opcode::Fn.operand_bytes(), 1);
        assert_eq!(Opcode::Blx.operand_bytes(), 0);
    }
}
