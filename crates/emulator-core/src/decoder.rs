//! Native instruction decoder for the Thumb subset the core executes.
//!
//! Decoding is a pure function of one or two halfwords. Encodings outside the
//! supported subset, and supported encodings with unpredictable register
//! choices, decode to [`FaultCode::UndefinedInstruction`].

#![allow(missing_docs)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

use crate::fault::FaultCode;
use crate::state::GeneralRegister;

/// Condition field of `B<cond>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    Eq = 0,
    Ne = 1,
    Cs = 2,
    Cc = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
}

impl Condition {
    /// Decodes a 4-bit condition field; `0b1110` and `0b1111` are not conditions.
    #[must_use]
    pub const fn from_u4(bits: u16) -> Option<Self> {
        Some(match bits & 0xF {
            0 => Self::Eq,
            1 => Self::Ne,
            2 => Self::Cs,
            3 => Self::Cc,
            4 => Self::Mi,
            5 => Self::Pl,
            6 => Self::Vs,
            7 => Self::Vc,
            8 => Self::Hi,
            9 => Self::Ls,
            10 => Self::Ge,
            11 => Self::Lt,
            12 => Self::Gt,
            13 => Self::Le,
            _ => return None,
        })
    }

    /// Evaluates the condition against N, Z, C and V.
    #[must_use]
    pub const fn holds(self, n: bool, z: bool, c: bool, v: bool) -> bool {
        match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Cs => c,
            Self::Cc => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => !c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
        }
    }
}

/// Immediate shift kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Lsl,
    Lsr,
}

/// Register-register data processing operations (`010000` group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataOp {
    And,
    Eor,
    Lsl,
    Lsr,
    Tst,
    Cmp,
    Orr,
    Mul,
    Mvn,
}

impl DataOp {
    /// Decodes the 4-bit opcode field of the data processing group.
    #[must_use]
    pub const fn from_u4(bits: u16) -> Option<Self> {
        Some(match bits & 0xF {
            0b0000 => Self::And,
            0b0001 => Self::Eor,
            0b0010 => Self::Lsl,
            0b0011 => Self::Lsr,
            0b1000 => Self::Tst,
            0b1010 => Self::Cmp,
            0b1100 => Self::Orr,
            0b1101 => Self::Mul,
            0b1111 => Self::Mvn,
            _ => return None,
        })
    }

    /// Encoding of the operation's 4-bit opcode field.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::And => 0b0000,
            Self::Eor => 0b0001,
            Self::Lsl => 0b0010,
            Self::Lsr => 0b0011,
            Self::Tst => 0b1000,
            Self::Cmp => 0b1010,
            Self::Orr => 0b1100,
            Self::Mul => 0b1101,
            Self::Mvn => 0b1111,
        }
    }
}

/// Load and store forms sharing the register and immediate offset groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStoreOp {
    Str,
    Strh,
    Strb,
    Ldr,
    Ldrh,
    Ldrb,
}

impl LoadStoreOp {
    /// Transfer size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Str | Self::Ldr => 4,
            Self::Strh | Self::Ldrh => 2,
            Self::Strb | Self::Ldrb => 1,
        }
    }

    /// Returns `true` for loads.
    #[must_use]
    pub const fn is_load(self) -> bool {
        matches!(self, Self::Ldr | Self::Ldrh | Self::Ldrb)
    }
}

/// Special registers reachable through `MRS`/`MSR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpecialRegister {
    Msp = 8,
    Psp = 9,
    Primask = 16,
    Control = 20,
}

impl SpecialRegister {
    /// Decodes an 8-bit `SYSm` field.
    #[must_use]
    pub const fn from_sysm(sysm: u16) -> Option<Self> {
        match sysm & 0xFF {
            8 => Some(Self::Msp),
            9 => Some(Self::Psp),
            16 => Some(Self::Primask),
            20 => Some(Self::Control),
            _ => None,
        }
    }

    /// `SYSm` encoding.
    #[must_use]
    pub const fn sysm(self) -> u16 {
        self as u16
    }
}

type Reg = GeneralRegister;

/// A decoded native instruction. Offsets and immediates are already scaled
/// to bytes; branch offsets are relative to the instruction address + 4 and
/// `ADR` offsets to that address rounded down to a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    ShiftImm { op: ShiftOp, rd: Reg, rm: Reg, imm5: u8 },
    AddReg { rd: Reg, rn: Reg, rm: Reg },
    SubReg { rd: Reg, rn: Reg, rm: Reg },
    AddImm3 { rd: Reg, rn: Reg, imm3: u8 },
    SubImm3 { rd: Reg, rn: Reg, imm3: u8 },
    MovImm { rd: Reg, imm8: u8 },
    CmpImm { rn: Reg, imm8: u8 },
    AddImm8 { rdn: Reg, imm8: u8 },
    SubImm8 { rdn: Reg, imm8: u8 },
    DataProc { op: DataOp, rdn: Reg, rm: Reg },
    AddHigh { rdn: Reg, rm: Reg },
    CmpHigh { rn: Reg, rm: Reg },
    MovHigh { rd: Reg, rm: Reg },
    Bx { rm: Reg },
    Blx { rm: Reg },
    LdrLiteral { rt: Reg, offset: u16 },
    LoadStoreReg { op: LoadStoreOp, rt: Reg, rn: Reg, rm: Reg },
    LoadStoreImm { op: LoadStoreOp, rt: Reg, rn: Reg, offset: u8 },
    LdrSp { rt: Reg, offset: u16 },
    StrSp { rt: Reg, offset: u16 },
    AddSpImm { rd: Reg, offset: u16 },
    Adr { rd: Reg, offset: u16 },
    AdrWide { rd: Reg, offset: i16 },
    AdjustSp { delta: i16 },
    CompareBranch { rn: Reg, offset: u8, nonzero: bool },
    Push { registers: u8, lr: bool },
    Pop { registers: u8, pc: bool },
    Nop,
    /// `IT`: `firstcond` guards the next instruction, `mask` encodes the
    /// then/else pattern of up to three more and the block length.
    It { firstcond: Condition, mask: u8 },
    Bkpt { imm8: u8 },
    Udf { imm8: u8 },
    Svc { imm8: u8 },
    BranchCond { cond: Condition, offset: i32 },
    Branch { offset: i32 },
    Bl { offset: i32 },
    Movw { rd: Reg, imm16: u16 },
    Movt { rd: Reg, imm16: u16 },
    Mrs { rd: Reg, sysm: SpecialRegister },
    Msr { rn: Reg, sysm: SpecialRegister },
    Udiv { rd: Reg, rn: Reg, rm: Reg },
    /// Table branch: `PC = PC + 4 + 2 * byte[rn + rm]`.
    Tbb { rn: Reg, rm: Reg },
}

impl Instruction {
    /// Encoded size in bytes.
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::Bl { .. }
            | Self::Movw { .. }
            | Self::Movt { .. }
            | Self::Mrs { .. }
            | Self::Msr { .. }
            | Self::Udiv { .. }
            | Self::AdrWide { .. }
            | Self::Tbb { .. } => 4,
            _ => 2,
        }
    }
}

/// Result of decoding one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedOrFault {
    /// Successfully decoded instruction.
    Instruction(Instruction),
    /// Decoding failed with a fault.
    Fault(FaultCode),
}

impl DecodedOrFault {
    /// Returns the decoded instruction if present.
    #[must_use]
    pub const fn instruction(self) -> Option<Instruction> {
        match self {
            Self::Instruction(i) => Some(i),
            Self::Fault(_) => None,
        }
    }

    /// Returns the fault if decoding failed.
    #[must_use]
    pub const fn fault(self) -> Option<FaultCode> {
        match self {
            Self::Instruction(_) => None,
            Self::Fault(f) => Some(f),
        }
    }
}

impl From<DecodedOrFault> for Result<Instruction, FaultCode> {
    fn from(value: DecodedOrFault) -> Self {
        match value {
            DecodedOrFault::Instruction(i) => Ok(i),
            DecodedOrFault::Fault(code) => Err(code),
        }
    }
}

const UNDEFINED: DecodedOrFault = DecodedOrFault::Fault(FaultCode::UndefinedInstruction);

const fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

const fn low(hw: u16, shift: u16) -> Reg {
    Reg::from_u3(hw >> shift)
}

const fn is_sp_or_pc(reg: Reg) -> bool {
    matches!(reg, Reg::Sp | Reg::Pc)
}

/// Native instruction decoder.
pub struct Decoder;

impl Decoder {
    /// Returns `true` when `hw1` is the first halfword of a 32-bit encoding.
    #[must_use]
    pub const fn is_wide(hw1: u16) -> bool {
        matches!(hw1 >> 11, 0b11101..=0b11111)
    }

    /// Decodes one instruction. `hw2` is only consulted for 32-bit encodings.
    #[must_use]
    pub const fn decode(hw1: u16, hw2: u16) -> DecodedOrFault {
        if Self::is_wide(hw1) {
            Self::decode_wide(hw1, hw2)
        } else {
            Self::decode_narrow(hw1)
        }
    }

    const fn decode_narrow(hw: u16) -> DecodedOrFault {
        let instruction = match hw >> 11 {
            0b00000 => Instruction::ShiftImm {
                op: ShiftOp::Lsl,
                rd: low(hw, 0),
                rm: low(hw, 3),
                imm5: ((hw >> 6) & 0x1F) as u8,
            },
            0b00001 => Instruction::ShiftImm {
                op: ShiftOp::Lsr,
                rd: low(hw, 0),
                rm: low(hw, 3),
                imm5: ((hw >> 6) & 0x1F) as u8,
            },
            0b00011 => {
                let rd = low(hw, 0);
                let rn = low(hw, 3);
                let field = (hw >> 6) & 0x7;
                match (hw >> 9) & 0x3 {
                    0b00 => Instruction::AddReg {
                        rd,
                        rn,
                        rm: Reg::from_u3(field),
                    },
                    0b01 => Instruction::SubReg {
                        rd,
                        rn,
                        rm: Reg::from_u3(field),
                    },
                    0b10 => Instruction::AddImm3 {
                        rd,
                        rn,
                        imm3: field as u8,
                    },
                    _ => Instruction::SubImm3 {
                        rd,
                        rn,
                        imm3: field as u8,
                    },
                }
            }
            0b00100 => Instruction::MovImm {
                rd: low(hw, 8),
                imm8: hw as u8,
            },
            0b00101 => Instruction::CmpImm {
                rn: low(hw, 8),
                imm8: hw as u8,
            },
            0b00110 => Instruction::AddImm8 {
                rdn: low(hw, 8),
                imm8: hw as u8,
            },
            0b00111 => Instruction::SubImm8 {
                rdn: low(hw, 8),
                imm8: hw as u8,
            },
            0b01000 => return Self::decode_data_or_special(hw),
            0b01001 => Instruction::LdrLiteral {
                rt: low(hw, 8),
                offset: (hw & 0xFF) << 2,
            },
            0b01010 | 0b01011 => {
                let op = match (hw >> 9) & 0x7 {
                    0b000 => LoadStoreOp::Str,
                    0b001 => LoadStoreOp::Strh,
                    0b010 => LoadStoreOp::Strb,
                    0b100 => LoadStoreOp::Ldr,
                    0b101 => LoadStoreOp::Ldrh,
                    0b110 => LoadStoreOp::Ldrb,
                    _ => return UNDEFINED,
                };
                Instruction::LoadStoreReg {
                    op,
                    rt: low(hw, 0),
                    rn: low(hw, 3),
                    rm: low(hw, 6),
                }
            }
            0b01100 => Self::load_store_imm(LoadStoreOp::Str, hw),
            0b01101 => Self::load_store_imm(LoadStoreOp::Ldr, hw),
            0b01110 => Self::load_store_imm(LoadStoreOp::Strb, hw),
            0b01111 => Self::load_store_imm(LoadStoreOp::Ldrb, hw),
            0b10000 => Self::load_store_imm(LoadStoreOp::Strh, hw),
            0b10001 => Self::load_store_imm(LoadStoreOp::Ldrh, hw),
            0b10010 => Instruction::StrSp {
                rt: low(hw, 8),
                offset: (hw & 0xFF) << 2,
            },
            0b10011 => Instruction::LdrSp {
                rt: low(hw, 8),
                offset: (hw & 0xFF) << 2,
            },
            0b10100 => Instruction::Adr {
                rd: low(hw, 8),
                offset: (hw & 0xFF) << 2,
            },
            0b10101 => Instruction::AddSpImm {
                rd: low(hw, 8),
                offset: (hw & 0xFF) << 2,
            },
            0b10110 | 0b10111 => return Self::decode_misc(hw),
            0b11010 | 0b11011 => {
                let imm8 = hw as u8;
                match (hw >> 8) & 0xF {
                    0b1110 => Instruction::Udf { imm8 },
                    0b1111 => Instruction::Svc { imm8 },
                    bits => match Condition::from_u4(bits) {
                        Some(cond) => Instruction::BranchCond {
                            cond,
                            offset: sign_extend(((hw & 0xFF) as u32) << 1, 9),
                        },
                        None => return UNDEFINED,
                    },
                }
            }
            0b11100 => Instruction::Branch {
                offset: sign_extend(((hw & 0x7FF) as u32) << 1, 12),
            },
            _ => return UNDEFINED,
        };
        DecodedOrFault::Instruction(instruction)
    }

    const fn load_store_imm(op: LoadStoreOp, hw: u16) -> Instruction {
        Instruction::LoadStoreImm {
            op,
            rt: low(hw, 0),
            rn: low(hw, 3),
            offset: (((hw >> 6) & 0x1F) as u32 * op.bytes()) as u8,
        }
    }

    const fn decode_data_or_special(hw: u16) -> DecodedOrFault {
        if hw & 0xFC00 == 0x4000 {
            return match DataOp::from_u4(hw >> 6) {
                Some(op) => DecodedOrFault::Instruction(Instruction::DataProc {
                    op,
                    rdn: low(hw, 0),
                    rm: low(hw, 3),
                }),
                None => UNDEFINED,
            };
        }
        let rdn = Reg::from_u4(((hw >> 4) & 0x8) | (hw & 0x7));
        let rm = Reg::from_u4(hw >> 3);
        let instruction = match (hw >> 8) & 0x3 {
            0b00 => Instruction::AddHigh { rdn, rm },
            0b01 if rdn.is_low() && rm.is_low() => return UNDEFINED,
            0b01 if matches!(rdn, Reg::Pc) || matches!(rm, Reg::Pc) => return UNDEFINED,
            0b01 => Instruction::CmpHigh { rn: rdn, rm },
            0b10 => Instruction::MovHigh { rd: rdn, rm },
            0b11 if hw & 0x7 != 0 => return UNDEFINED,
            0b11 if hw & 0x80 == 0 => Instruction::Bx { rm },
            0b11 if matches!(rm, Reg::Pc) => return UNDEFINED,
            0b11 => Instruction::Blx { rm },
            _ => return UNDEFINED,
        };
        DecodedOrFault::Instruction(instruction)
    }

    const fn decode_misc(hw: u16) -> DecodedOrFault {
        let instruction = if hw & 0xFF00 == 0xB000 {
            let delta = ((hw & 0x7F) << 2) as i16;
            Instruction::AdjustSp {
                delta: if hw & 0x80 == 0 { delta } else { -delta },
            }
        } else if hw & 0xF500 == 0xB100 {
            Instruction::CompareBranch {
                rn: low(hw, 0),
                offset: ((((hw >> 9) & 0x1) << 6) | (((hw >> 3) & 0x1F) << 1)) as u8,
                nonzero: hw & 0x0800 != 0,
            }
        } else if hw & 0xFE00 == 0xB400 {
            if hw & 0x1FF == 0 {
                return UNDEFINED;
            }
            Instruction::Push {
                registers: hw as u8,
                lr: hw & 0x100 != 0,
            }
        } else if hw & 0xFE00 == 0xBC00 {
            if hw & 0x1FF == 0 {
                return UNDEFINED;
            }
            Instruction::Pop {
                registers: hw as u8,
                pc: hw & 0x100 != 0,
            }
        } else if hw & 0xFF00 == 0xBE00 {
            Instruction::Bkpt { imm8: hw as u8 }
        } else if hw & 0xFF00 == 0xBF00 && hw & 0xF != 0 {
            match Condition::from_u4(hw >> 4) {
                Some(firstcond) => Instruction::It {
                    firstcond,
                    mask: (hw & 0xF) as u8,
                },
                None => return UNDEFINED,
            }
        } else if hw == 0xBF00 {
            Instruction::Nop
        } else {
            return UNDEFINED;
        };
        DecodedOrFault::Instruction(instruction)
    }

    const fn decode_wide(hw1: u16, hw2: u16) -> DecodedOrFault {
        let instruction = if hw1 & 0xF800 == 0xF000 && hw2 & 0xD000 == 0xD000 {
            let s = ((hw1 >> 10) & 0x1) as u32;
            let j1 = ((hw2 >> 13) & 0x1) as u32;
            let j2 = ((hw2 >> 11) & 0x1) as u32;
            let i1 = !(j1 ^ s) & 0x1;
            let i2 = !(j2 ^ s) & 0x1;
            let imm10 = (hw1 & 0x3FF) as u32;
            let imm11 = (hw2 & 0x7FF) as u32;
            let raw = (s << 24) | (i1 << 23) | (i2 << 22) | (imm10 << 12) | (imm11 << 1);
            Instruction::Bl {
                offset: sign_extend(raw, 25),
            }
        } else if hw1 & 0xFB70 == 0xF240 && hw2 & 0x8000 == 0 {
            let rd = Reg::from_u4(hw2 >> 8);
            if is_sp_or_pc(rd) {
                return UNDEFINED;
            }
            let imm16 = ((hw1 & 0xF) << 12)
                | (((hw1 >> 10) & 0x1) << 11)
                | (((hw2 >> 12) & 0x7) << 8)
                | (hw2 & 0xFF);
            if hw1 & 0x0080 == 0 {
                Instruction::Movw { rd, imm16 }
            } else {
                Instruction::Movt { rd, imm16 }
            }
        } else if (hw1 & 0xFBFF == 0xF2AF || hw1 & 0xFBFF == 0xF20F) && hw2 & 0x8000 == 0 {
            let rd = Reg::from_u4(hw2 >> 8);
            if is_sp_or_pc(rd) {
                return UNDEFINED;
            }
            let imm12 = ((((hw1 >> 10) & 0x1) << 11) | (((hw2 >> 12) & 0x7) << 8) | (hw2 & 0xFF))
                as i16;
            Instruction::AdrWide {
                rd,
                offset: if hw1 & 0x00A0 == 0 { imm12 } else { -imm12 },
            }
        } else if hw1 & 0xFFF0 == 0xE8D0 && hw2 & 0xFFF0 == 0xF000 {
            let rn = Reg::from_u4(hw1);
            let rm = Reg::from_u4(hw2);
            if matches!(rn, Reg::Sp) || is_sp_or_pc(rm) {
                return UNDEFINED;
            }
            Instruction::Tbb { rn, rm }
        } else if hw1 == 0xF3EF && hw2 & 0xF000 == 0x8000 {
            let rd = Reg::from_u4(hw2 >> 8);
            match SpecialRegister::from_sysm(hw2) {
                Some(sysm) if !is_sp_or_pc(rd) => Instruction::Mrs { rd, sysm },
                _ => return UNDEFINED,
            }
        } else if hw1 & 0xFFF0 == 0xF380 && hw2 & 0xFF00 == 0x8800 {
            let rn = Reg::from_u4(hw1);
            match SpecialRegister::from_sysm(hw2) {
                Some(sysm) if !is_sp_or_pc(rn) => Instruction::Msr { rn, sysm },
                _ => return UNDEFINED,
            }
        } else if hw1 & 0xFFF0 == 0xFBB0 && hw2 & 0xF0F0 == 0xF0F0 {
            let rd = Reg::from_u4(hw2 >> 8);
            let rn = Reg::from_u4(hw1);
            let rm = Reg::from_u4(hw2);
            if is_sp_or_pc(rd) || is_sp_or_pc(rn) || is_sp_or_pc(rm) {
                return UNDEFINED;
            }
            Instruction::Udiv { rd, rn, rm }
        } else {
            return UNDEFINED;
        };
        DecodedOrFault::Instruction(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn decode16(hw: u16) -> Result<Instruction, FaultCode> {
        Decoder::decode(hw, 0).into()
    }

    #[rstest]
    #[case(0x2007, Instruction::MovImm { rd: Reg::R0, imm8: 7 })]
    #[case(0x1888, Instruction::AddReg { rd: Reg::R0, rn: Reg::R1, rm: Reg::R2 })]
    #[case(0x1e4b, Instruction::SubImm3 { rd: Reg::R3, rn: Reg::R1, imm3: 1 })]
    #[case(0x0089, Instruction::ShiftImm { op: ShiftOp::Lsl, rd: Reg::R1, rm: Reg::R1, imm5: 2 })]
    #[case(0x4348, Instruction::DataProc { op: DataOp::Mul, rdn: Reg::R0, rm: Reg::R1 })]
    #[case(0x4770, Instruction::Bx { rm: Reg::Lr })]
    #[case(0x4788, Instruction::Blx { rm: Reg::R1 })]
    #[case(0x46ec, Instruction::MovHigh { rd: Reg::R12, rm: Reg::Sp })]
    #[case(0x4801, Instruction::LdrLiteral { rt: Reg::R0, offset: 4 })]
    #[case(0x6848, Instruction::LoadStoreImm { op: LoadStoreOp::Ldr, rt: Reg::R0, rn: Reg::R1, offset: 4 })]
    #[case(0x8048, Instruction::LoadStoreImm { op: LoadStoreOp::Strh, rt: Reg::R0, rn: Reg::R1, offset: 2 })]
    #[case(0x5c88, Instruction::LoadStoreReg { op: LoadStoreOp::Ldrb, rt: Reg::R0, rn: Reg::R1, rm: Reg::R2 })]
    #[case(0x9001, Instruction::StrSp { rt: Reg::R0, offset: 4 })]
    #[case(0xb082, Instruction::AdjustSp { delta: -8 })]
    #[case(0xb510, Instruction::Push { registers: 0x10, lr: true })]
    #[case(0xbd10, Instruction::Pop { registers: 0x10, pc: true })]
    #[case(0xb118, Instruction::CompareBranch { rn: Reg::R0, offset: 6, nonzero: false })]
    #[case(0xbf00, Instruction::Nop)]
    #[case(0xbe01, Instruction::Bkpt { imm8: 1 })]
    #[case(0xdf05, Instruction::Svc { imm8: 5 })]
    #[case(0xd0fe, Instruction::BranchCond { cond: Condition::Eq, offset: -4 })]
    #[case(0xe7fe, Instruction::Branch { offset: -4 })]
    #[case(0x45c8, Instruction::CmpHigh { rn: Reg::R8, rm: Reg::R9 })]
    #[case(0x4560, Instruction::CmpHigh { rn: Reg::R0, rm: Reg::R12 })]
    #[case(0xa103, Instruction::Adr { rd: Reg::R1, offset: 12 })]
    #[case(0xbf18, Instruction::It { firstcond: Condition::Ne, mask: 0b1000 })]
    #[case(0xbf0c, Instruction::It { firstcond: Condition::Eq, mask: 0b1100 })]
    #[case(0xbfb6, Instruction::It { firstcond: Condition::Lt, mask: 0b0110 })]
    fn narrow_encodings_decode(#[case] hw: u16, #[case] expected: Instruction) {
        assert_eq!(decode16(hw), Ok(expected));
        assert_eq!(expected.size(), 2);
    }

    #[rstest]
    #[case(0xf000, 0xf802, Instruction::Bl { offset: 4 })]
    #[case(0xf7ff, 0xfffe, Instruction::Bl { offset: -4 })]
    #[case(0xf241, 0x2034, Instruction::Movw { rd: Reg::R0, imm16: 0x1234 })]
    #[case(0xf2c2, 0x0107, Instruction::Movt { rd: Reg::R1, imm16: 0x2007 })]
    #[case(0xf3ef, 0x8014, Instruction::Mrs { rd: Reg::R0, sysm: SpecialRegister::Control })]
    #[case(0xf380, 0x8809, Instruction::Msr { rn: Reg::R0, sysm: SpecialRegister::Psp })]
    #[case(0xfbb1, 0xf0f2, Instruction::Udiv { rd: Reg::R0, rn: Reg::R1, rm: Reg::R2 })]
    #[case(0xf2af, 0x010f, Instruction::AdrWide { rd: Reg::R1, offset: -15 })]
    #[case(0xf6af, 0x72ff, Instruction::AdrWide { rd: Reg::R2, offset: -4095 })]
    #[case(0xf20f, 0x0408, Instruction::AdrWide { rd: Reg::R4, offset: 8 })]
    #[case(0xe8df, 0xf003, Instruction::Tbb { rn: Reg::Pc, rm: Reg::R3 })]
    fn wide_encodings_decode(#[case] hw1: u16, #[case] hw2: u16, #[case] expected: Instruction) {
        assert!(Decoder::is_wide(hw1));
        assert_eq!(Decoder::decode(hw1, hw2).instruction(), Some(expected));
        assert_eq!(expected.size(), 4);
    }

    #[rstest]
    #[case(0x1000)] // ASR imm
    #[case(0x4100)] // ASR register
    #[case(0x4500)] // CMP with two low registers
    #[case(0x45f0)] // CMP with PC
    #[case(0xbfe8)] // IT AL
    #[case(0xbff8)] // IT with the never condition
    #[case(0x4771)] // BX with nonzero low bits
    #[case(0x5e00)] // LDRSH
    #[case(0xb400)] // PUSH {}
    #[case(0xbf10)] // YIELD
    #[case(0xc000)] // STM
    fn unsupported_narrow_encodings_are_undefined(#[case] hw: u16) {
        assert_eq!(decode16(hw), Err(FaultCode::UndefinedInstruction));
    }

    #[rstest]
    #[case(0xf3ef, 0x8003)] // MRS xPSR
    #[case(0xf24f, 0x0d00)] // MOVW SP
    #[case(0xe92d, 0x4000)] // STMDB
    #[case(0xfbb1, 0xfdf2)] // UDIV SP
    #[case(0xe8df, 0xf00f)] // TBB with PC index
    #[case(0xe8dd, 0xf001)] // TBB with SP base
    #[case(0xe8df, 0xf013)] // TBH
    #[case(0xf2af, 0x0d00)] // ADR to SP
    fn unsupported_wide_encodings_are_undefined(#[case] hw1: u16, #[case] hw2: u16) {
        assert_eq!(
            Decoder::decode(hw1, hw2).fault(),
            Some(FaultCode::UndefinedInstruction)
        );
    }

    #[test]
    fn udf_is_decoded_as_its_own_instruction() {
        assert_eq!(decode16(0xde00), Ok(Instruction::Udf { imm8: 0 }));
    }

    #[test]
    fn conditions_follow_flag_semantics() {
        assert!(Condition::Hi.holds(false, false, true, false));
        assert!(!Condition::Hi.holds(false, true, true, false));
        assert!(Condition::Lt.holds(true, false, false, false));
        assert!(Condition::Ge.holds(true, false, false, true));
        assert!(Condition::Le.holds(false, true, false, false));
    }

    #[test]
    fn exhaustive_narrow_decode_never_panics() {
        for hw in 0..=u16::MAX {
            if !Decoder::is_wide(hw) {
                let _ = Decoder::decode(hw, 0);
            }
        }
    }
}
