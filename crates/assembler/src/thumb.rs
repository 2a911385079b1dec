//! Encoder for the native instruction subset.
//!
//! [`encode`] is the inverse of the core's decoder: every instruction it
//! accepts decodes back to the same [`Instruction`]. Immediates and offsets
//! use the decoder's byte-scaled convention and are range checked here.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use m3_emulator_core::decoder::{Condition, Instruction, LoadStoreOp, ShiftOp};
use m3_emulator_core::GeneralRegister;

use crate::errors::{AsmError, AsmErrorKind};

/// Machine encoding of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    /// 16-bit encoding.
    Narrow(u16),
    /// 32-bit encoding, first halfword first.
    Wide(u16, u16),
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Narrow(_) => 2,
            Self::Wide(..) => 4,
        }
    }

    /// Little-endian bytes in memory order.
    #[must_use]
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::Narrow(hw) => hw.to_le_bytes().to_vec(),
            Self::Wide(hw1, hw2) => [hw1.to_le_bytes(), hw2.to_le_bytes()].concat(),
        }
    }
}

type Reg = GeneralRegister;

const fn reg4(reg: Reg) -> u16 {
    reg.index() as u16
}

fn low(reg: Reg, field: &'static str) -> Result<u16, AsmError> {
    if reg.is_low() {
        Ok(reg4(reg))
    } else {
        Err(AsmErrorKind::InvalidRegister { field }.into())
    }
}

fn not_sp_or_pc(reg: Reg, field: &'static str) -> Result<u16, AsmError> {
    if matches!(reg, Reg::Sp | Reg::Pc) {
        Err(AsmErrorKind::InvalidRegister { field }.into())
    } else {
        Ok(reg4(reg))
    }
}

/// Checks `value` is a multiple of `scale` in `0..=max` and returns `value / scale`.
fn scaled(field: &'static str, value: i64, scale: i64, max: i64) -> Result<u16, AsmError> {
    if value % scale != 0 {
        return Err(AsmErrorKind::Misaligned { field, value }.into());
    }
    if !(0..=max).contains(&value) {
        return Err(AsmErrorKind::OutOfRange { field, value }.into());
    }
    Ok((value / scale) as u16)
}

/// Checks a signed, halfword-aligned branch offset fits `bits` bits.
fn branch_offset(field: &'static str, offset: i32, bits: u32) -> Result<u32, AsmError> {
    let value = i64::from(offset);
    if value % 2 != 0 {
        return Err(AsmErrorKind::Misaligned { field, value }.into());
    }
    let limit = 1_i64 << (bits - 1);
    if !(-limit..limit).contains(&value) {
        return Err(AsmErrorKind::OutOfRange { field, value }.into());
    }
    Ok(offset as u32 & ((1 << bits) - 1))
}

const fn condition_bits(cond: Condition) -> u16 {
    cond as u16
}

const fn load_store_reg_opcode(op: LoadStoreOp) -> u16 {
    match op {
        LoadStoreOp::Str => 0b000,
        LoadStoreOp::Strh => 0b001,
        LoadStoreOp::Strb => 0b010,
        LoadStoreOp::Ldr => 0b100,
        LoadStoreOp::Ldrh => 0b101,
        LoadStoreOp::Ldrb => 0b110,
    }
}

const fn load_store_imm_base(op: LoadStoreOp) -> u16 {
    match op {
        LoadStoreOp::Str => 0x6000,
        LoadStoreOp::Ldr => 0x6800,
        LoadStoreOp::Strb => 0x7000,
        LoadStoreOp::Ldrb => 0x7800,
        LoadStoreOp::Strh => 0x8000,
        LoadStoreOp::Ldrh => 0x8800,
    }
}

/// Encodes `instruction`.
///
/// # Errors
///
/// Returns an error when a register, immediate or offset cannot be
/// represented by the instruction's encoding.
#[allow(clippy::too_many_lines)]
pub fn encode(instruction: Instruction) -> Result<Encoded, AsmError> {
    use Instruction as I;
    let narrow = match instruction {
        I::ShiftImm { op, rd, rm, imm5 } => {
            let base = match op {
                ShiftOp::Lsl => 0x0000,
                ShiftOp::Lsr => 0x0800,
            };
            let imm5 = scaled("imm5", i64::from(imm5), 1, 31)?;
            base | (imm5 << 6) | (low(rm, "rm")? << 3) | low(rd, "rd")?
        }
        I::AddReg { rd, rn, rm } => three_low(0x1800, rd, rn, rm)?,
        I::SubReg { rd, rn, rm } => three_low(0x1A00, rd, rn, rm)?,
        I::AddImm3 { rd, rn, imm3 } => imm3_form(0x1C00, rd, rn, imm3)?,
        I::SubImm3 { rd, rn, imm3 } => imm3_form(0x1E00, rd, rn, imm3)?,
        I::MovImm { rd, imm8 } => 0x2000 | (low(rd, "rd")? << 8) | u16::from(imm8),
        I::CmpImm { rn, imm8 } => 0x2800 | (low(rn, "rn")? << 8) | u16::from(imm8),
        I::AddImm8 { rdn, imm8 } => 0x3000 | (low(rdn, "rdn")? << 8) | u16::from(imm8),
        I::SubImm8 { rdn, imm8 } => 0x3800 | (low(rdn, "rdn")? << 8) | u16::from(imm8),
        I::DataProc { op, rdn, rm } => {
            0x4000 | (op.bits() << 6) | (low(rm, "rm")? << 3) | low(rdn, "rdn")?
        }
        I::AddHigh { rdn, rm } => high_form(0x4400, rdn, rm),
        I::CmpHigh { rn, rm } => {
            if (rn.is_low() && rm.is_low()) || rn == Reg::Pc || rm == Reg::Pc {
                return Err(AsmErrorKind::InvalidRegister { field: "rn" }.into());
            }
            high_form(0x4500, rn, rm)
        }
        I::MovHigh { rd, rm } => high_form(0x4600, rd, rm),
        I::Bx { rm } => 0x4700 | (reg4(rm) << 3),
        I::Blx { rm } => {
            if rm == Reg::Pc {
                return Err(AsmErrorKind::InvalidRegister { field: "rm" }.into());
            }
            0x4780 | (reg4(rm) << 3)
        }
        I::LdrLiteral { rt, offset } => {
            0x4800 | (low(rt, "rt")? << 8) | scaled("literal offset", i64::from(offset), 4, 1020)?
        }
        I::LoadStoreReg { op, rt, rn, rm } => {
            0x5000
                | (load_store_reg_opcode(op) << 9)
                | (low(rm, "rm")? << 6)
                | (low(rn, "rn")? << 3)
                | low(rt, "rt")?
        }
        I::LoadStoreImm { op, rt, rn, offset } => {
            let scale = i64::from(op.bytes());
            let imm5 = scaled("offset", i64::from(offset), scale, 31 * scale)?;
            load_store_imm_base(op) | (imm5 << 6) | (low(rn, "rn")? << 3) | low(rt, "rt")?
        }
        I::Adr { rd, offset } => {
            0xA000 | (low(rd, "rd")? << 8) | scaled("adr offset", i64::from(offset), 4, 1020)?
        }
        I::AdrWide { rd, offset } => return encode_adr_wide(rd, offset),
        I::StrSp { rt, offset } => sp_form(0x9000, rt, offset)?,
        I::LdrSp { rt, offset } => sp_form(0x9800, rt, offset)?,
        I::AddSpImm { rd, offset } => sp_form(0xA800, rd, offset)?,
        I::AdjustSp { delta } => {
            let magnitude = scaled("sp delta", i64::from(delta).abs(), 4, 508)?;
            if delta < 0 {
                0xB080 | magnitude
            } else {
                0xB000 | magnitude
            }
        }
        I::CompareBranch {
            rn,
            offset,
            nonzero,
        } => {
            let half = scaled("cbz offset", i64::from(offset), 2, 126)?;
            let op = if nonzero { 0xB900 } else { 0xB100 };
            op | ((half >> 5) << 9) | ((half & 0x1F) << 3) | low(rn, "rn")?
        }
        I::Push { registers, lr } => list_form(0xB400, registers, lr)?,
        I::Pop { registers, pc } => list_form(0xBC00, registers, pc)?,
        I::Nop => 0xBF00,
        I::It { firstcond, mask } => {
            if !(1..=15).contains(&mask) {
                return Err(AsmErrorKind::InvalidOperand {
                    detail: format!("IT mask {mask:#06b} is empty"),
                }
                .into());
            }
            0xBF00 | (condition_bits(firstcond) << 4) | u16::from(mask)
        }
        I::Bkpt { imm8 } => 0xBE00 | u16::from(imm8),
        I::Udf { imm8 } => 0xDE00 | u16::from(imm8),
        I::Svc { imm8 } => 0xDF00 | u16::from(imm8),
        I::BranchCond { cond, offset } => {
            let field = branch_offset("conditional branch offset", offset, 9)?;
            0xD000 | (condition_bits(cond) << 8) | (field >> 1) as u16
        }
        I::Branch { offset } => {
            let field = branch_offset("branch offset", offset, 12)?;
            0xE000 | (field >> 1) as u16
        }
        I::Bl { offset } => return encode_bl(offset),
        I::Movw { rd, imm16 } => return Ok(encode_mov16(0xF240, rd, imm16)?),
        I::Movt { rd, imm16 } => return Ok(encode_mov16(0xF2C0, rd, imm16)?),
        I::Mrs { rd, sysm } => {
            let rd = not_sp_or_pc(rd, "rd")?;
            return Ok(Encoded::Wide(0xF3EF, 0x8000 | (rd << 8) | sysm.sysm()));
        }
        I::Msr { rn, sysm } => {
            let rn = not_sp_or_pc(rn, "rn")?;
            return Ok(Encoded::Wide(0xF380 | rn, 0x8800 | sysm.sysm()));
        }
        I::Tbb { rn, rm } => {
            if rn == Reg::Sp {
                return Err(AsmErrorKind::InvalidRegister { field: "rn" }.into());
            }
            let rm = not_sp_or_pc(rm, "rm")?;
            return Ok(Encoded::Wide(0xE8D0 | reg4(rn), 0xF000 | rm));
        }
        I::Udiv { rd, rn, rm } => {
            let rd = not_sp_or_pc(rd, "rd")?;
            let rn = not_sp_or_pc(rn, "rn")?;
            let rm = not_sp_or_pc(rm, "rm")?;
            return Ok(Encoded::Wide(0xFBB0 | rn, 0xF0F0 | (rd << 8) | rm));
        }
    };
    Ok(Encoded::Narrow(narrow))
}

fn three_low(base: u16, rd: Reg, rn: Reg, rm: Reg) -> Result<u16, AsmError> {
    Ok(base | (low(rm, "rm")? << 6) | (low(rn, "rn")? << 3) | low(rd, "rd")?)
}

fn imm3_form(base: u16, rd: Reg, rn: Reg, imm3: u8) -> Result<u16, AsmError> {
    let imm3 = scaled("imm3", i64::from(imm3), 1, 7)?;
    Ok(base | (imm3 << 6) | (low(rn, "rn")? << 3) | low(rd, "rd")?)
}

const fn high_form(base: u16, rdn: Reg, rm: Reg) -> u16 {
    let rdn = reg4(rdn);
    base | ((rdn & 0x8) << 4) | (reg4(rm) << 3) | (rdn & 0x7)
}

fn sp_form(base: u16, rt: Reg, offset: u16) -> Result<u16, AsmError> {
    Ok(base | (low(rt, "rt")? << 8) | scaled("sp offset", i64::from(offset), 4, 1020)?)
}

fn list_form(base: u16, registers: u8, extra: bool) -> Result<u16, AsmError> {
    if registers == 0 && !extra {
        return Err(AsmErrorKind::InvalidOperand {
            detail: "empty register list".to_string(),
        }
        .into());
    }
    Ok(base | (u16::from(extra) << 8) | u16::from(registers))
}

fn encode_bl(offset: i32) -> Result<Encoded, AsmError> {
    let raw = branch_offset("bl offset", offset, 25)?;
    let s = (raw >> 24) & 1;
    let i1 = (raw >> 23) & 1;
    let i2 = (raw >> 22) & 1;
    let j1 = !(i1 ^ s) & 1;
    let j2 = !(i2 ^ s) & 1;
    let imm10 = (raw >> 12) & 0x3FF;
    let imm11 = (raw >> 1) & 0x7FF;
    let hw1 = 0xF000 | (s << 10) | imm10;
    let hw2 = 0xD000 | (j1 << 13) | (j2 << 11) | imm11;
    Ok(Encoded::Wide(hw1 as u16, hw2 as u16))
}

fn encode_adr_wide(rd: Reg, offset: i16) -> Result<Encoded, AsmError> {
    let rd = not_sp_or_pc(rd, "rd")?;
    let value = i64::from(offset);
    if value.abs() > 4095 {
        return Err(AsmErrorKind::OutOfRange {
            field: "adr offset",
            value,
        }
        .into());
    }
    let imm12 = value.unsigned_abs() as u16;
    let base = if offset < 0 { 0xF2AF } else { 0xF20F };
    let hw1 = base | (((imm12 >> 11) & 0x1) << 10);
    let hw2 = (((imm12 >> 8) & 0x7) << 12) | (rd << 8) | (imm12 & 0xFF);
    Ok(Encoded::Wide(hw1, hw2))
}

fn encode_mov16(base: u16, rd: Reg, imm16: u16) -> Result<Encoded, AsmError> {
    let rd = not_sp_or_pc(rd, "rd")?;
    let hw1 = base | (((imm16 >> 11) & 0x1) << 10) | (imm16 >> 12);
    let hw2 = (((imm16 >> 8) & 0x7) << 12) | (rd << 8) | (imm16 & 0xFF);
    Ok(Encoded::Wide(hw1, hw2))
}

#[cfg(test)]
mod tests {
    use super::{encode, Encoded};
    use crate::errors::AsmErrorKind;
    use m3_emulator_core::decoder::{
        Condition, DataOp, Decoder, Instruction, LoadStoreOp, ShiftOp, SpecialRegister,
    };
    use m3_emulator_core::GeneralRegister as Reg;

    fn decode(encoded: Encoded) -> Option<Instruction> {
        match encoded {
            Encoded::Narrow(hw) => Decoder::decode(hw, 0).instruction(),
            Encoded::Wide(hw1, hw2) => Decoder::decode(hw1, hw2).instruction(),
        }
    }

    #[test]
    fn encodings_match_known_halfwords() {
        let cases = [
            (Instruction::MovImm { rd: Reg::R0, imm8: 7 }, Encoded::Narrow(0x2007)),
            (Instruction::Bx { rm: Reg::Lr }, Encoded::Narrow(0x4770)),
            (
                Instruction::Push {
                    registers: 0x10,
                    lr: true,
                },
                Encoded::Narrow(0xB510),
            ),
            (
                Instruction::AdjustSp { delta: -8 },
                Encoded::Narrow(0xB082),
            ),
            (
                Instruction::BranchCond {
                    cond: Condition::Eq,
                    offset: -4,
                },
                Encoded::Narrow(0xD0FE),
            ),
            (Instruction::Bl { offset: -4 }, Encoded::Wide(0xF7FF, 0xFFFE)),
            (
                Instruction::It {
                    firstcond: Condition::Eq,
                    mask: 0b1100,
                },
                Encoded::Narrow(0xBF0C),
            ),
            (
                Instruction::CmpHigh {
                    rn: Reg::R8,
                    rm: Reg::R9,
                },
                Encoded::Narrow(0x45C8),
            ),
            (
                Instruction::Tbb {
                    rn: Reg::Pc,
                    rm: Reg::R3,
                },
                Encoded::Wide(0xE8DF, 0xF003),
            ),
            (
                Instruction::AdrWide {
                    rd: Reg::R2,
                    offset: -4095,
                },
                Encoded::Wide(0xF6AF, 0x72FF),
            ),
            (
                Instruction::Movt {
                    rd: Reg::R1,
                    imm16: 0x2007,
                },
                Encoded::Wide(0xF2C2, 0x0107),
            ),
        ];
        for (instruction, expected) in cases {
            assert_eq!(encode(instruction), Ok(expected), "{instruction:?}");
        }
    }

    #[test]
    fn every_form_decodes_back_to_itself() {
        let samples = [
            Instruction::ShiftImm {
                op: ShiftOp::Lsr,
                rd: Reg::R2,
                rm: Reg::R7,
                imm5: 31,
            },
            Instruction::SubImm3 {
                rd: Reg::R3,
                rn: Reg::R1,
                imm3: 7,
            },
            Instruction::DataProc {
                op: DataOp::Mvn,
                rdn: Reg::R5,
                rm: Reg::R6,
            },
            Instruction::AddHigh {
                rdn: Reg::R8,
                rm: Reg::Sp,
            },
            Instruction::LoadStoreImm {
                op: LoadStoreOp::Ldrh,
                rt: Reg::R0,
                rn: Reg::R4,
                offset: 62,
            },
            Instruction::LoadStoreReg {
                op: LoadStoreOp::Strb,
                rt: Reg::R1,
                rn: Reg::R2,
                rm: Reg::R3,
            },
            Instruction::LdrSp {
                rt: Reg::R7,
                offset: 1020,
            },
            Instruction::CompareBranch {
                rn: Reg::R2,
                offset: 126,
                nonzero: true,
            },
            Instruction::Pop {
                registers: 0x81,
                pc: true,
            },
            Instruction::Branch { offset: -2048 },
            Instruction::Bl { offset: 0x00FF_FFFE },
            Instruction::Bl { offset: -0x0100_0000 },
            Instruction::Movw {
                rd: Reg::R12,
                imm16: 0xFFFF,
            },
            Instruction::Msr {
                rn: Reg::R3,
                sysm: SpecialRegister::Control,
            },
            Instruction::Udiv {
                rd: Reg::R0,
                rn: Reg::R1,
                rm: Reg::R2,
            },
            Instruction::It {
                firstcond: Condition::Lt,
                mask: 0b0110,
            },
            Instruction::CmpHigh {
                rn: Reg::R0,
                rm: Reg::R12,
            },
            Instruction::Adr {
                rd: Reg::R1,
                offset: 1020,
            },
            Instruction::AdrWide {
                rd: Reg::R4,
                offset: 8,
            },
            Instruction::AdrWide {
                rd: Reg::R12,
                offset: -15,
            },
            Instruction::Tbb {
                rn: Reg::R5,
                rm: Reg::R6,
            },
        ];
        for instruction in samples {
            let encoded = encode(instruction).expect("encodable");
            assert_eq!(decode(encoded), Some(instruction));
            assert_eq!(encoded.size(), instruction.size() as usize);
        }
    }

    #[test]
    fn out_of_range_offsets_are_rejected() {
        let error = encode(Instruction::Branch { offset: 2048 }).expect_err("too far");
        assert_eq!(
            error.kind,
            AsmErrorKind::OutOfRange {
                field: "branch offset",
                value: 2048
            }
        );
        let error = encode(Instruction::LoadStoreImm {
            op: LoadStoreOp::Ldr,
            rt: Reg::R0,
            rn: Reg::R1,
            offset: 6,
        })
        .expect_err("misaligned");
        assert!(matches!(error.kind, AsmErrorKind::Misaligned { .. }));
    }

    #[test]
    fn high_registers_are_rejected_in_low_fields() {
        let error = encode(Instruction::MovImm {
            rd: Reg::R8,
            imm8: 1,
        })
        .expect_err("high register");
        assert_eq!(error.kind, AsmErrorKind::InvalidRegister { field: "rd" });
        assert!(encode(Instruction::Push {
            registers: 0,
            lr: false
        })
        .is_err());
        assert!(encode(Instruction::CmpHigh {
            rn: Reg::R1,
            rm: Reg::R2
        })
        .is_err());
        assert!(encode(Instruction::Tbb {
            rn: Reg::Pc,
            rm: Reg::Sp
        })
        .is_err());
    }

    #[test]
    fn it_needs_a_terminating_mask_bit() {
        let error = encode(Instruction::It {
            firstcond: Condition::Ne,
            mask: 0,
        })
        .expect_err("empty mask");
        assert!(matches!(error.kind, AsmErrorKind::InvalidOperand { .. }));
    }
}
