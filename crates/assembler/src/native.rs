//! Label-resolving assembler for native code.
//!
//! Instructions are appended in order; anything referring to a label leaves a
//! placeholder that [`NativeAssembler::finish`] patches once every label is
//! known. `LDR rt, =value` style loads go through a literal pool which is
//! flushed by [`NativeAssembler::pool`] or, for leftovers, at the end.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use m3_emulator_core::decoder::{Condition, Instruction};
use m3_emulator_core::GeneralRegister;

use crate::errors::{AsmError, AsmErrorKind};
use crate::symbols::SymbolTable;
use crate::thumb::encode;
use crate::Image;

const NOP: [u8; 2] = 0xBF00_u16.to_le_bytes();

#[derive(Debug, Clone)]
enum LiteralValue {
    Constant(u32),
    Address { label: String, thumb: bool },
}

#[derive(Debug, Clone)]
struct Literal {
    value: LiteralValue,
    placed_at: Option<u32>,
}

#[derive(Debug, Clone)]
enum FixupKind {
    Branch {
        label: String,
    },
    BranchCond {
        cond: Condition,
        label: String,
    },
    Bl {
        label: String,
    },
    CompareBranch {
        rn: GeneralRegister,
        nonzero: bool,
        label: String,
    },
    Literal {
        rt: GeneralRegister,
        index: usize,
    },
    Word {
        label: String,
        thumb: bool,
    },
    Adr {
        rd: GeneralRegister,
        label: String,
    },
    TableEntry {
        base: u32,
        label: String,
    },
}

#[derive(Debug, Clone)]
struct Fixup {
    offset: usize,
    kind: FixupKind,
}

/// Builder for a native code image.
#[derive(Debug, Clone)]
pub struct NativeAssembler {
    origin: u32,
    bytes: Vec<u8>,
    symbols: SymbolTable,
    fixups: Vec<Fixup>,
    literals: Vec<Literal>,
}

impl NativeAssembler {
    /// Starts an image loaded at `origin`.
    #[must_use]
    pub fn new(origin: u32) -> Self {
        Self {
            origin,
            bytes: Vec::new(),
            symbols: SymbolTable::new(),
            fixups: Vec::new(),
            literals: Vec::new(),
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

    /// Makes an external address visible to label references.
    ///
    /// # Errors
    ///
    /// Fails if `name` is already defined.
    pub fn import(&mut self, name: &str, address: u32) -> Result<(), AsmError> {
        self.symbols.define(name, address)
    }

    /// Appends a fully specified instruction.
    ///
    /// # Errors
    ///
    /// Fails when the instruction's operands cannot be encoded.
    pub fn emit(&mut self, instruction: Instruction) -> Result<(), AsmError> {
        let encoded = encode(instruction)?;
        self.bytes.extend(encoded.to_bytes());
        Ok(())
    }

    /// `B label`.
    pub fn b(&mut self, label: &str) {
        self.placeholder(
            2,
            FixupKind::Branch {
                label: label.to_string(),
            },
        );
    }

    /// `B<cond> label`.
    pub fn b_cond(&mut self, cond: Condition, label: &str) {
        self.placeholder(
            2,
            FixupKind::BranchCond {
                cond,
                label: label.to_string(),
            },
        );
    }

    /// `BL label`.
    pub fn bl(&mut self, label: &str) {
        self.placeholder(
            4,
            FixupKind::Bl {
                label: label.to_string(),
            },
        );
    }

    /// `CBZ rn, label`; the target must lie ahead.
    pub fn cbz(&mut self, rn: GeneralRegister, label: &str) {
        self.compare_branch(rn, false, label);
    }

    /// `CBNZ rn, label`; the target must lie ahead.
    pub fn cbnz(&mut self, rn: GeneralRegister, label: &str) {
        self.compare_branch(rn, true, label);
    }

    fn compare_branch(&mut self, rn: GeneralRegister, nonzero: bool, label: &str) {
        self.placeholder(
            2,
            FixupKind::CompareBranch {
                rn,
                nonzero,
                label: label.to_string(),
            },
        );
    }

    /// `IT<pattern> first`. `pattern` holds the `t`/`e` letters for the
    /// second to fourth instructions of the block, so `ITE EQ` is
    /// `it(Condition::Eq, "e")`.
    ///
    /// # Errors
    ///
    /// Fails on more than three letters or a letter other than `t` or `e`.
    pub fn it(&mut self, first: Condition, pattern: &str) -> Result<(), AsmError> {
        if pattern.len() > 3 {
            return Err(AsmErrorKind::InvalidOperand {
                detail: format!("IT block `{pattern}` is longer than four instructions"),
            }
            .into());
        }
        let then_bit = (first as u8) & 1;
        let mut mask = 0_u8;
        let mut bit = 3;
        for letter in pattern.chars() {
            let cond_bit = match letter.to_ascii_lowercase() {
                't' => then_bit,
                'e' => then_bit ^ 1,
                other => {
                    return Err(AsmErrorKind::InvalidOperand {
                        detail: format!("IT pattern letter `{other}`"),
                    }
                    .into())
                }
            };
            mask |= cond_bit << bit;
            bit -= 1;
        }
        mask |= 1 << bit;
        self.emit(Instruction::It {
            firstcond: first,
            mask,
        })
    }

    /// `TBB [pc, rm]` and its byte table: index `i` branches to
    /// `targets[i]`. Targets must lie after the table, within 510 bytes.
    ///
    /// # Errors
    ///
    /// Fails when `rm` cannot be an index register.
    pub fn tbb(&mut self, rm: GeneralRegister, targets: &[&str]) -> Result<(), AsmError> {
        self.emit(Instruction::Tbb {
            rn: GeneralRegister::Pc,
            rm,
        })?;
        let base = self.here();
        for label in targets {
            self.placeholder(
                1,
                FixupKind::TableEntry {
                    base,
                    label: (*label).to_string(),
                },
            );
        }
        if self.here() % 2 == 1 {
            self.bytes.push(0);
        }
        Ok(())
    }

    /// `ADR rd, label`, always in the 32-bit form so the label may sit on
    /// either side.
    pub fn adr(&mut self, rd: GeneralRegister, label: &str) {
        self.placeholder(
            4,
            FixupKind::Adr {
                rd,
                label: label.to_string(),
            },
        );
    }

    /// `LDR rt, =value`, loading a 32-bit constant from the literal pool.
    pub fn ldr_const(&mut self, rt: GeneralRegister, value: u32) {
        self.literal_load(rt, LiteralValue::Constant(value));
    }

    /// `LDR rt, =label`, loading a label's address from the literal pool.
    /// With `thumb` set, bit 0 is set so the address can be a native `BLX`
    /// target.
    pub fn ldr_addr(&mut self, rt: GeneralRegister, label: &str, thumb: bool) {
        self.literal_load(
            rt,
            LiteralValue::Address {
                label: label.to_string(),
                thumb,
            },
        );
    }

    fn literal_load(&mut self, rt: GeneralRegister, value: LiteralValue) {
        let index = self.literals.len();
        self.literals.push(Literal {
            value,
            placed_at: None,
        });
        self.placeholder(2, FixupKind::Literal { rt, index });
    }

    /// Places every pending literal here, word aligned.
    pub fn pool(&mut self) {
        if self.literals.iter().all(|literal| literal.placed_at.is_some()) {
            return;
        }
        self.align(4);
        for index in 0..self.literals.len() {
            if self.literals[index].placed_at.is_some() {
                continue;
            }
            let here = self.here();
            self.literals[index].placed_at = Some(here);
            match self.literals[index].value.clone() {
                LiteralValue::Constant(value) => self.word(value),
                LiteralValue::Address { label, thumb } => self.word_label(&label, thumb),
            }
        }
    }

    /// Appends a little-endian data word.
    pub fn word(&mut self, value: u32) {
        self.bytes.extend(value.to_le_bytes());
    }

    /// Appends the address of `label`, with bit 0 set when `thumb` is.
    pub fn word_label(&mut self, label: &str, thumb: bool) {
        self.placeholder(
            4,
            FixupKind::Word {
                label: label.to_string(),
                thumb,
            },
        );
    }

    /// Appends raw bytes.
    pub fn bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Pads to a multiple of `alignment` bytes with `NOP`s (and one zero
    /// byte first if the current address is odd).
    pub fn align(&mut self, alignment: u32) {
        let alignment = alignment.max(1);
        while self.here() % alignment != 0 {
            if self.here() % 2 == 1 {
                self.bytes.push(0);
            } else {
                self.bytes.extend(NOP);
            }
        }
    }

    fn placeholder(&mut self, size: usize, kind: FixupKind) {
        self.fixups.push(Fixup {
            offset: self.bytes.len(),
            kind,
        });
        self.bytes.resize(self.bytes.len() + size, 0);
    }

    /// Flushes pending literals, resolves every label reference and returns
    /// the image.
    ///
    /// # Errors
    ///
    /// Fails on an undefined label or a target out of reach of its encoding.
    pub fn finish(mut self) -> Result<Image, AsmError> {
        self.pool();
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let patch = self.resolve(fixup)?;
            self.bytes[fixup.offset..fixup.offset + patch.len()].copy_from_slice(&patch);
        }
        Ok(Image {
            origin: self.origin,
            bytes: self.bytes,
            symbols: self.symbols,
        })
    }

    fn resolve(&self, fixup: &Fixup) -> Result<Vec<u8>, AsmError> {
        let address = self.origin.wrapping_add(fixup.offset as u32);
        let instruction = match &fixup.kind {
            FixupKind::Branch { label } => Instruction::Branch {
                offset: self.branch_offset(address, label)?,
            },
            FixupKind::BranchCond { cond, label } => Instruction::BranchCond {
                cond: *cond,
                offset: self.branch_offset(address, label)?,
            },
            FixupKind::Bl { label } => Instruction::Bl {
                offset: self.branch_offset(address, label)?,
            },
            FixupKind::CompareBranch { rn, nonzero, label } => {
                let delta = self.branch_offset(address, label)?;
                let offset = u8::try_from(delta).map_err(|_| AsmErrorKind::OutOfRange {
                    field: "cbz offset",
                    value: i64::from(delta),
                })?;
                Instruction::CompareBranch {
                    rn: *rn,
                    offset,
                    nonzero: *nonzero,
                }
            }
            FixupKind::Literal { rt, index } => {
                let placed_at = self
                    .literals
                    .get(*index)
                    .and_then(|literal| literal.placed_at)
                    .ok_or_else(|| AsmErrorKind::InvalidOperand {
                        detail: "literal was never placed".to_string(),
                    })?;
                let base = address.wrapping_add(4) & !3;
                let delta = i64::from(placed_at) - i64::from(base);
                let offset = u16::try_from(delta).map_err(|_| AsmErrorKind::OutOfRange {
                    field: "literal offset",
                    value: delta,
                })?;
                Instruction::LdrLiteral { rt: *rt, offset }
            }
            FixupKind::Word { label, thumb } => {
                let value = self.symbols.resolve(label)? | u32::from(*thumb);
                return Ok(value.to_le_bytes().to_vec());
            }
            FixupKind::Adr { rd, label } => {
                let base = address.wrapping_add(4) & !3;
                let delta = i64::from(self.symbols.resolve(label)?) - i64::from(base);
                let offset = i16::try_from(delta).map_err(|_| AsmErrorKind::OutOfRange {
                    field: "adr offset",
                    value: delta,
                })?;
                Instruction::AdrWide { rd: *rd, offset }
            }
            FixupKind::TableEntry { base, label } => {
                let delta = i64::from(self.symbols.resolve(label)?) - i64::from(*base);
                if delta % 2 != 0 {
                    return Err(AsmErrorKind::Misaligned {
                        field: "table entry",
                        value: delta,
                    }
                    .into());
                }
                let entry = u8::try_from(delta / 2).map_err(|_| AsmErrorKind::OutOfRange {
                    field: "table entry",
                    value: delta,
                })?;
                return Ok(vec![entry]);
            }
        };
        Ok(encode(instruction)?.to_bytes())
    }

    fn branch_offset(&self, address: u32, label: &str) -> Result<i32, AsmError> {
        let target = self.symbols.resolve(label)?;
        Ok(target.wrapping_sub(address.wrapping_add(4)) as i32)
    }
}
