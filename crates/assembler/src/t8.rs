//! Text assembler for the T8 toy CPU.
//!
//! ```text
//! # echo pairs of inputs summed
//! loop: in; str tmp
//!       in; add tmp
//!       out
//!       jmp loop
//! tmp:
//! ```
//!
//! Statements are separated by newlines or `;`, `#` starts a comment, and
//! `name:` defines a label at the current address. Address operands are
//! decimal or `0x` numbers, or labels. `.byte n` places a raw byte.
//!
//! The bootloader stops copying at the first zero byte, so any statement
//! that would encode as zero is rejected.

use m3_emulator_core::t8::T8_ROM_START;
use m3_emulator_core::T8Opcode;

use crate::errors::{AsmError, AsmErrorKind};
use crate::symbols::SymbolTable;

/// Largest address a T8 operand can name.
const MAX_ADDRESS: i64 = 31;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Number(i64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Instruction {
        opcode: T8Opcode,
        operand: Option<Operand>,
    },
    Byte(Operand),
}

fn opcode_for(mnemonic: &str) -> Option<T8Opcode> {
    let opcode = match mnemonic {
        "str" => T8Opcode::Str,
        "ldr" => T8Opcode::Ldr,
        "add" => T8Opcode::Add,
        "sub" => T8Opcode::Sub,
        "jmp" => T8Opcode::Jmp,
        "ifz" => T8Opcode::Ifz,
        "ifc" => T8Opcode::Ifc,
        "in" => T8Opcode::In,
        "out" => T8Opcode::Out,
        _ => return None,
    };
    Some(opcode)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_operand(text: &str) -> Result<Operand, AsmErrorKind> {
    let number = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()
    } else if text.starts_with(|c: char| c.is_ascii_digit()) {
        text.parse::<i64>().ok()
    } else if is_identifier(text) {
        return Ok(Operand::Label(text.to_string()));
    } else {
        None
    };
    number.map(Operand::Number).ok_or_else(|| AsmErrorKind::InvalidOperand {
        detail: format!("'{text}' is neither a number nor a label"),
    })
}

fn parse_statement(statement: &str) -> Result<Option<Item>, AsmErrorKind> {
    let mut words = statement.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let operand = words.next();
    if let Some(extra) = words.next() {
        return Err(AsmErrorKind::InvalidOperand {
            detail: format!("unexpected '{extra}'"),
        });
    }
    let mnemonic = head.to_ascii_lowercase();
    if mnemonic == ".byte" {
        let operand = operand.ok_or_else(|| AsmErrorKind::InvalidOperand {
            detail: "'.byte' needs a value".to_string(),
        })?;
        return Ok(Some(Item::Byte(parse_operand(operand)?)));
    }
    let opcode = opcode_for(&mnemonic).ok_or(AsmErrorKind::UnknownMnemonic { mnemonic })?;
    let operand = match (opcode.takes_address(), operand) {
        (true, Some(text)) => Some(parse_operand(text)?),
        (false, None) => None,
        (true, None) => {
            return Err(AsmErrorKind::InvalidOperand {
                detail: format!("'{}' needs an address", head.to_ascii_lowercase()),
            })
        }
        (false, Some(text)) => {
            return Err(AsmErrorKind::InvalidOperand {
                detail: format!("unexpected '{text}'"),
            })
        }
    };
    Ok(Some(Item::Instruction { opcode, operand }))
}

fn resolve(
    operand: &Operand,
    symbols: &SymbolTable,
    field: &'static str,
    max: i64,
) -> Result<u8, AsmError> {
    let value = match operand {
        Operand::Number(value) => *value,
        Operand::Label(name) => i64::from(symbols.resolve(name)?),
    };
    u8::try_from(value)
        .ok()
        .filter(|byte| i64::from(*byte) <= max)
        .ok_or_else(|| AsmErrorKind::OutOfRange { field, value }.into())
}

/// Assembles T8 source into the bytes fed to the bootloader.
///
/// # Errors
///
/// Returns the first error found, tagged with its 1-indexed line, or
/// [`AsmErrorKind::ProgramTooLarge`] when the program would overwrite the
/// bootloader.
pub fn assemble_t8(source: &str) -> Result<Vec<u8>, AsmError> {
    let mut symbols = SymbolTable::new();
    let mut items = Vec::new();
    let mut address = 0_u32;

    for (index, line) in source.lines().enumerate() {
        let number = index + 1;
        let code = line.split('#').next().unwrap_or_default();
        for statement in code.split(';') {
            let mut rest = statement.trim();
            while let Some((name, tail)) = rest.split_once(':') {
                let name = name.trim();
                if !is_identifier(name) {
                    return Err(AsmError::new(AsmErrorKind::InvalidOperand {
                        detail: format!("'{name}' is not a valid label"),
                    })
                    .at_line(number));
                }
                symbols
                    .define(name, address)
                    .map_err(|error| error.at_line(number))?;
                rest = tail.trim();
            }
            let item = parse_statement(rest).map_err(|kind| AsmError::new(kind).at_line(number))?;
            if let Some(item) = item {
                items.push((number, item));
                address += 1;
            }
        }
    }

    let limit = usize::from(T8_ROM_START);
    if items.len() > limit {
        return Err(AsmErrorKind::ProgramTooLarge {
            size: items.len(),
            limit,
        }
        .into());
    }

    items
        .iter()
        .map(|(line, item)| encode_item(item, &symbols).map_err(|error| error.at_line(*line)))
        .collect()
}

fn encode_item(item: &Item, symbols: &SymbolTable) -> Result<u8, AsmError> {
    let byte = match item {
        Item::Instruction { opcode, operand } => {
            let address = match operand {
                Some(operand) => resolve(operand, symbols, "address", MAX_ADDRESS)?,
                None => 0,
            };
            opcode.encode(address)
        }
        Item::Byte(operand) => resolve(operand, symbols, "byte", 0xFF)?,
    };
    if byte == 0 {
        return Err(AsmErrorKind::InvalidOperand {
            detail: "encodes as a zero byte, which ends program loading".to_string(),
        }
        .into());
    }
    Ok(byte)
}

#[cfg(test)]
mod tests {
    use super::assemble_t8;
    use crate::errors::AsmErrorKind;
    use m3_emulator_core::T8Machine;

    const ADDER: &str = "\
# sum consecutive input pairs
start: in
       str tmp
       in
       add tmp
       out
       jmp start
tmp:
";

    #[test]
    fn adder_assembles_and_runs() {
        let program = assemble_t8(ADDER).expect("assemble");
        assert_eq!(program, vec![0xE0, 0x06, 0xE0, 0x46, 0xF0, 0x80]);
        let mut machine = T8Machine::new();
        assert_eq!(machine.emulate(&program, &[7, 13, 17, 19], 2), vec![20, 36]);
    }

    #[test]
    fn semicolons_comments_and_hex_operands() {
        let program = assemble_t8("in; OUT # echo\nJMP 0x0\n.byte 0x2a").expect("assemble");
        assert_eq!(program, vec![0xE0, 0xF0, 0x80, 0x2A]);
    }

    #[test]
    fn errors_carry_their_line() {
        let error = assemble_t8("in\n\njmp nowhere").expect_err("undefined");
        assert_eq!(error.line, Some(3));
        assert_eq!(
            error.kind,
            AsmErrorKind::UndefinedLabel {
                name: "nowhere".to_string()
            }
        );
        assert_eq!(error.to_string(), "3: error: undefined label 'nowhere'");
    }

    #[test]
    fn zero_bytes_are_rejected() {
        let error = assemble_t8("in\nstr 0").expect_err("zero");
        assert_eq!(error.line, Some(2));
        assert!(matches!(error.kind, AsmErrorKind::InvalidOperand { .. }));
    }

    #[test]
    fn operands_are_checked() {
        assert_eq!(
            assemble_t8("ldr 32").expect_err("range").kind,
            AsmErrorKind::OutOfRange {
                field: "address",
                value: 32
            }
        );
        assert!(matches!(
            assemble_t8("out 3").expect_err("operand").kind,
            AsmErrorKind::InvalidOperand { .. }
        ));
        assert!(matches!(
            assemble_t8("jmp").expect_err("missing").kind,
            AsmErrorKind::InvalidOperand { .. }
        ));
        assert_eq!(
            assemble_t8("halt").expect_err("mnemonic").kind,
            AsmErrorKind::UnknownMnemonic {
                mnemonic: "halt".to_string()
            }
        );
    }

    #[test]
    fn programs_must_leave_the_bootloader_alone() {
        let source = "out\n".repeat(26);
        let error = assemble_t8(&source).expect_err("too large");
        assert_eq!(
            error.kind,
            AsmErrorKind::ProgramTooLarge {
                size: 26,
                limit: 25
            }
        );
        assert_eq!(error.line, None);
    }
}
