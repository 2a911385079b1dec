//! Structured error reporting shared by every assembler front end.
//!
//! Errors format in the usual compiler style:
//! ```text
//! 3: error: undefined label 'loop'
//! ```
//! where the leading number is a 1-indexed source line for the text
//! assembler and is omitted for the builder-style assemblers.

use std::fmt;

/// An assembler error with optional source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmError {
    /// The kind of error.
    pub kind: AsmErrorKind,
    /// 1-indexed source line, when the input was text.
    pub line: Option<usize>,
}

impl AsmError {
    /// Creates an error with no location.
    #[must_use]
    pub const fn new(kind: AsmErrorKind) -> Self {
        Self { kind, line: None }
    }

    /// Attaches a source line.
    #[must_use]
    pub const fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl From<AsmErrorKind> for AsmError {
    fn from(kind: AsmErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{line}: error: {}", self.kind),
            None => write!(f, "error: {}", self.kind),
        }
    }
}

impl std::error::Error for AsmError {}

/// Classification of assembler errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    /// Mnemonic not part of the target instruction set.
    UnknownMnemonic {
        /// The offending mnemonic.
        mnemonic: String,
    },
    /// Operand missing, superfluous or malformed.
    InvalidOperand {
        /// What was wrong.
        detail: String,
    },
    /// Label defined twice.
    DuplicateLabel {
        /// The label name.
        name: String,
    },
    /// Label referenced but never defined.
    UndefinedLabel {
        /// The label name.
        name: String,
    },
    /// Parameter or local name not declared in the current function.
    UnknownName {
        /// The name.
        name: String,
    },
    /// Frame-relative instruction used outside a function.
    OutsideFunction,
    /// A value does not fit the field that encodes it.
    OutOfRange {
        /// Field or operand being encoded.
        field: &'static str,
        /// The value that did not fit.
        value: i64,
    },
    /// A value violates the field's alignment.
    Misaligned {
        /// Field or operand being encoded.
        field: &'static str,
        /// The misaligned value.
        value: i64,
    },
    /// Register not encodable in this form.
    InvalidRegister {
        /// Field or operand being encoded.
        field: &'static str,
    },
    /// Program does not fit the target memory.
    ProgramTooLarge {
        /// Bytes produced.
        size: usize,
        /// Bytes available.
        limit: usize,
    },
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMnemonic { mnemonic } => write!(f, "unknown mnemonic '{mnemonic}'"),
            Self::InvalidOperand { detail } => write!(f, "invalid operand: {detail}"),
            Self::DuplicateLabel { name } => write!(f, "duplicate label '{name}'"),
            Self::UndefinedLabel { name } => write!(f, "undefined label '{name}'"),
            Self::UnknownName { name } => write!(f, "unknown parameter or local '{name}'"),
            Self::OutsideFunction => write!(f, "frame access outside of a function"),
            Self::OutOfRange { field, value } => {
                write!(f, "{field} out of range: {value}")
            }
            Self::Misaligned { field, value } => {
                write!(f, "{field} misaligned: {value:#x}")
            }
            Self::InvalidRegister { field } => write!(f, "register not encodable as {field}"),
            Self::ProgramTooLarge { size, limit } => {
                write!(f, "program is {size} bytes, limit is {limit}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AsmError, AsmErrorKind};

    #[test]
    fn display_includes_line_when_known() {
        let error = AsmError::new(AsmErrorKind::UndefinedLabel {
            name: "loop".to_string(),
        });
        assert_eq!(error.to_string(), "error: undefined label 'loop'");
        assert_eq!(
            error.at_line(3).to_string(),
            "3: error: undefined label 'loop'"
        );
    }

    #[test]
    fn range_errors_name_the_field() {
        let error = AsmError::from(AsmErrorKind::OutOfRange {
            field: "imm8",
            value: 300,
        });
        assert_eq!(error.to_string(), "error: imm8 out of range: 300");
    }
}
