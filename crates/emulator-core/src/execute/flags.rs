//! APSR update behaviors for different instruction classes.

use crate::state::{ArchitecturalState, APSR_C, APSR_N, APSR_V, APSR_Z};

/// Describes how APSR flags change after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change.
    #[default]
    None,
    /// Logical forms without a shifter carry-out.
    Nz {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
    },
    /// Logical and shift forms that produce a carry-out.
    Nzc {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
        /// Carry flag.
        carry: bool,
    },
    /// Arithmetic forms.
    Nzcv {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
        /// Carry flag.
        carry: bool,
        /// Overflow flag.
        overflow: bool,
    },
}

impl FlagsUpdate {
    /// N and Z for `result`.
    #[must_use]
    pub const fn nz(result: u32) -> Self {
        Self::Nz {
            negative: result & 0x8000_0000 != 0,
            zero: result == 0,
        }
    }

    /// N, Z and a shifter carry for `result`.
    #[must_use]
    pub const fn nzc(result: u32, carry: bool) -> Self {
        Self::Nzc {
            negative: result & 0x8000_0000 != 0,
            zero: result == 0,
            carry,
        }
    }

    /// N, Z, C and V for an adder result.
    #[must_use]
    pub const fn nzcv(result: u32, carry: bool, overflow: bool) -> Self {
        Self::Nzcv {
            negative: result & 0x8000_0000 != 0,
            zero: result == 0,
            carry,
            overflow,
        }
    }

    /// Writes the update into `arch`.
    pub const fn apply(self, arch: &mut ArchitecturalState) {
        match self {
            Self::None => {}
            Self::Nz { negative, zero } => {
                arch.set_flag(APSR_N, negative);
                arch.set_flag(APSR_Z, zero);
            }
            Self::Nzc {
                negative,
                zero,
                carry,
            } => {
                arch.set_flag(APSR_N, negative);
                arch.set_flag(APSR_Z, zero);
                arch.set_flag(APSR_C, carry);
            }
            Self::Nzcv {
                negative,
                zero,
                carry,
                overflow,
            } => {
                arch.set_flag(APSR_N, negative);
                arch.set_flag(APSR_Z, zero);
                arch.set_flag(APSR_C, carry);
                arch.set_flag(APSR_V, overflow);
            }
        }
    }
}
