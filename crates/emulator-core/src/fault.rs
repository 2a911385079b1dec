use thiserror::Error;

/// Fault classes used for exception routing and host diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Address decode, protection or alignment failure on a memory access.
    Memory,
    /// Flash controller protocol violation.
    Flash,
    /// Instruction stream or execution-state violation.
    Usage,
    /// Fault raised while already handling a fault.
    Escalation,
}

/// Stable fault taxonomy shared by the memory map, the CPU and the host API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultCode {
    /// Access to an unmapped address or an unimplemented register.
    #[error("bus fault")]
    BusFault = 0x01,
    /// Access to a flash bank while its controller is busy.
    #[error("flash bank busy")]
    FlashBusy = 0x02,
    /// Access denied by the memory protection unit.
    #[error("mpu violation")]
    MpuViolation = 0x03,
    /// Halfword or word access at an address that is not naturally aligned.
    #[error("unaligned access")]
    AlignmentFault = 0x04,
    /// Bad flash opcode, page number or controller register value.
    #[error("malformed controller command")]
    MalformedCommand = 0x05,
    /// Unsupported native encoding or unknown bytecode opcode.
    #[error("undefined instruction")]
    UndefinedInstruction = 0x06,
    /// Invalid interworking target or exception return.
    #[error("invalid execution state")]
    InvalidState = 0x07,
    /// Fault raised inside the hard fault handler or during exception stacking.
    #[error("core lockup")]
    Lockup = 0x08,
}

impl FaultCode {
    /// Converts a fault code to its stable byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte value back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::BusFault),
            0x02 => Some(Self::FlashBusy),
            0x03 => Some(Self::MpuViolation),
            0x04 => Some(Self::AlignmentFault),
            0x05 => Some(Self::MalformedCommand),
            0x06 => Some(Self::UndefinedInstruction),
            0x07 => Some(Self::InvalidState),
            0x08 => Some(Self::Lockup),
            _ => None,
        }
    }

    /// Returns the routing class for this fault code.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::BusFault | Self::MpuViolation | Self::AlignmentFault => FaultClass::Memory,
            Self::FlashBusy | Self::MalformedCommand => FaultClass::Flash,
            Self::UndefinedInstruction | Self::InvalidState => FaultClass::Usage,
            Self::Lockup => FaultClass::Escalation,
        }
    }

    /// Faults that are never delivered to a handler and always stop the core.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FlashBusy | Self::MalformedCommand | Self::Lockup
        )
    }
}

/// A fault together with the address that caused it.
///
/// For data accesses `address` is the accessed address; for fetch and
/// decode faults it is the instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{code} at {address:#010x}")]
pub struct Fault {
    /// Fault kind.
    pub code: FaultCode,
    /// Faulting address.
    pub address: u32,
}

impl Fault {
    /// Creates a fault record.
    #[must_use]
    pub const fn new(code: FaultCode, address: u32) -> Self {
        Self { code, address }
    }
}

#[cfg(test)]
mod tests {
    use super::{Fault, FaultClass, FaultCode};

    #[test]
    fn stable_code_roundtrip_is_bijective_for_defined_values() {
        for code in 0x01u8..=0x08 {
            let fault = FaultCode::from_u8(code).expect("defined taxonomy code");
            assert_eq!(fault.as_u8(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(FaultCode::from_u8(0x00).is_none());
        assert!(FaultCode::from_u8(0x09).is_none());
        assert!(FaultCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn flash_protocol_faults_are_terminal() {
        assert!(FaultCode::FlashBusy.is_terminal());
        assert!(FaultCode::MalformedCommand.is_terminal());
        assert!(FaultCode::Lockup.is_terminal());
        assert!(!FaultCode::MpuViolation.is_terminal());
        assert!(!FaultCode::BusFault.is_terminal());
    }

    #[test]
    fn class_mapping_matches_fault_taxonomy() {
        assert_eq!(FaultCode::BusFault.class(), FaultClass::Memory);
        assert_eq!(FaultCode::MpuViolation.class(), FaultClass::Memory);
        assert_eq!(FaultCode::AlignmentFault.class(), FaultClass::Memory);
        assert_eq!(FaultCode::FlashBusy.class(), FaultClass::Flash);
        assert_eq!(FaultCode::MalformedCommand.class(), FaultClass::Flash);
        assert_eq!(FaultCode::UndefinedInstruction.class(), FaultClass::Usage);
        assert_eq!(FaultCode::InvalidState.class(), FaultClass::Usage);
        assert_eq!(FaultCode::Lockup.class(), FaultClass::Escalation);
    }

    #[test]
    fn fault_display_names_kind_and_address() {
        let fault = Fault::new(FaultCode::MpuViolation, 0x2007_0100);
        assert_eq!(fault.to_string(), "mpu violation at 0x20070100");
    }
}
