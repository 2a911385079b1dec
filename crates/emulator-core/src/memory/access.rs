//! Access widths, access kinds and the per-region legality checks applied by the bus.

use crate::{FaultCode, MemoryRegion};

/// Data width of one bus transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8-bit transfer.
    Byte,
    /// 16-bit transfer.
    Halfword,
    /// 32-bit transfer.
    Word,
}

impl AccessWidth {
    /// Returns the transfer size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Halfword => 2,
            Self::Word => 4,
        }
    }

    /// Returns the mask selecting the significant bits of a value of this width.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Halfword => 0xFFFF,
            Self::Word => u32::MAX,
        }
    }
}

/// Purpose of a bus transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Data load.
    Read,
    /// Data store.
    Write,
    /// Instruction fetch (native halfwords or bytecode bytes).
    Fetch,
}

impl AccessKind {
    /// Returns `true` for kinds that only observe memory.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::Fetch)
    }
}

/// Privilege and purpose attached to every CPU-originated bus transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessContext {
    /// Whether the requester currently runs privileged.
    pub privileged: bool,
    /// Transfer kind.
    pub kind: AccessKind,
}

impl AccessContext {
    /// Privileged data read.
    pub const PRIVILEGED_READ: Self = Self::new(true, AccessKind::Read);
    /// Privileged data write.
    pub const PRIVILEGED_WRITE: Self = Self::new(true, AccessKind::Write);

    /// Creates an access context.
    #[must_use]
    pub const fn new(privileged: bool, kind: AccessKind) -> Self {
        Self { privileged, kind }
    }
}

/// Validates natural alignment for halfword and word transfers.
///
/// # Errors
///
/// Returns [`FaultCode::AlignmentFault`] when `addr` is not a multiple of the
/// transfer width.
pub const fn validate_alignment(addr: u32, width: AccessWidth) -> Result<(), FaultCode> {
    if addr % width.bytes() == 0 {
        Ok(())
    } else {
        Err(FaultCode::AlignmentFault)
    }
}

/// Validates instruction fetch legality for a mapped region.
///
/// Fetch is legal only from flash and SRAM.
///
/// # Errors
///
/// Returns [`FaultCode::BusFault`] when `region` is a register range.
pub const fn validate_fetch_access(region: MemoryRegion) -> Result<(), FaultCode> {
    if region.is_storage() {
        Ok(())
    } else {
        Err(FaultCode::BusFault)
    }
}

/// Validates CPU writes into a flash array, which only feed the page latch.
///
/// # Errors
///
/// Returns [`FaultCode::BusFault`] for byte and halfword writes.
pub const fn validate_flash_write_width(width: AccessWidth) -> Result<(), FaultCode> {
    match width {
        AccessWidth::Word => Ok(()),
        AccessWidth::Byte | AccessWidth::Halfword => Err(FaultCode::BusFault),
    }
}

/// Validates register-range transfers, which are word-only.
///
/// # Errors
///
/// Returns [`FaultCode::BusFault`] for byte and halfword transfers.
pub const fn validate_register_width(width: AccessWidth) -> Result<(), FaultCode> {
    match width {
        AccessWidth::Word => Ok(()),
        AccessWidth::Byte | AccessWidth::Halfword => Err(FaultCode::BusFault),
    }
}

/// Validates privilege for system control space transfers.
///
/// # Errors
///
/// Returns [`FaultCode::BusFault`] when the requester is unprivileged.
pub const fn validate_system_control_privilege(privileged: bool) -> Result<(), FaultCode> {
    if privileged {
        Ok(())
    } else {
        Err(FaultCode::BusFault)
    }
}

/// Reads a little-endian value of `width` from `bytes` at `offset`.
#[must_use]
pub fn read_le(bytes: &[u8], offset: usize, width: AccessWidth) -> u32 {
    bytes[offset..offset + width.bytes() as usize]
        .iter()
        .rev()
        .fold(0, |value, byte| (value << 8) | u32::from(*byte))
}

/// Writes the low `width` bytes of `value` into `bytes` at `offset`, little-endian.
pub fn write_le(bytes: &mut [u8], offset: usize, width: AccessWidth, value: u32) {
    let target = &mut bytes[offset..offset + width.bytes() as usize];
    for (index, byte) in target.iter_mut().enumerate() {
        *byte = (value >> (8 * index)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        read_le, validate_alignment, validate_fetch_access, validate_flash_write_width,
        validate_system_control_privilege, write_le, AccessWidth,
    };
    use crate::{FaultCode, MemoryRegion};
    use rstest::rstest;

    #[rstest]
    #[case(0x2007_0001, AccessWidth::Byte, Ok(()))]
    #[case(0x2007_0002, AccessWidth::Halfword, Ok(()))]
    #[case(0x2007_0001, AccessWidth::Halfword, Err(FaultCode::AlignmentFault))]
    #[case(0x2007_0004, AccessWidth::Word, Ok(()))]
    #[case(0x2007_0002, AccessWidth::Word, Err(FaultCode::AlignmentFault))]
    #[case(0x2007_0003, AccessWidth::Word, Err(FaultCode::AlignmentFault))]
    fn alignment_matches_natural_width(
        #[case] addr: u32,
        #[case] width: AccessWidth,
        #[case] expected: Result<(), FaultCode>,
    ) {
        assert_eq!(validate_alignment(addr, width), expected);
    }

    #[test]
    fn fetch_is_limited_to_storage_regions() {
        assert_eq!(validate_fetch_access(MemoryRegion::Flash0), Ok(()));
        assert_eq!(validate_fetch_access(MemoryRegion::Flash1), Ok(()));
        assert_eq!(validate_fetch_access(MemoryRegion::Sram), Ok(()));
        assert_eq!(
            validate_fetch_access(MemoryRegion::Controllers),
            Err(FaultCode::BusFault)
        );
        assert_eq!(
            validate_fetch_access(MemoryRegion::SystemControl),
            Err(FaultCode::BusFault)
        );
    }

    #[test]
    fn flash_and_system_policies_reject_expected_requests() {
        assert_eq!(validate_flash_write_width(AccessWidth::Word), Ok(()));
        assert_eq!(
            validate_flash_write_width(AccessWidth::Byte),
            Err(FaultCode::BusFault)
        );
        assert_eq!(validate_system_control_privilege(true), Ok(()));
        assert_eq!(
            validate_system_control_privilege(false),
            Err(FaultCode::BusFault)
        );
    }

    #[test]
    fn little_endian_helpers_place_low_byte_first() {
        let mut bytes = [0_u8; 8];
        write_le(&mut bytes, 0, AccessWidth::Word, 0x1122_3344);
        write_le(&mut bytes, 4, AccessWidth::Halfword, 0xAABB_CCDD);
        write_le(&mut bytes, 6, AccessWidth::Byte, 0x1EE);
        assert_eq!(bytes, [0x44, 0x33, 0x22, 0x11, 0xDD, 0xCC, 0xEE, 0x00]);
        assert_eq!(read_le(&bytes, 0, AccessWidth::Word), 0x1122_3344);
        assert_eq!(read_le(&bytes, 1, AccessWidth::Halfword), 0x2233);
        assert_eq!(read_le(&bytes, 4, AccessWidth::Halfword), 0xCCDD);
        assert_eq!(read_le(&bytes, 6, AccessWidth::Byte), 0xEE);
    }
}
