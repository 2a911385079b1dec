//! Memory model primitives, the fixed board map and the system bus.

/// Access widths, kinds and per-region legality checks.
pub mod access;
/// System bus routing every CPU and host transfer.
pub mod bus;
/// Fixed memory-region map and address decoder.
pub mod map;

pub use access::{
    read_le, validate_alignment, validate_fetch_access, validate_flash_write_width,
    validate_register_width, validate_system_control_privilege, write_le, AccessContext,
    AccessKind, AccessWidth,
};
pub use bus::SystemBus;
pub use map::{
    decode_memory_region, FlashBank, MemoryRegion, RegionDescriptor, CONTROLLERS_END,
    CONTROLLERS_START, FIXED_MEMORY_REGIONS, FLASH0_END, FLASH0_START, FLASH1_END, FLASH1_START,
    FLASH_BANK_BYTES, FLASH_BANK_PAGES, FLASH_PAGE_BYTES, FLASH_PAGE_WORDS,
    PRIVATE_PERIPHERAL_BUS, SRAM_BYTES, SRAM_END, SRAM_START, SYSTEM_CONTROL_END,
    SYSTEM_CONTROL_START,
};

/// Contiguous little-endian byte storage mapped at a fixed base address.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryBank {
    base: u32,
    bytes: Box<[u8]>,
}

impl MemoryBank {
    /// Allocates `len` bytes at `base`, every byte set to `fill`.
    #[must_use]
    pub fn new(base: u32, len: u32, fill: u8) -> Self {
        Self {
            base,
            bytes: vec![fill; len as usize].into_boxed_slice(),
        }
    }

    /// Base address.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a zero-sized bank.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` when `[addr, addr + len)` lies inside the bank.
    #[must_use]
    pub fn contains_range(&self, addr: u32, len: usize) -> bool {
        addr.checked_sub(self.base)
            .is_some_and(|offset| (offset as usize).saturating_add(len) <= self.bytes.len())
    }

    /// Reads a little-endian value; the caller guarantees the range is in bounds.
    #[must_use]
    pub fn read(&self, addr: u32, width: AccessWidth) -> u32 {
        read_le(&self.bytes, self.offset(addr), width)
    }

    /// Writes a little-endian value; the caller guarantees the range is in bounds.
    pub fn write(&mut self, addr: u32, width: AccessWidth, value: u32) {
        let offset = self.offset(addr);
        write_le(&mut self.bytes, offset, width, value);
    }

    /// Borrows `len` bytes starting at `addr`.
    #[must_use]
    pub fn slice(&self, addr: u32, len: usize) -> &[u8] {
        let offset = self.offset(addr);
        &self.bytes[offset..offset + len]
    }

    /// Copies `data` into the bank starting at `addr`.
    pub fn copy_from(&mut self, addr: u32, data: &[u8]) {
        let offset = self.offset(addr);
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Sets every byte to `value`.
    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }

    const fn offset(&self, addr: u32) -> usize {
        (addr - self.base) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessWidth, MemoryBank, SRAM_BYTES, SRAM_START};

    #[test]
    fn bank_reads_back_little_endian_words() {
        let mut bank = MemoryBank::new(SRAM_START, SRAM_BYTES, 0);
        assert_eq!(bank.len(), 96 * 1024);
        bank.write(SRAM_START + 8, AccessWidth::Word, 0xDEAD_BEEF);
        assert_eq!(bank.read(SRAM_START + 8, AccessWidth::Byte), 0xEF);
        assert_eq!(bank.read(SRAM_START + 10, AccessWidth::Halfword), 0xDEAD);
        assert_eq!(bank.slice(SRAM_START + 8, 4), &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn range_checks_reject_overflow_and_underflow() {
        let bank = MemoryBank::new(0x1000, 0x100, 0xFF);
        assert!(bank.contains_range(0x1000, 0x100));
        assert!(!bank.contains_range(0x1000, 0x101));
        assert!(!bank.contains_range(0x0FFF, 1));
        assert!(!bank.contains_range(0x10FF, usize::MAX));
        assert!(!bank.is_empty());
    }
}
