//! Fixed board memory-region map and address decoding.

/// Start address of flash bank 0.
pub const FLASH0_START: u32 = 0x0008_0000;
/// Exclusive end address of flash bank 0.
pub const FLASH0_END: u32 = 0x000C_0000;
/// Start address of flash bank 1.
pub const FLASH1_START: u32 = FLASH0_END;
/// Exclusive end address of flash bank 1.
pub const FLASH1_END: u32 = 0x0010_0000;
/// Start address of SRAM.
pub const SRAM_START: u32 = 0x2007_0000;
/// Exclusive end address of SRAM.
pub const SRAM_END: u32 = 0x2008_8000;
/// Start address of the controllers peripheral range.
pub const CONTROLLERS_START: u32 = 0x400E_0000;
/// Exclusive end address of the controllers peripheral range.
pub const CONTROLLERS_END: u32 = 0x400E_2000;
/// Start address of the system control space.
pub const SYSTEM_CONTROL_START: u32 = 0xE000_E000;
/// Exclusive end address of the system control space.
pub const SYSTEM_CONTROL_END: u32 = 0xE000_F000;

/// Private peripheral bus bounds; the MPU never checks this window.
pub const PRIVATE_PERIPHERAL_BUS: (u32, u32) = (0xE000_0000, 0xE010_0000);

/// Bytes per flash page.
pub const FLASH_PAGE_BYTES: u32 = 256;
/// Words per flash page.
pub const FLASH_PAGE_WORDS: usize = 64;
/// Bytes per flash bank.
pub const FLASH_BANK_BYTES: u32 = FLASH0_END - FLASH0_START;
/// Pages per flash bank.
pub const FLASH_BANK_PAGES: u32 = FLASH_BANK_BYTES / FLASH_PAGE_BYTES;
/// Bytes of SRAM.
pub const SRAM_BYTES: u32 = SRAM_END - SRAM_START;

/// One of the two independently programmed flash banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FlashBank {
    /// Lower bank at `0x0008_0000`.
    Bank0,
    /// Upper bank at `0x000C_0000`.
    Bank1,
}

impl FlashBank {
    /// Both banks in address order.
    pub const ALL: [Self; 2] = [Self::Bank0, Self::Bank1];

    /// Returns the bank index (0 or 1).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Bank0 => 0,
            Self::Bank1 => 1,
        }
    }

    /// Returns the base address of the bank array.
    #[must_use]
    pub const fn base(self) -> u32 {
        match self {
            Self::Bank0 => FLASH0_START,
            Self::Bank1 => FLASH1_START,
        }
    }
}

/// Canonical fixed-region descriptor for the board memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionDescriptor {
    /// Region classification.
    pub region: MemoryRegion,
    /// Inclusive start address.
    pub start: u32,
    /// Exclusive end address.
    pub end: u32,
}

/// Region classification for mapped addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Flash bank 0 array.
    Flash0,
    /// Flash bank 1 array.
    Flash1,
    /// On-chip SRAM.
    Sram,
    /// Flash controllers, keyboard controller and backup registers.
    Controllers,
    /// SysTick, SCB and MPU registers.
    SystemControl,
}

impl MemoryRegion {
    /// Returns the `[start, end)` bounds for this region.
    #[must_use]
    pub const fn bounds(self) -> (u32, u32) {
        match self {
            Self::Flash0 => (FLASH0_START, FLASH0_END),
            Self::Flash1 => (FLASH1_START, FLASH1_END),
            Self::Sram => (SRAM_START, SRAM_END),
            Self::Controllers => (CONTROLLERS_START, CONTROLLERS_END),
            Self::SystemControl => (SYSTEM_CONTROL_START, SYSTEM_CONTROL_END),
        }
    }

    /// Returns `true` when `addr` belongs to this region.
    #[must_use]
    pub const fn contains(self, addr: u32) -> bool {
        let (start, end) = self.bounds();
        addr >= start && addr < end
    }

    /// Returns the canonical descriptor for this region.
    #[must_use]
    pub const fn descriptor(self) -> RegionDescriptor {
        let (start, end) = self.bounds();
        RegionDescriptor {
            region: self,
            start,
            end,
        }
    }

    /// Returns the flash bank backing this region, if any.
    #[must_use]
    pub const fn flash_bank(self) -> Option<FlashBank> {
        match self {
            Self::Flash0 => Some(FlashBank::Bank0),
            Self::Flash1 => Some(FlashBank::Bank1),
            _ => None,
        }
    }

    /// Returns `true` for regions backed by byte storage (SRAM and flash).
    #[must_use]
    pub const fn is_storage(self) -> bool {
        matches!(self, Self::Flash0 | Self::Flash1 | Self::Sram)
    }
}

/// Fixed region layout in ascending address order.
pub const FIXED_MEMORY_REGIONS: [RegionDescriptor; 5] = [
    MemoryRegion::Flash0.descriptor(),
    MemoryRegion::Flash1.descriptor(),
    MemoryRegion::Sram.descriptor(),
    MemoryRegion::Controllers.descriptor(),
    MemoryRegion::SystemControl.descriptor(),
];

const _: () = assert_fixed_region_layout();

const fn assert_fixed_region_layout() {
    let mut index = 0;
    while index < FIXED_MEMORY_REGIONS.len() {
        let descriptor = FIXED_MEMORY_REGIONS[index];
        assert!(
            descriptor.start < descriptor.end,
            "region start must be below its end"
        );

        if index > 0 {
            let previous = FIXED_MEMORY_REGIONS[index - 1];
            assert!(
                previous.end <= descriptor.start,
                "fixed regions must be ascending and disjoint"
            );
        }

        index += 1;
    }

    assert!(
        FLASH_BANK_BYTES == FLASH1_END - FLASH1_START,
        "flash banks must have equal size"
    );
    assert!(
        FLASH_BANK_BYTES % FLASH_PAGE_BYTES == 0,
        "flash banks must hold whole pages"
    );
    assert!(
        FLASH_PAGE_WORDS as u32 * 4 == FLASH_PAGE_BYTES,
        "page word count must match page size"
    );
}

/// Decodes an address into its fixed memory region; `None` means unmapped.
#[must_use]
pub const fn decode_memory_region(addr: u32) -> Option<MemoryRegion> {
    let mut index = 0;
    while index < FIXED_MEMORY_REGIONS.len() {
        let descriptor = FIXED_MEMORY_REGIONS[index];
        if addr >= descriptor.start && addr < descriptor.end {
            return Some(descriptor.region);
        }
        index += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{
        decode_memory_region, FlashBank, MemoryRegion, FIXED_MEMORY_REGIONS, FLASH0_START,
        FLASH1_END, FLASH1_START, FLASH_BANK_PAGES, SRAM_END, SRAM_START,
    };
    use rstest::rstest;

    #[rstest]
    #[case(0x0000_0000, None)]
    #[case(0x0007_FFFF, None)]
    #[case(0x0008_0000, Some(MemoryRegion::Flash0))]
    #[case(0x000B_FFFF, Some(MemoryRegion::Flash0))]
    #[case(0x000C_0000, Some(MemoryRegion::Flash1))]
    #[case(0x000F_FFFF, Some(MemoryRegion::Flash1))]
    #[case(0x0010_0000, None)]
    #[case(0x2006_FFFF, None)]
    #[case(0x2007_0000, Some(MemoryRegion::Sram))]
    #[case(0x2008_7FFF, Some(MemoryRegion::Sram))]
    #[case(0x2008_8000, None)]
    #[case(0x400E_0A04, Some(MemoryRegion::Controllers))]
    #[case(0x400E_2000, None)]
    #[case(0xE000_ED94, Some(MemoryRegion::SystemControl))]
    #[case(0xE000_F000, None)]
    #[case(0xFFFF_FFFF, None)]
    fn region_decode_is_correct_at_boundaries(
        #[case] addr: u32,
        #[case] expected: Option<MemoryRegion>,
    ) {
        assert_eq!(decode_memory_region(addr), expected);
    }

    #[test]
    fn every_descriptor_decodes_to_itself_at_both_ends() {
        for descriptor in FIXED_MEMORY_REGIONS {
            assert_eq!(
                decode_memory_region(descriptor.start),
                Some(descriptor.region)
            );
            assert_eq!(
                decode_memory_region(descriptor.end - 1),
                Some(descriptor.region)
            );
            assert!(descriptor.region.contains(descriptor.start));
            assert!(!descriptor.region.contains(descriptor.end));
        }
    }

    #[test]
    fn banks_are_adjacent_and_hold_1024_pages_each() {
        assert_eq!(FlashBank::Bank1.base(), FLASH1_START);
        assert_eq!(FlashBank::Bank0.base(), FLASH0_START);
        assert_eq!(FLASH1_END - FLASH0_START, 2 * 256 * FLASH_BANK_PAGES);
        assert_eq!(FLASH_BANK_PAGES, 1024);
        assert_eq!(SRAM_END - SRAM_START, 96 * 1024);
    }

    #[test]
    fn only_flash_regions_map_to_banks() {
        assert_eq!(MemoryRegion::Flash0.flash_bank(), Some(FlashBank::Bank0));
        assert_eq!(MemoryRegion::Flash1.flash_bank(), Some(FlashBank::Bank1));
        assert_eq!(MemoryRegion::Sram.flash_bank(), None);
        assert!(MemoryRegion::Sram.is_storage());
        assert!(!MemoryRegion::Controllers.is_storage());
    }
}
