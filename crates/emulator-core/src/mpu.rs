//! Memory protection unit: eight regions over an optional privileged
//! background map.
//!
//! Every CPU transfer outside the private peripheral bus is checked while the
//! unit is enabled. Regions may overlap; the highest-numbered region whose
//! enabled subregion contains the address decides the outcome. Addresses no
//! region claims fall through to the background map, which only privileged
//! code may use and only when `PRIVDEFENA` is set.
//!
//! [`cover_registers`] computes a register program that permits exactly a
//! 32-byte aligned range using at most eight regions.

#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use tracing::debug;

use crate::memory::{AccessKind, PRIVATE_PERIPHERAL_BUS};
use crate::peripherals::RegisterDevice;
use crate::FaultCode;

/// `MPU_TYPE` register address.
pub const MPU_TYPE: u32 = 0xE000_ED90;
/// `MPU_CTRL` register address.
pub const MPU_CTRL: u32 = 0xE000_ED94;
/// `MPU_RNR` register address.
pub const MPU_RNR: u32 = 0xE000_ED98;
/// `MPU_RBAR` register address.
pub const MPU_RBAR: u32 = 0xE000_ED9C;
/// `MPU_RASR` register address.
pub const MPU_RASR: u32 = 0xE000_EDA0;

/// Number of programmable regions.
pub const MPU_REGION_COUNT: usize = 8;
/// `MPU_TYPE` value: eight unified regions.
pub const MPU_TYPE_VALUE: u32 = (MPU_REGION_COUNT as u32) << 8;

/// `MPU_CTRL.ENABLE`.
pub const MPU_CTRL_ENABLE: u32 = 0x1;
/// `MPU_CTRL.HFNMIENA`.
pub const MPU_CTRL_HFNMIENA: u32 = 0x2;
/// `MPU_CTRL.PRIVDEFENA`.
pub const MPU_CTRL_PRIVDEFENA: u32 = 0x4;

const RBAR_VALID: u32 = 0x10;
const RBAR_ADDR_MASK: u32 = 0xFFFF_FFE0;
const RASR_ENABLE: u32 = 0x1;
const MIN_SIZE_FIELD: u8 = 4;
const SUBREGION_MIN_BYTES: u64 = 256;
const ATTR_XN: u16 = 0x1000;

/// Region attributes written by [`cover_registers`]: full access, shareable, cacheable.
pub const COVER_ATTRIBUTES: u32 = 0x0306;

/// One programmable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MpuRegion {
    enabled: bool,
    base: u32,
    size_field: u8,
    subregion_disable: u8,
    attributes: u16,
}

impl MpuRegion {
    /// Region size in bytes, `2^(SIZE + 1)`.
    #[must_use]
    pub const fn size(&self) -> u64 {
        1_u64 << (self.size_field as u32 + 1)
    }

    /// Base address truncated to a multiple of the region size.
    #[must_use]
    pub const fn effective_base(&self) -> u32 {
        (self.base as u64 & !(self.size() - 1)) as u32
    }

    /// Access permission field (`AP`).
    #[must_use]
    pub const fn access_permission(&self) -> u8 {
        ((self.attributes >> 8) & 0x7) as u8
    }

    /// Returns `true` when the region is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` when `addr` lies in an enabled subregion of this region.
    #[must_use]
    pub const fn matches(&self, addr: u32) -> bool {
        if !self.enabled {
            return false;
        }
        let base = self.effective_base() as u64;
        let size = self.size();
        let addr = addr as u64;
        if addr < base || addr >= base + size {
            return false;
        }
        if size < SUBREGION_MIN_BYTES {
            return true;
        }
        let subregion = ((addr - base) / (size / 8)) as u32;
        (self.subregion_disable >> subregion) & 1 == 0
    }

    const fn rasr(&self) -> u32 {
        ((self.attributes as u32) << 16)
            | ((self.subregion_disable as u32) << 8)
            | ((self.size_field as u32) << 1)
            | self.enabled as u32
    }

    const fn permits(&self, privileged: bool, kind: AccessKind) -> bool {
        if matches!(kind, AccessKind::Fetch) && self.attributes & ATTR_XN != 0 {
            return false;
        }
        let write = matches!(kind, AccessKind::Write);
        match self.access_permission() {
            1 => privileged,
            2 => privileged || !write,
            3 => true,
            5 => privileged && !write,
            6 | 7 => !write,
            _ => false,
        }
    }
}

/// Memory protection unit register file and access checker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Mpu {
    ctrl: u32,
    rnr: u32,
    regions: [MpuRegion; MPU_REGION_COUNT],
}

impl Mpu {
    /// Creates a disabled unit with every region cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `MPU_CTRL` value.
    #[must_use]
    pub const fn ctrl(&self) -> u32 {
        self.ctrl
    }

    /// Returns `true` when protection is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.ctrl & MPU_CTRL_ENABLE != 0
    }

    /// Borrows a region by number.
    #[must_use]
    pub fn region(&self, number: usize) -> Option<&MpuRegion> {
        self.regions.get(number)
    }

    /// Checks one transfer against the protection map.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::MpuViolation`] when the deciding region, or the
    /// background map, denies the access.
    pub fn check(&self, addr: u32, privileged: bool, kind: AccessKind) -> Result<(), FaultCode> {
        if !self.is_enabled() {
            return Ok(());
        }
        let (ppb_start, ppb_end) = PRIVATE_PERIPHERAL_BUS;
        if addr >= ppb_start && addr < ppb_end {
            return Ok(());
        }
        let permitted = match self.regions.iter().rev().find(|region| region.matches(addr)) {
            Some(region) => region.permits(privileged, kind),
            None => privileged && self.ctrl & MPU_CTRL_PRIVDEFENA != 0,
        };
        if permitted {
            Ok(())
        } else {
            Err(FaultCode::MpuViolation)
        }
    }

    /// Programs the regions to permit exactly `[begin, end)`.
    ///
    /// `MPU_CTRL` is left unchanged.
    ///
    /// # Errors
    ///
    /// Propagates register write faults; a well-formed program never raises one.
    pub fn cover(&mut self, begin: u32, end: u32) -> Result<(), FaultCode> {
        debug!(begin, end, "mpu cover");
        for (rbar, rasr) in cover_registers(begin, end) {
            self.write32(MPU_RBAR, rbar, 0)?;
            self.write32(MPU_RASR, rasr, 0)?;
        }
        Ok(())
    }

    /// Clears control and every region.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn current(&mut self) -> &mut MpuRegion {
        &mut self.regions[self.rnr as usize]
    }
}

impl RegisterDevice for Mpu {
    fn read32(&mut self, addr: u32, _now: u64) -> Result<u32, FaultCode> {
        match addr {
            MPU_TYPE => Ok(MPU_TYPE_VALUE),
            MPU_CTRL => Ok(self.ctrl),
            MPU_RNR => Ok(self.rnr),
            MPU_RBAR => Ok(self.regions[self.rnr as usize].effective_base() | self.rnr),
            MPU_RASR => Ok(self.regions[self.rnr as usize].rasr()),
            _ => Err(FaultCode::BusFault),
        }
    }

    fn write32(&mut self, addr: u32, value: u32, _now: u64) -> Result<(), FaultCode> {
        match addr {
            MPU_TYPE => Ok(()),
            MPU_CTRL => {
                self.ctrl = value & (MPU_CTRL_ENABLE | MPU_CTRL_HFNMIENA | MPU_CTRL_PRIVDEFENA);
                debug!(ctrl = self.ctrl, "mpu control written");
                Ok(())
            }
            MPU_RNR => {
                if value as usize >= MPU_REGION_COUNT {
                    return Err(FaultCode::MalformedCommand);
                }
                self.rnr = value;
                Ok(())
            }
            MPU_RBAR => {
                if value & RBAR_VALID != 0 {
                    let number = value & 0xF;
                    if number as usize >= MPU_REGION_COUNT {
                        return Err(FaultCode::MalformedCommand);
                    }
                    self.rnr = number;
                }
                self.current().base = value & RBAR_ADDR_MASK;
                Ok(())
            }
            MPU_RASR => {
                let size_field = ((value >> 1) & 0x1F) as u8;
                let enabled = value & RASR_ENABLE != 0;
                if enabled && size_field < MIN_SIZE_FIELD {
                    return Err(FaultCode::MalformedCommand);
                }
                let region = self.current();
                region.enabled = enabled;
                region.size_field = size_field;
                region.subregion_disable = (value >> 8) as u8;
                region.attributes = (value >> 16) as u16;
                Ok(())
            }
            _ => Err(FaultCode::BusFault),
        }
    }
}

/// Computes `(RBAR, RASR)` pairs for regions 0..8 permitting exactly `[begin, end)`.
///
/// Pass `k` places two regions of `2^(8 + 3k)` bytes: one trimming the
/// unaligned head of the remaining range and one trimming its tail, each
/// using subregion disables at `1/8` granularity. The remaining middle is
/// handed to the next, eight times larger, pass. Both bounds must be 32-byte
/// aligned for the result to be exact; ranges up to 128 KiB are always fully
/// covered.
#[must_use]
pub fn cover_registers(begin: u32, end: u32) -> [(u32, u32); MPU_REGION_COUNT] {
    let mut registers = [(0, 0); MPU_REGION_COUNT];
    let mut begin = i64::from(begin);
    let mut end = i64::from(end);

    for pass in 0..MPU_REGION_COUNT / 2 {
        let level = 8 + 3 * pass as u32;
        let size = 1_i64 << level;

        let head_base = begin / size * size;
        let gap_begin = (head_base + size).min(end);
        let tail_base = (end + size - 1).div_euclid(size) * size - size;
        let gap_end = begin.max(tail_base);

        let head = 2 * pass;
        registers[head] = if begin < gap_begin {
            cover_region(head, level, head_base, begin, gap_begin)
        } else {
            disabled_region(head)
        };

        let tail = head + 1;
        registers[tail] = if gap_end < end && tail_base != head_base {
            cover_region(tail, level, tail_base, gap_end, end)
        } else {
            disabled_region(tail)
        };

        begin = gap_begin.min(gap_end);
        end = gap_end;
    }
    registers
}

fn cover_region(number: usize, level: u32, base: i64, low: i64, high: i64) -> (u32, u32) {
    let subregion = (1_i64 << level) / 8;
    let first = (low - base) / subregion;
    let last = (high - base) / subregion;
    let disable = (255 - (1_i64 << last) + (1_i64 << first)) as u32 & 0xFF;
    let rasr = (COVER_ATTRIBUTES << 16) | (disable << 8) | ((level - 1) << 1) | RASR_ENABLE;
    let rbar = base as u32 | RBAR_VALID | number as u32;
    (rbar, rasr)
}

const fn disabled_region(number: usize) -> (u32, u32) {
    (RBAR_VALID | number as u32, 0)
}

#[cfg(test)]
mod tests {
    use super::{
        cover_registers, Mpu, MPU_CTRL, MPU_CTRL_ENABLE, MPU_CTRL_PRIVDEFENA, MPU_RASR, MPU_RBAR,
        MPU_RNR, MPU_TYPE,
    };
    use crate::memory::{AccessKind, FLASH0_START, SRAM_START};
    use crate::peripherals::RegisterDevice;
    use crate::FaultCode;
    use proptest::prelude::*;
    use rstest::rstest;

    /// 32-byte aligned window bases, kept clear of the private peripheral bus.
    fn window_base() -> impl Strategy<Value = u32> {
        prop_oneof![
            Just(0),
            Just(FLASH0_START),
            Just(SRAM_START),
            (0_u32..0x06FF_8000).prop_map(|block| block * 32),
        ]
    }

    fn program(mpu: &mut Mpu, number: u32, base: u32, size_field: u32, ap: u32) {
        mpu.write32(MPU_RBAR, base | 0x10 | number, 0).expect("rbar");
        mpu.write32(MPU_RASR, (ap << 24) | (size_field << 1) | 1, 0)
            .expect("rasr");
    }

    fn read_back(mpu: &mut Mpu, number: u32) -> (u32, u32) {
        mpu.write32(MPU_RNR, number, 0).expect("rnr");
        (
            mpu.read32(MPU_RBAR, 0).expect("rbar"),
            mpu.read32(MPU_RASR, 0).expect("rasr"),
        )
    }

    #[test]
    fn cover_reproduces_reference_register_program() {
        let mut mpu = Mpu::new();
        mpu.cover(672, 4448).expect("cover");
        assert_eq!(read_back(&mut mpu, 0), (0x0000_0200, 0x0306_1F0F));
        assert_eq!(read_back(&mut mpu, 1), (0x0000_1101, 0x0306_F80F));
        assert_eq!(read_back(&mut mpu, 2), (0x0000_0002, 0x0306_0715));
        assert_eq!(read_back(&mut mpu, 3), (0x0000_1003, 0x0306_FE15));
        assert_eq!(read_back(&mut mpu, 4), (0x0000_0004, 0x0306_FD1B));
        for number in 5..8 {
            assert_eq!(read_back(&mut mpu, number).1 & 1, 0);
        }
    }

    #[test]
    fn empty_range_disables_every_region() {
        let registers = cover_registers(0x400, 0x400);
        for (number, (rbar, rasr)) in registers.iter().enumerate() {
            assert_eq!(*rbar, 0x10 | number as u32);
            assert_eq!(*rasr, 0);
        }
    }

    #[test]
    fn highest_numbered_region_wins() {
        let mut mpu = Mpu::new();
        program(&mut mpu, 0, 0x2007_0000, 15, 3);
        program(&mut mpu, 5, 0x2007_0000, 7, 6);
        mpu.write32(MPU_CTRL, MPU_CTRL_ENABLE, 0).expect("ctrl");

        assert_eq!(mpu.check(0x2007_0010, false, AccessKind::Read), Ok(()));
        assert_eq!(
            mpu.check(0x2007_0010, true, AccessKind::Write),
            Err(FaultCode::MpuViolation)
        );
        assert_eq!(mpu.check(0x2007_0100, false, AccessKind::Write), Ok(()));
    }

    #[rstest]
    #[case(0, true, AccessKind::Read, false)]
    #[case(1, true, AccessKind::Write, true)]
    #[case(1, false, AccessKind::Read, false)]
    #[case(2, false, AccessKind::Read, true)]
    #[case(2, false, AccessKind::Write, false)]
    #[case(3, false, AccessKind::Write, true)]
    #[case(5, true, AccessKind::Read, true)]
    #[case(5, true, AccessKind::Write, false)]
    #[case(6, false, AccessKind::Fetch, true)]
    #[case(7, true, AccessKind::Write, false)]
    fn access_permission_table(
        #[case] ap: u32,
        #[case] privileged: bool,
        #[case] kind: AccessKind,
        #[case] allowed: bool,
    ) {
        let mut mpu = Mpu::new();
        program(&mut mpu, 2, 0x2007_0000, 9, ap);
        mpu.write32(MPU_CTRL, MPU_CTRL_ENABLE, 0).expect("ctrl");
        assert_eq!(mpu.check(0x2007_0040, privileged, kind).is_ok(), allowed);
    }

    #[test]
    fn background_map_requires_privilege_and_privdefena() {
        let mut mpu = Mpu::new();
        assert_eq!(mpu.check(0x2007_0000, false, AccessKind::Write), Ok(()));
        mpu.write32(MPU_CTRL, MPU_CTRL_ENABLE, 0).expect("ctrl");
        assert!(mpu.check(0x2007_0000, true, AccessKind::Read).is_err());
        mpu.write32(MPU_CTRL, MPU_CTRL_ENABLE | MPU_CTRL_PRIVDEFENA, 0)
            .expect("ctrl");
        assert_eq!(mpu.check(0x2007_0000, true, AccessKind::Read), Ok(()));
        assert!(mpu.check(0x2007_0000, false, AccessKind::Read).is_err());
        assert_eq!(mpu.check(0xE000_ED94, false, AccessKind::Write), Ok(()));
    }

    #[test]
    fn execute_never_regions_block_fetch_only() {
        let mut mpu = Mpu::new();
        mpu.write32(MPU_RBAR, 0x2007_0000 | 0x10, 0).expect("rbar");
        mpu.write32(MPU_RASR, 0x1300_0000 | (9 << 1) | 1, 0)
            .expect("rasr");
        mpu.write32(MPU_CTRL, MPU_CTRL_ENABLE, 0).expect("ctrl");
        assert_eq!(mpu.check(0x2007_0000, false, AccessKind::Read), Ok(()));
        assert_eq!(
            mpu.check(0x2007_0000, false, AccessKind::Fetch),
            Err(FaultCode::MpuViolation)
        );
    }

    #[test]
    fn malformed_register_writes_are_rejected() {
        let mut mpu = Mpu::new();
        assert_eq!(mpu.read32(MPU_TYPE, 0), Ok(0x800));
        assert_eq!(mpu.write32(MPU_RNR, 8, 0), Err(FaultCode::MalformedCommand));
        assert_eq!(
            mpu.write32(MPU_RBAR, 0x1000 | 0x10 | 9, 0),
            Err(FaultCode::MalformedCommand)
        );
        assert_eq!(
            mpu.write32(MPU_RASR, (3 << 1) | 1, 0),
            Err(FaultCode::MalformedCommand)
        );
        assert_eq!(mpu.write32(MPU_RASR, 3 << 1, 0), Ok(()));
        assert_eq!(mpu.read32(0xE000_EDA4, 0), Err(FaultCode::BusFault));
    }

    #[test]
    fn rbar_reads_truncate_base_to_region_size() {
        let mut mpu = Mpu::new();
        program(&mut mpu, 3, 0x2007_0120, 9, 3);
        assert_eq!(read_back(&mut mpu, 3).0, 0x2007_0003);
    }

    proptest! {
        #[test]
        fn cover_permits_exactly_the_requested_range(
            base in window_base(),
            begin_block in 0_u32..4096,
            len_blocks in 0_u32..4096,
            offsets in proptest::collection::vec(0_u32..0x2_2000, 64),
        ) {
            let begin = base + begin_block * 32;
            let end = base + (begin_block * 32 + len_blocks * 32).min(0x2_0000);
            let mut mpu = Mpu::new();
            mpu.cover(begin, end).expect("cover");
            mpu.write32(MPU_CTRL, MPU_CTRL_ENABLE, 0).expect("ctrl");

            let edges = [begin, end, begin.saturating_sub(1), end.saturating_sub(1)];
            let samples = offsets.into_iter().map(|offset| base + offset);
            for addr in samples.chain(edges) {
                let inside = addr >= begin && addr < end;
                prop_assert_eq!(
                    mpu.check(addr, false, AccessKind::Write).is_ok(),
                    inside,
                    "address {:#x} in [{:#x}, {:#x})", addr, begin, end
                );
            }
        }
    }
}
