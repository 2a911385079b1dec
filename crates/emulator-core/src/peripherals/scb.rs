//! System control block: identification, vector table offset, fault enables
//! and fault status registers.

use super::RegisterDevice;
use crate::FaultCode;

/// CPUID base register.
pub const SCB_CPUID: u32 = 0xE000_ED00;
/// Vector table offset register.
pub const SCB_VTOR: u32 = 0xE000_ED08;
/// System handler priority register 2 (SVCall priority).
pub const SCB_SHPR2: u32 = 0xE000_ED1C;
/// System handler control and state register.
pub const SCB_SHCSR: u32 = 0xE000_ED24;
/// Configurable fault status register.
pub const SCB_CFSR: u32 = 0xE000_ED28;
/// Hard fault status register.
pub const SCB_HFSR: u32 = 0xE000_ED2C;
/// Memory management fault address register.
pub const SCB_MMFAR: u32 = 0xE000_ED34;
/// Bus fault address register.
pub const SCB_BFAR: u32 = 0xE000_ED38;

/// CPUID value of an r2p0 Cortex-M3.
pub const CPUID_VALUE: u32 = 0x412F_C230;
/// VTOR at reset: start of flash bank 0.
pub const SCB_VTOR_RESET: u32 = 0x0008_0000;
const VTOR_MASK: u32 = 0x3FFF_FF80;

/// `SHCSR.MEMFAULTENA`.
pub const SHCSR_MEMFAULTENA: u32 = 1 << 16;
/// `SHCSR.BUSFAULTENA`.
pub const SHCSR_BUSFAULTENA: u32 = 1 << 17;
/// `SHCSR.USGFAULTENA`.
pub const SHCSR_USGFAULTENA: u32 = 1 << 18;

/// `CFSR.IACCVIOL`: instruction fetch MPU violation.
pub const CFSR_IACCVIOL: u32 = 1 << 0;
/// `CFSR.DACCVIOL`: data access MPU violation.
pub const CFSR_DACCVIOL: u32 = 1 << 1;
/// `CFSR.MMARVALID`: MMFAR holds the faulting address.
pub const CFSR_MMARVALID: u32 = 1 << 7;
/// `CFSR.IBUSERR`: instruction fetch bus error.
pub const CFSR_IBUSERR: u32 = 1 << 8;
/// `CFSR.PRECISERR`: precise data bus error.
pub const CFSR_PRECISERR: u32 = 1 << 9;
/// `CFSR.BFARVALID`: BFAR holds the faulting address.
pub const CFSR_BFARVALID: u32 = 1 << 15;
/// `CFSR.UNDEFINSTR`.
pub const CFSR_UNDEFINSTR: u32 = 1 << 16;
/// `CFSR.INVSTATE`.
pub const CFSR_INVSTATE: u32 = 1 << 17;
/// `CFSR.UNALIGNED`.
pub const CFSR_UNALIGNED: u32 = 1 << 24;
/// `HFSR.FORCED`: escalated configurable fault.
pub const HFSR_FORCED: u32 = 1 << 30;

/// Exception numbers the core can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum ExceptionNumber {
    /// Reset.
    Reset = 1,
    /// Hard fault.
    HardFault = 3,
    /// Memory management fault.
    MemManage = 4,
    /// Bus fault.
    BusFault = 5,
    /// Usage fault.
    UsageFault = 6,
    /// Supervisor call.
    SvCall = 11,
}

impl ExceptionNumber {
    /// Exception number as written to IPSR.
    #[must_use]
    pub const fn number(self) -> u32 {
        self as u32
    }

    /// Decodes an IPSR value.
    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Self::Reset),
            3 => Some(Self::HardFault),
            4 => Some(Self::MemManage),
            5 => Some(Self::BusFault),
            6 => Some(Self::UsageFault),
            11 => Some(Self::SvCall),
            _ => None,
        }
    }

    /// Returns `true` for the three faults enabled through SHCSR.
    #[must_use]
    pub const fn is_configurable_fault(self) -> bool {
        matches!(self, Self::MemManage | Self::BusFault | Self::UsageFault)
    }

    /// Byte offset of this exception's vector from VTOR.
    #[must_use]
    pub const fn vector_offset(self) -> u32 {
        4 * self.number()
    }
}

/// System control block registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SystemControlBlock {
    vtor: u32,
    shpr2: u32,
    shcsr: u32,
    cfsr: u32,
    hfsr: u32,
    mmfar: u32,
    bfar: u32,
}

impl Default for SystemControlBlock {
    fn default() -> Self {
        Self {
            vtor: SCB_VTOR_RESET,
            shpr2: 0,
            shcsr: 0,
            cfsr: 0,
            hfsr: 0,
            mmfar: 0,
            bfar: 0,
        }
    }
}

impl SystemControlBlock {
    /// Returns `true` when `addr` is an implemented SCB register.
    #[must_use]
    pub const fn owns_register(addr: u32) -> bool {
        matches!(
            addr,
            SCB_CPUID
                | SCB_VTOR
                | SCB_SHPR2
                | SCB_SHCSR
                | SCB_CFSR
                | SCB_HFSR
                | SCB_MMFAR
                | SCB_BFAR
        )
    }

    /// Vector table base.
    #[must_use]
    pub const fn vtor(&self) -> u32 {
        self.vtor
    }

    /// Configurable fault status.
    #[must_use]
    pub const fn cfsr(&self) -> u32 {
        self.cfsr
    }

    /// Hard fault status.
    #[must_use]
    pub const fn hfsr(&self) -> u32 {
        self.hfsr
    }

    /// Memory management fault address.
    #[must_use]
    pub const fn mmfar(&self) -> u32 {
        self.mmfar
    }

    /// Bus fault address.
    #[must_use]
    pub const fn bfar(&self) -> u32 {
        self.bfar
    }

    /// Returns `true` when `exception` may be taken through its own vector.
    #[must_use]
    pub const fn handler_enabled(&self, exception: ExceptionNumber) -> bool {
        let bit = match exception {
            ExceptionNumber::MemManage => SHCSR_MEMFAULTENA,
            ExceptionNumber::BusFault => SHCSR_BUSFAULTENA,
            ExceptionNumber::UsageFault => SHCSR_USGFAULTENA,
            ExceptionNumber::Reset | ExceptionNumber::HardFault | ExceptionNumber::SvCall => {
                return true
            }
        };
        self.shcsr & bit != 0
    }

    /// ORs `bits` into CFSR.
    pub const fn record_cfsr(&mut self, bits: u32) {
        self.cfsr |= bits;
    }

    /// Records a memory management fault address.
    pub const fn record_mmfar(&mut self, addr: u32) {
        self.mmfar = addr;
        self.cfsr |= CFSR_MMARVALID;
    }

    /// Records a bus fault address.
    pub const fn record_bfar(&mut self, addr: u32) {
        self.bfar = addr;
        self.cfsr |= CFSR_BFARVALID;
    }

    /// Marks a hard fault as escalated.
    pub const fn record_forced(&mut self) {
        self.hfsr |= HFSR_FORCED;
    }

    /// Restores reset values.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl RegisterDevice for SystemControlBlock {
    fn read32(&mut self, addr: u32, _now: u64) -> Result<u32, FaultCode> {
        match addr {
            SCB_CPUID => Ok(CPUID_VALUE),
            SCB_VTOR => Ok(self.vtor),
            SCB_SHPR2 => Ok(self.shpr2),
            SCB_SHCSR => Ok(self.shcsr),
            SCB_CFSR => Ok(self.cfsr),
            SCB_HFSR => Ok(self.hfsr),
            SCB_MMFAR => Ok(self.mmfar),
            SCB_BFAR => Ok(self.bfar),
            _ => Err(FaultCode::BusFault),
        }
    }

    fn write32(&mut self, addr: u32, value: u32, _now: u64) -> Result<(), FaultCode> {
        match addr {
            SCB_CPUID => {}
            SCB_VTOR => self.vtor = value & VTOR_MASK,
            SCB_SHPR2 => self.shpr2 = value & 0xFF00_0000,
            SCB_SHCSR => {
                self.shcsr = value & (SHCSR_MEMFAULTENA | SHCSR_BUSFAULTENA | SHCSR_USGFAULTENA);
            }
            SCB_CFSR => self.cfsr &= !value,
            SCB_HFSR => self.hfsr &= !value,
            SCB_MMFAR => self.mmfar = value,
            SCB_BFAR => self.bfar = value,
            _ => return Err(FaultCode::BusFault),
        }
        Ok(())
    }
}
