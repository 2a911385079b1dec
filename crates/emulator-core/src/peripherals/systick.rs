use super::RegisterDevice;
use crate::FaultCode;

/// Control and status register.
pub const SYST_CSR: u32 = 0xE000_E010;
/// Reload value register.
pub const SYST_RVR: u32 = 0xE000_E014;
/// Current value register.
pub const SYST_CVR: u32 = 0xE000_E018;
/// Calibration register.
pub const SYST_CALIB: u32 = 0xE000_E01C;

const CSR_ENABLE: u32 = 0x1;
const CSR_TICKINT: u32 = 0x2;
const CSR_CLKSOURCE: u32 = 0x4;
const CSR_COUNTFLAG: u32 = 0x1_0000;
const COUNTER_MASK: u32 = 0x00FF_FFFF;
const CALIB_VALUE: u32 = 10_500;
const EXTERNAL_CLOCK_DIVIDER: u64 = 8;

/// 24-bit down-counter clocked by the core clock or the core clock / 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SysTick {
    control: u32,
    count_flag: bool,
    reload: u32,
    current: u32,
    prescaler: u64,
}

impl Default for SysTick {
    fn default() -> Self {
        Self {
            control: CSR_CLKSOURCE,
            count_flag: false,
            reload: 0,
            current: 0,
            prescaler: 0,
        }
    }
}

impl SysTick {
    /// Returns `true` when `addr` is a SysTick register.
    #[must_use]
    pub const fn owns_register(addr: u32) -> bool {
        addr >= SYST_CSR && addr <= SYST_CALIB
    }

    /// Current counter value.
    #[must_use]
    pub const fn current(&self) -> u32 {
        self.current
    }

    /// Advances the counter by `cycles` core cycles.
    pub fn advance(&mut self, cycles: u64) {
        if self.control & CSR_ENABLE == 0 {
            return;
        }
        let ticks = if self.control & CSR_CLKSOURCE != 0 {
            cycles
        } else {
            let total = self.prescaler.saturating_add(cycles);
            self.prescaler = total % EXTERNAL_CLOCK_DIVIDER;
            total / EXTERNAL_CLOCK_DIVIDER
        };
        self.count_down(ticks);
    }

    fn count_down(&mut self, mut ticks: u64) {
        if ticks == 0 {
            return;
        }
        if self.current > 0 {
            let step = ticks.min(u64::from(self.current));
            self.current -= step as u32;
            ticks -= step;
            if self.current == 0 {
                self.count_flag = true;
            }
        }
        if ticks == 0 || self.reload == 0 {
            return;
        }
        let period = u64::from(self.reload) + 1;
        if ticks / period > 0 {
            self.count_flag = true;
        }
        let remainder = ticks % period;
        self.current = if remainder == 0 {
            0
        } else {
            self.reload - (remainder - 1) as u32
        };
    }
}

impl RegisterDevice for SysTick {
    fn read32(&mut self, addr: u32, _now: u64) -> Result<u32, FaultCode> {
        match addr {
            SYST_CSR => {
                let flag = if self.count_flag { CSR_COUNTFLAG } else { 0 };
                self.count_flag = false;
                Ok(self.control | flag)
            }
            SYST_RVR => Ok(self.reload),
            SYST_CVR => Ok(self.current),
            SYST_CALIB => Ok(CALIB_VALUE),
            _ => Err(FaultCode::BusFault),
        }
    }

    fn write32(&mut self, addr: u32, value: u32, _now: u64) -> Result<(), FaultCode> {
        match addr {
            SYST_CSR => self.control = value & (CSR_ENABLE | CSR_TICKINT | CSR_CLKSOURCE),
            SYST_RVR => self.reload = value & COUNTER_MASK,
            SYST_CVR => {
                self.current = 0;
                self.count_flag = false;
            }
            SYST_CALIB => {}
            _ => return Err(FaultCode::BusFault),
        }
        Ok(())
    }
}
