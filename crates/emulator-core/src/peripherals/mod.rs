//! Memory-mapped register devices and the composite that routes to them.

/// General-purpose backup registers.
pub mod backup;
/// Keyboard edge controller and host input sources.
pub mod keyboard;
/// System control block.
pub mod scb;
/// SysTick timer.
pub mod systick;

pub use backup::{BackupRegisters, BACKUP_BASE, BACKUP_WORDS};
pub use keyboard::{
    InputSource, KeyEvent, KeyboardController, ScriptedInput, KEYBOARD_DATA, KEYBOARD_STATUS,
};
pub use scb::{ExceptionNumber, SystemControlBlock, SCB_VTOR_RESET};
pub use systick::SysTick;

use crate::flash::FlashController;
use crate::memory::FlashBank;
use crate::mpu::{Mpu, MPU_RASR, MPU_TYPE};
use crate::FaultCode;

/// Word-wide register device addressed by absolute bus addresses.
pub trait RegisterDevice {
    /// Reads the register at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::BusFault`] for unimplemented offsets, or a device
    /// specific fault.
    fn read32(&mut self, addr: u32, now: u64) -> Result<u32, FaultCode>;

    /// Writes `value` to the register at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::BusFault`] for unimplemented offsets, or a device
    /// specific fault.
    fn write32(&mut self, addr: u32, value: u32, now: u64) -> Result<(), FaultCode>;
}

/// Every register device on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Peripherals {
    flash: [FlashController; 2],
    keyboard: KeyboardController,
    backup: BackupRegisters,
    systick: SysTick,
    scb: SystemControlBlock,
    mpu: Mpu,
}

impl Peripherals {
    /// Creates power-on devices; page writes take `flash_write_latency` cycles.
    #[must_use]
    pub fn new(flash_write_latency: u64) -> Self {
        Self {
            flash: FlashBank::ALL.map(|bank| FlashController::new(bank, flash_write_latency)),
            keyboard: KeyboardController::default(),
            backup: BackupRegisters::default(),
            systick: SysTick::default(),
            scb: SystemControlBlock::default(),
            mpu: Mpu::new(),
        }
    }

    /// Flash controller for `bank`.
    #[must_use]
    pub const fn flash(&self, bank: FlashBank) -> &FlashController {
        &self.flash[bank.index()]
    }

    /// Mutable flash controller for `bank`.
    pub fn flash_mut(&mut self, bank: FlashBank) -> &mut FlashController {
        &mut self.flash[bank.index()]
    }

    /// Keyboard controller.
    #[must_use]
    pub const fn keyboard(&self) -> &KeyboardController {
        &self.keyboard
    }

    /// Mutable keyboard controller.
    pub fn keyboard_mut(&mut self) -> &mut KeyboardController {
        &mut self.keyboard
    }

    /// Backup registers.
    #[must_use]
    pub const fn backup(&self) -> &BackupRegisters {
        &self.backup
    }

    /// SysTick timer.
    #[must_use]
    pub const fn systick(&self) -> &SysTick {
        &self.systick
    }

    /// System control block.
    #[must_use]
    pub const fn scb(&self) -> &SystemControlBlock {
        &self.scb
    }

    /// Mutable system control block.
    pub fn scb_mut(&mut self) -> &mut SystemControlBlock {
        &mut self.scb
    }

    /// Memory protection unit.
    #[must_use]
    pub const fn mpu(&self) -> &Mpu {
        &self.mpu
    }

    /// Mutable memory protection unit.
    pub fn mpu_mut(&mut self) -> &mut Mpu {
        &mut self.mpu
    }

    /// Advances time-driven devices by `cycles`.
    pub fn advance(&mut self, cycles: u64) {
        self.systick.advance(cycles);
    }

    /// Applies system reset. Flash arrays, GPNVM bits and backup registers survive.
    pub fn reset(&mut self) {
        for controller in &mut self.flash {
            controller.reset();
        }
        self.keyboard.reset();
        self.systick = SysTick::default();
        self.scb.reset();
        self.mpu.reset();
    }

    fn device_mut(&mut self, addr: u32) -> Option<&mut dyn RegisterDevice> {
        let device: &mut dyn RegisterDevice = if self.flash[0].owns_register(addr) {
            &mut self.flash[0]
        } else if self.flash[1].owns_register(addr) {
            &mut self.flash[1]
        } else if KeyboardController::owns_register(addr) {
            &mut self.keyboard
        } else if BackupRegisters::owns_register(addr) {
            &mut self.backup
        } else if SysTick::owns_register(addr) {
            &mut self.systick
        } else if SystemControlBlock::owns_register(addr) {
            &mut self.scb
        } else if (MPU_TYPE..=MPU_RASR).contains(&addr) {
            &mut self.mpu
        } else {
            return None;
        };
        Some(device)
    }
}

impl RegisterDevice for Peripherals {
    fn read32(&mut self, addr: u32, now: u64) -> Result<u32, FaultCode> {
        self.device_mut(addr)
            .ok_or(FaultCode::BusFault)?
            .read32(addr, now)
    }

    fn write32(&mut self, addr: u32, value: u32, now: u64) -> Result<(), FaultCode> {
        self.device_mut(addr)
            .ok_or(FaultCode::BusFault)?
            .write32(addr, value, now)
    }
}

#[cfg(test)]
mod tests {
    use super::{Peripherals, RegisterDevice, BACKUP_BASE};
    use crate::flash::{FlashCommand, FLASH_CONTROLLER0_BASE, FLASH_CONTROLLER1_BASE};
    use crate::memory::FlashBank;
    use crate::mpu::MPU_TYPE;
    use crate::FaultCode;
    use rstest::rstest;

    #[rstest]
    #[case(0x400E_0000)]
    #[case(0x400E_0C0C)]
    #[case(0x400E_1408)]
    #[case(0xE000_E000)]
    #[case(0xE000_EDA4)]
    fn unclaimed_register_addresses_are_bus_faults(#[case] addr: u32) {
        let mut peripherals = Peripherals::new(10);
        assert_eq!(peripherals.read32(addr, 0), Err(FaultCode::BusFault));
        assert_eq!(peripherals.write32(addr, 0, 0), Err(FaultCode::BusFault));
    }

    #[test]
    fn routes_to_each_device() {
        let mut peripherals = Peripherals::new(10);
        assert_eq!(peripherals.read32(FLASH_CONTROLLER0_BASE + 8, 0), Ok(1));
        assert_eq!(peripherals.read32(MPU_TYPE, 0), Ok(0x800));
        assert_eq!(peripherals.read32(0xE000_ED00, 0), Ok(0x412F_C230));
        assert_eq!(peripherals.read32(0xE000_E01C, 0), Ok(10_500));
        peripherals.write32(BACKUP_BASE + 4, 77, 0).expect("backup");
        assert_eq!(peripherals.read32(BACKUP_BASE + 4, 0), Ok(77));
    }

    #[test]
    fn busy_bank_does_not_block_the_other_controller() {
        let mut peripherals = Peripherals::new(10);
        peripherals
            .write32(
                FLASH_CONTROLLER0_BASE + 4,
                FlashCommand::EraseWritePage { page: 0 }.encode(),
                0,
            )
            .expect("command");
        assert_eq!(peripherals.read32(FLASH_CONTROLLER0_BASE + 8, 5), Ok(0));
        assert_eq!(peripherals.read32(FLASH_CONTROLLER1_BASE + 8, 5), Ok(1));
        assert!(peripherals.flash_mut(FlashBank::Bank0).is_busy(5));
        assert!(!peripherals.flash_mut(FlashBank::Bank1).is_busy(5));
    }

    #[test]
    fn reset_preserves_backup_registers() {
        let mut peripherals = Peripherals::new(10);
        peripherals.write32(BACKUP_BASE, 0xCAFE, 0).expect("backup");
        peripherals.write32(0xE000_ED94, 1, 0).expect("mpu ctrl");
        peripherals.reset();
        assert_eq!(peripherals.read32(BACKUP_BASE, 0), Ok(0xCAFE));
        assert!(!peripherals.mpu().is_enabled());
    }
}
