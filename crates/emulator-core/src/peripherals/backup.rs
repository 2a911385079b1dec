use super::RegisterDevice;
use crate::FaultCode;

/// First backup register address.
pub const BACKUP_BASE: u32 = 0x400E_1A90;
/// Number of backup registers.
pub const BACKUP_WORDS: usize = 8;

/// Eight general-purpose words that survive system reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BackupRegisters {
    words: [u32; BACKUP_WORDS],
}

impl BackupRegisters {
    /// Returns `true` when `addr` is a backup register.
    #[must_use]
    pub const fn owns_register(addr: u32) -> bool {
        addr >= BACKUP_BASE && addr < BACKUP_BASE + 4 * BACKUP_WORDS as u32
    }

    /// Reads register `index`.
    #[must_use]
    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    fn index(addr: u32) -> Result<usize, FaultCode> {
        let offset = addr - BACKUP_BASE;
        if offset % 4 == 0 {
            Ok((offset / 4) as usize)
        } else {
            Err(FaultCode::BusFault)
        }
    }
}

impl RegisterDevice for BackupRegisters {
    fn read32(&mut self, addr: u32, _now: u64) -> Result<u32, FaultCode> {
        Ok(self.words[Self::index(addr)?])
    }

    fn write32(&mut self, addr: u32, value: u32, _now: u64) -> Result<(), FaultCode> {
        self.words[Self::index(addr)?] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BackupRegisters, BACKUP_BASE};
    use crate::peripherals::RegisterDevice;

    #[test]
    fn words_are_independent_and_zero_at_power_on() {
        let mut backup = BackupRegisters::default();
        backup.write32(BACKUP_BASE + 28, 9, 0).expect("write");
        assert_eq!(backup.word(7), Some(9));
        assert_eq!(backup.word(0), Some(0));
        assert_eq!(backup.word(8), None);
        assert!(!BackupRegisters::owns_register(BACKUP_BASE + 32));
    }
}
