//! Enhanced embedded flash controller: one instance per bank.
//!
//! A controller owns its bank's committed array, a 64-word page latch fed by
//! CPU word writes into the array, and at most one timed erase-and-write
//! operation. While that operation is in flight the whole bank is busy: any
//! array or command access faults with [`FaultCode::FlashBusy`]. The staged
//! page becomes visible atomically on the first access at or after its ready
//! cycle.

use tracing::debug;

use crate::memory::{
    validate_flash_write_width, AccessWidth, FlashBank, MemoryBank, FLASH_BANK_BYTES,
    FLASH_BANK_PAGES, FLASH_PAGE_BYTES, FLASH_PAGE_WORDS,
};
use crate::peripherals::RegisterDevice;
use crate::FaultCode;

/// Register block base of the bank 0 controller.
pub const FLASH_CONTROLLER0_BASE: u32 = 0x400E_0A00;
/// Register block base of the bank 1 controller.
pub const FLASH_CONTROLLER1_BASE: u32 = 0x400E_0C00;
/// MODE register offset.
pub const FLASH_MODE_OFFSET: u32 = 0x0;
/// COMMAND register offset.
pub const FLASH_COMMAND_OFFSET: u32 = 0x4;
/// STATUS register offset.
pub const FLASH_STATUS_OFFSET: u32 = 0x8;
/// RESULT register offset (bank 0 only).
pub const FLASH_RESULT_OFFSET: u32 = 0xC;

/// Key expected in COMMAND bits `[31:24]`.
pub const FLASH_COMMAND_KEY: u32 = 0x5A;
/// STATUS bit set when no operation is in flight.
pub const FLASH_STATUS_READY: u32 = 0x1;
/// STATUS bit set by a command written with a wrong key.
pub const FLASH_STATUS_ERROR: u32 = 0x2;
/// The only implemented GPNVM bit: boot from flash.
pub const GPNVM_BOOT_FROM_FLASH: u32 = 1;

const MODE_READY_INTERRUPT_ENABLE: u32 = 0x1;
const MODE_WRITABLE_BITS: u32 = 0x0100_0F01;
const MODE_RESET_VALUE: u32 = 0x200;
const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Decoded flash controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashCommand {
    /// Erase a page, then program it from the latch when the latch is full.
    EraseWritePage {
        /// Page index inside the bank.
        page: u32,
    },
    /// Set a GPNVM bit.
    SetGpnvm {
        /// GPNVM bit index.
        bit: u32,
    },
    /// Clear a GPNVM bit.
    ClearGpnvm {
        /// GPNVM bit index.
        bit: u32,
    },
    /// Copy the GPNVM bits into RESULT.
    GetGpnvm,
}

impl FlashCommand {
    /// Erase-and-write-page opcode.
    pub const OPCODE_ERASE_WRITE_PAGE: u32 = 0x03;
    /// Set-GPNVM opcode.
    pub const OPCODE_SET_GPNVM: u32 = 0x0B;
    /// Clear-GPNVM opcode.
    pub const OPCODE_CLEAR_GPNVM: u32 = 0x0C;
    /// Get-GPNVM opcode.
    pub const OPCODE_GET_GPNVM: u32 = 0x0D;

    /// Encodes the command as a keyed COMMAND register word.
    #[must_use]
    pub const fn encode(self) -> u32 {
        let (opcode, argument) = match self {
            Self::EraseWritePage { page } => (Self::OPCODE_ERASE_WRITE_PAGE, page),
            Self::SetGpnvm { bit } => (Self::OPCODE_SET_GPNVM, bit),
            Self::ClearGpnvm { bit } => (Self::OPCODE_CLEAR_GPNVM, bit),
            Self::GetGpnvm => (Self::OPCODE_GET_GPNVM, 0),
        };
        (FLASH_COMMAND_KEY << 24) | ((argument & 0xFFFF) << 8) | opcode
    }

    /// Decodes a COMMAND register word.
    ///
    /// Returns `Ok(None)` when the key is wrong; the controller reports that
    /// through STATUS rather than as a fault.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::MalformedCommand`] for unknown opcodes, pages past
    /// the end of the bank and GPNVM bits other than boot-from-flash.
    pub const fn decode(word: u32) -> Result<Option<Self>, FaultCode> {
        if word >> 24 != FLASH_COMMAND_KEY {
            return Ok(None);
        }
        let argument = (word >> 8) & 0xFFFF;
        let command = match word & 0xFF {
            Self::OPCODE_ERASE_WRITE_PAGE => {
                if argument >= FLASH_BANK_PAGES {
                    return Err(FaultCode::MalformedCommand);
                }
                Self::EraseWritePage { page: argument }
            }
            Self::OPCODE_SET_GPNVM | Self::OPCODE_CLEAR_GPNVM
                if argument != GPNVM_BOOT_FROM_FLASH =>
            {
                return Err(FaultCode::MalformedCommand);
            }
            Self::OPCODE_SET_GPNVM => Self::SetGpnvm { bit: argument },
            Self::OPCODE_CLEAR_GPNVM => Self::ClearGpnvm { bit: argument },
            Self::OPCODE_GET_GPNVM => Self::GetGpnvm,
            _ => return Err(FaultCode::MalformedCommand),
        };
        Ok(Some(command))
    }
}

/// Visibility state of one flash page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    /// Reads return the last committed content.
    Readable,
    /// New content is staged and not yet visible.
    PendingWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
struct PendingWrite {
    page: u32,
    words: Vec<u32>,
    ready_at: u64,
}

/// Flash controller and committed array for one bank.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FlashController {
    bank: FlashBank,
    array: MemoryBank,
    mode: u32,
    error: bool,
    result: u32,
    boot_from_flash: bool,
    latch: Vec<Option<u32>>,
    pending: Option<PendingWrite>,
    write_latency: u64,
}

impl FlashController {
    /// Creates an erased bank whose page writes take `write_latency` cycles.
    #[must_use]
    pub fn new(bank: FlashBank, write_latency: u64) -> Self {
        let mut controller = Self {
            bank,
            array: MemoryBank::new(bank.base(), FLASH_BANK_BYTES, 0xFF),
            mode: MODE_RESET_VALUE,
            error: false,
            result: 0,
            boot_from_flash: false,
            latch: vec![None; FLASH_PAGE_WORDS],
            pending: None,
            write_latency,
        };
        controller.reset();
        controller
    }

    /// Bank served by this controller.
    #[must_use]
    pub const fn bank(&self) -> FlashBank {
        self.bank
    }

    /// Base address of this controller's register block.
    #[must_use]
    pub const fn register_base(&self) -> u32 {
        match self.bank {
            FlashBank::Bank0 => FLASH_CONTROLLER0_BASE,
            FlashBank::Bank1 => FLASH_CONTROLLER1_BASE,
        }
    }

    /// Returns `true` when `addr` is one of this controller's registers.
    #[must_use]
    pub const fn owns_register(&self, addr: u32) -> bool {
        let base = self.register_base();
        let last = match self.bank {
            FlashBank::Bank0 => FLASH_RESULT_OFFSET,
            FlashBank::Bank1 => FLASH_STATUS_OFFSET,
        };
        addr >= base && addr <= base + last
    }

    /// Boot-from-flash GPNVM bit (bank 0 only).
    #[must_use]
    pub const fn boot_from_flash(&self) -> bool {
        self.boot_from_flash
    }

    /// Cycle at which the in-flight operation completes, if any.
    #[must_use]
    pub fn ready_at(&self) -> Option<u64> {
        self.pending.as_ref().map(|pending| pending.ready_at)
    }

    /// Commits the in-flight page when `now` has reached its ready cycle.
    pub fn settle(&mut self, now: u64) {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|pending| now >= pending.ready_at);
        if !due {
            return;
        }
        if let Some(pending) = self.pending.take() {
            let page_base = self.bank.base() + pending.page * FLASH_PAGE_BYTES;
            for (index, word) in pending.words.iter().enumerate() {
                self.array
                    .write(page_base + 4 * index as u32, AccessWidth::Word, *word);
            }
            debug!(bank = ?self.bank, page = pending.page, now, "flash page committed");
        }
    }

    /// Returns `true` while an operation is in flight at `now`.
    pub fn is_busy(&mut self, now: u64) -> bool {
        self.settle(now);
        self.pending.is_some()
    }

    /// Visibility state of `page` at `now`.
    pub fn page_state(&mut self, page: u32, now: u64) -> PageState {
        self.settle(now);
        match &self.pending {
            Some(pending) if pending.page == page => PageState::PendingWrite,
            _ => PageState::Readable,
        }
    }

    /// CPU read from the bank array.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::FlashBusy`] while an operation is in flight.
    pub fn read_array(
        &mut self,
        addr: u32,
        width: AccessWidth,
        now: u64,
    ) -> Result<u32, FaultCode> {
        self.ensure_idle(now)?;
        Ok(self.array.read(addr, width))
    }

    /// CPU write into the bank array, which only fills the page latch.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::FlashBusy`] while an operation is in flight and
    /// [`FaultCode::BusFault`] for sub-word writes.
    pub fn write_array(
        &mut self,
        addr: u32,
        width: AccessWidth,
        value: u32,
        now: u64,
    ) -> Result<(), FaultCode> {
        self.ensure_idle(now)?;
        validate_flash_write_width(width)?;
        self.latch[((addr >> 2) as usize) % FLASH_PAGE_WORDS] = Some(value);
        Ok(())
    }

    /// Host image load straight into committed storage.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::FlashBusy`] while an operation is in flight.
    pub fn load_image(&mut self, addr: u32, data: &[u8], now: u64) -> Result<(), FaultCode> {
        self.ensure_idle(now)?;
        self.array.copy_from(addr, data);
        Ok(())
    }

    /// Host read of committed storage.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::FlashBusy`] while an operation is in flight.
    pub fn read_image(&mut self, addr: u32, len: usize, now: u64) -> Result<Vec<u8>, FaultCode> {
        self.ensure_idle(now)?;
        Ok(self.array.slice(addr, len).to_vec())
    }

    /// Applies controller reset: aborts any in-flight write and clears the latch.
    ///
    /// The committed array and the GPNVM bits are preserved.
    pub fn reset(&mut self) {
        self.mode = if self.boot_from_flash {
            0
        } else {
            MODE_RESET_VALUE
        };
        self.error = false;
        self.result = 0;
        self.latch.fill(None);
        self.pending = None;
    }

    fn ensure_idle(&mut self, now: u64) -> Result<(), FaultCode> {
        if self.is_busy(now) {
            Err(FaultCode::FlashBusy)
        } else {
            Ok(())
        }
    }

    fn execute(&mut self, command: FlashCommand, now: u64) {
        match command {
            FlashCommand::EraseWritePage { page } => self.start_erase_write(page, now),
            FlashCommand::SetGpnvm { .. } => {
                if self.bank == FlashBank::Bank0 {
                    self.boot_from_flash = true;
                }
            }
            FlashCommand::ClearGpnvm { .. } => {
                if self.bank == FlashBank::Bank0 {
                    self.boot_from_flash = false;
                }
            }
            FlashCommand::GetGpnvm => {
                if self.bank == FlashBank::Bank0 {
                    self.result = u32::from(self.boot_from_flash) << GPNVM_BOOT_FROM_FLASH;
                }
            }
        }
    }

    fn start_erase_write(&mut self, page: u32, now: u64) {
        let full = self.latch.iter().all(Option::is_some);
        let words = if full {
            self.latch.iter().map(|word| word.unwrap_or(ERASED_WORD)).collect()
        } else {
            vec![ERASED_WORD; FLASH_PAGE_WORDS]
        };
        self.latch.fill(None);
        let ready_at = now.saturating_add(self.write_latency);
        debug!(bank = ?self.bank, page, full, ready_at, "flash erase-and-write page started");
        self.pending = Some(PendingWrite {
            page,
            words,
            ready_at,
        });
    }
}

impl RegisterDevice for FlashController {
    fn read32(&mut self, addr: u32, now: u64) -> Result<u32, FaultCode> {
        self.settle(now);
        match (self.bank, addr - self.register_base()) {
            (_, FLASH_MODE_OFFSET) => Ok(self.mode),
            (_, FLASH_COMMAND_OFFSET) => Ok(0),
            (_, FLASH_STATUS_OFFSET) => {
                let ready = if self.pending.is_some() {
                    0
                } else {
                    FLASH_STATUS_READY
                };
                let error = if self.error { FLASH_STATUS_ERROR } else { 0 };
                self.error = false;
                Ok(ready | error)
            }
            (FlashBank::Bank0, FLASH_RESULT_OFFSET) => Ok(std::mem::take(&mut self.result)),
            _ => Err(FaultCode::BusFault),
        }
    }

    fn write32(&mut self, addr: u32, value: u32, now: u64) -> Result<(), FaultCode> {
        self.settle(now);
        match (self.bank, addr - self.register_base()) {
            (_, FLASH_MODE_OFFSET) => {
                if value & MODE_READY_INTERRUPT_ENABLE != 0 {
                    return Err(FaultCode::MalformedCommand);
                }
                self.mode = value & MODE_WRITABLE_BITS;
                Ok(())
            }
            (_, FLASH_COMMAND_OFFSET) => {
                self.ensure_idle(now)?;
                match FlashCommand::decode(value)? {
                    Some(command) => self.execute(command, now),
                    None => self.error = true,
                }
                Ok(())
            }
            (_, FLASH_STATUS_OFFSET) | (FlashBank::Bank0, FLASH_RESULT_OFFSET) => Ok(()),
            _ => Err(FaultCode::BusFault),
        }
    }
}
