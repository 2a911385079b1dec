//! The single arbiter of every transfer: CPU loads, stores and fetches, and
//! host image access.
//!
//! CPU transfers are checked in order: alignment, address decode, fetch
//! legality, MPU, then region policy (flash busy, register width, system
//! control privilege). Host transfers skip the MPU but still honour flash
//! busy windows.

use crate::api::{TraceEvent, TraceSink};
use crate::flash::FlashController;
use crate::memory::{
    decode_memory_region, validate_alignment, validate_fetch_access, validate_register_width,
    validate_system_control_privilege, AccessContext, AccessKind, AccessWidth, MemoryBank,
    MemoryRegion,
};
use crate::peripherals::{InputSource, Peripherals, RegisterDevice, KEYBOARD_DATA};
use crate::{Fault, FaultCode};

/// Borrowed view of every bus target for the duration of one step.
pub struct SystemBus<'a> {
    sram: &'a mut MemoryBank,
    peripherals: &'a mut Peripherals,
    now: u64,
    input: Option<&'a mut dyn InputSource>,
    trace: Option<&'a mut dyn TraceSink>,
}

impl<'a> SystemBus<'a> {
    /// Creates a bus over `sram` and `peripherals` at cycle `now`.
    pub fn new(sram: &'a mut MemoryBank, peripherals: &'a mut Peripherals, now: u64) -> Self {
        Self {
            sram,
            peripherals,
            now,
            input: None,
            trace: None,
        }
    }

    /// Attaches the host input source polled by keyboard DATA reads.
    #[must_use]
    pub fn with_input(mut self, input: &'a mut dyn InputSource) -> Self {
        self.input = Some(input);
        self
    }

    /// Attaches a sink receiving [`TraceEvent::MemoryAccess`] events.
    #[must_use]
    pub fn with_trace(mut self, trace: &'a mut dyn TraceSink) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Cycle at which transfers are evaluated.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Borrows the register devices.
    pub fn peripherals(&mut self) -> &mut Peripherals {
        self.peripherals
    }

    /// Emits an event to the attached sink, if any.
    pub fn emit(&mut self, event: TraceEvent) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.on_event(event);
        }
    }

    /// CPU load.
    ///
    /// # Errors
    ///
    /// Returns the fault raised by the first failing check, tagged with `addr`.
    pub fn read(&mut self, addr: u32, width: AccessWidth, context: AccessContext) -> Result<u32, Fault> {
        let value = self
            .transfer(addr, width, context, None)
            .map_err(|code| Fault::new(code, addr))?;
        if context.kind != AccessKind::Fetch {
            self.emit(TraceEvent::MemoryAccess {
                address: addr,
                width,
                kind: context.kind,
                value,
            });
        }
        Ok(value)
    }

    /// CPU store.
    ///
    /// # Errors
    ///
    /// Returns the fault raised by the first failing check, tagged with `addr`.
    pub fn write(
        &mut self,
        addr: u32,
        width: AccessWidth,
        value: u32,
        privileged: bool,
    ) -> Result<(), Fault> {
        let context = AccessContext::new(privileged, AccessKind::Write);
        let value = value & width.mask();
        self.transfer(addr, width, context, Some(value))
            .map_err(|code| Fault::new(code, addr))?;
        self.emit(TraceEvent::MemoryAccess {
            address: addr,
            width,
            kind: AccessKind::Write,
            value,
        });
        Ok(())
    }

    /// Fetches one native halfword.
    ///
    /// # Errors
    ///
    /// Returns the fetch fault tagged with `addr`.
    pub fn fetch_halfword(&mut self, addr: u32, privileged: bool) -> Result<u16, Fault> {
        let context = AccessContext::new(privileged, AccessKind::Fetch);
        self.read(addr, AccessWidth::Halfword, context)
            .map(|value| value as u16)
    }

    /// Fetches one bytecode byte.
    ///
    /// # Errors
    ///
    /// Returns the fetch fault tagged with `addr`.
    pub fn fetch_byte(&mut self, addr: u32, privileged: bool) -> Result<u8, Fault> {
        let context = AccessContext::new(privileged, AccessKind::Fetch);
        self.read(addr, AccessWidth::Byte, context)
            .map(|value| value as u8)
    }

    /// Host image write into SRAM or committed flash storage.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::BusFault`] when the range is not inside one storage
    /// region and [`FaultCode::FlashBusy`] when its flash bank is busy.
    pub fn host_write(&mut self, addr: u32, data: &[u8]) -> Result<(), Fault> {
        if data.is_empty() {
            return Ok(());
        }
        let region = storage_region(addr, data.len()).map_err(|code| Fault::new(code, addr))?;
        match region {
            MemoryRegion::Sram => {
                self.sram.copy_from(addr, data);
                Ok(())
            }
            _ => {
                let now = self.now;
                self.flash_controller(region)
                    .and_then(|controller| controller.load_image(addr, data, now))
                    .map_err(|code| Fault::new(code, addr))
            }
        }
    }

    /// Host read of SRAM or committed flash storage.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SystemBus::host_write`].
    pub fn host_read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Fault> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let region = storage_region(addr, len).map_err(|code| Fault::new(code, addr))?;
        match region {
            MemoryRegion::Sram => Ok(self.sram.slice(addr, len).to_vec()),
            _ => {
                let now = self.now;
                self.flash_controller(region)
                    .and_then(|controller| controller.read_image(addr, len, now))
                    .map_err(|code| Fault::new(code, addr))
            }
        }
    }

    fn transfer(
        &mut self,
        addr: u32,
        width: AccessWidth,
        context: AccessContext,
        store: Option<u32>,
    ) -> Result<u32, FaultCode> {
        validate_alignment(addr, width)?;
        let region = decode_memory_region(addr).ok_or(FaultCode::BusFault)?;
        if context.kind == AccessKind::Fetch {
            validate_fetch_access(region)?;
        }
        self.peripherals
            .mpu()
            .check(addr, context.privileged, context.kind)?;

        let now = self.now;
        match region {
            MemoryRegion::Sram => {
                if let Some(value) = store {
                    self.sram.write(addr, width, value);
                    Ok(0)
                } else {
                    Ok(self.sram.read(addr, width))
                }
            }
            MemoryRegion::Flash0 | MemoryRegion::Flash1 => {
                let controller = self.flash_controller(region)?;
                match store {
                    Some(value) => controller.write_array(addr, width, value, now).map(|()| 0),
                    None => controller.read_array(addr, width, now),
                }
            }
            MemoryRegion::SystemControl => {
                validate_system_control_privilege(context.privileged)?;
                self.register_transfer(addr, width, store)
            }
            MemoryRegion::Controllers => {
                if store.is_none() && addr == KEYBOARD_DATA {
                    self.poll_input();
                }
                self.register_transfer(addr, width, store)
            }
        }
    }

    fn register_transfer(
        &mut self,
        addr: u32,
        width: AccessWidth,
        store: Option<u32>,
    ) -> Result<u32, FaultCode> {
        validate_register_width(width)?;
        match store {
            Some(value) => self.peripherals.write32(addr, value, self.now).map(|()| 0),
            None => self.peripherals.read32(addr, self.now),
        }
    }

    fn poll_input(&mut self) {
        if self.peripherals.keyboard().is_pending() {
            return;
        }
        if let Some(event) = self.input.as_deref_mut().and_then(|input| input.poll()) {
            self.peripherals.keyboard_mut().latch(event);
        }
    }

    fn flash_controller(&mut self, region: MemoryRegion) -> Result<&mut FlashController, FaultCode> {
        let bank = region.flash_bank().ok_or(FaultCode::BusFault)?;
        Ok(self.peripherals.flash_mut(bank))
    }
}

fn storage_region(addr: u32, len: usize) -> Result<MemoryRegion, FaultCode> {
    let last = u32::try_from(len - 1)
        .ok()
        .and_then(|span| addr.checked_add(span))
        .ok_or(FaultCode::BusFault)?;
    match (decode_memory_region(addr), decode_memory_region(last)) {
        (Some(first), Some(end)) if first == end && first.is_storage() => Ok(first),
        _ => Err(FaultCode::BusFault),
    }
}

#[cfg(test)]
mod tests {
    use super::SystemBus;
    use crate::api::{TraceEvent, TraceSink};
    use crate::flash::{FlashCommand, FLASH_CONTROLLER1_BASE};
    use crate::memory::{
        AccessContext, AccessKind, AccessWidth, MemoryBank, FLASH0_START, FLASH1_START,
        SRAM_BYTES, SRAM_END, SRAM_START,
    };
    use crate::mpu::{MPU_CTRL, MPU_CTRL_ENABLE, MPU_CTRL_PRIVDEFENA};
    use crate::peripherals::{KeyEvent, Peripherals, ScriptedInput, KEYBOARD_DATA};
    use crate::{Fault, FaultCode};
    use rstest::rstest;

    const USER_READ: AccessContext = AccessContext::new(false, AccessKind::Read);

    fn fixture() -> (MemoryBank, Peripherals) {
        (MemoryBank::new(SRAM_START, SRAM_BYTES, 0), Peripherals::new(50))
    }

    #[derive(Default)]
    struct Recorder(Vec<TraceEvent>);

    impl TraceSink for Recorder {
        fn on_event(&mut self, event: TraceEvent) {
            self.0.push(event);
        }
    }

    #[rstest]
    #[case(0x0000_0000, AccessWidth::Word, FaultCode::BusFault)]
    #[case(0x6000_0000, AccessWidth::Byte, FaultCode::BusFault)]
    #[case(SRAM_START + 2, AccessWidth::Word, FaultCode::AlignmentFault)]
    #[case(0x400E_0A00, AccessWidth::Halfword, FaultCode::BusFault)]
    #[case(0xE000_ED00, AccessWidth::Word, FaultCode::BusFault)]
    fn unprivileged_reads_fault_with_address(
        #[case] addr: u32,
        #[case] width: AccessWidth,
        #[case] code: FaultCode,
    ) {
        let (mut sram, mut peripherals) = fixture();
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0);
        assert_eq!(bus.read(addr, width, USER_READ), Err(Fault::new(code, addr)));
    }

    #[test]
    fn sram_store_is_masked_to_width_and_traced() {
        let (mut sram, mut peripherals) = fixture();
        let mut recorder = Recorder::default();
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0).with_trace(&mut recorder);
        bus.write(SRAM_END - 4, AccessWidth::Word, 0xAABB_CCDD, false)
            .expect("store");
        bus.write(SRAM_END - 4, AccessWidth::Byte, 0x1_11, false)
            .expect("store");
        assert_eq!(
            bus.read(SRAM_END - 4, AccessWidth::Word, USER_READ),
            Ok(0xAABB_CC11)
        );
        assert_eq!(recorder.0.len(), 3);
        assert!(matches!(
            recorder.0[1],
            TraceEvent::MemoryAccess { value: 0x11, kind: AccessKind::Write, .. }
        ));
    }

    #[test]
    fn fetch_from_registers_is_a_bus_fault() {
        let (mut sram, mut peripherals) = fixture();
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0);
        assert_eq!(
            bus.fetch_halfword(0x400E_0A00, true),
            Err(Fault::new(FaultCode::BusFault, 0x400E_0A00))
        );
        assert_eq!(bus.fetch_byte(FLASH0_START, true), Ok(0xFF));
    }

    #[test]
    fn mpu_denies_before_region_policy() {
        let (mut sram, mut peripherals) = fixture();
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0);
        bus.write(MPU_CTRL, AccessWidth::Word, MPU_CTRL_ENABLE | MPU_CTRL_PRIVDEFENA, true)
            .expect("enable mpu");
        assert_eq!(
            bus.read(SRAM_START, AccessWidth::Word, USER_READ),
            Err(Fault::new(FaultCode::MpuViolation, SRAM_START))
        );
        assert_eq!(
            bus.read(SRAM_START, AccessWidth::Word, AccessContext::PRIVILEGED_READ),
            Ok(0)
        );
    }

    #[test]
    fn busy_bank_blocks_cpu_and_host_but_not_the_other_bank() {
        let (mut sram, mut peripherals) = fixture();
        {
            let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0);
            bus.write(
                FLASH_CONTROLLER1_BASE + 4,
                AccessWidth::Word,
                FlashCommand::EraseWritePage { page: 2 }.encode(),
                false,
            )
            .expect("command");
        }
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 49);
        assert_eq!(
            bus.read(FLASH1_START, AccessWidth::Word, USER_READ),
            Err(Fault::new(FaultCode::FlashBusy, FLASH1_START))
        );
        assert_eq!(
            bus.host_read(FLASH1_START + 0x1000, 4),
            Err(Fault::new(FaultCode::FlashBusy, FLASH1_START + 0x1000))
        );
        assert_eq!(bus.host_write(FLASH0_START, &[1, 2, 3, 4]), Ok(()));
        assert_eq!(bus.read(FLASH0_START, AccessWidth::Word, USER_READ), Ok(0x0403_0201));
    }

    #[test]
    fn host_ranges_must_stay_inside_one_storage_region() {
        let (mut sram, mut peripherals) = fixture();
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0);
        assert_eq!(
            bus.host_write(SRAM_END - 2, &[0; 4]),
            Err(Fault::new(FaultCode::BusFault, SRAM_END - 2))
        );
        assert_eq!(
            bus.host_read(0x400E_1400, 4),
            Err(Fault::new(FaultCode::BusFault, 0x400E_1400))
        );
        assert_eq!(bus.host_read(SRAM_START, 0), Ok(Vec::new()));
        assert_eq!(
            bus.host_read(0xFFFF_FFF0, 0x20),
            Err(Fault::new(FaultCode::BusFault, 0xFFFF_FFF0))
        );
    }

    #[test]
    fn keyboard_data_read_polls_input_when_idle() {
        let (mut sram, mut peripherals) = fixture();
        let mut input = ScriptedInput::new([KeyEvent::press(0x31), KeyEvent::release(0x31)]);
        let mut bus = SystemBus::new(&mut sram, &mut peripherals, 0).with_input(&mut input);
        let context = AccessContext::PRIVILEGED_READ;
        assert_eq!(bus.read(KEYBOARD_DATA, AccessWidth::Word, context), Ok(0x31));
        assert_eq!(bus.read(KEYBOARD_DATA, AccessWidth::Word, context), Ok(0xB1));
        assert_eq!(bus.read(KEYBOARD_DATA, AccessWidth::Word, context), Ok(0xB1));
    }
}
