//! Host-facing machine: owns the board state and drives it step by step.
//!
//! A new machine is powered on but not reset. Load an image with
//! [`Machine::write_memory`] first, then call [`Machine::reset`] to fetch the
//! initial stack pointer and entry point from the vector table.

use std::fmt;

use crate::api::{
    CoreConfig, MachineSnapshot, MachineState, RunBoundary, RunOutcome, SnapshotError,
    SnapshotVersion, StepOutcome, TraceSink,
};
use crate::execute::{latch_fault, reset_core, step_one};
use crate::memory::SystemBus;
use crate::mpu::Mpu;
use crate::peripherals::{InputSource, KeyEvent, Peripherals};
use crate::state::{ArchitecturalState, RunState};
use crate::{Fault, FaultCode};

/// An emulated board.
pub struct Machine {
    config: CoreConfig,
    state: MachineState,
    input: Option<Box<dyn InputSource>>,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("input", &self.input.is_some())
            .finish()
    }
}

impl Machine {
    /// Powers a board on with `config`.
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        let state = MachineState::new(&config);
        Self {
            config,
            state,
            input: None,
        }
    }

    /// Powers a board on with a host input source attached to the keyboard.
    #[must_use]
    pub fn with_input<S: InputSource + 'static>(config: CoreConfig, source: S) -> Self {
        let mut machine = Self::new(config);
        machine.set_input_source(source);
        machine
    }

    /// Configuration the machine was built with.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Replaces the source polled when a program reads an empty keyboard.
    pub fn set_input_source<S: InputSource + 'static>(&mut self, source: S) {
        self.input = Some(Box::new(source));
    }

    /// Detaches the input source.
    pub fn clear_input_source(&mut self) {
        self.input = None;
    }

    /// Applies system reset and loads SP and PC from the vector table.
    ///
    /// SRAM, flash arrays, GPNVM bits and backup registers survive. A vector
    /// table that cannot be read latches the fault.
    ///
    /// # Errors
    ///
    /// Returns the latched fault.
    pub fn reset(&mut self) -> Result<(), Fault> {
        let MachineState {
            core,
            sram,
            peripherals,
            clock,
        } = &mut self.state;
        peripherals.reset();
        let mut bus = SystemBus::new(sram, peripherals, clock.now());
        reset_core(core, &mut bus).map_err(|fault| {
            latch_fault(core, fault);
            fault
        })
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> StepOutcome {
        self.step_with(None)
    }

    /// Executes one instruction, reporting events to `sink`.
    pub fn step_traced(&mut self, sink: &mut dyn TraceSink) -> StepOutcome {
        self.step_with(Some(sink))
    }

    /// Runs until `cycles` have been consumed or the core stops.
    pub fn run(&mut self, cycles: u64) -> RunOutcome {
        self.run_with(cycles, None)
    }

    /// Like [`Machine::run`], reporting events to `sink`.
    pub fn run_traced(&mut self, cycles: u64, sink: &mut dyn TraceSink) -> RunOutcome {
        self.run_with(cycles, Some(sink))
    }

    fn step_with(&mut self, trace: Option<&mut (dyn TraceSink + '_)>) -> StepOutcome {
        let MachineState {
            core,
            sram,
            peripherals,
            clock,
        } = &mut self.state;
        peripherals.keyboard_mut().latch_queued();
        let mut bus = SystemBus::new(sram, peripherals, clock.now());
        if let Some(input) = self.input.as_deref_mut() {
            bus = bus.with_input(input);
        }
        if let Some(trace) = trace {
            bus = bus.with_trace(trace);
        }
        let outcome = step_one(core, &mut bus, &self.config);
        let cycles = u64::from(outcome.cycles());
        clock.advance(cycles);
        peripherals.advance(cycles);
        outcome
    }

    fn run_with(
        &mut self,
        budget: u64,
        mut trace: Option<&mut (dyn TraceSink + '_)>,
    ) -> RunOutcome {
        let mut steps = 0;
        let mut cycles = 0;
        let mut final_step = StepOutcome::Retired { cycles: 0 };
        let boundary = loop {
            match self.state.core.run_state {
                RunState::Halted => {
                    if steps == 0 {
                        final_step = StepOutcome::Halted { cycles: 0 };
                    }
                    break RunBoundary::Halted;
                }
                RunState::FaultLatched(fault) => {
                    if steps == 0 {
                        final_step = StepOutcome::FaultLatched(fault);
                    }
                    break RunBoundary::Fault;
                }
                RunState::Running if cycles >= budget => break RunBoundary::CycleBudget,
                RunState::Running => {}
            }
            final_step = self.step_with(trace.as_deref_mut());
            steps += 1;
            cycles += u64::from(final_step.cycles());
        };
        RunOutcome {
            steps,
            cycles,
            final_step,
            boundary,
        }
    }

    /// Current cycle count.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.state.clock.now()
    }

    /// Lets `cycles` pass without executing instructions.
    pub fn advance_clock(&mut self, cycles: u64) {
        self.state.clock.advance(cycles);
        self.state.peripherals.advance(cycles);
    }

    /// Writes an image into SRAM or flash storage, bypassing the MPU.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::BusFault`] outside storage and
    /// [`FaultCode::FlashBusy`] on a busy bank.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), Fault> {
        let now = self.now();
        let MachineState {
            sram, peripherals, ..
        } = &mut self.state;
        SystemBus::new(sram, peripherals, now).host_write(addr, data)
    }

    /// Reads `len` bytes of SRAM or flash storage, bypassing the MPU.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Machine::write_memory`].
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Fault> {
        let now = self.now();
        let MachineState {
            sram, peripherals, ..
        } = &mut self.state;
        SystemBus::new(sram, peripherals, now).host_read(addr, len)
    }

    /// Injects a key edge, latched at the next step boundary.
    pub fn key_event(&mut self, code: u8, pressed: bool) {
        let event = if pressed {
            KeyEvent::press(code)
        } else {
            KeyEvent::release(code)
        };
        self.state.peripherals.keyboard_mut().queue(event);
    }

    /// Host-observable execution state.
    #[must_use]
    pub const fn run_state(&self) -> RunState {
        self.state.core.run_state
    }

    /// Latched terminal fault, if any.
    #[must_use]
    pub const fn fault(&self) -> Option<Fault> {
        self.state.core.run_state.latched_fault()
    }

    /// Kind of the latched fault, if any.
    #[must_use]
    pub const fn fault_kind(&self) -> Option<FaultCode> {
        self.state.core.run_state.latched_code()
    }

    /// Address of the latched fault, if any.
    #[must_use]
    pub fn fault_address(&self) -> Option<u32> {
        self.fault().map(|fault| fault.address)
    }

    /// Architectural registers.
    #[must_use]
    pub const fn state(&self) -> &ArchitecturalState {
        &self.state.core.arch
    }

    /// Register devices.
    #[must_use]
    pub const fn peripherals(&self) -> &Peripherals {
        &self.state.peripherals
    }

    /// Memory protection unit.
    #[must_use]
    pub const fn mpu(&self) -> &Mpu {
        self.state.peripherals.mpu()
    }

    /// Programs the MPU regions to permit exactly `[begin, end)`.
    ///
    /// # Errors
    ///
    /// Propagates MPU register faults.
    pub fn cover(&mut self, begin: u32, end: u32) -> Result<(), FaultCode> {
        self.state.peripherals.mpu_mut().cover(begin, end)
    }

    /// Captures the full machine state.
    #[must_use]
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            state: self.state.clone(),
        }
    }

    /// Replaces the machine state with a snapshot. The input source is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::SramLayout`] when the snapshot's SRAM does not
    /// match the memory map; the machine is left unchanged.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        snapshot.validate()?;
        self.state = snapshot.state.clone();
        Ok(())
    }
}
