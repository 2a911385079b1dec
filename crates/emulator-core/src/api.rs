//! Host-facing configuration, state, outcome, snapshot and trace types.

use crate::clock::{Clock, DEFAULT_CLOCK_HZ};
use crate::memory::{AccessKind, AccessWidth, MemoryBank, SRAM_BYTES, SRAM_START};
use crate::peripherals::{ExceptionNumber, Peripherals};
use crate::state::{ArchitecturalState, ExecutionMode, RunState};
use crate::Fault;

/// Default flash page write latency: 4 ms at the default clock.
pub const DEFAULT_FLASH_WRITE_LATENCY_CYCLES: u64 = 336_000;

/// Top-level immutable configuration for a machine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoreConfig {
    /// Core clock frequency in Hz.
    pub clock_hz: u64,
    /// Cycles between an erase-and-write command and the page commit.
    pub flash_write_latency_cycles: u64,
    /// Byte SRAM is filled with on power-on.
    pub sram_fill: u8,
    /// Emits a `tracing` event per retired instruction.
    pub trace_instructions: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            flash_write_latency_cycles: DEFAULT_FLASH_WRITE_LATENCY_CYCLES,
            sram_fill: 0,
            trace_instructions: false,
        }
    }
}

/// CPU-side state: architectural registers and run state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoreState {
    /// Architectural register state.
    pub arch: ArchitecturalState,
    /// Host-observable execution state.
    pub run_state: RunState,
}

/// Everything the emulated board owns. Every core operation borrows it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineState {
    /// CPU registers and run state.
    pub core: CoreState,
    /// On-chip SRAM.
    pub sram: MemoryBank,
    /// Flash controllers, keyboard, backup registers and system control space.
    pub peripherals: Peripherals,
    /// Cycle counter.
    pub clock: Clock,
}

impl MachineState {
    /// Creates power-on state for `config`.
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            core: CoreState::default(),
            sram: MemoryBank::new(SRAM_START, SRAM_BYTES, config.sram_fill),
            peripherals: Peripherals::new(config.flash_write_latency_cycles),
            clock: Clock::new(config.clock_hz),
        }
    }
}

/// Result of one `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// One instruction retired.
    Retired {
        /// Cycles consumed.
        cycles: u32,
    },
    /// An exception was taken instead of, or after, the instruction.
    ExceptionTaken {
        /// Exception entered.
        exception: ExceptionNumber,
        /// Fault that caused the exception, if any.
        fault: Option<Fault>,
        /// Cycles consumed including stacking.
        cycles: u32,
    },
    /// The core is stopped on a breakpoint.
    Halted {
        /// Cycles consumed; zero once already halted.
        cycles: u32,
    },
    /// The core is trapped on an unhandled fault.
    FaultLatched(Fault),
}

impl StepOutcome {
    /// Cycles consumed by this step.
    #[must_use]
    pub const fn cycles(self) -> u32 {
        match self {
            Self::Retired { cycles }
            | Self::ExceptionTaken { cycles, .. }
            | Self::Halted { cycles } => cycles,
            Self::FaultLatched(_) => 0,
        }
    }

    /// Returns `true` when further steps cannot make progress.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Halted { .. } | Self::FaultLatched(_))
    }
}

/// Why a `run` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunBoundary {
    /// The requested cycle budget was reached or crossed.
    CycleBudget,
    /// The core halted on a breakpoint.
    Halted,
    /// A fault was latched as the terminal trap.
    Fault,
}

/// Aggregated outcome of a `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Steps executed.
    pub steps: u32,
    /// Cycles consumed.
    pub cycles: u64,
    /// Last step-level status observed before returning.
    pub final_step: StepOutcome,
    /// Stop reason.
    pub boundary: RunBoundary,
}

/// Stable snapshot wire-version identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial schema.
    V1 = 1,
}

impl SnapshotVersion {
    /// Current schema revision.
    pub const CURRENT: Self = Self::V1;

    /// Converts wire value to known snapshot version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Full-state snapshot used for save states and replay fixtures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineSnapshot {
    /// Snapshot schema version.
    pub version: SnapshotVersion,
    /// Machine state at capture time.
    pub state: MachineState,
}

impl MachineSnapshot {
    /// Assembles a snapshot from a wire version and a decoded state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnsupportedVersion`] for unknown revisions and
    /// [`SnapshotError::SramLayout`] when the SRAM image does not match the map.
    pub fn from_parts(version: u16, state: MachineState) -> Result<Self, SnapshotError> {
        let version =
            SnapshotVersion::from_u16(version).ok_or(SnapshotError::UnsupportedVersion(version))?;
        let snapshot = Self { version, state };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks that the captured SRAM covers exactly the SRAM region.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::SramLayout`] on mismatch.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let sram = &self.state.sram;
        if sram.base() == SRAM_START && sram.len() == SRAM_BYTES as usize {
            Ok(())
        } else {
            Err(SnapshotError::SramLayout {
                base: sram.base(),
                len: sram.len(),
            })
        }
    }
}

/// Snapshot restore failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot was produced by an unsupported schema revision.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    /// The SRAM image does not match the memory map.
    #[error("sram image covers {len} bytes at {base:#010x}")]
    SramLayout {
        /// Image base address.
        base: u32,
        /// Image length.
        len: usize,
    },
}

/// Deterministic trace events emitted while stepping with a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// Before fetch.
    InstructionStart {
        /// Native or bytecode program counter.
        pc: u32,
        /// Interpreter consuming the instruction.
        mode: ExecutionMode,
    },
    /// After commit.
    InstructionRetired {
        /// Address of the retired instruction.
        pc: u32,
        /// Cycles consumed.
        cycles: u32,
    },
    /// One data load or store, in program order.
    MemoryAccess {
        /// Accessed address.
        address: u32,
        /// Transfer width.
        width: AccessWidth,
        /// Read or write.
        kind: AccessKind,
        /// Value read or written.
        value: u32,
    },
    /// Exception entry after stacking.
    ExceptionEntry {
        /// Exception entered.
        exception: ExceptionNumber,
        /// Stacked return address.
        return_address: u32,
    },
    /// Exception return after unstacking.
    ExceptionReturn {
        /// Exception left.
        exception: ExceptionNumber,
        /// Address execution resumes at.
        resume: u32,
    },
    /// A fault was raised, whether or not a handler takes it.
    FaultRaised {
        /// Fault kind and address.
        fault: Fault,
        /// Instruction address.
        pc: u32,
    },
}

/// Sink trait for deterministic trace hooks.
pub trait TraceSink {
    /// Records an event in execution order.
    fn on_event(&mut self, event: TraceEvent);
}

impl TraceSink for Vec<TraceEvent> {
    fn on_event(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CoreConfig, MachineSnapshot, MachineState, SnapshotError, SnapshotVersion, StepOutcome,
        DEFAULT_FLASH_WRITE_LATENCY_CYCLES,
    };
    use crate::memory::{MemoryBank, SRAM_START};
    use crate::clock::Clock;
    use crate::{Fault, FaultCode, RunState};

    #[test]
    fn default_config_models_a_4ms_page_write_at_84mhz() {
        let config = CoreConfig::default();
        let clock = Clock::new(config.clock_hz);
        assert_eq!(config.flash_write_latency_cycles, DEFAULT_FLASH_WRITE_LATENCY_CYCLES);
        assert_eq!(clock.millis_from_cycles(config.flash_write_latency_cycles), 4);
        assert!(!config.trace_instructions);
    }

    #[test]
    fn power_on_state_is_running_with_filled_sram() {
        let config = CoreConfig {
            sram_fill: 0xA5,
            ..CoreConfig::default()
        };
        let state = MachineState::new(&config);
        assert_eq!(state.core.run_state, RunState::Running);
        assert!(state.sram.slice(0x2007_0000, 4).iter().all(|&byte| byte == 0xA5));
        assert_eq!(state.clock.now(), 0);
    }

    #[test]
    fn step_outcome_cycle_accounting() {
        let fault = Fault::new(FaultCode::BusFault, 0);
        assert_eq!(StepOutcome::Retired { cycles: 3 }.cycles(), 3);
        assert_eq!(StepOutcome::FaultLatched(fault).cycles(), 0);
        assert!(StepOutcome::Halted { cycles: 0 }.is_stopped());
        assert!(!StepOutcome::Retired { cycles: 1 }.is_stopped());
    }

    #[test]
    fn snapshot_parts_are_validated() {
        let state = MachineState::new(&CoreConfig::default());
        assert!(MachineSnapshot::from_parts(1, state.clone()).is_ok());
        assert_eq!(
            MachineSnapshot::from_parts(7, state.clone()),
            Err(SnapshotError::UnsupportedVersion(7))
        );
        let mut shrunk = state;
        shrunk.sram = MemoryBank::new(SRAM_START, 16, 0);
        assert_eq!(
            MachineSnapshot::from_parts(1, shrunk),
            Err(SnapshotError::SramLayout {
                base: SRAM_START,
                len: 16
            })
        );
    }

    #[test]
    fn snapshot_version_wire_values() {
        assert_eq!(SnapshotVersion::from_u16(1), Some(SnapshotVersion::V1));
        assert_eq!(SnapshotVersion::from_u16(2), None);
        assert_eq!(SnapshotVersion::CURRENT.as_u16(), 1);
    }
}
