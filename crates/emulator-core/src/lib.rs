//! Core emulator crate for a Cortex-M3 class microcontroller board.
//!
//! The board pairs a Thumb-subset CPU with a stack bytecode interpreter that
//! shares its registers and memory map. [`Machine`] is the host entry point;
//! the lower-level modules are public so tools and tests can drive a single
//! step against hand-built state.

/// Memory model primitives, the fixed board map and the system bus.
pub mod memory;
pub use memory::{
    decode_memory_region, validate_alignment, validate_fetch_access, AccessContext, AccessKind,
    AccessWidth, FlashBank, MemoryBank, MemoryRegion, RegionDescriptor, SystemBus,
    FIXED_MEMORY_REGIONS, FLASH0_END, FLASH0_START, FLASH1_END, FLASH1_START, FLASH_BANK_BYTES,
    FLASH_PAGE_BYTES, SRAM_BYTES, SRAM_END, SRAM_START,
};

/// Host-facing API contract and integration types.
pub mod api;
pub use api::{
    CoreConfig, CoreState, MachineSnapshot, MachineState, RunBoundary, RunOutcome,
    SnapshotError, SnapshotVersion, StepOutcome, TraceEvent, TraceSink,
    DEFAULT_FLASH_WRITE_LATENCY_CYCLES,
};

/// Architectural CPU state model primitives.
pub mod state;
pub use state::{
    ArchitecturalState, ExecutionMode, FrameRegisters, GeneralRegister, RunState,
    GENERAL_REGISTER_COUNT,
};

/// Thumb instruction decoding.
pub mod decoder;
pub use decoder::{DecodedOrFault, Decoder, Instruction};

/// Fault taxonomy shared by every layer.
pub mod fault;
pub use fault::{Fault, FaultClass, FaultCode};

/// Deterministic instruction cycle-cost table and lookup helpers.
pub mod timing;
pub use timing::{cycle_cost, cycles_for, CycleCostKind, CYCLE_COST_TABLE};

/// Board clock.
pub mod clock;
pub use clock::{Clock, DEFAULT_CLOCK_HZ};

/// Flash bank controllers.
pub mod flash;
pub use flash::{FlashCommand, FlashController, PageState};

/// Memory protection unit.
pub mod mpu;
pub use mpu::{cover_registers, Mpu, MpuRegion};

/// Memory-mapped register devices.
pub mod peripherals;
pub use peripherals::{InputSource, KeyEvent, Peripherals, ScriptedInput};

/// Native instruction execution, exceptions and the step pipeline.
pub mod execute;
pub use execute::{
    commit_execution, execute_instruction, step_one, ExecuteOutcome, ExecuteState, FlagsUpdate,
    BYTECODE_RETURN,
};

/// Stack bytecode interpreter.
pub mod bytecode;
pub use bytecode::{BytecodeInstruction, Opcode};

/// Host-driven machine.
pub mod machine;
pub use machine::Machine;

/// T8 toy machine.
pub mod t8;
pub use t8::{T8Machine, T8Opcode, T8Outcome, T8Stop};

#[cfg(test)]
use proptest as _;
