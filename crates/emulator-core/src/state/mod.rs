//! Architectural CPU state and host-observable run state.

/// Core register file, status words and execution mode.
pub mod registers;
/// Host-observable run state.
pub mod run_state;

pub use registers::{
    itstate_from_xpsr, itstate_to_xpsr, ArchitecturalState, ExecutionMode, FrameRegisters,
    GeneralRegister, APSR_C, APSR_FLAGS_MASK, APSR_N, APSR_V, APSR_Z, CONTROL_NPRIV,
    CONTROL_SPSEL, GENERAL_REGISTER_COUNT, XPSR_IT_MASK, XPSR_T,
};
pub use run_state::RunState;
