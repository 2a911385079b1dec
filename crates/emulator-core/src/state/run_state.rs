use crate::{Fault, FaultCode};

/// Host-observable execution state of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Ready to execute the next instruction.
    #[default]
    Running,
    /// Stopped on a breakpoint; `reset()` resumes.
    Halted,
    /// Terminal trap: the fault had no usable handler.
    FaultLatched(Fault),
}

impl RunState {
    /// Returns the latched fault, if the core is trapped.
    #[must_use]
    pub const fn latched_fault(self) -> Option<Fault> {
        match self {
            Self::FaultLatched(fault) => Some(fault),
            Self::Running | Self::Halted => None,
        }
    }

    /// Kind of the latched fault, if the core is trapped.
    #[must_use]
    pub const fn latched_code(self) -> Option<FaultCode> {
        match self {
            Self::FaultLatched(fault) => Some(fault.code),
            Self::Running | Self::Halted => None,
        }
    }

    /// Returns `true` when the core can retire instructions.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}
