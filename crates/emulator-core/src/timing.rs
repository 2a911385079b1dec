/// Native, bytecode and exception forms that have fixed cycle costs in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// `NOP` and other hints.
    Nop,
    /// Register/immediate move, including `MOVW`/`MOVT`.
    Mov,
    /// Add/sub/logic/shift/compare class.
    Alu,
    /// 32-bit multiply.
    Mul,
    /// Unsigned divide.
    Div,
    /// Single load.
    Load,
    /// Single store.
    Store,
    /// Base cost of `PUSH`/`POP`; one extra cycle per transferred register.
    StackMultiple,
    /// Conditional branch whose predicate is false, including `CBZ`/`CBNZ`.
    BranchNotTaken,
    /// Taken branch.
    BranchTaken,
    /// `BL`/`BLX` call.
    Call,
    /// Special register transfer (`MRS`/`MSR`).
    SpecialRegister,
    /// Supervisor call issue.
    Svc,
    /// Breakpoint halt.
    Breakpoint,
    /// Exception entry (stacking and vector fetch).
    ExceptionEntry,
    /// Exception return (unstacking).
    ExceptionReturn,
    /// Switch between native and bytecode execution.
    Interwork,
    /// Bytecode constant push, stack op or arithmetic.
    BytecodeSimple,
    /// Bytecode frame slot or memory access.
    BytecodeMemory,
    /// Bytecode jump or conditional jump.
    BytecodeBranch,
    /// Bytecode `fn` frame setup.
    BytecodeFrame,
    /// Bytecode `call`/`callr`/`calld`/`blx`.
    BytecodeCall,
    /// Bytecode `ret`/`retv`.
    BytecodeReturn,
}

/// Single source-of-truth cycle-cost table.
pub const CYCLE_COST_TABLE: &[(CycleCostKind, u16)] = &[
    (CycleCostKind::Nop, 1),
    (CycleCostKind::Mov, 1),
    (CycleCostKind::Alu, 1),
    (CycleCostKind::Mul, 1),
    (CycleCostKind::Div, 6),
    (CycleCostKind::Load, 2),
    (CycleCostKind::Store, 2),
    (CycleCostKind::StackMultiple, 1),
    (CycleCostKind::BranchNotTaken, 1),
    (CycleCostKind::BranchTaken, 3),
    (CycleCostKind::Call, 4),
    (CycleCostKind::SpecialRegister, 2),
    (CycleCostKind::Svc, 1),
    (CycleCostKind::Breakpoint, 1),
    (CycleCostKind::ExceptionEntry, 12),
    (CycleCostKind::ExceptionReturn, 10),
    (CycleCostKind::Interwork, 8),
    (CycleCostKind::BytecodeSimple, 6),
    (CycleCostKind::BytecodeMemory, 8),
    (CycleCostKind::BytecodeBranch, 8),
    (CycleCostKind::BytecodeFrame, 14),
    (CycleCostKind::BytecodeCall, 12),
    (CycleCostKind::BytecodeReturn, 14),
];

/// Looks up the cycle cost for a cycle-cost kind.
#[must_use]
pub fn cycle_cost(kind: CycleCostKind) -> Option<u16> {
    CYCLE_COST_TABLE
        .iter()
        .find_map(|(entry_kind, cycles)| (*entry_kind == kind).then_some(*cycles))
}

/// Looks up a cycle cost, falling back to one cycle for kinds absent from the table.
#[must_use]
pub fn cycles_for(kind: CycleCostKind) -> u32 {
    cycle_cost(kind).map_or(1, u32::from)
}
