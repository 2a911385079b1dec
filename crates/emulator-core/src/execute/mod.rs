//! Instruction execution pipeline.
//!
//! Each step fetches and decodes one instruction, executes it into an
//! [`ExecuteState`] accumulator and commits the accumulated register, flag
//! and PC updates only when execution succeeds. Stores reach the bus during
//! execution; a faulting instruction leaves registers, flags and PC intact.

pub mod exception;
mod flags;
mod helpers;
pub mod it_block;

pub use exception::{
    exception_return, is_exc_return, latch_fault, raise_fault, reset_core, supervisor_call,
    take_exception, FaultSite, EXC_RETURN_HANDLER, EXC_RETURN_THREAD_MSP, EXC_RETURN_THREAD_PSP,
};
pub use flags::FlagsUpdate;
pub use helpers::{add_with_carry, align4, offset_address, shift_left, shift_right, sub_with_flags};
pub use it_block::ItState;

use tracing::trace;

use crate::api::{CoreConfig, CoreState, StepOutcome, TraceEvent};
use crate::decoder::{DataOp, Decoder, Instruction, LoadStoreOp, ShiftOp, SpecialRegister};
use crate::memory::{AccessContext, AccessKind, AccessWidth, SystemBus};
use crate::state::{
    ExecutionMode, FrameRegisters, GeneralRegister, APSR_C, APSR_N, APSR_V, APSR_Z,
    CONTROL_NPRIV, CONTROL_SPSEL, GENERAL_REGISTER_COUNT,
};
use crate::timing::{cycles_for, CycleCostKind};
use crate::{Fault, FaultCode, RunState};

/// Magic LR value a native function called by bytecode `blx` returns through.
pub const BYTECODE_RETURN: u32 = 0xFFFF_FFE1;

/// Outcome of executing a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Commit and retire.
    Retired,
    /// Breakpoint: stop with PC at the instruction.
    Halted,
    /// Commit, then take SVCall.
    SupervisorCall,
    /// Commit, then unstack the exception frame selected by `exc_return`.
    ExceptionReturn {
        /// EXC_RETURN value the branch loaded.
        exc_return: u32,
    },
    /// Discard, then route the fault.
    Fault {
        /// The fault raised.
        fault: Fault,
        /// Where in the pipeline it was raised.
        site: FaultSite,
    },
}

/// Side effects accumulated during execution, applied by [`commit_execution`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecuteState {
    /// Pending core register writes, indexed by encoding. `PC` goes through `next_pc`.
    pub registers: [Option<u32>; GENERAL_REGISTER_COUNT],
    /// APSR update.
    pub flags_update: FlagsUpdate,
    /// Address of the next instruction.
    pub next_pc: u32,
    /// Interpreter switch.
    pub mode: Option<ExecutionMode>,
    /// Bytecode frame register update.
    pub frame: Option<FrameRegisters>,
    /// Special register write from `MSR`.
    pub special: Option<(SpecialRegister, u32)>,
    /// ITSTATE for the next instruction, when this one changes it.
    pub itstate: Option<ItState>,
    /// Cycle cost.
    pub cycles: u32,
}

impl ExecuteState {
    /// Creates a new execute state that falls through to `next_pc`.
    #[must_use]
    pub fn new(cycles: u32, next_pc: u32) -> Self {
        Self {
            cycles,
            next_pc,
            ..Self::default()
        }
    }

    /// Queues a register write.
    pub fn set(&mut self, reg: GeneralRegister, value: u32) {
        if reg == GeneralRegister::Pc {
            self.next_pc = value;
        } else {
            self.registers[reg.index()] = Some(value);
        }
    }

    /// Value a register will hold after commit.
    #[must_use]
    pub fn pending(&self, core: &CoreState, reg: GeneralRegister) -> u32 {
        self.registers[reg.index()].unwrap_or_else(|| core.arch.reg(reg))
    }

    /// Redirects control flow and charges `kind` instead of the base cost.
    pub fn branch(&mut self, target: u32, kind: CycleCostKind) {
        self.next_pc = target;
        self.cycles = cycles_for(kind);
    }
}

/// Applies an accumulated execute state to the core.
pub fn commit_execution(core: &mut CoreState, exec: &ExecuteState) {
    let arch = &mut core.arch;
    for reg in GeneralRegister::ALL {
        if let Some(value) = exec.registers[reg.index()] {
            if reg != GeneralRegister::Pc {
                arch.set_reg(reg, value);
            }
        }
    }
    exec.flags_update.apply(arch);
    if let Some((register, value)) = exec.special {
        match register {
            SpecialRegister::Msp => arch.set_msp(value),
            SpecialRegister::Psp => arch.set_psp(value),
            SpecialRegister::Primask => arch.set_primask(value),
            SpecialRegister::Control => arch.set_control(value),
        }
    }
    if let Some(mode) = exec.mode {
        arch.set_mode(mode);
    }
    if let Some(frame) = exec.frame {
        arch.set_frame(frame);
    }
    if let Some(itstate) = exec.itstate {
        arch.set_itstate(itstate.bits());
    }
    arch.set_pc(exec.next_pc);
}

/// Executes one instruction at the current PC, in either interpreter.
pub fn step_one(core: &mut CoreState, bus: &mut SystemBus<'_>, config: &CoreConfig) -> StepOutcome {
    match core.run_state {
        RunState::FaultLatched(fault) => return StepOutcome::FaultLatched(fault),
        RunState::Halted => return StepOutcome::Halted { cycles: 0 },
        RunState::Running => {}
    }

    let pc = core.arch.pc();
    let mode = core.arch.mode();
    bus.emit(TraceEvent::InstructionStart { pc, mode });
    let (outcome, exec) = match mode {
        ExecutionMode::Native => fetch_and_execute(core, bus, pc),
        ExecutionMode::Bytecode => crate::bytecode::fetch_and_execute(core, bus, pc),
    };

    match outcome {
        ExecuteOutcome::Retired => {
            commit_execution(core, &exec);
            retire(bus, config, pc, exec.cycles)
        }
        ExecuteOutcome::Halted => {
            core.run_state = RunState::Halted;
            StepOutcome::Halted {
                cycles: exec.cycles,
            }
        }
        ExecuteOutcome::SupervisorCall => {
            commit_execution(core, &exec);
            supervisor_call(core, bus, exec.next_pc, exec.cycles)
        }
        ExecuteOutcome::ExceptionReturn { exc_return } => {
            commit_execution(core, &exec);
            match exception_return(core, bus, exc_return) {
                Ok(cycles) => retire(bus, config, pc, exec.cycles + cycles),
                Err(fault) => raise_fault(core, bus, fault, FaultSite::Data, pc),
            }
        }
        ExecuteOutcome::Fault { fault, site } => raise_fault(core, bus, fault, site, pc),
    }
}

fn retire(bus: &mut SystemBus<'_>, config: &CoreConfig, pc: u32, cycles: u32) -> StepOutcome {
    if config.trace_instructions {
        trace!(pc, cycles, "retired");
    }
    bus.emit(TraceEvent::InstructionRetired { pc, cycles });
    StepOutcome::Retired { cycles }
}

fn fetch_and_execute(
    core: &CoreState,
    bus: &mut SystemBus<'_>,
    pc: u32,
) -> (ExecuteOutcome, ExecuteState) {
    let instruction = match fetch_and_decode(core, bus, pc) {
        Ok(instruction) => instruction,
        Err((fault, site)) => return (ExecuteOutcome::Fault { fault, site }, ExecuteState::default()),
    };
    let it = ItState::new(core.arch.itstate());
    if !it.is_active() {
        return execute_instruction(instruction, pc, core, bus);
    }
    if !it.permits(instruction) {
        return (undefined(pc), ExecuteState::default());
    }
    let arch = &core.arch;
    let passed = it.condition().is_none_or(|cond| {
        cond.holds(
            arch.flag(APSR_N),
            arch.flag(APSR_Z),
            arch.flag(APSR_C),
            arch.flag(APSR_V),
        )
    });
    if !passed {
        let mut skipped = ExecuteState::new(
            cycles_for(CycleCostKind::Nop),
            pc.wrapping_add(instruction.size()),
        );
        skipped.itstate = Some(it.advance());
        return (ExecuteOutcome::Retired, skipped);
    }
    let (outcome, mut exec) = execute_instruction(instruction, pc, core, bus);
    if it_block::flags_suppressed(instruction) {
        exec.flags_update = FlagsUpdate::None;
    }
    exec.itstate = Some(it.advance());
    (outcome, exec)
}

const fn undefined(pc: u32) -> ExecuteOutcome {
    ExecuteOutcome::Fault {
        fault: Fault::new(FaultCode::UndefinedInstruction, pc),
        site: FaultSite::Instruction,
    }
}

fn fetch_and_decode(
    core: &CoreState,
    bus: &mut SystemBus<'_>,
    pc: u32,
) -> Result<Instruction, (Fault, FaultSite)> {
    let privileged = core.arch.is_privileged();
    let hw1 = bus
        .fetch_halfword(pc, privileged)
        .map_err(|fault| (fault, FaultSite::Fetch))?;
    let hw2 = if Decoder::is_wide(hw1) {
        bus.fetch_halfword(pc.wrapping_add(2), privileged)
            .map_err(|fault| (fault, FaultSite::Fetch))?
    } else {
        0
    };
    Result::<Instruction, FaultCode>::from(Decoder::decode(hw1, hw2))
        .map_err(|code| (Fault::new(code, pc), FaultSite::Instruction))
}

const fn width_of(op: LoadStoreOp) -> AccessWidth {
    match op.bytes() {
        1 => AccessWidth::Byte,
        2 => AccessWidth::Halfword,
        _ => AccessWidth::Word,
    }
}

fn data_fault(fault: Fault) -> ExecuteOutcome {
    ExecuteOutcome::Fault {
        fault,
        site: FaultSite::Data,
    }
}

/// Executes a decoded native instruction located at `pc`.
pub fn execute_instruction(
    instr: Instruction,
    pc: u32,
    core: &CoreState,
    bus: &mut SystemBus<'_>,
) -> (ExecuteOutcome, ExecuteState) {
    let next_pc = pc.wrapping_add(instr.size());
    let mut exec = ExecuteState::new(cycles_for(CycleCostKind::Alu), next_pc);
    let outcome = match execute_into(instr, pc, core, bus, &mut exec) {
        Ok(outcome) | Err(outcome) => outcome,
    };
    (outcome, exec)
}

#[allow(clippy::too_many_lines)]
fn execute_into(
    instr: Instruction,
    pc: u32,
    core: &CoreState,
    bus: &mut SystemBus<'_>,
    exec: &mut ExecuteState,
) -> Result<ExecuteOutcome, ExecuteOutcome> {
    let arch = &core.arch;
    let privileged = arch.is_privileged();
    let read = |reg: GeneralRegister| {
        if reg == GeneralRegister::Pc {
            pc.wrapping_add(4)
        } else {
            arch.reg(reg)
        }
    };
    let carry = arch.flag(APSR_C);

    match instr {
        Instruction::ShiftImm { op, rd, rm, imm5 } => {
            let (result, carry_out) = match op {
                ShiftOp::Lsl => shift_left(read(rm), u32::from(imm5), carry),
                ShiftOp::Lsr => {
                    let amount = if imm5 == 0 { 32 } else { u32::from(imm5) };
                    shift_right(read(rm), amount, carry)
                }
            };
            exec.set(rd, result);
            exec.flags_update = FlagsUpdate::nzc(result, carry_out);
        }
        Instruction::AddReg { rd, rn, rm } => add(exec, rd, read(rn), read(rm)),
        Instruction::SubReg { rd, rn, rm } => sub(exec, Some(rd), read(rn), read(rm)),
        Instruction::AddImm3 { rd, rn, imm3 } => add(exec, rd, read(rn), u32::from(imm3)),
        Instruction::SubImm3 { rd, rn, imm3 } => sub(exec, Some(rd), read(rn), u32::from(imm3)),
        Instruction::AddImm8 { rdn, imm8 } => add(exec, rdn, read(rdn), u32::from(imm8)),
        Instruction::SubImm8 { rdn, imm8 } => sub(exec, Some(rdn), read(rdn), u32::from(imm8)),
        Instruction::CmpImm { rn, imm8 } => sub(exec, None, read(rn), u32::from(imm8)),
        Instruction::MovImm { rd, imm8 } => {
            exec.set(rd, u32::from(imm8));
            exec.flags_update = FlagsUpdate::nz(u32::from(imm8));
            exec.cycles = cycles_for(CycleCostKind::Mov);
        }
        Instruction::DataProc { op, rdn, rm } => {
            let (x, y) = (read(rdn), read(rm));
            match op {
                DataOp::And => logical(exec, Some(rdn), x & y),
                DataOp::Eor => logical(exec, Some(rdn), x ^ y),
                DataOp::Orr => logical(exec, Some(rdn), x | y),
                DataOp::Mvn => logical(exec, Some(rdn), !y),
                DataOp::Tst => logical(exec, None, x & y),
                DataOp::Cmp => sub(exec, None, x, y),
                DataOp::Mul => {
                    logical(exec, Some(rdn), x.wrapping_mul(y));
                    exec.cycles = cycles_for(CycleCostKind::Mul);
                }
                DataOp::Lsl | DataOp::Lsr => {
                    let amount = y & 0xFF;
                    let (result, carry_out) = if op == DataOp::Lsl {
                        shift_left(x, amount, carry)
                    } else {
                        shift_right(x, amount, carry)
                    };
                    exec.set(rdn, result);
                    exec.flags_update = FlagsUpdate::nzc(result, carry_out);
                }
            }
        }
        Instruction::AddHigh { rdn, rm } => {
            let result = read(rdn).wrapping_add(read(rm));
            write_or_branch(exec, rdn, result);
        }
        Instruction::CmpHigh { rn, rm } => sub(exec, None, read(rn), read(rm)),
        Instruction::MovHigh { rd, rm } => {
            exec.cycles = cycles_for(CycleCostKind::Mov);
            write_or_branch(exec, rd, read(rm));
        }
        Instruction::Bx { rm } => return interwork(core, bus, exec, read(rm), pc, true),
        Instruction::Blx { rm } => {
            exec.set(GeneralRegister::Lr, exec.next_pc | 1);
            let outcome = interwork(core, bus, exec, read(rm), pc, false)?;
            exec.cycles = exec.cycles.max(cycles_for(CycleCostKind::Call));
            return Ok(outcome);
        }
        Instruction::LdrLiteral { rt, offset } => {
            let addr = align4(pc.wrapping_add(4)).wrapping_add(u32::from(offset));
            load(bus, exec, privileged, rt, addr, AccessWidth::Word)?;
        }
        Instruction::Adr { rd, offset } => {
            exec.set(rd, align4(pc.wrapping_add(4)).wrapping_add(u32::from(offset)));
        }
        Instruction::AdrWide { rd, offset } => {
            exec.set(
                rd,
                offset_address(align4(pc.wrapping_add(4)), i32::from(offset)),
            );
        }
        Instruction::LoadStoreReg { op, rt, rn, rm } => {
            let addr = read(rn).wrapping_add(read(rm));
            load_or_store(bus, exec, privileged, op, rt, read(rt), addr)?;
        }
        Instruction::LoadStoreImm { op, rt, rn, offset } => {
            let addr = read(rn).wrapping_add(u32::from(offset));
            load_or_store(bus, exec, privileged, op, rt, read(rt), addr)?;
        }
        Instruction::LdrSp { rt, offset } => {
            let addr = arch.sp().wrapping_add(u32::from(offset));
            load(bus, exec, privileged, rt, addr, AccessWidth::Word)?;
        }
        Instruction::StrSp { rt, offset } => {
            let addr = arch.sp().wrapping_add(u32::from(offset));
            store(bus, exec, privileged, read(rt), addr, AccessWidth::Word)?;
        }
        Instruction::AddSpImm { rd, offset } => {
            exec.set(rd, arch.sp().wrapping_add(u32::from(offset)));
        }
        Instruction::AdjustSp { delta } => {
            exec.set(
                GeneralRegister::Sp,
                offset_address(arch.sp(), i32::from(delta)),
            );
        }
        Instruction::CompareBranch { rn, offset, nonzero } => {
            if (read(rn) == 0) != nonzero {
                exec.branch(
                    pc.wrapping_add(4).wrapping_add(u32::from(offset)),
                    CycleCostKind::BranchTaken,
                );
            } else {
                exec.cycles = cycles_for(CycleCostKind::BranchNotTaken);
            }
        }
        Instruction::Push { registers, lr } => {
            let count = registers.count_ones() + u32::from(lr);
            let base = arch.sp().wrapping_sub(4 * count);
            let mut addr = base;
            let stacked = low_registers(registers).chain(lr.then_some(GeneralRegister::Lr));
            for reg in stacked {
                bus.write(addr, AccessWidth::Word, read(reg), privileged)
                    .map_err(data_fault)?;
                addr = addr.wrapping_add(4);
            }
            exec.set(GeneralRegister::Sp, base);
            exec.cycles = cycles_for(CycleCostKind::StackMultiple) + count;
        }
        Instruction::Pop { registers, pc: load_pc } => {
            let count = registers.count_ones() + u32::from(load_pc);
            let mut addr = arch.sp();
            let context = AccessContext::new(privileged, AccessKind::Read);
            for reg in low_registers(registers) {
                let value = bus
                    .read(addr, AccessWidth::Word, context)
                    .map_err(data_fault)?;
                exec.set(reg, value);
                addr = addr.wrapping_add(4);
            }
            let target = if load_pc {
                let value = bus
                    .read(addr, AccessWidth::Word, context)
                    .map_err(data_fault)?;
                addr = addr.wrapping_add(4);
                Some(value)
            } else {
                None
            };
            exec.set(GeneralRegister::Sp, addr);
            exec.cycles = cycles_for(CycleCostKind::StackMultiple) + count;
            if let Some(target) = target {
                let base_cycles = exec.cycles;
                let outcome = interwork(core, bus, exec, target, pc, true)?;
                exec.cycles += base_cycles;
                return Ok(outcome);
            }
        }
        Instruction::Nop => exec.cycles = cycles_for(CycleCostKind::Nop),
        Instruction::It { firstcond, mask } => {
            exec.itstate = Some(ItState::start(firstcond, mask));
            exec.cycles = cycles_for(CycleCostKind::Nop);
        }
        Instruction::Bkpt { .. } => {
            exec.next_pc = pc;
            exec.cycles = cycles_for(CycleCostKind::Breakpoint);
            return Ok(ExecuteOutcome::Halted);
        }
        Instruction::Udf { .. } => return Err(undefined(pc)),
        Instruction::Svc { .. } => {
            exec.cycles = cycles_for(CycleCostKind::Svc);
            return Ok(ExecuteOutcome::SupervisorCall);
        }
        Instruction::BranchCond { cond, offset } => {
            let holds = cond.holds(
                arch.flag(APSR_N),
                arch.flag(APSR_Z),
                carry,
                arch.flag(APSR_V),
            );
            if holds {
                exec.branch(
                    offset_address(pc.wrapping_add(4), offset),
                    CycleCostKind::BranchTaken,
                );
            } else {
                exec.cycles = cycles_for(CycleCostKind::BranchNotTaken);
            }
        }
        Instruction::Branch { offset } => exec.branch(
            offset_address(pc.wrapping_add(4), offset),
            CycleCostKind::BranchTaken,
        ),
        Instruction::Bl { offset } => {
            exec.set(GeneralRegister::Lr, exec.next_pc | 1);
            exec.branch(
                offset_address(pc.wrapping_add(4), offset),
                CycleCostKind::Call,
            );
        }
        Instruction::Tbb { rn, rm } => {
            let context = AccessContext::new(privileged, AccessKind::Read);
            let entry = bus
                .read(read(rn).wrapping_add(read(rm)), AccessWidth::Byte, context)
                .map_err(data_fault)?;
            exec.branch(
                pc.wrapping_add(4).wrapping_add(entry << 1),
                CycleCostKind::BranchTaken,
            );
            exec.cycles += cycles_for(CycleCostKind::Load);
        }
        Instruction::Movw { rd, imm16 } => {
            exec.set(rd, u32::from(imm16));
            exec.cycles = cycles_for(CycleCostKind::Mov);
        }
        Instruction::Movt { rd, imm16 } => {
            exec.set(rd, (read(rd) & 0xFFFF) | (u32::from(imm16) << 16));
            exec.cycles = cycles_for(CycleCostKind::Mov);
        }
        Instruction::Mrs { rd, sysm } => {
            let value = match sysm {
                SpecialRegister::Msp => arch.msp(),
                SpecialRegister::Psp => arch.psp(),
                SpecialRegister::Primask => arch.primask(),
                SpecialRegister::Control => arch.control(),
            };
            exec.set(rd, value);
            exec.cycles = cycles_for(CycleCostKind::SpecialRegister);
        }
        Instruction::Msr { rn, sysm } => {
            exec.cycles = cycles_for(CycleCostKind::SpecialRegister);
            if privileged {
                let mut value = read(rn);
                if sysm == SpecialRegister::Control {
                    value &= CONTROL_NPRIV | CONTROL_SPSEL;
                    if arch.in_handler_mode() {
                        value = (value & !CONTROL_SPSEL) | (arch.control() & CONTROL_SPSEL);
                    }
                }
                exec.special = Some((sysm, value));
            }
        }
        Instruction::Udiv { rd, rn, rm } => {
            let divisor = read(rm);
            let quotient = if divisor == 0 { 0 } else { read(rn) / divisor };
            exec.set(rd, quotient);
            exec.cycles = cycles_for(CycleCostKind::Div);
        }
    }
    Ok(ExecuteOutcome::Retired)
}

fn add(exec: &mut ExecuteState, rd: GeneralRegister, x: u32, y: u32) {
    let (result, carry, overflow) = add_with_carry(x, y, false);
    exec.set(rd, result);
    exec.flags_update = FlagsUpdate::nzcv(result, carry, overflow);
}

fn sub(exec: &mut ExecuteState, rd: Option<GeneralRegister>, x: u32, y: u32) {
    let (result, carry, overflow) = sub_with_flags(x, y);
    if let Some(rd) = rd {
        exec.set(rd, result);
    }
    exec.flags_update = FlagsUpdate::nzcv(result, carry, overflow);
}

fn logical(exec: &mut ExecuteState, rd: Option<GeneralRegister>, result: u32) {
    if let Some(rd) = rd {
        exec.set(rd, result);
    }
    exec.flags_update = FlagsUpdate::nz(result);
}

fn write_or_branch(exec: &mut ExecuteState, rd: GeneralRegister, value: u32) {
    if rd == GeneralRegister::Pc {
        exec.branch(value & !1, CycleCostKind::BranchTaken);
    } else {
        exec.set(rd, value);
    }
}

fn low_registers(list: u8) -> impl Iterator<Item = GeneralRegister> {
    (0_u16..8)
        .filter(move |&bit| u16::from(list) & (1 << bit) != 0)
        .map(GeneralRegister::from_u3)
}

fn load(
    bus: &mut SystemBus<'_>,
    exec: &mut ExecuteState,
    privileged: bool,
    rt: GeneralRegister,
    addr: u32,
    width: AccessWidth,
) -> Result<(), ExecuteOutcome> {
    let context = AccessContext::new(privileged, AccessKind::Read);
    let value = bus.read(addr, width, context).map_err(data_fault)?;
    exec.set(rt, value);
    exec.cycles = cycles_for(CycleCostKind::Load);
    Ok(())
}

fn store(
    bus: &mut SystemBus<'_>,
    exec: &mut ExecuteState,
    privileged: bool,
    value: u32,
    addr: u32,
    width: AccessWidth,
) -> Result<(), ExecuteOutcome> {
    bus.write(addr, width, value, privileged)
        .map_err(data_fault)?;
    exec.cycles = cycles_for(CycleCostKind::Store);
    Ok(())
}

fn load_or_store(
    bus: &mut SystemBus<'_>,
    exec: &mut ExecuteState,
    privileged: bool,
    op: LoadStoreOp,
    rt: GeneralRegister,
    value: u32,
    addr: u32,
) -> Result<(), ExecuteOutcome> {
    if op.is_load() {
        load(bus, exec, privileged, rt, addr, width_of(op))
    } else {
        store(bus, exec, privileged, value, addr, width_of(op))
    }
}

/// Resolves a `BX`/`BLX`/`POP {pc}` target.
///
/// Bit 0 set stays native. Bit 0 clear enters the bytecode interpreter with a
/// native caller. With `returning`, EXC_RETURN values in Handler mode unstack
/// and [`BYTECODE_RETURN`] resumes the bytecode caller of a native function.
fn interwork(
    core: &CoreState,
    bus: &mut SystemBus<'_>,
    exec: &mut ExecuteState,
    target: u32,
    pc: u32,
    returning: bool,
) -> Result<ExecuteOutcome, ExecuteOutcome> {
    let arch = &core.arch;
    if returning && arch.in_handler_mode() && target >= 0xF000_0000 && target != BYTECODE_RETURN {
        if is_exc_return(target) {
            exec.cycles = cycles_for(CycleCostKind::BranchTaken);
            return Ok(ExecuteOutcome::ExceptionReturn { exc_return: target });
        }
        return Err(ExecuteOutcome::Fault {
            fault: Fault::new(FaultCode::InvalidState, pc),
            site: FaultSite::Instruction,
        });
    }
    if returning && target == BYTECODE_RETURN {
        let sp = exec.pending(core, GeneralRegister::Sp);
        let context = AccessContext::new(arch.is_privileged(), AccessKind::Read);
        let resume = bus
            .read(sp, AccessWidth::Word, context)
            .map_err(data_fault)?;
        let result = exec.pending(core, GeneralRegister::R0);
        bus.write(sp, AccessWidth::Word, result, arch.is_privileged())
            .map_err(data_fault)?;
        exec.mode = Some(ExecutionMode::Bytecode);
        exec.branch(resume, CycleCostKind::Interwork);
        return Ok(ExecuteOutcome::Retired);
    }
    if target & 1 == 1 {
        exec.branch(target & !1, CycleCostKind::BranchTaken);
    } else {
        exec.mode = Some(ExecutionMode::Bytecode);
        exec.frame = Some(FrameRegisters {
            native_caller: true,
            ..arch.frame()
        });
        exec.branch(target, CycleCostKind::Interwork);
    }
    Ok(ExecuteOutcome::Retired)
}

#[cfg(test)]
mod tests;
