//! Bytecode execution over the shared machine stack.
//!
//! The operand stack is the active native stack (full descending). Frame
//! slot `i` lives at `fp - 4i`; `fn n` saves the caller's link, `fp`, `fbase`
//! and `nargs` below the arguments, so slots `n..n+4` hold that linkage and
//! locals start at slot `n + 4`.

use super::decoder::BytecodeInstruction;
use crate::execute::{ExecuteOutcome, ExecuteState, FaultSite, BYTECODE_RETURN};
use crate::memory::{AccessContext, AccessKind, AccessWidth, SystemBus};
use crate::state::{ExecutionMode, FrameRegisters, GeneralRegister};
use crate::timing::{cycles_for, CycleCostKind};
use crate::{CoreState, Fault};

/// Bit set in a saved `nargs` word when the caller was native code.
pub const NATIVE_CALLER: u32 = 0x8000_0000;

/// Stack cursor that keeps SP pending until commit.
struct Stack<'s, 'a> {
    bus: &'s mut SystemBus<'a>,
    privileged: bool,
    sp: u32,
}

impl Stack<'_, '_> {
    fn load(&mut self, addr: u32) -> Result<u32, Fault> {
        let context = AccessContext::new(self.privileged, AccessKind::Read);
        self.bus.read(addr, AccessWidth::Word, context)
    }

    fn store(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        self.bus
            .write(addr, AccessWidth::Word, value, self.privileged)
    }

    fn push(&mut self, value: u32) -> Result<(), Fault> {
        let sp = self.sp.wrapping_sub(4);
        self.store(sp, value)?;
        self.sp = sp;
        Ok(())
    }

    fn pop(&mut self) -> Result<u32, Fault> {
        let value = self.load(self.sp)?;
        self.sp = self.sp.wrapping_add(4);
        Ok(value)
    }
}

const fn slot(frame: FrameRegisters, index: u32) -> u32 {
    frame.fp.wrapping_sub(index.wrapping_mul(4))
}

/// Executes a decoded bytecode instruction located at `pc`, whose encoding
/// ends at `next_pc`.
pub fn execute_instruction(
    instr: BytecodeInstruction,
    pc: u32,
    next_pc: u32,
    core: &CoreState,
    bus: &mut SystemBus<'_>,
) -> (ExecuteOutcome, ExecuteState) {
    let mut exec = ExecuteState::new(cycles_for(CycleCostKind::BytecodeSimple), next_pc);
    let mut stack = Stack {
        bus,
        privileged: core.arch.is_privileged(),
        sp: core.arch.sp(),
    };
    match execute_into(instr, pc, core, &mut stack, &mut exec) {
        Ok(()) => {
            exec.set(GeneralRegister::Sp, stack.sp);
            (ExecuteOutcome::Retired, exec)
        }
        Err(fault) => (
            ExecuteOutcome::Fault {
                fault,
                site: FaultSite::Data,
            },
            exec,
        ),
    }
}

fn execute_into(
    instr: BytecodeInstruction,
    pc: u32,
    core: &CoreState,
    stack: &mut Stack<'_, '_>,
    exec: &mut ExecuteState,
) -> Result<(), Fault> {
    let arch = &core.arch;
    let frame = arch.frame();
    match instr {
        BytecodeInstruction::Push(value) => stack.push(value)?,
        BytecodeInstruction::Binary(op) => {
            let y = stack.pop()?;
            let x = stack.pop()?;
            stack.push(op.apply(x, y))?;
        }
        BytecodeInstruction::Jump { condition, offset } => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeBranch);
            let taken = match condition {
                None => true,
                Some(comparison) => {
                    let y = stack.pop()?;
                    let x = stack.pop()?;
                    comparison.holds(x, y)
                }
            };
            if taken {
                exec.next_pc = frame.fbase.wrapping_add(u32::from(offset));
            }
        }
        BytecodeInstruction::Load => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeMemory);
            let addr = stack.pop()?;
            let value = stack.load(addr)?;
            stack.push(value)?;
        }
        BytecodeInstruction::Store => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeMemory);
            let value = stack.pop()?;
            let addr = stack.pop()?;
            stack.store(addr, value)?;
        }
        BytecodeInstruction::Ptr(index) => stack.push(slot(frame, u32::from(index)))?,
        BytecodeInstruction::Get(index) => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeMemory);
            let value = stack.load(slot(frame, u32::from(index)))?;
            stack.push(value)?;
        }
        BytecodeInstruction::Set(index) => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeMemory);
            let value = stack.pop()?;
            stack.store(slot(frame, u32::from(index)), value)?;
        }
        BytecodeInstruction::Pop => stack.sp = stack.sp.wrapping_add(4),
        BytecodeInstruction::Fn(nargs) => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeFrame);
            let args_top = stack.sp;
            let saved_nargs = if frame.native_caller {
                frame.nargs | NATIVE_CALLER
            } else {
                frame.nargs
            };
            stack.push(arch.lr())?;
            stack.push(frame.fp)?;
            stack.push(frame.fbase)?;
            stack.push(saved_nargs)?;
            exec.frame = Some(FrameRegisters {
                fp: args_top
                    .wrapping_add(4 * u32::from(nargs))
                    .wrapping_sub(4),
                fbase: pc,
                nargs: u32::from(nargs),
                native_caller: false,
            });
        }
        BytecodeInstruction::Call(target) => call(exec, frame, target.address()),
        BytecodeInstruction::CallIndirect => {
            let target = stack.pop()?;
            call(exec, frame, target);
        }
        BytecodeInstruction::Ret => {
            return_from_frame(stack, exec, frame)?;
        }
        BytecodeInstruction::RetValue => {
            let value = stack.pop()?;
            if return_from_frame(stack, exec, frame)? {
                exec.set(GeneralRegister::R0, value);
            } else {
                stack.push(value)?;
            }
        }
        BytecodeInstruction::Blx => {
            exec.cycles = cycles_for(CycleCostKind::BytecodeCall);
            let target = stack.pop()?;
            let argument = stack.pop()?;
            stack.push(exec.next_pc)?;
            exec.set(GeneralRegister::R0, argument);
            exec.set(GeneralRegister::Lr, BYTECODE_RETURN);
            exec.mode = Some(ExecutionMode::Native);
            exec.next_pc = target & !1;
        }
    }
    Ok(())
}

fn call(exec: &mut ExecuteState, frame: FrameRegisters, target: u32) {
    exec.cycles = cycles_for(CycleCostKind::BytecodeCall);
    exec.set(GeneralRegister::Lr, exec.next_pc);
    exec.frame = Some(FrameRegisters {
        native_caller: false,
        ..frame
    });
    exec.next_pc = target;
}

/// Tears the current frame down. Returns `true` when control goes back to
/// native code.
fn return_from_frame(
    stack: &mut Stack<'_, '_>,
    exec: &mut ExecuteState,
    frame: FrameRegisters,
) -> Result<bool, Fault> {
    exec.cycles = cycles_for(CycleCostKind::BytecodeReturn);
    let link = stack.load(slot(frame, frame.nargs))?;
    let fp = stack.load(slot(frame, frame.nargs.wrapping_add(1)))?;
    let fbase = stack.load(slot(frame, frame.nargs.wrapping_add(2)))?;
    let saved_nargs = stack.load(slot(frame, frame.nargs.wrapping_add(3)))?;
    stack.sp = frame.fp.wrapping_add(4);
    exec.frame = Some(FrameRegisters {
        fp,
        fbase,
        nargs: saved_nargs & !NATIVE_CALLER,
        native_caller: false,
    });
    let native = saved_nargs & NATIVE_CALLER != 0;
    if native {
        exec.mode = Some(ExecutionMode::Native);
        exec.next_pc = link & !1;
    } else {
        exec.next_pc = link;
    }
    Ok(native)
}
