//! Stack-based bytecode interpreter layered on the native core.
//!
//! Bytecode runs whenever the core's execution mode is
//! [`ExecutionMode::Bytecode`](crate::state::ExecutionMode::Bytecode). It
//! shares the register file, the active stack and the memory map with
//! native code; entering and leaving it is an ordinary interworking branch.

pub mod decoder;
pub mod interpreter;
pub mod opcode;

pub use decoder::{decode, BinaryOp, BytecodeInstruction, CallTarget, Comparison};
pub use interpreter::{execute_instruction, NATIVE_CALLER};
pub use opcode::Opcode;

use crate::execute::{ExecuteOutcome, ExecuteState, FaultSite};
use crate::memory::SystemBus;
use crate::{CoreState, Fault, FaultCode};

/// Fetches, decodes and executes the bytecode instruction at `pc`.
pub fn fetch_and_execute(
    core: &CoreState,
    bus: &mut SystemBus<'_>,
    pc: u32,
) -> (ExecuteOutcome, ExecuteState) {
    match fetch(core, bus, pc) {
        Ok((instruction, next_pc)) => execute_instruction(instruction, pc, next_pc, core, bus),
        Err((fault, site)) => (ExecuteOutcome::Fault { fault, site }, ExecuteState::default()),
    }
}

fn fetch(
    core: &CoreState,
    bus: &mut SystemBus<'_>,
    pc: u32,
) -> Result<(BytecodeInstruction, u32), (Fault, FaultSite)> {
    let privileged = core.arch.is_privileged();
    let byte = bus
        .fetch_byte(pc, privileged)
        .map_err(|fault| (fault, FaultSite::Fetch))?;
    let opcode = Opcode::from_u8(byte).ok_or((
        Fault::new(FaultCode::UndefinedInstruction, pc),
        FaultSite::Instruction,
    ))?;
    let mut operand = 0_u32;
    for index in 0..opcode.operand_bytes() {
        let byte = bus
            .fetch_byte(pc.wrapping_add(1 + index), privileged)
            .map_err(|fault| (fault, FaultSite::Fetch))?;
        operand |= u32::from(byte) << (8 * index);
    }
    let next_pc = pc.wrapping_add(1 + opcode.operand_bytes());
    Ok((decode(opcode, operand, pc), next_pc))
}

#[cfg(test)]
mod tests {
    use super::NATIVE_CALLER;
    use crate::api::{CoreConfig, CoreState, StepOutcome};
    use crate::execute::step_one;
    use crate::memory::{AccessWidth, MemoryBank, SystemBus, SRAM_BYTES, SRAM_START};
    use crate::peripherals::Peripherals;
    use crate::state::{ExecutionMode, FrameRegisters, GeneralRegister};
    use crate::{Fault, FaultCode, RunState};

    const STACK_TOP: u32 = 0x2007_8000;
    const CODE: u32 = SRAM_START + 0x100;
    const NATIVE_RETURN: u32 = SRAM_START + 0x41;

    struct Harness {
        sram: MemoryBank,
        peripherals: Peripherals,
        core: CoreState,
    }

    impl Harness {
        /// Enters `code` as if a native caller had branched to it with `args`.
        fn enter(code: &[u8], args: &[u32]) -> Self {
            let mut sram = MemoryBank::new(SRAM_START, SRAM_BYTES, 0);
            sram.copy_from(CODE, code);
            let mut core = CoreState::default();
            let mut sp = STACK_TOP;
            for &arg in args {
                sp -= 4;
                sram.write(sp, AccessWidth::Word, arg);
            }
            core.arch.set_msp(sp);
            core.arch.set_lr(NATIVE_RETURN);
            core.arch.set_mode(ExecutionMode::Bytecode);
            core.arch.set_frame(FrameRegisters {
                native_caller: true,
                ..FrameRegisters::default()
            });
            core.arch.set_pc(CODE);
            Self {
                sram,
                peripherals: Peripherals::new(100),
                core,
            }
        }

        fn step(&mut self) -> StepOutcome {
            let mut bus = SystemBus::new(&mut self.sram, &mut self.peripherals, 0);
            step_one(&mut self.core, &mut bus, &CoreConfig::default())
        }

        fn run_until_native(&mut self, limit: usize) {
            for _ in 0..limit {
                let outcome = self.step();
                assert!(!outcome.is_stopped(), "stopped: {outcome:?}");
                if self.core.arch.mode() == ExecutionMode::Native {
                    return;
                }
            }
            panic!("bytecode did not return within {limit} steps");
        }

        fn top(&self) -> u32 {
            self.sram.read(self.core.arch.sp(), AccessWidth::Word)
        }
    }

    #[test]
    fn native_caller_gets_value_in_r0_and_balanced_stack() {
        // fn 2; get 0; get 1; sub; retv
        let code = [25, 2, 22, 0, 22, 1, 5, 30];
        let mut harness = Harness::enter(&code, &[50, 8]);
        harness.run_until_native(16);
        assert_eq!(harness.core.arch.reg(GeneralRegister::R0), 42);
        assert_eq!(harness.core.arch.pc(), NATIVE_RETURN & !1);
        assert_eq!(harness.core.arch.sp(), STACK_TOP);
        assert_eq!(harness.core.arch.frame(), FrameRegisters::default());
    }

    #[test]
    fn fn_saves_linkage_below_arguments() {
        // fn 1
        let mut harness = Harness::enter(&[25, 1], &[7]);
        assert_eq!(harness.step(), StepOutcome::Retired { cycles: 14 });
        let frame = harness.core.arch.frame();
        assert_eq!(frame.fp, STACK_TOP - 4);
        assert_eq!(frame.fbase, CODE);
        assert_eq!(frame.nargs, 1);
        assert!(!frame.native_caller);
        let sp = harness.core.arch.sp();
        assert_eq!(sp, STACK_TOP - 20);
        assert_eq!(harness.sram.read(STACK_TOP - 8, AccessWidth::Word), NATIVE_RETURN);
        assert_eq!(harness.sram.read(sp, AccessWidth::Word), NATIVE_CALLER);
    }

    #[test]
    fn loop_with_conditional_jump_counts_down() {
        let code = [
            25, 0, // 0: fn 0
            2, 5, // 2: cst8 5 (local frame[4])
            22, 4, // 4: get 4
            0, // 6: cst_0
            13, 19, 0, // 7: ifeq 19
            22, 4, // 10: get 4
            1, // 12: cst_1
            5, // 13: sub
            23, 4, // 14: set 4
            18, 4, 0, // 16: goto 4
            22, 4, // 19: get 4
            30, // 21: retv
        ];
        let mut harness = Harness::enter(&code, &[]);
        harness.run_until_native(128);
        assert_eq!(harness.core.arch.reg(GeneralRegister::R0), 0);
        assert_eq!(harness.core.arch.sp(), STACK_TOP);
    }

    #[test]
    fn relative_call_returns_value_on_the_stack() {
        let mut code = vec![0_u8; 0x1A];
        // CODE + 0x00: fn 2; get 0; get 1; sub; retv
        code[..8].copy_from_slice(&[25, 2, 22, 0, 22, 1, 5, 30]);
        // CODE + 0x10: fn 0; cst8 50; cst8 8; callr 0x16; retv
        code[0x10..].copy_from_slice(&[25, 0, 2, 50, 2, 8, 27, 0x16, 0, 30]);
        let mut harness = Harness::enter(&code, &[]);
        harness.core.arch.set_pc(CODE + 0x10);
        harness.run_until_native(32);
        assert_eq!(harness.core.arch.reg(GeneralRegister::R0), 42);
        assert_eq!(harness.core.arch.pc(), NATIVE_RETURN & !1);
        assert_eq!(harness.core.arch.sp(), STACK_TOP);
    }

    #[test]
    fn blx_calls_native_with_argument_in_r0() {
        // fn 0; cst8 9; cst <native>; blx
        let native = SRAM_START + 0x201;
        let mut code = vec![25, 0, 2, 9, 3];
        code.extend_from_slice(&native.to_le_bytes());
        code.push(31);
        let mut harness = Harness::enter(&code, &[]);
        for _ in 0..4 {
            harness.step();
        }
        assert_eq!(harness.core.arch.mode(), ExecutionMode::Native);
        assert_eq!(harness.core.arch.pc(), native & !1);
        assert_eq!(harness.core.arch.reg(GeneralRegister::R0), 9);
        assert_eq!(harness.core.arch.lr(), crate::execute::BYTECODE_RETURN);
        assert_eq!(harness.top(), CODE + 10);
    }

    #[test]
    fn unknown_opcode_latches_undefined_instruction() {
        let mut harness = Harness::enter(&[0x20], &[]);
        let expected = Fault::new(FaultCode::UndefinedInstruction, CODE);
        assert_eq!(harness.step(), StepOutcome::FaultLatched(expected));
        assert_eq!(harness.core.run_state, RunState::FaultLatched(expected));
    }
}
