use rstest::rstest;

use super::{step_one, BYTECODE_RETURN};
use crate::api::{CoreConfig, CoreState, StepOutcome, TraceEvent};
use crate::memory::{AccessWidth, MemoryBank, SystemBus, SRAM_BYTES, SRAM_START};
use crate::peripherals::Peripherals;
use crate::state::{ExecutionMode, GeneralRegister, APSR_N, APSR_Z, CONTROL_NPRIV};
use crate::{Fault, FaultCode, RunState};

const STACK_TOP: u32 = 0x2007_8000;

struct Harness {
    sram: MemoryBank,
    peripherals: Peripherals,
    core: CoreState,
    config: CoreConfig,
}

impl Harness {
    fn new(program: &[u16]) -> Self {
        let mut sram = MemoryBank::new(SRAM_START, SRAM_BYTES, 0);
        let image: Vec<u8> = program.iter().flat_map(|hw| hw.to_le_bytes()).collect();
        sram.copy_from(SRAM_START, &image);
        let mut core = CoreState::default();
        core.arch.set_msp(STACK_TOP);
        core.arch.set_pc(SRAM_START);
        Self {
            sram,
            peripherals: Peripherals::new(100),
            core,
            config: CoreConfig::default(),
        }
    }

    fn step(&mut self) -> StepOutcome {
        let mut bus = SystemBus::new(&mut self.sram, &mut self.peripherals, 0);
        step_one(&mut self.core, &mut bus, &self.config)
    }

    fn step_traced(&mut self, trace: &mut Vec<TraceEvent>) -> StepOutcome {
        let mut bus = SystemBus::new(&mut self.sram, &mut self.peripherals, 0).with_trace(trace);
        step_one(&mut self.core, &mut bus, &self.config)
    }

    fn run_to_halt(&mut self, limit: usize) -> usize {
        for steps in 1..=limit {
            if self.step().is_stopped() {
                return steps;
            }
        }
        panic!("program did not stop within {limit} steps");
    }

    fn reg(&self, reg: GeneralRegister) -> u32 {
        self.core.arch.reg(reg)
    }
}

#[test]
fn straight_line_arithmetic_then_breakpoint() {
    // movs r0, #5; movs r1, #7; adds r2, r0, r1; bkpt
    let mut harness = Harness::new(&[0x2005, 0x2107, 0x1842, 0xBE00]);
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 1 });
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 1 });
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 1 });
    assert_eq!(harness.reg(GeneralRegister::R2), 12);

    assert_eq!(harness.step(), StepOutcome::Halted { cycles: 1 });
    assert_eq!(harness.core.run_state, RunState::Halted);
    assert_eq!(harness.core.arch.pc(), SRAM_START + 6);
    assert_eq!(harness.step(), StepOutcome::Halted { cycles: 0 });
}

#[test]
fn countdown_loop_exits_with_zero_flag() {
    // movs r0, #3; loop: subs r0, #1; bne loop; bkpt
    let mut harness = Harness::new(&[0x2003, 0x3801, 0xD1FD, 0xBE00]);
    let steps = harness.run_to_halt(32);
    assert_eq!(steps, 8);
    assert_eq!(harness.reg(GeneralRegister::R0), 0);
    assert!(harness.core.arch.flag(APSR_Z));
}

#[test]
fn faulting_store_preserves_registers_and_pc() {
    // movs r0, #0; movs r1, #9; str r1, [r0]
    let mut harness = Harness::new(&[0x2000, 0x2109, 0x6001]);
    harness.step();
    harness.step();
    let expected = Fault::new(FaultCode::BusFault, 0);
    assert_eq!(harness.step(), StepOutcome::FaultLatched(expected));
    assert_eq!(harness.core.run_state, RunState::FaultLatched(expected));
    assert_eq!(harness.core.arch.pc(), SRAM_START + 4);
    assert_eq!(harness.reg(GeneralRegister::R1), 9);
    assert_eq!(harness.step(), StepOutcome::FaultLatched(expected));
}

#[test]
fn undefined_encoding_latches_at_its_address() {
    let mut harness = Harness::new(&[0xBF00, 0xDE00]);
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 1 });
    assert_eq!(
        harness.step(),
        StepOutcome::FaultLatched(Fault::new(FaultCode::UndefinedInstruction, SRAM_START + 2))
    );
}

#[test]
fn push_then_pop_moves_values_through_the_stack() {
    // movs r0, #9; push {r0, lr}; pop {r1}; bkpt
    let mut harness = Harness::new(&[0x2009, 0xB501, 0xBC02, 0xBE00]);
    harness.core.arch.set_lr(0x0008_0101);
    harness.step();
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 3 });
    assert_eq!(harness.core.arch.sp(), STACK_TOP - 8);
    assert_eq!(harness.sram.read(STACK_TOP - 8, AccessWidth::Word), 9);
    assert_eq!(harness.sram.read(STACK_TOP - 4, AccessWidth::Word), 0x0008_0101);
    harness.step();
    assert_eq!(harness.reg(GeneralRegister::R1), 9);
    assert_eq!(harness.core.arch.sp(), STACK_TOP - 4);
}

#[test]
fn bx_to_even_address_enters_bytecode_with_native_caller() {
    let mut harness = Harness::new(&[0x4700]);
    harness.core.arch.set_reg(GeneralRegister::R0, SRAM_START + 0x100);
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 8 });
    assert_eq!(harness.core.arch.mode(), ExecutionMode::Bytecode);
    assert_eq!(harness.core.arch.pc(), SRAM_START + 0x100);
    assert!(harness.core.arch.frame().native_caller);
}

#[test]
fn blx_to_odd_address_links_and_stays_native() {
    let mut harness = Harness::new(&[0x4788]);
    harness.core.arch.set_reg(GeneralRegister::R1, SRAM_START + 0x11);
    harness.step();
    assert_eq!(harness.core.arch.mode(), ExecutionMode::Native);
    assert_eq!(harness.core.arch.pc(), SRAM_START + 0x10);
    assert_eq!(harness.core.arch.lr(), (SRAM_START + 2) | 1);
}

#[test]
fn returning_through_bytecode_link_swaps_result_onto_stack() {
    // bx lr
    let mut harness = Harness::new(&[0x4770]);
    harness.core.arch.set_lr(BYTECODE_RETURN);
    harness.core.arch.set_reg(GeneralRegister::R0, 42);
    harness.core.arch.set_msp(STACK_TOP - 4);
    harness
        .sram
        .write(STACK_TOP - 4, AccessWidth::Word, 0x0008_1234);
    harness.step();
    assert_eq!(harness.core.arch.mode(), ExecutionMode::Bytecode);
    assert_eq!(harness.core.arch.pc(), 0x0008_1234);
    assert_eq!(harness.core.arch.sp(), STACK_TOP - 4);
    assert_eq!(harness.sram.read(STACK_TOP - 4, AccessWidth::Word), 42);
}

#[test]
fn unprivileged_msr_is_ignored() {
    // movs r0, #0; msr control, r0
    let mut harness = Harness::new(&[0x2000, 0xF380, 0x8814]);
    harness.core.arch.set_control(CONTROL_NPRIV);
    harness.step();
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 2 });
    assert_eq!(harness.core.arch.control(), CONTROL_NPRIV);
    assert_eq!(harness.core.arch.pc(), SRAM_START + 6);
}

#[test]
fn movw_movt_and_udiv() {
    // movw r0, #0x5678; movt r0, #0x1234; movs r1, #0; udiv r2, r0, r1
    let mut harness = Harness::new(&[0xF245, 0x6078, 0xF2C1, 0x2034, 0x2100, 0xFBB0, 0xF2F1]);
    harness.step();
    harness.step();
    assert_eq!(harness.reg(GeneralRegister::R0), 0x1234_5678);
    harness.core.arch.set_reg(GeneralRegister::R2, 7);
    harness.step();
    harness.step();
    assert_eq!(harness.reg(GeneralRegister::R2), 0);
}

#[test]
fn trace_orders_start_memory_and_retire() {
    // movs r0, #9; push {r0}
    let mut harness = Harness::new(&[0x2009, 0xB401]);
    let mut trace = Vec::new();
    harness.step_traced(&mut trace);
    harness.step_traced(&mut trace);
    assert_eq!(trace.len(), 5);
    assert!(matches!(
        trace[2],
        TraceEvent::InstructionStart { pc, mode: ExecutionMode::Native } if pc == SRAM_START + 2
    ));
    assert!(matches!(
        trace[3],
        TraceEvent::MemoryAccess { address, value: 9, .. } if address == STACK_TOP - 4
    ));
    assert!(matches!(trace[4], TraceEvent::InstructionRetired { .. }));
}

#[rstest]
#[case::equal(0x2000, 1)]
#[case::not_equal(0x2001, 2)]
fn ite_runs_exactly_one_arm_without_touching_flags(#[case] setup: u16, #[case] expected: u32) {
    // movs r0, #setup; ite eq; movs r1, #1; movs r1, #2; bkpt
    let mut harness = Harness::new(&[setup, 0xBF0C, 0x2101, 0x2102, 0xBE00]);
    harness.step();
    let zero = harness.core.arch.flag(APSR_Z);
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 1 });
    assert_eq!(harness.core.arch.itstate(), 0x0C);
    assert_eq!(harness.run_to_halt(4), 3);
    assert_eq!(harness.reg(GeneralRegister::R1), expected);
    assert_eq!(harness.core.arch.flag(APSR_Z), zero);
    assert_eq!(harness.core.arch.itstate(), 0);
    assert_eq!(harness.core.arch.pc(), SRAM_START + 8);
}

#[rstest]
#[case::branch_before_last(&[0xBF04, 0x4770])]
#[case::nested_it(&[0xBF08, 0xBF08])]
#[case::conditional_branch(&[0xBF08, 0xD000])]
fn misplaced_instruction_in_it_block_is_undefined(#[case] program: &[u16]) {
    let mut harness = Harness::new(program);
    harness.step();
    assert_eq!(
        harness.step(),
        StepOutcome::FaultLatched(Fault::new(FaultCode::UndefinedInstruction, SRAM_START + 2))
    );
}

#[test]
fn tbb_branches_through_a_byte_table() {
    // movs r0, #1; tbb [pc, r0]; .byte 1, 2; movs r1, #7; movs r1, #9; bkpt
    let mut harness = Harness::new(&[0x2001, 0xE8DF, 0xF000, 0x0201, 0x2107, 0x2109, 0xBE00]);
    harness.step();
    assert_eq!(harness.step(), StepOutcome::Retired { cycles: 5 });
    assert_eq!(harness.core.arch.pc(), SRAM_START + 10);
    harness.run_to_halt(4);
    assert_eq!(harness.reg(GeneralRegister::R1), 9);
}

#[test]
fn adr_forms_are_relative_to_the_aligned_pc() {
    // adr r1, #12; subw r1, pc, #15
    let mut harness = Harness::new(&[0xA103, 0xF2AF, 0x010F]);
    harness.step();
    assert_eq!(harness.reg(GeneralRegister::R1), SRAM_START + 16);
    harness.step();
    assert_eq!(
        harness.reg(GeneralRegister::R1),
        (SRAM_START + 4).wrapping_sub(15)
    );
    assert_eq!(harness.core.arch.pc(), SRAM_START + 6);
}

#[test]
fn compare_between_high_registers_sets_flags_inside_it_block() {
    // itt eq; cmp r8, r9; movs r0, #1
    let mut harness = Harness::new(&[0xBF04, 0x45C8, 0x2001]);
    harness.core.arch.set_reg(GeneralRegister::R8, 3);
    harness.core.arch.set_reg(GeneralRegister::R9, 5);
    harness.core.arch.set_apsr(1 << 30);
    harness.step();
    harness.step();
    assert!(harness.core.arch.flag(APSR_N));
    assert!(!harness.core.arch.flag(APSR_Z));
    harness.step();
    assert_eq!(harness.reg(GeneralRegister::R0), 0);
    assert_eq!(harness.core.arch.pc(), SRAM_START + 6);
}
