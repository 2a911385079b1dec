//! Exception entry, return, fault routing and reset.
//!
//! Faults map to MemManage, BusFault or UsageFault. A configurable handler is
//! used only from Thread mode when SHCSR enables it and its vector is valid;
//! otherwise the fault escalates to HardFault. A fault inside HardFault, or
//! while stacking, is a lockup. Faults with no usable handler are latched as
//! the terminal trap.

use tracing::{trace, warn};

use crate::api::{CoreState, StepOutcome, TraceEvent};
use crate::memory::{AccessContext, AccessWidth, SystemBus};
use crate::peripherals::scb::{
    CFSR_DACCVIOL, CFSR_IACCVIOL, CFSR_IBUSERR, CFSR_INVSTATE, CFSR_PRECISERR, CFSR_UNALIGNED,
    CFSR_UNDEFINSTR,
};
use crate::peripherals::ExceptionNumber;
use crate::state::{
    itstate_from_xpsr, ArchitecturalState, ExecutionMode, GeneralRegister, CONTROL_SPSEL, XPSR_T,
};
use crate::timing::{cycles_for, CycleCostKind};
use crate::{Fault, FaultCode, RunState};

/// EXC_RETURN: back to Handler mode on the main stack.
pub const EXC_RETURN_HANDLER: u32 = 0xFFFF_FFF1;
/// EXC_RETURN: back to Thread mode on the main stack.
pub const EXC_RETURN_THREAD_MSP: u32 = 0xFFFF_FFF9;
/// EXC_RETURN: back to Thread mode on the process stack.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

const FRAME_WORDS: u32 = 8;
const FRAME_BYTES: u32 = FRAME_WORDS * 4;

/// Where in the instruction pipeline a fault was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultSite {
    /// Instruction fetch.
    Fetch,
    /// Data load or store.
    Data,
    /// Decode or execution-state check.
    Instruction,
}

/// Returns `true` for the three recognised EXC_RETURN values.
#[must_use]
pub const fn is_exc_return(value: u32) -> bool {
    matches!(
        value,
        EXC_RETURN_HANDLER | EXC_RETURN_THREAD_MSP | EXC_RETURN_THREAD_PSP
    )
}

const fn fault_exception(code: FaultCode) -> Option<ExceptionNumber> {
    match code {
        FaultCode::MpuViolation => Some(ExceptionNumber::MemManage),
        FaultCode::BusFault => Some(ExceptionNumber::BusFault),
        FaultCode::AlignmentFault | FaultCode::UndefinedInstruction | FaultCode::InvalidState => {
            Some(ExceptionNumber::UsageFault)
        }
        FaultCode::FlashBusy | FaultCode::MalformedCommand | FaultCode::Lockup => None,
    }
}

fn record_status(bus: &mut SystemBus<'_>, fault: Fault, site: FaultSite) {
    let scb = bus.peripherals().scb_mut();
    match (fault.code, site) {
        (FaultCode::MpuViolation, FaultSite::Fetch) => scb.record_cfsr(CFSR_IACCVIOL),
        (FaultCode::MpuViolation, _) => {
            scb.record_cfsr(CFSR_DACCVIOL);
            scb.record_mmfar(fault.address);
        }
        (FaultCode::BusFault, FaultSite::Fetch) => scb.record_cfsr(CFSR_IBUSERR),
        (FaultCode::BusFault, _) => {
            scb.record_cfsr(CFSR_PRECISERR);
            scb.record_bfar(fault.address);
        }
        (FaultCode::AlignmentFault, _) => scb.record_cfsr(CFSR_UNALIGNED),
        (FaultCode::UndefinedInstruction, _) => scb.record_cfsr(CFSR_UNDEFINSTR),
        (FaultCode::InvalidState, _) => scb.record_cfsr(CFSR_INVSTATE),
        _ => {}
    }
}

/// Reads a usable vector for `exception`. Vector reads bypass the MPU.
fn read_vector(bus: &mut SystemBus<'_>, exception: ExceptionNumber) -> Option<u32> {
    let addr = bus
        .peripherals()
        .scb()
        .vtor()
        .wrapping_add(exception.vector_offset());
    let vector = read_table_word(bus, addr).ok()?;
    (vector != 0 && vector != u32::MAX).then_some(vector)
}

fn read_table_word(bus: &mut SystemBus<'_>, addr: u32) -> Result<u32, Fault> {
    let bytes = bus.host_read(addr, 4)?;
    let mut word = [0_u8; 4];
    word.copy_from_slice(&bytes);
    Ok(u32::from_le_bytes(word))
}

/// Latches `fault` as the terminal trap.
pub fn latch_fault(core: &mut CoreState, fault: Fault) -> StepOutcome {
    warn!(code = ?fault.code, address = fault.address, "fault latched");
    core.run_state = RunState::FaultLatched(fault);
    StepOutcome::FaultLatched(fault)
}

/// Routes `fault` raised by the instruction at `pc` to a handler, or latches it.
pub fn raise_fault(
    core: &mut CoreState,
    bus: &mut SystemBus<'_>,
    fault: Fault,
    site: FaultSite,
    pc: u32,
) -> StepOutcome {
    bus.emit(TraceEvent::FaultRaised { fault, pc });
    let Some(exception) = fault_exception(fault.code) else {
        return latch_fault(core, fault);
    };
    if core.arch.ipsr() == ExceptionNumber::HardFault.number() {
        return latch_fault(core, Fault::new(FaultCode::Lockup, fault.address));
    }
    record_status(bus, fault, site);

    let configurable = !core.arch.in_handler_mode()
        && bus.peripherals().scb().handler_enabled(exception)
        && read_vector(bus, exception).is_some();
    let target = if configurable {
        exception
    } else {
        bus.peripherals().scb_mut().record_forced();
        ExceptionNumber::HardFault
    };
    if target == ExceptionNumber::HardFault && read_vector(bus, target).is_none() {
        return latch_fault(core, fault);
    }
    match take_exception(core, bus, target, pc) {
        Ok(cycles) => StepOutcome::ExceptionTaken {
            exception: target,
            fault: Some(fault),
            cycles,
        },
        Err(lockup) => latch_fault(core, lockup),
    }
}

/// Takes SVCall after an `SVC` whose successor is at `return_address`.
pub fn supervisor_call(
    core: &mut CoreState,
    bus: &mut SystemBus<'_>,
    return_address: u32,
    issue_cycles: u32,
) -> StepOutcome {
    let target = if !core.arch.in_handler_mode()
        && read_vector(bus, ExceptionNumber::SvCall).is_some()
    {
        ExceptionNumber::SvCall
    } else if core.arch.ipsr() != ExceptionNumber::HardFault.number()
        && read_vector(bus, ExceptionNumber::HardFault).is_some()
    {
        bus.peripherals().scb_mut().record_forced();
        ExceptionNumber::HardFault
    } else {
        let pc = return_address.wrapping_sub(2);
        return latch_fault(core, Fault::new(FaultCode::InvalidState, pc));
    };
    match take_exception(core, bus, target, return_address) {
        Ok(cycles) => StepOutcome::ExceptionTaken {
            exception: target,
            fault: None,
            cycles: issue_cycles + cycles,
        },
        Err(lockup) => latch_fault(core, lockup),
    }
}

/// Stacks the caller-saved frame and vectors to `exception`.
///
/// # Errors
///
/// Returns a [`FaultCode::Lockup`] fault when stacking or the vector read fails.
pub fn take_exception(
    core: &mut CoreState,
    bus: &mut SystemBus<'_>,
    exception: ExceptionNumber,
    return_address: u32,
) -> Result<u32, Fault> {
    let vtor = bus.peripherals().scb().vtor();
    let vector_addr = vtor.wrapping_add(exception.vector_offset());
    let vector = read_vector(bus, exception)
        .ok_or_else(|| Fault::new(FaultCode::Lockup, vector_addr))?;

    let arch = &core.arch;
    let frame_ptr = arch.sp().wrapping_sub(FRAME_BYTES);
    let frame = [
        arch.reg(GeneralRegister::R0),
        arch.reg(GeneralRegister::R1),
        arch.reg(GeneralRegister::R2),
        arch.reg(GeneralRegister::R3),
        arch.reg(GeneralRegister::R12),
        arch.lr(),
        return_address,
        arch.xpsr(),
    ];
    let privileged = arch.is_privileged();
    let mut addr = frame_ptr;
    for word in frame {
        bus.write(addr, AccessWidth::Word, word, privileged)
            .map_err(|fault| Fault::new(FaultCode::Lockup, fault.address))?;
        addr = addr.wrapping_add(4);
    }

    let exc_return = if arch.in_handler_mode() {
        EXC_RETURN_HANDLER
    } else if arch.uses_psp() {
        EXC_RETURN_THREAD_PSP
    } else {
        EXC_RETURN_THREAD_MSP
    };
    let arch = &mut core.arch;
    arch.set_sp(frame_ptr);
    arch.set_ipsr(exception.number());
    arch.set_lr(exc_return);
    arch.set_itstate(0);
    arch.set_mode(ExecutionMode::Native);
    arch.set_pc(vector & !1);

    trace!(?exception, return_address, "exception entry");
    bus.emit(TraceEvent::ExceptionEntry {
        exception,
        return_address,
    });
    Ok(cycles_for(CycleCostKind::ExceptionEntry))
}

/// Unstacks the frame selected by `exc_return` and resumes the interrupted code.
///
/// # Errors
///
/// Returns the data fault raised while unstacking, or
/// [`FaultCode::InvalidState`] when the stacked IPSR contradicts `exc_return`.
pub fn exception_return(
    core: &mut CoreState,
    bus: &mut SystemBus<'_>,
    exc_return: u32,
) -> Result<u32, Fault> {
    let use_psp = exc_return == EXC_RETURN_THREAD_PSP;
    let frame_ptr = if use_psp {
        core.arch.psp()
    } else {
        core.arch.msp()
    };
    let mut frame = [0_u32; FRAME_WORDS as usize];
    let mut addr = frame_ptr;
    for slot in &mut frame {
        *slot = bus.read(addr, AccessWidth::Word, AccessContext::PRIVILEGED_READ)?;
        addr = addr.wrapping_add(4);
    }
    let [r0, r1, r2, r3, r12, lr, resume, xpsr] = frame;
    let stacked_ipsr = xpsr & 0x1FF;
    if (exc_return == EXC_RETURN_HANDLER) != (stacked_ipsr != 0) {
        return Err(Fault::new(FaultCode::InvalidState, resume));
    }

    let left = core.arch.ipsr();
    let arch = &mut core.arch;
    restore_frame(arch, [r0, r1, r2, r3, r12, lr]);
    arch.set_apsr(xpsr);
    arch.set_ipsr(stacked_ipsr);
    arch.set_itstate(itstate_from_xpsr(xpsr));
    if use_psp {
        arch.set_psp(frame_ptr.wrapping_add(FRAME_BYTES));
    } else {
        arch.set_msp(frame_ptr.wrapping_add(FRAME_BYTES));
    }
    if exc_return != EXC_RETURN_HANDLER {
        let spsel = if use_psp { CONTROL_SPSEL } else { 0 };
        arch.set_control((arch.control() & !CONTROL_SPSEL) | spsel);
    }
    if xpsr & XPSR_T == 0 {
        arch.set_mode(ExecutionMode::Bytecode);
        arch.set_pc(resume);
    } else {
        arch.set_mode(ExecutionMode::Native);
        arch.set_pc(resume & !1);
    }

    if let Some(exception) = ExceptionNumber::from_number(left) {
        trace!(?exception, resume, "exception return");
        bus.emit(TraceEvent::ExceptionReturn { exception, resume });
    }
    Ok(cycles_for(CycleCostKind::ExceptionReturn))
}

fn restore_frame(arch: &mut ArchitecturalState, words: [u32; 6]) {
    let [r0, r1, r2, r3, r12, lr] = words;
    arch.set_reg(GeneralRegister::R0, r0);
    arch.set_reg(GeneralRegister::R1, r1);
    arch.set_reg(GeneralRegister::R2, r2);
    arch.set_reg(GeneralRegister::R3, r3);
    arch.set_reg(GeneralRegister::R12, r12);
    arch.set_lr(lr);
}

/// Applies core reset: privileged Thread mode on MSP, with MSP and PC taken
/// from the first two vector table words.
///
/// # Errors
///
/// Returns the fault raised reading the vector table, or
/// [`FaultCode::InvalidState`] when the reset vector does not select Thumb state.
pub fn reset_core(core: &mut CoreState, bus: &mut SystemBus<'_>) -> Result<(), Fault> {
    core.arch = ArchitecturalState::default();
    core.run_state = RunState::Running;
    let vtor = bus.peripherals().scb().vtor();
    let msp = read_table_word(bus, vtor)?;
    let reset_vector_addr = vtor.wrapping_add(ExceptionNumber::Reset.vector_offset());
    let pc = read_table_word(bus, reset_vector_addr)?;
    if pc & 1 == 0 {
        return Err(Fault::new(FaultCode::InvalidState, reset_vector_addr));
    }
    core.arch.set_msp(msp);
    core.arch.set_pc(pc & !1);
    Ok(())
}
