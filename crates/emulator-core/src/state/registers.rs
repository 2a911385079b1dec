use crate::memory::SRAM_END;

/// Number of core registers addressable by instructions (`R0..R12`, `SP`, `LR`, `PC`).
pub const GENERAL_REGISTER_COUNT: usize = 16;

/// `APSR.N`.
pub const APSR_N: u32 = 1 << 31;
/// `APSR.Z`.
pub const APSR_Z: u32 = 1 << 30;
/// `APSR.C`.
pub const APSR_C: u32 = 1 << 29;
/// `APSR.V`.
pub const APSR_V: u32 = 1 << 28;
/// Mask of the condition flags held in APSR.
pub const APSR_FLAGS_MASK: u32 = APSR_N | APSR_Z | APSR_C | APSR_V;
/// xPSR Thumb bit; clear when the interrupted code was bytecode.
pub const XPSR_T: u32 = 1 << 24;
/// xPSR bits holding the IT block state (`IT[1:0]` at 26:25, `IT[7:2]` at 15:10).
pub const XPSR_IT_MASK: u32 = 0x0600_FC00;

/// Packs an IT state byte into its xPSR positions.
#[must_use]
pub const fn itstate_to_xpsr(itstate: u8) -> u32 {
    let bits = itstate as u32;
    ((bits & 0x3) << 25) | ((bits & 0xFC) << 8)
}

/// Extracts the IT state byte from a stacked xPSR.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn itstate_from_xpsr(xpsr: u32) -> u8 {
    (((xpsr >> 25) & 0x3) | ((xpsr >> 8) & 0xFC)) as u8
}

/// `CONTROL.nPRIV`: thread mode runs unprivileged.
pub const CONTROL_NPRIV: u32 = 0x1;
/// `CONTROL.SPSEL`: thread mode uses the process stack.
pub const CONTROL_SPSEL: u32 = 0x2;

/// Core register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GeneralRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    /// Active stack pointer (banked between MSP and PSP).
    Sp = 13,
    /// Link register.
    Lr = 14,
    /// Program counter.
    Pc = 15,
}

impl GeneralRegister {
    /// Every register in encoding order.
    pub const ALL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::Sp,
        Self::Lr,
        Self::Pc,
    ];

    /// Encoding index (`0..=15`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a 4-bit register field.
    #[must_use]
    pub const fn from_u4(bits: u16) -> Self {
        Self::ALL[(bits & 0xF) as usize]
    }

    /// Decodes a 3-bit low register field.
    #[must_use]
    pub const fn from_u3(bits: u16) -> Self {
        Self::ALL[(bits & 0x7) as usize]
    }

    /// Returns `true` for `R0..R7`.
    #[must_use]
    pub const fn is_low(self) -> bool {
        (self as u8) < 8
    }
}

/// Which interpreter consumes the instruction stream at `PC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExecutionMode {
    /// Native Thumb instructions.
    #[default]
    Native,
    /// Bytecode instructions; `PC` is the bytecode program counter.
    Bytecode,
}

/// Bytecode frame registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FrameRegisters {
    /// Address of `frame[0]`.
    pub fp: u32,
    /// Address of the current function's `fn` instruction; jump base.
    pub fbase: u32,
    /// Argument count of the current function.
    pub nargs: u32,
    /// `true` when the current function was entered from native code.
    pub native_caller: bool,
}

/// Architectural register state of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ArchitecturalState {
    gpr: [u32; 13],
    msp: u32,
    psp: u32,
    lr: u32,
    pc: u32,
    apsr: u32,
    ipsr: u32,
    control: u32,
    primask: u32,
    itstate: u8,
    mode: ExecutionMode,
    frame: FrameRegisters,
}

impl Default for ArchitecturalState {
    fn default() -> Self {
        Self {
            gpr: [0; 13],
            msp: SRAM_END,
            psp: 0,
            lr: u32::MAX,
            pc: 0,
            apsr: 0,
            ipsr: 0,
            control: 0,
            primask: 0,
            itstate: 0,
            mode: ExecutionMode::Native,
            frame: FrameRegisters::default(),
        }
    }
}

impl ArchitecturalState {
    /// Reads a core register. `PC` reads return the raw instruction address.
    #[must_use]
    pub const fn reg(&self, reg: GeneralRegister) -> u32 {
        match reg {
            GeneralRegister::Sp => self.sp(),
            GeneralRegister::Lr => self.lr,
            GeneralRegister::Pc => self.pc,
            _ => self.gpr[reg.index()],
        }
    }

    /// Writes a core register. `SP` writes go to the active stack pointer.
    pub const fn set_reg(&mut self, reg: GeneralRegister, value: u32) {
        match reg {
            GeneralRegister::Sp => self.set_sp(value),
            GeneralRegister::Lr => self.lr = value,
            GeneralRegister::Pc => self.pc = value,
            _ => self.gpr[reg.index()] = value,
        }
    }

    /// Program counter (native address or bytecode address).
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Writes the program counter.
    pub const fn set_pc(&mut self, value: u32) {
        self.pc = value;
    }

    /// Link register.
    #[must_use]
    pub const fn lr(&self) -> u32 {
        self.lr
    }

    /// Writes the link register.
    pub const fn set_lr(&mut self, value: u32) {
        self.lr = value;
    }

    /// Main stack pointer.
    #[must_use]
    pub const fn msp(&self) -> u32 {
        self.msp
    }

    /// Writes the main stack pointer (word aligned).
    pub const fn set_msp(&mut self, value: u32) {
        self.msp = value & !0x3;
    }

    /// Process stack pointer.
    #[must_use]
    pub const fn psp(&self) -> u32 {
        self.psp
    }

    /// Writes the process stack pointer (word aligned).
    pub const fn set_psp(&mut self, value: u32) {
        self.psp = value & !0x3;
    }

    /// Returns `true` when the process stack is the active stack.
    #[must_use]
    pub const fn uses_psp(&self) -> bool {
        !self.in_handler_mode() && self.control & CONTROL_SPSEL != 0
    }

    /// Active stack pointer.
    #[must_use]
    pub const fn sp(&self) -> u32 {
        if self.uses_psp() {
            self.psp
        } else {
            self.msp
        }
    }

    /// Writes the active stack pointer.
    pub const fn set_sp(&mut self, value: u32) {
        if self.uses_psp() {
            self.set_psp(value);
        } else {
            self.set_msp(value);
        }
    }

    /// Application status register (flags only).
    #[must_use]
    pub const fn apsr(&self) -> u32 {
        self.apsr
    }

    /// Writes the condition flags.
    pub const fn set_apsr(&mut self, value: u32) {
        self.apsr = value & APSR_FLAGS_MASK;
    }

    /// Returns `true` when an APSR flag is set.
    #[must_use]
    pub const fn flag(&self, flag: u32) -> bool {
        self.apsr & flag != 0
    }

    /// Sets or clears one APSR flag.
    pub const fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.apsr |= flag & APSR_FLAGS_MASK;
        } else {
            self.apsr &= !(flag & APSR_FLAGS_MASK);
        }
    }

    /// Active exception number; zero in Thread mode.
    #[must_use]
    pub const fn ipsr(&self) -> u32 {
        self.ipsr
    }

    /// Writes the active exception number.
    pub const fn set_ipsr(&mut self, value: u32) {
        self.ipsr = value & 0x1FF;
    }

    /// Returns `true` while an exception handler runs.
    #[must_use]
    pub const fn in_handler_mode(&self) -> bool {
        self.ipsr != 0
    }

    /// Combined program status word as stacked on exception entry.
    #[must_use]
    pub const fn xpsr(&self) -> u32 {
        let thumb = match self.mode {
            ExecutionMode::Native => XPSR_T,
            ExecutionMode::Bytecode => 0,
        };
        self.apsr | self.ipsr | thumb | itstate_to_xpsr(self.itstate)
    }

    /// IT block state: condition in bits 7:4, remaining pattern in 3:0.
    #[must_use]
    pub const fn itstate(&self) -> u8 {
        self.itstate
    }

    /// Replaces the IT block state.
    pub const fn set_itstate(&mut self, value: u8) {
        self.itstate = value;
    }

    /// CONTROL register.
    #[must_use]
    pub const fn control(&self) -> u32 {
        self.control
    }

    /// Writes CONTROL without privilege checks.
    pub const fn set_control(&mut self, value: u32) {
        self.control = value & (CONTROL_NPRIV | CONTROL_SPSEL);
    }

    /// Returns `true` when the current code runs privileged.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.in_handler_mode() || self.control & CONTROL_NPRIV == 0
    }

    /// PRIMASK register.
    #[must_use]
    pub const fn primask(&self) -> u32 {
        self.primask
    }

    /// Writes PRIMASK.
    pub const fn set_primask(&mut self, value: u32) {
        self.primask = value & 0x1;
    }

    /// Current execution mode.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Switches the execution mode.
    pub const fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    /// Bytecode frame registers.
    #[must_use]
    pub const fn frame(&self) -> FrameRegisters {
        self.frame
    }

    /// Replaces the bytecode frame registers.
    pub const fn set_frame(&mut self, frame: FrameRegisters) {
        self.frame = frame;
    }
}
