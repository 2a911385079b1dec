//! T8, an 8-bit accumulator machine with 32 bytes of memory.
//!
//! Programs are loaded by a resident bootloader at `25..32` that copies the
//! input stream into memory from address 0 until it reads a zero byte, then
//! jumps to 0. Instruction bytes are `opcode[7:5] | address[4:0]`.

/// Bytes of T8 memory.
pub const T8_MEMORY_BYTES: usize = 32;
/// First address `STR` cannot write.
pub const T8_ROM_START: u8 = 25;
/// Address execution starts at.
pub const T8_RESET_PC: u8 = 28;
/// Resident bootloader, stored at [`T8_ROM_START`].
pub const T8_BOOTLOADER: [u8; 7] = [56, 95, 24, 224, 160, 152, 1];
/// Steps after which [`T8Machine::emulate`] gives up on a program.
pub const T8_DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// T8 opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum T8Opcode {
    /// `mem[a] = r0` for writable addresses.
    Str,
    /// `r0 = mem[a]`.
    Ldr,
    /// `r0 += mem[a]`, carry on unsigned overflow.
    Add,
    /// `r0 -= mem[a]`, carry on borrow.
    Sub,
    /// Jump to `a`.
    Jmp,
    /// Jump to `a` when `r0 == 0`.
    Ifz,
    /// Jump to `a` when carry is set.
    Ifc,
    /// Read the next input into `r0`.
    In,
    /// Emit `r0`.
    Out,
}

impl T8Opcode {
    /// Splits an instruction byte into opcode and address.
    #[must_use]
    pub const fn decode(byte: u8) -> (Self, u8) {
        let address = byte & 0x1F;
        let opcode = match byte >> 5 {
            0 => Self::Str,
            1 => Self::Ldr,
            2 => Self::Add,
            3 => Self::Sub,
            4 => Self::Jmp,
            5 => Self::Ifz,
            6 => Self::Ifc,
            _ if byte & 0x10 == 0 => Self::In,
            _ => Self::Out,
        };
        (opcode, address)
    }

    /// Encodes this opcode with `address` (ignored for `IN`/`OUT`).
    #[must_use]
    pub const fn encode(self, address: u8) -> u8 {
        let address = address & 0x1F;
        match self {
            Self::Str => address,
            Self::Ldr => 0x20 | address,
            Self::Add => 0x40 | address,
            Self::Sub => 0x60 | address,
            Self::Jmp => 0x80 | address,
            Self::Ifz => 0xA0 | address,
            Self::Ifc => 0xC0 | address,
            Self::In => 0xE0,
            Self::Out => 0xF0,
        }
    }

    /// Returns `true` for opcodes that take an address operand.
    #[must_use]
    pub const fn takes_address(self) -> bool {
        !matches!(self, Self::In | Self::Out)
    }
}

/// Why [`T8Machine::emulate`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum T8Stop {
    /// `IN` found the input stream exhausted.
    InputExhausted,
    /// `OUT` found `max_outputs` values already emitted.
    OutputLimit,
    /// The step limit was reached.
    StepLimit,
}

/// Result of an emulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct T8Outcome {
    /// Values emitted by `OUT`, in order.
    pub outputs: Vec<u8>,
    /// Stop reason.
    pub stop: T8Stop,
    /// Instructions executed, including the bootloader's.
    pub steps: u64,
}

/// T8 machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct T8Machine {
    memory: [u8; T8_MEMORY_BYTES],
    pc: u8,
    r0: u8,
    carry: bool,
}

impl Default for T8Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl T8Machine {
    /// Power-on state: zeroed memory, bootloader resident, PC at the bootloader.
    #[must_use]
    pub fn new() -> Self {
        let mut memory = [0; T8_MEMORY_BYTES];
        memory[usize::from(T8_ROM_START)..].copy_from_slice(&T8_BOOTLOADER);
        Self {
            memory,
            pc: T8_RESET_PC,
            r0: 0,
            carry: false,
        }
    }

    /// Memory contents.
    #[must_use]
    pub const fn memory(&self) -> &[u8; T8_MEMORY_BYTES] {
        &self.memory
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u8 {
        self.pc
    }

    /// Accumulator.
    #[must_use]
    pub const fn r0(&self) -> u8 {
        self.r0
    }

    /// Carry flag.
    #[must_use]
    pub const fn carry(&self) -> bool {
        self.carry
    }

    /// Boots `program` with `inputs` and runs until an I/O stop condition.
    ///
    /// The input stream is the program up to and including its first zero
    /// byte (one is appended when absent), followed by `inputs`.
    pub fn emulate(&mut self, program: &[u8], inputs: &[u8], max_outputs: usize) -> Vec<u8> {
        self.emulate_bounded(program, inputs, max_outputs, T8_DEFAULT_STEP_LIMIT)
            .outputs
    }

    /// Like [`T8Machine::emulate`], stopping after at most `step_limit` instructions.
    pub fn emulate_bounded(
        &mut self,
        program: &[u8],
        inputs: &[u8],
        max_outputs: usize,
        step_limit: u64,
    ) -> T8Outcome {
        let stream = input_stream(program, inputs);
        let mut next_input = 0;
        let mut outputs = Vec::new();
        let mut steps = 0;
        let stop = loop {
            if steps == step_limit {
                break T8Stop::StepLimit;
            }
            let (opcode, address) = T8Opcode::decode(self.memory[usize::from(self.pc)]);
            let operand = self.memory[usize::from(address)];
            match opcode {
                T8Opcode::Str => {
                    if address < T8_ROM_START {
                        self.memory[usize::from(address)] = self.r0;
                    }
                }
                T8Opcode::Ldr => self.r0 = operand,
                T8Opcode::Add => {
                    let (result, carry) = self.r0.overflowing_add(operand);
                    self.r0 = result;
                    self.carry = carry;
                }
                T8Opcode::Sub => {
                    let (result, borrow) = self.r0.overflowing_sub(operand);
                    self.r0 = result;
                    self.carry = borrow;
                }
                T8Opcode::Jmp | T8Opcode::Ifz | T8Opcode::Ifc => {
                    let taken = match opcode {
                        T8Opcode::Ifz => self.r0 == 0,
                        T8Opcode::Ifc => self.carry,
                        _ => true,
                    };
                    steps += 1;
                    if taken {
                        self.pc = address;
                    } else {
                        self.advance();
                    }
                    continue;
                }
                T8Opcode::In => {
                    let Some(&value) = stream.get(next_input) else {
                        break T8Stop::InputExhausted;
                    };
                    self.r0 = value;
                    next_input += 1;
                }
                T8Opcode::Out => {
                    if outputs.len() == max_outputs {
                        break T8Stop::OutputLimit;
                    }
                    outputs.push(self.r0);
                }
            }
            steps += 1;
            self.advance();
        };
        T8Outcome {
            outputs,
            stop,
            steps,
        }
    }

    const fn advance(&mut self) {
        self.pc = (self.pc + 1) & 0x1F;
    }
}

fn input_stream(program: &[u8], inputs: &[u8]) -> Vec<u8> {
    let loaded = program
        .iter()
        .position(|&byte| byte == 0)
        .map_or(program, |end| &program[..=end]);
    let mut stream = loaded.to_vec();
    if stream.last() != Some(&0) {
        stream.push(0);
    }
    stream.extend_from_slice(inputs);
    stream
}
