//! Error kinds for the ISA-4380 virtual machine.
//!
//! Two enums cover the two lifecycles of the system: [`LoadError`] can
//! only occur once, while building the initial `Vm`; [`Fault`] can
//! occur on any fetch/decode/execute cycle once the machine is
//! running. Both are non-recoverable from the guest's point of view
//! (see `spec.md` §7) — the controller logs the error and exits.

use thiserror::Error;

/// Errors raised while loading a program image into a fresh `Vm`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open binary image: {0}")]
    FileNotFound(#[from] std::io::Error),

    #[error(
        "insufficient memory: image is {image_len} bytes, memory is {mem_size} bytes (image must be at least 4 and at most mem_size bytes)"
    )]
    InsufficientMemory { image_len: usize, mem_size: u32 },

    #[error("entry point 0x{entry:x} is out of range for a {mem_size}-byte memory")]
    BadEntry { entry: u32, mem_size: u32 },
}

/// Errors raised by decode or execute once the machine is running.
///
/// Every variant corresponds to one of the error kinds named in
/// `spec.md` §7. The controller reports the instruction's starting
/// offset alongside whichever variant is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("fetch out of bounds at pc=0x{pc:x}")]
    FetchOob { pc: u32 },

    #[error("memory access out of bounds: addr=0x{addr:x} width={width}")]
    MemOob { addr: u32, width: u8 },

    #[error("invalid address: 0x{addr:x}")]
    InvalidAddr { addr: u32 },

    #[error("malformed instruction (opcode=0x{opcode:02x})")]
    MalformedInstr { opcode: u8 },

    #[error("division by zero")]
    DivByZero,

    #[error("heap overflow: hp=0x{hp:x} + {requested} exceeds sp=0x{sp:x} or memory size")]
    HeapOverflow { hp: u32, requested: u32, sp: u32 },

    #[error("stack fault: sp would become 0x{attempted:x}, outside [0x{sl:x}, 0x{sb:x}]")]
    StackFault { attempted: u32, sl: u32, sb: u32 },

    #[error("invalid trap immediate or I/O failure: {imm}")]
    InvalidTrap { imm: u32 },
}
