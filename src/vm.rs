//! The virtual machine: owns all architectural state and runs the
//! fetch/decode/execute loop (`spec.md` §2, §4.2, §9).
//!
//! A single `Vm` instance replaces the original C++ implementation's
//! process-wide globals (`reg_file`, `prog_mem`, `cntrl_regs`,
//! `data_regs`, `mem_size`) — see `spec.md` §9's design note and
//! `SPEC_FULL.md` §4.

use crate::cache::{Cache, CacheMode};
use crate::decode::{self, Cntrl};
use crate::error::Fault;
use crate::exec;
use crate::memory::Memory;
use crate::registers::{self, RegisterFile};

/// What happened on the most recently executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halt,
}

#[derive(Debug)]
pub struct Vm {
    pub(crate) registers: RegisterFile,
    pub(crate) memory: Memory,
    pub(crate) cache: Cache,
}

impl Vm {
    /// Build a fresh VM with `mem_size` bytes of memory and the given
    /// cache mode. Registers all start at zero; use `crate::loader`
    /// to load a program image and initialize SL/SB/SP/FP/HP/PC.
    pub fn new(mem_size: u32, cache_mode: CacheMode) -> Self {
        Self {
            registers: RegisterFile::new(),
            memory: Memory::new(mem_size),
            cache: Cache::new(cache_mode),
        }
    }

    pub fn pc(&self) -> u32 {
        self.registers.get(registers::PC)
    }

    pub fn register(&self, r: u8) -> u32 {
        self.registers.get(r)
    }

    pub fn set_register(&mut self, r: u8, value: u32) {
        self.registers.set(r, value);
    }

    pub fn mem_cycles(&self) -> u64 {
        self.cache.cycles()
    }

    pub fn mem_size(&self) -> u32 {
        self.memory.len()
    }

    /// Copy a program image into memory starting at address 0. Used
    /// only by the loader, before any registers are initialized.
    pub(crate) fn load_image(&mut self, image: &[u8]) {
        self.memory
            .write_bytes(0, image)
            .expect("loader validates image length against mem_size before calling this");
    }

    /// Read a single byte without going through the cache. Used by
    /// tests and by the loader's own self-check.
    pub fn peek_byte(&self, addr: u32) -> u8 {
        self.memory.read_byte(addr).expect("address validated by caller")
    }

    /// Fetch the 8-byte instruction at the current PC (`spec.md`
    /// §4.2). On success PC has advanced by 8.
    fn fetch(&mut self) -> Result<Cntrl, Fault> {
        let pc = self.pc();
        let mem_size = self.memory.len();
        if pc.checked_add(8).map_or(true, |end| end > mem_size) {
            return Err(Fault::FetchOob { pc });
        }

        let w1 = self.cache.fetch_word(&mut self.memory, pc, false)?;
        self.registers.set(registers::PC, pc + 4);
        let w2 = self
            .cache
            .fetch_word(&mut self.memory, pc + 4, true)?;
        self.registers.set(registers::PC, pc + 8);

        Ok(Cntrl {
            operation: (w1 & 0xFF) as u8,
            operand_1: ((w1 >> 8) & 0xFF) as u8,
            operand_2: ((w1 >> 16) & 0xFF) as u8,
            operand_3: ((w1 >> 24) & 0xFF) as u8,
            immediate: w2,
        })
    }

    /// Run one fetch/decode/execute cycle.
    pub fn step(&mut self) -> Result<StepOutcome, Fault> {
        let cntrl = self.fetch()?;
        let decoded = decode::decode(&cntrl, &self.registers, self.memory.len())?;
        exec::execute(self, &decoded)
    }

    /// Run until halt (TRP 0) or fault. Returns the starting offset of
    /// the faulting instruction alongside the fault, if any.
    pub fn run(&mut self) -> Result<(), (u32, Fault)> {
        loop {
            let start_pc = self.pc();
            match self.step() {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Halt) => return Ok(()),
                Err(fault) => return Err((start_pc, fault)),
            }
        }
    }
}
