//! Synchronous trap services, triggered by `TRP` (`spec.md` §4.6, §6).
//!
//! Stateless: every handler reads whatever registers it needs from the
//! `Vm` passed in and performs its I/O inline. Memory touched by a trap
//! goes through the cache like any other data access, so trap I/O
//! still contributes to the reported cycle count.

use std::io::{self, Read, Write};

use crate::error::Fault;
use crate::memory::Width;
use crate::registers::{NAMES, NUM_REGISTERS};
use crate::vm::{StepOutcome, Vm};

/// Maximum length of a Pascal-style string (`spec.md` §6).
const MAX_PASCAL_LEN: usize = 255;

pub fn handle(vm: &mut Vm, imm: u32) -> Result<StepOutcome, Fault> {
    match imm {
        0 => {
            println!("Execution completed. Total memory cycles: {}", vm.mem_cycles());
            Ok(StepOutcome::Halt)
        }
        1 => {
            print!("{}", vm.register(3));
            io::stdout().flush().ok();
            Ok(StepOutcome::Continue)
        }
        2 => {
            let value = read_decimal()?;
            vm.set_register(3, value);
            Ok(StepOutcome::Continue)
        }
        3 => {
            let byte = (vm.register(3) & 0xFF) as u8;
            io::stdout().write_all(&[byte]).ok();
            io::stdout().flush().ok();
            Ok(StepOutcome::Continue)
        }
        4 => {
            let byte = read_non_whitespace_char()?;
            vm.set_register(3, byte as u32);
            Ok(StepOutcome::Continue)
        }
        5 => write_pascal_string(vm),
        6 => read_pascal_string(vm),
        98 => dump_registers(vm),
        other => Err(Fault::InvalidTrap { imm: other }),
    }
}

const INVALID_TRAP_2: Fault = Fault::InvalidTrap { imm: 2 };
const INVALID_TRAP_6: Fault = Fault::InvalidTrap { imm: 6 };

fn read_decimal() -> Result<u32, Fault> {
    let mut line = String::new();
    io::stdin().read_line(&mut line).map_err(|_| INVALID_TRAP_2)?;
    let value: i64 = line.trim().parse().map_err(|_| INVALID_TRAP_2)?;
    if !(i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        return Err(INVALID_TRAP_2);
    }
    Ok(value as u32)
}

fn read_non_whitespace_char() -> Result<u8, Fault> {
    let mut byte = [0u8; 1];
    let stdin = io::stdin();
    let mut lock = stdin.lock();
    loop {
        let n = lock.read(&mut byte).map_err(|_| Fault::InvalidTrap { imm: 4 })?;
        if n == 0 {
            return Err(Fault::InvalidTrap { imm: 4 });
        }
        if !byte[0].is_ascii_whitespace() {
            return Ok(byte[0]);
        }
    }
}

fn write_pascal_string(vm: &mut Vm) -> Result<StepOutcome, Fault> {
    let base = vm.register(3);
    let len = vm.cache.read(&mut vm.memory, base, Width::Byte)? as usize;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let addr = base.checked_add(1 + i as u32).ok_or(Fault::MemOob {
            addr: base,
            width: 1,
        })?;
        out.push(vm.cache.read(&mut vm.memory, addr, Width::Byte)? as u8);
    }
    io::stdout().write_all(&out).ok();
    io::stdout().flush().ok();
    Ok(StepOutcome::Continue)
}

fn read_pascal_string(vm: &mut Vm) -> Result<StepOutcome, Fault> {
    let mut line = String::new();
    io::stdin().read_line(&mut line).map_err(|_| INVALID_TRAP_6)?;
    let content = line.strip_suffix('\n').unwrap_or(&line);
    let content = content.strip_suffix('\r').unwrap_or(content);
    if content.len() > MAX_PASCAL_LEN {
        return Err(INVALID_TRAP_6);
    }

    let base = vm.register(3);
    vm.cache
        .write(&mut vm.memory, base, content.len() as u32, Width::Byte)?;
    for (i, byte) in content.bytes().enumerate() {
        let addr = base.checked_add(1 + i as u32).ok_or(INVALID_TRAP_6)?;
        vm.cache.write(&mut vm.memory, addr, byte as u32, Width::Byte)?;
    }
    let nul_addr = base
        .checked_add(1 + content.len() as u32)
        .ok_or(INVALID_TRAP_6)?;
    vm.cache.write(&mut vm.memory, nul_addr, 0, Width::Byte)?;
    Ok(StepOutcome::Continue)
}

fn dump_registers(vm: &mut Vm) -> Result<StepOutcome, Fault> {
    let mut out = String::new();
    for r in 0..NUM_REGISTERS as u8 {
        out.push_str(NAMES[r as usize]);
        out.push('\t');
        out.push_str(&vm.register(r).to_string());
        out.push('\n');
    }
    print!("{out}");
    io::stdout().flush().ok();
    Ok(StepOutcome::Continue)
}

/// Decode validates `TRP`'s immediate against this same set before
/// execute ever calls [`handle`].
pub fn is_known_trap(imm: u32) -> bool {
    matches!(imm, 0 | 1 | 2 | 3 | 4 | 5 | 6 | 98)
}
