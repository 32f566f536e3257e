//! Instruction execute: the effect each opcode has on registers,
//! memory, and control flow (`spec.md` §4.4).
//!
//! Every function here takes the already-fetched-and-decoded
//! instruction and the owning [`Vm`], and returns whatever [`Fault`]
//! the operation raises. Arithmetic is 32-bit two's complement;
//! overflow wraps rather than traps, per `spec.md` §4.4's general
//! rule.

use crate::decode::{Decoded, Opcode};
use crate::error::Fault;
use crate::memory::Width;
use crate::registers::{FP, HP, PC, SB, SL, SP};
use crate::trap;
use crate::vm::{StepOutcome, Vm};

pub fn execute(vm: &mut Vm, d: &Decoded) -> Result<StepOutcome, Fault> {
    use Opcode::*;

    match d.op {
        Jmp => vm.set_register(PC, d.immediate),
        Jmr => vm.set_register(PC, d.rv1),
        Bnz => branch_if(vm, d, |v| v != 0),
        Bgt => branch_if(vm, d, |v| v > 0),
        Blt => branch_if(vm, d, |v| v < 0),
        Brz => branch_if(vm, d, |v| v == 0),

        Mov => vm.set_register(d.operand_1, d.rv1),
        Movi => vm.set_register(d.operand_1, d.immediate),
        Lda => vm.set_register(d.operand_1, d.immediate),

        Str => {
            vm.cache.write(&mut vm.memory, d.immediate, d.rv1, Width::Word)?;
        }
        Stb => {
            vm.cache.write(&mut vm.memory, d.immediate, d.rv1, Width::Byte)?;
        }
        Ldr => {
            let v = vm.cache.read(&mut vm.memory, d.immediate, Width::Word)?;
            vm.set_register(d.operand_1, v);
        }
        Ldb => {
            let v = vm.cache.read(&mut vm.memory, d.immediate, Width::Byte)?;
            vm.set_register(d.operand_1, v);
        }

        // Effective address is the *value* of the address register (rg).
        Istr => {
            vm.cache.write(&mut vm.memory, d.rv2, d.rv1, Width::Word)?;
        }
        Istb => {
            vm.cache.write(&mut vm.memory, d.rv2, d.rv1, Width::Byte)?;
        }
        Ildr => {
            let v = vm.cache.read(&mut vm.memory, d.rv1, Width::Word)?;
            vm.set_register(d.operand_1, v);
        }
        Ildb => {
            let v = vm.cache.read(&mut vm.memory, d.rv1, Width::Byte)?;
            vm.set_register(d.operand_1, v);
        }

        Add => vm.set_register(d.operand_1, d.rv1.wrapping_add(d.rv2)),
        Sub => vm.set_register(d.operand_1, d.rv1.wrapping_sub(d.rv2)),
        Mul => vm.set_register(d.operand_1, d.rv1.wrapping_mul(d.rv2)),
        Div => {
            if d.rv2 == 0 {
                return Err(Fault::DivByZero);
            }
            vm.set_register(d.operand_1, d.rv1.wrapping_div(d.rv2));
        }
        Sdiv => {
            if d.rv2 == 0 {
                return Err(Fault::DivByZero);
            }
            let q = (d.rv1 as i32).wrapping_div(d.rv2 as i32);
            vm.set_register(d.operand_1, q as u32);
        }
        And => vm.set_register(d.operand_1, truthy(d.rv1 != 0 && d.rv2 != 0)),
        Or => vm.set_register(d.operand_1, truthy(d.rv1 != 0 || d.rv2 != 0)),

        Addi => vm.set_register(d.operand_1, d.rv1.wrapping_add(d.immediate)),
        Subi => vm.set_register(d.operand_1, d.rv1.wrapping_sub(d.immediate)),
        Muli => vm.set_register(d.operand_1, d.rv1.wrapping_mul(d.immediate)),
        Divi => {
            if d.immediate == 0 {
                return Err(Fault::DivByZero);
            }
            let q = (d.rv1 as i32).wrapping_div(d.immediate as i32);
            vm.set_register(d.operand_1, q as u32);
        }

        Cmp => vm.set_register(d.operand_1, signum(d.rv1 as i32, d.rv2 as i32)),
        Cmpi => vm.set_register(d.operand_1, signum(d.rv1 as i32, d.immediate as i32)),

        Trp => return trap::handle(vm, d.immediate),

        Alci => heap_alloc(vm, d.operand_1, d.immediate)?,
        Allc => {
            let n = vm.cache.read(&mut vm.memory, d.immediate, Width::Word)?;
            heap_alloc(vm, d.operand_1, n)?;
        }
        Iallc => {
            let n = vm.cache.read(&mut vm.memory, d.rv1, Width::Word)?;
            heap_alloc(vm, d.operand_1, n)?;
        }

        Pshr => push(vm, d.rv1, Width::Word)?,
        Pshb => push(vm, d.rv1, Width::Byte)?,
        Popr => {
            let v = pop(vm, Width::Word)?;
            vm.set_register(d.operand_1, v);
        }
        Popb => {
            let v = pop(vm, Width::Byte)?;
            vm.set_register(d.operand_1, v);
        }

        Call => {
            if d.immediate >= vm.mem_size() {
                return Err(Fault::InvalidAddr { addr: d.immediate });
            }
            let ret_addr = vm.pc();
            push(vm, ret_addr, Width::Word)?;
            vm.set_register(PC, d.immediate);
        }
        Ret => {
            let target = pop(vm, Width::Word)?;
            if target >= vm.mem_size() {
                return Err(Fault::InvalidAddr { addr: target });
            }
            vm.set_register(PC, target);
        }
    }

    Ok(StepOutcome::Continue)
}

fn branch_if(vm: &mut Vm, d: &Decoded, cond: impl Fn(i32) -> bool) {
    if cond(d.rv1 as i32) {
        vm.set_register(PC, d.immediate);
    }
}

fn truthy(b: bool) -> u32 {
    if b {
        1
    } else {
        0
    }
}

/// `CMP`/`CMPI`'s signed three-way comparison, written as 32-bit two's
/// complement `-1`/`0`/`1`.
fn signum(a: i32, b: i32) -> u32 {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => (-1i32) as u32,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// `ALCI`/`ALLC`/`IALLC`: bump HP by `n`, handing the old HP to `rd`.
/// Fails if the new HP would run into the stack or past memory's end.
fn heap_alloc(vm: &mut Vm, rd: u8, n: u32) -> Result<(), Fault> {
    let hp = vm.register(HP);
    let sp = vm.register(SP);
    let mem_size = vm.mem_size();
    match hp.checked_add(n) {
        Some(new_hp) if new_hp <= sp && new_hp <= mem_size => {
            vm.set_register(rd, hp);
            vm.set_register(HP, new_hp);
            Ok(())
        }
        _ => Err(Fault::HeapOverflow {
            hp,
            requested: n,
            sp,
        }),
    }
}

/// Validate that moving `SP` to `new_sp` keeps it within `[SL, SB]`.
fn check_stack_bound(vm: &Vm, new_sp: u32) -> Result<(), Fault> {
    let sl = vm.register(SL);
    let sb = vm.register(SB);
    if new_sp < sl || new_sp > sb {
        Err(Fault::StackFault {
            attempted: new_sp,
            sl,
            sb,
        })
    } else {
        Ok(())
    }
}

fn push(vm: &mut Vm, value: u32, width: Width) -> Result<(), Fault> {
    let sp = vm.register(SP);
    let new_sp = match sp.checked_sub(width.bytes()) {
        Some(n) => n,
        None => return Err(Fault::StackFault {
            attempted: sp.wrapping_sub(width.bytes()),
            sl: vm.register(SL),
            sb: vm.register(SB),
        }),
    };
    check_stack_bound(vm, new_sp)?;
    vm.cache.write(&mut vm.memory, new_sp, value, width)?;
    vm.set_register(SP, new_sp);
    Ok(())
}

fn pop(vm: &mut Vm, width: Width) -> Result<u32, Fault> {
    let sp = vm.register(SP);
    let new_sp = match sp.checked_add(width.bytes()) {
        Some(n) => n,
        None => return Err(Fault::StackFault {
            attempted: sp.wrapping_add(width.bytes()),
            sl: vm.register(SL),
            sb: vm.register(SB),
        }),
    };
    check_stack_bound(vm, new_sp)?;
    let value = vm.cache.read(&mut vm.memory, sp, width)?;
    vm.set_register(SP, new_sp);
    Ok(value)
}
