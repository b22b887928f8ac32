// MOP (primary opcode) family implementations, grounded on spec §4.2's
// "MOP families" list. Each handler receives the family operand baked into
// its opcode slot by `dispatch.rs` (e.g. which of LI0..LI10 it is).

use super::{dispatch_esc, raise, raise_memory_fault, StepResult};
use crate::error::FatalError;
use crate::machine::Machine;
use crate::trap::Trap;
use crate::types::{FieldDesc, Word};
use crate::xfer::{xfer, XferType};

macro_rules! try_mem {
    ($machine:expr, $saved_pc:expr, $result:expr) => {
        match $result {
            Ok(v) => v,
            Err(fault) => return raise_memory_fault($machine, fault, $saved_pc),
        }
    };
}

macro_rules! try_stack {
    ($machine:expr, $saved_pc:expr, $result:expr) => {
        match $result {
            Ok(v) => v,
            Err(_) => return raise($machine, Trap::Stack, $saved_pc),
        }
    };
}

/// Unassigned opcode slot: raises `OpcodeTrap(code)`.
pub fn opcode_trap_stub(machine: &mut Machine, code: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    raise(machine, Trap::Opcode { opcode: code }, saved_pc)
}

// -- Load immediate ----------------------------------------------------------

pub fn load_immediate_n(machine: &mut Machine, n: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    try_stack!(machine, saved_pc, machine.regs.push(n as Word));
    Ok(StepResult::Continue)
}

pub fn load_immediate_neg1(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    try_stack!(machine, saved_pc, machine.regs.push(0xFFFF));
    Ok(StepResult::Continue)
}

pub fn load_immediate_min_int(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    try_stack!(machine, saved_pc, machine.regs.push(0x8000));
    Ok(StepResult::Continue)
}

pub fn load_immediate_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    try_stack!(machine, saved_pc, machine.regs.push(b as Word));
    Ok(StepResult::Continue)
}

pub fn load_immediate_word(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let w = try_mem!(machine, saved_pc, machine.mem.get_code_word(&mut machine.regs.pc));
    try_stack!(machine, saved_pc, machine.regs.push(w));
    Ok(StepResult::Continue)
}

pub fn load_immediate_neg_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    try_stack!(machine, saved_pc, machine.regs.push((!(b as Word)).wrapping_add(1)));
    Ok(StepResult::Continue)
}

pub fn load_immediate_high_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    try_stack!(machine, saved_pc, machine.regs.push((b as Word) << 8));
    Ok(StepResult::Continue)
}

// -- Local / global address --------------------------------------------------

pub fn local_address_n(machine: &mut Machine, k: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let addr = machine.regs.lf.wrapping_add(k as Word);
    try_stack!(machine, saved_pc, machine.regs.push(addr));
    Ok(StepResult::Continue)
}

pub fn local_address_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let addr = machine.regs.lf.wrapping_add(k as Word);
    try_stack!(machine, saved_pc, machine.regs.push(addr));
    Ok(StepResult::Continue)
}

pub fn local_address_word(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_word(&mut machine.regs.pc));
    let addr = machine.regs.lf.wrapping_add(k);
    try_stack!(machine, saved_pc, machine.regs.push(addr));
    Ok(StepResult::Continue)
}

/// `GAn`: pushes the truncated low half of `GF + k` -- a short pointer,
/// unlike `LGAn`'s full long pointer.
pub fn global_address_n(machine: &mut Machine, k: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord) as Word;
    try_stack!(machine, saved_pc, machine.regs.push(addr));
    Ok(StepResult::Continue)
}

pub fn global_address_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord) as Word;
    try_stack!(machine, saved_pc, machine.regs.push(addr));
    Ok(StepResult::Continue)
}

pub fn global_address_word(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_word(&mut machine.regs.pc));
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord) as Word;
    try_stack!(machine, saved_pc, machine.regs.push(addr));
    Ok(StepResult::Continue)
}

/// `LGA0`/`LGAB`/`LGAW`: push the full, untruncated `GF + k` as a long
/// pointer, unlike `GAn`'s truncated short pointer.
pub fn load_global_address_n(machine: &mut Machine, k: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord);
    try_stack!(machine, saved_pc, machine.regs.push_long(addr));
    Ok(StepResult::Continue)
}

pub fn load_global_address_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord);
    try_stack!(machine, saved_pc, machine.regs.push_long(addr));
    Ok(StepResult::Continue)
}

pub fn load_global_address_word(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_word(&mut machine.regs.pc));
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord);
    try_stack!(machine, saved_pc, machine.regs.push_long(addr));
    Ok(StepResult::Continue)
}

// -- Read ---------------------------------------------------------------------

pub fn read_local_n(machine: &mut Machine, k: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let addr = machine.regs.lf.wrapping_add(k as Word) as u32;
    let v = try_mem!(machine, saved_pc, machine.mem.fetch_mds(addr as Word));
    try_stack!(machine, saved_pc, machine.regs.push(v));
    Ok(StepResult::Continue)
}

pub fn read_local_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let addr = machine.regs.lf.wrapping_add(k as Word);
    let v = try_mem!(machine, saved_pc, machine.mem.fetch_mds(addr));
    try_stack!(machine, saved_pc, machine.regs.push(v));
    Ok(StepResult::Continue)
}

/// `RL0`: dereference the pointer on top of stack, read word 0.
pub fn read_indirect_local_zero(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let v = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_stack!(machine, saved_pc, machine.regs.push(v));
    Ok(StepResult::Continue)
}

pub fn read_indirect_local_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let v = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr.wrapping_add(k as Word)));
    try_stack!(machine, saved_pc, machine.regs.push(v));
    Ok(StepResult::Continue)
}

pub fn read_double_zero(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let addr = machine.regs.lf;
    let v = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(addr));
    try_stack!(machine, saved_pc, machine.regs.push_long(v));
    Ok(StepResult::Continue)
}

pub fn read_double_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let addr = machine.regs.lf.wrapping_add(k as Word);
    let v = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(addr));
    try_stack!(machine, saved_pc, machine.regs.push_long(v));
    Ok(StepResult::Continue)
}

pub fn read_double_indirect_zero(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let v = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(ptr));
    try_stack!(machine, saved_pc, machine.regs.push_long(v));
    Ok(StepResult::Continue)
}

pub fn read_double_indirect_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let v = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(ptr.wrapping_add(k as Word)));
    try_stack!(machine, saved_pc, machine.regs.push_long(v));
    Ok(StepResult::Continue)
}

// -- Write / post-store -------------------------------------------------------

pub fn write_local_n(machine: &mut Machine, k: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    let addr = machine.regs.lf.wrapping_add(k as Word);
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, v));
    Ok(StepResult::Continue)
}

/// `PSn`: like `Wn` but leaves the pointer addressable again (`Recover`).
pub fn post_store_local_n(machine: &mut Machine, k: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    let addr = machine.regs.lf.wrapping_add(k as Word);
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, v));
    try_stack!(machine, saved_pc, machine.regs.recover());
    Ok(StepResult::Continue)
}

pub fn write_local_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    let addr = machine.regs.lf.wrapping_add(k as Word);
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, v));
    Ok(StepResult::Continue)
}

pub fn write_indirect_local_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr.wrapping_add(k as Word), v));
    Ok(StepResult::Continue)
}

pub fn post_store_indirect_local_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.top());
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr.wrapping_add(k as Word), v));
    Ok(StepResult::Continue)
}

pub fn write_double_zero(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let addr = machine.regs.lf;
    let lo = (v & 0xFFFF) as Word;
    let hi = (v >> 16) as Word;
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, lo));
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr.wrapping_add(1), hi));
    Ok(StepResult::Continue)
}

pub fn post_store_double_zero(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let addr = machine.regs.lf;
    let lo = (v & 0xFFFF) as Word;
    let hi = (v >> 16) as Word;
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, lo));
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr.wrapping_add(1), hi));
    try_stack!(machine, saved_pc, machine.regs.recover());
    try_stack!(machine, saved_pc, machine.regs.recover());
    Ok(StepResult::Continue)
}

pub fn write_double_indirect_local(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let lo = (v & 0xFFFF) as Word;
    let hi = (v >> 16) as Word;
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, lo));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr.wrapping_add(1), hi));
    Ok(StepResult::Continue)
}

pub fn post_store_double_indirect_local(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let ptr = try_stack!(machine, saved_pc, machine.regs.top());
    let lo = (v & 0xFFFF) as Word;
    let hi = (v >> 16) as Word;
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, lo));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr.wrapping_add(1), hi));
    Ok(StepResult::Continue)
}

// -- Fields -------------------------------------------------------------------

fn pop_field_desc(machine: &mut Machine, saved_pc: Word) -> Result<Result<FieldDesc, StepResult>, FatalError> {
    let packed = try_stack!(machine, saved_pc, machine.regs.pop());
    match FieldDesc::new((packed >> 8) as u8, (packed & 0xFF) as u8) {
        Ok(fd) => Ok(Ok(fd)),
        Err(_) => Ok(Err(raise(machine, Trap::Bounds, saved_pc)?)),
    }
}

pub fn read_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let word = try_stack!(machine, saved_pc, machine.regs.pop());
    try_stack!(machine, saved_pc, machine.regs.push(fd.read(word)));
    Ok(StepResult::Continue)
}

pub fn write_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, fd.write(word, value)));
    Ok(StepResult::Continue)
}

pub fn post_store_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.top());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, fd.write(word, value)));
    Ok(StepResult::Continue)
}

pub fn read_zero_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(machine.regs.lf));
    try_stack!(machine, saved_pc, machine.regs.push(fd.read(word)));
    Ok(StepResult::Continue)
}

pub fn write_stack_zero_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(machine.regs.lf));
    try_mem!(machine, saved_pc, machine.mem.store_mds(machine.regs.lf, fd.write(word, value)));
    Ok(StepResult::Continue)
}

pub fn write_indirect_local_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, fd.write(word, value)));
    Ok(StepResult::Continue)
}

pub fn post_store_indirect_local_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.top());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, fd.write(word, value)));
    Ok(StepResult::Continue)
}

pub fn read_indirect_local_field_short(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let packed = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let fd = match FieldDesc::new(packed >> 4, packed & 0xF) {
        Ok(fd) => fd,
        Err(_) => return raise(machine, Trap::Bounds, saved_pc),
    };
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_stack!(machine, saved_pc, machine.regs.push(fd.read(word)));
    Ok(StepResult::Continue)
}

pub fn write_indirect_local_field_short(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let packed = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let fd = match FieldDesc::new(packed >> 4, packed & 0xF) {
        Ok(fd) => fd,
        Err(_) => return raise(machine, Trap::Bounds, saved_pc),
    };
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_mem!(machine, saved_pc, machine.mem.store_mds(ptr, fd.write(word, value)));
    Ok(StepResult::Continue)
}

pub fn read_local_indirect_pointer_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = try_mem!(machine, saved_pc, machine.mem.fetch_mds(machine.regs.lf.wrapping_add(k as Word)));
    let word = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr));
    try_stack!(machine, saved_pc, machine.regs.push(fd.read(word)));
    Ok(StepResult::Continue)
}

pub fn read_local_indirect_long_pointer_field(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let fd = match pop_field_desc(machine, saved_pc)? {
        Ok(fd) => fd,
        Err(abort) => return Ok(abort),
    };
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(machine.regs.lf.wrapping_add(k as Word)));
    let word = try_mem!(machine, saved_pc, machine.mem.fetch(ptr));
    try_stack!(machine, saved_pc, machine.regs.push(fd.read(word)));
    Ok(StepResult::Continue)
}

// -- Local frame plumbing -----------------------------------------------------

pub fn store_local_double(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let addr = machine.regs.lf.wrapping_add(k as Word);
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, (v & 0xFFFF) as Word));
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr.wrapping_add(1), (v >> 16) as Word));
    Ok(StepResult::Continue)
}

pub fn store_global_double(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord) as Word;
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr, (v & 0xFFFF) as Word));
    try_mem!(machine, saved_pc, machine.mem.store_mds(addr.wrapping_add(1), (v >> 16) as Word));
    Ok(StepResult::Continue)
}

/// `LLKB`: pushes the control link at `GF + byte` (the "link") as a packed
/// double word.
pub fn load_link_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let addr = machine.regs.gf.wrapping_add(k as crate::types::DWord) as Word;
    let v = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(addr));
    try_stack!(machine, saved_pc, machine.regs.push_long(v));
    Ok(StepResult::Continue)
}

pub fn read_link_indirect_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop());
    let v = try_mem!(machine, saved_pc, machine.mem.fetch_mds(ptr.wrapping_add(k as Word)));
    try_stack!(machine, saved_pc, machine.regs.push(v));
    Ok(StepResult::Continue)
}

pub fn read_link_double_indirect_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let v = try_mem!(machine, saved_pc, machine.mem.fetch(ptr.wrapping_add(k as u32)));
    try_stack!(machine, saved_pc, machine.regs.push(v));
    Ok(StepResult::Continue)
}

pub fn load_link_k_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    try_stack!(machine, saved_pc, machine.regs.push(k as Word));
    Ok(StepResult::Continue)
}

// -- Calls and returns ---------------------------------------------------------

/// `EFCn`: external function call through global-frame slot `n`.
pub fn external_function_call_n(machine: &mut Machine, n: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let ptr = machine.regs.gf.wrapping_add(n as crate::types::DWord) as Word;
    let packed = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(ptr));
    call(machine, crate::types::ControlLink::unpack(packed), saved_pc)
}

pub fn external_function_call_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let w = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = machine.regs.gf.wrapping_add(w as crate::types::DWord) as Word;
    let packed = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(ptr));
    call(machine, crate::types::ControlLink::unpack(packed), saved_pc)
}

/// `LFC`: call through a control link addressed by `LF + byte`.
pub fn local_frame_call(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = machine.regs.lf.wrapping_add(k as Word);
    let packed = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(ptr));
    call(machine, crate::types::ControlLink::unpack(packed), saved_pc)
}

/// `SFC`: call through a control link popped off the stack.
pub fn stack_frame_call(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let packed = try_stack!(machine, saved_pc, machine.regs.pop_long());
    call(machine, crate::types::ControlLink::unpack(packed), saved_pc)
}

fn call(machine: &mut Machine, link: crate::types::ControlLink, saved_pc: Word) -> Result<StepResult, FatalError> {
    let src = machine.regs.lf;
    try_mem!(machine, saved_pc, machine.mem.store_mds(machine.regs.lf.wrapping_add(2), machine.regs.pc));
    match xfer(&mut machine.regs, &mut machine.mem, &machine.av, link, src, XferType::Call, false) {
        Ok(Some(req)) => raise(machine, Trap::Xfer(req), saved_pc),
        Ok(None) => Ok(StepResult::Continue),
        Err(crate::xfer::XferFault::FrameFault { fsi }) => {
            super::raise_fault(machine, crate::scheduler::FaultKind::Frame, fsi as u32, saved_pc)
        }
        Err(fault) => raise(machine, crate::trap::trap_for_xfer_fault(fault), saved_pc),
    }
}

/// `RET`: reads `returnlink` from the current LF and XFERs back to it.
pub fn ret(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let return_link_slot = machine.regs.lf.wrapping_add(1);
    let src = try_mem!(machine, saved_pc, machine.mem.fetch_mds(return_link_slot));
    match xfer(
        &mut machine.regs,
        &mut machine.mem,
        &machine.av,
        crate::types::ControlLink::Frame(src),
        src,
        XferType::Return,
        true,
    ) {
        Ok(Some(req)) => raise(machine, Trap::Xfer(req), saved_pc),
        Ok(None) => Ok(StepResult::Continue),
        Err(crate::xfer::XferFault::FrameFault { fsi }) => {
            super::raise_fault(machine, crate::scheduler::FaultKind::Frame, fsi as u32, saved_pc)
        }
        Err(fault) => raise(machine, crate::trap::trap_for_xfer_fault(fault), saved_pc),
    }
}

/// `KFCB`: call through a control link built from a known frame handle and
/// an immediate byte offset (`(frame_on_stack, byte) -> Frame(frame+byte)`).
pub fn known_frame_call_byte(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let frame = try_stack!(machine, saved_pc, machine.regs.pop());
    call(machine, crate::types::ControlLink::Frame(frame.wrapping_add(k as Word)), saved_pc)
}

/// `XE`: invokes a transfer descriptor popped from the stack, then
/// re-enables interrupts (`EI`'s effect) and raises `InterruptError` if WDC
/// stays nonzero, per §4.2.
pub fn xfer_escape(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let packed = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let result = call(machine, crate::types::ControlLink::unpack(packed), saved_pc)?;
    if result != StepResult::Continue {
        return Ok(result);
    }
    machine.signals.enable_interrupts();
    if !machine.signals.interrupts_enabled() {
        return raise(machine, Trap::InterruptError, saved_pc);
    }
    Ok(StepResult::Continue)
}

/// `XF`: like `XE` but the descriptor lives at `LF + byte` rather than the
/// stack.
pub fn xfer_forward(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let k = try_mem!(machine, saved_pc, machine.mem.get_code_byte(&mut machine.regs.pc));
    let ptr = machine.regs.lf.wrapping_add(k as Word);
    let packed = try_mem!(machine, saved_pc, machine.mem.read_dbl_mds(ptr));
    call(machine, crate::types::ControlLink::unpack(packed), saved_pc)
}

// -- ESC bridge ----------------------------------------------------------------

pub fn esc_bridge(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    dispatch_esc(machine, saved_pc)
}

pub fn esc_bridge_long(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    dispatch_esc(machine, saved_pc)
}
