// ESC (secondary opcode) family implementations, grounded on spec §4.2's
// "ESC families": arithmetic extensions, register access, and the agent
// bridge opcodes (`CALLAGENT`, `MAPDISPLAY`, `STOPEMULATOR`).

use std::sync::atomic::Ordering;

use super::{raise, raise_memory_fault, StepResult};
use crate::error::FatalError;
use crate::machine::Machine;
use crate::trap::Trap;
use crate::types::{rotate_left16, rotate_right16, shift_right_arith32, Word};

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

/// Unassigned ESC slot: raises `EscOpcodeTrap(code)`.
pub fn esc_opcode_trap_stub(machine: &mut Machine, code: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    raise(machine, Trap::EscOpcode { opcode: code }, saved_pc)
}

// -- Map maintenance ------------------------------------------------------------

/// `SM`: installs a map entry. Stack, low to high: vp, flags-byte, real-page.
pub fn store_map(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let rp = try_stack!(machine, saved_pc, machine.regs.pop());
    let flags_word = try_stack!(machine, saved_pc, machine.regs.pop());
    let vp = try_stack!(machine, saved_pc, machine.regs.pop());
    let flags = crate::types::MapFlags {
        fetch: flags_word & 0x1 != 0,
        store: flags_word & 0x2 != 0,
        protect: flags_word & 0x4 != 0,
        vacant: flags_word & 0x8 != 0,
    };
    machine.mem.write_map(vp as u32, flags, rp as u32);
    Ok(StepResult::Continue)
}

/// `SMF`: installs only the flags half of a map entry, keeping real-page.
pub fn store_map_flags(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let flags_word = try_stack!(machine, saved_pc, machine.regs.pop());
    let vp = try_stack!(machine, saved_pc, machine.regs.pop());
    let (_, rp) = machine.mem.read_map(vp as u32);
    let flags = crate::types::MapFlags {
        fetch: flags_word & 0x1 != 0,
        store: flags_word & 0x2 != 0,
        protect: flags_word & 0x4 != 0,
        vacant: flags_word & 0x8 != 0,
    };
    machine.mem.write_map(vp as u32, flags, rp);
    Ok(StepResult::Continue)
}

/// `GMF`: reads a map entry's flags+real-page back as a packed word pair.
pub fn get_map_flags(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let vp = try_stack!(machine, saved_pc, machine.regs.pop());
    let (flags, rp) = machine.mem.read_map(vp as u32);
    let flags_word = (flags.fetch as Word)
        | ((flags.store as Word) << 1)
        | ((flags.protect as Word) << 2)
        | ((flags.vacant as Word) << 3);
    try_stack!(machine, saved_pc, machine.regs.push(flags_word));
    try_stack!(machine, saved_pc, machine.regs.push(rp as Word));
    Ok(StepResult::Continue)
}

// -- Interrupt enable/disable -----------------------------------------------------

pub fn enable_interrupts(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    machine.signals.enable_interrupts();
    if !machine.signals.interrupts_enabled() {
        return raise(machine, Trap::InterruptError, saved_pc);
    }
    Ok(StepResult::Continue)
}

pub fn disable_interrupts(machine: &mut Machine, _: u8, _saved_pc: Word) -> Result<StepResult, FatalError> {
    machine.signals.disable_interrupts();
    Ok(StepResult::Continue)
}

// -- Double-word boolean/arithmetic extensions --------------------------------

pub fn xor(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop());
    let a = try_stack!(machine, saved_pc, machine.regs.pop());
    try_stack!(machine, saved_pc, machine.regs.push(a ^ b));
    Ok(StepResult::Continue)
}

pub fn dand(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long());
    try_stack!(machine, saved_pc, machine.regs.push_long(a & b));
    Ok(StepResult::Continue)
}

pub fn dior(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long());
    try_stack!(machine, saved_pc, machine.regs.push_long(a | b));
    Ok(StepResult::Continue)
}

pub fn dxor(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long());
    try_stack!(machine, saved_pc, machine.regs.push_long(a ^ b));
    Ok(StepResult::Continue)
}

/// `ROTATE`: rotate a single word by the signed count on top of stack
/// (positive = left).
pub fn rotate(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let count = try_stack!(machine, saved_pc, machine.regs.pop()) as i16;
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    let result = if count >= 0 {
        rotate_left16(value, count as u32)
    } else {
        rotate_right16(value, (-count) as u32)
    };
    try_stack!(machine, saved_pc, machine.regs.push(result));
    Ok(StepResult::Continue)
}

/// `DSHIFT`: arithmetic shift of a double word by the signed count on top of
/// stack (positive = left, negative = right).
pub fn dshift(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let count = try_stack!(machine, saved_pc, machine.regs.pop()) as i16;
    let value = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let result = if count >= 0 {
        if count as u32 >= 32 { 0 } else { value << count as u32 }
    } else {
        shift_right_arith32(value, (-count) as u32)
    };
    try_stack!(machine, saved_pc, machine.regs.push_long(result));
    Ok(StepResult::Continue)
}

/// `LINT`: sign-extends a single word to a double word.
pub fn lengthen_int(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let value = try_stack!(machine, saved_pc, machine.regs.pop());
    try_stack!(machine, saved_pc, machine.regs.push_long(crate::types::sign_extend16(value) as u32));
    Ok(StepResult::Continue)
}

pub fn dmul(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop_long()) as i32;
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long()) as i32;
    try_stack!(machine, saved_pc, machine.regs.push_long(a.wrapping_mul(b) as u32));
    Ok(StepResult::Continue)
}

pub fn sdiv(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop()) as i16;
    let a = try_stack!(machine, saved_pc, machine.regs.pop()) as i16;
    if b == 0 {
        return raise(machine, Trap::DivZero { dividend: a as Word }, saved_pc);
    }
    try_stack!(machine, saved_pc, machine.regs.push((a / b) as Word));
    Ok(StepResult::Continue)
}

/// `SDDIV`: signed double-word divide, leaves quotient over remainder.
pub fn sddiv(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop_long()) as i32;
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long()) as i32;
    if b == 0 {
        return raise(machine, Trap::DivZero { dividend: a as Word }, saved_pc);
    }
    try_stack!(machine, saved_pc, machine.regs.push_long((a / b) as u32));
    try_stack!(machine, saved_pc, machine.regs.push_long((a % b) as u32));
    Ok(StepResult::Continue)
}

pub fn udiv(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop());
    let a = try_stack!(machine, saved_pc, machine.regs.pop());
    if b == 0 {
        return raise(machine, Trap::DivZero { dividend: a }, saved_pc);
    }
    try_stack!(machine, saved_pc, machine.regs.push(a / b));
    Ok(StepResult::Continue)
}

/// `LUDIV`: unsigned divide of a double-word dividend by a single-word
/// divisor, leaves a single-word quotient.
pub fn ludiv(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop()) as u32;
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long());
    if b == 0 {
        return raise(machine, Trap::DivZero { dividend: a as Word }, saved_pc);
    }
    try_stack!(machine, saved_pc, machine.regs.push((a / b) as Word));
    Ok(StepResult::Continue)
}

pub fn uddiv(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let b = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let a = try_stack!(machine, saved_pc, machine.regs.pop_long());
    if b == 0 {
        return raise(machine, Trap::DivZero { dividend: a as Word }, saved_pc);
    }
    try_stack!(machine, saved_pc, machine.regs.push_long(a / b));
    try_stack!(machine, saved_pc, machine.regs.push_long(a % b));
    Ok(StepResult::Continue)
}

// -- Processor register access -----------------------------------------------

pub fn read_psb(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    try_stack!(machine, saved_pc, machine.regs.push(machine.regs.psb));
    Ok(StepResult::Continue)
}

pub fn write_psb(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    machine.regs.psb = v;
    Ok(StepResult::Continue)
}

pub fn read_mds(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    try_stack!(machine, saved_pc, machine.regs.push_long(machine.mem.mds()));
    Ok(StepResult::Continue)
}

pub fn write_mds(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop_long());
    machine.mem.set_mds(v);
    Ok(StepResult::Continue)
}

pub fn read_wp(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let wp = machine.signals.wp.load(Ordering::Acquire);
    try_stack!(machine, saved_pc, machine.regs.push(wp));
    Ok(StepResult::Continue)
}

pub fn write_wp(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    machine.signals.wp.store(v, Ordering::Release);
    Ok(StepResult::Continue)
}

pub fn read_wdc(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let wdc = machine.signals.wdc.load(Ordering::Acquire);
    try_stack!(machine, saved_pc, machine.regs.push(wdc));
    Ok(StepResult::Continue)
}

pub fn write_wdc(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    machine.signals.wdc.store(v, Ordering::Release);
    Ok(StepResult::Continue)
}

pub fn read_ptc(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let ptc = machine.signals.ptc.load(Ordering::Acquire);
    try_stack!(machine, saved_pc, machine.regs.push(ptc));
    Ok(StepResult::Continue)
}

pub fn write_ptc(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    machine.signals.ptc.store(v, Ordering::Release);
    Ok(StepResult::Continue)
}

pub fn read_xts(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    try_stack!(machine, saved_pc, machine.regs.push(machine.regs.xts));
    Ok(StepResult::Continue)
}

pub fn write_xts(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    machine.regs.xts = v;
    Ok(StepResult::Continue)
}

pub fn write_mp(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let v = try_stack!(machine, saved_pc, machine.regs.pop());
    machine.signals.mp.store(v, Ordering::Release);
    Ok(StepResult::Continue)
}

pub fn read_it(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let it = machine.signals.it.load(Ordering::Acquire);
    try_stack!(machine, saved_pc, machine.regs.push_long(it));
    Ok(StepResult::Continue)
}

// -- Bounds checks --------------------------------------------------------------

pub fn null_check(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let ptr = try_stack!(machine, saved_pc, machine.regs.top());
    if ptr == 0 {
        return raise(machine, Trap::Pointer, saved_pc);
    }
    Ok(StepResult::Continue)
}

pub fn null_check_long(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let low = try_stack!(machine, saved_pc, machine.regs.top());
    if low == 0 && machine.regs.sp >= 2 && machine.regs.stack[machine.regs.sp as usize - 2] == 0 {
        return raise(machine, Trap::Pointer, saved_pc);
    }
    Ok(StepResult::Continue)
}

/// `BNDCKL`: checks a double-word index against a double-word bound, both
/// popped with the index on top.
pub fn bounds_check_long(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let bound = try_stack!(machine, saved_pc, machine.regs.pop_long());
    let index = try_stack!(machine, saved_pc, machine.regs.pop_long());
    if index >= bound {
        return raise(machine, Trap::Bounds, saved_pc);
    }
    try_stack!(machine, saved_pc, machine.regs.push_long(index));
    Ok(StepResult::Continue)
}

// -- Agent bridge -----------------------------------------------------------------

/// `CALLAGENT`: pops the agent index and runs `AgentTable::call_agent`.
pub fn call_agent(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let index = try_stack!(machine, saved_pc, machine.regs.pop());
    let mut agents = std::mem::replace(&mut machine.agents, crate::agent::AgentTable::new(0));
    agents.call_agent(index as u8, machine);
    machine.agents = agents;
    Ok(StepResult::Continue)
}

/// `MAPDISPLAY`: maps the display band at the virtual page popped off the
/// stack, using whatever real pages `reserve_display` carved out.
pub fn map_display(machine: &mut Machine, _: u8, saved_pc: Word) -> Result<StepResult, FatalError> {
    let vp = try_stack!(machine, saved_pc, machine.regs.pop()) as u32;
    if let Some(rp) = machine.mem.display_real_page() {
        machine.mem.map_display(vp, rp, 1);
    }
    Ok(StepResult::Continue)
}

/// `STOPEMULATOR`: halts the scheduler's run loop, per §5's orderly-shutdown
/// path triggered from inside a running Mesa image.
pub fn stop_emulator(machine: &mut Machine, _: u8, _saved_pc: Word) -> Result<StepResult, FatalError> {
    machine.signals.running.store(false, Ordering::Release);
    machine.signals.stop.store(true, Ordering::Release);
    Ok(StepResult::Continue)
}

