// 9.5 Trap Processing / Trap Routines, grounded on
// `examples/original_source/src/opcode/Opcode_control.cpp`'s
// `Trap`/`TrapZero`/`TrapOne`/`TrapTwo` and the per-class trap functions
// that follow them. Every trap here ends in `Abort`: the interpreter loop
// restores PC/SP and re-enters check-reschedule, per 4.3's state machine.

use crate::av::AllocationVector;
use crate::constants::{sd, M_ETT, M_SD};
use crate::error::FatalError;
use crate::memory::Memory;
use crate::registers::Registers;
use crate::types::{high_half, low_half, ControlLink, Word};
use crate::xfer::{xfer, XferFault, XferTrapRequest, XferType};

/// Signals that the current instruction must unwind: PC/SP are restored by
/// the caller (the interpreter's dispatch loop) from its saved copies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Abort;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Trap {
    Bounds,
    Break,
    Code { gfi: Word },
    Control { src: Word },
    DivCheck,
    DivZero { dividend: Word },
    EscOpcode { opcode: u8 },
    InterruptError,
    Opcode { opcode: u8 },
    Pointer,
    Process,
    RescheduleError,
    Stack,
    Unbound { dst: ControlLink },
    Hardware,
    Xfer(XferTrapRequest),
}

fn handler_ptr(trap: &Trap) -> Word {
    match trap {
        Trap::Bounds => M_SD.wrapping_add(sd::S_BOUNDS_TRAP as u32) as Word,
        Trap::Break => M_SD.wrapping_add(sd::S_BREAK_TRAP as u32) as Word,
        Trap::Code { .. } => M_SD.wrapping_add(sd::S_CODE_TRAP as u32) as Word,
        Trap::Control { .. } => M_SD.wrapping_add(sd::S_CONTROL_TRAP as u32) as Word,
        Trap::DivCheck => M_SD.wrapping_add(sd::S_DIV_CHECK_TRAP as u32) as Word,
        Trap::DivZero { .. } => M_SD.wrapping_add(sd::S_DIV_ZERO_TRAP as u32) as Word,
        Trap::EscOpcode { opcode } => M_ETT.wrapping_add(*opcode as u32) as Word,
        Trap::InterruptError => M_SD.wrapping_add(sd::S_INTERRUPT_ERROR as u32) as Word,
        Trap::Opcode { .. } => M_SD.wrapping_add(sd::S_OPCODE_TRAP as u32) as Word,
        Trap::Pointer => M_SD.wrapping_add(sd::S_POINTER_TRAP as u32) as Word,
        Trap::Process => M_SD.wrapping_add(sd::S_PROCESS_TRAP as u32) as Word,
        Trap::RescheduleError => M_SD.wrapping_add(sd::S_RESCHEDULE_ERROR as u32) as Word,
        Trap::Stack => M_SD.wrapping_add(sd::S_STACK_ERROR as u32) as Word,
        Trap::Unbound { .. } => M_SD.wrapping_add(sd::S_UNBOUND_TRAP as u32) as Word,
        Trap::Hardware => M_SD.wrapping_add(sd::S_HARDWARE_ERROR as u32) as Word,
        Trap::Xfer(_) => M_SD.wrapping_add(sd::S_XFER_TRAP as u32) as Word,
    }
}

/// Zero, one, or two parameters written into the new frame's LF[0..2],
/// mirroring `TrapZero`/`TrapOne`/`TrapTwo`.
fn params(trap: &Trap) -> Vec<Word> {
    match trap {
        Trap::Code { gfi } => vec![*gfi],
        Trap::DivZero { dividend } => vec![*dividend],
        Trap::Control { src } => vec![*src],
        Trap::Opcode { opcode } | Trap::EscOpcode { opcode } => vec![*opcode as Word],
        Trap::Unbound { dst } => {
            let packed = dst.pack();
            vec![low_half(packed), high_half(packed)]
        }
        Trap::Xfer(req) => {
            let packed = req.dst.pack();
            vec![low_half(packed), high_half(packed), req.xfer_type as u16 as Word]
        }
        _ => Vec::new(),
    }
}

/// Dispatches `trap`, running its handler against a fresh frame and ending
/// in `Abort`. `saved_pc`/`saved_sp` are the values captured at the start of
/// the aborted instruction; when the current context is still valid they
/// are spilled into the outgoing frame's `pc` slot before the transfer runs,
/// matching `Trap`'s `ValidContext()` check.
pub fn dispatch(
    regs: &mut Registers,
    mem: &mut Memory,
    av: &AllocationVector,
    trap: Trap,
    saved_pc: Word,
) -> Result<Abort, FatalError> {
    let src = regs.lf;
    if regs.lf != 0 {
        let _ = mem.store_mds(regs.lf.wrapping_add(2), saved_pc);
    }

    let handler = handler_ptr(&trap);
    let dst = mem
        .read_dbl_mds(handler)
        .map(ControlLink::unpack)
        .map_err(|_| FatalError::Unreachable {
            what: format!("trap handler link unreadable at {handler:#x}"),
            location: "trap::dispatch",
        })?;

    let outcome = xfer(regs, mem, av, dst, src, XferType::Trap, false);
    let escalated = match outcome {
        Ok(None) => None,
        Ok(Some(req)) => Some(req),
        Err(fault) => {
            return Err(FatalError::Unreachable {
                what: format!("trap handler resolution failed: {fault:?}"),
                location: "trap::dispatch",
            })
        }
    };

    let effective = match escalated {
        Some(req) => Trap::Xfer(req),
        None => trap,
    };
    for (i, word) in params(&effective).into_iter().enumerate() {
        let _ = mem.store_mds(regs.lf.wrapping_add(i as Word), word);
    }

    Ok(Abort)
}

/// Converts a fault observed mid-XFER-resolution into the trap that must
/// run next, per the `UnboundTrap`/`CodeTrap`/`ControlTrap` correspondence in
/// 4.3. `FrameFault` is handled separately by the caller (`interp::raise_fault`)
/// before this runs -- it unwinds the instruction and raises a reschedule
/// request instead of dispatching a trap frame, so it never reaches here.
pub fn trap_for_xfer_fault(fault: XferFault) -> Trap {
    match fault {
        XferFault::Code { gfi } => Trap::Code { gfi },
        XferFault::Unbound { dst } => Trap::Unbound { dst },
        XferFault::Control { src } => Trap::Control { src },
        XferFault::FrameFault { .. } => unreachable!("FrameFault is handled by raise_fault before trap_for_xfer_fault runs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::AllocationVector;
    use crate::constants::M_AV;
    use crate::types::MapFlags;

    fn fresh() -> (Registers, Memory, AllocationVector) {
        let mut mem = Memory::new(22, 22, 8);
        mem.write_map(0, MapFlags::default(), 0);
        mem.write_map(1, MapFlags::default(), 1);
        mem.set_mds(0);
        (Registers::default(), mem, AllocationVector::new(M_AV as Word, 16))
    }

    #[test]
    fn unreadable_handler_is_fatal_not_abort() {
        let (mut regs, mut mem, av) = fresh();
        let err = dispatch(&mut regs, &mut mem, &av, Trap::Stack, 0);
        assert!(err.is_err());
    }
}
