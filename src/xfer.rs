// The central control-transfer primitive. Grounded on
// `examples/original_source/src/opcode/Opcode_control.cpp`'s `XFER`,
// `CheckForXferTraps`, and the Alloc/Free primitives in `av.rs`.

use crate::av::AllocationVector;
use crate::constants::{MAX_INDIRECT_CHASE, M_GFT};
use crate::memory::Memory;
use crate::registers::Registers;
use crate::types::{ControlLink, DWord, Word};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum XferType {
    Call,
    Return,
    Local,
    Port,
    Trap,
}

/// A condition discovered mid-resolution that must itself dispatch through
/// the trap machinery rather than complete the transfer. The caller (the
/// trap dispatcher) recovers by XFERing to the named handler; `xfer()`
/// leaves no registers committed when one of these is returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum XferFault {
    Code { gfi: Word },
    Unbound { dst: ControlLink },
    Control { src: Word },
    FrameFault { fsi: Word },
}

/// Raised once a transfer has fully committed, asking the caller to run the
/// xfer-trap handler against the *new* context. Distinct from `XferFault`
/// because `LF`/`GFI`/`PC` are already updated by the time this fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct XferTrapRequest {
    pub dst: ControlLink,
    pub src: Word,
    pub xfer_type: XferType,
}

/// Reads GF/CB for a GFI out of the Global Frame Table. One entry is four
/// words: (globalFrame: DWord, codebase: DWord).
fn gft_read(mem: &mut Memory, gfi: Word) -> Result<(DWord, DWord), XferFault> {
    let base = M_GFT + (gfi as u32) * 4;
    let gf = mem
        .read_dbl(base)
        .map_err(|_| XferFault::Unbound { dst: ControlLink::Frame(gfi) })?;
    let cb = mem
        .read_dbl(base + 2)
        .map_err(|_| XferFault::Unbound { dst: ControlLink::Frame(gfi) })?;
    Ok((gf, cb))
}

struct Committed {
    gfi: Word,
    gf: DWord,
    cb: DWord,
    pc: Word,
    lf: Word,
}

fn resolve_old_or_new_procedure(
    mem: &mut Memory,
    av: &AllocationVector,
    gfi: Word,
    pc: Word,
    src: Word,
    dst: ControlLink,
) -> Result<Committed, XferFault> {
    if gfi == 0 {
        return Err(XferFault::Unbound { dst });
    }
    let (gf, cb) = gft_read(mem, gfi)?;
    if cb & 1 != 0 {
        return Err(XferFault::Code { gfi });
    }
    if pc == 0 {
        return Err(XferFault::Unbound { dst });
    }
    let word = mem
        .read_code(((pc / 2) as u32) * 2)
        .map_err(|_| XferFault::Unbound { dst })?;
    let fsi = if pc % 2 == 0 {
        crate::types::high_byte(word) as Word
    } else {
        crate::types::low_byte(word) as Word
    };
    let lf = av.alloc(mem, fsi).map_err(|f| XferFault::FrameFault { fsi: f.fsi })?;
    let new_pc = pc.wrapping_add(1);
    let _ = mem.store_mds(lf, gfi);
    let _ = mem.store_mds(lf.wrapping_add(1), src);
    Ok(Committed { gfi, gf, cb, pc: new_pc, lf })
}

fn resolve_frame(
    mem: &mut Memory,
    wdc: &mut Word,
    frame: Word,
    src: Word,
    xfer_type: XferType,
    dst: ControlLink,
) -> Result<Committed, XferFault> {
    if frame == 0 {
        return Err(XferFault::Control { src });
    }
    let lf = frame;
    let gfi = mem.fetch_mds(lf).unwrap_or(0);
    if gfi == 0 {
        return Err(XferFault::Unbound { dst });
    }
    let (gf, cb) = gft_read(mem, gfi)?;
    if cb & 1 != 0 {
        return Err(XferFault::Code { gfi });
    }
    let pc = mem.fetch_mds(lf.wrapping_add(2)).unwrap_or(0);
    if pc == 0 {
        return Err(XferFault::Unbound { dst });
    }
    if xfer_type == XferType::Trap {
        let _ = mem.store_mds(lf.wrapping_add(1), src);
        *wdc = wdc.saturating_add(1);
    }
    Ok(Committed { gfi, gf, cb, pc, lf })
}

/// Chases `indirect` control links, resolves the result, allocates a frame
/// when the target is a procedure, and commits GF/CB/PC/LF/GFI on success.
/// Trap-type XFER forbids following indirects, per 4.3.
pub fn xfer(
    regs: &mut Registers,
    mem: &mut Memory,
    av: &AllocationVector,
    dst: ControlLink,
    src: Word,
    xfer_type: XferType,
    free: bool,
) -> Result<Option<XferTrapRequest>, XferFault> {
    if xfer_type == XferType::Trap && free {
        return Err(XferFault::Unbound { dst });
    }

    let mut resolved = dst;
    let mut chased = 0;
    while let ControlLink::Indirect(ptr) = resolved {
        if xfer_type == XferType::Trap {
            return Err(XferFault::Unbound { dst });
        }
        chased += 1;
        if chased > MAX_INDIRECT_CHASE {
            return Err(XferFault::Unbound { dst });
        }
        resolved = mem
            .read_dbl_mds(ptr as Word)
            .map(ControlLink::unpack)
            .map_err(|_| XferFault::Unbound { dst })?;
    }

    let committed = match resolved {
        ControlLink::OldProcedure { gf, pc } => {
            let gfi = mem.fetch_mds(gf & !0x3).unwrap_or(0) & !0x3;
            resolve_old_or_new_procedure(mem, av, gfi, pc, src, dst)?
        }
        ControlLink::NewProcedure { gfi, pc } => {
            resolve_old_or_new_procedure(mem, av, gfi, pc, src, dst)?
        }
        ControlLink::Frame(frame) => {
            resolve_frame(mem, &mut regs.xts, frame, src, xfer_type, dst)?
        }
        ControlLink::Indirect(_) => unreachable!("indirect chase loop exits only on non-indirect"),
    };

    if free {
        let prev_fsi = mem.fetch_mds(regs.lf).unwrap_or(0);
        let _ = av.free(mem, prev_fsi, regs.lf);
    }

    regs.lf = committed.lf;
    regs.gfi = committed.gfi;
    regs.gf = committed.gf;
    regs.cb = committed.cb;
    regs.pc = committed.pc;

    Ok(check_xfer_trap(regs, mem, dst, src, xfer_type))
}

/// `CheckForXferTraps`: consult the low bit of XTS against the new global
/// frame's `trapxfers` bit. Shifts XTS right by one either way.
fn check_xfer_trap(
    regs: &mut Registers,
    mem: &mut Memory,
    dst: ControlLink,
    src: Word,
    xfer_type: XferType,
) -> Option<XferTrapRequest> {
    let odd = regs.xts & 1 != 0;
    let trapxfers = mem.fetch(regs.gf).map(|w| w & 1 != 0).unwrap_or(false);
    regs.xts >>= 1;
    if odd && trapxfers {
        Some(XferTrapRequest { dst, src, xfer_type })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MapFlags;

    fn fresh() -> (Registers, Memory, AllocationVector) {
        let mut mem = Memory::new(22, 22, 8);
        mem.write_map(0, MapFlags::default(), 0);
        mem.write_map(1, MapFlags::default(), 1);
        mem.set_mds(0);
        mem.set_cb(0);
        (Registers::default(), mem, AllocationVector::new(0x100, 16))
    }

    #[test]
    fn zero_frame_link_is_control_trap() {
        let (mut regs, mut mem, av) = fresh();
        let err = xfer(
            &mut regs,
            &mut mem,
            &av,
            ControlLink::Frame(0),
            0,
            XferType::Call,
            false,
        )
        .unwrap_err();
        assert_eq!(err, XferFault::Control { src: 0 });
    }

    #[test]
    fn zero_gfi_on_frame_link_is_unbound() {
        let (mut regs, mut mem, av) = fresh();
        let err = xfer(
            &mut regs,
            &mut mem,
            &av,
            ControlLink::Frame(0x50),
            0,
            XferType::Call,
            false,
        )
        .unwrap_err();
        assert_eq!(err, XferFault::Unbound { dst: ControlLink::Frame(0x50) });
    }

    #[test]
    fn trap_type_xfer_rejects_indirect_link() {
        let (mut regs, mut mem, av) = fresh();
        let err = xfer(
            &mut regs,
            &mut mem,
            &av,
            ControlLink::Indirect(0x10),
            0,
            XferType::Trap,
            false,
        )
        .unwrap_err();
        assert_eq!(err, XferFault::Unbound { dst: ControlLink::Indirect(0x10) });
    }
}
