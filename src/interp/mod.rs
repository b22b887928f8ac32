// The instruction execution loop, 4.2's "Execution loop per instruction".
// Generalizes the teacher's `CPU::clock_cycle` (fetch/decode/execute over a
// 68000 instruction stream) to the MOP/ESC dispatch model.

pub mod dispatch;
pub mod esc;
pub mod mop;

use log::trace;

use crate::error::FatalError;
use crate::machine::Machine;
use crate::memory::Fault;
use crate::scheduler::FaultKind;
use crate::trap::{self, Trap};
use crate::types::Word;

pub use dispatch::OpFn;

/// The Rust-native replacement for the teacher's exception-based control
/// flow: `Continue` retires the instruction normally, `Abort` unwinds PC/SP
/// back to their saved values and re-enters check-reschedule, per 4.2 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Continue,
    Abort,
}

/// Runs `trap` to completion and reports the result as `StepResult::Abort`,
/// the shape every opcode handler uses when it discovers a fault.
pub fn raise(machine: &mut Machine, trap: Trap, saved_pc: Word) -> Result<StepResult, FatalError> {
    trap::dispatch(&mut machine.regs, &mut machine.mem, &machine.av, trap, saved_pc)?;
    Ok(StepResult::Abort)
}

/// Restores PC/SP to their pre-instruction values and raises the distinct
/// `reschedule_fault` signal instead of running a trap frame synchronously:
/// faults are not ordinary SD traps (per §7's Abort semantics for
/// PageFault/WriteProtectFault/FrameFault), they unwind the instruction and
/// ask the processor loop to check for other runnable work. `saved_sp` comes
/// from `machine.saved_sp`, set once per step, so this can be called from
/// deep inside an opcode handler without widening `OpFn`.
pub fn raise_fault(machine: &mut Machine, kind: FaultKind, va: u32, saved_pc: Word) -> Result<StepResult, FatalError> {
    machine.regs.pc = saved_pc;
    machine.regs.sp = machine.saved_sp;
    machine.signals.raise_fault(kind, va);
    Ok(StepResult::Abort)
}

pub fn raise_memory_fault(
    machine: &mut Machine,
    fault: Fault,
    saved_pc: Word,
) -> Result<StepResult, FatalError> {
    let (kind, va) = match fault {
        Fault::PageFault(va) => (FaultKind::Page, va),
        Fault::WriteProtectFault(va) => (FaultKind::WriteProtect, va),
    };
    raise_fault(machine, kind, va, saved_pc)
}

/// Executes one instruction: fetch, dispatch, and on `Abort` restore PC/SP
/// so the next call to `step` re-enters at a clean instruction boundary.
pub fn step(machine: &mut Machine) -> Result<StepResult, FatalError> {
    let saved_pc = machine.regs.pc;
    machine.saved_sp = machine.regs.sp;

    let code = match machine.mem.get_code_byte(&mut machine.regs.pc) {
        Ok(b) => b,
        Err(fault) => return raise_memory_fault(machine, fault, saved_pc),
    };

    machine.last_mop = Some(code);
    let (handler, operand) = dispatch::mop_entry(code);
    let result = handler(machine, operand, saved_pc);
    machine.last_mop = None;

    match result {
        Ok(StepResult::Continue) => {
            machine.stats_mop[code as usize] += 1;
            Ok(StepResult::Continue)
        }
        Ok(StepResult::Abort) => {
            // The opcode handler already ran the trap machinery to
            // completion: `regs.pc`/`lf`/`gf`/`cb` are committed to the
            // handler's frame by `xfer()`, and any stack effects the
            // handler performed before discovering the fault (e.g. UDIV's
            // operand pops) are deliberately left in place. Nothing here
            // needs undoing.
            trace!("instruction aborted at pc={saved_pc:#06x}");
            Ok(StepResult::Abort)
        }
        Err(e) => Err(e),
    }
}

/// `ESC`/`ESCL` bridge: fetch a second code byte and dispatch through the
/// escape table. Statistics for the escape opcode are bumped the same way
/// as the primary table: after execution, and only when it completes
/// normally, so an escape opcode that aborts into a trap is not counted.
pub fn dispatch_esc(machine: &mut Machine, saved_pc: Word) -> Result<StepResult, FatalError> {
    let code = match machine.mem.get_code_byte(&mut machine.regs.pc) {
        Ok(b) => b,
        Err(fault) => return raise_memory_fault(machine, fault, saved_pc),
    };
    machine.last_esc = Some(code);
    let (handler, operand) = dispatch::esc_entry(code);
    let result = handler(machine, operand, saved_pc);
    machine.last_esc = None;
    if let Ok(StepResult::Continue) = result {
        machine.stats_esc[code as usize] += 1;
    }
    result
}
