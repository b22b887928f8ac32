// End-to-end tests driving the interpreter, trap dispatch, and scheduler
// through a hand-built `Machine` rather than a real Pilot boot image --
// scenarios mirror the worked examples for stack faults, divide-by-zero,
// page faults, and process rescheduling.

use guam::constants::{sd, C_SV, M_GFT, M_PDA, M_SD};
use guam::interp::{self, StepResult};
use guam::machine::Machine;
use guam::memory::Memory;
use guam::scheduler::{self, FaultKind};
use guam::types::{high_half, low_half, ControlLink, DWord, MapFlags, Word};

/// Builds a `Machine` with every page this suite touches mapped and
/// identity-real-paged, MDS and CB both zero. `AllocationVector` is wired
/// the same way `Machine::new` wires it (base `M_AV`), so tests that never
/// allocate a frame can ignore it.
fn env() -> Machine {
    let mut m = Machine::new(20, 20, 8, 0x80);
    for vp in [0u32, 1, 2, 4, 5, 256, 257, 512, 513] {
        m.mem.write_map(vp, MapFlags::default(), vp);
    }
    m
}

fn store_dword(m: &mut Machine, va: u32, value: DWord) {
    m.mem.store(va, low_half(value)).unwrap();
    m.mem.store(va + 1, high_half(value)).unwrap();
}

/// Wires a trap handler as a `Frame` control link: `slot` is the SD (or
/// fault-queue) entry the trap looks up, `frame` is the pre-existing local
/// frame the handler runs in. Mirrors what `resolve_frame` expects to find
/// already present at `frame`: a nonzero GFI and return PC.
fn install_frame_handler(m: &mut Machine, slot: u32, frame: Word, gfi: Word, gf: DWord, cb: DWord, handler_pc: Word) {
    m.mem.store_mds(frame, gfi).unwrap();
    m.mem.store_mds(frame.wrapping_add(2), handler_pc).unwrap();
    store_dword(m, M_GFT + (gfi as u32) * 4, gf);
    store_dword(m, M_GFT + (gfi as u32) * 4 + 2, cb);
    let packed = ControlLink::Frame(frame).pack();
    store_dword(m, slot, packed);
}

fn write_code_word(m: &mut Machine, word_addr: u32, word: Word) {
    m.mem.store(word_addr, word).unwrap();
}

#[test]
fn stack_underflow_on_write_local_raises_stack_trap() {
    let mut m = env();
    // W0 (0x3D) with an empty stack.
    write_code_word(&mut m, 0, 0x3D00);
    install_frame_handler(&mut m, M_SD + sd::S_STACK_ERROR as u32, 0x30, 1, 0x0040, 0, 0x10);

    let result = interp::step(&mut m).unwrap();

    assert_eq!(result, StepResult::Abort);
    assert_eq!(m.regs.pc, 0x10);
    assert_eq!(m.regs.lf, 0x30);
    assert_eq!(m.regs.gfi, 1);
    assert_eq!(m.regs.gf, 0x0040);
    assert_eq!(m.regs.sp, 0, "a failed pop must not touch the stack");
}

#[test]
fn local_store_then_load_round_trips_through_memory() {
    let mut m = env();
    m.regs.lf = 0x50;
    // LI5 (0x05), W0 (0x3D), R0 (0x2B): push 5, store to LF+0, read it back.
    write_code_word(&mut m, 0, 0x053D);
    write_code_word(&mut m, 1, 0x2B00);

    assert_eq!(interp::step(&mut m).unwrap(), StepResult::Continue);
    assert_eq!(m.regs.sp, 1);
    assert_eq!(interp::step(&mut m).unwrap(), StepResult::Continue);
    assert_eq!(m.regs.sp, 0);
    assert_eq!(m.mem.fetch_mds(0x50).unwrap(), 5);
    assert_eq!(interp::step(&mut m).unwrap(), StepResult::Continue);
    assert_eq!(m.regs.sp, 1);
    assert_eq!(m.regs.top().unwrap(), 5);
}

#[test]
fn udiv_by_zero_traps_with_dividend_as_lf0_and_clears_stack() {
    let mut m = env();
    // ESC (0x7F) UDIV (0x0F).
    write_code_word(&mut m, 0, 0x7F0F);
    install_frame_handler(&mut m, M_SD + sd::S_DIV_ZERO_TRAP as u32, 0x30, 1, 0x0040, 0, 0x20);
    m.regs.push(7).unwrap();
    m.regs.push(0).unwrap();

    let result = interp::step(&mut m).unwrap();

    assert_eq!(result, StepResult::Abort);
    assert_eq!(m.regs.pc, 0x20);
    assert_eq!(m.regs.sp, 0, "both operands are popped before the trap fires");
    assert_eq!(m.mem.fetch_mds(m.regs.lf).unwrap(), 7, "LF[0] carries the dividend");
}

#[test]
fn read_through_vacant_page_restores_pc_sp_and_raises_fault_signal() {
    let mut m = env();
    m.regs.lf = 0x50;
    let bad_va: Word = 0x1234;
    m.mem.write_map(Memory::page_of(bad_va as u32), MapFlags::vacant(), 0);
    // RL0 (0x37): pop a pointer and dereference it.
    write_code_word(&mut m, 0, 0x3700);
    m.regs.push(bad_va).unwrap();
    let saved_pc = m.regs.pc;
    let saved_sp = m.regs.sp;

    let result = interp::step(&mut m).unwrap();

    assert_eq!(result, StepResult::Abort);
    assert_eq!(m.regs.pc, saved_pc, "a fault unwinds to the instruction boundary, not a handler frame");
    assert_eq!(m.regs.sp, saved_sp, "the pointer pop is rolled back along with PC");
    let (kind, va) = m.signals.take_fault().expect("fault signal must be raised");
    assert_eq!(kind, FaultKind::Page);
    assert_eq!(va, bad_va as u32);
    assert!(!m.signals.reschedule_interrupt.load(std::sync::atomic::Ordering::Acquire));
}

#[test]
fn reschedule_adopts_a_process_waiting_on_the_fired_interrupt() {
    let mut m = env();
    let signals = scheduler::SharedSignals::default();
    signals.wp.store(0x0002, std::sync::atomic::Ordering::Release);

    let psb = 1u32;
    let base = M_PDA + psb * C_SV as u32;
    for vp in [Memory::page_of(base), Memory::page_of(base + C_SV as u32)] {
        m.mem.write_map(vp, MapFlags::default(), vp);
    }
    m.mem.store(base + 0, 0x0002).unwrap(); // wakeup mask
    m.mem.store(base + 1, 1).unwrap(); // ready
    m.mem.store(base + 2, 0x77).unwrap(); // pc
    m.mem.store(base + 3, 0x0011).unwrap(); // gf low
    m.mem.store(base + 4, 0x0008).unwrap(); // gf high
    m.mem.store(base + 5, 0x0022).unwrap(); // lf
    m.mem.store(base + 6, 0).unwrap(); // mds low
    m.mem.store(base + 7, 0).unwrap(); // mds high
    m.mem.store(base + 8, 0).unwrap(); // cb low
    m.mem.store(base + 9, 0).unwrap(); // cb high

    let adopted = scheduler::reschedule(&signals, &mut m.regs, &mut m.mem, true);

    assert!(adopted);
    assert_eq!(m.regs.psb, 1);
    assert_eq!(m.regs.pc, 0x77);
    assert_eq!(m.regs.gf, 0x0008_0011);
    assert_eq!(m.regs.lf, 0x0022);
    assert_eq!(m.mem.fetch(base + 1).unwrap(), 0, "readiness is consumed on adoption");
}

#[test]
fn reschedule_skips_processes_whose_wait_mask_does_not_intersect_wp() {
    let mut m = env();
    let signals = scheduler::SharedSignals::default();
    signals.wp.store(0x0004, std::sync::atomic::Ordering::Release);

    let psb = 1u32;
    let base = M_PDA + psb * C_SV as u32;
    for vp in [Memory::page_of(base), Memory::page_of(base + C_SV as u32)] {
        m.mem.write_map(vp, MapFlags::default(), vp);
    }
    m.mem.store(base + 0, 0x0002).unwrap();
    m.mem.store(base + 1, 1).unwrap();

    let adopted = scheduler::reschedule(&signals, &mut m.regs, &mut m.mem, true);

    assert!(!adopted);
    assert_eq!(m.mem.fetch(base + 1).unwrap(), 1, "an unmatched process stays ready");
}
