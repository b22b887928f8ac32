// The three-OS-thread cooperative scheduler: processor, timer, interrupt.
// Generalizes the teacher's `Signal`-returning `Device::update` poll loop
// (a single-threaded cooperative model) into the multi-thread model
// described in spec §5. Grounded on
// `examples/original_source/src/mesa/processor_thread.cpp` for the
// single-mutex/condvar processor wait loop -- the spec's Design Notes
// explicitly reject the double-lock `processor_thread_B.cpp` variant.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};

use crate::constants::{C_SV, M_PDA, N_PROCESSES, TICK_MS};
use crate::memory::Memory;
use crate::registers::Registers;
use crate::types::{make_dword, Word};

/// Word offsets within a PDA state-vector slot. The wakeup mask and ready
/// flag are scheduler bookkeeping local to this table, not part of Mesa's
/// own `StateVector` layout (`cSV` leaves room for them alongside the
/// saved PC/GF/LF/MDS/CB a trap spills on process switch).
const SV_WAKEUP_MASK: u32 = 0;
const SV_READY: u32 = 1;
const SV_PC: u32 = 2;
const SV_GF_LOW: u32 = 3;
const SV_GF_HIGH: u32 = 4;
const SV_LF: u32 = 5;
const SV_MDS_LOW: u32 = 6;
const SV_MDS_HIGH: u32 = 7;
const SV_CB_LOW: u32 = 8;
const SV_CB_HIGH: u32 = 9;

/// What kind of memory/frame fault last raised `reschedule_fault`, carried
/// alongside it so a handler (or a test) can tell the three apart without a
/// richer channel than the existing reschedule-flag atomics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Page = 0,
    WriteProtect = 1,
    Frame = 2,
}

impl FaultKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Page),
            1 => Some(Self::WriteProtect),
            2 => Some(Self::Frame),
            _ => None,
        }
    }
}

/// State shared between the processor, timer, and interrupt threads. No
/// field here is ever touched by opcode execution directly -- only through
/// these atomics, per §5's locking discipline.
#[derive(Default)]
pub struct SharedSignals {
    pub wp: AtomicU16,
    pub wdc: AtomicU16,
    pub ptc: AtomicU16,
    pub it: AtomicU32,
    pub mp: AtomicU16,
    pub reschedule_interrupt: AtomicBool,
    pub reschedule_timer: AtomicBool,
    /// Set by `PageFault`/`WriteProtectFault`/`FrameFault`, distinct from
    /// the interrupt/timer reschedule flags above: a fault unwinds the
    /// current instruction (PC/SP restored, not committed to a handler
    /// frame) and asks the processor loop to check for other runnable work
    /// rather than dispatching a trap frame synchronously.
    pub reschedule_fault: AtomicBool,
    pub fault_kind: AtomicU8,
    pub fault_va: AtomicU32,
    pub running: AtomicBool,
    pub stop: AtomicBool,
}

impl SharedSignals {
    pub fn interrupts_enabled(&self) -> bool {
        self.wdc.load(Ordering::Acquire) == 0
    }

    pub fn enable_interrupts(&self) {
        // EI: decrement WDC, saturating at zero so a stray extra EI cannot
        // underflow into "disabled forever".
        let _ = self
            .wdc
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| Some(w.saturating_sub(1)));
    }

    pub fn disable_interrupts(&self) {
        let _ = self.wdc.fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
            Some(w.saturating_add(1))
        });
    }

    /// Records the fault and raises the distinct reschedule-fault signal.
    /// `va` is the faulting virtual address for `Page`/`WriteProtect`, or
    /// the FSI for `Frame`.
    pub fn raise_fault(&self, kind: FaultKind, va: u32) {
        self.fault_kind.store(kind as u8, Ordering::Release);
        self.fault_va.store(va, Ordering::Release);
        self.reschedule_fault.store(true, Ordering::Release);
    }

    /// Consumes the fault signal, returning the `(kind, va)` it carried.
    pub fn take_fault(&self) -> Option<(FaultKind, u32)> {
        if !self.reschedule_fault.swap(false, Ordering::AcqRel) {
            return None;
        }
        let kind = FaultKind::from_u8(self.fault_kind.load(Ordering::Acquire)).unwrap_or(FaultKind::Page);
        let va = self.fault_va.load(Ordering::Acquire);
        Some((kind, va))
    }
}

/// `notify_interrupt`: `WP |= sel` atomically; wakes the interrupt thread
/// only on a 0→1 edge so repeated identical signals coalesce.
pub fn notify_interrupt(signals: &SharedSignals, interrupt_cv: &Condvar, sel: Word) {
    if sel == 0 {
        return;
    }
    let prev = signals.wp.fetch_or(sel, Ordering::AcqRel);
    if prev & sel != sel {
        trace!("notify_interrupt sel={sel:#06x} prev_wp={prev:#06x}");
        interrupt_cv.notify_one();
    }
}

/// Walks the Process Data Area for a runnable process and, if one is
/// found, adopts its saved PC/GF/LF/MDS/CB into `regs`, consuming that
/// slot's readiness. `interrupt` selects whether a process with a nonzero
/// wakeup mask is runnable because it intersects the current WP; a timer
/// reschedule only wakes processes with no wait condition (mask == 0).
/// Matches spec §8 scenario 4's "PSB waiting on WP=... is made ready,
/// PC/GF/LF adopt the ready process".
pub fn reschedule(signals: &SharedSignals, regs: &mut Registers, mem: &mut Memory, interrupt: bool) -> bool {
    let wp = signals.wp.load(Ordering::Acquire);
    for psb in 1..=N_PROCESSES {
        let base = M_PDA + psb * C_SV as u32;
        let ready = mem.fetch(base + SV_READY).unwrap_or(0);
        if ready == 0 {
            continue;
        }
        let mask = mem.fetch(base + SV_WAKEUP_MASK).unwrap_or(0);
        let runnable = if interrupt { mask == 0 || wp & mask != 0 } else { mask == 0 };
        if !runnable {
            continue;
        }

        let pc = mem.fetch(base + SV_PC).unwrap_or(0);
        let gf = make_dword(mem.fetch(base + SV_GF_HIGH).unwrap_or(0), mem.fetch(base + SV_GF_LOW).unwrap_or(0));
        let lf = mem.fetch(base + SV_LF).unwrap_or(0);
        let mds = make_dword(mem.fetch(base + SV_MDS_HIGH).unwrap_or(0), mem.fetch(base + SV_MDS_LOW).unwrap_or(0));
        let cb = make_dword(mem.fetch(base + SV_CB_HIGH).unwrap_or(0), mem.fetch(base + SV_CB_LOW).unwrap_or(0));

        regs.psb = psb as Word;
        regs.pc = pc;
        regs.gf = gf;
        regs.lf = lf;
        regs.mds = mds;
        regs.cb = cb;
        mem.set_mds(mds);
        mem.set_cb(cb);
        let _ = mem.store(base + SV_READY, 0);
        debug!("reschedule adopted psb={psb} pc={pc:#06x} interrupt={interrupt}");
        return true;
    }
    false
}

pub struct Scheduler {
    pub signals: Arc<SharedSignals>,
    processor_cv: Arc<(Mutex<()>, Condvar)>,
    interrupt_cv: Arc<(Mutex<()>, Condvar)>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(signals: Arc<SharedSignals>) -> Self {
        signals.running.store(true, Ordering::Release);
        Self {
            signals,
            processor_cv: Arc::new((Mutex::new(()), Condvar::new())),
            interrupt_cv: Arc::new((Mutex::new(()), Condvar::new())),
            handles: Vec::new(),
        }
    }

    /// Spawns the timer and interrupt threads. The processor loop itself is
    /// driven by the caller (it owns `Machine`, which is not `Send` across
    /// an opaque boundary without restructuring the interpreter) via
    /// `wait_for_work`/`interrupt_ready` below.
    pub fn spawn_support_threads(&mut self) {
        let signals = Arc::clone(&self.signals);
        let processor_cv = Arc::clone(&self.processor_cv);
        self.handles.push(
            thread::Builder::new()
                .name("guam-timer".into())
                .spawn(move || timer_loop(signals, processor_cv))
                .expect("failed to spawn timer thread"),
        );

        let signals = Arc::clone(&self.signals);
        let processor_cv = Arc::clone(&self.processor_cv);
        let interrupt_cv = Arc::clone(&self.interrupt_cv);
        self.handles.push(
            thread::Builder::new()
                .name("guam-interrupt".into())
                .spawn(move || interrupt_loop(signals, interrupt_cv, processor_cv))
                .expect("failed to spawn interrupt thread"),
        );
    }

    pub fn notify_interrupt(&self, sel: Word) {
        notify_interrupt(&self.signals, &self.interrupt_cv.1, sel);
    }

    /// The processor's top-level suspend point: blocks with a one-second
    /// timeout when neither reschedule flag is set and the machine isn't
    /// meant to be running, per §5's "suspension points".
    pub fn wait_for_work(&self) {
        if self.signals.reschedule_interrupt.load(Ordering::Acquire)
            || self.signals.reschedule_timer.load(Ordering::Acquire)
            || self.signals.running.load(Ordering::Acquire)
        {
            return;
        }
        let (lock, cv) = &*self.processor_cv;
        let guard = lock.lock().unwrap();
        let _ = cv.wait_timeout(guard, Duration::from_secs(1)).unwrap();
    }

    /// Consumes all three reschedule flags atomically (relative to this
    /// call); the caller performs the actual PSB adoption against `Machine`.
    pub fn take_reschedule_request(&self) -> bool {
        let interrupt = self.signals.reschedule_interrupt.swap(false, Ordering::AcqRel);
        let timer = self.signals.reschedule_timer.swap(false, Ordering::AcqRel);
        let fault = self.signals.reschedule_fault.swap(false, Ordering::AcqRel);
        interrupt || timer || fault
    }

    /// Full check-reschedule service: consumes all three flags and, if any
    /// fired, walks the PDA and adopts a runnable process. The interrupt
    /// flag is preferred over the timer flag when both are set, since an
    /// interrupt-driven wakeup carries a wait-mask condition the timer
    /// reschedule does not; a fault reschedule is treated the same way, since
    /// the faulting process is made runnable again through the same WP
    /// mechanism once its fault handler has serviced it.
    pub fn reschedule(&self, regs: &mut Registers, mem: &mut Memory) -> bool {
        let interrupt = self.signals.reschedule_interrupt.swap(false, Ordering::AcqRel);
        let timer = self.signals.reschedule_timer.swap(false, Ordering::AcqRel);
        let fault = self.signals.reschedule_fault.swap(false, Ordering::AcqRel);
        if !interrupt && !timer && !fault {
            return false;
        }
        reschedule(&self.signals, regs, mem, interrupt || fault)
    }

    /// Shutdown order fixed by §5: processor (caller's responsibility --
    /// it stops calling `step()`) → timer → interrupt → workers (agents
    /// drain their own `stop_thread` flags) → memory teardown (drop).
    pub fn stop(&mut self) {
        self.signals.stop.store(true, Ordering::Release);
        self.signals.running.store(false, Ordering::Release);
        self.processor_cv.1.notify_all();
        self.interrupt_cv.1.notify_all();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                debug!("scheduler thread {name} panicked during shutdown");
            }
        }
    }
}

fn timer_loop(signals: Arc<SharedSignals>, processor_cv: Arc<(Mutex<()>, Condvar)>) {
    while !signals.stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(TICK_MS));
        if signals.stop.load(Ordering::Acquire) {
            break;
        }
        if signals.interrupts_enabled() {
            let _ = signals.ptc.fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                Some(if p == u16::MAX { 1 } else { p + 1 })
            });
            signals.reschedule_timer.store(true, Ordering::Release);
            processor_cv.1.notify_one();
        }
    }
}

fn interrupt_loop(
    signals: Arc<SharedSignals>,
    interrupt_cv: Arc<(Mutex<()>, Condvar)>,
    processor_cv: Arc<(Mutex<()>, Condvar)>,
) {
    let (lock, cv) = &*interrupt_cv;
    let mut guard = lock.lock().unwrap();
    while !signals.stop.load(Ordering::Acquire) {
        guard = cv.wait_timeout(guard, Duration::from_secs(1)).unwrap().0;
        if signals.stop.load(Ordering::Acquire) {
            break;
        }
        if signals.wp.load(Ordering::Acquire) != 0 {
            signals.reschedule_interrupt.store(true, Ordering::Release);
            processor_cv.1.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ei_di_track_wdc() {
        let signals = SharedSignals::default();
        assert!(signals.interrupts_enabled());
        signals.disable_interrupts();
        assert!(!signals.interrupts_enabled());
        signals.enable_interrupts();
        assert!(signals.interrupts_enabled());
    }

    #[test]
    fn notify_interrupt_sets_wp_bits() {
        let signals = SharedSignals::default();
        let cv = Condvar::new();
        notify_interrupt(&signals, &cv, 0x0004);
        assert_eq!(signals.wp.load(Ordering::Acquire) & 0x0004, 0x0004);
    }

    #[test]
    fn take_reschedule_request_consumes_both_flags() {
        let signals = SharedSignals::default();
        signals.reschedule_interrupt.store(true, Ordering::Release);
        let scheduler = Scheduler::new(Arc::new(SharedSignals::default()));
        scheduler.signals.reschedule_timer.store(true, Ordering::Release);
        assert!(scheduler.take_reschedule_request());
        assert!(!scheduler.signals.reschedule_timer.load(Ordering::Acquire));
        let _ = signals;
    }
}
