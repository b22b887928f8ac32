use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use log::{error, info};

use guam::boot;
use guam::config::Config;
use guam::constants::DEFAULT_CACHE_BITS;
use guam::error::{report_fatal, FatalError, FaultContext};
use guam::interp::{self, StepResult};
use guam::machine::Machine;
use guam::scheduler::Scheduler;

fn fault_context(machine: &Machine) -> FaultContext {
    FaultContext { gfi: machine.regs.gfi, cb: machine.regs.cb, pc: machine.regs.pc }
}

/// Drives the processor thread: fetch/dispatch one instruction at a time,
/// servicing a pending reschedule at each check-reschedule site (the
/// bottom of every iteration, plus whenever the machine is not currently
/// running) until `signals.stop` is set or a breakpoint MP value fires.
fn run(config: &Config, machine: &mut Machine, scheduler: &Scheduler) -> Result<(), FatalError> {
    let stop_at_mp = config.stop_at_mp_set();
    loop {
        if scheduler.signals.stop.load(Ordering::Acquire) {
            return Ok(());
        }

        if !stop_at_mp.is_empty() {
            let mp = scheduler.signals.mp.load(Ordering::Acquire);
            if stop_at_mp.contains(&mp) {
                info!("stopping: MP reached breakpoint value {mp:#06x}");
                return Ok(());
            }
        }

        if !scheduler.signals.running.load(Ordering::Acquire) {
            scheduler.wait_for_work();
            scheduler.reschedule(&mut machine.regs, &mut machine.mem);
            continue;
        }

        match interp::step(machine)? {
            StepResult::Continue | StepResult::Abort => {}
        }

        if scheduler.signals.reschedule_interrupt.load(Ordering::Acquire)
            || scheduler.signals.reschedule_timer.load(Ordering::Acquire)
            || scheduler.signals.reschedule_fault.load(Ordering::Acquire)
        {
            scheduler.reschedule(&mut machine.regs, &mut machine.mem);
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let mut machine = Machine::new(config.vm_bits, config.rm_bits, DEFAULT_CACHE_BITS, config.io_region_page);

    if let Err(e) = boot::boot_sequence(&config, &mut machine) {
        report_fatal(&e, fault_context(&machine));
        return ExitCode::FAILURE;
    }

    let mut scheduler = Scheduler::new(machine.signals.clone());
    scheduler.spawn_support_threads();

    let result = run(&config, &mut machine, &scheduler);
    scheduler.stop();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_fatal(&e, fault_context(&machine));
            ExitCode::FAILURE
        }
    }
}
