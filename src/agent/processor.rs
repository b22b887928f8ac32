// PID population and the STOPEMULATOR bridge. Grounded on
// `examples/original_source/src/agent/AgentProcessor.cpp`.

use log::info;

use crate::machine::Machine;
use crate::types::DWord;
use std::sync::atomic::Ordering;

use super::Agent;

pub struct AgentProcessor {
    index: u8,
    fcb: DWord,
    pid: [u16; 3],
}

impl AgentProcessor {
    pub fn new(index: u8) -> Self {
        Self { index, fcb: 0, pid: [0; 3] }
    }

    pub fn set_pid(&mut self, pid: [u16; 3]) {
        self.pid = pid;
    }

    pub fn pid(&self) -> [u16; 3] {
        self.pid
    }

    /// `STOPEMULATOR`: halts the scheduler cleanly, per §4.2/§5.
    pub fn stop_emulator(&self, machine: &mut Machine) {
        info!("STOPEMULATOR requested");
        machine.signals.running.store(false, Ordering::Release);
        machine.signals.stop.store(true, Ordering::Release);
    }
}

impl Agent for AgentProcessor {
    fn index(&self) -> u8 {
        self.index
    }

    fn name(&self) -> &str {
        "Processor"
    }

    fn fcb_size(&self) -> u16 {
        4
    }

    fn initialize(&mut self, fcb: DWord, _machine: &mut Machine) {
        self.fcb = fcb;
    }

    fn call(&mut self, _machine: &mut Machine) {}
}
