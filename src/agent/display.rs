// Bridges the `MAPDISPLAY` ESC opcode to `Memory::map_display`/
// `reserve_display`. Grounded on `examples/original_source/src/mesa/
// Memory.h`'s display-band reservation and the teacher's `minifb`-backed
// `Monitor` device shape in `devices.rs` (kept conceptually, not the crate:
// no headless-safe GUI crate is evidenced elsewhere in the pack).

use log::trace;

use crate::machine::Machine;
use crate::memory::DisplayInfo;
use crate::types::DWord;

use super::Agent;

pub struct AgentDisplay {
    index: u8,
    fcb: DWord,
    info: Option<DisplayInfo>,
}

impl AgentDisplay {
    pub fn new(index: u8) -> Self {
        Self { index, fcb: 0, info: None }
    }

    pub fn set_size(&mut self, machine: &mut Machine, width: u32, height: u32) {
        self.info = Some(machine.mem.reserve_display(width, height));
    }

    pub fn map(&mut self, machine: &mut Machine, vp: u32, rp: u32, page_count: u32) {
        machine.mem.map_display(vp, rp, page_count);
    }

    pub fn info(&self) -> Option<DisplayInfo> {
        self.info
    }
}

impl Agent for AgentDisplay {
    fn index(&self) -> u8 {
        self.index
    }

    fn name(&self) -> &str {
        "Display"
    }

    fn fcb_size(&self) -> u16 {
        8
    }

    fn initialize(&mut self, fcb: DWord, _machine: &mut Machine) {
        self.fcb = fcb;
        trace!("AgentDisplay initialized fcb={fcb:#x}");
    }

    fn call(&mut self, _machine: &mut Machine) {
        trace!("AgentDisplay::call fcb={:#x}", self.fcb);
    }
}
