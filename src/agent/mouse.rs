// Minimal FCB-polling stand-in reporting pointer position, grounded on
// `examples/original_source/src/agent/AgentMouse.cpp`'s FCB shape.

use crate::machine::Machine;
use crate::types::DWord;

use super::Agent;

pub struct AgentMouse {
    index: u8,
    fcb: DWord,
    x: i16,
    y: i16,
    buttons: u8,
}

impl AgentMouse {
    pub fn new(index: u8) -> Self {
        Self { index, fcb: 0, x: 0, y: 0, buttons: 0 }
    }

    pub fn set_position(&mut self, x: i16, y: i16) {
        self.x = x;
        self.y = y;
    }

    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
    }
}

impl Agent for AgentMouse {
    fn index(&self) -> u8 {
        self.index
    }

    fn name(&self) -> &str {
        "Mouse"
    }

    fn fcb_size(&self) -> u16 {
        4
    }

    fn initialize(&mut self, fcb: DWord, _machine: &mut Machine) {
        self.fcb = fcb;
    }

    fn call(&mut self, machine: &mut Machine) {
        let _ = machine.mem.store(self.fcb, self.x as u16);
        let _ = machine.mem.store(self.fcb + 1, self.y as u16);
        let _ = machine.mem.store(self.fcb + 2, self.buttons as u16);
    }
}
