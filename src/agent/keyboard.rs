// Minimal FCB-polling stand-in reporting a 3-word scan-code bitmap, the
// same shape as `mouse.rs`.

use crate::machine::Machine;
use crate::types::DWord;

use super::Agent;

pub struct AgentKeyboard {
    index: u8,
    fcb: DWord,
    keys_down: [u16; 3],
}

impl AgentKeyboard {
    pub fn new(index: u8) -> Self {
        Self { index, fcb: 0, keys_down: [0; 3] }
    }

    pub fn set_key(&mut self, scan_code: u8, down: bool) {
        let word = (scan_code >> 4) as usize % 3;
        let bit = scan_code & 0xF;
        if down {
            self.keys_down[word] |= 1 << bit;
        } else {
            self.keys_down[word] &= !(1 << bit);
        }
    }
}

impl Agent for AgentKeyboard {
    fn index(&self) -> u8 {
        self.index
    }

    fn name(&self) -> &str {
        "Keyboard"
    }

    fn fcb_size(&self) -> u16 {
        3
    }

    fn initialize(&mut self, fcb: DWord, _machine: &mut Machine) {
        self.fcb = fcb;
    }

    fn call(&mut self, machine: &mut Machine) {
        for (i, word) in self.keys_down.iter().enumerate() {
            let _ = machine.mem.store(self.fcb + i as DWord, *word);
        }
    }
}
