// The Guam agent-framing layer. Generalizes the teacher's `Device` trait
// (`update`/`read`/`write` against a `MemoryRange`) into an index-mapped
// dispatch against an FCB, per 4.4 and grounded on
// `examples/original_source/src/agent/Agent.h`'s `Enable`/`Call` shape.

pub mod disk;
pub mod display;
pub mod floppy;
pub mod keyboard;
pub mod mouse;
pub mod network;
pub mod processor;

use crate::machine::Machine;
use crate::types::{DWord, Word};

pub const IO_REGION_LAST: Word = 255;
pub const AGENT_SLOTS: usize = 256;

pub trait Agent: Send {
    fn index(&self) -> u8;
    fn name(&self) -> &str;
    fn fcb_size(&self) -> u16;
    fn initialize(&mut self, fcb: DWord, machine: &mut Machine);
    fn call(&mut self, machine: &mut Machine);
}

/// Owns the FCB pointer table carved out of the I/O region and the
/// registered agents. `enable` is the Rust analogue of `Agent::Enable`:
/// it hands out the next FCB-sized slice of the I/O region and calls
/// `initialize` once.
pub struct AgentTable {
    io_region_page: Word,
    next_free_word: DWord,
    fcbptrs: [DWord; AGENT_SLOTS],
    agents: Vec<Option<Box<dyn Agent>>>,
}

impl AgentTable {
    pub fn new(io_region_page: Word) -> Self {
        let mut agents = Vec::with_capacity(AGENT_SLOTS);
        agents.resize_with(AGENT_SLOTS, || None);
        Self {
            io_region_page,
            next_free_word: (io_region_page as DWord) * crate::constants::PAGE_SIZE,
            fcbptrs: [0; AGENT_SLOTS],
            agents,
        }
    }

    pub fn io_region_page(&self) -> Word {
        self.io_region_page
    }

    pub fn enable(&mut self, mut agent: Box<dyn Agent>, machine: &mut Machine) {
        let index = agent.index() as usize;
        let fcb = self.next_free_word;
        self.next_free_word += agent.fcb_size() as DWord;
        self.fcbptrs[index] = fcb;
        agent.initialize(fcb, machine);
        self.agents[index] = Some(agent);
    }

    pub fn fcb_of(&self, index: u8) -> DWord {
        self.fcbptrs[index as usize]
    }

    /// `CallAgent(i)`: the sole synchronous entry point reachable from the
    /// `CALLAGENT` ESC opcode.
    pub fn call_agent(&mut self, index: u8, machine: &mut Machine) {
        if let Some(agent) = self.agents[index as usize].as_mut() {
            agent.call(machine);
        } else {
            log::warn!("CallAgent({index}) with no agent enabled at that index");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null(u8);
    impl Agent for Null {
        fn index(&self) -> u8 {
            self.0
        }
        fn name(&self) -> &str {
            "null"
        }
        fn fcb_size(&self) -> u16 {
            4
        }
        fn initialize(&mut self, _fcb: DWord, _machine: &mut Machine) {}
        fn call(&mut self, _machine: &mut Machine) {}
    }

    #[test]
    fn enable_carves_increasing_fcb_offsets() {
        let mut table = AgentTable::new(0x80);
        let mut machine = Machine::new(20, 20, 8, 0x80);
        let base = table.fcb_of(3);
        assert_eq!(base, 0);
        table.enable(Box::new(Null(3)), &mut machine);
        table.enable(Box::new(Null(4)), &mut machine);
        assert!(table.fcb_of(4) > table.fcb_of(3));
    }
}
