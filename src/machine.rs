// The aggregate emulator state. Generalizes the teacher's `Emulator { cpu,
// bus, devices }` grouping: a `Machine` is a `Registers` (processor-thread
// private), a `Memory`, an `AllocationVector`, an `AgentTable`, and the
// `SharedSignals` shared with the timer/interrupt threads.

use std::sync::Arc;

use crate::agent::AgentTable;
use crate::av::AllocationVector;
use crate::constants::M_AV;
use crate::memory::Memory;
use crate::registers::Registers;
use crate::scheduler::SharedSignals;
use crate::types::Word;

pub struct Machine {
    pub regs: Registers,
    pub mem: Memory,
    pub av: AllocationVector,
    pub agents: AgentTable,
    pub signals: Arc<SharedSignals>,
    pub stats_mop: Box<[u64; 256]>,
    pub stats_esc: Box<[u64; 256]>,
    pub last_mop: Option<u8>,
    pub last_esc: Option<u8>,
    /// SP at the start of the instruction currently dispatching, mirroring
    /// `last_mop`/`last_esc`'s per-step bookkeeping: a fault discovered deep
    /// inside an opcode handler (`try_mem!`) needs this to restore SP
    /// without threading it through every handler's signature.
    pub saved_sp: u8,
}

impl Machine {
    pub fn new(vm_bits: u32, rm_bits: u32, cache_bits: u32, io_region_page: Word) -> Self {
        Self {
            regs: Registers::default(),
            mem: Memory::new(vm_bits, rm_bits, cache_bits),
            av: AllocationVector::new(M_AV as Word, 256),
            agents: AgentTable::new(io_region_page),
            signals: Arc::new(SharedSignals::default()),
            stats_mop: Box::new([0; 256]),
            stats_esc: Box::new([0; 256]),
            last_mop: None,
            last_esc: None,
            saved_sp: 0,
        }
    }
}
