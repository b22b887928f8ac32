// Fixed-location tables and symbolic indices. Numeric values are part of the
// wire contract with Mesa/Pilot images -- they are not implementation detail
// and must not be renumbered.

pub const PAGE_SIZE: u32 = 256;
pub const PAGE_MASK: u32 = 0xFF;

/// Evaluation stack depth (`cSS`).
pub const STACK_DEPTH: usize = 14;

/// `cWDC`: implementation bound on the wakeup-disable counter.
pub const C_WDC: u16 = 7;

/// One scheduler tick, in milliseconds.
pub const TICK_MS: u64 = 40;

pub const M_AV: u32 = 0x0100;
pub const M_SD: u32 = 0x0200;
pub const M_ETT: u32 = 0x0400;
pub const M_PDA: u32 = 0x0001_0000;
pub const M_GFT: u32 = 0x0002_0000;

pub const DEFAULT_IO_REGION_PAGE: u16 = 0x80;

/// log2 of the direct-mapped page-cache size, per spec §3's default `2^16`.
pub const DEFAULT_CACHE_BITS: u32 = 16;

pub const VM_BITS_MIN: u32 = 20;
pub const VM_BITS_MAX: u32 = 25;
pub const RM_BITS_MIN: u32 = 20;
pub const RM_BITS_MAX: u32 = 24;

/// Symbolic SD-table indices (System Data), §3.
pub mod sd {
    pub const S_BOOT: u16 = 0o1;
    pub const S_STACK_ERROR: u16 = 0o2;
    pub const S_RESCHEDULE_ERROR: u16 = 0o3;
    pub const S_XFER_TRAP: u16 = 0o4;
    pub const S_OPCODE_TRAP: u16 = 0o5;
    pub const S_CONTROL_TRAP: u16 = 0o6;
    pub const S_CODE_TRAP: u16 = 0o7;
    pub const S_HARDWARE_ERROR: u16 = 0o10;
    pub const S_UNBOUND_TRAP: u16 = 0o11;
    pub const S_DIV_ZERO_TRAP: u16 = 0o12;
    pub const S_DIV_CHECK_TRAP: u16 = 0o13;
    pub const S_INTERRUPT_ERROR: u16 = 0o14;
    pub const S_PROCESS_TRAP: u16 = 0o15;
    pub const S_BOUNDS_TRAP: u16 = 0o16;
    pub const S_POINTER_TRAP: u16 = 0o17;
    pub const S_BREAK_TRAP: u16 = 0o0;
    pub const S_FIRST_GERM_REQUEST: u16 = 0o20;
}

/// `cSV`: size of one Process Data Area state-vector slot, in words.
pub const C_SV: usize = crate::types::STATE_VECTOR_SIZE;

/// Implementation bound on indirect-control-link chase depth.
pub const MAX_INDIRECT_CHASE: usize = 16;

/// Implementation bound on the number of schedulable processes held in the
/// Process Data Area.
pub const N_PROCESSES: u32 = 32;
