// The 256-entry MOP/ESC dispatch tables, built once from a declarative
// list mirroring `examples/original_source/src/opcode/opcode.h`'s
// `MOP(enable, code, prefix, name)` macro table. Unassigned slots are
// filled with trap stubs at table-build time rather than left empty.

use std::sync::OnceLock;

use super::{esc, mop, StepResult};
use crate::error::FatalError;
use crate::machine::Machine;

/// `operand` carries the family-specific immediate baked into the opcode
/// number (e.g. which of LI0..LI10 this slot is); stub entries reuse it to
/// carry the opcode byte itself for the trap they raise. `saved_pc` is the
/// PC at the start of the instruction, needed by any handler that ends up
/// raising a trap.
pub type OpFn = fn(&mut Machine, operand: u8, saved_pc: u16) -> Result<StepResult, FatalError>;

pub struct OpcodeDef {
    pub code: u8,
    pub name: &'static str,
    pub operand: u8,
    pub handler: OpFn,
}

/// Declares one opcode at `code` with a fixed `operand`.
macro_rules! op {
    ($code:expr, $name:expr, $operand:expr, $handler:path) => {
        OpcodeDef { code: $code, name: $name, operand: $operand, handler: $handler }
    };
}

/// Declares a contiguous family `base..base+count` where each slot's
/// operand is its offset from `base` -- the LI0..LI10 / LA0..LA10 shape.
macro_rules! op_range {
    ($out:expr, $base:expr, $count:expr, $name:expr, $handler:path) => {
        for i in 0..$count {
            $out.push(OpcodeDef {
                code: $base + i,
                name: $name,
                operand: i,
                handler: $handler,
            });
        }
    };
}

fn mop_defs() -> Vec<OpcodeDef> {
    let mut v = Vec::new();
    // Load immediate: LI0..LI10 push the constant 0..10.
    op_range!(v, 0x00, 11, "LIn", mop::load_immediate_n);
    v.push(op!(0x0B, "LIN1", 0, mop::load_immediate_neg1));
    v.push(op!(0x0C, "LINI", 0, mop::load_immediate_min_int));
    v.push(op!(0x0D, "LIB", 0, mop::load_immediate_byte));
    v.push(op!(0x0E, "LIW", 0, mop::load_immediate_word));
    v.push(op!(0x0F, "LINB", 0, mop::load_immediate_neg_byte));
    v.push(op!(0x10, "LIHB", 0, mop::load_immediate_high_byte));

    // Local address: LA0..LA10 push LF+k.
    op_range!(v, 0x11, 11, "LAn", mop::local_address_n);
    v.push(op!(0x1C, "LAB", 0, mop::local_address_byte));
    v.push(op!(0x1D, "LAW", 0, mop::local_address_word));

    // Global address: GA0..GA10 push GF+k.
    op_range!(v, 0x1E, 11, "GAn", mop::global_address_n);
    v.push(op!(0x29, "GAB", 0, mop::global_address_byte));
    v.push(op!(0x2A, "GAW", 0, mop::global_address_word));

    // Read: R0..R10 load from LF+k; RB/RL0/RLB/RD*/RDL* variants.
    op_range!(v, 0x2B, 11, "Rn", mop::read_local_n);
    v.push(op!(0x36, "RB", 0, mop::read_local_byte));
    v.push(op!(0x37, "RL0", 0, mop::read_indirect_local_zero));
    v.push(op!(0x38, "RLB", 0, mop::read_indirect_local_byte));
    v.push(op!(0x39, "RD0", 0, mop::read_double_zero));
    v.push(op!(0x3A, "RDB", 0, mop::read_double_byte));
    v.push(op!(0x3B, "RDL0", 0, mop::read_double_indirect_zero));
    v.push(op!(0x3C, "RDLB", 0, mop::read_double_indirect_byte));

    // Write / post-store.
    op_range!(v, 0x3D, 11, "Wn", mop::write_local_n);
    op_range!(v, 0x48, 11, "PSn", mop::post_store_local_n);
    v.push(op!(0x53, "WB", 0, mop::write_local_byte));
    v.push(op!(0x54, "WLB", 0, mop::write_indirect_local_byte));
    v.push(op!(0x55, "PSLB", 0, mop::post_store_indirect_local_byte));
    v.push(op!(0x56, "WD", 0, mop::write_double_zero));
    v.push(op!(0x57, "PSD", 0, mop::post_store_double_zero));
    v.push(op!(0x58, "WDL", 0, mop::write_double_indirect_local));
    v.push(op!(0x59, "PSDL", 0, mop::post_store_double_indirect_local));

    // Fields.
    v.push(op!(0x5A, "RF", 0, mop::read_field));
    v.push(op!(0x5B, "WF", 0, mop::write_field));
    v.push(op!(0x5C, "PSF", 0, mop::post_store_field));
    v.push(op!(0x5D, "R0F", 0, mop::read_zero_field));
    v.push(op!(0x5E, "WS0F", 0, mop::write_stack_zero_field));
    v.push(op!(0x5F, "WLF", 0, mop::write_indirect_local_field));
    v.push(op!(0x60, "PSLF", 0, mop::post_store_indirect_local_field));
    v.push(op!(0x61, "RLFS", 0, mop::read_indirect_local_field_short));
    v.push(op!(0x62, "WLFS", 0, mop::write_indirect_local_field_short));
    v.push(op!(0x63, "RLIPF", 0, mop::read_local_indirect_pointer_field));
    v.push(op!(0x64, "RLILPF", 0, mop::read_local_indirect_long_pointer_field));

    // Local frame plumbing.
    v.push(op!(0x65, "SLDB", 0, mop::store_local_double));
    v.push(op!(0x66, "SGDB", 0, mop::store_global_double));
    v.push(op!(0x67, "LLKB", 0, mop::load_link_byte));
    v.push(op!(0x68, "RKIB", 0, mop::read_link_indirect_byte));
    v.push(op!(0x69, "RKDIB", 0, mop::read_link_double_indirect_byte));
    v.push(op!(0x6A, "LKB", 0, mop::load_link_k_byte));

    // Calls and returns.
    op_range!(v, 0x6B, 13, "EFCn", mop::external_function_call_n);
    v.push(op!(0x78, "EFCB", 0, mop::external_function_call_byte));
    v.push(op!(0x79, "LFC", 0, mop::local_frame_call));
    v.push(op!(0x7A, "SFC", 0, mop::stack_frame_call));
    v.push(op!(0x7B, "RET", 0, mop::ret));
    v.push(op!(0x7C, "KFCB", 0, mop::known_frame_call_byte));
    v.push(op!(0x7D, "XE", 0, mop::xfer_escape));
    v.push(op!(0x7E, "XF", 0, mop::xfer_forward));

    // ESC bridge.
    v.push(op!(0x7F, "ESC", 0, mop::esc_bridge));
    v.push(op!(0x80, "ESCL", 0, mop::esc_bridge_long));

    // Long global address: LGA0, LGAB, LGAW push the untruncated GF+k long
    // pointer, unlike GAn's truncated short pointer. Placed at the high end
    // of the table, matching their real opcode numbers (0372-0374 octal =
    // 0xFA-0xFC) rather than packed against the rest of this table.
    v.push(op!(0xFA, "LGA0", 0, mop::load_global_address_n));
    v.push(op!(0xFB, "LGAB", 0, mop::load_global_address_byte));
    v.push(op!(0xFC, "LGAW", 0, mop::load_global_address_word));
    v
}

fn esc_defs() -> Vec<OpcodeDef> {
    let mut v = Vec::new();
    v.push(op!(0x00, "SM", 0, esc::store_map));
    v.push(op!(0x01, "SMF", 0, esc::store_map_flags));
    v.push(op!(0x02, "GMF", 0, esc::get_map_flags));
    v.push(op!(0x03, "EI", 0, esc::enable_interrupts));
    v.push(op!(0x04, "DI", 0, esc::disable_interrupts));
    v.push(op!(0x05, "XOR", 0, esc::xor));
    v.push(op!(0x06, "DAND", 0, esc::dand));
    v.push(op!(0x07, "DIOR", 0, esc::dior));
    v.push(op!(0x08, "DXOR", 0, esc::dxor));
    v.push(op!(0x09, "ROTATE", 0, esc::rotate));
    v.push(op!(0x0A, "DSHIFT", 0, esc::dshift));
    v.push(op!(0x0B, "LINT", 0, esc::lengthen_int));
    v.push(op!(0x0C, "DMUL", 0, esc::dmul));
    v.push(op!(0x0D, "SDIV", 0, esc::sdiv));
    v.push(op!(0x0E, "SDDIV", 0, esc::sddiv));
    v.push(op!(0x0F, "UDIV", 0, esc::udiv));
    v.push(op!(0x10, "LUDIV", 0, esc::ludiv));
    v.push(op!(0x11, "UDDIV", 0, esc::uddiv));
    v.push(op!(0x12, "RRPSB", 0, esc::read_psb));
    v.push(op!(0x13, "WRPSB", 0, esc::write_psb));
    v.push(op!(0x14, "RRMDS", 0, esc::read_mds));
    v.push(op!(0x15, "WRMDS", 0, esc::write_mds));
    v.push(op!(0x16, "RRWP", 0, esc::read_wp));
    v.push(op!(0x17, "WRWP", 0, esc::write_wp));
    v.push(op!(0x18, "RRWDC", 0, esc::read_wdc));
    v.push(op!(0x19, "WRWDC", 0, esc::write_wdc));
    v.push(op!(0x1A, "RRPTC", 0, esc::read_ptc));
    v.push(op!(0x1B, "WRPTC", 0, esc::write_ptc));
    v.push(op!(0x1C, "RRXTS", 0, esc::read_xts));
    v.push(op!(0x1D, "WRXTS", 0, esc::write_xts));
    v.push(op!(0x1E, "WRMP", 0, esc::write_mp));
    v.push(op!(0x1F, "RRIT", 0, esc::read_it));
    v.push(op!(0x20, "NILCK", 0, esc::null_check));
    v.push(op!(0x21, "NILCKL", 0, esc::null_check_long));
    v.push(op!(0x22, "BNDCKL", 0, esc::bounds_check_long));
    v.push(op!(0x23, "CALLAGENT", 0, esc::call_agent));
    v.push(op!(0x24, "MAPDISPLAY", 0, esc::map_display));
    v.push(op!(0x25, "STOPEMULATOR", 0, esc::stop_emulator));
    v
}

pub struct Tables {
    mop: Box<[(OpFn, u8); 256]>,
    mop_names: Box<[&'static str; 256]>,
    esc: Box<[(OpFn, u8); 256]>,
    esc_names: Box<[&'static str; 256]>,
}

fn build() -> Tables {
    let mut mop: Box<[(OpFn, u8); 256]> = Box::new([(mop::opcode_trap_stub, 0); 256]);
    let mut mop_names: Box<[&'static str; 256]> = Box::new(["OPCODE_TRAP"; 256]);
    for def in mop_defs() {
        mop[def.code as usize] = (def.handler, def.operand);
        mop_names[def.code as usize] = def.name;
    }
    // Stub entries need to know which code they were dispatched at in
    // order to raise OpcodeTrap(code); patch the operand field in place.
    for code in 0..256u16 {
        if mop[code as usize].0 as usize == mop::opcode_trap_stub as usize {
            mop[code as usize].1 = code as u8;
        }
    }

    let mut esc: Box<[(OpFn, u8); 256]> = Box::new([(esc::esc_opcode_trap_stub, 0); 256]);
    let mut esc_names: Box<[&'static str; 256]> = Box::new(["ESC_OPCODE_TRAP"; 256]);
    for def in esc_defs() {
        esc[def.code as usize] = (def.handler, def.operand);
        esc_names[def.code as usize] = def.name;
    }
    for code in 0..256u16 {
        if esc[code as usize].0 as usize == esc::esc_opcode_trap_stub as usize {
            esc[code as usize].1 = code as u8;
        }
    }

    Tables { mop, mop_names, esc, esc_names }
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(build)
}

pub fn mop_entry(code: u8) -> (OpFn, u8) {
    tables().mop[code as usize]
}

pub fn esc_entry(code: u8) -> (OpFn, u8) {
    tables().esc[code as usize]
}

pub fn mop_name(code: u8) -> &'static str {
    tables().mop_names[code as usize]
}

pub fn esc_name(code: u8) -> &'static str {
    tables().esc_names[code as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_mop_slot_defaults_to_opcode_trap_stub() {
        let (handler, operand) = mop_entry(0xFE);
        assert_eq!(handler as usize, mop::opcode_trap_stub as usize);
        assert_eq!(operand, 0xFE);
    }

    #[test]
    fn load_immediate_family_spans_eleven_slots() {
        for i in 0..11u8 {
            assert_eq!(mop_name(i), "LIn");
            assert_eq!(mop_entry(i).1, i);
        }
        assert_ne!(mop_name(11), "LIn");
    }
}
