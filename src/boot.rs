// The fixed Pilot boot sequence, 4.5. Generalizes the teacher's
// memory-layout-literal reset sequence into the germ-load-then-XFER order
// Pilot expects, grounded on `examples/original_source/src/mesa/guam.cpp`'s
// `loadGerm`/`initialize`/`setSwitches` and `MesaProcessor.cpp`'s
// thread-bring-up shape.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info};

use crate::agent::disk::AgentDisk;
use crate::agent::floppy::AgentFloppy;
use crate::agent::network::AgentNetwork;
use crate::agent::processor::AgentProcessor;
use crate::config::{BootDevice, Config};
use crate::constants::{sd, M_GFT, M_SD};
use crate::error::FatalError;
use crate::machine::Machine;
use crate::types::{ControlLink, Word};
use crate::xfer::{xfer, XferType};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootSwitchError {
    pub at: usize,
}

impl std::fmt::Display for BootSwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed switch-string escape at byte {}", self.at)
    }
}

/// A 256-bit switch set, one bit per possible character value, packed as
/// sixteen big-endian Mesa words (4.5).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootSwitches(pub [u8; 32]);

impl Default for BootSwitches {
    fn default() -> Self {
        Self([0; 32])
    }
}

impl BootSwitches {
    fn set(&mut self, c: u8) {
        let word_idx = (c as usize) / 16;
        let bit = (c as u16) % 16;
        if bit >= 8 {
            self.0[word_idx * 2] |= 1 << (bit - 8);
        } else {
            self.0[word_idx * 2 + 1] |= 1 << bit;
        }
    }

    pub fn words(&self) -> [Word; 16] {
        let mut out = [0u16; 16];
        for (i, word) in out.iter_mut().enumerate() {
            *word = ((self.0[i * 2] as Word) << 8) | self.0[i * 2 + 1] as Word;
        }
        out
    }
}

/// Implements 4.5's switch-string parser exactly: each character (including
/// a decoded `\DDD` escape byte) sets bit `15 - (c mod 16)` of word `c / 16`
/// -- equivalently, bit `c mod 16` (LSB-numbered) of that word, which is
/// what `BootSwitches::set` computes directly.
pub fn parse_switch_string(s: &str) -> Result<BootSwitches, BootSwitchError> {
    let bytes = s.as_bytes();
    let mut switches = BootSwitches::default();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if i + 3 >= bytes.len() {
                return Err(BootSwitchError { at: i });
            }
            let d1 = digit(bytes[i + 1], 0..=3).ok_or(BootSwitchError { at: i })?;
            let d2 = digit(bytes[i + 2], 0..=7).ok_or(BootSwitchError { at: i })?;
            let d3 = digit(bytes[i + 3], 0..=7).ok_or(BootSwitchError { at: i })?;
            switches.set(d1 * 64 + d2 * 8 + d3);
            i += 4;
        } else {
            switches.set(bytes[i]);
            i += 1;
        }
    }
    Ok(switches)
}

fn digit(b: u8, range: std::ops::RangeInclusive<u8>) -> Option<u8> {
    if !b.is_ascii_digit() {
        return None;
    }
    let d = b - b'0';
    if range.contains(&d) {
        Some(d)
    } else {
        None
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GermLoadError {
    pub reason: &'static str,
}

impl std::fmt::Display for GermLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Reads `path` as a concatenation of 256-word, machine-disk-endian pages,
/// byteswaps word-wise, and deposits them starting one page past `mGFT`,
/// refusing to cross the real-memory terminal page.
pub fn load(machine: &mut Machine, path: &Path) -> Result<(), GermLoadError> {
    let mut file = File::open(path).map_err(|_| GermLoadError { reason: "cannot open germ image" })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|_| GermLoadError { reason: "cannot read germ image" })?;
    if bytes.len() % 2 != 0 {
        return Err(GermLoadError { reason: "germ image has an odd number of bytes" });
    }

    let start_page = M_GFT / 256 + 1;
    let page_words = 256u32;
    let total_words = (bytes.len() / 2) as u32;
    let total_pages = (total_words + page_words - 1) / page_words;
    let terminal_page = machine.mem.rp_size();
    if start_page + total_pages > terminal_page {
        return Err(GermLoadError { reason: "germ image crosses the terminal page index" });
    }

    for (i, chunk) in bytes.chunks(2).enumerate() {
        let word = if chunk.len() == 2 {
            ((chunk[0] as Word) << 8) | chunk[1] as Word
        } else {
            (chunk[0] as Word) << 8
        };
        let va = start_page * 256 + i as u32;
        let vp = va / 256;
        if machine.mem.is_vacant(va) {
            machine.mem.write_map(vp, crate::types::MapFlags::default(), vp);
        }
        machine
            .mem
            .store(va, word)
            .map_err(|_| GermLoadError { reason: "write-protected page in germ load range" })?;
    }

    info!("loaded germ image {:?}: {total_pages} pages", path);
    Ok(())
}

fn sd_link(machine: &mut Machine, index: u16) -> ControlLink {
    let ptr = M_SD + index as u32;
    machine.mem.read_dbl_mds(ptr as Word).map(ControlLink::unpack).unwrap_or(ControlLink::Frame(0))
}

/// Enables an agent without holding two overlapping `&mut Machine` borrows:
/// `AgentTable::enable` needs `&mut Machine` for `Agent::initialize` while
/// also being reached through `machine.agents`. Same aliasing workaround as
/// `esc::call_agent`.
fn enable_agent(machine: &mut Machine, agent: Box<dyn crate::agent::Agent>) {
    let mut agents = std::mem::replace(&mut machine.agents, crate::agent::AgentTable::new(0));
    agents.enable(agent, machine);
    machine.agents = agents;
}

/// Runs the fixed seven-step boot order from 4.5. Agents are constructed and
/// enabled here because boot is the only place that knows the configuration
/// needed to size them (disk geometry, display dimensions, ...).
pub fn boot_sequence(config: &Config, machine: &mut Machine) -> Result<(), FatalError> {
    // (1) disk
    if let Some(disk_path) = &config.disk {
        let mut disk = AgentDisk::new(0);
        disk.attach_image(disk_path)?;
        enable_agent(machine, Box::new(disk));
        debug!("boot: disk agent enabled from {:?}", disk_path);
    }

    // (2) floppy
    if let Some(floppy_path) = &config.floppy {
        let mut floppy = AgentFloppy::new(1);
        floppy.attach_image(floppy_path);
        enable_agent(machine, Box::new(floppy));
        debug!("boot: floppy agent enabled from {:?}", floppy_path);
    }

    // (3) ethernet / processor ID
    let mut processor = AgentProcessor::new(2);
    let interface_hash = config
        .network_interface
        .bytes()
        .fold(0u16, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u16));
    processor.set_pid([0, interface_hash, 0]);
    enable_agent(machine, Box::new(processor));
    if !config.network_interface.is_empty() {
        let mut network = AgentNetwork::new(3);
        network.attach(Box::new(crate::agent::network::LoopbackTransport::new()))?;
        enable_agent(machine, Box::new(network));
    }

    // (4) display size
    let mut display = crate::agent::display::AgentDisplay::new(4);
    display.set_size(machine, config.display_width as u32, config.display_height as u32);
    enable_agent(machine, Box::new(display));

    // (5) germ load
    load(machine, &config.germ).map_err(|e| FatalError::GermLoad(e.to_string()))?;

    // (6) boot-request record
    let switches = parse_switch_string(&config.boot_switch).map_err(|e| FatalError::BootSwitchParse(e.to_string()))?;
    let request_base = M_SD + sd::S_FIRST_GERM_REQUEST as u32;
    let device_type: Word = match config.boot_device {
        BootDevice::Disk => 0,
        BootDevice::Ether => 1,
        BootDevice::Stream => 2,
    };
    let _ = machine.mem.store(request_base, device_type);
    let _ = machine.mem.store(request_base + 1, 0);
    for (i, word) in switches.words().iter().enumerate() {
        let _ = machine.mem.store(request_base + 2 + i as u32, *word);
    }

    // (7) XFER to SD[sBoot]
    let boot_link = sd_link(machine, sd::S_BOOT);
    let outcome = xfer(&mut machine.regs, &mut machine.mem, &machine.av, boot_link, 0, XferType::Call, false);
    match outcome {
        Ok(_) => Ok(()),
        Err(fault) => Err(FatalError::Unreachable {
            what: format!("boot XFER to sBoot failed: {fault:?}"),
            location: "boot::boot_sequence",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_string_worked_example() {
        let switches = parse_switch_string("A\\040B").unwrap();
        let words = switches.words();
        assert_eq!(words[4] & (1 << 1), 1 << 1); // 'A' = 0x41
        assert_eq!(words[4] & (1 << 2), 1 << 2); // 'B' = 0x42
        assert_eq!(words[2] & (1 << 0), 1 << 0); // '\040' = 0x20
    }

    #[test]
    fn malformed_escape_is_rejected() {
        assert!(parse_switch_string("\\9AB").is_err());
        assert!(parse_switch_string("\\04").is_err());
    }
}
