// Floppy agent: same shape as `disk.rs` with fixed H=2,S=16 geometry
// regardless of image size, per §6.

use std::path::Path;

use log::trace;

use crate::machine::Machine;
use crate::types::DWord;

use super::disk::DiskGeometry;
use super::Agent;

pub struct AgentFloppy {
    index: u8,
    image_path: Option<std::path::PathBuf>,
    fcb: DWord,
}

impl AgentFloppy {
    pub fn new(index: u8) -> Self {
        Self { index, image_path: None, fcb: 0 }
    }

    pub fn attach_image(&mut self, path: &Path) {
        self.image_path = Some(path.to_path_buf());
    }

    pub fn geometry(&self) -> DiskGeometry {
        DiskGeometry { cylinders: 80, heads: 2, sectors_per_track: 16 }
    }
}

impl Agent for AgentFloppy {
    fn index(&self) -> u8 {
        self.index
    }

    fn name(&self) -> &str {
        "Floppy"
    }

    fn fcb_size(&self) -> u16 {
        24
    }

    fn initialize(&mut self, fcb: DWord, _machine: &mut Machine) {
        self.fcb = fcb;
        trace!("AgentFloppy initialized fcb={fcb:#x} image={:?}", self.image_path);
    }

    fn call(&mut self, _machine: &mut Machine) {
        trace!("AgentFloppy::call fcb={:#x}", self.fcb);
    }
}
