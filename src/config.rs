// Top-level configuration, 4.5/6: the set of options a boot needs plus the
// memory-size knobs the rest of the crate is parameterized over. Generalizes
// the teacher's ad hoc `Configuration` struct (hand-built, no parser) into a
// `clap`-derived CLI, matching the `clap::Parser` convention used elsewhere
// in the example pack.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::constants::{DEFAULT_IO_REGION_PAGE, RM_BITS_MAX, RM_BITS_MIN, VM_BITS_MAX, VM_BITS_MIN};
use crate::types::Word;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum BootDevice {
    Disk,
    Ether,
    Stream,
}

#[derive(Debug, Parser)]
#[command(name = "guam", about = "Mesa/Pilot Guam virtual machine core")]
pub struct Config {
    /// Path to the disk image.
    #[arg(long)]
    pub disk: Option<PathBuf>,

    /// Path to the germ (mini-kernel) image.
    #[arg(long)]
    pub germ: PathBuf,

    /// Path to the boot file, if distinct from the germ image.
    #[arg(long)]
    pub boot: Option<PathBuf>,

    /// Path to the floppy image.
    #[arg(long)]
    pub floppy: Option<PathBuf>,

    /// Switch-string passed to `parse_switch_string`, 4.5.
    #[arg(long, default_value = "")]
    pub boot_switch: String,

    #[arg(long, value_enum, default_value_t = BootDevice::Disk)]
    pub boot_device: BootDevice,

    #[arg(long, default_value_t = 606)]
    pub display_width: u16,

    #[arg(long, default_value_t = 808)]
    pub display_height: u16,

    /// log2(virtual words), constrained to [20, 25].
    #[arg(long, default_value_t = 22)]
    pub vm_bits: u32,

    /// log2(real words), constrained to [20, 24].
    #[arg(long, default_value_t = 22)]
    pub rm_bits: u32,

    #[arg(long, default_value = "")]
    pub network_interface: String,

    /// Halt the processor loop once MP is written with any of these values,
    /// primarily for tests and scripted boots.
    #[arg(long, value_delimiter = ',')]
    pub stop_at_mp: Vec<u16>,

    #[arg(long, default_value_t = DEFAULT_IO_REGION_PAGE)]
    pub io_region_page: Word,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConfigRangeError {
    pub field: &'static str,
    pub value: u32,
    pub min: u32,
    pub max: u32,
}

impl std::fmt::Display for ConfigRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {} out of range [{}, {}]", self.field, self.value, self.min, self.max)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigRangeError> {
        if !(VM_BITS_MIN..=VM_BITS_MAX).contains(&self.vm_bits) {
            return Err(ConfigRangeError { field: "vm_bits", value: self.vm_bits, min: VM_BITS_MIN, max: VM_BITS_MAX });
        }
        if !(RM_BITS_MIN..=RM_BITS_MAX).contains(&self.rm_bits) {
            return Err(ConfigRangeError { field: "rm_bits", value: self.rm_bits, min: RM_BITS_MIN, max: RM_BITS_MAX });
        }
        Ok(())
    }

    pub fn stop_at_mp_set(&self) -> HashSet<u16> {
        self.stop_at_mp.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_bits_out_of_range_is_rejected() {
        let mut cfg = Config::try_parse_from(["guam", "--germ", "x.germ"]).unwrap();
        cfg.vm_bits = 19;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_is_in_range() {
        let cfg = Config::try_parse_from(["guam", "--germ", "x.germ"]).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
