// Page-mapped, word-addressed virtual memory with a direct-mapped VA->real
// page cache. Generalises the teacher's byte-addressed `RAM`/`Bus` pair to
// the Mesa/Pilot memory model: a virtual address is a word index, pages are
// 256 words, and every access goes through a page map carrying fetch/store
// reference bits plus a `vacant`/`protect` pair that can raise a fault.

use crate::constants::{PAGE_MASK, PAGE_SIZE};
use crate::types::{DWord, MapFlags, Word};
use log::trace;

/// Raised by the memory subsystem when an access cannot complete. The
/// interpreter catches these as an `Abort` of the current instruction; they
/// are expected, high-frequency control flow, not program errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    PageFault(u32),
    WriteProtectFault(u32),
}

#[derive(Debug, Copy, Clone, Default)]
struct MapEntry {
    flags: MapFlags,
    real_page: u32,
}

#[derive(Debug, Copy, Clone, Default)]
struct CacheLine {
    tag: u32,
    valid: bool,
    real_page: u32,
    cached_for_fetch: bool,
    cached_for_store: bool,
}

#[derive(Debug, Copy, Clone)]
pub struct DisplayInfo {
    pub real_page: u32,
    pub page_count: u32,
    pub bytes_per_line: u32,
}

pub struct Memory {
    vp_size: u32,
    rp_size: u32,
    real: Vec<Word>,
    map: Vec<MapEntry>,
    cache: Vec<CacheLine>,
    cache_bits: u32,
    mds: DWord,
    cb: DWord,
    display_base_rp: Option<u32>,
}

impl Memory {
    /// `vm_bits`/`rm_bits` are the log2 of the number of virtual/real words,
    /// constrained to the ranges Pilot boot images expect (spec 6):
    /// vm in [20, 25], rm in [20, 24].
    pub fn new(vm_bits: u32, rm_bits: u32, cache_bits: u32) -> Self {
        let vp_size = 1u32 << (vm_bits.saturating_sub(8));
        let rp_size = 1u32 << (rm_bits.saturating_sub(8));
        Self {
            vp_size,
            rp_size,
            real: vec![0; (rp_size * PAGE_SIZE) as usize],
            map: vec![MapEntry::default(); vp_size as usize],
            cache: vec![CacheLine::default(); 1usize << cache_bits],
            cache_bits,
            mds: 0,
            cb: 0,
            display_base_rp: None,
        }
    }

    pub fn vp_size(&self) -> u32 {
        self.vp_size
    }
    pub fn rp_size(&self) -> u32 {
        self.rp_size
    }

    pub fn page_of(va: u32) -> u32 {
        va / PAGE_SIZE
    }
    pub fn offset_of(va: u32) -> u32 {
        va & PAGE_MASK
    }
    pub fn same_page(a: u32, b: u32) -> bool {
        Self::page_of(a) == Self::page_of(b)
    }

    fn cache_index(&self, vp: u32) -> usize {
        (vp as usize) & ((1usize << self.cache_bits) - 1)
    }

    /// Returns the current `(flags, real_page)` pair for a virtual page.
    pub fn read_map(&self, vp: u32) -> (MapFlags, u32) {
        let entry = &self.map[vp as usize];
        (entry.flags, entry.real_page)
    }

    /// Installs a map entry, enforcing `vacant => real_page == 0` and
    /// invalidating the cache line for `vp`.
    pub fn write_map(&mut self, vp: u32, mut flags: MapFlags, mut real_page: u32) {
        if flags.vacant {
            real_page = 0;
        }
        self.map[vp as usize] = MapEntry { flags, real_page };
        let idx = self.cache_index(vp);
        let line = &mut self.cache[idx];
        if line.valid && line.tag == vp {
            line.valid = false;
        }
        trace!("write_map vp={:#x} flags={:?} rp={:#x}", vp, flags, real_page);
    }

    pub fn is_vacant(&self, va: u32) -> bool {
        self.map[Self::page_of(va) as usize].flags.vacant
    }

    fn real_word_index(&self, real_page: u32, offset: u32) -> usize {
        (real_page * PAGE_SIZE + offset) as usize
    }

    /// Fetch path of the cache maintenance algorithm (4.1): resolve the tag,
    /// maintain the map's `fetch` flag on first access, and return a pointer
    /// (here: a flat index into `real`) to the backing word.
    pub fn fetch_index(&mut self, va: u32) -> Result<usize, Fault> {
        let vp = Self::page_of(va);
        let offset = Self::offset_of(va);
        let idx = self.cache_index(vp);
        let hit = self.cache[idx].valid && self.cache[idx].tag == vp;
        if !hit {
            let (flags, rp) = self.read_map(vp);
            if flags.vacant {
                return Err(Fault::PageFault(va));
            }
            if !flags.fetch {
                self.map[vp as usize].flags.fetch = true;
            }
            self.cache[idx] = CacheLine { tag: vp, valid: true, real_page: rp, cached_for_fetch: true, cached_for_store: false };
        } else if !self.cache[idx].cached_for_fetch {
            if !self.map[vp as usize].flags.fetch {
                self.map[vp as usize].flags.fetch = true;
            }
            self.cache[idx].cached_for_fetch = true;
        }
        let rp = self.cache[idx].real_page;
        Ok(self.real_word_index(rp, offset))
    }

    /// Store path: additionally raises `WriteProtectFault` and maintains the
    /// `store` flag.
    pub fn store_index(&mut self, va: u32) -> Result<usize, Fault> {
        let vp = Self::page_of(va);
        let offset = Self::offset_of(va);
        let idx = self.cache_index(vp);
        let hit = self.cache[idx].valid && self.cache[idx].tag == vp;
        if !hit {
            let (flags, rp) = self.read_map(vp);
            if flags.vacant {
                return Err(Fault::PageFault(va));
            }
            if flags.protect {
                return Err(Fault::WriteProtectFault(va));
            }
            if !flags.store {
                self.map[vp as usize].flags.store = true;
            }
            self.cache[idx] = CacheLine { tag: vp, valid: true, real_page: rp, cached_for_fetch: false, cached_for_store: true };
        } else {
            let flags = self.map[vp as usize].flags;
            if flags.protect {
                return Err(Fault::WriteProtectFault(va));
            }
            if !self.cache[idx].cached_for_store {
                if !flags.store {
                    self.map[vp as usize].flags.store = true;
                }
                self.cache[idx].cached_for_store = true;
            }
        }
        let rp = self.cache[idx].real_page;
        Ok(self.real_word_index(rp, offset))
    }

    pub fn fetch(&mut self, va: u32) -> Result<Word, Fault> {
        let idx = self.fetch_index(va)?;
        Ok(self.real[idx])
    }

    pub fn store(&mut self, va: u32, value: Word) -> Result<(), Fault> {
        let idx = self.store_index(va)?;
        self.real[idx] = value;
        Ok(())
    }

    /// Cross-page-aware double-word read, low word at the lower address.
    pub fn read_dbl(&mut self, va: u32) -> Result<DWord, Fault> {
        let low = self.fetch(va)?;
        let high = if Self::offset_of(va) == PAGE_SIZE - 1 {
            self.fetch(va + 1)?
        } else {
            let idx = self.fetch_index(va)?;
            self.real[idx + 1]
        };
        Ok(((high as DWord) << 16) | low as DWord)
    }

    // -- MDS-relative access -------------------------------------------------

    pub fn set_mds(&mut self, mds: DWord) {
        self.mds = mds;
    }
    pub fn mds(&self) -> DWord {
        self.mds
    }
    pub fn lengthen_pointer(&self, ptr: Word) -> u32 {
        self.mds.wrapping_add(ptr as u32)
    }
    pub fn fetch_mds(&mut self, ptr: Word) -> Result<Word, Fault> {
        self.fetch(self.lengthen_pointer(ptr))
    }
    pub fn store_mds(&mut self, ptr: Word, value: Word) -> Result<(), Fault> {
        self.store(self.lengthen_pointer(ptr), value)
    }
    pub fn read_dbl_mds(&mut self, ptr: Word) -> Result<DWord, Fault> {
        self.read_dbl(self.lengthen_pointer(ptr))
    }

    // -- code segment access -------------------------------------------------

    pub fn set_cb(&mut self, cb: DWord) {
        self.cb = cb;
    }
    pub fn cb(&self) -> DWord {
        self.cb
    }

    pub fn read_code(&mut self, offset: u32) -> Result<Word, Fault> {
        self.fetch(self.cb.wrapping_add(offset))
    }

    pub fn get_code_byte(&mut self, pc: &mut u16) -> Result<u8, Fault> {
        let word = self.read_code((*pc / 2) as u32)?;
        let odd = *pc & 1 == 1;
        *pc = pc.wrapping_add(1);
        Ok(if odd { (word & 0xFF) as u8 } else { (word >> 8) as u8 })
    }

    pub fn get_code_word(&mut self, pc: &mut u16) -> Result<Word, Fault> {
        let ptr = self.cb.wrapping_add((*pc / 2) as u32);
        if *pc & 1 == 1 {
            let low_idx = self.fetch_index(ptr)?;
            let low = self.real[low_idx];
            let high = if Self::same_page(ptr, ptr + 1) {
                self.real[low_idx + 1]
            } else {
                self.fetch(ptr + 1)?
            };
            *pc = pc.wrapping_add(2);
            Ok(((low & 0xFF) << 8) | (high >> 8))
        } else {
            let word = self.fetch(ptr)?;
            *pc = pc.wrapping_add(2);
            Ok(word)
        }
    }

    // -- byte addressing --------------------------------------------------------

    /// `FetchByte`: byte `offset` from a long-pointer `base`, big-endian
    /// within its containing word (offset even -> high byte, odd -> low
    /// byte), used by the string-instruction family.
    pub fn fetch_byte(&mut self, base: u32, offset: u32) -> Result<u8, Fault> {
        let word = self.fetch(base.wrapping_add(offset / 2))?;
        Ok(if offset % 2 == 0 { crate::types::high_byte(word) } else { crate::types::low_byte(word) })
    }

    /// `StoreByte`: the byte-granularity counterpart to `fetch_byte`,
    /// read-modify-writing the containing word.
    pub fn store_byte(&mut self, base: u32, offset: u32, value: u8) -> Result<(), Fault> {
        let va = base.wrapping_add(offset / 2);
        let word = self.fetch(va)?;
        let new_word = if offset % 2 == 0 {
            crate::types::make_word(value, crate::types::low_byte(word))
        } else {
            crate::types::make_word(crate::types::high_byte(word), value)
        };
        self.store(va, new_word)
    }

    // -- display band ---------------------------------------------------------

    /// Computes the page count for a `width x height` 1-bit-per-pixel
    /// display and reserves that many pages at the top of real memory,
    /// exclusively for display use.
    pub fn reserve_display(&mut self, width: u32, height: u32) -> DisplayInfo {
        let bytes_per_line = (width + 7) / 8;
        let total_words = ((bytes_per_line * height) + 1) / 2;
        let page_count = (total_words + PAGE_SIZE - 1) / PAGE_SIZE;
        let base_rp = self.rp_size - page_count;
        self.display_base_rp = Some(base_rp);
        DisplayInfo { real_page: base_rp, page_count, bytes_per_line }
    }

    /// Installs a contiguous mapping for the display band starting at
    /// virtual page `vp`, invalidating all affected cache entries.
    pub fn map_display(&mut self, vp: u32, rp: u32, page_count: u32) {
        for i in 0..page_count {
            self.write_map(vp + i, MapFlags { fetch: false, store: false, protect: false, vacant: false }, rp + i);
        }
    }

    pub fn display_real_page(&self) -> Option<u32> {
        self.display_base_rp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped_memory() -> Memory {
        let mut mem = Memory::new(20, 20, 8);
        mem.write_map(0x40, MapFlags::default(), 0x10);
        mem
    }

    #[test]
    fn vacant_page_faults_on_fetch_and_store() {
        let mut mem = Memory::new(20, 20, 8);
        mem.write_map(0x40, MapFlags::vacant(), 0);
        let va = 0x40 * PAGE_SIZE + 3;
        assert_eq!(mem.fetch(va), Err(Fault::PageFault(va)));
        assert_eq!(mem.store(va, 1), Err(Fault::PageFault(va)));
    }

    #[test]
    fn protected_page_allows_fetch_denies_store() {
        let mut mem = Memory::new(20, 20, 8);
        mem.write_map(0x40, MapFlags { protect: true, ..Default::default() }, 0x10);
        let va = 0x40 * PAGE_SIZE;
        assert!(mem.fetch(va).is_ok());
        assert_eq!(mem.store(va, 1), Err(Fault::WriteProtectFault(va)));
    }

    #[test]
    fn store_then_fetch_roundtrips() {
        let mut mem = mapped_memory();
        let va = 0x40 * PAGE_SIZE + 2;
        mem.store(va, 0xBEEF).unwrap();
        assert_eq!(mem.fetch(va).unwrap(), 0xBEEF);
    }

    #[test]
    fn write_map_vacant_forces_real_page_zero() {
        let mut mem = Memory::new(20, 20, 8);
        mem.write_map(7, MapFlags::vacant(), 42);
        let (flags, rp) = mem.read_map(7);
        assert!(flags.vacant);
        assert_eq!(rp, 0);
    }

    #[test]
    fn double_word_round_trip() {
        let mut mem = mapped_memory();
        let va = 0x40 * PAGE_SIZE;
        mem.store(va, 0x1111).unwrap();
        mem.store(va + 1, 0x2222).unwrap();
        assert_eq!(mem.read_dbl(va).unwrap(), 0x22221111);
    }

    #[test]
    fn store_byte_then_fetch_byte_roundtrips_both_halves() {
        let mut mem = mapped_memory();
        let base = 0x40 * PAGE_SIZE;
        mem.store_byte(base, 0, 0xAB).unwrap();
        mem.store_byte(base, 1, 0xCD).unwrap();
        assert_eq!(mem.fetch_byte(base, 0).unwrap(), 0xAB);
        assert_eq!(mem.fetch_byte(base, 1).unwrap(), 0xCD);
        assert_eq!(mem.fetch(base).unwrap(), 0xABCD);
    }

    #[test]
    fn reserve_display_takes_top_of_real_memory() {
        let mut mem = Memory::new(20, 20, 8);
        let info = mem.reserve_display(640, 480);
        assert_eq!(info.real_page + info.page_count, mem.rp_size());
    }
}
