//! The configurable block cache that mediates memory accesses and
//! drives the reported memory-cycle counter (`spec.md` §3, §4.5).
//!
//! Supports three geometries plus "off", selected once at VM start-up
//! (`spec.md` §3's geometry table): direct-mapped (64 lines, 1 way),
//! two-way set associative (32 sets, 2 ways), and fully associative
//! (1 set, 64 ways). Write-back, write-allocate, LRU replacement.

use crate::error::Fault;
use crate::memory::{Memory, Width};

/// Fixed line width in bytes.
pub const BLOCK_SIZE: u32 = 16;
/// Fixed total number of cache lines, regardless of geometry.
pub const NUM_CACHE_LINES: usize = 64;
const OFFSET_BITS: u32 = 4; // log2(BLOCK_SIZE)
const WORDS_PER_BLOCK: u64 = (BLOCK_SIZE / 4) as u64;

/// Cost in cycles of transferring `w` 32-bit words as one contiguous
/// block: 8 cycles for the first word, 2 for every subsequent one.
fn block_transfer_cycles(w: u64) -> u64 {
    6 + 2 * w
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Off,
    Direct,
    TwoWay,
    Fully,
}

impl CacheMode {
    /// `(associativity, num_sets)`, or `None` for `Off`.
    fn geometry(self) -> Option<(usize, usize)> {
        match self {
            CacheMode::Off => None,
            CacheMode::Direct => Some((1, 64)),
            CacheMode::TwoWay => Some((2, 32)),
            CacheMode::Fully => Some((64, 1)),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheLine {
    tag: u32,
    valid: bool,
    dirty: bool,
    data: [u8; BLOCK_SIZE as usize],
    lru_stamp: u64,
}

impl CacheLine {
    fn empty() -> Self {
        Self {
            tag: 0,
            valid: false,
            dirty: false,
            data: [0u8; BLOCK_SIZE as usize],
            lru_stamp: 0,
        }
    }
}

#[derive(Debug)]
pub struct Cache {
    mode: CacheMode,
    associativity: usize,
    set_bits: u32,
    /// `sets[set][way]`.
    sets: Vec<Vec<CacheLine>>,
    /// Running total of memory cycles charged since the VM started.
    cycles: u64,
}

impl Cache {
    pub fn new(mode: CacheMode) -> Self {
        let (associativity, num_sets) = mode.geometry().unwrap_or((0, 0));
        let set_bits = if num_sets > 1 {
            (usize::BITS - (num_sets - 1).leading_zeros()) as u32
        } else {
            0
        };
        let sets = (0..num_sets.max(0))
            .map(|_| (0..associativity).map(|_| CacheLine::empty()).collect())
            .collect();
        Self {
            mode,
            associativity,
            set_bits,
            sets,
            cycles: 0,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn decompose(&self, addr: u32) -> (u32, usize, u32) {
        let set_mask = if self.set_bits == 0 {
            0
        } else {
            (1u32 << self.set_bits) - 1
        };
        let tag = addr >> (self.set_bits + OFFSET_BITS);
        let set = ((addr >> OFFSET_BITS) & set_mask) as usize;
        let offset = addr & ((1u32 << OFFSET_BITS) - 1);
        (tag, set, offset)
    }

    /// Access `len` bytes (1..=4) within a single cache line, starting
    /// at `addr`. `write` is `Some(bytes)` for a write, `None` for a
    /// read. `addr`'s block must hold the whole access (caller
    /// guarantees `offset + len <= BLOCK_SIZE`).
    fn access_line(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        len: u32,
        write: Option<&[u8]>,
    ) -> Result<Vec<u8>, Fault> {
        let (tag, set, offset) = self.decompose(addr);
        let ways = &self.sets[set];

        let hit_way = ways
            .iter()
            .position(|line| line.valid && line.tag == tag);

        let way = if let Some(way) = hit_way {
            way
        } else {
            // Miss: pick a victim (first invalid way, else LRU).
            let victim = ways
                .iter()
                .position(|line| !line.valid)
                .unwrap_or_else(|| {
                    ways.iter()
                        .enumerate()
                        .min_by_key(|(_, line)| line.lru_stamp)
                        .map(|(i, _)| i)
                        .expect("every set has at least one way")
                });

            let mem_len = memory.len();

            if self.sets[set][victim].valid && self.sets[set][victim].dirty {
                let old_tag = self.sets[set][victim].tag;
                let writeback_addr = (old_tag << (self.set_bits + OFFSET_BITS))
                    | ((set as u32) << OFFSET_BITS);
                // The final block of memory may be shorter than BLOCK_SIZE
                // when mem_size isn't a multiple of it; only write back the
                // bytes that actually fit.
                let wb_len = mem_len.saturating_sub(writeback_addr).min(BLOCK_SIZE);
                let bytes = self.sets[set][victim].data;
                memory.write_bytes(writeback_addr, &bytes[..wb_len as usize])?;
                self.cycles += block_transfer_cycles(WORDS_PER_BLOCK);
            }

            let fill_base = addr & !(BLOCK_SIZE - 1);
            let fill_len = mem_len.saturating_sub(fill_base).min(BLOCK_SIZE);
            let filled = memory.read_bytes(fill_base, fill_len)?;
            let mut data = [0u8; BLOCK_SIZE as usize];
            data[..fill_len as usize].copy_from_slice(filled);
            self.cycles += block_transfer_cycles(WORDS_PER_BLOCK);

            let line = &mut self.sets[set][victim];
            line.tag = tag;
            line.valid = true;
            line.dirty = write.is_some();
            line.data = data;
            victim
        };

        let line = &mut self.sets[set][way];
        let start = offset as usize;
        let end = start + len as usize;
        let result = if let Some(bytes) = write {
            line.data[start..end].copy_from_slice(bytes);
            line.dirty = true;
            bytes.to_vec()
        } else {
            line.data[start..end].to_vec()
        };

        if self.associativity > 1 {
            line.lru_stamp = self.cycles;
        }
        self.cycles += 1;

        Ok(result)
    }

    /// Access `len` bytes starting at `addr`, splitting across a
    /// block boundary if necessary (see `SPEC_FULL.md` open
    /// questions). Bytes are in address order (little-endian word
    /// assembly is the caller's job).
    fn access_bytes(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        len: u32,
        write: Option<&[u8]>,
    ) -> Result<Vec<u8>, Fault> {
        // The requested span itself must be in bounds, independent of
        // how much of its cache block actually exists in memory (the
        // final block may be short when mem_size isn't a multiple of
        // BLOCK_SIZE).
        match addr.checked_add(len) {
            Some(end) if end <= memory.len() => {}
            _ => {
                return Err(Fault::MemOob {
                    addr,
                    width: len as u8,
                })
            }
        }

        let offset_in_block = addr & (BLOCK_SIZE - 1);
        if offset_in_block + len <= BLOCK_SIZE {
            self.access_line(memory, addr, len, write)
        } else {
            let first_len = BLOCK_SIZE - offset_in_block;
            let second_len = len - first_len;
            let mut out = self.access_line(
                memory,
                addr,
                first_len,
                write.map(|w| &w[..first_len as usize]),
            )?;
            let rest = self.access_line(
                memory,
                addr + first_len,
                second_len,
                write.map(|w| &w[first_len as usize..]),
            )?;
            out.extend_from_slice(&rest);
            Ok(out)
        }
    }

    fn uncached_access(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        width: Width,
        write: Option<u32>,
        burst_second: bool,
    ) -> Result<u32, Fault> {
        let result = match write {
            Some(value) => {
                memory.write(addr, value, width)?;
                value
            }
            None => memory.read(addr, width)?,
        };
        self.cycles += if burst_second { 2 } else { 8 };
        Ok(result)
    }

    fn cached_access(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        width: Width,
        write: Option<u32>,
    ) -> Result<u32, Fault> {
        let len = width.bytes();
        let write_bytes = write.map(|v| v.to_le_bytes()[..len as usize].to_vec());
        let bytes = self.access_bytes(memory, addr, len, write_bytes.as_deref())?;
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u32::from_le_bytes(buf))
    }

    /// Read or write `width` bytes at `addr`, charging whatever the
    /// current cache mode dictates.
    pub fn access(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        width: Width,
        write: Option<u32>,
    ) -> Result<u32, Fault> {
        if self.mode == CacheMode::Off {
            self.uncached_access(memory, addr, width, write, false)
        } else {
            self.cached_access(memory, addr, width, write)
        }
    }

    /// Fetch one 32-bit instruction word. The cache mediates only
    /// non-instruction (data-path) accesses (`spec.md` §2); with the
    /// cache enabled, instruction fetch bypasses it entirely and isn't
    /// charged. With the cache disabled, every access including fetch
    /// goes through the flat per-access cost model, where
    /// `burst_second` (`true` for the second word of an 8-byte
    /// instruction) is charged at the reduced burst rate (`spec.md`
    /// §4.5).
    pub fn fetch_word(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        burst_second: bool,
    ) -> Result<u32, Fault> {
        if self.mode == CacheMode::Off {
            self.uncached_access(memory, addr, Width::Word, None, burst_second)
        } else {
            memory.read_word(addr)
        }
    }

    pub fn read(&mut self, memory: &mut Memory, addr: u32, width: Width) -> Result<u32, Fault> {
        self.access(memory, addr, width, None)
    }

    pub fn write(
        &mut self,
        memory: &mut Memory,
        addr: u32,
        value: u32,
        width: Width,
    ) -> Result<(), Fault> {
        self.access(memory, addr, width, Some(value))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cache_charges_eight_per_access() {
        let mut mem = Memory::new(256);
        let mut cache = Cache::new(CacheMode::Off);
        cache.write(&mut mem, 0x10, 42, Width::Byte).unwrap();
        assert_eq!(cache.cycles(), 8);
        cache.read(&mut mem, 0x10, Width::Byte).unwrap();
        assert_eq!(cache.cycles(), 16);
    }

    #[test]
    fn disabled_cache_discounts_instruction_burst_second_word() {
        let mut mem = Memory::new(256);
        let mut cache = Cache::new(CacheMode::Off);
        cache.fetch_word(&mut mem, 0x0, false).unwrap();
        assert_eq!(cache.cycles(), 8);
        cache.fetch_word(&mut mem, 0x4, true).unwrap();
        assert_eq!(cache.cycles(), 10);
    }

    #[test]
    fn direct_mapped_miss_then_hit_matches_spec_example() {
        let mut mem = Memory::new(0x2000);
        let mut cache = Cache::new(CacheMode::Direct);
        cache.read(&mut mem, 0x1000, Width::Byte).unwrap();
        assert_eq!(cache.cycles(), 15);
        cache.read(&mut mem, 0x1000, Width::Byte).unwrap();
        assert_eq!(cache.cycles(), 16);
    }

    #[test]
    fn write_back_on_dirty_eviction() {
        let mut mem = Memory::new(0x1000);
        // Direct-mapped: 64 lines, 16-byte blocks -> 1024 bytes
        // addressable without aliasing; two addresses 1024 bytes apart
        // map to the same line.
        let mut cache = Cache::new(CacheMode::Direct);
        cache.write(&mut mem, 0x0, 0xaa, Width::Byte).unwrap();
        let after_first_write = cache.cycles();
        assert_eq!(after_first_write, 15); // fill (14) + hit (1)

        // Evict the dirty line by touching the aliasing address.
        cache.write(&mut mem, 0x400, 0xbb, Width::Byte).unwrap();
        let after_eviction = cache.cycles();
        // writeback (14) + fill (14) + hit (1)
        assert_eq!(after_eviction - after_first_write, 29);

        assert_eq!(mem.read_byte(0x0).unwrap(), 0xaa);
    }

    #[test]
    fn fully_associative_single_set() {
        let mut mem = Memory::new(0x10000);
        let mut cache = Cache::new(CacheMode::Fully);
        for i in 0..64u32 {
            cache.write(&mut mem, i * BLOCK_SIZE, i as u8 as u32, Width::Byte).unwrap();
        }
        // All 64 lines still resident: re-reading the first one hits.
        let before = cache.cycles();
        cache.read(&mut mem, 0, Width::Byte).unwrap();
        assert_eq!(cache.cycles() - before, 1);
    }

    #[test]
    fn two_way_set_associative_holds_two_lines_per_set() {
        let mut mem = Memory::new(0x10000);
        let mut cache = Cache::new(CacheMode::TwoWay);
        // Two addresses mapping to the same set, 32 sets * 16 bytes = 512 apart.
        cache.write(&mut mem, 0x0, 1, Width::Byte).unwrap();
        cache.write(&mut mem, 0x200, 2, Width::Byte).unwrap();
        let before = cache.cycles();
        // Both still resident (2-way), so both hit now.
        cache.read(&mut mem, 0x0, Width::Byte).unwrap();
        cache.read(&mut mem, 0x200, Width::Byte).unwrap();
        assert_eq!(cache.cycles() - before, 2);
    }

    #[test]
    fn fetch_word_bypasses_cache_when_enabled() {
        let mut mem = Memory::new(0x2000);
        let mut cache = Cache::new(CacheMode::Direct);
        cache.fetch_word(&mut mem, 0x1000, false).unwrap();
        assert_eq!(cache.cycles(), 0);
        cache.fetch_word(&mut mem, 0x1004, true).unwrap();
        assert_eq!(cache.cycles(), 0);
    }

    #[test]
    fn in_bounds_access_in_final_partial_block_does_not_fault() {
        // mem_size not a multiple of BLOCK_SIZE: the last block (base
        // 0x60) only has 4 valid bytes (0x60..0x64).
        let mut mem = Memory::new(100);
        let mut cache = Cache::new(CacheMode::Direct);
        cache.write(&mut mem, 96, 0x0403_0201, Width::Word).unwrap();
        assert_eq!(cache.read(&mut mem, 96, Width::Word).unwrap(), 0x0403_0201);
    }

    #[test]
    fn access_reaching_past_end_of_final_partial_block_still_faults() {
        let mut mem = Memory::new(100);
        let mut cache = Cache::new(CacheMode::Direct);
        // The final block (base 96) only holds 4 valid bytes (96..100);
        // a word at 98 would reach address 102, past mem_size.
        assert_eq!(
            cache.write(&mut mem, 98, 0x0102_0304, Width::Word),
            Err(Fault::MemOob { addr: 98, width: 4 })
        );
    }

    #[test]
    fn dirty_eviction_in_final_partial_block_writes_back_cleanly() {
        // mem_size = 2100 is not a multiple of BLOCK_SIZE: the final
        // block covers 2096..2100 (4 valid bytes) and shares a set with
        // the block at address 48 (both `(addr >> 4) & 63 == 3`).
        let mut mem = Memory::new(2100);
        let mut cache = Cache::new(CacheMode::Direct);
        cache.write(&mut mem, 2096, 0xAB, Width::Byte).unwrap();
        // Evict the dirty partial line; its writeback must clamp to the
        // 4 valid bytes instead of faulting on a full 16-byte span.
        cache.write(&mut mem, 48, 0xCD, Width::Byte).unwrap();
        assert_eq!(mem.read_byte(2096).unwrap(), 0xAB);
    }

    #[test]
    fn word_crossing_block_boundary_splits_correctly() {
        let mut mem = Memory::new(0x1000);
        let mut cache = Cache::new(CacheMode::Direct);
        // offset 14 within a 16-byte block: bytes at 14,15 in this
        // block, 16,17 in the next.
        cache.write(&mut mem, 14, 0x0403_0201, Width::Word).unwrap();
        assert_eq!(cache.read(&mut mem, 14, Width::Word).unwrap(), 0x0403_0201);
    }
}
