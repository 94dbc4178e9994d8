//! The i386-pc platform. Before the loader's memory manager starts, the
//! early boot code queries BIOS INT 15h, AX=E820h and stores the results in a
//! fixed region:
//!
//!   +0x0  u32 entry count
//!   +0x4  u32 bytes per entry (24 when the BIOS fills in ACPI attributes)
//!   +0x8  entries
//!
//! This module only ever reads that region, decoding each entry from bytes.

use core::fmt;

use log::{debug, warn};

use super::{Continuation, FreeBlock, MemoryPlatform, NextBlock};
use crate::error::{SplError, Structure};

pub const MEMMAP_LOCATION: usize = 0x4000;
/// The map occupies a single 4KiB frame
pub const MEMMAP_REGION_SIZE: usize = 0x1000;
pub const MEMMAP_LENGTH: usize = 0x0;
pub const MEMMAP_BYTES_PER_ENTRY: usize = 0x4;
pub const MEMMAP_TABLE: usize = 0x8;
pub const MEMMAP_ENTRY_SIZE: usize = 24;
/// Entries from BIOSes predating ACPI 3.0 stop before the attribute field
pub const MEMMAP_MIN_ENTRY_SIZE: usize = 20;

pub const REGION_TYPE_AVAILABLE: u32 = 1;

/// Blocks starting below this address are subject to the low memory policy
pub const LOW_MEMORY_LIMIT: u64 = 0x10_0000;
/// Start of the low memory the loader is willing to hand out. Everything
/// below it is kept for the IVT, BIOS data, the memory map itself and the
/// loader's own code.
pub const LOW_MEMORY_GUARD: u64 = 0x2_0000;
/// Addresses handed to the allocator must fit in 32 bits
pub const ADDRESS_LIMIT: u64 = 1 << 32;

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct E820Entry {
    pub base_lo: u32,
    pub base_hi: u32,
    pub length_lo: u32,
    pub length_hi: u32,
    pub region_type: u32,
    pub ext_attributes: u32,
}

impl E820Entry {
    /// Decode an entry from `raw`, which holds at least
    /// `MEMMAP_MIN_ENTRY_SIZE` bytes
    fn decode(raw: &[u8]) -> Self {
        let field =
            |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Self {
            base_lo: field(0),
            base_hi: field(4),
            length_lo: field(8),
            length_hi: field(12),
            region_type: field(16),
            // Without the attribute field, entries are implicitly enabled
            ext_attributes: if raw.len() >= MEMMAP_ENTRY_SIZE { field(20) } else { 1 },
        }
    }

    pub fn base(&self) -> u64 {
        ((self.base_hi as u64) << 32) | self.base_lo as u64
    }

    pub fn length(&self) -> u64 {
        ((self.length_hi as u64) << 32) | self.length_lo as u64
    }

    pub fn is_available(&self) -> bool {
        self.region_type == REGION_TYPE_AVAILABLE
    }
}

impl fmt::Debug for E820Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "E820Entry({:#018X} +{:#X}, type {}, attr {:#X})",
            self.base(),
            self.length(),
            self.region_type,
            self.ext_attributes,
        )
    }
}

/// A view of the firmware memory map region
#[derive(Copy, Clone, Debug)]
pub struct E820Map<'a> {
    table: &'a [u8],
    count: usize,
    stride: usize,
}

impl<'a> E820Map<'a> {
    /// A map with no entries, standing in for a missing one
    pub const fn empty() -> Self {
        Self {
            table: &[],
            count: 0,
            stride: MEMMAP_ENTRY_SIZE,
        }
    }

    /// Interpret `region` as a memory map: count, stride, then entries. A
    /// region too short to hold the count is treated as an absent map. If the
    /// firmware claims more entries than the region can hold, only the ones
    /// that fit are used.
    pub fn parse(region: &'a [u8]) -> Result<Self, SplError> {
        if region.len() < MEMMAP_TABLE {
            debug!("no memory map present");
            return Ok(Self::empty());
        }
        let read = |at: usize| {
            let raw = [region[at], region[at + 1], region[at + 2], region[at + 3]];
            u32::from_le_bytes(raw) as usize
        };
        let claimed = read(MEMMAP_LENGTH);
        let stride = read(MEMMAP_BYTES_PER_ENTRY);
        if claimed == 0 {
            return Ok(Self::empty());
        }
        if stride < MEMMAP_MIN_ENTRY_SIZE {
            return Err(SplError::StructuralInvalid(Structure::MemoryMapStride));
        }

        let table = &region[MEMMAP_TABLE..];
        let fits = table.len() / stride;
        let count = if claimed > fits {
            warn!(
                "memory map claims {} entries, only {} fit in the region",
                claimed, fits
            );
            fits
        } else {
            claimed
        };
        Ok(Self {
            table,
            count,
            stride,
        })
    }

    /// Read the map the early boot code left at `location`.
    ///
    /// # Safety
    /// `location` must be the address of a readable `MEMMAP_REGION_SIZE` byte
    /// region that nothing writes to for the rest of the loader's lifetime.
    pub unsafe fn from_location(location: usize) -> Result<E820Map<'static>, SplError> {
        let region =
            unsafe { core::slice::from_raw_parts(location as *const u8, MEMMAP_REGION_SIZE) };
        E820Map::parse(region)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<E820Entry> {
        if index >= self.count {
            return None;
        }
        let start = index * self.stride;
        Some(E820Entry::decode(&self.table[start..start + self.stride]))
    }

    pub fn iter(&self) -> impl Iterator<Item = E820Entry> + '_ {
        (0..self.count).filter_map(move |index| self.get(index))
    }
}

/// Memory enumeration for BIOS-booted PCs. The continuation value is the
/// index of the next E820 entry to examine.
#[derive(Copy, Clone, Debug)]
pub struct PcBiosPlatform<'a> {
    map: E820Map<'a>,
    guard: u64,
}

impl<'a> PcBiosPlatform<'a> {
    pub fn new(map: E820Map<'a>) -> Self {
        Self::with_guard(map, LOW_MEMORY_GUARD)
    }

    pub fn with_guard(map: E820Map<'a>, guard: u64) -> Self {
        Self { map, guard }
    }

    pub fn map(&self) -> &E820Map<'a> {
        &self.map
    }

    /// Available RAM, starting at a 32-bit address
    fn is_usable(entry: &E820Entry) -> bool {
        entry.is_available() && entry.base_hi == 0
    }

    /// Convert a usable entry into a block. Low memory blocks that straddle
    /// the guard address are narrowed to start at it; blocks entirely below
    /// the guard are passed through unchanged.
    fn to_block(&self, entry: &E820Entry) -> FreeBlock {
        let mut base = entry.base();
        let limit = base.saturating_add(entry.length()).min(ADDRESS_LIMIT);
        if base < LOW_MEMORY_LIMIT && base < self.guard && limit > self.guard {
            debug!("raising low memory block at {:#X} to {:#X}", base, self.guard);
            base = self.guard;
        }
        FreeBlock::new(base, limit)
    }
}

impl MemoryPlatform for PcBiosPlatform<'_> {
    fn count_available(&self) -> usize {
        self.map.iter().filter(Self::is_usable).count()
    }

    fn next_block(&self, cont: Continuation) -> NextBlock {
        if cont.is_end() {
            return NextBlock::End;
        }
        for index in cont.as_raw()..self.map.len() {
            if let Some(entry) = self.map.get(index) {
                if Self::is_usable(&entry) {
                    let next = Continuation::from_raw(index + 1);
                    return NextBlock::Block(self.to_block(&entry), next);
                }
            }
        }
        NextBlock::End
    }
}
