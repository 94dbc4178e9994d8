//! The loader's memory manager. It is a simple bump allocator over the free
//! blocks a `MemoryPlatform` reports: the loader only allocates while it
//! prepares the next stage, and everything is abandoned when that stage takes
//! over, so freeing is never needed.

use core::alloc::{GlobalAlloc, Layout};

use log::{debug, warn};
use spin::Mutex;

use super::{FreeBlock, MemoryPlatform};
use crate::error::SplError;

/// Free list with room for `N` blocks
pub struct MemoryManager<const N: usize> {
    blocks: [FreeBlock; N],
    count: usize,
}

impl<const N: usize> MemoryManager<N> {
    pub const fn new() -> Self {
        Self {
            blocks: [FreeBlock::EMPTY; N],
            count: 0,
        }
    }

    /// Build the free list from the platform's memory map, replacing any
    /// previous contents. Returns the number of blocks tracked, or `NotFound`
    /// when the platform reports no usable memory at all.
    pub fn init<P: MemoryPlatform + ?Sized>(&mut self, platform: &P) -> Result<usize, SplError> {
        let available = platform.count_available();
        if available > N {
            warn!("{} usable memory regions, only tracking {}", available, N);
        }

        self.count = 0;
        for block in platform.blocks() {
            if self.count == N {
                break;
            }
            if block.size() == 0 {
                continue;
            }
            debug!("free block {:#010X}-{:#010X}", block.base, block.limit);
            self.blocks[self.count] = block;
            self.count += 1;
        }

        if self.count == 0 {
            return Err(SplError::NotFound);
        }
        Ok(self.count)
    }

    pub fn blocks(&self) -> &[FreeBlock] {
        &self.blocks[..self.count]
    }

    /// Carve `size` bytes aligned to `align` (a power of two) from the first
    /// block with room for them. Returns the physical address.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<u64> {
        if !align.is_power_of_two() {
            return None;
        }
        for block in self.blocks[..self.count].iter_mut() {
            // address zero doubles as the null pointer
            let cursor = block.next.max(1);
            let start = match cursor.checked_add(align - 1) {
                Some(end) => end & !(align - 1),
                None => continue,
            };
            let end = match start.checked_add(size) {
                Some(end) => end,
                None => continue,
            };
            if end <= block.limit {
                block.next = end;
                return Some(start);
            }
        }
        None
    }

    /// Bytes still available across all blocks
    pub fn free_bytes(&self) -> u64 {
        self.blocks().iter().map(FreeBlock::remaining).sum()
    }
}

impl<const N: usize> Default for MemoryManager<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A `MemoryManager` usable as the boot stage's global allocator
pub struct LoaderHeap<const N: usize> {
    manager: Mutex<MemoryManager<N>>,
}

impl<const N: usize> LoaderHeap<N> {
    pub const fn new() -> Self {
        Self {
            manager: Mutex::new(MemoryManager::new()),
        }
    }

    /// Build the free list, then install it. The lock is only taken for the
    /// final swap: building logs, and a logger may allocate from this heap.
    pub fn init<P: MemoryPlatform + ?Sized>(&self, platform: &P) -> Result<usize, SplError> {
        let mut manager = MemoryManager::new();
        let count = manager.init(platform)?;
        *self.manager.lock() = manager;
        Ok(count)
    }

    pub fn free_bytes(&self) -> u64 {
        self.manager.lock().free_bytes()
    }
}

impl<const N: usize> Default for LoaderHeap<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for LoaderHeap<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let address = self
            .manager
            .lock()
            .allocate(layout.size() as u64, layout.align() as u64);
        match address.and_then(|addr| usize::try_from(addr).ok()) {
            Some(addr) => addr as *mut u8,
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
}
