//! Physical memory enumeration. Each platform turns whatever its firmware
//! reports into a sequence of `FreeBlock`s through the `MemoryPlatform`
//! trait, so the memory manager itself never looks at a firmware structure.
//!
//! Enumeration is resumable: every block comes back with a `Continuation`
//! that picks the scan up right after it. `BlockCursor` wraps that protocol
//! for callers that just want to walk all blocks.

pub mod e820;
pub mod manager;

pub use e820::{E820Entry, E820Map, PcBiosPlatform};
pub use manager::{LoaderHeap, MemoryManager};

/// A usable range of physical memory. `next` is the allocation cursor: the
/// memory manager carves allocations off the front of the block by moving it
/// towards `limit`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FreeBlock {
    pub base: u64,
    /// Exclusive end of the block
    pub limit: u64,
    pub next: u64,
}

impl FreeBlock {
    pub const EMPTY: FreeBlock = FreeBlock::new(0, 0);

    pub const fn new(base: u64, limit: u64) -> Self {
        Self {
            base,
            limit,
            next: base,
        }
    }

    pub fn size(&self) -> u64 {
        self.limit.saturating_sub(self.base)
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.next)
    }
}

/// Opaque position in a platform's memory scan. Only the platform that
/// produced a continuation knows what its value means.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Continuation(usize);

impl Continuation {
    /// Begins a fresh scan
    pub const START: Continuation = Continuation(0);
    /// No more blocks. A platform returns this forever once reached.
    pub const END: Continuation = Continuation(usize::MAX);

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> usize {
        self.0
    }

    pub fn is_end(&self) -> bool {
        *self == Self::END
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NextBlock {
    /// A block, and the continuation positioned just past it
    Block(FreeBlock, Continuation),
    End,
}

/// Platform hook for discovering physical memory
pub trait MemoryPlatform {
    /// Number of firmware entries that count as usable memory. Lets callers
    /// size fixed-capacity structures before walking the blocks.
    fn count_available(&self) -> usize;

    /// Find the next usable block at or after `cont`
    fn next_block(&self, cont: Continuation) -> NextBlock;

    fn blocks(&self) -> BlockCursor<'_, Self> {
        BlockCursor::new(self)
    }
}

/// Walks all blocks of a platform in firmware order
pub struct BlockCursor<'p, P: MemoryPlatform + ?Sized> {
    platform: &'p P,
    cont: Continuation,
}

impl<'p, P: MemoryPlatform + ?Sized> BlockCursor<'p, P> {
    pub fn new(platform: &'p P) -> Self {
        Self::resume(platform, Continuation::START)
    }

    /// Continue a scan from a continuation returned by an earlier call
    pub fn resume(platform: &'p P, cont: Continuation) -> Self {
        Self { platform, cont }
    }

    pub fn continuation(&self) -> Continuation {
        self.cont
    }

    pub fn has_next(&self) -> bool {
        !self.cont.is_end() && matches!(self.platform.next_block(self.cont), NextBlock::Block(..))
    }

    pub fn advance(&mut self) -> Option<FreeBlock> {
        if self.cont.is_end() {
            return None;
        }
        match self.platform.next_block(self.cont) {
            NextBlock::Block(block, next) => {
                self.cont = next;
                Some(block)
            }
            NextBlock::End => {
                self.cont = Continuation::END;
                None
            }
        }
    }
}

impl<P: MemoryPlatform + ?Sized> Iterator for BlockCursor<'_, P> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

impl<P: MemoryPlatform + ?Sized> core::iter::FusedIterator for BlockCursor<'_, P> {}
