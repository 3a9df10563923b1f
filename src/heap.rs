//! Block heap — first-fit allocator over a fixed arena
//!
//! Backs every task stack. The arena is carved into blocks that tile it
//! exactly; each block starts with an 8-byte header and free blocks are
//! threaded on an intrusive doubly-linked list using arena offsets.
//!
//! Header layout (little-endian, offsets from block start):
//!
//! | offset | field | meaning                                   |
//! |--------|-------|-------------------------------------------|
//! | 0      | tag   | `0xDEAD` free, `0xBEEF` used              |
//! | 2      | size  | header + payload, multiple of `ALIGNMENT` |
//! | 4      | next  | next free block offset, `0xFFFF` = nil    |
//! | 6      | prev  | prev free block offset, `0xFFFF` = nil    |
//!
//! Author: Moroya Sakamoto

use log::{debug, warn};
use spin::Mutex;

use crate::config::HEAP_SIZE;
use crate::error::{Result, RtosError};
use crate::sync::critical;

/// Block size granularity (bytes)
pub const ALIGNMENT: usize = 4;

/// Smallest block the heap will create, header included
pub const MIN_BLOCK_SIZE: usize = 16;

/// Size of the per-block header
pub const HEADER_SIZE: usize = 8;

const TAG_FREE: u16 = 0xDEAD;
const TAG_USED: u16 = 0xBEEF;
const NIL: u16 = u16::MAX;

const FIELD_TAG: usize = 0;
const FIELD_SIZE: usize = 2;
const FIELD_NEXT: usize = 4;
const FIELD_PREV: usize = 6;

/// Payload address handed out by the heap (offset into the arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(usize);

impl HeapPtr {
    /// Build a pointer from a raw arena offset
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Arena offset of the payload
    pub const fn offset(self) -> usize {
        self.0
    }
}

/// Block liveness tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Free,
    Used,
}

/// Snapshot of one block, in physical order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Arena offset of the header
    pub offset: usize,
    /// Header + payload bytes
    pub size: usize,
    pub tag: BlockTag,
}

/// Heap occupancy summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub free_bytes: usize,
    pub used_bytes: usize,
    pub free_blocks: usize,
    pub used_blocks: usize,
    /// Largest single free block, header included
    pub largest_free: usize,
}

/// Round `size` up to the block granularity
const fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

struct Arena<const SIZE: usize> {
    memory: [u8; SIZE],
    free_head: u16,
    initialized: bool,
}

impl<const SIZE: usize> Arena<SIZE> {
    fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.memory[at], self.memory[at + 1]])
    }

    fn write_u16(&mut self, at: usize, value: u16) {
        self.memory[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn tag(&self, block: usize) -> u16 {
        self.read_u16(block + FIELD_TAG)
    }

    fn set_tag(&mut self, block: usize, tag: u16) {
        self.write_u16(block + FIELD_TAG, tag);
    }

    fn size(&self, block: usize) -> usize {
        self.read_u16(block + FIELD_SIZE) as usize
    }

    fn set_size(&mut self, block: usize, size: usize) {
        self.write_u16(block + FIELD_SIZE, size as u16);
    }

    fn next(&self, block: usize) -> u16 {
        self.read_u16(block + FIELD_NEXT)
    }

    fn set_next(&mut self, block: usize, next: u16) {
        self.write_u16(block + FIELD_NEXT, next);
    }

    fn prev(&self, block: usize) -> u16 {
        self.read_u16(block + FIELD_PREV)
    }

    fn set_prev(&mut self, block: usize, prev: u16) {
        self.write_u16(block + FIELD_PREV, prev);
    }

    fn reset(&mut self) {
        self.memory.fill(0);
        self.set_tag(0, TAG_FREE);
        self.set_size(0, SIZE);
        self.set_next(0, NIL);
        self.set_prev(0, NIL);
        self.free_head = 0;
        self.initialized = true;
    }

    /// Push a block onto the head of the free list
    fn insert_free(&mut self, block: usize) {
        let head = self.free_head;
        self.set_next(block, head);
        self.set_prev(block, NIL);
        if head != NIL {
            self.set_prev(head as usize, block as u16);
        }
        self.free_head = block as u16;
    }

    /// Unlink a block from the free list
    fn remove_free(&mut self, block: usize) {
        let prev = self.prev(block);
        let next = self.next(block);
        if prev != NIL {
            self.set_next(prev as usize, next);
        } else {
            self.free_head = next;
        }
        if next != NIL {
            self.set_prev(next as usize, prev);
        }
        self.set_next(block, NIL);
        self.set_prev(block, NIL);
    }

    /// First free block (in list order) holding at least `size` bytes
    fn find_first_fit(&self, size: usize) -> Option<usize> {
        let mut cur = self.free_head;
        while cur != NIL {
            let block = cur as usize;
            if self.size(block) >= size {
                return Some(block);
            }
            cur = self.next(block);
        }
        None
    }

    /// Shrink `block` to `size` and free the tail as a new block
    fn split(&mut self, block: usize, size: usize) {
        let remainder = block + size;
        let remainder_size = self.size(block) - size;
        self.set_tag(remainder, TAG_FREE);
        self.set_size(remainder, remainder_size);
        self.set_size(block, size);
        self.insert_free(remainder);
    }

    /// Merge every free block with its free physical successors
    fn coalesce(&mut self) {
        let mut cur = self.free_head;
        while cur != NIL {
            let block = cur as usize;
            loop {
                let neighbour = block + self.size(block);
                if neighbour >= SIZE || self.tag(neighbour) != TAG_FREE {
                    break;
                }
                let merged = self.size(block) + self.size(neighbour);
                self.remove_free(neighbour);
                self.set_size(block, merged);
            }
            cur = self.next(block);
        }
    }

    /// Whether `offset` is the header of some block
    fn is_block_start(&self, offset: usize) -> bool {
        let mut cur = 0;
        while cur < SIZE {
            if cur == offset {
                return true;
            }
            if cur > offset {
                return false;
            }
            let size = self.size(cur);
            if size == 0 {
                return false;
            }
            cur += size;
        }
        false
    }

    fn alloc(&mut self, size: usize) -> Option<HeapPtr> {
        if size > SIZE {
            return None;
        }
        let aligned = align_up(size + HEADER_SIZE).max(MIN_BLOCK_SIZE);
        if aligned > SIZE {
            return None;
        }
        let block = self.find_first_fit(aligned)?;
        self.remove_free(block);
        if self.size(block) >= aligned + MIN_BLOCK_SIZE {
            self.split(block, aligned);
        }
        self.set_tag(block, TAG_USED);
        Some(HeapPtr(block + HEADER_SIZE))
    }

    fn free(&mut self, ptr: HeapPtr) -> Result<()> {
        let block = ptr
            .offset()
            .checked_sub(HEADER_SIZE)
            .ok_or(RtosError::Generic)?;
        if block >= SIZE || !self.is_block_start(block) {
            return Err(RtosError::Generic);
        }
        if self.tag(block) != TAG_USED {
            return Err(RtosError::Generic);
        }
        self.set_tag(block, TAG_FREE);
        self.insert_free(block);
        self.coalesce();
        Ok(())
    }
}

/// First-fit block heap over a `SIZE`-byte arena
///
/// All arena and free-list mutation happens under a spin lock inside a
/// critical section, so the heap may be shared with interrupt handlers.
pub struct Heap<const SIZE: usize = HEAP_SIZE> {
    arena: Mutex<Arena<SIZE>>,
}

impl<const SIZE: usize> Heap<SIZE> {
    const LAYOUT_OK: () = assert!(
        SIZE >= MIN_BLOCK_SIZE && SIZE < NIL as usize && SIZE % ALIGNMENT == 0,
        "heap size must be aligned, at least one block and below 64 KiB"
    );

    /// Create an uninitialized heap
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::LAYOUT_OK;
        Self {
            arena: Mutex::new(Arena {
                memory: [0u8; SIZE],
                free_head: NIL,
                initialized: false,
            }),
        }
    }

    /// Zero the arena and install one free block spanning it
    ///
    /// A second call is a no-op.
    pub fn init(&self) -> Result<()> {
        self.with_arena(|arena| {
            if !arena.initialized {
                arena.reset();
                debug!("heap: initialized {} byte arena", SIZE);
            }
        });
        Ok(())
    }

    /// Has `init` run?
    pub fn is_initialized(&self) -> bool {
        self.with_arena(|arena| arena.initialized)
    }

    /// Allocate `size` payload bytes
    ///
    /// Fails with `NoMemory` for a zero size, an uninitialized heap, or
    /// when no free block is large enough. Failures leave the heap untouched.
    pub fn alloc(&self, size: usize) -> Result<HeapPtr> {
        if size == 0 {
            return Err(RtosError::NoMemory);
        }
        let ptr = self.with_arena(|arena| {
            if !arena.initialized {
                return None;
            }
            arena.alloc(size)
        });
        match ptr {
            Some(ptr) => Ok(ptr),
            None => {
                warn!("heap: allocation of {} bytes failed", size);
                Err(RtosError::NoMemory)
            }
        }
    }

    /// Return a block to the heap
    ///
    /// `None` (a null pointer) or an uninitialized heap yields
    /// `InvalidParameter`; a pointer that does not name a used block
    /// yields `Generic` and leaves the free list untouched.
    pub fn free(&self, ptr: Option<HeapPtr>) -> Result<()> {
        let ptr = ptr.ok_or(RtosError::InvalidParameter)?;
        self.with_arena(|arena| {
            if !arena.initialized {
                return Err(RtosError::InvalidParameter);
            }
            arena.free(ptr)
        })
    }

    /// Walk all blocks in physical (address) order
    ///
    /// `f` runs inside the critical section and must not call back into the heap.
    pub fn visit_blocks(&self, mut f: impl FnMut(BlockInfo)) {
        self.with_arena(|arena| {
            if !arena.initialized {
                return;
            }
            let mut cur = 0;
            while cur < SIZE {
                let size = arena.size(cur);
                if size == 0 {
                    break;
                }
                let tag = if arena.tag(cur) == TAG_USED {
                    BlockTag::Used
                } else {
                    BlockTag::Free
                };
                f(BlockInfo { offset: cur, size, tag });
                cur += size;
            }
        })
    }

    /// Walk the free list in list order, yielding `(offset, size)`
    pub fn visit_free_list(&self, mut f: impl FnMut(usize, usize)) {
        self.with_arena(|arena| {
            let mut cur = arena.free_head;
            while cur != NIL {
                let block = cur as usize;
                f(block, arena.size(block));
                cur = arena.next(block);
            }
        })
    }

    /// Occupancy summary
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();
        self.visit_blocks(|block| match block.tag {
            BlockTag::Free => {
                stats.free_bytes += block.size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(block.size);
            }
            BlockTag::Used => {
                stats.used_bytes += block.size;
                stats.used_blocks += 1;
            }
        });
        stats
    }

    /// Arena size in bytes
    pub const fn capacity(&self) -> usize {
        SIZE
    }

    /// Lock the arena with interrupts masked
    fn with_arena<R>(&self, f: impl FnOnce(&mut Arena<SIZE>) -> R) -> R {
        critical(|| f(&mut self.arena.lock()))
    }
}

impl<const SIZE: usize> Default for Heap<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
