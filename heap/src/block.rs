//! Block headers and the index-linked lists that hold them.
//!
//! Headers live in a side table owned by the
//! [`BlockAllocator`](crate::BlockAllocator); inside the region each payload
//! is preceded only by a small [`BlockTag`] that maps the payload address
//! back to its header.

use std::{mem, sync::Arc};

use bitflags::bitflags;

use crate::TypeLayout;

pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Bytes reserved in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockTag>();

pub(crate) const BLOCK_MAGIC: u32 = 0xB10C_6C00;

/// Stable key of a block in the header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// Linked into the allocated list (otherwise the free list).
        const ALLOCATED = 1 << 0;
        /// Proven reachable in the running collection.
        const MARKED = 1 << 1;
    }
}

/// Written into the region right before each payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockTag {
    pub magic: u32,
    pub id: u32,
    pub size: u64,
}

impl BlockTag {
    pub fn new(id: BlockId, size: usize) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            id: id.0,
            size: size as u64,
        }
    }
}

const _: () = assert!(HEADER_SIZE == 16);
const _: () = assert!(HEADER_SIZE % WORD_SIZE == 0);

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub(crate) next: Option<BlockId>,
    pub(crate) prev: Option<BlockId>,
    /// Payload offset from the region start.
    pub(crate) offset: usize,
    /// Usable payload bytes, fixed at creation.
    pub(crate) size: usize,
    pub(crate) flags: BlockFlags,
    pub(crate) layout: Option<Arc<TypeLayout>>,
}

impl BlockHeader {
    pub(crate) fn new(offset: usize, size: usize) -> Self {
        Self {
            next: None,
            prev: None,
            offset,
            size,
            flags: BlockFlags::empty(),
            layout: None,
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.flags.contains(BlockFlags::ALLOCATED)
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags.contains(BlockFlags::MARKED)
    }

    #[inline]
    pub fn layout(&self) -> Option<&Arc<TypeLayout>> {
        self.layout.as_ref()
    }

    #[inline]
    pub fn next(&self) -> Option<BlockId> {
        self.next
    }

    #[inline]
    pub fn prev(&self) -> Option<BlockId> {
        self.prev
    }
}

/// A doubly linked list threaded through the header table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockList {
    head: Option<BlockId>,
    len: usize,
}

impl BlockList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn head(&self) -> Option<BlockId> {
        self.head
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Link an unlinked block in front of the current head.
    pub fn attach_front(&mut self, headers: &mut [BlockHeader], id: BlockId) {
        debug_assert!(headers[id.index()].next.is_none());
        debug_assert!(headers[id.index()].prev.is_none());

        if let Some(old) = self.head {
            headers[old.index()].prev = Some(id);
        }
        let header = &mut headers[id.index()];
        header.next = self.head;
        header.prev = None;
        self.head = Some(id);
        self.len += 1;
    }

    /// Unlink a block of this list, fixing both neighbours and clearing its
    /// own links.
    pub fn detach(&mut self, headers: &mut [BlockHeader], id: BlockId) {
        let (prev, next) = {
            let header = &headers[id.index()];
            (header.prev, header.next)
        };

        match prev {
            Some(prev) => headers[prev.index()].next = next,
            None => {
                debug_assert_eq!(self.head, Some(id), "block not in this list");
                self.head = next;
            }
        }
        if let Some(next) = next {
            headers[next.index()].prev = prev;
        }

        let header = &mut headers[id.index()];
        header.next = None;
        header.prev = None;
        self.len -= 1;
    }

    pub fn iter<'a>(&self, headers: &'a [BlockHeader]) -> BlockIter<'a> {
        BlockIter {
            headers,
            cursor: self.head,
        }
    }
}

pub struct BlockIter<'a> {
    headers: &'a [BlockHeader],
    cursor: Option<BlockId>,
}

impl Iterator for BlockIter<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let id = self.cursor?;
        self.cursor = self.headers[id.index()].next;
        Some(id)
    }
}
