use std::sync::Arc;

use crate::{
    BlockFlags, BlockHeader, BlockId, BlockIter, BlockList, FitPolicy,
    HEADER_SIZE, HeapError, HeapSettings, ObjectPtr, Region, Result,
    TypeLayout, WORD_SIZE,
    block::{BLOCK_MAGIC, BlockTag},
};

// ── Allocator ─────────────────────────────────────────────────────────

/// Free-list allocator over one reserved region.
///
/// Blocks are carved from the untouched tail of the region at `free_addr`
/// and recycled through the free list. Blocks are never split or coalesced,
/// a reused block keeps the size it was carved with.
#[derive(Debug)]
pub struct BlockAllocator {
    region: Region,
    /// Offset of the first never-carved byte.
    free_addr: usize,
    headers: Vec<BlockHeader>,
    allocated: BlockList,
    free: BlockList,
    fit: FitPolicy,
}

#[inline]
fn word_align(size: usize) -> Option<usize> {
    let size = size.max(1);
    size.checked_add(WORD_SIZE - 1).map(|s| s & !(WORD_SIZE - 1))
}

impl BlockAllocator {
    pub fn new(settings: &HeapSettings) -> Result<Self> {
        settings.validate().map_err(HeapError::InvalidSettings)?;
        let region = Region::reserve(settings.heap_size)?;
        Ok(Self {
            region,
            free_addr: 0,
            headers: Vec::new(),
            allocated: BlockList::new(),
            free: BlockList::new(),
            fit: settings.fit,
        })
    }

    #[inline]
    pub fn start_addr(&self) -> usize {
        self.region.start_addr()
    }

    #[inline]
    pub fn end_addr(&self) -> usize {
        self.region.end_addr()
    }

    #[inline]
    pub fn free_addr(&self) -> usize {
        self.region.start_addr() + self.free_addr
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Bytes never carved yet.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.region.size() - self.free_addr
    }

    #[inline]
    pub fn fit(&self) -> FitPolicy {
        self.fit
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.headers.len()
    }

    #[inline]
    pub fn allocated_len(&self) -> usize {
        self.allocated.len()
    }

    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_blocks().map(|id| self.header(id).size).sum()
    }

    pub fn allocated_blocks(&self) -> BlockIter<'_> {
        self.allocated.iter(&self.headers)
    }

    pub fn free_blocks(&self) -> BlockIter<'_> {
        self.free.iter(&self.headers)
    }

    #[inline]
    pub(crate) fn allocated_head(&self) -> Option<BlockId> {
        self.allocated.head()
    }

    #[inline]
    pub fn header(&self, id: BlockId) -> &BlockHeader {
        &self.headers[id.index()]
    }

    // ── Allocation ────────────────────────────────────────────────────

    pub fn allocate(&mut self, size: usize) -> Result<ObjectPtr> {
        let id = self.allocate_block(size)?;
        Ok(self.pointer_to(id))
    }

    pub(crate) fn allocate_block(&mut self, size: usize) -> Result<BlockId> {
        let size = word_align(size).ok_or(HeapError::OutOfMemory {
            requested: size,
            available: self.remaining(),
        })?;

        let id = match self.find_free(size) {
            Some(id) => {
                self.free.detach(&mut self.headers, id);
                log::trace!(
                    "reusing block {} ({} bytes) for {size} bytes",
                    id.index(),
                    self.headers[id.index()].size
                );
                id
            }
            None => self.carve(size)?,
        };

        let header = &mut self.headers[id.index()];
        header.flags = BlockFlags::ALLOCATED;
        header.layout = None;
        self.allocated.attach_front(&mut self.headers, id);
        Ok(id)
    }

    fn find_free(&self, size: usize) -> Option<BlockId> {
        let mut fitting = self
            .free
            .iter(&self.headers)
            .filter(|id| self.headers[id.index()].size >= size);
        match self.fit {
            FitPolicy::FirstFit => fitting.next(),
            FitPolicy::BestFit => {
                fitting.min_by_key(|id| self.headers[id.index()].size)
            }
        }
    }

    /// Cut a new block off the untouched tail of the region.
    fn carve(&mut self, size: usize) -> Result<BlockId> {
        let available = self.remaining();
        let out_of_memory = HeapError::OutOfMemory {
            requested: size,
            available: available.saturating_sub(HEADER_SIZE),
        };
        let needed = size.checked_add(HEADER_SIZE).ok_or(out_of_memory.clone())?;
        if needed > available || self.headers.len() >= u32::MAX as usize {
            return Err(out_of_memory);
        }

        let id = BlockId::new(self.headers.len());
        let offset = self.free_addr + HEADER_SIZE;
        // SAFETY: the tag lies inside `[free_addr, free_addr + needed)`,
        // which was checked against the region size above
        unsafe {
            self.region
                .at(self.free_addr)
                .cast::<BlockTag>()
                .write_unaligned(BlockTag::new(id, size));
        }
        self.headers.push(BlockHeader::new(offset, size));
        self.free_addr += needed;

        log::trace!(
            "carved block {} at offset {offset:#x} ({size} bytes)",
            id.index()
        );
        Ok(id)
    }

    // ── Release ───────────────────────────────────────────────────────

    /// Return a block to the free list. `None` is ignored.
    pub fn release(&mut self, ptr: Option<ObjectPtr>) -> Result<()> {
        let Some(ptr) = ptr else {
            return Ok(());
        };
        let id = self.lookup(ptr)?;
        if !self.headers[id.index()].is_allocated() {
            return Err(HeapError::DoubleFree { addr: ptr.addr() });
        }
        self.release_block(id);
        Ok(())
    }

    pub(crate) fn release_block(&mut self, id: BlockId) {
        debug_assert!(self.headers[id.index()].is_allocated());
        self.allocated.detach(&mut self.headers, id);
        let header = &mut self.headers[id.index()];
        header.flags = BlockFlags::empty();
        header.layout = None;
        self.free.attach_front(&mut self.headers, id);
    }

    // ── Lookup & header updates ───────────────────────────────────────

    /// Resolve a payload address to its block.
    pub fn lookup(&self, ptr: ObjectPtr) -> Result<BlockId> {
        let addr = ptr.addr();
        let invalid = || HeapError::InvalidPointer { addr };

        let offset = self.region.offset_of(addr).ok_or_else(invalid)?;
        if offset < HEADER_SIZE
            || offset >= self.free_addr
            || !offset.is_multiple_of(WORD_SIZE)
        {
            return Err(invalid());
        }

        // SAFETY: `offset - HEADER_SIZE` lies inside carved space
        let tag = unsafe {
            self.region
                .at(offset - HEADER_SIZE)
                .cast::<BlockTag>()
                .read_unaligned()
        };
        if tag.magic != BLOCK_MAGIC {
            return Err(invalid());
        }

        let id = BlockId::new(tag.id as usize);
        match self.headers.get(id.index()) {
            Some(header)
                if header.offset == offset
                    && header.size as u64 == tag.size =>
            {
                Ok(id)
            }
            _ => Err(invalid()),
        }
    }

    #[inline]
    pub(crate) fn pointer_to(&self, id: BlockId) -> ObjectPtr {
        let offset = self.headers[id.index()].offset;
        // SAFETY: every header offset lies inside the region
        ObjectPtr::from_raw(unsafe { self.region.start().add(offset) })
    }

    #[inline]
    pub(crate) fn set_marked(&mut self, id: BlockId, marked: bool) {
        self.headers[id.index()]
            .flags
            .set(BlockFlags::MARKED, marked);
    }

    pub(crate) fn attach_layout(
        &mut self,
        id: BlockId,
        layout: Arc<TypeLayout>,
    ) {
        let header = &mut self.headers[id.index()];
        debug_assert!(header.is_allocated());
        debug_assert!(layout.size() <= header.size);
        header.flags.remove(BlockFlags::MARKED);
        header.layout = Some(layout);
    }

    // ── Payload access ────────────────────────────────────────────────

    pub(crate) fn payload(&self, id: BlockId) -> &[u8] {
        let header = &self.headers[id.index()];
        // SAFETY: payload lies inside carved space and is only handed out
        // through `&self`
        unsafe {
            std::slice::from_raw_parts(
                self.region.at(header.offset),
                header.size,
            )
        }
    }

    pub(crate) fn payload_mut(&mut self, id: BlockId) -> &mut [u8] {
        let header = &self.headers[id.index()];
        // SAFETY: payload lies inside carved space and is only handed out
        // through `&mut self`
        unsafe {
            std::slice::from_raw_parts_mut(
                self.region.at(header.offset),
                header.size,
            )
        }
    }

    #[inline]
    pub(crate) fn read_word(&self, id: BlockId, offset: usize) -> usize {
        let header = &self.headers[id.index()];
        debug_assert!(offset + WORD_SIZE <= header.size);
        // SAFETY: in bounds per the layout check, payload and offset are
        // word aligned
        unsafe {
            self.region
                .at(header.offset + offset)
                .cast::<usize>()
                .read()
        }
    }

    #[inline]
    pub(crate) fn write_word(&mut self, id: BlockId, offset: usize, word: usize) {
        let header = &self.headers[id.index()];
        debug_assert!(offset + WORD_SIZE <= header.size);
        // SAFETY: in bounds per the layout check, payload and offset are
        // word aligned
        unsafe {
            self.region
                .at(header.offset + offset)
                .cast::<usize>()
                .write(word)
        }
    }

    // ── Verification ──────────────────────────────────────────────────

    /// Check every list and header invariant. Only meaningful outside a
    /// collection.
    pub fn verify(&self) -> Result<()> {
        let mut seen = vec![false; self.headers.len()];

        let mut walk = |list: &BlockList, allocated: bool| -> Result<usize> {
            let mut prev = None;
            let mut count = 0;
            for id in list.iter(&self.headers) {
                let header = &self.headers[id.index()];
                let addr = self.start_addr() + header.offset;
                let corrupted =
                    |reason| HeapError::Corrupted { reason, addr };

                if std::mem::replace(&mut seen[id.index()], true) {
                    return Err(corrupted("block linked twice"));
                }
                if header.prev != prev {
                    return Err(corrupted("prev link does not match"));
                }
                if header.is_allocated() != allocated {
                    return Err(corrupted("allocated flag disagrees with list"));
                }
                if header.is_marked() {
                    return Err(corrupted("mark left set outside collection"));
                }
                match &header.layout {
                    Some(_) if !allocated => {
                        return Err(corrupted("free block carries a layout"));
                    }
                    Some(layout) if layout.size() > header.size => {
                        return Err(corrupted("layout larger than block"));
                    }
                    _ => {}
                }
                prev = Some(id);
                count += 1;
            }
            Ok(count)
        };

        let allocated = walk(&self.allocated, true)?;
        let free = walk(&self.free, false)?;
        let list_corrupted = |reason| HeapError::Corrupted {
            reason,
            addr: self.start_addr(),
        };
        if allocated != self.allocated.len() || free != self.free.len() {
            return Err(list_corrupted("list length out of sync"));
        }
        if allocated + free != self.headers.len() {
            return Err(list_corrupted("block missing from both lists"));
        }

        for (index, header) in self.headers.iter().enumerate() {
            let addr = self.start_addr() + header.offset;
            if header.offset + header.size > self.free_addr {
                return Err(HeapError::Corrupted {
                    reason: "block extends past carved space",
                    addr,
                });
            }
            let ptr = self.pointer_to(BlockId::new(index));
            if self.lookup(ptr) != Ok(BlockId::new(index)) {
                return Err(HeapError::Corrupted {
                    reason: "block tag overwritten",
                    addr,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::OS_PAGE_SIZE;

    fn allocator(pages: usize, fit: FitPolicy) -> BlockAllocator {
        let settings = HeapSettings {
            heap_size: pages * OS_PAGE_SIZE,
            fit,
        };
        BlockAllocator::new(&settings).expect("reserve heap")
    }

    #[test]
    fn test_carving_advances_free_addr() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let start = alloc.start_addr();

        let a = alloc.allocate(24).unwrap();
        assert_eq!(a.addr(), start + HEADER_SIZE);
        assert_eq!(alloc.free_addr(), start + HEADER_SIZE + 24);

        let b = alloc.allocate(5).unwrap();
        assert_eq!(b.addr(), a.addr() + 24 + HEADER_SIZE);
        assert_eq!(alloc.header(alloc.lookup(b).unwrap()).size(), WORD_SIZE);

        assert_eq!(alloc.allocated_len(), 2);
        assert_eq!(alloc.free_len(), 0);
        alloc.verify().unwrap();
    }

    #[test]
    fn test_zero_sized_request_gets_a_word() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let ptr = alloc.allocate(0).unwrap();
        let id = alloc.lookup(ptr).unwrap();
        assert_eq!(alloc.header(id).size(), WORD_SIZE);
    }

    #[test]
    fn test_release_then_reuse_keeps_free_addr() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let a = alloc.allocate(64).unwrap();
        let free_addr = alloc.free_addr();

        alloc.release(Some(a)).unwrap();
        assert_eq!(alloc.allocated_len(), 0);
        assert_eq!(alloc.free_len(), 1);
        alloc.verify().unwrap();

        let b = alloc.allocate(64).unwrap();
        assert_eq!(a, b);
        assert_eq!(alloc.free_addr(), free_addr);
        alloc.verify().unwrap();
    }

    #[test]
    fn test_release_none_is_noop() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        alloc.release(None).unwrap();
        assert_eq!(alloc.free_len(), 0);
    }

    #[test]
    fn test_double_free_detected() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let a = alloc.allocate(16).unwrap();
        alloc.release(Some(a)).unwrap();
        assert_eq!(
            alloc.release(Some(a)),
            Err(HeapError::DoubleFree { addr: a.addr() })
        );
    }

    #[test]
    fn test_small_free_block_is_skipped() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let small = alloc.allocate(16).unwrap();
        alloc.release(Some(small)).unwrap();

        let big = alloc.allocate(128).unwrap();
        assert_ne!(big, small);
        assert_eq!(alloc.free_len(), 1);
    }

    #[test]
    fn test_first_fit_vs_best_fit() {
        for fit in [FitPolicy::FirstFit, FitPolicy::BestFit] {
            let mut alloc = allocator(1, fit);
            let small = alloc.allocate(32).unwrap();
            let large = alloc.allocate(256).unwrap();
            let _pin = alloc.allocate(8).unwrap();
            // free list order afterwards: large, small
            alloc.release(Some(small)).unwrap();
            alloc.release(Some(large)).unwrap();

            let got = alloc.allocate(24).unwrap();
            match fit {
                FitPolicy::FirstFit => assert_eq!(got, large),
                FitPolicy::BestFit => assert_eq!(got, small),
            }
            alloc.verify().unwrap();
        }
    }

    #[test]
    fn test_exhaustion_reports_out_of_memory() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let big = OS_PAGE_SIZE - HEADER_SIZE;
        alloc.allocate(big).unwrap();
        assert_eq!(alloc.remaining(), 0);
        assert_eq!(
            alloc.allocate(8),
            Err(HeapError::OutOfMemory {
                requested: 8,
                available: 0
            })
        );
        assert!(matches!(
            alloc.allocate(usize::MAX),
            Err(HeapError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_lookup_rejects_foreign_addresses() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let a = alloc.allocate(32).unwrap();

        let inside = ObjectPtr::from_word(a.addr() + WORD_SIZE).unwrap();
        assert_eq!(
            alloc.lookup(inside),
            Err(HeapError::InvalidPointer { addr: inside.addr() })
        );

        let mut outside = 0usize;
        let outside = ObjectPtr::from_raw(NonNull::from(&mut outside).cast());
        assert!(matches!(
            alloc.lookup(outside),
            Err(HeapError::InvalidPointer { .. })
        ));

        let past = ObjectPtr::from_word(alloc.free_addr() + HEADER_SIZE).unwrap();
        assert!(alloc.lookup(past).is_err());
    }

    #[test]
    fn test_payload_words_roundtrip() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let id = alloc.allocate_block(32).unwrap();
        alloc.write_word(id, WORD_SIZE, 0xDEAD_BEEF);
        assert_eq!(alloc.read_word(id, WORD_SIZE), 0xDEAD_BEEF);
        assert_eq!(alloc.payload(id).len(), 32);
        alloc.payload_mut(id).fill(0);
        assert_eq!(alloc.read_word(id, WORD_SIZE), 0);
    }

    #[test]
    fn test_verify_catches_stale_mark() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let id = alloc.allocate_block(16).unwrap();
        alloc.set_marked(id, true);
        assert!(matches!(
            alloc.verify(),
            Err(HeapError::Corrupted {
                reason: "mark left set outside collection",
                ..
            })
        ));
        alloc.set_marked(id, false);
        alloc.verify().unwrap();
    }

    #[test]
    fn test_verify_catches_overwritten_tag() {
        let mut alloc = allocator(1, FitPolicy::FirstFit);
        let a = alloc.allocate_block(16).unwrap();
        let _b = alloc.allocate_block(16).unwrap();
        // scribble over the tag of `b` by overrunning `a`
        // SAFETY: stays inside carved space
        unsafe {
            let at = alloc.region.at(alloc.header(a).offset() + 16);
            at.write_bytes(0xFF, HEADER_SIZE);
        }
        assert!(matches!(
            alloc.verify(),
            Err(HeapError::Corrupted {
                reason: "block tag overwritten",
                ..
            })
        ));
    }

    #[test]
    fn test_many_blocks_keep_lists_consistent() {
        let mut alloc = allocator(16, FitPolicy::FirstFit);
        let mut live = Vec::new();
        for i in 0..200 {
            live.push(alloc.allocate(8 + (i % 7) * 8).unwrap());
            if i % 3 == 0 {
                let victim = live.swap_remove(i % live.len());
                alloc.release(Some(victim)).unwrap();
            }
        }
        alloc.verify().unwrap();
        assert_eq!(alloc.allocated_len(), live.len());
        assert_eq!(alloc.allocated_len() + alloc.free_len(), alloc.block_count());
    }
}
