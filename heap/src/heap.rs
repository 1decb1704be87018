//! The heap context.
//!
//! A [`Heap`] owns one reserved region, the block allocator carving it, the
//! root set and the collection statistics. Several heaps can live side by
//! side; the process-wide one in [`global`](crate::global) is just a `Heap`
//! behind a lock.
//!
//! Every error a heap reports is fatal. The first error returned by an
//! operation that takes `&mut self` poisons the heap and every later
//! operation fails with [`HeapError::Poisoned`].

use crate::{
    BlockAllocator, GcStats, HeapError, HeapSettings, ObjectPtr, Result,
    RootSet,
};

#[derive(Debug)]
pub struct Heap {
    pub(crate) allocator: BlockAllocator,
    pub(crate) roots: RootSet,
    pub(crate) stats: GcStats,
    poisoned: bool,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Result<Self> {
        let allocator = BlockAllocator::new(&settings)?;
        log::debug!(
            "heap ready: {} bytes, {:?}",
            settings.heap_size,
            settings.fit
        );
        Ok(Self {
            allocator,
            roots: RootSet::new(),
            stats: GcStats::default(),
            poisoned: false,
        })
    }

    /// Allocate a raw block of at least `size` bytes.
    ///
    /// Raw blocks have no layout: they are not traced, a pointer to one
    /// reached during marking is fatal, and the next collection frees them.
    pub fn allocate(&mut self, size: usize) -> Result<ObjectPtr> {
        self.check_poisoned()?;
        self.allocator
            .allocate(size)
            .map_err(|err| self.poison(err))
    }

    pub fn release(&mut self, ptr: Option<ObjectPtr>) -> Result<()> {
        self.check_poisoned()?;
        self.allocator
            .release(ptr)
            .map_err(|err| self.poison(err))
    }

    /// Treat `ptr` as live in the next collection. It must point at an
    /// allocated object when that collection runs.
    pub fn insert_root(&mut self, ptr: ObjectPtr) -> Result<()> {
        self.check_poisoned()?;
        self.roots.push(ptr).map_err(|err| self.poison(err))
    }

    #[inline]
    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    #[inline]
    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Check every allocator invariant.
    pub fn verify(&self) -> Result<()> {
        self.check_poisoned()?;
        self.allocator.verify()
    }

    #[inline]
    pub(crate) fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            Err(HeapError::Poisoned)
        } else {
            Ok(())
        }
    }

    pub(crate) fn poison(&mut self, err: HeapError) -> HeapError {
        if !self.poisoned {
            log::error!("heap poisoned: {err}");
            self.poisoned = true;
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OS_PAGE_SIZE, TypeLayout};

    #[test]
    fn test_invalid_settings_are_rejected() {
        let err = Heap::new(HeapSettings::with_size(100)).unwrap_err();
        assert_eq!(
            err,
            HeapError::InvalidSettings("heap_size must match OS page alignment")
        );
    }

    #[test]
    fn test_fresh_heap_is_empty() {
        let heap = Heap::new(HeapSettings::with_size(OS_PAGE_SIZE)).unwrap();
        let alloc = heap.allocator();
        assert_eq!(alloc.free_addr(), alloc.start_addr());
        assert_eq!(alloc.end_addr() - alloc.start_addr(), OS_PAGE_SIZE);
        assert_eq!(alloc.allocated_len(), 0);
        assert_eq!(alloc.free_len(), 0);
        assert!(heap.roots().is_empty());
        heap.verify().unwrap();
    }

    #[test]
    fn test_errors_poison_the_heap() {
        let mut heap =
            Heap::new(HeapSettings::with_size(OS_PAGE_SIZE)).unwrap();
        let a = heap.allocate(16).unwrap();
        heap.release(Some(a)).unwrap();

        assert_eq!(
            heap.release(Some(a)),
            Err(HeapError::DoubleFree { addr: a.addr() })
        );
        assert!(heap.is_poisoned());
        assert_eq!(heap.allocate(16), Err(HeapError::Poisoned));
        assert_eq!(heap.insert_root(a), Err(HeapError::Poisoned));
        assert_eq!(heap.collect(), Err(HeapError::Poisoned));
        assert_eq!(heap.verify(), Err(HeapError::Poisoned));
    }

    #[test]
    fn test_failed_collection_blocks_queries() {
        let mut heap =
            Heap::new(HeapSettings::with_size(OS_PAGE_SIZE)).unwrap();
        let layout = TypeLayout::pointers(1).unwrap().shared();
        let a = heap.new_object(&layout).unwrap();
        let raw = heap.allocate(16).unwrap();
        heap.write_pointer(a, 0, Some(raw)).unwrap();

        heap.insert_root(a).unwrap();
        assert_eq!(
            heap.collect(),
            Err(HeapError::MissingLayout { addr: raw.addr() })
        );
        assert!(heap.is_poisoned());

        // `a` was marked before tracing failed, the mark must not leak out
        assert_eq!(heap.is_marked(a), Err(HeapError::Poisoned));
        assert_eq!(heap.layout_of(a).unwrap_err(), HeapError::Poisoned);
        assert_eq!(heap.read_pointer(a, 0), Err(HeapError::Poisoned));
        assert_eq!(heap.payload(a).unwrap_err(), HeapError::Poisoned);
        assert_eq!(heap.payload_mut(a).unwrap_err(), HeapError::Poisoned);
        assert_eq!(
            heap.write_pointer(a, 0, None),
            Err(HeapError::Poisoned)
        );
    }

    #[test]
    fn test_out_of_memory_poisons() {
        let mut heap =
            Heap::new(HeapSettings::with_size(OS_PAGE_SIZE)).unwrap();
        assert!(matches!(
            heap.allocate(OS_PAGE_SIZE),
            Err(HeapError::OutOfMemory { .. })
        ));
        assert!(heap.is_poisoned());
    }
}
