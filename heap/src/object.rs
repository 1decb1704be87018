use std::{fmt, ptr::NonNull, sync::Arc};

use crate::{BlockId, Heap, HeapError, Result, TypeLayout};

/// Address of a block payload on a [`Heap`].
///
/// This is a plain address: the heap never dereferences it directly but
/// resolves it to a block first, so a stale or foreign pointer is reported
/// instead of followed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectPtr(NonNull<u8>);

// SAFETY: only the address is shared, all access goes through the owning heap
unsafe impl Send for ObjectPtr {}
// SAFETY: see above
unsafe impl Sync for ObjectPtr {}

impl ObjectPtr {
    #[inline]
    pub(crate) fn from_raw(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// Rebuild a pointer from a word stored in a pointer field. Zero is
    /// null.
    #[inline]
    pub fn from_word(word: usize) -> Option<Self> {
        NonNull::new(std::ptr::with_exposed_provenance_mut(word)).map(Self)
    }

    /// The word stored into a pointer field for this pointer.
    #[inline]
    pub fn to_word(self) -> usize {
        self.0.as_ptr().expose_provenance()
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }
}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({:#x})", self.addr())
    }
}

impl fmt::Pointer for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

// ── Object layer ──────────────────────────────────────────────────────

impl Heap {
    /// Allocate an object described by `layout`.
    ///
    /// The payload is zeroed, so every pointer field starts out null. This
    /// is the only way a block gets a layout, and with it the only way a
    /// block becomes traceable.
    pub fn new_object(&mut self, layout: &Arc<TypeLayout>) -> Result<ObjectPtr> {
        self.check_poisoned()?;
        let id = self
            .allocator
            .allocate_block(layout.size())
            .map_err(|err| self.poison(err))?;

        self.allocator.attach_layout(id, Arc::clone(layout));
        self.allocator.payload_mut(id).fill(0);

        let ptr = self.allocator.pointer_to(id);
        log::trace!(
            "new {} object at {ptr:?}",
            layout.name().unwrap_or("anonymous")
        );
        Ok(ptr)
    }

    /// Resolve `ptr` to an allocated block that carries a layout.
    fn object_block(&self, ptr: ObjectPtr) -> Result<BlockId> {
        let id = self.allocator.lookup(ptr)?;
        let header = self.allocator.header(id);
        if !header.is_allocated() {
            return Err(HeapError::NotAllocated { addr: ptr.addr() });
        }
        if header.layout().is_none() {
            return Err(HeapError::MissingLayout { addr: ptr.addr() });
        }
        Ok(id)
    }

    fn pointer_field(&self, ptr: ObjectPtr, offset: usize) -> Result<BlockId> {
        let id = self.object_block(ptr)?;
        let is_pointer = self
            .allocator
            .header(id)
            .layout()
            .is_some_and(|layout| layout.is_pointer_field(offset));
        if !is_pointer {
            return Err(HeapError::NotAPointerField {
                addr: ptr.addr(),
                offset,
            });
        }
        Ok(id)
    }

    pub fn layout_of(&self, ptr: ObjectPtr) -> Result<&Arc<TypeLayout>> {
        self.check_poisoned()?;
        let id = self.object_block(ptr)?;
        self.allocator
            .header(id)
            .layout()
            .ok_or(HeapError::MissingLayout { addr: ptr.addr() })
    }

    pub fn read_pointer(
        &self,
        ptr: ObjectPtr,
        offset: usize,
    ) -> Result<Option<ObjectPtr>> {
        self.check_poisoned()?;
        let id = self.pointer_field(ptr, offset)?;
        Ok(ObjectPtr::from_word(self.allocator.read_word(id, offset)))
    }

    pub fn write_pointer(
        &mut self,
        ptr: ObjectPtr,
        offset: usize,
        value: Option<ObjectPtr>,
    ) -> Result<()> {
        self.check_poisoned()?;
        let id = self
            .pointer_field(ptr, offset)
            .map_err(|err| self.poison(err))?;
        self.allocator
            .write_word(id, offset, value.map_or(0, ObjectPtr::to_word));
        Ok(())
    }

    /// The object's bytes, `layout.size()` long.
    pub fn payload(&self, ptr: ObjectPtr) -> Result<&[u8]> {
        self.check_poisoned()?;
        let id = self.object_block(ptr)?;
        let len = self.layout_size(id);
        Ok(&self.allocator.payload(id)[..len])
    }

    /// Mutable view of the object's bytes. Pointer fields written through
    /// this view are traced like any other, so they must hold valid object
    /// addresses or zero.
    pub fn payload_mut(&mut self, ptr: ObjectPtr) -> Result<&mut [u8]> {
        self.check_poisoned()?;
        let id = match self.object_block(ptr) {
            Ok(id) => id,
            Err(err) => return Err(self.poison(err)),
        };
        let len = self.layout_size(id);
        Ok(&mut self.allocator.payload_mut(id)[..len])
    }

    fn layout_size(&self, id: BlockId) -> usize {
        self.allocator
            .header(id)
            .layout()
            .map_or(0, |layout| layout.size())
    }

    /// Whether `ptr` currently names an allocated block.
    pub fn is_allocated(&self, ptr: ObjectPtr) -> bool {
        self.allocator
            .lookup(ptr)
            .is_ok_and(|id| self.allocator.header(id).is_allocated())
    }

    pub fn is_marked(&self, ptr: ObjectPtr) -> Result<bool> {
        self.check_poisoned()?;
        let id = self.allocator.lookup(ptr)?;
        Ok(self.allocator.header(id).is_marked())
    }
}
