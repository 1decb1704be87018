use std::{fmt, sync::Arc};

use crate::{HeapError, Result, WORD_SIZE};

/// Describes the shape of one object type: its size and where its pointer
/// fields live.
///
/// Layouts are immutable and shared by every object of the type, usually
/// through an `Arc` handed to [`Heap::new_object`](crate::Heap::new_object).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    name: Option<&'static str>,
    size: usize,
    /// Sorted, unique, word aligned, and each fits inside `size`.
    pointer_offsets: Box<[usize]>,
}

impl TypeLayout {
    pub fn new(size: usize, pointer_offsets: &[usize]) -> Result<Self> {
        let mut offsets = pointer_offsets.to_vec();
        offsets.sort_unstable();
        offsets.dedup();

        for &offset in &offsets {
            if !offset.is_multiple_of(WORD_SIZE) {
                return Err(HeapError::InvalidLayout(
                    "pointer offset is not word aligned",
                ));
            }
            match offset.checked_add(WORD_SIZE) {
                Some(end) if end <= size => {}
                _ => {
                    return Err(HeapError::InvalidLayout(
                        "pointer field extends past object size",
                    ));
                }
            }
        }

        Ok(Self {
            name: None,
            size,
            pointer_offsets: offsets.into_boxed_slice(),
        })
    }

    /// A layout with no pointer fields.
    pub fn leaf(size: usize) -> Self {
        Self {
            name: None,
            size,
            pointer_offsets: Box::default(),
        }
    }

    /// A layout made only of `count` consecutive pointer fields.
    pub fn pointers(count: usize) -> Result<Self> {
        let size = count.checked_mul(WORD_SIZE).ok_or(
            HeapError::InvalidLayout("object size overflows the address space"),
        )?;
        Ok(Self {
            name: None,
            size,
            pointer_offsets: (0..count).map(|i| i * WORD_SIZE).collect(),
        })
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn pointer_offsets(&self) -> &[usize] {
        &self.pointer_offsets
    }

    #[inline]
    pub fn num_ptrs(&self) -> usize {
        self.pointer_offsets.len()
    }

    #[inline]
    pub fn is_pointer_field(&self, offset: usize) -> bool {
        self.pointer_offsets.binary_search(&offset).is_ok()
    }
}

impl fmt::Debug for TypeLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeLayout")
            .field("name", &self.name.unwrap_or("<anonymous>"))
            .field("size", &self.size)
            .field("pointer_offsets", &self.pointer_offsets)
            .finish()
    }
}
