use crate::{HeapError, ObjectPtr, Result};

/// Explicit root stack.
///
/// Callers push every pointer that must survive the next collection; the
/// collection then drains the stack completely, reusing it as its marking
/// worklist. Holding a pointer here does not own it.
#[derive(Debug, Default)]
pub struct RootSet {
    stack: Vec<ObjectPtr>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ptr: ObjectPtr) -> Result<()> {
        self.stack
            .try_reserve(1)
            .map_err(|_| HeapError::RootSetExhausted {
                len: self.stack.len(),
            })?;
        self.stack.push(ptr);
        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> Option<ObjectPtr> {
        self.stack.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Roots from top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = ObjectPtr> + '_ {
        self.stack.iter().rev().copied()
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;

    fn ptr(slot: &mut u64) -> ObjectPtr {
        ObjectPtr::from_raw(NonNull::from(slot).cast())
    }

    #[test]
    fn test_root_set_is_lifo() {
        let mut a = 0u64;
        let mut b = 0u64;
        let (a, b) = (ptr(&mut a), ptr(&mut b));

        let mut roots = RootSet::new();
        assert!(roots.is_empty());
        assert_eq!(roots.pop(), None);

        roots.push(a).unwrap();
        roots.push(b).unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots.iter().collect::<Vec<_>>(), vec![b, a]);

        assert_eq!(roots.pop(), Some(b));
        assert_eq!(roots.pop(), Some(a));
        assert_eq!(roots.pop(), None);
        assert!(roots.is_empty());
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut a = 0u64;
        let a = ptr(&mut a);
        let mut roots = RootSet::new();
        roots.push(a).unwrap();
        roots.push(a).unwrap();
        assert_eq!(roots.len(), 2);
    }
}
