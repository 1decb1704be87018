use crate::{HEADER_SIZE, OS_PAGE_SIZE, WORD_SIZE};

/// 2 GiB of address space.
pub const DEFAULT_HEAP_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// How the free list is searched when a block is requested.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FitPolicy {
    /// Take the first free block that is large enough.
    #[default]
    FirstFit,
    /// Take the smallest free block that is large enough.
    BestFit,
}

/// Configuration for a heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapSettings {
    /// Size of the reserved region in bytes. Must be a multiple of the OS
    /// page size. The region never grows.
    pub heap_size: usize,
    /// Free list search policy.
    pub fit: FitPolicy,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            fit: FitPolicy::FirstFit,
        }
    }
}

impl HeapSettings {
    pub fn with_size(heap_size: usize) -> Self {
        Self {
            heap_size,
            ..Default::default()
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.heap_size == 0 {
            return Err("heap_size must be > 0");
        }
        if !self.heap_size.is_multiple_of(OS_PAGE_SIZE) {
            return Err("heap_size must match OS page alignment");
        }
        if self.heap_size < HEADER_SIZE + WORD_SIZE {
            return Err("heap_size too small for a single block");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = HeapSettings::default();
        assert_eq!(settings.heap_size, DEFAULT_HEAP_SIZE);
        assert_eq!(settings.fit, FitPolicy::FirstFit);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_unaligned_and_empty_sizes() {
        assert!(HeapSettings::with_size(0).validate().is_err());
        assert!(HeapSettings::with_size(OS_PAGE_SIZE + 1).validate().is_err());
        assert!(HeapSettings::with_size(OS_PAGE_SIZE).validate().is_ok());
    }
}
