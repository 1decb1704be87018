use std::ptr::NonNull;

use crate::{HeapError, Result, system};

/// One contiguous reserved address range backing a whole heap.
///
/// The range is fixed for the lifetime of the region and returned to the
/// OS when the region is dropped.
#[derive(Debug)]
pub struct Region {
    start: NonNull<u8>,
    size: usize,
}

// SAFETY: the region is exclusively owned, access goes through `&mut`
unsafe impl Send for Region {}

impl Region {
    pub fn reserve(size: usize) -> Result<Self> {
        let start =
            system::map_memory(size).ok_or(HeapError::ReserveFailed { size })?;
        log::info!(
            "reserved heap region {:#x}..{:#x} ({size} bytes)",
            start.as_ptr() as usize,
            start.as_ptr() as usize + size
        );
        Ok(Self { start, size })
    }

    #[inline]
    pub fn start(&self) -> NonNull<u8> {
        self.start
    }

    #[inline]
    pub fn start_addr(&self) -> usize {
        self.start.as_ptr() as usize
    }

    #[inline]
    pub fn end_addr(&self) -> usize {
        self.start_addr() + self.size
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offset of `addr` from the region start, if it lies inside.
    #[inline]
    pub fn offset_of(&self, addr: usize) -> Option<usize> {
        if addr >= self.start_addr() && addr < self.end_addr() {
            Some(addr - self.start_addr())
        } else {
            None
        }
    }

    /// Pointer to `offset` bytes past the start.
    ///
    /// # Safety
    /// `offset` must be less than or equal to the region size.
    #[inline]
    pub unsafe fn at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.size);
        // SAFETY: in bounds by contract
        unsafe { self.start.as_ptr().add(offset) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        log::debug!("releasing heap region at {:#x}", self.start_addr());
        system::unmap_memory(self.start, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OS_PAGE_SIZE;

    #[test]
    fn reserve_reports_bounds() {
        let region = Region::reserve(OS_PAGE_SIZE * 2).expect("reserve");
        assert_eq!(region.size(), OS_PAGE_SIZE * 2);
        assert_eq!(region.end_addr() - region.start_addr(), OS_PAGE_SIZE * 2);
        assert!(region.start_addr().is_multiple_of(OS_PAGE_SIZE));
    }

    #[test]
    fn offset_of_is_half_open() {
        let region = Region::reserve(OS_PAGE_SIZE).expect("reserve");
        let start = region.start_addr();
        assert_eq!(region.offset_of(start), Some(0));
        assert_eq!(region.offset_of(start + 16), Some(16));
        assert_eq!(region.offset_of(region.end_addr()), None);
        assert_eq!(region.offset_of(start.wrapping_sub(8)), None);
    }

    #[test]
    fn zero_sized_reservation_fails() {
        assert_eq!(
            Region::reserve(0).unwrap_err(),
            HeapError::ReserveFailed { size: 0 }
        );
    }
}
