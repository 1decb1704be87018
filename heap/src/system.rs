use std::ptr::NonNull;

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    #[cfg(target_os = "linux")]
    pub const MAP_NORESERVE: i32 = 0x4000;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_NORESERVE: i32 = 0x40;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap and munmap
    /// # Safety
    /// see valid mmap and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// Reserve `len` bytes of private, anonymous, read/write address space.
    /// No swap is reserved up front, pages are backed on first touch.
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_reserve(len: usize) -> *mut u8 {
        // SAFETY: safe if contract holds
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON | MAP_NORESERVE,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// must be reserved by `anonymous_reserve`
    #[inline]
    pub unsafe fn anonymous_release(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Reserve a fresh, zero-filled range of `size` bytes.
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    // SAFETY: result is checked for null below
    let ptr = unsafe { unix::anonymous_reserve(size) };
    NonNull::new(ptr)
}

pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: ptr must be from a `map_memory` reservation of `size` bytes
    unsafe { unix::anonymous_release(ptr.as_ptr(), size) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_memory_is_zeroed_and_writable() {
        let size = OS_PAGE_SIZE * 4;
        let ptr = map_memory(size).expect("map memory");
        // SAFETY: just mapped `size` bytes
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), size) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[size - 1] = 0xAB;
        assert_eq!(bytes[size - 1], 0xAB);
        unmap_memory(ptr, size);
    }

    #[test]
    fn zero_sized_mapping_is_refused() {
        assert!(map_memory(0).is_none());
    }
}
