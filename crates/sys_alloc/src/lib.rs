//! Anonymous memory mappings for garbage-collected heap segments.
//!
//! A heap segment needs one thing from the platform: a page-aligned,
//! read-write block of zeroed memory that is returned wholesale when the
//! segment is destroyed. This crate provides exactly that surface on top
//! of `mmap` (Unix) and `VirtualAlloc` (Windows).

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is the system page
/// size. Mapping lengths are rounded up to a page internally, so callers
/// only need this when they care about slack.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// An anonymous memory mapping.
///
/// The region is zero-filled on creation and unmapped when the handle is
/// dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Creates an anonymous read-write mapping of at least `len` bytes.
    ///
    /// The returned pointer is page-aligned. Fails with the underlying OS
    /// error if the address space cannot be reserved, or with
    /// `InvalidInput` when `len` is zero.
    pub fn map_anon(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        // SAFETY: mapping fresh anonymous pages touches no existing
        // memory; the handle owns the region until drop.
        let inner = unsafe { os::MmapInner::map_anon(len)? };
        Ok(Self { inner })
    }

    /// Returns a pointer to the start of the mapping.
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping has zero length.
    ///
    /// Never true for a successfully created mapping.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

// SAFETY: the mapping is plain process memory owned by this handle; the
// handle itself carries no thread affinity.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn page_size_is_power_of_two() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "page size should be power of 2");
    }

    #[test]
    fn granularity_covers_page_size() {
        let ag = allocation_granularity();
        assert!(ag >= page_size());
        assert_eq!(ag & (ag - 1), 0);
    }

    #[test]
    fn map_and_touch() {
        let len = page_size();
        let map = Mmap::map_anon(len).expect("failed to map");

        let ptr = map.ptr();
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % page_size(), 0);

        unsafe {
            assert_eq!(ptr::read_volatile(ptr), 0, "anonymous pages start zeroed");
            ptr::write_volatile(ptr, 42);
            assert_eq!(ptr::read_volatile(ptr), 42);
            ptr::write_volatile(ptr.add(len - 1), 7);
            assert_eq!(ptr::read_volatile(ptr.add(len - 1)), 7);
        }
    }

    #[test]
    fn zero_length_rejected() {
        assert!(Mmap::map_anon(0).is_err());
    }

    #[test]
    fn sub_page_lengths_round_up() {
        let map = Mmap::map_anon(1).expect("failed to map");
        assert!(map.len() >= 1);
        unsafe {
            ptr::write_volatile(map.ptr(), 1);
        }
    }
}
