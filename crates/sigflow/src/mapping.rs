//! Ring storage with the classic "magic" mirrored mapping.
//!
//! On Linux the capacity is mapped twice back-to-back from one memfd, so
//! `buf[i]` and `buf[i + capacity]` are the same physical byte and any
//! wrapped region reads as a single contiguous slice. Where the double
//! mapping is unavailable the storage falls back to a page-aligned heap
//! allocation and spans truncate at the physical end of the buffer; callers
//! then see the larger of the two contiguous runs and make progress in two
//! bites.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Fallback page size (and allocation alignment) when the OS cannot be
/// asked. Page-aligned storage keeps sample views aligned for every element
/// size as long as advances stay whole-sample.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Returns the OS page size.
#[must_use]
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        use std::sync::OnceLock;
        static PAGE: OnceLock<usize> = OnceLock::new();
        *PAGE.get_or_init(|| {
            // SAFETY: sysconf is always safe to call.
            let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if sz > 0 {
                sz as usize
            } else {
                FALLBACK_PAGE_SIZE
            }
        })
    }
    #[cfg(not(unix))]
    {
        FALLBACK_PAGE_SIZE
    }
}

pub(crate) struct MirroredBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    mirrored: bool,
}

// SAFETY: the mapping is plain memory; synchronization of access is the ring
// buffer's job.
unsafe impl Send for MirroredBuffer {}
unsafe impl Sync for MirroredBuffer {}

impl MirroredBuffer {
    /// Allocates storage for `capacity` bytes. The caller has already
    /// validated that `capacity` is a power of two multiple of the page
    /// size.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        debug_assert_eq!(capacity % page_size(), 0);

        #[cfg(target_os = "linux")]
        if let Some(ptr) = map_mirrored(capacity) {
            return Self {
                ptr,
                capacity,
                mirrored: true,
            };
        }

        Self::new_plain(capacity)
    }

    /// Plain page-aligned heap storage, no wraparound mirroring.
    fn new_plain(capacity: usize) -> Self {
        let layout = plain_layout(capacity);
        // SAFETY: layout has nonzero size (capacity >= one page).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self {
            ptr,
            capacity,
            mirrored: false,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[cfg(test)]
    pub(crate) fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    /// Contiguous span of at most `len` bytes starting at `offset`
    /// (`offset < capacity`, `len <= capacity`). Mirrored storage serves the
    /// full request even across the wrap; plain storage truncates at the
    /// physical end.
    #[inline]
    pub(crate) fn span(&self, offset: usize, len: usize) -> (*mut u8, usize) {
        debug_assert!(offset < self.capacity);
        debug_assert!(len <= self.capacity);
        let avail = if self.mirrored {
            len
        } else {
            len.min(self.capacity - offset)
        };
        // SAFETY: offset < capacity, and the mapping is capacity bytes
        // (2x capacity when mirrored), so the span stays in bounds.
        (unsafe { self.ptr.as_ptr().add(offset) }, avail)
    }
}

impl Drop for MirroredBuffer {
    fn drop(&mut self) {
        if self.mirrored {
            #[cfg(target_os = "linux")]
            // SAFETY: we mapped exactly 2x capacity at this address.
            unsafe {
                libc::munmap(self.ptr.as_ptr().cast(), self.capacity * 2);
            }
        } else {
            // SAFETY: allocated with the same layout in new().
            unsafe {
                alloc::dealloc(self.ptr.as_ptr(), plain_layout(self.capacity));
            }
        }
    }
}

fn plain_layout(capacity: usize) -> Layout {
    // Capacity and page size are both powers of two, so this cannot fail.
    Layout::from_size_align(capacity, page_size()).expect("validated capacity")
}

/// Double-maps one memfd so the buffer wraps transparently. Any failure
/// falls back to plain storage.
#[cfg(target_os = "linux")]
fn map_mirrored(capacity: usize) -> Option<NonNull<u8>> {
    use std::ptr;

    // SAFETY: raw mmap choreography; every partial failure unwinds the
    // resources acquired so far.
    unsafe {
        let fd = libc::memfd_create(b"sigflow-ring\0".as_ptr().cast(), libc::MFD_CLOEXEC);
        if fd < 0 {
            return None;
        }

        if libc::ftruncate(fd, capacity as libc::off_t) != 0 {
            libc::close(fd);
            return None;
        }

        // Reserve the 2x window, then map the fd over both halves.
        let base = libc::mmap(
            ptr::null_mut(),
            capacity * 2,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if base == libc::MAP_FAILED {
            libc::close(fd);
            return None;
        }

        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_SHARED | libc::MAP_FIXED;
        let lo = libc::mmap(base, capacity, prot, flags, fd, 0);
        let hi = libc::mmap(base.cast::<u8>().add(capacity).cast(), capacity, prot, flags, fd, 0);
        libc::close(fd);

        if lo == libc::MAP_FAILED || hi == libc::MAP_FAILED {
            libc::munmap(base, capacity * 2);
            return None;
        }

        NonNull::new(base.cast())
    }
}
