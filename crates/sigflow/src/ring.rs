use crate::backoff::Backoff;
use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::invariants::{
    debug_assert_bounded_occupancy, debug_assert_monotonic, debug_assert_tail_not_past_head,
};
use crate::mapping::{page_size, MirroredBuffer};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// =============================================================================
// INDEX PROTOCOL
// =============================================================================
//
// Byte-granular SPSC ring. `head` counts bytes ever committed by the
// producer, `tail` bytes ever consumed; both are unbounded u64 sequence
// numbers (no ABA, wrap takes centuries) and the buffer index is
// `seq & (capacity - 1)` only at access time.
//
// Producer path: load own `head` Relaxed, check the cached consumer
// position, refresh it with an Acquire load of `tail` only when the cache
// says full. Data writes land in the mirrored window, then `commit_write`
// publishes with a store to `head`.
//
// Consumer path is symmetric on `tail`/cached `head`.
//
// The publishing stores use SeqCst rather than plain Release: they pair with
// the SeqCst waiter registration in `Gate` so a producer deciding "no one is
// parked" and a consumer deciding "nothing is readable" cannot both read
// stale state. View-building loads stay Acquire as usual.
//
// The cached positions live in UnsafeCells with exactly one writer each:
// `cached_tail` is touched only by the producer, `cached_head` only by the
// consumer. One producer thread and one consumer thread per ring is the
// contract the bus layer enforces.
//
// EOS is a sticky SeqCst flag. The consumer observes it only once the ring
// is drained below a whole sample; the producer observes it on its next
// write attempt regardless of space.
// =============================================================================

/// Blocking SPSC byte ring with an end-of-stream flag.
///
/// The storage is the classic mirrored ("magic") mapping where available, so
/// wrapped regions are presented as single contiguous slices.
#[repr(C)]
pub struct RingBuffer {
    // === PRODUCER HOT ===
    /// Bytes committed (written by producer, read by consumer).
    head: CachePadded<AtomicU64>,
    /// Producer's cached view of tail (avoids cross-core reads).
    cached_tail: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Bytes consumed (written by consumer, read by producer).
    tail: CachePadded<AtomicU64>,
    /// Consumer's cached view of head.
    cached_head: CachePadded<UnsafeCell<u64>>,

    // === COLD STATE ===
    eos: AtomicBool,
    not_empty: Gate,
    not_full: Gate,
    capacity: usize,

    // === DATA ===
    buf: MirroredBuffer,
}

// SAFETY: index protocol above; storage is owned and fixed for the lifetime
// of the ring.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Default capacity: 64 KiB, a power of two and a multiple of every
    /// page size in common use.
    pub const DEFAULT_CAPACITY: usize = 1 << 16;

    /// Creates a ring of `capacity` bytes.
    ///
    /// The capacity must be a power of two and a multiple of the OS page
    /// size, or the mirrored mapping cannot exist.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity % page_size() != 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        Ok(Self {
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            eos: AtomicBool::new(false),
            not_empty: Gate::new(),
            not_full: Gate::new(),
            capacity,
            buf: MirroredBuffer::new(capacity),
        })
    }

    /// Creates a ring with [`Self::DEFAULT_CAPACITY`].
    pub fn with_default_capacity() -> Result<Self> {
        Self::new(Self::DEFAULT_CAPACITY)
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    ///
    /// SeqCst so the waiting paths pair correctly with gate registration.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        head.wrapping_sub(tail) as usize
    }

    /// Bytes of free space.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Returns `true` if no bytes are buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if end-of-stream has been signalled.
    #[inline]
    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::SeqCst)
    }

    /// Returns `true` if the stream is closed and fully drained.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.is_eos() && self.is_empty()
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Returns the free region as one contiguous mutable slice. May be
    /// empty. Bytes become visible to the consumer only on
    /// [`Self::commit_write`].
    ///
    /// Producer side only: at most one live write view per ring, advanced
    /// only by its owning thread.
    #[allow(clippy::mut_from_ref)]
    pub fn write_slice(&self) -> &mut [u8] {
        let head = self.head.load(Ordering::Relaxed);

        // Fast path: check the cached consumer position.
        // SAFETY: cached_tail has a single writer, the producer (this path).
        let mut cached_tail = unsafe { *self.cached_tail.get() };
        let mut free = self.capacity - head.wrapping_sub(cached_tail) as usize;

        if free == 0 {
            // Slow path: refresh the cache.
            cached_tail = self.tail.load(Ordering::Acquire);
            // SAFETY: single writer, as above; the Acquire load synchronizes
            // with the consumer's publishing store.
            unsafe { *self.cached_tail.get() = cached_tail };
            free = self.capacity - head.wrapping_sub(cached_tail) as usize;
        }

        let idx = (head as usize) & (self.capacity - 1);
        let (ptr, len) = self.buf.span(idx, free);
        // SAFETY: [head, head + free) is not readable by the consumer until
        // commit_write publishes it; the span stays inside the mapping.
        unsafe { slice::from_raw_parts_mut(ptr, len) }
    }

    /// Publishes `n` freshly written bytes and wakes a parked consumer.
    pub fn commit_write(&self, n: usize) {
        let head = self.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);
        let tail = self.tail.load(Ordering::Relaxed);

        debug_assert_bounded_occupancy!(new_head.wrapping_sub(tail) as usize, self.capacity);
        debug_assert_monotonic!("head", head, new_head);

        self.head.store(new_head, Ordering::SeqCst);
        self.not_empty.notify();
    }

    /// Blocks until at least `min_bytes` are free, or the stream closes.
    ///
    /// A closed stream rejects the write attempt with
    /// [`Error::BrokenStream`] even when space is available: the pipeline
    /// downstream is gone.
    pub fn wait_writable(&self, min_bytes: usize) -> Result<()> {
        debug_assert!(min_bytes <= self.capacity);
        let mut backoff = Backoff::new();
        loop {
            if self.is_eos() {
                return Err(Error::BrokenStream);
            }
            if self.free() >= min_bytes {
                return Ok(());
            }
            if backoff.should_park() {
                self.not_full
                    .wait_while(|| self.free() < min_bytes && !self.is_eos());
            } else {
                backoff.snooze();
            }
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Returns the buffered bytes as one contiguous slice. May be empty.
    ///
    /// Consumer side only: the view is valid until [`Self::consume`]
    /// releases the bytes back to the producer.
    pub fn read_slice(&self) -> &[u8] {
        let tail = self.tail.load(Ordering::Relaxed);

        // Fast path: check the cached producer position.
        // SAFETY: cached_head has a single writer, the consumer (this path).
        let mut cached_head = unsafe { *self.cached_head.get() };
        let mut used = cached_head.wrapping_sub(tail) as usize;

        if used == 0 {
            cached_head = self.head.load(Ordering::Acquire);
            // SAFETY: single writer, as above.
            unsafe { *self.cached_head.get() = cached_head };
            used = cached_head.wrapping_sub(tail) as usize;
        }

        let idx = (tail as usize) & (self.capacity - 1);
        let (ptr, len) = self.buf.span(idx, used);
        // SAFETY: [tail, tail + used) was published by the producer's store
        // to head, which the Acquire load above synchronizes with.
        unsafe { slice::from_raw_parts(ptr, len) }
    }

    /// Releases `n` consumed bytes and wakes a parked producer.
    pub fn consume(&self, n: usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(n as u64);
        let head = self.head.load(Ordering::Relaxed);

        debug_assert_tail_not_past_head!(new_tail, head);
        debug_assert_monotonic!("tail", tail, new_tail);

        self.tail.store(new_tail, Ordering::SeqCst);
        self.not_full.notify();
    }

    /// Blocks until at least `min_bytes` are buffered, or the stream is
    /// closed and drained below `min_bytes` ([`Error::EndOfStream`]).
    ///
    /// Bytes written before [`Self::set_eos`] are always drained first.
    pub fn wait_readable(&self, min_bytes: usize) -> Result<()> {
        debug_assert!(min_bytes <= self.capacity);
        let mut backoff = Backoff::new();
        loop {
            if self.len() >= min_bytes {
                return Ok(());
            }
            if self.is_eos() {
                return Err(Error::EndOfStream);
            }
            if backoff.should_park() {
                self.not_empty
                    .wait_while(|| self.len() < min_bytes && !self.is_eos());
            } else {
                backoff.snooze();
            }
        }
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Marks end-of-stream and wakes both ends. Sticky.
    pub fn set_eos(&self) {
        self.eos.store(true, Ordering::SeqCst);
        self.not_empty.notify();
        self.not_full.notify();
    }
}
