//! Sample element types and their runtime tags.
//!
//! Every element type that can traverse a stream carries a canonical
//! [`TypeTag`]. Tags are compared by string value wherever two
//! independently-derived signatures meet, so aliases of the same primitive
//! unify and user-defined composites can mint their own names.

use std::borrow::Cow;
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use num_complex::{Complex32, Complex64};

/// Canonical runtime name of a sample element type.
///
/// Primitives use the closed built-in table (`"Float32"`, `"Unsigned16"`,
/// `"ComplexFloat64"`, ...). Composites mint their own, e.g.
/// `"RefCounted(PacketPayload)"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    /// Creates a tag from a static name (no allocation).
    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Creates a tag from a computed name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Returns the tag name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An element type that can travel a sample stream.
///
/// Samples move through byte-granular ring buffers, so implementors must be
/// plain values: bitwise-copyable, with no interior references.
///
/// # Safety
///
/// Implementors guarantee that any byte pattern previously written as `Self`
/// through a stream can be reinterpreted back as `Self`, i.e. the type has no
/// validity-restricted padding semantics beyond what `Copy` already implies.
/// All primitive impls in this module satisfy this trivially.
pub unsafe trait Sample: Copy + PartialEq + Send + Sync + 'static {
    /// Canonical runtime tag for this element type.
    fn type_tag() -> TypeTag;

    /// Tolerant equality used by test harnesses. Exact by default;
    /// floating-point types override with an epsilon comparison.
    #[inline]
    fn approx_eq(a: &Self, b: &Self, _epsilon: f64) -> bool {
        a == b
    }
}

macro_rules! impl_primitive_sample {
    ($($ty:ty => $tag:literal),* $(,)?) => {
        $(
            // SAFETY: plain old data, any bit pattern round-trips.
            unsafe impl Sample for $ty {
                #[inline]
                fn type_tag() -> TypeTag {
                    TypeTag::from_static($tag)
                }
            }
        )*
    };
}

impl_primitive_sample! {
    u8  => "Unsigned8",
    u16 => "Unsigned16",
    u32 => "Unsigned32",
    u64 => "Unsigned64",
    i8  => "Signed8",
    i16 => "Signed16",
    i32 => "Signed32",
    i64 => "Signed64",
}

// SAFETY: plain old data.
unsafe impl Sample for f32 {
    #[inline]
    fn type_tag() -> TypeTag {
        TypeTag::from_static("Float32")
    }

    #[inline]
    fn approx_eq(a: &Self, b: &Self, epsilon: f64) -> bool {
        f64::from(a - b).abs() <= epsilon
    }
}

// SAFETY: plain old data.
unsafe impl Sample for f64 {
    #[inline]
    fn type_tag() -> TypeTag {
        TypeTag::from_static("Float64")
    }

    #[inline]
    fn approx_eq(a: &Self, b: &Self, epsilon: f64) -> bool {
        (a - b).abs() <= epsilon
    }
}

// SAFETY: two f32 fields, no padding.
unsafe impl Sample for Complex32 {
    #[inline]
    fn type_tag() -> TypeTag {
        TypeTag::from_static("ComplexFloat32")
    }

    #[inline]
    fn approx_eq(a: &Self, b: &Self, epsilon: f64) -> bool {
        f32::approx_eq(&a.re, &b.re, epsilon) && f32::approx_eq(&a.im, &b.im, epsilon)
    }
}

// SAFETY: two f64 fields, no padding.
unsafe impl Sample for Complex64 {
    #[inline]
    fn type_tag() -> TypeTag {
        TypeTag::from_static("ComplexFloat64")
    }

    #[inline]
    fn approx_eq(a: &Self, b: &Self, epsilon: f64) -> bool {
        f64::approx_eq(&a.re, &b.re, epsilon) && f64::approx_eq(&a.im, &b.im, epsilon)
    }
}

/// A single hard bit, one per byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Bit(pub u8);

impl Bit {
    /// Returns the bit as a bool.
    #[inline]
    #[must_use]
    pub fn get(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Bit {
    #[inline]
    fn from(b: bool) -> Self {
        Self(u8::from(b))
    }
}

// SAFETY: repr(transparent) over u8.
unsafe impl Sample for Bit {
    #[inline]
    fn type_tag() -> TypeTag {
        TypeTag::from_static("Bit")
    }
}

// ---------------------------------------------------------------------
// REFERENCE-COUNTED SAMPLES
// ---------------------------------------------------------------------

struct Shared<T> {
    count: AtomicUsize,
    value: T,
}

/// Reference-counted sample for payloads too costly to copy per hop
/// (detected packets, decoded frames).
///
/// The handle itself is a `Copy` pointer so it can traverse byte-granular
/// rings like any other sample; the count is managed explicitly with
/// [`RefCounted::ref_inc`] and [`RefCounted::unref`]. Each handle copy that
/// outlives the original must be accounted for with `ref_inc` before the
/// copy is made visible to another owner.
pub struct RefCounted<T> {
    inner: NonNull<Shared<T>>,
}

impl<T: Send + Sync + 'static> RefCounted<T> {
    /// Allocates a new payload with a count of one.
    #[must_use]
    pub fn new(value: T) -> Self {
        let shared = Box::new(Shared {
            count: AtomicUsize::new(1),
            value,
        });
        Self {
            // SAFETY: Box::into_raw never returns null.
            inner: unsafe { NonNull::new_unchecked(Box::into_raw(shared)) },
        }
    }

    /// Returns the payload.
    #[inline]
    #[must_use]
    pub fn get(&self) -> &T {
        // SAFETY: the pointer stays valid while the count is nonzero, which
        // the caller upholds by balancing ref_inc/unref.
        unsafe { &self.inner.as_ref().value }
    }

    /// Adds `n` references, one per handle copy about to be handed off.
    #[inline]
    pub fn ref_inc(&self, n: usize) {
        // SAFETY: count is nonzero, so the allocation is live.
        unsafe { self.inner.as_ref() }
            .count
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Drops one reference; frees the payload when the count reaches zero.
    pub fn unref(self) {
        // SAFETY: the caller holds a counted reference.
        let count = unsafe { self.inner.as_ref() }
            .count
            .fetch_sub(1, Ordering::Release);
        debug_assert!(count > 0, "unref on a dead RefCounted handle");
        if count == 1 {
            // Synchronize with all prior decrements before dropping.
            std::sync::atomic::fence(Ordering::Acquire);
            // SAFETY: count hit zero, we are the last owner.
            drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
        }
    }

    /// Current reference count. Racy by nature; for diagnostics and tests.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        // SAFETY: count is nonzero, so the allocation is live.
        unsafe { self.inner.as_ref() }.count.load(Ordering::Relaxed)
    }
}

impl<T> Clone for RefCounted<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RefCounted<T> {}

impl<T> PartialEq for RefCounted<T> {
    /// Handle identity, not payload equality.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefCounted").field(self.get()).finish()
    }
}

// SAFETY: the shared payload is Sync and the count is atomic.
unsafe impl<T: Send + Sync> Send for RefCounted<T> {}
unsafe impl<T: Send + Sync> Sync for RefCounted<T> {}

// SAFETY: the handle is a single pointer; any pointer previously written as
// a handle reads back as the same handle.
unsafe impl<T: Send + Sync + 'static> Sample for RefCounted<T> {
    fn type_tag() -> TypeTag {
        TypeTag::new(format!("RefCounted({})", short_type_name::<T>()))
    }
}

/// `std::any::type_name` with module paths stripped, so the tag reads
/// `RefCounted(PacketPayload)` rather than a full crate path. Aliases resolve
/// to the underlying type before naming, so aliased composites unify too.
fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    let mut out = String::with_capacity(full.len());
    let mut seg = String::new();
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            seg.clear();
        } else if c.is_alphanumeric() || c == '_' {
            seg.push(c);
        } else {
            out.push_str(&seg);
            seg.clear();
            out.push(c);
        }
    }
    out.push_str(&seg);
    out
}

// ---------------------------------------------------------------------
// BYTE VIEW CASTS
// ---------------------------------------------------------------------

/// Reinterprets a byte view as a sample slice, rounding down to whole
/// samples. Partial trailing bytes are never exposed.
#[inline]
#[must_use]
pub fn cast_slice<T: Sample>(bytes: &[u8]) -> &[T] {
    let elem = mem::size_of::<T>();
    let n = bytes.len() / elem;
    debug_assert!(
        bytes.as_ptr().align_offset(mem::align_of::<T>()) == 0,
        "sample view is not aligned for {}",
        T::type_tag()
    );
    // SAFETY: length is rounded down to whole samples, alignment is checked
    // above and guaranteed by page-aligned ring storage plus whole-sample
    // advances, and Sample implementors round-trip through bytes.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<T>(), n) }
}

/// Copies a sample slice into its byte representation.
pub(crate) fn sample_bytes<T: Sample>(samples: &[T]) -> Vec<u8> {
    let len = mem::size_of_val(samples);
    // SAFETY: Sample values round-trip through their byte representation.
    unsafe { std::slice::from_raw_parts(samples.as_ptr().cast::<u8>(), len) }.to_vec()
}

/// Mutable counterpart of [`cast_slice`].
#[inline]
#[must_use]
pub fn cast_slice_mut<T: Sample>(bytes: &mut [u8]) -> &mut [T] {
    let elem = mem::size_of::<T>();
    let n = bytes.len() / elem;
    debug_assert!(
        bytes.as_ptr().align_offset(mem::align_of::<T>()) == 0,
        "sample view is not aligned for {}",
        T::type_tag()
    );
    // SAFETY: as in cast_slice; exclusivity follows from the &mut input.
    unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<T>(), n) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_tags() {
        assert_eq!(u8::type_tag().name(), "Unsigned8");
        assert_eq!(i64::type_tag().name(), "Signed64");
        assert_eq!(f32::type_tag().name(), "Float32");
        assert_eq!(Complex32::type_tag().name(), "ComplexFloat32");
        assert_eq!(Complex64::type_tag().name(), "ComplexFloat64");
        assert_eq!(Bit::type_tag().name(), "Bit");
    }

    #[test]
    fn test_aliases_unify() {
        type Iq = Complex32;
        assert_eq!(Iq::type_tag(), Complex32::type_tag());

        type Byte = u8;
        assert_eq!(Byte::type_tag(), u8::type_tag());
    }

    #[test]
    fn test_refcounted_tag_strips_paths() {
        struct Payload;
        let tag = RefCounted::<Payload>::type_tag();
        assert_eq!(tag.name(), "RefCounted(Payload)");
    }

    #[test]
    fn test_refcounted_lifecycle() {
        use std::sync::atomic::AtomicU32;
        static DROPS: AtomicU32 = AtomicU32::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let rc = RefCounted::new(Tracked);
        let copy = rc;
        rc.ref_inc(1);
        assert_eq!(rc.count(), 2);

        copy.unref();
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
        rc.unref();
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[repr(align(8))]
    struct Aligned([u8; 8]);

    #[test]
    fn test_cast_rounds_down() {
        let mut buf = Aligned([0; 8]);
        cast_slice_mut::<u16>(&mut buf.0)[..3].copy_from_slice(&[1, 2, 3]);
        // 5 bytes hold two whole u16 samples; the partial third is hidden.
        let view: &[u16] = cast_slice(&buf.0[..5]);
        assert_eq!(view, &[1, 2]);
    }

    #[test]
    fn test_cast_mut_roundtrip() {
        let mut buf = Aligned([0; 8]);
        let words: &mut [u32] = cast_slice_mut(&mut buf.0);
        words[0] = 0xdead_beef;
        words[1] = 42;
        let back: &[u32] = cast_slice(&buf.0);
        assert_eq!(back, &[0xdead_beef, 42]);
    }

    #[test]
    fn test_bit_conversions() {
        assert!(Bit::from(true).get());
        assert!(!Bit::from(false).get());
    }
}
