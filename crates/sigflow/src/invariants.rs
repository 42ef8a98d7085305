//! Debug assertion macros for ring and dispatch invariants.
//!
//! Active only in debug builds, zero overhead in release. Used by the ring
//! buffer index protocol and the typed process dispatch shim.

/// Assert that ring occupancy never exceeds capacity.
///
/// `0 <= (head - tail) <= capacity`
macro_rules! debug_assert_bounded_occupancy {
    ($used:expr, $capacity:expr) => {
        debug_assert!(
            $used <= $capacity,
            "ring occupancy {} exceeds capacity {}",
            $used,
            $capacity
        )
    };
}

/// Assert that the consumer never advances past the producer.
macro_rules! debug_assert_tail_not_past_head {
    ($new_tail:expr, $head:expr) => {
        debug_assert!(
            $new_tail <= $head,
            "consuming past the producer: tail {} beyond head {}",
            $new_tail,
            $head
        )
    };
}

/// Assert that a byte sequence number only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a commit or consume advances by whole samples only.
macro_rules! debug_assert_whole_samples {
    ($bytes:expr, $elem_size:expr) => {
        debug_assert!(
            $elem_size == 0 || $bytes % $elem_size == 0,
            "advance of {} bytes splits a {}-byte sample",
            $bytes,
            $elem_size
        )
    };
}

pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_tail_not_past_head;
pub(crate) use debug_assert_whole_samples;
