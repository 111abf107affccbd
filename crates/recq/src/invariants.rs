//! Debug assertion macros for the framing invariants shared by the ring
//! and chain queues.
//!
//! These are only active in debug builds, so there is zero overhead on the
//! release hot path.

/// Assert that a length-slot offset is 4-byte aligned.
///
/// Every frame boundary is a multiple of 4; an unaligned slot offset means
/// a position update went wrong, not that the caller misbehaved.
macro_rules! debug_assert_slot_aligned {
    ($off:expr) => {
        debug_assert!(
            $off % 4 == 0,
            "length slot at unaligned offset {}",
            $off
        )
    };
}

/// Assert that a 4-byte slot at `off` lies inside a region of `cap` bytes.
macro_rules! debug_assert_slot_in_region {
    ($off:expr, $cap:expr) => {
        debug_assert!(
            $off + 4 <= $cap,
            "length slot at offset {} escapes {} byte region",
            $off,
            $cap
        )
    };
}

/// Assert that a frame starting at `pos` with aligned payload `aligned`
/// fits inside a region of `cap` bytes, trailer included.
macro_rules! debug_assert_frame_in_region {
    ($pos:expr, $aligned:expr, $cap:expr) => {
        debug_assert!(
            $pos + 8 + $aligned <= $cap,
            "frame at {} with {} aligned payload bytes escapes {} byte region",
            $pos,
            $aligned,
            $cap
        )
    };
}

pub(crate) use debug_assert_frame_in_region;
pub(crate) use debug_assert_slot_aligned;
pub(crate) use debug_assert_slot_in_region;
