use std::hint;
use std::thread;

/// Wait pacing for a `try_reserve` / `try_peek` poll loop.
///
/// The queues never block and never time out; a caller with nothing else
/// to do decides how to wait between polls and when to stop. `Pacer`
/// handles the first half: it tracks the current miss streak, burning a
/// few PAUSE hints per miss while the streak is short and yielding the
/// thread once it is not. A successful poll ends the streak. Stopping is
/// the caller's own termination flag, not the pacer's business.
///
/// # Example
///
/// ```
/// use recq::{Pacer, RingQueue};
///
/// let (mut tx, _rx) = RingQueue::new(1024).unwrap().split();
/// let mut pacer = Pacer::new();
/// let payload = b"ping";
/// loop {
///     match tx.try_reserve(payload.len()) {
///         Ok(mut slot) => {
///             slot.copy_from_slice(payload);
///             slot.commit();
///             pacer.hit();
///             break;
///         }
///         Err(_) => pacer.miss(),
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct Pacer {
    misses: u32,
}

impl Pacer {
    /// Miss streak length after which a wait yields instead of spinning.
    const YIELD_THRESHOLD: u32 = 16;
    /// PAUSE hints added per miss while still spinning.
    const SPINS_PER_MISS: u32 = 8;

    /// Creates a pacer with no misses on record.
    #[inline]
    pub fn new() -> Self {
        Self { misses: 0 }
    }

    /// Records a failed poll and waits a little, harder as the streak
    /// grows: a short spin ramp first, then a thread yield per miss.
    #[inline]
    pub fn miss(&mut self) {
        self.misses = self.misses.saturating_add(1);
        if self.misses <= Self::YIELD_THRESHOLD {
            for _ in 0..self.misses * Self::SPINS_PER_MISS {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
    }

    /// Records a successful poll, ending the miss streak.
    #[inline]
    pub fn hit(&mut self) {
        self.misses = 0;
    }
}
