use crate::error::QueueError;
use crate::frame::{align_up, END_MARK, FRAME_OVERHEAD, LEN_WORD, MAX_PAYLOAD};
use crate::invariants::{
    debug_assert_frame_in_region, debug_assert_slot_aligned, debug_assert_slot_in_region,
};
use crossbeam_utils::CachePadded;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Records are published through the length slots on the backing region, not
// through the position atomics. A slot reading zero means "no record here
// yet"; a slot with the top bit set means "wrap to offset 0"; anything else
// is a live record size.
//
// **Producer (commit path):**
// 1. Payload bytes are plain stores into the reserved range
// 2. The trailer slot behind the frame is stored zero (Relaxed)
// 3. The length slot is stored with Release — publishes payload + trailer
// 4. On a wrap, END_MARK is stored at the pre-wrap tail with Release, after
//    the length store at offset 0, so a consumer that acquires the marker
//    also observes the record behind it
//
// **Consumer (peek/release path):**
// 1. Every length-slot poll is an Acquire load; payload reads follow it
// 2. Released slots are stored zero (Relaxed), then `head` is stored with
//    Release; the producer's Acquire load of `head` orders the consumer's
//    in-place reads and slot zeroing before any reuse of the range
//
// **Ownership split:**
// - `tail` is written only by the producer; the consumer touches it only in
//   `reset`
// - `head` is written only by the consumer; the producer reads it to size
//   free space
// - byte ranges are owned by exactly one side at a time: [head, tail) by the
//   consumer (modulo the wrap marker), the rest by the producer
//
// =============================================================================

const CACHE_LINE: usize = 64;

/// Smallest accepted region: one minimal frame plus the terminal slot.
const MIN_CAPACITY: usize = 16;

/// Backing bytes of the region: allocated (and freed) by the queue, or
/// attached over caller-provided memory that the caller frees.
enum Backing {
    Owned { ptr: NonNull<u8>, layout: Layout },
    External { ptr: NonNull<u8> },
}

impl Backing {
    #[inline]
    fn ptr(&self) -> *mut u8 {
        match self {
            Backing::Owned { ptr, .. } | Backing::External { ptr } => ptr.as_ptr(),
        }
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        if let Backing::Owned { ptr, layout } = self {
            // SAFETY: allocated in `RingQueue::new` with exactly this layout.
            unsafe { dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

/// State shared by the two ring handles.
///
/// `head` and `tail` sit on their own cache lines: each side spins on its
/// own position and polls the slots, and neither invalidates the other's
/// line on the hot path.
struct RingShared {
    /// Next read offset. Written by the consumer, read by the producer.
    head: CachePadded<AtomicU32>,
    /// Next write offset. Written by the producer, read by the consumer
    /// only in [`RingConsumer::reset`].
    tail: CachePadded<AtomicU32>,
    /// Region size in bytes. Read-only after construction.
    capacity: u32,
    backing: Backing,
}

// SAFETY: the region is mutated only through the atomic length slots and the
// reserve/commit and peek/release protocols above, which confine every byte
// range to exactly one side at a time.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.backing.ptr()
    }

    /// Atomic view of the 4-byte length slot at `off`.
    #[inline]
    fn slot(&self, off: u32) -> &AtomicU32 {
        debug_assert_slot_aligned!(off);
        debug_assert_slot_in_region!(off, self.capacity);
        // SAFETY: `off` is 4-byte aligned and in bounds (asserted above), the
        // base pointer is at least 4-byte aligned, and the region lives as
        // long as `self`.
        unsafe { AtomicU32::from_ptr(self.base().add(off as usize).cast()) }
    }
}

/// A fixed-capacity SPSC byte-record ring over one contiguous region.
///
/// Built single-threaded, then [`split`](RingQueue::split) into the
/// producer and consumer handles that move to their respective threads.
pub struct RingQueue {
    shared: RingShared,
}

impl RingQueue {
    /// Creates a ring over `capacity` bytes of zeroed, owned backing.
    ///
    /// # Errors
    ///
    /// [`QueueError::AllocationFailure`] if the region cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a multiple of 4 in
    /// `16..=0x7FFF_FFFF`.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        Self::check_capacity(capacity);
        // SAFETY: capacity is non-zero and far below isize::MAX, and the
        // alignment is a power of two.
        let layout = unsafe { Layout::from_size_align_unchecked(capacity, CACHE_LINE) };
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(QueueError::AllocationFailure { size: capacity });
        };
        Ok(Self {
            shared: RingShared {
                head: CachePadded::new(AtomicU32::new(0)),
                tail: CachePadded::new(AtomicU32::new(0)),
                capacity: capacity as u32,
                backing: Backing::Owned { ptr, layout },
            },
        })
    }

    /// Attaches a ring to `capacity` bytes of caller-provided backing.
    ///
    /// The queue zeroes the length slot at offset 0 and otherwise uses the
    /// memory as-is. External backing is never freed by the queue.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` initialized
    /// bytes for as long as the queue or either handle is alive, must be at
    /// least 4-byte aligned, and must not be accessed by anything else
    /// during that time.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a multiple of 4 in `16..=0x7FFF_FFFF`,
    /// or if `ptr` is not 4-byte aligned.
    pub unsafe fn from_raw(ptr: NonNull<u8>, capacity: usize) -> Self {
        Self::check_capacity(capacity);
        assert!(
            ptr.as_ptr() as usize % 4 == 0,
            "ring backing must be 4-byte aligned"
        );
        let queue = Self {
            shared: RingShared {
                head: CachePadded::new(AtomicU32::new(0)),
                tail: CachePadded::new(AtomicU32::new(0)),
                capacity: capacity as u32,
                backing: Backing::External { ptr },
            },
        };
        // The slot at the write position must read zero before the first
        // reserve.
        queue.shared.slot(0).store(0, Ordering::Relaxed);
        queue
    }

    fn check_capacity(capacity: usize) {
        assert!(
            capacity >= MIN_CAPACITY && capacity <= MAX_PAYLOAD as usize,
            "ring capacity must be in {MIN_CAPACITY}..={MAX_PAYLOAD}"
        );
        assert!(capacity % 4 == 0, "ring capacity must be a multiple of 4");
    }

    /// Returns the region size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Splits the queue into its producer and consumer handles.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let shared = Arc::new(self.shared);
        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

impl fmt::Debug for RingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

/// Producer half of a [`RingQueue`]. There is exactly one; it is `Send`
/// but deliberately not `Clone`.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl fmt::Debug for RingProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingProducer")
            .field("tail", &self.shared.tail.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RingProducer {
    /// Returns the region size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Reserves space for an `n` byte record.
    ///
    /// On success the returned [`RingReservation`] derefs to exactly `n`
    /// writable bytes inside the region. The record becomes visible to the
    /// consumer only on [`commit`](RingReservation::commit); dropping the
    /// reservation abandons it.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotEnoughSpace`] if the record does not fit right now,
    /// if `n` is zero, or if `n` exceeds [`MAX_PAYLOAD`].
    pub fn try_reserve(&mut self, n: usize) -> Result<RingReservation<'_>, QueueError> {
        if n == 0 || n > MAX_PAYLOAD as usize {
            return Err(QueueError::NotEnoughSpace { requested: n });
        }
        let len = n as u32;

        let (start, wrap_from) = {
            let shared = &*self.shared;
            let head = u64::from(shared.head.load(Ordering::Acquire));
            let tail = u64::from(shared.tail.load(Ordering::Relaxed));
            let need = u64::from(len) + u64::from(FRAME_OVERHEAD);
            let last_position = u64::from(shared.capacity - LEN_WORD);

            if head > tail && head > tail + need {
                // fits in the gap [tail, head); the strict comparison keeps
                // one spare byte so a full queue never has head == tail
                (tail as u32, None)
            } else if head <= tail && tail + u64::from(align_up(len)) < last_position {
                // fits between the write position and the end of the region
                (tail as u32, None)
            } else if head <= tail && head > need {
                // fits in front of the reader; move the write position to
                // the front and remember where the wrap marker goes
                shared.tail.store(0, Ordering::Relaxed);
                (0, Some(tail as u32))
            } else {
                return Err(QueueError::NotEnoughSpace { requested: n });
            }
        };

        Ok(RingReservation {
            prod: self,
            start,
            len,
            wrap_from,
        })
    }

    /// Drops in-flight records from the producer's viewpoint: the write
    /// position jumps to the read position.
    ///
    /// Intended for coordination while both threads are quiescent; calling
    /// it while the consumer is mid-record leaves that record's bytes up
    /// for reuse.
    pub fn reset(&mut self) {
        let head = self.shared.head.load(Ordering::Acquire);
        self.shared.tail.store(head, Ordering::Release);
    }

    fn commit_internal(&mut self, start: u32, len: u32, wrap_from: Option<u32>) {
        let shared = &*self.shared;
        let aligned = align_up(len);
        debug_assert_frame_in_region!(start, aligned, shared.capacity);

        // Trailer first: a non-zero length must imply the slot after it
        // already reads zero.
        shared
            .slot(start + LEN_WORD + aligned)
            .store(0, Ordering::Relaxed);
        shared.slot(start).store(len, Ordering::Release);
        shared
            .tail
            .store(start + LEN_WORD + aligned, Ordering::Release);

        if let Some(at) = wrap_from {
            // Stored after the length at offset 0: acquiring the marker
            // implies the wrapped record is visible.
            shared.slot(at).store(END_MARK, Ordering::Release);
        }
    }
}

/// A pending record: reserved, writable, not yet visible to the consumer.
///
/// Derefs to the payload bytes. [`commit`](RingReservation::commit)
/// publishes the record; dropping the reservation instead abandons it and
/// leaves the queue as it was.
pub struct RingReservation<'a> {
    prod: &'a mut RingProducer,
    /// Offset of the frame's length slot.
    start: u32,
    /// Declared payload size.
    len: u32,
    /// Pre-wrap write position when this reservation moved to the front.
    wrap_from: Option<u32>,
}

impl RingReservation<'_> {
    /// Declared payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; zero-length reservations are rejected at reserve.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publishes the record to the consumer.
    pub fn commit(self) {
        let mut this = ManuallyDrop::new(self);
        let (start, len, wrap_from) = (this.start, this.len, this.wrap_from);
        this.prod.commit_internal(start, len, wrap_from);
    }

    #[inline]
    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: reserve proved [start, start + 8 + align_up(len)) lies
        // inside the region.
        unsafe {
            self.prod
                .shared
                .base()
                .add((self.start + LEN_WORD) as usize)
        }
    }
}

impl Deref for RingReservation<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the reserved range is owned by this reservation until
        // commit or drop; the consumer cannot observe it before the length
        // store.
        unsafe { slice::from_raw_parts(self.payload_ptr(), self.len as usize) }
    }
}

impl DerefMut for RingReservation<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`; the producer side is exclusive here.
        unsafe { slice::from_raw_parts_mut(self.payload_ptr(), self.len as usize) }
    }
}

impl Drop for RingReservation<'_> {
    fn drop(&mut self) {
        // An abandoned wrapping reservation must put the write position
        // back where the wrap marker would have gone.
        if let Some(at) = self.wrap_from {
            self.prod.shared.tail.store(at, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for RingReservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingReservation")
            .field("len", &self.len)
            .field("wraps", &self.wrap_from.is_some())
            .finish_non_exhaustive()
    }
}

/// Consumer half of a [`RingQueue`].
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl fmt::Debug for RingConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingConsumer")
            .field("head", &self.shared.head.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RingConsumer {
    /// Returns the region size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Peeks the next committed record without consuming it.
    ///
    /// A wrap marker at the read position moves the read position to
    /// offset 0 before polling again.
    ///
    /// # Errors
    ///
    /// [`QueueError::Empty`] if no record has been committed.
    pub fn try_peek(&mut self) -> Result<RingRecord<'_>, QueueError> {
        let (start, len) = {
            let shared = &*self.shared;
            let mut head = shared.head.load(Ordering::Relaxed);
            let mut len = shared.slot(head).load(Ordering::Acquire);
            if len == END_MARK {
                head = 0;
                shared.head.store(0, Ordering::Release);
                len = shared.slot(0).load(Ordering::Acquire);
            }
            if len == 0 {
                return Err(QueueError::Empty);
            }
            (head, len)
        };
        Ok(RingRecord {
            cons: self,
            start,
            len,
        })
    }

    /// Drops in-flight records from the consumer's viewpoint: the read
    /// position jumps to the write position.
    ///
    /// Intended for coordination while both threads are quiescent.
    pub fn reset(&mut self) {
        let tail = self.shared.tail.load(Ordering::Acquire);
        self.shared.head.store(tail, Ordering::Release);
    }

    fn release_internal(&mut self) {
        let shared = &*self.shared;
        let mut head = shared.head.load(Ordering::Relaxed);
        let mut len = shared.slot(head).load(Ordering::Acquire);
        if len == END_MARK {
            shared.slot(head).store(0, Ordering::Relaxed);
            head = 0;
            shared.head.store(0, Ordering::Release);
            len = shared.slot(0).load(Ordering::Acquire);
        }
        if len != 0 {
            shared.slot(head).store(0, Ordering::Relaxed);
            shared
                .head
                .store(head + LEN_WORD + align_up(len), Ordering::Release);
        }
    }
}

/// A committed record being read in place.
///
/// Derefs to the payload bytes. [`release`](RingRecord::release) returns
/// the bytes to the queue; dropping the guard instead leaves the record at
/// the front for the next peek.
pub struct RingRecord<'a> {
    cons: &'a mut RingConsumer,
    /// Offset of the record's length slot.
    start: u32,
    len: u32,
}

impl RingRecord<'_> {
    /// Payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; empty queues report [`QueueError::Empty`] at peek.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the record's bytes to the queue and advances the read
    /// position past it.
    pub fn release(self) {
        self.cons.release_internal();
    }
}

impl fmt::Debug for RingRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingRecord")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Deref for RingRecord<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the length slot was acquired non-zero, so the payload
        // behind it is committed; the producer cannot reclaim the range
        // before `head` moves past it.
        unsafe {
            slice::from_raw_parts(
                self.cons
                    .shared
                    .base()
                    .add((self.start + LEN_WORD) as usize),
                self.len as usize,
            )
        }
    }
}
