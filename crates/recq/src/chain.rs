use crate::error::QueueError;
use crate::frame::{align_up, END_MARK, FRAME_OVERHEAD, LEN_WORD, MAX_PAYLOAD};
use crate::invariants::{
    debug_assert_frame_in_region, debug_assert_slot_aligned, debug_assert_slot_in_region,
};
use crossbeam_utils::CachePadded;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

// The chain publishes records exactly like the ring: the trailer slot is
// zeroed, then the length slot is stored with Release, and the consumer
// Acquire-polls the slots. What differs is the wrap target. An END_MARK in
// a length slot sends the consumer to offset 0 of the *next block* in the
// chain, cyclically, instead of offset 0 of the same region. Each block
// carries its own consumer offset; the producer reads the consumer's hot
// block index and that block's offset to size writes against it, and never
// skips past the block the consumer is reading.

const CACHE_LINE: usize = 64;

/// Accounting size of the per-block header: link word, payload capacity
/// and consumer position. Block allocations include it; the payload area
/// is what remains.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Smallest payload area a block may carry.
const MIN_BLOCK_PAYLOAD: usize = 16;

/// Backing bytes of one block.
enum BlockBacking {
    Owned {
        ptr: NonNull<u8>,
        layout: Layout,
    },
    External {
        ptr: NonNull<u8>,
        size: usize,
        dealloc: Option<unsafe fn(NonNull<u8>, usize)>,
    },
}

impl BlockBacking {
    #[inline]
    fn ptr(&self) -> *mut u8 {
        match self {
            BlockBacking::Owned { ptr, .. } | BlockBacking::External { ptr, .. } => ptr.as_ptr(),
        }
    }
}

impl Drop for BlockBacking {
    fn drop(&mut self) {
        match self {
            BlockBacking::Owned { ptr, layout } => {
                // SAFETY: allocated in `ChainQueue::add_block` with exactly
                // this layout.
                unsafe { dealloc(ptr.as_ptr(), *layout) };
            }
            BlockBacking::External {
                ptr,
                size,
                dealloc: Some(free),
            } => {
                // SAFETY: the caller registered this deallocator for this
                // allocation in `add_block_raw`.
                unsafe { free(*ptr, *size) };
            }
            BlockBacking::External { dealloc: None, .. } => {}
        }
    }
}

/// One block of the chain: a contiguous payload area plus the consumer's
/// read offset within it.
struct Block {
    /// Bytes available for frames. Read-only after construction.
    cap: u32,
    /// Consumer's read offset in this block. Written by the consumer, read
    /// by the producer when sizing a write against the consumer's block.
    cons_pos: CachePadded<AtomicU32>,
    backing: BlockBacking,
}

impl Block {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.backing.ptr()
    }

    /// Atomic view of the 4-byte length slot at `off`.
    #[inline]
    fn slot(&self, off: u32) -> &AtomicU32 {
        debug_assert_slot_aligned!(off);
        debug_assert_slot_in_region!(off, self.cap);
        // SAFETY: `off` is 4-byte aligned and in bounds (asserted above),
        // the base pointer is at least 4-byte aligned, and the block lives
        // as long as `self`.
        unsafe { AtomicU32::from_ptr(self.base().add(off as usize).cast()) }
    }
}

/// State shared by the two chain handles. The block list is frozen at
/// [`ChainQueue::split`] and traversed cyclically by index.
struct ChainShared {
    /// Index of the consumer's hot block. Written by the consumer, read by
    /// the producer.
    cons_hot: CachePadded<AtomicUsize>,
    blocks: Box<[Block]>,
}

// SAFETY: block bytes are mutated only through the atomic length slots and
// the reserve/commit and peek/release protocols, which confine every byte
// range to exactly one side at a time.
unsafe impl Send for ChainShared {}
unsafe impl Sync for ChainShared {}

impl ChainShared {
    #[inline]
    fn next(&self, i: usize) -> usize {
        (i + 1) % self.blocks.len()
    }
}

/// An SPSC byte-record queue over an ordered, cyclically traversed chain
/// of blocks.
///
/// Starts empty; capacity is grown with [`add_block`](ChainQueue::add_block)
/// during single-threaded setup, then [`split`](ChainQueue::split) freezes
/// the chain and hands out the two thread handles. Blocks are never removed
/// once added.
pub struct ChainQueue {
    blocks: Vec<Block>,
}

impl ChainQueue {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Appends a block of `size` bytes (header included) with zeroed,
    /// owned backing.
    ///
    /// The payload area holds `size` minus the header, rounded down to a
    /// 4-byte multiple.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidBlockSize`] if `size` does not leave room for
    /// a minimal record behind the header;
    /// [`QueueError::AllocationFailure`] if the backing cannot be
    /// allocated.
    ///
    /// # Panics
    ///
    /// Panics if the payload area would exceed `0x7FFF_FFFF` bytes.
    pub fn add_block(&mut self, size: usize) -> Result<(), QueueError> {
        let payload = Self::payload_size(size)?;
        // SAFETY: payload is non-zero and far below isize::MAX, and the
        // alignment is a power of two.
        let layout = unsafe { Layout::from_size_align_unchecked(payload, CACHE_LINE) };
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(QueueError::AllocationFailure { size: payload });
        };
        self.blocks.push(Block {
            cap: payload as u32,
            cons_pos: CachePadded::new(AtomicU32::new(0)),
            backing: BlockBacking::Owned { ptr, layout },
        });
        Ok(())
    }

    /// Appends a block over `size` bytes of caller-provided backing.
    ///
    /// The first `size − BLOCK_HEADER_SIZE` bytes at `ptr` (rounded down
    /// to a 4-byte multiple) become the payload area and are zeroed. When
    /// the chain is dropped the allocation is handed to `dealloc` if one
    /// is given, and left untouched otherwise.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidBlockSize`] if `size` does not leave room for
    /// a minimal record behind the header.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes until the
    /// chain and both handles are dropped, must be at least 4-byte
    /// aligned, and must not be accessed by anything else during that
    /// time. If `dealloc` is given it must be sound to call with exactly
    /// `(ptr, size)`.
    ///
    /// # Panics
    ///
    /// Panics if the payload area would exceed `0x7FFF_FFFF` bytes, or if
    /// `ptr` is not 4-byte aligned.
    pub unsafe fn add_block_raw(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        dealloc: Option<unsafe fn(NonNull<u8>, usize)>,
    ) -> Result<(), QueueError> {
        let payload = Self::payload_size(size)?;
        assert!(
            ptr.as_ptr() as usize % 4 == 0,
            "block backing must be 4-byte aligned"
        );
        // The payload area starts zeroed, like an owned block.
        unsafe { ptr.as_ptr().write_bytes(0, payload) };
        self.blocks.push(Block {
            cap: payload as u32,
            cons_pos: CachePadded::new(AtomicU32::new(0)),
            backing: BlockBacking::External { ptr, size, dealloc },
        });
        Ok(())
    }

    fn payload_size(size: usize) -> Result<usize, QueueError> {
        if size <= BLOCK_HEADER_SIZE + MIN_BLOCK_PAYLOAD {
            return Err(QueueError::InvalidBlockSize {
                size,
                min: BLOCK_HEADER_SIZE + MIN_BLOCK_PAYLOAD + 1,
            });
        }
        let payload = (size - BLOCK_HEADER_SIZE) & !3;
        assert!(
            payload <= MAX_PAYLOAD as usize,
            "block payload must not exceed {MAX_PAYLOAD}"
        );
        Ok(payload)
    }

    /// True once at least one block has been added.
    #[inline]
    pub fn has_block(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Total payload bytes across all blocks.
    pub fn capacity(&self) -> usize {
        self.blocks.iter().map(|b| b.cap as usize).sum()
    }

    /// Freezes the chain and splits it into producer and consumer handles,
    /// both starting at the head of the block list.
    ///
    /// # Panics
    ///
    /// Panics if no block has been added.
    pub fn split(self) -> (ChainProducer, ChainConsumer) {
        assert!(self.has_block(), "chain needs at least one block");
        let shared = Arc::new(ChainShared {
            cons_hot: CachePadded::new(AtomicUsize::new(0)),
            blocks: self.blocks.into_boxed_slice(),
        });
        (
            ChainProducer {
                shared: Arc::clone(&shared),
                hot: 0,
                pos: 0,
            },
            ChainConsumer { shared },
        )
    }
}

impl Default for ChainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChainQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainQueue")
            .field("blocks", &self.blocks.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Producer half of a [`ChainQueue`]. Carries the producer's hot block and
/// write offset; the consumer never reads either.
pub struct ChainProducer {
    shared: Arc<ChainShared>,
    /// Producer's hot block index.
    hot: usize,
    /// Write offset in the hot block.
    pos: u32,
}

impl ChainProducer {
    /// Total payload bytes across all blocks.
    pub fn capacity(&self) -> usize {
        self.shared.blocks.iter().map(|b| b.cap as usize).sum()
    }

    /// Reserves space for an `n` byte record, moving to the next block in
    /// the chain if the hot block cannot take the frame.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotEnoughSpace`] if no block can take the record
    /// right now, if `n` is zero, or if `n` exceeds [`MAX_PAYLOAD`].
    pub fn try_reserve(&mut self, n: usize) -> Result<ChainReservation<'_>, QueueError> {
        if n == 0 || n > MAX_PAYLOAD as usize {
            return Err(QueueError::NotEnoughSpace { requested: n });
        }
        let len = n as u32;

        let (block, at, wrap_from) = {
            let shared = &*self.shared;
            let cons_block = shared.cons_hot.load(Ordering::Acquire);
            let cons_pos = shared.blocks[cons_block].cons_pos.load(Ordering::Acquire);
            let pos = self.pos;
            let need = u64::from(len) + u64::from(FRAME_OVERHEAD);
            let aligned_need = u64::from(align_up(len)) + u64::from(FRAME_OVERHEAD);

            if cons_block == self.hot && cons_pos > pos {
                // The consumer is ahead of the write offset in this very
                // block; only the gap up to it is usable.
                if u64::from(cons_pos) >= u64::from(pos) + need {
                    (self.hot, pos, None)
                } else {
                    return Err(QueueError::NotEnoughSpace { requested: n });
                }
            } else if u64::from(shared.blocks[self.hot].cap) >= u64::from(pos) + aligned_need {
                // Fits between the write offset and the end of the block.
                (self.hot, pos, None)
            } else {
                let next = shared.next(self.hot);
                if next == cons_block {
                    // The next block is the consumer's; only the space it
                    // has already released at the front is usable.
                    if need <= u64::from(cons_pos) {
                        (next, 0, Some(pos))
                    } else {
                        return Err(QueueError::NotEnoughSpace { requested: n });
                    }
                } else if u64::from(shared.blocks[next].cap) >= aligned_need {
                    (next, 0, Some(pos))
                } else {
                    return Err(QueueError::NotEnoughSpace { requested: n });
                }
            }
        };

        Ok(ChainReservation {
            prod: self,
            block,
            at,
            len,
            wrap_from,
        })
    }

    /// Drops in-flight records from the producer's viewpoint: the write
    /// position jumps to the consumer's position.
    ///
    /// Intended for coordination while both threads are quiescent,
    /// typically after the consumer has drained.
    pub fn reset(&mut self) {
        let hot = self.shared.cons_hot.load(Ordering::Acquire);
        self.hot = hot;
        self.pos = self.shared.blocks[hot].cons_pos.load(Ordering::Acquire);
    }

    fn commit_internal(&mut self, len: u32, wrap_from: Option<u32>) {
        let aligned = align_up(len);
        let mut marked = None;

        if let Some(snapshot) = wrap_from {
            // The marker sends the consumer to the next block; it is
            // stored again after the record is published, so the old slot
            // reads as the marker whenever the consumer polls it.
            let old = self.hot;
            self.shared.blocks[old]
                .slot(snapshot)
                .store(END_MARK, Ordering::Release);
            self.hot = self.shared.next(old);
            self.pos = 0;
            marked = Some((old, snapshot));
        }

        let pos = self.pos;
        {
            let block = &self.shared.blocks[self.hot];
            debug_assert_frame_in_region!(pos, aligned, block.cap);
            block.slot(pos + LEN_WORD + aligned).store(0, Ordering::Relaxed);
            block.slot(pos).store(len, Ordering::Release);
        }
        self.pos = pos + LEN_WORD + aligned;

        if let Some((old, snapshot)) = marked {
            self.shared.blocks[old]
                .slot(snapshot)
                .store(END_MARK, Ordering::Release);
        }
    }
}

impl fmt::Debug for ChainProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainProducer")
            .field("hot", &self.hot)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

/// A pending chain record: reserved, writable, not yet visible.
///
/// Derefs to the payload bytes; [`commit`](ChainReservation::commit)
/// publishes it, dropping abandons it.
pub struct ChainReservation<'a> {
    prod: &'a mut ChainProducer,
    /// Index of the block the frame lands in.
    block: usize,
    /// Offset of the frame's length slot within that block.
    at: u32,
    len: u32,
    /// Write offset the marker goes to when this reservation switched
    /// blocks.
    wrap_from: Option<u32>,
}

impl ChainReservation<'_> {
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
        let ChainReservation {
            prod,
            len,
            wrap_from,
            ..
        } = self;
        prod.commit_internal(len, wrap_from);
    }

    #[inline]
    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: reserve proved the frame fits this block.
        unsafe {
            self.prod.shared.blocks[self.block]
                .base()
                .add((self.at + LEN_WORD) as usize)
        }
    }
}

impl Deref for ChainReservation<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the reserved range is owned by this reservation until
        // commit or drop.
        unsafe { slice::from_raw_parts(self.payload_ptr(), self.len as usize) }
    }
}

impl DerefMut for ChainReservation<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`; the producer side is exclusive here.
        unsafe { slice::from_raw_parts_mut(self.payload_ptr(), self.len as usize) }
    }
}

impl fmt::Debug for ChainReservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainReservation")
            .field("len", &self.len)
            .field("switches", &self.wrap_from.is_some())
            .finish_non_exhaustive()
    }
}

/// Consumer half of a [`ChainQueue`].
pub struct ChainConsumer {
    shared: Arc<ChainShared>,
}

impl fmt::Debug for ChainConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConsumer")
            .field("hot", &self.shared.cons_hot.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChainConsumer {
    /// Total payload bytes across all blocks.
    pub fn capacity(&self) -> usize {
        self.shared.blocks.iter().map(|b| b.cap as usize).sum()
    }

    /// Peeks the next committed record without consuming it.
    ///
    /// A wrap marker at the read position looks through to offset 0 of
    /// the next block but moves nothing; the consumer's position only
    /// advances on [`release`](ChainRecord::release).
    ///
    /// # Errors
    ///
    /// [`QueueError::Empty`] if no record has been committed.
    pub fn try_peek(&mut self) -> Result<ChainRecord<'_>, QueueError> {
        let (block, at, len) = {
            let shared = &*self.shared;
            let hot = shared.cons_hot.load(Ordering::Relaxed);
            let pos = shared.blocks[hot].cons_pos.load(Ordering::Relaxed);
            let len = shared.blocks[hot].slot(pos).load(Ordering::Acquire);

            if len == END_MARK {
                let next = shared.next(hot);
                let len = shared.blocks[next].slot(0).load(Ordering::Acquire);
                if len == 0 {
                    return Err(QueueError::Empty);
                }
                (next, 0, len)
            } else if len == 0 {
                return Err(QueueError::Empty);
            } else {
                (hot, pos, len)
            }
        };
        Ok(ChainRecord {
            cons: self,
            block,
            at,
            len,
        })
    }

    /// Drops committed records from the consumer's viewpoint by draining
    /// them.
    ///
    /// Intended for coordination while the producer is quiescent.
    pub fn reset(&mut self) {
        while let Ok(record) = self.try_peek() {
            record.release();
        }
    }

    fn release_internal(&mut self) {
        let shared = &*self.shared;
        let mut hot = shared.cons_hot.load(Ordering::Relaxed);
        let mut block = &shared.blocks[hot];
        let mut pos = block.cons_pos.load(Ordering::Relaxed);
        let mut len = block.slot(pos).load(Ordering::Acquire);

        if len == END_MARK {
            block.slot(pos).store(0, Ordering::Relaxed);
            hot = shared.next(hot);
            block = &shared.blocks[hot];
            block.cons_pos.store(0, Ordering::Relaxed);
            shared.cons_hot.store(hot, Ordering::Release);
            pos = 0;
            len = block.slot(0).load(Ordering::Acquire);
        }

        if len != 0 {
            block.slot(pos).store(0, Ordering::Relaxed);
            block
                .cons_pos
                .store(pos + LEN_WORD + align_up(len), Ordering::Release);
        }
    }
}

/// A committed chain record being read in place.
///
/// Derefs to the payload bytes. [`release`](ChainRecord::release) returns
/// the bytes to the queue; dropping the guard leaves the record at the
/// front.
pub struct ChainRecord<'a> {
    cons: &'a mut ChainConsumer,
    block: usize,
    /// Offset of the record's length slot within its block.
    at: u32,
    len: u32,
}

impl ChainRecord<'_> {
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

    /// Returns the record's bytes to the queue, following a pending block
    /// switch first if the read position sits on a wrap marker.
    pub fn release(self) {
        self.cons.release_internal();
    }
}

impl fmt::Debug for ChainRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRecord")
            .field("block", &self.block)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Deref for ChainRecord<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the length slot was acquired non-zero, so the payload
        // behind it is committed; the producer cannot reclaim the range
        // before the consumer's position moves past it.
        unsafe {
            slice::from_raw_parts(
                self.cons.shared.blocks[self.block]
                    .base()
                    .add((self.at + LEN_WORD) as usize),
                self.len as usize,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(blocks: usize, block_size: usize) -> (ChainProducer, ChainConsumer) {
        let mut queue = ChainQueue::new();
        for _ in 0..blocks {
            queue.add_block(block_size).unwrap();
        }
        queue.split()
    }

    fn commit_filled(tx: &mut ChainProducer, n: usize, byte: u8) {
        let mut r = tx.try_reserve(n).unwrap();
        r.iter_mut().for_each(|b| *b = byte);
        r.commit();
    }

    #[test]
    fn block_sizes_are_validated() {
        let mut queue = ChainQueue::new();
        assert_eq!(
            queue.add_block(32).unwrap_err(),
            QueueError::InvalidBlockSize { size: 32, min: 33 }
        );
        queue.add_block(33).unwrap();
        assert_eq!(queue.capacity(), 16);
        assert!(queue.has_block());
    }

    #[test]
    #[should_panic(expected = "at least one block")]
    fn splitting_an_empty_chain_panics() {
        let _ = ChainQueue::new().split();
    }

    #[test]
    fn zero_and_oversize_reserves_are_rejected() {
        let (mut tx, _rx) = chain_of(2, 80);
        assert_eq!(
            tx.try_reserve(0).unwrap_err(),
            QueueError::NotEnoughSpace { requested: 0 }
        );
        // Larger than every block in the chain.
        assert_eq!(
            tx.try_reserve(256).unwrap_err(),
            QueueError::NotEnoughSpace { requested: 256 }
        );
    }

    #[test]
    fn switch_stamps_marker_and_consumer_follows() {
        // 64 payload bytes per block; 20 byte records take 24 byte frames.
        let (mut tx, mut rx) = chain_of(2, 80);

        commit_filled(&mut tx, 20, 0x11);
        commit_filled(&mut tx, 20, 0x22);
        // 48 of 64 bytes used; the next frame needs 28 and switches.
        commit_filled(&mut tx, 20, 0x33);

        assert_eq!(tx.shared.blocks[0].slot(48).load(Ordering::Relaxed), END_MARK);
        assert_eq!(tx.shared.blocks[0].slot(0).load(Ordering::Relaxed), 20);
        assert_eq!(tx.shared.blocks[1].slot(0).load(Ordering::Relaxed), 20);
        assert_eq!(tx.hot, 1);
        assert_eq!(tx.pos, 24);

        let rec = rx.try_peek().unwrap();
        assert_eq!(&*rec, &[0x11; 20]);
        rec.release();
        let rec = rx.try_peek().unwrap();
        assert_eq!(&*rec, &[0x22; 20]);
        rec.release();

        // The read position sits on the marker; the peek looks through to
        // the next block without moving anything.
        let shared = Arc::clone(&rx.shared);
        let rec = rx.try_peek().unwrap();
        assert_eq!(&*rec, &[0x33; 20]);
        assert_eq!(shared.cons_hot.load(Ordering::Relaxed), 0);
        rec.release();
        assert_eq!(shared.cons_hot.load(Ordering::Relaxed), 1);

        assert_eq!(rx.try_peek().unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn chain_cycles_back_to_the_first_block() {
        let (mut tx, mut rx) = chain_of(4, 80);

        // Several laps around the four blocks.
        for lap in 0..8 {
            for i in 0..6 {
                commit_filled(&mut tx, 20, (lap * 8 + i) as u8);
            }
            for i in 0..6 {
                let rec = rx.try_peek().unwrap();
                assert_eq!(rec.len(), 20);
                assert!(rec.iter().all(|&b| b == (lap * 8 + i) as u8));
                rec.release();
            }
            assert_eq!(rx.try_peek().unwrap_err(), QueueError::Empty);
        }
        assert_eq!(tx.hot, tx.shared.cons_hot.load(Ordering::Relaxed));
    }

    #[test]
    fn single_block_chain_reuses_released_space() {
        let (mut tx, mut rx) = chain_of(1, 80);

        commit_filled(&mut tx, 20, 0x11);
        commit_filled(&mut tx, 20, 0x22);
        // Block full for another 20 byte frame; the front is still unread,
        // so the switch back into the same block is refused.
        assert_eq!(
            tx.try_reserve(20).unwrap_err(),
            QueueError::NotEnoughSpace { requested: 20 }
        );

        rx.try_peek().unwrap().release();
        rx.try_peek().unwrap().release();

        // The consumer released the front; the producer wraps into it.
        commit_filled(&mut tx, 20, 0x33);
        let rec = rx.try_peek().unwrap();
        assert_eq!(&*rec, &[0x33; 20]);
        rec.release();
    }

    #[test]
    fn resets_realign_both_sides() {
        let (mut tx, mut rx) = chain_of(2, 80);

        commit_filled(&mut tx, 20, 0x11);
        commit_filled(&mut tx, 20, 0x22);
        rx.reset();
        assert_eq!(rx.try_peek().unwrap_err(), QueueError::Empty);

        tx.reset();
        commit_filled(&mut tx, 12, 0x33);
        let rec = rx.try_peek().unwrap();
        assert_eq!(&*rec, &[0x33; 12]);
        rec.release();
    }
}
