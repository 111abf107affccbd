//! recq — Lock-Free SPSC Byte-Record Queues
//!
//! Two single-producer single-consumer queues that hand variable-length
//! byte records between exactly two threads without ever copying them:
//!
//! - [`RingQueue`]: one fixed-size contiguous region with wrap-around.
//! - [`ChainQueue`]: an ordered chain of blocks traversed cyclically,
//!   grown by appending blocks before the two threads start.
//!
//! The producer reserves space for a record of a declared size, writes the
//! bytes directly into the queue, and commits. The consumer peeks the next
//! complete record in place and releases it. Records arrive in commit
//! order, byte for byte.
//!
//! # Example
//!
//! ```
//! use recq::RingQueue;
//!
//! let (mut tx, mut rx) = RingQueue::new(4096).unwrap().split();
//!
//! let mut slot = tx.try_reserve(5).unwrap();
//! slot.copy_from_slice(b"hello");
//! slot.commit();
//!
//! let record = rx.try_peek().unwrap();
//! assert_eq!(&*record, b"hello");
//! record.release();
//! ```
//!
//! Both queues are strictly non-blocking: `try_reserve` and `try_peek`
//! report `NotEnoughSpace` / `Empty` and the caller decides whether to
//! spin, yield ([`Pacer`] helps with that), or do other work.

mod chain;
mod error;
mod frame;
mod invariants;
mod poll;
mod ring;
pub use chain::{
    ChainConsumer, ChainProducer, ChainQueue, ChainRecord, ChainReservation, BLOCK_HEADER_SIZE,
};
pub use error::QueueError;
pub use frame::MAX_PAYLOAD;
pub use poll::Pacer;
pub use ring::{RingConsumer, RingProducer, RingQueue, RingRecord, RingReservation};
