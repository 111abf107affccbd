//! Integration tests for the chain queue.

use rand::Rng;
use recq::{ChainQueue, Pacer, QueueError, BLOCK_HEADER_SIZE};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn chain_of(blocks: usize, block_size: usize) -> ChainQueue {
    let mut queue = ChainQueue::new();
    for _ in 0..blocks {
        queue.add_block(block_size).unwrap();
    }
    queue
}

#[test]
fn large_blocks_switch_and_records_survive_the_boundary() {
    // Four 1 MiB blocks; 300 KB records leave trailing slack in each
    // block, so every fourth commit crosses a block boundary.
    let (mut tx, mut rx) = chain_of(4, 1024 * 1024).split();

    const N: usize = 300_000;
    for round in 0..9u8 {
        let mut r = tx.try_reserve(N).unwrap();
        r.fill(round);
        r.commit();
    }
    for round in 0..9u8 {
        let rec = rx.try_peek().unwrap();
        assert_eq!(rec.len(), N);
        assert!(rec.iter().all(|&b| b == round));
        rec.release();
    }
    assert_eq!(rx.try_peek().unwrap_err(), QueueError::Empty);
}

#[test]
fn chain_fills_drains_and_cycles() {
    let (mut tx, mut rx) = chain_of(4, 4096).split();
    let mut written = 0u64;
    let mut read = 0u64;
    let mut produced = 0usize;

    // Fill until full, drain to empty, repeat; the hot blocks lap the
    // chain several times.
    for _ in 0..20 {
        loop {
            let n = 4 + (produced * 17) % 96;
            match tx.try_reserve(n) {
                Ok(mut r) => {
                    r.fill((n & 0xff) as u8);
                    r.commit();
                    written += n as u64;
                    produced += 1;
                }
                Err(QueueError::NotEnoughSpace { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        while let Ok(rec) = rx.try_peek() {
            let n = rec.len();
            assert!(rec.iter().all(|&b| b == (n & 0xff) as u8));
            rec.release();
            read += n as u64;
        }
    }
    assert_eq!(written, read);
}

#[test]
fn external_blocks_mix_with_owned_blocks() {
    let bump = bumpalo::Bump::new();
    let layout = std::alloc::Layout::from_size_align(4096, 64).unwrap();
    let ptr: NonNull<u8> = bump.alloc_layout(layout);

    let mut queue = ChainQueue::new();
    queue.add_block(4096).unwrap();
    // SAFETY: the bump arena outlives the queue; no deallocator, the arena
    // reclaims the bytes itself.
    unsafe { queue.add_block_raw(ptr, 4096, None).unwrap() };
    assert_eq!(
        queue.capacity(),
        (4096 - BLOCK_HEADER_SIZE) * 2
    );

    let (mut tx, mut rx) = queue.split();
    let mut produced = 0usize;
    // Enough records to cross into the external block and back.
    for round in 0..200usize {
        let n = 40 + round % 50;
        let mut r = tx.try_reserve(n).unwrap();
        r.fill((n & 0xff) as u8);
        r.commit();
        produced += 1;
        if produced % 3 == 0 {
            for _ in 0..3 {
                let rec = rx.try_peek().unwrap();
                let n = rec.len();
                assert!(rec.iter().all(|&b| b == (n & 0xff) as u8));
                rec.release();
            }
        }
    }
    rx.reset();
    assert_eq!(rx.try_peek().unwrap_err(), QueueError::Empty);
}

static FREED: AtomicUsize = AtomicUsize::new(0);

unsafe fn free_u32_backing(ptr: NonNull<u8>, size: usize) {
    FREED.fetch_add(1, Ordering::SeqCst);
    // Reconstructs the Box<[u32]> leaked by the test below.
    let slice = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr().cast::<u32>(), size / 4);
    drop(unsafe { Box::from_raw(slice) });
}

#[test]
fn registered_deallocator_runs_at_drop() {
    let backing: Box<[u32]> = vec![0u32; 1024].into_boxed_slice();
    let size = backing.len() * 4;
    let ptr = NonNull::new(Box::leak(backing).as_mut_ptr().cast::<u8>()).unwrap();

    let mut queue = ChainQueue::new();
    // SAFETY: the leaked allocation is exclusively the queue's until the
    // deallocator reclaims it.
    unsafe { queue.add_block_raw(ptr, size, Some(free_u32_backing)).unwrap() };
    let (mut tx, mut rx) = queue.split();

    let mut r = tx.try_reserve(16).unwrap();
    r.fill(0xEE);
    r.commit();
    let rec = rx.try_peek().unwrap();
    assert_eq!(&*rec, &[0xEE; 16]);
    rec.release();

    drop(tx);
    drop(rx);
    assert_eq!(FREED.load(Ordering::SeqCst), 1);
}

#[test]
fn threaded_fingerprint_stress() {
    let (mut tx, mut rx) = chain_of(4, 64 * 1024).split();

    let producer = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut pacer = Pacer::new();
        let mut written = 0u64;
        for _ in 0..200_000 {
            let n = rng.gen_range(4..100);
            loop {
                match tx.try_reserve(n) {
                    Ok(mut r) => {
                        r.fill((n & 0xff) as u8);
                        r.commit();
                        written += n as u64;
                        pacer.hit();
                        break;
                    }
                    Err(_) => pacer.miss(),
                }
            }
        }
        written
    });

    let mut read = 0u64;
    let mut records = 0u32;
    let mut pacer = Pacer::new();
    while records < 200_000 {
        match rx.try_peek() {
            Ok(rec) => {
                let n = rec.len();
                assert!(
                    rec.iter().all(|&b| b == (n & 0xff) as u8),
                    "torn read in a {n} byte record"
                );
                rec.release();
                read += n as u64;
                records += 1;
                pacer.hit();
            }
            Err(_) => pacer.miss(),
        }
    }

    let written = producer.join().unwrap();
    assert_eq!(written, read);
    assert_eq!(rx.try_peek().unwrap_err(), QueueError::Empty);
}
