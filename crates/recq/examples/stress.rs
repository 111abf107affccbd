//! Two-thread stress harness mirroring the classic fingerprint check:
//! the producer fills every record with `length & 0xff`, the consumer
//! validates each byte and both sides account totals.
//!
//! Usage: `cargo run --release --example stress -- [ring|chain] [seconds]`

use rand::Rng;
use recq::{ChainQueue, Pacer, QueueError, RingQueue};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Totals {
    written: u64,
    read: u64,
    invalid: u64,
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let variant = args.next().unwrap_or_else(|| "ring".to_string());
    let secs = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    println!("stress: {variant} queue, {secs}s run");
    let totals = match variant.as_str() {
        "ring" => run_ring(Duration::from_secs(secs)),
        "chain" => run_chain(Duration::from_secs(secs)),
        other => {
            eprintln!("unknown variant {other:?}, expected ring or chain");
            return ExitCode::FAILURE;
        }
    };

    if totals.invalid > 0 || totals.written != totals.read {
        println!(
            "MISMATCH: wrote {} read {} invalid {}",
            totals.written, totals.read, totals.invalid
        );
        ExitCode::FAILURE
    } else {
        println!("match: {} bytes both ways", totals.read);
        ExitCode::SUCCESS
    }
}

fn run_ring(duration: Duration) -> Totals {
    let (tx, rx) = RingQueue::new(4 * 1024 * 1024)
        .expect("ring allocation")
        .split();
    run(duration, tx, rx, |tx, n| match tx.try_reserve(n) {
        Ok(mut r) => {
            r.fill((n & 0xff) as u8);
            r.commit();
            true
        }
        Err(QueueError::NotEnoughSpace { .. }) => false,
        Err(e) => panic!("producer error: {e}"),
    })
}

fn run_chain(duration: Duration) -> Totals {
    let mut queue = ChainQueue::new();
    for _ in 0..4 {
        queue.add_block(1024 * 1024).expect("block allocation");
    }
    let (tx, rx) = queue.split();
    run(duration, tx, rx, |tx, n| match tx.try_reserve(n) {
        Ok(mut r) => {
            r.fill((n & 0xff) as u8);
            r.commit();
            true
        }
        Err(QueueError::NotEnoughSpace { .. }) => false,
        Err(e) => panic!("producer error: {e}"),
    })
}

fn run<P, C>(duration: Duration, mut tx: P, rx: C, mut produce: impl FnMut(&mut P, usize) -> bool) -> Totals
where
    C: Consume + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let consumer_stop = Arc::clone(&stop);

    let consumer = thread::spawn(move || {
        let mut rx = rx;
        let mut read = 0u64;
        let mut invalid = 0u64;
        let mut pacer = Pacer::new();
        loop {
            match rx.consume_one() {
                Some((n, ok)) => {
                    if ok {
                        read += n as u64;
                    } else {
                        invalid += 1;
                    }
                    pacer.hit();
                }
                None => {
                    if consumer_stop.load(Ordering::Acquire) {
                        break;
                    }
                    pacer.miss();
                }
            }
        }
        (read, invalid)
    });

    let mut rng = rand::thread_rng();
    let mut written = 0u64;
    let mut pacer = Pacer::new();
    let start = Instant::now();
    while start.elapsed() < duration {
        let n = rng.gen_range(4..100);
        if produce(&mut tx, n) {
            written += n as u64;
            pacer.hit();
        } else {
            pacer.miss();
        }
    }

    stop.store(true, Ordering::Release);
    let (read, invalid) = consumer.join().unwrap();
    Totals {
        written,
        read,
        invalid,
    }
}

/// Uniform drain step over both consumer types.
trait Consume {
    /// Releases the next record, reporting its size and whether every
    /// byte carried the fingerprint.
    fn consume_one(&mut self) -> Option<(usize, bool)>;
}

impl Consume for recq::RingConsumer {
    fn consume_one(&mut self) -> Option<(usize, bool)> {
        let rec = self.try_peek().ok()?;
        let n = rec.len();
        let ok = rec.iter().all(|&b| b == (n & 0xff) as u8);
        rec.release();
        Some((n, ok))
    }
}

impl Consume for recq::ChainConsumer {
    fn consume_one(&mut self) -> Option<(usize, bool)> {
        let rec = self.try_peek().ok()?;
        let n = rec.len();
        let ok = rec.iter().all(|&b| b == (n & 0xff) as u8);
        rec.release();
        Some((n, ok))
    }
}
