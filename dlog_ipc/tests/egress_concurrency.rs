//! Producer/consumer tests across threads.
//!
//! The producer stands in for the sampler's timer callback: it enqueues
//! 32-byte frames tagged with a sequence number as fast as it can while a
//! deliberately slow consumer drains.

use dlog_common::consts::FRAME_BYTES;
use dlog_ipc::EgressQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn frame(seq: u32) -> [u8; FRAME_BYTES] {
    let mut bytes = [0u8; FRAME_BYTES];
    for chunk in bytes.chunks_exact_mut(4) {
        chunk.copy_from_slice(&seq.to_le_bytes());
    }
    bytes
}

/// Test: with a slow consumer, frames are dropped whole, memory stays at
/// capacity, and what is drained is intact frames in increasing order.
#[test]
fn slow_consumer_drops_whole_frames_in_order() {
    const ATTEMPTS: u32 = 20_000;
    let queue = Arc::new(EgressQueue::with_capacity(8 * FRAME_BYTES).unwrap());
    let mut consumer = queue.consumer().unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let queue = Arc::clone(&queue);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut accepted = 0u64;
            for seq in 0..ATTEMPTS {
                if queue.enqueue(&frame(seq)) {
                    accepted += 1;
                }
                assert!(queue.len() <= queue.capacity());
            }
            done.store(true, Ordering::Release);
            accepted
        })
    };

    let mut stream = Vec::new();
    let mut out = [0u8; 3 * FRAME_BYTES];
    loop {
        let finished = done.load(Ordering::Acquire);
        let drain = consumer.drain(&mut out);
        let n = drain.len();
        drop(drain);
        stream.extend_from_slice(&out[..n]);
        if finished && n == 0 {
            break;
        }
        thread::sleep(Duration::from_micros(200));
    }
    let accepted = producer.join().unwrap();

    assert_eq!(stream.len() % FRAME_BYTES, 0, "torn frame");
    let mut last = None;
    for raw in stream.chunks_exact(FRAME_BYTES) {
        let seq = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        assert_eq!(raw, &frame(seq)[..], "corrupted frame {seq}");
        if let Some(prev) = last {
            assert!(seq > prev, "frame {seq} after {prev}");
        }
        last = Some(seq);
    }

    let stats = queue.stats();
    assert_eq!(stream.len() / FRAME_BYTES, accepted as usize);
    assert_eq!(stats.enqueued_frames, accepted);
    assert_eq!(stats.enqueued_frames + stats.dropped_frames, ATTEMPTS as u64);
    assert!(stats.dropped_frames > 0, "consumer was not slow enough");
    assert!(stats.high_water <= stats.capacity);
}

/// Test: a reset racing the consumer never lets pre-reset bytes through
/// once the reset has returned.
#[test]
fn reset_waits_for_in_flight_drain() {
    let queue = Arc::new(EgressQueue::with_capacity(16 * FRAME_BYTES).unwrap());
    let mut consumer = queue.consumer().unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let written = Arc::new(sink::Stream::default());

    let writer = {
        let stop = Arc::clone(&stop);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            let mut out = [0u8; 8 * FRAME_BYTES];
            while !stop.load(Ordering::Acquire) {
                let drain = consumer.drain(&mut out);
                if !drain.is_empty() && !drain.is_stale() {
                    // Slow "transport write" while the drain is in flight.
                    thread::sleep(Duration::from_micros(50));
                    written.push(&out[..drain.len()]);
                }
                drop(drain);
                thread::yield_now();
            }
        })
    };

    for round in 0..200u32 {
        for seq in 0..4 {
            queue.enqueue(&frame(round * 10 + seq));
        }
        queue.reset();
        let mark = written.len();
        thread::sleep(Duration::from_micros(100));
        assert_eq!(written.len(), mark, "bytes written after reset in round {round}");
    }

    stop.store(true, Ordering::Release);
    writer.join().unwrap();
}

mod sink {
    use std::sync::Mutex;

    /// Byte sink shared with the writer thread.
    #[derive(Default)]
    pub struct Stream(Mutex<Vec<u8>>);

    impl Stream {
        pub fn push(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }

        pub fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }
}
