//! Bounded single-producer/single-consumer FIFO carrying `Record`s from the
//! task worker to the flushing consumer. `std::sync::mpsc::sync_channel`
//! already provides exactly this contract — bounded, blocking `send`,
//! strict FIFO — and is the same channel primitive the WAL worker uses for
//! its write-request queue.

use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use crate::model::Record;

/// Returned by `take` when the deadline elapses with nothing available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

pub struct RecordQueue {
    sender: SyncSender<Record>,
    receiver: mpsc::Receiver<Record>,
}

impl RecordQueue {
    /// `capacity` bounds how many records may be buffered before `put`
    /// blocks the producer. The spec's default is 100 for tests, 2048
    /// typical in production configuration.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        Self { sender, receiver }
    }

    /// A cloneable producer handle, since the task worker thread owns the
    /// producing side while the queue itself stays with the consumer.
    pub fn producer(&self) -> RecordProducer {
        RecordProducer {
            sender: self.sender.clone(),
        }
    }

    /// Returns one record, or `Err(Timeout)` if none arrives before
    /// `timeout` elapses.
    pub fn take(&self, timeout: Duration) -> Result<Record, Timeout> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Timeout,
            RecvTimeoutError::Disconnected => Timeout,
        })
    }

    /// Returns up to `max` currently-available records without waiting.
    pub fn drain(&self, max: usize) -> Vec<Record> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.receiver.try_recv() {
                Ok(record) => out.push(record),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

/// The producer half, held by the task worker. `put` blocks when the queue
/// is full — no dropping, ever.
#[derive(Clone)]
pub struct RecordProducer {
    sender: SyncSender<Record>,
}

impl RecordProducer {
    pub fn put(&self, record: Record) {
        // `send` on a bounded channel blocks until a slot frees up. The
        // only failure mode is a disconnected receiver (queue dropped),
        // which only happens during shutdown; there is nothing useful to
        // do with the record at that point.
        let _ = self.sender.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourcePosition;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn record(n: i64) -> Record {
        let mut partition = BTreeMap::new();
        partition.insert("server".to_string(), "A".to_string());
        let mut offset = BTreeMap::new();
        offset.insert("pos".to_string(), serde_json::json!(n));
        Record {
            topic: "t".to_string(),
            key: None,
            value: None,
            position: SourcePosition::new(partition, offset),
            timestamp_millis: 0,
        }
    }

    #[test]
    fn take_preserves_put_order() {
        let queue = RecordQueue::new(10);
        let producer = queue.producer();
        for i in 0..5 {
            producer.put(record(i));
        }
        for i in 0..5 {
            let r = queue.take(Duration::from_millis(100)).unwrap();
            assert_eq!(r.position.offset.get("pos").unwrap(), &serde_json::json!(i));
        }
    }

    #[test]
    fn take_times_out_when_empty() {
        let queue = RecordQueue::new(10);
        let result = queue.take(Duration::from_millis(20));
        assert!(result.is_err());
    }

    #[test]
    fn drain_returns_up_to_max_without_waiting() {
        let queue = RecordQueue::new(10);
        let producer = queue.producer();
        for i in 0..5 {
            producer.put(record(i));
        }
        let drained = queue.drain(3);
        assert_eq!(drained.len(), 3);
        let remaining = queue.drain(10);
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn backpressure_blocks_producer_until_a_take_frees_a_slot() {
        let queue = Arc::new(RecordQueue::new(4));
        let producer = queue.producer();
        for i in 0..4 {
            producer.put(record(i));
        }

        let unblocked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let unblocked_writer = Arc::clone(&unblocked);
        let handle = thread::spawn(move || {
            producer.put(record(4));
            unblocked_writer.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        // The 5th put should still be blocked shortly after being issued.
        thread::sleep(Duration::from_millis(50));
        assert!(!unblocked.load(std::sync::atomic::Ordering::SeqCst));

        // A single take unblocks exactly one put, and order is preserved.
        let first = queue.take(Duration::from_millis(200)).unwrap();
        assert_eq!(first.position.offset.get("pos").unwrap(), &serde_json::json!(0));

        handle.join().unwrap();
        assert!(unblocked.load(std::sync::atomic::Ordering::SeqCst));
    }
}
