//! # Block Queue Module
//!
//! A bounded hand-off between the capture thread and the analysis loop.
//! When the queue is full the oldest block is discarded: a tuner cares about
//! what is sounding now, not about analysing every block.

use crate::audio::AudioBlock;
use crate::error::{TunerError, TunerResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Producer half, owned by the capture thread.
#[derive(Clone)]
pub struct BlockProducer {
    sender: Sender<AudioBlock>,
    // Held so the producer can evict the oldest entry itself.
    evictor: Receiver<AudioBlock>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half, owned by the analysis loop.
pub struct BlockConsumer {
    receiver: Receiver<AudioBlock>,
    dropped: Arc<AtomicU64>,
}

/// Creates a queue holding at most `capacity` blocks.
pub fn block_queue(capacity: usize) -> (BlockProducer, BlockConsumer) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        BlockProducer {
            sender,
            evictor: receiver.clone(),
            dropped: Arc::clone(&dropped),
        },
        BlockConsumer { receiver, dropped },
    )
}

impl BlockProducer {
    /// Enqueues a block, evicting the oldest ones if the queue is full.
    pub fn push(&self, mut block: AudioBlock) {
        loop {
            match self.sender.try_send(block) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    block = rejected;
                    if self.evictor.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl BlockConsumer {
    /// Returns the freshest queued block, waiting up to `timeout` when the
    /// queue is empty. Older queued blocks are discarded.
    pub fn latest(&self, timeout: Duration) -> TunerResult<AudioBlock> {
        let mut newest = None;
        while let Ok(block) = self.receiver.try_recv() {
            if newest.replace(block).is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Some(block) = newest {
            return Ok(block);
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(block) => Ok(block),
            Err(RecvTimeoutError::Timeout) => Err(TunerError::DeviceReadTimeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TunerError::device("capture thread stopped delivering blocks"))
            }
        }
    }

    /// Number of blocks discarded unanalysed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: f32) -> AudioBlock {
        AudioBlock::new(vec![tag; 4], 8000)
    }

    #[test]
    fn overflow_drops_oldest() {
        let (producer, consumer) = block_queue(2);
        for tag in 0..5 {
            producer.push(block(tag as f32));
        }

        let latest = consumer.latest(Duration::from_millis(10)).unwrap();
        assert_eq!(latest.samples()[0], 4.0);
        // 0, 1, 2 evicted on push, 3 skipped by `latest`.
        assert_eq!(consumer.dropped(), 4);
    }

    #[test]
    fn empty_queue_times_out() {
        let (_producer, consumer) = block_queue(1);
        let err = consumer.latest(Duration::from_millis(5)).unwrap_err();
        assert_eq!(
            err,
            TunerError::DeviceReadTimeout {
                timeout: Duration::from_millis(5)
            }
        );
    }

    #[test]
    fn waits_for_a_late_block() {
        let (producer, consumer) = block_queue(1);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(block(7.0));
        });
        let latest = consumer.latest(Duration::from_secs(2)).unwrap();
        assert_eq!(latest.samples()[0], 7.0);
        handle.join().unwrap();
    }

    #[test]
    fn dropped_producer_reports_device_loss() {
        let (producer, consumer) = block_queue(1);
        drop(producer);
        assert!(matches!(
            consumer.latest(Duration::from_millis(5)),
            Err(TunerError::DeviceUnavailable { .. })
        ));
    }
}
