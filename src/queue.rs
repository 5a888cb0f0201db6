//! Per-channel sample queues between the acquisition loop and the writers.
//!
//! Single producer, single consumer, strict FIFO. The queue is unbounded:
//! hardware reads must never stall on disk latency, so a slow disk shows up
//! as queue depth (observable via [`BlockSender::depth`]) rather than as
//! dropped samples. Closing the sender signals end-of-input without
//! discarding anything already queued; the receiver drains the remainder and
//! then sees `None`.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::SampleBlock;

/// Create one channel's queue pair
pub fn block_queue() -> (BlockSender, BlockReceiver) {
    let (tx, rx) = unbounded();
    (BlockSender { tx: Some(tx) }, BlockReceiver { rx })
}

/// Producer half, held by the acquisition loop
pub struct BlockSender {
    tx: Option<Sender<SampleBlock>>,
}

impl BlockSender {
    /// Enqueue a block. Returns false if the queue is closed or the consumer
    /// is gone (its writer bailed out); the block is dropped in that case.
    pub fn push(&mut self, block: SampleBlock) -> bool {
        match &self.tx {
            Some(tx) => tx.send(block).is_ok(),
            None => false,
        }
    }

    /// Mark that no further blocks will arrive. Idempotent; queued blocks
    /// stay available to the consumer.
    pub fn close(&mut self) {
        self.tx.take();
    }

    /// Blocks currently waiting in the queue
    pub fn depth(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }
}

/// Consumer half, owned by one writer task
pub struct BlockReceiver {
    rx: Receiver<SampleBlock>,
}

impl BlockReceiver {
    /// Wait for the next block; `None` means closed and fully drained
    pub fn pop(&self) -> Option<SampleBlock> {
        self.rx.recv().ok()
    }

    /// Non-blocking variant; `None` means nothing available right now
    pub fn try_pop(&self) -> Option<SampleBlock> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(vals: &[f32]) -> SampleBlock {
        SampleBlock::from_interleaved(vals.to_vec())
    }

    #[test]
    fn fifo_order_preserved() {
        let (mut tx, rx) = block_queue();
        for i in 0..10 {
            assert!(tx.push(block(&[i as f32, 0.0])));
        }
        for i in 0..10 {
            assert_eq!(rx.pop().unwrap(), block(&[i as f32, 0.0]));
        }
    }

    #[test]
    fn close_keeps_queued_blocks() {
        let (mut tx, rx) = block_queue();
        tx.push(block(&[1.0, 2.0]));
        tx.push(block(&[3.0, 4.0]));
        tx.close();
        tx.close(); // idempotent
        assert!(!tx.push(block(&[5.0, 6.0])));
        assert_eq!(rx.pop(), Some(block(&[1.0, 2.0])));
        assert_eq!(rx.pop(), Some(block(&[3.0, 4.0])));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn try_pop_does_not_block() {
        let (mut tx, rx) = block_queue();
        assert_eq!(rx.try_pop(), None);
        tx.push(block(&[1.0, 1.0]));
        assert_eq!(rx.try_pop(), Some(block(&[1.0, 1.0])));
    }

    #[test]
    fn depth_tracks_backlog() {
        let (mut tx, rx) = block_queue();
        assert_eq!(tx.depth(), 0);
        tx.push(block(&[0.0, 0.0]));
        tx.push(block(&[0.0, 0.0]));
        assert_eq!(tx.depth(), 2);
        rx.pop();
        assert_eq!(tx.depth(), 1);
    }

    #[test]
    fn push_fails_when_consumer_gone() {
        let (mut tx, rx) = block_queue();
        drop(rx);
        assert!(!tx.push(block(&[0.0, 0.0])));
    }
}
