//! Fixed message queues
//!
//! A small set of bounded FIFO queues for inter-task messages. Items are
//! at most one word wide and copied by value. Full and empty conditions
//! are reported, never waited on.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

use crate::config::{QUEUE_MAX_COUNT, QUEUE_MAX_SIZE};

/// Widest item a queue can carry (bytes)
pub const MAX_ITEM_SIZE: usize = core::mem::size_of::<u32>();

/// Queue operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue is full")]
    Full,

    /// Unknown or uncreated queue, bad item size, or short buffer
    #[error("invalid queue operation")]
    Invalid,
}

/// Circular buffer of `QUEUE_MAX_SIZE` items
#[derive(Debug, Clone, Copy)]
struct Queue {
    buffer: [[u8; MAX_ITEM_SIZE]; QUEUE_MAX_SIZE],
    item_size: usize,
    /// Next write slot
    head: usize,
    /// Next read slot
    tail: usize,
    count: usize,
    initialized: bool,
}

impl Queue {
    const fn empty() -> Self {
        Self {
            buffer: [[0u8; MAX_ITEM_SIZE]; QUEUE_MAX_SIZE],
            item_size: 0,
            head: 0,
            tail: 0,
            count: 0,
            initialized: false,
        }
    }
}

/// The kernel's queue table
#[derive(Debug)]
pub struct MessageQueues {
    queues: [Queue; QUEUE_MAX_COUNT],
}

impl MessageQueues {
    /// All queues uncreated
    pub const fn new() -> Self {
        Self {
            queues: [Queue::empty(); QUEUE_MAX_COUNT],
        }
    }

    /// Reset every queue to uncreated
    pub fn init(&mut self) {
        self.queues = [Queue::empty(); QUEUE_MAX_COUNT];
    }

    /// (Re)create queue `id` carrying items of `item_size` bytes
    pub fn create(&mut self, id: u8, item_size: usize) -> Result<(), QueueError> {
        if item_size == 0 || item_size > MAX_ITEM_SIZE {
            return Err(QueueError::Invalid);
        }
        let queue = self
            .queues
            .get_mut(id as usize)
            .ok_or(QueueError::Invalid)?;
        *queue = Queue {
            item_size,
            initialized: true,
            ..Queue::empty()
        };
        Ok(())
    }

    /// Copy the first `item_size` bytes of `data` onto the queue
    pub fn send(&mut self, id: u8, data: &[u8]) -> Result<(), QueueError> {
        let queue = self.created_mut(id)?;
        if data.len() < queue.item_size {
            return Err(QueueError::Invalid);
        }
        if queue.count >= QUEUE_MAX_SIZE {
            return Err(QueueError::Full);
        }

        let size = queue.item_size;
        queue.buffer[queue.head][..size].copy_from_slice(&data[..size]);
        queue.head = (queue.head + 1) % QUEUE_MAX_SIZE;
        queue.count += 1;
        Ok(())
    }

    /// Move the oldest item into the first `item_size` bytes of `buf`
    pub fn receive(&mut self, id: u8, buf: &mut [u8]) -> Result<(), QueueError> {
        let queue = self.created_mut(id)?;
        if buf.len() < queue.item_size {
            return Err(QueueError::Invalid);
        }
        if queue.count == 0 {
            return Err(QueueError::Empty);
        }

        let size = queue.item_size;
        buf[..size].copy_from_slice(&queue.buffer[queue.tail][..size]);
        queue.tail = (queue.tail + 1) % QUEUE_MAX_SIZE;
        queue.count -= 1;
        Ok(())
    }

    /// True for an empty queue and for an unknown id
    pub fn is_empty(&self, id: u8) -> bool {
        self.queues
            .get(id as usize)
            .map_or(true, |queue| queue.count == 0)
    }

    /// False for an unknown id
    pub fn is_full(&self, id: u8) -> bool {
        self.queues
            .get(id as usize)
            .is_some_and(|queue| queue.count >= QUEUE_MAX_SIZE)
    }

    /// Items currently queued (0 for an unknown id)
    pub fn len(&self, id: u8) -> usize {
        self.queues.get(id as usize).map_or(0, |queue| queue.count)
    }

    /// Items a queue can hold
    pub const fn capacity(&self) -> usize {
        QUEUE_MAX_SIZE
    }

    fn created_mut(&mut self, id: u8) -> Result<&mut Queue, QueueError> {
        self.queues
            .get_mut(id as usize)
            .filter(|queue| queue.initialized)
            .ok_or(QueueError::Invalid)
    }
}

impl Default for MessageQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_receive() {
        let mut queues = MessageQueues::new();
        queues.create(0, 4).unwrap();
        assert!(queues.is_empty(0));

        queues.send(0, &42u32.to_le_bytes()).unwrap();
        assert_eq!(queues.len(0), 1);
        assert!(!queues.is_empty(0));

        let mut out = [0u8; 4];
        queues.receive(0, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes(out), 42);
        assert!(queues.is_empty(0));
    }

    #[test]
    fn test_full_queue() {
        let mut queues = MessageQueues::new();
        queues.create(1, 1).unwrap();
        for i in 0..QUEUE_MAX_SIZE as u8 {
            queues.send(1, &[i]).unwrap();
        }
        assert!(queues.is_full(1));
        assert_eq!(queues.send(1, &[99]), Err(QueueError::Full));
        assert_eq!(queues.len(1), QUEUE_MAX_SIZE);
    }

    #[test]
    fn test_empty_queue() {
        let mut queues = MessageQueues::new();
        queues.create(0, 2).unwrap();
        let mut out = [0u8; 2];
        assert_eq!(queues.receive(0, &mut out), Err(QueueError::Empty));
    }

    #[test]
    fn test_fifo_order_with_wraparound() {
        let mut queues = MessageQueues::new();
        queues.create(0, 2).unwrap();
        let mut out = [0u8; 2];
        for round in 0..3u16 {
            for i in 0..6u16 {
                queues.send(0, &(round * 100 + i).to_le_bytes()).unwrap();
            }
            for i in 0..6u16 {
                queues.receive(0, &mut out).unwrap();
                assert_eq!(u16::from_le_bytes(out), round * 100 + i);
            }
        }
    }

    #[test]
    fn test_invalid_operations() {
        let mut queues = MessageQueues::new();
        assert_eq!(queues.create(QUEUE_MAX_COUNT as u8, 4), Err(QueueError::Invalid));
        assert_eq!(queues.create(0, 5), Err(QueueError::Invalid));
        assert_eq!(queues.create(0, 0), Err(QueueError::Invalid));
        assert_eq!(queues.send(0, &[1, 2, 3, 4]), Err(QueueError::Invalid));

        queues.create(0, 4).unwrap();
        assert_eq!(queues.send(0, &[1, 2]), Err(QueueError::Invalid));
        let mut short = [0u8; 3];
        assert_eq!(queues.receive(0, &mut short), Err(QueueError::Invalid));
    }

    #[test]
    fn test_unknown_id_queries() {
        let queues = MessageQueues::new();
        assert!(queues.is_empty(7));
        assert!(!queues.is_full(7));
        assert_eq!(queues.len(7), 0);
    }

    #[test]
    fn test_recreate_resets() {
        let mut queues = MessageQueues::new();
        queues.create(0, 1).unwrap();
        queues.send(0, &[1]).unwrap();
        queues.create(0, 4).unwrap();
        assert!(queues.is_empty(0));
        queues.init();
        assert_eq!(queues.send(0, &[0; 4]), Err(QueueError::Invalid));
    }
}
