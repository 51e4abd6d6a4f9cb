//! A blocking first-in first-out queue shared between an application thread
//! and a background task.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Unbounded FIFO queue. Cloning a `Fifo` yields another handle to the same
/// queue, so a producer and a consumer running on different threads can
/// each hold one. Items are handed over exactly once, in the order they were
/// put.
#[derive(Debug)]
pub struct Fifo<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fifo<T> {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Append an item. Never blocks.
    pub fn put(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(item);
    }

    /// Remove the oldest item, suspending the calling thread until one is
    /// put if the queue is empty.
    pub fn take(&self) -> T {
        loop {
            if let Ok(item) = self.receiver.recv() {
                return item;
            }
        }
    }

    /// Remove the oldest item if there is one.
    pub fn try_take(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of items currently queued.
    pub fn count(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn items_come_out_in_order() {
        let fifo = Fifo::new();
        for i in 0..10 {
            fifo.put(i);
        }
        assert_eq!(fifo.count(), 10);
        let taken: Vec<_> = (0..10).map(|_| fifo.take()).collect();
        assert_eq!(taken, (0..10).collect::<Vec<_>>());
        assert!(fifo.is_empty());
        assert_eq!(fifo.try_take(), None);
    }

    #[test]
    fn take_waits_for_a_producer_on_another_thread() {
        let fifo = Fifo::new();
        let producer = fifo.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            for i in 0..100 {
                producer.put(i)
            }
        });
        let taken: Vec<u32> = (0..100).map(|_| fifo.take()).collect();
        handle.join().unwrap();
        assert_eq!(taken, (0..100).collect::<Vec<_>>());
        assert_eq!(fifo.count(), 0);
    }
}
