use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// Unbounded queues warn once when they grow past this depth.
const HIGH_WATER_MARK: usize = 1024;

/// Blocking multi-producer/single-consumer FIFO of move-only elements.
///
/// `push` blocks while the queue is full, `take` blocks while it is empty.
/// There is no peek and no timeout; cancellation travels through the queue
/// itself as an end-of-stream message.
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    item_cv: Condvar,
    space_cv: Condvar,
    limit: usize,
    high_water_warned: AtomicBool,
}

impl<T> Queue<T> {
    /// Queue with a fixed capacity; a limit of 0 means unbounded.
    pub fn bounded(limit: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            item_cv: Condvar::new(),
            space_cv: Condvar::new(),
            limit,
            high_water_warned: AtomicBool::new(false),
        }
    }

    /// Unbounded queue with a high-water-mark warning.
    pub fn unbounded() -> Self {
        Self::bounded(0)
    }

    /// Enqueue an element, blocking while the queue is full.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        if self.limit != 0 {
            while items.len() >= self.limit {
                self.space_cv.wait(&mut items);
            }
        } else if items.len() >= HIGH_WATER_MARK
            && !self.high_water_warned.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                depth = items.len(),
                "unbounded queue past high-water mark; downstream stage is falling behind"
            );
        }
        items.push_back(item);
        self.item_cv.notify_one();
    }

    /// Dequeue the oldest element, blocking while the queue is empty.
    pub fn take(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                if self.limit != 0 {
                    self.space_cv.notify_one();
                }
                return item;
            }
            self.item_cv.wait(&mut items);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = Queue::unbounded();
        for i in 0..10 {
            q.push(i);
        }
        let drained: Vec<i32> = (0..10).map(|_| q.take()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn take_blocks_until_an_element_arrives() {
        let q = Arc::new(Queue::<u32>::unbounded());
        let q2 = Arc::clone(&q);
        let consumer = std::thread::spawn(move || q2.take());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!consumer.is_finished());
        q.push(7);
        assert_eq!(consumer.join().unwrap(), 7);
    }

    #[test]
    fn push_blocks_at_capacity() {
        let q = Arc::new(Queue::bounded(2));
        q.push(0);
        q.push(1);

        let q2 = Arc::clone(&q);
        let producer = std::thread::spawn(move || q2.push(2));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());

        assert_eq!(q.take(), 0);
        producer.join().unwrap();
        assert_eq!(q.take(), 1);
        assert_eq!(q.take(), 2);
    }

    #[test]
    fn multiple_producers_single_consumer() {
        let q = Arc::new(Queue::bounded(4));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        q.push(p * 100 + i);
                    }
                })
            })
            .collect();

        let mut seen = Vec::with_capacity(100);
        for _ in 0..100 {
            seen.push(q.take());
        }
        for producer in producers {
            producer.join().unwrap();
        }

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 100);
    }
}
