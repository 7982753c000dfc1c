use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::message::Message;
use crate::queue::Queue;

/// Forwards a stage's completed outputs to the input queues of the next
/// stage(s).
///
/// Ports are fan-in/fan-out capable: several ports may feed one queue, and
/// one port may feed several queues. With multiple targets, frames are
/// distributed round-robin and the end-of-stream sentinel is broadcast to
/// every target exactly once.
pub struct Port<T: Send> {
    targets: RwLock<Vec<Arc<Queue<Message<T>>>>>,
    next: AtomicUsize,
}

impl<T: Send> Port<T> {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(Vec::new()),
            next: AtomicUsize::new(0),
        }
    }

    pub fn attach(&self, target: Arc<Queue<Message<T>>>) {
        self.targets.write().push(target);
    }

    pub fn forward(&self, frame: T) {
        let targets = self.targets.read();
        match targets.len() {
            0 => {
                tracing::warn!("port has no attached stage; dropping frame");
            }
            1 => targets[0].push(Message::Frame(frame)),
            n => {
                let slot = self.next.fetch_add(1, Ordering::Relaxed) % n;
                targets[slot].push(Message::Frame(frame));
            }
        }
    }

    /// Broadcast one sentinel to every attached target.
    pub fn end_of_stream(&self) {
        for target in self.targets.read().iter() {
            target.push(Message::EndOfStream);
        }
    }
}

impl<T: Send> Default for Port<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_target_receives_everything_in_order() {
        let port = Port::new();
        let q = Arc::new(Queue::unbounded());
        port.attach(Arc::clone(&q));

        port.forward(1u32);
        port.forward(2);
        port.end_of_stream();

        assert_eq!(q.take().into_frame(), Some(1));
        assert_eq!(q.take().into_frame(), Some(2));
        assert!(q.take().is_end());
    }

    #[test]
    fn fan_out_round_robins_frames_and_broadcasts_the_sentinel() {
        let port = Port::new();
        let a = Arc::new(Queue::unbounded());
        let b = Arc::new(Queue::unbounded());
        port.attach(Arc::clone(&a));
        port.attach(Arc::clone(&b));

        for i in 0..4u32 {
            port.forward(i);
        }
        port.end_of_stream();

        assert_eq!(a.len(), 3); // 2 frames + sentinel
        assert_eq!(b.len(), 3);
        assert_eq!(a.take().into_frame(), Some(0));
        assert_eq!(b.take().into_frame(), Some(1));
    }
}
