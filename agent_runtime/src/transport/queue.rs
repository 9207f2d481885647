// Bounded per-destination delivery queue.
//
// FIFO is preserved per destination — out-of-order delivery would corrupt
// state updates at the controller — but not globally. Each destination's
// queue is bounded; under sustained controller unavailability the OLDEST
// message is dropped on overflow, since the controller cares about the
// latest state and a stale entry is the least valuable.

use std::collections::{HashMap, VecDeque};

use log::warn;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::message::DestinationVerb;

/// Default per-destination bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// A message mapped, serialized, and awaiting transport.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub verb: DestinationVerb,
    pub path: String,
    pub body: Vec<u8>,
}

/// Ordered pending messages, keyed by mapped destination path.
#[derive(Debug)]
pub struct DeliveryQueue {
    pending: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
    notify: Notify,
    capacity: usize,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        DeliveryQueue {
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues a message, evicting the destination's oldest entry when the
    /// bound is reached.
    pub fn push(&self, message: QueuedMessage) {
        {
            let mut pending = self.pending.lock();
            let queue = pending.entry(message.path.clone()).or_default();
            if queue.len() >= self.capacity {
                queue.pop_front();
                warn!(
                    "delivery queue full for {}, dropped oldest message",
                    message.path
                );
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Takes at most one message per destination, each destination's oldest.
    ///
    /// The dispatcher calls this in a loop; taking one message per
    /// destination per pass preserves per-destination order while letting
    /// no destination starve the others.
    pub fn drain_pass(&self) -> Vec<QueuedMessage> {
        let mut pending = self.pending.lock();
        let batch: Vec<QueuedMessage> = pending
            .values_mut()
            .filter_map(VecDeque::pop_front)
            .collect();
        pending.retain(|_, queue| !queue.is_empty());
        batch
    }

    /// Waits until a push signals new work.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        DeliveryQueue::new(DEFAULT_QUEUE_CAPACITY)
    }
}
