use std::fmt;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::delivery::{ActorAddr, BoxedEvent, EventDelivery};

/// An event scheduled for delivery at a future instant.
pub struct DelayedEvent {
    /// Destination actor.
    pub target: ActorAddr,

    /// Type-erased payload.
    pub event: BoxedEvent,

    /// Correlation cookie carried through to delivery.
    pub cookie: u64,

    /// Logical channel the event is delivered on.
    pub channel: u32,

    /// Monotonic deadline, microseconds on the runtime clock.
    pub run_at_us: u64,
}

impl fmt::Debug for DelayedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedEvent")
            .field("target", &self.target)
            .field("cookie", &self.cookie)
            .field("channel", &self.channel)
            .field("run_at_us", &self.run_at_us)
            .finish()
    }
}

/// A per-thread delayed-execution queue.
///
/// Each pool thread owns one of these; actor code running on the thread
/// pushes events with a deadline, and the runtime's global timer facility
/// drains due events through the reader handles collected at prepare time.
///
/// # Thread Safety
/// - Lock-free queue internally (SegQueue)
/// - Safe for concurrent producers and a draining consumer
pub struct SchedulerQueue {
    queue: SegQueue<DelayedEvent>,
}

impl fmt::Debug for SchedulerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerQueue")
            .field("len", &self.queue.len())
            .finish()
    }
}

impl Default for SchedulerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerQueue {
    pub fn new() -> Self {
        Self { queue: SegQueue::new() }
    }

    /// Enqueue an event for future delivery.
    pub fn push(&self, event: DelayedEvent) {
        self.queue.push(event);
    }

    /// Try to pop one pending event, due or not.
    pub fn try_pop(&self) -> Option<DelayedEvent> {
        self.queue.pop()
    }

    /// Deliver every event whose deadline has passed, re-queueing the
    /// rest. Returns the number of events delivered.
    ///
    /// Inspects at most the events present when the call starts, so a
    /// producer pushing concurrently cannot keep the drain spinning.
    pub fn drain_due(&self, now_us: u64, delivery: &dyn EventDelivery) -> usize {
        let pending = self.queue.len();
        let mut delivered = 0;
        for _ in 0..pending {
            match self.queue.pop() {
                Some(ev) if ev.run_at_us <= now_us => {
                    delivery.send(ev.target, ev.event, ev.cookie, ev.channel);
                    delivered += 1;
                }
                Some(ev) => self.queue.push(ev),
                None => break,
            }
        }
        delivered
    }

    /// Number of pending events. Snapshot only.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Handle used by the global timer facility to drain one thread's queue.
pub type SchedulerQueueReader = Arc<SchedulerQueue>;
