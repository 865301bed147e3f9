use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Type-erased event payload handed to the delivery primitive.
pub type BoxedEvent = Box<dyn Any + Send>;

/// Opaque address of an actor within the hosting runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorAddr(pub u64);

impl fmt::Display for ActorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor:{}", self.0)
    }
}

/// The actor event-delivery boundary.
///
/// A single operation: deliver an event to an actor with a correlation
/// cookie on a logical channel. The CPU manager does not depend on this
/// beyond plumbing the handle to pools at prepare time; it is the same
/// primitive the runtime's response-dispatch paths use.
pub trait EventDelivery: Send + Sync {
    fn send(&self, target: ActorAddr, event: BoxedEvent, cookie: u64, channel: u32);
}
