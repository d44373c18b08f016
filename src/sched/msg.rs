//! Inter-task messages and event identifier bands.

use crate::sched::task::TaskRef;
use std::any::Any;
use std::sync::Arc;

/// Null event.
pub const EV_NULL: u32 = 0;

/// Power-on event, sent by the scheduler when it starts a static task.
pub const EV_POWERON: u32 = 1;

/// Base of the timer-expiry band: an expiry message carries
/// `EV_TIMER_BASE + tag`, where `tag` is the user-defined timer tag.
pub const EV_TIMER_BASE: u32 = 0x1000;

/// First identifier available to user events.
pub const EV_USER_BASE: u32 = 0x2000;

/// Opaque message body / user-data payload.
pub type Body = Arc<dyn Any + Send + Sync>;

/// Who enqueued a message.
///
/// System events originate from the scheduler or the timer engine rather
/// than from a pooled task, so the sender is a tagged variant instead of a
/// task handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The scheduler itself (power-on and other system events)
    Scheduler,
    /// The timer engine (expiry messages)
    Timer,
    /// An ordinary task
    Task(TaskRef),
}

/// One mailbox message.
#[derive(Clone)]
pub struct Message {
    pub sender: Origin,
    pub receiver: TaskRef,
    /// Event identifier; see the `EV_*` bands.
    pub id: u32,
    pub body: Option<Body>,
}

impl Message {
    pub fn new(sender: Origin, receiver: TaskRef, id: u32) -> Self {
        Message {
            sender,
            receiver,
            id,
            body: None,
        }
    }

    pub fn with_body(sender: Origin, receiver: TaskRef, id: u32, body: Body) -> Self {
        Message {
            sender,
            receiver,
            id,
            body: Some(body),
        }
    }

    /// Downcast the body to a concrete payload type.
    pub fn body_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.body.as_ref().and_then(|b| b.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("id", &self.id)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
