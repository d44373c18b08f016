//! Cooperative task scheduler.
//!
//! Tasks are pooled slots with bounded FIFO mailboxes, each running its
//! handler loop in its own context. The scheduler owns the slot arenas,
//! the name and group registries, per-task timers and the liveness
//! watchdog. See [`Scheduler`] for the operation surface.

pub mod msg;
pub(crate) mod pool;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod task;
pub mod timer;
pub(crate) mod watchdog;

pub use msg::{Body, Message, Origin, EV_NULL, EV_POWERON, EV_TIMER_BASE, EV_USER_BASE};
pub use scheduler::{Scheduler, SchedulerStats, TaskHandle};
pub use task::{
    DeathCallback, GroupDesc, Handler, StartMode, StaticTaskSpec, TaskDesc, TaskRef, WatchdogSpec,
};
pub use timer::{TimerDesc, TimerId, TimerKind};
