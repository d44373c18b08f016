//! Convenience re-exports for embedders.

pub use crate::codec::{Datagram, UdpMessage};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::sched::{
    GroupDesc, Message, Origin, Scheduler, StaticTaskSpec, TaskDesc, TaskHandle, TaskRef,
    TimerDesc, TimerKind, WatchdogSpec, EV_NULL, EV_POWERON, EV_TIMER_BASE, EV_USER_BASE,
};
