//! peercore - core runtime for a peer-to-peer node.
//!
//! The heart of the crate is a cooperative task scheduler: pooled task
//! slots with bounded FIFO mailboxes, a name and group registry, per-task
//! one-shot and periodic timers, and a liveness watchdog. Alongside it
//! lives the UDP discovery message codec, the boundary collaborator that
//! exercises the scheduler's message flow.
//!
//! # Quick Start
//!
//! ```no_run
//! use peercore::prelude::*;
//!
//! let sched = Scheduler::new(Config::default()).unwrap();
//!
//! sched
//!     .create_task(&TaskDesc::new("echo", |h, msg| {
//!         if let Some(msg) = msg {
//!             if let Origin::Task(sender) = msg.sender {
//!                 let _ = h.send(sender, msg.id, msg.body.clone());
//!             }
//!         }
//!     }))
//!     .unwrap();
//!
//! sched.stop_task("echo").unwrap();
//! ```

// Lint configuration
#![warn(missing_debug_implementations)]
#![allow(dead_code)] // During development

pub mod codec;
pub mod config;
pub mod error;
pub mod prelude;
pub mod runtime;
pub mod sched;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use runtime::{init, init_with_config, shutdown};
pub use sched::{Scheduler, SchedulerStats, TaskDesc, TaskHandle};
